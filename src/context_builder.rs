//! Top-level orchestration: wires the phone inventory, the allophone model manager, the
//! constructional transducer and the splitter driver together into the full construction
//! pipeline, the way `Builder::main()` drives the original tool end to end.

use std::io::Write as IoWrite;

use anyhow::{Context, Result};

use crate::context_set::{ContextQuestion, ContextSet, PhoneContext};
use crate::hmm_compiler::HmmCompiler;
use crate::model_splitter::ModelSplitter;
use crate::phone_models::ModelManager;
use crate::phones::{PhoneSymbols, Phones};
use crate::recipe::{RecipeWriter, SplitRecord};
use crate::sample::Samples;
use crate::scorer::Scorer;
use crate::transducer::{ConstructionalTransducer, NullObserver};
use crate::transducer_compiler::{CompiledTransducer, TransducerCompiler};

/// Tunable knobs controlling the shape of the constructed transducer and the splitting search,
/// one field per CLI flag.
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    pub num_left_contexts: usize,
    pub num_right_contexts: usize,
    pub split_center: bool,
    pub min_gain: f64,
    pub min_contexts: usize,
    pub min_observations: f64,
    pub variance_floor: f64,
    pub target_num_models: usize,
    pub target_num_states: usize,
    pub max_hyps: usize,
    pub state_penalty_weight: f64,
    pub boundary_phone: usize,
    pub feature_dim: usize,
}

/// Drives context dependency transducer construction from accumulated statistics through to a
/// finished, integer-labeled output transducer and its associated acoustic model tables.
pub struct ContextBuilder {
    config: BuilderConfig,
    phone_symbols: PhoneSymbols,
    phone_info: Phones,
    questions: Vec<ContextQuestion>,
    models: ModelManager,
    transducer: ConstructionalTransducer,
}

impl ContextBuilder {
    pub fn new(
        config: BuilderConfig,
        phone_symbols: PhoneSymbols,
        phone_info: Phones,
        questions: Vec<ContextQuestion>,
    ) -> Self {
        let transducer = ConstructionalTransducer::new(
            phone_info.num_phones(),
            config.num_left_contexts,
            config.num_right_contexts,
            false,
        );
        Self {
            config,
            phone_symbols,
            phone_info,
            questions,
            models: ModelManager::new(),
            transducer,
        }
    }

    pub fn phone_symbols(&self) -> &PhoneSymbols {
        &self.phone_symbols
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    pub fn transducer(&self) -> &ConstructionalTransducer {
        &self.transducer
    }

    /// The question list this builder was configured with, in the order recipe logs index them
    /// by.
    pub fn questions(&self) -> &[ContextQuestion] {
        &self.questions
    }

    /// Creates one [`crate::phone_models::AllophoneModel`] per phone with a state model per HMM
    /// state, and one transducer state per phone fully connected to every other phone's state -
    /// the "basic" initialization, before any splitting has narrowed any context.
    pub fn init_monophones(&mut self) {
        let num_phones = self.phone_info.num_phones();
        let mut allophones = Vec::with_capacity(num_phones);
        let mut observer = NullObserver;

        for phone in 0..num_phones {
            let num_states = self.phone_info.num_hmm_states(phone).max(0) as usize;
            if num_states == 0 {
                continue;
            }
            let mut context = PhoneContext::new(
                num_phones,
                self.config.num_left_contexts,
                self.config.num_right_contexts,
            );
            context.set(0, ContextSet::singleton(num_phones, phone));
            if !self.phone_info.is_ci_phone(phone) {
                for l in 1..=self.config.num_left_contexts as i32 {
                    context.set(-l, ContextSet::full(num_phones));
                }
                for r in 1..=self.config.num_right_contexts as i32 {
                    context.set(r, ContextSet::full(num_phones));
                }
            }
            let allophone = self.models.init_allophone_model(
                phone,
                num_states,
                context.clone(),
                self.config.feature_dim,
            );
            let state = self.transducer.add_state(context, &mut observer);
            allophones.push((phone, allophone, state));
        }

        for &(_, allophone, source) in &allophones {
            for &(next_phone, _, target) in &allophones {
                self.transducer
                    .add_arc(source, target, allophone, next_phone, &mut observer);
            }
        }
    }

    /// Runs the full greedy splitting optimization until a target size is reached or no further
    /// split clears the configured thresholds.
    pub fn build(
        &mut self,
        samples: &Samples,
        scorer: &dyn Scorer,
        recipe: Option<&mut RecipeWriter<impl IoWrite>>,
    ) -> Result<()> {
        let mut splitter = ModelSplitter::new(scorer, self.questions.clone());
        splitter.num_left_contexts = self.config.num_left_contexts;
        splitter.num_right_contexts = self.config.num_right_contexts;
        splitter.split_center = self.config.split_center;
        splitter.min_gain = self.config.min_gain;
        splitter.min_contexts = self.config.min_contexts;
        splitter.min_observations = self.config.min_observations;
        splitter.target_num_models = self.config.target_num_models;
        splitter.target_num_states = self.config.target_num_states;
        splitter.state_penalty_weight = self.config.state_penalty_weight;
        splitter.max_hyps = self.config.max_hyps;

        splitter
            .init_models(&mut self.models, samples, &self.phone_info)
            .context("initializing state model statistics")?;
        splitter.init_split_hypotheses(&self.models, samples, &self.phone_info);

        let mut observer = NullObserver;
        splitter.split_models(
            &mut self.models,
            &mut self.transducer,
            samples,
            &mut observer,
            recipe,
        )
    }

    /// Re-applies a previously recorded sequence of splits in place of the greedy search, so a
    /// prior run can be replayed deterministically.
    pub fn replay(&mut self, samples: &Samples, scorer: &dyn Scorer, records: &[SplitRecord]) -> Result<()> {
        let mut splitter = ModelSplitter::new(scorer, self.questions.clone());
        splitter.num_left_contexts = self.config.num_left_contexts;
        splitter.num_right_contexts = self.config.num_right_contexts;
        splitter.split_center = self.config.split_center;
        splitter.min_contexts = 0;
        splitter.min_observations = 0.0;
        splitter.min_gain = f64::MIN;

        splitter
            .init_models(&mut self.models, samples, &self.phone_info)
            .context("initializing state model statistics")?;
        splitter.init_split_hypotheses(&self.models, samples, &self.phone_info);

        let mut observer = NullObserver;
        splitter.replay(&mut self.models, &mut self.transducer, samples, &mut observer, records)
    }

    /// Enumerates the final model inventory and compiles the constructional transducer into an
    /// integer-labeled output transducer. Must be called after [`ContextBuilder::build`].
    pub fn compile<'a>(
        &'a self,
        scorer: &dyn Scorer,
    ) -> Result<(HmmCompiler<'a>, CompiledTransducer)> {
        let _ = scorer;
        let mut hmm_compiler = HmmCompiler::new(
            &self.models,
            &self.phone_info,
            &self.phone_symbols,
            self.config.variance_floor,
        );
        hmm_compiler.enumerate_models();

        let compiled = {
            let mut compiler = TransducerCompiler::new(
                &self.transducer,
                &hmm_compiler,
                self.config.boundary_phone,
            );
            compiler.compile()?
        };
        Ok((hmm_compiler, compiled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::ContextSet;
    use crate::scorer::MaximumLikelihoodScorer;
    use std::io::Cursor;

    fn config() -> BuilderConfig {
        BuilderConfig {
            num_left_contexts: 1,
            num_right_contexts: 0,
            split_center: false,
            min_gain: 0.0,
            min_contexts: 1,
            min_observations: 0.0,
            variance_floor: 1e-3,
            target_num_models: 0,
            target_num_states: 0,
            max_hyps: 0,
            state_penalty_weight: 0.0,
            boundary_phone: 0,
            feature_dim: 1,
        }
    }

    fn symbols() -> PhoneSymbols {
        PhoneSymbols::from_reader(Cursor::new("<eps> 0\nsil 1\naa 2\n")).unwrap()
    }

    #[test]
    fn init_monophones_creates_fully_connected_states() {
        let mut phones = Phones::new(2);
        phones.set_phone_length(0, 1).unwrap();
        phones.set_phone_length(1, 1).unwrap();
        phones.set_ci_phone(0).unwrap();

        let mut builder = ContextBuilder::new(config(), symbols(), phones, vec![]);
        builder.init_monophones();
        assert_eq!(builder.transducer().num_states(), 2);
        assert_eq!(builder.models().num_state_models(), 2);
    }

    #[test]
    fn build_and_compile_end_to_end() {
        let mut phones = Phones::new(2);
        phones.set_phone_length(0, 1).unwrap();
        phones.set_phone_length(1, 1).unwrap();
        phones.set_ci_phone(0).unwrap();

        let mut yes = ContextSet::new(2);
        yes.add(0);
        let questions = vec![ContextQuestion::new("is-sil", yes)];

        let mut builder = ContextBuilder::new(config(), symbols(), phones, questions);
        builder.init_monophones();

        let mut samples = Samples::new();
        samples.set_num_phones(2);
        samples.set_feature_dimension(1);
        for v in [1.0, 2.0] {
            let s = samples.add_sample(1, 0).unwrap();
            s.left_context = vec![0];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = v;
            s.stat.sum2_mut()[0] = v * v;
        }
        {
            let s = samples.add_sample(0, 0).unwrap();
            s.left_context = vec![1];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = 0.0;
            s.stat.sum2_mut()[0] = 0.0;
        }

        let scorer = MaximumLikelihoodScorer::new(1e-6);
        builder
            .build(&samples, &scorer, None::<&mut RecipeWriter<Vec<u8>>>)
            .unwrap();

        let (hmm_compiler, compiled) = builder.compile(&scorer).unwrap();
        assert!(hmm_compiler.num_state_models() > 0);
        assert!(!compiled.finals.is_empty());
    }

    fn three_phone_symbols() -> PhoneSymbols {
        PhoneSymbols::from_reader(Cursor::new("<eps> 0\nsil 1\naa 2\nb 3\n")).unwrap()
    }

    fn separable_setup() -> (Phones, Vec<ContextQuestion>, Samples) {
        let mut phones = Phones::new(3);
        phones.set_phone_length(0, 1).unwrap();
        phones.set_phone_length(1, 1).unwrap();
        phones.set_phone_length(2, 1).unwrap();
        phones.set_ci_phone(0).unwrap();

        let mut is_b = ContextSet::new(3);
        is_b.add(2);
        let questions = vec![ContextQuestion::new("is-b", is_b)];

        let mut samples = Samples::new();
        samples.set_num_phones(3);
        samples.set_feature_dimension(1);
        for v in [1.0, 1.1, 0.9] {
            let s = samples.add_sample(1, 0).unwrap();
            s.left_context = vec![2];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = v;
            s.stat.sum2_mut()[0] = v * v;
        }
        for v in [9.0, 9.1, 8.9] {
            let s = samples.add_sample(1, 0).unwrap();
            s.left_context = vec![0];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = v;
            s.stat.sum2_mut()[0] = v * v;
        }
        for v in [0.0, 0.0] {
            let s = samples.add_sample(0, 0).unwrap();
            s.left_context = vec![1];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = v;
            s.stat.sum2_mut()[0] = v * v;
        }
        for v in [0.0, 0.0] {
            let s = samples.add_sample(2, 0).unwrap();
            s.left_context = vec![1];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = v;
            s.stat.sum2_mut()[0] = v * v;
        }
        (phones, questions, samples)
    }

    fn three_phone_config() -> BuilderConfig {
        BuilderConfig {
            num_left_contexts: 1,
            num_right_contexts: 0,
            split_center: false,
            min_gain: 0.0,
            min_contexts: 1,
            min_observations: 0.0,
            variance_floor: 1e-3,
            target_num_models: 0,
            target_num_states: 0,
            max_hyps: 0,
            state_penalty_weight: 0.0,
            boundary_phone: 0,
            feature_dim: 1,
        }
    }

    #[test]
    fn build_splits_separable_contexts_into_more_models() {
        let (phones, questions, samples) = separable_setup();
        let mut builder = ContextBuilder::new(three_phone_config(), three_phone_symbols(), phones, questions);
        builder.init_monophones();
        let before = builder.models().num_state_models();

        let scorer = MaximumLikelihoodScorer::new(1e-6);
        builder
            .build(&samples, &scorer, None::<&mut RecipeWriter<Vec<u8>>>)
            .unwrap();

        assert!(builder.models().num_state_models() > before);
    }

    #[test]
    fn replay_reproduces_build_output() {
        let scorer = MaximumLikelihoodScorer::new(1e-6);

        let (phones, questions, samples) = separable_setup();
        let mut built = ContextBuilder::new(three_phone_config(), three_phone_symbols(), phones, questions);
        built.init_monophones();
        let mut recipe_bytes = Vec::new();
        {
            let mut recipe = RecipeWriter::new(&mut recipe_bytes).unwrap();
            built.build(&samples, &scorer, Some(&mut recipe)).unwrap();
            recipe.flush().unwrap();
        }
        let (built_hmm, built_compiled) = built.compile(&scorer).unwrap();

        let mut reader = crate::recipe::RecipeReader::new(std::io::Cursor::new(recipe_bytes)).unwrap();
        let records = reader.read_all().unwrap();
        assert!(!records.is_empty(), "setup should have produced at least one split");

        let (phones2, questions2, samples2) = separable_setup();
        let mut replayed =
            ContextBuilder::new(three_phone_config(), three_phone_symbols(), phones2, questions2);
        replayed.init_monophones();
        replayed.replay(&samples2, &scorer, &records).unwrap();
        let (replayed_hmm, replayed_compiled) = replayed.compile(&scorer).unwrap();

        assert_eq!(built_hmm.num_state_models(), replayed_hmm.num_state_models());
        assert_eq!(built_compiled.finals.len(), replayed_compiled.finals.len());
        assert_eq!(built_compiled.arcs.len(), replayed_compiled.arcs.len());

        let mut built_text = Vec::new();
        built_compiled.write_text(&mut built_text).unwrap();
        let mut replayed_text = Vec::new();
        replayed_compiled.write_text(&mut replayed_text).unwrap();
        assert_eq!(built_text, replayed_text);
    }
}

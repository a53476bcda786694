//! Drives the splitting optimization: repeatedly applies the highest-scoring split hypothesis,
//! updating the allophone models and the constructional transducer in lockstep, until a target
//! size is reached or no remaining hypothesis clears the configured thresholds.

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::context_set::ContextQuestion;
use crate::phone_models::{ModelManager, StateModelId};
use crate::phones::Phones;
use crate::recipe::{RecipeWriter, SplitRecord};
use crate::sample::Samples;
use crate::scorer::Scorer;
use crate::split_generator::{SplitGenerator, SplitHypothesis};
use crate::split_predictor::{SplitPredictor, SplitPredictorTrait};
use crate::state_splitter::StateSplitter;
use crate::transducer::{ConstructionalTransducer, TransducerChangeObserver};

use std::io::Write as IoWrite;

/// Configuration and thresholds for the greedy split search, mirroring the command line options
/// exposed by the builder binary.
pub struct ModelSplitter<'a> {
    pub scorer: &'a dyn Scorer,
    pub questions: Vec<ContextQuestion>,
    pub num_left_contexts: usize,
    pub num_right_contexts: usize,
    pub split_center: bool,
    pub min_gain: f64,
    pub min_contexts: usize,
    pub min_observations: f64,
    pub target_num_models: usize,
    pub target_num_states: usize,
    pub state_penalty_weight: f64,
    pub max_hyps: usize,
    hyps: Vec<SplitHypothesis>,
}

impl<'a> ModelSplitter<'a> {
    pub fn new(scorer: &'a dyn Scorer, questions: Vec<ContextQuestion>) -> Self {
        Self {
            scorer,
            questions,
            num_left_contexts: 1,
            num_right_contexts: 1,
            split_center: false,
            min_gain: 0.0,
            min_contexts: 1,
            min_observations: 0.0,
            target_num_models: 0,
            target_num_states: 0,
            state_penalty_weight: 0.0,
            max_hyps: 0,
            hyps: Vec::new(),
        }
    }

    fn generator(&self) -> SplitGenerator<'_> {
        SplitGenerator {
            scorer: self.scorer,
            questions: &self.questions,
            num_left_contexts: self.num_left_contexts,
            num_right_contexts: self.num_right_contexts,
            split_center: self.split_center,
            min_observations: self.min_observations,
            min_contexts: self.min_contexts,
            min_gain: self.min_gain,
        }
    }

    /// Seeds every initial state model's statistics by summing the samples of the phones it was
    /// created for. Fails if a state model ends up with no statistics at all, since the optimizer
    /// has no basis to score it.
    pub fn init_models(
        &self,
        models: &mut ModelManager,
        samples: &Samples,
        phone_info: &Phones,
    ) -> Result<()> {
        let ids: Vec<StateModelId> = models.state_models().map(|(id, _)| id).collect();
        for id in ids {
            let phones: Vec<usize> = models
                .state_model(id)
                .allophones()
                .iter()
                .flat_map(|&a| models.allophone_model(a).phones().iter().copied())
                .collect();
            let state = models.state_model(id).state();
            let mut have_data = false;
            for phone in phones {
                if state >= samples.num_states(phone) || !samples.have_sample(phone, state) {
                    tracing::warn!(phone, state, "no statistics for unit");
                    continue;
                }
                for sample in samples.get_samples(phone, state) {
                    models.state_model_mut(id).add_statistics(&sample.stat)?;
                }
                have_data = true;
            }
            if !have_data {
                anyhow::bail!("no statistics for state model at state {state}");
            }
            let _ = phone_info;
        }
        Ok(())
    }

    /// Generates the initial pool of split hypotheses for every state model. A context
    /// independent phone's lone state model is skipped unless it is already tied with another
    /// phone, since a CI phone has no context to split on.
    pub fn init_split_hypotheses(&mut self, models: &ModelManager, samples: &Samples, phone_info: &Phones) {
        let candidates: Vec<StateModelId> = models
            .state_models()
            .filter_map(|(id, model)| {
                let phones: Vec<usize> = model
                    .allophones()
                    .iter()
                    .flat_map(|&a| models.allophone_model(a).phones().iter().copied())
                    .collect();
                let phone = *phones.first()?;
                let ci = phone_info.is_ci_phone(phone);
                if !ci || phones.len() > 1 {
                    Some(id)
                } else {
                    None
                }
            })
            .collect();

        let generator = self.generator();
        let new_hyps: Vec<SplitHypothesis> = candidates
            .par_iter()
            .flat_map(|&id| generator.generate(models, samples, id, false))
            .collect();
        self.hyps = new_hyps;
        tracing::info!(count = self.hyps.len(), "initial split hypotheses");
    }

    /// Ranks the pending hypotheses by `gain - state_penalty_weight * new_states` against the
    /// current transducer, and returns the index and score of the best one, if any. Only the
    /// first `max_hyps` pending hypotheses are considered when `max_hyps` is set, matching the
    /// bound the original optimizer places on how many candidates it ranks per round. Ties are
    /// broken in favor of the lowest index, so the applied sequence stays deterministic
    /// regardless of how the parallel scoring pass interleaves.
    fn find_best_split(
        &self,
        models: &ModelManager,
        transducer: &ConstructionalTransducer,
    ) -> Option<(usize, f64)> {
        if self.hyps.is_empty() {
            return None;
        }
        let limit = if self.max_hyps > 0 {
            self.max_hyps.min(self.hyps.len())
        } else {
            self.hyps.len()
        };
        let predictor = SplitPredictor::new(transducer);
        let scored: Vec<(usize, f64)> = self.hyps[..limit]
            .par_iter()
            .enumerate()
            .map(|(i, hyp)| {
                let new_states = if predictor.need_count(hyp.position) {
                    let allophones = models.state_model(hyp.model).allophones();
                    predictor.count(hyp.position, &hyp.question, allophones, 0) as f64
                } else {
                    0.0
                };
                let score = hyp.gain - self.state_penalty_weight * new_states;
                (i, score)
            })
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for (i, score) in scored {
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((i, score)),
            }
        }
        best
    }

    /// Commits `hyp_idx`: splits the model in the manager, splits the matching transducer states
    /// or relabels its arcs, and generates fresh hypotheses for the two resulting state models.
    fn apply_split(
        &mut self,
        models: &mut ModelManager,
        transducer: &mut ConstructionalTransducer,
        samples: &Samples,
        hyp_idx: usize,
        observer: &mut impl TransducerChangeObserver,
    ) -> Result<()> {
        let hyp = self.hyps[hyp_idx].clone();
        let old_state_model = hyp.model;
        let old_phone_models: Vec<_> = models.state_model(old_state_model).allophones().to_vec();

        let split = models.apply_split(
            old_state_model,
            hyp.position,
            &hyp.question,
            hyp.yes_stats.clone(),
            hyp.no_stats.clone(),
        )?;

        let mut splitter = StateSplitter::new(transducer, self.num_left_contexts, false);
        for phone_split in &split.phone_models {
            if hyp.position == 1 {
                splitter.split_future(
                    phone_split.old_model,
                    phone_split.yes_model,
                    phone_split.no_model,
                    &hyp.question,
                    observer,
                );
            } else {
                splitter.split_history(
                    hyp.position,
                    phone_split.old_model,
                    (phone_split.yes_model, phone_split.no_model),
                    &hyp.question,
                    observer,
                );
            }
        }
        let _ = old_phone_models;

        let generator = self.generator();
        let mut new_hyps = generator.generate(models, samples, split.yes_state_model, false);
        new_hyps.extend(generator.generate(models, samples, split.no_state_model, false));
        self.hyps.extend(new_hyps);
        Ok(())
    }

    /// Drops every remaining hypothesis referring to `model`, since it no longer exists once a
    /// split involving it has been committed.
    fn remove_model_hypotheses(&mut self, model: StateModelId) {
        self.hyps.retain(|h| h.model != model);
    }

    /// Runs the greedy split loop until no hypothesis clears the thresholds or a target size is
    /// reached, optionally logging every applied split to `recipe`.
    pub fn split_models(
        &mut self,
        models: &mut ModelManager,
        transducer: &mut ConstructionalTransducer,
        samples: &Samples,
        observer: &mut impl TransducerChangeObserver,
        mut recipe: Option<&mut RecipeWriter<impl IoWrite>>,
    ) -> Result<()> {
        let mut num_models = models.num_state_models();
        let mut num_states = transducer.num_states();

        while !self.hyps.is_empty()
            && (self.target_num_models == 0 || num_models < self.target_num_models)
            && (self.target_num_states == 0 || num_states < self.target_num_states)
        {
            let Some((best_idx, best_score)) = self.find_best_split(models, transducer) else {
                tracing::info!("no valid split found");
                break;
            };
            if best_score <= 0.0 {
                tracing::info!(best_score, "best split score not positive, stopping");
                break;
            }
            let hyp = self.hyps[best_idx].clone();
            let old_model = hyp.model;

            if let Some(writer) = recipe.as_deref_mut() {
                let question_id = self
                    .questions
                    .iter()
                    .position(|q| q.name() == hyp.question.name())
                    .unwrap_or(0) as u32;
                writer.add_split(&hyp, question_id, old_model.index() as u32)?;
            }

            self.apply_split(models, transducer, samples, best_idx, observer)?;
            self.remove_model_hypotheses(old_model);

            num_models = models.num_state_models();
            let previous_states = num_states;
            num_states = transducer.num_states();
            tracing::info!(
                num_models,
                num_states,
                new_states = num_states.saturating_sub(previous_states),
                "split applied"
            );
        }
        Ok(())
    }

    /// Re-applies a previously recorded sequence of splits instead of picking by score, for
    /// deterministically extending or auditing a prior run. Fails fatally if a recorded split
    /// cannot be matched to any open hypothesis, per the replay-mismatch policy.
    pub fn replay(
        &mut self,
        models: &mut ModelManager,
        transducer: &mut ConstructionalTransducer,
        samples: &Samples,
        observer: &mut impl TransducerChangeObserver,
        records: &[SplitRecord],
    ) -> Result<()> {
        for record in records {
            let question_name = self
                .questions
                .get(record.question_id as usize)
                .map(|q| q.name().to_string())
                .with_context(|| format!("replay: unknown question id {}", record.question_id))?;

            let hyp_idx = self
                .hyps
                .iter()
                .position(|h| {
                    h.model.index() as u32 == record.state
                        && h.position == record.position
                        && h.question.name() == question_name
                })
                .with_context(|| {
                    format!(
                        "replay mismatch: no open hypothesis for state {} position {} question {question_name}",
                        record.state, record.position
                    )
                })?;

            let old_model = self.hyps[hyp_idx].model;
            self.apply_split(models, transducer, samples, hyp_idx, observer)?;
            self.remove_model_hypotheses(old_model);
            tracing::info!(state = record.state, position = record.position, question_name, "replayed split");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::{ContextSet, PhoneContext};
    use crate::scorer::MaximumLikelihoodScorer;
    use crate::transducer::NullObserver;

    fn make_samples() -> Samples {
        let mut samples = Samples::new();
        samples.set_num_phones(4);
        samples.set_feature_dimension(1);
        for v in [1.0, 1.0, 1.0, 2.0, 2.0, 2.0] {
            let s = samples.add_sample(0, 0).unwrap();
            s.left_context = vec![v as usize];
            s.stat.set_weight(1.0);
            s.stat.sum_mut()[0] = v;
            s.stat.sum2_mut()[0] = v * v;
        }
        samples
    }

    #[test]
    fn init_models_fails_without_statistics() {
        let mut models = ModelManager::new();
        let ctx = PhoneContext::new(4, 1, 0);
        models.init_allophone_model(2, 1, ctx, 1);
        let phones = Phones::new(4);
        let samples = Samples::new();
        let scorer = MaximumLikelihoodScorer::new(1e-6);
        let splitter = ModelSplitter::new(&scorer, vec![]);
        assert!(splitter.init_models(&mut models, &samples, &phones).is_err());
    }

    #[test]
    fn full_split_cycle_creates_new_states() {
        let mut models = ModelManager::new();
        let mut ctx = PhoneContext::new(4, 1, 0);
        ctx.set(-1, ContextSet::full(4));
        let allophone = models.init_allophone_model(0, 1, ctx.clone(), 1);
        let state_id = models.allophone_model(allophone).state_model(0).unwrap();

        let samples = make_samples();
        let phones = Phones::new(4);
        let scorer = MaximumLikelihoodScorer::new(1e-6);

        let mut yes = ContextSet::new(4);
        yes.add(1);
        let question = ContextQuestion::new("left-is-1", yes);

        let mut splitter = ModelSplitter::new(&scorer, vec![question]);
        splitter.num_left_contexts = 1;
        splitter.num_right_contexts = 0;
        splitter.min_contexts = 1;
        splitter.target_num_states = 0;
        splitter.init_models(&mut models, &samples, &phones).unwrap();
        splitter.init_split_hypotheses(&models, &samples, &phones);
        assert!(!splitter.hyps.is_empty());

        let mut transducer = ConstructionalTransducer::new(4, 1, 0, false);
        let mut observer = NullObserver;
        let history_state = transducer.add_state(ctx.clone(), &mut observer);
        transducer.add_arc(history_state, history_state, allophone, 0, &mut observer);

        splitter.target_num_models = 3;
        splitter
            .split_models(
                &mut models,
                &mut transducer,
                &samples,
                &mut observer,
                None::<&mut RecipeWriter<Vec<u8>>>,
            )
            .unwrap();

        assert_eq!(models.num_state_models(), 2);
        assert!(transducer.num_states() >= 2);
        let _ = state_id;
    }

    #[test]
    fn large_state_penalty_weight_suppresses_all_splits() {
        let mut models = ModelManager::new();
        let mut ctx = PhoneContext::new(4, 1, 0);
        ctx.set(-1, ContextSet::full(4));
        let allophone = models.init_allophone_model(0, 1, ctx.clone(), 1);

        let samples = make_samples();
        let phones = Phones::new(4);
        let scorer = MaximumLikelihoodScorer::new(1e-6);

        let mut yes = ContextSet::new(4);
        yes.add(1);
        let question = ContextQuestion::new("left-is-1", yes);

        let mut splitter = ModelSplitter::new(&scorer, vec![question]);
        splitter.num_left_contexts = 1;
        splitter.num_right_contexts = 0;
        splitter.min_contexts = 1;
        splitter.state_penalty_weight = 1e9;
        splitter.init_models(&mut models, &samples, &phones).unwrap();
        splitter.init_split_hypotheses(&models, &samples, &phones);
        assert!(!splitter.hyps.is_empty());

        let mut transducer = ConstructionalTransducer::new(4, 1, 0, false);
        let mut observer = NullObserver;
        let history_state = transducer.add_state(ctx.clone(), &mut observer);
        transducer.add_arc(history_state, history_state, allophone, 0, &mut observer);

        splitter.target_num_models = 3;
        splitter
            .split_models(
                &mut models,
                &mut transducer,
                &samples,
                &mut observer,
                None::<&mut RecipeWriter<Vec<u8>>>,
            )
            .unwrap();

        assert_eq!(models.num_state_models(), 1, "penalty should outweigh the split's gain");
    }

    fn tied_hypothesis(model: StateModelId, gain: f64) -> SplitHypothesis {
        SplitHypothesis {
            model,
            position: 1,
            question: ContextQuestion::new("q", ContextSet::new(4)),
            gain,
            yes_stats: crate::sample::Statistics::new(1),
            no_stats: crate::sample::Statistics::new(1),
            yes_contexts: 0,
            no_contexts: 0,
        }
    }

    #[test]
    fn find_best_split_breaks_ties_by_lowest_index() {
        let mut models = ModelManager::new();
        let ctx = PhoneContext::new(4, 1, 0);
        let allophone = models.init_allophone_model(0, 1, ctx, 1);
        let state_id = models.allophone_model(allophone).state_model(0).unwrap();

        let scorer = MaximumLikelihoodScorer::new(1e-6);
        let mut splitter = ModelSplitter::new(&scorer, vec![]);
        splitter.hyps = vec![
            tied_hypothesis(state_id, 5.0),
            tied_hypothesis(state_id, 5.0),
            tied_hypothesis(state_id, 3.0),
        ];

        let transducer = ConstructionalTransducer::new(4, 1, 0, false);
        let (idx, score) = splitter.find_best_split(&models, &transducer).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(score, 5.0);
    }

    #[test]
    fn max_hyps_bounds_how_many_candidates_are_ranked() {
        let mut models = ModelManager::new();
        let ctx = PhoneContext::new(4, 1, 0);
        let allophone = models.init_allophone_model(0, 1, ctx, 1);
        let state_id = models.allophone_model(allophone).state_model(0).unwrap();

        let scorer = MaximumLikelihoodScorer::new(1e-6);
        let mut splitter = ModelSplitter::new(&scorer, vec![]);
        splitter.max_hyps = 1;
        splitter.hyps = vec![tied_hypothesis(state_id, 1.0), tied_hypothesis(state_id, 10.0)];

        let transducer = ConstructionalTransducer::new(4, 1, 0, false);
        let (idx, score) = splitter.find_best_split(&models, &transducer).unwrap();
        assert_eq!(idx, 0, "the second, higher-gain hypothesis is past the max_hyps cutoff");
        assert_eq!(score, 1.0);
    }
}

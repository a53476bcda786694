//! Generates candidate splits of a tied HMM state model: for every context position and every
//! applicable question, partitions the samples backing the model and scores the two halves.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::context_set::{ContextQuestion, ContextSet};
use crate::phone_models::{AllophoneStateModel, ModelManager, StateModelId};
use crate::sample::{Samples, Statistics};
use crate::scorer::Scorer;

/// A hypothesized split of a state model: the context position and question that produced it,
/// the resulting statistics of each side, and the likelihood gain the split would achieve.
#[derive(Clone)]
pub struct SplitHypothesis {
    pub model: StateModelId,
    pub position: i32,
    pub question: ContextQuestion,
    pub gain: f64,
    pub yes_stats: Statistics,
    pub no_stats: Statistics,
    pub yes_contexts: usize,
    pub no_contexts: usize,
}

/// Configuration and thresholds for candidate generation, mirroring the knobs exposed on the
/// command line (minimum observations, minimum seen contexts, minimum gain).
pub struct SplitGenerator<'a> {
    pub scorer: &'a dyn Scorer,
    pub questions: &'a [ContextQuestion],
    pub num_left_contexts: usize,
    pub num_right_contexts: usize,
    pub split_center: bool,
    pub min_observations: f64,
    pub min_contexts: usize,
    pub min_gain: f64,
}

impl<'a> SplitGenerator<'a> {
    /// Generates every split hypothesis for `state_id` that meets the configured thresholds.
    /// `center_only` restricts generation to position 0, used for phones tied only by center
    /// (context independent phones being considered for un-tying).
    pub fn generate(
        &self,
        models: &ModelManager,
        samples: &Samples,
        state_id: StateModelId,
        center_only: bool,
    ) -> Vec<SplitHypothesis> {
        let model = models.state_model(state_id);
        let positions = self.positions(center_only);
        let mut hyps = Vec::new();
        let mut seen: HashMap<i32, HashSet<ContextSet>> = HashMap::new();
        for position in positions {
            let current = model.context().get(position);
            let seen_at_position = seen.entry(position).or_default();
            for question in self.questions {
                let resulting = current.intersect(question.phone_set(false));
                if resulting.is_empty() || !seen_at_position.insert(resulting) {
                    continue;
                }
                if let Some(hyp) = self.try_split(models, samples, state_id, model, position, question) {
                    hyps.push(hyp);
                }
            }
        }
        hyps
    }

    fn positions(&self, center_only: bool) -> Vec<i32> {
        if center_only {
            return vec![0];
        }
        let mut positions: Vec<i32> = (1..=self.num_left_contexts as i32).map(|l| -l).collect();
        positions.extend(1..=self.num_right_contexts as i32);
        if self.split_center {
            positions.push(0);
        }
        positions
    }

    fn try_split(
        &self,
        models: &ModelManager,
        samples: &Samples,
        state_id: StateModelId,
        model: &AllophoneStateModel,
        position: i32,
        question: &ContextQuestion,
    ) -> Option<SplitHypothesis> {
        let phones: Vec<usize> = model
            .allophones()
            .iter()
            .flat_map(|&a| models.allophone_model(a).phones().iter().copied())
            .collect();
        if phones.is_empty() {
            return None;
        }

        let dim = samples.feature_dimension();
        let mut yes_stats = Statistics::new(dim);
        let mut no_stats = Statistics::new(dim);
        let mut yes_contexts = 0usize;
        let mut no_contexts = 0usize;

        for &phone in &phones {
            if model.state() >= samples.num_states(phone) {
                continue;
            }
            for sample in samples.get_samples(phone, model.state()) {
                if !sample_in_context(sample, model) {
                    continue;
                }
                let goes_yes = sample_side(sample, position, question, phone);
                if goes_yes {
                    yes_stats.accumulate(&sample.stat).ok()?;
                    yes_contexts += 1;
                } else {
                    no_stats.accumulate(&sample.stat).ok()?;
                    no_contexts += 1;
                }
            }
        }

        if yes_stats.weight() <= 0.0 || no_stats.weight() <= 0.0 {
            return None;
        }
        if yes_contexts < self.min_contexts || no_contexts < self.min_contexts {
            return None;
        }
        if yes_stats.weight() < self.min_observations || no_stats.weight() < self.min_observations {
            return None;
        }

        let before = self.scorer.score(model.statistics());
        let after = self.scorer.score(&yes_stats) + self.scorer.score(&no_stats);
        let gain = before - after;
        if self.min_gain > 0.0 && gain < self.min_gain {
            return None;
        }

        Some(SplitHypothesis {
            model: state_id,
            position,
            question: question.clone(),
            gain,
            yes_stats,
            no_stats,
            yes_contexts,
            no_contexts,
        })
    }
}

fn sample_in_context(sample: &crate::sample::Sample, model: &AllophoneStateModel) -> bool {
    for l in 0..model.context().num_left_contexts() {
        let Some(&phone) = sample.left_context.get(l) else {
            continue;
        };
        if !model.context().get(-(l as i32 + 1)).has_element(phone) {
            return false;
        }
    }
    for r in 0..model.context().num_right_contexts() {
        let Some(&phone) = sample.right_context.get(r) else {
            continue;
        };
        if !model.context().get(r as i32 + 1).has_element(phone) {
            return false;
        }
    }
    true
}

fn sample_side(
    sample: &crate::sample::Sample,
    position: i32,
    question: &ContextQuestion,
    phone: usize,
) -> bool {
    let test_phone = if position == 0 {
        phone
    } else if position < 0 {
        let idx = (-position - 1) as usize;
        match sample.left_context.get(idx) {
            Some(&p) => p,
            None => return true,
        }
    } else {
        let idx = (position - 1) as usize;
        match sample.right_context.get(idx) {
            Some(&p) => p,
            None => return true,
        }
    };
    question.phone_set(false).has_element(test_phone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::{ContextSet, PhoneContext};
    use crate::sample::Samples;
    use crate::scorer::MaximumLikelihoodScorer;

    fn sample_with(phone: usize, state: usize, left: usize, samples: &mut Samples) {
        let s = samples.add_sample(phone, state).unwrap();
        s.left_context = vec![left];
        s.stat.set_weight(1.0);
        s.stat.sum_mut()[0] = left as f64;
        s.stat.sum2_mut()[0] = (left * left) as f64;
    }

    #[test]
    fn generates_hypothesis_for_separable_contexts() {
        let mut samples = Samples::new();
        samples.set_num_phones(4);
        samples.set_feature_dimension(1);
        for _ in 0..3 {
            sample_with(0, 0, 1, &mut samples);
        }
        for _ in 0..3 {
            sample_with(0, 0, 2, &mut samples);
        }

        let mut models = ModelManager::new();
        let mut ctx = PhoneContext::new(4, 1, 0);
        ctx.set(-1, ContextSet::full(4));
        let allophone = models.init_allophone_model(0, 1, ctx, 1);
        let state_id = models.allophone_model(allophone).state_model(0).unwrap();

        let scorer = MaximumLikelihoodScorer::new(1e-6);
        let mut yes = ContextSet::new(4);
        yes.add(1);
        let question = ContextQuestion::new("q", yes);
        let questions = vec![question];

        let generator = SplitGenerator {
            scorer: &scorer,
            questions: &questions,
            num_left_contexts: 1,
            num_right_contexts: 0,
            split_center: false,
            min_observations: 0.0,
            min_contexts: 1,
            min_gain: 0.0,
        };
        let hyps = generator.generate(&models, &samples, state_id, false);
        assert_eq!(hyps.len(), 1);
        assert_eq!(hyps[0].position, -1);
        assert_eq!(hyps[0].yes_contexts, 3);
        assert_eq!(hyps[0].no_contexts, 3);
    }

    #[test]
    fn skips_a_question_whose_partition_duplicates_an_earlier_one() {
        let mut samples = Samples::new();
        samples.set_num_phones(4);
        samples.set_feature_dimension(1);
        for _ in 0..3 {
            sample_with(0, 0, 0, &mut samples);
        }
        for _ in 0..3 {
            sample_with(0, 0, 2, &mut samples);
        }

        let mut models = ModelManager::new();
        let mut ctx = PhoneContext::new(4, 1, 0);
        let mut left_context = ContextSet::new(4);
        left_context.add(0);
        left_context.add(2);
        ctx.set(-1, left_context);
        let allophone = models.init_allophone_model(0, 1, ctx, 1);
        let state_id = models.allophone_model(allophone).state_model(0).unwrap();

        let scorer = MaximumLikelihoodScorer::new(1e-6);
        let mut narrow_yes = ContextSet::new(4);
        narrow_yes.add(0);
        let mut wide_yes = ContextSet::new(4);
        wide_yes.add(0);
        wide_yes.add(1);
        let questions = vec![
            ContextQuestion::new("is-a", narrow_yes),
            ContextQuestion::new("is-a-or-b", wide_yes),
        ];

        let generator = SplitGenerator {
            scorer: &scorer,
            questions: &questions,
            num_left_contexts: 1,
            num_right_contexts: 0,
            split_center: false,
            min_observations: 0.0,
            min_contexts: 1,
            min_gain: 0.0,
        };
        let hyps = generator.generate(&models, &samples, state_id, false);
        assert_eq!(hyps.len(), 1, "both questions partition the context into the same {{a}}/{{c}} split");
        assert_eq!(hyps[0].question.name(), "is-a");
    }
}

//! Predicts how many new transducer states a hypothetical model split would require, without
//! mutating the transducer. This is what lets [`crate::model_splitter::ModelSplitter`] rank split
//! hypotheses by a gain-minus-size-penalty score before committing to the most promising one.

use std::collections::HashSet;

use crate::context_set::{ContextQuestion, PhoneContext};
use crate::phone_models::AllophoneModelId;
use crate::state_splitter::is_valid_state_sequence;
use crate::transducer::ConstructionalTransducer;

/// A split predictor, parameterized over which context position is being evaluated.
pub trait SplitPredictorTrait {
    /// Predicts the number of new states a split at `context_pos` using `question` would
    /// require for the given (currently tied) allophone models, stopping early and returning
    /// `max_new_states` once the count is known to reach or exceed it (0 = no limit).
    fn count(
        &self,
        context_pos: i32,
        question: &ContextQuestion,
        models: &[AllophoneModelId],
        max_new_states: usize,
    ) -> usize;

    /// Whether a state count is even meaningful for `context_pos` - right-context splits never
    /// add states, since right context is not part of any state's history.
    fn need_count(&self, context_pos: i32) -> bool {
        context_pos != 1
    }

    /// Whether this predictor may be cloned and evaluated concurrently for distinct hypotheses.
    /// Predictors bound to substrates with shared mutable state (e.g. the composed or lexicon
    /// counting transducers) must override this to return `false` and force sequential ranking.
    fn is_thread_safe(&self) -> bool {
        true
    }
}

/// Counts new states by walking the transducer's existing states and arcs, without creating or
/// removing anything.
pub struct SplitPredictor<'t> {
    transducer: &'t ConstructionalTransducer,
    center_set: bool,
    num_left_contexts: usize,
}

impl<'t> SplitPredictor<'t> {
    pub fn new(transducer: &'t ConstructionalTransducer) -> Self {
        Self {
            transducer,
            center_set: transducer.has_center_sets(),
            num_left_contexts: transducer.num_left_contexts(),
        }
    }

    fn states_for_models(&self, models: &[AllophoneModelId]) -> Vec<PhoneContext> {
        let mut histories = HashSet::new();
        for &model in models {
            for arc_ref in self.transducer.arcs_with_model(model) {
                histories.insert(self.transducer.state(arc_ref.source).history().clone());
            }
        }
        histories.into_iter().collect()
    }

    /// Whether this substrate represents tied-center groups, i.e. a transducer state's center may
    /// denote more than one phone.
    pub fn has_center_sets(&self) -> bool {
        self.center_set
    }

    fn predecessors_of(&self, histories: &[PhoneContext]) -> Vec<PhoneContext> {
        let ids: Vec<_> = histories
            .iter()
            .filter_map(|h| self.transducer.get_state(h))
            .collect();
        self.transducer
            .predecessor_states_of(&ids)
            .into_iter()
            .map(|id| self.transducer.state(id).history().clone())
            .collect()
    }

    /// Whether splitting `history` at `position` with `question` actually divides it (both sides
    /// non-empty), and if so returns the two resulting histories.
    fn split_of(
        &self,
        history: &PhoneContext,
        position: i32,
        question: &ContextQuestion,
    ) -> Option<(PhoneContext, PhoneContext)> {
        let current = history.get(position);
        let yes = current.intersect(question.phone_set(false));
        let no = current.intersect(question.phone_set(true));
        if yes.is_empty() || no.is_empty() {
            None
        } else {
            Some((
                history.with_position(position, yes),
                history.with_position(position, no),
            ))
        }
    }
}

impl<'t> SplitPredictorTrait for SplitPredictor<'t> {
    fn count(
        &self,
        context_pos: i32,
        question: &ContextQuestion,
        models: &[AllophoneModelId],
        max_new_states: usize,
    ) -> usize {
        if !self.need_count(context_pos) {
            return 0;
        }

        let mut level = self.states_for_models(models);
        let mut new_states = 0usize;
        let mut position = context_pos;
        let mut visited: HashSet<PhoneContext> = HashSet::new();

        loop {
            for history in &level {
                if !visited.insert(history.clone()) {
                    continue;
                }
                if self.split_of(history, position, question).is_some() {
                    new_states += 2;
                }
                if max_new_states > 0 && new_states >= max_new_states {
                    return new_states;
                }
            }
            if position <= -(self.num_left_contexts as i32) || position <= -2 {
                level = self.predecessors_of(&level);
                position -= 1;
                if level.is_empty() || position < -(self.num_left_contexts as i32) {
                    break;
                }
            } else {
                break;
            }
        }
        new_states
    }
}

/// Tests a single arc transition for validity given a hypothetical (not yet created) split - used
/// by the predictor when deciding whether the predecessor closure needs to extend further back.
pub fn would_be_valid(
    source: &PhoneContext,
    arc_output: usize,
    target: &PhoneContext,
    have_center_set: bool,
    num_left_contexts: usize,
) -> bool {
    is_valid_state_sequence(source, arc_output, target, have_center_set, num_left_contexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::ContextSet;
    use crate::transducer::NullObserver;

    #[test]
    fn no_count_needed_for_right_context() {
        let t = ConstructionalTransducer::new(4, 1, 1, false);
        let predictor = SplitPredictor::new(&t);
        assert!(!predictor.need_count(1));
    }

    #[test]
    fn counts_two_new_states_for_a_real_split() {
        let mut t = ConstructionalTransducer::new(4, 1, 0, false);
        let mut obs = NullObserver;
        let mut h1 = PhoneContext::new(4, 1, 0);
        h1.get_mut(-1).add(0);
        h1.get_mut(-1).add(1);
        let s1 = t.add_state(h1, &mut obs);
        let h2 = PhoneContext::new(4, 1, 0);
        let s2 = t.add_state(h2, &mut obs);
        let model = crate::phone_models::AllophoneModelId::for_test(0);
        t.add_arc(s1, s2, model, 0, &mut obs);

        let mut yes = ContextSet::new(4);
        yes.add(0);
        let q = ContextQuestion::new("q", yes);

        let predictor = SplitPredictor::new(&t);
        let count = predictor.count(-1, &q, &[model], 0);
        assert_eq!(count, 2);
    }
}

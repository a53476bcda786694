//! Splits the states of a [`ConstructionalTransducer`] to reflect a model split.
//!
//! Splitting an HMM state model at a context position partitions every transducer state whose
//! history touches that position. A split on the right context (position `1`) only has to
//! relabel the outgoing arcs of the states that have the split model as an arc label - the
//! states themselves are unaffected, since right context isn't part of a state's own history.
//! A split on the left context or center is deeper: the affected states themselves must be
//! partitioned, their incoming arcs redirected, and - whenever the split touches a history
//! position further back than the nearest context slot - their predecessor states recursively
//! split too, since a predecessor's center phone is a target state's nearest-context slot.

use crate::context_set::{ContextQuestion, PhoneContext};
use crate::phone_models::AllophoneModelId;
use crate::transducer::{ArcRef, ConstructionalTransducer, StateId, TransducerChangeObserver};

/// Tests whether an arc `source --arc_output--> target` is a coherent state sequence: the arc's
/// output phone must lie in the target's nearest left-context slot (or, if center phones are
/// sets, in the target's center set), and each of the source's history slots must be a subset of
/// the corresponding, one-further-back slot of the target's history.
pub fn is_valid_state_sequence(
    source: &PhoneContext,
    arc_output: usize,
    target: &PhoneContext,
    have_center_set: bool,
    num_left_contexts: usize,
) -> bool {
    if have_center_set && !target.center().has_element(arc_output) {
        return false;
    }
    for l in 0..num_left_contexts as i32 {
        let source_context = source.get(-l);
        let target_context = target.get(-l - 1);
        if target_context.is_empty() {
            continue;
        }
        if !source_context.is_subset(target_context) {
            return false;
        }
    }
    true
}

/// Performs the state splits and arc relabeling required by a model split at `position`.
pub struct StateSplitter<'t> {
    transducer: &'t mut ConstructionalTransducer,
    num_left_contexts: usize,
    center_set: bool,
}

impl<'t> StateSplitter<'t> {
    pub fn new(
        transducer: &'t mut ConstructionalTransducer,
        num_left_contexts: usize,
        center_set: bool,
    ) -> Self {
        Self {
            transducer,
            num_left_contexts,
            center_set,
        }
    }

    /// Splits a right-context (future) model split: only relabels outgoing arcs of the states
    /// carrying `old_model`, since the right context does not appear in any state's history.
    pub fn split_future(
        &mut self,
        old_model: AllophoneModelId,
        yes_model: AllophoneModelId,
        no_model: AllophoneModelId,
        question: &ContextQuestion,
        _observer: &mut impl TransducerChangeObserver,
    ) {
        let arcs: Vec<ArcRef> = self.transducer.arcs_with_model(old_model).to_vec();
        for arc_ref in arcs {
            let output = self.transducer.arc(arc_ref).output;
            let new_input = if question.phone_set(false).has_element(output) {
                yes_model
            } else {
                no_model
            };
            self.transducer.update_arc_input(arc_ref, new_input);
        }
    }

    /// Splits a left-context or center model split: every transducer state whose history at
    /// `position` is not already entirely on one side of `question` must be partitioned into a
    /// "yes" and a "no" copy, arcs redirected accordingly, and (for `position` further back than
    /// the nearest context slot) predecessor states recursively split too.
    pub fn split_history(
        &mut self,
        position: i32,
        old_model: AllophoneModelId,
        new_models: (AllophoneModelId, AllophoneModelId),
        question: &ContextQuestion,
        observer: &mut impl TransducerChangeObserver,
    ) {
        let mut affected: Vec<StateId> = self
            .transducer
            .arcs_with_model(old_model)
            .iter()
            .map(|a| a.source)
            .collect();
        affected.sort();
        affected.dedup();

        if position < -1 {
            self.split_history(position + 1, old_model, new_models, question, observer);
        }

        for state_id in affected {
            self.split_state_at(state_id, position, old_model, new_models, question, observer);
        }
    }

    fn split_state_at(
        &mut self,
        state_id: StateId,
        position: i32,
        old_model: AllophoneModelId,
        (yes_model, no_model): (AllophoneModelId, AllophoneModelId),
        question: &ContextQuestion,
        observer: &mut impl TransducerChangeObserver,
    ) {
        let history = self.transducer.state(state_id).history().clone();
        let current = history.get(position);
        let yes_side = current.intersect(question.phone_set(false));
        let no_side = current.intersect(question.phone_set(true));
        if no_side.is_empty() {
            self.relabel_state_arcs(state_id, old_model, yes_model);
            return;
        }
        if yes_side.is_empty() {
            self.relabel_state_arcs(state_id, old_model, no_model);
            return;
        }

        let yes_history = history.with_position(position, yes_side);
        let no_history = history.with_position(position, no_side);

        let yes_state = self.transducer.add_state(yes_history, observer);
        let no_state = self.transducer.add_state(no_history, observer);

        self.redirect_incoming(state_id, yes_state, no_state, observer);
        self.redirect_outgoing(
            state_id,
            yes_state,
            no_state,
            old_model,
            (yes_model, no_model),
            observer,
        );

        self.cleanup_if_orphaned(state_id, observer);
    }

    fn relabel_state_arcs(
        &mut self,
        state_id: StateId,
        old_model: AllophoneModelId,
        new_model: AllophoneModelId,
    ) {
        let arcs: Vec<ArcRef> = self
            .transducer
            .state(state_id)
            .arcs()
            .filter(|(_, a)| a.input == old_model)
            .map(|(i, _)| ArcRef {
                source: state_id,
                index: i,
            })
            .collect();
        for arc_ref in arcs {
            self.transducer.update_arc_input(arc_ref, new_model);
        }
    }

    fn redirect_incoming(
        &mut self,
        state_id: StateId,
        yes_state: StateId,
        no_state: StateId,
        observer: &mut impl TransducerChangeObserver,
    ) {
        let incoming = self.transducer.state(state_id).incoming_arcs().to_vec();
        for arc_ref in incoming {
            let arc = *self.transducer.arc(arc_ref);
            let source_history = self.transducer.state(arc_ref.source).history().clone();
            let target = if is_valid_state_sequence(
                &source_history,
                arc.output,
                self.transducer.state(yes_state).history(),
                self.center_set,
                self.num_left_contexts,
            ) {
                yes_state
            } else {
                no_state
            };
            self.transducer
                .add_arc(arc_ref.source, target, arc.input, arc.output, observer);
            self.transducer.remove_arc(arc_ref, observer);
        }
    }

    fn redirect_outgoing(
        &mut self,
        state_id: StateId,
        yes_state: StateId,
        no_state: StateId,
        old_model: AllophoneModelId,
        (yes_model, no_model): (AllophoneModelId, AllophoneModelId),
        observer: &mut impl TransducerChangeObserver,
    ) {
        let outgoing: Vec<(usize, crate::transducer::Arc)> = self
            .transducer
            .state(state_id)
            .arcs()
            .map(|(i, a)| (i, *a))
            .collect();
        for (index, arc) in outgoing {
            let arc_ref = ArcRef {
                source: state_id,
                index,
            };
            let yes_input = if arc.input == old_model { yes_model } else { arc.input };
            let no_input = if arc.input == old_model { no_model } else { arc.input };
            let yes_target = if arc.target == state_id { yes_state } else { arc.target };
            let no_target = if arc.target == state_id { no_state } else { arc.target };
            self.transducer
                .add_arc(yes_state, yes_target, yes_input, arc.output, observer);
            self.transducer
                .add_arc(no_state, no_target, no_input, arc.output, observer);
            self.transducer.remove_arc(arc_ref, observer);
        }
    }

    fn cleanup_if_orphaned(&mut self, state_id: StateId, observer: &mut impl TransducerChangeObserver) {
        let state = self.transducer.state(state_id);
        if state.incoming_arcs().is_empty() && state.arcs().next().is_none() {
            self.transducer.remove_state(state_id, observer);
        }
    }
}

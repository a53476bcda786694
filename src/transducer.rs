//! The intermediate transducer built up during context dependency construction.
//!
//! A state is identified by its phone history (a [`PhoneContext`]); an arc carries an
//! [`AllophoneModel`] as input label and a phone as output label. This is not a general purpose
//! weighted FST: states and arcs are inserted and removed constantly while splitting, so both
//! live in arenas addressed by stable, reusable-slot indices rather than in a `Vec` that would
//! need to be compacted on every removal.

use std::collections::HashMap;

use crate::context_set::PhoneContext;
use crate::phone_models::AllophoneModelId;

/// Index of a [`State`] within a [`ConstructionalTransducer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
    /// The raw arena index, used for deterministic output ordering.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Reference to an arc: the state it leaves from and its position in that state's arc list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArcRef {
    pub source: StateId,
    pub index: usize,
}

/// An arc in the intermediate transducer: an [`AllophoneModelId`] input label, a phone output
/// label, and source/target states.
#[derive(Clone, Copy, Debug)]
pub struct Arc {
    pub target: StateId,
    pub input: AllophoneModelId,
    pub output: usize,
}

/// A state in the intermediate transducer: the phone history read so far, its outgoing arcs, and
/// the set of arcs targeting it.
#[derive(Clone, Debug)]
pub struct State {
    history: PhoneContext,
    arcs: Vec<Option<Arc>>,
    incoming: Vec<ArcRef>,
}

impl State {
    fn new(history: PhoneContext) -> Self {
        Self {
            history,
            arcs: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// The phone context (history) this state represents.
    pub fn history(&self) -> &PhoneContext {
        &self.history
    }

    /// The center (most recently read) phone set.
    pub fn center(&self) -> &crate::context_set::ContextSet {
        self.history.center()
    }

    /// Outgoing arcs of this state.
    pub fn arcs(&self) -> impl Iterator<Item = (usize, &Arc)> {
        self.arcs
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.as_ref().map(|a| (i, a)))
    }

    /// Arcs targeting this state.
    pub fn incoming_arcs(&self) -> &[ArcRef] {
        &self.incoming
    }
}

/// Observer notified of structural changes to a [`ConstructionalTransducer`], used to keep
/// downstream indices (e.g. the recipe log) in sync without the transducer depending on them.
pub trait TransducerChangeObserver {
    fn notify_add_state(&mut self, _state: StateId) {}
    fn notify_remove_state(&mut self, _state: StateId) {}
    fn notify_add_arc(&mut self, _arc: ArcRef) {}
    fn notify_remove_arc(&mut self, _arc: ArcRef) {}
}

/// The working transducer built and repeatedly refined while splitting context models.
pub struct ConstructionalTransducer {
    num_phones: usize,
    num_left_contexts: usize,
    num_right_contexts: usize,
    center_set: bool,
    states: Vec<Option<State>>,
    state_index: HashMap<PhoneContext, StateId>,
    arcs_with_model: HashMap<AllophoneModelId, Vec<ArcRef>>,
    num_states: usize,
}

impl ConstructionalTransducer {
    /// Creates an empty transducer. `center_set` indicates that states may represent more than
    /// one center phone (used for context independent / tied phones).
    pub fn new(
        num_phones: usize,
        num_left_contexts: usize,
        num_right_contexts: usize,
        center_set: bool,
    ) -> Self {
        Self {
            num_phones,
            num_left_contexts,
            num_right_contexts,
            center_set,
            states: Vec::new(),
            state_index: HashMap::new(),
            arcs_with_model: HashMap::new(),
            num_states: 0,
        }
    }

    pub fn num_phones(&self) -> usize {
        self.num_phones
    }
    pub fn num_left_contexts(&self) -> usize {
        self.num_left_contexts
    }
    pub fn num_right_contexts(&self) -> usize {
        self.num_right_contexts
    }
    pub fn has_center_sets(&self) -> bool {
        self.center_set
    }

    /// Total number of live states.
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Finds the state with the given history, if any.
    pub fn get_state(&self, history: &PhoneContext) -> Option<StateId> {
        self.state_index.get(history).copied()
    }

    /// Borrows a state.
    pub fn state(&self, id: StateId) -> &State {
        self.states[id.0].as_ref().expect("dangling state id")
    }

    /// Creates a new state for `history`, or returns the existing one if already present.
    pub fn add_state(
        &mut self,
        history: PhoneContext,
        observer: &mut impl TransducerChangeObserver,
    ) -> StateId {
        if let Some(&id) = self.state_index.get(&history) {
            return id;
        }
        self.states.push(Some(State::new(history.clone())));
        let id = StateId(self.states.len() - 1);
        self.state_index.insert(history, id);
        self.num_states += 1;
        observer.notify_add_state(id);
        id
    }

    /// Removes a state. The state must have no outgoing or incoming arcs.
    pub fn remove_state(&mut self, id: StateId, observer: &mut impl TransducerChangeObserver) {
        {
            let state = self.states[id.0].as_ref().expect("dangling state id");
            assert!(
                state.arcs.iter().all(Option::is_none) && state.incoming.is_empty(),
                "cannot remove a state that still has arcs"
            );
        }
        let state = self.states[id.0].take().expect("dangling state id");
        self.state_index.remove(&state.history);
        self.num_states -= 1;
        observer.notify_remove_state(id);
    }

    /// Adds an arc from `source` to `target` labeled with `input`/`output`.
    pub fn add_arc(
        &mut self,
        source: StateId,
        target: StateId,
        input: AllophoneModelId,
        output: usize,
        observer: &mut impl TransducerChangeObserver,
    ) -> ArcRef {
        let arc = Arc {
            target,
            input,
            output,
        };
        let index = {
            let state = self.states[source.0].as_mut().expect("dangling state id");
            state.arcs.push(Some(arc));
            state.arcs.len() - 1
        };
        let arc_ref = ArcRef { source, index };
        self.states[target.0]
            .as_mut()
            .expect("dangling state id")
            .incoming
            .push(arc_ref);
        self.arcs_with_model.entry(input).or_default().push(arc_ref);
        observer.notify_add_arc(arc_ref);
        arc_ref
    }

    /// Removes an arc.
    pub fn remove_arc(&mut self, arc_ref: ArcRef, observer: &mut impl TransducerChangeObserver) {
        let arc = self.states[arc_ref.source.0]
            .as_mut()
            .expect("dangling state id")
            .arcs[arc_ref.index]
            .take()
            .expect("arc already removed");
        self.states[arc.target.0]
            .as_mut()
            .expect("dangling state id")
            .incoming
            .retain(|&a| a != arc_ref);
        if let Some(list) = self.arcs_with_model.get_mut(&arc.input) {
            list.retain(|&a| a != arc_ref);
        }
        observer.notify_remove_arc(arc_ref);
    }

    /// Relabels the input of an existing arc to `new_input`, keeping the model-to-arc index
    /// consistent.
    pub fn update_arc_input(&mut self, arc_ref: ArcRef, new_input: AllophoneModelId) {
        let old_input = {
            let state = self.states[arc_ref.source.0].as_mut().expect("dangling state id");
            let arc = state.arcs[arc_ref.index].as_mut().expect("arc already removed");
            let old = arc.input;
            arc.input = new_input;
            old
        };
        if let Some(list) = self.arcs_with_model.get_mut(&old_input) {
            list.retain(|&a| a != arc_ref);
        }
        self.arcs_with_model.entry(new_input).or_default().push(arc_ref);
    }

    /// Removes every arc-index entry for a model no longer used by any arc (called once a model
    /// has been fully replaced during a split).
    pub fn forget_model(&mut self, model: AllophoneModelId) {
        self.arcs_with_model.remove(&model);
    }

    /// All arcs whose input label is `model`.
    pub fn arcs_with_model(&self, model: AllophoneModelId) -> &[ArcRef] {
        self.arcs_with_model
            .get(&model)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The arc object referenced by `arc_ref`.
    pub fn arc(&self, arc_ref: ArcRef) -> &Arc {
        self.states[arc_ref.source.0]
            .as_ref()
            .expect("dangling state id")
            .arcs[arc_ref.index]
            .as_ref()
            .expect("arc already removed")
    }

    /// Iterates over every live state.
    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (StateId(i), s)))
    }

    /// The set of states with an outgoing arc targeting any state in `states`.
    pub fn predecessor_states_of(&self, states: &[StateId]) -> Vec<StateId> {
        let mut preds = Vec::new();
        for &id in states {
            for arc_ref in self.state(id).incoming_arcs() {
                if !preds.contains(&arc_ref.source) {
                    preds.push(arc_ref.source);
                }
            }
        }
        preds
    }
}

#[derive(Default)]
pub struct NullObserver;
impl TransducerChangeObserver for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_state_is_idempotent_for_same_history() {
        let mut t = ConstructionalTransducer::new(4, 1, 0, false);
        let mut obs = NullObserver;
        let h1 = PhoneContext::new(4, 1, 0);
        let id1 = t.add_state(h1.clone(), &mut obs);
        let id2 = t.add_state(h1, &mut obs);
        assert_eq!(id1, id2);
        assert_eq!(t.num_states(), 1);
    }

    #[test]
    fn add_and_remove_arc_updates_incoming() {
        use crate::phone_models::AllophoneModelId;
        let mut t = ConstructionalTransducer::new(4, 1, 0, false);
        let mut obs = NullObserver;
        let mut h1 = PhoneContext::new(4, 1, 0);
        h1.get_mut(0).add(0);
        let mut h2 = PhoneContext::new(4, 1, 0);
        h2.get_mut(0).add(1);
        let s1 = t.add_state(h1, &mut obs);
        let s2 = t.add_state(h2, &mut obs);

        let model_id = AllophoneModelId::for_test(0);
        let arc = t.add_arc(s1, s2, model_id, 1, &mut obs);
        assert_eq!(t.state(s2).incoming_arcs().len(), 1);
        assert_eq!(t.arcs_with_model(model_id).len(), 1);

        t.remove_arc(arc, &mut obs);
        assert!(t.state(s2).incoming_arcs().is_empty());
        assert!(t.arcs_with_model(model_id).is_empty());
    }

    #[test]
    fn remove_state_requires_no_arcs() {
        let mut t = ConstructionalTransducer::new(4, 1, 0, false);
        let mut obs = NullObserver;
        let h1 = PhoneContext::new(4, 1, 0);
        let s1 = t.add_state(h1, &mut obs);
        t.remove_state(s1, &mut obs);
        assert_eq!(t.num_states(), 0);
    }
}

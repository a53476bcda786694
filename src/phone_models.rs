//! Models of context dependent phones and their HMM states.
//!
//! A context dependent HMM is an [`AllophoneModel`]: a phone plus a sequence of per-state models.
//! An HMM state is an [`AllophoneStateModel`], valid over a [`PhoneContext`] and shared between
//! every [`AllophoneModel`] that currently has the same state tied to it. The C++ original
//! represents the state model's back-references to its allophones with an intrusive singly
//! linked list of raw pointers; here every model lives in a [`ModelManager`] arena and refers to
//! other models by typed index, which sidesteps the need for any unsafe aliasing.

use anyhow::Result;

use crate::context_set::{ContextQuestion, PhoneContext};
use crate::sample::{Sample, Statistics};
use crate::scorer::Scorer;

/// Index of an [`AllophoneStateModel`] within a [`ModelManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateModelId(usize);

impl StateModelId {
    /// The raw arena index, used for diagnostics and recipe logging.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Index of an [`AllophoneModel`] within a [`ModelManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllophoneModelId(usize);

impl AllophoneModelId {
    /// The raw arena index, used for deterministic output ordering.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[cfg(test)]
impl AllophoneModelId {
    pub fn for_test(index: usize) -> Self {
        Self(index)
    }
}

/// Accumulated statistics for one context dependent HMM state, referencing the samples that
/// contributed to it rather than copying them.
#[derive(Clone, Debug)]
pub struct HmmStateStat<'a> {
    phone: usize,
    samples: Vec<&'a Sample>,
}

impl<'a> HmmStateStat<'a> {
    /// Creates empty statistics for the given phone.
    pub fn new(phone: usize) -> Self {
        Self {
            phone,
            samples: Vec::new(),
        }
    }

    /// The phone these statistics were accumulated for.
    pub fn phone(&self) -> usize {
        self.phone
    }

    /// Replaces the sample list wholesale.
    pub fn set_stats(&mut self, samples: Vec<&'a Sample>) {
        self.samples = samples;
    }

    /// Adds one sample to the statistics.
    pub fn add_stat(&mut self, sample: &'a Sample) {
        self.samples.push(sample);
    }

    /// The samples backing these statistics.
    pub fn stats(&self) -> &[&'a Sample] {
        &self.samples
    }

    /// Number of distinct phonetic contexts observed.
    pub fn num_contexts(&self) -> usize {
        self.samples.len()
    }

    /// Total number of (weighted) observations.
    pub fn num_observations(&self) -> f64 {
        self.samples.iter().map(|s| s.stat.weight()).sum()
    }

    /// Sums the statistics of every referenced sample.
    pub fn sum_statistics(&self) -> Option<Statistics> {
        let dim = self.samples.first()?.stat.dimension();
        let mut sum = Statistics::new(dim);
        for s in &self.samples {
            sum.accumulate(&s.stat).expect("dimension already checked");
        }
        Some(sum)
    }
}

/// Model of a single HMM state of a context dependent phone.
#[derive(Clone, Debug)]
pub struct AllophoneStateModel {
    state: usize,
    context: PhoneContext,
    allophones: Vec<AllophoneModelId>,
    stats: Statistics,
    cost: f64,
}

impl AllophoneStateModel {
    /// Creates a model for `state` valid over `context`, with no statistics yet attached.
    pub fn new(state: usize, context: PhoneContext, feature_dim: usize) -> Self {
        Self {
            state,
            context,
            allophones: Vec::new(),
            stats: Statistics::new(feature_dim),
            cost: 0.0,
        }
    }

    /// The HMM state index this model represents.
    pub fn state(&self) -> usize {
        self.state
    }

    /// The set of phone contexts this model is valid over.
    pub fn context(&self) -> &PhoneContext {
        &self.context
    }

    /// The allophones currently sharing this state model.
    pub fn allophones(&self) -> &[AllophoneModelId] {
        &self.allophones
    }

    fn add_allophone_ref(&mut self, model: AllophoneModelId) {
        self.allophones.push(model);
    }

    fn remove_allophone_ref(&mut self, model: AllophoneModelId) {
        self.allophones.retain(|&m| m != model);
    }

    /// Accumulates statistics into this state's model.
    pub fn add_statistics(&mut self, stats: &Statistics) -> Result<()> {
        self.stats.accumulate(stats)
    }

    /// The accumulated statistics of this state model.
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Scores the accumulated statistics and remembers the cost for [`AllophoneStateModel::cost`].
    pub fn compute_cost(&mut self, scorer: &dyn Scorer) {
        self.cost = scorer.score(&self.stats);
    }

    /// The cost computed by the last call to [`AllophoneStateModel::compute_cost`].
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Partitions the model's context at `position` according to `question`, producing two new
    /// (unattached, statistics-free) state models that between them cover the original context.
    pub fn split(&self, position: i32, question: &ContextQuestion) -> (Self, Self) {
        let yes_context = self
            .context
            .with_position(position, self.context.get(position).intersect(question.phone_set(false)));
        let no_context = self
            .context
            .with_position(position, self.context.get(position).intersect(question.phone_set(true)));
        let dim = self.stats.dimension();
        (
            Self::new(self.state, yes_context, dim),
            Self::new(self.state, no_context, dim),
        )
    }
}

/// Model of a context dependent unit: a phone (or set of tied phones) plus one
/// [`AllophoneStateModel`] reference per HMM state.
#[derive(Clone, Debug)]
pub struct AllophoneModel {
    phones: Vec<usize>,
    states: Vec<Option<StateModelId>>,
}

impl AllophoneModel {
    /// Creates a model for `phone` with `num_states` (initially empty) state slots.
    pub fn new(phone: usize, num_states: usize) -> Self {
        Self {
            phones: vec![phone],
            states: vec![None; num_states],
        }
    }

    /// The phones this (possibly tied) unit represents.
    pub fn phones(&self) -> &[usize] {
        &self.phones
    }

    /// Adds another phone to the set of phones this unit represents.
    pub fn add_phone(&mut self, phone: usize) {
        self.phones.push(phone);
    }

    /// Number of HMM states.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// The state model bound to `state`, if any.
    pub fn state_model(&self, state: usize) -> Option<StateModelId> {
        self.states[state]
    }

    /// Binds `state` to `model`.
    pub fn set_state_model(&mut self, state: usize, model: StateModelId) {
        self.states[state] = Some(model);
    }
}

/// Arena owning every [`AllophoneStateModel`] and [`AllophoneModel`] created during construction.
#[derive(Default)]
pub struct ModelManager {
    state_models: Vec<Option<AllophoneStateModel>>,
    allophone_models: Vec<Option<AllophoneModel>>,
}

impl ModelManager {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live state models currently registered.
    pub fn num_state_models(&self) -> usize {
        self.state_models.iter().filter(|m| m.is_some()).count()
    }

    /// Registers a new state model and returns its id.
    pub fn add_state_model(&mut self, model: AllophoneStateModel) -> StateModelId {
        self.state_models.push(Some(model));
        StateModelId(self.state_models.len() - 1)
    }

    /// Removes a state model. Panics if any allophone still refers to it (callers must detach
    /// all references first via [`ModelManager::set_state_model`] on the owning allophones).
    pub fn remove_state_model(&mut self, id: StateModelId) -> AllophoneStateModel {
        let model = self.state_models[id.0].take().expect("state model already removed");
        assert!(
            model.allophones.is_empty(),
            "removed state model still referenced by allophones"
        );
        model
    }

    /// Borrows a state model.
    pub fn state_model(&self, id: StateModelId) -> &AllophoneStateModel {
        self.state_models[id.0].as_ref().expect("dangling state model id")
    }

    /// Mutably borrows a state model.
    pub fn state_model_mut(&mut self, id: StateModelId) -> &mut AllophoneStateModel {
        self.state_models[id.0].as_mut().expect("dangling state model id")
    }

    /// Iterates over every live state model.
    pub fn state_models(&self) -> impl Iterator<Item = (StateModelId, &AllophoneStateModel)> {
        self.state_models
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|m| (StateModelId(i), m)))
    }

    /// Creates a new [`AllophoneModel`] for `phone` with `num_states` states, all initially bound
    /// to freshly created state models valid over `context`.
    pub fn init_allophone_model(
        &mut self,
        phone: usize,
        num_states: usize,
        context: PhoneContext,
        feature_dim: usize,
    ) -> AllophoneModelId {
        let mut allophone = AllophoneModel::new(phone, num_states);
        self.allophone_models.push(Some(allophone.clone()));
        let id = AllophoneModelId(self.allophone_models.len() - 1);
        for state in 0..num_states {
            let state_model = AllophoneStateModel::new(state, context.clone(), feature_dim);
            let state_id = self.add_state_model(state_model);
            self.state_model_mut(state_id).add_allophone_ref(id);
            allophone.set_state_model(state, state_id);
        }
        self.allophone_models[id.0] = Some(allophone);
        id
    }

    /// Borrows an allophone model.
    pub fn allophone_model(&self, id: AllophoneModelId) -> &AllophoneModel {
        self.allophone_models[id.0].as_ref().expect("dangling allophone id")
    }

    /// Mutably borrows an allophone model.
    pub fn allophone_model_mut(&mut self, id: AllophoneModelId) -> &mut AllophoneModel {
        self.allophone_models[id.0].as_mut().expect("dangling allophone id")
    }

    /// Removes an allophone model, detaching it from every state model it referenced.
    pub fn remove_allophone_model(&mut self, id: AllophoneModelId) {
        let model = self.allophone_models[id.0].take().expect("allophone already removed");
        for state in model.states.into_iter().flatten() {
            self.state_model_mut(state).remove_allophone_ref(id);
        }
    }

    /// Splits the state model `old` at `position` using `question`, creating two new state
    /// models and, for every allophone that referenced `old`, a new allophone for each side bound
    /// to the matching new state model. Both sides are always created: which of the two a given
    /// transducer arc or state should end up pointing at is not decided here, since that depends
    /// on the arc/state's own context, not on the (generalized) model's - it is decided later by
    /// [`crate::state_splitter::StateSplitter`]. Statistics are distributed to the new state
    /// models by re-summing the statistics of the samples carried by `old` is not performed here -
    /// the caller supplies already-split statistics via `yes_stats`/`no_stats` since only the
    /// caller (the split hypothesis evaluator) has the per-sample breakdown.
    pub fn apply_split(
        &mut self,
        old: StateModelId,
        position: i32,
        question: &ContextQuestion,
        yes_stats: Statistics,
        no_stats: Statistics,
    ) -> Result<ModelSplit> {
        let (mut yes_model, mut no_model) = self.state_model(old).split(position, question);
        yes_model.add_statistics(&yes_stats)?;
        no_model.add_statistics(&no_stats)?;

        let referring: Vec<AllophoneModelId> = self.state_model(old).allophones().to_vec();
        let state = self.state_model(old).state();

        let mut phone_models = Vec::with_capacity(referring.len());
        let yes_id_placeholder = self.add_state_model(yes_model);
        let no_id_placeholder = self.add_state_model(no_model);

        for allophone_id in &referring {
            let allophone = self.allophone_model(*allophone_id).clone();

            let mut yes_allophone = allophone.clone();
            yes_allophone.set_state_model(state, yes_id_placeholder);
            self.allophone_models.push(Some(yes_allophone));
            let yes_new_id = AllophoneModelId(self.allophone_models.len() - 1);
            self.state_model_mut(yes_id_placeholder).add_allophone_ref(yes_new_id);

            let mut no_allophone = allophone;
            no_allophone.set_state_model(state, no_id_placeholder);
            self.allophone_models.push(Some(no_allophone));
            let no_new_id = AllophoneModelId(self.allophone_models.len() - 1);
            self.state_model_mut(no_id_placeholder).add_allophone_ref(no_new_id);

            phone_models.push(AllophoneModelSplit {
                old_model: *allophone_id,
                yes_model: yes_new_id,
                no_model: no_new_id,
            });
        }

        for split in &phone_models {
            self.remove_allophone_model(split.old_model);
        }
        self.remove_state_model(old);

        Ok(ModelSplit {
            yes_state_model: yes_id_placeholder,
            no_state_model: no_id_placeholder,
            phone_models,
        })
    }
}

/// Result of splitting one [`AllophoneStateModel`] and every [`AllophoneModel`] it occurred in.
pub struct ModelSplit {
    pub yes_state_model: StateModelId,
    pub no_state_model: StateModelId,
    pub phone_models: Vec<AllophoneModelSplit>,
}

/// An allophone model before and after a split: `old_model` has been removed from the arena and
/// replaced by `yes_model` (bound to the split's yes-side state model) and `no_model` (bound to
/// the no-side one). Which of the two applies to a given transducer arc or state is decided by
/// the caller from the arc/state's own context, not fixed here.
pub struct AllophoneModelSplit {
    pub old_model: AllophoneModelId,
    pub yes_model: AllophoneModelId,
    pub no_model: AllophoneModelId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::ContextSet;

    fn question(num_phones: usize, yes_phones: &[usize]) -> ContextQuestion {
        let mut yes = ContextSet::new(num_phones);
        for &p in yes_phones {
            yes.add(p);
        }
        ContextQuestion::new("q", yes)
    }

    #[test]
    fn init_allophone_model_creates_state_models() {
        let mut mgr = ModelManager::new();
        let ctx = PhoneContext::new(4, 1, 1);
        let id = mgr.init_allophone_model(0, 3, ctx, 2);
        let allophone = mgr.allophone_model(id);
        assert_eq!(allophone.num_states(), 3);
        assert_eq!(allophone.phones(), &[0]);
        for s in 0..3 {
            let state_id = allophone.state_model(s).unwrap();
            assert_eq!(mgr.state_model(state_id).allophones(), &[id]);
        }
    }

    #[test]
    fn state_model_split_partitions_context() {
        let mut ctx = PhoneContext::new(4, 1, 0);
        ctx.get_mut(-1).add(0);
        ctx.get_mut(-1).add(1);
        ctx.get_mut(-1).add(2);
        let model = AllophoneStateModel::new(0, ctx, 2);
        let q = question(4, &[0, 1]);
        let (yes, no) = model.split(-1, &q);
        assert!(yes.context().get(-1).has_element(0));
        assert!(yes.context().get(-1).has_element(1));
        assert!(!yes.context().get(-1).has_element(2));
        assert!(no.context().get(-1).has_element(2));
    }

    #[test]
    fn add_statistics_accumulates() {
        let ctx = PhoneContext::new(2, 0, 0);
        let mut model = AllophoneStateModel::new(0, ctx, 1);
        let mut stat = Statistics::new(1);
        stat.add_observation(&[2.0], 1.0).unwrap();
        model.add_statistics(&stat).unwrap();
        assert_eq!(model.statistics().weight(), 1.0);
    }

    #[test]
    fn remove_allophone_model_detaches_state_refs() {
        let mut mgr = ModelManager::new();
        let ctx = PhoneContext::new(2, 0, 0);
        let id = mgr.init_allophone_model(0, 1, ctx, 1);
        let state_id = mgr.allophone_model(id).state_model(0).unwrap();
        assert_eq!(mgr.state_model(state_id).allophones().len(), 1);
        mgr.remove_allophone_model(id);
        assert!(mgr.state_model(state_id).allophones().is_empty());
    }
}

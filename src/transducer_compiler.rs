//! Converts the mutable [`ConstructionalTransducer`] built during splitting into a standard
//! output transducer with integer labels, in the AT&T text FST format (`src dst isym osym` per
//! line, final states listed at the end) rather than a binary OpenFst container, since this
//! crate does not depend on an FST library.

use std::collections::HashMap;
use std::io::Write;

use anyhow::{ensure, Context, Result};
use serde::Serialize;

use crate::hmm_compiler::HmmCompiler;
use crate::transducer::{ConstructionalTransducer, StateId};

/// A single arc of the compiled output transducer.
#[derive(Clone, Copy, Debug)]
pub struct CompiledArc {
    pub source: u32,
    pub target: u32,
    pub input: u32,
    pub output: u32,
}

/// The compiled context-dependency transducer: integer-labeled states and arcs, a single start
/// state, and a set of final states.
#[derive(Clone, Debug, Default)]
pub struct CompiledTransducer {
    pub num_states: u32,
    pub start: u32,
    pub finals: Vec<u32>,
    pub arcs: Vec<CompiledArc>,
}

impl CompiledTransducer {
    /// Writes the transducer in AT&T text FST format: one `src dst isym osym` line per arc,
    /// followed by one line per final state.
    pub fn write_text(&self, mut out: impl Write) -> Result<()> {
        for arc in &self.arcs {
            writeln!(out, "{} {} {} {}", arc.source, arc.target, arc.input, arc.output)
                .context("writing transducer arc")?;
        }
        for &f in &self.finals {
            writeln!(out, "{f}").context("writing transducer final state")?;
        }
        Ok(())
    }
}

/// Walks a finished [`ConstructionalTransducer`] and produces a [`CompiledTransducer`] with
/// HMM-label integer inputs and 1-based phone integer outputs.
pub struct TransducerCompiler<'a> {
    transducer: &'a ConstructionalTransducer,
    hmm_compiler: &'a HmmCompiler<'a>,
    boundary_phone: usize,
    state_map: HashMap<StateId, u32>,
}

impl<'a> TransducerCompiler<'a> {
    pub fn new(
        transducer: &'a ConstructionalTransducer,
        hmm_compiler: &'a HmmCompiler<'a>,
        boundary_phone: usize,
    ) -> Self {
        Self {
            transducer,
            hmm_compiler,
            boundary_phone,
            state_map: HashMap::new(),
        }
    }

    /// Whether `state`'s center contains the boundary phone and every left-context slot except
    /// the nearest one (position -1) also contains it - i.e. it represents "boundary, then
    /// anything, then boundary, boundary, ..." histories, a valid point to start or end an
    /// utterance.
    fn is_boundary_state(&self, state_id: StateId) -> bool {
        let state = self.transducer.state(state_id);
        if !state.center().has_element(self.boundary_phone) {
            return false;
        }
        let history = state.history();
        for pos in 1..history.num_left_contexts() as i32 {
            if !history.get(-pos).has_element(self.boundary_phone) {
                return false;
            }
        }
        true
    }

    fn get_or_add_state(&mut self, out: &mut CompiledTransducer, id: StateId) -> u32 {
        if let Some(&mapped) = self.state_map.get(&id) {
            return mapped;
        }
        let mapped = out.num_states;
        out.num_states += 1;
        self.state_map.insert(id, mapped);
        mapped
    }

    /// Walks every state of the constructional transducer, translating arcs and marking final
    /// states, then attaches a synthetic start state with epsilon-labeled copies of every
    /// boundary state's outgoing arcs (so the first context-dependent phone of an utterance need
    /// not already have a predecessor transition into it).
    pub fn compile(&mut self) -> Result<CompiledTransducer> {
        let mut out = CompiledTransducer::default();
        self.state_map.clear();

        let mut ordered: Vec<StateId> = self.transducer.states().map(|(id, _)| id).collect();
        ordered.sort_by_key(|id| id.index());

        for &id in &ordered {
            self.get_or_add_state(&mut out, id);
        }

        let boundary_states: Vec<StateId> = ordered
            .iter()
            .copied()
            .filter(|&id| self.is_boundary_state(id))
            .collect();
        ensure!(
            !boundary_states.is_empty(),
            "no boundary state found for boundary phone {}",
            self.boundary_phone
        );

        let start = out.num_states;
        out.num_states += 1;
        out.start = start;
        for &id in &boundary_states {
            let target = self.get_or_add_state(&mut out, id);
            for (_, arc) in self.transducer.state(id).arcs() {
                let input = 0;
                let output = arc.output as u32 + 1;
                let arc_target = self.get_or_add_state(&mut out, arc.target);
                out.arcs.push(CompiledArc {
                    source: start,
                    target: arc_target,
                    input,
                    output,
                });
            }
            let _ = target;
        }

        for &id in &ordered {
            let source = self.get_or_add_state(&mut out, id);
            let state = self.transducer.state(id);
            if state.center().has_element(self.boundary_phone) {
                out.finals.push(source);
            }
            for (_, arc) in state.arcs() {
                let label = self
                    .hmm_compiler
                    .hmm_label(arc.input)
                    .context("arc input model has no assigned HMM label")?;
                let output = arc.output as u32 + 1;
                let target = self.get_or_add_state(&mut out, arc.target);
                out.arcs.push(CompiledArc {
                    source,
                    target,
                    input: label,
                    output,
                });
            }
        }

        Ok(out)
    }

    /// Writes a diagnostic report of the intermediate transducer, one JSON object per line: each
    /// state's id, center phones, history size and whether it is a boundary (final) state.
    pub fn write_state_info(&self, mut out: impl Write) -> Result<()> {
        #[derive(Serialize)]
        struct StateInfo {
            state: usize,
            center_phones: Vec<usize>,
            num_outgoing_arcs: usize,
            num_incoming_arcs: usize,
            is_boundary: bool,
        }

        let mut ordered: Vec<StateId> = self.transducer.states().map(|(id, _)| id).collect();
        ordered.sort_by_key(|id| id.index());

        for id in ordered {
            let state = self.transducer.state(id);
            let info = StateInfo {
                state: id.index(),
                center_phones: state.center().iter().collect(),
                num_outgoing_arcs: state.arcs().count(),
                num_incoming_arcs: state.incoming_arcs().len(),
                is_boundary: self.is_boundary_state(id),
            };
            serde_json::to_writer(&mut out, &info).context("writing transducer state info")?;
            writeln!(out).context("writing transducer state info")?;
        }
        Ok(())
    }
}

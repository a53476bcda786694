//! Walks the final allophone inventory and emits every piece of label and parameter data a
//! decoder needs: HMM and HMM-state symbol tables, a CD-to-CI name mapping, per-state Gaussian
//! parameters, and an H transducer expanding each HMM label into its state sequence.
//!
//! [`HmmCompiler::enumerate_models`] must be called once, after splitting has converged, before
//! any of the `write_*` methods.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::phone_models::{AllophoneModelId, ModelManager, StateModelId};
use crate::phones::{PhoneSymbols, Phones};
use crate::scorer::Scorer;

/// A named, numbered tied HMM state, as it will be written to the state symbol table.
#[derive(Clone, Debug)]
struct StateModelEntry {
    id: StateModelId,
    name: String,
    #[allow(dead_code)]
    index: u32,
}

/// A named, numbered context dependent HMM (allophone), as it will be written to the HMM symbol
/// table.
#[derive(Clone, Debug)]
struct HmmEntry {
    id: AllophoneModelId,
    name: String,
    index: u32,
}

/// Enumerates and names the models produced by the splitter, then writes out the associated
/// label tables and Gaussian parameters.
pub struct HmmCompiler<'a> {
    models: &'a ModelManager,
    #[allow(dead_code)]
    phone_info: &'a Phones,
    phone_symbols: &'a PhoneSymbols,
    variance_floor: f64,
    state_entries: Vec<StateModelEntry>,
    hmm_entries: Vec<HmmEntry>,
}

impl<'a> HmmCompiler<'a> {
    pub fn new(
        models: &'a ModelManager,
        phone_info: &'a Phones,
        phone_symbols: &'a PhoneSymbols,
        variance_floor: f64,
    ) -> Self {
        Self {
            models,
            phone_info,
            phone_symbols,
            variance_floor,
            state_entries: Vec::new(),
            hmm_entries: Vec::new(),
        }
    }

    /// Assigns deterministic names to every tied state model (`<center-phone>_<state>.<seq>`)
    /// and every allophone (`<phone>_<global-index>`). Must be called before any `write_*`
    /// method.
    pub fn enumerate_models(&mut self) {
        let mut sequence: std::collections::HashMap<(usize, usize), u32> =
            std::collections::HashMap::new();
        let mut states: Vec<_> = self.models.state_models().collect();
        states.sort_by_key(|(id, _)| id.index());
        for (index, (id, model)) in states.into_iter().enumerate() {
            let phone = model
                .allophones()
                .first()
                .map(|&a| self.models.allophone_model(a).phones()[0])
                .unwrap_or(0);
            let seq = sequence.entry((phone, model.state())).or_insert(0);
            let phone_name = self.phone_symbols.name_of(phone).unwrap_or("?");
            let name = format!("{phone_name}_{}.{seq}", model.state());
            *seq += 1;
            self.state_entries.push(StateModelEntry {
                id,
                name,
                index: index as u32,
            });
        }

        let mut allophones: Vec<AllophoneModelId> = Vec::new();
        for entry in &self.state_entries {
            for &a in self.models.state_model(entry.id).allophones() {
                if !allophones.contains(&a) {
                    allophones.push(a);
                }
            }
        }
        allophones.sort_by_key(|a| a.index());
        for (index, id) in allophones.into_iter().enumerate() {
            let phone = self.models.allophone_model(id).phones()[0];
            let phone_name = self.phone_symbols.name_of(phone).unwrap_or("?");
            self.hmm_entries.push(HmmEntry {
                id,
                name: format!("{phone_name}_{index}"),
                index: index as u32,
            });
        }
    }

    /// Number of tied state models enumerated.
    pub fn num_state_models(&self) -> usize {
        self.state_entries.len()
    }

    /// Number of distinct HMMs (allophones) enumerated.
    pub fn num_hmm_models(&self) -> usize {
        self.hmm_entries.len()
    }

    /// The symbol name assigned to `model`, e.g. for use as an arc's integer label lookup key.
    pub fn hmm_name(&self, model: AllophoneModelId) -> Option<&str> {
        self.hmm_entries
            .iter()
            .find(|e| e.id == model)
            .map(|e| e.name.as_str())
    }

    /// The integer label assigned to `model`, 1-based (0 is reserved for epsilon).
    pub fn hmm_label(&self, model: AllophoneModelId) -> Option<u32> {
        self.hmm_entries
            .iter()
            .find(|e| e.id == model)
            .map(|e| e.index + 1)
    }

    /// Every tied state model carried by the given HMM label, in state order.
    pub fn state_sequence(&self, model: AllophoneModelId) -> Vec<&str> {
        let allophone = self.models.allophone_model(model);
        (0..allophone.num_states())
            .filter_map(|s| allophone.state_model(s))
            .filter_map(|sid| self.state_entries.iter().find(|e| e.id == sid))
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Writes the HMM list: one HMM name per line, in assigned-index order.
    pub fn write_hmm_list(&self, mut out: impl Write) -> Result<()> {
        for entry in &self.hmm_entries {
            writeln!(out, "{}", entry.name).context("writing HMM list")?;
        }
        Ok(())
    }

    /// Writes the HMM-state symbol table (`name index`), sorted by name as the original does.
    pub fn write_state_symbols(&self, mut out: impl Write) -> Result<()> {
        let mut sorted: Vec<&StateModelEntry> = self.state_entries.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        writeln!(out, "<eps> 0").context("writing state symbols")?;
        for (i, entry) in sorted.into_iter().enumerate() {
            writeln!(out, "{} {}", entry.name, i + 1).context("writing state symbols")?;
        }
        Ok(())
    }

    /// Writes the HMM symbol table (`name index`).
    pub fn write_hmm_symbols(&self, mut out: impl Write) -> Result<()> {
        writeln!(out, "<eps> 0").context("writing HMM symbols")?;
        for entry in &self.hmm_entries {
            writeln!(out, "{} {}", entry.name, entry.index + 1).context("writing HMM symbols")?;
        }
        Ok(())
    }

    /// Writes a mapping from each HMM name to the symbolic name of its center phone.
    pub fn write_cd_to_ci_map(&self, mut out: impl Write) -> Result<()> {
        for entry in &self.hmm_entries {
            let phone = self.models.allophone_model(entry.id).phones()[0];
            let phone_name = self.phone_symbols.name_of(phone).unwrap_or("?");
            writeln!(out, "{} {}", entry.name, phone_name).context("writing CD-to-CI map")?;
        }
        Ok(())
    }

    /// Writes a mapping from each context dependent state name to its context independent
    /// `<phone>_<state>` counterpart.
    pub fn write_state_name_map(&self, mut out: impl Write) -> Result<()> {
        for entry in &self.state_entries {
            let model = self.models.state_model(entry.id);
            let phone = model
                .allophones()
                .first()
                .map(|&a| self.models.allophone_model(a).phones()[0])
                .unwrap_or(0);
            let phone_name = self.phone_symbols.name_of(phone).unwrap_or("?");
            writeln!(out, "{} {}_{}", entry.name, phone_name, model.state())
                .context("writing state name map")?;
        }
        Ok(())
    }

    /// Writes per-state Gaussian parameters (mean, diagonal variance with the configured floor
    /// applied) as plain text: `name dim mean... variance...` per line.
    pub fn write_state_models(&self, scorer: &dyn Scorer, mut out: impl Write) -> Result<()> {
        let _ = scorer;
        for entry in &self.state_entries {
            let stats = self.models.state_model(entry.id).statistics();
            let mean = stats.mean().unwrap_or_else(|| vec![0.0; stats.dimension()]);
            let variance = stats
                .variance()
                .unwrap_or_else(|| vec![self.variance_floor; stats.dimension()])
                .into_iter()
                .map(|v| v.max(self.variance_floor))
                .collect::<Vec<_>>();
            write!(out, "{} {}", entry.name, stats.dimension()).context("writing state models")?;
            for m in &mean {
                write!(out, " {m}").context("writing state models")?;
            }
            for v in &variance {
                write!(out, " {v}").context("writing state models")?;
            }
            writeln!(out).context("writing state models")?;
        }
        Ok(())
    }

    /// Writes a diagnostic per-state-model report, one JSON object per line: name, observation
    /// count, and acoustic cost.
    pub fn write_state_model_info(&self, mut out: impl Write) -> Result<()> {
        #[derive(Serialize)]
        struct StateModelInfo<'a> {
            name: &'a str,
            observations: f64,
            cost: f64,
        }

        for entry in &self.state_entries {
            let model = self.models.state_model(entry.id);
            let info = StateModelInfo {
                name: &entry.name,
                observations: model.statistics().weight(),
                cost: model.cost(),
            };
            serde_json::to_writer(&mut out, &info).context("writing state model info")?;
            writeln!(out).context("writing state model info")?;
        }
        Ok(())
    }

    /// Writes the H transducer: a linear chain of arcs per HMM expanding its label into its
    /// left-to-right state sequence, in the same AT&T text format used by the C-transducer
    /// compiler.
    pub fn write_hmm_transducer(&self, mut out: impl Write) -> Result<()> {
        let mut next_state = 0u32;
        for entry in &self.hmm_entries {
            let states = self.state_sequence(entry.id);
            let start = next_state;
            let mut cur = start;
            for (i, state_name) in states.iter().enumerate() {
                let target = cur + 1;
                let output = if i == 0 { entry.index + 1 } else { 0 };
                writeln!(out, "{cur} {target} {state_name} {output}")
                    .context("writing H transducer")?;
                cur = target;
            }
            next_state = cur + 1;
        }
        writeln!(out, "{}", next_state.saturating_sub(1)).context("writing H transducer")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::PhoneContext;
    use crate::phones::PhoneSymbols;
    use std::io::Cursor;

    fn symbols() -> PhoneSymbols {
        let text = "<eps> 0\nsil 1\naa 2\n";
        PhoneSymbols::from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn enumerate_models_names_states_and_hmms() {
        let mut models = ModelManager::new();
        let ctx = PhoneContext::new(2, 0, 0);
        let allophone = models.init_allophone_model(0, 2, ctx, 1);
        let _ = allophone;

        let phones = Phones::new(2);
        let symbols = symbols();
        let mut compiler = HmmCompiler::new(&models, &phones, &symbols, 1e-3);
        compiler.enumerate_models();
        assert_eq!(compiler.num_state_models(), 2);
        assert_eq!(compiler.num_hmm_models(), 1);

        let mut hmm_list = Vec::new();
        compiler.write_hmm_list(&mut hmm_list).unwrap();
        assert!(String::from_utf8(hmm_list).unwrap().starts_with("sil_0"));
    }

    #[test]
    fn write_state_symbols_reserves_epsilon() {
        let models = ModelManager::new();
        let phones = Phones::new(2);
        let symbols = symbols();
        let mut compiler = HmmCompiler::new(&models, &phones, &symbols, 1e-3);
        compiler.enumerate_models();
        let mut out = Vec::new();
        compiler.write_state_symbols(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("<eps> 0"));
    }

    #[test]
    fn write_state_model_info_emits_json_lines() {
        let mut models = ModelManager::new();
        let ctx = PhoneContext::new(2, 0, 0);
        models.init_allophone_model(0, 1, ctx, 1);

        let phones = Phones::new(2);
        let symbols = symbols();
        let mut compiler = HmmCompiler::new(&models, &phones, &symbols, 1e-3);
        compiler.enumerate_models();

        let mut out = Vec::new();
        compiler.write_state_model_info(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["name"], "sil_0.0");
        assert_eq!(parsed["observations"], 0.0);
    }
}

//! Named phonetic question sets, loaded from a phone-set file.
//!
//! File format: one question per line, `<name> <phone> <phone> ...`, phones named against the
//! same symbol table used for samples.

use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::{ensure, Context, Result};

use crate::context_set::{ContextQuestion, ContextSet};
use crate::phones::PhoneSymbols;

/// A collection of named phone sets used to generate [`ContextQuestion`]s during context
/// splitting.
#[derive(Default)]
pub struct SetInventory {
    sets: BTreeMap<String, ContextSet>,
}

impl SetInventory {
    /// Reads a phone-set file. `num_phones` is the size of the phone universe each resulting set
    /// is allocated over.
    pub fn read_text(
        reader: impl BufRead,
        symbols: &PhoneSymbols,
        num_phones: usize,
    ) -> Result<Self> {
        let mut sets = BTreeMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("error reading line {}", line_no + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut items = trimmed.split_whitespace();
            let name = items
                .next()
                .with_context(|| format!("missing question name at line {}", line_no + 1))?
                .to_string();

            let mut set = ContextSet::new(num_phones);
            let mut count = 0;
            for sym in items {
                let phone = symbols
                    .index_of(sym)
                    .with_context(|| format!("unknown phone symbol '{sym}'"))?;
                set.add(phone);
                count += 1;
            }
            ensure!(
                count > 0,
                "question '{name}' at line {} has no phones",
                line_no + 1
            );

            if sets.insert(name.clone(), set).is_some() {
                tracing::warn!(question = %name, "duplicate question definition, last one wins");
            }
        }
        Ok(Self { sets })
    }

    /// Number of named sets in the inventory.
    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// The phone set named `name`, if present.
    pub fn get_set(&self, name: &str) -> Option<&ContextSet> {
        self.sets.get(name)
    }

    /// Builds the [`ContextQuestion`]s for every set in the inventory.
    pub fn questions(&self) -> impl Iterator<Item = ContextQuestion> + '_ {
        self.sets
            .iter()
            .map(|(name, set)| ContextQuestion::new(name.clone(), set.clone()))
    }

    /// Iterates over `(name, set)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextSet)> {
        self.sets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn symbols() -> PhoneSymbols {
        let text = "<eps> 0\nA 1\nB 2\nC 3\n";
        PhoneSymbols::from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn parses_named_sets() {
        let syms = symbols();
        let text = "vowels A B\nconsonants C\n";
        let inv = SetInventory::read_text(Cursor::new(text), &syms, 3).unwrap();
        assert_eq!(inv.num_sets(), 2);
        let vowels = inv.get_set("vowels").unwrap();
        assert!(vowels.has_element(0));
        assert!(vowels.has_element(1));
        assert!(!vowels.has_element(2));
    }

    #[test]
    fn rejects_empty_question() {
        let syms = symbols();
        let text = "vowels\n";
        assert!(SetInventory::read_text(Cursor::new(text), &syms, 3).is_err());
    }

    #[test]
    fn last_duplicate_wins() {
        let syms = symbols();
        let text = "vowels A\nvowels B\n";
        let inv = SetInventory::read_text(Cursor::new(text), &syms, 3).unwrap();
        let vowels = inv.get_set("vowels").unwrap();
        assert!(!vowels.has_element(0));
        assert!(vowels.has_element(1));
    }
}

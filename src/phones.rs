//! Global information about the phone inventory: how many HMM states each phone has, whether a
//! phone is modeled context independently, and the symbol table mapping phone names to the
//! zero-based indices used everywhere else in this crate.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{bail, ensure, Context, Result};

/// Number of HMM states per phone, and which phones are exempt from context splitting.
///
/// Phone indices are zero-based throughout this crate (a symbol table key minus one, in terms
/// of the on-disk format, since index 0 is reserved for the epsilon symbol there).
#[derive(Clone, Debug)]
pub struct Phones {
    num_hmm_states: Vec<i32>,
    is_ci_phone: Vec<bool>,
}

impl Phones {
    /// Creates a `Phones` table for `num_phones` phones, with HMM state counts unset (`-1`) and
    /// none marked context independent.
    pub fn new(num_phones: usize) -> Self {
        Self {
            num_hmm_states: vec![-1; num_phones],
            is_ci_phone: vec![false; num_phones],
        }
    }

    /// Total number of phones in the inventory.
    pub fn num_phones(&self) -> usize {
        self.num_hmm_states.len()
    }

    /// Sets the number of HMM states for a single phone.
    pub fn set_phone_length(&mut self, phone: usize, hmm_states: i32) -> Result<()> {
        ensure!(
            phone < self.num_hmm_states.len(),
            "phone index {phone} out of range"
        );
        ensure!(hmm_states > 0, "phone {phone} has non-positive length");
        self.num_hmm_states[phone] = hmm_states;
        Ok(())
    }

    /// Sets the number of HMM states for every phone at once.
    pub fn set_phone_lengths(&mut self, lengths: Vec<i32>) -> Result<()> {
        ensure!(
            lengths.len() == self.num_hmm_states.len(),
            "expected {} phone lengths, got {}",
            self.num_hmm_states.len(),
            lengths.len()
        );
        for &l in &lengths {
            ensure!(l > 0, "phone length must be positive, got {l}");
        }
        self.num_hmm_states = lengths;
        Ok(())
    }

    /// Marks `phone` as modeled context independently (e.g. silence).
    pub fn set_ci_phone(&mut self, phone: usize) -> Result<()> {
        ensure!(
            phone < self.is_ci_phone.len(),
            "phone index {phone} out of range"
        );
        self.is_ci_phone[phone] = true;
        Ok(())
    }

    /// The number of HMM states of `phone`, or `-1` if unset.
    pub fn num_hmm_states(&self, phone: usize) -> i32 {
        self.num_hmm_states[phone]
    }

    /// Whether `phone` is modeled context independently.
    pub fn is_ci_phone(&self, phone: usize) -> bool {
        self.is_ci_phone[phone]
    }
}

/// A two-column phone symbol table: symbol name to integer index. Index 0 is always the epsilon
/// symbol `<eps>`; real phones are indices 1 and up on disk, but this crate works with zero-based
/// phone indices (symbol index minus one) once the table has been loaded.
#[derive(Clone, Debug, Default)]
pub struct PhoneSymbols {
    name_to_index: HashMap<String, i32>,
    index_to_name: Vec<String>,
}

impl PhoneSymbols {
    /// Parses a phone symbol table from its two-column text form: `<symbol> <index>` per line.
    /// Index 0 must name the epsilon symbol. Gaps in the index sequence are tolerated with a
    /// warning (the original symbol table format allows sparse tables); a negative or duplicate
    /// index is an error.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut name_to_index = HashMap::new();
        let mut max_index = -1i32;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("error reading line {}", line_no + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let name = fields
                .next()
                .with_context(|| format!("missing symbol name at line {}", line_no + 1))?
                .to_string();
            let index: i32 = fields
                .next()
                .with_context(|| format!("missing symbol index at line {}", line_no + 1))?
                .parse()
                .with_context(|| format!("invalid symbol index at line {}", line_no + 1))?;
            ensure!(index >= 0, "symbol index must not be negative, got {index}");
            if name_to_index.insert(name.clone(), index).is_some() {
                bail!("duplicate symbol '{name}' in phone symbol table");
            }
            max_index = max_index.max(index);
        }
        ensure!(
            name_to_index.values().any(|&i| i == 0),
            "phone symbol table must define an epsilon symbol at index 0"
        );

        let mut index_to_name = vec![String::new(); (max_index + 1) as usize];
        for (name, &index) in &name_to_index {
            index_to_name[index as usize] = name.clone();
        }
        for (i, name) in index_to_name.iter().enumerate() {
            if name.is_empty() {
                tracing::warn!(index = i, "phone symbol table has a gap at this index");
            }
        }

        Ok(Self {
            name_to_index,
            index_to_name,
        })
    }

    /// The zero-based phone index of `name` (the symbol table index minus one), or `None` if the
    /// symbol is unknown or is the epsilon symbol.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let raw = *self.name_to_index.get(name)?;
        if raw <= 0 {
            return None;
        }
        Some((raw - 1) as usize)
    }

    /// The symbol name for zero-based phone index `phone`.
    pub fn name_of(&self, phone: usize) -> Option<&str> {
        self.index_to_name
            .get(phone + 1)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Number of real phones (excludes the epsilon symbol).
    pub fn num_phones(&self) -> usize {
        self.index_to_name.len().saturating_sub(1)
    }
}

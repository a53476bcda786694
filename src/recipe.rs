//! Binary recipe log: a record of which splits were applied, in order, so a run can be replayed
//! deterministically (e.g. to extend a previous run with a different target size, or to audit
//! what was decided) without repeating the acoustic scoring.
//!
//! Format: a 4-byte magic, a 4-byte version, then one 12-byte record per applied split:
//! `question_id: u32`, `position: i32`, `state: u32`. The question id indexes into the question
//! list the builder was configured with, in the same order; splits must be replayed against a
//! builder configured with the identical question set.

use std::io::{Read, Write};

use anyhow::{bail, ensure, Context, Result};

use crate::split_generator::SplitHypothesis;

const MAGIC: u32 = 0x5243_5054;
const VERSION: u32 = 1;

fn write_u32(w: &mut impl Write, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes()).context("write u32")
}
fn write_i32(w: &mut impl Write, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes()).context("write i32")
}
fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).context("read u32")?;
    Ok(u32::from_le_bytes(buf))
}
fn read_i32(r: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).context("read i32")?;
    Ok(i32::from_le_bytes(buf))
}

/// One applied split, as replayed from a recipe log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitRecord {
    pub question_id: u32,
    pub position: i32,
    pub state: u32,
}

/// Writes a recipe log as splits are applied.
pub struct RecipeWriter<W> {
    out: W,
}

impl<W: Write> RecipeWriter<W> {
    /// Writes the recipe header. Must be called before any [`RecipeWriter::add_split`].
    pub fn new(mut out: W) -> Result<Self> {
        write_u32(&mut out, MAGIC)?;
        write_u32(&mut out, VERSION)?;
        Ok(Self { out })
    }

    /// Appends the split described by `hyp`, looking up its question's id in `question_ids`.
    pub fn add_split(
        &mut self,
        hyp: &SplitHypothesis,
        question_id: u32,
        state: u32,
    ) -> Result<()> {
        write_u32(&mut self.out, question_id)?;
        write_i32(&mut self.out, hyp.position)?;
        write_u32(&mut self.out, state)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("flush recipe log")
    }
}

/// Reads a previously written recipe log.
pub struct RecipeReader<R> {
    input: R,
}

impl<R: Read> RecipeReader<R> {
    /// Reads and validates the recipe header.
    pub fn new(mut input: R) -> Result<Self> {
        let magic = read_u32(&mut input).context("reading recipe magic")?;
        ensure!(magic == MAGIC, "not a recipe log (bad magic {magic:#x})");
        let version = read_u32(&mut input).context("reading recipe version")?;
        if version != VERSION {
            bail!("unsupported recipe log version {version}");
        }
        Ok(Self { input })
    }

    /// Reads the next split record, or `None` at end of file.
    pub fn read_split(&mut self) -> Result<Option<SplitRecord>> {
        let mut first = [0u8; 4];
        let n = self.input.read(&mut first).context("reading split record")?;
        if n == 0 {
            return Ok(None);
        }
        if n < 4 {
            bail!("truncated split record");
        }
        let question_id = u32::from_le_bytes(first);
        let position = read_i32(&mut self.input)?;
        let state = read_u32(&mut self.input)?;
        Ok(Some(SplitRecord {
            question_id,
            position,
            state,
        }))
    }

    /// Reads every remaining split record.
    pub fn read_all(&mut self) -> Result<Vec<SplitRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_split()? {
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_set::{ContextQuestion, ContextSet};
    use crate::phone_models::StateModelId;
    use crate::sample::Statistics;
    use std::io::Cursor;

    fn dummy_hyp(position: i32) -> SplitHypothesis {
        let yes = ContextSet::new(4);
        SplitHypothesis {
            model: unsafe_state_model_id(),
            position,
            question: ContextQuestion::new("q", yes),
            gain: 1.0,
            yes_stats: Statistics::new(1),
            no_stats: Statistics::new(1),
            yes_contexts: 1,
            no_contexts: 1,
        }
    }

    fn unsafe_state_model_id() -> StateModelId {
        let mut mgr = crate::phone_models::ModelManager::new();
        let ctx = crate::context_set::PhoneContext::new(4, 0, 0);
        mgr.add_state_model(crate::phone_models::AllophoneStateModel::new(0, ctx, 1))
    }

    #[test]
    fn round_trips_split_records() {
        let mut buf = Vec::new();
        {
            let mut writer = RecipeWriter::new(&mut buf).unwrap();
            writer.add_split(&dummy_hyp(-1), 3, 0).unwrap();
            writer.add_split(&dummy_hyp(1), 5, 2).unwrap();
            writer.flush().unwrap();
        }
        let mut reader = RecipeReader::new(Cursor::new(buf)).unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(
            records,
            vec![
                SplitRecord {
                    question_id: 3,
                    position: -1,
                    state: 0
                },
                SplitRecord {
                    question_id: 5,
                    position: 1,
                    state: 2
                },
            ]
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 8];
        assert!(RecipeReader::new(Cursor::new(buf)).is_err());
    }
}

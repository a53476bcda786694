//! Reads accumulated training samples from the text sample file format.
//!
//! File layout:
//!
//! ```text
//! <version> <feature-dim> <num-left-contexts> <num-right-contexts>
//! <phone> <hmm-state> <left-context> <right-context> <weight> <sum> <sum2>
//! ...
//! ```
//!
//! `<left-context>` and `<right-context>` are each a run of phone symbols. On disk the left
//! context is written in reading order (furthest phone first, nearest phone last, i.e. left to
//! right); this reader stores it reversed, so that `left_context()[0]` is always the phone
//! nearest the center, matching [`crate::context_set::PhoneContext`]'s position indexing.

use std::io::BufRead;

use anyhow::{bail, ensure, Context, Result};

use crate::phones::PhoneSymbols;
use crate::sample::Samples;

const FORMAT_VERSION: u32 = 1;

/// Reads samples from `reader` into `samples`, which must already have had
/// [`Samples::set_num_phones`] called on it.
pub fn read_samples(
    reader: impl BufRead,
    symbols: &PhoneSymbols,
    samples: &mut Samples,
) -> Result<usize> {
    ensure!(
        samples.num_phones() > 0,
        "sample collection must have its phone count set before reading"
    );
    let mut lines = reader.lines();

    let header = lines
        .next()
        .context("sample file is empty, expected a header line")??;
    let (dimension, num_left, num_right) = parse_header(&header)?;
    samples.set_feature_dimension(dimension);

    let mut count = 0usize;
    for (line_no, line) in lines.enumerate() {
        let line = line.with_context(|| format!("error reading line {}", line_no + 2))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        parse_sample(trimmed, symbols, num_left, num_right, dimension, samples)
            .with_context(|| format!("error reading sample in line {}", line_no + 2))?;
        count += 1;
    }
    tracing::debug!(count, "read samples");
    Ok(count)
}

fn parse_header(line: &str) -> Result<(usize, usize, usize)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    ensure!(
        fields.len() == 4,
        "malformed sample file header, expected 4 fields, got {}",
        fields.len()
    );
    let version: u32 = fields[0].parse().context("invalid format version")?;
    ensure!(
        version == FORMAT_VERSION,
        "unsupported sample file format version {version}"
    );
    let dimension: usize = fields[1].parse().context("invalid feature dimension")?;
    let num_left: usize = fields[2].parse().context("invalid left context count")?;
    let num_right: usize = fields[3].parse().context("invalid right context count")?;
    Ok((dimension, num_left, num_right))
}

#[allow(clippy::too_many_arguments)]
fn parse_sample(
    line: &str,
    symbols: &PhoneSymbols,
    num_left: usize,
    num_right: usize,
    dimension: usize,
    samples: &mut Samples,
) -> Result<()> {
    let mut fields = line.split_whitespace();

    let phone_sym = fields.next().context("missing phone symbol")?;
    let state: usize = fields
        .next()
        .context("missing hmm state")?
        .parse()
        .context("invalid hmm state")?;
    let phone = symbols
        .index_of(phone_sym)
        .with_context(|| format!("unknown phone symbol '{phone_sym}'"))?;

    let mut left_context = Vec::with_capacity(num_left);
    for _ in 0..num_left {
        let sym = fields.next().context("missing left context phone")?;
        left_context.push(
            symbols
                .index_of(sym)
                .with_context(|| format!("unknown phone symbol '{sym}'"))?,
        );
    }
    left_context.reverse();

    let mut right_context = Vec::with_capacity(num_right);
    for _ in 0..num_right {
        let sym = fields.next().context("missing right context phone")?;
        right_context.push(
            symbols
                .index_of(sym)
                .with_context(|| format!("unknown phone symbol '{sym}'"))?,
        );
    }

    let weight: f64 = fields
        .next()
        .context("missing statistics weight")?
        .parse()
        .context("invalid statistics weight")?;

    let mut sum = vec![0.0; dimension];
    for v in sum.iter_mut() {
        *v = fields
            .next()
            .context("missing sum component")?
            .parse()
            .context("invalid sum component")?;
    }
    let mut sum2 = vec![0.0; dimension];
    for v in sum2.iter_mut() {
        *v = fields
            .next()
            .context("missing sum2 component")?
            .parse()
            .context("invalid sum2 component")?;
    }
    if fields.next().is_some() {
        bail!("trailing data after statistics");
    }

    let sample = samples.add_sample(phone, state)?;
    sample.left_context = left_context;
    sample.right_context = right_context;
    sample.stat.set_weight(weight);
    sample.stat.sum_mut().copy_from_slice(&sum);
    sample.stat.sum2_mut().copy_from_slice(&sum2);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn symbols() -> PhoneSymbols {
        let text = "<eps> 0\nA 1\nB 2\nC 3\nD 4\n";
        PhoneSymbols::from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn reads_header_and_samples() {
        let syms = symbols();
        let text = "1 2 2 1\nA 0 C B D 1.0 0.5 0.5 0.1 0.1\n";
        let mut samples = Samples::new();
        samples.set_num_phones(5);
        let n = read_samples(Cursor::new(text), &syms, &mut samples).unwrap();
        assert_eq!(n, 1);
        assert_eq!(samples.feature_dimension(), 2);
        let s = &samples.get_samples(0, 0)[0];
        assert_eq!(s.left_context, vec![1, 2]);
        assert_eq!(s.right_context, vec![3]);
        assert_eq!(s.stat.weight(), 1.0);
        assert_eq!(s.stat.sum(), &[0.5, 0.5]);
    }

    #[test]
    fn rejects_wrong_version() {
        let syms = symbols();
        let mut samples = Samples::new();
        samples.set_num_phones(5);
        let err = read_samples(Cursor::new("2 1 0 0\n"), &syms, &mut samples).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn rejects_unknown_phone() {
        let syms = symbols();
        let mut samples = Samples::new();
        samples.set_num_phones(5);
        let text = "1 1 0 0\nZZZ 0 1.0 0.0\n";
        assert!(read_samples(Cursor::new(text), &syms, &mut samples).is_err());
    }

    #[test]
    fn skips_blank_lines() {
        let syms = symbols();
        let text = "1 1 0 0\n\nA 0 1.0 0.0 0.0\n\n";
        let mut samples = Samples::new();
        samples.set_num_phones(5);
        let n = read_samples(Cursor::new(text), &syms, &mut samples).unwrap();
        assert_eq!(n, 1);
    }
}

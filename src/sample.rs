//! Training samples and the sufficient statistics accumulated from them.
//!
//! A [`Statistics`] is the sufficient statistics of a diagonal Gaussian: a weight (count of
//! observations) plus the per-dimension sum and sum of squares. It never stores raw feature
//! vectors, only their accumulation, so merging two statistics (e.g. while evaluating a
//! hypothetical split) is an O(dim) vector add rather than a concatenation of observations.

use anyhow::{ensure, Result};

/// Sufficient statistics of a diagonal Gaussian over `dimension` features.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    dimension: usize,
    weight: f64,
    sum: Vec<f64>,
    sum2: Vec<f64>,
}

impl Statistics {
    /// Creates zeroed statistics for the given feature dimensionality.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            weight: 0.0,
            sum: vec![0.0; dimension],
            sum2: vec![0.0; dimension],
        }
    }

    /// Resets the statistics to zero, possibly changing the dimensionality.
    pub fn reset(&mut self, dimension: usize) {
        self.dimension = dimension;
        self.weight = 0.0;
        self.sum = vec![0.0; dimension];
        self.sum2 = vec![0.0; dimension];
    }

    /// The feature dimensionality these statistics were accumulated over.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total (weighted) observation count.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Directly sets the weight, used when loading pre-aggregated statistics.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    /// Per-dimension sum of observations.
    pub fn sum(&self) -> &[f64] {
        &self.sum
    }

    /// Mutable per-dimension sum of observations.
    pub fn sum_mut(&mut self) -> &mut [f64] {
        &mut self.sum
    }

    /// Per-dimension sum of squared observations.
    pub fn sum2(&self) -> &[f64] {
        &self.sum2
    }

    /// Mutable per-dimension sum of squared observations.
    pub fn sum2_mut(&mut self) -> &mut [f64] {
        &mut self.sum2
    }

    /// Accumulates `other` into `self`. Both must have the same dimensionality.
    pub fn accumulate(&mut self, other: &Statistics) -> Result<()> {
        ensure!(
            self.dimension == other.dimension,
            "cannot accumulate statistics of dimension {} into dimension {}",
            other.dimension,
            self.dimension
        );
        self.weight += other.weight;
        for i in 0..self.dimension {
            self.sum[i] += other.sum[i];
            self.sum2[i] += other.sum2[i];
        }
        Ok(())
    }

    /// Accumulates a single observation with the given weight (defaults to 1.0 in the source
    /// data; callers that read sample files pass whatever weight was recorded there).
    pub fn add_observation(&mut self, observation: &[f64], weight: f64) -> Result<()> {
        ensure!(
            observation.len() == self.dimension,
            "observation has {} dims, statistics has {}",
            observation.len(),
            self.dimension
        );
        self.weight += weight;
        for (i, &x) in observation.iter().enumerate() {
            self.sum[i] += weight * x;
            self.sum2[i] += weight * x * x;
        }
        Ok(())
    }

    /// The mean of each dimension, or `None` if the accumulated weight is zero.
    pub fn mean(&self) -> Option<Vec<f64>> {
        if self.weight <= 0.0 {
            return None;
        }
        Some(self.sum.iter().map(|s| s / self.weight).collect())
    }

    /// The (biased, population) variance of each dimension, or `None` if the accumulated weight
    /// is zero.
    pub fn variance(&self) -> Option<Vec<f64>> {
        if self.weight <= 0.0 {
            return None;
        }
        Some(
            self.sum
                .iter()
                .zip(self.sum2.iter())
                .map(|(s, s2)| (s2 / self.weight) - (s / self.weight).powi(2))
                .collect(),
        )
    }
}

/// A single training observation together with the phonetic context it was drawn in.
///
/// `left_context` and `right_context` list phone indices ordered nearest-to-farthest from the
/// center, matching the order found in a sample file after the on-disk reversal of the left
/// context is undone by the reader.
#[derive(Clone, Debug)]
pub struct Sample {
    pub phone: usize,
    pub stat: Statistics,
    pub left_context: Vec<usize>,
    pub right_context: Vec<usize>,
}

impl Sample {
    /// Creates an empty sample over the given feature dimensionality.
    pub fn new(phone: usize, feature_dim: usize) -> Self {
        Self {
            phone,
            stat: Statistics::new(feature_dim),
            left_context: Vec::new(),
            right_context: Vec::new(),
        }
    }
}

/// All samples collected for training, indexed by phone and HMM state within that phone.
///
/// [`Samples::set_num_phones`] and [`Samples::set_feature_dimension`] must be called before the
/// first call to [`Samples::add_sample`].
#[derive(Default)]
pub struct Samples {
    feature_dim: usize,
    samples: Vec<Vec<Vec<Sample>>>,
}

impl Samples {
    /// Creates an empty sample collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the number of phones that samples will be added for.
    pub fn set_num_phones(&mut self, num_phones: usize) {
        self.samples.resize_with(num_phones, Vec::new);
    }

    /// The number of phones this collection was configured for.
    pub fn num_phones(&self) -> usize {
        self.samples.len()
    }

    /// Declares the dimensionality of feature vectors that samples will carry.
    pub fn set_feature_dimension(&mut self, dim: usize) {
        self.feature_dim = dim;
    }

    /// The configured feature dimensionality.
    pub fn feature_dimension(&self) -> usize {
        self.feature_dim
    }

    /// Appends a new, empty sample for `(phone, state)` and returns a mutable reference to it
    /// for the caller to fill in.
    pub fn add_sample(&mut self, phone: usize, state: usize) -> Result<&mut Sample> {
        ensure!(
            phone < self.samples.len(),
            "phone {phone} exceeds configured phone count {}",
            self.samples.len()
        );
        let states = &mut self.samples[phone];
        if state >= states.len() {
            states.resize_with(state + 1, Vec::new);
        }
        states[state].push(Sample::new(phone, self.feature_dim));
        Ok(states[state].last_mut().expect("just pushed"))
    }

    /// Whether any samples were recorded for `(phone, state)`.
    pub fn have_sample(&self, phone: usize, state: usize) -> bool {
        self.samples
            .get(phone)
            .and_then(|states| states.get(state))
            .is_some_and(|list| !list.is_empty())
    }

    /// The samples recorded for `(phone, state)`.
    pub fn get_samples(&self, phone: usize, state: usize) -> &[Sample] {
        self.samples
            .get(phone)
            .and_then(|states| states.get(state))
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// The number of HMM states recorded for `phone`.
    pub fn num_states(&self, phone: usize) -> usize {
        self.samples.get(phone).map(|states| states.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_accumulate_observations() {
        let mut stat = Statistics::new(2);
        stat.add_observation(&[1.0, 2.0], 1.0).unwrap();
        stat.add_observation(&[3.0, 4.0], 1.0).unwrap();
        assert_eq!(stat.weight(), 2.0);
        assert_eq!(stat.mean().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn statistics_accumulate_merges_other() {
        let mut a = Statistics::new(2);
        a.add_observation(&[1.0, 1.0], 1.0).unwrap();
        let mut b = Statistics::new(2);
        b.add_observation(&[3.0, 3.0], 1.0).unwrap();
        a.accumulate(&b).unwrap();
        assert_eq!(a.weight(), 2.0);
        assert_eq!(a.mean().unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn statistics_dimension_mismatch_errors() {
        let mut a = Statistics::new(2);
        let b = Statistics::new(3);
        assert!(a.accumulate(&b).is_err());
    }

    #[test]
    fn empty_statistics_have_no_mean() {
        let stat = Statistics::new(3);
        assert!(stat.mean().is_none());
        assert!(stat.variance().is_none());
    }

    #[test]
    fn samples_indexed_by_phone_and_state() {
        let mut samples = Samples::new();
        samples.set_num_phones(3);
        samples.set_feature_dimension(2);
        {
            let s = samples.add_sample(1, 0).unwrap();
            s.stat.add_observation(&[1.0, 1.0], 1.0).unwrap();
        }
        assert!(samples.have_sample(1, 0));
        assert!(!samples.have_sample(1, 1));
        assert!(!samples.have_sample(0, 0));
        assert_eq!(samples.get_samples(1, 0).len(), 1);
        assert_eq!(samples.num_states(1), 1);
    }

    #[test]
    fn add_sample_rejects_unknown_phone() {
        let mut samples = Samples::new();
        samples.set_num_phones(2);
        samples.set_feature_dimension(1);
        assert!(samples.add_sample(5, 0).is_err());
    }
}

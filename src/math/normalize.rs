use crate::error::{DataError, Result};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Variance floor applied before dividing
const MIN_VARIANCE: f64 = 1e-12;

/// Per-channel mean/variance over the trailing axis of feature arrays.
///
/// Statistics are accumulated with Welford's algorithm and merged batch by
/// batch (Chan et al.), so the result does not depend on batch boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelNormalizer {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl ChannelNormalizer {
    pub fn new(channels: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; channels],
            m2: vec![0.0; channels],
        }
    }

    /// Build statistics from a sequence of feature arrays
    pub fn adapt<'a, I>(channels: usize, features: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ArrayD<f32>>,
    {
        let mut normalizer = Self::new(channels);
        for array in features {
            normalizer.update(array)?;
        }
        Ok(normalizer)
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn check_channels(&self, array: &ArrayD<f32>) -> Result<usize> {
        let last = array.ndim().checked_sub(1).ok_or_else(|| DataError::ShapeMismatch {
            expected: vec![self.channels()],
            actual: Vec::new(),
        })?;
        if array.len_of(Axis(last)) != self.channels() {
            return Err(DataError::ShapeMismatch {
                expected: vec![self.channels()],
                actual: array.shape().to_vec(),
            });
        }
        Ok(last)
    }

    /// Fold one feature array into the running statistics
    pub fn update(&mut self, array: &ArrayD<f32>) -> Result<()> {
        let axis = Axis(self.check_channels(array)?);
        let n = (array.len() / self.channels().max(1)) as u64;
        if n == 0 {
            return Ok(());
        }

        for (c, lane) in array.axis_iter(axis).enumerate() {
            let batch_mean = lane.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let batch_m2 = lane
                .iter()
                .map(|&v| {
                    let d = v as f64 - batch_mean;
                    d * d
                })
                .sum::<f64>();

            let total = self.count + n;
            let delta = batch_mean - self.mean[c];
            self.mean[c] += delta * n as f64 / total as f64;
            self.m2[c] += batch_m2 + delta * delta * self.count as f64 * n as f64 / total as f64;
        }
        self.count += n;
        Ok(())
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Population variance per channel
    pub fn variance(&self) -> Vec<f64> {
        if self.count == 0 {
            return vec![0.0; self.channels()];
        }
        self.m2.iter().map(|m2| m2 / self.count as f64).collect()
    }

    /// Normalize in place: `(x - mean) / sqrt(variance)`
    pub fn apply(&self, array: &mut ArrayD<f32>) -> Result<()> {
        let axis = Axis(self.check_channels(array)?);
        let variance = self.variance();
        for (c, mut lane) in array.axis_iter_mut(axis).enumerate() {
            let mean = self.mean[c];
            let scale = variance[c].max(MIN_VARIANCE).sqrt();
            lane.mapv_inplace(|v| ((v as f64 - mean) / scale) as f32);
        }
        Ok(())
    }
}

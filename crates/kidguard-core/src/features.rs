//! Feature aggregation
//!
//! Summarizes a session's raw samples into the fixed-length vector the
//! classifier consumes. Layout, for each kind in [`SensorKind::ALL`] order:
//!
//! | offset | value  |
//! |--------|--------|
//! | +0..3  | mean of x, y, z |
//! | +3..6  | population variance of x, y, z |
//!
//! A kind with no samples contributes six zeros. Neither statistic depends on
//! sample order.

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierError;
use crate::sensing::{RawSample, SamplesByKind, SensorKind};

/// Statistics computed per axis
const STATS_PER_AXIS: usize = 2;
const AXES: usize = 3;
const VALUES_PER_KIND: usize = STATS_PER_AXIS * AXES;

/// Number of values in every feature vector
pub const FEATURE_LEN: usize = SensorKind::ALL.len() * VALUES_PER_KIND;

/// Component of a three-axis sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// Fixed-length summary of one session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f32; FEATURE_LEN]);

impl FeatureVector {
    #[must_use]
    pub const fn zeros() -> Self {
        Self([0.0; FEATURE_LEN])
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }

    /// Mean of `axis` for `kind`
    #[must_use]
    pub fn mean(&self, kind: SensorKind, axis: Axis) -> f32 {
        self.0[kind_offset(kind) + axis.index()]
    }

    /// Population variance of `axis` for `kind`
    #[must_use]
    pub fn variance(&self, kind: SensorKind, axis: Axis) -> f32 {
        self.0[kind_offset(kind) + AXES + axis.index()]
    }
}

impl TryFrom<&[f32]> for FeatureVector {
    type Error = ClassifierError;

    fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
        let array: [f32; FEATURE_LEN] =
            values.try_into().map_err(|_| ClassifierError::Arity {
                expected: FEATURE_LEN,
                actual: values.len(),
            })?;
        Ok(Self(array))
    }
}

fn kind_offset(kind: SensorKind) -> usize {
    match kind {
        SensorKind::LinearAcceleration => 0,
        SensorKind::RotationVector => VALUES_PER_KIND,
    }
}

/// Aggregate grouped samples into a feature vector
#[must_use]
pub fn aggregate(samples: &SamplesByKind) -> FeatureVector {
    let mut values = [0.0_f32; FEATURE_LEN];
    for kind in SensorKind::ALL {
        let offset = kind_offset(kind);
        for (axis, (mean, variance)) in axis_stats(samples.get(kind)).into_iter().enumerate() {
            values[offset + axis] = narrow(mean);
            values[offset + AXES + axis] = narrow(variance);
        }
    }
    FeatureVector(values)
}

/// Aggregate an ungrouped, possibly interleaved, sample sequence
#[must_use]
pub fn aggregate_samples(samples: impl IntoIterator<Item = RawSample>) -> FeatureVector {
    aggregate(&SamplesByKind::from_samples(samples))
}

/// (mean, population variance) per axis, accumulated in f64
fn axis_stats(samples: &[RawSample]) -> [(f64, f64); AXES] {
    let mut out = [(0.0, 0.0); AXES];
    if samples.is_empty() {
        return out;
    }

    #[allow(clippy::cast_precision_loss)]
    let n = samples.len() as f64;
    for (axis, slot) in out.iter_mut().enumerate() {
        let mean = samples
            .iter()
            .map(|s| f64::from(s.components()[axis]))
            .sum::<f64>()
            / n;
        let variance = samples
            .iter()
            .map(|s| {
                let d = f64::from(s.components()[axis]) - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        *slot = (mean, variance);
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn narrow(value: f64) -> f32 {
    value as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn sample(kind: SensorKind, v: [f32; 3]) -> RawSample {
        RawSample::new(kind, v, Duration::ZERO, Utc::now())
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_feature_len_is_twelve() {
        assert_eq!(FEATURE_LEN, 12);
    }

    #[test]
    fn test_empty_input_is_all_zeros() {
        let vector = aggregate(&SamplesByKind::default());
        assert_eq!(vector.as_slice().len(), FEATURE_LEN);
        assert_eq!(vector, FeatureVector::zeros());
    }

    #[test]
    fn test_missing_kind_yields_zero_block() {
        let vector = aggregate_samples(vec![
            sample(SensorKind::LinearAcceleration, [1.0, 2.0, 3.0]),
            sample(SensorKind::LinearAcceleration, [3.0, 4.0, 5.0]),
        ]);
        assert_eq!(vector.as_slice().len(), FEATURE_LEN);
        assert!(approx(vector.mean(SensorKind::LinearAcceleration, Axis::X), 2.0));
        assert!(approx(vector.variance(SensorKind::LinearAcceleration, Axis::X), 1.0));
        assert!(vector.as_slice()[6..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_mean_and_variance_per_axis() {
        let vector = aggregate_samples(vec![
            sample(SensorKind::RotationVector, [0.0, 10.0, -1.0]),
            sample(SensorKind::RotationVector, [2.0, 10.0, 1.0]),
            sample(SensorKind::RotationVector, [4.0, 10.0, 0.0]),
        ]);
        assert!(approx(vector.mean(SensorKind::RotationVector, Axis::X), 2.0));
        assert!(approx(vector.mean(SensorKind::RotationVector, Axis::Y), 10.0));
        assert!(approx(vector.mean(SensorKind::RotationVector, Axis::Z), 0.0));
        assert!(approx(vector.variance(SensorKind::RotationVector, Axis::X), 8.0 / 3.0));
        assert!(approx(vector.variance(SensorKind::RotationVector, Axis::Y), 0.0));
        assert!(approx(vector.variance(SensorKind::RotationVector, Axis::Z), 2.0 / 3.0));
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_accessors_cover_every_slot_exactly_once() {
        let values: Vec<f32> = (0..FEATURE_LEN).map(|i| i as f32).collect();
        let vector = FeatureVector::try_from(values.as_slice()).unwrap();

        let mut seen = Vec::new();
        for kind in SensorKind::ALL {
            for axis in [Axis::X, Axis::Y, Axis::Z] {
                seen.push(vector.mean(kind, axis));
            }
            for axis in [Axis::X, Axis::Y, Axis::Z] {
                seen.push(vector.variance(kind, axis));
            }
        }
        assert_eq!(seen, values);
    }

    #[test]
    fn test_interleaving_and_order_do_not_matter() {
        let a = sample(SensorKind::LinearAcceleration, [1.0, 0.5, -2.0]);
        let b = sample(SensorKind::RotationVector, [0.1, 0.2, 0.3]);
        let c = sample(SensorKind::LinearAcceleration, [4.0, 1.5, 2.0]);
        let d = sample(SensorKind::RotationVector, [0.4, 0.1, 0.0]);

        let first = aggregate_samples(vec![a, b, c, d]);
        let second = aggregate_samples(vec![d, c, b, a]);
        let third = aggregate_samples(vec![b, d, a, c]);
        for i in 0..FEATURE_LEN {
            assert!(approx(first.as_slice()[i], second.as_slice()[i]));
            assert!(approx(first.as_slice()[i], third.as_slice()[i]));
        }
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let samples: Vec<RawSample> = (0..50)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let v = i as f32 * 0.37;
                sample(SensorKind::LinearAcceleration, [v, -v, v * 2.0])
            })
            .collect();
        let grouped = SamplesByKind::from_samples(samples);
        assert_eq!(aggregate(&grouped), aggregate(&grouped));
    }

    #[test]
    fn test_try_from_rejects_wrong_length() {
        let err = FeatureVector::try_from(&[0.0_f32; 5][..]).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::Arity {
                expected: 12,
                actual: 5
            }
        ));
        assert!(FeatureVector::try_from(&[0.0_f32; FEATURE_LEN][..]).is_ok());
    }
}

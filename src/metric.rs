//! Distance metrics.
//!
//! Supported metrics form a closed set selected through [`Metric`]. Custom
//! metrics plug into the baseline path through the [`DistanceMetric`] trait.
//!
//! Every built-in metric accumulates coordinate differences in `f64` and
//! narrows the final value to `f32`, so squared sums over many large
//! coordinates do not overflow before the square root is taken.

use crate::error::KnnError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability interface for distance functions between two equal-length points.
///
/// Implementations must return a non-negative value for finite inputs and be
/// pure; the search backends may call `distance` from several threads.
pub trait DistanceMetric: Sync {
    /// Distance between `a` and `b`. Both slices have the same length.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}

/// Built-in distance metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// L2 norm of the coordinate difference.
    #[default]
    Euclidean,
    /// Squared L2 norm. Orders neighbours like `Euclidean` without the root.
    SquaredEuclidean,
    /// L1 norm.
    Manhattan,
    /// L-infinity norm.
    Chebyshev,
}

impl Metric {
    /// All built-in metrics.
    pub const ALL: [Metric; 4] = [
        Metric::Euclidean,
        Metric::SquaredEuclidean,
        Metric::Manhattan,
        Metric::Chebyshev,
    ];

    /// Numeric code shared with the device shader.
    pub fn shader_code(self) -> u32 {
        match self {
            Metric::Euclidean => 0,
            Metric::SquaredEuclidean => 1,
            Metric::Manhattan => 2,
            Metric::Chebyshev => 3,
        }
    }

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::SquaredEuclidean => "squared_euclidean",
            Metric::Manhattan => "manhattan",
            Metric::Chebyshev => "chebyshev",
        }
    }
}

impl DistanceMetric for Metric {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let diffs = a
            .iter()
            .zip(b)
            .map(|(&x, &y)| f64::from(x) - f64::from(y));
        let value = match self {
            Metric::Euclidean => diffs.map(|d| d * d).sum::<f64>().sqrt(),
            Metric::SquaredEuclidean => diffs.map(|d| d * d).sum::<f64>(),
            Metric::Manhattan => diffs.map(f64::abs).sum::<f64>(),
            Metric::Chebyshev => diffs.map(f64::abs).fold(0.0, f64::max),
        };
        value as f32
    }
}

impl<F> DistanceMetric for F
where
    F: Fn(&[f32], &[f32]) -> f32 + Sync,
{
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self(a, b)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Metric {
    type Err = KnnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "squared_euclidean" | "sqeuclidean" | "l2sq" => Ok(Metric::SquaredEuclidean),
            "manhattan" | "l1" | "cityblock" => Ok(Metric::Manhattan),
            "chebyshev" | "linf" => Ok(Metric::Chebyshev),
            other => Err(KnnError::ConfigError(format!("unknown metric '{}'", other))),
        }
    }
}

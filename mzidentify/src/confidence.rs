//! The null model of candidate scores and the confidence labels derived from it.
//!
//! Scores of organisms drawn from far down the ribosomal ranking estimate the
//! distribution of scores an unrelated organism gets against a peak list. A
//! candidate's score is compared against that distribution with the upper tail
//! probability of a normal distribution whose standard deviation is inflated
//! threefold:
//!
//! ```math
//! p = P(X > s), \quad X \sim \mathcal{N}(\mu, (3\sigma)^2)
//! ```
use std::fmt::Display;

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;

use crate::db::ReferenceSet;
use crate::scoring::ScoreType;

/// The smallest standard deviation a [`NullModel`] may have
pub const MIN_STDEV: f64 = 0.01;

/// How many times the null standard deviation the tail probability is computed with
pub const STDEV_INFLATION: f64 = 3.0;

/// The taxonomic lineage a reference data package covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Lineage {
    #[default]
    Prokaryotes,
    Fungi,
}

impl Lineage {
    /// The directory name of this lineage in a reference data package
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Lineage::Prokaryotes => "prokaryotes",
            Lineage::Fungi => "fungi",
        }
    }
}

impl Display for Lineage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The tail probabilities a candidate must fall below to be labeled 90% and 99%
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfidenceThresholds {
    pub p90: f64,
    pub p99: f64,
}

impl ConfidenceThresholds {
    pub const fn new(p90: f64, p99: f64) -> Self {
        Self { p90, p99 }
    }
}

/// The lineage-specific constants of the candidate funnel and labeling.
///
/// The exclusion ranks decide which organisms are far enough down the ribosomal
/// ranking to be treated as unrelated to the sample when sampling the null model.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineageProfile {
    pub reps_exclusion: usize,
    pub all_exclusion: usize,
    pub all_fallback_exclusion: usize,
    /// A candidate needs strictly more ribosomal hits than this to be labeled at all
    pub min_ribosomal_hits: u32,
    pub reps_thresholds: ConfidenceThresholds,
    pub all_thresholds: ConfidenceThresholds,
}

impl LineageProfile {
    pub const PROKARYOTES: Self = Self {
        reps_exclusion: 1000,
        all_exclusion: 50000,
        all_fallback_exclusion: 400,
        min_ribosomal_hits: 5,
        reps_thresholds: ConfidenceThresholds::new(1e-5, 1e-6),
        all_thresholds: ConfidenceThresholds::new(1e-6, 1e-7),
    };

    /// Fungal reference sets are far smaller, so the null pool starts higher up
    pub const FUNGI: Self = Self {
        reps_exclusion: 100,
        all_exclusion: 1000,
        all_fallback_exclusion: 200,
        min_ribosomal_hits: 5,
        reps_thresholds: ConfidenceThresholds::new(1e-5, 1e-6),
        all_thresholds: ConfidenceThresholds::new(1e-6, 1e-7),
    };

    pub const fn for_lineage(lineage: Lineage) -> Self {
        match lineage {
            Lineage::Prokaryotes => Self::PROKARYOTES,
            Lineage::Fungi => Self::FUNGI,
        }
    }

    pub const fn thresholds(&self, reference: ReferenceSet) -> ConfidenceThresholds {
        match reference {
            ReferenceSet::Reps => self.reps_thresholds,
            ReferenceSet::All | ReferenceSet::Custom => self.all_thresholds,
        }
    }
}

impl Default for LineageProfile {
    fn default() -> Self {
        Self::PROKARYOTES
    }
}

/// A coarse confidence label for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Confidence {
    #[cfg_attr(feature = "serde", serde(rename = "<50%"))]
    BelowFifty,
    #[cfg_attr(feature = "serde", serde(rename = "50%"))]
    Fifty,
    #[cfg_attr(feature = "serde", serde(rename = "90%"))]
    Ninety,
    #[cfg_attr(feature = "serde", serde(rename = "99%"))]
    NinetyNine,
}

impl Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::BelowFifty => "<50%",
            Confidence::Fifty => "50%",
            Confidence::Ninety => "90%",
            Confidence::NinetyNine => "99%",
        };
        f.write_str(s)
    }
}

/// The mean and standard deviation of scores of unrelated organisms
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NullModel {
    pub mean: f64,
    pub stdev: f64,
    /// The number of scores the model was estimated from
    pub sample_size: usize,
}

impl NullModel {
    pub fn new(mean: f64, stdev: f64, sample_size: usize) -> Self {
        Self {
            mean,
            stdev: stdev.max(MIN_STDEV),
            sample_size,
        }
    }

    /// Estimate the model from `scores` using the sample standard deviation.
    ///
    /// Returns `None` when there are no scores. A single score has no spread,
    /// so it gets the minimum standard deviation.
    pub fn from_scores(scores: &[ScoreType]) -> Option<Self> {
        match scores.len() {
            0 => None,
            1 => Some(Self::new(scores[0], MIN_STDEV, 1)),
            n => {
                let mean = scores.mean();
                let stdev = scores.std_dev();
                if stdev.is_finite() {
                    Some(Self::new(mean, stdev, n))
                } else {
                    Some(Self::new(mean, MIN_STDEV, n))
                }
            }
        }
    }

    /// The probability an unrelated organism scores higher than `score`
    pub fn tail_probability(&self, score: ScoreType) -> f64 {
        match Normal::new(self.mean, self.stdev * STDEV_INFLATION) {
            Ok(dist) => dist.sf(score),
            Err(_) => 1.0,
        }
    }
}

/// Label a candidate from its ribosomal hit count and tail probability.
///
/// Without a tail probability, as when no null model could be built, every
/// candidate is labeled [`Confidence::BelowFifty`].
pub fn assign_confidence(
    ribosomal_hits: u32,
    tail_probability: Option<f64>,
    min_ribosomal_hits: u32,
    thresholds: &ConfidenceThresholds,
) -> Confidence {
    let Some(p) = tail_probability else {
        return Confidence::BelowFifty;
    };
    if ribosomal_hits <= min_ribosomal_hits {
        return Confidence::BelowFifty;
    }
    if p < thresholds.p99 {
        Confidence::NinetyNine
    } else if p < thresholds.p90 {
        Confidence::Ninety
    } else {
        Confidence::Fifty
    }
}

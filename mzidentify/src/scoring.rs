//! Combining ribosomal and whole-proteome hit tallies into one score per organism
use std::fmt::Display;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::warn;

use crate::db::GeneCounts;
use crate::matching::HitTally;

pub type ScoreType = f64;

/// A score for each organism, higher is better. Only comparable within one search.
pub type ScoreTable = IndexMap<String, ScoreType>;

/// The weight of a ribosomal protein match relative to any other protein match
pub const RIBOSOMAL_WEIGHT: u32 = 7;

/// The gene count below which [`NormalizationMode::Limited`] leaves scores unnormalized
pub const GENE_LIMIT: u32 = 800;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("No gene count is available for {0}")]
    MissingMetadata(String),
    #[error("{0} has a gene count of zero and cannot be normalized")]
    ZeroGeneCount(String),
}

/// How to normalize a raw hit score by genome size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum NormalizationMode {
    /// Divide by the gene count only when it is at least the gene limit, so small
    /// genomes are not rewarded for having few proteins to match
    #[default]
    Limited,
    /// Always divide by the gene count
    Linear,
}

impl Display for NormalizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizationMode::Limited => f.write_str("limited"),
            NormalizationMode::Linear => f.write_str("linear"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoringParams {
    pub mode: NormalizationMode,
    pub ribosomal_weight: u32,
    pub gene_limit: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            mode: NormalizationMode::Limited,
            ribosomal_weight: RIBOSOMAL_WEIGHT,
            gene_limit: GENE_LIMIT,
        }
    }
}

impl ScoringParams {
    pub fn new(mode: NormalizationMode, ribosomal_weight: u32, gene_limit: u32) -> Self {
        Self {
            mode,
            ribosomal_weight,
            gene_limit,
        }
    }

    /// The weighted hit count before normalization
    #[inline]
    pub fn raw_score(&self, ribosomal_hits: u32, proteome_hits: u32) -> ScoreType {
        (ribosomal_hits as ScoreType) * (self.ribosomal_weight as ScoreType)
            + proteome_hits as ScoreType
    }

    /// Normalize `raw` by `gene_count` according to [`ScoringParams::mode`]
    #[inline]
    pub fn normalize(&self, raw: ScoreType, gene_count: u32) -> Option<ScoreType> {
        match self.mode {
            NormalizationMode::Limited if gene_count < self.gene_limit => Some(raw),
            _ if gene_count == 0 => None,
            _ => Some(raw / gene_count as ScoreType),
        }
    }

    /// Score a single organism
    pub fn score(
        &self,
        id: &str,
        ribosomal_hits: u32,
        proteome_hits: u32,
        gene_counts: &GeneCounts,
    ) -> Result<ScoreType, ScoringError> {
        let gene_count = gene_counts
            .get(id)
            .ok_or_else(|| ScoringError::MissingMetadata(id.to_string()))?;
        self.normalize(self.raw_score(ribosomal_hits, proteome_hits), gene_count)
            .ok_or_else(|| ScoringError::ZeroGeneCount(id.to_string()))
    }

    /// Combine the ribosomal `primary` tally with the whole-proteome `secondary` tally.
    ///
    /// Only organisms present in both tallies are scored, in `secondary`'s order.
    /// Organisms that cannot be normalized are logged and left out, they do not
    /// fail the search.
    pub fn combine(
        &self,
        primary: &HitTally,
        secondary: &HitTally,
        gene_counts: &GeneCounts,
    ) -> ScoreTable {
        let mut scores = ScoreTable::with_capacity(secondary.len());
        for (id, proteome_hits) in secondary.iter() {
            let Some(ribosomal_hits) = primary.get(id) else {
                continue;
            };
            match self.score(
                id,
                ribosomal_hits.match_count,
                proteome_hits.match_count,
                gene_counts,
            ) {
                Ok(score) => {
                    scores.insert(id.clone(), score);
                }
                Err(e) => {
                    warn!("Excluding from scoring: {e}");
                }
            }
        }
        scores
    }
}

/// Combine two tallies with `params`, see [`ScoringParams::combine`]
pub fn combine(
    primary: &HitTally,
    secondary: &HitTally,
    gene_counts: &GeneCounts,
    params: &ScoringParams,
) -> ScoreTable {
    params.combine(primary, secondary, gene_counts)
}

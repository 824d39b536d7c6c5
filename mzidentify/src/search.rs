//! The candidate funnel that narrows every reference organism down to a ranked,
//! labeled shortlist.
//!
//! 1. **Screen** the whole ribosomal database.
//! 2. **Narrow** to the best `first` organisms by ribosomal hits, and set aside
//!    the organisms far below them as the null pool.
//! 3. **Deepen** the shortlist against the whole proteome database.
//! 4. **Score** the shortlist and keep the best `top`.
//! 5. Estimate a [`NullModel`] from a sample of the null pool.
//! 6. **Label** each remaining candidate with a [`Confidence`].
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::calibration::CalibrationError;
use crate::confidence::{assign_confidence, Confidence, Lineage, LineageProfile, NullModel};
use crate::db::{ReferenceData, ReferenceSet, NOT_ASSIGNED};
use crate::matching::{tally_database, tally_entries, HitTally, MatchWindow};
use crate::peaks::PeakList;
use crate::rank::{rank_descending_by, top_k_by};
use crate::scoring::{ScoreTable, ScoreType, ScoringParams};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("Cannot search with an empty peak list")]
    EmptyPeakList,
    #[error("The ribosomal reference database is empty")]
    EmptyDatabase,
    #[error("Calibration failed: {0}")]
    Calibration(
        #[source]
        #[from]
        CalibrationError,
    ),
}

/// Whether a search could estimate confidence for its candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SearchState {
    Success,
    /// Too few unrelated organisms to build a null model, every candidate is
    /// labeled [`Confidence::BelowFifty`]
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunnelParams {
    pub tolerance_ppm: f64,
    /// How many organisms survive the ribosomal screen
    pub first: usize,
    /// How many candidates are reported
    pub top: usize,
    /// The largest number of organisms sampled for the null model, zero to use
    /// the whole pool
    pub null_sample_size: usize,
    /// A null pool of at most this many organisms degrades the search
    pub min_null_pool: usize,
    /// Seed for null model sampling, drawn from system entropy when absent
    pub seed: Option<u64>,
}

impl Default for FunnelParams {
    fn default() -> Self {
        Self {
            tolerance_ppm: 200.0,
            first: 200,
            top: 20,
            null_sample_size: 1000,
            min_null_pool: 100,
            seed: None,
        }
    }
}

/// One reported candidate organism
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidateRow {
    pub identifier: String,
    pub ribosomal_hits: u32,
    /// Ribosomal hits plus proteome hits
    pub total_hits: u32,
    pub score: ScoreType,
    pub tail_probability: Option<f64>,
    pub confidence: Confidence,
    pub organism: String,
    pub strain: String,
    pub taxonomy: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchResult {
    pub calibration_ppm: f64,
    pub tolerance_ppm: f64,
    pub reference: ReferenceSet,
    pub lineage: Lineage,
    pub state: SearchState,
    pub null_model: Option<NullModel>,
    /// The number of organisms screened
    pub screened: usize,
    pub null_pool_size: usize,
    pub candidates: Vec<CandidateRow>,
}

impl SearchResult {
    /// The highest scoring candidate
    pub fn best_match(&self) -> Option<&CandidateRow> {
        self.candidates.first()
    }
}

/// The outcome of the narrowing stage
#[derive(Debug)]
struct Narrowed<'t> {
    candidates: Vec<&'t str>,
    pool: Vec<&'t str>,
    degraded: bool,
}

fn tail<T>(items: &[T], start: usize) -> &[T] {
    items.get(start..).unwrap_or(&[])
}

/// Runs the candidate funnel over peak lists against shared, read-only reference data
#[derive(Debug, Clone)]
pub struct SearchEngine<'a> {
    data: &'a ReferenceData,
    reference: ReferenceSet,
    lineage: Lineage,
    profile: LineageProfile,
    funnel: FunnelParams,
    scoring: ScoringParams,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        data: &'a ReferenceData,
        reference: ReferenceSet,
        lineage: Lineage,
        funnel: FunnelParams,
        scoring: ScoringParams,
    ) -> Self {
        Self {
            data,
            reference,
            lineage,
            profile: LineageProfile::for_lineage(lineage),
            funnel,
            scoring,
        }
    }

    /// Replace the lineage's default profile
    pub fn with_profile(mut self, profile: LineageProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn data(&self) -> &ReferenceData {
        self.data
    }

    pub fn funnel(&self) -> &FunnelParams {
        &self.funnel
    }

    fn window(&self, calibration_ppm: f64) -> MatchWindow {
        MatchWindow::new(self.funnel.tolerance_ppm, calibration_ppm)
    }

    fn screen(&self, mzs: &[f64], window: MatchWindow) -> HitTally {
        let screened = tally_database(mzs, &self.data.ribosomal, window);
        debug!("Screened {} organisms", screened.len());
        screened
    }

    fn narrow<'t>(&self, screened: &'t HitTally) -> Narrowed<'t> {
        let ranked: Vec<&'t str> =
            rank_descending_by(screened.iter().collect::<Vec<_>>(), |(_, hits)| {
                hits.match_count as f64
            })
            .into_iter()
            .map(|(id, _)| id.as_str())
            .collect();

        let pool = match self.reference {
            ReferenceSet::Reps => {
                let pool = tail(&ranked, self.profile.reps_exclusion);
                if pool.is_empty() {
                    &ranked[..]
                } else {
                    pool
                }
            }
            ReferenceSet::All | ReferenceSet::Custom => {
                let pool = tail(&ranked, self.profile.all_exclusion);
                if pool.is_empty() {
                    tail(&ranked, self.profile.all_fallback_exclusion)
                } else {
                    pool
                }
            }
        };
        let pool = pool.to_vec();
        let degraded = pool.len() <= self.funnel.min_null_pool;
        if degraded {
            warn!(
                "Only {} organisms are available for the null model, confidence cannot be estimated",
                pool.len()
            );
        }

        let mut candidates = ranked;
        candidates.truncate(self.funnel.first);
        Narrowed {
            candidates,
            pool,
            degraded,
        }
    }

    fn sample_null_pool<'t>(&self, pool: &[&'t str]) -> Vec<&'t str> {
        let n = self.funnel.null_sample_size;
        if n == 0 || pool.len() <= n {
            return pool.to_vec();
        }
        let mut rng = match self.funnel.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        pool.choose_multiple(&mut rng, n).copied().collect()
    }

    fn estimate_null_model(
        &self,
        mzs: &[f64],
        screened: &HitTally,
        pool: &[&str],
        window: MatchWindow,
    ) -> Option<NullModel> {
        let sample = self.sample_null_pool(pool);
        let sampled = tally_entries(mzs, &self.data.proteome, sample.iter().copied(), window);
        let scores: Vec<ScoreType> = self
            .scoring
            .combine(screened, &sampled, &self.data.gene_counts)
            .values()
            .copied()
            .collect();
        let model = NullModel::from_scores(&scores);
        if let Some(model) = model.as_ref() {
            debug!(
                "Null model from {} organisms: mean {:.3}, standard deviation {:.3}",
                model.sample_size, model.mean, model.stdev
            );
        }
        model
    }

    fn describe(&self, id: &str) -> (String, String, String) {
        (
            self.data.names.get_or(id, NOT_ASSIGNED).to_string(),
            self.data.strains.get_or(id, NOT_ASSIGNED).to_string(),
            self.data.taxonomy.get_or(id, NOT_ASSIGNED).to_string(),
        )
    }

    /// Identify the organisms that best explain `peaks`, after shifting every
    /// match window by `calibration_ppm`.
    #[instrument(skip_all, fields(peaks = peaks.len(), calibration = calibration_ppm))]
    pub fn search(
        &self,
        peaks: &PeakList,
        calibration_ppm: f64,
    ) -> Result<SearchResult, SearchError> {
        if peaks.is_empty() {
            return Err(SearchError::EmptyPeakList);
        }
        if self.data.ribosomal.is_empty() {
            return Err(SearchError::EmptyDatabase);
        }
        let mzs = peaks.mzs();
        let window = self.window(calibration_ppm);

        let screened = self.screen(mzs, window);
        let narrowed = self.narrow(&screened);

        let deepened = tally_entries(
            mzs,
            &self.data.proteome,
            narrowed.candidates.iter().copied(),
            window,
        );
        let scores = self
            .scoring
            .combine(&screened, &deepened, &self.data.gene_counts);
        let top = top_k_by(scores.iter(), self.funnel.top, |(_, s)| **s);
        debug!(
            "{} candidates scored, keeping {}",
            scores.len(),
            top.len()
        );
        trace!("Top candidates: {}", top.iter().map(|(id, _)| *id).join(", "));

        let null_model = if narrowed.degraded {
            None
        } else {
            let model = self.estimate_null_model(mzs, &screened, &narrowed.pool, window);
            if model.is_none() {
                warn!("No null pool organism could be scored, confidence cannot be estimated");
            }
            model
        };
        let state = if null_model.is_some() {
            SearchState::Success
        } else {
            SearchState::Degraded
        };

        let thresholds = self.profile.thresholds(self.reference);
        let candidates: Vec<CandidateRow> = top
            .into_iter()
            .map(|(id, score)| {
                let ribosomal_hits = screened.get(id).map_or(0, |h| h.match_count);
                let proteome_hits = deepened.get(id).map_or(0, |h| h.match_count);
                let tail_probability = null_model.as_ref().map(|m| m.tail_probability(*score));
                let confidence = assign_confidence(
                    ribosomal_hits,
                    tail_probability,
                    self.profile.min_ribosomal_hits,
                    &thresholds,
                );
                let (organism, strain, taxonomy) = self.describe(id);
                CandidateRow {
                    identifier: id.to_string(),
                    ribosomal_hits,
                    total_hits: ribosomal_hits + proteome_hits,
                    score: *score,
                    tail_probability,
                    confidence,
                    organism,
                    strain,
                    taxonomy,
                }
            })
            .collect();

        if let Some(best) = candidates.first() {
            info!(
                "Best match is {} ({}, {})",
                best.identifier, best.organism, best.confidence
            );
        } else {
            warn!("No candidate could be scored");
        }

        Ok(SearchResult {
            calibration_ppm,
            tolerance_ppm: self.funnel.tolerance_ppm,
            reference: self.reference,
            lineage: self.lineage,
            state,
            null_model,
            screened: screened.len(),
            null_pool_size: narrowed.pool.len(),
            candidates,
        })
    }

    /// Score every organism against the whole proteome database without narrowing.
    ///
    /// This is far slower than [`SearchEngine::search`] but gives a score for
    /// every organism present in both databases.
    #[instrument(skip_all, fields(peaks = peaks.len(), calibration = calibration_ppm))]
    pub fn score_all(
        &self,
        peaks: &PeakList,
        calibration_ppm: f64,
    ) -> Result<ScoreTable, SearchError> {
        if peaks.is_empty() {
            return Err(SearchError::EmptyPeakList);
        }
        if self.data.ribosomal.is_empty() {
            return Err(SearchError::EmptyDatabase);
        }
        let mzs = peaks.mzs();
        let window = self.window(calibration_ppm);
        let screened = self.screen(mzs, window);
        let deepened = tally_database(mzs, &self.data.proteome, window);
        Ok(self
            .scoring
            .combine(&screened, &deepened, &self.data.gene_counts))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::{GeneCounts, MetadataTable, ReferenceDatabase};

    fn reference_data() -> ReferenceData {
        let ribosomal: ReferenceDatabase = [
            ("G1", vec![5000.0, 6000.0, 7000.0]),
            ("G2", vec![5000.0, 6000.0]),
            ("G3", vec![9000.0]),
        ]
        .into_iter()
        .collect();
        let proteome: ReferenceDatabase = [
            ("G1", vec![5000.0, 6000.0, 7000.0, 8000.0]),
            ("G2", vec![5000.0, 6000.0, 8000.0]),
            ("G3", vec![9000.0]),
        ]
        .into_iter()
        .collect();
        let gene_counts: GeneCounts = [("G1", 500), ("G2", 500), ("G3", 500)]
            .into_iter()
            .collect();
        let names: MetadataTable = [("G1", "Escherichia coli")].into_iter().collect();
        ReferenceData {
            ribosomal,
            proteome,
            gene_counts,
            names,
            ..Default::default()
        }
    }

    #[test]
    fn test_small_database_is_degraded() -> Result<(), SearchError> {
        let data = reference_data();
        let engine = SearchEngine::new(
            &data,
            ReferenceSet::Reps,
            Lineage::Prokaryotes,
            FunnelParams::default(),
            ScoringParams::default(),
        );
        let peaks = PeakList::new([(5000.0, 0.3), (6000.0, 0.3), (7000.0, 0.2), (8000.0, 0.2)]);
        let result = engine.search(&peaks, 0.0)?;
        assert_eq!(result.state, SearchState::Degraded);
        assert!(result.null_model.is_none());
        assert_eq!(result.screened, 3);
        let best = result.best_match().unwrap();
        assert_eq!(best.identifier, "G1");
        assert_eq!(best.ribosomal_hits, 3);
        assert_eq!(best.total_hits, 7);
        assert_eq!(best.score, 25.0);
        assert_eq!(best.organism, "Escherichia coli");
        assert_eq!(best.strain, NOT_ASSIGNED);
        assert!(result
            .candidates
            .iter()
            .all(|c| c.confidence == Confidence::BelowFifty && c.tail_probability.is_none()));
        Ok(())
    }

    #[test]
    fn test_empty_inputs() {
        let data = reference_data();
        let engine = SearchEngine::new(
            &data,
            ReferenceSet::All,
            Lineage::Fungi,
            FunnelParams::default(),
            ScoringParams::default(),
        );
        let empty = PeakList::new(Vec::<(f64, f32)>::new());
        assert_eq!(engine.search(&empty, 0.0), Err(SearchError::EmptyPeakList));

        let nothing = ReferenceData::default();
        let engine = SearchEngine::new(
            &nothing,
            ReferenceSet::Reps,
            Lineage::Prokaryotes,
            FunnelParams::default(),
            ScoringParams::default(),
        );
        let peaks = PeakList::new([(5000.0, 1.0)]);
        assert_eq!(engine.search(&peaks, 0.0), Err(SearchError::EmptyDatabase));
    }

    #[test]
    fn test_score_all() -> Result<(), SearchError> {
        let data = reference_data();
        let engine = SearchEngine::new(
            &data,
            ReferenceSet::Reps,
            Lineage::Prokaryotes,
            FunnelParams::default(),
            ScoringParams::default(),
        );
        let peaks = PeakList::new([(9000.0, 1.0)]);
        let scores = engine.score_all(&peaks, 0.0)?;
        assert_eq!(scores.len(), 3);
        assert_eq!(scores["G3"], 8.0);
        assert_eq!(scores["G1"], 0.0);
        Ok(())
    }

    #[test]
    fn test_null_pool_sampling_is_seeded() {
        let data = ReferenceData::default();
        let funnel = FunnelParams {
            null_sample_size: 5,
            seed: Some(42),
            ..Default::default()
        };
        let engine = SearchEngine::new(
            &data,
            ReferenceSet::Reps,
            Lineage::Prokaryotes,
            funnel,
            ScoringParams::default(),
        );
        let ids: Vec<String> = (0..50).map(|i| format!("G{i}")).collect();
        let pool: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        let a = engine.sample_null_pool(&pool);
        let b = engine.sample_null_pool(&pool);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        assert_eq!(engine.sample_null_pool(&pool[..3]).len(), 3);
    }
}

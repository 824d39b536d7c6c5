//! Identify the source organism of a protein mass spectrum by matching its peaks
//! against the theoretical protein masses of reference organisms.
//!
//! The search proceeds in stages, see [`search::SearchEngine`]. Peak lists are
//! first calibrated with [`calibration::calibrate`], then screened against
//! ribosomal proteins, rescored against whole proteomes, and labeled against a
//! null model of unrelated organisms.
pub mod annotate;
pub mod calibration;
pub mod confidence;
pub mod db;
pub mod matching;
pub mod peaks;
pub mod rank;
pub mod scoring;
pub mod search;

pub use calibration::{calibrate, Calibration, CalibrationError, CalibrationParams};
pub use confidence::{Confidence, Lineage, LineageProfile, NullModel};
pub use db::{DatabaseError, DatabasePaths, ReferenceData, ReferenceSet, TaxonomySource};
pub use matching::{match_peaks, HitCount, HitTally, MatchWindow};
pub use peaks::{PeakList, PeakListError};
pub use scoring::{NormalizationMode, ScoreTable, ScoringParams};
pub use search::{CandidateRow, FunnelParams, SearchEngine, SearchError, SearchResult, SearchState};

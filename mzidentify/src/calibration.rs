//! Estimating the systematic mass error of a peak list.
//!
//! Candidate offsets are evaluated on a grid spanning `±ppm_range`. At each offset
//! the ribosomal database is matched with a wide tolerance, and the offset whose
//! best organism gets the most hits wins. The winning organism's mean deviation
//! then refines the offset to a single value.
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::db::{MetadataTable, ReferenceDatabase};
use crate::matching::{match_peaks, MatchWindow};
use crate::rank::first_max_by;

/// The matching tolerance used while calibrating, wider than a search tolerance
pub const CALIBRATION_TOLERANCE_PPM: f64 = 200.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("Cannot calibrate against an empty reference database")]
    EmptyDatabase,
    #[error("Cannot calibrate with {0} bins, at least one is required")]
    InvalidBinCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationParams {
    /// The largest offset to evaluate in either direction, in ppm
    pub ppm_range: f64,
    /// The number of offsets evaluated on each side of zero
    pub num_bins: usize,
    pub tolerance_ppm: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            ppm_range: 1000.0,
            num_bins: 5,
            tolerance_ppm: CALIBRATION_TOLERANCE_PPM,
        }
    }
}

impl CalibrationParams {
    pub fn new(ppm_range: f64, num_bins: usize) -> Self {
        Self {
            ppm_range,
            num_bins,
            ..Default::default()
        }
    }

    /// The distance between adjacent offsets
    pub fn step(&self) -> f64 {
        self.ppm_range / self.num_bins as f64
    }
}

/// The offsets `0, s, ..., n*s, -s, ..., -n*s` in evaluation order
pub fn calibration_offsets(ppm_range: f64, num_bins: usize) -> Vec<f64> {
    if num_bins == 0 {
        return vec![0.0];
    }
    let step = ppm_range / num_bins as f64;
    let upward = (0..=num_bins).map(|i| i as f64 * step);
    let downward = (1..=num_bins).map(|i| -(i as f64) * step);
    upward.chain(downward).collect()
}

/// The best single organism at one calibration offset
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinResult {
    pub offset_ppm: f64,
    pub best_entity: String,
    pub match_count: u32,
    pub deviation_sum: f64,
}

impl BinResult {
    pub fn mean_deviation(&self) -> Option<f64> {
        if self.match_count == 0 {
            None
        } else {
            Some(self.deviation_sum / self.match_count as f64)
        }
    }
}

/// The estimated calibration offset of a peak list
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Calibration {
    /// The refined offset to search with, in ppm
    pub offset_ppm: f64,
    /// The grid offset that won before refinement
    pub bin_offset_ppm: f64,
    pub best_entity: Option<String>,
    pub match_count: u32,
    pub bins_evaluated: usize,
}

impl Calibration {
    /// A fixed offset that was not estimated from the data
    pub fn fixed(offset_ppm: f64) -> Self {
        Self {
            offset_ppm,
            bin_offset_ppm: offset_ppm,
            best_entity: None,
            match_count: 0,
            bins_evaluated: 0,
        }
    }
}

fn evaluate_bin(peaks: &[f64], db: &ReferenceDatabase, window: MatchWindow) -> Option<BinResult> {
    let scored: Vec<_> = db
        .iter()
        .map(|(id, masses)| (id, match_peaks(peaks, masses, window)))
        .collect();
    let best = first_max_by(&scored, |(_, hits)| hits.match_count as f64)?;
    let (id, hits) = &scored[best];
    Some(BinResult {
        offset_ppm: window.calibration_ppm,
        best_entity: id.to_string(),
        match_count: hits.match_count,
        deviation_sum: hits.deviation_sum,
    })
}

/// Find the calibration offset that best aligns `peaks` with the ribosomal database.
///
/// `peaks` must be sorted ascending. The refined offset is the winning bin's
/// offset plus the mean deviation of the winning organism's matches. A winner
/// without any hits keeps the bin offset.
#[instrument(level = "debug", skip_all, fields(peaks = peaks.len()))]
pub fn calibrate(
    peaks: &[f64],
    params: &CalibrationParams,
    db: &ReferenceDatabase,
    taxonomy: Option<&MetadataTable>,
) -> Result<Calibration, CalibrationError> {
    if params.num_bins == 0 {
        return Err(CalibrationError::InvalidBinCount(params.num_bins));
    }
    if db.is_empty() {
        return Err(CalibrationError::EmptyDatabase);
    }

    let offsets = calibration_offsets(params.ppm_range, params.num_bins);
    let mut bins = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let window = MatchWindow::new(params.tolerance_ppm, offset);
        let Some(bin) = evaluate_bin(peaks, db, window) else {
            continue;
        };
        debug!(
            "Calibration bin {:.1} ppm: {} with {} hits, mean deviation {:.3} ({})",
            bin.offset_ppm,
            bin.best_entity,
            bin.match_count,
            bin.mean_deviation().unwrap_or(0.0),
            taxonomy
                .and_then(|t| t.get(&bin.best_entity))
                .unwrap_or("not defined"),
        );
        bins.push(bin);
    }

    let winner = first_max_by(&bins, |b| b.match_count as f64)
        .map(|i| &bins[i])
        .ok_or(CalibrationError::EmptyDatabase)?;

    let offset_ppm = winner.offset_ppm + winner.mean_deviation().unwrap_or(0.0);
    info!(
        "Calibrated to {offset_ppm:.3} ppm from bin {:.1} ppm ({} with {} hits)",
        winner.offset_ppm, winner.best_entity, winner.match_count
    );
    Ok(Calibration {
        offset_ppm,
        bin_offset_ppm: winner.offset_ppm,
        best_entity: Some(winner.best_entity.clone()),
        match_count: winner.match_count,
        bins_evaluated: bins.len(),
    })
}

//! Observed peak lists and the plain-text peak list reader.
//!
//! A peak list file contains one peak per line, `m/z [intensity]`, separated by
//! whitespace. Lines containing `#` are comments, a `COM=<text>` token carries a
//! free-text sample annotation, and peaks without a readable intensity are given
//! an intensity of 1.
use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use mzpeaks::{prelude::*, CentroidPeak, MZPeakSetType};
use thiserror::Error;
use tracing::debug;

use crate::db::open_text;

/// The default minimum relative intensity for a peak to be retained
pub const MIN_RELATIVE_INTENSITY: f64 = 0.0002;

#[derive(Debug, Error)]
pub enum PeakListError {
    #[error("An IO error occurred reading a peak list: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("No peaks found in {0}")]
    Empty(String),
}

/// A relative-intensity peak list sorted by m/z.
///
/// Intensities are normalized to the total intensity of the file as read, before
/// low-abundance peaks are removed, so they lie in `(0, 1]`.
#[derive(Debug, Clone)]
pub struct PeakList {
    pub peaks: MZPeakSetType<CentroidPeak>,
    mzs: Vec<f64>,
    /// The number of distinct peaks read from the source
    pub total_peaks: usize,
    /// The `COM=` annotation, if one was present
    pub comment: Option<String>,
}

impl PeakList {
    /// Build a peak list from already-normalized `(m/z, relative intensity)` pairs.
    pub fn new(pairs: impl IntoIterator<Item = (f64, f32)>) -> Self {
        let peaks: Vec<_> = pairs
            .into_iter()
            .enumerate()
            .map(|(i, (mz, intensity))| CentroidPeak::new(mz, intensity, i as u32))
            .collect();
        let total_peaks = peaks.len();
        Self::from_peaks(MZPeakSetType::new(peaks), total_peaks, None)
    }

    fn from_peaks(
        peaks: MZPeakSetType<CentroidPeak>,
        total_peaks: usize,
        comment: Option<String>,
    ) -> Self {
        let mzs = peaks.iter().map(|p| p.mz()).collect();
        Self {
            peaks,
            mzs,
            total_peaks,
            comment,
        }
    }

    /// Read a peak list, discarding peaks whose relative intensity is not above `minimum`.
    ///
    /// An empty result is not an error here, callers decide whether that is fatal.
    pub fn from_reader<R: BufRead>(reader: R, minimum: f64) -> io::Result<Self> {
        let mut raw: Vec<(f64, f64)> = Vec::new();
        let mut total_intensity = 0.0;
        let mut comment = None;

        for line in reader.lines() {
            let line = line?;
            if line.contains('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            if first.contains("COM=") {
                comment = Some(first.trim().replace("COM=", ""));
                continue;
            }
            let Ok(mz) = first.parse::<f64>() else {
                continue;
            };
            let intensity = tokens
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .unwrap_or(1.0);
            total_intensity += intensity;
            raw.push((mz, intensity));
        }

        raw.sort_by(|a, b| a.0.total_cmp(&b.0));
        // A repeated m/z keeps the last intensity read, but every reading counts
        // towards the total.
        let mut deduplicated: Vec<(f64, f64)> = Vec::with_capacity(raw.len());
        for (mz, intensity) in raw {
            match deduplicated.last_mut() {
                Some(last) if last.0 == mz => last.1 = intensity,
                _ => deduplicated.push((mz, intensity)),
            }
        }

        let total_peaks = deduplicated.len();
        let peaks: Vec<_> = deduplicated
            .into_iter()
            .filter(|(mz, _)| *mz > 0.0)
            .map(|(mz, intensity)| (mz, intensity / total_intensity))
            .filter(|(_, rel)| *rel > minimum)
            .enumerate()
            .map(|(i, (mz, rel))| CentroidPeak::new(mz, rel as f32, i as u32))
            .collect();

        debug!(
            "Read {total_peaks} peaks, {} retained above {minimum}",
            peaks.len()
        );
        Ok(Self::from_peaks(
            MZPeakSetType::new(peaks),
            total_peaks,
            comment,
        ))
    }

    pub fn from_path<P: AsRef<Path>>(path: P, minimum: f64) -> Result<Self, PeakListError> {
        let reader = open_text(path.as_ref())?;
        Ok(Self::from_reader(reader, minimum)?)
    }

    /// Like [`PeakList::from_path`], but an empty peak list is an error.
    pub fn from_path_non_empty<P: AsRef<Path>>(
        path: P,
        minimum: f64,
    ) -> Result<Self, PeakListError> {
        let path = path.as_ref();
        let peaks = Self::from_path(path, minimum)?;
        if peaks.is_empty() {
            Err(PeakListError::Empty(path.display().to_string()))
        } else {
            Ok(peaks)
        }
    }

    /// The m/z of every retained peak, ascending
    pub fn mzs(&self) -> &[f64] {
        &self.mzs
    }

    /// The number of retained peaks
    pub fn len(&self) -> usize {
        self.mzs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mzs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CentroidPeak> {
        self.peaks.iter()
    }
}

/// Read a list of peak list paths, one per line.
///
/// Lines starting with `#` and blank lines are skipped, and only the first
/// tab-separated field of a line is used.
pub fn read_input_list<P: AsRef<Path>>(path: P) -> io::Result<Vec<String>> {
    let reader = io::BufReader::new(fs::File::open(path)?);
    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.starts_with('#') {
            continue;
        }
        let entry = line.split('\t').next().unwrap_or_default().trim();
        if entry.is_empty() {
            continue;
        }
        paths.push(entry.to_string());
    }
    Ok(paths)
}

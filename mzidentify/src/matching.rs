//! Matching observed peaks against theoretical masses.
//!
//! An observed peak `p` matches a theoretical mass `m` when `m` lies strictly
//! inside the calibrated tolerance window around `p`:
//!
//! ```math
//! p - p\frac{\delta}{10^6} + p\frac{c}{10^6} < m < p + p\frac{\delta}{10^6} + p\frac{c}{10^6}
//! ```
//!
//! where $`\delta`$ is the tolerance and $`c`$ the calibration offset, both in ppm.
//! A peak may match any number of masses of the same organism.
use indexmap::IndexMap;
use tracing::warn;

use crate::db::ReferenceDatabase;

/// The number of matches and summed ppm deviation of one organism against one peak list
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HitCount {
    pub match_count: u32,
    /// The sum of `(m - p) / p * 1e6` over every matched pair
    pub deviation_sum: f64,
}

impl HitCount {
    pub fn new(match_count: u32, deviation_sum: f64) -> Self {
        Self {
            match_count,
            deviation_sum,
        }
    }

    /// The mean ppm deviation of matched pairs, if there were any
    pub fn mean_deviation(&self) -> Option<f64> {
        if self.match_count == 0 {
            None
        } else {
            Some(self.deviation_sum / self.match_count as f64)
        }
    }
}

/// A [`HitCount`] for each organism scored in a pass, in the order they were scored
pub type HitTally = IndexMap<String, HitCount>;

/// The half-width and calibration shift of a peak's matching window, in ppm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWindow {
    pub tolerance_ppm: f64,
    pub calibration_ppm: f64,
}

impl MatchWindow {
    pub fn new(tolerance_ppm: f64, calibration_ppm: f64) -> Self {
        Self {
            tolerance_ppm,
            calibration_ppm,
        }
    }

    /// The open interval `(lower, upper)` a theoretical mass must fall in to match `mz`
    #[inline]
    pub fn bounds(&self, mz: f64) -> (f64, f64) {
        let width = mz * self.tolerance_ppm / 1e6;
        let shift = mz * self.calibration_ppm / 1e6;
        (mz - width + shift, mz + width + shift)
    }

    #[inline]
    pub fn contains(&self, mz: f64, mass: f64) -> bool {
        let (lower, upper) = self.bounds(mz);
        lower < mass && mass < upper
    }
}

/// Count the matches between `peaks` and `masses` and accumulate their deviation.
///
/// Both slices must be sorted ascending. Each peak binary searches for the start
/// of its window, so the cost is proportional to the number of peaks times the
/// log of the number of masses, plus the number of matches.
#[inline]
pub fn match_peaks(peaks: &[f64], masses: &[f64], window: MatchWindow) -> HitCount {
    let mut hits = HitCount::default();
    if masses.is_empty() {
        return hits;
    }
    for &p in peaks {
        let (lower, upper) = window.bounds(p);
        let start = masses.partition_point(|&m| m <= lower);
        for &m in &masses[start..] {
            if m >= upper {
                break;
            }
            hits.match_count += 1;
            hits.deviation_sum += (m - p) / p * 1e6;
        }
    }
    hits
}

/// Match `peaks` against every organism in `db`, in database order.
pub fn tally_database(peaks: &[f64], db: &ReferenceDatabase, window: MatchWindow) -> HitTally {
    let mut tally = HitTally::with_capacity(db.len());
    for (id, masses) in db.iter() {
        tally.insert(id.to_string(), match_peaks(peaks, masses, window));
    }
    tally
}

/// Match `peaks` against only the organisms named by `ids`, in the order given.
///
/// Identifiers absent from `db` are skipped with a warning.
pub fn tally_entries<'a, I>(
    peaks: &[f64],
    db: &ReferenceDatabase,
    ids: I,
    window: MatchWindow,
) -> HitTally
where
    I: IntoIterator<Item = &'a str>,
{
    let ids = ids.into_iter();
    let mut tally = HitTally::with_capacity(ids.size_hint().0);
    for id in ids {
        match db.get(id) {
            Some(masses) => {
                tally.insert(id.to_string(), match_peaks(peaks, masses, window));
            }
            None => {
                warn!("{id} is not present in the reference database, skipping");
            }
        }
    }
    tally
}

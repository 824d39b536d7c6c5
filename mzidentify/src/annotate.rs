//! Annotating observed peaks with the genes of a matched organism.
use std::io;
use std::path::Path;

use csv::StringRecord;
use mzpeaks::prelude::*;

use crate::db::{open_checked, record_line, tab_separated, DatabaseError};
use crate::matching::MatchWindow;
use crate::peaks::PeakList;

/// The gene name used when an annotation table leaves it blank
pub const UNNAMED_GENE: &str = "hypothetical protein";

/// The theoretical protein masses of one genome and the genes they come from
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    entries: Vec<(f64, String)>,
}

impl AnnotationTable {
    pub fn new(mut entries: Vec<(f64, String)>) -> Self {
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { entries }
    }

    /// Read `mass<TAB>gene` lines. Lines starting with `#` are skipped.
    pub fn from_reader<R: io::Read>(reader: R, source: &str) -> Result<Self, DatabaseError> {
        let mut reader = tab_separated(reader);
        let mut record = StringRecord::new();
        let mut entries = Vec::new();
        while reader
            .read_record(&mut record)
            .map_err(|e| DatabaseError::RecordError(source.to_string(), e))?
        {
            let mass = record.get(0).unwrap_or_default();
            let mass: f64 = mass.parse().map_err(|_| DatabaseError::Malformed {
                path: source.to_string(),
                line: record_line(&record),
                reason: format!("{mass:?} is not a mass"),
            })?;
            let gene = match record.get(1) {
                Some(gene) if !gene.is_empty() => gene,
                _ => UNNAMED_GENE,
            };
            entries.push((mass, gene.to_string()));
        }
        Ok(Self::new(entries))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        Self::from_reader(open_checked(path)?, &path.display().to_string())
    }

    /// The annotation table of `identifier` inside a genome directory
    pub fn path_for(genome_dir: &Path, identifier: &str) -> std::path::PathBuf {
        genome_dir.join(format!("{identifier}_annotation.tsv"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matching(&self, mz: f64, window: MatchWindow) -> impl Iterator<Item = &(f64, String)> {
        let (lower, upper) = window.bounds(mz);
        let start = self.entries.partition_point(|(m, _)| *m <= lower);
        self.entries[start..]
            .iter()
            .take_while(move |(m, _)| *m < upper)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnnotationMatch {
    pub theoretical_mass: f64,
    pub gene: String,
}

/// An observed peak and every gene product within tolerance of it
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakAnnotation {
    pub mz: f64,
    /// Relative intensity as a percentage of the total
    pub relative_intensity: f32,
    pub matches: Vec<AnnotationMatch>,
}

/// Annotate the peaks of `peaks` that match at least one mass of `table`
pub fn annotate_peaks(
    peaks: &PeakList,
    table: &AnnotationTable,
    tolerance_ppm: f64,
    calibration_ppm: f64,
) -> Vec<PeakAnnotation> {
    let window = MatchWindow::new(tolerance_ppm, calibration_ppm);
    peaks
        .iter()
        .filter_map(|peak| {
            let matches: Vec<_> = table
                .matching(peak.mz(), window)
                .map(|(mass, gene)| AnnotationMatch {
                    theoretical_mass: *mass,
                    gene: gene.clone(),
                })
                .collect();
            if matches.is_empty() {
                None
            } else {
                Some(PeakAnnotation {
                    mz: peak.mz(),
                    relative_intensity: peak.intensity() * 100.0,
                    matches,
                })
            }
        })
        .collect()
}

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use mzidentify::{
    annotate::{annotate_peaks, AnnotationTable},
    calibration::{calibrate, Calibration},
    db::ReferenceData,
    peaks::PeakList,
    rank::top_k_by,
    search::{SearchEngine, SearchResult, SearchState},
};

use crate::args::{OutputFormat, SearchArgs};
use crate::batch::{ItemOutcome, ItemProcessor};
use crate::driver::MZIdentifierError;
use crate::types::EXHAUSTIVE_TOP;
use crate::write::{write_annotations, write_report_file, write_top_scores, Report};

/// Everything a worker needs to identify a peak list, loaded once and shared
#[derive(Debug)]
pub struct SearchContext {
    pub data: ReferenceData,
    pub settings: SearchArgs,
    pub out_dir: PathBuf,
    pub format: OutputFormat,
    /// Where per-genome annotation tables are found, when annotation is requested
    pub genome_dir: Option<PathBuf>,
    /// Score every organism instead of running the candidate funnel
    pub exhaustive: bool,
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "peaks".to_string())
}

impl SearchContext {
    pub fn new(data: ReferenceData, settings: SearchArgs, out_dir: PathBuf) -> Self {
        Self {
            data,
            settings,
            out_dir,
            format: OutputFormat::default(),
            genome_dir: None,
            exhaustive: false,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_annotation(mut self, genome_dir: PathBuf) -> Self {
        self.genome_dir = Some(genome_dir);
        self
    }

    pub fn with_exhaustive(mut self, exhaustive: bool) -> Self {
        self.exhaustive = exhaustive;
        self
    }

    pub fn engine(&self) -> SearchEngine<'_> {
        SearchEngine::new(
            &self.data,
            self.settings.reference_set(),
            self.settings.lineage(),
            self.settings.funnel_params(),
            self.settings.scoring_params(),
        )
    }

    /// Estimate the calibration offset of `peaks`, or use the configured one
    pub fn calibration_for(&self, peaks: &PeakList) -> Result<Calibration, MZIdentifierError> {
        if self.settings.no_calibrate {
            return Ok(Calibration::fixed(self.settings.calibration));
        }
        Ok(calibrate(
            peaks.mzs(),
            &self.settings.calibration_params(),
            &self.data.ribosomal,
            Some(&self.data.names),
        )?)
    }

    /// Calibrate and search a single peak list
    pub fn identify(
        &self,
        peaks: &PeakList,
    ) -> Result<(Calibration, SearchResult), MZIdentifierError> {
        let calibration = self.calibration_for(peaks)?;
        let result = self.engine().search(peaks, calibration.offset_ppm)?;
        Ok((calibration, result))
    }

    pub fn report_path(&self, input: &Path) -> PathBuf {
        self.out_dir
            .join(format!("{}.{}", file_stem(input), self.format.extension()))
    }

    pub fn scores_path(&self, input: &Path) -> PathBuf {
        self.out_dir
            .join(format!("{}_top_scores.tsv", file_stem(input)))
    }

    pub fn annotation_path(&self, input: &Path, identifier: &str) -> PathBuf {
        self.out_dir.join(format!(
            "{}_annotation_with_{identifier}.tsv",
            file_stem(input)
        ))
    }

    pub fn report<'a>(
        &self,
        input: &Path,
        peaks: &'a PeakList,
        calibration: Option<&'a Calibration>,
        result: &'a SearchResult,
    ) -> Report<'a> {
        Report::new(
            input,
            peaks,
            self.settings.minimum,
            self.settings.scoring_params().mode,
            self.settings.taxonomy_source(),
            calibration,
            result,
        )
    }

    /// Annotate the peaks of `input` with the genes of `identifier` and write them
    /// to `writer`. Every peak is used, regardless of the minimum intensity.
    ///
    /// Returns `false` without writing anything if `identifier` has no annotation table.
    pub fn annotate_to<W: Write>(
        &self,
        writer: &mut W,
        genome_dir: &Path,
        input: &Path,
        identifier: &str,
        calibration_ppm: f64,
    ) -> Result<bool, MZIdentifierError> {
        let table_path = AnnotationTable::path_for(genome_dir, identifier);
        if !table_path.exists() {
            warn!("No annotation table exists for {identifier}");
            return Ok(false);
        }
        let table = AnnotationTable::from_path(&table_path)?;
        let peaks = PeakList::from_path_non_empty(input, 0.0)?;
        let annotations =
            annotate_peaks(&peaks, &table, self.settings.tolerance, calibration_ppm);
        debug!(
            "{} of {} peaks annotated with {identifier}",
            annotations.len(),
            peaks.len()
        );
        let input_name = input
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        write_annotations(writer, &input_name, identifier, peaks.len(), &annotations)?;
        Ok(true)
    }

    /// Score `peaks` against every organism and write the best few to `writer`.
    ///
    /// Returns the best scoring organism, if any could be scored.
    pub fn score_exhaustively_to<W: Write>(
        &self,
        writer: &mut W,
        peaks: &PeakList,
    ) -> Result<Option<String>, MZIdentifierError> {
        let calibration = self.calibration_for(peaks)?;
        let scores = self.engine().score_all(peaks, calibration.offset_ppm)?;
        let top = top_k_by(scores.iter(), EXHAUSTIVE_TOP, |(_, s)| **s);
        debug!("{} organisms scored, listing {}", scores.len(), top.len());
        write_top_scores(writer, &top, &self.data.taxonomy)?;
        Ok(top.first().map(|(id, _)| id.to_string()))
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn process_path(&self, path: &Path) -> Result<ItemOutcome, MZIdentifierError> {
        let peaks = PeakList::from_path(path, self.settings.minimum)?;
        if peaks.is_empty() {
            return Ok(ItemOutcome::NoPeaks);
        }
        if self.exhaustive {
            let mut handle = io::BufWriter::new(fs::File::create(self.scores_path(path))?);
            let best_match = self.score_exhaustively_to(&mut handle, &peaks)?;
            handle.flush()?;
            // no null model is estimated without the funnel
            return Ok(ItemOutcome::Completed {
                best_match,
                state: SearchState::Degraded,
            });
        }
        let (calibration, result) = self.identify(&peaks)?;
        let report = self.report(path, &peaks, Some(&calibration), &result);
        write_report_file(&self.report_path(path), &report, self.format)?;

        if let (Some(genome_dir), Some(best)) = (self.genome_dir.as_deref(), result.best_match()) {
            let out_path = self.annotation_path(path, &best.identifier);
            let mut buffer = Vec::new();
            if self.annotate_to(
                &mut buffer,
                genome_dir,
                path,
                &best.identifier,
                calibration.offset_ppm,
            )? {
                let mut handle = io::BufWriter::new(fs::File::create(out_path)?);
                handle.write_all(&buffer)?;
                handle.flush()?;
            }
        }

        Ok(ItemOutcome::Completed {
            best_match: result.best_match().map(|c| c.identifier.clone()),
            state: result.state,
        })
    }
}

impl ItemProcessor for SearchContext {
    fn process(&self, path: &Path) -> ItemOutcome {
        if !path.exists() {
            return ItemOutcome::Missing;
        }
        match self.process_path(path) {
            Ok(outcome) => outcome,
            Err(e) => ItemOutcome::Failed(e.to_string()),
        }
    }
}

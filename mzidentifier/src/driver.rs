use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{info, warn};

use mzidentify::{
    calibration::CalibrationError,
    db::{DatabaseError, DatabasePaths, ReferenceData},
    peaks::{read_input_list, PeakList, PeakListError},
    search::SearchError,
};

use crate::args::{OutputFormat, SearchArgs, CONFIG_FILE_NAME};
use crate::batch::{BatchError, BatchRunner};
use crate::proc::SearchContext;
use crate::types::DEFAULT_WORKERS;
use crate::write::{write_calibration, write_report, write_report_file};

#[derive(Debug, Error)]
pub enum MZIdentifierError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read the peak list: {0}")]
    PeakListError(
        #[source]
        #[from]
        PeakListError,
    ),
    #[error("Failed to load the reference data: {0}")]
    DatabaseError(
        #[source]
        #[from]
        DatabaseError,
    ),
    #[error("Calibration failed: {0}")]
    CalibrationError(
        #[source]
        #[from]
        CalibrationError,
    ),
    #[error("Search failed: {0}")]
    SearchError(
        #[source]
        #[from]
        SearchError,
    ),
    #[error("Batch processing failed: {0}")]
    BatchError(
        #[source]
        #[from]
        BatchError,
    ),
    #[error("Invalid configuration: {0}")]
    ConfigError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to serialize the configuration: {0}")]
    ConfigSerializationError(
        #[source]
        #[from]
        toml::ser::Error,
    ),
    #[error("No reference data path was given, pass --db-path or set MZIDENTIFIER_DB_PATH")]
    MissingDatabasePath,
    #[error("The output directory {0} already exists and is not empty")]
    OutputDirectoryNotEmpty(String),
    #[error("No annotation table exists for {0}")]
    MissingAnnotation(String),
}

/// Identify the source organisms of MALDI-TOF protein mass spectra.
///
/// Peak lists are matched against theoretical ribosomal and whole proteome masses
/// of reference genomes, and candidates are given a confidence from a null model
/// of unrelated organisms.
#[derive(Parser, Debug)]
#[command(author, version)]
pub struct MZIdentifier {
    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional search parameters from.
    ///
    /// Configurations are also read from `mzidentifier.toml` in the working directory.
    /// Environment variables prefixed with `MZIDENTIFIER_` will be read too.
    #[arg(long = "config-file", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Estimate the mass calibration offset of a peak list
    Adjust(AdjustArgs),
    /// Identify the source organism of a single peak list
    Identify(IdentifyArgs),
    /// Identify the source organisms of many peak lists in parallel
    Batch(BatchArgs),
    /// Annotate the peaks of a peak list with the genes of one reference genome
    Annotate(AnnotateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AdjustArgs {
    /// The peak list to calibrate
    pub input_file: PathBuf,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct IdentifyArgs {
    /// The peak list to identify
    pub input_file: PathBuf,

    /// The path to write the report to, or if '-' is passed, write to STDOUT.
    ///
    /// If a path is specified without `--format`, the format is inferred from its extension.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The report format
    #[arg(long = "format")]
    pub format: Option<OutputFormat>,

    /// Also annotate the peaks with the genes of the best match, writing them to this path
    #[arg(long = "annotate")]
    pub annotation_file: Option<PathBuf>,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// A file listing one peak list path per line
    pub input_list: PathBuf,

    /// The directory to write reports to, which must be empty or not yet exist
    pub out_dir: PathBuf,

    /// The number of workers to use, passing 0 to use all available threads
    #[arg(short = 't', long = "threads", default_value_t = DEFAULT_WORKERS)]
    pub threads: usize,

    /// Annotate the peaks of each peak list with the genes of its best match
    #[arg(long = "annotate")]
    pub annotate: bool,

    /// The report format
    #[arg(long = "format", default_value_t = OutputFormat::Tsv)]
    pub format: OutputFormat,

    /// Do not draw a progress bar while processing
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Score every reference organism without the candidate funnel, writing the
    /// ten best of each peak list as `identifier, score, taxonomy` rows.
    ///
    /// This is far slower and gives no confidence labels.
    #[arg(long = "exhaustive", conflicts_with = "annotate")]
    pub exhaustive: bool,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AnnotateArgs {
    /// The peak list to annotate
    pub input_file: PathBuf,

    /// The identifier of the reference genome whose genes are used
    pub identifier: String,

    /// The path to write the annotations to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    #[command(flatten)]
    pub search: SearchArgs,
}

fn is_stdout(path: &Path) -> bool {
    path == Path::new("-")
}

fn database_paths(settings: &SearchArgs) -> Result<DatabasePaths, MZIdentifierError> {
    let root = settings
        .db_path
        .as_ref()
        .ok_or(MZIdentifierError::MissingDatabasePath)?;
    Ok(DatabasePaths::new(root, settings.lineage()))
}

/// Create `path` if it does not exist, otherwise require that it is empty
fn prepare_output_directory(path: &Path) -> Result<(), MZIdentifierError> {
    if path.exists() {
        if fs::read_dir(path)?.next().is_some() {
            return Err(MZIdentifierError::OutputDirectoryNotEmpty(
                path.display().to_string(),
            ));
        }
    } else {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

fn write_bytes_to(path: &Path, buffer: &[u8]) -> io::Result<()> {
    if is_stdout(path) {
        let mut handle = io::stdout().lock();
        handle.write_all(buffer)?;
        handle.flush()
    } else {
        let mut handle = io::BufWriter::new(fs::File::create(path)?);
        handle.write_all(buffer)?;
        handle.flush()
    }
}

impl MZIdentifier {
    fn configure(&self, search: &SearchArgs) -> Result<SearchArgs, MZIdentifierError> {
        let settings = search.clone().configure(self.config_file.as_deref())?;
        if let Some(path) = self.config_file.as_deref() {
            info!("Read configuration from {}", path.display());
        }
        Ok(settings)
    }

    pub fn main(&self) -> Result<(), MZIdentifierError> {
        info!(
            "mzidentifier v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        match &self.command {
            Command::Adjust(args) => self.adjust(args),
            Command::Identify(args) => self.identify(args),
            Command::Batch(args) => self.batch(args),
            Command::Annotate(args) => self.annotate(args),
        }
    }

    fn adjust(&self, args: &AdjustArgs) -> Result<(), MZIdentifierError> {
        let mut settings = self.configure(&args.search)?;
        settings.no_calibrate = false;
        info!("Input: {}", args.input_file.display());
        let peaks = PeakList::from_path_non_empty(&args.input_file, settings.minimum)?;
        let paths = database_paths(&settings)?;
        let data = ReferenceData::load_for_calibration(&paths, settings.reference_set())?;
        let context = SearchContext::new(data, settings, PathBuf::from("."));
        let calibration = context.calibration_for(&peaks)?;
        info!(
            "Calibration offset: {:.3} ppm from {} matches",
            calibration.offset_ppm, calibration.match_count
        );
        let mut handle = io::stdout().lock();
        write_calibration(&mut handle, &calibration)?;
        handle.flush()?;
        Ok(())
    }

    fn identify(&self, args: &IdentifyArgs) -> Result<(), MZIdentifierError> {
        let settings = self.configure(&args.search)?;
        info!("Input: {}", args.input_file.display());
        info!("Output: {}", args.output_file.display());
        let peaks = PeakList::from_path_non_empty(&args.input_file, settings.minimum)?;
        info!(
            "{} of {} peaks retained above relative intensity {}",
            peaks.len(),
            peaks.total_peaks,
            settings.minimum
        );

        let paths = database_paths(&settings)?;
        let data = ReferenceData::load(
            &paths,
            settings.reference_set(),
            settings.taxonomy_source(),
        )?;
        let format = args
            .format
            .unwrap_or_else(|| OutputFormat::infer_from_path(&args.output_file));
        let context = SearchContext::new(data, settings, PathBuf::from(".")).with_format(format);

        let (calibration, result) = context.identify(&peaks)?;
        let report = context.report(&args.input_file, &peaks, Some(&calibration), &result);
        if is_stdout(&args.output_file) {
            let mut handle = io::stdout().lock();
            write_report(&mut handle, &report, format)?;
            handle.flush()?;
        } else {
            write_report_file(&args.output_file, &report, format)?;
        }

        match result.best_match() {
            Some(best) => {
                info!("Best match: {} ({})", best.identifier, best.confidence);
                if let Some(annotation_file) = args.annotation_file.as_deref() {
                    let mut buffer = Vec::new();
                    if context.annotate_to(
                        &mut buffer,
                        &paths.genome_dir(),
                        &args.input_file,
                        &best.identifier,
                        calibration.offset_ppm,
                    )? {
                        write_bytes_to(annotation_file, &buffer)?;
                    }
                }
            }
            None => warn!("No candidate could be scored"),
        }
        Ok(())
    }

    fn batch(&self, args: &BatchArgs) -> Result<(), MZIdentifierError> {
        let settings = self.configure(&args.search)?;
        let inputs: Vec<PathBuf> = read_input_list(&args.input_list)?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        info!(
            "Read {} peak lists from {}",
            inputs.len(),
            args.input_list.display()
        );
        prepare_output_directory(&args.out_dir)?;

        let paths = database_paths(&settings)?;
        let data = ReferenceData::load(
            &paths,
            settings.reference_set(),
            settings.taxonomy_source(),
        )?;

        let config_path = args.out_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&settings)?)?;
        info!("Wrote the effective configuration to {}", config_path.display());

        let mut context = SearchContext::new(data, settings, args.out_dir.clone())
            .with_format(args.format)
            .with_exhaustive(args.exhaustive);
        if args.exhaustive {
            info!("Scoring every reference organism, the candidate funnel is skipped");
        }
        if args.annotate {
            context = context.with_annotation(paths.genome_dir());
        }

        let mut runner = BatchRunner::new(args.threads);
        if args.quiet {
            runner = runner.quiet();
        }
        let summary = runner.run(inputs, &context)?;
        let progress = &summary.progress;
        info!(
            "Identified: {}, of which degraded: {}",
            progress.completed, progress.degraded
        );
        if progress.missing + progress.no_peaks + progress.failed > 0 {
            warn!(
                "Unprocessed peak lists: {} missing, {} without peaks, {} failed",
                progress.missing, progress.no_peaks, progress.failed
            );
        }
        Ok(())
    }

    fn annotate(&self, args: &AnnotateArgs) -> Result<(), MZIdentifierError> {
        let settings = self.configure(&args.search)?;
        let paths = database_paths(&settings)?;
        let data = if settings.no_calibrate {
            ReferenceData::default()
        } else {
            ReferenceData::load_for_calibration(&paths, settings.reference_set())?
        };
        let peaks = PeakList::from_path_non_empty(&args.input_file, settings.minimum)?;
        let context = SearchContext::new(data, settings, PathBuf::from("."));
        let calibration = context.calibration_for(&peaks)?;

        let mut buffer = Vec::new();
        if !context.annotate_to(
            &mut buffer,
            &paths.genome_dir(),
            &args.input_file,
            &args.identifier,
            calibration.offset_ppm,
        )? {
            return Err(MZIdentifierError::MissingAnnotation(args.identifier.clone()));
        }
        write_bytes_to(&args.output_file, &buffer)?;
        Ok(())
    }
}

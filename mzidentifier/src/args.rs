use std::fmt::Display;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use mzidentify::{
    calibration::CalibrationParams,
    confidence::Lineage,
    db::{ReferenceSet, TaxonomySource},
    peaks::MIN_RELATIVE_INTENSITY,
    scoring::{NormalizationMode, ScoringParams, GENE_LIMIT, RIBOSOMAL_WEIGHT},
    search::FunnelParams,
};

pub const DEFAULT_TOLERANCE: f64 = 200.0;
pub const DEFAULT_PPM_RANGE: f64 = 1000.0;
pub const DEFAULT_BINS: usize = 5;
pub const DEFAULT_FIRST: usize = 200;
pub const DEFAULT_TOP: usize = 20;
pub const DEFAULT_NULL_SAMPLE_SIZE: usize = 1000;

/// The file read from the working directory for configuration, if it exists
pub const CONFIG_FILE_NAME: &str = "mzidentifier.toml";
/// The prefix of environment variables read for configuration
pub const ENV_PREFIX: &str = "MZIDENTIFIER_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgReferenceSet {
    /// One representative genome per species
    #[default]
    Reps,
    /// Every genome in the reference package
    All,
    /// Every genome plus the user-supplied custom genomes
    Custom,
}

impl From<ArgReferenceSet> for ReferenceSet {
    fn from(value: ArgReferenceSet) -> Self {
        match value {
            ArgReferenceSet::Reps => ReferenceSet::Reps,
            ArgReferenceSet::All => ReferenceSet::All,
            ArgReferenceSet::Custom => ReferenceSet::Custom,
        }
    }
}

impl Display for ArgReferenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ReferenceSet::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgTaxonomy {
    /// Genome-based taxonomy
    #[default]
    Genome,
    /// SSU rRNA taxonomy from SILVA
    Silva,
    /// NCBI organism names
    Ncbi,
}

impl From<ArgTaxonomy> for TaxonomySource {
    fn from(value: ArgTaxonomy) -> Self {
        match value {
            ArgTaxonomy::Genome => TaxonomySource::Genome,
            ArgTaxonomy::Silva => TaxonomySource::Silva,
            ArgTaxonomy::Ncbi => TaxonomySource::Ncbi,
        }
    }
}

impl Display for ArgTaxonomy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        TaxonomySource::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgLineage {
    #[default]
    Prokaryotes,
    Fungi,
}

impl From<ArgLineage> for Lineage {
    fn from(value: ArgLineage) -> Self {
        match value {
            ArgLineage::Prokaryotes => Lineage::Prokaryotes,
            ArgLineage::Fungi => Lineage::Fungi,
        }
    }
}

impl Display for ArgLineage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Lineage::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgNormalization {
    /// Normalize by gene count only for genomes with many genes
    #[default]
    Limited,
    /// Always normalize by gene count
    Linear,
}

impl From<ArgNormalization> for NormalizationMode {
    fn from(value: ArgNormalization) -> Self {
        match value {
            ArgNormalization::Limited => NormalizationMode::Limited,
            ArgNormalization::Linear => NormalizationMode::Linear,
        }
    }
}

impl Display for ArgNormalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        NormalizationMode::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// A commented, tab-separated report
    #[default]
    Tsv,
    Json,
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Tsv => "tsv",
            OutputFormat::Json => "json",
        }
    }

    /// Guess the format from a path's extension, defaulting to TSV
    pub fn infer_from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Tsv,
        }
    }
}

fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if !(value >= 0.0) {
        Err(format!("`{s}` is not a number greater than or equal to zero"))
    } else {
        Ok(value)
    }
}

/// The parameters shared by every command that searches peak lists
#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchArgs {
    /// The root directory of the reference data package.
    ///
    /// May also be set with the `MZIDENTIFIER_DB_PATH` environment variable.
    #[arg(short = 'd', long = "db-path")]
    pub db_path: Option<PathBuf>,

    /// The matching tolerance in ppm
    #[arg(short = 'p', long = "tolerance", default_value_t = DEFAULT_TOLERANCE, value_parser = non_negative_float)]
    pub tolerance: f64,

    /// Do not estimate a calibration offset before searching
    #[arg(long = "no-calibrate")]
    pub no_calibrate: bool,

    /// A fixed calibration offset in ppm, used when calibration is disabled
    #[arg(short = 'c', long = "calibration", default_value_t = 0.0, allow_negative_numbers = true)]
    pub calibration: f64,

    /// The largest calibration offset in ppm to evaluate in either direction
    #[arg(short = 'r', long = "ppm-range", default_value_t = DEFAULT_PPM_RANGE, value_parser = non_negative_float)]
    pub ppm_range: f64,

    /// The number of calibration offsets to evaluate on each side of zero
    #[arg(short = 'b', long = "bins", default_value_t = DEFAULT_BINS)]
    pub bins: usize,

    /// The number of organisms retained after the ribosomal protein screen
    #[arg(short = 'f', long = "first", default_value_t = DEFAULT_FIRST)]
    pub first: usize,

    /// The number of candidates reported
    #[arg(short = 'n', long = "top", default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// The minimum relative intensity of a peak to be used
    #[arg(short = 'm', long = "minimum", default_value_t = MIN_RELATIVE_INTENSITY, value_parser = non_negative_float)]
    pub minimum: f64,

    /// The reference genome set to search
    #[arg(short = 'R', long = "reference", default_value_t = ArgReferenceSet::Reps)]
    pub reference: ArgReferenceSet,

    /// The taxonomy to describe candidates with
    #[arg(short = 'T', long = "taxonomy", default_value_t = ArgTaxonomy::Genome)]
    pub taxonomy: ArgTaxonomy,

    /// The lineage of the reference data package to use
    #[arg(short = 'L', long = "lineage", default_value_t = ArgLineage::Prokaryotes)]
    pub lineage: ArgLineage,

    /// How scores are normalized by genome size
    #[arg(long = "normalization", default_value_t = ArgNormalization::Limited)]
    pub normalization: ArgNormalization,

    /// The largest number of unrelated organisms sampled for the null model, 0 to use all of them
    #[arg(long = "null-sample-size", default_value_t = DEFAULT_NULL_SAMPLE_SIZE)]
    pub null_sample_size: usize,

    /// A random seed for null model sampling, for reproducible confidence estimates
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    #[arg(skip = RIBOSOMAL_WEIGHT)]
    pub ribosomal_weight: u32,

    #[arg(skip = GENE_LIMIT)]
    pub gene_limit: u32,
}

impl Default for SearchArgs {
    fn default() -> Self {
        Self {
            db_path: None,
            tolerance: DEFAULT_TOLERANCE,
            no_calibrate: false,
            calibration: 0.0,
            ppm_range: DEFAULT_PPM_RANGE,
            bins: DEFAULT_BINS,
            first: DEFAULT_FIRST,
            top: DEFAULT_TOP,
            minimum: MIN_RELATIVE_INTENSITY,
            reference: ArgReferenceSet::default(),
            taxonomy: ArgTaxonomy::default(),
            lineage: ArgLineage::default(),
            normalization: ArgNormalization::default(),
            null_sample_size: DEFAULT_NULL_SAMPLE_SIZE,
            seed: None,
            ribosomal_weight: RIBOSOMAL_WEIGHT,
            gene_limit: GENE_LIMIT,
        }
    }
}

impl SearchArgs {
    /// Layer configuration files and the environment over these arguments.
    ///
    /// `mzidentifier.toml` in the working directory is read if present, then
    /// `config_file` which must exist, then `MZIDENTIFIER_` environment variables.
    pub fn configure(self, config_file: Option<&Path>) -> Result<Self, figment::Error> {
        let mut config = Figment::from(Serialized::defaults(self))
            .merge(Toml::file(CONFIG_FILE_NAME));
        if let Some(path) = config_file {
            config = config.merge(Toml::file_exact(path));
        }
        config.merge(Env::prefixed(ENV_PREFIX)).extract()
    }

    pub fn calibration_params(&self) -> CalibrationParams {
        CalibrationParams::new(self.ppm_range, self.bins)
    }

    pub fn funnel_params(&self) -> FunnelParams {
        FunnelParams {
            tolerance_ppm: self.tolerance,
            first: self.first,
            top: self.top,
            null_sample_size: self.null_sample_size,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn scoring_params(&self) -> ScoringParams {
        ScoringParams::new(
            self.normalization.into(),
            self.ribosomal_weight,
            self.gene_limit,
        )
    }

    pub fn reference_set(&self) -> ReferenceSet {
        self.reference.into()
    }

    pub fn taxonomy_source(&self) -> TaxonomySource {
        self.taxonomy.into()
    }

    pub fn lineage(&self) -> Lineage {
        self.lineage.into()
    }
}

//! Reference data: per-organism theoretical mass databases and the metadata
//! tables used to describe search results.
//!
//! All files are plain tab-separated text, optionally gzip compressed:
//!
//! - mass databases: `identifier<TAB>mass,mass,...`
//! - metadata tables: `identifier<TAB>value`
//! - gene counts: `identifier<TAB>integer`
use std::fmt::Display;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::bufread::MultiGzDecoder;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::confidence::Lineage;

/// The placeholder shown for identifiers missing from a metadata table
pub const NOT_ASSIGNED: &str = "not assigned";

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("An IO error occurred reading {0}: {1}")]
    IOError(String, #[source] io::Error),
    #[error("Reference file {0} does not exist")]
    MissingFile(String),
    #[error("Failed to read a record from {0}: {1}")]
    RecordError(String, #[source] csv::Error),
    #[error("Malformed entry in {path} at line {line}: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },
}

/// Open a text file for buffered reading, transparently decompressing `.gz` files.
pub(crate) fn open_text(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let handle = io::BufReader::new(fs::File::open(path)?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(io::BufReader::new(MultiGzDecoder::new(handle))))
    } else {
        Ok(Box::new(handle))
    }
}

/// A reader for headerless tab-separated tables with `#` comment lines and a
/// varying number of columns. Quotes carry no meaning in these files.
pub(crate) fn tab_separated<R: io::Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(reader)
}

/// The line a record started on, for error messages
pub(crate) fn record_line(record: &StringRecord) -> usize {
    record.position().map_or(0, |p| p.line() as usize)
}

/// Visit the `(line number, identifier, record)` of each row of a tab-separated
/// table, skipping comments, blank lines and rows without an identifier.
fn read_records<R: io::Read>(
    reader: R,
    source: &str,
    mut visit: impl FnMut(usize, &str, &StringRecord) -> Result<(), DatabaseError>,
) -> Result<(), DatabaseError> {
    let mut reader = tab_separated(reader);
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(DatabaseError::RecordError(source.to_string(), e)),
        }
        let id = record.get(0).unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        visit(record_line(&record), id, &record)?;
    }
    Ok(())
}

fn source_name(path: &Path) -> String {
    path.display().to_string()
}

pub(crate) fn open_checked(path: &Path) -> Result<Box<dyn BufRead>, DatabaseError> {
    if !path.exists() {
        return Err(DatabaseError::MissingFile(source_name(path)));
    }
    open_text(path).map_err(|e| DatabaseError::IOError(source_name(path), e))
}

/// The theoretical masses of one organism's protein set, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceEntry {
    masses: Box<[f64]>,
}

impl ReferenceEntry {
    pub fn new(mut masses: Vec<f64>) -> Self {
        masses.retain(|m| m.is_finite());
        masses.sort_by(|a, b| a.total_cmp(b));
        Self {
            masses: masses.into_boxed_slice(),
        }
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }
}

impl From<Vec<f64>> for ReferenceEntry {
    fn from(value: Vec<f64>) -> Self {
        Self::new(value)
    }
}

/// A mapping from organism identifier to its theoretical masses, kept in the
/// order the organisms were read.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDatabase {
    entries: IndexMap<String, ReferenceEntry>,
}

impl ReferenceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, masses: impl Into<ReferenceEntry>) {
        self.entries.insert(id.into(), masses.into());
    }

    pub fn get(&self, id: &str) -> Option<&[f64]> {
        self.entries.get(id).map(|e| e.masses())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.masses()))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Add or replace the entries of `other`, e.g. a custom database over a public one.
    ///
    /// Replaced organisms keep their position, new ones are appended in `other`'s order.
    pub fn merge(&mut self, other: ReferenceDatabase) {
        self.entries.extend(other.entries);
    }

    /// Read `identifier<TAB>mass,mass,...` rows. Masses may also be separated by
    /// whitespace or spread over further columns.
    pub fn from_reader<R: io::Read>(reader: R, source: &str) -> Result<Self, DatabaseError> {
        let mut db = Self::new();
        read_records(reader, source, |line, id, record| {
            let masses = record
                .iter()
                .skip(1)
                .flat_map(|field| field.split(|c: char| c == ',' || c.is_whitespace()))
                .filter(|t| !t.is_empty())
                .map(f64::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DatabaseError::Malformed {
                    path: source.to_string(),
                    line,
                    reason: e.to_string(),
                })?;
            db.insert(id, masses);
            Ok(())
        })?;
        Ok(db)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let db = Self::from_reader(open_checked(path)?, &source_name(path))?;
        debug!("Loaded {} organisms from {}", db.len(), path.display());
        Ok(db)
    }
}

impl<K: Into<String>, V: Into<ReferenceEntry>> FromIterator<(K, V)> for ReferenceDatabase {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A free-text description of each organism, e.g. its name, strain or lineage.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    entries: IndexMap<String, String>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(id.into(), value.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|s| s.as_str())
    }

    /// Look up `id`, substituting `placeholder` when it is absent
    pub fn get_or<'a>(&'a self, id: &str, placeholder: &'a str) -> &'a str {
        self.get(id).unwrap_or(placeholder)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&mut self, other: MetadataTable) {
        self.entries.extend(other.entries);
    }

    /// Read `identifier<TAB>value` rows, any further columns are ignored
    pub fn from_reader<R: io::Read>(reader: R, source: &str) -> Result<Self, DatabaseError> {
        let mut table = Self::new();
        read_records(reader, source, |_, id, record| {
            table.insert(id, record.get(1).unwrap_or_default());
            Ok(())
        })?;
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        Self::from_reader(open_checked(path)?, &source_name(path))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The number of predicted genes in each organism's genome
#[derive(Debug, Clone, Default)]
pub struct GeneCounts {
    entries: IndexMap<String, u32>,
}

impl GeneCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, count: u32) {
        self.entries.insert(id.into(), count);
    }

    pub fn get(&self, id: &str) -> Option<u32> {
        self.entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&mut self, other: GeneCounts) {
        self.entries.extend(other.entries);
    }

    pub fn from_reader<R: io::Read>(reader: R, source: &str) -> Result<Self, DatabaseError> {
        let mut table = Self::new();
        read_records(reader, source, |line, id, record| {
            let count = record
                .get(1)
                .unwrap_or_default()
                .parse::<u32>()
                .map_err(|e| DatabaseError::Malformed {
                    path: source.to_string(),
                    line,
                    reason: e.to_string(),
                })?;
            table.insert(id, count);
            Ok(())
        })?;
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        Self::from_reader(open_checked(path)?, &source_name(path))
    }
}

impl<K: Into<String>> FromIterator<(K, u32)> for GeneCounts {
    fn from_iter<T: IntoIterator<Item = (K, u32)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Which set of reference genomes to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ReferenceSet {
    /// One representative genome per species
    #[default]
    Reps,
    /// Every genome in the database
    All,
    /// Every genome in the database plus user-supplied genomes
    Custom,
}

impl Display for ReferenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReferenceSet::Reps => "reps",
            ReferenceSet::All => "all",
            ReferenceSet::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Which taxonomy to describe search results with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TaxonomySource {
    /// Genome-based taxonomy
    #[default]
    Genome,
    /// SSU rRNA taxonomy from SILVA
    Silva,
    /// NCBI organism names
    Ncbi,
}

impl Display for TaxonomySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaxonomySource::Genome => "genome",
            TaxonomySource::Silva => "silva",
            TaxonomySource::Ncbi => "ncbi",
        };
        f.write_str(s)
    }
}

/// Resolves the files of a reference data package.
///
/// A package is laid out as `<root>/<lineage>/{mass,taxonomy,custom,genomes}/`.
/// Every table may be stored as `<name>.tsv` or `<name>.tsv.gz`.
#[derive(Debug, Clone)]
pub struct DatabasePaths {
    base: PathBuf,
}

impl DatabasePaths {
    pub fn new<P: AsRef<Path>>(root: P, lineage: Lineage) -> Self {
        Self {
            base: root.as_ref().join(lineage.dir_name()),
        }
    }

    fn resolve(&self, section: &str, name: &str) -> PathBuf {
        let plain = self.base.join(section).join(format!("{name}.tsv"));
        if plain.exists() {
            return plain;
        }
        let compressed = self.base.join(section).join(format!("{name}.tsv.gz"));
        if compressed.exists() {
            compressed
        } else {
            plain
        }
    }

    pub fn ribosomal(&self, reference: ReferenceSet) -> PathBuf {
        match reference {
            ReferenceSet::Reps => self.resolve("mass", "ribosomal_reps"),
            ReferenceSet::All | ReferenceSet::Custom => self.resolve("mass", "ribosomal"),
        }
    }

    pub fn proteome(&self, reference: ReferenceSet) -> PathBuf {
        match reference {
            ReferenceSet::Reps => self.resolve("mass", "all_reps"),
            ReferenceSet::All | ReferenceSet::Custom => self.resolve("mass", "all"),
        }
    }

    pub fn gene_counts(&self, reference: ReferenceSet) -> PathBuf {
        match reference {
            ReferenceSet::Reps => self.resolve("mass", "reps_genes"),
            ReferenceSet::All | ReferenceSet::Custom => self.resolve("mass", "all_genes"),
        }
    }

    pub fn taxonomy(&self, source: TaxonomySource) -> PathBuf {
        match source {
            TaxonomySource::Genome => self.resolve("taxonomy", "gtdb_taxonomy"),
            TaxonomySource::Silva => self.resolve("taxonomy", "ssu_silva_taxonomy"),
            TaxonomySource::Ncbi => self.resolve("taxonomy", "ncbi_name"),
        }
    }

    pub fn names(&self) -> PathBuf {
        self.resolve("taxonomy", "ncbi_name")
    }

    pub fn strains(&self) -> PathBuf {
        self.resolve("taxonomy", "ncbi_strain")
    }

    pub fn custom_ribosomal(&self) -> PathBuf {
        self.resolve("custom", "custom_ribosomals")
    }

    pub fn custom_proteome(&self) -> PathBuf {
        self.resolve("custom", "custom_others")
    }

    pub fn custom_gene_counts(&self) -> PathBuf {
        self.resolve("custom", "custom_genes")
    }

    pub fn custom_names(&self) -> PathBuf {
        self.resolve("custom", "custom_names")
    }

    pub fn custom_taxonomy(&self) -> PathBuf {
        self.resolve("custom", "custom_taxonomy")
    }

    /// The directory holding per-genome `<identifier>_annotation.tsv` files
    pub fn genome_dir(&self) -> PathBuf {
        self.base.join("genomes")
    }
}

/// Everything a search needs to know about the reference organisms.
///
/// Loaded once and only read afterwards, so it can be shared freely between
/// threads by reference.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Ribosomal protein masses, screened first
    pub ribosomal: ReferenceDatabase,
    /// All protein masses, used to rescore candidates
    pub proteome: ReferenceDatabase,
    pub gene_counts: GeneCounts,
    pub taxonomy: MetadataTable,
    pub names: MetadataTable,
    pub strains: MetadataTable,
}

impl ReferenceData {
    pub fn load(
        paths: &DatabasePaths,
        reference: ReferenceSet,
        taxonomy: TaxonomySource,
    ) -> Result<Self, DatabaseError> {
        let mut data = Self {
            ribosomal: ReferenceDatabase::from_path(paths.ribosomal(reference))?,
            proteome: ReferenceDatabase::from_path(paths.proteome(reference))?,
            gene_counts: GeneCounts::from_path(paths.gene_counts(reference))?,
            taxonomy: MetadataTable::from_path(paths.taxonomy(taxonomy))?,
            names: MetadataTable::from_path(paths.names())?,
            strains: MetadataTable::from_path(paths.strains())?,
        };

        if reference == ReferenceSet::Custom {
            data.ribosomal
                .merge(ReferenceDatabase::from_path(paths.custom_ribosomal())?);
            data.proteome
                .merge(ReferenceDatabase::from_path(paths.custom_proteome())?);
            data.gene_counts
                .merge(GeneCounts::from_path(paths.custom_gene_counts())?);
            data.names
                .merge(MetadataTable::from_path(paths.custom_names())?);
            data.taxonomy
                .merge(MetadataTable::from_path(paths.custom_taxonomy())?);
        }

        info!(
            "Loaded {} ribosomal and {} proteome reference organisms ({reference})",
            data.ribosomal.len(),
            data.proteome.len()
        );
        Ok(data)
    }

    /// Load only what mass calibration needs: the ribosomal database and organism names
    pub fn load_for_calibration(
        paths: &DatabasePaths,
        reference: ReferenceSet,
    ) -> Result<Self, DatabaseError> {
        let mut data = Self {
            ribosomal: ReferenceDatabase::from_path(paths.ribosomal(reference))?,
            names: MetadataTable::from_path(paths.names())?,
            ..Default::default()
        };
        if reference == ReferenceSet::Custom {
            data.ribosomal
                .merge(ReferenceDatabase::from_path(paths.custom_ribosomal())?);
            data.names
                .merge(MetadataTable::from_path(paths.custom_names())?);
        }
        Ok(data)
    }
}

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;

use mzidentify::{
    annotate::PeakAnnotation,
    calibration::Calibration,
    confidence::Confidence,
    db::{MetadataTable, TaxonomySource, NOT_ASSIGNED},
    peaks::PeakList,
    scoring::NormalizationMode,
    search::{CandidateRow, SearchResult},
};

use crate::args::OutputFormat;

/// A search result together with the provenance of its input
#[derive(Debug, Clone, Serialize)]
pub struct Report<'a> {
    pub input: String,
    pub peaks_found: usize,
    pub peaks_used: usize,
    pub minimum: f64,
    pub comment: Option<&'a str>,
    pub normalization: NormalizationMode,
    pub taxonomy: TaxonomySource,
    pub calibration: Option<&'a Calibration>,
    #[serde(flatten)]
    pub result: &'a SearchResult,
}

impl<'a> Report<'a> {
    pub fn new(
        input: &Path,
        peaks: &'a PeakList,
        minimum: f64,
        normalization: NormalizationMode,
        taxonomy: TaxonomySource,
        calibration: Option<&'a Calibration>,
        result: &'a SearchResult,
    ) -> Self {
        let input = input
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| input.display().to_string());
        Self {
            input,
            peaks_found: peaks.total_peaks,
            peaks_used: peaks.len(),
            minimum,
            comment: peaks.comment.as_deref(),
            normalization,
            taxonomy,
            calibration,
            result,
        }
    }
}

fn format_probability(p: Option<f64>) -> String {
    match p {
        Some(p) => format!("{p:.2e}"),
        None => "NA".to_string(),
    }
}

/// Tab-separated rows below a block of `#` comment lines, so fields are never quoted
fn tab_writer<W: Write>(writer: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(writer)
}

/// A [`CandidateRow`] in report column order
#[derive(Debug, Serialize)]
struct CandidateRecord<'a> {
    identifier: &'a str,
    total_hits: u32,
    ribosomal_hits: u32,
    score: String,
    probability: String,
    confidence: Confidence,
    organism: &'a str,
    strain: &'a str,
    taxonomy: &'a str,
}

impl<'a> From<&'a CandidateRow> for CandidateRecord<'a> {
    fn from(row: &'a CandidateRow) -> Self {
        Self {
            identifier: &row.identifier,
            total_hits: row.total_hits,
            ribosomal_hits: row.ribosomal_hits,
            score: format!("{:.3}", row.score),
            probability: format_probability(row.tail_probability),
            confidence: row.confidence,
            organism: &row.organism,
            strain: &row.strain,
            taxonomy: &row.taxonomy,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScoreRecord<'a> {
    identifier: &'a str,
    score: f64,
    taxonomy: &'a str,
}

#[derive(Debug, Serialize)]
struct AnnotationRecord<'a> {
    mz: f64,
    relative_intensity: String,
    theoretical_mass: f64,
    gene: &'a str,
}

pub fn write_tsv_report<W: Write>(writer: &mut W, report: &Report) -> io::Result<()> {
    let result = report.result;
    writeln!(
        writer,
        "# Calibration offset: {:.1} ppm",
        result.calibration_ppm
    )?;
    writeln!(
        writer,
        "# Input: {}; {} peaks found, {} peaks used with relative intensity above {}",
        report.input, report.peaks_found, report.peaks_used, report.minimum
    )?;
    writeln!(
        writer,
        "# Tolerance: {} ppm; Reference: {}; Lineage: {}; Normalization: {}",
        result.tolerance_ppm, result.reference, result.lineage, report.normalization
    )?;
    match &result.null_model {
        Some(model) => writeln!(
            writer,
            "# Null model: mean {:.2}; standard deviation {:.2}; {} organisms sampled from {}",
            model.mean, model.stdev, model.sample_size, result.null_pool_size
        )?,
        None => writeln!(
            writer,
            "# Null model: not estimated, {} organisms available",
            result.null_pool_size
        )?,
    }
    if let Some(comment) = report.comment {
        writeln!(writer, "# {comment}")?;
    }
    {
        let mut table = tab_writer(&mut *writer);
        let taxonomy_column = format!("taxonomy_{}", report.taxonomy);
        table.write_record([
            "#identifier",
            "total_hits",
            "ribosomal_hits",
            "score",
            "probability",
            "confidence",
            "organism",
            "strain",
            taxonomy_column.as_str(),
        ])?;
        for row in result.candidates.iter() {
            table.serialize(CandidateRecord::from(row))?;
        }
        table.flush()?;
    }
    match result.best_match() {
        Some(best) => writeln!(writer, "# Best match: {}", best.identifier)?,
        None => writeln!(writer, "# Best match: none")?,
    }
    Ok(())
}

pub fn write_json_report<W: Write>(writer: &mut W, report: &Report) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writeln!(writer)
}

pub fn write_report<W: Write>(
    writer: &mut W,
    report: &Report,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Tsv => write_tsv_report(writer, report),
        OutputFormat::Json => write_json_report(writer, report),
    }
}

pub fn write_report_file(path: &Path, report: &Report, format: OutputFormat) -> io::Result<()> {
    let mut handle = io::BufWriter::new(fs::File::create(path)?);
    write_report(&mut handle, report, format)?;
    handle.flush()
}

/// Write `identifier<TAB>score<TAB>taxonomy` rows for already ranked `scores`
pub fn write_top_scores<W: Write>(
    writer: &mut W,
    scores: &[(&String, &f64)],
    taxonomy: &MetadataTable,
) -> io::Result<()> {
    let mut table = tab_writer(writer);
    for (identifier, score) in scores.iter() {
        table.serialize(ScoreRecord {
            identifier,
            score: **score,
            taxonomy: taxonomy.get_or(identifier, NOT_ASSIGNED),
        })?;
    }
    table.flush()
}

pub fn write_calibration<W: Write>(writer: &mut W, calibration: &Calibration) -> io::Result<()> {
    writeln!(writer, "calibration_ppm\t{:.3}", calibration.offset_ppm)?;
    writeln!(writer, "bin_ppm\t{:.1}", calibration.bin_offset_ppm)?;
    writeln!(
        writer,
        "best_entity\t{}",
        calibration.best_entity.as_deref().unwrap_or("none")
    )?;
    writeln!(writer, "match_count\t{}", calibration.match_count)?;
    writeln!(writer, "bins_evaluated\t{}", calibration.bins_evaluated)
}

pub fn write_annotations<W: Write>(
    writer: &mut W,
    input: &str,
    identifier: &str,
    total_peaks: usize,
    annotations: &[PeakAnnotation],
) -> io::Result<()> {
    writeln!(
        writer,
        "# Peak annotation of {input} ({total_peaks} peaks) with {identifier}"
    )?;
    let mut table = tab_writer(writer);
    table.write_record(["#mz", "relative_intensity", "theoretical_mass", "gene"])?;
    for peak in annotations {
        for hit in peak.matches.iter() {
            table.serialize(AnnotationRecord {
                mz: peak.mz,
                relative_intensity: format!("{:.3}", peak.relative_intensity),
                theoretical_mass: hit.theoretical_mass,
                gene: &hit.gene,
            })?;
        }
    }
    table.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use mzidentify::annotate::AnnotationMatch;
    use mzidentify::confidence::Lineage;
    use mzidentify::db::ReferenceSet;
    use mzidentify::search::SearchState;

    fn result() -> SearchResult {
        SearchResult {
            calibration_ppm: -12.34,
            tolerance_ppm: 200.0,
            reference: ReferenceSet::Reps,
            lineage: Lineage::Prokaryotes,
            state: SearchState::Degraded,
            null_model: None,
            screened: 3,
            null_pool_size: 3,
            candidates: vec![CandidateRow {
                identifier: "G1".into(),
                ribosomal_hits: 3,
                total_hits: 7,
                score: 25.0,
                tail_probability: None,
                confidence: Confidence::BelowFifty,
                organism: "Escherichia coli".into(),
                strain: "K-12".into(),
                taxonomy: "d__Bacteria".into(),
            }],
        }
    }

    #[test]
    fn test_tsv_report() -> io::Result<()> {
        let result = result();
        let peaks = PeakList::new([(5000.0, 0.5), (6000.0, 0.5)]);
        let report = Report::new(
            Path::new("data/sample_1.txt"),
            &peaks,
            0.0002,
            NormalizationMode::Limited,
            TaxonomySource::Genome,
            None,
            &result,
        );
        let mut buf = Vec::new();
        write_tsv_report(&mut buf, &report)?;
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("# Calibration offset: -12.3 ppm\n"));
        assert!(text.contains("# Input: sample_1.txt; 2 peaks found, 2 peaks used"));
        assert!(text.contains("G1\t7\t3\t25.000\tNA\t<50%\tEscherichia coli\tK-12\td__Bacteria\n"));
        assert!(text.ends_with("# Best match: G1\n"));
        Ok(())
    }

    #[test]
    fn test_tsv_report_header_and_probability() -> io::Result<()> {
        let mut result = result();
        result.candidates[0].tail_probability = Some(0.000123);
        result.candidates[0].confidence = Confidence::NinetyNine;
        let peaks = PeakList::new([(5000.0, 1.0)]);
        let report = Report::new(
            Path::new("sample_1.txt"),
            &peaks,
            0.0,
            NormalizationMode::Limited,
            TaxonomySource::Silva,
            None,
            &result,
        );
        let mut buf = Vec::new();
        write_tsv_report(&mut buf, &report)?;
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(
            "#identifier\ttotal_hits\tribosomal_hits\tscore\tprobability\tconfidence\torganism\tstrain\ttaxonomy_silva\n"
        ));
        assert!(text.contains("G1\t7\t3\t25.000\t1.23e-4\t99%\t"));
        Ok(())
    }

    #[test]
    fn test_annotations() -> io::Result<()> {
        let annotations = vec![PeakAnnotation {
            mz: 9535.5,
            relative_intensity: 12.5,
            matches: vec![
                AnnotationMatch {
                    theoretical_mass: 9535.1,
                    gene: "50S ribosomal protein L36".into(),
                },
                AnnotationMatch {
                    theoretical_mass: 9536.25,
                    gene: "hypothetical protein".into(),
                },
            ],
        }];
        let mut buf = Vec::new();
        write_annotations(&mut buf, "sample_1.txt", "G1", 20, &annotations)?;
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "# Peak annotation of sample_1.txt (20 peaks) with G1",
                "#mz\trelative_intensity\ttheoretical_mass\tgene",
                "9535.5\t12.500\t9535.1\t50S ribosomal protein L36",
                "9535.5\t12.500\t9536.25\thypothetical protein",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_top_scores() -> io::Result<()> {
        let taxonomy: MetadataTable = [("G2", "d__Bacteria;p__Proteobacteria")]
            .into_iter()
            .collect();
        let (g2, g1) = ("G2".to_string(), "G1".to_string());
        let scores = [(&g2, &0.5), (&g1, &0.125)];
        let mut buf = Vec::new();
        write_top_scores(&mut buf, &scores, &taxonomy)?;
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "G2\t0.5\td__Bacteria;p__Proteobacteria\nG1\t0.125\tnot assigned\n"
        );
        Ok(())
    }

    #[test]
    fn test_json_report() -> io::Result<()> {
        let result = result();
        let peaks = PeakList::new([(5000.0, 1.0)]);
        let report = Report::new(
            Path::new("sample_1.txt"),
            &peaks,
            0.0,
            NormalizationMode::Linear,
            TaxonomySource::Ncbi,
            None,
            &result,
        );
        let mut buf = Vec::new();
        write_json_report(&mut buf, &report)?;
        let value: serde_json::Value = serde_json::from_slice(&buf)?;
        assert_eq!(value["input"], "sample_1.txt");
        assert_eq!(value["normalization"], "linear");
        assert_eq!(value["state"], "degraded");
        assert_eq!(value["candidates"][0]["confidence"], "<50%");
        Ok(())
    }
}

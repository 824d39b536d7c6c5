use std::{error::Error, fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

const DB_PATH: &str = "tests/data/db";
const TARGET: &str = "GCF_000005845.2";

fn fresh_dir(path: &str) -> &Path {
    let path = Path::new(path);
    if path.exists() {
        fs::remove_dir_all(path).unwrap();
    }
    path
}

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["identify", "not_real.txt", "-d", DB_PATH, "-o", "-"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
    Ok(())
}

#[test]
fn test_database_path_required() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.env_remove("MZIDENTIFIER_DB_PATH");
    cmd.args(["identify", "tests/data/sample_target.txt"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("MissingDatabasePath"));
    Ok(())
}

#[test]
fn test_empty_peak_list_is_fatal() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["identify", "tests/data/sample_empty.txt", "-d", DB_PATH]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Empty"));
    Ok(())
}

#[test]
fn test_adjust() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["adjust", "tests/data/sample_target.txt", "-d", DB_PATH]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("calibration_ppm\t0.000\n"))
        .stdout(predicate::str::contains(format!("best_entity\t{TARGET}\n")))
        .stdout(predicate::str::contains("match_count\t15\n"))
        .stdout(predicate::str::contains("bins_evaluated\t11\n"));
    Ok(())
}

#[test]
fn test_identify_tsv() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["identify", "tests/data/sample_target.txt", "-d", DB_PATH, "-o", "-"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "# Input: sample_target.txt; 18 peaks found, 17 peaks used",
        ))
        .stdout(predicate::str::contains("# E.coli_colony_3\n"))
        .stdout(predicate::str::contains(format!(
            "{TARGET}\t32\t15\t122.000\tNA\t<50%\tEscherichia coli\tK-12 substr. MG1655\td__Bacteria;"
        )))
        .stdout(predicate::str::ends_with(format!("# Best match: {TARGET}\n")))
        .stderr(predicate::str::contains(format!("Best match: {TARGET}")));
    Ok(())
}

#[test]
fn test_identify_json_with_annotation() -> Result<(), Box<dyn Error>> {
    let out_dir = fresh_dir("tmp/test_identify_json");
    fs::create_dir_all(out_dir)?;
    let report_path = out_dir.join("report.json");
    let annotation_path = out_dir.join("annotation.tsv");

    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["identify", "tests/data/sample_target.txt", "-d", DB_PATH, "-o"])
        .arg(&report_path)
        .arg("--annotate")
        .arg(&annotation_path);
    cmd.assert().success();

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path)?)?;
    assert_eq!(report["state"], "degraded");
    assert_eq!(report["candidates"][0]["identifier"], TARGET);
    assert_eq!(report["calibration"]["match_count"], 15);

    let annotation = fs::read_to_string(&annotation_path)?;
    assert!(annotation.contains("50S ribosomal protein L36"));
    assert!(annotation.contains("hypothetical protein"));
    Ok(())
}

#[test]
fn test_annotate() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args([
        "annotate",
        "tests/data/sample_target.txt",
        TARGET,
        "-d",
        DB_PATH,
        "--no-calibrate",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("#mz\trelative_intensity\ttheoretical_mass\tgene"))
        .stdout(predicate::str::contains("\t30S ribosomal protein S16\n"));

    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args([
        "annotate",
        "tests/data/sample_target.txt",
        "GCF_000006945.2",
        "-d",
        DB_PATH,
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("MissingAnnotation"));
    Ok(())
}

#[test]
fn test_batch() -> Result<(), Box<dyn Error>> {
    let out_dir = fresh_dir("tmp/test_batch");

    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["batch", "tests/data/inputs.txt"])
        .arg(out_dir)
        .args(["-d", DB_PATH, "-t", "2", "--annotate", "--seed", "5"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains(
            "Finished processing 3 of 3 (100.00%) items.",
        ))
        .stderr(predicate::str::contains("file not found"))
        .stderr(predicate::str::contains("no peaks found"));

    assert!(out_dir.join("sample_target.tsv").exists());
    assert!(!out_dir.join("sample_empty.tsv").exists());
    assert!(out_dir
        .join(format!("sample_target_annotation_with_{TARGET}.tsv"))
        .exists());

    let config = fs::read_to_string(out_dir.join("mzidentifier.toml"))?;
    assert!(config.contains("seed = 5"));
    assert!(config.contains("db_path = \"tests/data/db\""));
    Ok(())
}

#[test]
fn test_batch_exhaustive() -> Result<(), Box<dyn Error>> {
    let out_dir = fresh_dir("tmp/test_batch_exhaustive");

    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["batch", "tests/data/inputs.txt"])
        .arg(out_dir)
        .args(["-d", DB_PATH, "-t", "2", "--exhaustive", "-q"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains(
            "Finished processing 3 of 3 (100.00%) items.",
        ))
        .stderr(predicate::str::contains("candidate funnel is skipped"));

    assert!(!out_dir.join("sample_target.tsv").exists());
    let scores = fs::read_to_string(out_dir.join("sample_target_top_scores.tsv"))?;
    let rows: Vec<Vec<&str>> = scores.lines().map(|l| l.split('\t').collect()).collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0][0], TARGET);
    assert_eq!(rows[0][1], "122.0");
    assert!(rows[0][2].starts_with("d__Bacteria;"));
    assert!(rows.iter().all(|row| row.len() == 3));
    assert!(rows.iter().any(|row| row[2] == "not assigned"));
    Ok(())
}

#[test]
fn test_batch_exhaustive_conflicts_with_annotate() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["batch", "tests/data/inputs.txt", "tmp/never_created", "-d", DB_PATH])
        .args(["--exhaustive", "--annotate"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
    Ok(())
}

#[test]
fn test_identify_custom_reference() -> Result<(), Box<dyn Error>> {
    let out_dir = fresh_dir("tmp/test_identify_custom");
    fs::create_dir_all(out_dir)?;

    // the public set holds a truncated entry for the target
    let report_path = out_dir.join("all.json");
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["identify", "tests/data/sample_target.txt", "-d", DB_PATH, "-R", "all", "-o"])
        .arg(&report_path);
    cmd.assert().success();
    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path)?)?;
    assert_eq!(report["reference"], "all");
    assert_eq!(report["screened"], 4);
    assert_eq!(report["candidates"][0]["identifier"], TARGET);
    assert_eq!(report["candidates"][0]["ribosomal_hits"], 5);
    assert_eq!(report["candidates"][0]["total_hits"], 10);

    // custom genomes replace the target's entry and add a new genome
    let report_path = out_dir.join("custom.json");
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["identify", "tests/data/sample_target.txt", "-d", DB_PATH, "-R", "custom", "-o"])
        .arg(&report_path);
    cmd.assert().success();
    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path)?)?;
    assert_eq!(report["reference"], "custom");
    assert_eq!(report["screened"], 5);
    let candidates = report["candidates"].as_array().unwrap();
    assert_eq!(candidates[0]["identifier"], TARGET);
    assert_eq!(candidates[0]["ribosomal_hits"], 15);
    assert_eq!(candidates[0]["total_hits"], 32);
    assert_eq!(candidates[1]["identifier"], "CUSTOM_0001");
    assert_eq!(candidates[1]["ribosomal_hits"], 4);
    assert_eq!(candidates[1]["total_hits"], 9);
    assert_eq!(candidates[1]["score"], 33.0);
    assert_eq!(candidates[1]["organism"], "Escherichia sp. isolate 7");
    assert!(candidates[1]["taxonomy"]
        .as_str()
        .unwrap()
        .ends_with("g__Escherichia;s__"));
    Ok(())
}

#[test]
fn test_batch_requires_empty_output_directory() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzidentifier")?;
    cmd.args(["batch", "tests/data/inputs.txt", "tests/data", "-d", DB_PATH]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("OutputDirectoryNotEmpty"));
    Ok(())
}

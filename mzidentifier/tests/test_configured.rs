use std::fs;
use std::path::PathBuf;

use figment::{
    providers::{Format, Toml},
    Figment,
};

use mzidentifier::{ArgNormalization, Command, IdentifyArgs, MZIdentifier, SearchArgs};

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_configured_identify() {
    let mut config = Figment::new();
    config = config.merge(Toml::file_exact("tests/data/search.toml"));
    let search: SearchArgs = config.extract().unwrap();
    assert_eq!(search.tolerance, 150.0);
    assert_eq!(search.top, 3);
    assert_eq!(search.seed, Some(11));
    assert_eq!(search.normalization, ArgNormalization::Linear);
    assert_eq!(search.first, SearchArgs::default().first);

    let out_dir = PathBuf::from("tmp/test_configured");
    fs::create_dir_all(&out_dir).unwrap();
    let output_file = out_dir.join("report.json");

    let driver = MZIdentifier {
        log_file: None,
        config_file: None,
        command: Command::Identify(IdentifyArgs {
            input_file: PathBuf::from("tests/data/sample_target.txt"),
            output_file: output_file.clone(),
            format: None,
            annotation_file: None,
            search,
        }),
    };
    driver.main().unwrap();

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output_file).unwrap()).unwrap();
    assert_eq!(report["tolerance_ppm"], 150.0);
    assert_eq!(report["calibration_ppm"], 0.0);
    assert_eq!(report["normalization"], "linear");
    let candidates = report["candidates"].as_array().unwrap();
    assert!(candidates.len() <= 3);
    assert_eq!(candidates[0]["identifier"], "GCF_000005845.2");
    let score = candidates[0]["score"].as_f64().unwrap();
    assert!((score - 122.0 / 700.0).abs() < 1e-9);
}

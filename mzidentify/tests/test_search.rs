use mzidentify::calibration::{calibrate, CalibrationParams};
use mzidentify::confidence::{Confidence, ConfidenceThresholds, Lineage, LineageProfile};
use mzidentify::db::{GeneCounts, MetadataTable, ReferenceData, ReferenceDatabase, ReferenceSet};
use mzidentify::matching::{tally_database, MatchWindow};
use mzidentify::peaks::PeakList;
use mzidentify::rank::rank_descending_by;
use mzidentify::scoring::ScoringParams;
use mzidentify::search::{FunnelParams, SearchEngine, SearchError, SearchState};

const TARGET: &str = "GCF_000005845.2";

fn target_masses() -> Vec<f64> {
    (0..15).map(|k| 4000.0 + k as f64 * 500.0).collect()
}

/// `n_decoys` organisms whose masses sit between the target's, the first ten of
/// which share three masses with the target.
fn build_reference(n_decoys: usize) -> ReferenceData {
    let mut ribosomal = ReferenceDatabase::new();
    let mut proteome = ReferenceDatabase::new();
    let mut gene_counts = GeneCounts::new();
    let mut names = MetadataTable::new();

    for i in 0..n_decoys {
        let id = format!("decoy_{i:04}");
        let mut masses: Vec<f64> = (0..15)
            .map(|k| 4000.0 + k as f64 * 500.0 + 100.0 + (i % 50) as f64 * 3.0)
            .collect();
        if i < 10 {
            masses.extend(target_masses().into_iter().take(3));
        }
        ribosomal.insert(id.as_str(), masses.clone());
        masses.push(20000.0 + i as f64);
        proteome.insert(id.as_str(), masses);
        gene_counts.insert(id.as_str(), 500);
    }

    ribosomal.insert(TARGET, target_masses());
    let mut all = target_masses();
    all.extend([12000.0, 13500.0]);
    proteome.insert(TARGET, all);
    gene_counts.insert(TARGET, 700);
    names.insert(TARGET, "Escherichia coli");

    ReferenceData {
        ribosomal,
        proteome,
        gene_counts,
        names,
        ..Default::default()
    }
}

fn target_peaks(shift_ppm: f64) -> PeakList {
    let mut mzs = target_masses();
    mzs.extend([12000.0, 13500.0]);
    let n = mzs.len() as f32;
    PeakList::new(mzs.into_iter().map(|m| (m / (1.0 + shift_ppm / 1e6), 1.0 / n)))
}

fn small_profile(exclusion: usize) -> LineageProfile {
    LineageProfile {
        reps_exclusion: exclusion,
        all_exclusion: exclusion,
        all_fallback_exclusion: exclusion,
        min_ribosomal_hits: 5,
        reps_thresholds: ConfidenceThresholds::new(1e-5, 1e-6),
        all_thresholds: ConfidenceThresholds::new(1e-6, 1e-7),
    }
}

fn funnel() -> FunnelParams {
    FunnelParams {
        first: 20,
        top: 5,
        null_sample_size: 200,
        seed: Some(7),
        ..Default::default()
    }
}

#[test_log::test]
fn test_funnel_identifies_target() -> Result<(), SearchError> {
    let data = build_reference(300);
    let engine = SearchEngine::new(
        &data,
        ReferenceSet::Reps,
        Lineage::Prokaryotes,
        funnel(),
        ScoringParams::default(),
    )
    .with_profile(small_profile(50));

    let peaks = target_peaks(0.0);
    let result = engine.search(&peaks, 0.0)?;
    assert_eq!(result.state, SearchState::Success);
    assert_eq!(result.screened, 301);
    assert_eq!(result.null_pool_size, 251);
    let null_model = result.null_model.expect("a null model");
    assert_eq!(null_model.sample_size, 200);

    assert!(result.candidates.len() <= 5);
    let best = result.best_match().unwrap();
    assert_eq!(best.identifier, TARGET);
    assert_eq!(best.ribosomal_hits, 15);
    assert_eq!(best.total_hits, 32);
    assert_eq!(best.score, 15.0 * 7.0 + 17.0);
    assert_eq!(best.confidence, Confidence::NinetyNine);
    assert_eq!(best.organism, "Escherichia coli");

    for row in result.candidates.iter().skip(1) {
        assert_eq!(row.ribosomal_hits, 3);
        assert_eq!(row.confidence, Confidence::BelowFifty);
    }

    // every reported candidate survived the ribosomal screen
    let screened = tally_database(peaks.mzs(), &data.ribosomal, MatchWindow::new(200.0, 0.0));
    let mut narrowed: Vec<_> =
        rank_descending_by(screened.iter().collect::<Vec<_>>(), |(_, h)| {
            h.match_count as f64
        });
    narrowed.truncate(20);
    for row in result.candidates.iter() {
        assert!(narrowed.iter().any(|(id, _)| **id == row.identifier));
    }
    Ok(())
}

#[test_log::test]
fn test_small_pool_is_degraded() -> Result<(), SearchError> {
    let data = build_reference(149);
    let engine = SearchEngine::new(
        &data,
        ReferenceSet::All,
        Lineage::Prokaryotes,
        funnel(),
        ScoringParams::default(),
    )
    .with_profile(small_profile(100));

    let result = engine.search(&target_peaks(0.0), 0.0)?;
    assert_eq!(result.null_pool_size, 50);
    assert_eq!(result.state, SearchState::Degraded);
    assert!(result.null_model.is_none());
    assert!(result
        .candidates
        .iter()
        .all(|row| row.confidence == Confidence::BelowFifty));
    assert_eq!(result.best_match().unwrap().identifier, TARGET);
    Ok(())
}

#[test_log::test]
fn test_all_reference_falls_back_to_smaller_exclusion() -> Result<(), SearchError> {
    let data = build_reference(149);
    let profile = |fallback: usize| LineageProfile {
        all_exclusion: 200,
        all_fallback_exclusion: fallback,
        ..small_profile(100)
    };

    // nothing ranks past 200 of 150 organisms, so the pool starts at rank 30
    let engine = SearchEngine::new(
        &data,
        ReferenceSet::All,
        Lineage::Prokaryotes,
        funnel(),
        ScoringParams::default(),
    )
    .with_profile(profile(30));
    let result = engine.search(&target_peaks(0.0), 0.0)?;
    assert_eq!(result.screened, 150);
    assert_eq!(result.null_pool_size, 120);
    assert_eq!(result.state, SearchState::Success);
    let null_model = result.null_model.expect("a null model");
    assert_eq!(null_model.sample_size, 120);
    assert_eq!(result.best_match().unwrap().identifier, TARGET);

    // a fallback pool no larger than the minimum still degrades the search
    let engine = engine.with_profile(profile(60));
    let result = engine.search(&target_peaks(0.0), 0.0)?;
    assert_eq!(result.null_pool_size, 90);
    assert_eq!(result.state, SearchState::Degraded);
    assert!(result.null_model.is_none());
    Ok(())
}

#[test]
fn test_empty_peak_list_is_rejected() {
    let data = build_reference(10);
    let engine = SearchEngine::new(
        &data,
        ReferenceSet::Reps,
        Lineage::Prokaryotes,
        funnel(),
        ScoringParams::default(),
    );
    let peaks = PeakList::new(Vec::<(f64, f32)>::new());
    assert_eq!(engine.search(&peaks, 0.0), Err(SearchError::EmptyPeakList));
}

#[test_log::test]
fn test_calibrate_then_search() -> Result<(), SearchError> {
    let data = build_reference(120);
    let peaks = target_peaks(-450.0);
    let params = CalibrationParams::default();
    let calibration = calibrate(peaks.mzs(), &params, &data.ribosomal, None)?;
    assert_eq!(calibration.bins_evaluated, 2 * params.num_bins + 1);
    assert!(calibration.bin_offset_ppm.abs() <= params.ppm_range);
    assert_eq!(calibration.best_entity.as_deref(), Some(TARGET));
    assert_eq!(calibration.match_count, 15);
    // the -400 ppm bin is the first whose window covers the shift, and the
    // matches deviate by a further -450 ppm on average
    assert_eq!(calibration.bin_offset_ppm, -400.0);
    assert!((calibration.offset_ppm + 850.0).abs() < 1e-3, "{calibration:?}");

    let engine = SearchEngine::new(
        &data,
        ReferenceSet::Reps,
        Lineage::Prokaryotes,
        funnel(),
        ScoringParams::default(),
    );
    let uncalibrated = engine.search(&peaks, 0.0)?;
    assert_ne!(uncalibrated.best_match().unwrap().identifier, TARGET);
    let calibrated = engine.search(&peaks, calibration.bin_offset_ppm)?;
    assert_eq!(calibrated.best_match().unwrap().identifier, TARGET);
    Ok(())
}

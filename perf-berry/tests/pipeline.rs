mod common;

use common::*;
use perf_berry::prelude::*;

const CENTRE: Idx2d = (32, 32);

#[test]
fn test_single_disc() {
    init_logger();
    let scan = Phantom::background().disc(CENTRE, 5.0, 3.0).scan("disc");
    let outcome = analyse(&scan, &config(Structure::BasalGanglia));
    let result = outcome.into_result().expect("vessel should be found");

    assert_eq!(result.summary.detected, 1);
    assert_eq!(result.summary.positive_mag, 1);
    assert_eq!(result.summary.included, 1);
    assert_eq!(result.summary.encoding_violations, 0);
    assert_eq!(result.summary.perpendicular, Some(1));
    assert_eq!(result.summary.lone, Some(1));

    let vessel = &result.vessels[0];
    assert_eq!(vessel.representative, CENTRE);
    assert_eq!(vessel.cluster.len(), 81);
    assert!(vessel.axes_ratio < 1.2);
    assert!(vessel.flags.vpos && vessel.flags.mpos);

    let vmean = result.stats.vmean;
    assert!((vmean - 3.0).abs() < 0.15, "Vmean {vmean}");
    assert!(result.summary.vmean_sem.is_none());

    // 逐体素记录: 第一行是代表体素.
    assert_eq!(result.records.len(), 81);
    let first = &result.records[0];
    assert_eq!((first.ir, first.ic), (33, 33));
    assert_eq!(first.ipixel, 1);
    assert_eq!(first.n_pha, PHASES);
    assert!(first.im_blob > 0);
    assert_eq!(perf_berry::mask::count(&result.vessel_mask), 81);
    assert!(result.summary.magnitude_snr_vessels > result.summary.magnitude_snr_mask);
}

#[test]
fn test_close_pixels_are_merged() {
    let scan = Phantom::background()
        .pixel((32, 30), 3.0)
        .pixel((32, 33), 3.0)
        .scan("pair");
    let result = analyse(&scan, &config(Structure::BasalGanglia))
        .into_result()
        .expect("one vessel should survive");

    assert_eq!(result.summary.detected, 2);
    assert_eq!(result.summary.lone, Some(1));
    assert_eq!(result.summary.clustered, Some(1));
    assert_eq!(result.summary.included, 1);
}

#[test]
fn test_far_pixels_are_kept() {
    let scan = Phantom::background()
        .pixel((20, 20), 3.0)
        .pixel((40, 44), 3.0)
        .scan("far");
    let result = analyse(&scan, &config(Structure::BasalGanglia))
        .into_result()
        .unwrap();
    assert_eq!(result.summary.included, 2);
    assert!(result.summary.vmean_sem.is_some());
    assert!(result.summary.pi_norm_sem.is_some());
}

#[test]
fn test_aliased_vessel_is_excluded() {
    let scan = Phantom::background()
        .disc(CENTRE, 5.0, 3.0)
        .with_velocity(3, CENTRE, 12.0)
        .scan("aliased");
    match analyse(&scan, &config(Structure::BasalGanglia)) {
        ScanOutcome::NoVessels(summary) => {
            assert_eq!(summary.detected, 1);
            assert_eq!(summary.encoding_violations, 1);
            assert_eq!(summary.included, 0);
            assert!(summary.vmean.is_none());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_background_only() {
    let scan = Phantom::background().scan("empty");
    for structure in [
        Structure::BasalGanglia,
        Structure::SemiovalCentre,
        Structure::MiddleCerebralArtery,
    ] {
        match analyse(&scan, &config(structure)) {
            ScanOutcome::NoVessels(summary) => {
                assert_eq!(summary.detected, 0);
                assert!(summary.magnitude_snr_mask.is_finite());
                assert!(summary.velocity_snr_mask.is_finite());
                assert_eq!(summary.magnitude_snr_vessels, 0.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}

#[test]
fn test_structure_filters_direction() {
    // 正向流速的血管在半卵圆中心 (只保留负向流速) 下不被计入.
    let scan = Phantom::background().disc(CENTRE, 5.0, 3.0).scan("disc");
    let outcome = analyse(&scan, &config(Structure::SemiovalCentre));
    assert!(matches!(outcome, ScanOutcome::NoVessels(_)));

    let scan = Phantom::background().disc(CENTRE, 5.0, -3.0).scan("negative");
    let result = analyse(&scan, &config(Structure::SemiovalCentre))
        .into_result()
        .unwrap();
    assert_eq!(result.summary.included, 1);
    assert!(result.vessels[0].flags.vneg);
    assert!((result.stats.vmean - 3.0).abs() < 0.15);
}

#[test]
fn test_region_mask_limits_detection() {
    let scan = Phantom::background().disc(CENTRE, 5.0, 3.0).scan("disc");
    let mut region = full_region();
    region.slice_mut(ndarray::s![20..45, 20..45]).fill(false);
    let outcome = Pipeline::new(&scan, Some(&region), &config(Structure::BasalGanglia), RunMode::Batch)
        .unwrap()
        .run(&mut NoProgress)
        .unwrap();
    match outcome {
        ScanOutcome::NoVessels(summary) => {
            assert_eq!(summary.detected, 0);
            assert_eq!(summary.mask_pixels, SIZE * SIZE - 25 * 25);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_repeated_runs_agree() {
    let scan = Phantom::background()
        .disc(CENTRE, 5.0, 3.0)
        .pixel((12, 50), 2.5)
        .scan("repeat");
    let cfg = config(Structure::BasalGanglia);
    let a = analyse(&scan, &cfg).into_result().unwrap();
    let b = analyse(&scan, &cfg).into_result().unwrap();
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.vessels, b.vessels);
    assert_eq!(a.records, b.records);
    assert!((a.stats.vmean - b.stats.vmean).abs() < 1e-9);
    assert!((a.stats.pi_norm - b.stats.pi_norm).abs() < 1e-9);
}

#[test]
fn test_gaussian_background() {
    let scan = Phantom::background().disc(CENTRE, 5.0, 3.0).scan("disc");
    let mut cfg = config(Structure::BasalGanglia);
    cfg.gaussian_smoothing = true;
    let result = analyse(&scan, &cfg).into_result().unwrap();
    assert_eq!(result.summary.included, 1);
    assert_eq!(result.vessels[0].representative, CENTRE);
}

#[test]
fn test_progress_events() {
    let scan = Phantom::background().disc(CENTRE, 5.0, 3.0).scan("disc");
    let region = full_region();
    let cfg = config(Structure::BasalGanglia);
    let pipeline = Pipeline::new(&scan, Some(&region), &cfg, RunMode::Interactive).unwrap();
    let mut events = Vec::new();
    pipeline
        .run(&mut |p: u8, l: &str| events.push((p, l.to_string())))
        .unwrap();
    let labels: Vec<&str> = events.iter().map(|e| e.1.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "Calculating median images",
            "Finding significant vessels",
            "Analysing clusters",
            ""
        ]
    );
}

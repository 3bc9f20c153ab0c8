//! 程序运行函数.

use crate::profile::Profile;
use crate::result::AblationResult;
use log::warn;
use perf_berry::prelude::*;
use std::thread;
use utils::phantom::{self, Phantom};

/// 以 `cfg` 分析整个队列.
fn profile_with(label: &str, cohort: &[Phantom], cfg: &AnalysisConfig) -> Profile {
    let mut profile = Profile::new();
    for p in cohort {
        let scan = match p.scan() {
            Ok(scan) => scan,
            Err(e) => {
                warn!("{label}: cannot build `{}`: {e}", p.name);
                profile.count_failed();
                continue;
            }
        };
        let region = p.region();
        println!("{label}: {}...", p.name);

        profile.scan_start();
        let outcome = Pipeline::new(&scan, Some(&region), cfg, RunMode::Batch)
            .and_then(|pipeline| pipeline.run(&mut NoProgress));
        profile.scan_elapsed();

        match outcome {
            Ok(outcome) => profile.count_outcome(&outcome),
            Err(e) => {
                warn!("{label}: `{}` failed: {e}", p.name);
                profile.count_failed();
            }
        }
    }
    profile.finish()
}

/// 基底节的默认配置.
fn baseline() -> AnalysisConfig {
    AnalysisConfig::new(Structure::BasalGanglia)
}

fn no_perpendicularity() -> AnalysisConfig {
    let mut cfg = baseline();
    cfg.non_perp.remove_non_perp = false;
    cfg
}

fn no_dedup() -> AnalysisConfig {
    let mut cfg = baseline();
    cfg.dedup.deduplicate = false;
    cfg
}

fn no_ghosting() -> AnalysisConfig {
    let mut cfg = baseline();
    cfg.ghosting.do_ghosting = false;
    cfg
}

fn gaussian() -> AnalysisConfig {
    let mut cfg = baseline();
    cfg.gaussian_smoothing = true;
    cfg
}

/// 实际运行.
pub fn run() -> AblationResult {
    let cohort = phantom::cohort(phantom::cohort_size_from_env_or_default());
    let c = cohort.as_slice();

    // 短路判断
    assert!(
        c.first().is_some_and(|p| p.scan().is_ok()),
        "Building synthetic cohort error"
    );

    println!(
        "Running ablation studies on {} scans ({} cpus)...",
        c.len(),
        utils::cpus()
    );
    let labels = ["baseline", "no-perpendicularity", "no-dedup", "no-ghosting", "gaussian"];
    thread::scope(|s| {
        let handles = [baseline, no_perpendicularity, no_dedup, no_ghosting, gaussian]
            .into_iter()
            .zip(labels)
            .map(|(make, label)| {
                let cfg = make();
                s.spawn(move || profile_with(label, c, &cfg))
            })
            .collect::<Vec<_>>();

        AblationResult::from_iter(
            labels.into_iter().zip(
                handles
                    .into_iter()
                    .map(|th| th.join().expect("Thread joining error")),
            ),
        )
    })
}

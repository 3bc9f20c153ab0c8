//! 集成测试共用的合成扫描.
//!
//! 背景幅值 `100 ± 5`, 背景流速 `±0.05` cm/s, 均为确定性伪随机噪声.
//! 植入的血管幅值为 150, 无噪声, 流速在心动周期内以 ±25% 搏动.

#![allow(dead_code)]

use ndarray::Array3;
use perf_berry::prelude::*;
use std::f64::consts::PI;

pub const SIZE: usize = 64;
pub const PHASES: usize = 8;
pub const VENC: f64 = 10.0;

/// `medDiam = 10 mm` 对应 21 像素的背景滤波窗口.
pub const PIXEL_SPACING: f64 = 0.5;

pub const VESSEL_MAGNITUDE: f64 = 150.0;

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// `[-1, 1)` 上的确定性噪声.
fn noise(seed: u64, t: usize, r: usize, c: usize) -> f64 {
    let key = (seed << 56) ^ ((t as u64) << 32) ^ ((r as u64) << 16) ^ c as u64;
    let u = splitmix64(key) >> 11;
    u as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

/// 心动周期内的搏动因子.
pub fn pulse(t: usize) -> f64 {
    1.0 + 0.25 * (2.0 * PI * t as f64 / PHASES as f64).sin()
}

pub struct Phantom {
    velocity: Array3<f64>,
    magnitude: Array3<f64>,
}

impl Phantom {
    /// 只有噪声的背景.
    pub fn background() -> Self {
        let dim = (PHASES, SIZE, SIZE);
        Self {
            velocity: Array3::from_shape_fn(dim, |(t, r, c)| 0.05 * noise(1, t, r, c)),
            magnitude: Array3::from_shape_fn(dim, |(t, r, c)| 100.0 + 5.0 * noise(2, t, r, c)),
        }
    }

    /// 植入圆形血管. 流速剖面为 `peak * (1 - 0.5 * (d / radius)^2)`, 中心最大.
    pub fn disc(mut self, (cr, cc): Idx2d, radius: f64, peak: f64) -> Self {
        for r in 0..SIZE {
            for c in 0..SIZE {
                let d2 = (r as f64 - cr as f64).powi(2) + (c as f64 - cc as f64).powi(2);
                if d2 > radius * radius {
                    continue;
                }
                let profile = peak * (1.0 - 0.5 * d2 / (radius * radius));
                for t in 0..PHASES {
                    self.velocity[(t, r, c)] = profile * pulse(t);
                    self.magnitude[(t, r, c)] = VESSEL_MAGNITUDE;
                }
            }
        }
        self
    }

    /// 植入单像素血管.
    pub fn pixel(mut self, (r, c): Idx2d, peak: f64) -> Self {
        for t in 0..PHASES {
            self.velocity[(t, r, c)] = peak * pulse(t);
            self.magnitude[(t, r, c)] = VESSEL_MAGNITUDE;
        }
        self
    }

    /// 覆盖某一相位的流速.
    pub fn with_velocity(mut self, t: usize, (r, c): Idx2d, v: f64) -> Self {
        self.velocity[(t, r, c)] = v;
        self
    }

    pub fn scan(self, name: &str) -> FlowScan {
        let frames = FrameSeries::new(self.velocity, self.magnitude).unwrap();
        FlowScan::new(name, frames, ScanTags::new(VENC, PIXEL_SPACING)).unwrap()
    }
}

pub fn full_region() -> Mask2d {
    Mask2d::from_elem((SIZE, SIZE), true)
}

/// 关闭 ghosting 的默认配置.
pub fn config(structure: Structure) -> AnalysisConfig {
    let mut cfg = AnalysisConfig::new(structure);
    cfg.ghosting.do_ghosting = false;
    cfg
}

pub fn init_logger() {
    let _ = simple_logger::init_with_level(log::Level::Info);
}

/// 以批处理模式运行.
pub fn analyse(scan: &FlowScan, cfg: &AnalysisConfig) -> ScanOutcome {
    let region = full_region();
    Pipeline::new(scan, Some(&region), cfg, RunMode::Batch)
        .unwrap()
        .run(&mut NoProgress)
        .unwrap()
}

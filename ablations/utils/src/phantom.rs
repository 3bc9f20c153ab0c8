//! 合成相位对比扫描队列.
//!
//! 真实受试者数据无法随仓库分发, 消融实验在一组确定性的合成扫描上进行.
//! 每个扫描包含四类植入目标:
//!
//! 1. 单像素穿支血管;
//! 2. 小圆盘血管;
//! 3. 沿行方向拉长的非垂直血管;
//! 4. 相距 2~3 像素的成对血管 (应被去重).

use ndarray::{Array3, Axis};
use perf_berry::prelude::*;
use std::env;
use std::f64::consts::PI;

/// 图像边长.
pub const SIZE: usize = 96;

/// 心动周期相位数.
pub const PHASES: usize = 12;

/// 编码速度 (cm/s).
pub const VENC: f64 = 10.0;

/// 像素间距 (mm).
pub const PIXEL_SPACING: f64 = 0.5;

const BACKGROUND: f64 = 100.0;
const VESSEL: f64 = 150.0;

/// 默认队列大小.
pub const DEFAULT_COHORT_SIZE: usize = 16;

/// 获取合成队列大小.
///
/// 1. 若环境变量 `$PERF_BERRY_COHORT_SIZE` 可解析为正整数, 则返回其值;
/// 2. 否则, 返回 [`DEFAULT_COHORT_SIZE`].
pub fn cohort_size_from_env_or_default() -> usize {
    env::var("PERF_BERRY_COHORT_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_COHORT_SIZE)
}

/// splitmix64 伪随机数发生器.
#[derive(Clone, Debug)]
struct SplitMix(u64);

impl SplitMix {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// `[0, 1)` 上的均匀分布.
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// `[lo, hi)` 上的均匀分布.
    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.unit()
    }
}

/// 合成扫描中植入的目标.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Target {
    /// 单像素血管, 峰值流速.
    Pixel(Idx2d, f64),

    /// 圆盘血管: 中心, 半径, 峰值流速.
    Disc(Idx2d, f64, f64),

    /// 沿行方向拉长的椭圆: 中心, 行半轴, 列半轴, 峰值流速.
    Streak(Idx2d, f64, f64, f64),
}

impl Target {
    /// `(r, c)` 处的流速剖面系数. 不在目标内时为 `None`.
    fn profile(&self, (r, c): Idx2d) -> Option<f64> {
        let (r, c) = (r as f64, c as f64);
        let (centre, a, b, peak) = match *self {
            Self::Pixel(p, peak) => (p, 0.5, 0.5, peak),
            Self::Disc(p, radius, peak) => (p, radius, radius, peak),
            Self::Streak(p, a, b, peak) => (p, a, b, peak),
        };
        let d2 = ((r - centre.0 as f64) / a).powi(2) + ((c - centre.1 as f64) / b).powi(2);
        (d2 <= 1.0).then(|| peak * (1.0 - 0.5 * d2))
    }
}

/// 一个合成扫描.
#[derive(Clone, Debug)]
pub struct Phantom {
    /// 扫描名称.
    pub name: String,

    /// 植入的目标.
    pub targets: Vec<Target>,

    seed: u64,
}

impl Phantom {
    /// 以 `seed` 随机生成目标布局.
    ///
    /// 图像被划分为 4×4 个网格, 每个网格中心放置一个目标.
    pub fn random(name: String, seed: u64) -> Self {
        let mut rng = SplitMix(seed);
        let cell = SIZE / 4;
        let mut targets = Vec::new();
        for gr in 0..4 {
            for gc in 0..4 {
                let (r0, c0) = (gr * cell + cell / 2, gc * cell + cell / 2);
                let peak = rng.range(1.5, 4.0);
                let pick = rng.next_u64() % 4;
                let target = match pick {
                    0 => Target::Pixel((r0, c0), peak),
                    1 => Target::Disc((r0, c0), rng.range(1.5, 3.0), peak),
                    2 => Target::Streak((r0, c0), rng.range(4.0, 6.0), 1.2, peak),
                    _ => {
                        targets.push(Target::Pixel((r0, c0 + 3), peak * 0.8));
                        Target::Pixel((r0, c0), peak)
                    }
                };
                targets.push(target);
            }
        }
        Self {
            name,
            targets,
            seed,
        }
    }

    /// 生成扫描数据.
    pub fn scan(&self) -> AnalysisResult<FlowScan> {
        let mut rng = SplitMix(self.seed ^ 0xA5A5_A5A5);
        let dim = (PHASES, SIZE, SIZE);
        let mut velocity = Array3::from_shape_simple_fn(dim, || rng.range(-0.05, 0.05));
        let mut magnitude = Array3::from_shape_simple_fn(dim, || BACKGROUND + rng.range(-5.0, 5.0));

        for target in self.targets.iter() {
            for r in 0..SIZE {
                for c in 0..SIZE {
                    let Some(v) = target.profile((r, c)) else {
                        continue;
                    };
                    for (t, (mut vel, mut mag)) in velocity
                        .axis_iter_mut(Axis(0))
                        .zip(magnitude.axis_iter_mut(Axis(0)))
                        .enumerate()
                    {
                        vel[(r, c)] = v * pulse(t);
                        mag[(r, c)] = VESSEL;
                    }
                }
            }
        }

        let frames = FrameSeries::new(velocity, magnitude)?;
        FlowScan::new(&self.name, frames, ScanTags::new(VENC, PIXEL_SPACING))
    }

    /// 该扫描对应的全视野掩膜.
    pub fn region(&self) -> Mask2d {
        Mask2d::from_elem((SIZE, SIZE), true)
    }
}

/// 心动周期内的搏动因子.
#[inline]
pub fn pulse(t: usize) -> f64 {
    1.0 + 0.25 * (2.0 * PI * t as f64 / PHASES as f64).sin()
}

/// 合成队列.
pub fn cohort(n: usize) -> Vec<Phantom> {
    (0..n)
        .map(|i| Phantom::random(format!("phantom-{:03}", i + 1), 0x5EED + i as u64))
        .collect()
}

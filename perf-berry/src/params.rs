//! 血管参数与群体统计.
//!
//! 每根保留的血管以其代表体素的去背景流速曲线为准. 群体统计量:
//!
//! - `Vmean`: 各血管流速绝对值曲线的平均曲线再求均值;
//! - `PI_norm`: 各血管曲线先除以自身均值, 再求平均曲线, 取 `(max - min) / mean`;
//! - 标准误: `Vmean` 取逐血管均值的样本标准差除以 `sqrt(n)`; `PI_norm`
//!   取平均归一化曲线极大、极小相位处逐血管归一化值的标准误平方和开方.

use crate::cluster::Cluster;
use crate::config::ClusterSelection;
use crate::consts::{FlowDirection, MagnitudeClass};
use crate::filter::CandidateVessel;
use crate::preprocess::sample_std;
use crate::significance::{div0, SignificanceMasks, VesselFlags};
use crate::Idx2d;
use itertools::{Itertools, MinMaxResult};
use log::debug;
use ndarray::{Array1, ArrayView3};
use serde::{Deserialize, Serialize};

/// 一根检测到的血管.
#[derive(Debug, Clone, PartialEq)]
pub struct Vessel {
    /// 来源簇.
    pub cluster: Cluster,

    /// 代表体素.
    pub representative: Idx2d,

    /// 代表体素处的显著性标记.
    pub flags: VesselFlags,

    /// 代表体素处逐相位去背景流速 (带符号).
    pub velocity: Array1<f64>,

    /// 代表体素处逐相位幅值.
    pub magnitude: Array1<f64>,

    /// 代表体素所在幅值连通块编号.
    pub blob: i32,

    /// 椭圆长短轴之比.
    pub axes_ratio: f64,
}

impl Vessel {
    /// 由候选读取代表体素处的曲线与标记.
    pub fn from_candidate(
        cand: CandidateVessel,
        corrected: ArrayView3<f64>,
        magnitude: ArrayView3<f64>,
        masks: &SignificanceMasks,
    ) -> Self {
        let (r, c) = cand.representative;
        Self {
            flags: masks.flags_at(cand.representative),
            velocity: corrected.slice(ndarray::s![.., r, c]).to_owned(),
            magnitude: magnitude.slice(ndarray::s![.., r, c]).to_owned(),
            representative: cand.representative,
            blob: cand.blob,
            axes_ratio: cand.axes_ratio,
            cluster: cand.cluster,
        }
    }

    /// 流速绝对值曲线.
    pub fn speed(&self) -> Array1<f64> {
        self.velocity.mapv(f64::abs)
    }

    /// 任一相位流速绝对值超过编码流速.
    pub fn exceeds_venc(&self, venc: f64) -> bool {
        self.velocity.iter().any(|v| v.abs() > venc)
    }

    /// 流速绝对值的 (均值, 最小值, 最大值).
    pub fn speed_stats(&self) -> (f64, f64, f64) {
        let speed = self.speed();
        let mean = speed.mean().unwrap_or(0.0);
        match speed.iter().copied().minmax_by(f64::total_cmp) {
            MinMaxResult::NoElements => (mean, 0.0, 0.0),
            MinMaxResult::OneElement(v) => (mean, v, v),
            MinMaxResult::MinMax(lo, hi) => (mean, lo, hi),
        }
    }

    /// 单根血管的搏动指数 `|(max - min) / mean|`.
    pub fn pulsatility_index(&self) -> f64 {
        let (mean, lo, hi) = self.speed_stats();
        div0(hi - lo, mean).abs()
    }

    /// 幅值均值.
    pub fn mean_magnitude(&self) -> f64 {
        self.magnitude.mean().unwrap_or(0.0)
    }

    /// 幅值样本标准差.
    pub fn std_magnitude(&self) -> f64 {
        sample_std(self.magnitude.iter().copied())
    }
}

/// 代表体素的标记是否满足结构要求: 至少一个被选流向且至少一个被选幅值类别.
pub fn admits(selection: &ClusterSelection, flags: &VesselFlags) -> bool {
    let flow = FlowDirection::ALL
        .into_iter()
        .any(|f| selection.allows_flow(f) && flags.has_flow(f));
    let mag = MagnitudeClass::ALL
        .into_iter()
        .any(|m| selection.allows_magnitude(m) && flags.has_magnitude(m));
    flow && mag
}

/// 参数计算前的筛选结果.
#[derive(Debug, Clone, Default)]
pub struct Inclusion {
    /// 纳入统计的血管.
    pub included: Vec<Vessel>,

    /// 因流速超过编码流速而剔除的个数.
    pub encoding_violations: usize,

    /// 标记不满足结构要求而剔除的个数.
    pub rejected_by_flags: usize,
}

/// 先剔除流速混叠 (超过 venc) 的血管, 再按结构要求筛选.
pub fn include(vessels: Vec<Vessel>, selection: &ClusterSelection, venc: f64) -> Inclusion {
    let mut out = Inclusion::default();
    for v in vessels {
        if v.exceeds_venc(venc) {
            debug!(
                "vessel at {:?} exceeds venc {venc} and is excluded",
                v.representative
            );
            out.encoding_violations += 1;
        } else if !admits(selection, &v.flags) {
            out.rejected_by_flags += 1;
        } else {
            out.included.push(v);
        }
    }
    out
}

/// 群体统计量.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    /// 血管个数.
    pub n: usize,

    /// 平均流速 (cm/s).
    pub vmean: f64,

    /// 归一化搏动指数.
    pub pi_norm: f64,

    /// `vmean` 的标准误. 少于两根血管时无定义.
    pub vmean_sem: Option<f64>,

    /// `pi_norm` 的标准误. 少于两根血管时无定义.
    pub pi_norm_sem: Option<f64>,

    /// 平均流速曲线.
    pub mean_curve: Vec<f64>,

    /// 平均归一化流速曲线.
    pub norm_curve: Vec<f64>,
}

/// 计算群体统计量. 无血管时返回 `None`.
pub fn cohort_stats(vessels: &[Vessel]) -> Option<CohortStats> {
    let n = vessels.len();
    let first = vessels.first()?;
    let phases = first.velocity.len();

    let speeds: Vec<Array1<f64>> = vessels.iter().map(Vessel::speed).collect();
    let per_vessel_mean: Vec<f64> = speeds.iter().map(|s| s.mean().unwrap_or(0.0)).collect();
    let normalized: Vec<Array1<f64>> = speeds
        .iter()
        .zip(per_vessel_mean.iter())
        .map(|(s, &m)| s.mapv(|v| div0(v, m)))
        .collect();

    let mut mean_curve = Array1::zeros(phases);
    let mut norm_curve = Array1::zeros(phases);
    for (s, z) in speeds.iter().zip(normalized.iter()) {
        mean_curve += s;
        norm_curve += z;
    }
    mean_curve /= n as f64;
    norm_curve /= n as f64;

    let vmean = mean_curve.mean().unwrap_or(0.0);
    // 并列时取第一个极值相位.
    let (mut imin, mut imax) = (0, 0);
    for (i, &v) in norm_curve.iter().enumerate() {
        if v < norm_curve[imin] {
            imin = i;
        }
        if v > norm_curve[imax] {
            imax = i;
        }
    }
    let norm_mean = norm_curve.mean().unwrap_or(0.0);
    let pi_norm = div0(norm_curve[imax] - norm_curve[imin], norm_mean);

    let (vmean_sem, pi_norm_sem) = if n >= 2 {
        let root_n = (n as f64).sqrt();
        let sem_v = sample_std(per_vessel_mean.iter().copied()) / root_n;
        let at = |i: usize| sample_std(normalized.iter().map(|z| z[i])) / root_n;
        (Some(sem_v), Some(at(imax).hypot(at(imin))))
    } else {
        (None, None)
    };

    Some(CohortStats {
        n,
        vmean,
        pi_norm,
        vmean_sem,
        pi_norm_sem,
        mean_curve: mean_curve.to_vec(),
        norm_curve: norm_curve.to_vec(),
    })
}

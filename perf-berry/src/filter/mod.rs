//! 簇筛选: 垂直度与去重.

mod dedup;
mod shape;

pub use dedup::{deduplicate, Deduplicated};
pub use shape::{axes_ratio, ellipse_axes, scaled_magnitude, split_perpendicular, ShapeSplit};

use crate::cluster::Cluster;
use crate::Idx2d;
use ndarray::{Array2, ArrayView2};

/// 待筛选的血管候选, 即一个簇及其代表体素.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateVessel {
    /// 来源簇.
    pub cluster: Cluster,

    /// 代表体素: 簇内时间平均去背景流速绝对值最大的像素 (并列时取行优先的第一个).
    pub representative: Idx2d,

    /// 代表体素处的时间平均去背景流速绝对值.
    pub peak_velocity: f64,

    /// 代表体素所在的幅值连通块编号, 0 代表不在任何块内.
    pub blob: i32,

    /// 椭圆长短轴之比. 未做垂直度分析时为 1.
    pub axes_ratio: f64,
}

impl CandidateVessel {
    /// 由簇与时间平均去背景流速创建.
    pub fn new(cluster: Cluster, mean_corrected: ArrayView2<f64>, blob_map: &Array2<i32>) -> Self {
        let mut representative = cluster.pixels()[0];
        let mut peak_velocity = mean_corrected[representative].abs();
        for &p in cluster.pixels().iter().skip(1) {
            let v = mean_corrected[p].abs();
            if v > peak_velocity {
                representative = p;
                peak_velocity = v;
            }
        }
        Self {
            blob: blob_map[representative],
            cluster,
            representative,
            peak_velocity,
            axes_ratio: 1.0,
        }
    }

    /// 两个代表体素之间的欧氏距离.
    pub fn distance(&self, other: &Self) -> f64 {
        let (r0, c0) = self.representative;
        let (r1, c1) = other.representative;
        (r0 as f64 - r1 as f64).hypot(c0 as f64 - c1 as f64)
    }
}

/// 对所有簇建立候选.
pub fn candidates<I: IntoIterator<Item = Cluster>>(
    clusters: I,
    mean_corrected: ArrayView2<f64>,
    blob_map: &Array2<i32>,
) -> Vec<CandidateVessel> {
    clusters
        .into_iter()
        .map(|c| CandidateVessel::new(c, mean_corrected, blob_map))
        .collect()
}

//! 垂直度分析.
//!
//! 与成像平面垂直的穿支血管在平均幅值图上呈圆形亮斑, 斜行血管则呈拉长的椭圆.
//! 在簇中心附近的窗口内按幅值阈值分割, 以二阶中心矩拟合椭圆, 长短轴之比超过阈值的簇被剔除.

use super::CandidateVessel;
use crate::config::NonPerpParams;
use crate::data::areas::areas8;
use crate::{Idx2d, Idx2dF};
use log::debug;
use ndarray::{s, Array2, ArrayView2, ArrayView3};

/// 将平均幅值线性缩放到 `[0, 1]`.
///
/// 下界为 `mean - min_scaling * std`, 上界为 `mean + max_scaling * std`,
/// 均值与总体标准差取自全部幅值帧.
pub fn scaled_magnitude(
    magnitude: ArrayView3<f64>,
    mean_magnitude: ArrayView2<f64>,
    min_scaling: f64,
    max_scaling: f64,
) -> Array2<f64> {
    let mean = magnitude.mean().unwrap_or(0.0);
    let std = magnitude.std(0.0);
    let lo = mean - min_scaling * std;
    let span = (max_scaling + min_scaling) * std;
    mean_magnitude.mapv(|m| {
        let v = (m - lo) / span;
        if v.is_finite() {
            v.clamp(0.0, 1.0)
        } else {
            0.0
        }
    })
}

/// 以二阶中心矩拟合的椭圆 `(长轴, 短轴)`, 轴长为 `4 * sqrt(特征值)`.
///
/// 每个像素视为单位面积的方块, 两个方向的方差各加上 `1 / 12`.
pub fn ellipse_axes(area: &[Idx2d]) -> (f64, f64) {
    if area.is_empty() {
        return (0.0, 0.0);
    }
    let n = area.len() as f64;
    let (mr, mc) = area
        .iter()
        .fold((0.0, 0.0), |(a, b), &(r, c)| (a + r as f64, b + c as f64));
    let (mr, mc) = (mr / n, mc / n);
    let (mut rr, mut cc, mut rc) = (0.0, 0.0, 0.0);
    for &(r, c) in area {
        let (dr, dc) = (r as f64 - mr, c as f64 - mc);
        rr += dr * dr;
        cc += dc * dc;
        rc += dr * dc;
    }
    const PIXEL_VAR: f64 = 1.0 / 12.0;
    let (rr, cc, rc) = (rr / n + PIXEL_VAR, cc / n + PIXEL_VAR, rc / n);

    let half_trace = (rr + cc) / 2.0;
    let delta = (((rr - cc) / 2.0).powi(2) + rc * rc).sqrt();
    let l1 = (half_trace + delta).max(0.0);
    let l2 = (half_trace - delta).max(0.0);
    (4.0 * l1.sqrt(), 4.0 * l2.sqrt())
}

/// 长短轴之比. 短轴为 0 时为无穷大, 两轴均为 0 (空区域) 时为 1.
fn ratio_of((major, minor): (f64, f64)) -> f64 {
    const EPS: f64 = 1e-9;
    if minor > EPS {
        major / minor
    } else if major > EPS {
        f64::INFINITY
    } else {
        1.0
    }
}

#[inline]
fn dist2((a, b): Idx2dF, (c, d): Idx2dF) -> f64 {
    (a - c).powi(2) + (b - d).powi(2)
}

/// 候选的长短轴之比. 不超过两个像素的簇总是返回 1.
pub fn axes_ratio(cand: &CandidateVessel, scaled: ArrayView2<f64>, params: &NonPerpParams) -> f64 {
    if cand.cluster.len() <= 2 {
        return 1.0;
    }
    let (height, width) = scaled.dim();
    let (mr, mc) = cand.cluster.centroid();
    let centre = ((mr + 0.5) as usize, (mc + 0.5) as usize);
    let centre = (centre.0.min(height - 1), centre.1.min(width - 1));

    let ws = params.window_size;
    let (top, left) = (centre.0.saturating_sub(ws), centre.1.saturating_sub(ws));
    let (bottom, right) = ((centre.0 + ws).min(height), (centre.1 + ws).min(width));
    let window = scaled.slice(s![top..bottom, left..right]);

    let threshold = scaled[centre] * params.magnitude_thresh;
    let bright = window.mapv(|v| v >= threshold);
    let local_centre = ((centre.0 - top) as f64, (centre.1 - left) as f64);

    let nearest = areas8(bright.view())
        .into_iter()
        .filter_map(|a| {
            let c = crate::data::areas::centroid(&a)?;
            Some((dist2(c, local_centre), a))
        })
        .min_by(|x, y| x.0.total_cmp(&y.0));

    match nearest {
        Some((_, area)) => ratio_of(ellipse_axes(&area)),
        None => 1.0,
    }
}

/// 垂直度筛选结果.
#[derive(Debug, Clone, Default)]
pub struct ShapeSplit {
    /// 通过筛选.
    pub perpendicular: Vec<CandidateVessel>,

    /// 被剔除.
    pub non_perpendicular: Vec<CandidateVessel>,
}

/// 计算每个候选的长短轴之比并按阈值划分. `params.remove_non_perp` 为假时全部通过.
pub fn split_perpendicular(
    candidates: Vec<CandidateVessel>,
    scaled: ArrayView2<f64>,
    params: &NonPerpParams,
) -> ShapeSplit {
    let mut split = ShapeSplit::default();
    if !params.remove_non_perp {
        split.perpendicular = candidates;
        return split;
    }
    for mut cand in candidates {
        cand.axes_ratio = axes_ratio(&cand, scaled, params);
        if cand.axes_ratio > params.ratio_thresh {
            debug!(
                "cluster at {:?} rejected with axes ratio {:.3}",
                cand.representative, cand.axes_ratio
            );
            split.non_perpendicular.push(cand);
        } else {
            split.perpendicular.push(cand);
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::consts::{FlowDirection, MagnitudeClass};
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn cand(pixels: Vec<Idx2d>) -> CandidateVessel {
        let cluster = Cluster::new(pixels, FlowDirection::Positive, MagnitudeClass::Positive);
        CandidateVessel {
            representative: cluster.pixels()[0],
            cluster,
            peak_velocity: 1.0,
            blob: 0,
            axes_ratio: 1.0,
        }
    }

    #[test]
    fn test_ellipse_axes() {
        // 3 * 3 方块: 各向同性, 方差 2/3 + 1/12.
        let square: Vec<Idx2d> = (0..3).flat_map(|r| (0..3).map(move |c| (r, c))).collect();
        let (a, b) = ellipse_axes(&square);
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        assert_abs_diff_eq!(a, 4.0 * 0.75f64.sqrt(), epsilon = 1e-12);

        assert_eq!(ratio_of(ellipse_axes(&[])), 1.0);
        assert_eq!(ratio_of((2.0, 0.0)), f64::INFINITY);
    }

    #[test]
    fn test_thin_line_has_finite_ratio() {
        // 单像素宽的线段短轴不为 0: 1 * 5 线段方差为 (1/12, 2 + 1/12), 轴比为 5.
        let line: Vec<Idx2d> = (0..5).map(|c| (2, c)).collect();
        let (a, b) = ellipse_axes(&line);
        assert_abs_diff_eq!(a, 4.0 * (25.0f64 / 12.0).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(b, 4.0 * (1.0f64 / 12.0).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(ratio_of((a, b)), 5.0, epsilon = 1e-12);

        // 单像素: 圆形.
        let (a, b) = ellipse_axes(&[(1, 1)]);
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        assert_abs_diff_eq!(ratio_of((a, b)), 1.0, epsilon = 1e-12);

        // 1 * 2 短段: 轴比 2, 恰好不超过默认阈值.
        assert_abs_diff_eq!(ratio_of(ellipse_axes(&[(0, 0), (0, 1)])), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_magnitude() {
        let frames = Array3::from_shape_fn((2, 2, 2), |(t, r, _)| (t + 2 * r) as f64);
        // 全部帧: [0, 0, 2, 2, 1, 1, 3, 3], 均值 1.5, 总体标准差 sqrt(1.25).
        let mean_img = ndarray::arr2(&[[-100.0, 1.5], [100.0, 1.5]]);
        let s = scaled_magnitude(frames.view(), mean_img.view(), 1.0, 3.0);
        assert_eq!(s[(0, 0)], 0.0);
        assert_eq!(s[(1, 0)], 1.0);
        assert_abs_diff_eq!(s[(0, 1)], 0.25, epsilon = 1e-12);
    }

    fn disc_image(ry: f64, rx: f64) -> (Array2<f64>, Vec<Idx2d>) {
        let img = Array2::from_shape_fn((40, 40), |(r, c)| {
            let (dy, dx) = ((r as f64 - 20.0) / ry, (c as f64 - 20.0) / rx);
            if dy * dy + dx * dx <= 1.0 {
                1.0
            } else {
                0.1
            }
        });
        let pixels = img
            .indexed_iter()
            .filter_map(|(p, &v)| (v == 1.0).then_some(p))
            .collect();
        (img, pixels)
    }

    #[test]
    fn test_round_blob_is_perpendicular() {
        let (img, pixels) = disc_image(3.0, 3.0);
        let params = NonPerpParams::default();
        let c = cand(pixels);
        let r = axes_ratio(&c, img.view(), &params);
        assert!(r < 1.2, "ratio {r}");
    }

    #[test]
    fn test_elongated_blob_is_rejected() {
        let (img, pixels) = disc_image(1.0, 6.0);
        let params = NonPerpParams::default();
        let split = split_perpendicular(vec![cand(pixels)], img.view(), &params);
        assert!(split.perpendicular.is_empty());
        assert_eq!(split.non_perpendicular.len(), 1);
        assert!(split.non_perpendicular[0].axes_ratio > params.ratio_thresh);
    }

    #[test]
    fn test_small_clusters_pass() {
        let img = Array2::zeros((10, 10));
        let params = NonPerpParams::default();
        let split = split_perpendicular(
            vec![cand(vec![(4, 4)]), cand(vec![(6, 6), (6, 7)])],
            img.view(),
            &params,
        );
        assert_eq!(split.perpendicular.len(), 2);
        assert!(split.perpendicular.iter().all(|c| c.axes_ratio == 1.0));
    }

    #[test]
    fn test_disabled_keeps_all() {
        let (img, pixels) = disc_image(1.0, 6.0);
        let params = NonPerpParams {
            remove_non_perp: false,
            ..Default::default()
        };
        let split = split_perpendicular(vec![cand(pixels)], img.view(), &params);
        assert_eq!(split.perpendicular.len(), 1);
    }
}

//! 掩膜精化.
//!
//! 1. 过零点: 去背景流速在相位间改变符号的像素不可能是稳定单向血流, 从所有显著性掩膜中剔除;
//! 2. 伪影 (ghosting): 亮血管沿相位编码方向产生伪影, 在其外接矩形外扩的排除区内不做检测;
//! 3. 脑外缘: 可选地以 Otsu 阈值 + 腐蚀去掉脑外缘带.
//!
//! 最终感兴趣区为 `region ∧ ¬ghost ∧ outer`.

use crate::config::{AnalysisConfig, GhostingParams};
use crate::data::areas::{and, and_not, areas8, bounding_box};
use crate::preprocess::Backgrounds;
use crate::significance::{NoiseModel, SignificanceMasks};
use crate::Mask2d;
use log::debug;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Zip};
use ordered_float::OrderedFloat;

/// 精化过程的中间结果.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// 最终感兴趣区.
    pub region: Mask2d,

    /// 伪影排除区.
    pub ghosting: Mask2d,

    /// 脑外缘保留区. 未启用时全为 `true`.
    pub outer_band: Mask2d,

    /// 过零点像素.
    pub zero_crossings: Mask2d,
}

/// 去背景流速在相位间符号 (-1/0/1) 发生变化的像素.
pub fn zero_crossings(corrected: ArrayView3<f64>) -> Mask2d {
    #[inline]
    fn sign(v: f64) -> i8 {
        if v > 0.0 {
            1
        } else if v < 0.0 {
            -1
        } else {
            0
        }
    }

    let (_, h, w) = corrected.dim();
    let mut out = Mask2d::from_elem((h, w), false);
    Zip::from(&mut out)
        .and(corrected.lanes(Axis(0)))
        .for_each(|o, trace| {
            let first = sign(trace[0]);
            *o = trace.iter().any(|&v| sign(v) != first);
        });
    out
}

/// numpy 风格线性插值百分位数, `q` 取 `0..=100`. 空输入返回 `None`.
pub fn percentile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by_key(|&v| OrderedFloat(v));
    let pos = (q / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

/// 亮血管伪影排除区.
pub fn ghosting_mask(
    mean_magnitude: ArrayView2<f64>,
    median_magnitude: ArrayView2<f64>,
    params: &GhostingParams,
) -> Mask2d {
    let shape = mean_magnitude.dim();
    let mut ghost = Mask2d::from_elem(shape, false);
    if !params.do_ghosting {
        return ghost;
    }

    let diff = &mean_magnitude - &median_magnitude;
    let mut nonzero: Vec<f64> = diff.iter().filter(|&&v| v != 0.0).map(|v| v.abs()).collect();
    let Some(threshold) = percentile(&mut nonzero, params.bright_vessel_perc * 100.0) else {
        return ghost;
    };
    let bright = diff.mapv(|v| v.abs() > threshold);

    let (height, width) = shape;
    for area in areas8(bright.view()) {
        let size = area.len();
        if size <= params.no_vessel_thresh {
            continue;
        }
        let (ex, ey) = if size <= params.small_vessel_thresh {
            (params.small_vessel_excl_x, params.small_vessel_excl_y)
        } else {
            (params.large_vessel_excl_x, params.large_vessel_excl_y)
        };
        let Some((top, left, bottom, right)) = bounding_box(&area) else {
            continue;
        };
        let rows = top.saturating_sub(ey)..(bottom + ey).min(height);
        let cols = left.saturating_sub(ex)..(right + ex).min(width);
        debug!("ghosting zone rows {rows:?} cols {cols:?} around {size} bright pixels");
        for r in rows {
            for c in cols.clone() {
                ghost[(r, c)] = true;
            }
        }
    }
    ghost
}

/// 8-bit 图像上的 Otsu 阈值. 像素值 `> threshold` 为前景.
pub fn otsu_threshold(img: ArrayView2<u8>) -> u8 {
    let mut histogram = [0u64; 256];
    for &p in img.iter() {
        histogram[p as usize] += 1;
    }
    let total = img.len() as f64;
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = 0.0;
    let mut threshold = 0u8;
    for (i, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }
        sum_b += i as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);
        if variance > max_variance {
            max_variance = variance;
            threshold = i as u8;
        }
    }
    threshold
}

/// `k * k` 矩形结构元腐蚀, 锚点为 `(k / 2, k / 2)`. 图像外的像素不参与腐蚀.
pub fn erode(mask: &Mask2d, k: usize) -> Mask2d {
    if k <= 1 {
        return mask.clone();
    }
    let (height, width) = mask.dim();
    let before = k / 2;
    let after = k - 1 - before;

    // 矩形结构元可分离: 先行后列.
    let rows = Array2::from_shape_fn((height, width), |(h, w)| {
        let lo = w.saturating_sub(before);
        let hi = (w + after).min(width - 1);
        (lo..=hi).all(|x| mask[(h, x)])
    });
    Array2::from_shape_fn((height, width), |(h, w)| {
        let lo = h.saturating_sub(before);
        let hi = (h + after).min(height - 1);
        (lo..=hi).all(|y| rows[(y, w)])
    })
}

/// 脑外缘保留区. `enabled` 为假时全部保留.
///
/// 背景幅值以饱和方式转换为 8-bit 后做 Otsu 二值化, 再以 `band * band` 腐蚀.
pub fn outer_band_mask(median_magnitude: ArrayView2<f64>, enabled: bool, band: usize) -> Mask2d {
    if !enabled {
        return Mask2d::from_elem(median_magnitude.dim(), true);
    }
    let img = median_magnitude.mapv(|v| v as u8);
    let t = otsu_threshold(img.view());
    let head = img.mapv(|v| v > t);
    erode(&head, band)
}

/// `region ∧ ¬ghost ∧ outer`.
pub fn combine_region(region: &Mask2d, ghost: &Mask2d, outer: &Mask2d) -> Mask2d {
    and(&and_not(region, ghost), outer)
}

/// 执行全部精化步骤, 并将结果作用到显著性掩膜上.
pub fn refine(
    region: &Mask2d,
    noise: &NoiseModel,
    bg: &Backgrounds,
    masks: &mut SignificanceMasks,
    config: &AnalysisConfig,
) -> Refinement {
    let zero_crossings = zero_crossings(noise.corrected_velocity.view());
    let ghosting = ghosting_mask(
        bg.mean_magnitude.view(),
        bg.median_magnitude.view(),
        &config.ghosting,
    );
    let outer_band = outer_band_mask(
        bg.median_magnitude.view(),
        config.ignore_outer_band,
        config.outer_band_width,
    );
    let region = combine_region(region, &ghosting, &outer_band);

    masks.retain(&region);
    let keep = zero_crossings.mapv(|z| !z);
    masks.retain(&keep);

    Refinement {
        region,
        ghosting,
        outer_band,
        zero_crossings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};

    #[test]
    fn test_zero_crossings() {
        let mut v = Array3::from_elem((4, 2, 2), 1.0);
        v[(2, 0, 0)] = -0.5;
        v[(1, 0, 1)] = 0.0;
        v.slice_mut(ndarray::s![.., 1, 1]).fill(-2.0);
        let z = zero_crossings(v.view());
        assert_eq!(z, arr2(&[[true, true], [false, false]]));
    }

    #[test]
    fn test_percentile() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&mut v, 50.0), Some(2.5));
        assert_eq!(percentile(&mut v, 100.0), Some(4.0));
        assert_eq!(percentile(&mut v, 0.0), Some(1.0));
        // pos = 0.997 * 3 = 2.991
        let p = percentile(&mut v, 99.7).unwrap();
        assert!((p - 3.991).abs() < 1e-12);
        assert_eq!(percentile(&mut [], 50.0), None);
    }

    fn bright_blob(size: usize) -> (Array2<f64>, Array2<f64>) {
        let mut mean = Array2::from_shape_fn((100, 40), |(r, c)| 1.0 + ((r * 7 + c * 3) % 5) as f64 * 0.1);
        let median = Array2::zeros((100, 40));
        for i in 0..size {
            mean[(50 + i / 4, 20 + i % 4)] = 100.0;
        }
        (mean, median)
    }

    #[test]
    fn test_ghosting_small_vessel() {
        let (mean, median) = bright_blob(8);
        let params = GhostingParams {
            bright_vessel_perc: 0.99,
            ..Default::default()
        };
        let g = ghosting_mask(mean.view(), median.view(), &params);
        // 亮区 rows 50..=51, cols 20..=23; 外扩 Y = 40, X = 3.
        assert!(g[(10, 17)]);
        assert!(!g[(9, 17)]);
        assert!(g[(90, 25)]);
        assert!(!g[(91, 25)]);
        assert!(!g[(50, 16)]);
        assert!(!g[(50, 26)]);
    }

    #[test]
    fn test_ghosting_large_vessel() {
        let (mean, median) = bright_blob(24);
        let params = GhostingParams {
            bright_vessel_perc: 0.99,
            ..Default::default()
        };
        let g = ghosting_mask(mean.view(), median.view(), &params);
        // 亮区 rows 50..=55; 外扩 Y = 70 后覆盖全部行, X = 5.
        assert!(g[(0, 15)] && g[(99, 27)]);
        assert!(!g[(0, 14)] && !g[(0, 28)]);
    }

    #[test]
    fn test_ghosting_ignores_tiny() {
        let (mean, median) = bright_blob(3);
        let params = GhostingParams {
            bright_vessel_perc: 0.99,
            ..Default::default()
        };
        let g = ghosting_mask(mean.view(), median.view(), &params);
        assert!(!g.iter().any(|&v| v));

        let off = GhostingParams {
            do_ghosting: false,
            ..Default::default()
        };
        let (mean, median) = bright_blob(24);
        assert!(!ghosting_mask(mean.view(), median.view(), &off).iter().any(|&v| v));
    }

    #[test]
    fn test_otsu() {
        let img = Array2::from_shape_fn((10, 10), |(r, _)| if r < 5 { 20u8 } else { 200u8 });
        let t = otsu_threshold(img.view());
        assert!((20..200).contains(&t));
        let uniform = Array2::from_elem((4, 4), 7u8);
        assert_eq!(otsu_threshold(uniform.view()), 0);
    }

    #[test]
    fn test_erode() {
        let mut m = Mask2d::from_elem((7, 7), true);
        m[(3, 3)] = false;
        let e = erode(&m, 3);
        assert!(!e[(2, 2)] && !e[(4, 4)] && !e[(3, 3)]);
        assert!(e[(1, 1)] && e[(5, 5)]);
        // 图像边界不腐蚀.
        assert!(e[(0, 0)] && e[(6, 6)]);
    }

    #[test]
    fn test_erode_even_kernel() {
        let mut m = Mask2d::from_elem((6, 6), true);
        m[(3, 3)] = false;
        // k = 2: 锚点 1, 窗口为 [x - 1, x].
        let e = erode(&m, 2);
        assert!(!e[(3, 3)] && !e[(4, 4)] && !e[(3, 4)]);
        assert!(e[(2, 2)]);
    }

    #[test]
    fn test_outer_band() {
        let img = Array2::from_shape_fn((20, 20), |(r, c)| {
            if (4..16).contains(&r) && (4..16).contains(&c) {
                150.0
            } else {
                5.0
            }
        });
        assert!(outer_band_mask(img.view(), false, 5).iter().all(|&v| v));
        let band = outer_band_mask(img.view(), true, 5);
        assert!(band[(10, 10)]);
        assert!(!band[(5, 5)]);
        assert!(!band[(0, 0)]);
    }

    #[test]
    fn test_combine_region() {
        let region = arr2(&[[true, true, true], [true, true, false]]);
        let ghost = arr2(&[[false, true, false], [false, false, false]]);
        let outer = arr2(&[[true, true, false], [true, true, true]]);
        let r = combine_region(&region, &ghost, &outer);
        assert_eq!(r, arr2(&[[true, false, false], [true, true, false]]));
    }
}

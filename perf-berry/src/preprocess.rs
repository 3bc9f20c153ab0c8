//! 背景估计与复数噪声图.
//!
//! 1. 时间平均流速/幅值;
//! 2. 相位 `v * π / venc` 与幅值组成复数信号, 实部与虚部各自的时间标准差 (ddof = 1)
//!   合成均方根噪声;
//! 3. 对三张图做 `d * d` 中值滤波 (零填充), 或以 `σ = int(d / 2.355)` 做高斯平滑
//!   (反射边界), 得到背景流速、背景幅值与背景噪声.

use crate::consts::{GAUSSIAN_FWHM, GAUSSIAN_TRUNCATE};
use crate::{FrameSeries, Idx2d};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use num::complex::Complex64;
use ordered_float::OrderedFloat;
use std::f64::consts::PI;

/// 背景平滑方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Smoothing {
    /// `d * d` 中值滤波.
    Median(usize),

    /// 高斯平滑, 由直径推出标准差.
    Gaussian(usize),
}

impl Smoothing {
    /// 由配置项选择平滑方式.
    #[inline]
    pub fn new(diameter: usize, gaussian: bool) -> Self {
        if gaussian {
            Self::Gaussian(diameter)
        } else {
            Self::Median(diameter)
        }
    }

    /// 对 `img` 做平滑.
    pub fn apply(&self, img: ArrayView2<f64>) -> Array2<f64> {
        match *self {
            Self::Median(d) => median_filter(img, d),
            Self::Gaussian(d) => gaussian_filter(img, (d as f64 / GAUSSIAN_FWHM).floor()),
        }
    }
}

/// 背景估计结果.
#[derive(Debug, Clone)]
pub struct Backgrounds {
    /// 时间平均流速.
    pub mean_velocity: Array2<f64>,

    /// 时间平均幅值.
    pub mean_magnitude: Array2<f64>,

    /// 背景流速.
    pub median_velocity: Array2<f64>,

    /// 背景幅值.
    pub median_magnitude: Array2<f64>,

    /// 平滑后的复数噪声图.
    pub noise: Array2<f64>,
}

/// 计算三张背景图.
pub fn estimate(frames: &FrameSeries, venc: f64, smoothing: Smoothing) -> Backgrounds {
    let mean_velocity = frames.mean_velocity();
    let mean_magnitude = frames.mean_magnitude();
    let rms = complex_noise(frames, venc);

    Backgrounds {
        median_velocity: smoothing.apply(mean_velocity.view()),
        median_magnitude: smoothing.apply(mean_magnitude.view()),
        noise: smoothing.apply(rms.view()),
        mean_velocity,
        mean_magnitude,
    }
}

/// 样本标准差 (ddof = 1). 少于两个样本时为 0.
pub(crate) fn sample_std<I: IntoIterator<Item = f64>>(it: I) -> f64 {
    use statrs::statistics::Statistics;

    let v: Vec<f64> = it.into_iter().collect();
    if v.len() < 2 {
        return 0.0;
    }
    v.std_dev()
}

/// 逐像素复数信号实部、虚部时间标准差的平方和开方.
pub fn complex_noise(frames: &FrameSeries, venc: f64) -> Array2<f64> {
    let mut out = Array2::zeros(frames.shape());
    let velocity = frames.velocity();
    let magnitude = frames.magnitude();

    let pixel = |v: ArrayView1<f64>, m: ArrayView1<f64>| -> f64 {
        let signal: Array1<Complex64> = Zip::from(&v)
            .and(&m)
            .map_collect(|&v, &m| Complex64::from_polar(m, v * PI / venc));
        let re = sample_std(signal.iter().map(|c| c.re));
        let im = sample_std(signal.iter().map(|c| c.im));
        re.hypot(im)
    };

    let zip = Zip::from(&mut out)
        .and(velocity.lanes(Axis(0)))
        .and(magnitude.lanes(Axis(0)));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            zip.par_for_each(|o, v, m| *o = pixel(v, m));
        } else {
            zip.for_each(|o, v, m| *o = pixel(v, m));
        }
    }
    out
}

/// `d * d` 中值滤波, 越界部分以 0 填充. `d` 为偶数时按 `d + 1` 处理.
pub fn median_filter(img: ArrayView2<f64>, d: usize) -> Array2<f64> {
    let r = d / 2;
    let mut out = Array2::zeros(img.dim());
    let zip = Zip::indexed(&mut out);
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            zip.par_for_each(|pos, o| *o = median_at(img, pos, r));
        } else {
            zip.for_each(|pos, o| *o = median_at(img, pos, r));
        }
    }
    out
}

fn median_at(img: ArrayView2<f64>, (h, w): Idx2d, r: usize) -> f64 {
    let (height, width) = img.dim();
    let side = 2 * r + 1;
    let mut window = Vec::with_capacity(side * side);
    for dh in 0..side {
        for dw in 0..side {
            let (y, x) = ((h + dh).wrapping_sub(r), (w + dw).wrapping_sub(r));
            let v = if y < height && x < width { img[(y, x)] } else { 0.0 };
            window.push(OrderedFloat(v));
        }
    }
    let mid = window.len() / 2;
    let (_, m, _) = window.select_nth_unstable(mid);
    m.0
}

/// 反射边界 `(d c b a | a b c d | d c b a)` 下的索引.
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let i = i.rem_euclid(period);
    (if i < n { i } else { period - 1 - i }) as usize
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// 可分离高斯平滑. `sigma <= 0` 时原样返回.
pub fn gaussian_filter(img: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 {
        return img.to_owned();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (height, width) = img.dim();

    let rows = Array2::from_shape_fn((height, width), |(h, w)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, wt)| wt * img[(h, reflect(w as isize + k as isize - radius, width))])
            .sum::<f64>()
    });
    Array2::from_shape_fn((height, width), |(h, w)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, wt)| wt * rows[(reflect(h as isize + k as isize - radius, height), w)])
            .sum::<f64>()
    })
}

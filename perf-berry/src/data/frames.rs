//! 流速/幅值帧序列.

use super::tags::ScanTags;
use crate::{AnalysisError, AnalysisResult, Idx2d};
use ndarray::{stack, Array2, Array3, ArrayView2, ArrayView3, Axis};

/// 一个心动周期内的流速帧与幅值帧, 形状均为 `(phases, H, W)`.
///
/// 流速单位为 cm/s, 已完成 rescale. 至少包含两个相位.
#[derive(Debug, Clone)]
pub struct FrameSeries {
    velocity: Array3<f64>,
    magnitude: Array3<f64>,
}

impl FrameSeries {
    /// 由两个 `(phases, H, W)` 数组创建.
    pub fn new(velocity: Array3<f64>, magnitude: Array3<f64>) -> AnalysisResult<Self> {
        let (vt, vh, vw) = velocity.dim();
        let (mt, mh, mw) = magnitude.dim();
        if (vh, vw) != (mh, mw) {
            return Err(AnalysisError::ShapeMismatch {
                expected: (vh, vw),
                found: (mh, mw),
            });
        }
        if vt != mt {
            return Err(AnalysisError::MissingData(format!(
                "{vt} velocity frames but {mt} magnitude frames"
            )));
        }
        if vt < 2 {
            return Err(AnalysisError::MissingData(format!(
                "need at least 2 cardiac phases, got {vt}"
            )));
        }
        if vh == 0 || vw == 0 {
            return Err(AnalysisError::MissingData("empty frames".to_string()));
        }
        Ok(Self {
            velocity,
            magnitude,
        })
    }

    /// 由逐相位的二维帧创建.
    pub fn from_frames(velocity: &[Array2<f64>], magnitude: &[Array2<f64>]) -> AnalysisResult<Self> {
        fn stacked(frames: &[Array2<f64>]) -> AnalysisResult<Array3<f64>> {
            let first = frames
                .first()
                .ok_or_else(|| AnalysisError::MissingData("no frames".to_string()))?;
            let views: Vec<ArrayView2<f64>> = frames.iter().map(|f| f.view()).collect();
            stack(Axis(0), &views).map_err(|_| AnalysisError::ShapeMismatch {
                expected: first.dim(),
                found: frames
                    .iter()
                    .map(|f| f.dim())
                    .find(|d| *d != first.dim())
                    .unwrap_or_default(),
            })
        }
        Self::new(stacked(velocity)?, stacked(magnitude)?)
    }

    /// 流速帧.
    #[inline]
    pub fn velocity(&self) -> ArrayView3<f64> {
        self.velocity.view()
    }

    /// 幅值帧.
    #[inline]
    pub fn magnitude(&self) -> ArrayView3<f64> {
        self.magnitude.view()
    }

    /// 相位个数.
    #[inline]
    pub fn phases(&self) -> usize {
        self.velocity.dim().0
    }

    /// 单帧形状 `(H, W)`.
    #[inline]
    pub fn shape(&self) -> Idx2d {
        let (_, h, w) = self.velocity.dim();
        (h, w)
    }

    /// 时间平均流速.
    pub fn mean_velocity(&self) -> Array2<f64> {
        temporal_mean(self.velocity.view())
    }

    /// 时间平均幅值.
    pub fn mean_magnitude(&self) -> Array2<f64> {
        temporal_mean(self.magnitude.view())
    }

    pub(crate) fn replace_velocity(&mut self, velocity: Array3<f64>) {
        debug_assert_eq!(velocity.dim(), self.magnitude.dim());
        self.velocity = velocity;
    }
}

/// 沿相位轴求均值. `frames` 至少包含一帧.
pub(crate) fn temporal_mean(frames: ArrayView3<f64>) -> Array2<f64> {
    let n = frames.len_of(Axis(0)).max(1) as f64;
    frames.sum_axis(Axis(0)) / n
}

/// 帧数据与采集参数的提供者.
///
/// DICOM 解码不在本 crate 范围内; 调用方实现该 trait, 或直接使用 [`FlowScan`].
pub trait FlowSource {
    /// 帧数据.
    fn frames(&self) -> &FrameSeries;

    /// 采集参数.
    fn tags(&self) -> &ScanTags;

    /// 扫描名称, 用于日志与结果文件.
    fn name(&self) -> &str;

    /// 覆盖编码流速 (cm/s).
    fn set_venc(&mut self, venc: f64) -> AnalysisResult<()>;

    /// 以原始像素值的极差重新标定流速到 `[min_vel, max_vel]`.
    fn set_velocity_rescale(&mut self, min_vel: f64, max_vel: f64) -> AnalysisResult<()>;

    /// 流速帧.
    #[inline]
    fn velocity_frames(&self) -> ArrayView3<f64> {
        self.frames().velocity()
    }

    /// 幅值帧.
    #[inline]
    fn magnitude_frames(&self) -> ArrayView3<f64> {
        self.frames().magnitude()
    }

    /// 编码流速 (cm/s).
    #[inline]
    fn venc(&self) -> f64 {
        self.tags().venc
    }

    /// 像素间距 (mm).
    #[inline]
    fn pixel_spacing(&self) -> f64 {
        self.tags().pixel_spacing
    }
}

/// 内存中的一次相位对比扫描.
#[derive(Debug, Clone)]
pub struct FlowScan {
    name: String,
    raw_velocity: Array3<f64>,
    frames: FrameSeries,
    tags: ScanTags,
}

impl FlowScan {
    /// 创建扫描. `frames` 中的流速被视为原始像素值, 同时也作为初始流速.
    pub fn new<S: Into<String>>(name: S, frames: FrameSeries, tags: ScanTags) -> AnalysisResult<Self> {
        tags.validate()?;
        Ok(Self {
            name: name.into(),
            raw_velocity: frames.velocity.clone(),
            frames,
            tags,
        })
    }
}

impl FlowSource for FlowScan {
    #[inline]
    fn frames(&self) -> &FrameSeries {
        &self.frames
    }

    #[inline]
    fn tags(&self) -> &ScanTags {
        &self.tags
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    fn set_venc(&mut self, venc: f64) -> AnalysisResult<()> {
        if !(venc.is_finite() && venc > 0.0) {
            return Err(AnalysisError::Configuration(format!(
                "venc must be positive, got {venc}"
            )));
        }
        self.tags.venc = venc;
        Ok(())
    }

    /// `slope = |Δraw| / |Δvel|`, `intercept = |Δraw| / 2 + min(raw)`,
    /// `v = (raw - intercept) / slope`.
    fn set_velocity_rescale(&mut self, min_vel: f64, max_vel: f64) -> AnalysisResult<()> {
        let delta_vel = (max_vel - min_vel).abs();
        let (lo, hi) = self
            .raw_velocity
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let delta_raw = (hi - lo).abs();
        if !(delta_vel > 0.0 && delta_raw > 0.0 && delta_raw.is_finite()) {
            return Err(AnalysisError::Configuration(format!(
                "cannot rescale raw range {delta_raw} onto velocity range {delta_vel}"
            )));
        }
        let slope = delta_raw / delta_vel;
        let intercept = delta_raw / 2.0 + lo;
        self.frames
            .replace_velocity(self.raw_velocity.mapv(|r| (r - intercept) / slope));
        Ok(())
    }
}

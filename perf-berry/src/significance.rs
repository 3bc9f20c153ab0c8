//! 噪声模型与显著性掩膜.

use crate::config::AnalysisConfig;
use crate::consts::{FlowDirection, MagnitudeClass};
use crate::data::areas::and;
use crate::preprocess::Backgrounds;
use crate::{AnalysisError, AnalysisResult, FrameSeries, Idx2d, Mask2d, ScanTags};
use ndarray::{Array2, Array3, Axis, Zip};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

/// 除法, 除零或结果非有限时返回 0.
#[inline]
pub fn div0(a: f64, b: f64) -> f64 {
    let c = a / b;
    if c.is_finite() {
        c
    } else {
        0.0
    }
}

/// 双侧置信区间 `1 - alpha` 对应的标准正态分位数.
pub fn z_interval(alpha: f64) -> AnalysisResult<f64> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(AnalysisError::Configuration(format!(
            "significance level must lie in (0, 1), got {alpha}"
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| AnalysisError::Configuration(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - alpha / 2.0))
}

/// 逐像素显著性标记.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VesselFlags {
    /// 正向流速显著.
    pub vpos: bool,
    /// 负向流速显著.
    pub vneg: bool,
    /// 幅值显著偏高.
    pub mpos: bool,
    /// 幅值显著偏低.
    pub mneg: bool,
    /// 幅值无显著差异.
    pub miso: bool,
}

impl VesselFlags {
    /// 是否带有流向 `flow`.
    #[inline]
    pub fn has_flow(&self, flow: FlowDirection) -> bool {
        match flow {
            FlowDirection::Positive => self.vpos,
            FlowDirection::Negative => self.vneg,
        }
    }

    /// 是否带有幅值类别 `mag`.
    #[inline]
    pub fn has_magnitude(&self, mag: MagnitudeClass) -> bool {
        match mag {
            MagnitudeClass::Positive => self.mpos,
            MagnitudeClass::Negative => self.mneg,
            MagnitudeClass::Isointense => self.miso,
        }
    }
}

/// 五张显著性掩膜, 形状一致.
#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceMasks {
    /// 正向流速显著.
    pub flow_pos: Mask2d,
    /// 负向流速显著.
    pub flow_neg: Mask2d,
    /// 幅值显著偏高.
    pub mag_pos: Mask2d,
    /// 幅值显著偏低.
    pub mag_neg: Mask2d,
    /// 幅值无显著差异.
    pub mag_iso: Mask2d,
}

impl SignificanceMasks {
    /// 流向对应的掩膜.
    #[inline]
    pub fn flow(&self, flow: FlowDirection) -> &Mask2d {
        match flow {
            FlowDirection::Positive => &self.flow_pos,
            FlowDirection::Negative => &self.flow_neg,
        }
    }

    /// 幅值类别对应的掩膜.
    #[inline]
    pub fn magnitude(&self, mag: MagnitudeClass) -> &Mask2d {
        match mag {
            MagnitudeClass::Positive => &self.mag_pos,
            MagnitudeClass::Negative => &self.mag_neg,
            MagnitudeClass::Isointense => &self.mag_iso,
        }
    }

    /// 五张掩膜同时与 `keep` 求交.
    pub fn retain(&mut self, keep: &Mask2d) {
        for m in self.iter_mut() {
            *m = and(m, keep);
        }
    }

    /// 读取 `pos` 处的标记.
    pub fn flags_at(&self, pos: Idx2d) -> VesselFlags {
        VesselFlags {
            vpos: self.flow_pos[pos],
            vneg: self.flow_neg[pos],
            mpos: self.mag_pos[pos],
            mneg: self.mag_neg[pos],
            miso: self.mag_iso[pos],
        }
    }

    fn iter_mut(&mut self) -> [&mut Mask2d; 5] {
        [
            &mut self.flow_pos,
            &mut self.flow_neg,
            &mut self.mag_pos,
            &mut self.mag_neg,
            &mut self.mag_iso,
        ]
    }
}

/// 噪声模型.
#[derive(Debug, Clone)]
pub struct NoiseModel {
    /// 逐相位幅值 SNR.
    pub magnitude_snr: Array3<f64>,

    /// 时间平均幅值 SNR.
    pub mean_magnitude_snr: Array2<f64>,

    /// 幅值 SNR 足够的像素. 半卵圆中心不设门限, 为 `None`.
    pub adequacy: Option<Mask2d>,

    /// 逐相位流速标准差.
    pub velocity_std: Array3<f64>,

    /// 去背景后的逐相位流速.
    pub corrected_velocity: Array3<f64>,

    /// 时间平均流速 SNR.
    pub velocity_snr: Array2<f64>,

    /// 置信区间对应的 z 值.
    pub z: f64,

    /// 经 R-R 间期校准后的有效阈值.
    pub sigma: f64,
}

impl NoiseModel {
    /// 建立噪声模型.
    pub fn new(
        frames: &FrameSeries,
        bg: &Backgrounds,
        tags: &ScanTags,
        config: &AnalysisConfig,
    ) -> AnalysisResult<Self> {
        let venc = tags.venc;
        let magnitude_snr = Array3::from_shape_fn(frames.magnitude().dim(), |(t, h, w)| {
            div0(frames.magnitude()[(t, h, w)], bg.noise[(h, w)])
        });
        let mean_magnitude_snr = crate::data::temporal_mean(magnitude_snr.view());
        let adequacy = config
            .magnitude_gate()
            .map(|gate| mean_magnitude_snr.mapv(|s| s > gate));

        let velocity_std = magnitude_snr.mapv(|s| venc / PI * div0(1.0, s));
        let corrected_velocity = Array3::from_shape_fn(frames.velocity().dim(), |(t, h, w)| {
            frames.velocity()[(t, h, w)] - bg.median_velocity[(h, w)]
        });
        let ratio = Zip::from(&corrected_velocity)
            .and(&velocity_std)
            .map_collect(|&v, &s| div0(v, s));
        let velocity_snr = crate::data::temporal_mean(ratio.view());

        let z = z_interval(config.confidence_inter)?;
        let sigma = z * tags.noise_calibration();

        Ok(Self {
            magnitude_snr,
            mean_magnitude_snr,
            adequacy,
            velocity_std,
            corrected_velocity,
            velocity_snr,
            z,
            sigma,
        })
    }

    /// 时间平均的去背景流速.
    pub fn mean_corrected_velocity(&self) -> Array2<f64> {
        self.corrected_velocity.sum_axis(Axis(0)) / self.corrected_velocity.len_of(Axis(0)) as f64
    }

    /// 流速显著性 (正向, 负向).
    pub fn flow_masks(&self) -> (Mask2d, Mask2d) {
        let sigma = self.sigma;
        let mut pos = self.velocity_snr.mapv(|s| s > sigma);
        let mut neg = self.velocity_snr.mapv(|s| s < -sigma);
        if let Some(ok) = self.adequacy.as_ref() {
            pos = and(&pos, ok);
            neg = and(&neg, ok);
        }
        (pos, neg)
    }
}

/// 幅值显著性 (偏高, 偏低, 等幅).
pub fn magnitude_masks(bg: &Backgrounds, sigma: f64) -> (Mask2d, Mask2d, Mask2d) {
    let diff = &bg.mean_magnitude - &bg.median_magnitude;
    let pos = Zip::from(&diff)
        .and(&bg.noise)
        .map_collect(|&d, &n| d - sigma * n > 0.0);
    let neg = Zip::from(&diff)
        .and(&bg.noise)
        .map_collect(|&d, &n| d + sigma * n < 0.0);
    let iso = Zip::from(&pos).and(&neg).map_collect(|&p, &n| !p && !n);
    (pos, neg, iso)
}

/// 建立噪声模型并生成五张显著性掩膜.
pub fn estimate(
    frames: &FrameSeries,
    bg: &Backgrounds,
    tags: &ScanTags,
    config: &AnalysisConfig,
) -> AnalysisResult<(NoiseModel, SignificanceMasks)> {
    let noise = NoiseModel::new(frames, bg, tags, config)?;
    let (flow_pos, flow_neg) = noise.flow_masks();
    let (mag_pos, mag_neg, mag_iso) = magnitude_masks(bg, noise.sigma);
    Ok((
        noise,
        SignificanceMasks {
            flow_pos,
            flow_neg,
            mag_pos,
            mag_neg,
            mag_iso,
        },
    ))
}

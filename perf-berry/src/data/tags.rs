//! 采集参数.

use crate::consts::PULSATE_FACTOR;
use crate::{AnalysisError, AnalysisResult};
use serde::{Deserialize, Serialize};

/// 分析所需的采集参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTags {
    /// 编码流速 (cm/s).
    pub venc: f64,

    /// 像素间距 (mm).
    pub pixel_spacing: f64,

    /// R-R 间期 (ms). 未知时为 0.
    pub rr_interval: f64,

    /// TFE 因子.
    pub tfe: f64,

    /// 重复时间 TR (ms).
    pub tr: f64,

    /// 单次采集时长 (ms), 一般为 `2 * tfe * tr`.
    pub temporal_resolution: f64,
}

impl ScanTags {
    /// 仅给出编码流速和像素间距, 其余参数未知.
    pub fn new(venc: f64, pixel_spacing: f64) -> Self {
        Self {
            venc,
            pixel_spacing,
            rr_interval: 0.0,
            tfe: 0.0,
            tr: 0.0,
            temporal_resolution: 0.0,
        }
    }

    /// 补充 R-R 间期与序列时序参数, 并据此推出单次采集时长.
    pub fn with_timing(mut self, rr_interval: f64, tfe: f64, tr: f64) -> Self {
        self.rr_interval = rr_interval;
        self.tfe = tfe;
        self.tr = tr;
        self.temporal_resolution = 2.0 * tfe * tr;
        self
    }

    /// 由厂商无关与厂商私有字段解析编码流速后创建.
    pub fn resolve(hints: &AcquisitionHints, pixel_spacing: f64) -> AnalysisResult<Self> {
        Ok(Self::new(hints.resolve_venc()?, pixel_spacing))
    }

    /// 检查参数取值.
    pub fn validate(&self) -> AnalysisResult<()> {
        if !(self.venc.is_finite() && self.venc > 0.0) {
            return Err(AnalysisError::UnrecognizedAcquisition(format!(
                "venc must be positive, got {}",
                self.venc
            )));
        }
        if !(self.pixel_spacing.is_finite() && self.pixel_spacing > 0.0) {
            return Err(AnalysisError::UnrecognizedAcquisition(format!(
                "pixel spacing must be positive, got {}",
                self.pixel_spacing
            )));
        }
        Ok(())
    }

    /// 噪声校准因子 `PULSATE / sqrt(RR / 采集时长)`. R-R 间期未知时为 1.
    pub fn noise_calibration(&self) -> f64 {
        if self.rr_interval <= 0.0 || self.temporal_resolution <= 0.0 {
            return 1.0;
        }
        PULSATE_FACTOR / (self.rr_interval / self.temporal_resolution).sqrt()
    }
}

/// 解析编码流速用的原始采集信息.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionHints {
    /// 厂商名称.
    pub manufacturer: String,

    /// 标准字段中的编码流速.
    pub standard_venc: Option<f64>,

    /// 厂商私有字段中的编码流速序列 (取最后一个分量).
    pub private_venc: Vec<f64>,

    /// 私有字段以 mm/s 为单位.
    pub private_in_mm: bool,
}

impl AcquisitionHints {
    /// 优先使用标准字段, 其次是厂商私有字段. 两者都没有时报错.
    pub fn resolve_venc(&self) -> AnalysisResult<f64> {
        let venc = match (self.standard_venc, self.private_venc.last()) {
            (Some(v), _) if v > 0.0 => v,
            (_, Some(&v)) if v > 0.0 => {
                if self.private_in_mm {
                    v / 10.0
                } else {
                    v
                }
            }
            _ => {
                return Err(AnalysisError::UnrecognizedAcquisition(format!(
                    "no velocity encoding found for manufacturer `{}`",
                    self.manufacturer
                )))
            }
        };
        Ok(venc)
    }
}

//! 分析参数.
//!
//! 所有参数都可以从一个扁平的 JSON 对象中读取, 键名与历史配置文件保持一致
//! (如 `medDiam`, `confidenceInter`, `doGhosting`). 缺失的键取默认值.

use crate::consts::{
    FlowDirection, MagnitudeClass, ADVANCED_SNR_THRESHOLD, BASAL_GANGLIA_SNR_THRESHOLD,
    MCA_SNR_THRESHOLD,
};
use crate::{AnalysisError, AnalysisResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// 待分析的解剖结构.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Structure {
    /// 基底节.
    BasalGanglia,

    /// 半卵圆中心.
    SemiovalCentre,

    /// 大脑中动脉.
    MiddleCerebralArtery,

    /// 自定义 (流向, 幅值类别) 组合.
    Advanced,
}

impl Structure {
    /// 用于结果表格的简称.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BasalGanglia => "BasalGanglia",
            Self::SemiovalCentre => "SemiovalCentre",
            Self::MiddleCerebralArtery => "MiddleCerebralArtery",
            Self::Advanced => "Advanced",
        }
    }
}

/// 聚类时允许保留的流向与幅值类别.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSelection {
    /// 保留正向流速.
    pub positive_flow: bool,
    /// 保留负向流速.
    pub negative_flow: bool,
    /// 保留高幅值.
    pub positive_magnitude: bool,
    /// 保留低幅值.
    pub negative_magnitude: bool,
    /// 保留等幅值.
    pub isointense_magnitude: bool,
}

impl ClusterSelection {
    /// 基底节: 正向流速且高幅值.
    pub const fn basal_ganglia() -> Self {
        Self {
            positive_flow: true,
            negative_flow: false,
            positive_magnitude: true,
            negative_magnitude: false,
            isointense_magnitude: false,
        }
    }

    /// 半卵圆中心: 负向流速, 幅值类别不限.
    pub const fn semioval_centre() -> Self {
        Self {
            positive_flow: false,
            negative_flow: true,
            positive_magnitude: true,
            negative_magnitude: true,
            isointense_magnitude: true,
        }
    }

    /// 大脑中动脉: 双向流速且高幅值.
    pub const fn middle_cerebral_artery() -> Self {
        Self {
            positive_flow: true,
            negative_flow: true,
            positive_magnitude: true,
            negative_magnitude: false,
            isointense_magnitude: false,
        }
    }

    /// 是否允许流向 `flow`.
    #[inline]
    pub fn allows_flow(&self, flow: FlowDirection) -> bool {
        match flow {
            FlowDirection::Positive => self.positive_flow,
            FlowDirection::Negative => self.negative_flow,
        }
    }

    /// 是否允许幅值类别 `mag`.
    #[inline]
    pub fn allows_magnitude(&self, mag: MagnitudeClass) -> bool {
        match mag {
            MagnitudeClass::Positive => self.positive_magnitude,
            MagnitudeClass::Negative => self.negative_magnitude,
            MagnitudeClass::Isointense => self.isointense_magnitude,
        }
    }

    /// 是否允许 (`flow`, `mag`) 组合.
    #[inline]
    pub fn allows(&self, flow: FlowDirection, mag: MagnitudeClass) -> bool {
        self.allows_flow(flow) && self.allows_magnitude(mag)
    }

    /// 至少允许一种流向, 且至少允许一种幅值类别.
    pub fn is_usable(&self) -> bool {
        (self.positive_flow || self.negative_flow)
            && (self.positive_magnitude || self.negative_magnitude || self.isointense_magnitude)
    }
}

/// 亮血管伪影 (ghosting) 排除区参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GhostingParams {
    /// 是否启用.
    pub do_ghosting: bool,
    /// 不大于该像素数的亮区域不产生排除区.
    pub no_vessel_thresh: usize,
    /// 不大于该像素数的亮区域视为小血管.
    pub small_vessel_thresh: usize,
    /// 小血管排除区列方向外扩像素数.
    pub small_vessel_excl_x: usize,
    /// 小血管排除区行方向外扩像素数.
    pub small_vessel_excl_y: usize,
    /// 大血管排除区列方向外扩像素数.
    pub large_vessel_excl_x: usize,
    /// 大血管排除区行方向外扩像素数.
    pub large_vessel_excl_y: usize,
    /// 亮区域判定百分位 (`0..=1`).
    pub bright_vessel_perc: f64,
}

impl Default for GhostingParams {
    fn default() -> Self {
        Self {
            do_ghosting: true,
            no_vessel_thresh: 5,
            small_vessel_thresh: 20,
            small_vessel_excl_x: 3,
            small_vessel_excl_y: 40,
            large_vessel_excl_x: 5,
            large_vessel_excl_y: 70,
            bright_vessel_perc: 0.997,
        }
    }
}

/// 非垂直血管剔除参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NonPerpParams {
    /// 是否启用.
    pub remove_non_perp: bool,
    /// 幅值缩放下界 (以标准差为单位).
    pub min_scaling: f64,
    /// 幅值缩放上界 (以标准差为单位).
    pub max_scaling: f64,
    /// 分析窗口半径 (像素).
    pub window_size: usize,
    /// 窗口内阈值相对中心幅值的比例.
    pub magnitude_thresh: f64,
    /// 长短轴之比上限.
    pub ratio_thresh: f64,
}

impl Default for NonPerpParams {
    fn default() -> Self {
        Self {
            remove_non_perp: true,
            min_scaling: 1.0,
            max_scaling: 3.0,
            window_size: 7,
            magnitude_thresh: 0.8,
            ratio_thresh: 2.0,
        }
    }
}

/// 去重参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupParams {
    /// 是否启用.
    pub deduplicate: bool,
    /// 距离小于该值 (像素) 的代表体素视为同一血管.
    pub deduplicate_range: f64,
}

impl Default for DedupParams {
    fn default() -> Self {
        Self {
            deduplicate: true,
            deduplicate_range: 6.0,
        }
    }
}

/// 完整分析参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfig {
    /// 待分析结构. 必须在运行前设置.
    pub structure: Option<Structure>,

    /// `Structure::Advanced` 下的组合选择.
    #[serde(flatten)]
    pub advanced: ClusterSelection,

    /// 显著性水平 α, 取值 `(0, 1)`.
    pub confidence_inter: f64,

    /// 背景滤波直径. 单位由 `mm_pixel` 决定.
    pub med_diam: f64,

    /// `med_diam` 是否以毫米为单位.
    pub mm_pixel: bool,

    /// 用高斯平滑代替中值滤波.
    pub gaussian_smoothing: bool,

    /// 是否剔除脑外缘带.
    pub ignore_outer_band: bool,

    /// 脑外缘带腐蚀核边长 (像素).
    pub outer_band_width: usize,

    /// 交互模式下是否人工复核每个簇.
    pub manual_selection: bool,

    /// 输出表格是否使用十进制逗号.
    pub decimal_comma: bool,

    /// 概率掩膜的二值化阈值.
    #[serde(rename = "whiteMatterProb")]
    pub mask_threshold: f64,

    #[serde(flatten)]
    #[allow(missing_docs)]
    pub ghosting: GhostingParams,

    #[serde(flatten)]
    #[allow(missing_docs)]
    pub non_perp: NonPerpParams,

    #[serde(flatten)]
    #[allow(missing_docs)]
    pub dedup: DedupParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            structure: None,
            advanced: ClusterSelection::default(),
            confidence_inter: 0.05,
            med_diam: 10.0,
            mm_pixel: true,
            gaussian_smoothing: false,
            ignore_outer_band: false,
            outer_band_width: 80,
            manual_selection: false,
            decimal_comma: false,
            mask_threshold: 0.5,
            ghosting: GhostingParams::default(),
            non_perp: NonPerpParams::default(),
            dedup: DedupParams::default(),
        }
    }
}

impl AnalysisConfig {
    /// 以默认参数分析 `structure`.
    pub fn new(structure: Structure) -> Self {
        Self {
            structure: Some(structure),
            ..Self::default()
        }
    }

    /// 从 JSON 字符串读取.
    pub fn from_json_str(s: &str) -> AnalysisResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// 从 JSON 文件读取.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> AnalysisResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// 已设置的结构. 未设置时报错.
    pub fn structure(&self) -> AnalysisResult<Structure> {
        self.structure
            .ok_or_else(|| AnalysisError::Configuration("no structure selected".to_string()))
    }

    /// 检查参数取值.
    pub fn validate(&self) -> AnalysisResult<()> {
        fn bad<T>(msg: String) -> AnalysisResult<T> {
            Err(AnalysisError::Configuration(msg))
        }

        let structure = self.structure()?;
        if !(self.confidence_inter > 0.0 && self.confidence_inter < 1.0) {
            return bad(format!(
                "confidenceInter must lie in (0, 1), got {}",
                self.confidence_inter
            ));
        }
        if !(self.med_diam.is_finite() && self.med_diam > 0.0) {
            return bad(format!("medDiam must be positive, got {}", self.med_diam));
        }
        if !(0.0..=1.0).contains(&self.ghosting.bright_vessel_perc) {
            return bad(format!(
                "brightVesselPerc must lie in [0, 1], got {}",
                self.ghosting.bright_vessel_perc
            ));
        }
        if self.non_perp.min_scaling + self.non_perp.max_scaling <= 0.0 {
            return bad("minScaling + maxScaling must be positive".to_string());
        }
        if self.non_perp.window_size == 0 {
            return bad("windowSize must be positive".to_string());
        }
        if self.dedup.deduplicate_range < 0.0 {
            return bad("deduplicateRange must be non-negative".to_string());
        }
        if structure == Structure::Advanced && !self.advanced.is_usable() {
            return bad("advanced mode needs at least one flow and one magnitude".to_string());
        }
        Ok(())
    }

    /// 运行时实际生效的参数.
    ///
    /// 1. 大脑中动脉不做垂直度筛选与去重.
    /// 2. 基底节在交互模式下人工复核时, 同样关闭垂直度筛选与去重.
    pub fn effective(&self, interactive: bool) -> Self {
        let mut cfg = self.clone();
        let disable = match self.structure {
            Some(Structure::MiddleCerebralArtery) => true,
            Some(Structure::BasalGanglia) => self.manual_review(interactive),
            _ => false,
        };
        if disable {
            cfg.non_perp.remove_non_perp = false;
            cfg.dedup.deduplicate = false;
        }
        cfg
    }

    /// 是否进入人工复核流程.
    #[inline]
    pub fn manual_review(&self, interactive: bool) -> bool {
        interactive && self.manual_selection && self.structure == Some(Structure::BasalGanglia)
    }

    /// 当前结构的聚类组合.
    pub fn selection(&self) -> ClusterSelection {
        match self.structure {
            Some(Structure::BasalGanglia) | None => ClusterSelection::basal_ganglia(),
            Some(Structure::SemiovalCentre) => ClusterSelection::semioval_centre(),
            Some(Structure::MiddleCerebralArtery) => ClusterSelection::middle_cerebral_artery(),
            Some(Structure::Advanced) => self.advanced,
        }
    }

    /// 流速显著性所需的平均幅值 SNR 门限. 半卵圆中心不设门限.
    pub fn magnitude_gate(&self) -> Option<f64> {
        match self.structure {
            Some(Structure::SemiovalCentre) => None,
            Some(Structure::MiddleCerebralArtery) => Some(MCA_SNR_THRESHOLD),
            Some(Structure::Advanced) => Some(ADVANCED_SNR_THRESHOLD),
            Some(Structure::BasalGanglia) | None => Some(BASAL_GANGLIA_SNR_THRESHOLD),
        }
    }

    /// 去重时是否按幅值连通块合并. 半卵圆中心不合并.
    #[inline]
    pub fn dedup_by_blob(&self) -> bool {
        self.structure != Some(Structure::SemiovalCentre)
    }

    /// 汇总结果中是否报告标准误. 大脑中动脉不报告.
    #[inline]
    pub fn reports_sem(&self) -> bool {
        self.structure != Some(Structure::MiddleCerebralArtery)
    }

    /// 背景滤波直径 (像素), 总为奇数.
    ///
    /// 以毫米为单位时先截断为整数像素, 偶数加一; 以像素为单位时若给出偶数,
    /// 则修正为下一个奇数并给出警告.
    pub fn median_diameter(&self, pixel_spacing: f64) -> AnalysisResult<usize> {
        let d = if self.mm_pixel {
            if !(pixel_spacing.is_finite() && pixel_spacing > 0.0) {
                return Err(AnalysisError::Configuration(format!(
                    "pixel spacing must be positive, got {pixel_spacing}"
                )));
            }
            (self.med_diam / pixel_spacing) as usize
        } else {
            let d = self.med_diam as usize;
            if d % 2 == 0 {
                warn!("medDiam {d} px is even, using {} px instead", d + 1);
            }
            d
        };
        Ok(if d % 2 == 0 { d + 1 } else { d })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.confidence_inter, 0.05);
        assert_eq!(cfg.med_diam, 10.0);
        assert!(cfg.mm_pixel);
        assert!(cfg.ghosting.do_ghosting);
        assert_eq!(cfg.ghosting.large_vessel_excl_y, 70);
        assert_eq!(cfg.non_perp.window_size, 7);
        assert_eq!(cfg.dedup.deduplicate_range, 6.0);
        assert_eq!(cfg.mask_threshold, 0.5);
        assert!(cfg.validate().is_err());
        assert!(AnalysisConfig::new(Structure::BasalGanglia).validate().is_ok());
    }

    #[test]
    fn test_flat_json_keys() {
        let cfg = AnalysisConfig::from_json_str(
            r#"{
                "structure": "semiovalCentre",
                "medDiam": 21,
                "mmPixel": false,
                "doGhosting": false,
                "smallVesselExclX": 4,
                "windowSize": 9,
                "deduplicateRange": 3.5,
                "whiteMatterProb": 0.7,
                "negativeFlow": true
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.structure, Some(Structure::SemiovalCentre));
        assert_eq!(cfg.med_diam, 21.0);
        assert!(!cfg.mm_pixel);
        assert!(!cfg.ghosting.do_ghosting);
        assert_eq!(cfg.ghosting.small_vessel_excl_x, 4);
        assert_eq!(cfg.ghosting.small_vessel_excl_y, 40);
        assert_eq!(cfg.non_perp.window_size, 9);
        assert_eq!(cfg.dedup.deduplicate_range, 3.5);
        assert_eq!(cfg.mask_threshold, 0.7);
        assert!(cfg.advanced.negative_flow);
        assert!(!cfg.advanced.positive_flow);
    }

    #[test]
    fn test_json_file() {
        let mut cfg = AnalysisConfig::new(Structure::MiddleCerebralArtery);
        cfg.decimal_comma = true;
        let path = std::env::temp_dir().join(format!("perf-berry-cfg-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();
        let back = AnalysisConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_validate() {
        let mut cfg = AnalysisConfig::new(Structure::Advanced);
        assert!(cfg.validate().is_err());
        cfg.advanced.positive_flow = true;
        cfg.advanced.isointense_magnitude = true;
        assert!(cfg.validate().is_ok());
        cfg.confidence_inter = 1.0;
        assert!(cfg.validate().is_err());
        cfg.confidence_inter = 0.01;
        cfg.ghosting.bright_vessel_perc = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_median_diameter() {
        let cfg = AnalysisConfig::new(Structure::BasalGanglia);
        // 10 / 0.5 = 20 -> 21
        assert_eq!(cfg.median_diameter(0.5).unwrap(), 21);
        // 10 / 0.3 = 33.3 -> 33
        assert_eq!(cfg.median_diameter(0.3).unwrap(), 33);
        assert!(cfg.median_diameter(0.0).is_err());

        let mut cfg = cfg;
        cfg.mm_pixel = false;
        cfg.med_diam = 10.0;
        assert_eq!(cfg.median_diameter(0.5).unwrap(), 11);
        cfg.med_diam = 7.0;
        assert_eq!(cfg.median_diameter(0.5).unwrap(), 7);
    }

    #[test]
    fn test_effective() {
        let cfg = AnalysisConfig::new(Structure::MiddleCerebralArtery).effective(false);
        assert!(!cfg.non_perp.remove_non_perp);
        assert!(!cfg.dedup.deduplicate);
        assert!(!cfg.reports_sem());

        let mut bg = AnalysisConfig::new(Structure::BasalGanglia);
        bg.manual_selection = true;
        let batch = bg.effective(false);
        assert!(batch.non_perp.remove_non_perp && batch.dedup.deduplicate);
        let interactive = bg.effective(true);
        assert!(!interactive.non_perp.remove_non_perp && !interactive.dedup.deduplicate);
        assert!(bg.manual_review(true));
        assert!(!bg.manual_review(false));
    }

    #[test]
    fn test_selection() {
        let sc = AnalysisConfig::new(Structure::SemiovalCentre);
        assert_eq!(sc.magnitude_gate(), None);
        assert!(!sc.dedup_by_blob());
        let s = sc.selection();
        assert!(s.allows(FlowDirection::Negative, MagnitudeClass::Isointense));
        assert!(!s.allows(FlowDirection::Positive, MagnitudeClass::Positive));

        let bg = AnalysisConfig::new(Structure::BasalGanglia);
        assert_eq!(bg.magnitude_gate(), Some(2.0));
        assert!(bg
            .selection()
            .allows(FlowDirection::Positive, MagnitudeClass::Positive));
        assert!(!bg
            .selection()
            .allows(FlowDirection::Positive, MagnitudeClass::Isointense));
        assert_eq!(
            AnalysisConfig::new(Structure::MiddleCerebralArtery).magnitude_gate(),
            Some(10.0)
        );
    }
}

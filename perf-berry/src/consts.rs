//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;
}

/// 进度事件的百分比与标签.
pub mod progress {
    /// 背景估计阶段.
    pub const MEDIANS: (u8, &str) = (0, "Calculating median images");

    /// 显著性判定与掩膜精化阶段.
    pub const SIGNIFICANCE: (u8, &str) = (60, "Finding significant vessels");

    /// 聚类与筛选阶段.
    pub const CLUSTERS: (u8, &str) = (80, "Analysing clusters");

    /// 分析完成.
    pub const DONE: (u8, &str) = (100, "");

    /// 写出结果.
    pub const WRITING: (u8, &str) = (100, "Writing results to disk");
}

/// PULSATE 参考数据的噪声放大因子, 即 `sqrt(平均 R-R 间期 / 单次采集时长)`.
pub const PULSATE_FACTOR: f64 = 2.9085772172269087;

/// 基底节的幅值 SNR 门限.
pub const BASAL_GANGLIA_SNR_THRESHOLD: f64 = 2.0;

/// 大脑中动脉的幅值 SNR 门限.
pub const MCA_SNR_THRESHOLD: f64 = 10.0;

/// 高级 (自定义) 模式的幅值 SNR 门限.
pub const ADVANCED_SNR_THRESHOLD: f64 = 2.0;

/// 高斯核 FWHM 与标准差之比.
pub const GAUSSIAN_FWHM: f64 = 2.355;

/// 高斯核截断位置 (以标准差为单位).
pub const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// 血流方向.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FlowDirection {
    /// 正向流速.
    Positive,

    /// 负向流速.
    Negative,
}

impl FlowDirection {
    /// 两种流向, 按聚类顺序排列.
    pub const ALL: [Self; 2] = [Self::Positive, Self::Negative];
}

/// 平均幅值相对背景的类别.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MagnitudeClass {
    /// 显著高于背景.
    Positive,

    /// 显著低于背景.
    Negative,

    /// 与背景无显著差异.
    Isointense,
}

impl MagnitudeClass {
    /// 三种幅值类别, 按聚类顺序排列.
    pub const ALL: [Self; 3] = [Self::Positive, Self::Negative, Self::Isointense];
}

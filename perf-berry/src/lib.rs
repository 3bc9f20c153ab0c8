#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 从 2D 相位对比 (phase-contrast) MRI 流速扫描中检测并量化脑小穿支血管.
//!
//! 输入为一组按心动周期相位排列的流速帧与幅值帧, 以及一张感兴趣区掩膜
//! (白质/基底节概率图或二值图). 输出为逐体素检测记录、按结构汇总的搏动性统计量
//! (平均流速 `Vmean`, 归一化搏动指数 `PI_norm` 及其标准误) 以及血管掩膜.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 本 crate 不负责 DICOM 解码. 调用方通过 [`FlowSource`] 提供帧数据与采集参数,
//!   采集参数的解析入口为 [`ScanTags`] 与 [`AcquisitionHints`].
//! 2. 所有坐标均为 `(row, col)` 形式的 [`Idx2d`], 与 `ndarray` 行优先索引一致.
//!   只有写入结果表格时才会转换为 1 起始的编号.
//!
//! # 开发计划
//!
//! ### 背景估计 (中值/高斯滤波) 与复数噪声图 ✅
//!
//! 实现位于 `perf-berry/src/preprocess.rs`.
//!
//! ### 流速/幅值显著性判定 ✅
//!
//! 由幅值 SNR 推出逐相位流速标准差, 用置信区间 z 值与 R-R 间期校准后的
//! 有效阈值生成五张显著性掩膜.
//!
//! 实现位于 `perf-berry/src/significance.rs`.
//!
//! ### 掩膜精化: 过零点, 伪影 (ghosting), 脑外缘 ✅
//!
//! 实现位于 `perf-berry/src/refine.rs`.
//!
//! ### 8-邻域聚类与互斥分配 ✅
//!
//! 六轮 (流向, 幅值类别) 组合依次提取连通域, 已分配的连通域整体移出后续轮次.
//!
//! 实现位于 `perf-berry/src/cluster.rs`.
//!
//! ### 垂直度 (椭圆轴比) 与去重 ✅
//!
//! 实现位于 `perf-berry/src/filter/*`.
//!
//! ### 血管参数与群体统计 ✅
//!
//! 实现位于 `perf-berry/src/params.rs`.
//!
//! ### 流水线, 人工复核会话, 批处理 ✅
//!
//! 实现位于 `perf-berry/src/pipeline.rs` 与 `perf-berry/src/batch.rs`.
//!
//! ### 结果输出 ✅
//!
//! 制表符分隔的逐体素表与汇总表 (可选十进制逗号), bincode 批处理容器, PNG 血管掩膜.
//!
//! 实现位于 `perf-berry/src/report.rs`.

/// 二维索引 `(row, col)`, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 高精度二维坐标 `(row, col)`.
pub type Idx2dF = (f64, f64);

/// 二维布尔掩膜. `true` 代表前景.
pub type Mask2d = ndarray::Array2<bool>;

type Area2d = Vec<Idx2d>;
type Areas2d = Vec<Area2d>;

/// 相位对比扫描基础数据结构.
mod data;

pub use data::{areas, mask};
pub use data::{AcquisitionHints, FlowScan, FlowSource, FrameSeries, ScanTags};

mod error;

pub use error::{AnalysisError, AnalysisResult};

pub mod config;
pub mod consts;

pub mod preprocess;
pub mod significance;

pub mod refine;

pub mod cluster;
pub mod filter;

pub mod params;

pub mod batch;
pub mod pipeline;
pub mod report;

pub mod prelude;

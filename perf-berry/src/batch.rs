//! 批处理.
//!
//! 依次分析一组扫描. 单个扫描缺少掩膜或掩膜格式不受支持时跳过并记录,
//! 其他错误记为失败, 均不影响其余扫描. 配置非法时在处理任何扫描之前直接报错.
//!
//! 每个扫描在加载后才读取帧数据与掩膜, 分析完成即释放.

use crate::config::AnalysisConfig;
use crate::consts::progress;
use crate::mask::load_region_mask;
use crate::pipeline::{NoProgress, Pipeline, ProgressSink, RunMode, ScanOutcome};
use crate::report::{write_scan, ScanSummary};
use crate::{AnalysisError, AnalysisResult, FlowSource, Mask2d};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// 感兴趣区掩膜的来源.
#[derive(Debug, Clone)]
pub enum MaskSource {
    /// 已在内存中的二值掩膜.
    InMemory(Mask2d),

    /// 磁盘上的掩膜文件, 按 `whiteMatterProb` 二值化.
    File(PathBuf),

    /// 没有掩膜.
    Missing,
}

impl MaskSource {
    /// 读取掩膜.
    pub fn load(self, threshold: f64) -> AnalysisResult<Mask2d> {
        match self {
            Self::InMemory(m) => Ok(m),
            Self::File(p) => load_region_mask(p, threshold),
            Self::Missing => Err(AnalysisError::MissingData("no mask file".to_string())),
        }
    }
}

type ScanLoader<'a, S> = Box<dyn FnOnce() -> AnalysisResult<S> + Send + 'a>;

/// 批处理中的一个扫描.
pub struct BatchEntry<'a, S> {
    name: String,
    loader: ScanLoader<'a, S>,
    mask: MaskSource,
}

impl<'a, S: Send + 'a> BatchEntry<'a, S> {
    /// 已加载的扫描.
    pub fn new<N: Into<String>>(name: N, scan: S, mask: MaskSource) -> Self {
        Self::lazy(name, move || Ok(scan), mask)
    }

    /// 在轮到该扫描时才调用 `loader` 加载.
    pub fn lazy<N, F>(name: N, loader: F, mask: MaskSource) -> Self
    where
        N: Into<String>,
        F: FnOnce() -> AnalysisResult<S> + Send + 'a,
    {
        Self {
            name: name.into(),
            loader: Box::new(loader),
            mask,
        }
    }

    /// 扫描名称.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 单个扫描的处理结果.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// 分析完成.
    Completed,

    /// 没有找到血管.
    NoVessels,

    /// 因可恢复错误跳过.
    Skipped(String),

    /// 分析失败.
    Failed(String),
}

/// 批处理中一个扫描的记录.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// 扫描名称.
    pub name: String,

    /// 处理结果.
    pub status: BatchStatus,

    /// 汇总记录. 跳过或失败时为 `None`.
    pub summary: Option<ScanSummary>,

    /// 纳入血管的平均流速曲线.
    pub velocity_trace: Vec<f64>,
}

impl BatchRecord {
    fn from_error(name: String, err: AnalysisError) -> Self {
        let status = if err.is_recoverable() {
            warn!("skipping `{name}`: {err}");
            BatchStatus::Skipped(err.to_string())
        } else {
            error!("`{name}` failed: {err}");
            BatchStatus::Failed(err.to_string())
        };
        Self {
            name,
            status,
            summary: None,
            velocity_trace: Vec::new(),
        }
    }
}

/// 批处理结果.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResults {
    /// 按输入顺序排列的记录.
    pub records: Vec<BatchRecord>,
}

impl BatchResults {
    /// 状态满足 `pred` 的记录个数.
    pub fn count_by(&self, pred: impl Fn(&BatchStatus) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.status)).count()
    }

    /// 分析完成的汇总记录.
    pub fn completed(&self) -> impl Iterator<Item = &ScanSummary> {
        self.records
            .iter()
            .filter(|r| r.status == BatchStatus::Completed)
            .filter_map(|r| r.summary.as_ref())
    }

    /// 以 bincode 格式保存.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AnalysisResult<()> {
        let w = BufWriter::new(File::create(path)?);
        bincode::serialize_into(w, self)?;
        Ok(())
    }

    /// 读取 [`BatchResults::save`] 保存的文件.
    pub fn load<P: AsRef<Path>>(path: P) -> AnalysisResult<Self> {
        let r = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(r)?)
    }
}

/// 分析单个扫描, 并在给出 `out_dir` 时写出结果.
fn analyse_entry<S: FlowSource, P: ProgressSink + ?Sized>(
    entry: BatchEntry<'_, S>,
    config: &AnalysisConfig,
    out_dir: Option<&Path>,
    sink: &mut P,
) -> BatchRecord {
    let name = entry.name;
    let mask = entry.mask;
    let run = (entry.loader)().and_then(|scan| {
        let region = mask.load(config.mask_threshold)?;
        let pipeline = Pipeline::new(&scan, Some(&region), config, RunMode::Batch)?;
        let outcome = pipeline.run(&mut NoProgress)?;
        if let (ScanOutcome::Completed(result), Some(dir)) = (&outcome, out_dir) {
            sink.report(progress::WRITING.0, progress::WRITING.1);
            write_scan(result, pipeline.config(), dir)?;
        }
        Ok(outcome)
    });

    match run {
        Ok(ScanOutcome::Completed(result)) => BatchRecord {
            name,
            status: BatchStatus::Completed,
            velocity_trace: result.stats.mean_curve,
            summary: Some(result.summary),
        },
        Ok(ScanOutcome::NoVessels(summary)) => BatchRecord {
            name,
            status: BatchStatus::NoVessels,
            summary: Some(summary),
            velocity_trace: Vec::new(),
        },
        Ok(ScanOutcome::AwaitingReview(_)) => BatchRecord::from_error(
            name,
            AnalysisError::Configuration("manual review is not available in batch mode".to_string()),
        ),
        Err(e) => BatchRecord::from_error(name, e),
    }
}

/// 依次分析 `entries`.
///
/// 进度标签为 `Patient i out of n`. 取消请求在两个扫描之间检查.
pub fn run_batch<S, P>(
    entries: Vec<BatchEntry<'_, S>>,
    config: &AnalysisConfig,
    out_dir: Option<&Path>,
    sink: &mut P,
) -> AnalysisResult<BatchResults>
where
    S: FlowSource,
    P: ProgressSink + ?Sized,
{
    config.validate()?;
    let total = entries.len();
    let mut results = BatchResults::default();

    for (i, entry) in entries.into_iter().enumerate() {
        if sink.is_cancelled() {
            return Err(AnalysisError::Cancelled { stage: "batch" });
        }
        let label = format!("Patient {} out of {total}", i + 1);
        sink.report((100 * i / total) as u8, &label);
        info!("{label}: `{}`", entry.name);
        results.records.push(analyse_entry(entry, config, out_dir, &mut *sink));
    }

    sink.report(100, "");
    Ok(results)
}

/// 并行分析 `entries`. 每个扫描仍在单个线程内完成, 结果保持输入顺序.
#[cfg(feature = "rayon")]
pub fn par_run_batch<S: FlowSource>(
    entries: Vec<BatchEntry<'_, S>>,
    config: &AnalysisConfig,
    out_dir: Option<&Path>,
) -> AnalysisResult<BatchResults> {
    use rayon::prelude::*;

    config.validate()?;
    let records = entries
        .into_par_iter()
        .map(|entry| analyse_entry(entry, config, out_dir, &mut NoProgress))
        .collect();
    Ok(BatchResults { records })
}

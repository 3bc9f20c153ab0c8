//! 单次扫描的分析流水线.
//!
//! 阶段依次为: 背景估计, 显著性判定与掩膜精化, 聚类, 垂直度筛选与去重, 参数计算.
//! 阶段之间汇报进度并检查取消请求, 阶段内部不可中断.
//!
//! 各阶段的产物累积在 [`AnalysisState`] 中. 人工复核模式下流水线在聚类筛选之后暂停,
//! 返回 [`ReviewSession`], 由调用方逐个接受或拒绝候选后再完成参数计算.

use crate::cluster::{magnitude_blob_map, ClusterCounts, Clusterer, Clustering};
use crate::config::AnalysisConfig;
use crate::consts::progress;
use crate::filter::{self, CandidateVessel};
use crate::params::{cohort_stats, include, CohortStats, Vessel};
use crate::preprocess::{self, Backgrounds, Smoothing};
use crate::refine::{self, Refinement};
use crate::report::{voxel_records, ScanSummary, VoxelRecord};
use crate::significance::{self, NoiseModel, SignificanceMasks};
use crate::{AnalysisError, AnalysisResult, FlowSource, Idx2d, Mask2d};
use log::{debug, info};
use ndarray::{Array2, Array3};

/// 进度事件接收方.
pub trait ProgressSink {
    /// 汇报 `(百分比, 阶段标签)`.
    fn report(&mut self, percent: u8, label: &str);

    /// 调用方是否请求取消. 只在阶段之间检查.
    #[inline]
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<F: FnMut(u8, &str)> ProgressSink for F {
    #[inline]
    fn report(&mut self, percent: u8, label: &str) {
        self(percent, label)
    }
}

/// 忽略所有进度事件.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    #[inline]
    fn report(&mut self, _percent: u8, _label: &str) {}
}

/// 检查取消请求, 未取消则汇报进度.
fn checkpoint<P: ProgressSink + ?Sized>(
    sink: &mut P,
    (percent, label): (u8, &'static str),
) -> AnalysisResult<()> {
    if sink.is_cancelled() {
        return Err(AnalysisError::Cancelled { stage: label });
    }
    sink.report(percent, label);
    Ok(())
}

/// 运行模式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// 交互式分析单个扫描. 允许人工复核.
    Interactive,

    /// 批处理.
    Batch,
}

impl RunMode {
    /// 是否为交互模式.
    #[inline]
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive)
    }
}

/// 单次扫描在阶段之间传递的状态.
///
/// 所有内容只属于当前正在分析的扫描.
#[derive(Debug, Clone)]
pub struct AnalysisState {
    /// 扫描名称.
    pub name: String,

    /// 实际生效的配置.
    pub config: AnalysisConfig,

    /// 编码流速 (cm/s).
    pub venc: f64,

    /// 幅值帧.
    pub magnitude: Array3<f64>,

    /// 背景图.
    pub backgrounds: Backgrounds,

    /// 噪声模型与去背景流速.
    pub noise: NoiseModel,

    /// 时间平均的去背景流速.
    pub mean_corrected: Array2<f64>,

    /// 精化后的显著性掩膜.
    pub masks: SignificanceMasks,

    /// 精化结果, 含最终感兴趣区.
    pub refinement: Refinement,

    /// 幅值连通块图.
    pub blob_map: Array2<i32>,

    /// 聚类计数.
    pub counts: ClusterCounts,

    /// 聚类得到的簇个数.
    pub detected: usize,

    /// `(垂直, 非垂直)` 个数. 未做垂直度筛选时为 `None`.
    pub perpendicular: Option<(usize, usize)>,

    /// `(保留, 被合并)` 个数. 未去重时为 `None`.
    pub deduplicated: Option<(usize, usize)>,
}

impl AnalysisState {
    /// 平面尺寸 `(h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.refinement.region.dim()
    }

    /// 对聚类结果建立候选, 再依次做垂直度筛选与去重.
    pub fn filter_clusters(&mut self, clustering: Clustering) -> Vec<CandidateVessel> {
        self.counts = clustering.counts;
        self.detected = clustering.clusters.len();
        let candidates =
            filter::candidates(clustering.clusters, self.mean_corrected.view(), &self.blob_map);

        let candidates = if self.config.non_perp.remove_non_perp {
            let scaled = self.scaled_magnitude();
            let split = filter::split_perpendicular(candidates, scaled.view(), &self.config.non_perp);
            self.perpendicular = Some((split.perpendicular.len(), split.non_perpendicular.len()));
            split.perpendicular
        } else {
            candidates
        };

        if self.config.dedup.deduplicate {
            let out = filter::deduplicate(
                candidates,
                self.config.dedup.deduplicate_range,
                self.config.dedup_by_blob(),
            );
            self.deduplicated = Some((out.lone.len(), out.clustered.len()));
            out.lone
        } else {
            candidates
        }
    }

    /// 垂直度分析使用的缩放平均幅值图.
    fn scaled_magnitude(&self) -> Array2<f64> {
        filter::scaled_magnitude(
            self.magnitude.view(),
            self.backgrounds.mean_magnitude.view(),
            self.config.non_perp.min_scaling,
            self.config.non_perp.max_scaling,
        )
    }

    /// 参数计算, 得到最终结果.
    pub fn conclude(self, lone: Vec<CandidateVessel>) -> ScanOutcome {
        let mut vessel_mask = Mask2d::from_elem(self.shape(), false);
        for cand in &lone {
            for &p in cand.cluster.pixels() {
                vessel_mask[p] = true;
            }
        }

        let vessels: Vec<Vessel> = lone
            .into_iter()
            .map(|c| {
                Vessel::from_candidate(
                    c,
                    self.noise.corrected_velocity.view(),
                    self.magnitude.view(),
                    &self.masks,
                )
            })
            .collect();
        let inclusion = include(vessels, &self.config.selection(), self.venc);
        let stats = cohort_stats(&inclusion.included);
        let summary = ScanSummary::new(&self, &vessel_mask, &inclusion, stats.as_ref());

        match stats {
            Some(stats) => {
                let records = voxel_records(&self, &inclusion.included);
                info!(
                    "{}: {} vessels included, Vmean {:.4}, PI_norm {:.4}",
                    self.name, stats.n, stats.vmean, stats.pi_norm
                );
                ScanOutcome::Completed(ScanResult {
                    summary,
                    stats,
                    vessels: inclusion.included,
                    records,
                    vessel_mask,
                })
            }
            None => {
                info!("{}: no vessels found", self.name);
                ScanOutcome::NoVessels(summary)
            }
        }
    }
}

/// 单次扫描的完整结果.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// 汇总记录.
    pub summary: ScanSummary,

    /// 群体统计量.
    pub stats: CohortStats,

    /// 纳入统计的血管.
    pub vessels: Vec<Vessel>,

    /// 逐体素记录.
    pub records: Vec<VoxelRecord>,

    /// 保留血管 (去重后) 的并集.
    pub vessel_mask: Mask2d,
}

/// 流水线结果.
#[derive(Debug)]
pub enum ScanOutcome {
    /// 分析完成且至少纳入一根血管.
    Completed(ScanResult),

    /// 没有找到血管. 不是错误.
    NoVessels(ScanSummary),

    /// 等待人工复核.
    AwaitingReview(ReviewSession),
}

impl ScanOutcome {
    /// 汇总记录. 复核尚未完成时为 `None`.
    pub fn summary(&self) -> Option<&ScanSummary> {
        match self {
            Self::Completed(r) => Some(&r.summary),
            Self::NoVessels(s) => Some(s),
            Self::AwaitingReview(_) => None,
        }
    }

    /// 取出完整结果.
    pub fn into_result(self) -> Option<ScanResult> {
        match self {
            Self::Completed(r) => Some(r),
            _ => None,
        }
    }
}

/// 单次扫描的分析流水线.
pub struct Pipeline<'a, S: FlowSource + ?Sized> {
    scan: &'a S,
    region: &'a Mask2d,
    config: AnalysisConfig,
    mode: RunMode,
}

impl<'a, S: FlowSource + ?Sized> Pipeline<'a, S> {
    /// 检查配置与输入.
    ///
    /// 1. 配置非法时返回 [`AnalysisError::Configuration`], 此时不做任何计算;
    /// 2. 缺少感兴趣区掩膜时返回 [`AnalysisError::MissingData`];
    /// 3. 掩膜与帧尺寸不一致时返回 [`AnalysisError::ShapeMismatch`].
    pub fn new(
        scan: &'a S,
        region: Option<&'a Mask2d>,
        config: &AnalysisConfig,
        mode: RunMode,
    ) -> AnalysisResult<Self> {
        config.validate()?;
        let region = region.ok_or_else(|| {
            AnalysisError::MissingData(format!("no region mask for scan `{}`", scan.name()))
        })?;
        let expected = scan.frames().shape();
        if region.dim() != expected {
            return Err(AnalysisError::ShapeMismatch {
                expected,
                found: region.dim(),
            });
        }
        Ok(Self {
            scan,
            region,
            config: config.effective(mode.is_interactive()),
            mode,
        })
    }

    /// 实际生效的配置.
    #[inline]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// 运行全部阶段.
    pub fn run<P: ProgressSink + ?Sized>(&self, sink: &mut P) -> AnalysisResult<ScanOutcome> {
        let name = self.scan.name();
        let frames = self.scan.frames();
        let tags = self.scan.tags();
        info!("analysing `{name}` ({})", self.config.structure()?.label());

        checkpoint(sink, progress::MEDIANS)?;
        let diameter = self.config.median_diameter(tags.pixel_spacing)?;
        let smoothing = Smoothing::new(diameter, self.config.gaussian_smoothing);
        debug!("background filter: {smoothing:?}");
        let backgrounds = preprocess::estimate(frames, tags.venc, smoothing);

        checkpoint(sink, progress::SIGNIFICANCE)?;
        let (noise, mut masks) = significance::estimate(frames, &backgrounds, tags, &self.config)?;
        let raw_pos = masks.mag_pos.clone();
        let raw_neg = masks.mag_neg.clone();
        let refinement = refine::refine(self.region, &noise, &backgrounds, &mut masks, &self.config);

        checkpoint(sink, progress::CLUSTERS)?;
        let clustering = Clusterer::new(&masks, self.config.selection()).run();
        debug!("{} clusters detected", clustering.clusters.len());
        let blob_map = magnitude_blob_map(&raw_pos, &raw_neg, &refinement.region);

        let mut state = AnalysisState {
            name: name.to_string(),
            config: self.config.clone(),
            venc: tags.venc,
            magnitude: frames.magnitude().to_owned(),
            mean_corrected: noise.mean_corrected_velocity(),
            backgrounds,
            noise,
            masks,
            refinement,
            blob_map,
            counts: ClusterCounts::default(),
            detected: 0,
            perpendicular: None,
            deduplicated: None,
        };
        let lone = state.filter_clusters(clustering);
        if lone.is_empty() {
            info!("`{name}`: no significant clusters left after filtering");
        }

        if self.config.manual_review(self.mode.is_interactive()) && !lone.is_empty() {
            return Ok(ScanOutcome::AwaitingReview(ReviewSession::new(state, lone)));
        }

        if sink.is_cancelled() {
            return Err(AnalysisError::Cancelled { stage: "parameters" });
        }
        let outcome = state.conclude(lone);
        sink.report(progress::DONE.0, progress::DONE.1);
        Ok(outcome)
    }
}

/// 人工复核请求: 展示一个候选.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// 候选序号.
    pub index: usize,

    /// 候选总数.
    pub total: usize,

    /// 代表体素.
    pub representative: Idx2d,

    /// 椭圆长短轴之比.
    pub axes_ratio: f64,

    /// 该候选的掩膜.
    pub mask: Mask2d,
}

/// 人工复核决定.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReviewDecision {
    /// 保留.
    Accept,

    /// 丢弃.
    Reject,
}

/// 人工复核会话. 以游标逐个处理候选.
#[derive(Debug)]
pub struct ReviewSession {
    state: AnalysisState,
    candidates: Vec<CandidateVessel>,
    decisions: Vec<Option<ReviewDecision>>,
    cursor: usize,
}

impl ReviewSession {
    fn new(state: AnalysisState, mut candidates: Vec<CandidateVessel>) -> Self {
        // 复核界面总是展示轴比, 即使未做垂直度筛选.
        if !state.config.non_perp.remove_non_perp {
            let scaled = state.scaled_magnitude();
            for cand in candidates.iter_mut() {
                cand.axes_ratio = filter::axes_ratio(cand, scaled.view(), &state.config.non_perp);
            }
        }
        let decisions = vec![None; candidates.len()];
        Self {
            state,
            candidates,
            decisions,
            cursor: 0,
        }
    }

    /// 候选总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// 是否没有候选.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// 当前游标.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 分析状态.
    #[inline]
    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    /// 当前待复核的候选. 全部处理完毕后为 `None`.
    pub fn current(&self) -> Option<ReviewRequest> {
        let cand = self.candidates.get(self.cursor)?;
        Some(ReviewRequest {
            index: self.cursor,
            total: self.len(),
            representative: cand.representative,
            axes_ratio: cand.axes_ratio,
            mask: cand.cluster.to_mask(self.state.shape()),
        })
    }

    /// 记录当前候选的决定并前进, 返回下一个请求.
    pub fn decide(&mut self, decision: ReviewDecision) -> Option<ReviewRequest> {
        if let Some(slot) = self.decisions.get_mut(self.cursor) {
            *slot = Some(decision);
            self.cursor += 1;
        }
        self.current()
    }

    /// 从 `cursor` 重新开始复核, 丢弃其后的所有决定.
    pub fn restart_from(&mut self, cursor: usize) {
        let cursor = cursor.min(self.len());
        self.decisions[cursor..].fill(None);
        self.cursor = cursor;
    }

    /// 所有候选的并集掩膜.
    pub fn candidate_mask(&self) -> Mask2d {
        let mut mask = Mask2d::from_elem(self.state.shape(), false);
        for cand in &self.candidates {
            for &p in cand.cluster.pixels() {
                mask[p] = true;
            }
        }
        mask
    }

    /// 立即结束复核. 未处理的候选视为丢弃.
    pub fn stop(self) -> ScanOutcome {
        let undecided = self.decisions.iter().filter(|d| d.is_none()).count();
        if undecided > 0 {
            info!("review stopped with {undecided} clusters undecided");
        }
        self.conclude()
    }

    /// 完成复核. 仍有未处理的候选时返回 [`AnalysisError::MissingData`].
    pub fn finish(self) -> AnalysisResult<ScanOutcome> {
        let undecided = self.len() - self.cursor;
        if undecided > 0 {
            return Err(AnalysisError::MissingData(format!(
                "{undecided} clusters still awaiting review"
            )));
        }
        Ok(self.conclude())
    }

    fn conclude(self) -> ScanOutcome {
        let accepted: Vec<CandidateVessel> = self
            .candidates
            .into_iter()
            .zip(self.decisions)
            .filter_map(|(c, d)| (d == Some(ReviewDecision::Accept)).then_some(c))
            .collect();
        debug!("{} clusters accepted on review", accepted.len());
        self.state.conclude(accepted)
    }
}

//! 显著像素聚类.
//!
//! 按 (正向流速, 高幅值), (负向流速, 高幅值), (正向, 低幅值), (负向, 低幅值),
//! (正向, 等幅值), (负向, 等幅值) 的顺序依次提取 8-连通簇. 每一轮中,
//! 流速掩膜上与候选区相交的整个连通域都会被移出后续轮次,
//! 因此每个显著像素至多属于一个簇.

use crate::config::ClusterSelection;
use crate::consts::{FlowDirection, MagnitudeClass};
use crate::data::areas::{and, area_to_mask, areas8, centroid, label_map};
use crate::significance::SignificanceMasks;
use crate::{Area2d, Idx2d, Idx2dF, Mask2d};
use log::debug;
use ndarray::{Array2, Zip};

/// 一个 8-连通簇及其来源组合.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pixels: Area2d,
    flow: FlowDirection,
    magnitude: MagnitudeClass,
}

impl Cluster {
    /// 由像素集合创建. `pixels` 非空且按行优先排序.
    pub fn new(mut pixels: Area2d, flow: FlowDirection, magnitude: MagnitudeClass) -> Self {
        debug_assert!(!pixels.is_empty());
        pixels.sort_unstable();
        Self {
            pixels,
            flow,
            magnitude,
        }
    }

    /// 像素索引, 行优先排列.
    #[inline]
    pub fn pixels(&self) -> &[Idx2d] {
        &self.pixels
    }

    /// 像素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// 流向.
    #[inline]
    pub fn flow(&self) -> FlowDirection {
        self.flow
    }

    /// 幅值类别.
    #[inline]
    pub fn magnitude(&self) -> MagnitudeClass {
        self.magnitude
    }

    /// 质心.
    pub fn centroid(&self) -> Idx2dF {
        centroid(&self.pixels).unwrap_or_default()
    }

    /// 重建为 `shape` 大小的掩膜.
    pub fn to_mask(&self, shape: Idx2d) -> Mask2d {
        area_to_mask(&self.pixels, shape)
    }
}

/// 聚类状态. 依次处理高幅值、低幅值、等幅值三轮, 每轮包含正负两个流向.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClusterPass {
    /// 等待处理高幅值.
    AwaitingPositiveMag,

    /// 等待处理低幅值.
    AwaitingNegativeMag,

    /// 等待处理等幅值.
    AwaitingIsointense,

    /// 全部完成.
    Done,
}

impl ClusterPass {
    /// 本轮处理的幅值类别.
    pub fn magnitude(&self) -> Option<MagnitudeClass> {
        match self {
            Self::AwaitingPositiveMag => Some(MagnitudeClass::Positive),
            Self::AwaitingNegativeMag => Some(MagnitudeClass::Negative),
            Self::AwaitingIsointense => Some(MagnitudeClass::Isointense),
            Self::Done => None,
        }
    }

    /// 下一状态.
    pub fn next(self) -> Self {
        match self {
            Self::AwaitingPositiveMag => Self::AwaitingNegativeMag,
            Self::AwaitingNegativeMag => Self::AwaitingIsointense,
            Self::AwaitingIsointense | Self::Done => Self::Done,
        }
    }
}

/// 各幅值类别下保留的簇个数.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ClusterCounts {
    /// 高幅值.
    pub positive_mag: usize,
    /// 低幅值.
    pub negative_mag: usize,
    /// 等幅值.
    pub isointense: usize,
}

impl ClusterCounts {
    fn bump(&mut self, mag: MagnitudeClass, n: usize) {
        match mag {
            MagnitudeClass::Positive => self.positive_mag += n,
            MagnitudeClass::Negative => self.negative_mag += n,
            MagnitudeClass::Isointense => self.isointense += n,
        }
    }
}

/// 聚类结果.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// 保留的簇, 按处理顺序排列.
    pub clusters: Vec<Cluster>,

    /// 各幅值类别下的簇个数.
    pub counts: ClusterCounts,
}

/// 从 `entry` 中移除所有与 `overlap` 相交的 8-连通域 (整个连通域一并移除).
pub fn remove_overlapping_components(entry: &Mask2d, overlap: &Mask2d) -> Mask2d {
    let mut out = entry.clone();
    for area in areas8(entry.view()) {
        if area.iter().any(|&p| overlap[p]) {
            for p in area {
                out[p] = false;
            }
        }
    }
    out
}

/// 幅值连通块图 `labels(mag_pos ∧ region) - labels(mag_neg ∧ region)`.
/// 高幅值块为正编号, 低幅值块为负编号, 其余为 0.
pub fn magnitude_blob_map(mag_pos: &Mask2d, mag_neg: &Mask2d, region: &Mask2d) -> Array2<i32> {
    let (_, pos) = label_map(and(mag_pos, region).view());
    let (_, neg) = label_map(and(mag_neg, region).view());
    Zip::from(&pos).and(&neg).map_collect(|&p, &n| p - n)
}

/// 聚类状态机.
pub struct Clusterer<'a> {
    state: ClusterPass,
    entry_pos: Mask2d,
    entry_neg: Mask2d,
    masks: &'a SignificanceMasks,
    selection: ClusterSelection,
    clusters: Vec<Cluster>,
    counts: ClusterCounts,
}

impl<'a> Clusterer<'a> {
    /// 以精化后的显著性掩膜初始化.
    pub fn new(masks: &'a SignificanceMasks, selection: ClusterSelection) -> Self {
        Self {
            state: ClusterPass::AwaitingPositiveMag,
            entry_pos: masks.flow_pos.clone(),
            entry_neg: masks.flow_neg.clone(),
            masks,
            selection,
            clusters: Vec::new(),
            counts: ClusterCounts::default(),
        }
    }

    /// 当前状态.
    #[inline]
    pub fn state(&self) -> ClusterPass {
        self.state
    }

    /// 执行一轮 (一个幅值类别, 两个流向), 返回新状态.
    pub fn step(&mut self) -> ClusterPass {
        let Some(mag) = self.state.magnitude() else {
            return self.state;
        };
        let masks = self.masks;
        let mag_mask = masks.magnitude(mag);

        for flow in FlowDirection::ALL {
            let entry = match flow {
                FlowDirection::Positive => &mut self.entry_pos,
                FlowDirection::Negative => &mut self.entry_neg,
            };
            let candidate = and(entry, mag_mask);
            let areas = areas8(candidate.view());
            if areas.is_empty() {
                continue;
            }
            if self.selection.allows(flow, mag) {
                debug!("{} clusters for {flow:?} flow, {mag:?} magnitude", areas.len());
                self.counts.bump(mag, areas.len());
                self.clusters
                    .extend(areas.into_iter().map(|a| Cluster::new(a, flow, mag)));
            }
            *entry = remove_overlapping_components(entry, &candidate);
        }

        self.state = self.state.next();
        self.state
    }

    /// 执行所有剩余轮次.
    pub fn run(mut self) -> Clustering {
        while self.step() != ClusterPass::Done {}
        Clustering {
            clusters: self.clusters,
            counts: self.counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn b(a: Array2<u8>) -> Mask2d {
        a.mapv(|v| v != 0)
    }

    fn masks(flow_pos: Mask2d, flow_neg: Mask2d, mag_pos: Mask2d, mag_neg: Mask2d) -> SignificanceMasks {
        let mag_iso = Zip::from(&mag_pos)
            .and(&mag_neg)
            .map_collect(|&p, &n| !p && !n);
        SignificanceMasks {
            flow_pos,
            flow_neg,
            mag_pos,
            mag_neg,
            mag_iso,
        }
    }

    #[test]
    fn test_remove_overlapping_components() {
        let entry = b(arr2(&[
            [1, 1, 0, 0, 1], //
            [0, 1, 0, 0, 1],
            [0, 0, 0, 0, 0],
            [1, 0, 0, 1, 0],
        ]));
        let overlap = b(arr2(&[
            [0, 0, 0, 0, 0], //
            [0, 1, 0, 0, 0],
            [0, 0, 0, 0, 0],
            [0, 0, 0, 0, 0],
        ]));
        let out = remove_overlapping_components(&entry, &overlap);
        assert!(!out[(0, 0)] && !out[(0, 1)] && !out[(1, 1)]);
        assert!(out[(0, 4)] && out[(1, 4)] && out[(3, 0)] && out[(3, 3)]);
    }

    #[test]
    fn test_exclusive_assignment() {
        // 一个正向流速连通域, 左半高幅值, 右半等幅值.
        let flow_pos = b(arr2(&[[1, 1, 1, 1], [0; 4], [0; 4]]));
        let flow_neg = Mask2d::from_elem((3, 4), false);
        let mag_pos = b(arr2(&[[1, 1, 0, 0], [0; 4], [0; 4]]));
        let mag_neg = Mask2d::from_elem((3, 4), false);
        let m = masks(flow_pos, flow_neg, mag_pos, mag_neg);
        let sel = ClusterSelection {
            positive_flow: true,
            negative_flow: true,
            positive_magnitude: true,
            negative_magnitude: true,
            isointense_magnitude: true,
        };
        let out = Clusterer::new(&m, sel).run();
        // 整个连通域在第一轮被移出, 等幅值轮次不会再次提取右半部分.
        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].pixels(), &[(0, 0), (0, 1)]);
        assert_eq!(out.counts.positive_mag, 1);
        assert_eq!(out.counts.isointense, 0);
    }

    #[test]
    fn test_disabled_combination_still_consumes() {
        // 基底节只保留 (正向, 高幅值). 低幅值簇被丢弃, 且不会在等幅值轮次中重现.
        let flow_pos = b(arr2(&[[1, 1, 0, 0, 1], [0; 5]]));
        let flow_neg = b(arr2(&[[0; 5], [1, 0, 0, 0, 0]]));
        let mag_pos = b(arr2(&[[0, 0, 0, 0, 1], [1, 0, 0, 0, 0]]));
        let mag_neg = b(arr2(&[[1, 0, 0, 0, 0], [0; 5]]));
        let m = masks(flow_pos, flow_neg, mag_pos, mag_neg);

        let mut c = Clusterer::new(&m, ClusterSelection::basal_ganglia());
        assert_eq!(c.state(), ClusterPass::AwaitingPositiveMag);
        assert_eq!(c.step(), ClusterPass::AwaitingNegativeMag);
        let out = c.run();
        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].pixels(), &[(0, 4)]);
        assert_eq!(out.clusters[0].flow(), FlowDirection::Positive);
        assert_eq!(out.counts.positive_mag, 1);
        assert_eq!(out.counts.negative_mag, 0);
    }

    #[test]
    fn test_pairwise_disjoint() {
        let flow_pos = b(arr2(&[[1, 0, 1, 0], [1, 0, 1, 0], [0, 0, 0, 1]]));
        let flow_neg = b(arr2(&[[0, 1, 0, 0], [0, 1, 0, 0], [1, 1, 0, 0]]));
        let mag_pos = b(arr2(&[[1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 1]]));
        let mag_neg = b(arr2(&[[0, 0, 1, 0], [0, 0, 0, 0], [1, 0, 0, 0]]));
        let m = masks(flow_pos, flow_neg, mag_pos, mag_neg);
        let sel = ClusterSelection {
            positive_flow: true,
            negative_flow: true,
            positive_magnitude: true,
            negative_magnitude: true,
            isointense_magnitude: true,
        };
        let out = Clusterer::new(&m, sel).run();
        let mut seen = Mask2d::from_elem((3, 4), false);
        for c in out.clusters.iter() {
            for &p in c.pixels() {
                assert!(!seen[p], "pixel {p:?} assigned twice");
                seen[p] = true;
            }
        }
        assert_eq!(
            out.counts.positive_mag + out.counts.negative_mag + out.counts.isointense,
            out.clusters.len()
        );
    }

    #[test]
    fn test_blob_map() {
        let mag_pos = b(arr2(&[[1, 0, 0, 1], [1, 0, 0, 0]]));
        let mag_neg = b(arr2(&[[0, 0, 1, 0], [0, 1, 0, 0]]));
        let region = b(arr2(&[[1, 1, 1, 0], [1, 1, 1, 1]]));
        let map = magnitude_blob_map(&mag_pos, &mag_neg, &region);
        assert_eq!(map, arr2(&[[1, 0, -1, 0], [1, -1, 0, 0]]));
    }

    #[test]
    fn test_empty() {
        let z = Mask2d::from_elem((4, 4), false);
        let m = masks(z.clone(), z.clone(), z.clone(), z.clone());
        let out = Clusterer::new(&m, ClusterSelection::basal_ganglia()).run();
        assert!(out.clusters.is_empty());
        assert_eq!(out.counts, ClusterCounts::default());
    }
}

//! 去重.
//!
//! 同一根血管可能被拆成多个簇 (如流速掩膜在血管中心断开). 依次按
//! 代表体素坐标、幅值连通块、代表体素间距三种规则合并, 每组只保留流速最大的一个,
//! 并列时保留靠前者.

use super::CandidateVessel;
use itertools::Itertools;
use log::debug;
use std::collections::{HashMap, HashSet};

/// 去重结果.
#[derive(Debug, Clone, Default)]
pub struct Deduplicated {
    /// 保留的血管 ("lone vessels").
    pub lone: Vec<CandidateVessel>,

    /// 被合并掉的簇 ("cluster vessels").
    pub clustered: Vec<CandidateVessel>,
}

/// 在每组中选出保留者, 其余放入 `dropped`. `group_of` 把 `items` 的下标映射为组号.
fn keep_strongest(
    items: Vec<CandidateVessel>,
    group_of: impl Fn(usize) -> usize,
    dropped: &mut Vec<CandidateVessel>,
) -> Vec<CandidateVessel> {
    let mut best: HashMap<usize, usize> = HashMap::new();
    for (i, c) in items.iter().enumerate() {
        best.entry(group_of(i))
            .and_modify(|b| {
                if c.peak_velocity > items[*b].peak_velocity {
                    *b = i;
                }
            })
            .or_insert(i);
    }
    let winners: HashSet<usize> = best.into_values().collect();
    let mut kept = Vec::with_capacity(winners.len());
    for (i, c) in items.into_iter().enumerate() {
        if winners.contains(&i) {
            kept.push(c);
        } else {
            dropped.push(c);
        }
    }
    kept
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// 去重.
///
/// 1. 代表体素坐标相同者合并;
/// 2. `by_blob` 为真时, 代表体素落在同一幅值连通块 (编号非 0) 者合并;
/// 3. 代表体素距离小于 `range` 者 (传递地) 合并.
///
/// 保留者两两之间的距离均不小于 `range`.
pub fn deduplicate(candidates: Vec<CandidateVessel>, range: f64, by_blob: bool) -> Deduplicated {
    let mut clustered = Vec::new();
    let total = candidates.len();

    // 1. 坐标
    let keys: Vec<_> = candidates.iter().map(|c| c.representative).collect();
    let mut first_at = HashMap::new();
    let by_pos: Vec<usize> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| *first_at.entry(*k).or_insert(i))
        .collect();
    let items = keep_strongest(candidates, |i| by_pos[i], &mut clustered);

    // 2. 幅值连通块
    let items = if by_blob {
        let blobs: Vec<i32> = items.iter().map(|c| c.blob).collect();
        let mut first_in = HashMap::new();
        let group: Vec<usize> = blobs
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                if b == 0 {
                    i
                } else {
                    *first_in.entry(b).or_insert(i)
                }
            })
            .collect();
        keep_strongest(items, |i| group[i], &mut clustered)
    } else {
        items
    };

    // 3. 距离
    let mut parent: Vec<usize> = (0..items.len()).collect();
    for (i, j) in (0..items.len()).tuple_combinations() {
        if items[i].distance(&items[j]) < range {
            let (a, b) = (find(&mut parent, i), find(&mut parent, j));
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
    }
    let roots: Vec<usize> = (0..items.len()).map(|i| find(&mut parent, i)).collect();
    let lone = keep_strongest(items, |i| roots[i], &mut clustered);

    debug!("deduplication kept {} of {total} clusters", lone.len());
    Deduplicated { lone, clustered }
}

//! 二值掩膜上的 8-连通区域.

use super::neighbour8;
use crate::{Area2d, Areas2d, Idx2d, Idx2dF, Mask2d};
use ndarray::{Array2, ArrayView2};
use std::collections::VecDeque;

/// 按照 8-相邻规则获取 `mask` 中所有前景区域. 两个像素 `p1` 和 `p2` 属于同一个区域,
/// 当且仅当存在一条从 `p1` 到 `p2` 的 8-相邻路径, 且路径上的所有像素都为前景.
///
/// 区域按其首个像素的行优先顺序排列, 区域内部像素同样按行优先排序.
pub fn areas8(mask: ArrayView2<bool>) -> Areas2d {
    let (height, width) = mask.dim();
    let mut visited = Array2::from_elem((height, width), false);
    let mut ans = Areas2d::new();
    let mut bfs_q = VecDeque::with_capacity(8);

    for (pos, &fg) in mask.indexed_iter() {
        if !fg || visited[pos] {
            continue;
        }
        visited[pos] = true;
        bfs_q.push_back(pos);
        let mut this_area = Area2d::with_capacity(1);
        while let Some(cur_pos) = bfs_q.pop_front() {
            this_area.push(cur_pos);
            for p in neighbour8(cur_pos) {
                // wrapping_sub 产生的越界索引在此被过滤.
                if mask.get(p).copied().unwrap_or(false) && !visited[p] {
                    visited[p] = true;
                    bfs_q.push_back(p);
                }
            }
        }
        this_area.sort_unstable();
        ans.push(this_area);
    }
    ans
}

/// 区域标号图. 背景为 0, 第 `i` 个区域 (按 [`areas8`] 顺序) 标为 `i + 1`.
pub fn label_map(mask: ArrayView2<bool>) -> (usize, Array2<i32>) {
    let areas = areas8(mask);
    let mut labels = Array2::zeros(mask.dim());
    for (idx, area) in areas.iter().enumerate() {
        for &pos in area {
            labels[pos] = idx as i32 + 1;
        }
    }
    (areas.len(), labels)
}

/// 由区域像素重建掩膜.
pub fn area_to_mask(area: &[Idx2d], shape: Idx2d) -> Mask2d {
    let mut mask = Mask2d::from_elem(shape, false);
    for &pos in area {
        mask[pos] = true;
    }
    mask
}

/// 区域质心. 空区域返回 `None`.
pub fn centroid(area: &[Idx2d]) -> Option<Idx2dF> {
    if area.is_empty() {
        return None;
    }
    let n = area.len() as f64;
    let (sr, sc) = area
        .iter()
        .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
    Some((sr / n, sc / n))
}

/// 区域外接矩形 `(top, left, bottom, right)`, 均为闭区间端点.
pub fn bounding_box(area: &[Idx2d]) -> Option<(usize, usize, usize, usize)> {
    let mut it = area.iter().copied();
    let (r0, c0) = it.next()?;
    Some(it.fold((r0, c0, r0, c0), |(t, l, b, r), (y, x)| {
        (t.min(y), l.min(x), b.max(y), r.max(x))
    }))
}

/// 两个掩膜逐像素与.
pub fn and(a: &Mask2d, b: &Mask2d) -> Mask2d {
    ndarray::Zip::from(a).and(b).map_collect(|&x, &y| x && y)
}

/// `a` 中去掉 `b` 的部分.
pub fn and_not(a: &Mask2d, b: &Mask2d) -> Mask2d {
    ndarray::Zip::from(a).and(b).map_collect(|&x, &y| x && !y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn mask(m: &[[u8; 5]; 4]) -> Mask2d {
        let a = arr2(m);
        a.mapv(|v| v != 0)
    }

    #[test]
    fn test_diagonal_is_connected() {
        let m = mask(&[
            [1, 0, 0, 0, 1], //
            [0, 1, 0, 0, 0],
            [0, 0, 0, 1, 1],
            [0, 0, 0, 0, 1],
        ]);
        let areas = areas8(m.view());
        assert_eq!(areas.len(), 3);
        assert_eq!(areas[0], vec![(0, 0), (1, 1)]);
        assert_eq!(areas[1], vec![(0, 4)]);
        assert_eq!(areas[2], vec![(2, 3), (2, 4), (3, 4)]);
    }

    #[test]
    fn test_raster_order_labels() {
        let m = mask(&[
            [0, 0, 0, 1, 0], //
            [1, 0, 0, 1, 0],
            [1, 0, 0, 0, 0],
            [0, 0, 1, 0, 0],
        ]);
        let (n, labels) = label_map(m.view());
        assert_eq!(n, 3);
        assert_eq!(labels[(0, 3)], 1);
        assert_eq!(labels[(1, 3)], 1);
        assert_eq!(labels[(1, 0)], 2);
        assert_eq!(labels[(3, 2)], 3);
        assert_eq!(labels[(0, 0)], 0);
    }

    #[test]
    fn test_empty() {
        let m = Mask2d::from_elem((3, 3), false);
        assert!(areas8(m.view()).is_empty());
        assert_eq!(centroid(&[]), None);
        assert_eq!(bounding_box(&[]), None);
    }

    #[test]
    fn test_geometry() {
        let area = vec![(1, 1), (1, 2), (2, 1), (2, 2), (3, 5)];
        let (r, c) = centroid(&area).unwrap();
        assert!((r - 1.8).abs() < 1e-12);
        assert!((c - 2.2).abs() < 1e-12);
        assert_eq!(bounding_box(&area), Some((1, 1, 3, 5)));
        let m = area_to_mask(&area, (4, 6));
        assert_eq!(m.iter().filter(|&&v| v).count(), 5);
        assert!(m[(3, 5)]);
    }

    #[test]
    fn test_logic() {
        let a = mask(&[[1, 1, 0, 0, 0], [0; 5], [0; 5], [0; 5]]);
        let b = mask(&[[0, 1, 1, 0, 0], [0; 5], [0; 5], [0; 5]]);
        let x = and(&a, &b);
        assert!(x[(0, 1)] && !x[(0, 0)]);
        let y = and_not(&a, &b);
        assert!(y[(0, 0)] && !y[(0, 1)] && !y[(0, 2)]);
    }
}

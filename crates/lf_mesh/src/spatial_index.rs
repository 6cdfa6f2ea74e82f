// crates/lf_mesh/src/spatial_index.rs

//! 单元空间索引
//!
//! 基于 R-Tree 的三维包围盒索引，用于快速筛选可能包含某点、
//! 或可能与某线段相交的候选单元。使用 rstar crate 实现。
//!
//! 索引只给出包围盒层面的候选，精确判断由单元几何完成。

use crate::bounds::Bounds;
use glam::DVec3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// 单元包围盒
#[derive(Debug, Clone)]
pub struct CellEnvelope {
    /// 单元索引
    pub cell_index: usize,
    /// 最小角点
    pub min: [f64; 3],
    /// 最大角点
    pub max: [f64; 3],
}

impl CellEnvelope {
    /// 由包围盒创建
    pub fn new(cell_index: usize, bounds: &Bounds) -> Self {
        Self {
            cell_index,
            min: bounds.min.to_array(),
            max: bounds.max.to_array(),
        }
    }

    /// 闭区间包含判断
    #[inline]
    pub fn contains_point(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|a| p[a] >= self.min[a] && p[a] <= self.max[a])
    }
}

impl RTreeObject for CellEnvelope {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

impl PointDistance for CellEnvelope {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        // 点到 AABB 最短距离的平方
        (0..3)
            .map(|a| {
                let d = if point[a] < self.min[a] {
                    self.min[a] - point[a]
                } else if point[a] > self.max[a] {
                    point[a] - self.max[a]
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    fn contains_point(&self, point: &[f64; 3]) -> bool {
        CellEnvelope::contains_point(self, point)
    }
}

// ============================================================
// 空间索引
// ============================================================

/// 网格空间索引
pub struct MeshSpatialIndex {
    tree: RTree<CellEnvelope>,
    n_cells: usize,
}

impl std::fmt::Debug for MeshSpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSpatialIndex")
            .field("n_cells", &self.n_cells)
            .finish()
    }
}

impl MeshSpatialIndex {
    /// 从单元包围盒批量构建
    ///
    /// # 参数
    /// - `n_cells`: 单元数量
    /// - `get_bounds`: 获取第 i 个单元包围盒的函数
    pub fn build<F>(n_cells: usize, get_bounds: F) -> Self
    where
        F: Fn(usize) -> Bounds,
    {
        let envelopes: Vec<CellEnvelope> = (0..n_cells)
            .map(|i| CellEnvelope::new(i, &get_bounds(i)))
            .filter(|e| (0..3).all(|a| e.min[a] <= e.max[a]))
            .collect();
        Self {
            tree: RTree::bulk_load(envelopes),
            n_cells,
        }
    }

    /// 单元数量
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// 包围盒（膨胀 `tol` 后）包含点 `p` 的候选单元
    pub fn candidates_at(&self, p: DVec3, tol: f64, out: &mut Vec<usize>) {
        out.clear();
        let query = AABB::from_corners(
            (p - DVec3::splat(tol)).to_array(),
            (p + DVec3::splat(tol)).to_array(),
        );
        out.extend(
            self.tree
                .locate_in_envelope_intersecting(&query)
                .map(|e| e.cell_index),
        );
        out.sort_unstable();
    }

    /// 包围盒与线段 p1-p2 相交的候选单元
    pub fn candidates_along_segment(&self, p1: DVec3, p2: DVec3, tol: f64, out: &mut Vec<usize>) {
        out.clear();
        let seg = Bounds::from_points([p1, p2].iter()).inflate(tol);
        let query = AABB::from_corners(seg.min.to_array(), seg.max.to_array());
        out.extend(
            self.tree
                .locate_in_envelope_intersecting(&query)
                .filter(|e| {
                    Bounds::new(DVec3::from_array(e.min), DVec3::from_array(e.max))
                        .intersects_segment(p1, p2, tol)
                })
                .map(|e| e.cell_index),
        );
        out.sort_unstable();
    }

    /// 距离点最近的单元
    pub fn nearest_cell(&self, p: DVec3) -> Option<usize> {
        self.tree.nearest_neighbor(&p.to_array()).map(|e| e.cell_index)
    }
}

// crates/lf_mesh/src/locator.rs

//! 单元定位器
//!
//! 定位器回答两个问题：某点落在哪个单元内，以及某线段可能穿过哪些单元。
//! 积分模型为每个显式点集数据集各构建一个定位器，构建在注册时完成，
//! 此后定位器只读，可被多个工作线程并发查询。
//!
//! - [`RTreeCellLocator`]: R-Tree 包围盒筛选 + 单元精确判断
//! - [`BruteForceLocator`]: 逐单元遍历，主要用于小网格与交叉验证

use crate::bounds::Bounds;
use crate::cell::Cell;
use crate::dataset::DataSet;
use crate::spatial_index::MeshSpatialIndex;
use glam::DVec3;
use std::fmt;

/// 定位器能力
pub trait CellLocator: Send + Sync + fmt::Debug {
    /// 名称
    fn name(&self) -> &'static str;

    /// 为数据集构建内部结构
    fn build_locator(&mut self, dataset: &dyn DataSet);

    /// 是否已构建
    fn is_built(&self) -> bool;

    /// 查找包含 `x` 的单元，找到时填充 `cell` 与 `weights`
    fn find_cell(
        &self,
        dataset: &dyn DataSet,
        x: DVec3,
        tol: f64,
        cell: &mut Cell,
        weights: &mut Vec<f64>,
    ) -> Option<usize>;

    /// 收集包围盒与线段相交的单元
    fn find_cells_along_line(
        &self,
        dataset: &dyn DataSet,
        p1: DVec3,
        p2: DVec3,
        tol: f64,
        cells: &mut Vec<usize>,
    );
}

fn cell_bounds(dataset: &dyn DataSet, cell_id: usize, cell: &mut Cell) -> Bounds {
    dataset.get_cell(cell_id, cell);
    cell.bounds()
}

// ============================================================
// R-Tree 定位器
// ============================================================

/// 基于 R-Tree 的定位器
#[derive(Debug, Default)]
pub struct RTreeCellLocator {
    index: Option<MeshSpatialIndex>,
}

impl RTreeCellLocator {
    /// 创建未构建的定位器
    pub fn new() -> Self {
        Self::default()
    }
}

impl CellLocator for RTreeCellLocator {
    fn name(&self) -> &'static str {
        "rtree"
    }

    fn build_locator(&mut self, dataset: &dyn DataSet) {
        let mut cell = Cell::new();
        let bounds: Vec<Bounds> = (0..dataset.n_cells())
            .map(|i| cell_bounds(dataset, i, &mut cell))
            .collect();
        self.index = Some(MeshSpatialIndex::build(bounds.len(), |i| bounds[i]));
    }

    fn is_built(&self) -> bool {
        self.index.is_some()
    }

    fn find_cell(
        &self,
        dataset: &dyn DataSet,
        x: DVec3,
        tol: f64,
        cell: &mut Cell,
        weights: &mut Vec<f64>,
    ) -> Option<usize> {
        let index = self.index.as_ref()?;
        let mut candidates = Vec::new();
        index.candidates_at(x, tol, &mut candidates);
        candidates.into_iter().find(|&cell_id| {
            dataset.get_cell(cell_id, cell);
            cell.evaluate_position(x, tol, weights)
        })
    }

    fn find_cells_along_line(
        &self,
        _dataset: &dyn DataSet,
        p1: DVec3,
        p2: DVec3,
        tol: f64,
        cells: &mut Vec<usize>,
    ) {
        match &self.index {
            Some(index) => index.candidates_along_segment(p1, p2, tol, cells),
            None => cells.clear(),
        }
    }
}

// ============================================================
// 遍历定位器
// ============================================================

/// 逐单元遍历的定位器，仅缓存单元包围盒
#[derive(Debug, Default)]
pub struct BruteForceLocator {
    bounds: Option<Vec<Bounds>>,
}

impl BruteForceLocator {
    /// 创建未构建的定位器
    pub fn new() -> Self {
        Self::default()
    }
}

impl CellLocator for BruteForceLocator {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn build_locator(&mut self, dataset: &dyn DataSet) {
        let mut cell = Cell::new();
        self.bounds = Some(
            (0..dataset.n_cells())
                .map(|i| cell_bounds(dataset, i, &mut cell))
                .collect(),
        );
    }

    fn is_built(&self) -> bool {
        self.bounds.is_some()
    }

    fn find_cell(
        &self,
        dataset: &dyn DataSet,
        x: DVec3,
        tol: f64,
        cell: &mut Cell,
        weights: &mut Vec<f64>,
    ) -> Option<usize> {
        let bounds = self.bounds.as_ref()?;
        bounds.iter().enumerate().find_map(|(cell_id, b)| {
            if !b.contains(x, tol) {
                return None;
            }
            dataset.get_cell(cell_id, cell);
            cell.evaluate_position(x, tol, weights).then_some(cell_id)
        })
    }

    fn find_cells_along_line(
        &self,
        _dataset: &dyn DataSet,
        p1: DVec3,
        p2: DVec3,
        tol: f64,
        cells: &mut Vec<usize>,
    ) {
        cells.clear();
        if let Some(bounds) = &self.bounds {
            cells.extend(
                bounds
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.intersects_segment(p1, p2, tol))
                    .map(|(i, _)| i),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unstructured::UnstructuredGrid;

    fn channel() -> UnstructuredGrid {
        UnstructuredGrid::hexahedral_box(DVec3::ZERO, DVec3::splat(0.5), [8, 2, 2]).unwrap()
    }

    #[test]
    fn test_rtree_matches_brute_force() {
        let grid = channel();
        let mut rtree = RTreeCellLocator::new();
        let mut brute = BruteForceLocator::new();
        assert!(!rtree.is_built());
        rtree.build_locator(&grid);
        brute.build_locator(&grid);
        let (mut cell, mut w) = (Cell::new(), Vec::new());
        for x in [0.1, 0.7, 1.3, 2.2, 3.9] {
            let p = DVec3::new(x, 0.6, 0.4);
            let a = rtree.find_cell(&grid, p, 1e-8, &mut cell, &mut w);
            let b = brute.find_cell(&grid, p, 1e-8, &mut cell, &mut w);
            assert!(a.is_some());
            assert_eq!(a, b);
        }
        let outside = DVec3::new(5.0, 0.5, 0.5);
        assert!(rtree.find_cell(&grid, outside, 1e-8, &mut cell, &mut w).is_none());
    }

    #[test]
    fn test_cells_along_line() {
        let grid = channel();
        let mut rtree = RTreeCellLocator::new();
        rtree.build_locator(&grid);
        let mut cells = Vec::new();
        rtree.find_cells_along_line(
            &grid,
            DVec3::new(0.1, 0.25, 0.25),
            DVec3::new(0.9, 0.25, 0.25),
            0.0,
            &mut cells,
        );
        assert_eq!(cells, vec![0, 1]);
    }
}

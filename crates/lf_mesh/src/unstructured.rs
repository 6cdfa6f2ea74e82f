// crates/lf_mesh/src/unstructured.rs

//! 非结构网格（显式点集）
//!
//! 连接关系采用 CSR 布局：`offsets[i]..offsets[i+1]` 为第 i 个单元在
//! `connectivity` 中的切片。既用于三维流场网格，也用于三角形/四边形
//! 组成的交互表面。

use crate::attributes::{FieldData, ARRAY_GHOST_TYPE};
use crate::bounds::Bounds;
use crate::cell::{Cell, CellType};
use crate::dataset::DataSet;
use crate::error::{MeshError, MeshResult};
use glam::DVec3;

/// 非结构网格
#[derive(Debug, Clone, Default)]
pub struct UnstructuredGrid {
    points: Vec<DVec3>,
    cell_types: Vec<CellType>,
    offsets: Vec<usize>,
    connectivity: Vec<usize>,
    ghost: Option<Vec<u8>>,
    bounds: Bounds,
    max_cell_size: usize,
    point_data: FieldData,
    cell_data: FieldData,
    field_data: FieldData,
}

impl UnstructuredGrid {
    /// 由点集创建（尚无单元）
    pub fn new(points: Vec<DVec3>) -> Self {
        let bounds = Bounds::from_points(points.iter());
        Self {
            points,
            offsets: vec![0],
            bounds,
            ..Default::default()
        }
    }

    /// 添加单元，返回单元号
    pub fn add_cell(&mut self, cell_type: CellType, ids: &[usize]) -> MeshResult<usize> {
        match cell_type.fixed_point_count() {
            Some(n) if n != ids.len() => {
                return Err(MeshError::invalid_cell(cell_type.name(), n, ids.len()));
            }
            None if ids.len() < 3 => {
                return Err(MeshError::invalid_cell(cell_type.name(), 3, ids.len()));
            }
            _ => {}
        }
        if let Some(&bad) = ids.iter().find(|&&i| i >= self.points.len()) {
            return Err(MeshError::PointOutOfRange {
                index: bad,
                n_points: self.points.len(),
            });
        }
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.connectivity.extend_from_slice(ids);
        self.offsets.push(self.connectivity.len());
        self.cell_types.push(cell_type);
        self.max_cell_size = self.max_cell_size.max(ids.len());
        Ok(self.cell_types.len() - 1)
    }

    /// 单元类型
    pub fn cell_type(&self, cell_id: usize) -> Option<CellType> {
        self.cell_types.get(cell_id).copied()
    }

    /// 单元点号切片
    pub fn cell_ids(&self, cell_id: usize) -> &[usize] {
        match (self.offsets.get(cell_id), self.offsets.get(cell_id + 1)) {
            (Some(&s), Some(&e)) => &self.connectivity[s..e],
            _ => &[],
        }
    }

    /// 设置每单元幽灵标记
    pub fn set_ghost_flags(&mut self, flags: Vec<u8>) -> MeshResult<()> {
        if flags.len() != self.n_cells() {
            return Err(MeshError::array_length(ARRAY_GHOST_TYPE, self.n_cells(), flags.len()));
        }
        self.ghost = Some(flags);
        Ok(())
    }

    /// 点数据（可变）
    pub fn point_data_mut(&mut self) -> &mut FieldData {
        &mut self.point_data
    }

    /// 单元数据（可变）
    pub fn cell_data_mut(&mut self) -> &mut FieldData {
        &mut self.cell_data
    }

    /// 整体数据（可变）
    pub fn field_data_mut(&mut self) -> &mut FieldData {
        &mut self.field_data
    }

    /// 校验属性数组长度与元素数一致
    pub fn validate_attributes(&self) -> MeshResult<()> {
        for array in self.point_data.iter() {
            if array.n_tuples() != self.n_points() {
                return Err(MeshError::array_length(array.name(), self.n_points(), array.n_tuples()));
            }
        }
        for array in self.cell_data.iter() {
            if array.n_tuples() != self.n_cells() {
                return Err(MeshError::array_length(array.name(), self.n_cells(), array.n_tuples()));
            }
        }
        Ok(())
    }

    /// 轴对齐六面体块网格，`dims` 为各方向单元数
    pub fn hexahedral_box(origin: DVec3, spacing: DVec3, dims: [usize; 3]) -> MeshResult<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(MeshError::InvalidDimensions { dims });
        }
        let [nx, ny, nz] = [dims[0] + 1, dims[1] + 1, dims[2] + 1];
        let mut points = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    points.push(origin + spacing * DVec3::new(i as f64, j as f64, k as f64));
                }
            }
        }
        let mut grid = Self::new(points);
        let id = |i: usize, j: usize, k: usize| i + j * nx + k * nx * ny;
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    grid.add_cell(
                        CellType::Hexahedron,
                        &[
                            id(i, j, k),
                            id(i + 1, j, k),
                            id(i + 1, j + 1, k),
                            id(i, j + 1, k),
                            id(i, j, k + 1),
                            id(i + 1, j, k + 1),
                            id(i + 1, j + 1, k + 1),
                            id(i, j + 1, k + 1),
                        ],
                    )?;
                }
            }
        }
        Ok(grid)
    }
}

impl DataSet for UnstructuredGrid {
    fn n_points(&self) -> usize {
        self.points.len()
    }

    fn n_cells(&self) -> usize {
        self.cell_types.len()
    }

    fn point(&self, id: usize) -> DVec3 {
        self.points[id]
    }

    fn get_cell(&self, cell_id: usize, cell: &mut Cell) {
        cell.reset(self.cell_types.get(cell_id).copied().unwrap_or_default());
        for &pid in self.cell_ids(cell_id) {
            cell.push(pid, self.points[pid]);
        }
    }

    fn cell_point_ids(&self, cell_id: usize, ids: &mut Vec<usize>) {
        ids.clear();
        ids.extend_from_slice(self.cell_ids(cell_id));
    }

    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn find_cell(
        &self,
        x: DVec3,
        tol: f64,
        cell: &mut Cell,
        weights: &mut Vec<f64>,
    ) -> Option<usize> {
        if !self.bounds.contains(x, tol) {
            return None;
        }
        (0..self.n_cells()).find(|&cell_id| {
            self.get_cell(cell_id, cell);
            cell.bounds().contains(x, tol) && cell.evaluate_position(x, tol, weights)
        })
    }

    fn is_point_set(&self) -> bool {
        true
    }

    fn max_cell_size(&self) -> usize {
        self.max_cell_size
    }

    fn ghost_flags(&self) -> Option<&[u8]> {
        self.ghost.as_deref()
    }

    fn point_data(&self) -> &FieldData {
        &self.point_data
    }

    fn cell_data(&self) -> &FieldData {
        &self.cell_data
    }

    fn field_data(&self) -> &FieldData {
        &self.field_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DUPLICATE_CELL;

    #[test]
    fn test_box_topology() {
        let grid = UnstructuredGrid::hexahedral_box(DVec3::ZERO, DVec3::ONE, [2, 3, 4]).unwrap();
        assert_eq!(grid.n_cells(), 24);
        assert_eq!(grid.n_points(), 3 * 4 * 5);
        assert_eq!(grid.max_cell_size(), 8);
        assert_eq!(grid.bounds().max, DVec3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_find_cell() {
        let grid = UnstructuredGrid::hexahedral_box(DVec3::ZERO, DVec3::ONE, [2, 2, 1]).unwrap();
        let mut cell = Cell::new();
        let mut w = Vec::new();
        let found = grid.find_cell(DVec3::new(1.5, 0.5, 0.5), 1e-8, &mut cell, &mut w);
        assert_eq!(found, Some(1));
        assert!(grid.find_cell(DVec3::new(3.0, 0.5, 0.5), 1e-8, &mut cell, &mut w).is_none());
    }

    #[test]
    fn test_invalid_cell_rejected() {
        let mut grid = UnstructuredGrid::new(vec![DVec3::ZERO, DVec3::X, DVec3::Y]);
        assert!(grid.add_cell(CellType::Quad, &[0, 1, 2]).is_err());
        assert!(grid.add_cell(CellType::Triangle, &[0, 1, 5]).is_err());
        assert_eq!(grid.add_cell(CellType::Triangle, &[0, 1, 2]).unwrap(), 0);
    }

    #[test]
    fn test_ghost_flags() {
        let mut grid = UnstructuredGrid::hexahedral_box(DVec3::ZERO, DVec3::ONE, [2, 1, 1]).unwrap();
        assert!(grid.set_ghost_flags(vec![0]).is_err());
        grid.set_ghost_flags(vec![0, DUPLICATE_CELL]).unwrap();
        assert!(!grid.is_ghost_cell(0));
        assert!(grid.is_ghost_cell(1));
    }
}

// crates/lf_mesh/src/image.rs

//! 隐式结构化网格（均匀体素）
//!
//! 点坐标由原点、间距和维度隐式给出，不存储点集。各轴坐标表在第一次
//! 单元查找时惰性构建，因此多线程使用前必须先触发一次 `find_cell`
//! （积分模型在注册数据集时完成这一步）。

use crate::attributes::FieldData;
use crate::bounds::Bounds;
use crate::cell::{Cell, CellType};
use crate::dataset::DataSet;
use crate::error::{MeshError, MeshResult};
use glam::DVec3;
use once_cell::sync::OnceCell;
use tracing::trace;

/// 均匀体素网格
#[derive(Debug, Default)]
pub struct ImageData {
    origin: DVec3,
    spacing: DVec3,
    /// 各方向点数
    dims: [usize; 3],
    ghost: Option<Vec<u8>>,
    axes: OnceCell<[Vec<f64>; 3]>,
    point_data: FieldData,
    cell_data: FieldData,
    field_data: FieldData,
}

impl ImageData {
    /// 创建体素网格，`dims` 为各方向点数（每方向至少 2）
    pub fn new(origin: DVec3, spacing: DVec3, dims: [usize; 3]) -> MeshResult<Self> {
        if dims.iter().any(|&d| d < 2) || spacing.min_element() <= 0.0 {
            return Err(MeshError::InvalidDimensions { dims });
        }
        Ok(Self {
            origin,
            spacing,
            dims,
            ..Default::default()
        })
    }

    /// 各方向单元数
    pub fn cell_dims(&self) -> [usize; 3] {
        [self.dims[0] - 1, self.dims[1] - 1, self.dims[2] - 1]
    }

    /// 点号 (i, j, k) → 线性点号
    #[inline]
    pub fn point_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims[0] + k * self.dims[0] * self.dims[1]
    }

    /// 单元号 (i, j, k) → 线性单元号
    #[inline]
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        let [cx, cy, _] = self.cell_dims();
        i + j * cx + k * cx * cy
    }

    fn cell_ijk(&self, cell_id: usize) -> [usize; 3] {
        let [cx, cy, _] = self.cell_dims();
        [cell_id % cx, (cell_id / cx) % cy, cell_id / (cx * cy)]
    }

    fn axes(&self) -> &[Vec<f64>; 3] {
        self.axes.get_or_init(|| {
            trace!("构建体素网格坐标表 {:?}", self.dims);
            let axis = |a: usize| {
                (0..self.dims[a])
                    .map(|i| self.origin[a] + self.spacing[a] * i as f64)
                    .collect::<Vec<_>>()
            };
            [axis(0), axis(1), axis(2)]
        })
    }

    /// 设置每单元幽灵标记
    pub fn set_ghost_flags(&mut self, flags: Vec<u8>) -> MeshResult<()> {
        if flags.len() != self.n_cells() {
            return Err(MeshError::array_length("GhostType", self.n_cells(), flags.len()));
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
}

impl DataSet for ImageData {
    fn n_points(&self) -> usize {
        self.dims.iter().product()
    }

    fn n_cells(&self) -> usize {
        self.cell_dims().iter().product()
    }

    fn point(&self, id: usize) -> DVec3 {
        let [nx, ny, _] = self.dims;
        let (i, j, k) = (id % nx, (id / nx) % ny, id / (nx * ny));
        let axes = self.axes();
        DVec3::new(axes[0][i], axes[1][j], axes[2][k])
    }

    fn get_cell(&self, cell_id: usize, cell: &mut Cell) {
        cell.reset(CellType::Voxel);
        let [i, j, k] = self.cell_ijk(cell_id);
        for dk in 0..2 {
            for dj in 0..2 {
                for di in 0..2 {
                    let pid = self.point_index(i + di, j + dj, k + dk);
                    cell.push(pid, self.point(pid));
                }
            }
        }
    }

    fn cell_point_ids(&self, cell_id: usize, ids: &mut Vec<usize>) {
        ids.clear();
        let [i, j, k] = self.cell_ijk(cell_id);
        for dk in 0..2 {
            for dj in 0..2 {
                for di in 0..2 {
                    ids.push(self.point_index(i + di, j + dj, k + dk));
                }
            }
        }
    }

    fn bounds(&self) -> Bounds {
        let extent = self.spacing
            * DVec3::new(
                (self.dims[0] - 1) as f64,
                (self.dims[1] - 1) as f64,
                (self.dims[2] - 1) as f64,
            );
        Bounds::new(self.origin, self.origin + extent)
    }

    fn find_cell(
        &self,
        x: DVec3,
        tol: f64,
        cell: &mut Cell,
        weights: &mut Vec<f64>,
    ) -> Option<usize> {
        let axes = self.axes();
        let cell_dims = self.cell_dims();
        let mut ijk = [0usize; 3];
        for a in 0..3 {
            let axis = &axes[a];
            let (lo, hi) = (axis[0], axis[axis.len() - 1]);
            if x[a] < lo - tol || x[a] > hi + tol {
                return None;
            }
            let r = ((x[a] - lo) / self.spacing[a]).floor();
            ijk[a] = (r.max(0.0) as usize).min(cell_dims[a] - 1);
        }
        let cell_id = self.cell_index(ijk[0], ijk[1], ijk[2]);
        self.get_cell(cell_id, cell);
        // 容差范围内的点可能落在包围盒外，权重仍按体素外推计算
        cell.evaluate_position(x, tol, weights);
        Some(cell_id)
    }

    fn is_point_set(&self) -> bool {
        false
    }

    fn max_cell_size(&self) -> usize {
        8
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

    fn is_built(&self) -> bool {
        self.axes.get().is_some()
    }
}

// crates/lf_mesh/src/dataset.rs

//! 数据集能力接口
//!
//! 追踪器只通过 [`DataSet`] 访问流场与表面网格：点、单元、包围盒、
//! 单元查找、幽灵单元标记以及三类属性数组。数据集在一次追踪运行期间
//! 以 `Arc<dyn DataSet>` 共享，只读。

use crate::attributes::FieldData;
use crate::bounds::Bounds;
use crate::cell::Cell;
use glam::DVec3;
use std::fmt;

/// 幽灵标记位：该单元是其他分区单元的副本
pub const DUPLICATE_CELL: u8 = 1;

/// 数据集能力
pub trait DataSet: Send + Sync + fmt::Debug {
    /// 点数
    fn n_points(&self) -> usize;

    /// 单元数
    fn n_cells(&self) -> usize;

    /// 第 `id` 个点的坐标
    fn point(&self, id: usize) -> DVec3;

    /// 把单元 `cell_id` 填入通用单元缓冲
    fn get_cell(&self, cell_id: usize, cell: &mut Cell);

    /// 单元的点号
    fn cell_point_ids(&self, cell_id: usize, ids: &mut Vec<usize>);

    /// 包围盒
    fn bounds(&self) -> Bounds;

    /// 数据集自带的单元查找（不借助外部定位器）
    ///
    /// 找到时 `cell` 被填充、`weights` 为插值权重。
    fn find_cell(&self, x: DVec3, tol: f64, cell: &mut Cell, weights: &mut Vec<f64>)
        -> Option<usize>;

    /// 是否显式存储点集（非隐式结构化网格）
    fn is_point_set(&self) -> bool;

    /// 单元最大点数
    fn max_cell_size(&self) -> usize;

    /// 每单元幽灵标记
    fn ghost_flags(&self) -> Option<&[u8]> {
        None
    }

    /// 单元是否为重复（幽灵）单元
    fn is_ghost_cell(&self, cell_id: usize) -> bool {
        self.ghost_flags()
            .and_then(|g| g.get(cell_id))
            .map_or(false, |&flag| flag & DUPLICATE_CELL != 0)
    }

    /// 点数据
    fn point_data(&self) -> &FieldData;

    /// 单元数据
    fn cell_data(&self) -> &FieldData;

    /// 整体数据
    fn field_data(&self) -> &FieldData;

    /// 内部惰性结构是否已构建
    fn is_built(&self) -> bool {
        true
    }
}

// crates/lf_mesh/src/polydata.rs

//! 输出几何容器
//!
//! 存放点、顶点单元与折线单元及其点/单元数据。单元编号先顶点后折线。
//! 追踪器的各个工作线程各自填充一个，批次结束后通过 [`PolyData::append`]
//! 合并。

use crate::attributes::FieldData;
use glam::DVec3;

/// 点 + 顶点 + 折线容器
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyData {
    points: Vec<DVec3>,
    verts: Vec<Vec<usize>>,
    lines: Vec<Vec<usize>>,
    point_data: FieldData,
    cell_data: FieldData,
}

impl PolyData {
    /// 创建空容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定数组布局创建空容器
    pub fn with_layout(point_data: FieldData, cell_data: FieldData) -> Self {
        Self {
            point_data,
            cell_data,
            ..Default::default()
        }
    }

    /// 插入点，返回点号
    pub fn insert_point(&mut self, p: DVec3) -> usize {
        self.points.push(p);
        self.points.len() - 1
    }

    /// 添加顶点单元（单点或多点）
    pub fn add_vert(&mut self, ids: Vec<usize>) -> usize {
        self.verts.push(ids);
        self.verts.len() - 1
    }

    /// 添加折线单元
    pub fn add_line(&mut self, ids: Vec<usize>) -> usize {
        self.lines.push(ids);
        self.verts.len() + self.lines.len() - 1
    }

    /// 点
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    /// 顶点单元
    pub fn verts(&self) -> &[Vec<usize>] {
        &self.verts
    }

    /// 折线单元
    pub fn lines(&self) -> &[Vec<usize>] {
        &self.lines
    }

    /// 折线单元（可变）
    pub fn lines_mut(&mut self) -> &mut Vec<Vec<usize>> {
        &mut self.lines
    }

    /// 点数
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// 单元数
    pub fn n_cells(&self) -> usize {
        self.verts.len() + self.lines.len()
    }

    /// 是否没有任何几何
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.n_cells() == 0
    }

    /// 点数据
    pub fn point_data(&self) -> &FieldData {
        &self.point_data
    }

    /// 点数据（可变）
    pub fn point_data_mut(&mut self) -> &mut FieldData {
        &mut self.point_data
    }

    /// 单元数据
    pub fn cell_data(&self) -> &FieldData {
        &self.cell_data
    }

    /// 单元数据（可变）
    pub fn cell_data_mut(&mut self) -> &mut FieldData {
        &mut self.cell_data
    }

    /// 几何追加：点号偏移，数组只保留两侧共有的部分
    pub fn append(&mut self, other: &PolyData) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        let offset = self.points.len();
        self.points.extend_from_slice(&other.points);
        let shift = |ids: &Vec<usize>| ids.iter().map(|i| i + offset).collect::<Vec<_>>();
        self.verts.extend(other.verts.iter().map(shift));
        self.lines.extend(other.lines.iter().map(shift));
        self.point_data.append(&other.point_data);
        self.cell_data.append(&other.cell_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::DataArray;

    fn segment(x0: f64, tag: f64) -> PolyData {
        let mut pd = PolyData::new();
        let a = pd.insert_point(DVec3::new(x0, 0.0, 0.0));
        let b = pd.insert_point(DVec3::new(x0 + 1.0, 0.0, 0.0));
        pd.add_line(vec![a, b]);
        pd.cell_data_mut()
            .add_array(DataArray::from_values("Id", 1, vec![tag]).unwrap());
        pd
    }

    #[test]
    fn test_append_offsets_ids() {
        let mut a = segment(0.0, 1.0);
        a.append(&segment(5.0, 2.0));
        assert_eq!(a.n_points(), 4);
        assert_eq!(a.lines()[1], vec![2, 3]);
        assert_eq!(a.cell_data().get("Id").unwrap().values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_append_into_empty() {
        let mut a = PolyData::new();
        a.append(&segment(0.0, 3.0));
        assert_eq!(a.n_cells(), 1);
        a.append(&PolyData::new());
        assert_eq!(a.n_cells(), 1);
    }
}

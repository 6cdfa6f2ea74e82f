// crates/lf_mesh/src/attributes.rs

//! 属性数组系统
//!
//! 为数据集的点、单元以及整体（field）附加命名的多分量数组。
//! 数值统一以 `f64` 存储，`ArrayDataType` 仅记录原始元素类型，
//! 用于跨进程的数组模式协商。

use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// 预定义数组名称
// ============================================================================

/// 表面单元的交互类型数组
pub const ARRAY_SURFACE_TYPE: &str = "SurfaceType";
/// 表面单元法向数组
pub const ARRAY_NORMALS: &str = "Normals";
/// 幽灵单元标记数组
pub const ARRAY_GHOST_TYPE: &str = "GhostType";

/// 数组元素类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum ArrayDataType {
    /// 无符号字节
    UInt8 = 3,
    /// 32 位整数
    Int32 = 6,
    /// 单精度
    Float32 = 10,
    /// 双精度
    #[default]
    Float64 = 11,
    /// 64 位整数（标识符）
    Int64 = 12,
}

impl ArrayDataType {
    /// 从整数标签恢复
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            3 => Some(Self::UInt8),
            6 => Some(Self::Int32),
            10 => Some(Self::Float32),
            11 => Some(Self::Float64),
            12 => Some(Self::Int64),
            _ => None,
        }
    }

    /// 整数标签
    #[inline]
    pub fn tag(self) -> i32 {
        self as i32
    }
}

// ============================================================================
// 数组
// ============================================================================

/// 命名的多分量数组，元组连续存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    name: String,
    n_components: usize,
    component_names: Vec<Option<String>>,
    data_type: ArrayDataType,
    values: Vec<f64>,
}

impl DataArray {
    /// 创建空数组
    pub fn new(name: impl Into<String>, n_components: usize) -> Self {
        let n_components = n_components.max(1);
        Self {
            name: name.into(),
            n_components,
            component_names: vec![None; n_components],
            data_type: ArrayDataType::Float64,
            values: Vec::new(),
        }
    }

    /// 由扁平数据创建
    pub fn from_values(
        name: impl Into<String>,
        n_components: usize,
        values: Vec<f64>,
    ) -> MeshResult<Self> {
        let mut array = Self::new(name, n_components);
        if values.len() % array.n_components != 0 {
            return Err(MeshError::component_mismatch(
                array.name,
                array.n_components,
                values.len() % array.n_components,
            ));
        }
        array.values = values;
        Ok(array)
    }

    /// 设置元素类型
    pub fn with_data_type(mut self, data_type: ArrayDataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// 数组名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 分量数
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// 元素类型
    pub fn data_type(&self) -> ArrayDataType {
        self.data_type
    }

    /// 元组数
    pub fn n_tuples(&self) -> usize {
        self.values.len() / self.n_components
    }

    /// 分量名称
    pub fn component_names(&self) -> &[Option<String>] {
        &self.component_names
    }

    /// 设置分量名称
    pub fn set_component_name(&mut self, component: usize, name: impl Into<String>) {
        if let Some(slot) = self.component_names.get_mut(component) {
            *slot = Some(name.into());
        }
    }

    /// 读取元组
    #[inline]
    pub fn tuple(&self, i: usize) -> Option<&[f64]> {
        let start = i.checked_mul(self.n_components)?;
        self.values.get(start..start + self.n_components)
    }

    /// 追加元组
    pub fn push_tuple(&mut self, tuple: &[f64]) -> MeshResult<()> {
        if tuple.len() != self.n_components {
            return Err(MeshError::component_mismatch(
                self.name.clone(),
                self.n_components,
                tuple.len(),
            ));
        }
        self.values.extend_from_slice(tuple);
        Ok(())
    }

    /// 追加另一个数组的全部元组
    pub fn extend_from(&mut self, other: &DataArray) -> MeshResult<()> {
        if other.n_components != self.n_components {
            return Err(MeshError::component_mismatch(
                self.name.clone(),
                self.n_components,
                other.n_components,
            ));
        }
        self.values.extend_from_slice(&other.values);
        Ok(())
    }

    /// 覆盖第 i 个元组
    pub fn set_tuple(&mut self, i: usize, tuple: &[f64]) -> MeshResult<()> {
        let n = self.n_components;
        if tuple.len() != n {
            return Err(MeshError::component_mismatch(self.name.clone(), n, tuple.len()));
        }
        let n_tuples = self.n_tuples();
        match self.values.get_mut(i * n..(i + 1) * n) {
            Some(slot) => {
                slot.copy_from_slice(tuple);
                Ok(())
            }
            None => Err(MeshError::array_length(self.name.clone(), i + 1, n_tuples)),
        }
    }

    /// 扁平数据
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// 扁平数据（可变）
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// 仅保留元信息的空副本
    pub fn empty_like(&self) -> Self {
        Self {
            name: self.name.clone(),
            n_components: self.n_components,
            component_names: self.component_names.clone(),
            data_type: self.data_type,
            values: Vec::new(),
        }
    }
}

// ============================================================================
// 数组集合
// ============================================================================

/// 有序的命名数组集合（点数据、单元数据或整体数据）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldData {
    arrays: Vec<DataArray>,
}

impl FieldData {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加数组，同名数组被替换
    pub fn add_array(&mut self, array: DataArray) {
        match self.arrays.iter_mut().find(|a| a.name == array.name) {
            Some(existing) => *existing = array,
            None => self.arrays.push(array),
        }
    }

    /// 按名称查找
    pub fn get(&self, name: &str) -> Option<&DataArray> {
        self.arrays.iter().find(|a| a.name == name)
    }

    /// 按名称查找（可变）
    pub fn get_mut(&mut self, name: &str) -> Option<&mut DataArray> {
        self.arrays.iter_mut().find(|a| a.name == name)
    }

    /// 按位置查找
    pub fn array(&self, i: usize) -> Option<&DataArray> {
        self.arrays.get(i)
    }

    /// 按位置查找（可变）
    pub fn array_mut(&mut self, i: usize) -> Option<&mut DataArray> {
        self.arrays.get_mut(i)
    }

    /// 是否含有指定名称数组
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 移除数组
    pub fn remove(&mut self, name: &str) -> Option<DataArray> {
        let pos = self.arrays.iter().position(|a| a.name == name)?;
        Some(self.arrays.remove(pos))
    }

    /// 数组个数
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// 迭代数组
    pub fn iter(&self) -> impl Iterator<Item = &DataArray> {
        self.arrays.iter()
    }

    /// 迭代数组（可变）
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DataArray> {
        self.arrays.iter_mut()
    }

    /// 所有数组分量数之和
    pub fn total_components(&self) -> usize {
        self.arrays.iter().map(|a| a.n_components).sum()
    }

    /// 按相同顺序拼接第 i 个元组的全部分量
    pub fn gather_tuple(&self, i: usize, out: &mut Vec<f64>) {
        out.clear();
        for array in &self.arrays {
            match array.tuple(i) {
                Some(t) => out.extend_from_slice(t),
                None => out.extend(std::iter::repeat(0.0).take(array.n_components)),
            }
        }
    }

    /// 仅保留元信息的空副本
    pub fn empty_like(&self) -> Self {
        Self {
            arrays: self.arrays.iter().map(DataArray::empty_like).collect(),
        }
    }

    /// 追加另一集合中同名同分量的数组；只在一侧存在的数组被丢弃
    pub fn append(&mut self, other: &FieldData) {
        self.arrays.retain(|a| {
            other
                .get(&a.name)
                .map_or(false, |o| o.n_components == a.n_components)
        });
        for array in &mut self.arrays {
            if let Some(o) = other.get(&array.name) {
                array.values.extend_from_slice(&o.values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_access() {
        let a = DataArray::from_values("v", 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(a.n_tuples(), 2);
        assert_eq!(a.tuple(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(a.tuple(2), None);
    }

    #[test]
    fn test_component_mismatch() {
        assert!(DataArray::from_values("v", 3, vec![1.0, 2.0]).is_err());
        let mut a = DataArray::new("d", 1);
        assert!(a.push_tuple(&[1.0, 2.0]).is_err());
        assert!(a.push_tuple(&[1.0]).is_ok());
    }

    #[test]
    fn test_field_data_replace_and_gather() {
        let mut fd = FieldData::new();
        fd.add_array(DataArray::from_values("a", 1, vec![1.0, 2.0]).unwrap());
        fd.add_array(DataArray::from_values("b", 2, vec![3.0, 4.0, 5.0, 6.0]).unwrap());
        fd.add_array(DataArray::from_values("a", 1, vec![7.0, 8.0]).unwrap());
        assert_eq!(fd.len(), 2);
        let mut out = Vec::new();
        fd.gather_tuple(1, &mut out);
        assert_eq!(out, vec![8.0, 5.0, 6.0]);
        assert_eq!(fd.total_components(), 3);
    }

    #[test]
    fn test_append_keeps_common_arrays() {
        let mut a = FieldData::new();
        a.add_array(DataArray::from_values("x", 1, vec![1.0]).unwrap());
        a.add_array(DataArray::from_values("only_a", 1, vec![1.0]).unwrap());
        let mut b = FieldData::new();
        b.add_array(DataArray::from_values("x", 1, vec![2.0]).unwrap());
        a.append(&b);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get("x").unwrap().values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_data_type_tag() {
        for t in [ArrayDataType::UInt8, ArrayDataType::Int32, ArrayDataType::Float64] {
            assert_eq!(ArrayDataType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(ArrayDataType::from_tag(99), None);
    }
}

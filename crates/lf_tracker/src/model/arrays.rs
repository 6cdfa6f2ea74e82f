// crates/lf_tracker/src/model/arrays.rs

//! 输入数组表与种子数组模式
//!
//! 物理模型通过“槽位”读取数据：每个槽位指定数据来自哪个端口
//! （流场、种子、表面）、哪一种关联（点、单元、整体）以及数组名称。
//! 基础槽位：
//!
//! | 槽位 | 含义 | 默认数组 |
//! |------|------|----------|
//! | 0 | 初始速度 | `ParticleInitialVelocity`（种子点数据） |
//! | 1 | 初始积分时间 | `ParticleInitialIntegrationTime`（种子点数据） |
//! | 2 | 表面类型 | `SurfaceType`（表面单元数据） |
//!
//! 模型自定义槽位从 3 开始。

use lf_mesh::{ArrayDataType, DataArray, FieldData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 初始速度槽位
pub const SLOT_INITIAL_VELOCITY: usize = 0;
/// 初始积分时间槽位
pub const SLOT_INITIAL_INTEGRATION_TIME: usize = 1;
/// 表面类型槽位
pub const SLOT_SURFACE_TYPE: usize = 2;
/// 模型自定义槽位起点
pub const FIRST_MODEL_SLOT: usize = 3;

/// 数据来源端口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPort {
    Flow = 0,
    Seed = 1,
    Surface = 2,
}

/// 数组关联
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayAssociation {
    /// 点数据，按单元插值权重插值
    Points,
    /// 单元数据
    Cells,
    /// 整体数据，取第一个元组
    Field,
}

/// 单个槽位的数组来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputArraySpec {
    pub port: InputPort,
    /// 端口上的连接序号
    pub connection: usize,
    pub association: ArrayAssociation,
    pub name: String,
}

impl InputArraySpec {
    pub fn new(port: InputPort, association: ArrayAssociation, name: impl Into<String>) -> Self {
        Self {
            port,
            connection: 0,
            association,
            name: name.into(),
        }
    }
}

/// 槽位到数组来源的映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputArrayTable {
    slots: BTreeMap<usize, InputArraySpec>,
}

impl InputArrayTable {
    /// 带基础槽位的表
    pub fn with_base_slots() -> Self {
        let mut table = Self::default();
        table.set(
            SLOT_INITIAL_VELOCITY,
            InputArraySpec::new(InputPort::Seed, ArrayAssociation::Points, "ParticleInitialVelocity"),
        );
        table.set(
            SLOT_INITIAL_INTEGRATION_TIME,
            InputArraySpec::new(
                InputPort::Seed,
                ArrayAssociation::Points,
                "ParticleInitialIntegrationTime",
            ),
        );
        table.set(
            SLOT_SURFACE_TYPE,
            InputArraySpec::new(InputPort::Surface, ArrayAssociation::Cells, lf_mesh::attributes::ARRAY_SURFACE_TYPE),
        );
        table
    }

    /// 设置槽位，覆盖已有映射
    pub fn set(&mut self, slot: usize, spec: InputArraySpec) {
        self.slots.insert(slot, spec);
    }

    pub fn get(&self, slot: usize) -> Option<&InputArraySpec> {
        self.slots.get(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &InputArraySpec)> {
        self.slots.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================
// 种子数组模式
// ============================================================

/// 单个数组的元信息
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub name: String,
    pub data_type: ArrayDataType,
    pub n_components: usize,
    pub component_names: Vec<Option<String>>,
}

impl ArrayInfo {
    pub fn from_array(array: &DataArray) -> Self {
        Self {
            name: array.name().to_string(),
            data_type: array.data_type(),
            n_components: array.n_components(),
            component_names: array.component_names().to_vec(),
        }
    }

    /// 按元信息创建空数组
    pub fn empty_array(&self) -> DataArray {
        let mut array = DataArray::new(self.name.clone(), self.n_components).with_data_type(self.data_type);
        for (i, name) in self.component_names.iter().enumerate() {
            if let Some(name) = name {
                array.set_component_name(i, name.clone());
            }
        }
        array
    }
}

/// 种子点数据的数组布局
///
/// 粒子的 `seed_data` 按本模式的数组顺序拼接，进程间传输只发送数值，
/// 布局由各进程事先协商一致。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArraySchema {
    arrays: Vec<ArrayInfo>,
}

impl ArraySchema {
    pub fn new(arrays: Vec<ArrayInfo>) -> Self {
        Self { arrays }
    }

    pub fn from_field_data(data: &FieldData) -> Self {
        Self {
            arrays: data.iter().map(ArrayInfo::from_array).collect(),
        }
    }

    pub fn arrays(&self) -> &[ArrayInfo] {
        &self.arrays
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// 拼接后的总分量数
    pub fn total_components(&self) -> usize {
        self.arrays.iter().map(|a| a.n_components).sum()
    }

    /// 数组在拼接元组中的 (偏移, 分量数)
    pub fn offset_of(&self, name: &str) -> Option<(usize, usize)> {
        let mut offset = 0;
        for info in &self.arrays {
            if info.name == name {
                return Some((offset, info.n_components));
            }
            offset += info.n_components;
        }
        None
    }

    /// 按本模式从点数据中拼接第 i 个元组
    ///
    /// 缺失或分量数不符的数组以零填充。
    pub fn gather_tuple(&self, data: &FieldData, i: usize, out: &mut Vec<f64>) {
        out.clear();
        for info in &self.arrays {
            match data
                .get(&info.name)
                .filter(|a| a.n_components() == info.n_components)
                .and_then(|a| a.tuple(i))
            {
                Some(t) => out.extend_from_slice(t),
                None => out.extend(std::iter::repeat(0.0).take(info.n_components)),
            }
        }
    }

    /// 按本模式创建空数组集合
    pub fn empty_field_data(&self) -> FieldData {
        let mut data = FieldData::new();
        for info in &self.arrays {
            data.add_array(info.empty_array());
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> FieldData {
        let mut fd = FieldData::new();
        fd.add_array(DataArray::from_values("ParticleDiameter", 1, vec![0.1, 0.2]).unwrap());
        fd.add_array(
            DataArray::from_values("ParticleInitialVelocity", 3, vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0]).unwrap(),
        );
        fd
    }

    #[test]
    fn test_base_slots() {
        let table = InputArrayTable::with_base_slots();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(SLOT_SURFACE_TYPE).unwrap().association, ArrayAssociation::Cells);
        assert_eq!(table.get(SLOT_INITIAL_VELOCITY).unwrap().port, InputPort::Seed);
        assert!(table.get(FIRST_MODEL_SLOT).is_none());
    }

    #[test]
    fn test_schema_offsets() {
        let schema = ArraySchema::from_field_data(&seeds());
        assert_eq!(schema.total_components(), 4);
        assert_eq!(schema.offset_of("ParticleInitialVelocity"), Some((1, 3)));
        assert_eq!(schema.offset_of("Missing"), None);
    }

    #[test]
    fn test_gather_zero_fills_missing_arrays() {
        let mut schema = ArraySchema::from_field_data(&seeds());
        schema.arrays.push(ArrayInfo {
            name: "ParticleDensity".into(),
            n_components: 1,
            ..Default::default()
        });
        let mut out = Vec::new();
        schema.gather_tuple(&seeds(), 1, &mut out);
        assert_eq!(out, vec![0.2, 2.0, 0.0, 0.0, 0.0]);
        assert_eq!(schema.empty_field_data().len(), 3);
    }
}

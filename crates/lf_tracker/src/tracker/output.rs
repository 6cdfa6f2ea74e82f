// crates/lf_tracker/src/tracker/output.rs

//! 输出组装
//!
//! - 粒子轨迹：每个粒子一条折线，点数据为步号、速度、积分时间，
//!   单元数据为粒子编号、父编号、种子编号、终止原因与全部种子数组。
//! - 交互输出：每个表面扁平索引一个点集，点数据为交互类型加上
//!   轨迹的点与单元数组。
//!
//! 工作线程各自持有一份输出，批次结束后由协调线程合并。

use crate::error::TrackerResult;
use crate::model::ArraySchema;
use crate::particle::{Particle, Termination};
use glam::DVec3;
use lf_foundation::FlatIndex;
use lf_mesh::{ArrayDataType, DataArray, FieldData, PolyData};
use std::collections::{BTreeMap, HashMap};

pub const ARRAY_ID: &str = "Id";
pub const ARRAY_PARENT_ID: &str = "ParentId";
pub const ARRAY_SEED_ID: &str = "SeedId";
pub const ARRAY_TERMINATION: &str = "Termination";
pub const ARRAY_STEP_NUMBER: &str = "StepNumber";
pub const ARRAY_PARTICLE_VELOCITY: &str = "ParticleVelocity";
pub const ARRAY_INTEGRATION_TIME: &str = "IntegrationTime";
pub const ARRAY_INTERACTION: &str = "Interaction";

// ============================================================
// 布局
// ============================================================

/// 输出数组布局
#[derive(Debug, Clone, Default)]
pub struct OutputLayout {
    seed_schema: ArraySchema,
    surfaces: Vec<FlatIndex>,
}

impl OutputLayout {
    pub fn new(seed_schema: ArraySchema, surfaces: Vec<FlatIndex>) -> Self {
        Self { seed_schema, surfaces }
    }

    pub fn seed_schema(&self) -> &ArraySchema {
        &self.seed_schema
    }

    pub fn surfaces(&self) -> &[FlatIndex] {
        &self.surfaces
    }

    fn step_arrays(&self, data: &mut FieldData) {
        data.add_array(DataArray::new(ARRAY_STEP_NUMBER, 1).with_data_type(ArrayDataType::Int64));
        let mut velocity = DataArray::new(ARRAY_PARTICLE_VELOCITY, 3);
        for (i, axis) in ["X", "Y", "Z"].into_iter().enumerate() {
            velocity.set_component_name(i, axis);
        }
        data.add_array(velocity);
        data.add_array(DataArray::new(ARRAY_INTEGRATION_TIME, 1));
    }

    fn particle_arrays(&self, data: &mut FieldData) {
        data.add_array(DataArray::new(ARRAY_ID, 1).with_data_type(ArrayDataType::Int64));
        data.add_array(DataArray::new(ARRAY_PARENT_ID, 1).with_data_type(ArrayDataType::Int64));
        data.add_array(DataArray::new(ARRAY_SEED_ID, 1).with_data_type(ArrayDataType::Int64));
        data.add_array(DataArray::new(ARRAY_TERMINATION, 1).with_data_type(ArrayDataType::Int32));
        for info in self.seed_schema.arrays() {
            data.add_array(info.empty_array());
        }
    }

    /// 空的轨迹输出
    pub fn empty_paths(&self) -> PolyData {
        let mut point_data = FieldData::new();
        self.step_arrays(&mut point_data);
        let mut cell_data = FieldData::new();
        self.particle_arrays(&mut cell_data);
        PolyData::with_layout(point_data, cell_data)
    }

    fn empty_interaction_block(&self) -> PolyData {
        let mut point_data = FieldData::new();
        point_data.add_array(DataArray::new(ARRAY_INTERACTION, 1).with_data_type(ArrayDataType::Int32));
        self.step_arrays(&mut point_data);
        self.particle_arrays(&mut point_data);
        PolyData::with_layout(point_data, FieldData::new())
    }

    /// 空的交互输出，每个表面一个块
    pub fn empty_interactions(&self) -> InteractionOutput {
        InteractionOutput {
            blocks: self
                .surfaces
                .iter()
                .map(|&flat| (flat, self.empty_interaction_block()))
                .collect(),
        }
    }

    // ========================================================================
    // 写入
    // ========================================================================

    fn push_step(
        data: &mut FieldData,
        step: i64,
        velocity: DVec3,
        time: f64,
    ) -> TrackerResult<()> {
        push(data, ARRAY_STEP_NUMBER, &[step as f64])?;
        push(data, ARRAY_PARTICLE_VELOCITY, &velocity.to_array())?;
        push(data, ARRAY_INTEGRATION_TIME, &[time])
    }

    fn push_particle(&self, data: &mut FieldData, particle: &Particle) -> TrackerResult<()> {
        push(data, ARRAY_ID, &[particle.id as f64])?;
        push(data, ARRAY_PARENT_ID, &[particle.parent_id as f64])?;
        push(data, ARRAY_SEED_ID, &[particle.seed_id as f64])?;
        push(data, ARRAY_TERMINATION, &[particle.termination.code() as f64])?;

        let mut offset = 0;
        let mut tuple = Vec::new();
        for info in self.seed_schema.arrays() {
            tuple.clear();
            tuple.extend((0..info.n_components).map(|c| particle.seed_data.get(offset + c).copied().unwrap_or(0.0)));
            offset += info.n_components;
            push(data, &info.name, &tuple)?;
        }
        Ok(())
    }

    /// 在轨迹中插入粒子的当前位置（或前一位置）
    pub fn insert_path_point(
        &self,
        paths: &mut PolyData,
        line: &mut Vec<usize>,
        particle: &Particle,
        previous: bool,
    ) -> TrackerResult<()> {
        let (position, velocity, time, step) = if previous {
            (
                particle.prev_position(),
                particle.prev_velocity(),
                particle.prev_integration_time,
                (particle.number_of_steps - 1).max(0),
            )
        } else {
            (
                particle.position(),
                particle.velocity(),
                particle.integration_time,
                particle.number_of_steps,
            )
        };
        let id = paths.insert_point(position);
        Self::push_step(paths.point_data_mut(), step, velocity, time)?;
        line.push(id);
        Ok(())
    }

    /// 结束粒子轨迹
    ///
    /// 只有一个点的轨迹复制该点，使其仍是合法折线。
    pub fn finish_path(&self, paths: &mut PolyData, mut line: Vec<usize>, particle: &Particle) -> TrackerResult<()> {
        if line.is_empty() {
            return Ok(());
        }
        if line.len() == 1 {
            let id = line[0];
            let point = paths.points()[id];
            let mut tuple = Vec::new();
            paths.point_data().gather_tuple(id, &mut tuple);
            let dup = paths.insert_point(point);
            let mut offset = 0;
            for array in paths.point_data_mut().iter_mut() {
                let n = array.n_components();
                array.push_tuple(&tuple[offset..offset + n])?;
                offset += n;
            }
            line.push(dup);
        }
        paths.add_line(line);
        self.push_particle(paths.cell_data_mut(), particle)
    }

    /// 记录交互点
    ///
    /// 交互点取粒子快照的下一步状态：下一位置、下一速度、
    /// 步号加一、积分时间加步长。
    pub fn insert_interaction_point(
        &self,
        output: &mut InteractionOutput,
        flat_index: FlatIndex,
        particle: &Particle,
    ) -> TrackerResult<()> {
        let block = output
            .blocks
            .entry(flat_index)
            .or_insert_with(|| self.empty_interaction_block());
        let id = block.insert_point(particle.next_position());
        block.add_vert(vec![id]);
        let data = block.point_data_mut();
        push(data, ARRAY_INTERACTION, &[particle.interaction.code() as f64])?;
        Self::push_step(
            data,
            particle.number_of_steps + 1,
            particle.next_velocity(),
            particle.integration_time + particle.step_time,
        )?;
        self.push_particle(data, particle)
    }
}

fn push(data: &mut FieldData, name: &str, tuple: &[f64]) -> TrackerResult<()> {
    if let Some(array) = data.get_mut(name) {
        array.push_tuple(tuple)?;
    }
    Ok(())
}

// ============================================================
// 交互输出
// ============================================================

/// 按表面扁平索引组织的交互点
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionOutput {
    blocks: BTreeMap<FlatIndex, PolyData>,
}

impl InteractionOutput {
    pub fn get(&self, flat_index: FlatIndex) -> Option<&PolyData> {
        self.blocks.get(&flat_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FlatIndex, &PolyData)> {
        self.blocks.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// 全部交互点数
    pub fn n_points(&self) -> usize {
        self.blocks.values().map(PolyData::n_points).sum()
    }

    /// 按块追加另一份输出
    pub fn append(&mut self, other: &InteractionOutput) {
        for (flat, block) in &other.blocks {
            self.blocks.entry(*flat).or_default().append(block);
        }
    }

    /// 把每个块的逐点顶点合并为一个多点顶点
    pub fn merge_into_poly_vertex(&mut self) {
        for block in self.blocks.values_mut() {
            if block.n_points() == 0 {
                continue;
            }
            let mut merged = PolyData::with_layout(block.point_data().clone(), block.cell_data().clone());
            for &p in block.points() {
                merged.insert_point(p);
            }
            merged.add_vert((0..block.n_points()).collect());
            *block = merged;
        }
    }
}

// ============================================================
// 追踪输出
// ============================================================

/// 一次追踪运行的输出
#[derive(Debug, Clone, Default)]
pub struct TrackerOutput {
    /// 粒子轨迹
    pub paths: PolyData,
    /// 表面交互点
    pub interactions: InteractionOutput,
}

impl TrackerOutput {
    pub fn new(layout: &OutputLayout) -> Self {
        Self {
            paths: layout.empty_paths(),
            interactions: layout.empty_interactions(),
        }
    }

    /// 合并工作线程输出
    pub fn append(&mut self, paths: &PolyData, interactions: &InteractionOutput) {
        self.paths.append(paths);
        self.interactions.append(interactions);
    }

    pub fn n_paths(&self) -> usize {
        self.paths.lines().len()
    }

    /// 轨迹中的 (粒子编号, 终止原因)
    pub fn path_terminations(&self) -> Vec<(i64, Termination)> {
        let cell_data = self.paths.cell_data();
        let (Some(ids), Some(terms)) = (cell_data.get(ARRAY_ID), cell_data.get(ARRAY_TERMINATION)) else {
            return Vec::new();
        };
        ids.values()
            .iter()
            .zip(terms.values())
            .map(|(&id, &t)| (id as i64, Termination::from_code(t as i32).unwrap_or_default()))
            .collect()
    }

    /// 用其他进程给出的终止原因覆盖本地的出域记录
    ///
    /// 返回被覆盖的轨迹数。
    pub fn reconcile_terminations(&mut self, remote: &HashMap<i64, Termination>) -> usize {
        let ids: Vec<i64> = match self.paths.cell_data().get(ARRAY_ID) {
            Some(ids) => ids.values().iter().map(|&v| v as i64).collect(),
            None => return 0,
        };
        let Some(terms) = self.paths.cell_data_mut().get_mut(ARRAY_TERMINATION) else {
            return 0;
        };
        let mut updated = 0;
        for (value, id) in terms.values_mut().iter_mut().zip(ids) {
            if *value as i32 != Termination::OutOfDomain.code() {
                continue;
            }
            if let Some(term) = remote.get(&id) {
                *value = term.code() as f64;
                updated += 1;
            }
        }
        updated
    }
}

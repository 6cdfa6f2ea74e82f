// crates/lf_tracker/src/model/integration.rs

//! 积分模型：数据集注册、定位、插值
//!
//! # 定位缓存
//!
//! [`IntegrationModel::find_in_locators`] 按三级顺序查找粒子所在单元：
//!
//! 1. 查询位置与缓存位置完全相同：直接返回缓存结果
//! 2. 新位置仍在缓存单元内：更新权重后返回
//! 3. 在缓存数据集内重新查找，再依次遍历其他数据集
//!
//! 带重复（幽灵）标记的单元一律视为未找到。

use super::arrays::{
    ArrayAssociation, ArraySchema, InputArraySpec, InputArrayTable, InputPort, SLOT_SURFACE_TYPE,
};
use super::{PhysicsModel, SurfaceType};
use crate::error::{TrackerError, TrackerResult};
use crate::integrator::FunctionSet;
use crate::particle::{LocatorCache, Particle};
use crate::quad_intersection::BilinearQuadIntersection;
use crate::threaded_data::WorkerScratch;
use glam::DVec3;
use lf_config::{LocatorKind, ModelConfig};
use lf_foundation::{DataSetIndex, FlatIndex, SurfaceIndex};
use lf_mesh::attributes::ARRAY_NORMALS;
use lf_mesh::cell::polygon_area_normal;
use lf_mesh::{
    Bounds, BruteForceLocator, Cell, CellLocator, CellType, DataSet, FieldData, RTreeCellLocator,
};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// 定位结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLocation {
    pub dataset: DataSetIndex,
    pub cell_id: usize,
}

#[derive(Debug)]
pub(super) struct FlowEntry {
    pub(super) dataset: Arc<dyn DataSet>,
    /// 隐式数据集使用自带查找，不建定位器
    pub(super) locator: Option<Box<dyn CellLocator>>,
}

/// 已注册的表面
#[derive(Debug)]
pub struct SurfaceEntry {
    pub flat_index: FlatIndex,
    pub dataset: Arc<dyn DataSet>,
    pub(super) locator: Box<dyn CellLocator>,
    /// 每单元单位法向
    pub(super) normals: Vec<DVec3>,
    /// 缺少表面类型数组时使用的类型
    pub(super) default_surface_type: Option<i32>,
}

impl SurfaceEntry {
    /// 单元法向
    pub fn normal(&self, cell_id: usize) -> DVec3 {
        self.normals.get(cell_id).copied().unwrap_or(DVec3::ZERO)
    }

    /// 是否使用了默认表面类型
    pub fn default_surface_type(&self) -> Option<i32> {
        self.default_surface_type
    }
}

/// 积分模型
#[derive(Debug)]
pub struct IntegrationModel {
    pub(super) physics: Box<dyn PhysicsModel>,
    pub(super) tolerance: f64,
    pub(super) non_planar_quad_support: bool,
    pub(super) use_initial_integration_time: bool,
    pub(super) locator_kind: LocatorKind,
    pub(super) datasets: Vec<FlowEntry>,
    pub(super) surfaces: Vec<SurfaceEntry>,
    pub(super) arrays: InputArrayTable,
    pub(super) seed_schema: ArraySchema,
    shared_cache: LocatorCache,
    shared_scratch: WorkerScratch,
}

impl IntegrationModel {
    pub fn new(physics: Box<dyn PhysicsModel>, config: &ModelConfig) -> Self {
        let mut arrays = InputArrayTable::with_base_slots();
        for (slot, spec) in physics.input_arrays() {
            arrays.set(slot, spec);
        }
        Self {
            physics,
            tolerance: config.tolerance,
            non_planar_quad_support: config.non_planar_quad_support,
            use_initial_integration_time: config.use_initial_integration_time,
            locator_kind: config.locator,
            datasets: Vec::new(),
            surfaces: Vec::new(),
            arrays,
            seed_schema: ArraySchema::default(),
            shared_cache: LocatorCache::default(),
            shared_scratch: WorkerScratch::new(),
        }
    }

    // ========================================================================
    // 访问器
    // ========================================================================

    pub fn physics(&self) -> &dyn PhysicsModel {
        self.physics.as_ref()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn use_initial_integration_time(&self) -> bool {
        self.use_initial_integration_time
    }

    pub fn non_planar_quad_support(&self) -> bool {
        self.non_planar_quad_support
    }

    pub fn set_non_planar_quad_support(&mut self, enabled: bool) {
        self.non_planar_quad_support = enabled;
    }

    /// 状态变量个数
    pub fn n_variables(&self) -> usize {
        self.physics.number_of_independent_variables().max(6)
    }

    pub fn n_tracked_user_data(&self) -> usize {
        self.physics.number_of_tracked_user_data()
    }

    pub fn n_flow_datasets(&self) -> usize {
        self.datasets.len()
    }

    pub fn flow_dataset(&self, index: DataSetIndex) -> Option<&dyn DataSet> {
        self.datasets.get(index.get()).map(|e| e.dataset.as_ref())
    }

    pub fn surfaces(&self) -> &[SurfaceEntry] {
        &self.surfaces
    }

    pub fn surface(&self, index: SurfaceIndex) -> Option<&SurfaceEntry> {
        self.surfaces.get(index.get())
    }

    /// 所有流场数据集的包围盒并集
    pub fn flow_bounds(&self) -> Bounds {
        self.datasets
            .iter()
            .fold(Bounds::empty(), |acc, e| acc.union(&e.dataset.bounds()))
    }

    pub fn input_arrays(&self) -> &InputArrayTable {
        &self.arrays
    }

    /// 指定槽位的数组来源
    pub fn set_input_array_to_process(
        &mut self,
        slot: usize,
        port: InputPort,
        connection: usize,
        association: ArrayAssociation,
        name: impl Into<String>,
    ) {
        self.arrays.set(
            slot,
            InputArraySpec {
                port,
                connection,
                association,
                name: name.into(),
            },
        );
    }

    pub fn seed_schema(&self) -> &ArraySchema {
        &self.seed_schema
    }

    pub fn set_seed_schema(&mut self, schema: ArraySchema) {
        self.seed_schema = schema;
    }

    /// 清空已注册的流场与表面
    pub fn clear_datasets(&mut self) {
        self.datasets.clear();
        self.surfaces.clear();
        self.shared_cache.clear();
    }

    // ========================================================================
    // 注册
    // ========================================================================

    /// 注册数据集
    pub fn add_dataset(
        &mut self,
        dataset: Arc<dyn DataSet>,
        is_surface: bool,
        flat_index: FlatIndex,
    ) -> TrackerResult<()> {
        if is_surface {
            self.add_surface(flat_index, dataset).map(|_| ())
        } else {
            self.add_flow_dataset(dataset).map(|_| ())
        }
    }

    fn new_locator(&self) -> Box<dyn CellLocator> {
        match self.locator_kind {
            LocatorKind::Rtree => Box::new(RTreeCellLocator::new()),
            LocatorKind::BruteForce => Box::new(BruteForceLocator::new()),
        }
    }

    fn check_not_empty(dataset: &dyn DataSet) -> TrackerResult<()> {
        if dataset.n_points() == 0 || dataset.n_cells() == 0 {
            error!("数据集为空（{} 点, {} 单元），已忽略", dataset.n_points(), dataset.n_cells());
            return Err(TrackerError::InvalidDataSet(format!(
                "{} 点, {} 单元",
                dataset.n_points(),
                dataset.n_cells()
            )));
        }
        Ok(())
    }

    /// 注册流场数据集
    ///
    /// 显式点集构建定位器；隐式数据集以包围盒中心做一次查找，
    /// 让其惰性结构在单线程阶段完成构建。
    pub fn add_flow_dataset(&mut self, dataset: Arc<dyn DataSet>) -> TrackerResult<DataSetIndex> {
        Self::check_not_empty(dataset.as_ref())?;
        self.check_flow_arrays(dataset.as_ref())?;

        let locator = if dataset.is_point_set() {
            let mut locator = self.new_locator();
            locator.build_locator(dataset.as_ref());
            Some(locator)
        } else {
            let mut cell = Cell::new();
            let mut weights = Vec::new();
            let _ = dataset.find_cell(dataset.bounds().center(), self.tolerance, &mut cell, &mut weights);
            None
        };

        let index = DataSetIndex::new(self.datasets.len());
        debug!(
            "注册流场 {}: {} 单元, 定位器 {}",
            index,
            dataset.n_cells(),
            locator.as_ref().map_or("内置", |l| l.name())
        );
        self.datasets.push(FlowEntry { dataset, locator });
        Ok(index)
    }

    /// 注册表面
    ///
    /// 缺少三分量 `Normals` 单元数组时计算单元法向；
    /// 缺少表面类型数组时所有单元按终止处理。
    pub fn add_surface(&mut self, flat_index: FlatIndex, dataset: Arc<dyn DataSet>) -> TrackerResult<SurfaceIndex> {
        Self::check_not_empty(dataset.as_ref())?;

        let mut locator = self.new_locator();
        locator.build_locator(dataset.as_ref());

        let normals = match dataset
            .cell_data()
            .get(ARRAY_NORMALS)
            .filter(|a| a.n_components() == 3 && a.n_tuples() == dataset.n_cells())
        {
            Some(array) => (0..dataset.n_cells())
                .map(|i| {
                    let t = array.tuple(i).unwrap_or(&[0.0, 0.0, 0.0]);
                    DVec3::new(t[0], t[1], t[2]).normalize_or_zero()
                })
                .collect(),
            None => {
                info!("表面 {} 缺少法向数组，计算单元法向", flat_index);
                compute_cell_normals(dataset.as_ref())
            }
        };

        let default_surface_type = match self.arrays.get(SLOT_SURFACE_TYPE) {
            Some(spec) if association_data(dataset.as_ref(), spec.association).has(&spec.name) => None,
            _ => {
                info!("表面 {} 缺少表面类型数组，默认终止", flat_index);
                Some(SurfaceType::Terminate.code())
            }
        };

        let index = SurfaceIndex::new(self.surfaces.len());
        self.surfaces.push(SurfaceEntry {
            flat_index,
            dataset,
            locator,
            normals,
            default_surface_type,
        });
        Ok(index)
    }

    /// 检查流场数据集包含模型需要的全部流场数组
    fn check_flow_arrays(&self, dataset: &dyn DataSet) -> TrackerResult<()> {
        for (slot, spec) in self.arrays.iter().filter(|(_, s)| s.port == InputPort::Flow) {
            if !association_data(dataset, spec.association).has(&spec.name) {
                error!("流场数据集缺少数组 {}（槽位 {}）", spec.name, slot);
                return Err(TrackerError::missing_array(slot, spec.name.clone()));
            }
        }
        Ok(())
    }

    /// 检查种子模式包含模型需要的全部种子数组
    pub fn check_seed_arrays(&self, schema: &ArraySchema) -> TrackerResult<()> {
        for (slot, spec) in self.arrays.iter().filter(|(_, s)| s.port == InputPort::Seed) {
            if slot == super::SLOT_INITIAL_INTEGRATION_TIME && !self.use_initial_integration_time {
                continue;
            }
            if schema.offset_of(&spec.name).is_none() {
                error!("种子缺少数组 {}（槽位 {}）", spec.name, slot);
                return Err(TrackerError::missing_array(slot, spec.name.clone()));
            }
        }
        Ok(())
    }

    // ========================================================================
    // 定位
    // ========================================================================

    fn find_in_entry(
        &self,
        entry: &FlowEntry,
        x: DVec3,
        cell: &mut Cell,
        weights: &mut Vec<f64>,
        queries: &mut u64,
    ) -> Option<usize> {
        *queries += 1;
        let dataset = entry.dataset.as_ref();
        let cell_id = match &entry.locator {
            Some(locator) => locator.find_cell(dataset, x, self.tolerance, cell, weights),
            None => dataset.find_cell(x, self.tolerance, cell, weights),
        }?;
        if dataset.is_ghost_cell(cell_id) {
            return None;
        }
        Some(cell_id)
    }

    /// 查找包含 `x` 的流场单元，并维护粒子的定位缓存
    ///
    /// 只读访问模型，可在工作线程中并发调用。成功时 `cache.weights`
    /// 为 `x` 在单元内的插值权重。
    pub fn find_in_locators(
        &self,
        x: DVec3,
        cache: &mut LocatorCache,
        scratch: &mut WorkerScratch,
    ) -> Option<CellLocation> {
        if self.datasets.is_empty() {
            return None;
        }
        let WorkerScratch {
            cell,
            weights,
            stats,
            ..
        } = scratch;

        let last = cache.dataset.filter(|d| d.get() < self.datasets.len());
        if let Some(ds) = last {
            if cache.position == x {
                stats.exact_hits += 1;
                return Some(CellLocation {
                    dataset: ds,
                    cell_id: cache.cell_id,
                });
            }

            let entry = &self.datasets[ds.get()];
            if cache.cell_id < entry.dataset.n_cells() {
                entry.dataset.get_cell(cache.cell_id, cell);
                if cell.evaluate_position(x, self.tolerance, weights) {
                    std::mem::swap(&mut cache.weights, weights);
                    cache.position = x;
                    stats.cell_hits += 1;
                    return Some(CellLocation {
                        dataset: ds,
                        cell_id: cache.cell_id,
                    });
                }
            }

            if let Some(cell_id) = self.find_in_entry(entry, x, cell, weights, &mut stats.locator_queries) {
                std::mem::swap(&mut cache.weights, weights);
                cache.store(ds, cell_id, x);
                stats.dataset_hits += 1;
                return Some(CellLocation { dataset: ds, cell_id });
            }
        }

        for (i, entry) in self.datasets.iter().enumerate() {
            let ds = DataSetIndex::new(i);
            if Some(ds) == last {
                continue;
            }
            if let Some(cell_id) = self.find_in_entry(entry, x, cell, weights, &mut stats.locator_queries) {
                std::mem::swap(&mut cache.weights, weights);
                cache.store(ds, cell_id, x);
                stats.scan_hits += 1;
                return Some(CellLocation { dataset: ds, cell_id });
            }
        }

        stats.misses += 1;
        None
    }

    /// 使用模型内部共享缓存的定位，仅供单线程场景使用
    pub fn find_in_locators_shared(&mut self, x: DVec3) -> Option<(CellLocation, &[f64])> {
        let mut cache = std::mem::take(&mut self.shared_cache);
        let mut scratch = std::mem::take(&mut self.shared_scratch);
        let found = self.find_in_locators(x, &mut cache, &mut scratch);
        self.shared_cache = cache;
        self.shared_scratch = scratch;
        found.map(|loc| (loc, self.shared_cache.weights.as_slice()))
    }

    /// 共享缓存的统计
    pub fn shared_stats(&self) -> &crate::threaded_data::LocatorCacheStats {
        &self.shared_scratch.stats
    }

    // ========================================================================
    // 数据访问
    // ========================================================================

    /// 读取流场或表面数组在指定单元处的值
    ///
    /// 点数据按 `weights` 对单元各点插值，单元数据取该单元元组，
    /// 整体数据取第一个元组。`out` 的长度须等于数组分量数。
    pub fn get_flow_or_surface_data(
        &self,
        dataset: &dyn DataSet,
        slot: usize,
        cell_id: usize,
        weights: Option<&[f64]>,
        id_list: &mut Vec<usize>,
        out: &mut [f64],
    ) -> TrackerResult<()> {
        let spec = self
            .arrays
            .get(slot)
            .ok_or_else(|| TrackerError::missing_array(slot, "未注册"))?;
        if spec.port == InputPort::Seed {
            return Err(TrackerError::invalid_array(slot, "种子数组请使用 seed_value"));
        }
        let array = association_data(dataset, spec.association)
            .get(&spec.name)
            .ok_or_else(|| TrackerError::missing_array(slot, spec.name.clone()))?;
        if array.n_components() != out.len() {
            return Err(TrackerError::invalid_array(
                slot,
                format!("分量数 {} 与期望 {} 不符", array.n_components(), out.len()),
            ));
        }

        let missing = || TrackerError::invalid_array(slot, "元组越界");
        match spec.association {
            ArrayAssociation::Field => out.copy_from_slice(array.tuple(0).ok_or_else(missing)?),
            ArrayAssociation::Cells => out.copy_from_slice(array.tuple(cell_id).ok_or_else(missing)?),
            ArrayAssociation::Points => {
                let weights = weights.ok_or_else(|| TrackerError::invalid_array(slot, "点数据插值需要权重"))?;
                dataset.cell_point_ids(cell_id, id_list);
                out.fill(0.0);
                for (&pid, &w) in id_list.iter().zip(weights) {
                    let tuple = array.tuple(pid).ok_or_else(missing)?;
                    for (o, v) in out.iter_mut().zip(tuple) {
                        *o += w * v;
                    }
                }
            }
        }
        Ok(())
    }

    /// 粒子的种子数组值
    pub fn seed_value<'p>(&self, slot: usize, particle: &'p Particle) -> TrackerResult<&'p [f64]> {
        let spec = self
            .arrays
            .get(slot)
            .ok_or_else(|| TrackerError::missing_array(slot, "未注册"))?;
        if spec.port != InputPort::Seed {
            return Err(TrackerError::invalid_array(slot, "不是种子数组"));
        }
        let (offset, n) = self
            .seed_schema
            .offset_of(&spec.name)
            .ok_or_else(|| TrackerError::missing_array(slot, spec.name.clone()))?;
        particle
            .seed_data
            .get(offset..offset + n)
            .ok_or_else(|| TrackerError::invalid_array(slot, "种子数据长度不足"))
    }

    /// 表面单元的交互类型
    pub(super) fn surface_type(&self, surface: &SurfaceEntry, cell_id: usize, id_list: &mut Vec<usize>) -> Option<i32> {
        if let Some(t) = surface.default_surface_type {
            return Some(t);
        }
        let mut value = [0.0];
        match self.get_flow_or_surface_data(surface.dataset.as_ref(), SLOT_SURFACE_TYPE, cell_id, None, id_list, &mut value) {
            Ok(()) => Some(value[0] as i32),
            Err(e) => {
                error!("无法读取表面 {} 单元 {} 的表面类型: {}", surface.flat_index, cell_id, e);
                None
            }
        }
    }

    // ========================================================================
    // 右端项
    // ========================================================================

    /// 在 `x` 处求右端项
    ///
    /// 找不到包含 `x` 的单元时返回 false。
    pub fn function_values(
        &self,
        x: &[f64],
        t: f64,
        f: &mut [f64],
        particle: &mut Particle,
        scratch: &mut WorkerScratch,
    ) -> bool {
        if x.len() < 3 {
            return false;
        }
        let position = DVec3::new(x[0], x[1], x[2]);
        let location = match self.find_in_locators(position, &mut particle.locator_cache, scratch) {
            Some(location) => location,
            None => {
                trace!("粒子 {} 在 {:?} 处不在任何流场单元内", particle.id, position);
                return false;
            }
        };

        let particle: &Particle = particle;
        let mut sample = FlowSample {
            model: self,
            dataset: self.datasets[location.dataset.get()].dataset.as_ref(),
            location,
            weights: &particle.locator_cache.weights,
            id_list: &mut scratch.id_list,
        };
        self.physics.evaluate_derivative(&mut sample, particle, t, x, f)
    }

    // ========================================================================
    // 几何
    // ========================================================================

    /// 线段与表面单元求交，返回 (比例, 交点)
    ///
    /// 启用非平面四边形支持时，四边形按双线性曲面片求交。
    pub fn intersect_with_line(
        &self,
        cell: &Cell,
        p1: DVec3,
        p2: DVec3,
        quad: &mut BilinearQuadIntersection,
    ) -> Option<(f64, DVec3)> {
        if self.non_planar_quad_support && cell.cell_type() == CellType::Quad && cell.n_points() == 4 {
            if p1 == p2 {
                return None;
            }
            let pts = cell.points();
            quad.set_points(pts[0], pts[3], pts[1], pts[2]);
            let q = p2 - p1;
            let length = q.length();
            let uvt = quad.ray_intersection(p1, q / length)?;
            let t = uvt.z / length;
            if (0.0..=1.0).contains(&t) {
                return Some((t, quad.compute_cartesian_coordinates(uvt.x, uvt.y)));
            }
            return None;
        }
        cell.intersect_with_line(p1, p2, self.tolerance).map(|hit| (hit.t, hit.x))
    }

    /// 把下一步状态插值到当前与下一步之间的比例 `factor` 处
    ///
    /// `force_inside` 时再沿位移方向后退 `tolerance` 的长度，
    /// 保证新位置留在表面内侧。步长同比例缩放。
    pub fn interpolate_next_particle_variables(&self, particle: &mut Particle, factor: f64, force_inside: bool) {
        let mut factor = factor;
        if force_inside {
            let magnitude = particle.position_vector_magnitude();
            if magnitude > 0.0 && factor > 0.0 {
                factor = (factor * (magnitude - self.tolerance / factor) / magnitude).max(0.0);
            }
        }
        for (next, cur) in particle
            .next_equation_variables
            .iter_mut()
            .zip(&particle.equation_variables)
        {
            *next = cur + (*next - cur) * factor;
        }
        for (next, cur) in particle
            .next_tracked_user_data
            .iter_mut()
            .zip(&particle.tracked_user_data)
        {
            *next = cur + (*next - cur) * factor;
        }
        particle.step_time *= factor;
    }
}

fn association_data(dataset: &dyn DataSet, association: ArrayAssociation) -> &FieldData {
    match association {
        ArrayAssociation::Points => dataset.point_data(),
        ArrayAssociation::Cells => dataset.cell_data(),
        ArrayAssociation::Field => dataset.field_data(),
    }
}

fn compute_cell_normals(dataset: &dyn DataSet) -> Vec<DVec3> {
    let mut cell = Cell::new();
    (0..dataset.n_cells())
        .map(|i| {
            dataset.get_cell(i, &mut cell);
            if cell.cell_type().dimension() == 2 {
                polygon_area_normal(cell.points()).1
            } else {
                DVec3::ZERO
            }
        })
        .collect()
}

// ============================================================
// 流场采样
// ============================================================

/// 粒子所在流场单元的数据访问
pub struct FlowSample<'a> {
    model: &'a IntegrationModel,
    dataset: &'a dyn DataSet,
    location: CellLocation,
    weights: &'a [f64],
    id_list: &'a mut Vec<usize>,
}

impl<'a> FlowSample<'a> {
    pub fn dataset(&self) -> &dyn DataSet {
        self.dataset
    }

    pub fn location(&self) -> CellLocation {
        self.location
    }

    pub fn weights(&self) -> &[f64] {
        self.weights
    }

    /// 读取流场槽位的值
    pub fn flow_data(&mut self, slot: usize, out: &mut [f64]) -> TrackerResult<()> {
        self.model.get_flow_or_surface_data(
            self.dataset,
            slot,
            self.location.cell_id,
            Some(self.weights),
            self.id_list,
            out,
        )
    }

    /// 读取种子槽位的值
    pub fn seed_value<'p>(&self, slot: usize, particle: &'p Particle) -> TrackerResult<&'p [f64]> {
        self.model.seed_value(slot, particle)
    }
}

/// 把积分模型与粒子包装成积分器的右端项函数
pub struct ParticleFunctionSet<'a> {
    pub model: &'a IntegrationModel,
    pub particle: &'a mut Particle,
    pub scratch: &'a mut WorkerScratch,
}

impl FunctionSet for ParticleFunctionSet<'_> {
    fn n_equations(&self) -> usize {
        self.particle.n_variables()
    }

    fn evaluate(&mut self, x: &[f64], t: f64, f: &mut [f64]) -> bool {
        self.model.function_values(x, t, f, self.particle, self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{create_physics_model, SLOT_INITIAL_VELOCITY};
    use lf_mesh::{DataArray, ImageData, UnstructuredGrid};

    fn flow_grid(offset: f64) -> UnstructuredGrid {
        let mut grid =
            UnstructuredGrid::hexahedral_box(DVec3::new(offset, 0.0, 0.0), DVec3::splat(0.5), [4, 2, 2]).unwrap();
        let n = grid.n_points();
        let pd = grid.point_data_mut();
        pd.add_array(DataArray::from_values("FlowVelocity", 3, [1.0, 0.0, 0.0].repeat(n)).unwrap());
        pd.add_array(DataArray::from_values("FlowDensity", 1, vec![1000.0; n]).unwrap());
        pd.add_array(DataArray::from_values("FlowDynamicViscosity", 1, vec![1e-3; n]).unwrap());
        grid
    }

    fn model() -> IntegrationModel {
        IntegrationModel::new(create_physics_model(&ModelConfig::default()), &ModelConfig::default())
    }

    #[test]
    fn test_find_in_locators_is_idempotent() {
        let mut model = model();
        model.add_flow_dataset(Arc::new(flow_grid(0.0))).unwrap();
        let mut cache = LocatorCache::default();
        let mut scratch = WorkerScratch::new();
        let x = DVec3::new(0.7, 0.3, 0.3);

        let first = model.find_in_locators(x, &mut cache, &mut scratch).unwrap();
        let queries = scratch.stats.locator_queries;
        let weights = cache.weights.clone();
        let second = model.find_in_locators(x, &mut cache, &mut scratch).unwrap();
        assert_eq!(first, second);
        assert_eq!(scratch.stats.locator_queries, queries);
        assert_eq!(scratch.stats.exact_hits, 1);
        assert_eq!(cache.weights, weights);

        // 同一单元内移动：缓存单元命中
        let third = model
            .find_in_locators(DVec3::new(0.75, 0.3, 0.3), &mut cache, &mut scratch)
            .unwrap();
        assert_eq!(third, first);
        assert_eq!(scratch.stats.cell_hits, 1);
        assert_eq!(scratch.stats.locator_queries, queries);
    }

    #[test]
    fn test_find_across_datasets() {
        let mut model = model();
        model.add_flow_dataset(Arc::new(flow_grid(0.0))).unwrap();
        model.add_flow_dataset(Arc::new(flow_grid(2.0))).unwrap();
        let mut cache = LocatorCache::default();
        let mut scratch = WorkerScratch::new();

        let a = model.find_in_locators(DVec3::new(0.2, 0.2, 0.2), &mut cache, &mut scratch).unwrap();
        assert_eq!(a.dataset, DataSetIndex::new(0));
        let b = model.find_in_locators(DVec3::new(3.2, 0.2, 0.2), &mut cache, &mut scratch).unwrap();
        assert_eq!(b.dataset, DataSetIndex::new(1));
        assert_eq!(scratch.stats.scan_hits, 1);
        assert!(model.find_in_locators(DVec3::new(9.0, 0.2, 0.2), &mut cache, &mut scratch).is_none());
        // 未命中不破坏缓存
        assert_eq!(cache.dataset, Some(DataSetIndex::new(1)));
    }

    #[test]
    fn test_ghost_cells_are_skipped() {
        let mut grid = flow_grid(0.0);
        let mut ghosts = vec![0u8; grid.n_cells()];
        ghosts[0] = lf_mesh::DUPLICATE_CELL;
        grid.set_ghost_flags(ghosts).unwrap();
        let mut model = model();
        model.add_flow_dataset(Arc::new(grid)).unwrap();
        assert!(model.find_in_locators_shared(DVec3::new(0.1, 0.1, 0.1)).is_none());
        assert!(model.find_in_locators_shared(DVec3::new(0.6, 0.1, 0.1)).is_some());
    }

    #[test]
    fn test_implicit_dataset_built_at_registration() {
        let mut image = ImageData::new(DVec3::ZERO, DVec3::splat(0.5), [5, 3, 3]).unwrap();
        let n = image.n_points();
        let pd = image.point_data_mut();
        pd.add_array(DataArray::from_values("FlowVelocity", 3, [0.0, 1.0, 0.0].repeat(n)).unwrap());
        pd.add_array(DataArray::from_values("FlowDensity", 1, vec![1.0; n]).unwrap());
        pd.add_array(DataArray::from_values("FlowDynamicViscosity", 1, vec![1.0; n]).unwrap());
        let image: Arc<dyn DataSet> = Arc::new(image);
        assert!(!image.is_built());
        let mut model = model();
        model.add_flow_dataset(image.clone()).unwrap();
        assert!(image.is_built());
    }

    #[test]
    fn test_missing_flow_array_is_config_error() {
        let mut grid = flow_grid(0.0);
        grid.point_data_mut().remove("FlowDensity");
        let mut model = model();
        let err = model.add_flow_dataset(Arc::new(grid)).unwrap_err();
        assert!(matches!(err, TrackerError::MissingArray { slot: 4, .. }));
        assert_eq!(model.n_flow_datasets(), 0);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let mut model = model();
        let empty = UnstructuredGrid::new(Vec::new());
        assert!(model.add_dataset(Arc::new(empty), false, FlatIndex::new(0)).is_err());
    }

    #[test]
    fn test_point_data_interpolation() {
        let mut grid = flow_grid(0.0);
        let n = grid.n_points();
        let xs: Vec<f64> = (0..n).map(|i| grid.point(i).x).collect();
        grid.point_data_mut()
            .add_array(DataArray::from_values("FlowDensity", 1, xs).unwrap());
        let mut model = model();
        model.add_flow_dataset(Arc::new(grid)).unwrap();
        let (loc, weights) = model.find_in_locators_shared(DVec3::new(0.8, 0.3, 0.3)).unwrap();
        let weights = weights.to_vec();
        let mut out = [0.0];
        let mut ids = Vec::new();
        let dataset = model.flow_dataset(loc.dataset).unwrap();
        model
            .get_flow_or_surface_data(dataset, 4, loc.cell_id, Some(&weights), &mut ids, &mut out)
            .unwrap();
        assert!((out[0] - 0.8).abs() < 1e-10);
    }

    #[test]
    fn test_seed_value_uses_schema_offsets() {
        let mut model = model();
        let mut seeds = FieldData::new();
        seeds.add_array(DataArray::from_values("ParticleDiameter", 1, vec![0.01]).unwrap());
        seeds.add_array(DataArray::from_values("ParticleInitialVelocity", 3, vec![1.0, 2.0, 3.0]).unwrap());
        let schema = ArraySchema::from_field_data(&seeds);
        let mut data = Vec::new();
        schema.gather_tuple(&seeds, 0, &mut data);
        model.set_seed_schema(schema);
        let p = Particle::new(6, 0, 0, 0, 0, 0.0, data);
        assert_eq!(model.seed_value(SLOT_INITIAL_VELOCITY, &p).unwrap(), &[1.0, 2.0, 3.0]);
        assert!(model.seed_value(3, &p).is_err());
    }

    #[test]
    fn test_interpolate_next_variables() {
        let model = model();
        let mut p = Particle::new(6, 0, 0, 0, 0, 0.0, Vec::new());
        p.set_next_position(DVec3::new(2.0, 0.0, 0.0));
        p.set_next_velocity(DVec3::new(4.0, 0.0, 0.0));
        p.step_time = 1.0;
        model.interpolate_next_particle_variables(&mut p, 0.5, false);
        assert_eq!(p.next_position(), DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(p.next_velocity(), DVec3::new(2.0, 0.0, 0.0));
        assert!((p.step_time - 0.5).abs() < 1e-15);

        model.interpolate_next_particle_variables(&mut p, 0.5, true);
        let expected = 0.5 - model.tolerance();
        assert!((p.next_position().x - expected).abs() < 1e-12);
    }
}

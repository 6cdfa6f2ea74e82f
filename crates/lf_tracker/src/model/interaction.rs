// crates/lf_tracker/src/model/interaction.rs

//! 表面交互
//!
//! 对一步位移线段与所有表面求交，取最近的非穿越交点作为主交互，
//! 穿越表面的交点只在主交互之前时记录。主交互按表面类型分派：
//! 终止、反弹、破碎，其余交给物理模型。

use super::integration::IntegrationModel;
use super::{SpawnContext, SurfaceHit, SurfaceType, USER_SURFACE_TYPE};
use crate::particle::{Interaction, Particle, Termination};
use crate::threaded_data::WorkerScratch;
use glam::DVec3;
use lf_foundation::{FlatIndex, SurfaceIndex};
use smallvec::SmallVec;
use std::cmp::Ordering;
use tracing::{error, trace, warn};

/// 单步内穿孔修正的最大轮数
const MAX_PERFORATION_PASSES: usize = 8;

// ============================================================
// 结果
// ============================================================

/// 一次表面交互的输出
#[derive(Debug, Default)]
pub struct SurfaceInteractionResult {
    /// 需要记录的主交互点，粒子快照位于交点处
    pub interaction: Option<(FlatIndex, Particle)>,
    /// 主交互之前穿越的表面，按 (扁平索引, 比例) 排序
    pub pass_throughs: Vec<(FlatIndex, Particle)>,
}

impl SurfaceInteractionResult {
    pub fn is_empty(&self) -> bool {
        self.interaction.is_none() && self.pass_throughs.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct PassThroughKey {
    flat_index: FlatIndex,
    factor: f64,
}

impl PartialEq for PassThroughKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PassThroughKey {}

impl PartialOrd for PassThroughKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PassThroughKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.flat_index
            .cmp(&other.flat_index)
            .then_with(|| self.factor.total_cmp(&other.factor))
    }
}

/// 一步内的穿越交点集合
///
/// 同一表面同一比例只保留一个，多个单元共享边时不会重复记录。
/// 一步内的穿越通常只有少数几个，保持有序的小数组即可。
#[derive(Debug, Default, Clone)]
pub struct PassThroughSet {
    items: SmallVec<[PassThroughKey; 4]>,
}

impl PassThroughSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入交点，已存在时返回 false
    pub fn insert(&mut self, flat_index: FlatIndex, factor: f64) -> bool {
        let key = PassThroughKey { flat_index, factor };
        match self.items.binary_search(&key) {
            Ok(_) => false,
            Err(pos) => {
                self.items.insert(pos, key);
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 按 (扁平索引, 比例) 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = (FlatIndex, f64)> + '_ {
        self.items.iter().map(|k| (k.flat_index, k.factor))
    }
}

// ============================================================
// 内置交互
// ============================================================

/// 终止粒子
pub fn terminate_particle(particle: &mut Particle) -> bool {
    particle.termination = Termination::SurfTerminated;
    particle.interaction = Interaction::Terminated;
    true
}

/// 反弹：下一步速度关于表面法向镜像
pub fn bounce_particle(particle: &mut Particle, normal: DVec3) -> bool {
    particle.interaction = Interaction::Bounce;
    let v = particle.next_velocity();
    particle.set_next_velocity(v - 2.0 * v.dot(normal) * normal);
    true
}

/// 破碎：终止粒子并派生两个子粒子
///
/// 子粒子速度为反射速度加减 n×v，再缩放到原速度大小。
pub fn break_particle(particle: &mut Particle, normal: DVec3, spawn: &mut SpawnContext<'_>) -> bool {
    particle.termination = Termination::SurfBreak;
    particle.interaction = Interaction::Break;

    let v = particle.next_velocity();
    let reflected = v - 2.0 * v.dot(normal) * normal;
    let cross = normal.cross(v);
    let speed = v.length();

    for velocity in [reflected + cross, reflected - cross] {
        let norm = velocity.length();
        let velocity = if norm != 0.0 { velocity / norm * speed } else { velocity };
        let mut child = particle.new_particle(spawn.new_particle_id());
        child.set_velocity(velocity);
        child.last_surface = particle.last_surface;
        spawn.spawn(child);
    }
    true
}

// ============================================================
// 交互计算
// ============================================================

#[derive(Debug, Clone, Copy)]
struct PrimaryHit {
    surface: SurfaceIndex,
    cell_id: usize,
    surface_type: i32,
}

impl IntegrationModel {
    /// 计算本步位移与表面的交互
    ///
    /// 发生主交互时粒子的下一步状态被截断到交点（略向内侧），
    /// 并按表面类型修改粒子。派生粒子通过 `spawn` 提交。
    pub fn compute_surface_interaction(
        &self,
        particle: &mut Particle,
        scratch: &mut WorkerScratch,
        spawn: &mut SpawnContext<'_>,
    ) -> SurfaceInteractionResult {
        let mut result = SurfaceInteractionResult::default();
        if self.surfaces.is_empty() {
            return result;
        }

        let mut pass_set = PassThroughSet::new();
        let mut factor: f64;
        let mut primary: Option<PrimaryHit>;
        let mut passes = 0;

        loop {
            pass_set.clear();
            factor = 1.0;
            primary = None;
            let perforation = self.scan_surfaces(particle, scratch, &mut pass_set, &mut factor, &mut primary);
            if !perforation {
                break;
            }
            passes += 1;
            if passes >= MAX_PERFORATION_PASSES {
                warn!(
                    "粒子 {} 单步穿孔修正超过 {} 轮，停止修正",
                    particle.id, MAX_PERFORATION_PASSES
                );
                break;
            }
        }

        for (flat_index, pass_factor) in pass_set.iter() {
            // 与主交互重合的穿越交点不记录
            if pass_factor < factor {
                let mut clone = particle.clone_particle();
                clone.interaction = Interaction::Pass;
                self.interpolate_next_particle_variables(&mut clone, pass_factor, false);
                result.pass_throughs.push((flat_index, clone));
            }
        }

        particle.last_surface = primary.map(|hit| (hit.surface, hit.cell_id));

        let hit = match primary {
            Some(hit) => hit,
            None => return result,
        };
        let entry = &self.surfaces[hit.surface.get()];
        let normal = entry.normal(hit.cell_id);

        self.interpolate_next_particle_variables(particle, factor, true);
        let mut snapshot = particle.clone_particle();

        let record = match SurfaceType::from_code(hit.surface_type) {
            Some(SurfaceType::Terminate) => terminate_particle(particle),
            Some(SurfaceType::Bounce) => bounce_particle(particle, normal),
            Some(SurfaceType::BreakUp) => break_particle(particle, normal, spawn),
            Some(SurfaceType::PassThrough) => {
                error!("穿越表面不应成为主交互，本步交互结果无效");
                return result;
            }
            _ => {
                if hit.surface_type != SurfaceType::ModelDefined.code() && hit.surface_type < USER_SURFACE_TYPE {
                    warn!(
                        "表面类型 {} 小于 {}，该范围保留给内置交互",
                        hit.surface_type, USER_SURFACE_TYPE
                    );
                }
                let surface_hit = SurfaceHit {
                    surface: hit.surface,
                    flat_index: entry.flat_index,
                    dataset: entry.dataset.as_ref(),
                    cell_id: hit.cell_id,
                    normal,
                    factor,
                };
                self.physics
                    .interact_with_surface(hit.surface_type, particle, &surface_hit, spawn)
            }
        };

        if record {
            // 交互输出的 Termination 数组取自快照
            snapshot.interaction = particle.interaction;
            snapshot.termination = particle.termination;
            result.interaction = Some((entry.flat_index, snapshot));
        }
        trace!(
            "粒子 {} 与 {} 单元 {} 交互: {:?}",
            particle.id,
            entry.flat_index,
            hit.cell_id,
            particle.interaction
        );
        result
    }

    /// 一轮表面扫描，返回是否发生了穿孔修正
    fn scan_surfaces(
        &self,
        particle: &mut Particle,
        scratch: &mut WorkerScratch,
        pass_set: &mut PassThroughSet,
        factor: &mut f64,
        primary: &mut Option<PrimaryHit>,
    ) -> bool {
        let WorkerScratch {
            cell,
            id_list,
            cell_candidates,
            quad,
            ..
        } = scratch;

        for (i, entry) in self.surfaces.iter().enumerate() {
            let surface = SurfaceIndex::new(i);
            let dataset = entry.dataset.as_ref();
            let p1 = particle.position();
            let p2 = particle.next_position();

            cell_candidates.clear();
            entry
                .locator
                .find_cells_along_line(dataset, p1, p2, self.tolerance, cell_candidates);

            for &cell_id in cell_candidates.iter() {
                dataset.get_cell(cell_id, cell);
                // 包围盒候选可能并不相交
                let Some((t, _)) = self.intersect_with_line(cell, p1, p2, quad) else {
                    continue;
                };
                if t >= *factor {
                    continue;
                }
                let Some(surface_type) = self.surface_type(entry, cell_id, id_list) else {
                    continue;
                };

                if surface_type == SurfaceType::PassThrough.code() {
                    pass_set.insert(entry.flat_index, t);
                    continue;
                }

                if particle.last_surface == Some((surface, cell_id)) {
                    if check_surface_perforation(particle, entry.normal(cell_id)) {
                        return true;
                    }
                    continue;
                }

                *factor = t;
                *primary = Some(PrimaryHit {
                    surface,
                    cell_id,
                    surface_type,
                });
            }
        }
        false
    }
}

/// 检查粒子是否穿过了上次交互的表面单元
///
/// 前一步与本步位移在法向上的投影同号（或有一个为零）时视为穿孔，
/// 把位移与下一步速度关于法向镜像后返回 true。
fn check_surface_perforation(particle: &mut Particle, normal: DVec3) -> bool {
    let prev_to_current = particle.position() - particle.prev_position();
    let current_to_next = particle.next_position() - particle.position();

    let dot = normal.dot(current_to_next);
    let prev_dot = normal.dot(prev_to_current);
    if dot == 0.0 || prev_dot == 0.0 || prev_dot * dot > 0.0 {
        let reflected = current_to_next - 2.0 * dot * normal;
        particle.set_next_position(particle.position() + reflected);
        let v = particle.next_velocity();
        particle.set_next_velocity(v - 2.0 * v.dot(normal) * normal);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::create_physics_model;
    use crate::particle::ParticleIdAllocator;
    use lf_config::ModelConfig;
    use lf_mesh::{CellType, DataArray, DataSet, UnstructuredGrid};
    use std::sync::Arc;

    fn moving_particle(v: DVec3) -> Particle {
        let mut p = Particle::new(6, 0, 0, 0, 0, 0.0, Vec::new());
        p.set_velocity(v);
        p.set_next_position(v * 0.1);
        p.set_next_velocity(v);
        p.step_time = 0.1;
        p
    }

    #[test]
    fn test_bounce_reflects_next_velocity() {
        let mut p = moving_particle(DVec3::new(1.0, 0.0, -2.0));
        assert!(bounce_particle(&mut p, DVec3::Z));
        assert_eq!(p.next_velocity(), DVec3::new(1.0, 0.0, 2.0));
        assert_eq!(p.interaction, Interaction::Bounce);
        assert!(!p.is_terminated());
    }

    #[test]
    fn test_break_spawns_two_children() {
        let mut p = moving_particle(DVec3::new(1.0, 0.0, -1.0));
        p.id = 7;
        let ids = ParticleIdAllocator::new(100, 1);
        let mut spawned = Vec::new();
        let mut spawn = SpawnContext::new(&ids, &mut spawned);
        assert!(break_particle(&mut p, DVec3::Z, &mut spawn));
        assert_eq!(p.termination, Termination::SurfBreak);
        assert_eq!(p.interaction, Interaction::Break);

        assert_eq!(spawned.len(), 2);
        let speed = 2f64.sqrt();
        for (i, child) in spawned.iter().enumerate() {
            assert_eq!(child.id, 100 + i as i64);
            assert_eq!(child.parent_id, 7);
            assert!((child.velocity().length() - speed).abs() < 1e-12);
            // 子粒子离开表面
            assert!(child.velocity().z > 0.0);
        }
        assert!(spawned[0].velocity().y * spawned[1].velocity().y < 0.0);
    }

    #[test]
    fn test_break_children_mirror_about_reflection() {
        let v = DVec3::new(0.3, -0.7, -1.2);
        let mut p = moving_particle(v);
        let ids = ParticleIdAllocator::default();
        let mut spawned = Vec::new();
        let mut spawn = SpawnContext::new(&ids, &mut spawned);
        break_particle(&mut p, DVec3::Z, &mut spawn);

        let reflected = DVec3::new(0.3, -0.7, 1.2);
        let (c1, c2) = (spawned[0].velocity(), spawned[1].velocity());
        // 两个子粒子关于反射速度对称
        let sum = c1 + c2;
        assert!(sum.cross(reflected).length() < 1e-12);
        assert!(sum.dot(reflected) > 0.0);
        assert!((c1.dot(reflected) - c2.dot(reflected)).abs() < 1e-12);
        assert!((c1 - c2).dot(reflected).abs() < 1e-12);
    }

    #[test]
    fn test_break_with_zero_velocity() {
        let mut p = moving_particle(DVec3::ZERO);
        let ids = ParticleIdAllocator::default();
        let mut spawned = Vec::new();
        let mut spawn = SpawnContext::new(&ids, &mut spawned);
        break_particle(&mut p, DVec3::Z, &mut spawn);
        assert!(spawned.iter().all(|c| c.velocity() == DVec3::ZERO));
    }

    #[test]
    fn test_perforation_mirrors_step() {
        let mut p = moving_particle(DVec3::new(0.0, 0.0, -1.0));
        p.prev_equation_variables[2] = 0.1;
        // 前一步与本步同向穿过法向为 +z 的单元
        assert!(check_surface_perforation(&mut p, DVec3::Z));
        assert!((p.next_position().z - 0.1).abs() < 1e-15);
        assert_eq!(p.next_velocity(), DVec3::new(0.0, 0.0, 1.0));

        // 反向运动不是穿孔
        let mut q = moving_particle(DVec3::new(0.0, 0.0, 1.0));
        q.prev_equation_variables[2] = 0.1;
        assert!(!check_surface_perforation(&mut q, DVec3::Z));
    }

    #[test]
    fn test_pass_through_set_dedup_and_order() {
        let mut set = PassThroughSet::new();
        assert!(set.insert(FlatIndex::new(2), 0.5));
        assert!(set.insert(FlatIndex::new(1), 0.7));
        assert!(set.insert(FlatIndex::new(1), 0.3));
        assert!(!set.insert(FlatIndex::new(2), 0.5));
        let items: Vec<_> = set.iter().collect();
        assert_eq!(
            items,
            vec![(FlatIndex::new(1), 0.3), (FlatIndex::new(1), 0.7), (FlatIndex::new(2), 0.5)]
        );
    }

    // ========================================================================
    // 表面扫描
    // ========================================================================

    /// 单个四边形单元的平面挡板，`axis` 为法向所在坐标轴
    fn plate(axis: usize, at: f64, surface_type: SurfaceType) -> Arc<dyn DataSet> {
        let corner = |a: f64, b: f64| {
            let mut p = [0.0; 3];
            p[(axis + 1) % 3] = a;
            p[(axis + 2) % 3] = b;
            p[axis] = at;
            DVec3::from_array(p)
        };
        let mut grid = UnstructuredGrid::new(vec![
            corner(-2.0, -2.0),
            corner(2.0, -2.0),
            corner(2.0, 2.0),
            corner(-2.0, 2.0),
        ]);
        grid.add_cell(CellType::Quad, &[0, 1, 2, 3]).unwrap();
        grid.cell_data_mut().add_array(
            DataArray::from_values("SurfaceType", 1, vec![f64::from(surface_type.code())]).unwrap(),
        );
        Arc::new(grid)
    }

    fn surface_model(surfaces: Vec<Arc<dyn DataSet>>) -> IntegrationModel {
        let config = ModelConfig::default();
        let mut model = IntegrationModel::new(create_physics_model(&config), &config);
        for (i, surface) in surfaces.into_iter().enumerate() {
            model.add_surface(FlatIndex::new(i), surface).unwrap();
        }
        model
    }

    fn stepping(prev: DVec3, cur: DVec3, next: DVec3) -> Particle {
        let mut p = Particle::new(6, 0, 0, 0, 0, 0.0, Vec::new());
        p.prev_equation_variables[..3].copy_from_slice(&prev.to_array());
        p.set_position(cur);
        p.set_next_position(next);
        let v = (next - cur) / 0.1;
        p.set_velocity(v);
        p.set_next_velocity(v);
        p.step_time = 0.1;
        p
    }

    fn interact(model: &IntegrationModel, p: &mut Particle) -> SurfaceInteractionResult {
        let ids = ParticleIdAllocator::default();
        let mut spawned = Vec::new();
        let mut spawn = SpawnContext::new(&ids, &mut spawned);
        let mut scratch = WorkerScratch::new();
        model.compute_surface_interaction(p, &mut scratch, &mut spawn)
    }

    fn along_x() -> Particle {
        stepping(DVec3::new(0.5, 0.0, 0.0), DVec3::new(0.9, 0.0, 0.0), DVec3::new(1.4, 0.0, 0.0))
    }

    #[test]
    fn test_nearest_hit_wins_regardless_of_scan_order() {
        // 先注册较远的终止面
        let model = surface_model(vec![
            plate(0, 1.2, SurfaceType::Terminate),
            plate(0, 1.0, SurfaceType::Bounce),
        ]);
        let mut p = along_x();
        let result = interact(&model, &mut p);

        let (flat, snapshot) = result.interaction.unwrap();
        assert_eq!(flat, FlatIndex::new(1));
        assert_eq!(snapshot.interaction, Interaction::Bounce);
        assert!(!p.is_terminated());
        assert!(p.next_position().x < 1.0 && p.next_position().x > 1.0 - 1e-6);
        assert!(p.next_velocity().x < 0.0);
        assert_eq!(p.last_surface, Some((SurfaceIndex::new(1), 0)));
    }

    #[test]
    fn test_pass_through_coincident_with_primary_is_suppressed() {
        for pass_first in [true, false] {
            let pass = plate(0, 1.0, SurfaceType::PassThrough);
            let wall = plate(0, 1.0, SurfaceType::Terminate);
            let surfaces = if pass_first { vec![pass, wall] } else { vec![wall, pass] };
            let model = surface_model(surfaces);
            let mut p = along_x();
            let result = interact(&model, &mut p);

            assert!(result.pass_throughs.is_empty());
            let (_, snapshot) = result.interaction.unwrap();
            assert_eq!(snapshot.interaction, Interaction::Terminated);
            assert_eq!(snapshot.termination, Termination::SurfTerminated);
        }
    }

    #[test]
    fn test_perforation_rescans_mirrored_step() {
        // 上一步已在 z = 0 反弹，本步却继续向下穿过该单元
        let model = surface_model(vec![
            plate(2, 0.0, SurfaceType::Bounce),
            plate(2, 0.2, SurfaceType::Terminate),
        ]);
        let mut p = stepping(DVec3::new(0.0, 0.0, 0.3), DVec3::new(0.0, 0.0, 0.05), DVec3::new(0.0, 0.0, -0.2));
        p.last_surface = Some((SurfaceIndex::new(0), 0));
        let result = interact(&model, &mut p);

        // 镜像后的位移 0.05 -> 0.3 撞上 z = 0.2 的终止面
        let (flat, snapshot) = result.interaction.unwrap();
        assert_eq!(flat, FlatIndex::new(1));
        assert_eq!(snapshot.interaction, Interaction::Terminated);
        assert_eq!(p.termination, Termination::SurfTerminated);
        assert!(p.next_position().z < 0.2 && p.next_position().z > 0.2 - 1e-6);
        assert!(p.next_velocity().z > 0.0);
        assert_eq!(p.last_surface, Some((SurfaceIndex::new(1), 0)));
    }
}

// crates/lf_tracker/src/particle.rs

//! 粒子记录
//!
//! 每个粒子保存前一步、当前步、下一步三组状态变量（位置 3 分量、
//! 速度 3 分量、其后为模型自定义变量），三组跟踪用户数据，
//! 以及积分时间、终止原因、交互类型和并行传输标记。
//!
//! 定位缓存 [`LocatorCache`] 只在本进程内有效，不参与传输。

use glam::DVec3;
use lf_foundation::{DataSetIndex, SurfaceIndex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

// ============================================================
// 终止与交互
// ============================================================

/// 终止原因
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 未终止
    #[default]
    NotTerminated = 0,
    /// 被表面终止
    SurfTerminated = 1,
    /// 自由飞行中被模型终止
    FlightTerminated = 2,
    /// 撞击表面后破碎
    SurfBreak = 3,
    /// 离开计算域
    OutOfDomain = 4,
    /// 达到最大步数
    OutOfSteps = 5,
    /// 达到最大积分时间
    OutOfTime = 6,
}

impl Termination {
    /// 从整数编码恢复
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::NotTerminated,
            1 => Self::SurfTerminated,
            2 => Self::FlightTerminated,
            3 => Self::SurfBreak,
            4 => Self::OutOfDomain,
            5 => Self::OutOfSteps,
            6 => Self::OutOfTime,
            _ => return None,
        })
    }

    /// 整数编码
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// 表面交互类型
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    /// 无交互
    #[default]
    None = 0,
    /// 终止
    Terminated = 1,
    /// 破碎
    Break = 2,
    /// 反弹
    Bounce = 3,
    /// 模型自定义交互
    Other = 4,
    /// 穿越
    Pass = 5,
}

impl Interaction {
    /// 从整数编码恢复
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::Terminated,
            2 => Self::Break,
            3 => Self::Bounce,
            4 => Self::Other,
            5 => Self::Pass,
            _ => return None,
        })
    }

    /// 整数编码
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

// ============================================================
// 定位缓存
// ============================================================

/// 粒子最近一次成功定位的结果
///
/// 不变量：缓存为空，或 `cell_id` 所指单元包含 `position`，
/// `weights` 为该位置在单元内的插值权重。
#[derive(Debug, Clone, Default)]
pub struct LocatorCache {
    /// 所在数据集
    pub dataset: Option<DataSetIndex>,
    /// 所在单元
    pub cell_id: usize,
    /// 定位时的查询位置
    pub position: DVec3,
    /// 插值权重
    pub weights: Vec<f64>,
}

impl LocatorCache {
    /// 记录一次成功定位
    pub fn store(&mut self, dataset: DataSetIndex, cell_id: usize, position: DVec3) {
        self.dataset = Some(dataset);
        self.cell_id = cell_id;
        self.position = position;
    }

    /// 清空
    pub fn clear(&mut self) {
        self.dataset = None;
        self.cell_id = 0;
        self.weights.clear();
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_none()
    }
}

// ============================================================
// 粒子
// ============================================================

/// 拉格朗日粒子
#[derive(Debug, Clone)]
pub struct Particle {
    /// 粒子编号
    pub id: i64,
    /// 父粒子编号，种子粒子为 -1
    pub parent_id: i64,
    /// 种子编号
    pub seed_id: i64,
    /// 种子数组中的元组下标
    pub seed_array_tuple_index: i64,
    /// 已完成步数
    pub number_of_steps: i64,

    /// 前一步状态变量
    pub prev_equation_variables: Vec<f64>,
    /// 当前状态变量
    pub equation_variables: Vec<f64>,
    /// 下一步状态变量
    pub next_equation_variables: Vec<f64>,

    /// 前一步跟踪用户数据
    pub prev_tracked_user_data: Vec<f64>,
    /// 当前跟踪用户数据
    pub tracked_user_data: Vec<f64>,
    /// 下一步跟踪用户数据
    pub next_tracked_user_data: Vec<f64>,

    /// 模型私有数据，不参与传输
    pub user_data: Vec<f64>,

    /// 当前积分时间
    pub integration_time: f64,
    /// 前一步积分时间
    pub prev_integration_time: f64,
    /// 最近一步的时间步长
    pub step_time: f64,

    /// 终止原因
    pub termination: Termination,
    /// 最近一次表面交互
    pub interaction: Interaction,
    /// 用户标记
    pub user_flag: i32,

    /// 并行：到达新进程后先输出前一位置
    pub insert_previous_position: bool,
    /// 并行：到达新进程后由模型手动平移
    pub manual_shift: bool,

    /// 所有种子数组在该粒子种子处的元组，按数组顺序拼接
    pub seed_data: Vec<f64>,

    /// 定位缓存
    pub locator_cache: LocatorCache,
    /// 最近一次反弹所在的表面单元
    pub last_surface: Option<(SurfaceIndex, usize)>,
}

impl Particle {
    /// 创建种子粒子
    pub fn new(
        n_variables: usize,
        n_tracked_user_data: usize,
        id: i64,
        seed_id: i64,
        seed_array_tuple_index: i64,
        integration_time: f64,
        seed_data: Vec<f64>,
    ) -> Self {
        Self {
            id,
            parent_id: -1,
            seed_id,
            seed_array_tuple_index,
            number_of_steps: 0,
            prev_equation_variables: vec![0.0; n_variables],
            equation_variables: vec![0.0; n_variables],
            next_equation_variables: vec![0.0; n_variables],
            prev_tracked_user_data: vec![0.0; n_tracked_user_data],
            tracked_user_data: vec![0.0; n_tracked_user_data],
            next_tracked_user_data: vec![0.0; n_tracked_user_data],
            user_data: Vec::new(),
            integration_time,
            prev_integration_time: integration_time,
            step_time: 0.0,
            termination: Termination::NotTerminated,
            interaction: Interaction::None,
            user_flag: 0,
            insert_previous_position: false,
            manual_shift: false,
            seed_data,
            locator_cache: LocatorCache::default(),
            last_surface: None,
        }
    }

    /// 由当前粒子派生子粒子
    ///
    /// 子粒子从父粒子的下一步状态出发，前一步与当前状态都取父粒子的
    /// 下一步状态，时间为父粒子时间加步长，步数为父粒子步数加一。
    pub fn new_particle(&self, id: i64) -> Particle {
        let mut child = Particle::new(
            self.n_variables(),
            self.n_tracked_user_data(),
            id,
            self.seed_id,
            self.seed_array_tuple_index,
            self.integration_time + self.step_time,
            self.seed_data.clone(),
        );
        child.parent_id = self.id;
        child.number_of_steps = self.number_of_steps + 1;
        child.prev_equation_variables.copy_from_slice(&self.next_equation_variables);
        child.equation_variables.copy_from_slice(&self.next_equation_variables);
        child.prev_tracked_user_data.copy_from_slice(&self.next_tracked_user_data);
        child.tracked_user_data.copy_from_slice(&self.next_tracked_user_data);
        child.user_flag = self.user_flag;
        child.user_data = self.user_data.clone();
        child
    }

    /// 完整复制（用于交互记录）
    pub fn clone_particle(&self) -> Particle {
        self.clone()
    }

    /// 提交一步：下一步成为当前，当前成为前一步
    pub fn move_to_next_position(&mut self) {
        std::mem::swap(&mut self.prev_equation_variables, &mut self.equation_variables);
        std::mem::swap(&mut self.equation_variables, &mut self.next_equation_variables);
        self.next_equation_variables.fill(0.0);

        std::mem::swap(&mut self.prev_tracked_user_data, &mut self.tracked_user_data);
        std::mem::swap(&mut self.tracked_user_data, &mut self.next_tracked_user_data);
        self.next_tracked_user_data.fill(0.0);

        self.number_of_steps += 1;
        self.prev_integration_time = self.integration_time;
        self.integration_time += self.step_time;
    }

    /// 状态变量个数
    #[inline]
    pub fn n_variables(&self) -> usize {
        self.equation_variables.len()
    }

    /// 跟踪用户数据个数
    #[inline]
    pub fn n_tracked_user_data(&self) -> usize {
        self.tracked_user_data.len()
    }

    #[inline]
    pub fn position(&self) -> DVec3 {
        vec3_at(&self.equation_variables, 0)
    }

    #[inline]
    pub fn velocity(&self) -> DVec3 {
        vec3_at(&self.equation_variables, 3)
    }

    #[inline]
    pub fn prev_position(&self) -> DVec3 {
        vec3_at(&self.prev_equation_variables, 0)
    }

    #[inline]
    pub fn prev_velocity(&self) -> DVec3 {
        vec3_at(&self.prev_equation_variables, 3)
    }

    #[inline]
    pub fn next_position(&self) -> DVec3 {
        vec3_at(&self.next_equation_variables, 0)
    }

    #[inline]
    pub fn next_velocity(&self) -> DVec3 {
        vec3_at(&self.next_equation_variables, 3)
    }

    pub fn set_position(&mut self, p: DVec3) {
        set_vec3_at(&mut self.equation_variables, 0, p);
    }

    pub fn set_velocity(&mut self, v: DVec3) {
        set_vec3_at(&mut self.equation_variables, 3, v);
    }

    pub fn set_next_position(&mut self, p: DVec3) {
        set_vec3_at(&mut self.next_equation_variables, 0, p);
    }

    pub fn set_next_velocity(&mut self, v: DVec3) {
        set_vec3_at(&mut self.next_equation_variables, 3, v);
    }

    /// 当前位置到下一位置的位移长度
    pub fn position_vector_magnitude(&self) -> f64 {
        (self.next_position() - self.position()).length()
    }

    /// 是否已终止
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.termination != Termination::NotTerminated
    }
}

// ============================================================
// 编号分配
// ============================================================

/// 粒子编号分配器
///
/// 编号从 `start` 起以 `stride` 递增。并行运行时 `start` 为进程号、
/// `stride` 为进程数，各进程分配的编号互不重叠。
#[derive(Debug)]
pub struct ParticleIdAllocator {
    next: AtomicI64,
    stride: i64,
}

impl ParticleIdAllocator {
    pub fn new(start: i64, stride: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            stride: stride.max(1),
        }
    }

    /// 分配一个新编号
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(self.stride, Ordering::Relaxed)
    }

    /// 下一个将被分配的编号
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for ParticleIdAllocator {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

fn vec3_at(vars: &[f64], offset: usize) -> DVec3 {
    match vars.get(offset..offset + 3) {
        Some(s) => DVec3::new(s[0], s[1], s[2]),
        None => DVec3::ZERO,
    }
}

fn set_vec3_at(vars: &mut [f64], offset: usize, v: DVec3) {
    if let Some(s) = vars.get_mut(offset..offset + 3) {
        s.copy_from_slice(&v.to_array());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle() -> Particle {
        let mut p = Particle::new(6, 1, 7, 7, 2, 0.5, vec![1.0, 2.0]);
        p.set_position(DVec3::new(1.0, 0.0, 0.0));
        p.set_velocity(DVec3::new(2.0, 0.0, 0.0));
        p.set_next_position(DVec3::new(1.5, 0.0, 0.0));
        p.set_next_velocity(DVec3::new(3.0, 0.0, 0.0));
        p.step_time = 0.25;
        p
    }

    #[test]
    fn test_codes_roundtrip() {
        for code in 0..=6 {
            assert_eq!(Termination::from_code(code).unwrap().code(), code);
        }
        for code in 0..=5 {
            assert_eq!(Interaction::from_code(code).unwrap().code(), code);
        }
        assert!(Termination::from_code(7).is_none());
    }

    #[test]
    fn test_move_to_next_position() {
        let mut p = particle();
        p.move_to_next_position();
        assert_eq!(p.prev_position(), DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(p.position(), DVec3::new(1.5, 0.0, 0.0));
        assert_eq!(p.velocity(), DVec3::new(3.0, 0.0, 0.0));
        assert_eq!(p.next_position(), DVec3::ZERO);
        assert_eq!(p.number_of_steps, 1);
        assert!((p.integration_time - 0.75).abs() < 1e-15);
        assert!((p.prev_integration_time - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_new_particle_starts_from_parent_next_state() {
        let parent = particle();
        let child = parent.new_particle(42);
        assert_eq!(child.id, 42);
        assert_eq!(child.parent_id, 7);
        assert_eq!(child.seed_id, 7);
        assert_eq!(child.position(), parent.next_position());
        assert_eq!(child.prev_position(), parent.next_position());
        assert_eq!(child.velocity(), parent.next_velocity());
        assert_eq!(child.number_of_steps, 1);
        assert!((child.integration_time - 0.75).abs() < 1e-15);
        assert_eq!(child.seed_data, vec![1.0, 2.0]);
        assert!(child.locator_cache.is_empty());
    }

    #[test]
    fn test_rank_strided_ids() {
        let ids = ParticleIdAllocator::new(1, 3);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 4);
        assert_eq!(ids.peek(), 7);
    }

    #[test]
    fn test_position_vector_magnitude() {
        assert!((particle().position_vector_magnitude() - 0.5).abs() < 1e-15);
    }
}

// crates/lf_config/src/tracker_config.rs

//! TrackerConfig - 粒子追踪器配置
//!
//! 定义追踪运行的全部参数。所有字段都有默认值，JSON 中可以只写
//! 需要覆盖的部分。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// 步进积分器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorKind {
    /// 二阶 Runge-Kutta（中点法）
    Rk2,
    /// 经典四阶 Runge-Kutta
    #[default]
    Rk4,
    /// Cash-Karp 4(5) 自适应
    Rk45,
}

/// 单元特征长度的计算策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellLengthMode {
    /// 上一步所在单元的对角线长度
    #[default]
    StepLastCellLength,
    /// 当前位置所在单元的对角线长度
    StepCurCellLength,
    /// 上一步单元的边在速度方向上的最大投影
    StepLastCellVelDir,
    /// 当前单元的边在速度方向上的最大投影
    StepCurCellVelDir,
    /// 上一步单元按散度定理估计的速度方向长度
    StepLastCellDivTheo,
    /// 当前单元按散度定理估计的速度方向长度
    StepCurCellDivTheo,
}

impl CellLengthMode {
    /// 是否需要在当前位置重新定位单元
    pub fn uses_current_cell(self) -> bool {
        matches!(
            self,
            Self::StepCurCellLength | Self::StepCurCellVelDir | Self::StepCurCellDivTheo
        )
    }
}

/// 单元定位器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    /// R-Tree 包围盒索引
    #[default]
    Rtree,
    /// 逐单元遍历
    BruteForce,
}

/// 物理模型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhysicsModelKind {
    /// Matida 球形颗粒拖曳模型
    #[default]
    Matida,
}

/// 积分模型配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 物理模型
    #[serde(default)]
    pub physics: PhysicsModelKind,

    /// 几何容差
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// 四边形表面按非平面双线性曲面求交
    #[serde(default)]
    pub non_planar_quad_support: bool,

    /// 从种子数组读取初始积分时间
    #[serde(default)]
    pub use_initial_integration_time: bool,

    /// 定位器
    #[serde(default)]
    pub locator: LocatorKind,

    /// 重力加速度 [m/s²]
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
}

fn default_tolerance() -> f64 { 1e-8 }
fn default_gravity() -> [f64; 3] { [0.0, 0.0, -9.8] }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsModelKind::default(),
            tolerance: default_tolerance(),
            non_planar_quad_support: false,
            use_initial_integration_time: false,
            locator: LocatorKind::default(),
            gravity: default_gravity(),
        }
    }
}

/// 追踪器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// 步进积分器
    #[serde(default)]
    pub integrator: IntegratorKind,

    /// 单元长度策略
    #[serde(default)]
    pub cell_length_computation_mode: CellLengthMode,

    /// 步长因子：步长 = 因子 × 单元长度
    #[serde(default = "default_step_factor")]
    pub step_factor: f64,

    /// 自适应步长因子下限
    #[serde(default = "default_step_factor_min")]
    pub step_factor_min: f64,

    /// 自适应步长因子上限
    #[serde(default = "default_step_factor_max")]
    pub step_factor_max: f64,

    /// 最大步数（负值不限）
    #[serde(default = "default_max_steps")]
    pub maximum_number_of_steps: i64,

    /// 最大积分时间（负值不限）
    #[serde(default = "default_max_time")]
    pub maximum_integration_time: f64,

    /// 计算步进时间时使用的最小速度
    #[serde(default = "default_min_velocity")]
    pub minimum_velocity_magnitude: f64,

    /// 自适应积分器每步步长因子缩小比例的下限
    #[serde(default = "default_min_reduction")]
    pub minimum_reduction_factor: f64,

    /// 自适应重积分
    #[serde(default)]
    pub adaptive_step_reintegration: bool,

    /// 自适应重积分的最大重试次数，超过后接受超长步
    #[serde(default = "default_max_reintegration")]
    pub maximum_reintegration_attempts: u32,

    /// 自适应积分器容许误差
    #[serde(default = "default_max_error")]
    pub maximum_error: f64,

    /// 生成粒子轨迹输出
    #[serde(default = "default_true")]
    pub generate_particle_paths_output: bool,

    /// 交互输出合并为单个多点顶点单元
    #[serde(default)]
    pub generate_poly_vertex_interaction_output: bool,

    /// 工作线程数（0 使用默认线程池）
    #[serde(default)]
    pub number_of_threads: usize,

    /// 工作线程回传通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// 积分模型
    #[serde(default)]
    pub model: ModelConfig,
}

fn default_step_factor() -> f64 { 1.0 }
fn default_step_factor_min() -> f64 { 0.5 }
fn default_step_factor_max() -> f64 { 1.5 }
fn default_max_steps() -> i64 { 100 }
fn default_max_time() -> f64 { -1.0 }
fn default_min_velocity() -> f64 { 0.001 }
fn default_min_reduction() -> f64 { 0.2 }
fn default_max_reintegration() -> u32 { 16 }
fn default_max_error() -> f64 { 1e-6 }
fn default_true() -> bool { true }
fn default_channel_capacity() -> usize { 1024 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            integrator: IntegratorKind::default(),
            cell_length_computation_mode: CellLengthMode::default(),
            step_factor: default_step_factor(),
            step_factor_min: default_step_factor_min(),
            step_factor_max: default_step_factor_max(),
            maximum_number_of_steps: default_max_steps(),
            maximum_integration_time: default_max_time(),
            minimum_velocity_magnitude: default_min_velocity(),
            minimum_reduction_factor: default_min_reduction(),
            adaptive_step_reintegration: false,
            maximum_reintegration_attempts: default_max_reintegration(),
            maximum_error: default_max_error(),
            generate_particle_paths_output: true,
            generate_poly_vertex_interaction_output: false,
            number_of_threads: 0,
            channel_capacity: default_channel_capacity(),
            model: ModelConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// 从 JSON 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// 从 JSON 字符串解析
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// 序列化为格式化 JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// 步数是否达到上限
    pub fn steps_reached(&self, steps: i64) -> bool {
        self.maximum_number_of_steps >= 0 && steps >= self.maximum_number_of_steps
    }

    /// 积分时间是否达到上限
    pub fn time_reached(&self, time: f64) -> bool {
        self.maximum_integration_time >= 0.0 && time >= self.maximum_integration_time
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.step_factor > 0.0) {
            return Err(ConfigError::invalid("step_factor", self.step_factor, "必须为正"));
        }
        if !(self.step_factor_min > 0.0) || self.step_factor_min > self.step_factor {
            return Err(ConfigError::invalid(
                "step_factor_min",
                self.step_factor_min,
                "必须为正且不大于 step_factor",
            ));
        }
        if self.step_factor_max < self.step_factor {
            return Err(ConfigError::invalid(
                "step_factor_max",
                self.step_factor_max,
                "不能小于 step_factor",
            ));
        }
        if !(self.minimum_velocity_magnitude > 0.0) {
            return Err(ConfigError::invalid(
                "minimum_velocity_magnitude",
                self.minimum_velocity_magnitude,
                "必须为正",
            ));
        }
        if !(self.minimum_reduction_factor > 0.0 && self.minimum_reduction_factor <= 1.0) {
            return Err(ConfigError::invalid(
                "minimum_reduction_factor",
                self.minimum_reduction_factor,
                "必须在 (0, 1] 内",
            ));
        }
        if !(self.maximum_error > 0.0) {
            return Err(ConfigError::invalid("maximum_error", self.maximum_error, "必须为正"));
        }
        if !(self.model.tolerance > 0.0) {
            return Err(ConfigError::invalid("model.tolerance", self.model.tolerance, "必须为正"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid("channel_capacity", 0, "必须大于 0"));
        }
        Ok(())
    }
}

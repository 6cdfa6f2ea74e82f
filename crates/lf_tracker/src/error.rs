// crates/lf_tracker/src/error.rs
//! 追踪器错误类型
//!
//! 配置类错误（缺少流场、缺少数组、数组格式不符）在检测处记录日志后
//! 以 `Err` 返回；单个粒子的数值失败只终止该粒子，不经过这里。

use lf_config::ConfigError;
use lf_foundation::LfError;
use lf_mesh::MeshError;
use thiserror::Error;

use crate::parallel::wire::WireError;

/// 追踪器结果类型
pub type TrackerResult<T> = Result<T, TrackerError>;

/// 追踪器错误枚举
#[derive(Error, Debug)]
pub enum TrackerError {
    /// 没有可用的流场数据集
    #[error("未提供可用的流场数据集")]
    NoFlowData,

    /// 数据集无效（空或无单元）
    #[error("数据集无效: {0}")]
    InvalidDataSet(String),

    /// 输入数组槽位未注册或数据集中缺少该数组
    #[error("缺少数组: 槽位 {slot} ({name})")]
    MissingArray { slot: usize, name: String },

    /// 输入数组存在但不可用
    #[error("数组不可用: 槽位 {slot}, {reason}")]
    InvalidArray { slot: usize, reason: String },

    /// 进程间通信失败
    #[error("通信错误: {0}")]
    Communication(String),

    /// 工作线程异常退出
    #[error("工作线程异常退出")]
    WorkerPanicked,

    /// 网格错误
    #[error("网格错误: {0}")]
    Mesh(#[from] MeshError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 传输编码错误
    #[error("传输编码错误: {0}")]
    Wire(#[from] WireError),
}

impl TrackerError {
    pub fn missing_array(slot: usize, name: impl Into<String>) -> Self {
        Self::MissingArray {
            slot,
            name: name.into(),
        }
    }

    pub fn invalid_array(slot: usize, reason: impl Into<String>) -> Self {
        Self::InvalidArray {
            slot,
            reason: reason.into(),
        }
    }
}

impl From<TrackerError> for LfError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::MissingArray { slot, name } => LfError::missing_array(slot, name),
            TrackerError::NoFlowData | TrackerError::InvalidArray { .. } | TrackerError::Config(_) => {
                LfError::config(err.to_string())
            }
            TrackerError::Communication(msg) => LfError::communication(msg),
            TrackerError::Wire(e) => LfError::serialization(e.to_string()),
            TrackerError::Mesh(e) => e.into(),
            other => LfError::internal(other.to_string()),
        }
    }
}

// crates/lf_config/src/lib.rs

//! LagraFlow Config Layer
//!
//! 配置层，提供追踪器配置及其 JSON 读写与校验。
//!
//! # 模块概览
//!
//! - [`tracker_config`]: `TrackerConfig` 与各策略枚举
//! - [`error`]: 配置错误类型

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod tracker_config;

pub use error::ConfigError;
pub use tracker_config::{
    CellLengthMode, IntegratorKind, LocatorKind, ModelConfig, PhysicsModelKind, TrackerConfig,
};

// crates/lf_foundation/src/error.rs

//! 错误处理模块，定义统一错误类型
//!
//! 提供 `LfError` 枚举和 `LfResult` 类型别名。各上层 crate 定义自己的
//! 错误枚举（网格、配置、追踪器），并通过 `From` 转换汇聚到这里。
//!
//! # 示例
//!
//! ```
//! use lf_foundation::error::{LfError, LfResult};
//!
//! fn check_locator(present: bool) -> LfResult<()> {
//!     if !present {
//!         return Err(LfError::config("未设置单元定位器"));
//!     }
//!     Ok(())
//! }
//! assert!(check_locator(false).is_err());
//! ```

use thiserror::Error;

/// 统一结果类型
pub type LfResult<T> = Result<T, LfError>;

/// LagraFlow 错误类型
#[derive(Error, Debug)]
pub enum LfError {
    /// 无效输入
    #[error("无效的输入数据: {message}")]
    InvalidInput {
        /// 说明无效原因
        message: String,
    },

    /// 数组大小不匹配
    #[error("数组大小不匹配: {name} 期望{expected}, 实际{actual}")]
    SizeMismatch {
        /// 数据名称
        name: &'static str,
        /// 期望大小
        expected: usize,
        /// 实际大小
        actual: usize,
    },

    /// 索引越界
    #[error("索引越界: {index_type} 索引 {index} 超出范围 0..{len}")]
    IndexOutOfBounds {
        /// 索引类别描述
        index_type: &'static str,
        /// 访问的索引
        index: usize,
        /// 上界（长度）
        len: usize,
    },

    /// 配置错误（缺少定位器、缺少积分模型、缺少数组等）
    #[error("配置错误: {message}")]
    Config {
        /// 具体错误信息
        message: String,
    },

    /// 缺少必需的数组
    #[error("缺少数组: 槽位 {slot} ({name})")]
    MissingArray {
        /// 输入数组槽位
        slot: usize,
        /// 数组名称
        name: String,
    },

    /// 序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        /// 序列化失败原因
        message: String,
    },

    /// 进程间通信错误
    #[error("通信错误: {message}")]
    Communication {
        /// 具体错误信息
        message: String,
    },

    /// 内部错误
    #[error("内部错误: {message}")]
    Internal {
        /// 内部错误描述
        message: String,
    },
}

// ========================================================================
// 便捷构造方法
// ========================================================================

impl LfError {
    /// 无效输入
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// 大小不匹配
    pub fn size_mismatch(name: &'static str, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            name,
            expected,
            actual,
        }
    }

    /// 索引越界
    pub fn index_out_of_bounds(index_type: &'static str, index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds {
            index_type,
            index,
            len,
        }
    }

    /// 配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// 缺少数组
    pub fn missing_array(slot: usize, name: impl Into<String>) -> Self {
        Self::MissingArray {
            slot,
            name: name.into(),
        }
    }

    /// 序列化错误
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// 通信错误
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// 内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// 是否为配置类错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::MissingArray { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LfError::size_mismatch("weights", 8, 4);
        assert!(err.to_string().contains("weights"));
        assert!(err.to_string().contains('8'));
    }

    #[test]
    fn test_config_classification() {
        assert!(LfError::config("未设置定位器").is_config_error());
        assert!(LfError::missing_array(3, "FlowVelocity").is_config_error());
        assert!(!LfError::internal("x").is_config_error());
    }
}

// crates/lf_mesh/src/error.rs
//! 数据集与定位器错误类型
//!
//! 所有错误可转换为 `lf_foundation::LfError` 向上传播

use lf_foundation::LfError;
use thiserror::Error;

/// 网格模块结果类型
pub type MeshResult<T> = Result<T, MeshError>;

/// 网格错误枚举
#[derive(Error, Debug)]
pub enum MeshError {
    /// 单元连接关系无效
    #[error("无效单元: {cell_type} 需要 {expected} 个点, 提供 {provided}")]
    InvalidCell {
        cell_type: &'static str,
        expected: usize,
        provided: usize,
    },

    /// 点索引越界
    #[error("点索引越界: {index} >= {n_points}")]
    PointOutOfRange { index: usize, n_points: usize },

    /// 属性数组长度与元素数量不一致
    #[error("属性数组 '{name}' 元组数 {actual} 与元素数 {expected} 不一致")]
    ArrayLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// 元组分量数不匹配
    #[error("属性数组 '{name}' 期望 {expected} 个分量, 提供 {actual}")]
    ComponentMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// 结构化网格维度无效
    #[error("无效维度: {dims:?}")]
    InvalidDimensions { dims: [usize; 3] },
}

impl From<MeshError> for LfError {
    fn from(err: MeshError) -> Self {
        match err {
            MeshError::ArrayLength {
                expected, actual, ..
            } => LfError::size_mismatch("attribute_array", expected, actual),
            MeshError::PointOutOfRange { index, n_points } => {
                LfError::index_out_of_bounds("point", index, n_points)
            }
            other => LfError::invalid_input(other.to_string()),
        }
    }
}

impl MeshError {
    pub fn invalid_cell(cell_type: &'static str, expected: usize, provided: usize) -> Self {
        Self::InvalidCell {
            cell_type,
            expected,
            provided,
        }
    }

    pub fn array_length(name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ArrayLength {
            name: name.into(),
            expected,
            actual,
        }
    }

    pub fn component_mismatch(name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ComponentMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_to_foundation() {
        let err = MeshError::array_length("SurfaceType", 4, 3);
        let lf: LfError = err.into();
        assert!(matches!(lf, LfError::SizeMismatch { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn test_invalid_cell_display() {
        let err = MeshError::invalid_cell("tetra", 4, 3);
        assert!(err.to_string().contains("tetra"));
    }
}

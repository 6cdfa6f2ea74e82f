// crates/lf_foundation/src/lib.rs

//! LagraFlow Foundation Layer
//!
//! 基础层，提供整个工作区共享的基础抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型 `LfError` / `LfResult`
//! - [`index`]: 强类型索引（数据集、表面、扁平索引）
//! - [`tolerance`]: 粒子追踪使用的数值容差常量
//!
//! # 示例
//!
//! ```
//! use lf_foundation::{LfError, LfResult, DataSetIndex};
//!
//! fn lookup(idx: DataSetIndex, len: usize) -> LfResult<usize> {
//!     if idx.get() >= len {
//!         return Err(LfError::index_out_of_bounds("dataset", idx.get(), len));
//!     }
//!     Ok(idx.get())
//! }
//!
//! assert!(lookup(DataSetIndex::new(3), 2).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod index;
pub mod tolerance;

pub use error::{LfError, LfResult};
pub use index::{DataSetIndex, FlatIndex, SurfaceIndex};

/// 常用类型预导入
pub mod prelude {
    pub use crate::error::{LfError, LfResult};
    pub use crate::index::{DataSetIndex, FlatIndex, SurfaceIndex};
    pub use crate::tolerance::{is_stagnating, DEFAULT_MODEL_TOLERANCE};
}

// crates/lf_mesh/src/lib.rs

//! LagraFlow 网格层
//!
//! 粒子追踪所消费的数据集与定位器能力，以及它们的具体实现。
//!
//! # 模块概览
//!
//! - [`dataset`]: `DataSet` 能力接口与幽灵单元标记
//! - [`cell`]: 可复用的通用单元缓冲及其几何查询
//! - [`attributes`]: 命名多分量数组 `DataArray` / `FieldData`
//! - [`unstructured`]: 显式点集非结构网格
//! - [`image`]: 隐式均匀体素网格（惰性构建）
//! - [`polydata`]: 输出几何容器
//! - [`spatial_index`]: R-Tree 单元包围盒索引
//! - [`locator`]: 单元定位器

pub mod attributes;
pub mod bounds;
pub mod cell;
pub mod dataset;
pub mod error;
pub mod image;
pub mod locator;
pub mod polydata;
pub mod spatial_index;
pub mod unstructured;

pub use attributes::{ArrayDataType, DataArray, FieldData};
pub use bounds::Bounds;
pub use cell::{Cell, CellType, LineIntersection};
pub use dataset::{DataSet, DUPLICATE_CELL};
pub use error::{MeshError, MeshResult};
pub use image::ImageData;
pub use locator::{BruteForceLocator, CellLocator, RTreeCellLocator};
pub use polydata::PolyData;
pub use unstructured::UnstructuredGrid;

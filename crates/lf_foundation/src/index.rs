// crates/lf_foundation/src/index.rs

//! 强类型索引
//!
//! 数据集与表面注册表都是以小整数寻址的 arena 向量，
//! 这里用新类型区分不同注册表的索引，避免混用。
//! 表面的扁平索引（复合数据集中叶子块的稳定编号）是外部键，
//! 不保证连续，单独用 [`FlatIndex`] 表示。

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// 创建索引
            #[inline]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// 获取索引值（usize）
            #[inline]
            pub const fn get(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(index: usize) -> Self {
                Self::new(index)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

define_index!(
    /// 流场数据集在积分模型注册表中的位置
    DataSetIndex,
    "dataset"
);

define_index!(
    /// 表面在积分模型表面注册表中的位置
    SurfaceIndex,
    "surface"
);

define_index!(
    /// 复合表面集合中叶子数据集的扁平索引
    FlatIndex,
    "flat"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip() {
        let idx = DataSetIndex::new(7);
        assert_eq!(idx.get(), 7);
        assert_eq!(DataSetIndex::from(7), idx);
        assert_eq!(idx.to_string(), "dataset#7");
    }

    #[test]
    fn test_flat_index_ordering() {
        let mut v = vec![FlatIndex::new(5), FlatIndex::new(1), FlatIndex::new(3)];
        v.sort();
        assert_eq!(v, vec![FlatIndex::new(1), FlatIndex::new(3), FlatIndex::new(5)]);
    }
}

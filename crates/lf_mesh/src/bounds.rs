// crates/lf_mesh/src/bounds.rs

//! 轴对齐包围盒

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// 三维轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// 最小角点
    pub min: DVec3,
    /// 最大角点
    pub max: DVec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bounds {
    /// 空包围盒（min > max）
    pub const fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    /// 由两个角点创建
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// 由点集创建
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DVec3>) -> Self {
        let mut b = Self::empty();
        for p in points {
            b.expand(*p);
        }
        b
    }

    /// 扩展以包含点
    #[inline]
    pub fn expand(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// 合并另一个包围盒
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// 是否为有效（非空）包围盒
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// 闭区间包含判断，带容差
    #[inline]
    pub fn contains(&self, p: DVec3, tol: f64) -> bool {
        p.x >= self.min.x - tol
            && p.x <= self.max.x + tol
            && p.y >= self.min.y - tol
            && p.y <= self.max.y + tol
            && p.z >= self.min.z - tol
            && p.z <= self.max.z + tol
    }

    /// 对角线长度的平方
    #[inline]
    pub fn diagonal_length2(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        (self.max - self.min).length_squared()
    }

    /// 中心
    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// 向各方向膨胀
    pub fn inflate(&self, delta: f64) -> Bounds {
        Bounds {
            min: self.min - DVec3::splat(delta),
            max: self.max + DVec3::splat(delta),
        }
    }

    /// 线段 p1-p2 是否与包围盒相交（slab 法）
    pub fn intersects_segment(&self, p1: DVec3, p2: DVec3, tol: f64) -> bool {
        if !self.is_valid() {
            return false;
        }
        let b = self.inflate(tol);
        let d = p2 - p1;
        let mut t0 = 0.0_f64;
        let mut t1 = 1.0_f64;
        for axis in 0..3 {
            let (o, dir, lo, hi) = (p1[axis], d[axis], b.min[axis], b.max[axis]);
            if dir.abs() < f64::MIN_POSITIVE {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let (mut ta, mut tb) = ((lo - o) * inv, (hi - o) * inv);
            if ta > tb {
                std::mem::swap(&mut ta, &mut tb);
            }
            t0 = t0.max(ta);
            t1 = t1.min(tb);
            if t0 > t1 {
                return false;
            }
        }
        true
    }

    /// 展平为 `[xmin, xmax, ymin, ymax, zmin, zmax]`
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.min.x, self.max.x, self.min.y, self.max.y, self.min.z, self.max.z,
        ]
    }

    /// 从展平数组恢复
    pub fn from_array(a: &[f64]) -> Option<Bounds> {
        if a.len() < 6 {
            return None;
        }
        Some(Bounds {
            min: DVec3::new(a[0], a[2], a[4]),
            max: DVec3::new(a[1], a[3], a[5]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Bounds {
        Bounds::new(DVec3::ZERO, DVec3::ONE)
    }

    #[test]
    fn test_contains() {
        let b = unit();
        assert!(b.contains(DVec3::splat(0.5), 0.0));
        assert!(b.contains(DVec3::new(1.0, 1.0, 1.0), 0.0));
        assert!(!b.contains(DVec3::new(1.1, 0.5, 0.5), 0.0));
        assert!(b.contains(DVec3::new(1.05, 0.5, 0.5), 0.1));
    }

    #[test]
    fn test_segment_intersection() {
        let b = unit();
        assert!(b.intersects_segment(DVec3::new(-1.0, 0.5, 0.5), DVec3::new(2.0, 0.5, 0.5), 0.0));
        assert!(!b.intersects_segment(DVec3::new(-1.0, 2.0, 0.5), DVec3::new(2.0, 2.0, 0.5), 0.0));
        // 线段未到达包围盒
        assert!(!b.intersects_segment(DVec3::new(-2.0, 0.5, 0.5), DVec3::new(-1.0, 0.5, 0.5), 0.0));
    }

    #[test]
    fn test_array_roundtrip() {
        let b = Bounds::new(DVec3::new(-1.0, -2.0, -3.0), DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(Bounds::from_array(&b.to_array()), Some(b));
        assert!(!Bounds::empty().is_valid());
    }
}

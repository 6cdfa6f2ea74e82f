// crates/lf_tracker/src/quad_intersection.rs

//! 非平面四边形（双线性曲面片）与射线求交
//!
//! 曲面片 P(u, v) = (1-u)(1-v)P00 + (1-u)v P01 + u(1-v)P10 + uv P11，
//! 射线 R(t) = r + t q。消去 u 后得到关于 v 的二次方程，
//! 再由 v 回代 u，最后沿方向分量最大的轴求 t。
//!
//! 求解前把方向分量绝对值最大的轴置换到 z，避免 q.z 接近零时
//! 消元退化。

use glam::DVec3;

const RAY_EPSILON: f64 = 1e-12;

/// 双线性四边形求交器
///
/// 每个工作线程持有一个实例，角点在每次求交前写入。
#[derive(Debug, Clone, Default)]
pub struct BilinearQuadIntersection {
    pub point00: DVec3,
    pub point01: DVec3,
    pub point10: DVec3,
    pub point11: DVec3,
    /// 最近一次求交使用的轴置换（新 x, y, z 对应的原轴）
    axes_swapping: [usize; 3],
}

impl BilinearQuadIntersection {
    pub fn new(point00: DVec3, point01: DVec3, point10: DVec3, point11: DVec3) -> Self {
        Self {
            point00,
            point01,
            point10,
            point11,
            axes_swapping: [0, 1, 2],
        }
    }

    /// 写入四个角点
    pub fn set_points(&mut self, point00: DVec3, point01: DVec3, point10: DVec3, point11: DVec3) {
        self.point00 = point00;
        self.point01 = point01;
        self.point10 = point10;
        self.point11 = point11;
    }

    /// 最近一次求交的轴置换
    pub fn axes_swapping(&self) -> [usize; 3] {
        self.axes_swapping
    }

    /// 参数坐标 (u, v) 对应的笛卡尔坐标
    pub fn compute_cartesian_coordinates(&self, u: f64, v: f64) -> DVec3 {
        bilinear(
            [self.point00, self.point01, self.point10, self.point11],
            u,
            v,
        )
    }

    /// 射线求交
    ///
    /// 命中时返回 `(u, v, t)`，其中 t 以 `q` 的长度为单位且 t > 0；
    /// 两个根都有效时取 t 较小者。
    pub fn ray_intersection(&mut self, r: DVec3, q: DVec3) -> Option<DVec3> {
        let axes = dominant_last(q);
        self.axes_swapping = axes;
        let perm = |v: DVec3| DVec3::new(v[axes[0]], v[axes[1]], v[axes[2]]);

        let p = [
            perm(self.point00),
            perm(self.point01),
            perm(self.point10),
            perm(self.point11),
        ];
        let r = perm(r);
        let q = perm(q);

        let a = p[3] - p[2] - p[1] + p[0];
        let b = p[2] - p[0];
        let c = p[1] - p[0];
        let d = p[0] - r;

        let a1 = a.x * q.z - a.z * q.x;
        let a2 = a.y * q.z - a.z * q.y;
        let b1 = b.x * q.z - b.z * q.x;
        let b2 = b.y * q.z - b.z * q.y;
        let c1 = c.x * q.z - c.z * q.x;
        let c2 = c.y * q.z - c.z * q.y;
        let d1 = d.x * q.z - d.z * q.x;
        let d2 = d.y * q.z - d.z * q.y;

        let qa = a2 * c1 - a1 * c2;
        let qb = a2 * d1 - a1 * d2 + b2 * c1 - b1 * c2;
        let qc = b2 * d1 - b1 * d2;

        let coefs = Coefficients { a1, a2, b1, b2, c1, c2, d1, d2 };
        let in_range = |u: f64| u < 1.0 + RAY_EPSILON && u > -RAY_EPSILON;

        let solve = |v: f64| -> (f64, f64) {
            let u = coefs.best_denominator(v);
            let pos = bilinear(p, u, v);
            (u, intersection_factor(q, r, pos))
        };

        match quadratic_root(qa, qb, qc, -RAY_EPSILON, 1.0 + RAY_EPSILON) {
            Roots::None => None,
            Roots::One(v) => {
                let (u, t) = solve(v);
                (in_range(u) && t > 0.0).then(|| DVec3::new(u, v, t))
            }
            Roots::Two(v0, v1) => {
                let (u0, t0) = solve(v0);
                if in_range(u0) && t0 > 0.0 {
                    let (u1, t1) = solve(v1);
                    if u1 < 1.0 + RAY_EPSILON && u1 > RAY_EPSILON && t1 >= 0.0 && t1 <= t0 {
                        return Some(DVec3::new(u1, v1, t1));
                    }
                    Some(DVec3::new(u0, v0, t0))
                } else {
                    let (u1, t1) = solve(v1);
                    (in_range(u1) && t1 > 0.0).then(|| DVec3::new(u1, v1, t1))
                }
            }
        }
    }
}

fn bilinear(p: [DVec3; 4], u: f64, v: f64) -> DVec3 {
    p[0] * ((1.0 - u) * (1.0 - v)) + p[1] * ((1.0 - u) * v) + p[2] * (u * (1.0 - v)) + p[3] * (u * v)
}

/// 轴置换：方向分量绝对值最大的轴放到最后
fn dominant_last(q: DVec3) -> [usize; 3] {
    let abs = q.abs();
    if abs.x >= abs.y && abs.x >= abs.z {
        [1, 2, 0]
    } else if abs.y >= abs.z {
        [2, 0, 1]
    } else {
        [0, 1, 2]
    }
}

/// 沿方向分量最大的轴求射线参数
fn intersection_factor(dir: DVec3, orig: DVec3, pos: DVec3) -> f64 {
    let abs = dir.abs();
    if abs.x >= abs.y && abs.x >= abs.z {
        (pos.x - orig.x) / dir.x
    } else if abs.y >= abs.z {
        (pos.y - orig.y) / dir.y
    } else {
        (pos.z - orig.z) / dir.z
    }
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    a1: f64,
    a2: f64,
    b1: f64,
    b2: f64,
    c1: f64,
    c2: f64,
    d1: f64,
    d2: f64,
}

impl Coefficients {
    /// 由 v 回代 u，选择绝对值较大的分母
    fn best_denominator(&self, v: f64) -> f64 {
        let denom = v * (self.a2 - self.a1) + self.b2 - self.b1;
        let d2 = v * self.a2 + self.b2;
        if denom.abs() > d2.abs() {
            (v * (self.c1 - self.c2) + self.d1 - self.d2) / denom
        } else {
            -(v * self.c2 + self.d2) / d2
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Roots {
    None,
    One(f64),
    Two(f64, f64),
}

/// 区间 (min, max) 内的二次方程实根
fn quadratic_root(a: f64, b: f64, c: f64, min: f64, max: f64) -> Roots {
    let inside = |x: f64| x > min && x < max;
    if a == 0.0 {
        if b == 0.0 {
            return Roots::None;
        }
        let x = -c / b;
        return if inside(x) { Roots::One(x) } else { Roots::None };
    }

    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Roots::None;
    }
    if disc == 0.0 {
        let x = -b / (2.0 * a);
        return if inside(x) { Roots::One(x) } else { Roots::None };
    }

    let q = -0.5 * (b + disc.sqrt().copysign(b));
    let x0 = c / q;
    let x1 = q / a;
    match (inside(x0), inside(x1)) {
        (true, true) => Roots::Two(x0, x1),
        (true, false) => Roots::One(x0),
        (false, true) => Roots::One(x1),
        (false, false) => Roots::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warped() -> BilinearQuadIntersection {
        BilinearQuadIntersection::new(
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.5),
        )
    }

    #[test]
    fn test_cartesian_coordinates() {
        let p = warped().compute_cartesian_coordinates(0.3, 0.7);
        assert!((p - DVec3::new(0.3, 0.7, 0.105)).length() < 1e-12);
    }

    #[test]
    fn test_ray_along_z() {
        let mut bqi = warped();
        let uv = bqi
            .ray_intersection(DVec3::new(0.5, 0.5, -1.0), DVec3::new(0.0, 0.0, 1.0))
            .unwrap();
        assert!((uv - DVec3::new(0.5, 0.5, 1.125)).length() < 1e-12);
        assert_eq!(bqi.axes_swapping(), [0, 1, 2]);
    }

    #[test]
    fn test_ray_along_x_uses_axis_swap() {
        // 竖直放置的平面四边形 x = 2
        let mut bqi = BilinearQuadIntersection::new(
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(2.0, 0.0, 1.0),
            DVec3::new(2.0, 1.0, 0.0),
            DVec3::new(2.0, 1.0, 1.0),
        );
        let uv = bqi
            .ray_intersection(DVec3::new(0.0, 0.25, 0.75), DVec3::new(1.0, 0.0, 0.0))
            .unwrap();
        assert!((uv.x - 0.25).abs() < 1e-12);
        assert!((uv.y - 0.75).abs() < 1e-12);
        assert!((uv.z - 2.0).abs() < 1e-12);
        assert_eq!(bqi.axes_swapping(), [1, 2, 0]);
    }

    #[test]
    fn test_ray_misses() {
        let mut bqi = warped();
        // 射线背离曲面片
        assert!(bqi
            .ray_intersection(DVec3::new(0.5, 0.5, -1.0), DVec3::new(0.0, 0.0, -1.0))
            .is_none());
        // 投影落在曲面片外
        assert!(bqi
            .ray_intersection(DVec3::new(3.0, 0.5, -1.0), DVec3::new(0.0, 0.0, 1.0))
            .is_none());
    }

    #[test]
    fn test_quadratic_root() {
        assert_eq!(quadratic_root(0.0, 0.0, 1.0, 0.0, 1.0), Roots::None);
        assert_eq!(quadratic_root(1.0, 0.0, 1.0, -10.0, 10.0), Roots::None);
        match quadratic_root(1.0, -1.0, 0.16, 0.0, 1.0) {
            Roots::Two(a, b) => {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                assert!((lo - 0.2).abs() < 1e-12);
                assert!((hi - 0.8).abs() < 1e-12);
            }
            other => panic!("期望两个根, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_quadratic_double_root() {
        // (x - 0.5)²
        assert_eq!(quadratic_root(1.0, -1.0, 0.25, 0.0, 1.0), Roots::One(0.5));
        // (2x - 3)²，重根 1.5 落在区间外
        assert_eq!(quadratic_root(4.0, -12.0, 9.0, 0.0, 1.0), Roots::None);
        assert_eq!(quadratic_root(4.0, -12.0, 9.0, 0.0, 2.0), Roots::One(1.5));
    }
}

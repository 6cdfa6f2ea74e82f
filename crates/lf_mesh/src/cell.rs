// crates/lf_mesh/src/cell.rs

//! 通用单元缓冲
//!
//! `Cell` 是一个可复用的单元副本：数据集把某个单元的类型、点号和坐标
//! 填入其中，调用方随后在其上执行几何查询。每个工作线程持有一个，
//! 避免在积分循环内频繁分配。
//!
//! 支持的单元：顶点、线段、三角形、四边形、多边形、四面体、体素和六面体。
//! 点序约定：
//!
//! ```text
//! 六面体                 体素
//!   7-------6             6-------7
//!  /|      /|            /|      /|
//! 4-------5 |           4-------5 |
//! | 3-----|-2           | 2-----|-3
//! |/      |/            |/      |/
//! 0-------1             0-------1
//! ```

use crate::bounds::Bounds;
use glam::{DMat3, DVec3};
use lf_foundation::tolerance::PARAMETRIC_TOLERANCE;
use smallvec::SmallVec;

/// 单元类型，取值与常见可视化格式的类型编号一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CellType {
    /// 空单元
    #[default]
    Empty = 0,
    /// 顶点
    Vertex = 1,
    /// 线段
    Line = 3,
    /// 三角形
    Triangle = 5,
    /// 多边形
    Polygon = 7,
    /// 四边形
    Quad = 9,
    /// 四面体
    Tetra = 10,
    /// 体素（轴对齐六面体）
    Voxel = 11,
    /// 六面体
    Hexahedron = 12,
}

impl CellType {
    /// 拓扑维度
    pub fn dimension(self) -> u8 {
        match self {
            Self::Empty | Self::Vertex => 0,
            Self::Line => 1,
            Self::Triangle | Self::Quad | Self::Polygon => 2,
            Self::Tetra | Self::Voxel | Self::Hexahedron => 3,
        }
    }

    /// 固定点数（多边形为 `None`）
    pub fn fixed_point_count(self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Vertex => Some(1),
            Self::Line => Some(2),
            Self::Triangle => Some(3),
            Self::Quad | Self::Tetra => Some(4),
            Self::Voxel | Self::Hexahedron => Some(8),
            Self::Polygon => None,
        }
    }

    /// 名称
    pub fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Vertex => "vertex",
            Self::Line => "line",
            Self::Triangle => "triangle",
            Self::Polygon => "polygon",
            Self::Quad => "quad",
            Self::Tetra => "tetra",
            Self::Voxel => "voxel",
            Self::Hexahedron => "hexahedron",
        }
    }
}

// ============================================================================
// 拓扑表
// ============================================================================

const TETRA_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
const HEX_EDGES: [[usize; 2]; 12] = [
    [0, 1], [1, 2], [3, 2], [0, 3], [4, 5], [5, 6],
    [7, 6], [4, 7], [0, 4], [1, 5], [3, 7], [2, 6],
];
const VOXEL_EDGES: [[usize; 2]; 12] = [
    [0, 1], [2, 3], [4, 5], [6, 7], [0, 2], [1, 3],
    [4, 6], [5, 7], [0, 4], [1, 5], [2, 6], [3, 7],
];

const TETRA_FACES: [[usize; 3]; 4] = [[0, 1, 3], [1, 2, 3], [2, 0, 3], [0, 2, 1]];
const HEX_FACES: [[usize; 4]; 6] = [
    [0, 4, 7, 3], [1, 2, 6, 5], [0, 1, 5, 4],
    [3, 7, 6, 2], [0, 3, 2, 1], [4, 5, 6, 7],
];
const VOXEL_FACES: [[usize; 4]; 6] = [
    [0, 4, 6, 2], [1, 3, 7, 5], [0, 1, 5, 4],
    [2, 6, 7, 3], [0, 2, 3, 1], [4, 5, 7, 6],
];

const HEX_PCOORDS: [[f64; 3]; 8] = [
    [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0],
];
const VOXEL_PCOORDS: [[f64; 3]; 8] = [
    [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0],
    [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0],
];
const QUAD_PCOORDS: [[f64; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

const NEWTON_MAX_ITERATIONS: usize = 20;
const NEWTON_CONVERGENCE: f64 = 1e-10;

/// 线段求交结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineIntersection {
    /// 沿线段 p1→p2 的参数，取值 [0, 1]
    pub t: f64,
    /// 交点
    pub x: DVec3,
}

// ============================================================================
// Cell
// ============================================================================

/// 可复用的单元缓冲
#[derive(Debug, Clone, Default)]
pub struct Cell {
    cell_type: CellType,
    point_ids: SmallVec<[usize; 8]>,
    points: SmallVec<[DVec3; 8]>,
}

impl Cell {
    /// 创建空单元
    pub fn new() -> Self {
        Self::default()
    }

    /// 由类型和坐标直接构造（点号按 0..n 编排）
    pub fn from_points(cell_type: CellType, points: &[DVec3]) -> Self {
        let mut cell = Self::new();
        cell.reset(cell_type);
        for (i, p) in points.iter().enumerate() {
            cell.push(i, *p);
        }
        cell
    }

    /// 清空并设置类型
    pub fn reset(&mut self, cell_type: CellType) {
        self.cell_type = cell_type;
        self.point_ids.clear();
        self.points.clear();
    }

    /// 追加一个点
    #[inline]
    pub fn push(&mut self, id: usize, p: DVec3) {
        self.point_ids.push(id);
        self.points.push(p);
    }

    /// 单元类型
    #[inline]
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// 全局点号
    #[inline]
    pub fn point_ids(&self) -> &[usize] {
        &self.point_ids
    }

    /// 点坐标
    #[inline]
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    /// 点数
    #[inline]
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// 包围盒
    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(self.points.iter())
    }

    /// 包围盒对角线长度的平方
    pub fn length2(&self) -> f64 {
        self.bounds().diagonal_length2()
    }

    /// 遍历所有边的端点
    pub fn for_each_edge(&self, mut f: impl FnMut(DVec3, DVec3)) {
        let p = &self.points;
        let table: &[[usize; 2]] = match self.cell_type {
            CellType::Tetra => &TETRA_EDGES,
            CellType::Hexahedron => &HEX_EDGES,
            CellType::Voxel => &VOXEL_EDGES,
            CellType::Line => &[[0, 1]],
            CellType::Triangle | CellType::Quad | CellType::Polygon => {
                let n = p.len();
                for i in 0..n {
                    f(p[i], p[(i + 1) % n]);
                }
                return;
            }
            CellType::Empty | CellType::Vertex => return,
        };
        for [a, b] in table {
            if let (Some(pa), Some(pb)) = (p.get(*a), p.get(*b)) {
                f(*pa, *pb);
            }
        }
    }

    /// 面数（仅三维单元有面）
    pub fn n_faces(&self) -> usize {
        match self.cell_type {
            CellType::Tetra => 4,
            CellType::Hexahedron | CellType::Voxel => 6,
            _ => 0,
        }
    }

    /// 遍历所有面的顶点坐标（外法向一致的顺序）
    pub fn for_each_face(&self, mut f: impl FnMut(&[DVec3])) {
        let mut buf: SmallVec<[DVec3; 4]> = SmallVec::new();
        let mut emit = |ids: &[usize], buf: &mut SmallVec<[DVec3; 4]>| {
            buf.clear();
            buf.extend(ids.iter().filter_map(|&i| self.points.get(i).copied()));
            if buf.len() == ids.len() {
                f(&buf[..]);
            }
        };
        match self.cell_type {
            CellType::Tetra => TETRA_FACES.iter().for_each(|ids| emit(&ids[..], &mut buf)),
            CellType::Hexahedron => HEX_FACES.iter().for_each(|ids| emit(&ids[..], &mut buf)),
            CellType::Voxel => VOXEL_FACES.iter().for_each(|ids| emit(&ids[..], &mut buf)),
            _ => {}
        }
    }

    // ========================================================================
    // 点定位
    // ========================================================================

    /// 判断 `x` 是否位于单元内，并计算插值权重
    ///
    /// `weights` 被调整为点数长度。对二维及更低维单元，`tol` 是允许的
    /// 离面距离；三维单元使用参数坐标容差。
    pub fn evaluate_position(&self, x: DVec3, tol: f64, weights: &mut Vec<f64>) -> bool {
        weights.clear();
        weights.resize(self.points.len(), 0.0);
        match self.cell_type {
            CellType::Empty => false,
            CellType::Vertex => {
                weights[0] = 1.0;
                (x - self.points[0]).length() <= tol
            }
            CellType::Line => self.evaluate_line(x, tol, weights),
            CellType::Triangle => {
                let p = &self.points;
                match triangle_barycentric(x, p[0], p[1], p[2], self.planar_tolerance(tol)) {
                    Some(b) => {
                        weights.copy_from_slice(&b);
                        b.iter().all(|&w| w >= -PARAMETRIC_TOLERANCE)
                    }
                    None => false,
                }
            }
            CellType::Quad => self.evaluate_quad(x, tol, weights),
            CellType::Polygon => self.evaluate_polygon(x, tol, weights),
            CellType::Tetra => self.evaluate_tetra(x, weights),
            CellType::Hexahedron => self.evaluate_trilinear(x, &HEX_PCOORDS, weights),
            CellType::Voxel => self.evaluate_trilinear(x, &VOXEL_PCOORDS, weights),
        }
    }

    fn planar_tolerance(&self, tol: f64) -> f64 {
        tol.max(1e-6 * self.length2().sqrt())
    }

    fn evaluate_line(&self, x: DVec3, tol: f64, weights: &mut [f64]) -> bool {
        let (a, b) = (self.points[0], self.points[1]);
        let d = b - a;
        let len2 = d.length_squared();
        if len2 == 0.0 {
            return false;
        }
        let t = (x - a).dot(d) / len2;
        weights[0] = 1.0 - t;
        weights[1] = t;
        let dist = (x - (a + d * t)).length();
        dist <= self.planar_tolerance(tol)
            && (-PARAMETRIC_TOLERANCE..=1.0 + PARAMETRIC_TOLERANCE).contains(&t)
    }

    fn evaluate_tetra(&self, x: DVec3, weights: &mut [f64]) -> bool {
        let p = &self.points;
        let m = DMat3::from_cols(p[1] - p[0], p[2] - p[0], p[3] - p[0]);
        let det = m.determinant();
        if det.abs() < f64::MIN_POSITIVE {
            return false;
        }
        let r = m.inverse() * (x - p[0]);
        weights[0] = 1.0 - r.x - r.y - r.z;
        weights[1] = r.x;
        weights[2] = r.y;
        weights[3] = r.z;
        weights.iter().all(|&w| w >= -PARAMETRIC_TOLERANCE)
    }

    fn evaluate_trilinear(&self, x: DVec3, corners: &[[f64; 3]; 8], weights: &mut [f64]) -> bool {
        let p = &self.points;
        let mut r = DVec3::splat(0.5);
        let mut converged = false;
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let (shape, derivs) = trilinear_shape(corners, r);
            let mut f = -x;
            let mut cols = [DVec3::ZERO; 3];
            for i in 0..8 {
                f += p[i] * shape[i];
                for (a, col) in cols.iter_mut().enumerate() {
                    *col += p[i] * derivs[i][a];
                }
            }
            let jac = DMat3::from_cols(cols[0], cols[1], cols[2]);
            if jac.determinant().abs() < f64::MIN_POSITIVE {
                return false;
            }
            let delta = jac.inverse() * f;
            r -= delta;
            if delta.abs().max_element() < NEWTON_CONVERGENCE {
                converged = true;
                break;
            }
        }
        if !converged {
            return false;
        }
        let (shape, _) = trilinear_shape(corners, r);
        weights.copy_from_slice(&shape);
        (0..3).all(|a| r[a] >= -PARAMETRIC_TOLERANCE && r[a] <= 1.0 + PARAMETRIC_TOLERANCE)
    }

    fn evaluate_quad(&self, x: DVec3, tol: f64, weights: &mut [f64]) -> bool {
        let p = &self.points;
        let (area, normal) = polygon_area_normal(p);
        if area == 0.0 {
            return false;
        }
        let center = polygon_centroid(p);
        let dist = (x - center).dot(normal);
        if dist.abs() > self.planar_tolerance(tol) {
            return false;
        }
        let xp = x - normal * dist;
        // 双线性映射的高斯-牛顿反求
        let (mut u, mut v) = (0.5, 0.5);
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let (shape, du, dv) = bilinear_shape(u, v);
            let mut f = -xp;
            let (mut ju, mut jv) = (DVec3::ZERO, DVec3::ZERO);
            for i in 0..4 {
                f += p[i] * shape[i];
                ju += p[i] * du[i];
                jv += p[i] * dv[i];
            }
            let (a11, a12, a22) = (ju.dot(ju), ju.dot(jv), jv.dot(jv));
            let det = a11 * a22 - a12 * a12;
            if det.abs() < f64::MIN_POSITIVE {
                return false;
            }
            let (b1, b2) = (ju.dot(f), jv.dot(f));
            let du_step = (a22 * b1 - a12 * b2) / det;
            let dv_step = (a11 * b2 - a12 * b1) / det;
            u -= du_step;
            v -= dv_step;
            if du_step.abs().max(dv_step.abs()) < NEWTON_CONVERGENCE {
                break;
            }
        }
        let (shape, _, _) = bilinear_shape(u, v);
        weights.copy_from_slice(&shape);
        [u, v]
            .iter()
            .all(|&c| c >= -PARAMETRIC_TOLERANCE && c <= 1.0 + PARAMETRIC_TOLERANCE)
    }

    fn evaluate_polygon(&self, x: DVec3, tol: f64, weights: &mut [f64]) -> bool {
        let p = &self.points;
        if p.len() < 3 {
            return false;
        }
        let ptol = self.planar_tolerance(tol);
        for i in 1..p.len() - 1 {
            if let Some(b) = triangle_barycentric(x, p[0], p[i], p[i + 1], ptol) {
                if b.iter().all(|&w| w >= -PARAMETRIC_TOLERANCE) {
                    weights[0] = b[0];
                    weights[i] = b[1];
                    weights[i + 1] = b[2];
                    return true;
                }
            }
        }
        false
    }

    // ========================================================================
    // 线段求交
    // ========================================================================

    /// 线段 p1→p2 与单元求交，返回参数最小的交点
    pub fn intersect_with_line(&self, p1: DVec3, p2: DVec3, tol: f64) -> Option<LineIntersection> {
        let p = &self.points;
        let mut best: Option<LineIntersection> = None;
        let mut consider = |hit: Option<LineIntersection>| {
            if let Some(h) = hit {
                if best.map_or(true, |b| h.t < b.t) {
                    best = Some(h);
                }
            }
        };
        match self.cell_type {
            CellType::Triangle => consider(segment_triangle(p1, p2, p[0], p[1], p[2], tol)),
            CellType::Quad => {
                consider(segment_triangle(p1, p2, p[0], p[1], p[2], tol));
                consider(segment_triangle(p1, p2, p[0], p[2], p[3], tol));
            }
            CellType::Polygon => {
                for i in 1..p.len().saturating_sub(1) {
                    consider(segment_triangle(p1, p2, p[0], p[i], p[i + 1], tol));
                }
            }
            CellType::Tetra | CellType::Hexahedron | CellType::Voxel => {
                self.for_each_face(|face| {
                    for i in 1..face.len() - 1 {
                        consider(segment_triangle(p1, p2, face[0], face[i], face[i + 1], tol));
                    }
                });
            }
            CellType::Empty | CellType::Vertex | CellType::Line => {}
        }
        best
    }
}

// ============================================================================
// 几何辅助函数
// ============================================================================

/// 三线性形函数及其对参数坐标的导数
fn trilinear_shape(corners: &[[f64; 3]; 8], r: DVec3) -> ([f64; 8], [[f64; 3]; 8]) {
    let mut shape = [0.0; 8];
    let mut derivs = [[0.0; 3]; 8];
    for (i, c) in corners.iter().enumerate() {
        let f = |a: usize| if c[a] > 0.5 { r[a] } else { 1.0 - r[a] };
        let df = |a: usize| if c[a] > 0.5 { 1.0 } else { -1.0 };
        shape[i] = f(0) * f(1) * f(2);
        derivs[i] = [df(0) * f(1) * f(2), f(0) * df(1) * f(2), f(0) * f(1) * df(2)];
    }
    (shape, derivs)
}

/// 双线性形函数及其导数
fn bilinear_shape(u: f64, v: f64) -> ([f64; 4], [f64; 4], [f64; 4]) {
    let mut shape = [0.0; 4];
    let mut du = [0.0; 4];
    let mut dv = [0.0; 4];
    for (i, c) in QUAD_PCOORDS.iter().enumerate() {
        let (fu, dfu) = if c[0] > 0.5 { (u, 1.0) } else { (1.0 - u, -1.0) };
        let (fv, dfv) = if c[1] > 0.5 { (v, 1.0) } else { (1.0 - v, -1.0) };
        shape[i] = fu * fv;
        du[i] = dfu * fv;
        dv[i] = fu * dfv;
    }
    (shape, du, dv)
}

/// 点在三角形平面内投影的重心坐标；离面距离超过 `plane_tol` 或三角形退化时返回 `None`
fn triangle_barycentric(x: DVec3, a: DVec3, b: DVec3, c: DVec3, plane_tol: f64) -> Option<[f64; 3]> {
    let n = (b - a).cross(c - a);
    let n_len = n.length();
    if n_len == 0.0 {
        return None;
    }
    let nhat = n / n_len;
    let dist = (x - a).dot(nhat);
    if dist.abs() > plane_tol {
        return None;
    }
    let xp = x - nhat * dist;
    let (v0, v1, v2) = (b - a, c - a, xp - a);
    let (d00, d01, d11) = (v0.dot(v0), v0.dot(v1), v1.dot(v1));
    let (d20, d21) = (v2.dot(v0), v2.dot(v1));
    let denom = d00 * d11 - d01 * d01;
    if denom == 0.0 {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some([1.0 - v - w, v, w])
}

/// 线段与三角形求交（Möller-Trumbore），`tol` 为重心坐标容差
pub fn segment_triangle(
    p1: DVec3,
    p2: DVec3,
    a: DVec3,
    b: DVec3,
    c: DVec3,
    tol: f64,
) -> Option<LineIntersection> {
    let d = p2 - p1;
    let e1 = b - a;
    let e2 = c - a;
    let h = d.cross(e2);
    let det = e1.dot(h);
    let scale = e1.length() * e2.length() * d.length();
    if scale == 0.0 || det.abs() <= 1e-14 * scale {
        return None;
    }
    let inv = 1.0 / det;
    let s = p1 - a;
    let u = inv * s.dot(h);
    if u < -tol || u > 1.0 + tol {
        return None;
    }
    let q = s.cross(e1);
    let v = inv * d.dot(q);
    if v < -tol || u + v > 1.0 + tol {
        return None;
    }
    let t = inv * e2.dot(q);
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    Some(LineIntersection { t, x: p1 + d * t })
}

/// 多边形面积与单位法向（Newell 法）
///
/// 退化多边形返回 `(0.0, DVec3::ZERO)`，在累加时贡献为零。
pub fn polygon_area_normal(points: &[DVec3]) -> (f64, DVec3) {
    let n = points.len();
    if n < 3 {
        return (0.0, DVec3::ZERO);
    }
    let mut normal = DVec3::ZERO;
    for i in 0..n {
        let (p, q) = (points[i], points[(i + 1) % n]);
        normal.x += (p.y - q.y) * (p.z + q.z);
        normal.y += (p.z - q.z) * (p.x + q.x);
        normal.z += (p.x - q.x) * (p.y + q.y);
    }
    let len = normal.length();
    if len == 0.0 {
        return (0.0, DVec3::ZERO);
    }
    (0.5 * len, normal / len)
}

/// 顶点平均质心
pub fn polygon_centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().copied().sum::<DVec3>() / points.len() as f64
}

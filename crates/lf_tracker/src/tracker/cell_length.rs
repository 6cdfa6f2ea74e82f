// crates/lf_tracker/src/tracker/cell_length.rs

//! 单元特征长度
//!
//! 步长取 `step_factor * 单元特征长度`。特征长度有三种估计：
//!
//! - 包围盒对角线
//! - 单元各边在速度方向上投影的最大值
//! - 散度定理：`V / A`，其中截面积 `A = Σ|n·v̂|·S/2`，
//!   体积 `V = Σ(n·c)·S/3`
//!
//! 每种估计可以取上一步所在单元或当前位置所在单元。
//! 速度为零时退化为对角线长度。

use crate::model::IntegrationModel;
use crate::particle::Particle;
use crate::threaded_data::WorkerScratch;
use glam::DVec3;
use lf_config::CellLengthMode;
use lf_mesh::cell::{polygon_area_normal, polygon_centroid};
use lf_mesh::Cell;

/// 包围盒对角线长度
pub fn diagonal_length(cell: &Cell) -> f64 {
    cell.length2().sqrt()
}

/// 各边在 `direction`（单位向量）上投影长度的最大值
pub fn velocity_direction_length(cell: &Cell, direction: DVec3) -> f64 {
    let mut length: f64 = 0.0;
    cell.for_each_edge(|a, b| {
        length = length.max((b - a).dot(direction).abs());
    });
    length
}

/// 散度定理估计的沿 `direction` 的长度，单元无面时返回 None
pub fn divergence_theorem_length(cell: &Cell, direction: DVec3) -> Option<f64> {
    let mut cross_section = 0.0;
    let mut volume = 0.0;
    cell.for_each_face(|face| {
        let (area, normal) = polygon_area_normal(face);
        cross_section += normal.dot(direction).abs() * area / 2.0;
        volume += normal.dot(polygon_centroid(face)) * area / 3.0;
    });
    if cross_section > 0.0 {
        Some(volume.abs() / cross_section)
    } else {
        None
    }
}

/// 按策略计算粒子所在单元的特征长度
///
/// 当前单元策略在当前位置找不到单元时退回上一步单元。
/// 两者都没有时返回 None，调用方按出域处理。
pub fn compute_cell_length(
    model: &IntegrationModel,
    mode: CellLengthMode,
    particle: &mut Particle,
    scratch: &mut WorkerScratch,
) -> Option<f64> {
    let location = if mode.uses_current_cell() {
        model.find_in_locators(particle.position(), &mut particle.locator_cache, scratch)
    } else {
        None
    };
    let (dataset, cell_id) = match location {
        Some(loc) => (loc.dataset, loc.cell_id),
        None => (particle.locator_cache.dataset?, particle.locator_cache.cell_id),
    };
    let dataset = model.flow_dataset(dataset)?;
    if cell_id >= dataset.n_cells() {
        return None;
    }
    dataset.get_cell(cell_id, &mut scratch.cell);
    let cell = &scratch.cell;

    let speed = particle.velocity().length();
    let direction = if speed > 0.0 { particle.velocity() / speed } else { DVec3::ZERO };

    let length = match mode {
        CellLengthMode::StepLastCellVelDir | CellLengthMode::StepCurCellVelDir if speed > 0.0 => {
            velocity_direction_length(cell, direction)
        }
        CellLengthMode::StepLastCellDivTheo | CellLengthMode::StepCurCellDivTheo if speed > 0.0 => {
            divergence_theorem_length(cell, direction).unwrap_or_else(|| diagonal_length(cell))
        }
        _ => diagonal_length(cell),
    };
    length.is_finite().then_some(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_mesh::CellType;

    fn box_cell(size: DVec3) -> Cell {
        let pts = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(size.x, 0.0, 0.0),
            DVec3::new(size.x, size.y, 0.0),
            DVec3::new(0.0, size.y, 0.0),
            DVec3::new(0.0, 0.0, size.z),
            DVec3::new(size.x, 0.0, size.z),
            DVec3::new(size.x, size.y, size.z),
            DVec3::new(0.0, size.y, size.z),
        ];
        Cell::from_points(CellType::Hexahedron, &pts)
    }

    #[test]
    fn test_diagonal() {
        let cell = box_cell(DVec3::new(1.0, 2.0, 2.0));
        assert!((diagonal_length(&cell) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_velocity_direction() {
        let cell = box_cell(DVec3::new(1.0, 2.0, 4.0));
        assert!((velocity_direction_length(&cell, DVec3::Y) - 2.0).abs() < 1e-12);
        let diag = DVec3::new(1.0, 1.0, 0.0).normalize();
        assert!((velocity_direction_length(&cell, diag) - 2.0 * diag.y).abs() < 1e-12);
    }

    #[test]
    fn test_divergence_theorem_matches_extent() {
        let cell = box_cell(DVec3::new(1.0, 2.0, 4.0));
        for (dir, expected) in [(DVec3::X, 1.0), (DVec3::Y, 2.0), (DVec3::Z, 4.0)] {
            let length = divergence_theorem_length(&cell, dir).unwrap();
            assert!((length - expected).abs() < 1e-12, "{dir:?}: {length}");
        }
    }

    #[test]
    fn test_divergence_theorem_on_surface_cell() {
        let quad = Cell::from_points(
            CellType::Quad,
            &[DVec3::ZERO, DVec3::X, DVec3::new(1.0, 1.0, 0.0), DVec3::Y],
        );
        assert!(divergence_theorem_length(&quad, DVec3::X).is_none());
    }
}

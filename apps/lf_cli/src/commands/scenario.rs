// apps/lf_cli/src/commands/scenario.rs

//! 合成流道算例
//!
//! 流道 [0, L]×[0, 1]×[0, 1]，流速沿 +x，在 y 方向为抛物线剖面。
//! 多 rank 运行时流道沿 x 均分，偶数段用非结构六面体网格，奇数段用
//! 体素网格；单 rank 时前后两半分别用两种网格。挡板位于 x = 0.75 L，
//! 在所有 rank 上相同。

use anyhow::{ensure, Result};
use clap::ValueEnum;
use glam::DVec3;
use lf_foundation::FlatIndex;
use lf_mesh::{CellType, DataArray, DataSet, FieldData, ImageData, UnstructuredGrid};
use lf_tracker::{SeedSet, SurfaceType, TrackerInput};
use std::sync::Arc;

/// 挡板类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BaffleKind {
    None,
    Terminate,
    Bounce,
    Break,
    Pass,
}

impl BaffleKind {
    fn surface_type(self) -> Option<SurfaceType> {
        match self {
            Self::None => None,
            Self::Terminate => Some(SurfaceType::Terminate),
            Self::Bounce => Some(SurfaceType::Bounce),
            Self::Break => Some(SurfaceType::BreakUp),
            Self::Pass => Some(SurfaceType::PassThrough),
        }
    }
}

/// 流道算例参数
#[derive(Debug, Clone)]
pub struct ChannelScenario {
    pub length: f64,
    /// 单位长度上的单元数
    pub resolution: usize,
    pub speed: f64,
    pub seeds: usize,
    pub particle_diameter: f64,
    pub particle_density: f64,
    pub baffle: BaffleKind,
}

impl ChannelScenario {
    fn velocity_at(&self, p: DVec3) -> [f64; 3] {
        [self.speed * 4.0 * p.y * (1.0 - p.y), 0.0, 0.0]
    }

    fn fill_flow(&self, points: impl Iterator<Item = DVec3>, pd: &mut FieldData) -> Result<()> {
        let velocity: Vec<f64> = points.flat_map(|p| self.velocity_at(p)).collect();
        let n = velocity.len() / 3;
        pd.add_array(DataArray::from_values("FlowVelocity", 3, velocity)?);
        pd.add_array(DataArray::from_values("FlowDensity", 1, vec![1000.0; n])?);
        pd.add_array(DataArray::from_values("FlowDynamicViscosity", 1, vec![1e-3; n])?);
        Ok(())
    }

    /// [x0, x1] 段流场
    fn segment(&self, x0: f64, x1: f64, voxels: bool) -> Result<Arc<dyn DataSet>> {
        let h = 1.0 / self.resolution as f64;
        let nx = (((x1 - x0) / h).round() as usize).max(1);
        let spacing = DVec3::new((x1 - x0) / nx as f64, h, h);
        let origin = DVec3::new(x0, 0.0, 0.0);
        let n = self.resolution;

        if voxels {
            let mut image = ImageData::new(origin, spacing, [nx + 1, n + 1, n + 1])?;
            let points: Vec<DVec3> = (0..image.n_points()).map(|i| image.point(i)).collect();
            self.fill_flow(points.into_iter(), image.point_data_mut())?;
            Ok(Arc::new(image))
        } else {
            let mut grid = UnstructuredGrid::hexahedral_box(origin, spacing, [nx, n, n])?;
            let points: Vec<DVec3> = (0..grid.n_points()).map(|i| grid.point(i)).collect();
            self.fill_flow(points.into_iter(), grid.point_data_mut())?;
            Ok(Arc::new(grid))
        }
    }

    fn baffle(&self) -> Result<Option<Arc<dyn DataSet>>> {
        let Some(surface_type) = self.baffle.surface_type() else {
            return Ok(None);
        };
        let x = 0.75 * self.length;
        let mut grid = UnstructuredGrid::new(vec![
            DVec3::new(x, -0.1, -0.1),
            DVec3::new(x, 1.1, -0.1),
            DVec3::new(x, 1.1, 1.1),
            DVec3::new(x, -0.1, 1.1),
        ]);
        grid.add_cell(CellType::Quad, &[0, 1, 2, 3])?;
        grid.cell_data_mut().add_array(DataArray::from_values(
            lf_mesh::attributes::ARRAY_SURFACE_TYPE,
            1,
            vec![f64::from(surface_type.code())],
        )?);
        Ok(Some(Arc::new(grid)))
    }

    /// 入口附近的一排种子
    fn seed_set(&self) -> Result<SeedSet> {
        let n = self.seeds;
        let positions: Vec<DVec3> = (0..n)
            .map(|i| DVec3::new(0.05 * self.length, 0.2 + 0.6 * (i as f64 + 0.5) / n as f64, 0.5))
            .collect();
        let velocity: Vec<f64> = positions.iter().flat_map(|&p| self.velocity_at(p)).collect();
        Ok(SeedSet::new(positions)
            .with_array(DataArray::from_values("ParticleInitialVelocity", 3, velocity)?)
            .with_array(DataArray::from_values("ParticleDiameter", 1, vec![self.particle_diameter; n])?)
            .with_array(DataArray::from_values("ParticleDensity", 1, vec![self.particle_density; n])?))
    }

    /// 各 rank 的输入，种子全部放在 rank 0
    pub fn inputs(&self, ranks: usize) -> Result<Vec<TrackerInput>> {
        ensure!(ranks > 0, "rank 数必须大于 0");
        ensure!(self.length > 0.0 && self.resolution > 0, "流道长度与分辨率必须为正");

        let surfaces: Vec<(FlatIndex, Arc<dyn DataSet>)> = self
            .baffle()?
            .map(|b| (FlatIndex::new(0), b))
            .into_iter()
            .collect();
        let seeds = self.seed_set()?;

        if ranks == 1 {
            let half = 0.5 * self.length;
            return Ok(vec![TrackerInput {
                flow: vec![self.segment(0.0, half, false)?, self.segment(half, self.length, true)?],
                seeds,
                surfaces,
            }]);
        }

        let width = self.length / ranks as f64;
        (0..ranks)
            .map(|rank| {
                let x0 = rank as f64 * width;
                Ok(TrackerInput {
                    flow: vec![self.segment(x0, x0 + width, rank % 2 == 1)?],
                    seeds: if rank == 0 { seeds.clone() } else { SeedSet::default() },
                    surfaces: surfaces.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> ChannelScenario {
        ChannelScenario {
            length: 4.0,
            resolution: 4,
            speed: 1.0,
            seeds: 5,
            particle_diameter: 1e-4,
            particle_density: 1000.0,
            baffle: BaffleKind::Bounce,
        }
    }

    #[test]
    fn test_single_rank_uses_two_datasets() {
        let inputs = scenario().inputs(1).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].flow.len(), 2);
        assert_eq!(inputs[0].seeds.len(), 5);
        assert_eq!(inputs[0].surfaces.len(), 1);
    }

    #[test]
    fn test_segments_tile_channel() {
        let inputs = scenario().inputs(4).unwrap();
        for (rank, input) in inputs.iter().enumerate() {
            let b = input.flow[0].bounds();
            assert!((b.min.x - rank as f64).abs() < 1e-12);
            assert!((b.max.x - (rank + 1) as f64).abs() < 1e-12);
            assert_eq!(input.seeds.is_empty(), rank != 0);
        }
    }

    #[test]
    fn test_no_baffle() {
        let mut s = scenario();
        s.baffle = BaffleKind::None;
        assert!(s.inputs(2).unwrap().iter().all(|i| i.surfaces.is_empty()));
        assert!(s.inputs(0).is_err());
    }
}

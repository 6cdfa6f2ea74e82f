// crates/lf_tracker/src/threaded_data.rs

//! 工作线程私有数据
//!
//! 每个工作线程持有一份 [`ThreadedData`]：通用单元缓冲、点号列表、
//! 四边形求交器、积分器实例以及本地轨迹与交互输出。
//! 批次结束后由协调线程串行合并，合并前不与其他线程共享。

use crate::integrator::{create_integrator, StepIntegrator};
use crate::quad_intersection::BilinearQuadIntersection;
use crate::tracker::output::{InteractionOutput, OutputLayout};
use lf_config::IntegratorKind;
use lf_mesh::{Cell, PolyData};
use serde::Serialize;

/// 定位缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocatorCacheStats {
    /// 查询位置与缓存位置完全相同
    pub exact_hits: u64,
    /// 新位置仍在缓存单元内
    pub cell_hits: u64,
    /// 在缓存数据集内重新查找命中
    pub dataset_hits: u64,
    /// 遍历其他数据集命中
    pub scan_hits: u64,
    /// 所有数据集都未命中
    pub misses: u64,
    /// 定位器（或数据集自带查找）调用次数
    pub locator_queries: u64,
}

impl LocatorCacheStats {
    pub fn merge(&mut self, other: &LocatorCacheStats) {
        self.exact_hits += other.exact_hits;
        self.cell_hits += other.cell_hits;
        self.dataset_hits += other.dataset_hits;
        self.scan_hits += other.scan_hits;
        self.misses += other.misses;
        self.locator_queries += other.locator_queries;
    }

    /// 查询总数
    pub fn total(&self) -> u64 {
        self.exact_hits + self.cell_hits + self.dataset_hits + self.scan_hits + self.misses
    }
}

/// 定位与求交用的临时缓冲
#[derive(Debug, Default)]
pub struct WorkerScratch {
    pub cell: Cell,
    pub weights: Vec<f64>,
    pub id_list: Vec<usize>,
    pub cell_candidates: Vec<usize>,
    pub quad: BilinearQuadIntersection,
    pub stats: LocatorCacheStats,
}

impl WorkerScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 工作线程私有数据
#[derive(Debug)]
pub struct ThreadedData {
    pub scratch: WorkerScratch,
    pub integrator: Box<dyn StepIntegrator>,
    /// 积分起点状态的副本
    pub state: Vec<f64>,
    /// 积分终点状态缓冲
    pub next_state: Vec<f64>,
    /// 本地轨迹输出
    pub paths: PolyData,
    /// 本地交互输出
    pub interactions: InteractionOutput,
    /// 本线程积分完成的粒子数
    pub integrated: u64,
}

impl ThreadedData {
    pub fn new(kind: IntegratorKind, layout: &OutputLayout) -> Self {
        Self {
            scratch: WorkerScratch::new(),
            integrator: create_integrator(kind),
            state: Vec::new(),
            next_state: Vec::new(),
            paths: layout.empty_paths(),
            interactions: layout.empty_interactions(),
            integrated: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_merge() {
        let mut a = LocatorCacheStats {
            exact_hits: 1,
            misses: 2,
            locator_queries: 3,
            ..Default::default()
        };
        let b = LocatorCacheStats {
            cell_hits: 4,
            locator_queries: 1,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.total(), 7);
        assert_eq!(a.locator_queries, 4);
    }
}

// crates/lf_tracker/tests/parallel_protocol.rs

//! 分布式追踪测试
//!
//! 用进程内集群模拟多个 rank，每个 rank 一个线程。流道沿 x 方向
//! 按单位长度切分，每个 rank 持有一段；颗粒随流向 +x 运动，
//! 出域后迁移到下一个 rank 继续积分。

use glam::DVec3;
use lf_config::TrackerConfig;
use lf_foundation::FlatIndex;
use lf_mesh::{CellType, DataArray, DataSet, UnstructuredGrid};
use lf_tracker::parallel::MigrationStats;
use lf_tracker::{
    Communicator, LocalCluster, ParticleTracker, RunSummary, SeedSet, SurfaceType, Termination, TrackerInput,
    TrackerOutput,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

// ============================================================
// 工具
// ============================================================

/// 第 `rank` 段流道：[rank, rank+1]×[0,1]×[0,1]
fn segment(rank: usize) -> Arc<dyn DataSet> {
    let origin = DVec3::new(rank as f64, 0.0, 0.0);
    let mut grid = UnstructuredGrid::hexahedral_box(origin, DVec3::splat(0.25), [4, 4, 4]).unwrap();
    let n = grid.n_points();
    let pd = grid.point_data_mut();
    pd.add_array(DataArray::from_values("FlowVelocity", 3, [1.0, 0.0, 0.0].repeat(n)).unwrap());
    pd.add_array(DataArray::from_values("FlowDensity", 1, vec![1000.0; n]).unwrap());
    pd.add_array(DataArray::from_values("FlowDynamicViscosity", 1, vec![1e-3; n]).unwrap());
    Arc::new(grid)
}

fn terminating_baffle(x: f64) -> Arc<dyn DataSet> {
    let mut grid = UnstructuredGrid::new(vec![
        DVec3::new(x, -0.1, -0.1),
        DVec3::new(x, 1.1, -0.1),
        DVec3::new(x, 1.1, 1.1),
        DVec3::new(x, -0.1, 1.1),
    ]);
    grid.add_cell(CellType::Quad, &[0, 1, 2, 3]).unwrap();
    grid.cell_data_mut()
        .add_array(DataArray::from_values("SurfaceType", 1, vec![f64::from(SurfaceType::Terminate.code())]).unwrap());
    Arc::new(grid)
}

fn seeds(n: usize, x: f64) -> SeedSet {
    let positions: Vec<DVec3> = (0..n)
        .map(|i| DVec3::new(x, 0.1 + 0.8 * (i as f64 + 0.5) / n as f64, 0.55))
        .collect();
    SeedSet::new(positions)
        .with_array(DataArray::from_values("ParticleInitialVelocity", 3, [1.0, 0.0, 0.0].repeat(n)).unwrap())
        .with_array(DataArray::from_values("ParticleDiameter", 1, vec![1e-4; n]).unwrap())
        .with_array(DataArray::from_values("ParticleDensity", 1, vec![1000.0; n]).unwrap())
}

fn config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.model.gravity = [0.0; 3];
    config.number_of_threads = 1;
    config
}

struct RankResult {
    output: TrackerOutput,
    summary: RunSummary,
    stats: MigrationStats,
}

/// 每个 rank 在独立线程中运行，`inputs[r]` 为 rank r 的输入
fn run_cluster(inputs: Vec<TrackerInput>) -> Vec<RankResult> {
    let comms = LocalCluster::create(inputs.len());
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(inputs)
            .map(|(comm, input)| {
                s.spawn(move || {
                    let comm: Arc<dyn Communicator> = Arc::new(comm);
                    let mut tracker = ParticleTracker::distributed(config(), comm).unwrap();
                    let (output, summary) = tracker.run(input).unwrap();
                    RankResult {
                        output,
                        summary,
                        stats: tracker.hooks().stats(),
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn path_ids(output: &TrackerOutput) -> BTreeSet<i64> {
    output.path_terminations().into_iter().map(|(id, _)| id).collect()
}

// ============================================================
// 测试
// ============================================================

#[test]
fn test_particles_migrate_and_terminations_reconcile() {
    let baffle = terminating_baffle(1.5);
    let inputs = vec![
        TrackerInput {
            flow: vec![segment(0)],
            seeds: seeds(3, 0.3),
            surfaces: vec![(FlatIndex::new(0), baffle.clone())],
        },
        TrackerInput {
            flow: vec![segment(1)],
            seeds: SeedSet::default(),
            surfaces: vec![(FlatIndex::new(0), baffle)],
        },
    ];
    let results = run_cluster(inputs);
    let (r0, r1) = (&results[0], &results[1]);

    // rank 0 编号为偶数
    let ids = path_ids(&r0.output);
    assert_eq!(ids, BTreeSet::from([0, 2, 4]));
    assert_eq!(path_ids(&r1.output), ids);

    assert_eq!(r0.summary.count(Termination::OutOfDomain), 3);
    assert_eq!(r0.stats.sent, 3);
    assert_eq!(r1.stats.received, 3);
    assert_eq!(r1.stats.discarded, 0);
    assert_eq!(r1.summary.count(Termination::SurfTerminated), 3);
    assert_eq!(r1.output.interactions.n_points(), 3);

    // rank 0 的出域记录被 rank 1 的终止原因覆盖
    assert_eq!(r0.stats.reconciled, 3);
    assert!(r0
        .output
        .path_terminations()
        .iter()
        .all(|(_, t)| *t == Termination::SurfTerminated));

    // 迁移后的轨迹以上一位置开头，与 rank 0 的轨迹首尾相接
    for line in r1.output.paths.lines() {
        assert!(r1.output.paths.points()[line[0]].x < 1.0);
    }
}

#[test]
fn test_unresolved_seeds_are_forwarded() {
    // 种子只在 rank 1 上提供，但位于 rank 0 的流场内
    let inputs = vec![
        TrackerInput {
            flow: vec![segment(0)],
            seeds: SeedSet::default(),
            surfaces: Vec::new(),
        },
        TrackerInput {
            flow: vec![segment(1)],
            seeds: seeds(2, 0.4),
            surfaces: Vec::new(),
        },
    ];
    let results = run_cluster(inputs);

    // rank 1 的编号为奇数
    assert_eq!(path_ids(&results[0].output), BTreeSet::from([1, 3]));
    assert_eq!(results[1].stats.sent, 2);
    assert_eq!(results[0].stats.received, 2);
    assert_eq!(results[0].stats.sent, 2);
    // 粒子回到 rank 1 后离开整个计算域
    assert_eq!(results[1].summary.count(Termination::OutOfDomain), 2);
    assert_eq!(path_ids(&results[1].output), BTreeSet::from([1, 3]));
    // rank 0 轨迹的种子数组来自协商得到的模式
    assert!(results[0].output.paths.cell_data().has("ParticleDiameter"));
}

#[test]
fn test_three_rank_chain() {
    let inputs: Vec<TrackerInput> = (0..3)
        .map(|rank| TrackerInput {
            flow: vec![segment(rank)],
            seeds: if rank == 0 { seeds(4, 0.2) } else { SeedSet::default() },
            surfaces: Vec::new(),
        })
        .collect();
    let results = run_cluster(inputs);

    for (rank, result) in results.iter().enumerate() {
        assert_eq!(result.summary.particles_integrated, 4, "rank {rank}");
        assert_eq!(result.summary.count(Termination::OutOfDomain), 4, "rank {rank}");
        assert_eq!(path_ids(&result.output), BTreeSet::from([0, 3, 6, 9]));
        // 所有进程都以出域结束，不需要覆盖
        assert_eq!(result.stats.reconciled, 0);
    }
    assert_eq!(results[2].stats.sent, 0);
}

#[test]
fn test_cluster_without_seeds_finishes() {
    let inputs: Vec<TrackerInput> = (0..3)
        .map(|rank| TrackerInput {
            flow: vec![segment(rank)],
            seeds: SeedSet::default(),
            surfaces: Vec::new(),
        })
        .collect();
    for result in run_cluster(inputs) {
        assert_eq!(result.summary.particles_integrated, 0);
        assert_eq!(result.output.n_paths(), 0);
        assert_eq!(result.stats, MigrationStats::default());
    }
}

#[test]
fn test_single_rank_cluster_matches_serial() {
    let input = TrackerInput {
        flow: vec![segment(0)],
        seeds: seeds(3, 0.3),
        surfaces: Vec::new(),
    };
    let serial = ParticleTracker::new(config()).unwrap().run(input.clone()).unwrap();
    let distributed = run_cluster(vec![input]);

    assert_eq!(serial.1.terminations, distributed[0].summary.terminations);
    assert_eq!(serial.0.paths.n_points(), distributed[0].output.paths.n_points());
    assert_eq!(path_ids(&serial.0), path_ids(&distributed[0].output));
}

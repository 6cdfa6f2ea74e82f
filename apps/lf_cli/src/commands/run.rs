// apps/lf_cli/src/commands/run.rs

//! 运行追踪命令
//!
//! 在合成流道算例上运行追踪。`--ranks` 大于 1 时用进程内集群
//! 模拟分布式运行，每个 rank 一个线程。运行统计以 JSON 输出。

use super::scenario::{BaffleKind, ChannelScenario};
use anyhow::{anyhow, Context, Result};
use clap::Args;
use lf_config::TrackerConfig;
use lf_tracker::{Communicator, LocalCluster, MigrationStats, ParticleTracker, RunSummary, TrackerInput};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::info;

/// 运行追踪参数
#[derive(Args)]
pub struct RunArgs {
    /// 配置文件路径（JSON）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 模拟的 rank 数
    #[arg(long, default_value = "1")]
    pub ranks: usize,

    /// 每个 rank 的工作线程数（0 使用全局线程池）
    #[arg(long)]
    pub threads: Option<usize>,

    /// 流道长度
    #[arg(long, default_value = "4.0")]
    pub length: f64,

    /// 单位长度上的单元数
    #[arg(long, default_value = "4")]
    pub resolution: usize,

    /// 流道中心流速 [m/s]
    #[arg(long, default_value = "1.0")]
    pub speed: f64,

    /// 种子数
    #[arg(short, long, default_value = "16")]
    pub seeds: usize,

    /// 颗粒直径 [m]
    #[arg(long, default_value = "1e-4")]
    pub diameter: f64,

    /// 颗粒密度 [kg/m³]
    #[arg(long, default_value = "1000.0")]
    pub density: f64,

    /// 挡板类型
    #[arg(long, value_enum, default_value = "terminate")]
    pub baffle: BaffleKind,

    /// 统计输出文件，缺省时打印到标准输出
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// 单个 rank 的运行结果
struct RankReport {
    summary: RunSummary,
    migration: Option<MigrationStats>,
}

impl RankReport {
    fn to_json(&self, rank: usize) -> Value {
        json!({
            "rank": rank,
            "summary": self.summary,
            "migration": self.migration,
        })
    }
}

/// 执行运行命令
pub fn execute(args: RunArgs) -> Result<()> {
    info!("=== LagraFlow 追踪启动 ===");

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)
            .with_context(|| format!("无法加载配置文件 {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.number_of_threads = threads;
    }
    info!(
        "积分器 {:?}, 单元长度策略 {:?}, 步长因子 {}",
        config.integrator, config.cell_length_computation_mode, config.step_factor
    );

    let scenario = ChannelScenario {
        length: args.length,
        resolution: args.resolution,
        speed: args.speed,
        seeds: args.seeds,
        particle_diameter: args.diameter,
        particle_density: args.density,
        baffle: args.baffle,
    };
    let inputs = scenario.inputs(args.ranks).context("构建算例失败")?;
    info!(
        "流道长度 {}, {} 个种子, 挡板 {:?}, {} 个 rank",
        args.length, args.seeds, args.baffle, args.ranks
    );

    let start = Instant::now();
    let reports = if args.ranks == 1 {
        vec![run_serial(config, inputs)?]
    } else {
        run_cluster(config, inputs)?
    };
    let elapsed = start.elapsed().as_secs_f64();

    let integrated: u64 = reports.iter().map(|r| r.summary.particles_integrated).sum();
    info!("=== 追踪完成: 积分 {} 次, 用时 {:.3}s ===", integrated, elapsed);

    let report = json!({
        "elapsed_seconds": elapsed,
        "ranks": reports.iter().enumerate().map(|(r, rep)| rep.to_json(r)).collect::<Vec<_>>(),
    });
    let text = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("无法写入 {}", path.display()))?;
            info!("统计已写入 {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn run_serial(config: TrackerConfig, mut inputs: Vec<TrackerInput>) -> Result<RankReport> {
    let input = inputs.pop().ok_or_else(|| anyhow!("缺少追踪输入"))?;
    let mut tracker = ParticleTracker::new(config)?;
    let (_, summary) = tracker.run(input)?;
    Ok(RankReport {
        summary,
        migration: None,
    })
}

fn run_cluster(config: TrackerConfig, inputs: Vec<TrackerInput>) -> Result<Vec<RankReport>> {
    let comms = LocalCluster::create(inputs.len());
    thread::scope(|s| {
        let handles = comms
            .into_iter()
            .zip(inputs)
            .enumerate()
            .map(|(rank, (comm, input))| {
                let config = config.clone();
                thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(s, move || -> Result<RankReport> {
                        let comm: Arc<dyn Communicator> = Arc::new(comm);
                        let mut tracker = ParticleTracker::distributed(config, comm)?;
                        let (_, summary) = tracker.run(input)?;
                        Ok(RankReport {
                            summary,
                            migration: Some(tracker.hooks().stats()),
                        })
                    })
                    .context("无法创建 rank 线程")
            })
            .collect::<Result<Vec<_>>>()?;

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| anyhow!("rank {rank} 线程异常退出"))?
                    .with_context(|| format!("rank {rank} 追踪失败"))
            })
            .collect()
    })
}

// apps/lf_cli/src/commands/info.rs

//! 信息显示命令

use anyhow::Result;
use clap::Args;
use lf_config::TrackerConfig;
use lf_tracker::{Interaction, SurfaceType, Termination, USER_SURFACE_TYPE};
use tracing::info;

/// 信息显示参数
#[derive(Args)]
pub struct InfoArgs {
    /// 显示默认配置
    #[arg(long)]
    pub defaults: bool,

    /// 显示输出编码表（终止原因、交互类型、表面类型）
    #[arg(long)]
    pub codes: bool,
}

/// 执行信息命令
pub fn execute(args: InfoArgs) -> Result<()> {
    info!("=== LagraFlow 信息 ===");

    let all = !args.defaults && !args.codes;
    println!("LagraFlow CLI 版本: {}", env!("CARGO_PKG_VERSION"));
    println!("目标平台: {} / {}", std::env::consts::ARCH, std::env::consts::OS);
    println!("可用线程: {}", rayon::current_num_threads());

    if args.codes || all {
        println!();
        print_codes();
    }
    if args.defaults || all {
        println!();
        println!("=== 默认配置 ===");
        println!("{}", TrackerConfig::default().to_json()?);
    }
    Ok(())
}

fn print_codes() {
    println!("=== 终止原因 ===");
    for t in [
        Termination::NotTerminated,
        Termination::SurfTerminated,
        Termination::FlightTerminated,
        Termination::SurfBreak,
        Termination::OutOfDomain,
        Termination::OutOfSteps,
        Termination::OutOfTime,
    ] {
        println!("  {:>3}  {:?}", t.code(), t);
    }

    println!("=== 交互类型 ===");
    for i in [
        Interaction::None,
        Interaction::Terminated,
        Interaction::Break,
        Interaction::Bounce,
        Interaction::Other,
        Interaction::Pass,
    ] {
        println!("  {:>3}  {:?}", i.code(), i);
    }

    println!("=== 表面类型 ===");
    for s in [
        SurfaceType::ModelDefined,
        SurfaceType::Terminate,
        SurfaceType::Bounce,
        SurfaceType::BreakUp,
        SurfaceType::PassThrough,
    ] {
        println!("  {:>3}  {:?}", s.code(), s);
    }
    println!("  >={} 用户自定义", USER_SURFACE_TYPE);
}

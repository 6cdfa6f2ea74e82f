// apps/lf_cli/src/commands/validate.rs

//! 配置验证命令

use anyhow::{bail, Result};
use clap::Args;
use lf_config::{IntegratorKind, TrackerConfig};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// 验证参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 配置文件路径（JSON）
    pub config: PathBuf,

    /// 严格模式（警告也视为错误）
    #[arg(long)]
    pub strict: bool,
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("=== LagraFlow 配置验证 ===");

    let config = match TrackerConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("无法加载 {}: {}", args.config.display(), e);
            bail!("配置文件无效");
        }
    };
    if let Err(e) = config.validate() {
        error!("{}", e);
        bail!("配置校验失败");
    }

    let warnings = lint(&config);
    for w in &warnings {
        warn!("{}", w);
    }
    if args.strict && !warnings.is_empty() {
        bail!("严格模式下存在 {} 条警告", warnings.len());
    }

    info!("配置有效: {}", args.config.display());
    Ok(())
}

/// 合法但可能不符合预期的设置
fn lint(config: &TrackerConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.maximum_number_of_steps < 0 && config.maximum_integration_time < 0.0 {
        warnings.push("未限制最大步数和最大积分时间，粒子只会因出域或表面交互终止".to_string());
    }
    if config.adaptive_step_reintegration && config.maximum_reintegration_attempts == 0 {
        warnings.push("启用了自适应重积分但最大重试次数为 0".to_string());
    }
    let adaptive = config.integrator == IntegratorKind::Rk45 || config.adaptive_step_reintegration;
    if !adaptive && config.step_factor_min < config.step_factor {
        warnings.push("固定步长积分器不会使用 step_factor_min".to_string());
    }
    if !config.generate_particle_paths_output {
        warnings.push("未生成粒子轨迹输出".to_string());
    }
    warnings
}

//! Sleepy 命令行入口
//!
//! 用法：sleepy [--config PATH] [--dry-run] <TASKS>...
//! 初始化日志、加载配置、构建 AgentHub 并发运行全部任务，逐个打印 JSON 摘要；Ctrl+C 取消在途任务。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sleepy::config::load_config;
use sleepy::core::TaskStatus;
use sleepy::driver::DriverRegistry;
use sleepy::{observability, AgentBuilder};

#[derive(Parser, Debug)]
#[command(
    name = "sleepy",
    version,
    about = "Natural-language UI test agent: decompose, execute, verify, repair"
)]
struct Cli {
    /// 额外的 TOML 配置文件（必须存在）
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// 使用模拟驱动试跑，不连接真实设备
    #[arg(long)]
    dry_run: bool,
    /// 自然语言任务描述，可给多个并发运行
    #[arg(required = true)]
    tasks: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Cli::parse();
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;

    let drivers = if args.dry_run {
        tracing::info!("dry run: using simulated drivers");
        DriverRegistry::with_mock_drivers()
    } else {
        DriverRegistry::new()
    };
    let hub = AgentBuilder::new(cfg)
        .with_drivers(drivers)
        .build_hub()
        .context("Failed to build agent (device drivers are only bundled for --dry-run)")?;

    let session = hub.session().cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl+C received, cancelling tasks");
            session.cancel();
        }
    });

    let mut failed = 0usize;
    for result in hub.run_all(args.tasks).await {
        match result {
            Ok(report) => {
                let summary = serde_json::json!({
                    "task": report.task.description,
                    "status": report.status,
                    "cancelled": report.cancelled,
                    "plan_revision": report.plan.revision(),
                    "steps": report.plan.len(),
                    "passed": report.passed_steps(),
                    "results": report.results.len(),
                    "repairs": report.repairs,
                    "replayed": report.replayed,
                    "episode": report.episode_id,
                    "error": report.error,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
                if report.status != TaskStatus::Succeeded {
                    failed += 1;
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("task error: {e}");
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags_and_tasks() {
        let cli = Cli::try_parse_from([
            "sleepy",
            "--dry-run",
            "-c",
            "cfg.toml",
            "log in",
            "open settings",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        assert_eq!(cli.tasks, vec!["log in", "open settings"]);
    }

    #[test]
    fn test_cli_rejects_bad_input() {
        // 至少一个任务
        assert!(Cli::try_parse_from(["sleepy"]).is_err());
        assert!(Cli::try_parse_from(["sleepy", "--dry-run"]).is_err());
        assert!(Cli::try_parse_from(["sleepy", "--config"]).is_err());
        assert!(Cli::try_parse_from(["sleepy", "--verbose", "x"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

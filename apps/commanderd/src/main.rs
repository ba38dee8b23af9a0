//! lyra-commanderd - LYRA-6 运动指挥守护进程
//!
//! 启动指挥运行时并对外暴露三个 UDP 端口：命令、确认、状态反馈。
//! 日志级别用 `RUST_LOG` 控制（默认 info）。

mod daemon;
mod subscribers;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use lyra_commander::CommanderConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lyra-commanderd", about = "LYRA-6 motion commander daemon")]
struct Args {
    /// 配置文件路径（缺省使用出厂默认值）
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => CommanderConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            info!("no config file given, using factory defaults");
            CommanderConfig::default()
        },
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("shutdown requested (ctrl-c)");
            shutdown.store(true, Ordering::Release);
        })
        .context("installing ctrl-c handler")?;
    }

    daemon::run(config, shutdown)
}

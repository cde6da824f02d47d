mod applier;
mod backend;
mod cli;
mod config;
mod events;
mod scanner;
mod tui;

use anyhow::Result;
use backend::{BackendPaths, Backends, DuctRunner};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Cli::parse();

    // Gear Lever 探测会调用外部命令，放到阻塞线程
    let backends = tokio::task::spawn_blocking(|| {
        Backends::detect(Arc::new(DuctRunner), BackendPaths::from_home())
    })
    .await?;

    match args.command {
        Some(command) => {
            let code = cli::run(command, backends).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        None => {
            let path = config::config_path();
            if let Err(e) = config::ensure_defaults(&path) {
                log::warn!("初始化配置文件失败: {:#}", e);
            }
            let settings = config::Settings::load_from(&path);
            let result = tui::run(settings, backends).await;
            // 后台线程可能仍阻塞在外部命令上，退出时不等待运行时回收它们
            let code = match result {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    1
                }
            };
            std::process::exit(code);
        }
    }

    Ok(())
}

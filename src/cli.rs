//! 命令行入口：无子命令时进入 TUI

use crate::backend::{
    appimage, dnf, flatpak, BackendKind, Backends, DnfPackage, FlatpakApp, Operation, OperationOutcome,
    PortableEntry, UpdateSet,
};
use crate::scanner::Scanner;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::Path;

/// `check` 发现待更新时的退出码，与 `dnf check-update` 一致
pub const EXIT_UPDATES_PENDING: i32 = 100;

#[derive(Debug, Parser)]
#[command(name = "tripack", version, about = "dnf / Flatpak / AppImage 统一更新管理")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 扫描一次并打印待更新列表
    Check {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 搜索软件包 / 应用
    Search {
        query: String,
        /// 只搜索已安装
        #[arg(long, conflicts_with = "available")]
        installed: bool,
        /// 只搜索可安装
        #[arg(long)]
        available: bool,
        #[arg(long)]
        json: bool,
    },
    /// 安装
    Install { backend: BackendArg, target: String },
    /// 卸载 / 移除
    Remove { backend: BackendArg, target: String },
    /// 更新整个后端
    Update { backend: BackendArg },
    /// 集成 AppImage（有 Gear Lever 时交给它，否则复制到便携目录）
    Integrate { path: String },
    /// 查看单个软件包 / 应用 / AppImage 的详细信息
    Info { backend: BackendArg, target: String },
    /// 启动 AppImage
    Launch { path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Dnf,
    Flatpak,
    Appimage,
}

impl BackendArg {
    fn kind(self, backends: &Backends) -> BackendKind {
        match self {
            Self::Dnf => BackendKind::SystemPackage,
            Self::Flatpak => BackendKind::SandboxApp,
            Self::Appimage => backends.portable_kind(),
        }
    }
}

/// 执行一个子命令，返回进程退出码
pub async fn run(command: Command, backends: Backends) -> Result<i32> {
    match command {
        Command::Check { json } => check(backends, json).await,
        Command::Search {
            query,
            installed,
            available,
            json,
        } => {
            let filter = if installed {
                dnf::ListFilter::Installed
            } else if available {
                dnf::ListFilter::Available
            } else {
                dnf::ListFilter::All
            };
            search(backends, query, filter, json).await
        }
        Command::Install { backend, target } => {
            let kind = backend.kind(&backends);
            action(backends, kind, Operation::Install, target).await
        }
        Command::Remove { backend, target } => {
            let kind = backend.kind(&backends);
            action(backends, kind, Operation::Remove, target).await
        }
        Command::Update { backend } => {
            let kind = backend.kind(&backends);
            action(backends, kind, Operation::Update, String::new()).await
        }
        Command::Integrate { path } => {
            let kind = backends.portable_kind();
            action(backends, kind, Operation::Integrate, path).await
        }
        Command::Info { backend, target } => {
            let kind = backend.kind(&backends);
            info(backends, kind, target).await
        }
        Command::Launch { path } => {
            let outcome = appimage::launch(Path::new(&path));
            Ok(report(&outcome))
        }
    }
}

async fn info(backends: Backends, kind: BackendKind, target: String) -> Result<i32> {
    match tokio::task::spawn_blocking(move || backends.details(kind, &target)).await? {
        Ok(text) => {
            println!("{}", text);
            Ok(0)
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            Ok(1)
        }
    }
}

async fn check(backends: Backends, json: bool) -> Result<i32> {
    let set = Scanner::new(backends).scan().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&set)?);
    } else {
        print!("{}", format_update_set(&set));
    }
    Ok(if set.is_empty() { 0 } else { EXIT_UPDATES_PENDING })
}

/// 人类可读的扫描结果
pub fn format_update_set(set: &UpdateSet) -> String {
    let mut out = String::new();
    let mut current = None;
    for (_, item) in set.items() {
        if current != Some(item.group()) {
            current = Some(item.group());
            out.push_str(&format!("{} ({})\n", item.group(), set.len_of(item.group())));
        }
        out.push_str(&format!("  {}\n", item.describe()));
    }
    for failure in &set.failures {
        out.push_str(&format!("⚠ {} 扫描失败: {}\n", failure.group, failure.message));
    }
    if set.is_empty() {
        out.push_str("所有软件都是最新的\n");
    } else {
        out.push_str(&format!("共 {} 个待更新\n", set.total()));
    }
    out
}

#[derive(Debug, Default, Serialize)]
struct SearchResults {
    dnf: Vec<DnfPackage>,
    flatpak: Vec<FlatpakApp>,
    appimage: Vec<PortableEntry>,
}

async fn search(backends: Backends, query: String, filter: dnf::ListFilter, json: bool) -> Result<i32> {
    let results = tokio::task::spawn_blocking(move || {
        let mut results = SearchResults::default();
        match dnf::search(&backends, &query, filter) {
            Ok(found) => results.dnf = found,
            Err(e) => log::warn!("dnf 搜索失败: {}", e),
        }
        let installed_only = filter == dnf::ListFilter::Installed;
        match flatpak::search(&backends, &query, installed_only) {
            Ok(found) => results.flatpak = found,
            Err(e) => log::warn!("flatpak 搜索失败: {}", e),
        }
        if filter != dnf::ListFilter::Available {
            match appimage::list_installed(&backends.paths().appimage_dir, &query) {
                Ok(found) => results.appimage = found,
                Err(e) => log::warn!("读取 AppImage 目录失败: {}", e),
            }
        }
        results
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(0);
    }

    println!("DNF ({})", results.dnf.len());
    for pkg in &results.dnf {
        let status = if pkg.installed { "已安装" } else { "可安装" };
        println!("  {} {}  [{}] {}  - {}", pkg.name, pkg.version, pkg.repository, status, pkg.summary);
    }
    println!("Flatpak ({})", results.flatpak.len());
    for app in &results.flatpak {
        println!("  {} ({}) {}  - {}", app.name, app.application_id, app.version, app.description);
    }
    println!("AppImage ({})", results.appimage.len());
    for entry in &results.appimage {
        println!("  {}  {}  {} MiB  - {}", entry.app_name, entry.file_name, entry.size_mib, entry.description);
    }
    Ok(0)
}

async fn action(backends: Backends, kind: BackendKind, operation: Operation, target: String) -> Result<i32> {
    let outcome = tokio::task::spawn_blocking(move || backends.execute(kind, operation, &target)).await?;
    Ok(report(&outcome))
}

fn report(outcome: &OperationOutcome) -> i32 {
    if outcome.success {
        println!("✅ {}", outcome.message);
        0
    } else {
        eprintln!("❌ {}", outcome.message);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SystemPackageUpdate;
    use crate::backend::{ScanFailure, UpdateGroup};

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["tripack", "install", "flatpak", "org.app"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Install { backend: BackendArg::Flatpak, ref target }) if target == "org.app"
        ));

        let cli = Cli::try_parse_from(["tripack"]).unwrap();
        assert!(cli.command.is_none());

        assert!(Cli::try_parse_from(["tripack", "search", "vim", "--installed", "--available"]).is_err());

        let cli = Cli::try_parse_from(["tripack", "info", "dnf", "htop"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Info { backend: BackendArg::Dnf, ref target }) if target == "htop"
        ));
        let cli = Cli::try_parse_from(["tripack", "launch", "/tmp/Tool.AppImage"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Launch { ref path }) if path == "/tmp/Tool.AppImage"));
    }

    #[test]
    fn formats_groups_and_failures() {
        let mut set = UpdateSet::empty(1);
        set.system.push(SystemPackageUpdate {
            identifier: "foo.x86_64".into(),
            installed_version: "1.0-1".into(),
            available_version: "2.0-1".into(),
            source_repository: "repo-main".into(),
        });
        set.failures.push(ScanFailure {
            group: UpdateGroup::SandboxApp,
            message: "flatpak 执行超时".into(),
        });
        let text = format_update_set(&set);
        assert!(text.starts_with("DNF (1)\n  foo.x86_64"));
        assert!(text.contains("Flatpak 扫描失败"));
        assert!(text.ends_with("共 1 个待更新\n"));
    }
}

//! 后端模块 — 对 dnf / flatpak / AppImage (Gear Lever) 的封装

pub mod appimage;
pub mod dnf;
pub mod fallback;
pub mod flatpak;
pub mod gearlever;
pub mod parser;
pub mod runner;
pub mod types;

// 重新导出常用类型
pub use runner::{BackendError, CommandRunner, CommandSpec, DuctRunner};
pub use types::{
    BackendKind, CommandOutput, DnfPackage, FlatpakApp, Operation, OperationOutcome,
    PendingUpdateItem, PortableEntry, PortableUpdate, SandboxAppUpdate, ScanFailure, Selection,
    SystemPackageUpdate, UpdateGroup, UpdateSet,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 便携程序后端的工作模式，启动时检测一次，会话期间不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortableMode {
    /// 未安装 Gear Lever，直接操作文件
    Manual,
    /// 通过 Gear Lever 集成 / 移除 / 更新
    Managed,
}

/// 便携程序相关的目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPaths {
    /// AppImage 存放目录
    pub appimage_dir: PathBuf,
    /// 用户级 .desktop 目录
    pub desktop_dir: PathBuf,
}

impl BackendPaths {
    pub fn from_home() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::under(Path::new(&home))
    }

    /// 优先使用 ~/AppImages，不存在时使用 ~/.local/share/applications/appimages
    pub fn under(home: &Path) -> Self {
        let desktop_dir = home.join(".local/share/applications");
        let preferred = home.join("AppImages");
        let appimage_dir = if preferred.is_dir() {
            preferred
        } else {
            desktop_dir.join("appimages")
        };
        Self {
            appimage_dir,
            desktop_dir,
        }
    }
}

/// 后端上下文：执行器 + 启动时确定的配置，显式传入每个适配器和扫描器
#[derive(Clone)]
pub struct Backends {
    runner: Arc<dyn CommandRunner>,
    portable_mode: PortableMode,
    paths: BackendPaths,
    elevate: bool,
}

impl Backends {
    /// 探测 Gear Lever 是否存在、当前是否为 root，结果固定到会话结束
    pub fn detect(runner: Arc<dyn CommandRunner>, paths: BackendPaths) -> Self {
        let portable_mode = if gearlever::is_installed(runner.as_ref()) {
            PortableMode::Managed
        } else {
            PortableMode::Manual
        };
        // root 下无需 pkexec
        let elevate = unsafe { libc::geteuid() } != 0;
        log::info!(
            "后端检测完成: AppImage 模式={:?}, pkexec={}",
            portable_mode,
            elevate
        );
        Self::new(runner, portable_mode, paths, elevate)
    }

    pub fn new(
        runner: Arc<dyn CommandRunner>,
        portable_mode: PortableMode,
        paths: BackendPaths,
        elevate: bool,
    ) -> Self {
        Self {
            runner,
            portable_mode,
            paths,
            elevate,
        }
    }

    pub fn portable_mode(&self) -> PortableMode {
        self.portable_mode
    }

    /// 当前模式下便携程序操作使用的后端种类
    pub fn portable_kind(&self) -> BackendKind {
        match self.portable_mode {
            PortableMode::Manual => BackendKind::PortableManual,
            PortableMode::Managed => BackendKind::PortableManaged,
        }
    }

    pub fn paths(&self) -> &BackendPaths {
        &self.paths
    }

    /// 是否需要 pkexec 提权
    pub fn elevate(&self) -> bool {
        self.elevate
    }

    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BackendError> {
        log::debug!("执行: {}", spec.display());
        self.runner.run(spec)
    }

    /// 运行并要求零退出码，返回标准输出
    pub fn run_checked(&self, spec: &CommandSpec) -> Result<String, BackendError> {
        let output = self.run(spec)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(BackendError::Failed {
                program: spec.display(),
                code: output.code,
                message: output.diagnostic(),
            })
        }
    }

    /// 单个目标的详细信息，供详情面板和 `tripack info` 使用
    pub fn details(&self, kind: BackendKind, target: &str) -> Result<String, BackendError> {
        match kind {
            BackendKind::SystemPackage => dnf::details(self, target),
            BackendKind::SandboxApp => flatpak::details(self, target),
            BackendKind::PortableManual | BackendKind::PortableManaged => {
                appimage::details(self, Path::new(target))
            }
        }
    }

    /// 对指定后端执行一次操作。所有错误都转换为失败结果，不会向外抛出
    pub fn execute(&self, kind: BackendKind, operation: Operation, target: &str) -> OperationOutcome {
        let outcome = match kind {
            BackendKind::SystemPackage => dnf::execute(self, operation, target),
            BackendKind::SandboxApp => flatpak::execute(self, operation, target),
            BackendKind::PortableManual => appimage::execute(self, operation, target),
            BackendKind::PortableManaged => gearlever::execute(self, operation, target),
        };
        if outcome.success {
            log::info!("{} {} {}: 成功", kind, operation, target);
        } else {
            log::warn!("{} {} {}: {}", kind, operation, target, outcome.message);
        }
        outcome
    }
}

/// 把一次命令调用的结果归一为 OperationOutcome
pub(crate) fn outcome_from(
    result: Result<CommandOutput, BackendError>,
    on_success: impl FnOnce() -> String,
) -> OperationOutcome {
    match result {
        Ok(output) if output.success() => OperationOutcome::ok(on_success()),
        Ok(output) => OperationOutcome::fail(output.diagnostic()),
        Err(e) => OperationOutcome::fail(e.to_string()),
    }
}

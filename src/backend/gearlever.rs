//! Gear Lever 适配器（flatpak run it.mijorus.gearlever）

use super::fallback::manual_remove_fallback;
use super::runner::{BackendError, CommandRunner, CommandSpec, BULK_TIMEOUT, DETAIL_TIMEOUT, MUTATION_TIMEOUT};
use super::types::{Operation, OperationOutcome, PortableUpdate};
use super::{outcome_from, Backends, PortableMode};
use std::path::{Path, PathBuf};

pub const APP_ID: &str = "it.mijorus.gearlever";

fn helper(args: &[&str]) -> CommandSpec {
    CommandSpec::new("flatpak", ["run", APP_ID])
        .extend_args(args.iter().copied())
        .timeout(MUTATION_TIMEOUT)
}

/// 通过 `flatpak info` 探测 Gear Lever 是否已安装
pub fn is_installed(runner: &dyn CommandRunner) -> bool {
    let spec = CommandSpec::new("flatpak", ["info", APP_ID]).timeout(DETAIL_TIMEOUT);
    match runner.run(&spec) {
        Ok(output) => output.success(),
        Err(e) => {
            log::debug!("Gear Lever 探测失败: {}", e);
            false
        }
    }
}

/// Gear Lever 只接受绝对路径
fn absolute(target: &str) -> PathBuf {
    std::path::absolute(target).unwrap_or_else(|_| PathBuf::from(target))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn execute(backends: &Backends, operation: Operation, target: &str) -> OperationOutcome {
    match operation {
        Operation::Install | Operation::Integrate => integrate(backends, &absolute(target)),
        Operation::Remove => remove(backends, &absolute(target)),
        Operation::Update => fetch_updates(backends),
    }
}

pub fn integrate(backends: &Backends, path: &Path) -> OperationOutcome {
    let spec = helper(&["--integrate"]).arg(path.to_string_lossy());
    outcome_from(backends.run(&spec), || format!("已集成 {}", file_label(path)))
}

/// 移除失败（非零退出、超时、无法启动）时转入手动清理
pub fn remove(backends: &Backends, path: &Path) -> OperationOutcome {
    let spec = helper(&["--remove"]).arg(path.to_string_lossy());
    let helper_error = match backends.run(&spec) {
        Ok(output) if output.success() => {
            return OperationOutcome::ok(format!("已通过 Gear Lever 移除 {}", file_label(path)))
        }
        Ok(output) => output.diagnostic(),
        Err(e) => e.to_string(),
    };
    manual_remove_fallback(path, &backends.paths().desktop_dir, &helper_error)
}

/// 检查并应用全部更新，没有单项粒度
pub fn fetch_updates(backends: &Backends) -> OperationOutcome {
    let spec = helper(&["--fetch-updates"]);
    outcome_from(backends.run(&spec), || "Gear Lever: 更新检查并应用完成".to_string())
}

/// 更新扫描：仅在托管模式下调用 `--list-updates`，非空输出合成一条记录
pub fn pending_updates(backends: &Backends) -> Result<Vec<PortableUpdate>, BackendError> {
    if backends.portable_mode() != PortableMode::Managed {
        return Ok(Vec::new());
    }
    let spec = helper(&["--list-updates"]).timeout(BULK_TIMEOUT);
    let output = backends.run(&spec)?;
    if !output.success() {
        return Err(BackendError::Failed {
            program: spec.display(),
            code: output.code,
            message: output.diagnostic(),
        });
    }
    let note = output.stdout.trim();
    if note.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![PortableUpdate {
        display_name: "Gear Lever".to_string(),
        filesystem_path: backends.paths().appimage_dir.clone(),
        free_text_note: note.to_string(),
    }])
}

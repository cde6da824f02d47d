//! Gear Lever 移除失败后的手动清理
//!
//! 删除 AppImage 本身，以及两个可能的 `<stem>.desktop`：
//! 一个与 AppImage 同目录，一个在用户级 applications 目录。
//! 至少删掉一个文件即视为成功。

use super::appimage::strip_appimage_suffix;
use super::types::OperationOutcome;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 清理结果：实际删除的文件名与逐项错误
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemediationReport {
    pub removed: Vec<String>,
    pub errors: Vec<String>,
}

impl RemediationReport {
    pub fn removed_any(&self) -> bool {
        !self.removed.is_empty()
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// 候选 .desktop 路径，同一路径只出现一次
pub fn sidecar_candidates(target: &Path, desktop_dir: &Path) -> Vec<PathBuf> {
    let stem = strip_appimage_suffix(&file_label(target)).to_string();
    let desktop_name = format!("{}.desktop", stem);

    let mut candidates = Vec::with_capacity(2);
    if let Some(parent) = target.parent() {
        candidates.push(parent.join(&desktop_name));
    }
    let standard = desktop_dir.join(&desktop_name);
    if !candidates.contains(&standard) {
        candidates.push(standard);
    }
    candidates
}

/// 逐个尝试删除，互不影响；缺失的 .desktop 不算错误
pub fn remediate(target: &Path, desktop_dir: &Path) -> RemediationReport {
    let mut report = RemediationReport::default();

    match fs::remove_file(target) {
        Ok(()) => report.removed.push(file_label(target)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            report.errors.push(format!("未找到 AppImage: {}", target.display()))
        }
        Err(e) => report.errors.push(format!("无法删除 AppImage: {}", e)),
    }

    for candidate in sidecar_candidates(target, desktop_dir) {
        match fs::remove_file(&candidate) {
            Ok(()) => report.removed.push(file_label(&candidate)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => report
                .errors
                .push(format!("无法删除 {}: {}", candidate.display(), e)),
        }
    }

    for name in &report.removed {
        log::warn!("手动清理: 已删除 {}", name);
    }
    report
}

/// Gear Lever 移除失败后的兜底，组合两边的诊断信息
pub fn manual_remove_fallback(target: &Path, desktop_dir: &Path, helper_error: &str) -> OperationOutcome {
    log::warn!("Gear Lever 移除 {} 失败，尝试手动清理: {}", target.display(), helper_error);
    let report = remediate(target, desktop_dir);

    if report.removed_any() {
        let mut message = format!("已手动清理: {}", report.removed.join(", "));
        if !report.errors.is_empty() {
            message.push_str(&format!("\n警告: {}", report.errors.join("; ")));
        }
        OperationOutcome::ok(message)
    } else {
        OperationOutcome::fail(format!(
            "Gear Lever 失败: {}\n手动清理也失败: {}",
            helper_error,
            report.errors.join("; ")
        ))
    }
}

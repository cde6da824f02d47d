//! Flatpak 适配器：安装 / 卸载 / 更新、更新扫描与搜索

use super::parser::{clean_terminal_output, parse_flatpak_apps, parse_flatpak_installed, parse_flatpak_remote};
use super::runner::{BackendError, CommandSpec, BULK_TIMEOUT, DETAIL_TIMEOUT, MUTATION_TIMEOUT};
use super::types::{
    BackendKind, FlatpakApp, InstalledApp, Operation, OperationOutcome, RemoteApp,
    SandboxAppUpdate,
};
use super::{outcome_from, Backends};
use std::collections::HashMap;

const FLATPAK: &str = "flatpak";
/// 默认远程源
pub const DEFAULT_REMOTE: &str = "flathub";

const REMOTE_HINT: &str = "提示: 可能尚未配置 Flathub 源，可执行\n  flatpak remote-add --if-not-exists flathub https://flathub.org/repo/flathub.flatpakrepo";

/// 远程源未配置或目标未安装时，在失败信息后追加提示
fn with_remote_hint(mut outcome: OperationOutcome) -> OperationOutcome {
    if !outcome.success
        && (outcome.message.contains("No remote chosen")
            || outcome.message.to_lowercase().contains("not installed"))
    {
        outcome.message = format!("{}\n\n{}", outcome.message, REMOTE_HINT);
    }
    outcome
}

pub fn execute(backends: &Backends, operation: Operation, target: &str) -> OperationOutcome {
    let spec = match operation {
        Operation::Install => CommandSpec::new(FLATPAK, ["install", "-y", DEFAULT_REMOTE, target]),
        Operation::Remove => CommandSpec::new(FLATPAK, ["uninstall", "-y", target]),
        Operation::Update => CommandSpec::new(FLATPAK, ["update", "-y"]),
        Operation::Integrate => {
            return OperationOutcome::unsupported(BackendKind::SandboxApp, operation)
        }
    }
    .timeout(MUTATION_TIMEOUT);

    let outcome = outcome_from(backends.run(&spec), || match operation {
        Operation::Update => "Flatpak 应用已全部更新".to_string(),
        _ => format!("已{} {}", operation.verb(), target),
    });
    with_remote_hint(outcome)
}

/// 批量应用时逐个更新单个应用
pub fn update_app(backends: &Backends, application_id: &str) -> OperationOutcome {
    let spec = CommandSpec::new(FLATPAK, ["update", "-y", application_id]).timeout(MUTATION_TIMEOUT);
    with_remote_hint(outcome_from(backends.run(&spec), || {
        format!("已更新 {}", application_id)
    }))
}

fn run_listing(backends: &Backends, spec: &CommandSpec) -> Result<String, BackendError> {
    backends.run_checked(spec)
}

/// `flatpak info <id>`
pub fn details(backends: &Backends, application_id: &str) -> Result<String, BackendError> {
    let spec = CommandSpec::new(FLATPAK, ["info", application_id]).timeout(DETAIL_TIMEOUT);
    Ok(clean_terminal_output(&backends.run_checked(&spec)?).trim().to_string())
}

pub fn list_installed(backends: &Backends) -> Result<Vec<InstalledApp>, BackendError> {
    let spec = CommandSpec::new(FLATPAK, ["list", "--app", "--columns=application,name,version,branch,origin"])
        .timeout(BULK_TIMEOUT);
    Ok(parse_flatpak_installed(&run_listing(backends, &spec)?))
}

pub fn list_remote(backends: &Backends) -> Result<Vec<RemoteApp>, BackendError> {
    let spec = CommandSpec::new(FLATPAK, ["remote-ls", "--app", "--columns=application,version,branch,origin"])
        .timeout(BULK_TIMEOUT);
    Ok(parse_flatpak_remote(&run_listing(backends, &spec)?))
}

/// 已安装列表 × 远程目录 → 待更新条目
///
/// 远程目录按 (应用 ID, 远程名) 建索引，只与应用自己的来源比较；
/// 同分支优先，否则取第一条。来源未知时退回只按 ID 查找。
/// 远程目录中找不到的应用不产生更新，版本相同的也不产生。
pub fn reconcile(installed: &[InstalledApp], remote: &[RemoteApp]) -> Vec<SandboxAppUpdate> {
    let mut by_origin: HashMap<(&str, &str), Vec<&RemoteApp>> = HashMap::new();
    let mut by_id: HashMap<&str, Vec<&RemoteApp>> = HashMap::new();
    for entry in remote {
        by_origin
            .entry((entry.application_id.as_str(), entry.origin.as_str()))
            .or_default()
            .push(entry);
        by_id.entry(entry.application_id.as_str()).or_default().push(entry);
    }

    installed
        .iter()
        .filter_map(|app| {
            let candidates = if app.origin.is_empty() {
                by_id.get(app.application_id.as_str())?
            } else {
                by_origin.get(&(app.application_id.as_str(), app.origin.as_str()))?
            };
            let remote = candidates
                .iter()
                .find(|r| r.branch == app.branch)
                .or_else(|| candidates.first())?;
            if remote.version == app.version {
                return None;
            }
            let display_name = if app.name.is_empty() {
                app.application_id.clone()
            } else {
                app.name.clone()
            };
            Some(SandboxAppUpdate {
                application_id: app.application_id.clone(),
                display_name,
                installed_version: app.version.clone(),
                available_version: remote.version.clone(),
                branch: app.branch.clone(),
            })
        })
        .collect()
}

/// 更新扫描：远程目录每次扫描只拉取一次
pub fn pending_updates(backends: &Backends) -> Result<Vec<SandboxAppUpdate>, BackendError> {
    let installed = list_installed(backends)?;
    if installed.is_empty() {
        return Ok(Vec::new());
    }
    let remote = list_remote(backends)?;
    let updates = reconcile(&installed, &remote);
    log::debug!(
        "Flatpak: 已安装 {} 个，远程 {} 个，待更新 {} 个",
        installed.len(),
        remote.len(),
        updates.len()
    );
    Ok(updates)
}

/// 搜索：远程搜索，或在已安装列表中按名称 / ID / 描述过滤（不区分大小写）
pub fn search(backends: &Backends, query: &str, installed_only: bool) -> Result<Vec<FlatpakApp>, BackendError> {
    const COLUMNS: &str = "--columns=application,name,version,branch,description";

    if installed_only {
        let spec = CommandSpec::new(FLATPAK, ["list", "--app", COLUMNS]).timeout(BULK_TIMEOUT);
        let apps = parse_flatpak_apps(&run_listing(backends, &spec)?);
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(apps);
        }
        return Ok(apps
            .into_iter()
            .filter(|app| {
                app.name.to_lowercase().contains(&needle)
                    || app.application_id.to_lowercase().contains(&needle)
                    || app.description.to_lowercase().contains(&needle)
            })
            .collect());
    }

    let spec = CommandSpec::new(FLATPAK, ["search", query.trim(), COLUMNS]).timeout(BULK_TIMEOUT);
    let output = backends.run(&spec)?;
    // 没有匹配时 flatpak search 输出 "No matches found" 并可能返回非零
    if output.stdout.contains("No matches found") || output.stderr.contains("No matches found") {
        return Ok(Vec::new());
    }
    if !output.success() {
        return Err(BackendError::Failed {
            program: spec.display(),
            code: output.code,
            message: output.diagnostic(),
        });
    }
    Ok(parse_flatpak_apps(&output.stdout))
}

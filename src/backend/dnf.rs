//! dnf 适配器：安装 / 卸载 / 同步，以及升级扫描和搜索

use super::parser::{clean_terminal_output, parse_check_update, parse_dnf_info, parse_dnf_list, parse_installed_version, strip_arch};
use super::runner::{BackendError, CommandSpec, BULK_TIMEOUT, DETAIL_TIMEOUT};
use super::types::{BackendKind, DnfPackage, Operation, OperationOutcome, SystemPackageUpdate};
use super::{outcome_from, Backends};

const DNF: &str = "dnf";
const PKEXEC: &str = "pkexec";

/// 已安装版本查询失败时的占位值
pub const UNKNOWN_VERSION: &str = "unknown";

/// `dnf check-update` 有可用更新时的退出码
const CHECK_UPDATE_PENDING: i32 = 100;

/// 一次 `dnf info` 最多查询的包数
const INFO_BATCH_LIMIT: usize = 50;

/// 搜索范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    #[default]
    All,
    Installed,
    Available,
}

/// 构造特权 dnf 调用，不设超时
fn privileged<I, S>(backends: &Backends, args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    if backends.elevate() {
        CommandSpec::new(PKEXEC, [DNF.to_string()]).extend_args(args)
    } else {
        CommandSpec::new(DNF, args)
    }
}

/// 执行单个 dnf 操作；update 为整机 distro-sync，忽略 target
pub fn execute(backends: &Backends, operation: Operation, target: &str) -> OperationOutcome {
    let spec = match operation {
        Operation::Install => privileged(backends, ["install", "-y", target]),
        Operation::Remove => privileged(backends, ["remove", "-y", target]),
        Operation::Update => privileged(backends, ["distro-sync", "-y"]),
        Operation::Integrate => {
            return OperationOutcome::unsupported(BackendKind::SystemPackage, operation)
        }
    };

    outcome_from(backends.run(&spec), || match operation {
        Operation::Update => "系统同步完成".to_string(),
        _ => format!("已{} {}", operation.verb(), target),
    })
}

/// 一次特权调用升级全部目标，结果整体成功或整体失败
pub fn upgrade_many(backends: &Backends, targets: &[String]) -> OperationOutcome {
    let mut args = vec!["upgrade".to_string(), "-y".to_string()];
    args.extend(targets.iter().cloned());
    let spec = privileged(backends, args);
    outcome_from(backends.run(&spec), || {
        format!("已更新 {} 个软件包: {}", targets.len(), targets.join(", "))
    })
}

/// `dnf info <name>` 的完整输出
pub fn details(backends: &Backends, name: &str) -> Result<String, BackendError> {
    let spec = CommandSpec::new(DNF, ["info", name]).timeout(DETAIL_TIMEOUT);
    Ok(clean_terminal_output(&backends.run_checked(&spec)?).trim().to_string())
}

/// 查询已安装版本，任何失败都降级为 [`UNKNOWN_VERSION`]
pub fn installed_version(backends: &Backends, identifier: &str) -> String {
    let spec = CommandSpec::new(DNF, ["list", "--installed", identifier]).timeout(DETAIL_TIMEOUT);
    match backends.run(&spec) {
        Ok(output) if output.success() => parse_installed_version(&output.stdout, identifier)
            .unwrap_or_else(|| {
                log::debug!("dnf list --installed {} 输出无法解析", identifier);
                UNKNOWN_VERSION.to_string()
            }),
        Ok(output) => {
            log::debug!("dnf list --installed {} 失败: {}", identifier, output.diagnostic());
            UNKNOWN_VERSION.to_string()
        }
        Err(e) => {
            log::debug!("dnf list --installed {} 失败: {}", identifier, e);
            UNKNOWN_VERSION.to_string()
        }
    }
}

/// 升级扫描：先列出待升级包，再逐个查询已安装版本
pub fn pending_upgrades(backends: &Backends) -> Result<Vec<SystemPackageUpdate>, BackendError> {
    let spec = CommandSpec::new(DNF, ["check-update"]).timeout(BULK_TIMEOUT);
    let output = backends.run(&spec)?;
    match output.code {
        Some(0) => return Ok(Vec::new()),
        Some(CHECK_UPDATE_PENDING) => {}
        code => {
            return Err(BackendError::Failed {
                program: spec.display(),
                code,
                message: output.diagnostic(),
            })
        }
    }

    let updates = parse_check_update(&output.stdout)
        .into_iter()
        .filter_map(|candidate| {
            let installed = installed_version(backends, &candidate.identifier);
            if installed == candidate.available_version {
                return None;
            }
            Some(SystemPackageUpdate {
                identifier: candidate.identifier,
                installed_version: installed,
                available_version: candidate.available_version,
                source_repository: candidate.repository,
            })
        })
        .collect();
    Ok(updates)
}

/// 搜索软件包，并批量补充摘要
pub fn search(backends: &Backends, query: &str, filter: ListFilter) -> Result<Vec<DnfPackage>, BackendError> {
    let mut spec = CommandSpec::new(DNF, ["list"]).timeout(BULK_TIMEOUT);
    match filter {
        ListFilter::All => {}
        ListFilter::Installed => spec = spec.arg("--installed"),
        ListFilter::Available => spec = spec.arg("--available"),
    }
    let query = query.trim();
    if !query.is_empty() {
        spec = spec.arg(format!("*{}*", query));
    }

    let output = backends.run(&spec)?;
    if !output.success() {
        return Err(BackendError::Failed {
            program: spec.display(),
            code: output.code,
            message: output.diagnostic(),
        });
    }
    let mut packages = parse_dnf_list(&output.stdout);
    if packages.is_empty() {
        return Ok(packages);
    }

    let names: Vec<String> = packages
        .iter()
        .take(INFO_BATCH_LIMIT)
        .map(|p| strip_arch(&p.name).to_string())
        .collect();
    let info_spec = CommandSpec::new(DNF, ["info"]).extend_args(names).timeout(BULK_TIMEOUT);
    // 摘要只是补充信息，失败时保留列表
    let summaries = match backends.run(&info_spec) {
        Ok(info) => parse_dnf_info(&info.stdout),
        Err(e) => {
            log::warn!("dnf info 失败: {}", e);
            Default::default()
        }
    };

    for pkg in &mut packages {
        pkg.summary = summaries
            .get(strip_arch(&pkg.name))
            .or_else(|| summaries.get(&pkg.name))
            .cloned()
            .unwrap_or_else(|| "无描述".to_string());
    }
    Ok(packages)
}

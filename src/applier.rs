//! 批量应用选中的更新
//!
//! 三个分组并发执行，结果形状按分组区分：
//! - DNF：一次特权调用升级全部目标，整体成功或整体失败
//! - Flatpak：逐个更新，按选择顺序逐项报告
//! - AppImage：只要选中任意一项，就调用一次 Gear Lever 的检查并应用

use crate::backend::{
    dnf, flatpak, gearlever, Backends, OperationOutcome, PortableMode, Selection, UpdateGroup,
    UpdateSet,
};
use serde::Serialize;
use std::any::Any;
use std::thread;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("没有选中任何更新")]
    NothingSelected,
    #[error("选择基于第 {selection} 次扫描，当前结果来自第 {current} 次扫描，请重新选择")]
    StaleSelection { selection: u64, current: u64 },
    #[error("{group} 分组的索引 {index} 超出范围（共 {len} 项）")]
    IndexOutOfRange {
        group: UpdateGroup,
        index: usize,
        len: usize,
    },
}

/// Flatpak 单项结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub target: String,
    pub outcome: OperationOutcome,
}

/// 各分组的结果形状
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// 一次调用，一个合并结果
    SystemPackage {
        targets: Vec<String>,
        outcome: OperationOutcome,
    },
    /// 每个应用一个结果，保持选择顺序
    SandboxApp { items: Vec<ItemOutcome> },
    /// 无论选中几项只调用一次
    Portable {
        selected: usize,
        outcome: OperationOutcome,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub groups: Vec<GroupOutcome>,
}

impl BatchReport {
    fn record(&mut self, label: String, outcome: &OperationOutcome) {
        let entry = format!("{}: {}", label, outcome.message);
        if outcome.success {
            self.succeeded.push(entry);
        } else {
            self.failed.push(entry);
        }
    }

    fn push(&mut self, group: GroupOutcome) {
        match &group {
            GroupOutcome::SystemPackage { outcome, .. } => {
                self.record(UpdateGroup::SystemPackage.to_string(), outcome)
            }
            GroupOutcome::SandboxApp { items } => {
                for item in items {
                    self.record(format!("Flatpak {}", item.target), &item.outcome);
                }
            }
            GroupOutcome::Portable { outcome, .. } => self.record("Gear Lever".to_string(), outcome),
        }
        self.groups.push(group);
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 校验选择集并解析出每个分组的索引
fn checked_indices<'s>(
    set: &UpdateSet,
    selection: &'s Selection,
    group: UpdateGroup,
) -> Result<&'s [usize], ApplyError> {
    let indices = selection.indices(group);
    let len = set.len_of(group);
    match indices.iter().find(|&&index| index >= len) {
        Some(&index) => Err(ApplyError::IndexOutOfRange { group, index, len }),
        None => Ok(indices),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知错误".to_string());
    format!("工作线程异常退出: {}", detail)
}

fn join_outcome(handle: thread::ScopedJoinHandle<'_, OperationOutcome>) -> OperationOutcome {
    handle
        .join()
        .unwrap_or_else(|payload| OperationOutcome::fail(panic_message(payload)))
}

fn portable_apply(backends: &Backends) -> OperationOutcome {
    match backends.portable_mode() {
        PortableMode::Managed => gearlever::fetch_updates(backends),
        PortableMode::Manual => OperationOutcome::fail("未检测到 Gear Lever，无法批量更新 AppImage"),
    }
}

/// 应用选中的更新。选择集必须来自同一次扫描；全空时不调用任何后端
pub fn apply(backends: &Backends, set: &UpdateSet, selection: &Selection) -> Result<BatchReport, ApplyError> {
    if selection.is_empty() {
        return Err(ApplyError::NothingSelected);
    }
    if selection.generation() != set.generation {
        return Err(ApplyError::StaleSelection {
            selection: selection.generation(),
            current: set.generation,
        });
    }

    let system_targets: Vec<String> = checked_indices(set, selection, UpdateGroup::SystemPackage)?
        .iter()
        .map(|&i| set.system[i].identifier.clone())
        .collect();
    let sandbox_ids: Vec<String> = checked_indices(set, selection, UpdateGroup::SandboxApp)?
        .iter()
        .map(|&i| set.sandbox[i].application_id.clone())
        .collect();
    let portable_selected = checked_indices(set, selection, UpdateGroup::Portable)?.len();

    log::info!(
        "批量应用: DNF {} / Flatpak {} / AppImage {}",
        system_targets.len(),
        sandbox_ids.len(),
        portable_selected
    );

    let (system, sandbox, portable) = thread::scope(|s| {
        let system = if system_targets.is_empty() {
            None
        } else {
            Some(s.spawn(|| dnf::upgrade_many(backends, &system_targets)))
        };
        let sandbox = if sandbox_ids.is_empty() {
            None
        } else {
            Some(s.spawn(|| {
                sandbox_ids
                    .iter()
                    .map(|id| ItemOutcome {
                        target: id.clone(),
                        outcome: flatpak::update_app(backends, id),
                    })
                    .collect::<Vec<_>>()
            }))
        };
        let portable = if portable_selected == 0 {
            None
        } else {
            Some(s.spawn(|| portable_apply(backends)))
        };

        let system = system.map(join_outcome);
        let sandbox = sandbox.map(|handle| {
            handle.join().unwrap_or_else(|payload| {
                let message = panic_message(payload);
                sandbox_ids
                    .iter()
                    .map(|id| ItemOutcome {
                        target: id.clone(),
                        outcome: OperationOutcome::fail(message.clone()),
                    })
                    .collect()
            })
        });
        let portable = portable.map(join_outcome);
        (system, sandbox, portable)
    });

    let mut report = BatchReport::default();
    if let Some(outcome) = system {
        report.push(GroupOutcome::SystemPackage {
            targets: system_targets,
            outcome,
        });
    }
    if let Some(items) = sandbox {
        report.push(GroupOutcome::SandboxApp { items });
    }
    if let Some(outcome) = portable {
        report.push(GroupOutcome::Portable {
            selected: portable_selected,
            outcome,
        });
    }
    Ok(report)
}

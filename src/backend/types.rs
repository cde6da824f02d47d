//! 后端相关数据类型定义：统一更新模型、操作结果、解析中间结构

use super::parser::clean_terminal_output;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// 外部命令输出结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// 退出码；被信号终止时为 None
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn new(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            code: Some(code),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 失败诊断文本：优先 stderr，stderr 为空时回退到 stdout
    pub fn diagnostic(&self) -> String {
        let raw = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let cleaned = clean_terminal_output(raw).trim().to_string();
        if cleaned.is_empty() {
            match self.code {
                Some(code) => format!("命令以退出码 {} 结束，无输出", code),
                None => "命令被信号终止，无输出".to_string(),
            }
        } else {
            cleaned
        }
    }
}

impl From<&std::process::Output> for CommandOutput {
    fn from(output: &std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        }
    }
}

/// 逻辑操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Remove,
    Update,
    Integrate,
}

impl Operation {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Install => "安装",
            Self::Remove => "卸载",
            Self::Update => "更新",
            Self::Integrate => "集成",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// 后端种类。便携程序后端按是否存在 Gear Lever 分为两种模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// dnf
    SystemPackage,
    /// Flatpak
    SandboxApp,
    /// 手动管理的 AppImage
    PortableManual,
    /// 经由 Gear Lever 管理的 AppImage
    PortableManaged,
}

impl BackendKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SystemPackage => "DNF",
            Self::SandboxApp => "Flatpak",
            Self::PortableManual => "AppImage",
            Self::PortableManaged => "Gear Lever",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 更新集合中的三个分组，选择集按分组保存索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateGroup {
    SystemPackage,
    SandboxApp,
    Portable,
}

impl UpdateGroup {
    pub const ALL: [UpdateGroup; 3] = [Self::SystemPackage, Self::SandboxApp, Self::Portable];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SystemPackage => "DNF",
            Self::SandboxApp => "Flatpak",
            Self::Portable => "AppImage",
        }
    }
}

impl fmt::Display for UpdateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 单次操作的结果，每个操作恰好产生一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn unsupported(kind: BackendKind, operation: Operation) -> Self {
        Self::fail(format!("{} 不支持{}操作", kind, operation))
    }
}

// ========== 待更新条目 ==========

/// dnf 待升级包
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemPackageUpdate {
    /// name.arch
    pub identifier: String,
    pub installed_version: String,
    pub available_version: String,
    pub source_repository: String,
}

/// Flatpak 待更新应用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxAppUpdate {
    pub application_id: String,
    pub display_name: String,
    pub installed_version: String,
    pub available_version: String,
    pub branch: String,
}

/// Gear Lever 报告的"可能存在更新"，不带版本比较
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortableUpdate {
    pub display_name: String,
    pub filesystem_path: PathBuf,
    pub free_text_note: String,
}

/// 按分组借用的待更新条目视图
#[derive(Debug, Clone, Copy)]
pub enum PendingUpdateItem<'a> {
    SystemPackage(&'a SystemPackageUpdate),
    SandboxApp(&'a SandboxAppUpdate),
    Portable(&'a PortableUpdate),
}

impl PendingUpdateItem<'_> {
    pub fn group(&self) -> UpdateGroup {
        match self {
            Self::SystemPackage(_) => UpdateGroup::SystemPackage,
            Self::SandboxApp(_) => UpdateGroup::SandboxApp,
            Self::Portable(_) => UpdateGroup::Portable,
        }
    }

    /// 单行描述，供列表展示
    pub fn describe(&self) -> String {
        match self {
            Self::SystemPackage(p) => format!(
                "{}  {} → {}  [{}]",
                p.identifier, p.installed_version, p.available_version, p.source_repository
            ),
            Self::SandboxApp(a) => format!(
                "{} ({})  {} → {}  [{}]",
                a.display_name, a.application_id, a.installed_version, a.available_version, a.branch
            ),
            Self::Portable(p) => {
                let first = p.free_text_note.lines().next().unwrap_or("").trim();
                format!("{}: 可能有更新  {}", p.display_name, first)
            }
        }
    }
}

/// 扫描失败记录（对应分组结果为空）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub group: UpdateGroup,
    pub message: String,
}

/// 一次扫描产生的更新集合。构造后不再修改，新扫描产生新实例
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSet {
    pub generation: u64,
    pub scanned_at: DateTime<Local>,
    pub system: Vec<SystemPackageUpdate>,
    pub sandbox: Vec<SandboxAppUpdate>,
    pub portable: Vec<PortableUpdate>,
    pub failures: Vec<ScanFailure>,
}

impl UpdateSet {
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            scanned_at: Local::now(),
            system: Vec::new(),
            sandbox: Vec::new(),
            portable: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn len_of(&self, group: UpdateGroup) -> usize {
        match group {
            UpdateGroup::SystemPackage => self.system.len(),
            UpdateGroup::SandboxApp => self.sandbox.len(),
            UpdateGroup::Portable => self.portable.len(),
        }
    }

    /// 待更新总数，外部通知以此为触发条件
    pub fn total(&self) -> usize {
        UpdateGroup::ALL.iter().map(|g| self.len_of(*g)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// 按扫描顺序遍历全部条目，返回 (分组内索引, 条目)
    pub fn items(&self) -> impl Iterator<Item = (usize, PendingUpdateItem<'_>)> {
        let system = self
            .system
            .iter()
            .enumerate()
            .map(|(i, p)| (i, PendingUpdateItem::SystemPackage(p)));
        let sandbox = self
            .sandbox
            .iter()
            .enumerate()
            .map(|(i, a)| (i, PendingUpdateItem::SandboxApp(a)));
        let portable = self
            .portable
            .iter()
            .enumerate()
            .map(|(i, p)| (i, PendingUpdateItem::Portable(p)));
        system.chain(sandbox).chain(portable)
    }
}

/// 选择集：按分组保存位置索引，仅对产生它的那次扫描有效
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    generation: u64,
    system: Vec<usize>,
    sandbox: Vec<usize>,
    portable: Vec<usize>,
}

impl Selection {
    pub fn for_set(set: &UpdateSet) -> Self {
        Self {
            generation: set.generation,
            ..Self::default()
        }
    }

    /// 选中集合中的全部条目
    pub fn all(set: &UpdateSet) -> Self {
        let mut selection = Self::for_set(set);
        for group in UpdateGroup::ALL {
            for index in 0..set.len_of(group) {
                selection.select(group, index);
            }
        }
        selection
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn slot(&mut self, group: UpdateGroup) -> &mut Vec<usize> {
        match group {
            UpdateGroup::SystemPackage => &mut self.system,
            UpdateGroup::SandboxApp => &mut self.sandbox,
            UpdateGroup::Portable => &mut self.portable,
        }
    }

    /// 按选择顺序返回索引
    pub fn indices(&self, group: UpdateGroup) -> &[usize] {
        match group {
            UpdateGroup::SystemPackage => &self.system,
            UpdateGroup::SandboxApp => &self.sandbox,
            UpdateGroup::Portable => &self.portable,
        }
    }

    pub fn select(&mut self, group: UpdateGroup, index: usize) {
        let slot = self.slot(group);
        if !slot.contains(&index) {
            slot.push(index);
        }
    }

    pub fn deselect(&mut self, group: UpdateGroup, index: usize) {
        self.slot(group).retain(|&i| i != index);
    }

    /// 切换选中状态，返回切换后是否选中
    pub fn toggle(&mut self, group: UpdateGroup, index: usize) -> bool {
        if self.is_selected(group, index) {
            self.deselect(group, index);
            false
        } else {
            self.select(group, index);
            true
        }
    }

    pub fn is_selected(&self, group: UpdateGroup, index: usize) -> bool {
        self.indices(group).contains(&index)
    }

    pub fn len(&self) -> usize {
        self.system.len() + self.sandbox.len() + self.portable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ========== 解析中间结构 ==========

/// `dnf check-update` 的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCandidate {
    pub identifier: String,
    pub available_version: String,
    pub repository: String,
}

/// `flatpak list --app` 的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub application_id: String,
    pub name: String,
    pub version: String,
    pub branch: String,
    /// 安装来源的远程名
    pub origin: String,
}

/// `flatpak remote-ls --app` 的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteApp {
    pub application_id: String,
    pub version: String,
    pub branch: String,
    /// 所属远程名
    pub origin: String,
}

/// dnf 搜索结果条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnfPackage {
    pub name: String,
    pub version: String,
    pub repository: String,
    pub installed: bool,
    pub summary: String,
}

/// Flatpak 搜索结果条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatpakApp {
    pub application_id: String,
    pub name: String,
    pub version: String,
    pub branch: String,
    pub description: String,
}

/// 便携程序目录中的 AppImage
#[derive(Debug, Clone, Serialize)]
pub struct PortableEntry {
    pub app_name: String,
    pub file_name: String,
    pub path: PathBuf,
    pub description: String,
    pub size_mib: u64,
    pub modified: Option<DateTime<Local>>,
}

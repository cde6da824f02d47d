use crate::applier::{ApplyError, BatchReport};
use crate::backend::{
    BackendKind, Operation, OperationOutcome, PortableEntry, PortableMode, Selection, UpdateGroup,
    UpdateSet,
};
use crate::config::Settings;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;

/// 日志最多保留的行数
const LOG_LIMIT: usize = 500;

// ========== 枚举 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// 待更新列表
    Updates,
    /// AppImage 目录
    Inventory,
}

/// 详情面板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailPane {
    pub target: String,
    pub lines: Vec<String>,
    pub scroll: usize,
}

// ========== 应用状态 ==========

/// TUI 状态。只在事件循环中修改
pub struct App {
    pub settings: Settings,
    pub portable_mode: PortableMode,
    pub view: View,

    pub update_set: Option<Arc<UpdateSet>>,
    pub selection: Selection,
    pub cursor: usize,
    pub scanning: bool,
    pub applying: bool,

    pub inventory: Vec<PortableEntry>,
    pub inventory_cursor: usize,
    pub inventory_loading: bool,
    /// 等待确认移除的 AppImage
    pub pending_removal: Option<PathBuf>,
    /// 进行中的单项操作数
    pub running_actions: usize,
    /// 打开的详情面板
    pub details: Option<DetailPane>,

    pub log: Vec<String>,
    pub log_scroll: usize,
    pub should_quit: bool,
}

impl App {
    pub fn new(settings: Settings, portable_mode: PortableMode) -> Self {
        Self {
            settings,
            portable_mode,
            view: View::Updates,
            update_set: None,
            selection: Selection::default(),
            cursor: 0,
            scanning: true,
            applying: false,
            inventory: Vec::new(),
            inventory_cursor: 0,
            inventory_loading: true,
            pending_removal: None,
            running_actions: 0,
            details: None,
            log: Vec::new(),
            log_scroll: 0,
            should_quit: false,
        }
    }

    pub fn push_log(&mut self, message: impl AsRef<str>) {
        let stamp = Local::now().format("%H:%M:%S");
        for (i, line) in message.as_ref().lines().enumerate() {
            if i == 0 {
                self.log.push(format!("[{}] {}", stamp, line));
            } else {
                self.log.push(format!("           {}", line));
            }
        }
        if self.log.len() > LOG_LIMIT {
            let overflow = self.log.len() - LOG_LIMIT;
            self.log.drain(..overflow);
        }
        // 自动滚动到底部
        self.log_scroll = self.log.len();
    }

    // ===== 更新列表 =====

    /// 列表中每一行对应的 (分组, 分组内索引)
    pub fn rows(&self) -> Vec<(UpdateGroup, usize)> {
        match &self.update_set {
            Some(set) => set.items().map(|(i, item)| (item.group(), i)).collect(),
            None => Vec::new(),
        }
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = match self.view {
            View::Updates => self.rows().len(),
            View::Inventory => self.inventory.len(),
        };
        let cursor = match self.view {
            View::Updates => &mut self.cursor,
            View::Inventory => &mut self.inventory_cursor,
        };
        if len == 0 {
            *cursor = 0;
            return;
        }
        *cursor = cursor.saturating_add_signed(delta).min(len - 1);
    }

    pub fn toggle_current(&mut self) {
        if let Some(&(group, index)) = self.rows().get(self.cursor) {
            self.selection.toggle(group, index);
        }
    }

    /// 已全选时清空，否则全选
    pub fn toggle_all(&mut self) {
        let Some(set) = &self.update_set else {
            return;
        };
        if self.selection.len() == set.total() {
            self.selection = Selection::for_set(set);
        } else {
            self.selection = Selection::all(set);
        }
    }

    pub fn on_scan_started(&mut self) {
        self.scanning = true;
    }

    /// 手动重新扫描；已有扫描进行中时返回 false
    pub fn request_rescan(&mut self) -> bool {
        if self.scanning {
            self.push_log("扫描进行中，请稍候");
            return false;
        }
        self.scanning = true;
        self.push_log("重新扫描...");
        true
    }

    /// 新的扫描结果替换旧结果，旧选择随之作废
    pub fn on_scan_finished(&mut self, set: Arc<UpdateSet>) {
        self.scanning = false;
        for failure in &set.failures {
            self.push_log(format!("⚠ {} 扫描失败: {}", failure.group, failure.message));
        }
        self.push_log(format!(
            "扫描完成（第 {} 次）: 共 {} 个待更新",
            set.generation,
            set.total()
        ));
        self.selection = Selection::for_set(&set);
        self.cursor = self.cursor.min(set.total().saturating_sub(1));
        self.update_set = Some(set);
    }

    /// 取出批量应用请求
    pub fn apply_request(&mut self) -> Option<(Arc<UpdateSet>, Selection)> {
        if self.applying {
            self.push_log("已有批量更新在进行中");
            return None;
        }
        let set = self.update_set.clone()?;
        self.applying = true;
        self.push_log(format!("开始批量更新 {} 项...", self.selection.len()));
        Some((set, self.selection.clone()))
    }

    /// 返回是否需要重新扫描
    pub fn on_batch_finished(&mut self, result: Result<BatchReport, ApplyError>) -> bool {
        self.applying = false;
        match result {
            Ok(report) => {
                for entry in &report.succeeded {
                    self.push_log(format!("✅ {}", entry));
                }
                for entry in &report.failed {
                    self.push_log(format!("❌ {}", entry));
                }
                let mark = if report.all_succeeded() { "✅" } else { "⚠" };
                self.push_log(format!(
                    "{} 批量更新结束: 成功 {} / 失败 {}",
                    mark,
                    report.succeeded.len(),
                    report.failed.len()
                ));
                true
            }
            Err(e) => {
                self.push_log(format!("⚠ {}", e));
                false
            }
        }
    }

    // ===== AppImage =====

    pub fn on_inventory_loaded(&mut self, result: Result<Vec<PortableEntry>, String>) {
        self.inventory_loading = false;
        match result {
            Ok(entries) => {
                self.inventory = entries;
                self.inventory_cursor = self.inventory_cursor.min(self.inventory.len().saturating_sub(1));
            }
            Err(e) => self.push_log(format!("⚠ 读取 AppImage 目录失败: {}", e)),
        }
    }

    /// 标记当前条目等待确认
    pub fn request_removal(&mut self) {
        if let Some(entry) = self.inventory.get(self.inventory_cursor) {
            self.pending_removal = Some(entry.path.clone());
        }
    }

    /// 确认后返回要派发的操作
    pub fn confirm_removal(&mut self) -> Option<(BackendKind, Operation, String)> {
        let path = self.pending_removal.take()?;
        let kind = self.portable_kind();
        self.running_actions += 1;
        self.push_log(format!("正在移除 {} ...", path.display()));
        Some((kind, Operation::Remove, path.to_string_lossy().to_string()))
    }

    pub fn on_action_finished(
        &mut self,
        kind: BackendKind,
        operation: Operation,
        target: &str,
        outcome: &OperationOutcome,
    ) {
        self.running_actions = self.running_actions.saturating_sub(1);
        let mark = if outcome.success { "✅" } else { "❌" };
        self.push_log(format!("{} {} {} {}: {}", mark, kind, operation, target, outcome.message));
    }

    // ===== 详情 / 启动 =====

    /// 光标所在条目对应的 (后端, 目标)；Gear Lever 汇总条目没有详情
    fn detail_target(&self) -> Option<(BackendKind, String)> {
        match self.view {
            View::Updates => {
                let set = self.update_set.as_ref()?;
                let &(group, index) = self.rows().get(self.cursor)?;
                match group {
                    UpdateGroup::SystemPackage => {
                        Some((BackendKind::SystemPackage, set.system.get(index)?.identifier.clone()))
                    }
                    UpdateGroup::SandboxApp => {
                        Some((BackendKind::SandboxApp, set.sandbox.get(index)?.application_id.clone()))
                    }
                    UpdateGroup::Portable => None,
                }
            }
            View::Inventory => {
                let entry = self.inventory.get(self.inventory_cursor)?;
                Some((self.portable_kind(), entry.path.to_string_lossy().to_string()))
            }
        }
    }

    /// 打开详情面板并返回要查询的目标
    pub fn request_details(&mut self) -> Option<(BackendKind, String)> {
        let Some((kind, target)) = self.detail_target() else {
            self.push_log("该条目没有详情");
            return None;
        };
        self.details = Some(DetailPane {
            target: target.clone(),
            lines: vec!["正在读取详情...".to_string()],
            scroll: 0,
        });
        Some((kind, target))
    }

    /// 面板已关闭或已切换到其他目标时丢弃结果
    pub fn on_details_loaded(&mut self, target: &str, result: Result<String, String>) {
        let Some(pane) = self.details.as_mut().filter(|pane| pane.target == target) else {
            return;
        };
        pane.lines = match result {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(e) => vec![format!("读取详情失败: {}", e)],
        };
        pane.scroll = 0;
    }

    pub fn close_details(&mut self) {
        self.details = None;
    }

    pub fn scroll_details(&mut self, delta: isize) {
        if let Some(pane) = self.details.as_mut() {
            let max = pane.lines.len().saturating_sub(1);
            pane.scroll = pane.scroll.saturating_add_signed(delta).min(max);
        }
    }

    /// 光标所在的 AppImage 路径
    pub fn launch_target(&self) -> Option<PathBuf> {
        if self.view != View::Inventory {
            return None;
        }
        self.inventory.get(self.inventory_cursor).map(|entry| entry.path.clone())
    }

    fn portable_kind(&self) -> BackendKind {
        match self.portable_mode {
            PortableMode::Manual => BackendKind::PortableManual,
            PortableMode::Managed => BackendKind::PortableManaged,
        }
    }

    // ===== 通知 =====

    /// 有待更新且开启通知时显示的横幅
    pub fn banner(&self) -> Option<String> {
        let total = self.update_set.as_ref()?.total();
        (self.settings.notifications_enabled && total > 0).then(|| format!("🔔 有 {} 个可用更新", total))
    }

    pub fn toggle_notifications(&mut self) {
        self.settings.notifications_enabled = !self.settings.notifications_enabled;
        let state = if self.settings.notifications_enabled { "开启" } else { "关闭" };
        self.push_log(format!("更新通知已{}", state));
    }

    pub fn status_line(&self) -> String {
        let mut parts = Vec::new();
        if self.scanning {
            parts.push("扫描中".to_string());
        }
        if self.applying {
            parts.push("批量更新中".to_string());
        }
        if self.running_actions > 0 {
            parts.push(format!("{} 个操作进行中", self.running_actions));
        }
        if let Some(set) = &self.update_set {
            parts.push(format!("上次扫描 {}", set.scanned_at.format("%H:%M")));
        }
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SandboxAppUpdate, SystemPackageUpdate};

    fn set(generation: u64) -> Arc<UpdateSet> {
        let mut set = UpdateSet::empty(generation);
        set.system.push(SystemPackageUpdate {
            identifier: "foo.x86_64".into(),
            installed_version: "1.0-1".into(),
            available_version: "2.0-1".into(),
            source_repository: "repo-main".into(),
        });
        set.sandbox.push(SandboxAppUpdate {
            application_id: "org.app".into(),
            display_name: "App".into(),
            installed_version: "1.0".into(),
            available_version: "1.1".into(),
            branch: "stable".into(),
        });
        Arc::new(set)
    }

    #[test]
    fn new_scan_drops_previous_selection() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        app.move_cursor(1);
        app.toggle_current();
        assert!(app.selection.is_selected(UpdateGroup::SandboxApp, 0));

        app.on_scan_finished(set(2));
        assert!(app.selection.is_empty());
        assert_eq!(app.selection.generation(), 2);
        assert!(!app.scanning);
    }

    #[test]
    fn timer_scan_blocks_manual_rescan() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        assert!(!app.scanning);

        app.on_scan_started();
        assert!(app.status_line().contains("扫描中"));
        assert!(!app.request_rescan());

        app.on_scan_finished(set(2));
        assert!(app.request_rescan());
        assert!(app.scanning);
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        app.move_cursor(10);
        assert_eq!(app.cursor, 1);
        app.move_cursor(-10);
        assert_eq!(app.cursor, 0);
    }

    #[test]
    fn toggle_all_selects_then_clears() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        app.toggle_all();
        assert_eq!(app.selection.len(), 2);
        app.toggle_all();
        assert!(app.selection.is_empty());
    }

    #[test]
    fn banner_follows_notification_setting() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        assert!(app.banner().is_none());
        app.on_scan_finished(set(1));
        assert!(app.banner().unwrap().contains('2'));
        app.toggle_notifications();
        assert!(app.banner().is_none());
    }

    #[test]
    fn only_one_batch_at_a_time() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        assert!(app.apply_request().is_some());
        assert!(app.apply_request().is_none());
        assert!(!app.on_batch_finished(Err(ApplyError::NothingSelected)));
        assert!(!app.applying);
    }

    #[test]
    fn removal_needs_confirmation() {
        let mut app = App::new(Settings::default(), PortableMode::Managed);
        app.on_inventory_loaded(Ok(vec![tool_entry()]));
        assert!(app.confirm_removal().is_none());

        app.request_removal();
        let (kind, operation, target) = app.confirm_removal().unwrap();
        assert_eq!(kind, BackendKind::PortableManaged);
        assert_eq!(operation, Operation::Remove);
        assert_eq!(target, "/home/u/AppImages/Tool.AppImage");
        assert_eq!(app.running_actions, 1);
    }

    fn tool_entry() -> PortableEntry {
        PortableEntry {
            app_name: "Tool".into(),
            file_name: "Tool.AppImage".into(),
            path: PathBuf::from("/home/u/AppImages/Tool.AppImage"),
            description: "AppImage: Tool".into(),
            size_mib: 1,
            modified: None,
        }
    }

    #[test]
    fn details_follow_cursor_and_view() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        assert_eq!(
            app.request_details(),
            Some((BackendKind::SystemPackage, "foo.x86_64".to_string()))
        );
        app.move_cursor(1);
        assert_eq!(app.request_details(), Some((BackendKind::SandboxApp, "org.app".to_string())));

        app.view = View::Inventory;
        app.on_inventory_loaded(Ok(vec![tool_entry()]));
        let (kind, target) = app.request_details().unwrap();
        assert_eq!(kind, BackendKind::PortableManual);
        assert_eq!(target, "/home/u/AppImages/Tool.AppImage");
        assert_eq!(app.launch_target(), Some(PathBuf::from(target)));
    }

    #[test]
    fn stale_details_are_dropped() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.on_scan_finished(set(1));
        app.request_details();
        app.on_details_loaded("org.other", Ok("other".into()));
        assert_eq!(app.details.as_ref().unwrap().lines, vec!["正在读取详情..."]);

        app.on_details_loaded("foo.x86_64", Ok("Name : foo\nVersion : 1.0".into()));
        assert_eq!(app.details.as_ref().unwrap().lines.len(), 2);
        app.scroll_details(10);
        assert_eq!(app.details.as_ref().unwrap().scroll, 1);

        app.close_details();
        app.on_details_loaded("foo.x86_64", Err("late".into()));
        assert!(app.details.is_none());
    }

    #[test]
    fn multi_line_messages_are_indented() {
        let mut app = App::new(Settings::default(), PortableMode::Manual);
        app.push_log("first\nsecond");
        assert_eq!(app.log.len(), 2);
        assert!(app.log[1].trim_start().starts_with("second"));
    }
}

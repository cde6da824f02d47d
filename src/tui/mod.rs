mod inventory;
mod layout;
pub mod state;
mod theme;
mod update;

use crate::backend::{appimage, Backends, PortableMode};
use crate::config::Settings;
use crate::events::{self, CoreEvent, Dispatcher};
use crate::scanner::{PeriodicScanner, Scanner};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::Alignment,
    style::{Modifier, Style},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use state::{App, View};
use std::io;
use std::time::Duration;

pub async fn run(settings: Settings, backends: Backends) -> Result<()> {
    // 终端初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(settings, backends.portable_mode());
    let (tx, mut rx) = events::channel();
    let dispatcher = Dispatcher::new(Scanner::new(backends), tx);

    // 启动即扫描一次，之后按设置的间隔定时扫描
    let periodic = PeriodicScanner::start(
        dispatcher.scanner().clone(),
        app.settings.poll_interval(),
        dispatcher.sender(),
    );
    dispatcher.spawn_inventory();
    app.push_log(format!(
        "AppImage 模式: {}，每 {} 分钟检查一次更新",
        match app.portable_mode {
            PortableMode::Managed => "Gear Lever",
            PortableMode::Manual => "手动",
        },
        app.settings.poll_interval_minutes
    ));

    let result = event_loop(&mut terminal, &mut app, &dispatcher, &mut rx).await;

    // 先恢复终端，再停止定时扫描
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    periodic.shutdown().await;

    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    dispatcher: &Dispatcher,
    rx: &mut tokio::sync::mpsc::Receiver<CoreEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        // 处理按键
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(key, app, dispatcher);
                }
            }
        }

        // 处理异步事件
        while let Ok(event) = rx.try_recv() {
            match event {
                CoreEvent::ScanStarted => app.on_scan_started(),
                CoreEvent::ScanFinished(set) => app.on_scan_finished(set),
                CoreEvent::ActionFinished {
                    kind,
                    operation,
                    target,
                    outcome,
                } => {
                    app.on_action_finished(kind, operation, &target, &outcome);
                    // 移除后刷新目录
                    app.inventory_loading = true;
                    dispatcher.spawn_inventory();
                }
                CoreEvent::BatchFinished(result) => {
                    if app.on_batch_finished(result) {
                        app.scanning = true;
                        dispatcher.spawn_scan();
                    }
                }
                CoreEvent::InventoryLoaded(result) => app.on_inventory_loaded(result),
                CoreEvent::DetailsLoaded { target, result } => app.on_details_loaded(&target, result),
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn handle_key(key: KeyEvent, app: &mut App, dispatcher: &Dispatcher) {
    // 确认移除
    if app.pending_removal.is_some() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some((kind, operation, target)) = app.confirm_removal() {
                    dispatcher.spawn_action(kind, operation, target);
                }
            }
            _ => {
                app.pending_removal = None;
                app.push_log("已取消移除");
            }
        }
        return;
    }

    // 详情面板打开时，方向键滚动，其他键关闭面板
    if app.details.is_some() {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => app.scroll_details(-1),
            KeyCode::Down | KeyCode::Char('j') => app.scroll_details(1),
            KeyCode::PageUp => app.scroll_details(-10),
            KeyCode::PageDown => app.scroll_details(10),
            _ => app.close_details(),
        }
        return;
    }

    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => app.should_quit = true,
        KeyCode::Tab => {
            app.view = match app.view {
                View::Updates => View::Inventory,
                View::Inventory => View::Updates,
            };
        }
        KeyCode::Up | KeyCode::Char('k') => app.move_cursor(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_cursor(1),
        KeyCode::PageUp => app.log_scroll = app.log_scroll.saturating_sub(5),
        KeyCode::PageDown => app.log_scroll = app.log_scroll.saturating_add(5),
        KeyCode::Char('n') => {
            app.toggle_notifications();
            if let Err(e) = app.settings.save() {
                app.push_log(format!("⚠ 保存设置失败: {:#}", e));
            }
        }
        KeyCode::Char('i') => {
            if let Some((kind, target)) = app.request_details() {
                dispatcher.spawn_details(kind, target);
            }
        }
        KeyCode::Char('r') => match app.view {
            View::Updates => {
                if app.request_rescan() {
                    dispatcher.spawn_scan();
                }
            }
            View::Inventory => {
                app.inventory_loading = true;
                dispatcher.spawn_inventory();
            }
        },
        _ => match app.view {
            View::Updates => handle_updates_key(key, app, dispatcher),
            View::Inventory => handle_inventory_key(key, app),
        },
    }
}

fn handle_updates_key(key: KeyEvent, app: &mut App, dispatcher: &Dispatcher) {
    match key.code {
        KeyCode::Char(' ') => app.toggle_current(),
        KeyCode::Char('a') => app.toggle_all(),
        KeyCode::Enter => {
            if let Some((set, selection)) = app.apply_request() {
                dispatcher.spawn_apply(set, selection);
            }
        }
        _ => {}
    }
}

fn handle_inventory_key(key: KeyEvent, app: &mut App) {
    match key.code {
        KeyCode::Char('d') | KeyCode::Delete => app.request_removal(),
        KeyCode::Char('o') | KeyCode::Enter => {
            if let Some(path) = app.launch_target() {
                let outcome = appimage::launch(&path);
                let mark = if outcome.success { "🚀" } else { "❌" };
                app.push_log(format!("{} {}", mark, outcome.message));
            }
        }
        _ => {}
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = layout::main_layout(f.area());

    match app.banner() {
        Some(banner) => {
            let header = Paragraph::new(format!("tripack  ·  {}", banner))
                .style(Style::default().fg(theme::BANNER).add_modifier(Modifier::BOLD))
                .block(Block::default().borders(Borders::ALL))
                .alignment(Alignment::Center);
            f.render_widget(header, chunks[0]);
        }
        None => layout::render_header(f, "tripack  ·  dnf / Flatpak / AppImage", chunks[0]),
    }

    match (&app.details, app.view) {
        (Some(pane), _) => {
            let title = format!("详情: {}", pane.target);
            layout::render_scrollable_content(f, &title, &pane.lines, pane.scroll, chunks[1]);
        }
        (None, View::Updates) => update::render_updates(f, app, chunks[1]),
        (None, View::Inventory) => inventory::render_inventory(f, app, chunks[1]),
    }

    // 日志区域只显示末尾，log_scroll 超出时贴底
    let visible = chunks[2].height.saturating_sub(2) as usize;
    let max_scroll = app.log.len().saturating_sub(visible);
    app.log_scroll = app.log_scroll.min(max_scroll);
    layout::render_scrollable_content(f, "日志", &app.log, app.log_scroll, chunks[2]);

    let footer = if let Some(path) = &app.pending_removal {
        format!("确认移除 {} ? [y] 确认  [其他键] 取消", path.display())
    } else if app.details.is_some() {
        "[↑/↓] 滚动  [其他键] 关闭详情".to_string()
    } else {
        let keys = match app.view {
            View::Updates => "[Space] 选择  [a] 全选  [Enter] 更新选中  [i] 详情  [r] 重新扫描",
            View::Inventory => "[Enter/o] 启动  [i] 详情  [d] 移除  [r] 刷新",
        };
        let status = app.status_line();
        format!("{}  [Tab] 切换  [n] 通知  [q] 退出  {}", keys, status)
    };
    layout::render_footer(f, &footer, chunks[3]);
}

//! AppImage 目录视图

use super::layout;
use super::state::App;
use super::theme::{BLUE, BRIGHT_WHITE, DESC_DIM, DIM, SEL_BG};
use crate::backend::PortableMode;
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

pub fn render_inventory(f: &mut Frame, app: &App, area: Rect) {
    let mode = match app.portable_mode {
        PortableMode::Managed => "Gear Lever",
        PortableMode::Manual => "手动管理",
    };
    let title = format!("AppImage {} 个（{}）", app.inventory.len(), mode);
    let inner = layout::content_block(f, &title, area);

    if app.inventory_loading {
        let loading = Paragraph::new("正在读取 AppImage 目录...").style(Style::default().fg(Color::Yellow));
        f.render_widget(loading, inner);
        return;
    }
    if app.inventory.is_empty() {
        let hint = Paragraph::new("  没有找到 AppImage").style(Style::default().fg(Color::DarkGray));
        f.render_widget(hint, inner);
        return;
    }

    let visible_height = inner.height as usize;
    let scroll = layout::scroll_for(app.inventory_cursor, visible_height);

    let lines: Vec<Line> = app
        .inventory
        .iter()
        .enumerate()
        .skip(scroll)
        .take(visible_height)
        .map(|(i, entry)| {
            let selected = i == app.inventory_cursor;
            let base = if selected {
                Style::default().bg(SEL_BG)
            } else {
                Style::default()
            };
            let modified = entry
                .modified
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            Line::from(vec![
                Span::styled(
                    format!("{}{}", if selected { "> " } else { "  " }, entry.app_name),
                    if selected {
                        base.fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD)
                    } else {
                        base.fg(Color::White)
                    },
                ),
                Span::styled(format!("  {} MiB  {}", entry.size_mib, modified), base.fg(BLUE)),
                Span::styled(
                    format!("  {}  {}", entry.file_name, entry.description),
                    base.fg(if selected { DESC_DIM } else { DIM }),
                ),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines), inner);
}

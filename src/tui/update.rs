//! 待更新列表视图

use super::layout;
use super::state::App;
use super::theme::{BLUE, BRIGHT_WHITE, DESC_DIM, DIM, PINK, SEL_BG};
use crate::backend::{PendingUpdateItem, UpdateGroup};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

/// 列表中的一行：分组标题或条目
enum Row<'a> {
    Group(UpdateGroup, usize),
    Item {
        position: usize,
        index: usize,
        item: PendingUpdateItem<'a>,
    },
}

fn item_spans(item: &PendingUpdateItem<'_>, selected: bool) -> Vec<Span<'static>> {
    let base = if selected {
        Style::default().bg(SEL_BG)
    } else {
        Style::default()
    };
    let name_style = if selected {
        base.fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD)
    } else {
        base.fg(Color::White)
    };
    let desc_style = base.fg(if selected { DESC_DIM } else { DIM });

    match item {
        PendingUpdateItem::SystemPackage(p) => vec![
            Span::styled(p.identifier.clone(), name_style),
            Span::styled(format!("  {} → {}", p.installed_version, p.available_version), base.fg(BLUE)),
            Span::styled(format!("  [{}]", p.source_repository), desc_style),
        ],
        PendingUpdateItem::SandboxApp(a) => vec![
            Span::styled(a.display_name.clone(), name_style),
            Span::styled(format!("  {} → {}", a.installed_version, a.available_version), base.fg(BLUE)),
            Span::styled(format!("  {} / {}", a.application_id, a.branch), desc_style),
        ],
        PendingUpdateItem::Portable(p) => {
            let first = p.free_text_note.lines().next().unwrap_or("").trim().to_string();
            vec![
                Span::styled(p.display_name.clone(), name_style),
                Span::styled("  可能有更新".to_string(), base.fg(BLUE)),
                Span::styled(format!("  {}", first), desc_style),
            ]
        }
    }
}

pub fn render_updates(f: &mut Frame, app: &App, area: Rect) {
    let title = match &app.update_set {
        Some(set) => format!("待更新 {} 项 / 已选 {} 项", set.total(), app.selection.len()),
        None => "待更新".to_string(),
    };
    let inner = layout::content_block(f, &title, area);

    let Some(set) = &app.update_set else {
        let hint = Paragraph::new("正在扫描 dnf / Flatpak / AppImage ...").style(Style::default().fg(Color::Yellow));
        f.render_widget(hint, inner);
        return;
    };
    if set.is_empty() {
        let hint = Paragraph::new("所有软件都是最新的").style(Style::default().fg(Color::Green));
        f.render_widget(hint, inner);
        return;
    }

    let mut rows = Vec::new();
    let mut current = None;
    for (position, (index, item)) in set.items().enumerate() {
        if current != Some(item.group()) {
            current = Some(item.group());
            rows.push(Row::Group(item.group(), set.len_of(item.group())));
        }
        rows.push(Row::Item { position, index, item });
    }

    // 光标所在的显示行
    let cursor_row = rows
        .iter()
        .position(|row| matches!(row, Row::Item { position, .. } if *position == app.cursor))
        .unwrap_or(0);
    let visible_height = inner.height as usize;
    let scroll = layout::scroll_for(cursor_row, visible_height);

    let lines: Vec<Line> = rows
        .iter()
        .skip(scroll)
        .take(visible_height)
        .map(|row| match row {
            Row::Group(group, count) => Line::from(Span::styled(
                format!("── {} ({}) ──", group, count),
                Style::default().fg(PINK).add_modifier(Modifier::BOLD),
            )),
            Row::Item { position, index, item } => {
                let selected = *position == app.cursor;
                let marked = app.selection.is_selected(item.group(), *index);
                let style = if selected {
                    Style::default().bg(SEL_BG).fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };
                let prefix = format!(
                    "{}{}",
                    if selected { ">" } else { " " },
                    if marked { "[✓] " } else { "[ ] " }
                );
                let mut spans = vec![Span::styled(prefix, style)];
                spans.extend(item_spans(item, selected));
                Line::from(spans)
            }
        })
        .collect();

    f.render_widget(Paragraph::new(lines), inner);
}

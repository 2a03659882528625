use chrono::Utc;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;

use crate::log_view::{format_duration, step_glyphs};
use crate::status::{ExecutionState, PUSHED_GLYPH};
use crate::tui::app::{detail_lines, App};

/// Render the full TUI frame.
pub(crate) fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),    // main area
            Constraint::Length(1), // status bar
        ])
        .split(f.area());

    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // commits
            Constraint::Percentage(60), // details
        ])
        .split(chunks[0]);

    render_commits(f, app, main_chunks[0]);
    render_details(f, app, main_chunks[1]);
    render_status_bar(f, app, chunks[1]);
}

fn render_commits(f: &mut Frame, app: &App, area: Rect) {
    let title = format!(" Commits ({}) ", app.entries.len());
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let names = app.step_name_refs();
    let now = Utc::now();
    let items: Vec<ListItem> = app
        .entries
        .iter()
        .map(|entry| {
            let pushed = if entry.statuses.is_pushed() {
                PUSHED_GLYPH
            } else {
                ""
            };
            let line = format!(
                " {:<5} {} {} ago {}",
                entry.commit.short_hash(),
                step_glyphs(&entry.statuses, &names),
                format_duration(entry.commit.age(now)),
                pushed
            );
            let style = if entry.statuses.has_failed() {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(line, style)))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED));
    let mut state = ListState::default();
    if !app.entries.is_empty() {
        state.select(Some(app.selected));
    }
    f.render_stateful_widget(list, area, &mut state);
}

fn render_details(f: &mut Frame, app: &App, area: Rect) {
    let Some(entry) = app.selected_entry() else {
        let block = Block::default().title(" Details ").borders(Borders::ALL);
        f.render_widget(Paragraph::new("No highlighted commit").block(block), area);
        return;
    };

    let title = format!(" {} ", entry.commit);
    let block = Block::default().title(title).borders(Borders::ALL);
    let mut lines: Vec<Line> = Vec::new();
    if entry.statuses.is_empty() {
        lines.push(Line::from(Span::styled(
            "No steps have run for this commit yet",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for result in entry.statuses.iter() {
        let color = match result.state {
            ExecutionState::Failure => Color::Red,
            ExecutionState::InProgress => Color::Yellow,
            ExecutionState::Success => Color::Green,
            ExecutionState::Unknown => Color::DarkGray,
        };
        let mut detail = detail_lines(result).into_iter();
        if let Some(header) = detail.next() {
            lines.push(Line::from(Span::styled(header, Style::default().fg(color))));
        }
        lines.extend(detail.map(Line::from));
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let watch = if app.watch_running {
        "watching"
    } else {
        "watch stopped"
    };
    let (text, style) = if let Some(err) = &app.error {
        (
            format!(" ERROR: {err}"),
            Style::default().fg(Color::White).bg(Color::Red),
        )
    } else {
        (
            format!(" vigil | {watch} | j/k:select  r:restart watch  q:quit"),
            Style::default().fg(Color::White).bg(Color::DarkGray),
        )
    };
    let bar = Paragraph::new(Line::from(Span::styled(text, style)));
    f.render_widget(bar, area);
}

//! View rendering.

pub mod feed;

use crate::notifications::NotificationLevel;
use crate::state::App;
use crate::theme::{query_status_color, query_status_label};
use crate::widgets::StatusIndicator;
use postfeed_cache::QueryStatus;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub const HELP_LINE: &str = "j/k move • g/G top/bottom • p pause • r refresh • Esc dismiss • q quit";

pub fn render_view(f: &mut Frame<'_>, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.size());

    render_header(f, app, layout[0]);
    feed::render(f, app, layout[1]);
    render_footer(f, app, layout[2]);
}

fn render_header(f: &mut Frame<'_>, app: &App, area: Rect) {
    let status = app.feed.status;
    let mut detail = format!("key: {}", app.config.query_key);
    if app.updates_paused {
        detail.push_str(&format!(" | PAUSED ({} queued)", app.queued.len()));
    }
    let title = format!("postfeed | {}", app.config.base_url);
    let indicator = StatusIndicator {
        title: &title,
        label: query_status_label(status),
        detail: Some(detail),
        style: Style::default().fg(query_status_color(status, &app.theme)),
        detail_style: Style::default().fg(app.theme.text_dim),
    };
    indicator.render(f, area);
}

/// Footer text and its color: the stream error and how to reconnect while in
/// `Error`, otherwise the latest notification, otherwise key help.
pub fn footer_line(app: &App) -> (String, Color) {
    if app.feed.status == QueryStatus::Error {
        let message = app.feed.error.as_deref().unwrap_or("stream unavailable");
        return (
            format!("ERROR: {message} (press r to reconnect)"),
            app.theme.error,
        );
    }
    if let Some(note) = app.notifications.last() {
        let color = match note.level {
            NotificationLevel::Info => app.theme.info,
            NotificationLevel::Warning => app.theme.warning,
            NotificationLevel::Error => app.theme.error,
            NotificationLevel::Success => app.theme.success,
        };
        return (note.render_line(), color);
    }
    (HELP_LINE.to_string(), app.theme.text_dim)
}

fn render_footer(f: &mut Frame<'_>, app: &App, area: Rect) {
    let (text, color) = footer_line(app);
    let footer = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(color));
    f.render_widget(footer, area);
}

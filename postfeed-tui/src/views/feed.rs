//! The inbox list.

use crate::state::App;
use postfeed_cache::QueryStatus;
use ratatui::{
    layout::{Alignment, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

pub const INBOX_TITLE: &str = "Inbox";

/// Text shown instead of the list when there is nothing to list yet.
pub fn placeholder(app: &App) -> Option<String> {
    if !app.items().is_empty() {
        return None;
    }
    Some(match app.feed.status {
        QueryStatus::Uninitialized => "Not subscribed.".to_string(),
        QueryStatus::Loading => format!("Connecting to the {} stream...", app.config.query_key),
        QueryStatus::Ready => "Waiting for the first post...".to_string(),
        QueryStatus::Error => format!(
            "Error: {}",
            app.feed.error.as_deref().unwrap_or("stream unavailable")
        ),
    })
}

pub fn render(f: &mut Frame<'_>, app: &App, area: Rect) {
    let title = format!("{} ({})", INBOX_TITLE, app.items().len());
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(app.theme.border));

    if let Some(text) = placeholder(app) {
        let color = if app.feed.status == QueryStatus::Error {
            app.theme.error
        } else {
            app.theme.text_dim
        };
        let paragraph = Paragraph::new(text)
            .block(block)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = app
        .items()
        .iter()
        .enumerate()
        .map(|(index, item)| ListItem::new(format!("{:>4}  {}", index + 1, item)))
        .collect();

    let mut state = ListState::default();
    state.select(app.selected);

    let list = List::new(items)
        .block(block)
        .style(Style::default().fg(app.theme.text))
        .highlight_style(
            Style::default()
                .fg(app.theme.primary)
                .bg(app.theme.bg_highlight)
                .add_modifier(Modifier::BOLD),
        );

    f.render_stateful_widget(list, area, &mut state);
}

//! Status indicator widget.

use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// Bordered one-line panel: `title` on the border, `label` followed by an
/// optional dimmed `detail`.
pub struct StatusIndicator<'a> {
    pub title: &'a str,
    pub label: &'a str,
    pub detail: Option<String>,
    pub style: Style,
    pub detail_style: Style,
}

impl StatusIndicator<'_> {
    pub fn render(&self, f: &mut Frame<'_>, area: Rect) {
        let mut spans = vec![Span::styled(self.label, self.style)];
        if let Some(detail) = &self.detail {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(detail.as_str(), self.detail_style));
        }
        let paragraph = Paragraph::new(Line::from(spans))
            .block(Block::default().title(self.title).borders(Borders::ALL));
        f.render_widget(paragraph, area);
    }
}

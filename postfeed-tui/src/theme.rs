//! SynthBrute theme and color utilities.

use postfeed_cache::QueryStatus;
use ratatui::style::Color;

#[derive(Debug, Clone)]
pub struct SynthBruteTheme {
    pub bg: Color,
    pub bg_highlight: Color,
    pub primary: Color,
    pub primary_dim: Color,
    pub secondary: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub text: Color,
    pub text_dim: Color,
    pub border: Color,
}

impl SynthBruteTheme {
    pub fn synthbrute() -> Self {
        Self {
            bg: Color::Rgb(10, 10, 10),
            bg_highlight: Color::Rgb(42, 42, 42),
            primary: Color::Rgb(0, 255, 255),
            primary_dim: Color::Rgb(0, 136, 136),
            secondary: Color::Rgb(255, 0, 255),
            success: Color::Rgb(0, 255, 0),
            warning: Color::Rgb(255, 255, 0),
            error: Color::Rgb(255, 0, 0),
            info: Color::Rgb(0, 255, 255),
            text: Color::Rgb(255, 255, 255),
            text_dim: Color::Rgb(136, 136, 136),
            border: Color::Rgb(68, 68, 68),
        }
    }
}

pub fn query_status_color(status: QueryStatus, theme: &SynthBruteTheme) -> Color {
    match status {
        QueryStatus::Uninitialized => theme.text_dim,
        QueryStatus::Loading => theme.warning,
        QueryStatus::Ready => theme.success,
        QueryStatus::Error => theme.error,
    }
}

pub fn query_status_label(status: QueryStatus) -> &'static str {
    match status {
        QueryStatus::Uninitialized => "Idle",
        QueryStatus::Loading => "Connecting",
        QueryStatus::Ready => "Live",
        QueryStatus::Error => "Disconnected",
    }
}

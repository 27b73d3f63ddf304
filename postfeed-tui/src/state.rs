//! Application state.

use crate::config::TuiConfig;
use crate::notifications::{Notification, NotificationLevel};
use crate::theme::SynthBruteTheme;
use postfeed_cache::{QueryState, QueryStatus};
use std::collections::VecDeque;

/// Notifications kept for the footer.
const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone)]
pub struct App {
    pub config: TuiConfig,
    pub theme: SynthBruteTheme,

    /// Last snapshot applied to the screen.
    pub feed: QueryState<String>,
    pub selected: Option<usize>,

    pub notifications: Vec<Notification>,

    pub updates_paused: bool,
    pub queued: VecDeque<QueryState<String>>,
    pub refreshes: u64,
}

impl App {
    pub fn new(config: TuiConfig) -> Self {
        Self {
            config,
            theme: SynthBruteTheme::synthbrute(),
            feed: QueryState::uninitialized(),
            selected: None,
            notifications: Vec::new(),
            updates_paused: false,
            queued: VecDeque::new(),
            refreshes: 0,
        }
    }

    pub fn items(&self) -> &[String] {
        self.feed.items()
    }

    pub fn selected_item(&self) -> Option<&String> {
        self.selected.and_then(|index| self.items().get(index))
    }

    /// Hand a new snapshot to the screen, or hold it while paused.
    pub fn receive(&mut self, state: QueryState<String>) {
        if self.updates_paused {
            self.queued.push_back(state);
        } else {
            self.apply(state);
        }
    }

    pub fn toggle_pause(&mut self) {
        self.updates_paused = !self.updates_paused;
        if self.updates_paused {
            self.notify(NotificationLevel::Warning, "Updates paused");
        } else {
            let queued = self.queued.len();
            self.flush_queued();
            self.notify(
                NotificationLevel::Info,
                format!("Updates resumed ({queued} queued)"),
            );
        }
    }

    /// Apply held snapshots in arrival order.
    pub fn flush_queued(&mut self) {
        while let Some(state) = self.queued.pop_front() {
            self.apply(state);
        }
    }

    /// Forget the current snapshot before the subscription is re-created.
    pub fn begin_refresh(&mut self) {
        self.refreshes += 1;
        self.queued.clear();
        self.notify(NotificationLevel::Info, "Refreshing subscription");
    }

    pub fn notify(&mut self, level: NotificationLevel, message: impl Into<String>) {
        self.notifications.push(Notification::new(level, message));
        if self.notifications.len() > MAX_NOTIFICATIONS {
            let excess = self.notifications.len() - MAX_NOTIFICATIONS;
            self.notifications.drain(..excess);
        }
    }

    pub fn dismiss_notification(&mut self) {
        self.notifications.pop();
    }

    pub fn select_next(&mut self) {
        let len = self.items().len();
        if len == 0 {
            self.selected = None;
            return;
        }
        self.selected = Some(match self.selected {
            Some(index) if index + 1 < len => index + 1,
            Some(_) => 0,
            None => 0,
        });
    }

    pub fn select_previous(&mut self) {
        let len = self.items().len();
        if len == 0 {
            self.selected = None;
            return;
        }
        self.selected = Some(match self.selected {
            Some(0) | None => len - 1,
            Some(index) => index - 1,
        });
    }

    pub fn select_first(&mut self) {
        self.selected = if self.items().is_empty() { None } else { Some(0) };
    }

    pub fn select_last(&mut self) {
        self.selected = self.items().len().checked_sub(1);
    }

    fn apply(&mut self, state: QueryState<String>) {
        let previous = self.feed.status;
        match (previous, state.status) {
            (QueryStatus::Error, QueryStatus::Error) => {}
            (_, QueryStatus::Error) => {
                let message = state.error.as_deref().unwrap_or("Stream failed");
                self.notify(NotificationLevel::Error, message.to_string());
            }
            (QueryStatus::Loading, QueryStatus::Ready) => {
                self.notify(NotificationLevel::Success, "Connected");
            }
            _ => {}
        }
        self.feed = state;

        let len = self.items().len();
        self.selected = match self.selected {
            Some(_) if len == 0 => None,
            Some(index) if index >= len => Some(len - 1),
            selected => selected,
        };
    }
}

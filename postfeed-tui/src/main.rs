//! postfeed TUI entry point.

use crossterm::{
    event::{self, Event as CrosstermEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use postfeed_cache::QuerySubscription;
use postfeed_tui::config::TuiConfig;
use postfeed_tui::error::TuiError;
use postfeed_tui::events::TuiEvent;
use postfeed_tui::keys::{map_key, Action};
use postfeed_tui::notifications::NotificationLevel;
use postfeed_tui::state::App;
use postfeed_tui::views::render_view;
use postfeed_tui::{logging, source};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

enum Flow {
    Continue,
    Refresh,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), TuiError> {
    let config = TuiConfig::load()?;
    logging::init(&config)?;

    let transport = source::build_transport(&config)?;
    let client = source::build_client(&config, transport);
    let mut app = App::new(config);
    let mut subscription = Some(source::attach_feed(&client, &mut app).await?);

    let mut terminal = setup_terminal()?;
    let _guard = TerminalGuard;

    let (event_tx, mut event_rx) = mpsc::channel::<TuiEvent>(256);
    spawn_input_reader(event_tx);

    let mut ticker = tokio::time::interval(app.config.refresh_interval());
    let mut feed_open = true;

    loop {
        terminal.draw(|f| render_view(f, &app))?;

        tokio::select! {
            _ = ticker.tick() => {}
            changed = wait_changed(&mut subscription), if feed_open => {
                match (changed, subscription.as_mut()) {
                    (true, Some(sub)) => app.receive(sub.current()),
                    _ => {
                        feed_open = false;
                        warn!("Feed subscription closed");
                        app.notify(NotificationLevel::Warning, "Feed closed. Press r to resubscribe.");
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                match handle_event(&mut app, event) {
                    Flow::Continue => {}
                    Flow::Quit => break,
                    Flow::Refresh => {
                        subscription = source::refresh(&client, &mut app, subscription.take()).await;
                        feed_open = subscription.is_some();
                    }
                }
            }
        }
    }

    if let Some(sub) = subscription.take() {
        sub.unsubscribe();
    }
    info!(refreshes = app.refreshes, "Exiting");
    Ok(())
}

async fn wait_changed(subscription: &mut Option<QuerySubscription<String>>) -> bool {
    match subscription {
        Some(sub) => sub.changed().await,
        None => false,
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen);
    }
}

fn spawn_input_reader(sender: mpsc::Sender<TuiEvent>) {
    std::thread::spawn(move || loop {
        if let Ok(true) = event::poll(Duration::from_millis(200)) {
            if let Ok(evt) = event::read() {
                let forwarded = match evt {
                    CrosstermEvent::Key(key) => sender.blocking_send(TuiEvent::Input(key)),
                    CrosstermEvent::Resize(width, height) => {
                        sender.blocking_send(TuiEvent::Resize { width, height })
                    }
                    _ => Ok(()),
                };
                if forwarded.is_err() {
                    break;
                }
            }
        }
    });
}

fn handle_event(app: &mut App, event: TuiEvent) -> Flow {
    match event {
        TuiEvent::Input(key) => match map_key(key) {
            Some(action) => handle_action(app, action),
            None => Flow::Continue,
        },
        TuiEvent::Resize { .. } => Flow::Continue,
    }
}

fn handle_action(app: &mut App, action: Action) -> Flow {
    match action {
        Action::Quit => return Flow::Quit,
        Action::Refresh => return Flow::Refresh,
        Action::MoveDown => app.select_next(),
        Action::MoveUp => app.select_previous(),
        Action::JumpTop => app.select_first(),
        Action::JumpBottom => app.select_last(),
        Action::PauseUpdates => app.toggle_pause(),
        Action::DismissNotification => app.dismiss_notification(),
    }
    Flow::Continue
}

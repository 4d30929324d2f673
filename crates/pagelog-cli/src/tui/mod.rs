//! pagelog TUI
//!
//! Terminal user interface for logging pages read.
//!
//! ## Layout
//!
//! - Top: today's and total page counts
//! - Middle: reading list, newest first
//! - Bottom: page count input and status bar
//!
//! ## Keys
//!
//! - 0-9 / Backspace: Edit the page count
//! - Enter: Add a reading
//! - j/k or ↑/↓: Move selection
//! - d: Delete the selected reading
//! - Esc: Clear input
//! - ?: Help
//! - q: Quit

mod app;
mod ui;

use std::fs::File;
use std::io::stdout;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pagelog_core::store::Backend;
use pagelog_core::{AddOutcome, Config, DeleteOutcome, Session};

use app::App;

use crate::commands::{
    self,
    reading::{delete_rejection_message, rejection_message},
};

/// Run the TUI application
pub async fn run(config_path: Option<&PathBuf>, memory: bool) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    // File-based logging, only if PAGELOG_LOG is set
    init_tui_logging(&config);

    let (mut session, store_label, startup_error) =
        match commands::open_store(&config, memory).await {
            Ok(store) => {
                let label = store.describe();
                (commands::start_session(&config, Some(store)), label, None)
            }
            Err(e) => {
                error!("Failed to open store: {:#}", e);
                (
                    commands::start_session(&config, None),
                    "no store".to_string(),
                    Some(format!("Store unavailable: {:#}", e)),
                )
            }
        };

    let mut app = App::new(store_label);
    if let Some(message) = startup_error {
        app.set_status(message);
    }

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_app(&mut terminal, &mut app, &mut session).await;

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    session: &mut Session<Backend>,
) -> Result<()> {
    // Outcomes of adds and deletes running in the background
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<String>();

    loop {
        app.check_status_timeout();

        let view = session.view();
        app.clamp_selection(view.readings.len());
        let input = session.input().get();
        terminal.draw(|frame| ui::draw(frame, app, &view, &input))?;

        tokio::select! {
            biased;

            Some(message) = status_rx.recv() => {
                app.set_status(message);
            }

            // Readings, adding flag, input or identity changed
            _ = session.changed() => {}

            // Poll for terminal events
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                if event::poll(Duration::from_millis(0))? {
                    if let Event::Key(key) = event::read()? {
                        // Only handle key press events (not release)
                        if key.kind != KeyEventKind::Press {
                            continue;
                        }

                        // If help is showing, any key dismisses it
                        if app.show_help {
                            app.show_help = false;
                            continue;
                        }

                        handle_key(app, session, key, &status_tx);
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn handle_key(
    app: &mut App,
    session: &Session<Backend>,
    key: KeyEvent,
    status_tx: &mpsc::UnboundedSender<String>,
) {
    let view = session.view();

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.should_quit = true;
        }
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('?') => app.toggle_help(),
        KeyCode::Char(c) if c.is_ascii_digit() => {
            session.input().update(|text| text.push(c));
        }
        KeyCode::Backspace => {
            session.input().update(|text| {
                text.pop();
            });
        }
        KeyCode::Esc => session.input().clear(),
        KeyCode::Down | KeyCode::Char('j') => app.select_next(view.readings.len()),
        KeyCode::Up | KeyCode::Char('k') => app.select_prev(),
        KeyCode::Enter => {
            let commands = session.commands();
            let text = session.input().get();
            let tx = status_tx.clone();
            tokio::spawn(async move {
                let message = match commands.submit().await {
                    AddOutcome::Added { .. } => format!("Added {} pages", text.trim()),
                    AddOutcome::Rejected(reason) => rejection_message(reason, &text),
                    AddOutcome::Failed(message) => format!("Failed to add reading: {}", message),
                };
                let _ = tx.send(message);
            });
        }
        KeyCode::Char('d') => {
            let Some(reading) = app.selected_reading(&view) else {
                return;
            };
            let id = reading.id.clone();
            let pages = reading.pages;
            let commands = session.commands();
            let tx = status_tx.clone();
            tokio::spawn(async move {
                let message = match commands.delete_reading(&id).await {
                    DeleteOutcome::Deleted => format!("Deleted reading of {} pages", pages),
                    DeleteOutcome::Rejected(reason) => delete_rejection_message(reason),
                    DeleteOutcome::Failed(message) => {
                        format!("Failed to delete reading: {}", message)
                    }
                };
                let _ = tx.send(message);
            });
        }
        _ => {}
    }
}

/// Initialize file-based logging for TUI mode
///
/// Only initializes if PAGELOG_LOG is set. Writes to the configured log file
/// or `data_dir/debug.log`.
fn init_tui_logging(config: &Config) {
    let Ok(log_level) = std::env::var("PAGELOG_LOG") else {
        return;
    };

    let log_path = config.log_path();

    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            return;
        }
    };

    let env_filter = EnvFilter::new(format!(
        "pagelog_core={},pagelog={}",
        log_level, log_level
    ));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("TUI logging initialized to {:?}", log_path);
}

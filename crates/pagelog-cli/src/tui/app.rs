//! Application state and logic

use std::time::{Duration, Instant};

use pagelog_core::{ReadingEntry, ReadingsView};

/// How long a status message stays on screen
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Application state
///
/// The reading list itself lives in the session; this only tracks what the
/// user is doing with it.
pub struct App {
    /// Whether the app should exit
    pub should_quit: bool,
    /// Currently selected reading index
    pub selected: usize,
    /// Status message to display temporarily
    pub status_message: Option<String>,
    /// When the status message was set (for auto-dismiss)
    pub status_message_time: Option<Instant>,
    /// Whether help overlay is visible
    pub show_help: bool,
    /// Which store backs the session, for the header
    pub store_label: String,
}

impl App {
    pub fn new(store_label: impl Into<String>) -> Self {
        Self {
            should_quit: false,
            selected: 0,
            status_message: None,
            status_message_time: None,
            show_help: false,
            store_label: store_label.into(),
        }
    }

    /// Set a status message that auto-dismisses
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_message_time = Some(Instant::now());
    }

    /// Check and clear expired status message
    pub fn check_status_timeout(&mut self) {
        if let Some(time) = self.status_message_time {
            if time.elapsed() > STATUS_TIMEOUT {
                self.status_message = None;
                self.status_message_time = None;
            }
        }
    }

    /// Toggle help overlay
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    /// Move selection down
    pub fn select_next(&mut self, len: usize) {
        if len > 0 && self.selected + 1 < len {
            self.selected += 1;
        }
    }

    /// Move selection up
    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Keep the selection inside a list that may have shrunk
    pub fn clamp_selection(&mut self, len: usize) {
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    /// Get the currently selected reading
    pub fn selected_reading<'a>(&self, view: &'a ReadingsView) -> Option<&'a ReadingEntry> {
        view.readings.get(self.selected)
    }
}

//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;

use pagelog_core::ReadingEntry;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Reading statistics as printed by `list` and `stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub today_pages: u64,
    pub total_pages: u64,
    pub entries: usize,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print a reading that was just added
    pub fn print_added(&self, reading: &ReadingEntry) {
        print_lines(self.added_lines(reading));
    }

    fn reading_lines(&self, reading: &ReadingEntry) -> Vec<String> {
        match self.format {
            OutputFormat::Human => vec![
                format!("ID:      {}", reading.id),
                format!("Pages:   {}", reading.pages),
                format!("Logged:  {}", format_timestamp(reading.timestamp)),
            ],
            OutputFormat::Json => json_lines(reading),
            OutputFormat::Quiet => vec![reading.id.clone()],
        }
    }

    /// JSON output is the reading alone, so stdout stays one document
    fn added_lines(&self, reading: &ReadingEntry) -> Vec<String> {
        let mut lines = Vec::new();
        if self.format == OutputFormat::Human {
            lines.push(format!("✓ Added {} pages", reading.pages));
        }
        lines.extend(self.reading_lines(reading));
        lines
    }

    /// Print readings, newest first, followed by the totals
    pub fn print_readings(&self, readings: &[ReadingEntry], stats: Stats) {
        match self.format {
            OutputFormat::Human => {
                if readings.is_empty() {
                    println!("No readings yet.");
                    return;
                }
                for reading in readings {
                    println!(
                        "{} | {} | {:>4} pages",
                        short_id(&reading.id),
                        format_timestamp(reading.timestamp),
                        reading.pages
                    );
                }
                println!();
                println!(
                    "{} reading(s), {} pages today, {} pages total",
                    stats.entries, stats.today_pages, stats.total_pages
                );
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "readings": readings,
                "stats": stats,
            })),
            OutputFormat::Quiet => {
                for reading in readings {
                    println!("{}", reading.id);
                }
            }
        }
    }

    /// Print reading statistics
    pub fn print_stats(&self, stats: Stats) {
        match self.format {
            OutputFormat::Human => {
                println!("Today:   {} pages", stats.today_pages);
                println!("Total:   {} pages", stats.total_pages);
                println!("Entries: {}", stats.entries);
            }
            OutputFormat::Json => print_json(&stats),
            OutputFormat::Quiet => println!("{}", stats.today_pages),
        }
    }

    /// Print per-day totals, newest day first
    pub fn print_history(&self, days: &[(NaiveDate, u64)]) {
        match self.format {
            OutputFormat::Human => {
                if days.is_empty() {
                    println!("No readings yet.");
                    return;
                }
                for (date, pages) in days {
                    println!("{}  {:>5} pages", date.format("%Y-%m-%d %a"), pages);
                }
            }
            OutputFormat::Json => {
                let json_days: Vec<_> = days
                    .iter()
                    .map(|(date, pages)| {
                        serde_json::json!({"date": date.to_string(), "pages": pages})
                    })
                    .collect();
                print_json(&json_days);
            }
            OutputFormat::Quiet => {
                for (date, pages) in days {
                    println!("{} {}", date, pages);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Pretty-print a value as JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    print_lines(json_lines(value));
}

fn json_lines<T: Serialize + ?Sized>(value: &T) -> Vec<String> {
    match serde_json::to_string_pretty(value) {
        Ok(json) => vec![json],
        Err(e) => {
            eprintln!("Failed to encode JSON output: {}", e);
            Vec::new()
        }
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

/// Local date and time of a millisecond timestamp
pub fn format_timestamp(timestamp: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        None => "(invalid time)".to_string(),
    }
}

/// First eight characters of an id, enough to tell entries apart
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

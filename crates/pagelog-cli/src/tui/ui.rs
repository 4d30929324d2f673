//! UI rendering

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use pagelog_core::ReadingsView;

use super::app::App;
use crate::output::{format_timestamp, short_id};

/// Main UI rendering function
pub fn draw(frame: &mut Frame, app: &App, view: &ReadingsView, input: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_stats(frame, app, view, chunks[0]);
    draw_readings(frame, app, view, chunks[1]);
    draw_input(frame, view, input, chunks[2]);
    draw_status_bar(frame, app, view, chunks[3]);

    if app.show_help {
        draw_help_overlay(frame);
    }
}

/// Draw today/total pages (top)
fn draw_stats(frame: &mut Frame, app: &App, view: &ReadingsView, area: Rect) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let dim = Style::default().add_modifier(Modifier::DIM);

    let mut spans = vec![
        Span::raw("Today: "),
        Span::styled(view.today_pages.to_string(), bold.fg(Color::Green)),
        Span::raw(" pages    Total: "),
        Span::styled(view.total_pages.to_string(), bold),
        Span::raw(" pages"),
    ];
    if view.is_loading {
        spans.push(Span::styled("    ↻ loading", Style::default().fg(Color::Yellow)));
    }

    let user = view
        .user_id
        .as_ref()
        .map(|u| short_id(u.as_str()).to_string())
        .unwrap_or_else(|| "no identity".to_string());
    let title = Line::from(vec![
        Span::raw(" pagelog "),
        Span::styled(format!("[{} · {}] ", user, app.store_label), dim),
    ]);

    let block = Block::default().title(title).borders(Borders::ALL);
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

/// Draw the reading list, newest first (middle)
fn draw_readings(frame: &mut Frame, app: &App, view: &ReadingsView, area: Rect) {
    let items: Vec<ListItem> = view
        .readings
        .iter()
        .map(|reading| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format_timestamp(reading.timestamp),
                    Style::default().add_modifier(Modifier::DIM),
                ),
                Span::raw("  "),
                Span::styled(
                    format!("{:>4} pages", reading.pages),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
            ]))
        })
        .collect();

    let title = format!(" Readings ({}) ", view.readings.len());
    let block = Block::default().title(title).borders(Borders::ALL);

    if items.is_empty() {
        let message = if view.is_loading {
            "Loading..."
        } else if view.user_id.is_none() {
            "No identity: reading and writing are disabled."
        } else {
            "No readings yet. Type a page count and press Enter."
        };
        let paragraph = Paragraph::new(message)
            .style(Style::default().add_modifier(Modifier::DIM))
            .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let list = List::new(items).block(block).highlight_style(
        Style::default()
            .add_modifier(Modifier::BOLD)
            .add_modifier(Modifier::REVERSED),
    );

    let mut state = ListState::default();
    state.select(Some(app.selected));

    frame.render_stateful_widget(list, area, &mut state);
}

/// Draw the pages input (bottom)
fn draw_input(frame: &mut Frame, view: &ReadingsView, input: &str, area: Rect) {
    let title = if view.is_adding {
        " Pages read (adding...) "
    } else {
        " Pages read "
    };

    let style = if view.is_adding {
        Style::default().add_modifier(Modifier::DIM)
    } else {
        Style::default()
    };

    let block = Block::default().title(title).borders(Borders::ALL);
    frame.render_widget(Paragraph::new(Span::styled(input, style)).block(block), area);

    // Position cursor after the text
    let cursor_x = area.x + 1 + input.chars().count() as u16;
    frame.set_cursor_position((cursor_x.min(area.right().saturating_sub(2)), area.y + 1));
}

/// Draw the status bar at the very bottom
fn draw_status_bar(frame: &mut Frame, app: &App, view: &ReadingsView, area: Rect) {
    let paragraph = if let Some(msg) = &app.status_message {
        Paragraph::new(msg.clone()).style(Style::default().add_modifier(Modifier::DIM))
    } else if let Some(error) = &view.last_error {
        Paragraph::new(format!("Not updating: {}", error)).style(Style::default().fg(Color::Red))
    } else {
        Paragraph::new("0-9:pages  enter:add  d:del  j/k:move  ?:help  q:quit")
            .style(Style::default().add_modifier(Modifier::DIM))
    };

    frame.render_widget(paragraph, area);
}

/// Draw help overlay
fn draw_help_overlay(frame: &mut Frame) {
    let area = frame.area();

    // Calculate centered popup area
    let popup_width = 44.min(area.width.saturating_sub(4));
    let popup_height = 14.min(area.height.saturating_sub(4));
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the popup area
    frame.render_widget(Clear, popup_area);

    let help_text = vec![
        Line::from(vec![Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
        Line::from("  0-9         Type pages read"),
        Line::from("  Backspace   Edit input"),
        Line::from("  Enter       Add reading"),
        Line::from("  j/k, ↑/↓    Move selection"),
        Line::from("  d           Delete selected reading"),
        Line::from("  Esc         Clear input"),
        Line::from("  q           Quit"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "Press any key to close",
            Style::default().add_modifier(Modifier::DIM),
        )]),
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().add_modifier(Modifier::BOLD));

    let paragraph = Paragraph::new(help_text).block(block);
    frame.render_widget(paragraph, popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_core::{ReadingEntry, UserId};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn rendered(app: &App, view: &ReadingsView, input: &str) -> String {
        let mut terminal = Terminal::new(TestBackend::new(70, 16)).unwrap();
        terminal
            .draw(|frame| draw(frame, app, view, input))
            .unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_draws_stats_and_list() {
        let app = App::new("memory");
        let view = ReadingsView {
            readings: vec![ReadingEntry::new("b", 3, 2), ReadingEntry::new("a", 5, 1)],
            total_pages: 8,
            today_pages: 3,
            is_loading: false,
            is_adding: false,
            user_id: Some(UserId::new("user-1")),
            last_error: None,
        };

        let screen = rendered(&app, &view, "12");
        assert!(screen.contains("Today: 3 pages"));
        assert!(screen.contains("Total: 8 pages"));
        assert!(screen.contains("Readings (2)"));
        assert!(screen.contains("12"));
    }

    #[test]
    fn test_draws_identity_failure() {
        let app = App::new("memory");
        let view = ReadingsView {
            readings: vec![],
            total_pages: 0,
            today_pages: 0,
            is_loading: false,
            is_adding: false,
            user_id: None,
            last_error: None,
        };

        let screen = rendered(&app, &view, "");
        assert!(screen.contains("No identity"));
    }
}

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame,
};

use crate::app::Dashboard;

pub fn draw(f: &mut Frame, dash: &Dashboard) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40), // Services
            Constraint::Min(0),         // Tasks
            Constraint::Length(3),      // Refresh gauge
        ])
        .split(f.area());

    draw_table(f, chunks[0], dash.services_title(), &dash.tables.services);
    draw_table(f, chunks[1], "Tasks", &dash.tables.tasks);
    draw_gauge(f, chunks[2], dash);
}

fn draw_table(f: &mut Frame, area: Rect, title: &str, table: &str) {
    let pane = Paragraph::new(table_lines(table))
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    f.render_widget(pane, area);
}

/// Splits a rendered table into lines, highlighting the header row.
fn table_lines(table: &str) -> Vec<Line<'_>> {
    table
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                Line::from(Span::styled(
                    line,
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                ))
            } else {
                Line::from(line)
            }
        })
        .collect()
}

fn draw_gauge(f: &mut Frame, area: Rect, dash: &Dashboard) {
    let color = if dash.last_error.is_some() {
        Color::Red
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(dash.gauge_title()))
        .gauge_style(Style::default().fg(color))
        .ratio(dash.progress().clamp(0.0, 1.0))
        .label("");
    f.render_widget(gauge, area);
}

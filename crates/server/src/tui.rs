use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph};

use skirmish::Identifier;

use crate::server::{ClientInfo, ServerStats};

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct TuiState {
    log: VecDeque<LogEntry>,
    scroll: usize,
    selected: usize,
    pending_kick: Option<Identifier>,
    pub packet_loss_dropped: u64,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            level,
            message: message.into(),
        });
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev_connection(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + count - 1) % count;
        }
    }

    pub fn select_next_connection(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn request_kick(&mut self, clients: &[ClientInfo]) {
        if let Some(client) = clients.get(self.selected) {
            self.pending_kick = Some(client.player_id);
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<Identifier> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_status(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats, state.packet_loss_dropped);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[3]);
    render_clients(frame, middle[0], state, clients);
    render_log(frame, middle[1], state);

    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let uptime = format_duration(stats.uptime_secs);
    let title = format!(" Skirmish Server - Uptime: {} ", uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Players: {}  |  Entities: {}  |  Discovery: {}",
        stats.tick,
        stats.player_count,
        stats.entity_count,
        if stats.announcing { "on" } else { "off" }
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let max = stats.max_clients.max(1);
    let client_ratio = stats.client_count as f64 / max as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(client_ratio.min(1.0))
        .label(format!("{}/{} clients", stats.client_count, stats.max_clients));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats, simulated_drops: u64) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network_stats;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv / {} discarded",
                    net.packets_sent, net.packets_received, net.packets_discarded
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Reliability: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} resent / {} refused",
                    net.retransmissions, net.batches_rejected
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Simulated Loss: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} dropped", simulated_drops),
                Style::default().fg(if simulated_drops > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientInfo]) {
    let block = Block::default()
        .title(" Clients ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let items: Vec<ListItem> = clients
        .iter()
        .map(|client| {
            let lag_color = if client.last_seen_ms > 500 {
                Color::Red
            } else {
                Color::Green
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<16}", client.name),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!(" {:<8}", client.player_id.to_string()),
                    Style::default().fg(Color::Gray),
                ),
                Span::styled(
                    format!(" {:>5}ms", client.last_seen_ms),
                    Style::default().fg(lag_color),
                ),
                Span::styled(
                    format!(
                        " q:{:<3} rt:{:<4} {}",
                        client.reliable_backlog, client.stats.retransmissions, client.addr
                    ),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut list_state = ListState::default();
    if !clients.is_empty() {
        list_state.select(Some(state.selected.min(clients.len() - 1)));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);

    let lines: Vec<Line> = state
        .log
        .range(start..end)
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(
                entry.message.as_str(),
                Style::default().fg(color),
            ))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new(
        "q/Esc quit  |  Up/Down select client  |  k kick  |  PgUp/PgDn/End scroll events",
    )
    .block(block)
    .style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 10 {
            state.log_info(format!("line {i}"));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().unwrap().message, "line 10");
    }

    #[test]
    fn test_selection_wraps() {
        let mut state = TuiState::new();
        state.select_prev_connection(3);
        assert_eq!(state.selected, 2);
        state.select_next_connection(3);
        assert_eq!(state.selected, 0);
        state.select_next_connection(0);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration(3725), "01:02:05");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
    }
}

use std::net::SocketAddr;

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap};

use skirmish::{ConnectionState, EntityKind, Identifier, NetworkStats, ServerInfo};

use crate::session::{ChatLine, Session};

/// Half-width of the arena in world units.
const MAP_EXTENT: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    MainMenu,
    Browser,
    Connect,
    Session,
}

pub struct ConnectionView {
    pub state: ConnectionState,
    pub player_id: Option<Identifier>,
    pub server_addr: SocketAddr,
    pub lagging: bool,
    pub silence_ms: u64,
    pub stats: NetworkStats,
}

pub struct View<'a> {
    pub screen: Screen,
    pub selected: usize,
    pub player_name: &'a str,
    pub servers: &'a [ServerInfo],
    pub discovery_error: Option<&'a str>,
    pub connect_input: &'a str,
    pub connect_error: Option<&'a str>,
    pub connection: Option<ConnectionView>,
    pub session: &'a Session,
    pub chat_input: Option<&'a str>,
}

pub fn render(frame: &mut Frame, view: &View) {
    let area = frame.area();

    let block = Block::default()
        .title(" Skirmish ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    frame.render_widget(block, area);

    let inner = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints([Constraint::Min(0)])
        .split(area)[0];

    match view.screen {
        Screen::MainMenu => render_main_menu(frame, inner, view.selected, view.player_name),
        Screen::Browser => render_browser(frame, inner, view),
        Screen::Connect => render_connect(frame, inner, view.connect_input, view.connect_error),
        Screen::Session => render_session(frame, inner, view),
    }
}

fn render_main_menu(frame: &mut Frame, area: Rect, selected: usize, player_name: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(2),
        ])
        .split(area);

    let title = r#"
  ____  _  _____ ____  __  __ ___ ____  _   _
 / ___|| |/ /_ _|  _ \|  \/  |_ _/ ___|| | | |
 \___ \| ' / | || |_) | |\/| || |\___ \| |_| |
  ___) | . \ | ||  _ <| |  | || | ___) |  _  |
 |____/|_|\_\___|_| \_\_|  |_|___|____/|_| |_|
"#;

    let title_widget = Paragraph::new(title)
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Center);
    frame.render_widget(title_widget, chunks[0]);

    let name = Paragraph::new(format!("Playing as {player_name}"))
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    frame.render_widget(name, chunks[1]);

    let menu_items = vec![
        ListItem::new("  Server Browser"),
        ListItem::new("  Connect to Address"),
        ListItem::new("  Quit"),
    ];

    let menu_items: Vec<ListItem> = menu_items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            if i == selected {
                item.style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                item.style(Style::default().fg(Color::White))
            }
        })
        .collect();

    let menu = List::new(menu_items).block(
        Block::default()
            .title(" Menu ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    let menu_area = centered_rect(40, 8, chunks[2]);
    frame.render_widget(menu, menu_area);

    let help = Paragraph::new("↑↓ Navigate  Enter Select  Q Quit")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(help, chunks[3]);
}

fn render_browser(frame: &mut Frame, area: Rect, view: &View) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(2)])
        .split(area);

    let block = Block::default()
        .title(format!(" Servers on this network ({}) ", view.servers.len()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if let Some(err) = view.discovery_error {
        let text = Paragraph::new(err)
            .style(Style::default().fg(Color::Red))
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(text, chunks[0]);
    } else if view.servers.is_empty() {
        let text = Paragraph::new("Searching for servers...")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(text, chunks[0]);
    } else {
        let items: Vec<ListItem> = view
            .servers
            .iter()
            .enumerate()
            .map(|(i, server)| {
                let style = if i == view.selected {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };
                ListItem::new(format!("  {}", server.end_point)).style(style)
            })
            .collect();
        frame.render_widget(List::new(items).block(block), chunks[0]);
    }

    let help = Paragraph::new("↑↓ Navigate  Enter Join  A Enter Address  Esc Back")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(help, chunks[1]);
}

fn render_connect(frame: &mut Frame, area: Rect, input: &str, error: Option<&str>) {
    let dialog_area = centered_rect(50, 10, area);
    frame.render_widget(Clear, dialog_area);

    let dialog = Block::default()
        .title(" Connect to Server ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    frame.render_widget(dialog, dialog_area);

    let inner = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(dialog_area);

    let label = Paragraph::new("Server Address:").style(Style::default().fg(Color::White));
    frame.render_widget(label, inner[0]);

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let input_text = Paragraph::new(format!("{}_", input))
        .style(Style::default().fg(Color::White))
        .block(input_block);
    frame.render_widget(input_text, inner[1]);

    if let Some(err) = error {
        let error_text = Paragraph::new(err)
            .style(Style::default().fg(Color::Red))
            .alignment(Alignment::Center);
        frame.render_widget(error_text, inner[2]);
    }

    let help = Paragraph::new("Enter Connect  Esc Cancel")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(help, inner[3]);
}

fn render_session(frame: &mut Frame, area: Rect, view: &View) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(32), Constraint::Min(0)])
        .split(rows[0]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(0)])
        .split(columns[0]);

    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(columns[1]);

    render_status(frame, side[0], view.connection.as_ref(), view.session);
    render_players(frame, side[1], view.session);
    render_map(frame, main[0], view.session);
    render_chat(frame, main[1], view.session);
    render_input_line(frame, rows[1], view);
}

fn render_status(
    frame: &mut Frame,
    area: Rect,
    connection: Option<&ConnectionView>,
    session: &Session,
) {
    let block = Block::default()
        .title(" Connection ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let Some(conn) = connection else {
        frame.render_widget(Paragraph::new("Not connected").block(block), area);
        return;
    };

    let state_color = match conn.state {
        ConnectionState::Connected if conn.lagging => Color::Yellow,
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting | ConnectionState::Syncing => Color::Cyan,
        _ => Color::Red,
    };

    let mut lines = vec![
        Line::from(vec![
            Span::styled("State: ", Style::default().fg(Color::Gray)),
            Span::styled(
                conn.state.as_str(),
                Style::default().fg(state_color).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("Server: ", Style::default().fg(Color::Gray)),
            Span::raw(conn.server_addr.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Player: ", Style::default().fg(Color::Gray)),
            Span::raw(
                conn.player_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]),
        Line::from(Span::styled(
            format!(
                "{} sent / {} recv",
                conn.stats.packets_sent, conn.stats.packets_received
            ),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(Span::styled(
            format!("{} resent", conn.stats.retransmissions),
            Style::default().fg(Color::DarkGray),
        )),
    ];

    if let Some(avatar) = session.local_avatar() {
        lines.push(Line::from(vec![
            Span::styled("Pos: ", Style::default().fg(Color::Gray)),
            Span::raw(format!(
                "{:.1}, {:.1}",
                avatar.position.x, avatar.position.y
            )),
        ]));
    }

    if let Some(reason) = conn.state.failure_reason() {
        lines.push(Line::from(Span::styled(
            reason,
            Style::default().fg(Color::Red),
        )));
    } else if conn.lagging {
        lines.push(Line::from(Span::styled(
            format!("LAG {:.1}s", conn.silence_ms as f32 / 1000.0),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_players(frame: &mut Frame, area: Rect, session: &Session) {
    let block = Block::default()
        .title(" Players ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let local = session.local_player();
    let items: Vec<ListItem> = session
        .players()
        .map(|(id, name)| {
            let style = if Some(id) == local {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(format!("{name} ({id})")).style(style)
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn render_map(frame: &mut Frame, area: Rect, session: &Session) {
    let block = Block::default()
        .title(format!(" Arena ({} entities) ", session.entities().count()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let width = inner.width as usize;
    let height = inner.height as usize;
    if width == 0 || height == 0 {
        return;
    }

    let mut grid = vec![vec![(' ', Color::Reset); width]; height];
    let local = session.local_player();
    for (_, entity) in session.entities() {
        let col = ((entity.position.x + MAP_EXTENT) / (2.0 * MAP_EXTENT) * (width - 1) as f32)
            .round()
            .clamp(0.0, (width - 1) as f32) as usize;
        // Screen rows grow downward, world y grows upward.
        let row = ((MAP_EXTENT - entity.position.y) / (2.0 * MAP_EXTENT) * (height - 1) as f32)
            .round()
            .clamp(0.0, (height - 1) as f32) as usize;
        let cell = match entity.kind {
            EntityKind::Marker => ('+', Color::DarkGray),
            EntityKind::Avatar if Some(entity.owner) == local => ('@', Color::Yellow),
            EntityKind::Avatar => ('o', Color::Cyan),
        };
        // Avatars draw over markers.
        if grid[row][col].0 != '@' {
            grid[row][col] = cell;
        }
    }

    let lines: Vec<Line> = grid
        .into_iter()
        .map(|row| {
            Line::from(
                row.into_iter()
                    .map(|(c, color)| Span::styled(c.to_string(), Style::default().fg(color)))
                    .collect::<Vec<_>>(),
            )
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_chat(frame: &mut Frame, area: Rect, session: &Session) {
    let block = Block::default()
        .title(" Chat ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = session
        .chat()
        .map(|line| match line {
            ChatLine::Said { name, text } => Line::from(vec![
                Span::styled(format!("<{name}> "), Style::default().fg(Color::Cyan)),
                Span::raw(text.as_str()),
            ]),
            ChatLine::Notice(text) => Line::from(Span::styled(
                text.as_str(),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )),
        })
        .collect();
    let skip = lines.len().saturating_sub(visible);
    let lines: Vec<Line> = lines.into_iter().skip(skip).collect();

    frame.render_widget(
        Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn render_input_line(frame: &mut Frame, area: Rect, view: &View) {
    match view.chat_input {
        Some(input) => {
            let block = Block::default()
                .title(" Say ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow));
            frame.render_widget(
                Paragraph::new(format!("{input}_"))
                    .style(Style::default().fg(Color::White))
                    .block(block),
                area,
            );
        }
        None => {
            let block = Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray));
            let help = Paragraph::new("Arrows Move  T/Enter Chat  Esc/Q Leave")
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center)
                .block(block);
            frame.render_widget(help, area);
        }
    }
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

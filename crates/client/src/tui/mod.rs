mod screens;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use skirmish::{
    Buttons, ClientConfig, ConnectionState, DEFAULT_PORT, DiscoveryConfig, DiscoveryEvent,
    Identifier, MessageBody, ServerConnection, ServerDiscovery, ServerInfo,
};

use crate::session::Session;

pub use screens::Screen;
use screens::{ConnectionView, View};

const FRAME_MS: u64 = 16;

/// Terminals only report key presses, so a direction counts as held for
/// this long after its last press or auto-repeat.
const HOLD_MS: u64 = 150;

const MAIN_MENU_ITEMS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    Connect(SocketAddr),
    Disconnect,
    ChangeScreen(Screen),
}

pub struct Tui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    screen: Screen,
    config: ClientConfig,
    discovery_config: DiscoveryConfig,
    discovery: Option<ServerDiscovery>,
    discovery_error: Option<String>,
    connection: Option<ServerConnection>,
    last_state: Option<ConnectionState>,
    session: Session,
    connect_input: String,
    connect_error: Option<String>,
    chat_input: Option<String>,
    held: Vec<(Buttons, Instant)>,
    selected_index: usize,
    should_quit: bool,
}

impl Tui {
    pub fn new(config: ClientConfig, discovery_config: DiscoveryConfig) -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            screen: Screen::MainMenu,
            config,
            discovery_config,
            discovery: None,
            discovery_error: None,
            connection: None,
            last_state: None,
            session: Session::new(),
            connect_input: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_error: None,
            chat_input: None,
            held: Vec::new(),
            selected_index: 0,
            should_quit: false,
        })
    }

    pub fn run(&mut self, server: Option<SocketAddr>) -> io::Result<()> {
        if let Some(addr) = server {
            self.process_action(Action::Connect(addr))?;
        }

        while !self.should_quit {
            let frame_start = Instant::now();

            self.update_discovery();
            self.update_connection();
            self.draw()?;

            let timeout = Duration::from_millis(FRAME_MS).saturating_sub(frame_start.elapsed());
            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Release {
                        let action = self.handle_key(key.code, key.modifiers);
                        self.process_action(action)?;
                    }
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
        Ok(())
    }

    fn update_discovery(&mut self) {
        let Some(discovery) = &mut self.discovery else {
            return;
        };
        discovery.update();
        for event in discovery.drain_events() {
            match event {
                DiscoveryEvent::Discovered(addr) => log::debug!("Server up: {addr}"),
                DiscoveryEvent::Shutdown(addr) => log::debug!("Server gone: {addr}"),
            }
        }
        let count = discovery.server_count();
        if count > 0 {
            self.selected_index = self.selected_index.min(count - 1);
        }
    }

    fn update_connection(&mut self) {
        let Some(connection) = &mut self.connection else {
            return;
        };

        if connection.state() == ConnectionState::Connected {
            let buttons = held_buttons(&mut self.held);
            connection.enqueue(MessageBody::Input { buttons });
        }
        connection.update();

        self.session.sync(connection);

        let state = connection.state();
        if self.last_state != Some(state) {
            self.last_state = Some(state);
            match state.failure_reason() {
                Some(reason) => self.session.notice(format!("Disconnected: {reason}")),
                None => self.session.notice(state.as_str()),
            }
        }
    }

    fn draw(&mut self) -> io::Result<()> {
        let servers: Vec<ServerInfo> = self
            .discovery
            .as_ref()
            .map(|d| d.servers().copied().collect())
            .unwrap_or_default();
        let connection = self.connection.as_ref().map(|c| ConnectionView {
            state: c.state(),
            player_id: c.player_id(),
            server_addr: c.server_addr(),
            lagging: c.is_lagging(),
            silence_ms: c.millis_since_last_packet(),
            stats: c.stats(),
        });

        let view = View {
            screen: self.screen,
            selected: self.selected_index,
            player_name: &self.config.player_name,
            servers: &servers,
            discovery_error: self.discovery_error.as_deref(),
            connect_input: &self.connect_input,
            connect_error: self.connect_error.as_deref(),
            connection,
            session: &self.session,
            chat_input: self.chat_input.as_deref(),
        };

        self.terminal.draw(|frame| {
            screens::render(frame, &view);
        })?;

        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> Action {
        if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
            return Action::Quit;
        }

        match self.screen {
            Screen::MainMenu => self.handle_main_menu_key(code),
            Screen::Browser => self.handle_browser_key(code),
            Screen::Connect => self.handle_connect_key(code),
            Screen::Session => self.handle_session_key(code),
        }
    }

    fn handle_main_menu_key(&mut self, code: KeyCode) -> Action {
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_index = self.selected_index.saturating_sub(1);
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected_index = (self.selected_index + 1).min(MAIN_MENU_ITEMS - 1);
                Action::None
            }
            KeyCode::Enter => match self.selected_index {
                0 => Action::ChangeScreen(Screen::Browser),
                1 => Action::ChangeScreen(Screen::Connect),
                2 => Action::Quit,
                _ => Action::None,
            },
            KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
            _ => Action::None,
        }
    }

    fn handle_browser_key(&mut self, code: KeyCode) -> Action {
        let count = self.discovery.as_ref().map_or(0, |d| d.server_count());
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_index = self.selected_index.saturating_sub(1);
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if count > 0 {
                    self.selected_index = (self.selected_index + 1).min(count - 1);
                }
                Action::None
            }
            KeyCode::Enter => self
                .discovery
                .as_ref()
                .and_then(|d| d.servers().nth(self.selected_index))
                .map_or(Action::None, |info| Action::Connect(info.end_point)),
            KeyCode::Char('a') => Action::ChangeScreen(Screen::Connect),
            KeyCode::Esc | KeyCode::Char('q') => Action::ChangeScreen(Screen::MainMenu),
            _ => Action::None,
        }
    }

    fn handle_connect_key(&mut self, code: KeyCode) -> Action {
        match code {
            KeyCode::Esc => {
                self.connect_error = None;
                Action::ChangeScreen(Screen::MainMenu)
            }
            KeyCode::Enter => match parse_server_addr(&self.connect_input) {
                Some(addr) => {
                    self.connect_error = None;
                    Action::Connect(addr)
                }
                None => {
                    self.connect_error = Some("Invalid address format".to_string());
                    Action::None
                }
            },
            KeyCode::Backspace => {
                self.connect_input.pop();
                Action::None
            }
            KeyCode::Char(c) => {
                if c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '[' | ']') {
                    self.connect_input.push(c);
                }
                Action::None
            }
            _ => Action::None,
        }
    }

    fn handle_session_key(&mut self, code: KeyCode) -> Action {
        if let Some(input) = &mut self.chat_input {
            match code {
                KeyCode::Esc => self.chat_input = None,
                KeyCode::Enter => {
                    let text = input.trim().to_string();
                    self.chat_input = None;
                    if !text.is_empty() {
                        self.send_chat(text);
                    }
                }
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => {
                    if input.len() < skirmish::net::MAX_CHAT_LENGTH {
                        input.push(c);
                    }
                }
                _ => {}
            }
            return Action::None;
        }

        let now = Instant::now();
        match code {
            KeyCode::Up => press(&mut self.held, Buttons::UP, now),
            KeyCode::Down => press(&mut self.held, Buttons::DOWN, now),
            KeyCode::Left => press(&mut self.held, Buttons::LEFT, now),
            KeyCode::Right => press(&mut self.held, Buttons::RIGHT, now),
            KeyCode::Enter | KeyCode::Char('t') => {
                let connected = self
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.state() == ConnectionState::Connected);
                if connected {
                    self.chat_input = Some(String::new());
                }
            }
            KeyCode::Esc | KeyCode::Char('q') => return Action::Disconnect,
            _ => {}
        }
        Action::None
    }

    fn send_chat(&mut self, text: String) {
        if let Some(connection) = &mut self.connection {
            // The server stamps the sender.
            connection.enqueue(MessageBody::Chat {
                player_id: Identifier::default(),
                text,
            });
        }
    }

    fn process_action(&mut self, action: Action) -> io::Result<()> {
        match action {
            Action::None => {}
            Action::Quit => {
                self.should_quit = true;
            }
            Action::Connect(addr) => {
                self.connect_to_server(addr)?;
            }
            Action::Disconnect => {
                if let Some(connection) = self.connection.take() {
                    connection.disconnect();
                }
                self.session = Session::new();
                self.last_state = None;
                self.chat_input = None;
                self.held.clear();
                self.change_screen(Screen::MainMenu);
            }
            Action::ChangeScreen(screen) => self.change_screen(screen),
        }

        Ok(())
    }

    fn change_screen(&mut self, screen: Screen) {
        if screen == Screen::Browser && self.discovery.is_none() {
            match ServerDiscovery::bind(&self.discovery_config) {
                Ok(discovery) => {
                    self.discovery = Some(discovery);
                    self.discovery_error = None;
                }
                Err(e) => {
                    log::error!("Server discovery unavailable: {e}");
                    self.discovery_error = Some(format!("Discovery unavailable: {e}"));
                }
            }
        } else if screen != Screen::Browser {
            self.discovery = None;
        }
        self.screen = screen;
        self.selected_index = 0;
    }

    fn connect_to_server(&mut self, addr: SocketAddr) -> io::Result<()> {
        match ServerConnection::connect(addr, self.config.clone()) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.session = Session::new();
                self.last_state = None;
                self.change_screen(Screen::Session);
            }
            Err(e) => {
                self.connect_error = Some(format!("Connection failed: {e}"));
                self.change_screen(Screen::Connect);
            }
        }
        Ok(())
    }

    pub fn restore_terminal(&mut self) -> io::Result<()> {
        terminal::disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            cursor::Show
        )?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = self.restore_terminal();
    }
}

fn press(held: &mut Vec<(Buttons, Instant)>, button: Buttons, now: Instant) {
    held.retain(|(b, _)| *b != button);
    held.push((button, now));
}

fn held_buttons(held: &mut Vec<(Buttons, Instant)>) -> Buttons {
    let window = Duration::from_millis(HOLD_MS);
    held.retain(|(_, at)| at.elapsed() < window);
    held.iter().fold(Buttons::empty(), |acc, (b, _)| acc | *b)
}

/// Accepts `host:port` or a bare IP, which gets the default port.
fn parse_server_addr(input: &str) -> Option<SocketAddr> {
    let input = input.trim();
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Some(addr);
    }
    let ip = input.trim_start_matches('[').trim_end_matches(']');
    ip.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
}

pub fn run(
    config: ClientConfig,
    discovery_config: DiscoveryConfig,
    server: Option<SocketAddr>,
) -> io::Result<()> {
    let mut tui = Tui::new(config, discovery_config)?;
    let result = tui.run(server);
    tui.restore_terminal()?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_addr() {
        assert_eq!(
            parse_server_addr("10.0.0.2:4000"),
            Some(SocketAddr::from(([10, 0, 0, 2], 4000)))
        );
        assert_eq!(
            parse_server_addr("10.0.0.2"),
            Some(SocketAddr::from(([10, 0, 0, 2], DEFAULT_PORT)))
        );
        assert_eq!(
            parse_server_addr("[::1]:4000").map(|a| a.port()),
            Some(4000)
        );
        assert!(parse_server_addr("[::1]").is_some());
        assert!(parse_server_addr("nope").is_none());
    }

    #[test]
    fn test_held_buttons_expire() {
        let mut held = Vec::new();
        let now = Instant::now();
        press(&mut held, Buttons::UP, now);
        press(&mut held, Buttons::LEFT, now);
        press(&mut held, Buttons::UP, now);
        assert_eq!(held.len(), 2);
        assert_eq!(held_buttons(&mut held), Buttons::UP | Buttons::LEFT);

        let stale = now - Duration::from_millis(HOLD_MS * 2);
        press(&mut held, Buttons::LEFT, stale);
        assert_eq!(held_buttons(&mut held), Buttons::UP);
    }
}

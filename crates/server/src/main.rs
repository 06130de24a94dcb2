mod config;
mod events;
mod server;
mod tui;
mod world;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use server::GameServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "skirmish-server")]
#[command(about = "Skirmish game server")]
struct Args {
    #[arg(short, long, default_value = "::")]
    bind: String,

    #[arg(short, long, default_value_t = skirmish::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Server settings file (TOML)")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Do not announce the server on the local network")]
    no_announce: bool,

    #[arg(long, help = "Discovery beacons per minute")]
    beacon_frequency: Option<u32>,

    #[arg(long, help = "Enable outgoing packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(frequency) = self.beacon_frequency {
            config.discovery.beacon_frequency = frequency;
        }
        if self.no_announce {
            config.announce = false;
        }
        if self.simulate_packet_loss {
            config.packet_loss.enabled = true;
            config.packet_loss.loss_percent = self.loss_percent.clamp(0.0, 100.0);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let ip: IpAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", args.bind))?;
    let bind_addr = SocketAddr::new(ip, args.port);
    let config = args.server_config()?;

    let mut server = GameServer::new(bind_addr, config)
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        run_headless(&mut server);
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_headless(server: &mut GameServer) {
    let running = server.running();
    while running.load(Ordering::SeqCst) {
        server.tick_once();
        for event in server.drain_events() {
            if event.is_warning() {
                log::warn!("{}", event.describe());
            } else {
                log::info!("{}", event.describe());
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    log::info!("Server shutting down");
    server.shutdown_connections();
}

fn run_with_tui(server: &mut GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();

    if !server.stats().announcing {
        tui_state.log_warn("Discovery announcements disabled");
    }

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            if event.is_warning() {
                tui_state.log_warn(event.describe());
            } else {
                tui_state.log_info(event.describe());
            }
        }

        if let Some(player_id) = tui_state.take_pending_kick() {
            server.kick_client(player_id);
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let clients = server.client_infos();
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up => tui_state.select_prev_connection(clients.len()),
                        KeyCode::Down => tui_state.select_next_connection(clients.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            tui_state.request_kick(&clients);
                        }
                        _ => {}
                    }
                }
            }
        }

        tui_state.packet_loss_dropped = server.packet_loss_dropped();
        let stats = server.stats();
        let clients = server.client_infos();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    tui_state.log_info("Shutting down...");
    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

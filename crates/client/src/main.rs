mod session;
mod tui;

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;

use skirmish::{ClientConfig, DiscoveryConfig};

#[derive(Parser)]
#[command(name = "skirmish")]
#[command(about = "Skirmish game client")]
struct Args {
    #[arg(
        short,
        long,
        help = "Server address to connect to (e.g., 127.0.0.1:27015)"
    )]
    server: Option<String>,

    #[arg(short, long, help = "Player name shown to others")]
    name: Option<String>,

    #[arg(long, help = "Port the server browser listens on for beacons")]
    discovery_port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut config = ClientConfig::default();
    if let Some(name) = args.name {
        config.player_name = name;
    }

    let mut discovery = DiscoveryConfig::default();
    if let Some(port) = args.discovery_port {
        discovery.port = port;
    }

    let server = args
        .server
        .map(|addr| {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("invalid server address {addr:?}"))
        })
        .transpose()?;

    if let Err(e) = tui::run(config, discovery, server) {
        eprintln!("TUI error: {}", e);
        return Err(e.into());
    }

    log::info!("Exiting");
    Ok(())
}

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use skirmish::net::{LossyTransport, Transport, UdpTransport};
use skirmish::{
    Clock, DisconnectReason, HostEvent, Identifier, MessageBody, NetworkStats, ServerHost,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::world::World;

/// Frame deltas longer than this are clamped so a stall does not trigger a
/// burst of catch-up ticks.
const MAX_FRAME_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub player_count: usize,
    pub announcing: bool,
    pub network_stats: NetworkStats,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub player_id: Identifier,
    pub name: String,
    pub addr: String,
    pub last_seen_ms: u64,
    pub reliable_backlog: usize,
    pub stats: NetworkStats,
}

pub struct GameServer<T = LossyTransport<UdpTransport>, C = skirmish::net::SystemClock> {
    host: ServerHost<T, C>,
    world: World,
    config: ServerConfig,
    tick: u64,
    tick_ms: u64,
    last_frame_ms: u64,
    accumulator_ms: u64,
    start_ms: u64,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: SocketAddr, config: ServerConfig) -> io::Result<Self> {
        let socket = UdpTransport::bind(bind_addr)?;
        let transport = LossyTransport::new(socket, config.packet_loss.clone());
        let host = ServerHost::with_transport(
            transport,
            skirmish::net::SystemClock::new(),
            config.host_config(),
        );
        Ok(Self::with_host(host, config))
    }
}

impl<T: Transport, C: Clock> GameServer<T, C> {
    pub fn with_host(host: ServerHost<T, C>, config: ServerConfig) -> Self {
        let now = host.now_ms();
        let mut pending_events = VecDeque::new();
        if let Ok(addr) = host.local_addr() {
            pending_events.push_back(ServerEvent::Started { addr });
        }

        Self {
            host,
            world: World::new(),
            tick: 0,
            tick_ms: config.tick_ms(),
            last_frame_ms: now,
            accumulator_ms: 0,
            start_ms: now,
            running: Arc::new(AtomicBool::new(true)),
            pending_events,
            config,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.host.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn shutdown_connections(&mut self) {
        for player_id in self.host.connections().ids() {
            self.kick_client(player_id);
        }
        self.host.flush();
    }

    pub fn kick_client(&mut self, player_id: Identifier) {
        if self.host.kick(player_id) {
            self.process_host_events();
        }
    }

    /// Receives, runs every simulation tick that is due, then sends.
    pub fn tick_once(&mut self) {
        let now = self.host.now_ms();
        let delta = now.saturating_sub(self.last_frame_ms).min(MAX_FRAME_MS);
        self.last_frame_ms = now;
        self.accumulator_ms += delta;

        self.host.receive();
        self.process_host_events();

        while self.accumulator_ms >= self.tick_ms {
            self.accumulator_ms -= self.tick_ms;
            self.tick();
        }

        self.host.flush();
    }

    fn tick(&mut self) {
        let dt = self.tick_ms as f32 / 1000.0;
        self.world.step(dt);
        self.tick += 1;

        let updates = self.world.position_updates();
        self.host.broadcast_batch(&updates);
    }

    fn process_host_events(&mut self) {
        let events: Vec<HostEvent> = self.host.drain_events().collect();
        for event in events {
            self.handle_host_event(event);
        }
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Connected {
                player_id,
                name,
                addr,
            } => self.handle_connected(player_id, name, addr),
            HostEvent::Rejected { addr, reason } => {
                self.pending_events
                    .push_back(ServerEvent::ConnectionDenied { addr, reason });
            }
            HostEvent::Message { player_id, message } => match message.body {
                MessageBody::Chat { text, .. } => self.handle_chat(player_id, text),
                MessageBody::Input { buttons } => self.world.apply_input(player_id, buttons),
                other => log::debug!("Ignoring {:?} from {player_id}", other.message_type()),
            },
            HostEvent::Disconnected { player_id, reason } => {
                self.handle_disconnected(player_id, reason);
            }
        }
    }

    fn handle_connected(&mut self, player_id: Identifier, name: String, addr: SocketAddr) {
        let Some(avatar) = self.world.add_player(player_id, name.clone()) else {
            log::error!("No room for an avatar for {player_id}, kicking");
            self.host.kick(player_id);
            return;
        };

        // The host already queued the player's own join.
        let others: Vec<Identifier> = self
            .world
            .players()
            .map(|(id, _)| id)
            .filter(|id| *id != player_id)
            .collect();
        let joins: Vec<MessageBody> = others
            .iter()
            .filter_map(|&id| {
                let player = self.world.player(id)?;
                Some(MessageBody::Join {
                    player_id: id,
                    name: player.name.clone(),
                })
            })
            .collect();
        self.host.send_batch(player_id, joins);
        self.host.send_batch(player_id, self.world.spawn_messages());
        self.host.send(player_id, MessageBody::Synced);

        // Only players already in the world; peers whose own connect is
        // still pending get this player through their snapshot instead.
        let spawn = self.world.spawn_message(avatar);
        for other in others {
            self.host.send(
                other,
                MessageBody::Join {
                    player_id,
                    name: name.clone(),
                },
            );
            self.host.send_batch(other, spawn.clone());
        }

        self.pending_events.push_back(ServerEvent::ClientConnected {
            player_id,
            name,
            addr,
        });
    }

    fn handle_chat(&mut self, player_id: Identifier, text: String) {
        let Some(player) = self.world.player(player_id) else {
            return;
        };
        let name = player.name.clone();

        self.host.broadcast(MessageBody::Chat {
            player_id,
            text: text.clone(),
        });
        self.pending_events.push_back(ServerEvent::Chat {
            player_id,
            name,
            text,
        });
    }

    fn handle_disconnected(&mut self, player_id: Identifier, reason: DisconnectReason) {
        let Some(player) = self.world.remove_player(player_id) else {
            return;
        };

        self.host.broadcast_batch(&[MessageBody::DespawnEntity {
            entity_id: player.avatar,
        }]);
        self.host.broadcast(MessageBody::Leave { player_id });

        self.pending_events.push_back(ServerEvent::ClientDisconnected {
            player_id,
            name: player.name,
            reason,
        });
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            uptime_secs: self.host.now_ms().saturating_sub(self.start_ms) / 1000,
            client_count: self.host.connections().len(),
            max_clients: self.config.max_clients,
            entity_count: self.world.entity_count(),
            player_count: self.world.player_count(),
            announcing: self.host.is_announcing(),
            network_stats: self.host.stats(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        let now = self.host.now_ms();
        self.host
            .connections()
            .iter()
            .map(|peer| ClientInfo {
                player_id: peer.player_id(),
                name: peer.name().to_string(),
                addr: peer.addr().to_string(),
                last_seen_ms: peer.millis_since_last_packet(now),
                reliable_backlog: peer.reliable_backlog(),
                stats: peer.stats(),
            })
            .collect()
    }
}

impl<C: Clock> GameServer<LossyTransport<UdpTransport>, C> {
    pub fn packet_loss_dropped(&mut self) -> u64 {
        self.host.transport_mut().dropped()
    }
}

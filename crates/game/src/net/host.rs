use std::collections::{HashMap, VecDeque};
use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};

use bytes::BytesMut;

use super::clock::{Clock, SystemClock};
use super::config::HostConfig;
use super::discovery::ServerAnnouncer;
use super::identifier::{Arena, Identifier};
use super::message::{Message, MessageBody, RejectReason};
use super::packet::read_packet;
use super::protocol::{MAX_PACKET_SIZE, PROTOCOL_REVISION};
use super::queue::MessageQueue;
use super::transport::{NetworkStats, Transport, UdpTransport};

/// Peers that have heard nothing from us for this long get an empty packet.
pub const KEEPALIVE_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The peer's own `Join` is already queued as its reliable sequence 1.
    Connected {
        player_id: Identifier,
        name: String,
        addr: SocketAddr,
    },
    Rejected {
        addr: SocketAddr,
        reason: RejectReason,
    },
    /// A server-bound message (chat or input) from a connected peer.
    Message {
        player_id: Identifier,
        message: Message,
    },
    Disconnected {
        player_id: Identifier,
        reason: DisconnectReason,
    },
}

#[derive(Debug)]
pub struct ClientPeer {
    addr: SocketAddr,
    player_id: Identifier,
    name: String,
    queue: MessageQueue,
    last_receive_ms: u64,
    last_send_ms: u64,
    ack_sent: u32,
    stats: NetworkStats,
}

impl ClientPeer {
    fn new(addr: SocketAddr, name: String, queue: MessageQueue, now_ms: u64) -> Self {
        Self {
            addr,
            player_id: Identifier::default(),
            name,
            queue,
            last_receive_ms: now_ms,
            last_send_ms: now_ms,
            ack_sent: 0,
            stats: NetworkStats::default(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn player_id(&self) -> Identifier {
        self.player_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn millis_since_last_packet(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_receive_ms)
    }

    pub fn reliable_backlog(&self) -> usize {
        self.queue.reliable_len()
    }

    fn needs_packet(&self, now_ms: u64) -> bool {
        self.queue.has_pending_data()
            || self.queue.delivery().last_received_reliable() != self.ack_sent
            || now_ms.saturating_sub(self.last_send_ms) >= KEEPALIVE_INTERVAL_MS
    }
}

/// Connected peers, addressable by player identifier or by address.
#[derive(Debug)]
pub struct ConnectionManager {
    clients: Arena<ClientPeer>,
    clients_by_addr: HashMap<SocketAddr, Identifier>,
    max_clients: usize,
    timeout_ms: u64,
}

impl ConnectionManager {
    pub fn new(max_clients: usize, timeout_ms: u64) -> Self {
        Self {
            clients: Arena::new(),
            clients_by_addr: HashMap::new(),
            max_clients: max_clients.min(Arena::<ClientPeer>::MAX_SLOTS),
            timeout_ms,
        }
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    fn insert(&mut self, peer: ClientPeer) -> Option<Identifier> {
        if self.is_full() {
            return None;
        }

        let addr = peer.addr;
        let id = self.clients.insert(peer)?;
        if let Some(peer) = self.clients.get_mut(id) {
            peer.player_id = id;
        }
        self.clients_by_addr.insert(addr, id);
        Some(id)
    }

    pub fn id_by_addr(&self, addr: &SocketAddr) -> Option<Identifier> {
        self.clients_by_addr.get(addr).copied()
    }

    pub fn get(&self, player_id: Identifier) -> Option<&ClientPeer> {
        self.clients.get(player_id)
    }

    fn get_mut(&mut self, player_id: Identifier) -> Option<&mut ClientPeer> {
        self.clients.get_mut(player_id)
    }

    fn remove(&mut self, player_id: Identifier) -> Option<ClientPeer> {
        let peer = self.clients.remove(player_id)?;
        self.clients_by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientPeer> {
        self.clients.iter().map(|(_, peer)| peer)
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientPeer> {
        self.clients.iter_mut().map(|(_, peer)| peer)
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.clients.ids()
    }

    fn timed_out(&self, now_ms: u64) -> Vec<Identifier> {
        self.iter()
            .filter(|peer| peer.millis_since_last_packet(now_ms) > self.timeout_ms)
            .map(ClientPeer::player_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Server side of the protocol over a single socket.
pub struct ServerHost<T = UdpTransport, C = SystemClock> {
    transport: T,
    clock: C,
    config: HostConfig,
    connections: ConnectionManager,
    announcer: Option<ServerAnnouncer>,
    events: VecDeque<HostEvent>,
    recv_buffer: Vec<u8>,
    send_buffer: BytesMut,
    stats: NetworkStats,
}

impl ServerHost {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: HostConfig) -> io::Result<Self> {
        let transport = UdpTransport::bind(addr)?;
        Ok(Self::with_transport(transport, SystemClock::new(), config))
    }
}

impl<T: Transport, C: Clock> ServerHost<T, C> {
    pub fn with_transport(transport: T, clock: C, config: HostConfig) -> Self {
        let announcer = config
            .announce
            .then(|| ServerAnnouncer::new(&config.discovery));

        Self {
            transport,
            clock,
            connections: ConnectionManager::new(config.max_clients, config.timeout_ms),
            announcer,
            events: VecDeque::new(),
            recv_buffer: vec![0u8; config.max_packet_size.max(MAX_PACKET_SIZE)],
            send_buffer: BytesMut::with_capacity(config.max_packet_size),
            stats: NetworkStats::default(),
            config,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn peer(&self, player_id: Identifier) -> Option<&ClientPeer> {
        self.connections.get(player_id)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn is_announcing(&self) -> bool {
        self.announcer.is_some()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = HostEvent> + '_ {
        self.events.drain(..)
    }

    /// Drains the socket, then removes peers that went silent.
    pub fn receive(&mut self) {
        let mut buffer = mem::take(&mut self.recv_buffer);
        loop {
            match self.transport.try_receive(&mut buffer) {
                Ok(Some((size, from))) => self.handle_datagram(&buffer[..size], from),
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    log::debug!("Ignoring connection reset on server socket");
                }
                Err(e) => {
                    log::error!("Server socket receive failed: {e}");
                    break;
                }
            }
        }
        self.recv_buffer = buffer;

        let now = self.clock.now_ms();
        for player_id in self.connections.timed_out(now) {
            self.remove_peer(player_id, DisconnectReason::Timeout);
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let now = self.clock.now_ms();
        match self.connections.id_by_addr(&from) {
            Some(player_id) => self.handle_peer_datagram(player_id, data, now),
            None => self.handle_new_sender(data, from, now),
        }
    }

    fn handle_peer_datagram(&mut self, player_id: Identifier, data: &[u8], now: u64) {
        let Some(peer) = self.connections.get_mut(player_id) else {
            return;
        };

        let mut admitted = Vec::new();
        let Some(summary) = read_packet(peer.queue.delivery_mut(), data, |m| admitted.push(m))
        else {
            self.stats.packets_discarded += 1;
            return;
        };
        peer.queue.prune_acknowledged();

        peer.last_receive_ms = now;
        peer.stats.record_received(data.len());
        peer.stats.messages_delivered += summary.delivered as u64;
        peer.stats.batches_rejected += summary.rejected_batches as u64;
        self.stats.record_received(data.len());
        self.stats.messages_delivered += summary.delivered as u64;
        self.stats.batches_rejected += summary.rejected_batches as u64;

        for message in admitted {
            if !self.dispatch(player_id, message) {
                break;
            }
        }
    }

    fn handle_new_sender(&mut self, data: &[u8], from: SocketAddr, now: u64) {
        let mut queue = MessageQueue::with_max_packet_size(self.config.max_packet_size);
        let mut admitted = Vec::new();
        if read_packet(queue.delivery_mut(), data, |m| admitted.push(m)).is_none() {
            self.stats.packets_discarded += 1;
            return;
        }

        let mut admitted = admitted.into_iter();
        let Some(Message {
            sequence_number: 1,
            body: MessageBody::Connect { revision, name },
            ..
        }) = admitted.next()
        else {
            log::debug!("Ignoring packet from unconnected {from}");
            self.stats.packets_discarded += 1;
            return;
        };
        self.stats.record_received(data.len());

        if revision != PROTOCOL_REVISION {
            log::warn!(
                "Rejecting {from}: protocol revision {revision}, expected {PROTOCOL_REVISION}"
            );
            self.reject(queue, from, RejectReason::VersionMismatch);
            return;
        }

        let peer = ClientPeer::new(from, name.clone(), queue, now);
        let Some(player_id) = self.connections.insert(peer) else {
            log::warn!("Rejecting {from}: server full");
            let queue = MessageQueue::with_max_packet_size(self.config.max_packet_size);
            self.reject(queue, from, RejectReason::Full);
            return;
        };
        self.send(
            player_id,
            MessageBody::Join {
                player_id,
                name: name.clone(),
            },
        );

        log::info!("Client {player_id} ({name:?}) connected from {from}");
        self.events.push_back(HostEvent::Connected {
            player_id,
            name,
            addr: from,
        });

        for message in admitted {
            if !self.dispatch(player_id, message) {
                break;
            }
        }
    }

    /// Sends a rejection from a queue that is never reused, so the reject
    /// carries reliable sequence number 1.
    fn reject(&mut self, mut queue: MessageQueue, addr: SocketAddr, reason: RejectReason) {
        queue.enqueue(MessageBody::Reject { reason });
        self.send_buffer.clear();
        let size = queue.write_packet(&mut self.send_buffer, self.clock.timestamp());
        match self.transport.send_to(&self.send_buffer[..size], addr) {
            Ok(_) => self.stats.record_sent(size),
            Err(e) => log::warn!("Failed to send rejection to {addr}: {e}"),
        }
        self.events.push_back(HostEvent::Rejected { addr, reason });
    }

    /// Returns false once the peer is gone.
    fn dispatch(&mut self, player_id: Identifier, message: Message) -> bool {
        match message.body {
            MessageBody::Disconnect => {
                self.remove_peer(player_id, DisconnectReason::Graceful);
                false
            }
            MessageBody::Chat { .. } | MessageBody::Input { .. } => {
                self.events
                    .push_back(HostEvent::Message { player_id, message });
                true
            }
            _ => {
                log::warn!(
                    "Client {player_id} sent unexpected {:?}",
                    message.message_type()
                );
                true
            }
        }
    }

    fn remove_peer(&mut self, player_id: Identifier, reason: DisconnectReason) {
        if let Some(peer) = self.connections.remove(player_id) {
            log::info!(
                "Client {player_id} ({}) {}",
                peer.name,
                reason.as_str()
            );
            self.events
                .push_back(HostEvent::Disconnected { player_id, reason });
        }
    }

    /// Queues a message for one peer. Returns false if the peer is unknown.
    pub fn send(&mut self, player_id: Identifier, body: MessageBody) -> bool {
        match self.connections.get_mut(player_id) {
            Some(peer) => {
                peer.queue.enqueue(body);
                true
            }
            None => false,
        }
    }

    pub fn send_batch(
        &mut self,
        player_id: Identifier,
        bodies: impl IntoIterator<Item = MessageBody>,
    ) -> bool {
        match self.connections.get_mut(player_id) {
            Some(peer) => {
                peer.queue.enqueue_batch(bodies);
                true
            }
            None => false,
        }
    }

    pub fn broadcast(&mut self, body: MessageBody) {
        for peer in self.connections.iter_mut() {
            peer.queue.enqueue(body.clone());
        }
    }

    pub fn broadcast_batch(&mut self, bodies: &[MessageBody]) {
        if bodies.is_empty() {
            return;
        }
        for peer in self.connections.iter_mut() {
            peer.queue.enqueue_batch(bodies.iter().cloned());
        }
    }

    /// Drops a peer without notice; its client will time out.
    pub fn kick(&mut self, player_id: Identifier) -> bool {
        if self.connections.get(player_id).is_none() {
            return false;
        }
        self.remove_peer(player_id, DisconnectReason::Kicked);
        true
    }

    /// Sends one packet to every peer that has data, owes an acknowledgment,
    /// or is due a keepalive, then announces the server if a beacon is due.
    pub fn flush(&mut self) {
        let now = self.clock.now_ms();
        let timestamp = self.clock.timestamp();

        for peer in self.connections.iter_mut() {
            if !peer.needs_packet(now) {
                continue;
            }

            self.send_buffer.clear();
            let size = peer.queue.write_packet(&mut self.send_buffer, timestamp);
            match self.transport.send_to(&self.send_buffer[..size], peer.addr) {
                Ok(_) => {
                    peer.last_send_ms = now;
                    peer.ack_sent = peer.queue.delivery().last_received_reliable();
                    peer.stats.record_sent(size);
                    peer.stats.retransmissions = peer.queue.retransmissions();
                    self.stats.record_sent(size);
                }
                Err(e) => log::warn!("Send to {} failed: {e}", peer.addr),
            }
        }

        if let Some(announcer) = &mut self.announcer {
            match announcer.announce(&mut self.transport, now) {
                Ok(true) => log::trace!("Announced server to {}", announcer.target()),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Disabling server announcements: {e}");
                    self.announcer = None;
                }
            }
        }

        self.stats.retransmissions = self
            .connections
            .iter()
            .map(|peer| peer.stats.retransmissions)
            .sum();
    }
}

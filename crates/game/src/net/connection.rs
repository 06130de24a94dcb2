use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;

use super::clock::{Clock, SystemClock};
use super::config::ClientConfig;
use super::identifier::Identifier;
use super::message::{Message, MessageBody, RejectReason};
use super::packet::read_packet;
use super::protocol::{MAX_PACKET_SIZE, PROTOCOL_REVISION};
use super::queue::MessageQueue;
use super::transport::{NetworkStats, Transport, UdpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Syncing,
    Connected,
    Faulted,
    Full,
    Dropped,
    VersionMismatch,
}

impl ConnectionState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Syncing | Self::Connected)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Syncing => "syncing",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
            Self::Full => "full",
            Self::Dropped => "dropped",
            Self::VersionMismatch => "version mismatch",
        }
    }

    /// Human readable reason for a terminal state.
    pub fn failure_reason(self) -> Option<&'static str> {
        match self {
            Self::Faulted => Some("network error"),
            Self::Full => Some("server is full"),
            Self::Dropped => Some("connection lost"),
            Self::VersionMismatch => Some("version mismatch"),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client side of a session with one server.
///
/// Drive it by calling [`receive`](Self::receive) and [`send`](Self::send)
/// once per frame. Messages that are not part of the handshake are buffered
/// for the application in [`drain_messages`](Self::drain_messages).
pub struct ServerConnection<T = UdpTransport, C = SystemClock> {
    transport: T,
    clock: C,
    server_addr: SocketAddr,
    config: ClientConfig,
    state: ConnectionState,
    queue: MessageQueue,
    incoming: VecDeque<Message>,
    player_id: Option<Identifier>,
    player_name: Option<String>,
    last_receive_ms: u64,
    recv_buffer: Vec<u8>,
    send_buffer: BytesMut,
    stats: NetworkStats,
}

impl ServerConnection {
    pub fn connect(server_addr: SocketAddr, config: ClientConfig) -> io::Result<Self> {
        let transport = UdpTransport::for_peer(server_addr)?;
        Ok(Self::with_transport(
            transport,
            SystemClock::new(),
            server_addr,
            config,
        ))
    }
}

impl<T: Transport, C: Clock> ServerConnection<T, C> {
    pub fn with_transport(
        transport: T,
        clock: C,
        server_addr: SocketAddr,
        config: ClientConfig,
    ) -> Self {
        let mut queue = MessageQueue::with_max_packet_size(config.max_packet_size);
        queue.enqueue(MessageBody::Connect {
            revision: PROTOCOL_REVISION,
            name: config.player_name.clone(),
        });

        log::info!("Connecting to {} as {:?}", server_addr, config.player_name);

        Self {
            last_receive_ms: clock.now_ms(),
            transport,
            clock,
            server_addr,
            recv_buffer: vec![0u8; config.max_packet_size.max(MAX_PACKET_SIZE)],
            send_buffer: BytesMut::with_capacity(config.max_packet_size),
            config,
            state: ConnectionState::Connecting,
            queue,
            incoming: VecDeque::new(),
            player_id: None,
            player_name: None,
            stats: NetworkStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Our player identifier, known once the server has accepted us.
    pub fn player_id(&self) -> Option<Identifier> {
        self.player_id
    }

    /// Name the server accepted us under, possibly truncated on the wire.
    pub fn player_name(&self) -> Option<&str> {
        self.player_name.as_deref()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn millis_since_last_packet(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.last_receive_ms)
    }

    pub fn is_lagging(&self) -> bool {
        self.millis_since_last_packet() > self.config.lag_threshold_ms
    }

    pub fn enqueue(&mut self, body: MessageBody) -> u32 {
        self.queue.enqueue(body)
    }

    pub fn enqueue_batch(&mut self, bodies: impl IntoIterator<Item = MessageBody>) {
        self.queue.enqueue_batch(bodies);
    }

    pub fn drain_messages(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.incoming.drain(..)
    }

    pub fn update(&mut self) {
        self.receive();
        self.send();
    }

    /// Reads every waiting datagram, then checks for a silent server.
    pub fn receive(&mut self) {
        if !self.state.is_active() {
            return;
        }

        loop {
            match self.transport.try_receive(&mut self.recv_buffer) {
                Ok(Some((size, from))) => {
                    if from != self.server_addr {
                        log::debug!("Ignoring {size} bytes from unexpected sender {from}");
                        self.stats.packets_discarded += 1;
                        continue;
                    }
                    self.process_packet(size);
                    if !self.state.is_active() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.fault("receive", e);
                    return;
                }
            }
        }

        let silent_for = self.millis_since_last_packet();
        if silent_for > self.config.dropped_timeout_ms {
            log::warn!(
                "No packets from {} for {silent_for}ms, giving up",
                self.server_addr
            );
            self.transition(ConnectionState::Dropped);
        }
    }

    fn process_packet(&mut self, size: usize) {
        let mut admitted = Vec::new();
        let summary = read_packet(
            self.queue.delivery_mut(),
            &self.recv_buffer[..size],
            |message| admitted.push(message),
        );

        let Some(summary) = summary else {
            self.stats.packets_discarded += 1;
            return;
        };
        self.queue.prune_acknowledged();

        self.last_receive_ms = self.clock.now_ms();
        self.stats.record_received(size);
        self.stats.messages_delivered += summary.delivered as u64;
        self.stats.batches_rejected += summary.rejected_batches as u64;

        for message in admitted {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: Message) {
        if !self.state.is_active() {
            return;
        }

        match &message.body {
            MessageBody::Join { player_id, name } if message.sequence_number == 1 => {
                if self.state == ConnectionState::Connecting {
                    log::info!("Accepted as {name:?} ({player_id})");
                    self.player_id = Some(*player_id);
                    self.player_name = Some(name.clone());
                    self.transition(ConnectionState::Syncing);
                } else {
                    log::warn!("Unexpected join acceptance while {}", self.state);
                }
            }
            MessageBody::Synced => {
                if self.state == ConnectionState::Syncing {
                    self.transition(ConnectionState::Connected);
                } else {
                    log::warn!("Unexpected sync completion while {}", self.state);
                }
            }
            MessageBody::Reject { reason } => {
                if self.state == ConnectionState::Connecting {
                    log::warn!("Server {} rejected us: {reason:?}", self.server_addr);
                    self.transition(match reason {
                        RejectReason::Full => ConnectionState::Full,
                        RejectReason::VersionMismatch => ConnectionState::VersionMismatch,
                    });
                } else {
                    log::warn!("Ignoring rejection while {}", self.state);
                }
            }
            MessageBody::Connect { .. } | MessageBody::Disconnect | MessageBody::Input { .. } => {
                log::warn!(
                    "Server sent client-only message {:?}",
                    message.message_type()
                );
            }
            _ => self.incoming.push_back(message),
        }
    }

    /// Sends one packet if the state calls for it.
    ///
    /// During the handshake a packet goes out every call, even an empty one,
    /// so the server keeps hearing from us. Once connected only pending data
    /// is sent.
    pub fn send(&mut self) {
        let should_send = match self.state {
            ConnectionState::Connecting | ConnectionState::Syncing => true,
            ConnectionState::Connected => self.queue.has_pending_data(),
            _ => false,
        };
        if should_send {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.send_buffer.clear();
        let timestamp = self.clock.timestamp();
        let size = self.queue.write_packet(&mut self.send_buffer, timestamp);

        match self.transport.send_to(&self.send_buffer[..size], self.server_addr) {
            Ok(_) => {
                self.stats.record_sent(size);
                self.stats.retransmissions = self.queue.retransmissions();
            }
            Err(e) => self.fault("send", e),
        }
    }

    /// Tells the server we are leaving. Best effort: the packet is sent once.
    pub fn disconnect(mut self) {
        if self.state.is_active() {
            self.queue.enqueue(MessageBody::Disconnect);
            self.flush();
        }
        log::info!("Disconnected from {}", self.server_addr);
    }

    fn fault(&mut self, operation: &str, error: io::Error) {
        log::error!(
            "Socket {operation} to {} failed: {error}",
            self.server_addr
        );
        self.transition(ConnectionState::Faulted);
    }

    fn transition(&mut self, next: ConnectionState) {
        log::info!("Connection to {}: {} -> {}", self.server_addr, self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::clock::ManualClock;
    use crate::net::protocol::{DROPPED_TIMEOUT_MS, HEADER_SIZE};
    use crate::net::simulator::{MemoryNetwork, MemoryTransport};

    const SERVER: ([u8; 4], u16) = ([10, 0, 0, 1], 27015);
    const CLIENT: ([u8; 4], u16) = ([10, 0, 0, 2], 50000);

    struct FakeServer {
        transport: MemoryTransport,
        queue: MessageQueue,
    }

    impl FakeServer {
        fn send(&mut self, bodies: Vec<MessageBody>) {
            self.queue.enqueue_batch(bodies);
            let mut buf = BytesMut::new();
            let size = self.queue.write_packet(&mut buf, 0);
            self.transport.send_to(&buf[..size], CLIENT.into()).unwrap();
        }

        fn receive(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            while let Some((size, _)) = self.transport.try_receive(&mut buf).unwrap() {
                read_packet(self.queue.delivery_mut(), &buf[..size], |m| out.push(m));
            }
            out
        }
    }

    fn setup() -> (
        MemoryNetwork,
        ManualClock,
        FakeServer,
        ServerConnection<MemoryTransport, ManualClock>,
    ) {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(1_000);
        let server = FakeServer {
            transport: network.endpoint(SERVER.into()),
            queue: MessageQueue::new(),
        };
        let config = ClientConfig {
            player_name: "alice".into(),
            ..Default::default()
        };
        let connection = ServerConnection::with_transport(
            network.endpoint(CLIENT.into()),
            clock.clone(),
            SERVER.into(),
            config,
        );
        (network, clock, server, connection)
    }

    fn join(id: u16, name: &str) -> MessageBody {
        MessageBody::Join {
            player_id: Identifier::new(id, 0),
            name: name.into(),
        }
    }

    #[test]
    fn test_handshake_reaches_connected() {
        let (_network, clock, mut server, mut conn) = setup();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.send();
        let received = server.receive();
        assert_eq!(
            received[0].body,
            MessageBody::Connect {
                revision: PROTOCOL_REVISION,
                name: "alice".into()
            }
        );

        server.send(vec![join(3, "alice"), join(1, "bob")]);
        clock.advance(10);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Syncing);
        assert_eq!(conn.player_id(), Some(Identifier::new(3, 0)));
        assert_eq!(conn.player_name(), Some("alice"));

        server.send(vec![MessageBody::Synced]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Connected);

        let messages: Vec<Message> = conn.drain_messages().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, join(1, "bob"));
    }

    #[test]
    fn test_dropped_after_silence() {
        let (_network, clock, mut server, mut conn) = setup();
        server.send(vec![join(1, "alice"), MessageBody::Synced]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Connected);

        clock.advance(DROPPED_TIMEOUT_MS);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Connected);

        clock.advance(1);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Dropped);
        assert_eq!(conn.state().failure_reason(), Some("connection lost"));
    }

    #[test]
    fn test_rejection_is_terminal() {
        let (network, _clock, mut server, mut conn) = setup();
        server.send(vec![MessageBody::Reject {
            reason: RejectReason::Full,
        }]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Full);

        conn.send();
        assert_eq!(network.pending(SERVER.into()), 0);

        let (_network, _clock, mut server, mut conn) = setup();
        server.send(vec![MessageBody::Reject {
            reason: RejectReason::VersionMismatch,
        }]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::VersionMismatch);
    }

    #[test]
    fn test_rejection_ignored_once_connected() {
        let (_network, _clock, mut server, mut conn) = setup();
        server.send(vec![join(1, "alice"), MessageBody::Synced]);
        conn.receive();

        server.send(vec![MessageBody::Reject {
            reason: RejectReason::Full,
        }]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_synced_before_join_is_ignored() {
        let (_network, _clock, mut server, mut conn) = setup();
        server.send(vec![MessageBody::Synced]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_socket_error_faults() {
        let (network, _clock, _server, mut conn) = setup();
        network.set_failing(CLIENT.into(), true);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert!(conn.state().is_terminal());
    }

    #[test]
    fn test_send_error_faults() {
        let (network, _clock, _server, mut conn) = setup();
        network.set_failing(CLIENT.into(), true);
        conn.send();
        assert_eq!(conn.state(), ConnectionState::Faulted);

        network.set_failing(CLIENT.into(), false);
        conn.send();
        assert_eq!(network.pending(SERVER.into()), 0);
    }

    #[test]
    fn test_lagging_threshold() {
        let (_network, clock, mut server, mut conn) = setup();
        server.send(vec![]);
        conn.receive();
        assert!(!conn.is_lagging());

        clock.advance(500);
        assert!(!conn.is_lagging());
        clock.advance(1);
        assert!(conn.is_lagging());

        server.send(vec![]);
        conn.receive();
        assert!(!conn.is_lagging());
    }

    #[test]
    fn test_send_rule_depends_on_state() {
        let (network, _clock, mut server, mut conn) = setup();

        conn.send();
        server.receive();
        server.send(vec![join(1, "alice")]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Syncing);

        // Connect is acknowledged now, but the handshake still sends.
        conn.send();
        let datagrams = network.drain(SERVER.into());
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].0.len(), HEADER_SIZE);

        server.send(vec![MessageBody::Synced]);
        conn.receive();
        conn.send();
        assert_eq!(network.pending(SERVER.into()), 0);

        conn.enqueue(MessageBody::Input {
            buttons: Default::default(),
        });
        conn.send();
        assert_eq!(network.pending(SERVER.into()), 1);
    }

    #[test]
    fn test_foreign_sender_ignored() {
        let (network, _clock, _server, mut conn) = setup();
        let mut other = FakeServer {
            transport: network.endpoint(SocketAddr::from(([10, 0, 0, 9], 1))),
            queue: MessageQueue::new(),
        };
        other.send(vec![join(1, "mallory")]);
        conn.receive();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.stats().packets_discarded, 1);
    }

    #[test]
    fn test_disconnect_sends_notice() {
        let (_network, _clock, mut server, mut conn) = setup();
        server.send(vec![join(1, "alice"), MessageBody::Synced]);
        conn.receive();
        conn.disconnect();

        let received = server.receive();
        assert!(received.iter().any(|m| m.body == MessageBody::Disconnect));
    }
}

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{SocketAddr, SocketAddrV6};

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::clock::{Clock, SystemClock};
use super::config::DiscoveryConfig;
use super::message::MessageType;
use super::protocol::{APP_IDENTIFIER, PROTOCOL_REVISION};
use super::transport::{Transport, UdpTransport};

pub const BEACON_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BeaconError {
    #[error("beacon too short: {0} bytes")]
    TooShort(usize),
    #[error("not a discovery beacon (type {0})")]
    WrongType(u8),
    #[error("foreign application identifier {0:#010x}")]
    ForeignApplication(u32),
    #[error("protocol revision {found}, expected {expected}")]
    RevisionMismatch { found: u8, expected: u8 },
}

pub fn write_beacon<B: BufMut>(buf: &mut B) {
    buf.put_u8(MessageType::Discovery as u8);
    buf.put_u32(APP_IDENTIFIER);
    buf.put_u8(PROTOCOL_REVISION);
}

pub fn read_beacon(mut data: &[u8]) -> Result<(), BeaconError> {
    if data.len() < BEACON_SIZE {
        return Err(BeaconError::TooShort(data.len()));
    }

    let ty = data.get_u8();
    if ty != MessageType::Discovery as u8 {
        return Err(BeaconError::WrongType(ty));
    }

    let app = data.get_u32();
    if app != APP_IDENTIFIER {
        return Err(BeaconError::ForeignApplication(app));
    }

    let revision = data.get_u8();
    if revision != PROTOCOL_REVISION {
        return Err(BeaconError::RevisionMismatch {
            found: revision,
            expected: PROTOCOL_REVISION,
        });
    }

    Ok(())
}

/// Periodically multicasts a beacon from the game socket, so the beacon's
/// source address is the address clients connect to.
#[derive(Debug, Clone)]
pub struct ServerAnnouncer {
    target: SocketAddr,
    interval_ms: u64,
    last_sent_ms: Option<u64>,
}

impl ServerAnnouncer {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            target: SocketAddr::V6(SocketAddrV6::new(config.group, config.port, 0, 0)),
            interval_ms: config.beacon_interval_ms(),
            last_sent_ms: None,
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_sent_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    /// Sends a beacon if one is due. Returns whether one was sent.
    pub fn announce<T: Transport>(&mut self, transport: &mut T, now_ms: u64) -> io::Result<bool> {
        if !self.is_due(now_ms) {
            return Ok(false);
        }

        let mut beacon = Vec::with_capacity(BEACON_SIZE);
        write_beacon(&mut beacon);
        self.last_sent_ms = Some(now_ms);
        transport.send_to(&beacon, self.target)?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub end_point: SocketAddr,
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered(SocketAddr),
    Shutdown(SocketAddr),
}

/// Listens for server beacons and keeps the list of live servers.
pub struct ServerDiscovery<T = UdpTransport, C = SystemClock> {
    transport: T,
    clock: C,
    timeout_ms: u64,
    servers: BTreeMap<SocketAddr, ServerInfo>,
    events: VecDeque<DiscoveryEvent>,
    buffer: [u8; 64],
}

impl ServerDiscovery {
    pub fn bind(config: &DiscoveryConfig) -> io::Result<Self> {
        let transport = UdpTransport::bind_multicast(config.group, config.port)?;
        log::info!(
            "Listening for servers on [{}]:{}",
            config.group,
            config.port
        );
        Ok(Self::with_transport(transport, SystemClock::new(), config))
    }
}

impl<T: Transport, C: Clock> ServerDiscovery<T, C> {
    pub fn with_transport(transport: T, clock: C, config: &DiscoveryConfig) -> Self {
        Self {
            transport,
            clock,
            timeout_ms: config.server_timeout_ms(),
            servers: BTreeMap::new(),
            events: VecDeque::new(),
            buffer: [0u8; 64],
        }
    }

    pub fn update(&mut self) {
        loop {
            match self.transport.try_receive(&mut self.buffer) {
                Ok(Some((size, from))) => self.handle_beacon(size, from),
                Ok(None) => break,
                Err(e) => {
                    log::error!("Discovery socket error: {e}");
                    break;
                }
            }
        }

        let now = self.clock.now_ms();
        let timeout = self.timeout_ms;
        let expired: Vec<SocketAddr> = self
            .servers
            .values()
            .filter(|info| now.saturating_sub(info.last_seen_ms) > timeout)
            .map(|info| info.end_point)
            .collect();

        for end_point in expired {
            log::info!("Server {end_point} stopped announcing");
            self.servers.remove(&end_point);
            self.events.push_back(DiscoveryEvent::Shutdown(end_point));
        }
    }

    fn handle_beacon(&mut self, size: usize, from: SocketAddr) {
        if let Err(e) = read_beacon(&self.buffer[..size]) {
            log::warn!("Ignoring beacon from {from}: {e}");
            return;
        }

        let now = self.clock.now_ms();
        match self.servers.get_mut(&from) {
            Some(info) => info.last_seen_ms = now,
            None => {
                log::info!("Discovered server {from}");
                self.servers.insert(
                    from,
                    ServerInfo {
                        end_point: from,
                        last_seen_ms: now,
                    },
                );
                self.events.push_back(DiscoveryEvent::Discovered(from));
            }
        }
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerInfo> {
        self.servers.values()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = DiscoveryEvent> + '_ {
        self.events.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::clock::ManualClock;
    use crate::net::simulator::{MemoryNetwork, MemoryTransport};

    fn listen_addr() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 100], 27016))
    }

    fn server_addr(n: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, n], 27015))
    }

    fn beacon() -> Vec<u8> {
        let mut buf = Vec::new();
        write_beacon(&mut buf);
        buf
    }

    fn setup() -> (
        MemoryNetwork,
        ManualClock,
        ServerDiscovery<MemoryTransport, ManualClock>,
    ) {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let discovery = ServerDiscovery::with_transport(
            network.endpoint(listen_addr()),
            clock.clone(),
            &DiscoveryConfig::default(),
        );
        (network, clock, discovery)
    }

    #[test]
    fn test_beacon_layout() {
        assert_eq!(beacon(), vec![200u8, 0x53, 0x4B, 0x52, 0x4D, PROTOCOL_REVISION]);
        assert_eq!(read_beacon(&beacon()), Ok(()));
    }

    #[test]
    fn test_rejects_bad_beacons() {
        let mut wrong_type = beacon();
        wrong_type[0] = 1;
        assert_eq!(read_beacon(&wrong_type), Err(BeaconError::WrongType(1)));

        let mut foreign = beacon();
        foreign[1] = 0;
        assert!(matches!(
            read_beacon(&foreign),
            Err(BeaconError::ForeignApplication(_))
        ));

        let mut revision = beacon();
        revision[5] = PROTOCOL_REVISION + 1;
        assert!(matches!(
            read_beacon(&revision),
            Err(BeaconError::RevisionMismatch { .. })
        ));

        assert_eq!(read_beacon(&[200, 0]), Err(BeaconError::TooShort(2)));
    }

    #[test]
    fn test_discovers_each_server_once() {
        let (network, clock, mut discovery) = setup();
        network.inject(server_addr(1), listen_addr(), &beacon());
        network.inject(server_addr(1), listen_addr(), &beacon());
        discovery.update();

        clock.advance(100);
        network.inject(server_addr(1), listen_addr(), &beacon());
        network.inject(server_addr(2), listen_addr(), &beacon());
        discovery.update();

        let events: Vec<_> = discovery.drain_events().collect();
        assert_eq!(
            events,
            vec![
                DiscoveryEvent::Discovered(server_addr(1)),
                DiscoveryEvent::Discovered(server_addr(2)),
            ]
        );
        let seen: Vec<u64> = discovery.servers().map(|s| s.last_seen_ms).collect();
        assert_eq!(seen, vec![100, 100]);
    }

    #[test]
    fn test_invalid_beacons_are_not_listed() {
        let (network, _clock, mut discovery) = setup();
        let mut foreign = beacon();
        foreign[2] = 0;
        network.inject(server_addr(1), listen_addr(), &foreign);
        network.inject(server_addr(2), listen_addr(), &[200]);
        discovery.update();

        assert_eq!(discovery.server_count(), 0);
        assert_eq!(discovery.drain_events().count(), 0);
    }

    #[test]
    fn test_silent_server_shuts_down_once() {
        let (network, clock, mut discovery) = setup();
        let timeout = DiscoveryConfig::default().server_timeout_ms();

        network.inject(server_addr(1), listen_addr(), &beacon());
        discovery.update();
        discovery.drain_events().for_each(drop);

        clock.advance(timeout);
        discovery.update();
        assert_eq!(discovery.server_count(), 1);

        clock.advance(1);
        discovery.update();
        discovery.update();
        let events: Vec<_> = discovery.drain_events().collect();
        assert_eq!(events, vec![DiscoveryEvent::Shutdown(server_addr(1))]);
        assert_eq!(discovery.server_count(), 0);
    }

    #[test]
    fn test_late_beacon_refreshes_before_threshold() {
        let (network, clock, mut discovery) = setup();
        let timeout = DiscoveryConfig::default().server_timeout_ms();

        network.inject(server_addr(1), listen_addr(), &beacon());
        discovery.update();

        clock.advance(timeout - 1);
        network.inject(server_addr(1), listen_addr(), &beacon());
        discovery.update();

        clock.advance(2);
        discovery.update();
        assert_eq!(discovery.server_count(), 1);
        let events: Vec<_> = discovery.drain_events().collect();
        assert_eq!(events, vec![DiscoveryEvent::Discovered(server_addr(1))]);
    }

    #[test]
    fn test_announcer_respects_interval() {
        let network = MemoryNetwork::new();
        let config = DiscoveryConfig::default();
        let mut announcer = ServerAnnouncer::new(&config);
        let mut transport = network.endpoint(server_addr(1));
        let _listener = network.endpoint(announcer.target());

        assert!(announcer.announce(&mut transport, 0).unwrap());
        assert!(!announcer.announce(&mut transport, 4_999).unwrap());
        assert!(announcer.announce(&mut transport, 5_000).unwrap());
        assert_eq!(network.pending(announcer.target()), 2);
    }
}

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use serde::{Deserialize, Serialize};

/// Non-blocking datagram socket.
pub trait Transport {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// `Ok(None)` when nothing is waiting.
    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, addr)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).try_receive(buf)
    }
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self { socket, local_addr })
    }

    /// Ephemeral socket of the same address family as `peer`.
    pub fn for_peer(peer: SocketAddr) -> io::Result<Self> {
        match peer {
            SocketAddr::V4(_) => Self::bind((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => Self::bind((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }

    pub fn bind_multicast(group: Ipv6Addr, port: u16) -> io::Result<Self> {
        let transport = Self::bind((Ipv6Addr::UNSPECIFIED, port))?;
        transport.socket.join_multicast_v6(&group, 0)?;
        Ok(transport)
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((size, addr)) => Ok(Some((size, addr))),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// 0 to 100.
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand::random::<f32>() * 100.0 < self.loss_percent
    }
}

/// Drops outgoing datagrams according to a [`PacketLossSimulation`].
#[derive(Debug)]
pub struct LossyTransport<T> {
    inner: T,
    simulation: PacketLossSimulation,
    dropped: u64,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, simulation: PacketLossSimulation) -> Self {
        Self {
            inner,
            simulation,
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if self.simulation.should_drop() {
            self.dropped += 1;
            return Ok(data.len());
        }
        self.inner.send_to(data, addr)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.inner.try_receive(buf)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Datagrams dropped for a bad header or an unexpected sender.
    pub packets_discarded: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_delivered: u64,
    /// Records refused by sequencing (duplicates, out of order, stale).
    pub batches_rejected: u64,
    pub retransmissions: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}

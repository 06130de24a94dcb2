use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use super::transport::Transport;

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Debug, Default)]
struct Fabric {
    inboxes: HashMap<SocketAddr, VecDeque<Datagram>>,
    failing: HashSet<SocketAddr>,
}

/// In-process datagram network for tests and local play.
///
/// Datagrams sent to an address nobody has registered are silently lost, the
/// same as UDP.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    fabric: Rc<RefCell<Fabric>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, addr: SocketAddr) -> MemoryTransport {
        self.fabric.borrow_mut().inboxes.entry(addr).or_default();
        MemoryTransport {
            addr,
            fabric: Rc::clone(&self.fabric),
        }
    }

    /// Delivers a raw datagram to `to` as if `from` had sent it.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        if let Some(inbox) = self.fabric.borrow_mut().inboxes.get_mut(&to) {
            inbox.push_back((data.to_vec(), from));
        }
    }

    /// Removes and returns everything queued for `addr`.
    pub fn drain(&self, addr: SocketAddr) -> Vec<Datagram> {
        self.fabric
            .borrow_mut()
            .inboxes
            .get_mut(&addr)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.fabric
            .borrow()
            .inboxes
            .get(&addr)
            .map_or(0, VecDeque::len)
    }

    /// Makes every send and receive on `addr` fail with an I/O error.
    pub fn set_failing(&self, addr: SocketAddr, failing: bool) {
        let mut fabric = self.fabric.borrow_mut();
        if failing {
            fabric.failing.insert(addr);
        } else {
            fabric.failing.remove(&addr);
        }
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    fabric: Rc<RefCell<Fabric>>,
}

impl MemoryTransport {
    fn check_failing(&self) -> io::Result<()> {
        if self.fabric.borrow().failing.contains(&self.addr) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated transport failure",
            ));
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.check_failing()?;
        if let Some(inbox) = self.fabric.borrow_mut().inboxes.get_mut(&addr) {
            inbox.push_back((data.to_vec(), self.addr));
        }
        Ok(data.len())
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.check_failing()?;
        let mut fabric = self.fabric.borrow_mut();
        let Some((data, from)) = fabric
            .inboxes
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };

        let size = data.len().min(buf.len());
        buf[..size].copy_from_slice(&data[..size]);
        Ok(Some((size, from)))
    }
}

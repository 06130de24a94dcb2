use std::net::Ipv6Addr;

use bytes::{Buf, BufMut};

pub const APP_IDENTIFIER: u32 = 0x534B_524D;
pub const PROTOCOL_REVISION: u8 = 1;
pub const HEADER_SIZE: usize = 12;
pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 30;

pub const DISCOVERY_GROUP: Ipv6Addr = Ipv6Addr::new(0xff15, 0, 0, 0, 0, 0, 0x534b, 0x524d);
pub const DISCOVERY_PORT: u16 = 27016;
/// Beacons per minute.
pub const DEFAULT_BEACON_FREQUENCY: u32 = 12;

pub const DROPPED_TIMEOUT_MS: u64 = 15_000;
pub const LAG_THRESHOLD_MS: u64 = 500;

/// Fixed framing prefixed to every datagram.
///
/// `ack` is the highest reliable sequence number the sender has processed from
/// the peer; `timestamp` is the sender's clock at send time and stamps every
/// unreliable message carried in the same packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub app_identifier: u32,
    pub ack: u32,
    pub timestamp: u32,
}

impl PacketHeader {
    pub fn new(ack: u32, timestamp: u32) -> Self {
        Self {
            app_identifier: APP_IDENTIFIER,
            ack,
            timestamp,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.app_identifier == APP_IDENTIFIER
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.app_identifier);
        buf.put_u32(self.ack);
        buf.put_u32(self.timestamp);
    }

    /// Reads a header off the front of `buf`.
    ///
    /// A short buffer or a foreign application identifier leaves `buf`
    /// untouched and returns `None`; the caller must drop the whole datagram.
    pub fn read(buf: &mut &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            log::warn!(
                "Discarding datagram: {} bytes is shorter than the packet header",
                buf.len()
            );
            return None;
        }

        let mut cursor = &buf[..HEADER_SIZE];
        let header = Self {
            app_identifier: cursor.get_u32(),
            ack: cursor.get_u32(),
            timestamp: cursor.get_u32(),
        };

        if !header.is_valid() {
            log::warn!(
                "Discarding datagram: unknown application identifier {:#010x}",
                header.app_identifier
            );
            return None;
        }

        buf.advance(HEADER_SIZE);
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_header_layout_is_big_endian() {
        let mut buf = BytesMut::new();
        PacketHeader::new(0x0102_0304, 0x0A0B_0C0D).write(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], &APP_IDENTIFIER.to_be_bytes());
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(&buf[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn test_header_read_advances_past_header() {
        let mut buf = BytesMut::new();
        PacketHeader::new(7, 1234).write(&mut buf);
        buf.put_u8(0xFF);

        let mut data = &buf[..];
        let header = PacketHeader::read(&mut data).unwrap();
        assert_eq!(header.ack, 7);
        assert_eq!(header.timestamp, 1234);
        assert_eq!(data, &[0xFF]);
    }

    #[test]
    fn test_short_header_rejected() {
        let bytes = [0u8; HEADER_SIZE - 1];
        let mut data = &bytes[..];
        assert!(PacketHeader::read(&mut data).is_none());
        assert_eq!(data.len(), HEADER_SIZE - 1);
    }

    #[test]
    fn test_foreign_identifier_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(0xDEAD_BEEF);
        buf.put_u32(1);
        buf.put_u32(2);
        buf.put_u8(3);

        let mut data = &buf[..];
        assert!(PacketHeader::read(&mut data).is_none());
        assert_eq!(data.len(), HEADER_SIZE + 1);
    }
}

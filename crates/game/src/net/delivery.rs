use bytes::BufMut;

use super::message::{Message, MessageType};
use super::protocol::PacketHeader;

/// Sequencing and admission state for one connection.
///
/// Reliable messages are admitted strictly in order: only the immediate
/// successor of the last processed sequence number is accepted, anything else
/// is dropped and left to the sender's retransmission. Unreliable messages
/// are admitted when newer than anything seen so far.
#[derive(Debug, Default, Clone)]
pub struct DeliveryManager {
    last_assigned_reliable: u32,
    last_assigned_unreliable: u32,
    last_received_reliable: u32,
    last_received_unreliable: u32,
    last_acknowledged: u32,
}

impl DeliveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per outgoing message so retransmissions reuse the number.
    pub fn assign_sequence_number(&mut self, ty: MessageType) -> u32 {
        if ty.is_reliable() {
            self.last_assigned_reliable = self.last_assigned_reliable.wrapping_add(1);
            self.last_assigned_reliable
        } else {
            self.last_assigned_unreliable = self.last_assigned_unreliable.wrapping_add(1);
            self.last_assigned_unreliable
        }
    }

    pub fn allow_reliable_delivery(&mut self, sequence: u32) -> bool {
        if sequence != self.last_received_reliable.wrapping_add(1) {
            return false;
        }
        self.last_received_reliable = sequence;
        true
    }

    pub fn allow_unreliable_delivery(&mut self, sequence: u32) -> bool {
        if sequence <= self.last_received_unreliable {
            return false;
        }
        self.last_received_unreliable = sequence;
        true
    }

    pub fn is_acknowledged(&self, message: &Message) -> bool {
        debug_assert!(
            message.is_reliable(),
            "acknowledgment is only tracked for reliable messages"
        );
        message.sequence_number <= self.last_acknowledged
    }

    pub fn update_last_acknowledged(&mut self, sequence: u32) {
        self.last_acknowledged = self.last_acknowledged.max(sequence);
    }

    /// Writes a header acknowledging everything processed from the peer.
    pub fn write_header<B: BufMut>(&self, buf: &mut B, timestamp: u32) {
        PacketHeader::new(self.last_received_reliable, timestamp).write(buf);
    }

    pub fn last_received_reliable(&self) -> u32 {
        self.last_received_reliable
    }

    pub fn last_received_unreliable(&self) -> u32 {
        self.last_received_unreliable
    }

    pub fn last_acknowledged(&self) -> u32 {
        self.last_acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::MessageBody;
    use proptest::prelude::*;

    #[test]
    fn test_reliable_strict_successor() {
        let mut delivery = DeliveryManager::new();

        assert!(delivery.allow_reliable_delivery(1));
        assert!(!delivery.allow_reliable_delivery(1));
        assert!(!delivery.allow_reliable_delivery(3));
        assert_eq!(delivery.last_received_reliable(), 1);
        assert!(delivery.allow_reliable_delivery(2));
        assert_eq!(delivery.last_received_reliable(), 2);
    }

    #[test]
    fn test_unreliable_latest_wins() {
        let mut delivery = DeliveryManager::new();
        assert!(delivery.allow_unreliable_delivery(5));

        assert!(!delivery.allow_unreliable_delivery(5));
        assert!(delivery.allow_unreliable_delivery(7));
        assert!(!delivery.allow_unreliable_delivery(6));
        assert_eq!(delivery.last_received_unreliable(), 7);
    }

    #[test]
    fn test_sequence_streams_are_independent() {
        let mut delivery = DeliveryManager::new();

        assert_eq!(delivery.assign_sequence_number(MessageType::Chat), 1);
        assert_eq!(delivery.assign_sequence_number(MessageType::Input), 1);
        assert_eq!(delivery.assign_sequence_number(MessageType::Join), 2);
        assert_eq!(delivery.assign_sequence_number(MessageType::UpdatePosition), 2);
    }

    #[test]
    fn test_outbound_sequence_wraps() {
        let mut delivery = DeliveryManager {
            last_assigned_reliable: u32::MAX,
            last_assigned_unreliable: u32::MAX,
            ..Default::default()
        };
        assert_eq!(delivery.assign_sequence_number(MessageType::Chat), 0);
        assert_eq!(delivery.assign_sequence_number(MessageType::Input), 0);
    }

    #[test]
    fn test_acknowledgment_is_monotonic() {
        let mut delivery = DeliveryManager::new();
        let message = Message::with_sequence(3, MessageBody::Synced);

        delivery.update_last_acknowledged(4);
        delivery.update_last_acknowledged(2);
        assert_eq!(delivery.last_acknowledged(), 4);
        assert!(delivery.is_acknowledged(&message));
    }

    proptest! {
        #[test]
        fn test_reliable_admission_only_accepts_successor(
            sequences in prop::collection::vec(0u32..16, 0..64),
        ) {
            let mut delivery = DeliveryManager::new();
            for seq in sequences {
                let before = delivery.last_received_reliable();
                let allowed = delivery.allow_reliable_delivery(seq);
                prop_assert_eq!(allowed, seq == before + 1);
                let expected = if allowed { before + 1 } else { before };
                prop_assert_eq!(delivery.last_received_reliable(), expected);
            }
        }

        #[test]
        fn test_unreliable_admission_is_monotonic(
            sequences in prop::collection::vec(0u32..1000, 0..64),
        ) {
            let mut delivery = DeliveryManager::new();
            for seq in sequences {
                let before = delivery.last_received_unreliable();
                let allowed = delivery.allow_unreliable_delivery(seq);
                prop_assert_eq!(allowed, seq > before);
                prop_assert_eq!(delivery.last_received_unreliable(), before.max(seq));
            }
        }
    }
}

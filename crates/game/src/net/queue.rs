use std::collections::VecDeque;
use std::mem;

use bytes::BytesMut;

use super::codec::{RECORD_HEADER_SIZE, write_record};
use super::delivery::DeliveryManager;
use super::message::{MAX_BATCH_ITEMS, Message, MessageBody, MessageType};
use super::protocol::{HEADER_SIZE, MAX_PACKET_SIZE};

/// One outgoing wire record: messages sharing a type and sequence number.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub messages: Vec<Message>,
    pub transmissions: u32,
}

impl PendingRecord {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            transmissions: 0,
        }
    }

    pub fn sequence_number(&self) -> u32 {
        self.messages.first().map_or(0, |m| m.sequence_number)
    }
}

/// Outbound buffer for one connection.
///
/// Reliable records stay queued until the peer acknowledges them and are
/// rewritten into every packet until then. Unreliable records get exactly
/// one packing attempt.
#[derive(Debug)]
pub struct MessageQueue {
    delivery: DeliveryManager,
    reliable: VecDeque<PendingRecord>,
    unreliable: VecDeque<PendingRecord>,
    max_packet_size: usize,
    retransmissions: u64,
    scratch: BytesMut,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_max_packet_size(MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            delivery: DeliveryManager::new(),
            reliable: VecDeque::new(),
            unreliable: VecDeque::new(),
            max_packet_size: max_packet_size.max(HEADER_SIZE),
            retransmissions: 0,
            scratch: BytesMut::with_capacity(max_packet_size),
        }
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    pub fn delivery_mut(&mut self) -> &mut DeliveryManager {
        &mut self.delivery
    }

    /// Assigns the message its sequence number and queues it by class.
    pub fn enqueue(&mut self, body: MessageBody) -> u32 {
        let ty = body.message_type();
        debug_assert_ne!(ty, MessageType::Discovery);

        let sequence = self.delivery.assign_sequence_number(ty);
        self.push(ty, vec![Message::with_sequence(sequence, body)]);
        sequence
    }

    /// Queues bodies so that runs of one batched type share wire records.
    ///
    /// Runs are split into chunks that fit a single datagram, each chunk
    /// taking its own sequence number.
    pub fn enqueue_batch(&mut self, bodies: impl IntoIterator<Item = MessageBody>) {
        let mut run: Vec<MessageBody> = Vec::new();
        for body in bodies {
            if run
                .last()
                .is_some_and(|last| last.message_type() != body.message_type())
            {
                self.enqueue_run(mem::take(&mut run));
            }
            run.push(body);
        }
        self.enqueue_run(run);
    }

    fn enqueue_run(&mut self, run: Vec<MessageBody>) {
        let Some(ty) = run.first().map(MessageBody::message_type) else {
            return;
        };

        if !ty.is_batched() {
            for body in run {
                self.enqueue(body);
            }
            return;
        }

        let chunk_len = self.batch_capacity(ty);
        let mut bodies = run.into_iter().peekable();
        while bodies.peek().is_some() {
            let sequence = self.delivery.assign_sequence_number(ty);
            let messages = bodies
                .by_ref()
                .take(chunk_len)
                .map(|body| Message::with_sequence(sequence, body))
                .collect();
            self.push(ty, messages);
        }
    }

    fn batch_capacity(&self, ty: MessageType) -> usize {
        let available = self
            .max_packet_size
            .saturating_sub(HEADER_SIZE + RECORD_HEADER_SIZE + 1);
        let item_size = ty.batch_item_size().unwrap_or(available).max(1);
        (available / item_size).clamp(1, MAX_BATCH_ITEMS)
    }

    fn push(&mut self, ty: MessageType, messages: Vec<Message>) {
        let record = PendingRecord::new(messages);
        if ty.is_reliable() {
            self.reliable.push_back(record);
        } else {
            self.unreliable.push_back(record);
        }
    }

    /// Serializes one datagram into `buf` and returns its length.
    ///
    /// Reliable records go first, then unreliable ones, both in FIFO order; a
    /// record that does not fit ends packing for its class. Unreliable records
    /// are discarded afterwards whether or not they made it in.
    pub fn write_packet(&mut self, buf: &mut BytesMut, timestamp: u32) -> usize {
        let start = buf.len();
        let limit = start + self.max_packet_size;

        self.prune_acknowledged();
        self.delivery.write_header(buf, timestamp);

        for record in self.reliable.iter_mut() {
            if !pack_record(&mut self.scratch, buf, limit, record) {
                break;
            }
            if record.transmissions > 1 {
                self.retransmissions += 1;
            }
        }

        let mut packed = 0;
        for record in self.unreliable.iter_mut() {
            if !pack_record(&mut self.scratch, buf, limit, record) {
                break;
            }
            packed += 1;
        }
        let dropped = self.unreliable.len() - packed;
        if dropped > 0 {
            log::trace!("Dropping {dropped} unreliable records that did not fit");
        }
        self.unreliable.clear();

        buf.len() - start
    }

    /// Drops reliable records the peer has acknowledged.
    ///
    /// Delivery is strictly ordered, so acknowledgments always cover a prefix.
    /// Called after every received header so acknowledgment alone leaves
    /// nothing pending.
    pub fn prune_acknowledged(&mut self) {
        while let Some(front) = self.reliable.front() {
            let acknowledged = front
                .messages
                .first()
                .is_none_or(|message| self.delivery.is_acknowledged(message));
            if !acknowledged {
                break;
            }
            self.reliable.pop_front();
        }
    }

    pub fn has_pending_data(&self) -> bool {
        !self.reliable.is_empty() || !self.unreliable.is_empty()
    }

    pub fn reliable_pending(&self) -> impl Iterator<Item = &PendingRecord> {
        self.reliable.iter()
    }

    pub fn reliable_len(&self) -> usize {
        self.reliable.len()
    }

    pub fn unreliable_len(&self) -> usize {
        self.unreliable.len()
    }

    /// Reliable records written again after their first transmission.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }
}

fn pack_record(
    scratch: &mut BytesMut,
    buf: &mut BytesMut,
    limit: usize,
    record: &mut PendingRecord,
) -> bool {
    scratch.clear();
    write_record(scratch, &record.messages);
    if buf.len() + scratch.len() > limit {
        return false;
    }
    buf.extend_from_slice(scratch);
    record.transmissions += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::read_record;
    use crate::net::identifier::Identifier;
    use crate::net::protocol::PacketHeader;
    use glam::Vec2;

    fn chat(text: &str) -> MessageBody {
        MessageBody::Chat {
            player_id: Identifier::default(),
            text: text.to_string(),
        }
    }

    fn position(i: u16) -> MessageBody {
        MessageBody::UpdatePosition {
            entity_id: Identifier::new(i, 0),
            position: Vec2::ZERO,
        }
    }

    fn decode(packet: &[u8]) -> (PacketHeader, Vec<Vec<Message>>) {
        let mut data = packet;
        let header = PacketHeader::read(&mut data).unwrap();
        let mut records = Vec::new();
        while !data.is_empty() {
            records.push(read_record(&mut data).unwrap());
        }
        (header, records)
    }

    #[test]
    fn test_acknowledged_prefix_is_pruned() {
        let mut queue = MessageQueue::new();
        for i in 0..5 {
            queue.enqueue(chat(&i.to_string()));
        }

        queue.delivery_mut().update_last_acknowledged(3);
        for _ in 0..3 {
            let mut buf = BytesMut::new();
            queue.write_packet(&mut buf, 0);
            let remaining: Vec<u32> = queue
                .reliable_pending()
                .map(PendingRecord::sequence_number)
                .collect();
            assert_eq!(remaining, vec![4, 5]);
        }
    }

    #[test]
    fn test_reliable_records_are_retransmitted_until_acknowledged() {
        let mut queue = MessageQueue::new();
        queue.enqueue(chat("hello"));

        let mut first = BytesMut::new();
        queue.write_packet(&mut first, 10);
        let mut second = BytesMut::new();
        queue.write_packet(&mut second, 20);

        let (_, records_a) = decode(&first);
        let (header_b, records_b) = decode(&second);
        assert_eq!(records_a, records_b);
        assert_eq!(header_b.timestamp, 20);
        assert_eq!(queue.retransmissions(), 1);

        queue.delivery_mut().update_last_acknowledged(1);
        assert!(queue.has_pending_data());
        assert_eq!(queue.reliable_len(), 1);

        queue.prune_acknowledged();
        assert!(!queue.has_pending_data());
        assert_eq!(queue.reliable_len(), 0);
        let mut third = BytesMut::new();
        assert_eq!(queue.write_packet(&mut third, 30), HEADER_SIZE);
        assert!(!queue.has_pending_data());
    }

    #[test]
    fn test_header_acknowledges_last_processed_reliable() {
        let mut queue = MessageQueue::new();
        assert!(queue.delivery_mut().allow_reliable_delivery(1));
        assert!(queue.delivery_mut().allow_reliable_delivery(2));

        let mut buf = BytesMut::new();
        queue.write_packet(&mut buf, 99);
        let (header, records) = decode(&buf);
        assert_eq!(header.ack, 2);
        assert_eq!(header.timestamp, 99);
        assert!(records.is_empty());
    }

    #[test]
    fn test_unreliable_cleared_even_when_not_sent() {
        let mut queue = MessageQueue::with_max_packet_size(HEADER_SIZE + 20);
        queue.enqueue(chat("0123456789"));
        queue.enqueue(MessageBody::Input {
            buttons: Default::default(),
        });

        let mut buf = BytesMut::new();
        queue.write_packet(&mut buf, 0);
        let (_, records) = decode(&buf);
        assert_eq!(records.len(), 1);
        assert_eq!(queue.unreliable_len(), 0);
        assert_eq!(queue.reliable_len(), 1);
    }

    #[test]
    fn test_oversized_reliable_stops_packing_in_order() {
        let mut queue = MessageQueue::with_max_packet_size(HEADER_SIZE + 40);
        queue.enqueue(chat("a"));
        queue.enqueue(chat(&"b".repeat(60)));
        queue.enqueue(chat("c"));

        let mut buf = BytesMut::new();
        queue.write_packet(&mut buf, 0);
        let (_, records) = decode(&buf);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][0].body, chat("a"));
        assert_eq!(queue.reliable_len(), 3);
    }

    #[test]
    fn test_batches_split_to_fit_datagrams() {
        let mut queue = MessageQueue::new();
        queue.enqueue_batch((0..300).map(position));

        // (1200 - 12 - 5 - 1) / 12 = 98 items per record
        let sizes: Vec<usize> = queue.unreliable.iter().map(|r| r.messages.len()).collect();
        assert_eq!(sizes, vec![98, 98, 98, 6]);

        let sequences: Vec<u32> = queue
            .unreliable
            .iter()
            .map(PendingRecord::sequence_number)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        let mut buf = BytesMut::new();
        let written = queue.write_packet(&mut buf, 0);
        assert!(written <= MAX_PACKET_SIZE);
        let (_, records) = decode(&buf);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 98);
    }

    #[test]
    fn test_mixed_batch_groups_by_type() {
        let mut queue = MessageQueue::new();
        queue.enqueue_batch(vec![position(0), position(1), chat("x"), position(2)]);

        assert_eq!(queue.unreliable_len(), 2);
        assert_eq!(queue.reliable_len(), 1);
    }
}

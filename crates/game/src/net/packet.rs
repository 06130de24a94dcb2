use super::codec::read_record;
use super::delivery::DeliveryManager;
use super::message::Message;
use super::protocol::PacketHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSummary {
    pub header: PacketHeader,
    pub delivered: usize,
    pub rejected_batches: usize,
}

/// Decodes one datagram and hands every admitted message to `deliver`.
///
/// Returns `None` when the header is missing or foreign, in which case nothing
/// else in the datagram is looked at. Each decoded record is admitted or
/// rejected as a whole using its shared sequence number; admitted unreliable
/// messages are stamped with the header timestamp.
pub fn read_packet<F>(
    delivery: &mut DeliveryManager,
    data: &[u8],
    mut deliver: F,
) -> Option<PacketSummary>
where
    F: FnMut(Message),
{
    let mut cursor = data;
    let header = PacketHeader::read(&mut cursor)?;
    delivery.update_last_acknowledged(header.ack);

    let mut summary = PacketSummary {
        header,
        delivered: 0,
        rejected_batches: 0,
    };

    while !cursor.is_empty() {
        let before = cursor.len();
        let batch = match read_record(&mut cursor) {
            Ok(batch) => batch,
            Err(err) => {
                log::warn!("Discarding {before} trailing bytes of packet: {err}");
                return Some(summary);
            }
        };

        if let Some(first) = batch.first() {
            let allowed = if first.is_reliable() {
                delivery.allow_reliable_delivery(first.sequence_number)
            } else {
                delivery.allow_unreliable_delivery(first.sequence_number)
            };

            if allowed {
                for mut message in batch {
                    if !message.is_reliable() {
                        message.timestamp = header.timestamp;
                    }
                    summary.delivered += 1;
                    deliver(message);
                }
            } else {
                summary.rejected_batches += 1;
            }
        }

        if cursor.len() == before {
            break;
        }
    }

    if !cursor.is_empty() {
        log::warn!("{} unread bytes left at end of packet", cursor.len());
    }

    Some(summary)
}

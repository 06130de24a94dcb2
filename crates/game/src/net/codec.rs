use bytes::{Buf, BufMut};
use glam::Vec2;

use super::identifier::Identifier;
use super::message::{
    Buttons, EntityKind, MAX_BATCH_ITEMS, MAX_CHAT_LENGTH, MAX_NAME_LENGTH, Message, MessageBody,
    MessageType, RejectReason,
};

/// `u8 type | u32 sequence_number`
pub const RECORD_HEADER_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("record truncated: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("message type {0:?} cannot appear inside a packet")]
    UnexpectedMessageType(MessageType),
    #[error("unknown reject reason {0}")]
    UnknownRejectReason(u8),
    #[error("unknown entity kind {0}")]
    UnknownEntityKind(u8),
    #[error("batch record with zero items")]
    EmptyBatch,
}

/// Writes one wire record.
///
/// Every message in `batch` must share the same type and sequence number; a
/// non-batched type is always a batch of exactly one.
pub fn write_record<B: BufMut>(buf: &mut B, batch: &[Message]) {
    let Some(first) = batch.first() else {
        return;
    };
    let ty = first.message_type();

    buf.put_u8(ty as u8);
    buf.put_u32(first.sequence_number);

    if ty.is_batched() {
        debug_assert!(batch.len() <= MAX_BATCH_ITEMS);
        let count = batch.len().min(MAX_BATCH_ITEMS);
        buf.put_u8(count as u8);
        for message in &batch[..count] {
            debug_assert_eq!(message.message_type(), ty);
            write_body(buf, &message.body);
        }
    } else {
        debug_assert_eq!(batch.len(), 1);
        write_body(buf, &first.body);
    }
}

fn write_body<B: BufMut>(buf: &mut B, body: &MessageBody) {
    match body {
        MessageBody::Connect { revision, name } => {
            buf.put_u8(*revision);
            write_string(buf, name, MAX_NAME_LENGTH);
        }
        MessageBody::Reject { reason } => buf.put_u8(*reason as u8),
        MessageBody::Join { player_id, name } => {
            write_identifier(buf, *player_id);
            write_string(buf, name, MAX_NAME_LENGTH);
        }
        MessageBody::Leave { player_id } => write_identifier(buf, *player_id),
        MessageBody::Synced | MessageBody::Disconnect => {}
        MessageBody::Chat { player_id, text } => {
            write_identifier(buf, *player_id);
            write_string(buf, text, MAX_CHAT_LENGTH);
        }
        MessageBody::SpawnEntity {
            entity_id,
            kind,
            owner,
            position,
        } => {
            write_identifier(buf, *entity_id);
            buf.put_u8(*kind as u8);
            write_identifier(buf, *owner);
            write_vec2(buf, *position);
        }
        MessageBody::DespawnEntity { entity_id } => write_identifier(buf, *entity_id),
        MessageBody::UpdatePosition {
            entity_id,
            position,
        } => {
            write_identifier(buf, *entity_id);
            write_vec2(buf, *position);
        }
        MessageBody::Input { buttons } => buf.put_u8(buttons.bits()),
    }
}

fn write_identifier<B: BufMut>(buf: &mut B, id: Identifier) {
    buf.put_u16(id.generation);
    buf.put_u16(id.id);
}

fn write_vec2<B: BufMut>(buf: &mut B, v: Vec2) {
    buf.put_f32(v.x);
    buf.put_f32(v.y);
}

fn write_string<B: BufMut>(buf: &mut B, s: &str, max_len: usize) {
    let clipped = truncate_utf8(s, max_len);
    if clipped.len() < s.len() {
        log::warn!(
            "Truncating {}-byte string to the {}-byte field limit",
            s.len(),
            max_len
        );
    }
    buf.put_u8(clipped.len() as u8);
    buf.put_slice(clipped.as_bytes());
}

pub(crate) fn truncate_utf8(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reads one wire record, expanding batched types into one message per item.
pub fn read_record<B: Buf>(buf: &mut B) -> Result<Vec<Message>, CodecError> {
    ensure(buf, RECORD_HEADER_SIZE)?;
    let raw = buf.get_u8();
    let ty = MessageType::try_from(raw).map_err(CodecError::UnknownMessageType)?;
    if ty == MessageType::Discovery {
        return Err(CodecError::UnexpectedMessageType(ty));
    }
    let sequence_number = buf.get_u32();

    if !ty.is_batched() {
        let body = read_body(buf, ty)?;
        return Ok(vec![Message::with_sequence(sequence_number, body)]);
    }

    ensure(buf, 1)?;
    let count = buf.get_u8() as usize;
    if count == 0 {
        return Err(CodecError::EmptyBatch);
    }

    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        let body = read_body(buf, ty)?;
        messages.push(Message::with_sequence(sequence_number, body));
    }
    Ok(messages)
}

fn read_body<B: Buf>(buf: &mut B, ty: MessageType) -> Result<MessageBody, CodecError> {
    let body = match ty {
        MessageType::Connect => {
            ensure(buf, 1)?;
            let revision = buf.get_u8();
            let name = read_string(buf, MAX_NAME_LENGTH)?;
            MessageBody::Connect { revision, name }
        }
        MessageType::Reject => {
            ensure(buf, 1)?;
            let reason =
                RejectReason::try_from(buf.get_u8()).map_err(CodecError::UnknownRejectReason)?;
            MessageBody::Reject { reason }
        }
        MessageType::Join => {
            let player_id = read_identifier(buf)?;
            let name = read_string(buf, MAX_NAME_LENGTH)?;
            MessageBody::Join { player_id, name }
        }
        MessageType::Leave => MessageBody::Leave {
            player_id: read_identifier(buf)?,
        },
        MessageType::Synced => MessageBody::Synced,
        MessageType::Chat => {
            let player_id = read_identifier(buf)?;
            let text = read_string(buf, MAX_CHAT_LENGTH)?;
            MessageBody::Chat { player_id, text }
        }
        MessageType::Disconnect => MessageBody::Disconnect,
        MessageType::SpawnEntity => {
            let entity_id = read_identifier(buf)?;
            ensure(buf, 1)?;
            let kind = EntityKind::try_from(buf.get_u8()).map_err(CodecError::UnknownEntityKind)?;
            let owner = read_identifier(buf)?;
            let position = read_vec2(buf)?;
            MessageBody::SpawnEntity {
                entity_id,
                kind,
                owner,
                position,
            }
        }
        MessageType::DespawnEntity => MessageBody::DespawnEntity {
            entity_id: read_identifier(buf)?,
        },
        MessageType::UpdatePosition => {
            let entity_id = read_identifier(buf)?;
            let position = read_vec2(buf)?;
            MessageBody::UpdatePosition {
                entity_id,
                position,
            }
        }
        MessageType::Input => {
            ensure(buf, 1)?;
            MessageBody::Input {
                buttons: Buttons::from_bits_truncate(buf.get_u8()),
            }
        }
        MessageType::Discovery => return Err(CodecError::UnexpectedMessageType(ty)),
    };
    Ok(body)
}

fn read_identifier<B: Buf>(buf: &mut B) -> Result<Identifier, CodecError> {
    ensure(buf, 4)?;
    let generation = buf.get_u16();
    let id = buf.get_u16();
    Ok(Identifier::new(id, generation))
}

fn read_vec2<B: Buf>(buf: &mut B) -> Result<Vec2, CodecError> {
    ensure(buf, 8)?;
    let x = buf.get_f32();
    let y = buf.get_f32();
    Ok(Vec2::new(x, y))
}

fn read_string<B: Buf>(buf: &mut B, max_len: usize) -> Result<String, CodecError> {
    ensure(buf, 1)?;
    let len = buf.get_u8() as usize;
    ensure(buf, len)?;

    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    let text = String::from_utf8_lossy(&bytes);

    if text.len() > max_len {
        log::warn!(
            "Truncating received {}-byte string to the {}-byte field limit",
            text.len(),
            max_len
        );
        return Ok(truncate_utf8(&text, max_len).to_owned());
    }
    Ok(text.into_owned())
}

#[inline]
fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<(), CodecError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(CodecError::UnexpectedEnd { needed, remaining });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(message: Message) {
        let mut buf = BytesMut::new();
        write_record(&mut buf, std::slice::from_ref(&message));

        let mut data = &buf[..];
        let decoded = read_record(&mut data).unwrap();
        assert_eq!(decoded, vec![message]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_round_trip_at_boundaries() {
        let max_name = "n".repeat(MAX_NAME_LENGTH);
        let max_chat = "c".repeat(MAX_CHAT_LENGTH);
        let low = Identifier::new(0, 0);
        let high = Identifier::new(u16::MAX, u16::MAX);

        let bodies = vec![
            MessageBody::Connect {
                revision: 0,
                name: String::new(),
            },
            MessageBody::Connect {
                revision: u8::MAX,
                name: max_name.clone(),
            },
            MessageBody::Reject {
                reason: RejectReason::Full,
            },
            MessageBody::Reject {
                reason: RejectReason::VersionMismatch,
            },
            MessageBody::Join {
                player_id: low,
                name: max_name,
            },
            MessageBody::Leave { player_id: high },
            MessageBody::Synced,
            MessageBody::Chat {
                player_id: high,
                text: String::new(),
            },
            MessageBody::Chat {
                player_id: low,
                text: max_chat,
            },
            MessageBody::Disconnect,
            MessageBody::SpawnEntity {
                entity_id: high,
                kind: EntityKind::Marker,
                owner: low,
                position: Vec2::new(f32::MAX, f32::MIN),
            },
            MessageBody::DespawnEntity { entity_id: low },
            MessageBody::UpdatePosition {
                entity_id: high,
                position: Vec2::new(-0.5, 1024.25),
            },
            MessageBody::Input {
                buttons: Buttons::all(),
            },
        ];

        for (seq, body) in bodies.into_iter().enumerate() {
            round_trip(Message::with_sequence(seq as u32, body));
        }
        round_trip(Message::with_sequence(u32::MAX, MessageBody::Synced));
    }

    #[test]
    fn test_identifier_is_generation_first() {
        let mut buf = BytesMut::new();
        write_record(
            &mut buf,
            &[Message::with_sequence(
                9,
                MessageBody::Leave {
                    player_id: Identifier::new(0x0102, 0x0304),
                },
            )],
        );
        assert_eq!(&buf[..], &[4, 0, 0, 0, 9, 0x03, 0x04, 0x01, 0x02]);
    }

    #[test]
    fn test_batch_expands_to_messages_sharing_sequence() {
        let batch: Vec<Message> = (0..3u16)
            .map(|i| {
                Message::with_sequence(
                    42,
                    MessageBody::UpdatePosition {
                        entity_id: Identifier::new(i, 1),
                        position: Vec2::splat(i as f32),
                    },
                )
            })
            .collect();

        let mut buf = BytesMut::new();
        write_record(&mut buf, &batch);
        assert_eq!(buf.len(), RECORD_HEADER_SIZE + 1 + 3 * 12);

        let mut data = &buf[..];
        let decoded = read_record(&mut data).unwrap();
        assert_eq!(decoded, batch);
        assert!(decoded.iter().all(|m| m.sequence_number == 42));
    }

    #[test]
    fn test_oversized_string_truncated_on_read() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Chat as u8);
        buf.put_u32(1);
        buf.put_u16(0);
        buf.put_u16(5);
        buf.put_u8(200);
        buf.put_slice(&[b'a'; 200]);
        buf.put_u8(0xAA);

        let mut data = &buf[..];
        let decoded = read_record(&mut data).unwrap();
        match &decoded[0].body {
            MessageBody::Chat { text, .. } => assert_eq!(text.len(), MAX_CHAT_LENGTH),
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(data, &[0xAA]);
    }

    #[test]
    fn test_oversized_string_truncated_on_write_at_char_boundary() {
        let name = "é".repeat(MAX_NAME_LENGTH);
        let mut buf = BytesMut::new();
        write_record(
            &mut buf,
            &[Message::new(MessageBody::Connect {
                revision: 1,
                name,
            })],
        );

        let mut data = &buf[..];
        let decoded = read_record(&mut data).unwrap();
        match &decoded[0].body {
            MessageBody::Connect { name, .. } => {
                assert_eq!(name.len(), MAX_NAME_LENGTH);
                assert!(name.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_malformed_records() {
        let mut data: &[u8] = &[MessageType::Join as u8, 0, 0, 0, 1, 0];
        assert!(matches!(
            read_record(&mut data),
            Err(CodecError::UnexpectedEnd { .. })
        ));

        let mut data: &[u8] = &[77, 0, 0, 0, 1];
        assert_eq!(read_record(&mut data), Err(CodecError::UnknownMessageType(77)));

        let mut data: &[u8] = &[MessageType::Discovery as u8, 0, 0, 0, 1];
        assert_eq!(
            read_record(&mut data),
            Err(CodecError::UnexpectedMessageType(MessageType::Discovery))
        );

        let mut data: &[u8] = &[MessageType::DespawnEntity as u8, 0, 0, 0, 1, 0];
        assert_eq!(read_record(&mut data), Err(CodecError::EmptyBatch));

        let mut data: &[u8] = &[MessageType::Reject as u8, 0, 0, 0, 1, 9];
        assert_eq!(read_record(&mut data), Err(CodecError::UnknownRejectReason(9)));
    }
}

use bitflags::bitflags;
use glam::Vec2;

use super::identifier::Identifier;

/// Discriminants below this value are reliable, above it unreliable.
pub const RELIABLE_THRESHOLD: u8 = 100;

pub const MAX_NAME_LENGTH: usize = 16;
pub const MAX_CHAT_LENGTH: usize = 128;
pub const MAX_BATCH_ITEMS: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Connect = 1,
    Reject = 2,
    Join = 3,
    Leave = 4,
    Synced = 5,
    Chat = 6,
    Disconnect = 7,
    SpawnEntity = 8,
    DespawnEntity = 9,
    UpdatePosition = 101,
    Input = 102,
    /// Multicast beacon only, never carried inside a packet.
    Discovery = 200,
}

impl MessageType {
    #[inline]
    pub fn is_reliable(self) -> bool {
        (self as u8) < RELIABLE_THRESHOLD
    }

    /// Batched types carry a `u8` count followed by that many items, each
    /// decoded into its own [`Message`].
    #[inline]
    pub fn is_batched(self) -> bool {
        matches!(
            self,
            Self::SpawnEntity | Self::DespawnEntity | Self::UpdatePosition
        )
    }

    /// Encoded size of one item of a batched type.
    pub fn batch_item_size(self) -> Option<usize> {
        match self {
            Self::SpawnEntity => Some(4 + 1 + 4 + 8),
            Self::DespawnEntity => Some(4),
            Self::UpdatePosition => Some(4 + 8),
            _ => None,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Connect,
            2 => Self::Reject,
            3 => Self::Join,
            4 => Self::Leave,
            5 => Self::Synced,
            6 => Self::Chat,
            7 => Self::Disconnect,
            8 => Self::SpawnEntity,
            9 => Self::DespawnEntity,
            101 => Self::UpdatePosition,
            102 => Self::Input,
            200 => Self::Discovery,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    Full = 1,
    VersionMismatch = 2,
}

impl TryFrom<u8> for RejectReason {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Full),
            2 => Ok(Self::VersionMismatch),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Avatar = 0,
    Marker = 1,
}

impl TryFrom<u8> for EntityKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Avatar),
            1 => Ok(Self::Marker),
            other => Err(other),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

impl Buttons {
    /// Unit movement direction, zero when nothing (or opposing keys) is held.
    pub fn direction(self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.contains(Self::UP) {
            dir.y += 1.0;
        }
        if self.contains(Self::DOWN) {
            dir.y -= 1.0;
        }
        if self.contains(Self::LEFT) {
            dir.x -= 1.0;
        }
        if self.contains(Self::RIGHT) {
            dir.x += 1.0;
        }
        dir.normalize_or_zero()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Connect {
        revision: u8,
        name: String,
    },
    Reject {
        reason: RejectReason,
    },
    Join {
        player_id: Identifier,
        name: String,
    },
    Leave {
        player_id: Identifier,
    },
    /// End of the initial snapshot.
    Synced,
    Chat {
        player_id: Identifier,
        text: String,
    },
    Disconnect,
    /// `owner` is the controlling player for avatars and the default
    /// identifier otherwise.
    SpawnEntity {
        entity_id: Identifier,
        kind: EntityKind,
        owner: Identifier,
        position: Vec2,
    },
    DespawnEntity {
        entity_id: Identifier,
    },
    UpdatePosition {
        entity_id: Identifier,
        position: Vec2,
    },
    Input {
        buttons: Buttons,
    },
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connect { .. } => MessageType::Connect,
            Self::Reject { .. } => MessageType::Reject,
            Self::Join { .. } => MessageType::Join,
            Self::Leave { .. } => MessageType::Leave,
            Self::Synced => MessageType::Synced,
            Self::Chat { .. } => MessageType::Chat,
            Self::Disconnect => MessageType::Disconnect,
            Self::SpawnEntity { .. } => MessageType::SpawnEntity,
            Self::DespawnEntity { .. } => MessageType::DespawnEntity,
            Self::UpdatePosition { .. } => MessageType::UpdatePosition,
            Self::Input { .. } => MessageType::Input,
        }
    }
}

/// One protocol event.
///
/// The type tag is derived from `body`, so a message can never carry fields
/// of a variant other than its own. `timestamp` is only meaningful on
/// received unreliable messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sequence_number: u32,
    pub timestamp: u32,
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            sequence_number: 0,
            timestamp: 0,
            body,
        }
    }

    pub fn with_sequence(sequence_number: u32, body: MessageBody) -> Self {
        Self {
            sequence_number,
            timestamp: 0,
            body,
        }
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.message_type().is_reliable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability_by_range() {
        assert!(MessageType::Connect.is_reliable());
        assert!(MessageType::DespawnEntity.is_reliable());
        assert!(!MessageType::UpdatePosition.is_reliable());
        assert!(!MessageType::Input.is_reliable());
    }

    #[test]
    fn test_discriminant_conversion() {
        for ty in [
            MessageType::Connect,
            MessageType::Synced,
            MessageType::SpawnEntity,
            MessageType::UpdatePosition,
            MessageType::Discovery,
        ] {
            assert_eq!(MessageType::try_from(ty as u8), Ok(ty));
        }
        assert_eq!(MessageType::try_from(100), Err(100));
        assert_eq!(MessageType::try_from(0), Err(0));
    }

    #[test]
    fn test_button_direction() {
        assert_eq!(Buttons::empty().direction(), Vec2::ZERO);
        assert_eq!((Buttons::UP | Buttons::DOWN).direction(), Vec2::ZERO);
        assert_eq!(Buttons::RIGHT.direction(), Vec2::X);

        let diagonal = (Buttons::UP | Buttons::LEFT).direction();
        assert!((diagonal.length() - 1.0).abs() < 1e-6);
    }
}

use std::collections::{BTreeMap, HashMap, VecDeque};

use glam::Vec2;
use skirmish::net::{Clock, Transport};
use skirmish::{EntityKind, Identifier, Message, MessageBody, ServerConnection};

const MAX_CHAT_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityView {
    pub kind: EntityKind,
    pub owner: Identifier,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Said { name: String, text: String },
    Notice(String),
}

/// Client-side mirror of the world, rebuilt from server messages.
#[derive(Debug, Default)]
pub struct Session {
    local_player: Option<Identifier>,
    players: BTreeMap<Identifier, String>,
    entities: HashMap<Identifier, EntityView>,
    chat: VecDeque<ChatLine>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection consumes our own `Join`, so the roster entry for the
    /// local player is added here.
    pub fn set_local_player(&mut self, player_id: Identifier, name: &str) {
        self.local_player = Some(player_id);
        self.players.insert(player_id, name.to_string());
    }

    /// Picks up the accepted identity and every message delivered so far.
    pub fn sync<T: Transport, C: Clock>(&mut self, connection: &mut ServerConnection<T, C>) {
        if self.local_player.is_none() {
            if let Some((player_id, name)) = connection.player_id().zip(connection.player_name()) {
                self.set_local_player(player_id, name);
            }
        }
        for message in connection.drain_messages() {
            self.apply(&message);
        }
    }

    pub fn local_player(&self) -> Option<Identifier> {
        self.local_player
    }

    pub fn players(&self) -> impl Iterator<Item = (Identifier, &str)> {
        self.players.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn player_name(&self, player_id: Identifier) -> Option<&str> {
        self.players.get(&player_id).map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = (Identifier, &EntityView)> {
        self.entities.iter().map(|(id, view)| (*id, view))
    }

    /// Position of the avatar controlled by the local player.
    pub fn local_avatar(&self) -> Option<&EntityView> {
        let local = self.local_player?;
        self.entities
            .values()
            .find(|view| view.kind == EntityKind::Avatar && view.owner == local)
    }

    pub fn chat(&self) -> impl Iterator<Item = &ChatLine> {
        self.chat.iter()
    }

    pub fn apply(&mut self, message: &Message) {
        match &message.body {
            MessageBody::Join { player_id, name } => {
                if Some(*player_id) != self.local_player {
                    self.notice(format!("{name} joined"));
                }
                self.players.insert(*player_id, name.clone());
            }
            MessageBody::Leave { player_id } => {
                if let Some(name) = self.players.remove(player_id) {
                    self.notice(format!("{name} left"));
                }
            }
            MessageBody::Chat { player_id, text } => {
                let name = self
                    .player_name(*player_id)
                    .unwrap_or("?")
                    .to_string();
                self.push_chat(ChatLine::Said {
                    name,
                    text: text.clone(),
                });
            }
            MessageBody::SpawnEntity {
                entity_id,
                kind,
                owner,
                position,
            } => {
                self.entities.insert(
                    *entity_id,
                    EntityView {
                        kind: *kind,
                        owner: *owner,
                        position: *position,
                    },
                );
            }
            MessageBody::DespawnEntity { entity_id } => {
                self.entities.remove(entity_id);
            }
            MessageBody::UpdatePosition {
                entity_id,
                position,
            } => {
                if let Some(view) = self.entities.get_mut(entity_id) {
                    view.position = *position;
                }
            }
            other => log::debug!("Session ignores {:?}", other.message_type()),
        }
    }

    pub fn notice(&mut self, text: impl Into<String>) {
        self.push_chat(ChatLine::Notice(text.into()));
    }

    fn push_chat(&mut self, line: ChatLine) {
        if self.chat.len() == MAX_CHAT_LINES {
            self.chat.pop_front();
        }
        self.chat.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish::net::{ManualClock, MemoryNetwork};
    use skirmish::{ClientConfig, ConnectionState, HostConfig, HostEvent, ServerHost};
    use std::net::SocketAddr;

    fn message(body: MessageBody) -> Message {
        Message {
            sequence_number: 1,
            timestamp: 0,
            body,
        }
    }

    #[test]
    fn test_roster_and_chat() {
        let alice = Identifier::new(0, 0);
        let bob = Identifier::new(1, 0);
        let mut session = Session::new();
        session.set_local_player(alice, "alice");

        session.apply(&message(MessageBody::Join {
            player_id: bob,
            name: "bob".into(),
        }));
        session.apply(&message(MessageBody::Chat {
            player_id: bob,
            text: "hi".into(),
        }));
        session.apply(&message(MessageBody::Leave { player_id: bob }));

        let players: Vec<_> = session.players().collect();
        assert_eq!(players, vec![(alice, "alice")]);

        let chat: Vec<_> = session.chat().cloned().collect();
        assert_eq!(
            chat,
            vec![
                ChatLine::Notice("bob joined".into()),
                ChatLine::Said {
                    name: "bob".into(),
                    text: "hi".into()
                },
                ChatLine::Notice("bob left".into()),
            ]
        );
    }

    #[test]
    fn test_own_player_listed_after_handshake() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let server_addr = SocketAddr::from(([10, 0, 0, 1], 27015));
        let mut host = ServerHost::with_transport(
            network.endpoint(server_addr),
            clock.clone(),
            HostConfig {
                announce: false,
                ..Default::default()
            },
        );
        let mut connection = ServerConnection::with_transport(
            network.endpoint(SocketAddr::from(([10, 0, 0, 2], 40000))),
            clock.clone(),
            server_addr,
            ClientConfig {
                player_name: "alice".into(),
                ..Default::default()
            },
        );
        let mut session = Session::new();

        connection.send();
        host.receive();
        let player_id = host
            .drain_events()
            .find_map(|event| match event {
                HostEvent::Connected { player_id, .. } => Some(player_id),
                _ => None,
            })
            .unwrap();
        host.send(player_id, MessageBody::Synced);
        host.send(
            player_id,
            MessageBody::Chat {
                player_id,
                text: "hi".into(),
            },
        );
        host.flush();

        connection.receive();
        session.sync(&mut connection);

        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(session.local_player(), Some(player_id));
        let players: Vec<_> = session.players().collect();
        assert_eq!(players, vec![(player_id, "alice")]);
        let chat: Vec<_> = session.chat().cloned().collect();
        assert_eq!(
            chat,
            vec![ChatLine::Said {
                name: "alice".into(),
                text: "hi".into()
            }]
        );
    }

    #[test]
    fn test_entities_follow_updates() {
        let alice = Identifier::new(0, 0);
        let avatar = Identifier::new(4, 0);
        let mut session = Session::new();
        session.set_local_player(alice, "alice");

        session.apply(&message(MessageBody::SpawnEntity {
            entity_id: avatar,
            kind: EntityKind::Avatar,
            owner: alice,
            position: Vec2::ZERO,
        }));
        session.apply(&message(MessageBody::UpdatePosition {
            entity_id: avatar,
            position: Vec2::new(1.0, 2.0),
        }));
        assert_eq!(
            session.local_avatar().map(|v| v.position),
            Some(Vec2::new(1.0, 2.0))
        );

        // Updates for unknown entities are dropped.
        session.apply(&message(MessageBody::UpdatePosition {
            entity_id: Identifier::new(9, 0),
            position: Vec2::ONE,
        }));
        assert_eq!(session.entities().count(), 1);

        session.apply(&message(MessageBody::DespawnEntity { entity_id: avatar }));
        assert!(session.local_avatar().is_none());
    }

    #[test]
    fn test_chat_history_is_bounded() {
        let mut session = Session::new();
        for i in 0..MAX_CHAT_LINES + 5 {
            session.notice(format!("{i}"));
        }
        assert_eq!(session.chat().count(), MAX_CHAT_LINES);
        assert_eq!(session.chat().next(), Some(&ChatLine::Notice("5".into())));
    }
}

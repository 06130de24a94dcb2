use std::collections::HashMap;

use glam::Vec2;

use skirmish::{Arena, Buttons, EntityKind, Identifier, MessageBody};

/// Half the side length of the square play area.
pub const ARENA_EXTENT: f32 = 20.0;
pub const AVATAR_SPEED: f32 = 8.0;

const MARKER_POSITIONS: [Vec2; 4] = [
    Vec2::new(-ARENA_EXTENT, -ARENA_EXTENT),
    Vec2::new(ARENA_EXTENT, -ARENA_EXTENT),
    Vec2::new(ARENA_EXTENT, ARENA_EXTENT),
    Vec2::new(-ARENA_EXTENT, ARENA_EXTENT),
];

const SPAWN_POINTS: [Vec2; 4] = [
    Vec2::new(-5.0, 0.0),
    Vec2::new(5.0, 0.0),
    Vec2::new(0.0, -5.0),
    Vec2::new(0.0, 5.0),
];

#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub owner: Identifier,
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub avatar: Identifier,
}

#[derive(Debug)]
pub struct World {
    entities: Arena<Entity>,
    players: HashMap<Identifier, Player>,
    spawn_index: usize,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        let mut entities = Arena::new();
        for position in MARKER_POSITIONS {
            entities.insert(Entity {
                kind: EntityKind::Marker,
                owner: Identifier::default(),
                position,
                velocity: Vec2::ZERO,
            });
        }

        Self {
            entities,
            players: HashMap::new(),
            spawn_index: 0,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn entity(&self, id: Identifier) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn player(&self, id: Identifier) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = (Identifier, &Player)> {
        self.players.iter().map(|(&id, player)| (id, player))
    }

    /// Spawns an avatar for the player and returns the avatar's identifier.
    pub fn add_player(&mut self, player_id: Identifier, name: String) -> Option<Identifier> {
        let position = SPAWN_POINTS[self.spawn_index % SPAWN_POINTS.len()];
        self.spawn_index += 1;

        let avatar = self.entities.insert(Entity {
            kind: EntityKind::Avatar,
            owner: player_id,
            position,
            velocity: Vec2::ZERO,
        })?;
        self.players.insert(player_id, Player { name, avatar });
        Some(avatar)
    }

    pub fn remove_player(&mut self, player_id: Identifier) -> Option<Player> {
        let player = self.players.remove(&player_id)?;
        self.entities.remove(player.avatar);
        Some(player)
    }

    pub fn apply_input(&mut self, player_id: Identifier, buttons: Buttons) {
        let Some(player) = self.players.get(&player_id) else {
            return;
        };
        if let Some(avatar) = self.entities.get_mut(player.avatar) {
            avatar.velocity = buttons.direction() * AVATAR_SPEED;
        }
    }

    pub fn step(&mut self, dt: f32) {
        let bound = Vec2::splat(ARENA_EXTENT);
        for (_, entity) in self.entities.iter_mut() {
            if entity.velocity != Vec2::ZERO {
                entity.position = (entity.position + entity.velocity * dt).clamp(-bound, bound);
            }
        }
    }

    pub fn spawn_message(&self, id: Identifier) -> Option<MessageBody> {
        let entity = self.entities.get(id)?;
        Some(MessageBody::SpawnEntity {
            entity_id: id,
            kind: entity.kind,
            owner: entity.owner,
            position: entity.position,
        })
    }

    pub fn spawn_messages(&self) -> Vec<MessageBody> {
        self.entities
            .iter()
            .map(|(id, entity)| MessageBody::SpawnEntity {
                entity_id: id,
                kind: entity.kind,
                owner: entity.owner,
                position: entity.position,
            })
            .collect()
    }

    pub fn position_updates(&self) -> Vec<MessageBody> {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.kind == EntityKind::Avatar)
            .map(|(id, entity)| MessageBody::UpdatePosition {
                entity_id: id,
                position: entity.position,
            })
            .collect()
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generational handle for network-visible players and entities.
///
/// Both halves must match for two identifiers to be equal, so a handle to a
/// freed slot never resolves to whatever reuses that slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Identifier {
    pub id: u16,
    pub generation: u16,
}

impl Identifier {
    pub const fn new(id: u16, generation: u16) -> Self {
        Self { id, generation }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub const MAX_SLOTS: usize = u16::MAX as usize + 1;

    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Returns `None` once all 65536 slots are live.
    pub fn insert(&mut self, value: T) -> Option<Identifier> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < Self::MAX_SLOTS => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u16
            }
            None => return None,
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;

        Some(Identifier::new(index, slot.generation))
    }

    pub fn remove(&mut self, id: Identifier) -> Option<T> {
        let slot = self.slots.get_mut(id.id as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.id);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: Identifier) -> Option<&T> {
        self.slots
            .get(id.id as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: Identifier) -> Option<&mut T> {
        self.slots
            .get_mut(id.id as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Identifier, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Identifier::new(index as u16, slot.generation), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Identifier, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (Identifier::new(index as u16, generation), value))
        })
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

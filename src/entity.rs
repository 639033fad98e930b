/*
    ALICE-Sim
    Copyright (C) 2026 Moroya Sakamoto

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as
    published by the Free Software Foundation, either version 3 of the
    License, or (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Entity handles and the live-entity table
//!
//! ```text
//! EntityRef (64 bits)
//! ┌──────────────┬───────────────┬──────────┐
//! │ index: u32   │ generation:u16│ flags:u16│
//! └──────────────┴───────────────┴──────────┘
//! ```
//!
//! A handle is valid iff the table's slot `index` is alive and carries the
//! same `generation`. Generations start at 1, so `EntityRef::NONE` (all zero)
//! never resolves.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque entity handle
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EntityRef {
    pub index: u32,
    pub generation: u16,
    /// Caller-defined tag bits, ignored by validity checks.
    pub flags: u16,
}

impl EntityRef {
    pub const NONE: Self = Self {
        index: 0,
        generation: 0,
        flags: 0,
    };

    #[inline]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self {
            index,
            generation,
            flags: 0,
        }
    }

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.generation == 0
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        (self.index as u64) | ((self.generation as u64) << 32) | ((self.flags as u64) << 48)
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u16,
            flags: (bits >> 48) as u16,
        }
    }

    /// Same slot and generation, flags ignored.
    #[inline]
    pub const fn same_entity(self, other: Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}:{}", self.index, self.generation)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// EntityTable
// ============================================================================

/// Generation counters, liveness bitset and free list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTable {
    generations: Vec<u16>,
    alive: Vec<u64>,
    free: Vec<u32>,
    count: u32,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots ever allocated
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.generations.len() as u32
    }

    /// Number of live entities
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Allocates a slot, reusing the most recently freed one first.
    pub fn allocate(&mut self) -> EntityRef {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(1);
                if self.alive.len() * 64 <= index as usize {
                    self.alive.push(0);
                }
                index
            }
        };
        self.set_alive(index, true);
        self.count += 1;
        EntityRef::new(index, self.generations[index as usize])
    }

    /// Clears the liveness bit. The slot is not reusable until [`release`](Self::release).
    pub fn kill(&mut self, entity: EntityRef) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.set_alive(entity.index, false);
        self.count -= 1;
        true
    }

    /// Bumps the slot's generation and returns it to the free list.
    pub fn release(&mut self, index: u32) {
        if let Some(generation) = self.generations.get_mut(index as usize) {
            *generation = match generation.wrapping_add(1) {
                0 => 1,
                g => g,
            };
            self.free.push(index);
        }
    }

    #[inline]
    pub fn is_alive(&self, entity: EntityRef) -> bool {
        self.generations.get(entity.index as usize) == Some(&entity.generation)
            && self.slot_alive(entity.index)
    }

    #[inline]
    pub fn slot_alive(&self, index: u32) -> bool {
        self.alive
            .get(index as usize / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    /// Current handle for a live slot
    #[inline]
    pub fn entity_at(&self, index: u32) -> Option<EntityRef> {
        if self.slot_alive(index) {
            Some(EntityRef::new(index, self.generations[index as usize]))
        } else {
            None
        }
    }

    /// Live entities in index order
    pub fn iter(&self) -> impl Iterator<Item = EntityRef> + '_ {
        (0..self.capacity()).filter_map(|i| self.entity_at(i))
    }

    fn set_alive(&mut self, index: u32, alive: bool) {
        let word = &mut self.alive[index as usize / 64];
        let bit = 1u64 << (index % 64);
        if alive {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_reuse() {
        let mut table = EntityTable::new();
        let a = table.allocate();
        let b = table.allocate();
        assert_eq!((a.index, b.index), (0, 1));
        assert!(table.is_alive(a));

        assert!(table.kill(a));
        table.release(a.index);
        assert!(!table.is_alive(a));

        let c = table.allocate();
        assert_eq!(c.index, a.index);
        assert_ne!(c.generation, a.generation);
        // Old handle should not alias the new entity
        assert!(!table.is_alive(a));
        assert!(table.is_alive(c));
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn test_none_never_alive() {
        let mut table = EntityTable::new();
        table.allocate();
        assert!(!table.is_alive(EntityRef::NONE));
        assert!(!table.is_alive(EntityRef::new(99, 1)));
    }

    #[test]
    fn test_bits_roundtrip_and_flags() {
        let mut e = EntityRef::new(12, 3);
        e.flags = 0x8001;
        assert_eq!(EntityRef::from_bits(e.to_bits()), e);
        assert!(e.same_entity(EntityRef::new(12, 3)));
    }

    #[test]
    fn test_liveness_spans_words() {
        let mut table = EntityTable::new();
        let all: Vec<_> = (0..130).map(|_| table.allocate()).collect();
        table.kill(all[100]);
        let alive: Vec<u32> = table.iter().map(|e| e.index).collect();
        assert_eq!(alive.len(), 129);
        assert!(!alive.contains(&100));
    }
}

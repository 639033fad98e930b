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

//! Generational arena backing the frame's collection heap
//!
//! Slots are addressed by `Handle { index, generation }`. Generations start at
//! 1, so the all-zero `Handle::NULL` never resolves. Freed slots go on a LIFO
//! free list; reuse bumps the generation so stale handles miss.
//!
//! The arena is plain data (`Vec` + integers): `Clone` yields an identical
//! index layout, which is what keeps handles valid across frame copies.

use serde::{Deserialize, Serialize};

/// Generation counter to detect stale handles
pub type Generation = u32;

const NO_FREE: u32 = u32::MAX;

/// Handle into an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Handle {
    pub index: u32,
    pub generation: Generation,
}

impl Handle {
    pub const NULL: Self = Self {
        index: 0,
        generation: 0,
    };

    #[inline]
    pub const fn new(index: u32, generation: Generation) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.generation == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry<T> {
    generation: Generation,
    next_free: u32,
    value: Option<T>,
}

/// Generational arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_head: u32,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: NO_FREE,
            len: 0,
        }
    }

    /// Number of live values
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots ever allocated (live + free)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(entry) = self.entries.get_mut(self.free_head as usize) {
            let index = self.free_head;
            self.free_head = entry.next_free;
            entry.next_free = NO_FREE;
            entry.value = Some(value);
            return Handle::new(index, entry.generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 1,
            next_free: NO_FREE,
            value: Some(value),
        });
        Handle::new(index, 1)
    }

    /// Removes the value; the slot's generation advances (skipping 0).
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation || entry.value.is_none() {
            return None;
        }
        let value = entry.value.take();
        entry.generation = match entry.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        entry.next_free = self.free_head;
        self.free_head = handle.index;
        self.len -= 1;
        value
    }

    #[inline]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.value.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.value.as_mut())
    }

    /// Live values in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.value
                .as_ref()
                .map(|v| (Handle::new(i as u32, e.generation), v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_basic() {
        let mut arena: Arena<i32> = Arena::new();

        let h1 = arena.insert(10);
        let h2 = arena.insert(20);

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(h1), Some(&10));
        assert_eq!(arena.get(h2), Some(&20));
        assert_eq!(arena.get(Handle::NULL), None);
    }

    #[test]
    fn test_arena_remove_reuse() {
        let mut arena: Arena<i32> = Arena::new();

        let h1 = arena.insert(10);
        let _h2 = arena.insert(20);

        assert_eq!(arena.remove(h1), Some(10));
        assert_eq!(arena.remove(h1), None);

        // Old handle should be invalid
        assert_eq!(arena.get(h1), None);

        // Insert reuses slot
        let h3 = arena.insert(30);
        assert_eq!(h3.index, h1.index);
        assert_ne!(h3.generation, h1.generation);
        assert_eq!(arena.get(h1), None);
        assert_eq!(arena.get(h3), Some(&30));
    }

    #[test]
    fn test_clone_keeps_handles() {
        let mut arena: Arena<Vec<u8>> = Arena::new();
        let h = arena.insert(vec![1, 2, 3]);
        let copy = arena.clone();

        arena.get_mut(h).unwrap().push(4);

        assert_eq!(copy.get(h), Some(&vec![1, 2, 3]));
        assert_eq!(arena.get(h).map(Vec::len), Some(4));
    }
}

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

//! Frame checksums and the rollback snapshot ring

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

const WYHASH_K: u64 = 0x517c_c1b7_2722_0a95;

/// 64-bit state checksum exchanged between peers
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub struct Checksum(pub u64);

impl Checksum {
    /// Folds `bytes` 8 at a time (little-endian, zero-padded tail), then
    /// mixes in the length and finalizes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut h = WYHASH_K;
        let mut chunks = bytes.chunks_exact(8);
        for chunk in &mut chunks {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            h = mix(h, u64::from_le_bytes(word));
        }
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut word = [0u8; 8];
            word[..tail.len()].copy_from_slice(tail);
            h = mix(h, u64::from_le_bytes(word));
        }
        h ^= bytes.len() as u64;

        h = (h ^ (h >> 30)).wrapping_mul(WYHASH_K);
        Self(h ^ (h >> 27))
    }
}

#[inline(always)]
const fn mix(h: u64, word: u64) -> u64 {
    (h ^ word).wrapping_mul(WYHASH_K).rotate_left(31)
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ============================================================================
// Frame Ring
// ============================================================================

/// The last `capacity` completed frames, oldest first.
///
/// Frames are pushed in strictly increasing tick order; pushing onto a full
/// ring evicts the oldest.
#[derive(Debug, Clone)]
pub struct FrameRing {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.capacity {
            if let Some(evicted) = self.frames.pop_front() {
                log::debug!("evicting snapshot for tick {}", evicted.number());
            }
        }
        self.frames.push_back(frame);
    }

    pub fn get(&self, tick: u64) -> Option<&Frame> {
        let oldest = self.oldest_tick()?;
        let offset = tick.checked_sub(oldest)?;
        self.frames.get(offset as usize)
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn oldest_tick(&self) -> Option<u64> {
        self.frames.front().map(Frame::number)
    }

    /// Drops every snapshot newer than `tick`.
    pub fn truncate_after(&mut self, tick: u64) {
        while self.frames.back().is_some_and(|f| f.number() > tick) {
            self.frames.pop_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::test_frame;

    fn frame_at(tick: u64) -> Frame {
        let mut frame = test_frame();
        frame.set_number(tick);
        frame
    }

    #[test]
    fn test_checksum_sensitive_to_every_byte() {
        let base = vec![7u8; 37];
        let reference = Checksum::of_bytes(&base);
        for i in [0, 8, 31, 36] {
            let mut changed = base.clone();
            changed[i] ^= 1;
            assert_ne!(Checksum::of_bytes(&changed), reference, "byte {i}");
        }
        // Zero padding must not collide with an explicit zero tail
        assert_ne!(Checksum::of_bytes(&[1, 0]), Checksum::of_bytes(&[1]));
    }

    #[test]
    fn test_checksum_display_hex() {
        assert_eq!(Checksum(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut ring = FrameRing::new(3);
        for tick in 0..5 {
            ring.push(frame_at(tick));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest_tick(), Some(2));
        assert!(ring.get(1).is_none());
        assert_eq!(ring.get(3).map(Frame::number), Some(3));
        assert_eq!(ring.latest().map(Frame::number), Some(4));
    }

    #[test]
    fn test_ring_truncate_after() {
        let mut ring = FrameRing::new(8);
        for tick in 10..15 {
            ring.push(frame_at(tick));
        }
        ring.truncate_after(12);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.latest().map(Frame::number), Some(12));
        assert!(ring.get(13).is_none());
    }
}

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

//! Frame-owned deterministic RNG
//!
//! xorshift64* with the state stored in the frame's global block, so it is
//! cloned, serialized and rolled back along with everything else.

use crate::fixed_point::Fixed;
use serde::{Deserialize, Serialize};

const MULTIPLIER: u64 = 0x2545_f491_4f6c_dd1d;

/// Deterministic xorshift64* generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRng {
    state: u64,
}

impl FrameRng {
    /// Seed of 0 is remapped, xorshift has no zero orbit.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { MULTIPLIER } else { seed },
        }
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(MULTIPLIER)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform integer in `0..max`. Returns 0 when `max` is 0.
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        ((u64::from(self.next_u32()) * u64::from(max)) >> 32) as u32
    }

    /// Uniform fixed-point value in `[0, 1)`.
    #[inline]
    pub fn next_fixed(&mut self) -> Fixed {
        Fixed::from_bits(i64::from(self.next_u32() >> 16))
    }

    /// Uniform fixed-point value in `[lo, hi)`.
    pub fn next_range(&mut self, lo: Fixed, hi: Fixed) -> Fixed {
        lo + (hi - lo) * self.next_fixed()
    }

    pub fn pick<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            slice.get(self.next_int(slice.len() as u32) as usize)
        }
    }

    #[must_use]
    pub const fn state(&self) -> u64 {
        self.state
    }
}

impl Default for FrameRng {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_sequence() {
        let mut a = FrameRng::new(0xdead_beef);
        let mut b = FrameRng::new(0xdead_beef);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_copy_forks_sequence() {
        let mut a = FrameRng::new(7);
        a.next_u64();
        let mut b = a;
        assert_eq!(a.next_u32(), b.next_u32());
    }

    #[test]
    fn test_bounds() {
        let mut rng = FrameRng::new(42);
        for _ in 0..1000 {
            assert!(rng.next_int(10) < 10);
            let f = rng.next_fixed();
            assert!(f >= Fixed::ZERO && f < Fixed::ONE);
        }
        assert_eq!(rng.next_int(0), 0);
    }

    #[test]
    fn test_zero_seed() {
        let mut rng = FrameRng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }
}

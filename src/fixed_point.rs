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

//! Fixed-point arithmetic for deterministic simulation
//!
//! All simulation state is expressed in Q48.16 (`i64` with 16 fractional
//! bits). Every operation is plain integer math, so results are bit-exact on
//! every CPU and compiler.
//!
//! Overflow policy: **wrapping**, everywhere. `+`, `-`, `*` and negation wrap
//! on overflow of the 64-bit raw value. Division is the only fallible
//! operation and reports [`SimError::DivideByZero`].
//!
//! Transcendentals (`sqrt`, `sin`, `cos`) are computed with integer Newton
//! iteration and a Taylor polynomial in a Q32 intermediate.

use crate::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Q48.16 fixed-point number (64-bit, 16 fractional bits)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Fixed(pub i64);

// Q32 constants for trig range reduction
const TRIG_ONE: i128 = 1 << 32;
const PI_Q32: i128 = 13_493_037_705;
const HALF_PI_Q32: i128 = 6_746_518_852;
const TWO_PI_Q32: i128 = 26_986_075_409;

impl Fixed {
    pub const FRAC_BITS: u32 = 16;
    pub const SCALE: i64 = 1 << 16;
    const FRAC_MASK: i64 = Self::SCALE - 1;

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << 16);
    pub const HALF: Self = Self(1 << 15);
    pub const MINUS_ONE: Self = Self(-(1 << 16));
    pub const MAX: Self = Self(i64::MAX);
    pub const MIN: Self = Self(i64::MIN);
    pub const PI: Self = Self(205_887);
    pub const HALF_PI: Self = Self(102_944);
    pub const TWO_PI: Self = Self(411_775);

    #[inline(always)]
    pub const fn from_int(n: i64) -> Self {
        Self(n.wrapping_shl(16))
    }

    #[inline(always)]
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    #[inline(always)]
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    /// `num / den` computed at build time for tuning constants. `den` must be
    /// non-zero.
    #[inline(always)]
    pub const fn from_ratio(num: i64, den: i64) -> Self {
        Self(num.wrapping_shl(16) / den)
    }

    /// Integer part, rounded toward negative infinity.
    #[inline(always)]
    pub const fn to_int(self) -> i64 {
        self.0 >> 16
    }

    /// Presentation-only conversion. Never feed the result back into state.
    #[inline(always)]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    #[inline(always)]
    pub const fn abs(self) -> Self {
        Self(self.0.wrapping_abs())
    }

    #[inline(always)]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline(always)]
    pub const fn signum(self) -> i64 {
        self.0.signum()
    }

    #[inline(always)]
    pub const fn floor(self) -> Self {
        Self(self.0 & !Self::FRAC_MASK)
    }

    #[inline(always)]
    pub const fn ceil(self) -> Self {
        Self(self.0.wrapping_add(Self::FRAC_MASK) & !Self::FRAC_MASK)
    }

    /// Rounds half-way cases toward positive infinity.
    #[inline(always)]
    pub const fn round(self) -> Self {
        Self(self.0.wrapping_add(Self::HALF.0) & !Self::FRAC_MASK)
    }

    #[inline(always)]
    pub const fn frac(self) -> Self {
        Self(self.0 & Self::FRAC_MASK)
    }

    #[inline(always)]
    #[must_use]
    pub fn clamp(self, lo: Self, hi: Self) -> Self {
        if self < lo {
            lo
        } else if self > hi {
            hi
        } else {
            self
        }
    }

    /// `a + (b - a) * t`, `t` unclamped.
    #[inline(always)]
    #[must_use]
    pub fn lerp(a: Self, b: Self, t: Self) -> Self {
        a + (b - a) * t
    }

    #[inline(always)]
    pub const fn mul_int(self, n: i64) -> Self {
        Self(self.0.wrapping_mul(n))
    }

    /// Fallible division, truncating toward zero.
    #[inline]
    pub fn try_div(self, rhs: Self) -> Result<Self> {
        if rhs.0 == 0 {
            return Err(SimError::DivideByZero);
        }
        Ok(Self((((self.0 as i128) << 16) / rhs.0 as i128) as i64))
    }

    #[inline]
    pub fn div_int(self, n: i64) -> Result<Self> {
        if n == 0 {
            return Err(SimError::DivideByZero);
        }
        Ok(Self(self.0.wrapping_div(n)))
    }

    /// Square root. Negative inputs yield zero.
    pub fn sqrt(self) -> Self {
        if self.0 <= 0 {
            return Self::ZERO;
        }
        Self(isqrt((self.0 as u128) << 16) as i64)
    }

    /// Sine of an angle in radians.
    pub fn sin(self) -> Self {
        Self(q32_to_q16(sin_q32((self.0 as i128) << 16)))
    }

    /// Cosine of an angle in radians.
    pub fn cos(self) -> Self {
        Self(q32_to_q16(sin_q32(((self.0 as i128) << 16) + HALF_PI_Q32)))
    }

    #[inline(always)]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline(always)]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

/// Integer square root by Newton iteration from an overestimate.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let bits = 128 - n.leading_zeros();
    let mut x = 1u128 << bits.div_ceil(2);
    loop {
        let y = (x + n / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}

#[inline(always)]
fn q32_to_q16(v: i128) -> i64 {
    ((v + (1 << 15)) >> 16) as i64
}

/// sin(x) for any x in Q32 radians.
fn sin_q32(x: i128) -> i128 {
    let x = x.rem_euclid(TWO_PI_Q32);
    if x < HALF_PI_Q32 {
        sin_quadrant(x)
    } else if x < PI_Q32 {
        sin_quadrant(PI_Q32 - x)
    } else if x < PI_Q32 + HALF_PI_Q32 {
        -sin_quadrant(x - PI_Q32)
    } else {
        -sin_quadrant(TWO_PI_Q32 - x)
    }
}

/// Taylor series to x^9 on [0, pi/2], Horner form.
fn sin_quadrant(x: i128) -> i128 {
    let x2 = (x * x) >> 32;
    let mut t = TRIG_ONE - x2 / 72;
    t = TRIG_ONE - ((x2 * t) >> 32) / 42;
    t = TRIG_ONE - ((x2 * t) >> 32) / 20;
    t = TRIG_ONE - ((x2 * t) >> 32) / 6;
    (x * t) >> 32
}

impl Add for Fixed {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fixed {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl Sub for Fixed {
    type Output = Self;
    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fixed {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.wrapping_sub(rhs.0);
    }
}

impl Mul for Fixed {
    type Output = Self;
    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        Self(((self.0 as i128 * rhs.0 as i128) >> 16) as i64)
    }
}

impl MulAssign for Fixed {
    #[inline(always)]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Neg for Fixed {
    type Output = Self;
    #[inline(always)]
    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f32())
    }
}

// ============================================================================
// FpVec2
// ============================================================================

/// 2D vector with fixed-point components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FpVec2 {
    pub x: Fixed,
    pub y: Fixed,
}

impl FpVec2 {
    pub const ZERO: Self = Self::new(Fixed::ZERO, Fixed::ZERO);
    pub const ONE: Self = Self::new(Fixed::ONE, Fixed::ONE);
    pub const UP: Self = Self::new(Fixed::ZERO, Fixed::ONE);
    pub const DOWN: Self = Self::new(Fixed::ZERO, Fixed::MINUS_ONE);
    pub const LEFT: Self = Self::new(Fixed::MINUS_ONE, Fixed::ZERO);
    pub const RIGHT: Self = Self::new(Fixed::ONE, Fixed::ZERO);

    #[inline(always)]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    #[inline(always)]
    pub const fn from_int(x: i64, y: i64) -> Self {
        Self::new(Fixed::from_int(x), Fixed::from_int(y))
    }

    #[inline(always)]
    pub fn dot(self, rhs: Self) -> Fixed {
        self.x * rhs.x + self.y * rhs.y
    }

    #[inline(always)]
    pub fn sqr_magnitude(self) -> Fixed {
        self.dot(self)
    }

    #[inline]
    pub fn magnitude(self) -> Fixed {
        self.sqr_magnitude().sqrt()
    }

    /// Unit vector in the same direction, or zero for a zero vector.
    pub fn normalized(self) -> Self {
        let len = self.magnitude();
        match (self.x.try_div(len), self.y.try_div(len)) {
            (Ok(x), Ok(y)) => Self::new(x, y),
            _ => Self::ZERO,
        }
    }

    #[inline(always)]
    #[must_use]
    pub fn scale(self, s: Fixed) -> Self {
        Self::new(self.x * s, self.y * s)
    }

    #[inline(always)]
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs())
    }

    #[inline(always)]
    #[must_use]
    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y))
    }

    #[inline(always)]
    #[must_use]
    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y))
    }

    /// Hash bits for state fingerprints.
    #[inline(always)]
    pub const fn hash_bits(self) -> u64 {
        (self.x.0 as u64) ^ (self.y.0 as u64).rotate_left(29)
    }
}

impl Add for FpVec2 {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for FpVec2 {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for FpVec2 {
    type Output = Self;
    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for FpVec2 {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<Fixed> for FpVec2 {
    type Output = Self;
    #[inline(always)]
    fn mul(self, rhs: Fixed) -> Self {
        self.scale(rhs)
    }
}

impl Neg for FpVec2 {
    type Output = Self;
    #[inline(always)]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Total order on (x, y), used for deterministic tie-breaks.
pub fn cmp_vec(a: FpVec2, b: FpVec2) -> Ordering {
    a.x.cmp(&b.x).then(a.y.cmp(&b.y))
}

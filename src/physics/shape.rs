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

//! Collision shapes and the narrow phase
//!
//! All tests are exact fixed-point arithmetic. Ties between the horizontal
//! and vertical separation axis resolve vertically, so a body resting on a
//! corner lands on it rather than sliding off.

use crate::fixed_point::{Fixed, FpVec2};
use serde::{Deserialize, Serialize};

/// Collider geometry, centred on the owning transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Box { half_extents: FpVec2 },
    Circle { radius: Fixed },
    /// Zero-height one-way platform surface
    Edge { half_width: Fixed },
}

impl Default for Shape {
    fn default() -> Self {
        Self::Box {
            half_extents: FpVec2::new(Fixed::HALF, Fixed::HALF),
        }
    }
}

impl Shape {
    #[inline]
    pub fn half_extents(&self) -> FpVec2 {
        match *self {
            Self::Box { half_extents } => half_extents,
            Self::Circle { radius } => FpVec2::new(radius, radius),
            Self::Edge { half_width } => FpVec2::new(half_width, Fixed::ZERO),
        }
    }

    #[inline]
    pub fn aabb(&self, position: FpVec2) -> Aabb {
        Aabb::from_center(position, self.half_extents())
    }

    #[inline]
    pub const fn is_one_way(&self) -> bool {
        matches!(self, Self::Edge { .. })
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub min: FpVec2,
    pub max: FpVec2,
}

impl Aabb {
    #[inline]
    pub fn from_center(center: FpVec2, half: FpVec2) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    #[inline]
    pub fn center(&self) -> FpVec2 {
        FpVec2::new(half(self.min.x + self.max.x), half(self.min.y + self.max.y))
    }

    #[inline]
    pub fn half_extents(&self) -> FpVec2 {
        FpVec2::new(half(self.max.x - self.min.x), half(self.max.y - self.min.y))
    }

    /// Touching edges count; a body resting exactly on a floor overlaps it.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    #[must_use]
    pub fn translated(&self, delta: FpVec2) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
        }
    }
}

#[inline(always)]
fn half(v: Fixed) -> Fixed {
    Fixed::from_bits(v.to_bits() >> 1)
}

/// Separation of shape A out of shape B
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Penetration {
    /// Unit direction to move A along
    pub normal: FpVec2,
    pub depth: Fixed,
}

impl Penetration {
    #[inline]
    fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            depth: self.depth,
        }
    }
}

/// Penetration of `a` (at `pa`) into `b` (at `pb`), if they overlap.
pub fn penetration(a: &Shape, pa: FpVec2, b: &Shape, pb: FpVec2) -> Option<Penetration> {
    match (*a, *b) {
        (Shape::Edge { .. }, Shape::Edge { .. }) => None,
        (Shape::Edge { .. }, _) => penetration(b, pb, a, pa).map(Penetration::flipped),
        (_, Shape::Edge { half_width }) => edge(a.half_extents(), pa, half_width, pb),
        (Shape::Box { half_extents: ha }, Shape::Box { half_extents: hb }) => {
            boxes(ha, pa, hb, pb)
        }
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => circles(ra, pa, rb, pb),
        (Shape::Circle { radius }, Shape::Box { half_extents }) => {
            circle_box(radius, pa, half_extents, pb)
        }
        (Shape::Box { half_extents }, Shape::Circle { radius }) => {
            circle_box(radius, pb, half_extents, pa).map(Penetration::flipped)
        }
    }
}

#[inline]
fn axis_sign(d: Fixed, positive: FpVec2) -> FpVec2 {
    if d.is_negative() {
        -positive
    } else {
        positive
    }
}

fn boxes(ha: FpVec2, pa: FpVec2, hb: FpVec2, pb: FpVec2) -> Option<Penetration> {
    let d = pa - pb;
    let ox = ha.x + hb.x - d.x.abs();
    let oy = ha.y + hb.y - d.y.abs();
    if ox <= Fixed::ZERO || oy <= Fixed::ZERO {
        return None;
    }
    Some(if oy <= ox {
        Penetration {
            normal: axis_sign(d.y, FpVec2::UP),
            depth: oy,
        }
    } else {
        Penetration {
            normal: axis_sign(d.x, FpVec2::RIGHT),
            depth: ox,
        }
    })
}

fn circles(ra: Fixed, pa: FpVec2, rb: Fixed, pb: FpVec2) -> Option<Penetration> {
    let d = pa - pb;
    let reach = ra + rb;
    if d.sqr_magnitude() >= reach * reach {
        return None;
    }
    let dist = d.magnitude();
    let normal = if dist == Fixed::ZERO {
        FpVec2::UP
    } else {
        d.normalized()
    };
    Some(Penetration {
        normal,
        depth: reach - dist,
    })
}

fn circle_box(radius: Fixed, pc: FpVec2, half: FpVec2, pb: FpVec2) -> Option<Penetration> {
    let min = pb - half;
    let max = pb + half;
    let closest = FpVec2::new(pc.x.clamp(min.x, max.x), pc.y.clamp(min.y, max.y));
    let diff = pc - closest;
    let dist_sq = diff.sqr_magnitude();
    if dist_sq >= radius * radius {
        return None;
    }
    let dist = diff.magnitude();
    if dist == Fixed::ZERO {
        // Centre inside the box: leave through the nearest face.
        return boxes(FpVec2::new(radius, radius), pc, half, pb);
    }
    Some(Penetration {
        normal: diff.normalized(),
        depth: radius - dist,
    })
}

/// A one-way edge only ever pushes up, and only bodies whose bottom is
/// below the surface while their top is above it.
fn edge(ha: FpVec2, pa: FpVec2, half_width: Fixed, pe: FpVec2) -> Option<Penetration> {
    if (pa.x - pe.x).abs() >= ha.x + half_width {
        return None;
    }
    let bottom = pa.y - ha.y;
    let top = pa.y + ha.y;
    if bottom >= pe.y || top <= pe.y {
        return None;
    }
    Some(Penetration {
        normal: FpVec2::UP,
        depth: pe.y - bottom,
    })
}

// ============================================================================
// Sweeps
// ============================================================================

/// First time of impact of a moving box against a static one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    /// Fraction of the translation travelled, `0..=1`
    pub t: Fixed,
    /// Surface normal at impact; zero when already overlapping at `t = 0`
    pub normal: FpVec2,
}

/// Slab test of `moving` translated by `delta` against `target`.
pub fn sweep(moving: &Aabb, delta: FpVec2, target: &Aabb) -> Option<Sweep> {
    let half = moving.half_extents();
    let origin = moving.center();
    let lo = target.min - half;
    let hi = target.max + half;

    let mut enter = Fixed::MIN;
    let mut exit = Fixed::MAX;
    let mut normal = FpVec2::ZERO;

    for (o, d, lo, hi, axis) in [
        (origin.x, delta.x, lo.x, hi.x, FpVec2::RIGHT),
        (origin.y, delta.y, lo.y, hi.y, FpVec2::UP),
    ] {
        if d == Fixed::ZERO {
            if o <= lo || o >= hi {
                return None;
            }
            continue;
        }
        let t1 = (lo - o).try_div(d).ok()?;
        let t2 = (hi - o).try_div(d).ok()?;
        let (near, far) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        if near > enter {
            enter = near;
            normal = axis_sign(-d, axis);
        }
        exit = exit.min(far);
    }

    if enter > exit || exit <= Fixed::ZERO || enter > Fixed::ONE {
        return None;
    }
    if enter < Fixed::ZERO {
        return Some(Sweep {
            t: Fixed::ZERO,
            normal: FpVec2::ZERO,
        });
    }
    Some(Sweep { t: enter, normal })
}

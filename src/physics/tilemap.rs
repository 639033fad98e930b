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

//! Frame-owned stage tilemap
//!
//! Row-major grid, row 0 at the bottom. The grid doubles as the static
//! broad phase: a query visits exactly the cells its bounds cover, in
//! ascending (y, x) order.

use crate::fixed_point::{Fixed, FpVec2};
use crate::physics::shape::{Aabb, Shape};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TileKind {
    #[default]
    Empty,
    Solid,
    /// One-way: solid from above only
    Semisolid,
    /// Solid; reports hits from below
    Bumpable,
}

impl TileKind {
    #[inline]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Grid coordinate of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tilemap {
    width: u32,
    height: u32,
    /// World position of the bottom-left corner of tile (0, 0)
    origin: FpVec2,
    tile_size: Fixed,
    tiles: Vec<TileKind>,
}

impl Default for Tilemap {
    fn default() -> Self {
        Self::new(0, 0, FpVec2::ZERO, Fixed::HALF)
    }
}

impl Tilemap {
    /// `tile_size` must be positive.
    pub fn new(width: u32, height: u32, origin: FpVec2, tile_size: Fixed) -> Self {
        Self {
            width,
            height,
            origin,
            tile_size,
            tiles: vec![TileKind::Empty; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn tile_size(&self) -> Fixed {
        self.tile_size
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Out-of-range cells read as empty.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> TileKind {
        self.offset(x, y)
            .and_then(|i| self.tiles.get(i).copied())
            .unwrap_or_default()
    }

    /// Returns false for out-of-range cells.
    pub fn set(&mut self, x: i32, y: i32, kind: TileKind) -> bool {
        match self.offset(x, y).and_then(|i| self.tiles.get_mut(i)) {
            Some(tile) => {
                *tile = kind;
                true
            }
            None => false,
        }
    }

    /// Fills the inclusive rectangle `(x0, y0)..=(x1, y1)`.
    #[must_use]
    pub fn with_rect(mut self, x0: i32, y0: i32, x1: i32, y1: i32, kind: TileKind) -> Self {
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.set(x, y, kind);
            }
        }
        self
    }

    /// World-space box covering every cell
    pub fn bounds(&self) -> Aabb {
        let size = FpVec2::new(
            self.tile_size.mul_int(i64::from(self.width)),
            self.tile_size.mul_int(i64::from(self.height)),
        );
        Aabb {
            min: self.origin,
            max: self.origin + size,
        }
    }

    pub fn tile_aabb(&self, coord: TileCoord) -> Aabb {
        let min = self.origin
            + FpVec2::new(
                self.tile_size.mul_int(i64::from(coord.x)),
                self.tile_size.mul_int(i64::from(coord.y)),
            );
        Aabb {
            min,
            max: min + FpVec2::new(self.tile_size, self.tile_size),
        }
    }

    /// Cell containing `position`, unclamped.
    pub fn tile_at(&self, position: FpVec2) -> Option<TileCoord> {
        let local = position - self.origin;
        let x = local.x.try_div(self.tile_size).ok()?.floor().to_int();
        let y = local.y.try_div(self.tile_size).ok()?.floor().to_int();
        Some(TileCoord {
            x: x.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
            y: y.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
        })
    }

    /// Collision geometry of a tile: shape and its centre. Semisolid tiles
    /// are an edge along their top face.
    pub fn collider(&self, coord: TileCoord) -> Option<(Shape, FpVec2)> {
        let bounds = self.tile_aabb(coord);
        let half = bounds.half_extents();
        match self.get(coord.x, coord.y) {
            TileKind::Empty => None,
            TileKind::Solid | TileKind::Bumpable => Some((
                Shape::Box { half_extents: half },
                bounds.center(),
            )),
            TileKind::Semisolid => Some((
                Shape::Edge { half_width: half.x },
                FpVec2::new(bounds.center().x, bounds.max.y),
            )),
        }
    }

    /// Non-empty cells touching `bounds`, ascending by row then column.
    pub fn cells_in(&self, bounds: &Aabb) -> Vec<(TileCoord, TileKind)> {
        let (Some(lo), Some(hi)) = (self.tile_at(bounds.min), self.tile_at(bounds.max)) else {
            return Vec::new();
        };
        let x0 = lo.x.max(0);
        let y0 = lo.y.max(0);
        let x1 = hi.x.min(self.width as i32 - 1);
        let y1 = hi.y.min(self.height as i32 - 1);

        let mut cells = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                let kind = self.get(x, y);
                if !kind.is_empty() {
                    cells.push((TileCoord { x, y }, kind));
                }
            }
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> Tilemap {
        // 10x4 tiles of 1 unit, floor on row 0, semisolid at (5, 2)
        Tilemap::new(10, 4, FpVec2::ZERO, Fixed::ONE)
            .with_rect(0, 0, 9, 0, TileKind::Solid)
            .with_rect(5, 2, 5, 2, TileKind::Semisolid)
    }

    #[test]
    fn test_get_set_bounds() {
        let mut map = stage();
        assert_eq!(map.get(3, 0), TileKind::Solid);
        assert_eq!(map.get(-1, 0), TileKind::Empty);
        assert_eq!(map.get(0, 99), TileKind::Empty);
        assert!(map.set(3, 3, TileKind::Bumpable));
        assert!(!map.set(10, 0, TileKind::Solid));
    }

    #[test]
    fn test_cells_in_order() {
        let map = stage();
        let bounds = Aabb {
            min: FpVec2::new(Fixed::from_ratio(7, 2), Fixed::HALF),
            max: FpVec2::new(Fixed::from_ratio(11, 2), Fixed::from_ratio(5, 2)),
        };
        let coords: Vec<(i32, i32)> = map.cells_in(&bounds).iter().map(|(c, _)| (c.x, c.y)).collect();
        assert_eq!(coords, vec![(3, 0), (4, 0), (5, 0), (5, 2)]);
    }

    #[test]
    fn test_colliders() {
        let map = stage();
        let (shape, center) = map.collider(TileCoord { x: 2, y: 0 }).unwrap();
        assert_eq!(
            shape,
            Shape::Box {
                half_extents: FpVec2::new(Fixed::HALF, Fixed::HALF)
            }
        );
        assert_eq!(center, FpVec2::new(Fixed::from_ratio(5, 2), Fixed::HALF));

        let (edge, top) = map.collider(TileCoord { x: 5, y: 2 }).unwrap();
        assert!(edge.is_one_way());
        assert_eq!(top.y, Fixed::from_int(3));
        assert!(map.collider(TileCoord { x: 5, y: 1 }).is_none());
    }
}

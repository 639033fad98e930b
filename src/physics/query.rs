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

//! Spatial queries against tiles and entity colliders
//!
//! Broad phase: the tilemap grid for static geometry, an AABB pretest over
//! the dense collider storage (index order) for entities. Hit lists are
//! sorted by distance, then entities by slot index, then tiles by (y, x).

use crate::entity::EntityRef;
use crate::fixed_point::{Fixed, FpVec2};
use crate::frame::Frame;
use crate::physics::shape::{penetration, sweep, Aabb, Shape};
use crate::physics::tilemap::TileCoord;
use crate::physics::{layers, Collider, MovingPlatform, PhysicsBody, Transform2D};
use crate::Result;

/// What a hit touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    Entity(EntityRef),
    Tile(TileCoord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub target: HitTarget,
    pub shape: Shape,
    pub position: FpVec2,
    /// Velocity of the touched collider, zero for tiles
    pub velocity: FpVec2,
    /// Direction that separates the query shape from the hit
    pub normal: FpVec2,
    /// Overlap depth; zero for cast hits that only touch
    pub depth: Fixed,
    /// Fraction of the cast travelled, zero for overlaps
    pub distance: Fixed,
}

impl Hit {
    #[inline]
    pub fn entity(&self) -> EntityRef {
        match self.target {
            HitTarget::Entity(e) => e,
            HitTarget::Tile(_) => EntityRef::NONE,
        }
    }

    #[inline]
    pub fn tile(&self) -> Option<TileCoord> {
        match self.target {
            HitTarget::Tile(c) => Some(c),
            HitTarget::Entity(_) => None,
        }
    }

    fn sort_key(&self) -> (Fixed, u8, u32, i32, i32) {
        match self.target {
            HitTarget::Entity(e) => (self.distance, 0, e.index, 0, 0),
            HitTarget::Tile(c) => (self.distance, 1, 0, c.y, c.x),
        }
    }
}

/// Layer mask and exclusions for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryFilter {
    pub mask: u32,
    pub ignore: EntityRef,
    pub solids_only: bool,
}

impl QueryFilter {
    pub const fn new(mask: u32) -> Self {
        Self {
            mask,
            ignore: EntityRef::NONE,
            solids_only: false,
        }
    }

    #[must_use]
    pub const fn ignoring(mut self, entity: EntityRef) -> Self {
        self.ignore = entity;
        self
    }

    #[must_use]
    pub const fn solids(mut self) -> Self {
        self.solids_only = true;
        self
    }
}

struct Candidate {
    target: HitTarget,
    shape: Shape,
    position: FpVec2,
    velocity: FpVec2,
}

fn collider_velocity(frame: &Frame, entity: EntityRef) -> FpVec2 {
    frame
        .try_get::<PhysicsBody>(entity)
        .map(|b| b.velocity)
        .or_else(|| frame.try_get::<MovingPlatform>(entity).map(|p| p.velocity))
        .unwrap_or_default()
}

/// Everything whose bounds touch `bounds`, tiles first, each group in
/// storage order.
fn candidates(frame: &Frame, bounds: &Aabb, filter: &QueryFilter) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    if filter.mask & layers::STAGE != 0 {
        for (coord, _) in frame.stage.cells_in(bounds) {
            if let Some((shape, position)) = frame.stage.collider(coord) {
                out.push(Candidate {
                    target: HitTarget::Tile(coord),
                    shape,
                    position,
                    velocity: FpVec2::ZERO,
                });
            }
        }
    }
    for (entity, (transform, collider)) in frame.filter::<(Transform2D, Collider)>()? {
        if entity.same_entity(filter.ignore)
            || collider.layer & filter.mask == 0
            || (filter.solids_only && !collider.solid)
        {
            continue;
        }
        if !collider.shape.aabb(transform.position).overlaps(bounds) {
            continue;
        }
        out.push(Candidate {
            target: HitTarget::Entity(entity),
            shape: collider.shape,
            position: transform.position,
            velocity: collider_velocity(frame, entity),
        });
    }
    Ok(out)
}

fn sorted(mut hits: Vec<Hit>) -> Vec<Hit> {
    hits.sort_by_key(Hit::sort_key);
    hits
}

/// Colliders overlapping `shape` placed at `position`.
pub fn overlap_shape(
    frame: &Frame,
    position: FpVec2,
    shape: &Shape,
    filter: &QueryFilter,
) -> Result<Vec<Hit>> {
    let bounds = shape.aabb(position);
    let hits = candidates(frame, &bounds, filter)?
        .into_iter()
        .filter_map(|c| {
            let p = penetration(shape, position, &c.shape, c.position)?;
            Some(Hit {
                target: c.target,
                shape: c.shape,
                position: c.position,
                velocity: c.velocity,
                normal: p.normal,
                depth: p.depth,
                distance: Fixed::ZERO,
            })
        })
        .collect();
    Ok(sorted(hits))
}

/// Every collider `shape` would touch moving from `position` by
/// `translation`, nearest first.
///
/// Shapes are swept as their bounding boxes. One-way edges only stop casts
/// that land on them from above.
pub fn shape_cast_all(
    frame: &Frame,
    position: FpVec2,
    shape: &Shape,
    translation: FpVec2,
    filter: &QueryFilter,
) -> Result<Vec<Hit>> {
    let start = shape.aabb(position);
    let swept = start.union(&start.translated(translation));
    let mut hits = Vec::new();
    for c in candidates(frame, &swept, filter)? {
        let target = c.shape.aabb(c.position);
        let Some(hit) = sweep(&start, translation, &target) else {
            continue;
        };
        let overlap = if hit.t == Fixed::ZERO {
            penetration(shape, position, &c.shape, c.position)
        } else {
            None
        };
        if hit.t == Fixed::ZERO && overlap.is_none() {
            // Boxes touch but the real shapes do not.
            continue;
        }
        let normal = overlap.map_or(hit.normal, |p| p.normal);
        if c.shape.is_one_way() && (translation.y >= Fixed::ZERO || normal != FpVec2::UP) {
            continue;
        }
        hits.push(Hit {
            target: c.target,
            shape: c.shape,
            position: c.position,
            velocity: c.velocity,
            normal,
            depth: overlap.map_or(Fixed::ZERO, |p| p.depth),
            distance: hit.t,
        });
    }
    Ok(sorted(hits))
}

/// Colliders overlapping `entity`'s own collider, excluding itself.
pub fn check_overlap(frame: &Frame, entity: EntityRef, filter: &QueryFilter) -> Result<Vec<Hit>> {
    let position = frame.get::<Transform2D>(entity)?.position;
    let shape = frame.get::<Collider>(entity)?.shape;
    overlap_shape(frame, position, &shape, &filter.ignoring(entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Schema;
    use crate::config::SimConfig;
    use crate::physics::tilemap::{TileKind, Tilemap};

    fn world() -> Frame {
        let schema = crate::physics::register(Schema::builder()).build();
        let mut frame = Frame::new(schema, &SimConfig::default());
        frame.stage = Tilemap::new(20, 10, FpVec2::ZERO, Fixed::ONE)
            .with_rect(0, 0, 19, 0, TileKind::Solid)
            .with_rect(10, 1, 10, 5, TileKind::Solid);
        frame
    }

    fn crate_at(frame: &mut Frame, x: i64, y: i64, layer: u32) -> EntityRef {
        let e = frame.create();
        frame
            .add(e, Transform2D { position: FpVec2::from_int(x, y) })
            .unwrap();
        frame
            .add(e, Collider { shape: Shape::default(), layer, solid: true })
            .unwrap();
        e
    }

    #[test]
    fn test_overlap_layers_and_order() {
        let mut frame = world();
        let a = crate_at(&mut frame, 3, 2, layers::OBJECT);
        let b = crate_at(&mut frame, 3, 2, layers::PLAYER);
        let probe = Shape::Box {
            half_extents: FpVec2::new(Fixed::ONE, Fixed::ONE),
        };
        let at = FpVec2::new(Fixed::from_int(3), Fixed::from_ratio(3, 2));

        let all = overlap_shape(&frame, at, &probe, &QueryFilter::new(layers::ALL)).unwrap();
        let targets: Vec<HitTarget> = all.iter().map(|h| h.target).collect();
        assert_eq!(targets[0], HitTarget::Entity(a));
        assert_eq!(targets[1], HitTarget::Entity(b));
        assert!(targets[2..].iter().all(|t| matches!(t, HitTarget::Tile(_))));

        let objects = overlap_shape(&frame, at, &probe, &QueryFilter::new(layers::OBJECT)).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].entity(), a);
    }

    #[test]
    fn test_check_overlap_ignores_self() {
        let mut frame = world();
        let a = crate_at(&mut frame, 5, 3, layers::OBJECT);
        let b = crate_at(&mut frame, 5, 3, layers::OBJECT);
        let hits = check_overlap(&frame, a, &QueryFilter::new(layers::OBJECT)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity(), b);
    }

    #[test]
    fn test_cast_sorted_by_distance() {
        let mut frame = world();
        let far = crate_at(&mut frame, 8, 3, layers::OBJECT);
        let near = crate_at(&mut frame, 6, 3, layers::OBJECT);
        let start = FpVec2::from_int(2, 3);

        let hits = shape_cast_all(
            &frame,
            start,
            &Shape::default(),
            FpVec2::from_int(10, 0),
            &QueryFilter::new(layers::OBJECT | layers::STAGE),
        )
        .unwrap();
        assert_eq!(hits[0].entity(), near);
        assert_eq!(hits[1].entity(), far);
        // Wall column: both covered rows hit at the same distance, lower row first
        assert_eq!(hits[2].tile(), Some(TileCoord { x: 10, y: 2 }));
        assert_eq!(hits[3].tile(), Some(TileCoord { x: 10, y: 3 }));
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(hits[0].normal, FpVec2::LEFT);
    }
}

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

//! Deterministic 2D physics
//!
//! ```text
//! PlatformSystem          move kinematic platforms along their path
//!        │
//! PhysicsSystem           per body, index order:
//!   integrate velocity ── substeps of at most max_step
//!        │                   │
//!        │            overlap_shape ─► contacts (ListRef<Contact>)
//!        │                   │          BeforePhysicsCollision may veto
//!        │            relaxation: N passes of depth * correction_rate
//!        ▼                   │
//!   ground / ceiling / wall flags, crush flag ─► BodyCrushed
//! ```

pub mod query;
pub mod shape;
pub mod solver;
pub mod tilemap;

pub use query::{check_overlap, overlap_shape, shape_cast_all, Hit, HitTarget, QueryFilter};
pub use shape::{Aabb, Penetration, Shape};
pub use solver::{PhysicsSystem, PlatformSystem};
pub use tilemap::{TileCoord, TileKind, Tilemap};

use crate::component::{Component, SchemaBuilder};
use crate::entity::EntityRef;
use crate::fixed_point::{Fixed, FpVec2};
use crate::heap::{CollectionHeap, ListRef};
use serde::{Deserialize, Serialize};

/// Collision layer bits
pub mod layers {
    pub const STAGE: u32 = 1 << 0;
    pub const PLAYER: u32 = 1 << 1;
    pub const OBJECT: u32 = 1 << 2;
    pub const PLATFORM: u32 = 1 << 3;
    pub const ALL: u32 = u32::MAX;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform2D {
    pub position: FpVec2,
}

impl Component for Transform2D {
    const NAME: &'static str = "Transform2D";
}

/// Per-body solver state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyState {
    #[default]
    Free,
    Correcting,
}

/// One overlap gathered for the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// `EntityRef::NONE` for tiles
    pub other: EntityRef,
    pub tile: Option<TileCoord>,
    /// Direction the body is pushed out along
    pub normal: FpVec2,
    pub depth: Fixed,
    pub shape: Shape,
    pub position: FpVec2,
    pub velocity: FpVec2,
}

/// Dynamic body moved and resolved by the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicsBody {
    pub velocity: FpVec2,
    pub gravity_scale: Fixed,
    /// Layers this body collides with
    pub mask: u32,
    pub frozen: bool,
    pub state: BodyState,
    pub grounded: bool,
    pub hit_ceiling: bool,
    pub wall_left: bool,
    pub wall_right: bool,
    /// Set when penetration against a moving solid could not be resolved
    pub crushed: bool,
    pub contacts: ListRef<Contact>,
}

impl Default for PhysicsBody {
    fn default() -> Self {
        Self {
            velocity: FpVec2::ZERO,
            gravity_scale: Fixed::ONE,
            mask: layers::STAGE | layers::PLATFORM,
            frozen: false,
            state: BodyState::Free,
            grounded: false,
            hit_ceiling: false,
            wall_left: false,
            wall_right: false,
            crushed: false,
            contacts: ListRef::NULL,
        }
    }
}

impl Component for PhysicsBody {
    const NAME: &'static str = "PhysicsBody";
}

fn free_contacts(body: &PhysicsBody, heap: &mut CollectionHeap) {
    heap.free_list(body.contacts);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collider {
    pub shape: Shape,
    pub layer: u32,
    /// Solid colliders push bodies out; others only report overlaps
    pub solid: bool,
}

impl Default for Collider {
    fn default() -> Self {
        Self {
            shape: Shape::default(),
            layer: layers::OBJECT,
            solid: false,
        }
    }
}

impl Component for Collider {
    const NAME: &'static str = "Collider";
}

/// Kinematic solid that travels inside `[min, max]`, reversing at the ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovingPlatform {
    pub velocity: FpVec2,
    pub min: FpVec2,
    pub max: FpVec2,
}

impl Component for MovingPlatform {
    const NAME: &'static str = "MovingPlatform";
}

/// Registers the physics components and the contact pool.
#[must_use]
pub fn register(builder: SchemaBuilder) -> SchemaBuilder {
    builder
        .component::<Transform2D>()
        .component_with_teardown::<PhysicsBody>(free_contacts)
        .component::<Collider>()
        .component::<MovingPlatform>()
        .list::<Contact>()
}

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

//! Component-pair interaction callbacks
//!
//! Systems register `(A, B)` handlers at startup. Each tick the
//! [`InteractionSystem`] finds overlapping [`Interactable`] entities and,
//! for each unordered pair, runs every matching handler in registration
//! order, swapping the pair when the components are found the other way
//! round. Pairs are visited in ascending (lower index, higher index) order.

use crate::component::{Component, ComponentId, Schema};
use crate::entity::EntityRef;
use crate::fixed_point::FpVec2;
use crate::frame::{Frame, SystemId};
use crate::physics::shape::{penetration, Aabb, Shape};
use crate::physics::{Collider, Transform2D};
use crate::session::SimContext;
use crate::system::{System, SystemKind};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Marks an entity for interaction checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactable {
    pub enabled: bool,
}

impl Default for Interactable {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Component for Interactable {
    const NAME: &'static str = "Interactable";
}

/// `(frame, ctx, entity with A, entity with B)`
pub type InteractionHandler =
    Arc<dyn Fn(&mut Frame, &SimContext, EntityRef, EntityRef) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    a: ComponentId,
    b: ComponentId,
    system: SystemId,
    handler: InteractionHandler,
}

/// Ordered `(A, B) -> handler` registrations
#[derive(Clone, Default)]
pub struct InteractionTable {
    entries: Vec<Entry>,
}

impl InteractionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Component, B: Component>(
        &mut self,
        schema: &Schema,
        system: SystemId,
        handler: InteractionHandler,
    ) -> Result<()> {
        self.entries.push(Entry {
            a: schema.component_id::<A>()?,
            b: schema.component_id::<B>()?,
            system,
            handler,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every handler matching the pair. Stops early once either
    /// entity is gone.
    pub fn dispatch(
        &self,
        frame: &mut Frame,
        ctx: &SimContext,
        first: EntityRef,
        second: EntityRef,
    ) -> Result<()> {
        for entry in &self.entries {
            if !frame.exists(first) || !frame.exists(second) {
                break;
            }
            if !frame.is_system_enabled(entry.system) {
                continue;
            }
            let pair = if frame.has_component(entry.a, first) && frame.has_component(entry.b, second)
            {
                Some((first, second))
            } else if frame.has_component(entry.b, first) && frame.has_component(entry.a, second) {
                Some((second, first))
            } else {
                None
            };
            if let Some((a, b)) = pair {
                if let Err(err) = (entry.handler)(frame, ctx, a, b) {
                    if !err.is_entity_local() {
                        return Err(err);
                    }
                    log::warn!("tick {}: interaction {a} x {b}: {err}", frame.number());
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for InteractionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

struct Participant {
    entity: EntityRef,
    bounds: Aabb,
    shape: Shape,
    position: FpVec2,
}

/// Overlapping interactable pairs, sorted by slot index
pub fn overlapping_pairs(frame: &Frame) -> Result<Vec<(EntityRef, EntityRef)>> {
    let mut list: Vec<Participant> = frame
        .filter::<(Interactable, Transform2D, Collider)>()?
        .filter(|(_, (i, _, _))| i.enabled)
        .map(|(entity, (_, t, c))| Participant {
            entity,
            bounds: c.shape.aabb(t.position),
            shape: c.shape,
            position: t.position,
        })
        .collect();
    // Sweep and prune along x; the index tie-break keeps the order total.
    list.sort_by_key(|p| (p.bounds.min.x, p.entity.index));

    let mut pairs = Vec::new();
    for (i, a) in list.iter().enumerate() {
        for b in &list[i + 1..] {
            if b.bounds.min.x > a.bounds.max.x {
                break;
            }
            if !a.bounds.overlaps(&b.bounds) {
                continue;
            }
            if penetration(&a.shape, a.position, &b.shape, b.position).is_none() {
                continue;
            }
            if a.entity.index < b.entity.index {
                pairs.push((a.entity, b.entity));
            } else {
                pairs.push((b.entity, a.entity));
            }
        }
    }
    pairs.sort_by_key(|(a, b)| (a.index, b.index));
    Ok(pairs)
}

/// Dispatches interaction handlers for every overlapping pair
pub struct InteractionSystem;

impl System for InteractionSystem {
    fn name(&self) -> &'static str {
        "InteractionSystem"
    }

    fn kind(&self) -> SystemKind {
        SystemKind::Global
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        if ctx.interactions.is_empty() {
            return Ok(());
        }
        for (a, b) in overlapping_pairs(frame)? {
            ctx.interactions.dispatch(frame, ctx, a, b)?;
        }
        Ok(())
    }
}

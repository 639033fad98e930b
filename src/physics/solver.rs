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

//! Relaxation contact solver
//!
//! Not an impulse solver: each pass moves the body a fixed fraction of the
//! remaining penetration along each contact normal. The pass count and the
//! fraction come from [`SolverConfig`], so the cost per body is bounded and
//! the result only depends on integer arithmetic.

use crate::config::SolverConfig;
use crate::entity::EntityRef;
use crate::event::SimEvent;
use crate::fixed_point::{Fixed, FpVec2};
use crate::frame::Frame;
use crate::physics::query::{overlap_shape, QueryFilter};
use crate::physics::shape::{penetration, Shape};
use crate::physics::tilemap::{TileCoord, TileKind, Tilemap};
use crate::physics::{BodyState, Collider, Contact, MovingPlatform, PhysicsBody, Transform2D};
use crate::session::SimContext;
use crate::signal::Signal;
use crate::system::{System, SystemKind};
use crate::Result;

/// |normal component| that counts as floor, ceiling or wall
const SURFACE: Fixed = Fixed::from_ratio(7, 10);

// ============================================================================
// Platforms
// ============================================================================

/// Moves kinematic platforms, bouncing between their bounds.
pub struct PlatformSystem;

impl System for PlatformSystem {
    fn name(&self) -> &'static str {
        "PlatformSystem"
    }

    fn kind(&self) -> SystemKind {
        SystemKind::Filtered
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        let dt = ctx.dt();
        frame.for_each::<(MovingPlatform, Transform2D), _>(None, |frame, entity| {
            let platform = *frame.get::<MovingPlatform>(entity)?;
            let transform = frame.get_mut::<Transform2D>(entity)?;
            let (x, vx) = bounce(
                transform.position.x + platform.velocity.x * dt,
                platform.velocity.x,
                platform.min.x,
                platform.max.x,
            );
            let (y, vy) = bounce(
                transform.position.y + platform.velocity.y * dt,
                platform.velocity.y,
                platform.min.y,
                platform.max.y,
            );
            transform.position = FpVec2::new(x, y);
            frame.get_mut::<MovingPlatform>(entity)?.velocity = FpVec2::new(vx, vy);
            Ok(())
        })
    }
}

fn bounce(next: Fixed, velocity: Fixed, min: Fixed, max: Fixed) -> (Fixed, Fixed) {
    if (next < min && velocity < Fixed::ZERO) || (next > max && velocity > Fixed::ZERO) {
        (next.clamp(min, max), -velocity)
    } else {
        (next, velocity)
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// Integrates and resolves every [`PhysicsBody`], in slot order.
pub struct PhysicsSystem;

impl System for PhysicsSystem {
    fn name(&self) -> &'static str {
        "PhysicsSystem"
    }

    fn kind(&self) -> SystemKind {
        SystemKind::Filtered
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        frame.for_each::<(PhysicsBody, Transform2D, Collider), _>(None, |frame, entity| {
            step_body(frame, ctx, entity)
        })
    }
}

/// Runs relaxation passes over `contacts` and returns the deepest
/// penetration left.
pub fn resolve_penetration(
    position: &mut FpVec2,
    shape: &Shape,
    contacts: &[Contact],
    solver: &SolverConfig,
) -> Fixed {
    for _ in 0..solver.iterations {
        let mut corrected = false;
        for contact in contacts {
            if let Some(p) = penetration(shape, *position, &contact.shape, contact.position) {
                if p.depth > solver.penetration {
                    *position += p.normal * (p.depth * solver.correction_rate);
                    corrected = true;
                }
            }
        }
        if !corrected {
            break;
        }
    }
    deepest(*position, shape, contacts.iter())
}

fn deepest<'a>(position: FpVec2, shape: &Shape, contacts: impl Iterator<Item = &'a Contact>) -> Fixed {
    contacts
        .filter_map(|c| penetration(shape, position, &c.shape, c.position))
        .map(|p| p.depth)
        .max()
        .unwrap_or(Fixed::ZERO)
}

/// Moves needed to cover `delta` without any single move exceeding
/// `max_step` on either axis.
fn substeps(delta: FpVec2, max_step: Fixed) -> Result<i64> {
    let longest = delta.x.abs().max(delta.y.abs());
    Ok(longest.try_div(max_step)?.ceil().to_int().max(1))
}

/// A tile face shared with another solid tile is not a real surface.
fn internal_face(stage: &Tilemap, coord: TileCoord, normal: FpVec2) -> bool {
    let step = |v: Fixed| -> i32 {
        if v >= SURFACE {
            1
        } else if v <= -SURFACE {
            -1
        } else {
            0
        }
    };
    let (dx, dy) = (step(normal.x), step(normal.y));
    if dx == 0 && dy == 0 {
        return false;
    }
    matches!(
        stage.get(coord.x + dx, coord.y + dy),
        TileKind::Solid | TileKind::Bumpable
    )
}

fn gather(
    frame: &mut Frame,
    ctx: &SimContext,
    entity: EntityRef,
    body: &PhysicsBody,
    shape: &Shape,
    previous: FpVec2,
    position: FpVec2,
) -> Result<Vec<Contact>> {
    let solver = &ctx.config.solver;
    let filter = QueryFilter::new(body.mask).ignoring(entity).solids();
    let hits = overlap_shape(frame, position, shape, &filter)?;
    let previous_bottom = previous.y - shape.half_extents().y;

    let mut contacts = Vec::with_capacity(hits.len());
    for hit in hits {
        if hit.shape.is_one_way() {
            // Pass through while rising, or when the body was already
            // below the surface before this step.
            let rising = body.velocity.y > hit.velocity.y;
            if rising || previous_bottom < hit.position.y - solver.max_step {
                continue;
            }
        }
        if let Some(coord) = hit.tile() {
            if internal_face(&frame.stage, coord, hit.normal) {
                continue;
            }
        }
        let signal = ctx.raise(
            frame,
            Signal::BeforePhysicsCollision {
                body: entity,
                other: hit.entity(),
                tile: hit.tile(),
                normal: hit.normal,
                keep: true,
            },
        )?;
        if matches!(signal, Signal::BeforePhysicsCollision { keep: false, .. }) {
            continue;
        }
        contacts.push(Contact {
            other: hit.entity(),
            tile: hit.tile(),
            normal: hit.normal,
            depth: hit.depth,
            shape: hit.shape,
            position: hit.position,
            velocity: hit.velocity,
        });
    }
    Ok(contacts)
}

fn step_body(frame: &mut Frame, ctx: &SimContext, entity: EntityRef) -> Result<()> {
    let solver = ctx.config.solver;
    let dt = ctx.dt();
    let mut body = *frame.get::<PhysicsBody>(entity)?;
    if body.frozen {
        return Ok(());
    }
    let shape = frame.get::<Collider>(entity)?.shape;
    let mut position = frame.get::<Transform2D>(entity)?.position;

    body.velocity.y += solver.gravity * body.gravity_scale * dt;
    body.velocity = FpVec2::new(
        body.velocity.x.clamp(-solver.max_speed, solver.max_speed),
        body.velocity.y.clamp(-solver.max_speed, solver.max_speed),
    );
    let delta = body.velocity * dt;
    let steps = substeps(delta, solver.max_step)?;
    let step = FpVec2::new(delta.x.div_int(steps)?, delta.y.div_int(steps)?);

    let mut contacts: Vec<Contact> = Vec::new();
    let mut residual = Fixed::ZERO;
    for _ in 0..steps {
        let previous = position;
        position += step;
        let found = gather(frame, ctx, entity, &body, &shape, previous, position)?;
        residual = resolve_penetration(&mut position, &shape, &found, &solver);
        for contact in found {
            contacts.retain(|c| c.other != contact.other || c.tile != contact.tile);
            contacts.push(contact);
        }
    }

    body.grounded = contacts.iter().any(|c| c.normal.y >= SURFACE);
    body.hit_ceiling = contacts.iter().any(|c| c.normal.y <= -SURFACE);
    body.wall_left = contacts.iter().any(|c| c.normal.x >= SURFACE);
    body.wall_right = contacts.iter().any(|c| c.normal.x <= -SURFACE);
    body.state = if residual > solver.penetration {
        BodyState::Correcting
    } else {
        BodyState::Free
    };
    let crushing = deepest(
        position,
        &shape,
        contacts.iter().filter(|c| c.velocity != FpVec2::ZERO),
    );
    body.crushed = crushing > solver.crush_penetration;

    if body.grounded {
        let ground = contacts
            .iter()
            .find(|c| c.normal.y >= SURFACE)
            .map_or(FpVec2::ZERO, |c| c.velocity);
        if body.velocity.y < ground.y {
            body.velocity.y = ground.y;
        }
        position.x += ground.x * dt;
    }
    if body.wall_left && body.velocity.x < Fixed::ZERO {
        body.velocity.x = Fixed::ZERO;
    }
    if body.wall_right && body.velocity.x > Fixed::ZERO {
        body.velocity.x = Fixed::ZERO;
    }
    let bumped = body.hit_ceiling && body.velocity.y > Fixed::ZERO;
    if bumped {
        body.velocity.y = Fixed::ZERO;
    }

    if body.contacts.is_null() && !contacts.is_empty() {
        body.contacts = frame.heap_mut().alloc_list::<Contact>()?;
    }
    if !body.contacts.is_null() {
        let list = frame.heap_mut().list_mut(body.contacts)?;
        list.clear();
        list.extend_from_slice(&contacts);
    }
    frame.get_mut::<Transform2D>(entity)?.position = position;
    *frame.get_mut::<PhysicsBody>(entity)? = body;

    if bumped {
        for contact in contacts.iter().filter(|c| c.normal.y <= -SURFACE) {
            if let Some(coord) = contact.tile {
                if frame.stage.get(coord.x, coord.y) == TileKind::Bumpable {
                    frame.emit(SimEvent::BlockBumped {
                        by: entity,
                        tile_x: coord.x,
                        tile_y: coord.y,
                    });
                }
            }
            ctx.raise(
                frame,
                Signal::EntityBumped {
                    by: entity,
                    other: contact.other,
                    tile: contact.tile,
                },
            )?;
        }
    }
    if body.crushed {
        log::debug!("tick {}: {entity} crushed", frame.number());
        ctx.raise(frame, Signal::BodyCrushed { body: entity })?;
    }
    Ok(())
}

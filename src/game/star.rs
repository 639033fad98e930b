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

//! Big stars: spawning, bouncing and pickup

use crate::assets::StageAsset;
use crate::entity::EntityRef;
use crate::event::SimEvent;
use crate::fixed_point::{Fixed, FpVec2};
use crate::frame::Frame;
use crate::game::components::{decrement, BigStar, MarioPlayer};
use crate::game::BIG_STAR;
use crate::physics::query::{overlap_shape, QueryFilter};
use crate::physics::{layers, Collider, PhysicsBody, Shape, Transform2D};
use crate::session::SimContext;
use crate::signal::Signal;
use crate::system::{Registrar, System};
use crate::Result;

/// Spawn attempts before backing off
const SPAWN_RETRY_FRAMES: u16 = 30;
/// Stars cannot be spawned this close to a player
const PLAYER_CLEARANCE: Fixed = Fixed::from_int(2);
/// Ticks a dropped star ignores players
pub const DROP_UNCOLLECTABLE_FRAMES: u16 = 60;
pub const DROP_LIFETIME: u16 = 600;

/// Ticks until the next star after a spawned star is collected
pub fn respawn_delay(real_players: u8) -> u16 {
    624u16.saturating_sub(u16::from(real_players) * 12)
}

pub struct BigStarSystem;

impl System for BigStarSystem {
    fn name(&self) -> &'static str {
        BIG_STAR
    }

    fn start_enabled(&self) -> bool {
        false
    }

    fn register(&self, reg: &mut Registrar<'_>) -> Result<()> {
        reg.on_interaction::<BigStar, MarioPlayer, _>(collect)
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        let stage = ctx.assets.require_stage(ctx.config.stage)?;
        if !frame.exists(frame.globals.main_big_star)
            && decrement(&mut frame.globals.big_star_spawn_timer)
        {
            spawn_star(frame, ctx, stage)?;
        }
        frame.for_each::<(BigStar, Transform2D), _>(None, |frame, star| {
            step_star(frame, stage, star)
        })
    }
}

/// Picks an unused spawnpoint at random; every point is used once before
/// any repeats.
fn next_spawnpoint(frame: &mut Frame, count: usize) -> usize {
    let globals = &mut frame.globals;
    if globals.used_star_spawn_count as usize >= count {
        globals.used_star_spawns = 0;
        globals.used_star_spawn_count = 0;
    }
    let mut skip = globals
        .rng
        .next_int((count - globals.used_star_spawn_count as usize) as u32);
    let mut index = 0;
    for i in 0..count {
        if globals.used_star_spawns & (1 << i) == 0 {
            if skip == 0 {
                index = i;
                break;
            }
            skip -= 1;
        }
    }
    globals.used_star_spawns |= 1 << index;
    globals.used_star_spawn_count += 1;
    index
}

fn spawn_star(frame: &mut Frame, ctx: &SimContext, stage: &StageAsset) -> Result<()> {
    let count = stage.big_star_spawnpoints.len().min(64);
    let clearance = Shape::Circle {
        radius: PLAYER_CLEARANCE,
    };
    for _ in 0..count {
        let position = stage.big_star_spawnpoints[next_spawnpoint(frame, count)];
        let crowded = !overlap_shape(frame, position, &clearance, &QueryFilter::new(layers::PLAYER))?
            .is_empty();
        if crowded {
            continue;
        }
        let star = create_star(frame, ctx, position)?;
        if let Some(body) = frame.try_get_mut::<PhysicsBody>(star) {
            body.frozen = true;
        }
        frame.globals.main_big_star = star;
        frame.emit(SimEvent::StarSpawned { star, position });
        log::debug!("tick {}: star spawned at {position:?}", frame.number());
        return Ok(());
    }
    frame.globals.big_star_spawn_timer = SPAWN_RETRY_FRAMES;
    Ok(())
}

/// Instantiates the star prototype at `position`.
pub(crate) fn create_star(frame: &mut Frame, ctx: &SimContext, position: FpVec2) -> Result<EntityRef> {
    let prototype = ctx.assets.require_prototype(ctx.config.big_star_prototype)?;
    let star = frame.create_from(prototype)?;
    frame.add(star, Transform2D { position })?;
    if !frame.has::<BigStar>(star) {
        frame.add(star, BigStar::default())?;
    }
    Ok(star)
}

fn step_star(frame: &mut Frame, stage: &StageAsset, entity: EntityRef) -> Result<()> {
    let mut star = *frame.get::<BigStar>(entity)?;
    if star.is_stationary {
        return Ok(());
    }
    let position = frame.get::<Transform2D>(entity)?.position;
    if decrement(&mut star.lifetime)
        || (position.y < stage.kill_plane && star.uncollectable_frames == 0)
    {
        return frame.destroy(entity);
    }

    let shape = frame.try_get::<Collider>(entity).map(|c| c.shape);
    if !stage.wrapping && stage.tilemap.width() > 0 {
        let bounds = stage.tilemap.bounds();
        let extent = shape.map_or(Fixed::ZERO, |s| s.half_extents().x);
        if position.x - extent <= bounds.min.x {
            star.facing_right = true;
        } else if position.x + extent >= bounds.max.x {
            star.facing_right = false;
        }
    }

    let mut collision_disabled = false;
    if let Some(body) = frame.try_get_mut::<PhysicsBody>(entity) {
        if body.grounded {
            body.velocity.y = star.bounce_force;
            body.grounded = false;
        }
        if body.wall_left || body.wall_right {
            star.facing_right = body.wall_left;
        }
        body.velocity.x = if star.facing_right {
            star.speed
        } else {
            -star.speed
        };
        collision_disabled = body.mask & layers::STAGE == 0;
    }

    // Counts down only while passing through the stage
    if collision_disabled && decrement(&mut star.uncollectable_frames) {
        let in_ground = match &shape {
            Some(shape) => {
                !overlap_shape(frame, position, shape, &QueryFilter::new(layers::STAGE))?.is_empty()
            }
            None => false,
        };
        if !in_ground {
            if let Some(body) = frame.try_get_mut::<PhysicsBody>(entity) {
                body.mask |= layers::STAGE;
            }
        }
    }
    *frame.get_mut::<BigStar>(entity)? = star;
    Ok(())
}

/// Pickup: `(star, mario)` from the interaction table.
fn collect(frame: &mut Frame, ctx: &SimContext, star: EntityRef, mario: EntityRef) -> Result<()> {
    if !frame.exists(star) {
        return Ok(());
    }
    let big_star = *frame.get::<BigStar>(star)?;
    if big_star.uncollectable_frames > 0 {
        return Ok(());
    }
    let player = frame.get_mut::<MarioPlayer>(mario)?;
    if player.is_dead {
        return Ok(());
    }
    player.stars = player.stars.saturating_add(1);
    let (slot, stars) = (player.player, player.stars);

    if big_star.is_stationary {
        frame.globals.big_star_spawn_timer = respawn_delay(frame.globals.real_players);
    }
    let position = frame.get::<Transform2D>(star)?.position;
    frame.emit(SimEvent::StarCollected {
        player: slot,
        mario,
        star,
        position,
        stars,
    });
    frame.destroy(star)?;
    ctx.raise(
        frame,
        Signal::StarCollected {
            player: slot,
            mario,
            star,
        },
    )?;
    Ok(())
}

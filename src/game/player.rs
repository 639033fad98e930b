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

//! Players: spawning, movement, death and respawn
//!
//! Movement is a parallel kernel over [`PhysicsBody`]: it reads the
//! player's input and character stats and writes only the body velocity.
//! Everything that touches other entities (star drops, respawns) runs in
//! [`MarioPlayerSystem`] on the main thread.

use crate::assets::StageAsset;
use crate::entity::EntityRef;
use crate::event::SimEvent;
use crate::fixed_point::{Fixed, FpVec2};
use crate::frame::Frame;
use crate::game::components::{decrement, BigStar, MarioPlayer, PlayerData};
use crate::game::logic::player_data;
use crate::game::star::{create_star, DROP_LIFETIME, DROP_UNCOLLECTABLE_FRAMES};
use crate::game::character_asset;
use crate::input_sync::PlayerInput;
use crate::physics::{layers, Collider, PhysicsBody, Transform2D};
use crate::session::SimContext;
use crate::signal::{Signal, SignalKind};
use crate::system::{Registrar, System};
use crate::Result;

/// Ticks between death and respawn
pub const RESPAWN_FRAMES: u16 = 120;

/// Position of spawn slot `index` out of `total`, spread on an ellipse
/// around the stage spawnpoint. Two or fewer players spawn side by side.
pub fn spawnpoint_for(stage: &StageAsset, index: u8, total: u8) -> Result<FpVec2> {
    let total = i64::from(total.max(1));
    let angle = Fixed::TWO_PI.mul_int(i64::from(index)).div_int(total)?
        + Fixed::HALF_PI
        + Fixed::PI.div_int(2 * total)?;
    let scale = (Fixed::from_int(2) - Fixed::from_int(total + 1).div_int(total)?) * stage.spawn_radius;
    let dy = if total > 2 {
        angle.cos() * scale * Fixed::HALF
    } else {
        Fixed::ZERO
    };
    Ok(stage.spawnpoint + FpVec2::new(angle.sin() * scale, dy))
}

/// Walk, sprint and jump from this tick's input
pub fn movement(frame: &Frame, ctx: &SimContext, entity: EntityRef, body: &mut PhysicsBody) {
    let Some(mario) = frame.try_get::<MarioPlayer>(entity) else {
        return;
    };
    if mario.is_dead || body.frozen {
        return;
    }
    let stats = ctx
        .assets
        .character(mario.character)
        .copied()
        .unwrap_or_default();
    let input = frame.input(mario.player);

    let direction = i64::from(input.pressed(PlayerInput::RIGHT))
        - i64::from(input.pressed(PlayerInput::LEFT));
    let speed = if input.pressed(PlayerInput::SPRINT) {
        stats.sprint_speed
    } else {
        stats.walk_speed
    };
    body.velocity.x = approach(body.velocity.x, speed.mul_int(direction), stats.acceleration);

    if input.pressed(PlayerInput::JUMP) && body.grounded {
        body.velocity.y = stats.jump_speed;
        body.grounded = false;
    }
}

fn approach(current: Fixed, target: Fixed, step: Fixed) -> Fixed {
    if current < target {
        (current + step).min(target)
    } else {
        (current - step).max(target)
    }
}

/// Player lifecycle: spawn on join, place on game start, die from pits
/// and crushes, drop a star on death, respawn.
pub struct MarioPlayerSystem;

impl System for MarioPlayerSystem {
    fn name(&self) -> &'static str {
        "MarioPlayerSystem"
    }

    fn register(&self, reg: &mut Registrar<'_>) -> Result<()> {
        reg.on_signal(SignalKind::PlayerAdded, |frame, ctx, signal| {
            if let Signal::PlayerAdded { player } = *signal {
                spawn_mario(frame, ctx, player)?;
            }
            Ok(())
        });
        reg.on_signal(SignalKind::GameStarting, |frame, ctx, _| {
            frame.for_each::<(MarioPlayer,), _>(None, |frame, entity| {
                let player = frame.get::<MarioPlayer>(entity)?.player;
                let character = player_data(frame, player)
                    .ok()
                    .and_then(|data| frame.try_get::<PlayerData>(data))
                    .map_or(0, |data| data.character);
                frame.get_mut::<MarioPlayer>(entity)?.character = character_asset(character);
                respawn(frame, ctx, entity)
            })
        });
        reg.on_signal(SignalKind::BodyCrushed, |frame, _, signal| {
            let Signal::BodyCrushed { body } = *signal else {
                return Ok(());
            };
            let Some(mario) = frame.try_get::<MarioPlayer>(body) else {
                return Ok(());
            };
            if !mario.is_dead {
                let player = mario.player;
                frame.emit(SimEvent::PlayerCrushed {
                    player,
                    mario: body,
                });
                kill(frame, body)?;
            }
            Ok(())
        });
        Ok(())
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        let kill_plane = ctx.assets.stage(ctx.config.stage).map(|s| s.kill_plane);
        frame.for_each::<(MarioPlayer,), _>(None, |frame, entity| {
            if std::mem::take(&mut frame.get_mut::<MarioPlayer>(entity)?.drop_star) {
                drop_star(frame, ctx, entity)?;
            }
            let mario = frame.get_mut::<MarioPlayer>(entity)?;
            if mario.is_dead {
                if decrement(&mut mario.respawn_frames) {
                    respawn(frame, ctx, entity)?;
                }
                return Ok(());
            }
            let Some(kill_plane) = kill_plane else {
                return Ok(());
            };
            let position = frame.get::<Transform2D>(entity)?.position;
            let height = frame
                .try_get::<Collider>(entity)
                .map_or(Fixed::ZERO, |c| c.shape.half_extents().y.mul_int(2));
            if position.y + height < kill_plane {
                kill(frame, entity)?;
            }
            Ok(())
        })
    }
}

/// Creates the avatar for a new player, frozen at its spawnpoint until
/// the game starts.
fn spawn_mario(frame: &mut Frame, ctx: &SimContext, player: u8) -> Result<EntityRef> {
    let prototype = ctx.assets.require_prototype(ctx.config.player_prototype)?;
    let entity = frame.create_from(prototype)?;
    let position = match ctx.assets.stage(ctx.config.stage) {
        Some(stage) => spawnpoint_for(stage, player, ctx.config.players)?,
        None => FpVec2::ZERO,
    };
    frame.add(entity, Transform2D { position })?;
    frame.add(
        entity,
        MarioPlayer {
            player,
            spawnpoint_index: player,
            character: character_asset(0),
            ..MarioPlayer::default()
        },
    )?;
    if let Some(body) = frame.try_get_mut::<PhysicsBody>(entity) {
        body.frozen = true;
    }
    log::debug!("player {player} spawned as {entity}");
    Ok(entity)
}

/// Marks the player dead. Only touches component values, so it is safe
/// from inside any pass.
fn kill(frame: &mut Frame, entity: EntityRef) -> Result<()> {
    let mario = frame.get_mut::<MarioPlayer>(entity)?;
    if mario.is_dead {
        return Ok(());
    }
    mario.is_dead = true;
    mario.respawn_frames = RESPAWN_FRAMES;
    mario.drop_star = mario.stars > 0;
    let player = mario.player;
    if let Some(body) = frame.try_get_mut::<PhysicsBody>(entity) {
        body.frozen = true;
        body.velocity = FpVec2::ZERO;
    }
    frame.emit(SimEvent::PlayerDied {
        player,
        mario: entity,
    });
    Ok(())
}

fn respawn(frame: &mut Frame, ctx: &SimContext, entity: EntityRef) -> Result<()> {
    let mario = *frame.get::<MarioPlayer>(entity)?;
    let position = match ctx.assets.stage(ctx.config.stage) {
        Some(stage) => spawnpoint_for(stage, mario.spawnpoint_index, frame.globals.real_players)?,
        None => frame.get::<Transform2D>(entity)?.position,
    };
    frame.get_mut::<Transform2D>(entity)?.position = position;
    if let Some(body) = frame.try_get_mut::<PhysicsBody>(entity) {
        body.frozen = false;
        body.velocity = FpVec2::ZERO;
    }
    let mario = frame.get_mut::<MarioPlayer>(entity)?;
    mario.is_dead = false;
    mario.respawn_frames = 0;
    let player = mario.player;
    frame.emit(SimEvent::PlayerRespawned {
        player,
        mario: entity,
        position,
    });
    Ok(())
}

/// Loses one star, which bounces away from where the player died.
fn drop_star(frame: &mut Frame, ctx: &SimContext, entity: EntityRef) -> Result<()> {
    let mario = frame.get_mut::<MarioPlayer>(entity)?;
    if mario.stars == 0 {
        return Ok(());
    }
    mario.stars -= 1;

    let mut position = frame.get::<Transform2D>(entity)?.position;
    if let Some(stage) = ctx.assets.stage(ctx.config.stage) {
        if position.y < stage.kill_plane {
            position = stage.spawnpoint;
        }
    }
    let facing_right = frame.globals.rng.next_int(2) == 1;
    let star = create_star(frame, ctx, position)?;
    let big_star = frame.get_mut::<BigStar>(star)?;
    big_star.is_stationary = false;
    big_star.facing_right = facing_right;
    big_star.uncollectable_frames = DROP_UNCOLLECTABLE_FRAMES;
    big_star.lifetime = DROP_LIFETIME;
    let launch = FpVec2::new(
        if facing_right {
            big_star.speed
        } else {
            -big_star.speed
        },
        big_star.bounce_force,
    );
    if let Some(body) = frame.try_get_mut::<PhysicsBody>(star) {
        body.frozen = false;
        body.velocity = launch;
        // Falls through the stage until collectable again
        body.mask &= !layers::STAGE;
    }
    frame.emit(SimEvent::StarSpawned { star, position });
    Ok(())
}

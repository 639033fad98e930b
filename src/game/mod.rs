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

//! Star-collecting versus game on top of the simulation core
//!
//! System order each tick:
//!
//! ```text
//! GameLogicSystem ─► MarioPlayerSystem ─► PlayerMovementSystem (parallel)
//!   ─► PlatformSystem ─► PhysicsSystem ─► BigStarSystem ─► InteractionSystem
//! ```
//!
//! Movement, stars and interactions stay disabled until the countdown
//! reaches its gameplay frame.

pub mod components;
pub mod logic;
pub mod player;
pub mod star;

pub use components::{BigStar, GameRules, GameState, MarioPlayer, PlayerData};
pub use logic::GameLogicSystem;
pub use player::MarioPlayerSystem;
pub use star::BigStarSystem;

use crate::assets::{AssetDb, AssetId, AssetLookup, CharacterAsset, EntityPrototype, StageAsset};
use crate::component::Schema;
use crate::config::SimConfig;
use crate::fixed_point::{Fixed, FpVec2};
use crate::interaction::{Interactable, InteractionSystem};
use crate::physics::{
    layers, Collider, PhysicsBody, PhysicsSystem, PlatformSystem, Shape, TileKind, Tilemap,
    Transform2D,
};
use crate::session::{Simulator, SimulatorBuilder};
use crate::system::ParallelSystem;
use crate::Result;
use std::sync::Arc;

pub const PLAYER_MOVEMENT: &str = "PlayerMovementSystem";
pub const BIG_STAR: &str = "BigStarSystem";

/// Systems switched on when play starts and off when the game ends
pub const GAMEPLAY_SYSTEMS: [&str; 3] = [PLAYER_MOVEMENT, BIG_STAR, "InteractionSystem"];

const DEMO_STAGE: AssetId = AssetId(1);
const DEMO_BIG_STAR: AssetId = AssetId(2);
const DEMO_PLAYER: AssetId = AssetId(3);
const CHARACTER_BASE: u64 = 100;

/// Asset id of the character a player picks in the lobby
#[inline]
pub const fn character_asset(index: u8) -> AssetId {
    AssetId(CHARACTER_BASE + index as u64)
}

/// Physics, interaction and game components.
pub fn schema() -> Arc<Schema> {
    components::register(crate::physics::register(Schema::builder()).component::<Interactable>())
        .build()
}

/// Adds the game systems in tick order.
#[must_use]
pub fn install(builder: SimulatorBuilder) -> SimulatorBuilder {
    builder
        .system(GameLogicSystem)
        .system(MarioPlayerSystem)
        .system(ParallelSystem::new(PLAYER_MOVEMENT, player::movement).disabled())
        .system(PlatformSystem)
        .system(PhysicsSystem)
        .system(BigStarSystem)
        .system(InteractionSystem)
}

/// Session running the full game.
pub fn simulator(config: SimConfig, assets: impl AssetLookup + 'static) -> Result<Simulator> {
    install(SimulatorBuilder::new(config, schema(), Arc::new(assets))).build()
}

/// Configuration pointing at the [`demo_assets`] ids.
pub fn demo_config() -> SimConfig {
    SimConfig {
        stage: DEMO_STAGE,
        big_star_prototype: DEMO_BIG_STAR,
        player_prototype: DEMO_PLAYER,
        ..SimConfig::default()
    }
}

/// Walled 32x18 arena with a two-tile floor and a few ledges.
pub fn demo_stage() -> StageAsset {
    let tilemap = Tilemap::new(32, 18, FpVec2::ZERO, Fixed::ONE)
        .with_rect(0, 0, 31, 1, TileKind::Solid)
        .with_rect(0, 2, 0, 17, TileKind::Solid)
        .with_rect(31, 2, 31, 17, TileKind::Solid)
        .with_rect(5, 7, 9, 7, TileKind::Semisolid)
        .with_rect(22, 7, 26, 7, TileKind::Semisolid)
        .with_rect(12, 10, 19, 10, TileKind::Semisolid)
        .with_rect(15, 14, 16, 14, TileKind::Bumpable);
    StageAsset {
        name: "demo".into(),
        tilemap,
        spawnpoint: FpVec2::from_int(16, 5),
        spawn_radius: Fixed::from_int(6),
        big_star_spawnpoints: vec![
            FpVec2::from_int(3, 3),
            FpVec2::from_int(28, 3),
            FpVec2::from_int(7, 9),
            FpVec2::from_int(24, 9),
            FpVec2::from_int(16, 12),
        ],
        kill_plane: Fixed::from_int(-4),
        wrapping: false,
    }
}

fn unit_box() -> Shape {
    Shape::Box {
        half_extents: FpVec2::new(Fixed::HALF, Fixed::HALF),
    }
}

/// Stage, prototypes and two characters for [`demo_config`].
pub fn demo_assets() -> AssetDb {
    let player = EntityPrototype::new("mario")
        .with(Transform2D::default())
        .with(PhysicsBody {
            frozen: true,
            mask: layers::STAGE | layers::PLATFORM,
            ..PhysicsBody::default()
        })
        .with(Collider {
            shape: unit_box(),
            layer: layers::PLAYER,
            solid: false,
        })
        .with(Interactable::default())
        .with(MarioPlayer::default());
    let big_star = EntityPrototype::new("big star")
        .with(Transform2D::default())
        .with(Collider {
            shape: unit_box(),
            layer: layers::OBJECT,
            solid: false,
        })
        .with(Interactable::default())
        .with(BigStar::default())
        .with(PhysicsBody {
            frozen: true,
            mask: layers::STAGE,
            ..PhysicsBody::default()
        });
    let luigi = CharacterAsset {
        walk_speed: Fixed::from_ratio(9, 2),
        jump_speed: Fixed::from_int(13),
        acceleration: Fixed::from_ratio(3, 8),
        ..CharacterAsset::default()
    };

    AssetDb::new()
        .with_stage(DEMO_STAGE, demo_stage())
        .with_prototype(DEMO_PLAYER, player)
        .with_prototype(DEMO_BIG_STAR, big_star)
        .with_character(character_asset(0), CharacterAsset::default())
        .with_character(character_asset(1), luigi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SimEvent;
    use crate::input_sync::{PlayerInput, TickInput};
    use crate::replay::{self, ReplayFile};
    use crate::snapshot::Checksum;

    const PLAYERS: u8 = 4;

    /// Deterministic button script: each player runs, turns and hops on
    /// its own rhythm.
    fn scripted(player: u8, tick: u64) -> PlayerInput {
        let phase = (tick / (40 + u64::from(player) * 7)) % 4;
        let mut input = match phase {
            0 => PlayerInput::new(PlayerInput::RIGHT),
            1 => PlayerInput::new(PlayerInput::RIGHT).with(PlayerInput::SPRINT),
            2 => PlayerInput::new(PlayerInput::LEFT),
            _ => PlayerInput::default(),
        };
        if (tick + u64::from(player) * 11) % 29 == 0 {
            input = input.with(PlayerInput::JUMP);
        }
        input
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn session(workers: usize) -> Simulator {
        init_logging();
        let config = SimConfig {
            players: PLAYERS,
            skip_pregame: true,
            worker_threads: workers,
            parallel_chunk: 1,
            ..demo_config()
        };
        simulator(config, demo_assets()).unwrap()
    }

    fn run_scripted(sim: &mut Simulator, ticks: u64) -> Vec<Checksum> {
        let mut checksums = Vec::new();
        for tick in 1..=ticks {
            for p in 0..PLAYERS {
                sim.add_input(p, tick, TickInput::new(scripted(p, tick))).unwrap();
            }
            sim.advance().unwrap();
            if tick % 60 == 0 {
                checksums.push(sim.frame().checksum().unwrap());
            }
        }
        checksums
    }

    #[test]
    fn test_worker_count_does_not_change_state() {
        let mut single = session(1);
        let mut pooled = session(4);
        let a = run_scripted(&mut single, 600);
        let b = run_scripted(&mut pooled, 600);
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
        assert!(single
            .events()
            .iter()
            .any(|(_, e)| matches!(e, SimEvent::StarSpawned { .. })));
    }

    #[test]
    fn test_late_input_rollback_matches_on_time_run() {
        init_logging();
        let config = SimConfig {
            players: 2,
            skip_pregame: true,
            max_rollback: 16,
            ..demo_config()
        };
        let mut on_time = simulator(config.clone(), demo_assets()).unwrap();
        let mut late = simulator(config, demo_assets()).unwrap();

        let a = TickInput::new(PlayerInput::new(PlayerInput::RIGHT));
        let b = TickInput::new(PlayerInput::new(PlayerInput::LEFT).with(PlayerInput::JUMP));
        let second = |tick: u64| if (50..=55).contains(&tick) { b.clone() } else { a.clone() };

        for tick in 1..=70 {
            on_time.add_input(0, tick, a.clone()).unwrap();
            on_time.add_input(1, tick, second(tick)).unwrap();
            on_time.advance().unwrap();

            late.add_input(0, tick, a.clone()).unwrap();
            if !(50..=55).contains(&tick) {
                late.add_input(1, tick, second(tick)).unwrap();
            }
            if tick == 60 {
                for t in 50..=55 {
                    late.add_input(1, t, b.clone()).unwrap();
                }
            }
            late.advance().unwrap();
        }

        assert_eq!(
            on_time.frame().checksum().unwrap(),
            late.frame().checksum().unwrap()
        );
        let events = |sim: &Simulator| -> Vec<(u64, SimEvent)> {
            sim.events().iter().map(|(t, e)| (t, e.clone())).collect()
        };
        assert_eq!(events(&on_time), events(&late));
    }

    #[test]
    fn test_replay_reproduces_session() {
        init_logging();
        let config = SimConfig {
            players: 2,
            skip_pregame: true,
            ..demo_config()
        };
        let mut sim = install(SimulatorBuilder::new(
            config,
            schema(),
            Arc::new(demo_assets()),
        ))
        .record_replay(1)
        .build()
        .unwrap();
        for tick in 1..=180 {
            for p in 0..2 {
                sim.add_input(p, tick, TickInput::new(scripted(p, tick))).unwrap();
            }
            sim.advance().unwrap();
        }
        let checksum = sim.frame().checksum().unwrap();
        let recorded: Vec<(u64, SimEvent)> =
            sim.events().iter().map(|(t, e)| (t, e.clone())).collect();

        let file = sim.into_replay().unwrap();
        assert_eq!(file.end_tick(), 180);
        let file = ReplayFile::from_bytes(&file.to_bytes().unwrap()).unwrap();

        let replayed = replay::play(&file, |config| simulator(config, demo_assets())).unwrap();
        assert_eq!(replayed.tick(), 180);
        assert_eq!(replayed.frame().checksum().unwrap(), checksum);
        let events: Vec<(u64, SimEvent)> = replayed
            .events()
            .iter()
            .map(|(t, e)| (t, e.clone()))
            .collect();
        assert_eq!(events, recorded);
    }

    #[test]
    fn test_demo_assets_resolve() {
        let config = demo_config();
        let assets = demo_assets();
        assert!(assets.require_stage(config.stage).is_ok());
        assert!(assets.require_prototype(config.player_prototype).is_ok());
        assert!(assets.require_prototype(config.big_star_prototype).is_ok());
        assert!(assets.require_character(character_asset(1)).is_ok());
        assert!(assets.character(character_asset(7)).is_none());
    }
}

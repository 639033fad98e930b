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

// Justified pedantic suppression for fixed-point/ECS code:
// - inline_always: fixed-point arithmetic and handle checks
// - cast_*: slot indices are u32 on the wire and usize in memory
// - similar_names: dx/dy, min_x/max_x standard in collision code
// - too_many_lines: solver and session tick loops
// - module_name_repetitions: `physics::PhysicsBody`, `command::CommandTable`
#![allow(
    clippy::inline_always,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::similar_names,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]

//! # ALICE-Sim
//!
//! Deterministic fixed-timestep ECS simulation core with rollback.
//!
//! > "Same inputs, same bits."
//!
//! Every peer runs the same system pipeline over the same [`Frame`] with the
//! same per-tick inputs and gets byte-identical state. Remote inputs that
//! arrive late are predicted; when a prediction turns out wrong the session
//! restores the snapshot before that tick and resimulates.
//!
//! ## Quick Start
//!
//! ```rust
//! use alice_sim::game;
//! use alice_sim::{PlayerInput, SimConfig, TickInput};
//!
//! let config = SimConfig { players: 2, skip_pregame: true, ..game::demo_config() };
//! let mut a = game::simulator(config.clone(), game::demo_assets()).unwrap();
//! let mut b = game::simulator(config, game::demo_assets()).unwrap();
//!
//! for tick in 1..=30 {
//!     let input = TickInput::new(PlayerInput::new(PlayerInput::RIGHT));
//!     for sim in [&mut a, &mut b] {
//!         sim.add_input(0, tick, input.clone()).unwrap();
//!         sim.add_input(1, tick, TickInput::default()).unwrap();
//!         sim.advance().unwrap();
//!     }
//! }
//!
//! assert_eq!(a.frame().checksum().unwrap(), b.frame().checksum().unwrap());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! inputs/commands ─► InputSync ─► Simulator::advance
//!                                   │
//!          ┌────────────────────────┼─────────────────────────┐
//!          ▼                        ▼                         ▼
//!    CommandTable           Schedule (TaskGraph)          FrameRing
//!    (type order)    main-thread │ parallel (rayon)     last K snapshots
//!                                ▼
//!                Frame: entities + storages + heap + globals
//!                                │
//!                    SimEvent ───┴──► EventLog (per tick)
//! ```
//!
//! ## Modules
//!
//! ### Core
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`fixed_point`] | Q48.16 `Fixed`, `FpVec2`, deterministic sqrt/sin/cos |
//! | [`rng`] | Frame-owned xorshift64* RNG |
//! | [`arena`] | Generational arena behind the collection heap |
//! | [`entity`] | `EntityRef` handles and the live-entity table |
//! | [`component`] | `Component` trait, dense storages, `Schema` registration |
//! | [`heap`] | `ListRef` / `DictRef` dynamic collections |
//! | [`query`] | Component-tuple filters |
//! | [`frame`] | World snapshot: clone, serialize, checksum |
//! | [`snapshot`] | `Checksum` and the rollback ring buffer |
//! | [`input_sync`] | Player input, prediction and misprediction detection |
//! | [`command`] | Versioned player commands and their handler table |
//! | [`event`] | View-facing events and the per-tick event log |
//! | [`signal`] | Same-tick synchronous signals |
//! | [`interaction`] | Component-pair interaction callbacks |
//! | [`system`] | `System` trait and its global / filtered / parallel forms |
//! | [`scheduler`] | Task graph compile and execution |
//! | [`session`] | `Simulator`: tick loop, rollback, checksum verification |
//! | [`replay`] | Replay recording and playback |
//! | [`assets`] | Read-only asset lookup |
//! | [`config`] | Session and solver configuration |
//!
//! ### Simulation
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`physics`] | Shapes, tilemap, spatial queries, penetration solver |
//! | [`game`] | Game state machine, big stars, player movement |

pub mod arena;
pub mod assets;
pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod event;
pub mod fixed_point;
pub mod frame;
pub mod game;
pub mod heap;
pub mod input_sync;
pub mod interaction;
pub mod physics;
pub mod query;
pub mod replay;
pub mod rng;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod snapshot;
pub mod system;

pub use assets::{AssetDb, AssetId, AssetLookup, CharacterAsset, EntityPrototype, StageAsset};
pub use command::{Command, CommandTable, CommandType};
pub use component::{Component, ComponentId, Schema, Storage};
pub use config::{SimConfig, SolverConfig};
pub use entity::EntityRef;
pub use event::{EventLog, SimEvent};
pub use fixed_point::{Fixed, FpVec2};
pub use frame::{Frame, Globals, SystemId};
pub use heap::{CollectionHeap, DictRef, ListRef};
pub use input_sync::{InputSync, PlayerInput, RollbackAction, TickInput};
pub use query::{Culling, Filter, Query};
pub use replay::{ReplayFile, ReplayHeader};
pub use scheduler::{TaskGraph, TaskHandle, TaskKind};
pub use session::{SimContext, Simulator, SimulatorBuilder};
pub use signal::{Signal, SignalKind};
pub use snapshot::{Checksum, FrameRing};
pub use system::{System, SystemKind};

/// ALICE-Sim version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type for ALICE-Sim operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Error types for ALICE-Sim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Stale or out-of-range entity handle
    InvalidHandle { index: u32, generation: u16 },
    ComponentNotFound {
        entity: EntityRef,
        component: &'static str,
    },
    /// Type used without being registered in the schema
    UnregisteredType { name: &'static str },
    /// Freed or null collection handle
    StaleCollection,
    DivideByZero,
    DesyncDetected {
        tick: u64,
        local: Checksum,
        remote: Checksum,
    },
    MalformedCommand(String),
    MalformedSnapshot(String),
    /// Cyclic or dangling task dependencies
    SchedulerDeadlock { tasks: Vec<String> },
    StructuralChangeDuringIteration { component: &'static str },
    /// Corrected input older than the oldest retained snapshot
    RollbackOutOfRange { tick: u64, oldest: u64 },
    MissingAsset(AssetId),
    InvalidConfig(String),
    WorkerPool(String),
    /// Session stopped after a fatal error
    Halted(Box<SimError>),
}

impl SimError {
    /// Errors a system handles by skipping the entity, not by failing the tick.
    #[must_use]
    pub const fn is_entity_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidHandle { .. } | Self::ComponentNotFound { .. } | Self::StaleCollection
        )
    }
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHandle { index, generation } => {
                write!(f, "Invalid handle: E{index}:{generation}")
            }
            Self::ComponentNotFound { entity, component } => {
                write!(f, "Component {component} not found on {entity}")
            }
            Self::UnregisteredType { name } => write!(f, "Unregistered type: {name}"),
            Self::StaleCollection => write!(f, "Stale collection handle"),
            Self::DivideByZero => write!(f, "Fixed-point division by zero"),
            Self::DesyncDetected {
                tick,
                local,
                remote,
            } => {
                write!(f, "Desync at tick {tick}: local {local} != remote {remote}")
            }
            Self::MalformedCommand(msg) => write!(f, "Malformed command: {msg}"),
            Self::MalformedSnapshot(msg) => write!(f, "Malformed snapshot: {msg}"),
            Self::SchedulerDeadlock { tasks } => {
                write!(f, "Scheduler deadlock among tasks: {}", tasks.join(", "))
            }
            Self::StructuralChangeDuringIteration { component } => {
                write!(f, "Structural change to {component} while iterating it")
            }
            Self::RollbackOutOfRange { tick, oldest } => {
                write!(f, "Rollback to tick {tick} but oldest snapshot is {oldest}")
            }
            Self::MissingAsset(id) => write!(f, "Missing asset: {id:?}"),
            Self::InvalidConfig(msg) => write!(f, "Invalid config: {msg}"),
            Self::WorkerPool(msg) => write!(f, "Worker pool error: {msg}"),
            Self::Halted(cause) => write!(f, "Simulation halted: {cause}"),
        }
    }
}

impl std::error::Error for SimError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_local_errors() {
        assert!(SimError::StaleCollection.is_entity_local());
        assert!(SimError::InvalidHandle {
            index: 1,
            generation: 1
        }
        .is_entity_local());
        assert!(!SimError::DivideByZero.is_entity_local());
        assert!(!SimError::MalformedSnapshot(String::new()).is_entity_local());
    }

    #[test]
    fn test_error_display() {
        let err = SimError::DesyncDetected {
            tick: 7,
            local: Checksum(0xab),
            remote: Checksum(0xcd),
        };
        let text = err.to_string();
        assert!(text.contains("tick 7"));
        assert!(text.contains("00000000000000ab"));
    }
}

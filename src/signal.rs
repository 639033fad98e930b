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

//! Synchronous same-tick signals
//!
//! A signal is raised in the middle of some system's update and every
//! subscribed handler runs right there, before `raise` returns, in system
//! registration order. Handlers of disabled systems are skipped. Handlers
//! may rewrite the signal (e.g. clear `keep` to veto a contact).

use crate::entity::EntityRef;
use crate::fixed_point::FpVec2;
use crate::frame::{Frame, SystemId};
use crate::physics::tilemap::TileCoord;
use crate::session::SimContext;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A contact is about to enter the solver. Clear `keep` to ignore it
    /// for this step.
    BeforePhysicsCollision {
        body: EntityRef,
        other: EntityRef,
        tile: Option<TileCoord>,
        normal: FpVec2,
        keep: bool,
    },
    /// `by` hit `other` (or a tile) from below while moving up.
    EntityBumped {
        by: EntityRef,
        other: EntityRef,
        tile: Option<TileCoord>,
    },
    /// Penetration against a moving solid could not be resolved.
    BodyCrushed { body: EntityRef },
    GameStarting,
    PlayerAdded { player: u8 },
    StarCollected {
        player: u8,
        mario: EntityRef,
        star: EntityRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalKind {
    BeforePhysicsCollision,
    EntityBumped,
    BodyCrushed,
    GameStarting,
    PlayerAdded,
    StarCollected,
}

impl Signal {
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::BeforePhysicsCollision { .. } => SignalKind::BeforePhysicsCollision,
            Self::EntityBumped { .. } => SignalKind::EntityBumped,
            Self::BodyCrushed { .. } => SignalKind::BodyCrushed,
            Self::GameStarting => SignalKind::GameStarting,
            Self::PlayerAdded { .. } => SignalKind::PlayerAdded,
            Self::StarCollected { .. } => SignalKind::StarCollected,
        }
    }
}

pub type SignalHandler =
    Arc<dyn Fn(&mut Frame, &SimContext, &mut Signal) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    system: SystemId,
    handler: SignalHandler,
}

/// Signal kind -> handlers in registration order
#[derive(Clone, Default)]
pub struct SignalBus {
    subscriptions: BTreeMap<SignalKind, Vec<Subscription>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: SignalKind, system: SystemId, handler: SignalHandler) {
        self.subscriptions
            .entry(kind)
            .or_default()
            .push(Subscription { system, handler });
    }

    pub fn handler_count(&self, kind: SignalKind) -> usize {
        self.subscriptions.get(&kind).map_or(0, Vec::len)
    }

    /// Dispatches `signal` to every enabled subscriber.
    ///
    /// Entity-local handler errors are logged and the next handler runs;
    /// anything else aborts the dispatch.
    pub fn raise(&self, frame: &mut Frame, ctx: &SimContext, signal: &mut Signal) -> Result<()> {
        let Some(subscriptions) = self.subscriptions.get(&signal.kind()) else {
            return Ok(());
        };
        for sub in subscriptions {
            if !frame.is_system_enabled(sub.system) {
                continue;
            }
            if let Err(err) = (sub.handler)(frame, ctx, signal) {
                if err.is_entity_local() {
                    log::warn!("tick {}: {:?} handler: {err}", frame.number(), signal.kind());
                } else {
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<SignalKind, usize> = self
            .subscriptions
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("SignalBus").field("handlers", &counts).finish()
    }
}

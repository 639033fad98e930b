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

//! View-facing events
//!
//! Systems emit [`SimEvent`]s into the frame during a tick; the session moves
//! them into an [`EventLog`] keyed by tick. Events are fire-and-forget: the
//! simulation never reads them back. When a rollback resimulates from tick
//! N, every logged event at tick >= N is retracted and replaced by what the
//! resimulation emits.

use crate::entity::EntityRef;
use crate::fixed_point::FpVec2;
use crate::game::components::GameState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable record for audio / VFX / UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    GameStateChanged {
        state: GameState,
    },
    PlayerAdded {
        player: u8,
    },
    PlayerDataChanged {
        player: u8,
    },
    PlayerReadyChanged {
        player: u8,
        ready: bool,
    },
    PlayerStartedTyping {
        player: u8,
    },
    PlayerSentChatMessage {
        player: u8,
        text: String,
    },
    StarSpawned {
        star: EntityRef,
        position: FpVec2,
    },
    StarCollected {
        player: u8,
        mario: EntityRef,
        star: EntityRef,
        position: FpVec2,
        stars: u8,
    },
    BlockBumped {
        by: EntityRef,
        tile_x: i32,
        tile_y: i32,
    },
    PlayerCrushed {
        player: u8,
        mario: EntityRef,
    },
    PlayerDied {
        player: u8,
        mario: EntityRef,
    },
    PlayerRespawned {
        player: u8,
        mario: EntityRef,
        position: FpVec2,
    },
    GameEnded {
        winner: Option<u8>,
    },
}

/// Emitted events by tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    by_tick: BTreeMap<u64, Vec<SimEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever was recorded for `tick`.
    pub fn record(&mut self, tick: u64, events: Vec<SimEvent>) {
        if events.is_empty() {
            self.by_tick.remove(&tick);
        } else {
            self.by_tick.insert(tick, events);
        }
    }

    /// Retracts events at `tick` and later. Returns how many were dropped.
    pub fn truncate_from(&mut self, tick: u64) -> usize {
        let dropped = self.by_tick.split_off(&tick);
        dropped.values().map(Vec::len).sum()
    }

    pub fn at(&self, tick: u64) -> &[SimEvent] {
        self.by_tick.get(&tick).map_or(&[][..], Vec::as_slice)
    }

    /// All events in tick order, then emission order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &SimEvent)> {
        self.by_tick
            .iter()
            .flat_map(|(tick, events)| events.iter().map(move |e| (*tick, e)))
    }

    /// Removes and returns events up to and including `tick`, e.g. once
    /// those ticks are confirmed and can no longer be retracted.
    pub fn drain_through(&mut self, tick: u64) -> Vec<(u64, SimEvent)> {
        let rest = self.by_tick.split_off(&(tick + 1));
        let done = std::mem::replace(&mut self.by_tick, rest);
        done.into_iter()
            .flat_map(|(t, events)| events.into_iter().map(move |e| (t, e)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_tick.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tick.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_retracts_later_ticks() {
        let mut log = EventLog::new();
        log.record(3, vec![SimEvent::PlayerAdded { player: 0 }]);
        log.record(
            5,
            vec![
                SimEvent::PlayerStartedTyping { player: 1 },
                SimEvent::PlayerReadyChanged {
                    player: 1,
                    ready: true,
                },
            ],
        );

        assert_eq!(log.truncate_from(4), 2);
        assert_eq!(log.len(), 1);
        assert!(log.at(5).is_empty());
    }

    #[test]
    fn test_iter_and_drain_order() {
        let mut log = EventLog::new();
        log.record(2, vec![SimEvent::PlayerAdded { player: 1 }]);
        log.record(1, vec![SimEvent::PlayerAdded { player: 0 }]);
        log.record(4, vec![SimEvent::GameEnded { winner: None }]);

        let ticks: Vec<u64> = log.iter().map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![1, 2, 4]);

        let drained = log.drain_through(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_record_empty_clears() {
        let mut log = EventLog::new();
        log.record(1, vec![SimEvent::PlayerAdded { player: 0 }]);
        log.record(1, Vec::new());
        assert!(log.is_empty());
    }
}

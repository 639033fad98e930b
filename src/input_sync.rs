//! Per-tick player input and rollback input bookkeeping
//!
//! # Architecture
//!
//! ```text
//! Host (network / replay)                    Simulator
//!   add_input(player, tick, TickInput) ──► InputSync ──► inputs_for_tick(N)
//!                                              │              │
//!                        RollbackAction ◄──────┘              ▼
//!                   (used prediction != confirmed)     Frame.inputs[player]
//! ```
//!
//! Every tick each player slot gets a fixed-size [`PlayerInput`] plus the
//! commands targeted at that tick. When a player's input has not arrived the
//! last known input is repeated and no commands are assumed; the frame is
//! then marked unverified. When the real input later differs from what was
//! used, the caller rolls back to that tick.

use crate::command::Command;
use crate::{Result, SimError};
use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// Player Input
// ============================================================================

/// Button bitfield for one player for one tick. Two bytes on the wire.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct PlayerInput {
    pub buttons: u16,
}

impl PlayerInput {
    pub const LEFT: u16 = 1 << 0;
    pub const RIGHT: u16 = 1 << 1;
    pub const UP: u16 = 1 << 2;
    pub const DOWN: u16 = 1 << 3;
    pub const JUMP: u16 = 1 << 4;
    pub const SPRINT: u16 = 1 << 5;
    pub const POWERUP_ACTION: u16 = 1 << 6;

    #[inline]
    pub const fn new(buttons: u16) -> Self {
        Self { buttons }
    }

    #[inline]
    pub const fn pressed(self, button: u16) -> bool {
        self.buttons & button != 0
    }

    #[inline]
    #[must_use]
    pub const fn with(mut self, button: u16) -> Self {
        self.buttons |= button;
        self
    }

    /// Serialize with bitcode (compact binary)
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bitcode::decode(data).ok()
    }
}

/// Everything one player contributes to one tick
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TickInput {
    pub input: PlayerInput,
    pub commands: Vec<Command>,
}

impl TickInput {
    #[inline]
    pub fn new(input: PlayerInput) -> Self {
        Self {
            input,
            commands: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Prediction from this input: same buttons, no commands.
    #[inline]
    fn repeated(&self) -> Self {
        Self::new(self.input)
    }
}

// ============================================================================
// Input Buffer (per player)
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Slot {
    confirmed: Option<TickInput>,
    used: Option<TickInput>,
}

/// Outcome of adding a confirmed input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Tick not simulated yet, or simulated with the same input
    Accepted,
    /// Tick was simulated with a different (predicted) input
    Mispredicted,
    /// Already confirmed
    Ignored,
    /// Unconfirmed tick whose history was already evicted
    Expired,
}

/// Per-player input history indexed by tick.
#[derive(Debug)]
pub struct InputBuffer {
    pub player: u8,
    slots: VecDeque<Slot>,
    base_tick: u64,
    /// Highest tick up to which every input is confirmed
    confirmed_tick: u64,
}

impl InputBuffer {
    pub fn new(player: u8) -> Self {
        Self {
            player,
            slots: VecDeque::with_capacity(128),
            base_tick: 1,
            confirmed_tick: 0,
        }
    }

    fn slot_mut(&mut self, tick: u64) -> Option<&mut Slot> {
        if tick < self.base_tick {
            return None;
        }
        let idx = (tick - self.base_tick) as usize;
        while self.slots.len() <= idx {
            self.slots.push_back(Slot::default());
        }
        self.slots.get_mut(idx)
    }

    fn slot(&self, tick: u64) -> Option<&Slot> {
        if tick < self.base_tick {
            return None;
        }
        self.slots.get((tick - self.base_tick) as usize)
    }

    pub fn add_confirmed(&mut self, tick: u64, input: TickInput) -> Confirmation {
        if tick <= self.confirmed_tick {
            return Confirmation::Ignored;
        }
        let Some(slot) = self.slot_mut(tick) else {
            return Confirmation::Expired;
        };
        if slot.confirmed.is_some() {
            return Confirmation::Ignored;
        }
        let outcome = match &slot.used {
            Some(used) if *used != input => Confirmation::Mispredicted,
            _ => Confirmation::Accepted,
        };
        slot.confirmed = Some(input);

        while self
            .slot(self.confirmed_tick + 1)
            .is_some_and(|s| s.confirmed.is_some())
        {
            self.confirmed_tick += 1;
        }
        outcome
    }

    #[inline]
    pub fn is_confirmed(&self, tick: u64) -> bool {
        self.slot(tick).is_some_and(|s| s.confirmed.is_some())
    }

    pub fn confirmed(&self, tick: u64) -> Option<&TickInput> {
        self.slot(tick).and_then(|s| s.confirmed.as_ref())
    }

    /// Confirmed input for `tick`, or the last known input repeated.
    pub fn resolve(&self, tick: u64) -> TickInput {
        if let Some(input) = self.confirmed(tick) {
            return input.clone();
        }
        self.last_known_before(tick)
            .map(TickInput::repeated)
            .unwrap_or_default()
    }

    fn last_known_before(&self, tick: u64) -> Option<&TickInput> {
        let end = tick.saturating_sub(self.base_tick) as usize;
        self.slots
            .iter()
            .take(end)
            .rev()
            .find_map(|s| s.confirmed.as_ref().or(s.used.as_ref()))
    }

    /// Records what the simulation used for `tick`.
    pub fn mark_used(&mut self, tick: u64, input: &TickInput) {
        if let Some(slot) = self.slot_mut(tick) {
            slot.used = Some(input.clone());
        }
    }

    #[inline]
    pub fn confirmed_tick(&self) -> u64 {
        self.confirmed_tick
    }

    /// First tick still held in the buffer
    #[inline]
    pub fn base_tick(&self) -> u64 {
        self.base_tick
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops history older than `tick - 1`, confirmed or not, keeping one
    /// slot for substitution.
    pub fn trim_before(&mut self, tick: u64) {
        let keep_from = tick.saturating_sub(1);
        while self.base_tick < keep_from && self.slots.len() > 1 {
            self.slots.pop_front();
            self.base_tick += 1;
        }
    }
}

// ============================================================================
// Input Sync
// ============================================================================

/// What the caller must do after an input arrives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackAction {
    /// Nothing: future tick or prediction held
    None,
    /// Restore the snapshot before `to_tick` and resimulate
    Rollback { to_tick: u64 },
}

/// Default for [`InputSync::with_max_lead`]
pub const DEFAULT_MAX_LEAD: u64 = 256;

/// Input bookkeeping for every player of a session
#[derive(Debug)]
pub struct InputSync {
    buffers: Vec<InputBuffer>,
    simulated_tick: u64,
    max_lead: u64,
}

impl InputSync {
    pub fn new(player_count: u8) -> Self {
        Self {
            buffers: (0..player_count).map(InputBuffer::new).collect(),
            simulated_tick: 0,
            max_lead: DEFAULT_MAX_LEAD,
        }
    }

    /// Inputs more than `lead` ticks past the simulated tick are rejected.
    #[must_use]
    pub fn with_max_lead(mut self, lead: u64) -> Self {
        self.max_lead = lead.max(1);
        self
    }

    #[inline]
    pub fn player_count(&self) -> u8 {
        self.buffers.len() as u8
    }

    /// Adds a confirmed input for `player` at `tick`.
    ///
    /// Ticks beyond the look-ahead window are rejected as malformed. A
    /// correction for a tick whose history was evicted returns
    /// [`SimError::RollbackOutOfRange`].
    pub fn add_input(&mut self, player: u8, tick: u64, input: TickInput) -> Result<RollbackAction> {
        let Some(buffer) = self.buffers.get_mut(player as usize) else {
            log::warn!("input for unknown player {player} at tick {tick}");
            return Ok(RollbackAction::None);
        };
        let horizon = self.simulated_tick.saturating_add(self.max_lead);
        if tick == 0 || tick > horizon {
            log::warn!("player {player}: input for tick {tick} outside 1..={horizon}");
            return Err(SimError::MalformedCommand(format!(
                "input from player {player} for tick {tick} beyond look-ahead {horizon}"
            )));
        }
        match buffer.add_confirmed(tick, input) {
            Confirmation::Mispredicted if tick <= self.simulated_tick => {
                Ok(RollbackAction::Rollback { to_tick: tick })
            }
            Confirmation::Expired => Err(SimError::RollbackOutOfRange {
                tick,
                oldest: buffer.base_tick(),
            }),
            _ => Ok(RollbackAction::None),
        }
    }

    /// Inputs to simulate `tick` with, and whether all were confirmed.
    pub fn inputs_for_tick(&mut self, tick: u64) -> (Vec<TickInput>, bool) {
        let mut verified = true;
        let inputs = self
            .buffers
            .iter_mut()
            .map(|buffer| {
                verified &= buffer.is_confirmed(tick);
                let input = buffer.resolve(tick);
                buffer.mark_used(tick, &input);
                input
            })
            .collect();
        self.simulated_tick = self.simulated_tick.max(tick);
        (inputs, verified)
    }

    /// Called after a rollback to `tick`: later ticks are no longer simulated.
    pub fn rewind_to(&mut self, tick: u64) {
        self.simulated_tick = tick.saturating_sub(1);
    }

    /// Highest tick for which every player's input is confirmed
    pub fn confirmed_tick(&self) -> u64 {
        self.buffers
            .iter()
            .map(InputBuffer::confirmed_tick)
            .min()
            .unwrap_or(self.simulated_tick)
    }

    /// Confirmed inputs of every player for `tick`, if all have arrived.
    pub fn confirmed_inputs(&self, tick: u64) -> Option<Vec<TickInput>> {
        self.buffers
            .iter()
            .map(|b| b.confirmed(tick).cloned())
            .collect()
    }

    #[inline]
    pub fn simulated_tick(&self) -> u64 {
        self.simulated_tick
    }

    /// Number of ticks simulated on predicted input
    #[inline]
    pub fn ticks_ahead(&self) -> u64 {
        self.simulated_tick.saturating_sub(self.confirmed_tick())
    }

    pub fn trim_before(&mut self, tick: u64) {
        for buffer in &mut self.buffers {
            buffer.trim_before(tick);
        }
    }

    #[inline]
    pub fn buffer(&self, player: u8) -> Option<&InputBuffer> {
        self.buffers.get(player as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jump() -> TickInput {
        TickInput::new(PlayerInput::new(PlayerInput::JUMP))
    }

    #[test]
    fn test_player_input_bytes() {
        let input = PlayerInput::default()
            .with(PlayerInput::LEFT)
            .with(PlayerInput::JUMP);
        let bytes = input.to_bytes();
        assert!(bytes.len() <= 2);
        assert_eq!(PlayerInput::from_bytes(&bytes), Some(input));
        assert!(input.pressed(PlayerInput::JUMP));
        assert!(!input.pressed(PlayerInput::RIGHT));
    }

    #[test]
    fn test_buffer_substitutes_last_known() {
        let mut buf = InputBuffer::new(0);
        buf.add_confirmed(1, jump().with_command(Command::ToggleReady));

        // Tick 2 missing: repeat buttons, drop commands
        let predicted = buf.resolve(2);
        assert_eq!(predicted, jump());
        // Nothing known yet: default input, never garbage
        assert_eq!(InputBuffer::new(1).resolve(5), TickInput::default());
    }

    #[test]
    fn test_buffer_confirmation_tracking() {
        let mut buf = InputBuffer::new(0);
        assert_eq!(buf.add_confirmed(2, jump()), Confirmation::Accepted);
        assert_eq!(buf.confirmed_tick(), 0);
        assert_eq!(buf.add_confirmed(1, jump()), Confirmation::Accepted);
        assert_eq!(buf.confirmed_tick(), 2);
        assert_eq!(buf.add_confirmed(1, jump()), Confirmation::Ignored);
    }

    #[test]
    fn test_misprediction_triggers_rollback() {
        let mut sync = InputSync::new(2);
        sync.add_input(0, 1, TickInput::default()).unwrap();

        // Player 1 unknown at tick 1: predicted
        let (inputs, verified) = sync.inputs_for_tick(1);
        assert_eq!(inputs.len(), 2);
        assert!(!verified);

        // Real input differs from the default prediction
        assert_eq!(
            sync.add_input(1, 1, jump()).unwrap(),
            RollbackAction::Rollback { to_tick: 1 }
        );
        // Future tick: no rollback
        assert_eq!(sync.add_input(1, 5, jump()).unwrap(), RollbackAction::None);
    }

    #[test]
    fn test_matching_prediction_no_rollback() {
        let mut sync = InputSync::new(2);
        sync.add_input(0, 1, jump()).unwrap();
        sync.add_input(1, 1, jump()).unwrap();
        sync.inputs_for_tick(1);

        sync.add_input(0, 2, jump()).unwrap();
        let (_, verified) = sync.inputs_for_tick(2);
        assert!(!verified);

        // Repeated prediction was right
        assert_eq!(sync.add_input(1, 2, jump()).unwrap(), RollbackAction::None);
        assert_eq!(sync.confirmed_tick(), 2);
        assert_eq!(sync.ticks_ahead(), 0);
    }

    #[test]
    fn test_far_future_input_rejected() {
        let mut sync = InputSync::new(2).with_max_lead(64);
        let err = sync
            .add_input(0, 20_000_000, TickInput::default())
            .unwrap_err();
        assert!(matches!(err, SimError::MalformedCommand(_)));
        assert!(sync.add_input(0, u64::MAX, jump()).is_err());
        assert!(sync.add_input(0, 0, jump()).is_err());
        assert!(sync.buffer(0).unwrap().is_empty());

        // The window edge is accepted and moves with the simulation
        sync.add_input(0, 64, jump()).unwrap();
        assert_eq!(sync.buffer(0).unwrap().len(), 64);
        assert!(sync.add_input(0, 65, jump()).is_err());
        sync.inputs_for_tick(1);
        sync.add_input(0, 65, jump()).unwrap();
    }

    #[test]
    fn test_silent_player_history_is_evicted() {
        let mut sync = InputSync::new(2);
        for tick in 1..=10_000 {
            sync.add_input(0, tick, jump()).unwrap();
            sync.inputs_for_tick(tick);
            sync.trim_before(tick.saturating_sub(8));
        }
        assert!(sync.buffer(0).unwrap().len() <= 10);
        assert!(sync.buffer(1).unwrap().len() <= 10);
        assert_eq!(sync.buffer(1).unwrap().confirmed_tick(), 0);

        // Correction for a predicted tick that is no longer held
        let err = sync.add_input(1, 100, jump()).unwrap_err();
        assert!(matches!(err, SimError::RollbackOutOfRange { tick: 100, .. }));
        // Resent input for an evicted but confirmed tick is a no-op
        assert_eq!(sync.add_input(0, 100, jump()).unwrap(), RollbackAction::None);
        // Recent ticks still roll back
        assert_eq!(
            sync.add_input(1, 9_998, jump()).unwrap(),
            RollbackAction::Rollback { to_tick: 9_998 }
        );
    }
}

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

//! Simulation session: tick loop, rollback, desync checks
//!
//! ```text
//! advance():
//!   tick = current + 1
//!   inputs, verified = InputSync::inputs_for_tick(tick)
//!   frame.number = tick, frame.inputs = inputs
//!   CommandTable::apply         (type, player, index) order
//!   Schedule::run               systems in compiled order
//!   EventLog::record(tick)      events of this tick, replaces older ones
//!   FrameRing::push(clone)
//!
//! add_input(late, mispredicted):
//!   restore ring[tick - 1], drop newer snapshots and events,
//!   resimulate tick..=current with corrected inputs
//! ```
//!
//! A fatal error halts the session: the frame that was being built is
//! left as is and every later call returns [`SimError::Halted`].

use crate::assets::AssetLookup;
use crate::command::{decode_batch, CommandTable};
use crate::component::Schema;
use crate::config::SimConfig;
use crate::event::{EventLog, SimEvent};
use crate::fixed_point::Fixed;
use crate::frame::{Frame, SystemId};
use crate::input_sync::{InputSync, PlayerInput, RollbackAction, TickInput};
use crate::interaction::InteractionTable;
use crate::query::Culling;
use crate::replay::{ReplayFile, ReplayRecorder};
use crate::scheduler::{Schedule, TaskGraph, TaskHandle, TaskKind};
use crate::signal::{Signal, SignalBus};
use crate::snapshot::{Checksum, FrameRing};
use crate::system::{Registrar, System, SystemKind, SystemSet};
use crate::{Result, SimError};
use std::sync::Arc;

// ============================================================================
// Context
// ============================================================================

/// Read-only session services handed to every system and handler
pub struct SimContext {
    pub config: SimConfig,
    pub schema: Arc<Schema>,
    pub assets: Arc<dyn AssetLookup>,
    pub signals: SignalBus,
    pub interactions: InteractionTable,
    pub commands: CommandTable,
    dt: Fixed,
    pool: rayon::ThreadPool,
    culling: Option<Arc<Culling>>,
    system_names: Vec<&'static str>,
}

impl SimContext {
    /// Fixed timestep in seconds
    #[inline]
    pub fn dt(&self) -> Fixed {
        self.dt
    }

    #[inline]
    pub fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }

    #[inline]
    pub fn culling(&self) -> Option<&Culling> {
        self.culling.as_deref()
    }

    /// Dispatches `signal` to its subscribers and returns it as they left it.
    pub fn raise(&self, frame: &mut Frame, mut signal: Signal) -> Result<Signal> {
        self.signals.raise(frame, self, &mut signal)?;
        Ok(signal)
    }

    pub fn system_id(&self, name: &str) -> Option<SystemId> {
        self.system_names
            .iter()
            .position(|n| *n == name)
            .map(|i| SystemId(i as u16))
    }

    pub fn system_name(&self, id: SystemId) -> &'static str {
        self.system_names.get(id.0 as usize).copied().unwrap_or("?")
    }

    /// Enables or disables the named system. Unknown names are ignored.
    pub fn set_system_enabled(&self, frame: &mut Frame, name: &str, enabled: bool) {
        match self.system_id(name) {
            Some(id) => frame.set_system_enabled(id, enabled),
            None => log::warn!("no system named {name}"),
        }
    }
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("tick_rate", &self.config.tick_rate)
            .field("players", &self.config.players)
            .field("workers", &self.pool.current_num_threads())
            .field("systems", &self.system_names)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles systems, schema and assets into a [`Simulator`]
pub struct SimulatorBuilder {
    config: SimConfig,
    schema: Arc<Schema>,
    assets: Arc<dyn AssetLookup>,
    systems: SystemSet,
    graph: TaskGraph,
    last: Option<TaskHandle>,
    culling: Option<Arc<Culling>>,
    replay: Option<u32>,
}

impl SimulatorBuilder {
    pub fn new(config: SimConfig, schema: Arc<Schema>, assets: Arc<dyn AssetLookup>) -> Self {
        Self {
            config,
            schema,
            assets,
            systems: SystemSet::new(),
            graph: TaskGraph::new(),
            last: None,
            culling: None,
            replay: None,
        }
    }

    /// Appends a system that runs after the previously added one.
    #[must_use]
    pub fn system<S: System + 'static>(mut self, system: S) -> Self {
        let deps: Vec<TaskHandle> = self.last.into_iter().collect();
        self.add_system_after(Box::new(system), &deps);
        self
    }

    /// Adds a system with explicit dependencies instead of the implicit
    /// chain.
    pub fn add_system_after(&mut self, system: Box<dyn System>, deps: &[TaskHandle]) -> TaskHandle {
        let name = system.name();
        let kind = if system.kind() == SystemKind::Parallel {
            TaskKind::ParallelSafe
        } else {
            TaskKind::MainThread
        };
        let id = self.systems.push(system);
        let handle = self.graph.add(name, id, kind, deps);
        self.last = Some(handle);
        handle
    }

    /// Extra edge: `task` runs after `on`.
    pub fn add_dependency(&mut self, task: TaskHandle, on: TaskHandle) {
        self.graph.add_dependency(task, on);
    }

    /// Predicate used by culled filter systems on predicted frames.
    #[must_use]
    pub fn culling<F>(mut self, culling: F) -> Self
    where
        F: Fn(&Frame, crate::EntityRef) -> bool + Send + Sync + 'static,
    {
        self.culling = Some(Arc::new(culling));
        self
    }

    /// Records confirmed inputs into a [`ReplayFile`].
    #[must_use]
    pub fn record_replay(mut self, content_version: u32) -> Self {
        self.replay = Some(content_version);
        self
    }

    pub fn build(self) -> Result<Simulator> {
        let config = self.config;
        config.validate()?;
        let dt = config.delta_time()?;
        let schedule = self.graph.compile()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("alice-sim-{i}"))
            .build()
            .map_err(|e| SimError::WorkerPool(e.to_string()))?;

        let mut signals = SignalBus::new();
        let mut interactions = InteractionTable::new();
        let mut commands = CommandTable::new();
        for (id, system) in self.systems.iter() {
            let mut registrar = Registrar::new(
                id,
                &self.schema,
                &mut signals,
                &mut interactions,
                &mut commands,
            );
            system.register(&mut registrar)?;
        }

        let ctx = SimContext {
            system_names: self.systems.iter().map(|(_, s)| s.name()).collect(),
            config,
            schema: Arc::clone(&self.schema),
            assets: self.assets,
            signals,
            interactions,
            commands,
            dt,
            pool,
            culling: self.culling,
        };

        let mut frame = Frame::new(Arc::clone(&self.schema), &ctx.config);
        if !ctx.config.stage.is_none() {
            frame.stage = ctx.assets.require_stage(ctx.config.stage)?.tilemap.clone();
        }
        for player in 0..ctx.config.players {
            if let Some(meta) = frame.globals.players.get_mut(player as usize) {
                meta.present = true;
            }
        }
        frame.globals.real_players = ctx.config.players;
        for (id, system) in self.systems.iter() {
            frame.set_system_enabled(id, system.start_enabled());
        }
        for (_, system) in self.systems.iter() {
            system.on_init(&mut frame, &ctx)?;
        }

        let mut events = EventLog::new();
        events.record(0, frame.take_events());
        let mut ring = FrameRing::new(ctx.config.ring_capacity());
        ring.push(frame.clone());

        log::info!(
            "session start: {} players, {} systems, {} Hz, seed {:#x}, {} workers",
            ctx.config.players,
            self.systems.len(),
            ctx.config.tick_rate,
            ctx.config.seed,
            ctx.pool.current_num_threads()
        );

        let recorder = self
            .replay
            .map(|version| ReplayRecorder::new(ReplayFile::new(ctx.config.clone(), version)));

        Ok(Simulator {
            inputs: InputSync::new(ctx.config.players)
                .with_max_lead(u64::from(ctx.config.max_input_lead)),
            ctx,
            systems: self.systems,
            schedule,
            frame,
            ring,
            events,
            recorder,
            halted: None,
        })
    }
}

// ============================================================================
// Simulator
// ============================================================================

/// One peer's view of a deterministic session
pub struct Simulator {
    ctx: SimContext,
    systems: SystemSet,
    schedule: Schedule,
    frame: Frame,
    ring: FrameRing,
    inputs: InputSync,
    events: EventLog,
    recorder: Option<ReplayRecorder>,
    halted: Option<SimError>,
}

impl Simulator {
    /// Last simulated tick
    #[inline]
    pub fn tick(&self) -> u64 {
        self.frame.number()
    }

    /// The frame of the last simulated tick
    #[inline]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    #[inline]
    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    /// Events by tick. Entries after the confirmed tick may still be
    /// retracted by a rollback.
    #[inline]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Removes and returns events that can no longer be retracted.
    pub fn take_confirmed_events(&mut self) -> Vec<(u64, SimEvent)> {
        let through = self.confirmed_tick();
        self.events.drain_through(through)
    }

    /// Highest tick simulated with confirmed input only
    pub fn confirmed_tick(&self) -> u64 {
        self.inputs.confirmed_tick().min(self.frame.number())
    }

    /// Ticks simulated on predicted input
    pub fn ticks_ahead(&self) -> u64 {
        self.inputs.ticks_ahead()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn system_id(&self, name: &str) -> Option<SystemId> {
        self.systems.find(name)
    }

    pub fn snapshot(&self, tick: u64) -> Option<&Frame> {
        self.ring.get(tick)
    }

    pub fn replay(&self) -> Option<&ReplayFile> {
        self.recorder.as_ref().map(ReplayRecorder::file)
    }

    pub fn into_replay(self) -> Option<ReplayFile> {
        self.recorder.map(ReplayRecorder::into_file)
    }

    fn check_halted(&self) -> Result<()> {
        match &self.halted {
            Some(cause) => Err(SimError::Halted(Box::new(cause.clone()))),
            None => Ok(()),
        }
    }

    fn halt(&mut self, err: SimError) -> SimError {
        log::error!("tick {}: session halted: {err}", self.frame.number());
        self.halted = Some(err.clone());
        err
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// Adds a confirmed input. Resimulates right away when it contradicts
    /// a prediction already simulated.
    ///
    /// Inputs too far ahead are rejected without halting. A correction older
    /// than the retained history halts the session.
    pub fn add_input(&mut self, player: u8, tick: u64, input: TickInput) -> Result<RollbackAction> {
        self.check_halted()?;
        let action = match self.inputs.add_input(player, tick, input) {
            Ok(action) => action,
            Err(SimError::RollbackOutOfRange { tick, oldest }) => {
                let oldest = self.ring.oldest_tick().unwrap_or(oldest);
                return Err(self.halt(SimError::RollbackOutOfRange { tick, oldest }));
            }
            Err(err) => return Err(err),
        };
        if let RollbackAction::Rollback { to_tick } = action {
            self.resimulate_from(to_tick)?;
        }
        self.record_confirmed();
        Ok(action)
    }

    /// Wire form of [`add_input`](Self::add_input): bitcode buttons plus a
    /// command batch. Commands that fail to decode are dropped.
    pub fn add_input_bytes(
        &mut self,
        player: u8,
        tick: u64,
        buttons: &[u8],
        commands: &[u8],
    ) -> Result<RollbackAction> {
        let input = PlayerInput::from_bytes(buttons).ok_or_else(|| {
            SimError::MalformedCommand(format!("input from player {player} at tick {tick}"))
        })?;
        self.add_input(
            player,
            tick,
            TickInput {
                input,
                commands: decode_batch(commands),
            },
        )
    }

    // ------------------------------------------------------------------------
    // Tick loop
    // ------------------------------------------------------------------------

    /// Simulates the next tick.
    pub fn advance(&mut self) -> Result<()> {
        self.check_halted()?;
        let tick = self.frame.number() + 1;
        let (inputs, verified) = self.inputs.inputs_for_tick(tick);
        self.run_tick(tick, inputs, verified)?;
        self.record_confirmed();
        Ok(())
    }

    /// Advances until `tick` has been simulated.
    pub fn advance_to(&mut self, tick: u64) -> Result<()> {
        while self.frame.number() < tick {
            self.advance()?;
        }
        Ok(())
    }

    fn run_tick(&mut self, tick: u64, inputs: Vec<TickInput>, verified: bool) -> Result<()> {
        let frame = &mut self.frame;
        frame.set_number(tick);
        frame.set_verified(verified);
        for (player, input) in inputs.into_iter().enumerate() {
            frame.set_tick_input(player as u8, input);
        }

        let result = self
            .ctx
            .commands
            .apply(frame, &self.ctx)
            .and_then(|()| self.schedule.run(&self.systems, frame, &self.ctx));
        if let Err(err) = result {
            return Err(self.halt(err));
        }

        let events = self.frame.take_events();
        self.events.record(tick, events);
        self.ring.push(self.frame.clone());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------------

    /// Restores the snapshot of `tick`. Later snapshots, events and
    /// simulated inputs are discarded; the next [`advance`](Self::advance)
    /// simulates `tick + 1`.
    pub fn rollback_to(&mut self, tick: u64) -> Result<()> {
        self.check_halted()?;
        let Some(snapshot) = self.ring.get(tick) else {
            return Err(SimError::RollbackOutOfRange {
                tick,
                oldest: self.ring.oldest_tick().unwrap_or(0),
            });
        };
        log::debug!("rollback: tick {} -> {tick}", self.frame.number());
        self.frame = snapshot.clone();
        self.ring.truncate_after(tick);
        self.events.truncate_from(tick + 1);
        self.inputs.rewind_to(tick + 1);
        Ok(())
    }

    fn resimulate_from(&mut self, tick: u64) -> Result<()> {
        let target = self.frame.number();
        let base = tick.saturating_sub(1);
        if let Err(err) = self.rollback_to(base) {
            // A correction the ring cannot reach means peers have diverged.
            let err = match err {
                SimError::RollbackOutOfRange { oldest, .. } => {
                    SimError::RollbackOutOfRange { tick, oldest }
                }
                other => other,
            };
            return Err(self.halt(err));
        }
        log::debug!("resimulating ticks {tick}..={target}");
        for t in tick..=target {
            let (inputs, verified) = self.inputs.inputs_for_tick(t);
            self.run_tick(t, inputs, verified)?;
        }
        Ok(())
    }

    fn record_confirmed(&mut self) {
        let through = self.confirmed_tick();
        if let Some(recorder) = self.recorder.as_mut() {
            while recorder.recorded_through() < through {
                let tick = recorder.recorded_through() + 1;
                let Some(inputs) = self.inputs.confirmed_inputs(tick) else {
                    break;
                };
                recorder.push(tick, inputs);
            }
        }
        if let Some(oldest) = self.ring.oldest_tick() {
            self.inputs.trim_before(oldest);
        }
    }

    // ------------------------------------------------------------------------
    // Desync detection
    // ------------------------------------------------------------------------

    pub fn checksum_at(&self, tick: u64) -> Result<Checksum> {
        self.ring
            .get(tick)
            .ok_or(SimError::RollbackOutOfRange {
                tick,
                oldest: self.ring.oldest_tick().unwrap_or(0),
            })?
            .checksum()
    }

    /// Compares a peer's checksum for a confirmed tick. A mismatch halts
    /// the session with [`SimError::DesyncDetected`]. Returns `false` when
    /// the tick is not confirmed yet or no longer retained, so nothing was
    /// compared.
    pub fn verify_remote_checksum(&mut self, tick: u64, remote: Checksum) -> Result<bool> {
        self.check_halted()?;
        if tick > self.confirmed_tick() {
            return Ok(false);
        }
        let Some(frame) = self.ring.get(tick) else {
            log::debug!("checksum for tick {tick} arrived after its snapshot was evicted");
            return Ok(false);
        };
        match frame.verify_checksum(remote) {
            Ok(()) => Ok(true),
            Err(err) => Err(self.halt(err)),
        }
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("tick", &self.frame.number())
            .field("confirmed", &self.confirmed_tick())
            .field("snapshots", &self.ring.len())
            .field("systems", &self.systems)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{test_schema, Health};
    use crate::signal::SignalKind;
    use crate::system::{FnSystem, SignalSystem};
    use crate::{AssetDb, Command, EntityRef};

    /// Player 0 holding RIGHT adds 1 to a counter, holding LEFT adds 10.
    fn counter_sim(players: u8, max_rollback: u32) -> Simulator {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = SimConfig {
            players,
            max_rollback,
            ..SimConfig::default()
        };
        SimulatorBuilder::new(config, test_schema(), Arc::new(AssetDb::new()))
            .system(FnSystem::new("Counter", |frame, _| {
                let existing = frame.filter::<(Health,)>()?.next().map(|(e, _)| e);
                let e = match existing {
                    Some(e) => e,
                    None => {
                        let e = frame.create();
                        frame.add(e, Health(0))?;
                        e
                    }
                };
                let mut add = 0;
                for p in 0..frame.player_count() as u8 {
                    let input = frame.input(p);
                    if input.pressed(PlayerInput::RIGHT) {
                        add += 1;
                    }
                    if input.pressed(PlayerInput::LEFT) {
                        add += 10;
                    }
                }
                frame.get_mut::<Health>(e)?.0 += add;
                Ok(())
            }))
            .build()
            .unwrap()
    }

    fn counter(sim: &Simulator) -> i32 {
        sim.frame()
            .filter::<(Health,)>()
            .unwrap()
            .next()
            .map_or(0, |(_, (h,))| h.0)
    }

    fn right() -> TickInput {
        TickInput::new(PlayerInput::new(PlayerInput::RIGHT))
    }

    fn left() -> TickInput {
        TickInput::new(PlayerInput::new(PlayerInput::LEFT))
    }

    #[test]
    fn test_prediction_repeats_last_input() {
        let mut sim = counter_sim(1, 8);
        sim.add_input(0, 1, right()).unwrap();
        for _ in 0..4 {
            sim.advance().unwrap();
        }
        // Tick 1 confirmed, ticks 2..=4 predicted from it
        assert_eq!(counter(&sim), 4);
        assert_eq!(sim.confirmed_tick(), 1);
        assert_eq!(sim.ticks_ahead(), 3);
        assert!(!sim.frame().is_verified());
    }

    #[test]
    fn test_rollback_matches_clean_run() {
        // Peer that had every input on time
        let mut clean = counter_sim(1, 16);
        for tick in 1..=10 {
            let input = if tick >= 6 { left() } else { right() };
            clean.add_input(0, tick, input).unwrap();
            clean.advance().unwrap();
        }

        // Peer that predicted ticks 6..=10 and learns about them late
        let mut late = counter_sim(1, 16);
        for tick in 1..=5 {
            late.add_input(0, tick, right()).unwrap();
            late.advance().unwrap();
        }
        late.advance_to(10).unwrap();
        assert_eq!(counter(&late), 10);

        let action = late.add_input(0, 6, left()).unwrap();
        assert_eq!(action, RollbackAction::Rollback { to_tick: 6 });
        for tick in 7..=10 {
            late.add_input(0, tick, left()).unwrap();
        }

        assert_eq!(late.tick(), 10);
        assert_eq!(counter(&late), counter(&clean));
        assert_eq!(
            late.frame().checksum().unwrap(),
            clean.frame().checksum().unwrap()
        );
    }

    #[test]
    fn test_correct_prediction_needs_no_rollback() {
        let mut sim = counter_sim(1, 8);
        sim.add_input(0, 1, right()).unwrap();
        sim.advance_to(3).unwrap();
        assert_eq!(sim.add_input(0, 2, right()).unwrap(), RollbackAction::None);
        assert_eq!(counter(&sim), 3);
    }

    #[test]
    fn test_rollback_out_of_range_halts() {
        let mut sim = counter_sim(1, 2);
        sim.advance_to(10).unwrap();
        let err = sim.add_input(0, 1, left()).unwrap_err();
        assert!(matches!(err, SimError::RollbackOutOfRange { tick: 1, .. }));
        assert!(sim.is_halted());
        assert!(matches!(sim.advance(), Err(SimError::Halted(_))));
    }

    #[test]
    fn test_remote_checksum_mismatch_halts() {
        let mut a = counter_sim(1, 8);
        let mut b = counter_sim(1, 8);
        for tick in 1..=3 {
            a.add_input(0, tick, right()).unwrap();
            b.add_input(0, tick, right()).unwrap();
            a.advance().unwrap();
            b.advance().unwrap();
        }
        assert!(a.verify_remote_checksum(2, b.checksum_at(2).unwrap()).unwrap());
        // Not confirmed yet: nothing to compare
        assert!(!a.verify_remote_checksum(4, Checksum(1)).unwrap());

        let err = a.verify_remote_checksum(3, Checksum(1)).unwrap_err();
        assert!(matches!(err, SimError::DesyncDetected { tick: 3, .. }));
        assert!(a.is_halted());
    }

    #[test]
    fn test_command_ordering_and_malformed_input() {
        let config = SimConfig {
            players: 2,
            ..SimConfig::default()
        };
        let mut sim = SimulatorBuilder::new(config, test_schema(), Arc::new(AssetDb::new()))
            .system(SignalSystem::new("Ready", |reg| {
                reg.on_command(crate::CommandType::TOGGLE_READY, |frame, _, player, _| {
                    frame.emit(SimEvent::PlayerReadyChanged {
                        player,
                        ready: true,
                    });
                    Ok(())
                });
                reg.on_command(crate::CommandType::START_TYPING, |frame, _, player, _| {
                    frame.emit(SimEvent::PlayerStartedTyping { player });
                    Ok(())
                });
                Ok(())
            }))
            .build()
            .unwrap();

        sim.add_input(
            1,
            1,
            TickInput::default()
                .with_command(Command::StartTyping)
                .with_command(Command::ToggleReady),
        )
        .unwrap();
        sim.add_input(0, 1, TickInput::default().with_command(Command::StartTyping))
            .unwrap();
        sim.advance().unwrap();

        // Type id first: START_TYPING (2) from both players, then TOGGLE_READY (4)
        assert_eq!(
            sim.events().at(1),
            &[
                SimEvent::PlayerStartedTyping { player: 0 },
                SimEvent::PlayerStartedTyping { player: 1 },
                SimEvent::PlayerReadyChanged { player: 1, ready: true },
            ][..]
        );
        assert!(matches!(
            sim.add_input_bytes(0, 2, &[], &[]),
            Err(SimError::MalformedCommand(_))
        ));
    }

    #[test]
    fn test_signals_run_in_registration_order_and_skip_disabled() {
        let config = SimConfig::default();
        let sim = SimulatorBuilder::new(config, test_schema(), Arc::new(AssetDb::new()))
            .system(SignalSystem::new("First", |reg| {
                reg.on_signal(SignalKind::BodyCrushed, |frame, _, _| {
                    let e = frame.create();
                    frame.add(e, Health(1))
                });
                Ok(())
            }))
            .system(
                SignalSystem::new("Muted", |reg| {
                    reg.on_signal(SignalKind::BodyCrushed, |frame, _, _| {
                        let e = frame.create();
                        frame.add(e, Health(99))
                    });
                    Ok(())
                })
                .disabled(),
            )
            .system(SignalSystem::new("Second", |reg| {
                reg.on_signal(SignalKind::BodyCrushed, |frame, _, signal| {
                    let e = frame.create();
                    frame.add(e, Health(2))?;
                    *signal = Signal::GameStarting;
                    Ok(())
                });
                Ok(())
            }))
            .build()
            .unwrap();

        let mut frame = sim.frame().clone();
        let out = sim
            .context()
            .raise(&mut frame, Signal::BodyCrushed { body: EntityRef::NONE })
            .unwrap();
        assert_eq!(out, Signal::GameStarting);
        let seen: Vec<i32> = frame
            .filter::<(Health,)>()
            .unwrap()
            .map(|(_, (h,))| h.0)
            .collect();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(sim.context().signals.handler_count(SignalKind::BodyCrushed), 3);
    }

    #[test]
    fn test_cyclic_graph_fails_build() {
        let mut builder =
            SimulatorBuilder::new(SimConfig::default(), test_schema(), Arc::new(AssetDb::new()));
        let a = builder.add_system_after(Box::new(FnSystem::new("A", |_, _| Ok(()))), &[]);
        let b = builder.add_system_after(Box::new(FnSystem::new("B", |_, _| Ok(()))), &[a]);
        builder.add_dependency(a, b);
        assert!(matches!(
            builder.build(),
            Err(SimError::SchedulerDeadlock { .. })
        ));
    }

    #[test]
    fn test_replay_records_confirmed_ticks() {
        let config = SimConfig::default();
        let mut sim = SimulatorBuilder::new(config, test_schema(), Arc::new(AssetDb::new()))
            .record_replay(1)
            .build()
            .unwrap();
        sim.add_input(0, 1, right()).unwrap();
        sim.add_input(0, 2, left()).unwrap();
        sim.advance_to(5).unwrap();

        let replay = sim.replay().unwrap();
        assert_eq!(replay.batches.len(), 2);
        assert_eq!(replay.batches[1].inputs, vec![left()]);
    }

    #[test]
    fn test_far_future_input_rejected() {
        let mut sim = counter_sim(1, 8);
        let err = sim.add_input(0, 1 << 40, right()).unwrap_err();
        assert!(matches!(err, SimError::MalformedCommand(_)));
        assert!(sim.add_input_bytes(0, u64::MAX, &right().input.to_bytes(), &[]).is_err());
        // Rejected, not fatal
        assert!(!sim.is_halted());
        sim.add_input(0, 1, right()).unwrap();
        sim.advance().unwrap();
        assert_eq!(counter(&sim), 1);
    }

    #[test]
    fn test_fatal_command_error_halts() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = SimConfig::default();
        let mut sim = SimulatorBuilder::new(config, test_schema(), Arc::new(AssetDb::new()))
            .system(SignalSystem::new("Commands", |reg| {
                reg.on_command(crate::CommandType::START_TYPING, |frame, _, _, _| {
                    let e = frame.create();
                    frame.add(e, Health(1))?;
                    Err(SimError::ComponentNotFound {
                        entity: e,
                        component: "Health",
                    })
                });
                reg.on_command(crate::CommandType::TOGGLE_READY, |_, _, _, _| {
                    Err(SimError::DivideByZero)
                });
                Ok(())
            }))
            .build()
            .unwrap();

        // Entity-local failure: dropped, tick completes
        sim.add_input(0, 1, TickInput::default().with_command(Command::StartTyping))
            .unwrap();
        sim.advance().unwrap();
        assert_eq!(sim.tick(), 1);

        sim.add_input(0, 2, TickInput::default().with_command(Command::ToggleReady))
            .unwrap();
        assert_eq!(sim.advance(), Err(SimError::DivideByZero));
        assert!(sim.is_halted());
        // The failed tick never reached the ring
        assert!(sim.snapshot(2).is_none());
        assert!(matches!(sim.advance(), Err(SimError::Halted(_))));
    }
}

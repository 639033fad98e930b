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

//! Systems: stateless behavior run once per tick
//!
//! All mutable state lives in the [`Frame`]. A system object only carries
//! configuration fixed at session build time, so the same instance can
//! re-run any tick during resimulation.
//!
//! | kind          | update                                               |
//! |---------------|------------------------------------------------------|
//! | `Global`      | arbitrary frame access                               |
//! | `Filtered`    | per entity of a query, in slot order                 |
//! | `Parallel`    | per component value, chunked over the worker pool    |
//! | `SignalsOnly` | none; only its signal/interaction handlers run       |

use crate::command::{CommandHandler, CommandTable, CommandType};
use crate::component::{Component, Schema};
use crate::entity::EntityRef;
use crate::frame::{Frame, SystemId};
use crate::interaction::{InteractionHandler, InteractionTable};
use crate::query::Query;
use crate::session::SimContext;
use crate::signal::{SignalBus, SignalHandler, SignalKind};
use crate::{Command, Result, Signal};
use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    Global,
    Filtered,
    Parallel,
    SignalsOnly,
}

/// Behavior registered with a session
pub trait System: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> SystemKind {
        SystemKind::Global
    }

    /// Initial enable state written into the first frame
    fn start_enabled(&self) -> bool {
        true
    }

    /// Subscribes handlers. Called once while the session is built.
    fn register(&self, _registrar: &mut Registrar<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs once on the initial frame, before tick 1.
    fn on_init(&self, _frame: &mut Frame, _ctx: &SimContext) -> Result<()> {
        Ok(())
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()>;
}

// ============================================================================
// Registrar
// ============================================================================

/// Handler registration scoped to one system
pub struct Registrar<'a> {
    system: SystemId,
    schema: &'a Schema,
    signals: &'a mut SignalBus,
    interactions: &'a mut InteractionTable,
    commands: &'a mut CommandTable,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(
        system: SystemId,
        schema: &'a Schema,
        signals: &'a mut SignalBus,
        interactions: &'a mut InteractionTable,
        commands: &'a mut CommandTable,
    ) -> Self {
        Self {
            system,
            schema,
            signals,
            interactions,
            commands,
        }
    }

    #[inline]
    pub fn system(&self) -> SystemId {
        self.system
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn on_signal<F>(&mut self, kind: SignalKind, handler: F)
    where
        F: Fn(&mut Frame, &SimContext, &mut Signal) -> Result<()> + Send + Sync + 'static,
    {
        let handler: SignalHandler = Arc::new(handler);
        self.signals.subscribe(kind, self.system, handler);
    }

    /// `handler(frame, ctx, a, b)` for overlapping entities holding `A` and `B`.
    pub fn on_interaction<A, B, F>(&mut self, handler: F) -> Result<()>
    where
        A: Component,
        B: Component,
        F: Fn(&mut Frame, &SimContext, EntityRef, EntityRef) -> Result<()> + Send + Sync + 'static,
    {
        let handler: InteractionHandler = Arc::new(handler);
        self.interactions
            .register::<A, B>(self.schema, self.system, handler)
    }

    pub fn on_command<F>(&mut self, kind: CommandType, handler: F)
    where
        F: Fn(&mut Frame, &SimContext, u8, &Command) -> Result<()> + Send + Sync + 'static,
    {
        let handler: CommandHandler = Arc::new(handler);
        self.commands.register(kind, handler);
    }
}

// ============================================================================
// System Set
// ============================================================================

/// Systems in registration order; the position is the [`SystemId`]
#[derive(Default)]
pub struct SystemSet {
    systems: Vec<Box<dyn System>>,
}

impl SystemSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, system: Box<dyn System>) -> SystemId {
        let id = SystemId(self.systems.len() as u16);
        self.systems.push(system);
        id
    }

    pub fn get(&self, id: SystemId) -> Option<&dyn System> {
        self.systems.get(id.0 as usize).map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SystemId, &dyn System)> {
        self.systems
            .iter()
            .enumerate()
            .map(|(i, s)| (SystemId(i as u16), s.as_ref()))
    }

    pub fn find(&self, name: &str) -> Option<SystemId> {
        self.iter().find(|(_, s)| s.name() == name).map(|(id, _)| id)
    }
}

impl std::fmt::Debug for SystemSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.systems.iter().map(|s| s.name()))
            .finish()
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// Global system from a closure
pub struct FnSystem<F> {
    name: &'static str,
    enabled: bool,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&mut Frame, &SimContext) -> Result<()> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            enabled: true,
            f,
        }
    }

    /// Starts disabled; some other system enables it.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&mut Frame, &SimContext) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn start_enabled(&self) -> bool {
        self.enabled
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        (self.f)(frame, ctx)
    }
}

/// Runs `f` for every entity matching `Q`, in slot order.
///
/// With culling enabled, the session's culling predicate hides entities
/// on predicted frames. Culled systems must not write state other peers
/// check against.
pub struct FilterSystem<Q, F> {
    name: &'static str,
    culled: bool,
    enabled: bool,
    f: F,
    _query: PhantomData<fn() -> Q>,
}

impl<Q, F> FilterSystem<Q, F>
where
    Q: Query,
    F: Fn(&mut Frame, &SimContext, EntityRef) -> Result<()> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            culled: false,
            enabled: true,
            f,
            _query: PhantomData,
        }
    }

    #[must_use]
    pub fn with_culling(mut self) -> Self {
        self.culled = true;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl<Q, F> System for FilterSystem<Q, F>
where
    Q: Query,
    F: Fn(&mut Frame, &SimContext, EntityRef) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> SystemKind {
        SystemKind::Filtered
    }

    fn start_enabled(&self) -> bool {
        self.enabled
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        let culling = if self.culled && !frame.is_verified() {
            ctx.culling()
        } else {
            None
        };
        frame.for_each::<Q, _>(culling, |frame, entity| (self.f)(frame, ctx, entity))
    }
}

/// Per-entity kernel over one component type, run on the worker pool.
///
/// The kernel reads the rest of the frame and writes only its own `T`,
/// so the result does not depend on the worker count or chunk size.
pub struct ParallelSystem<T, F> {
    name: &'static str,
    enabled: bool,
    kernel: F,
    _component: PhantomData<fn() -> T>,
}

impl<T, F> ParallelSystem<T, F>
where
    T: Component,
    F: Fn(&Frame, &SimContext, EntityRef, &mut T) + Send + Sync,
{
    pub fn new(name: &'static str, kernel: F) -> Self {
        Self {
            name,
            enabled: true,
            kernel,
            _component: PhantomData,
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl<T, F> System for ParallelSystem<T, F>
where
    T: Component,
    F: Fn(&Frame, &SimContext, EntityRef, &mut T) + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> SystemKind {
        SystemKind::Parallel
    }

    fn start_enabled(&self) -> bool {
        self.enabled
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        let chunk = ctx.config.parallel_chunk.max(1);
        let mut slots = frame.storage_mut::<T>()?.take_slots();
        let view: &Frame = frame;
        let kernel = &self.kernel;

        ctx.pool().install(|| {
            slots
                .par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(c, part)| {
                    let base = c * chunk;
                    for (offset, slot) in part.iter_mut().enumerate() {
                        let index = (base + offset) as u32;
                        if let (Some(value), Some(entity)) =
                            (slot.as_mut(), view.entities().entity_at(index))
                        {
                            kernel(view, ctx, entity, value);
                        }
                    }
                });
        });

        frame.storage_mut::<T>()?.restore_slots(slots);
        Ok(())
    }
}

/// System with no update; exists to own signal, interaction and command
/// handlers that can be toggled together.
pub struct SignalSystem<R> {
    name: &'static str,
    enabled: bool,
    register: R,
}

impl<R> SignalSystem<R>
where
    R: Fn(&mut Registrar<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(name: &'static str, register: R) -> Self {
        Self {
            name,
            enabled: true,
            register,
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl<R> System for SignalSystem<R>
where
    R: Fn(&mut Registrar<'_>) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> SystemKind {
        SystemKind::SignalsOnly
    }

    fn start_enabled(&self) -> bool {
        self.enabled
    }

    fn register(&self, registrar: &mut Registrar<'_>) -> Result<()> {
        (self.register)(registrar)
    }

    fn update(&self, _frame: &mut Frame, _ctx: &SimContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{test_schema, Health, Speed};
    use crate::session::SimulatorBuilder;
    use crate::{AssetDb, Fixed, SimConfig};

    fn builder(threads: usize) -> SimulatorBuilder {
        let config = SimConfig {
            worker_threads: threads,
            parallel_chunk: 3,
            ..SimConfig::default()
        };
        SimulatorBuilder::new(config, test_schema(), Arc::new(AssetDb::new()))
    }

    fn spawn_healths(frame: &mut Frame, n: i32) {
        for i in 0..n {
            let e = frame.create();
            frame.add(e, Health(i)).unwrap();
            if i % 2 == 0 {
                frame.add(e, Speed(Fixed::from_int(i64::from(i)))).unwrap();
            }
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let run = |threads: usize| {
            let mut sim = builder(threads)
                .system(FnSystem::new("Spawn", |f, _| {
                    if f.number() == 1 {
                        spawn_healths(f, 40);
                    }
                    Ok(())
                }))
                .system(ParallelSystem::new(
                    "Regen",
                    |frame: &Frame, _ctx: &SimContext, e: EntityRef, h: &mut Health| {
                        let bonus = frame.try_get::<Speed>(e).map_or(1, |s| s.0.to_int() as i32);
                        h.0 = h.0 * 3 + bonus;
                    },
                ))
                .build()
                .unwrap();
            for _ in 0..5 {
                sim.advance().unwrap();
            }
            sim.frame().checksum().unwrap()
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn test_filter_system_visits_in_slot_order() {
        let mut sim = builder(1)
            .system(FnSystem::new("Spawn", |f, _| {
                if f.number() == 1 {
                    spawn_healths(f, 6);
                }
                Ok(())
            }))
            .system(FilterSystem::<(Health, Speed), _>::new("Boost", |f, _, e| {
                f.get_mut::<Health>(e)?.0 += 100;
                Ok(())
            }))
            .build()
            .unwrap();
        sim.advance().unwrap();

        let healths: Vec<i32> = sim
            .frame()
            .filter::<(Health,)>()
            .unwrap()
            .map(|(_, (h,))| h.0)
            .collect();
        assert_eq!(healths, vec![100, 1, 102, 3, 104, 5]);
    }

    #[test]
    fn test_disabled_system_skipped() {
        let mut sim = builder(1)
            .system(
                FnSystem::new("Never", |f, _| {
                    let e = f.create();
                    f.add(e, Health(1))
                })
                .disabled(),
            )
            .build()
            .unwrap();
        sim.advance().unwrap();
        assert_eq!(sim.frame().count::<Health>(), 0);
    }
}

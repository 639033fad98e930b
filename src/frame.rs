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

//! The Frame: complete simulation state at one tick
//!
//! ```text
//! Frame
//! ├── number / globals            tick counter, RNG, game state, player meta
//! ├── entities                    generations + liveness bitset + free list
//! ├── storages[ComponentId]       dense Vec<Option<T>> per component type
//! ├── heap                        ListRef / DictRef pools
//! ├── inputs[player]              this tick's input + commands
//! ├── systems_enabled             enable bitset (rolls back with the frame)
//! └── stage                       tilemap (mutable: bumped/broken tiles)
//! ```
//!
//! Not serialized, not checksummed: the verified flag, the outgoing event
//! buffer and the structural-pass bookkeeping.
//!
//! ## Structural changes during iteration
//!
//! Inside [`Frame::for_each`] the frame is in a structural pass:
//! - `destroy` is logical immediately (`exists` turns false) and physical
//!   (teardown hooks, slot release) when the outermost pass ends;
//! - entities created during the pass are not visited by it;
//! - `add`/`remove` of a component type the pass is iterating fails with
//!   [`SimError::StructuralChangeDuringIteration`].

use crate::assets::{AssetId, EntityPrototype};
use crate::component::{Component, ComponentId, ErasedStorage, Schema, Storage};
use crate::config::SimConfig;
use crate::entity::{EntityRef, EntityTable};
use crate::event::SimEvent;
use crate::fixed_point::Fixed;
use crate::game::components::{GameRules, GameState};
use crate::heap::{CollectionHeap, DictRef};
use crate::input_sync::{PlayerInput, TickInput};
use crate::physics::tilemap::Tilemap;
use crate::query::{Culling, Filter, Query};
use crate::rng::FrameRng;
use crate::snapshot::Checksum;
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const FORMAT_VERSION: u32 = 1;

/// Index of a system in the session's system set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SystemId(pub u16);

/// Per-player session metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMeta {
    pub present: bool,
    pub spectating: bool,
}

/// Global singleton block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Globals {
    pub rng: FrameRng,
    pub game_state: GameState,
    pub rules: GameRules,
    pub stage: AssetId,
    pub players: Vec<PlayerMeta>,
    pub real_players: u8,
    /// Player slot -> PlayerData entity
    pub player_datas: DictRef<u8, EntityRef>,
    pub game_start_frames: u16,
    /// Remaining round time
    pub timer: Fixed,
    pub big_star_spawn_timer: u16,
    pub main_big_star: EntityRef,
    pub used_star_spawns: u64,
    pub used_star_spawn_count: u8,
    pub winning_player: Option<u8>,
}

impl Globals {
    fn new(config: &SimConfig) -> Self {
        Self {
            rng: FrameRng::new(config.seed),
            game_state: GameState::PreGameRoom,
            rules: config.rules,
            stage: config.stage,
            players: vec![PlayerMeta::default(); config.max_players as usize],
            real_players: 0,
            player_datas: DictRef::NULL,
            game_start_frames: 0,
            timer: Fixed::ZERO,
            big_star_spawn_timer: 0,
            main_big_star: EntityRef::NONE,
            used_star_spawns: 0,
            used_star_spawn_count: 0,
            winning_player: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PassState {
    depth: u32,
    iterating: Vec<ComponentId>,
    pending_destroy: Vec<EntityRef>,
    fresh: Vec<u32>,
}

/// World snapshot at one tick
pub struct Frame {
    schema: Arc<Schema>,
    number: u64,
    pub globals: Globals,
    entities: EntityTable,
    storages: Vec<Box<dyn ErasedStorage>>,
    heap: CollectionHeap,
    inputs: Vec<TickInput>,
    systems_enabled: Vec<u64>,
    pub stage: Tilemap,
    verified: bool,
    events: Vec<SimEvent>,
    pass: PassState,
}

impl Clone for Frame {
    /// Deep copy. Heap handles keep resolving because pool layouts are copied
    /// slot for slot.
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            number: self.number,
            globals: self.globals.clone(),
            entities: self.entities.clone(),
            storages: self.storages.iter().map(|s| s.clone_boxed()).collect(),
            heap: self.heap.clone(),
            inputs: self.inputs.clone(),
            systems_enabled: self.systems_enabled.clone(),
            stage: self.stage.clone(),
            verified: self.verified,
            events: self.events.clone(),
            pass: self.pass.clone(),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("number", &self.number)
            .field("entities", &self.entities.count())
            .field("game_state", &self.globals.game_state)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

impl Frame {
    pub fn new(schema: Arc<Schema>, config: &SimConfig) -> Self {
        let storages = schema.make_storages();
        let mut heap = CollectionHeap::new(Arc::clone(&schema));
        let mut globals = Globals::new(config);
        // Pool registered by the session schema; missing in bare test schemas.
        globals.player_datas = heap.alloc_dict().unwrap_or(DictRef::NULL);
        Self {
            schema,
            number: 0,
            globals,
            entities: EntityTable::new(),
            storages,
            heap,
            inputs: vec![TickInput::default(); config.max_players as usize],
            systems_enabled: Vec::new(),
            stage: Tilemap::default(),
            verified: true,
            events: Vec::new(),
            pass: PassState::default(),
        }
    }

    /// Tick number this frame represents
    #[inline]
    pub fn number(&self) -> u64 {
        self.number
    }

    #[inline]
    pub(crate) fn set_number(&mut self, number: u64) {
        self.number = number;
    }

    /// True when every input for this tick was confirmed, not predicted
    #[inline]
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    #[inline]
    pub(crate) fn set_verified(&mut self, verified: bool) {
        self.verified = verified;
    }

    #[inline]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[inline]
    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    #[inline]
    pub fn heap(&self) -> &CollectionHeap {
        &self.heap
    }

    #[inline]
    pub fn heap_mut(&mut self) -> &mut CollectionHeap {
        &mut self.heap
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Creates an entity with no components.
    pub fn create(&mut self) -> EntityRef {
        let entity = self.entities.allocate();
        if self.pass.depth > 0 {
            self.pass.fresh.push(entity.index);
        }
        entity
    }

    /// Creates an entity initialized from a prototype.
    pub fn create_from(&mut self, prototype: &EntityPrototype) -> Result<EntityRef> {
        let entity = self.create();
        prototype.apply(self, entity)?;
        Ok(entity)
    }

    #[inline]
    pub fn exists(&self, entity: EntityRef) -> bool {
        self.entities.is_alive(entity)
    }

    /// Destroys an entity and tears down its components.
    pub fn destroy(&mut self, entity: EntityRef) -> Result<()> {
        if !self.entities.kill(entity) {
            return Err(SimError::InvalidHandle {
                index: entity.index,
                generation: entity.generation,
            });
        }
        if self.pass.depth > 0 {
            self.pass.pending_destroy.push(entity);
        } else {
            self.release(entity.index);
        }
        Ok(())
    }

    fn release(&mut self, index: u32) {
        let heap = &mut self.heap;
        for storage in &mut self.storages {
            storage.teardown(index, heap);
        }
        self.entities.release(index);
    }

    fn check(&self, entity: EntityRef) -> Result<()> {
        if self.entities.is_alive(entity) {
            Ok(())
        } else {
            Err(SimError::InvalidHandle {
                index: entity.index,
                generation: entity.generation,
            })
        }
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    pub fn storage<T: Component>(&self) -> Result<&Storage<T>> {
        let id = self.schema.component_id::<T>()?;
        self.storages
            .get(id.0 as usize)
            .and_then(|s| s.as_any().downcast_ref::<Storage<T>>())
            .ok_or(SimError::UnregisteredType { name: T::NAME })
    }

    pub(crate) fn storage_mut<T: Component>(&mut self) -> Result<&mut Storage<T>> {
        let id = self.schema.component_id::<T>()?;
        self.storages
            .get_mut(id.0 as usize)
            .and_then(|s| s.as_any_mut().downcast_mut::<Storage<T>>())
            .ok_or(SimError::UnregisteredType { name: T::NAME })
    }

    fn check_structural<T: Component>(&self) -> Result<()> {
        if self.pass.depth > 0 {
            let id = self.schema.component_id::<T>()?;
            if self.pass.iterating.contains(&id) {
                return Err(SimError::StructuralChangeDuringIteration { component: T::NAME });
            }
        }
        Ok(())
    }

    /// Adds or replaces a component.
    pub fn add<T: Component>(&mut self, entity: EntityRef, value: T) -> Result<()> {
        self.check(entity)?;
        let existing = self.storage::<T>()?.contains(entity.index);
        if !existing {
            self.check_structural::<T>()?;
        }
        self.storage_mut::<T>()?.insert(entity.index, value);
        Ok(())
    }

    /// Removes a component, running its teardown hook. Returns whether it
    /// was present.
    pub fn remove<T: Component>(&mut self, entity: EntityRef) -> Result<bool> {
        self.check(entity)?;
        self.check_structural::<T>()?;
        let id = self.schema.component_id::<T>()?;
        let heap = &mut self.heap;
        Ok(self
            .storages
            .get_mut(id.0 as usize)
            .is_some_and(|s| s.teardown(entity.index, heap)))
    }

    #[inline]
    pub fn has<T: Component>(&self, entity: EntityRef) -> bool {
        self.try_get::<T>(entity).is_some()
    }

    /// Type-erased [`has`](Self::has) for registration-table lookups.
    pub fn has_component(&self, id: ComponentId, entity: EntityRef) -> bool {
        self.entities.is_alive(entity)
            && self
                .storages
                .get(id.0 as usize)
                .is_some_and(|s| s.contains(entity.index))
    }

    /// Strict accessor: `InvalidHandle` or `ComponentNotFound` on failure.
    pub fn get<T: Component>(&self, entity: EntityRef) -> Result<&T> {
        self.check(entity)?;
        self.storage::<T>()?
            .get(entity.index)
            .ok_or(SimError::ComponentNotFound {
                entity,
                component: T::NAME,
            })
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityRef) -> Result<&mut T> {
        self.check(entity)?;
        self.storage_mut::<T>()?
            .get_mut(entity.index)
            .ok_or(SimError::ComponentNotFound {
                entity,
                component: T::NAME,
            })
    }

    #[inline]
    pub fn try_get<T: Component>(&self, entity: EntityRef) -> Option<&T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.storage::<T>().ok()?.get(entity.index)
    }

    #[inline]
    pub fn try_get_mut<T: Component>(&mut self, entity: EntityRef) -> Option<&mut T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.storage_mut::<T>().ok()?.get_mut(entity.index)
    }

    /// Number of live entities holding `T`
    pub fn count<T: Component>(&self) -> u32 {
        self.storage::<T>().map_or(0, Storage::count)
    }

    // ------------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------------

    pub fn filter<Q: Query>(&self) -> Result<Filter<'_, Q>> {
        Q::component_ids(&self.schema)?;
        Ok(Filter::new(self, None))
    }

    pub fn filter_culled<'f, Q: Query>(&'f self, culling: &'f Culling) -> Result<Filter<'f, Q>> {
        Q::component_ids(&self.schema)?;
        Ok(Filter::new(self, Some(culling)))
    }

    /// Visits every entity matching `Q` with mutable frame access.
    ///
    /// Per-entity errors (stale handles, missing components) are logged and
    /// the entity is skipped; any other error stops the pass. Deferred
    /// destroys are applied when the outermost pass ends.
    pub fn for_each<Q, F>(&mut self, culling: Option<&Culling>, mut f: F) -> Result<()>
    where
        Q: Query,
        F: FnMut(&mut Frame, EntityRef) -> Result<()>,
    {
        let ids = Q::component_ids(&self.schema)?;
        let restore = self.pass.iterating.len();
        self.pass.depth += 1;
        self.pass.iterating.extend(ids);

        let mut result = Ok(());
        let end = self.entities.capacity();
        for index in 0..end {
            let Some(entity) = self.entities.entity_at(index) else {
                continue;
            };
            if self.pass.fresh.contains(&index) || !Q::contains(self, index) {
                continue;
            }
            if culling.is_some_and(|cull| cull(self, entity)) {
                continue;
            }
            if let Err(err) = f(self, entity) {
                if err.is_entity_local() {
                    log::warn!("tick {}: skipping {entity}: {err}", self.number);
                } else {
                    result = Err(err);
                    break;
                }
            }
        }

        self.pass.iterating.truncate(restore);
        self.pass.depth -= 1;
        if self.pass.depth == 0 {
            self.flush_pass();
        }
        result
    }

    fn flush_pass(&mut self) {
        let pending = std::mem::take(&mut self.pass.pending_destroy);
        for entity in pending {
            self.release(entity.index);
        }
        self.pass.fresh.clear();
    }

    // ------------------------------------------------------------------------
    // Inputs, systems, events
    // ------------------------------------------------------------------------

    #[inline]
    pub fn player_count(&self) -> usize {
        self.inputs.len()
    }

    /// This tick's input for `player`; default input for unknown slots.
    pub fn input(&self, player: u8) -> PlayerInput {
        self.inputs
            .get(player as usize)
            .map(|slot| slot.input)
            .unwrap_or_default()
    }

    pub fn tick_input(&self, player: u8) -> Option<&TickInput> {
        self.inputs.get(player as usize)
    }

    pub(crate) fn set_tick_input(&mut self, player: u8, input: TickInput) {
        if let Some(slot) = self.inputs.get_mut(player as usize) {
            *slot = input;
        }
    }

    pub fn is_system_enabled(&self, id: SystemId) -> bool {
        self.systems_enabled
            .get(id.0 as usize / 64)
            .is_some_and(|word| word & (1 << (id.0 % 64)) != 0)
    }

    /// Enable state is simulated state: it is serialized and rolls back.
    pub fn set_system_enabled(&mut self, id: SystemId, enabled: bool) {
        let word = id.0 as usize / 64;
        if self.systems_enabled.len() <= word {
            self.systems_enabled.resize(word + 1, 0);
        }
        let bit = 1u64 << (id.0 % 64);
        if enabled {
            self.systems_enabled[word] |= bit;
        } else {
            self.systems_enabled[word] &= !bit;
        }
    }

    /// Queues a view-facing event. Never read back by the simulation.
    #[inline]
    pub fn emit(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    pub(crate) fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Byte-identical encoding of all simulated state.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let bad = |e: bincode::Error| SimError::MalformedSnapshot(e.to_string());
        bincode::serialize_into(&mut out, &(FORMAT_VERSION, self.number)).map_err(bad)?;
        bincode::serialize_into(&mut out, &self.globals).map_err(bad)?;
        bincode::serialize_into(&mut out, &self.entities).map_err(bad)?;
        bincode::serialize_into(&mut out, &(self.storages.len() as u32)).map_err(bad)?;
        for storage in &self.storages {
            storage.encode(&mut out)?;
        }
        self.heap.encode(&mut out)?;
        bincode::serialize_into(&mut out, &self.inputs).map_err(bad)?;
        bincode::serialize_into(&mut out, &self.systems_enabled).map_err(bad)?;
        bincode::serialize_into(&mut out, &self.stage).map_err(bad)?;
        Ok(out)
    }

    /// Rebuilds a frame from [`serialize`](Self::serialize) output. The
    /// schema must match the one the bytes were written with.
    pub fn deserialize(schema: Arc<Schema>, bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let bad = |e: bincode::Error| SimError::MalformedSnapshot(e.to_string());

        let (version, number): (u32, u64) = bincode::deserialize_from(&mut input).map_err(bad)?;
        if version != FORMAT_VERSION {
            return Err(SimError::MalformedSnapshot(format!(
                "format version {version}, expected {FORMAT_VERSION}"
            )));
        }
        let globals: Globals = bincode::deserialize_from(&mut input).map_err(bad)?;
        let entities: EntityTable = bincode::deserialize_from(&mut input).map_err(bad)?;
        let storage_count: u32 = bincode::deserialize_from(&mut input).map_err(bad)?;
        if storage_count as usize != schema.component_count() {
            return Err(SimError::MalformedSnapshot(format!(
                "{storage_count} storages, schema has {}",
                schema.component_count()
            )));
        }
        let mut storages = schema.make_storages();
        for storage in &mut storages {
            storage.decode(&mut input)?;
        }
        let mut heap = CollectionHeap::new(Arc::clone(&schema));
        heap.decode(&mut input)?;
        let inputs: Vec<TickInput> = bincode::deserialize_from(&mut input).map_err(bad)?;
        let systems_enabled: Vec<u64> = bincode::deserialize_from(&mut input).map_err(bad)?;
        let stage: Tilemap = bincode::deserialize_from(&mut input).map_err(bad)?;
        if !input.is_empty() {
            return Err(SimError::MalformedSnapshot(format!(
                "{} trailing bytes",
                input.len()
            )));
        }

        Ok(Self {
            schema,
            number,
            globals,
            entities,
            storages,
            heap,
            inputs,
            systems_enabled,
            stage,
            verified: true,
            events: Vec::new(),
            pass: PassState::default(),
        })
    }

    /// Deterministic hash of all simulated state.
    pub fn checksum(&self) -> Result<Checksum> {
        Ok(Checksum::of_bytes(&self.serialize()?))
    }

    /// Compares against a remote peer's checksum for the same tick.
    pub fn verify_checksum(&self, remote: Checksum) -> Result<()> {
        let local = self.checksum()?;
        if local == remote {
            Ok(())
        } else {
            log::error!("desync at tick {}: local {local} remote {remote}", self.number);
            Err(SimError::DesyncDetected {
                tick: self.number,
                local,
                remote,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::heap::ListRef;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Health(pub i32);

    impl Component for Health {
        const NAME: &'static str = "Health";
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Speed(pub Fixed);

    impl Component for Speed {
        const NAME: &'static str = "Speed";
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Inventory {
        pub items: ListRef<u32>,
    }

    impl Component for Inventory {
        const NAME: &'static str = "Inventory";
    }

    fn free_inventory(inv: &Inventory, heap: &mut CollectionHeap) {
        heap.free_list(inv.items);
    }

    pub(crate) fn test_schema() -> Arc<Schema> {
        Schema::builder()
            .component::<Health>()
            .component::<Speed>()
            .component_with_teardown::<Inventory>(free_inventory)
            .list::<u32>()
            .dict::<u8, EntityRef>()
            .build()
    }

    pub(crate) fn test_frame() -> Frame {
        Frame::new(test_schema(), &SimConfig::default())
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut frame = test_frame();
        let e = frame.create();
        frame.add(e, Health(10)).unwrap();
        frame.destroy(e).unwrap();

        let e2 = frame.create();
        frame.add(e2, Health(20)).unwrap();
        assert_eq!(e2.index, e.index);
        assert_ne!(e2.generation, e.generation);

        // Old handle should be invalid
        assert!(!frame.has::<Health>(e));
        assert!(frame.try_get::<Health>(e).is_none());
        assert!(matches!(
            frame.get::<Health>(e),
            Err(SimError::InvalidHandle { .. })
        ));
        assert_eq!(frame.get::<Health>(e2).unwrap(), &Health(20));
        assert!(frame.destroy(e).is_err());
    }

    #[test]
    fn test_get_missing_component() {
        let mut frame = test_frame();
        let e = frame.create();
        assert!(matches!(
            frame.get::<Speed>(e),
            Err(SimError::ComponentNotFound { component: "Speed", .. })
        ));
        assert!(frame.try_get::<Speed>(e).is_none());
        frame.add(e, Speed(Fixed::ONE)).unwrap();
        assert!(frame.remove::<Speed>(e).unwrap());
        assert!(!frame.remove::<Speed>(e).unwrap());
    }

    #[test]
    fn test_destroy_runs_teardown() {
        let mut frame = test_frame();
        let e = frame.create();
        let items = frame.heap_mut().alloc_list::<u32>().unwrap();
        frame.heap_mut().list_mut(items).unwrap().push(7);
        frame.add(e, Inventory { items }).unwrap();
        let before = frame.heap().live_collections();

        frame.destroy(e).unwrap();
        assert_eq!(frame.heap().live_collections(), before - 1);
        assert!(frame.heap().list(items).is_err());
    }

    #[test]
    fn test_destroy_deferred_during_pass() {
        let mut frame = test_frame();
        let a = frame.create();
        let b = frame.create();
        frame.add(a, Health(1)).unwrap();
        frame.add(b, Health(2)).unwrap();

        let mut visited = Vec::new();
        frame
            .for_each::<(Health,), _>(None, |f, e| {
                visited.push(e);
                if e == a {
                    f.destroy(b)?;
                    // Logically gone right away
                    assert!(!f.exists(b));
                    // Created mid-pass: not visited
                    let c = f.create();
                    f.add(c, Speed(Fixed::ONE))?;
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(visited, vec![a]);
        assert_eq!(frame.count::<Health>(), 1);
        // Slot released after the pass, so it is reusable
        let d = frame.create();
        assert_eq!(d.index, b.index);
    }

    #[test]
    fn test_structural_change_on_iterated_type_fails() {
        let mut frame = test_frame();
        let a = frame.create();
        frame.add(a, Health(1)).unwrap();

        let mut error = None;
        frame
            .for_each::<(Health,), _>(None, |f, e| {
                error = f.remove::<Health>(e).err();
                // Value mutation is fine
                f.get_mut::<Health>(e)?.0 += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            error,
            Some(SimError::StructuralChangeDuringIteration { component: "Health" })
        );
        assert_eq!(frame.get::<Health>(a).unwrap(), &Health(2));
    }

    #[test]
    fn test_clone_is_deep() {
        let mut frame = test_frame();
        let e = frame.create();
        frame.add(e, Health(5)).unwrap();
        let items = frame.heap_mut().alloc_list::<u32>().unwrap();
        frame.add(e, Inventory { items }).unwrap();

        let snapshot = frame.clone();
        frame.get_mut::<Health>(e).unwrap().0 = 99;
        frame.heap_mut().list_mut(items).unwrap().push(1);

        assert_eq!(snapshot.get::<Health>(e).unwrap(), &Health(5));
        let inv = snapshot.get::<Inventory>(e).unwrap();
        assert!(snapshot.heap().list(inv.items).unwrap().is_empty());
    }

    #[test]
    fn test_serialize_roundtrip_checksum() {
        let mut frame = test_frame();
        for i in 0..10 {
            let e = frame.create();
            frame.add(e, Health(i)).unwrap();
            if i % 3 == 0 {
                frame.add(e, Speed(Fixed::from_int(i as i64))).unwrap();
            }
        }
        frame.globals.rng.next_u64();
        frame.set_system_enabled(SystemId(3), true);

        let bytes = frame.serialize().unwrap();
        let restored = Frame::deserialize(test_schema(), &bytes).unwrap();

        assert_eq!(restored.serialize().unwrap(), bytes);
        assert_eq!(restored.checksum().unwrap(), frame.checksum().unwrap());
        assert!(restored.is_system_enabled(SystemId(3)));
        assert!(restored.verify_checksum(frame.checksum().unwrap()).is_ok());
    }

    #[test]
    fn test_malformed_snapshot() {
        let frame = test_frame();
        let bytes = frame.serialize().unwrap();
        assert!(matches!(
            Frame::deserialize(test_schema(), &bytes[..bytes.len() / 2]),
            Err(SimError::MalformedSnapshot(_))
        ));
        let mut bad_version = bytes.clone();
        bad_version[0] = 0xff;
        assert!(matches!(
            Frame::deserialize(test_schema(), &bad_version),
            Err(SimError::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn test_checksum_detects_divergence() {
        let mut a = test_frame();
        let mut b = test_frame();
        let ea = a.create();
        let eb = b.create();
        a.add(ea, Health(1)).unwrap();
        b.add(eb, Health(2)).unwrap();

        let remote = b.checksum().unwrap();
        assert!(matches!(
            a.verify_checksum(remote),
            Err(SimError::DesyncDetected { tick: 0, .. })
        ));
    }
}

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

//! Components, dense storages and the startup registration table
//!
//! Each registered component type gets one `Storage<T>`: a dense
//! `Vec<Option<T>>` indexed by entity slot. Storages sit behind the
//! [`ErasedStorage`] trait so the frame can clone, serialize and tear them
//! down without knowing `T`.
//!
//! The [`Schema`] is built once at startup and shared (`Arc`) by every frame
//! of a session. Registration order fixes the serialization order.

use crate::heap::{CollectionHeap, DictPool, ErasedPool, ListPool};
use crate::{Result, SimError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Fixed-size, plain-data component
///
/// `Copy` rules out owned heap data; variable-length state lives in the
/// frame's [`CollectionHeap`] and is referenced by handle.
pub trait Component:
    Copy + Default + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const NAME: &'static str;
}

/// Index of a component type in the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u16);

/// Per-type destructor run when a component is removed or its entity destroyed
pub type Teardown<T> = fn(&T, &mut CollectionHeap);

// ============================================================================
// Storage
// ============================================================================

/// Dense per-slot storage for one component type
#[derive(Debug, Clone)]
pub struct Storage<T: Component> {
    slots: Vec<Option<T>>,
    count: u32,
    teardown: Option<Teardown<T>>,
}

impl<T: Component> Storage<T> {
    fn new(teardown: Option<Teardown<T>>) -> Self {
        Self {
            slots: Vec::new(),
            count: 0,
            teardown,
        }
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.slots.get_mut(index as usize).and_then(Option::as_mut)
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    /// Number of entities holding this component
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn insert(&mut self, index: u32, value: T) -> Option<T> {
        let i = index as usize;
        if self.slots.len() <= i {
            self.slots.resize(i + 1, None);
        }
        let previous = self.slots[i].replace(value);
        if previous.is_none() {
            self.count += 1;
        }
        previous
    }

    pub(crate) fn remove(&mut self, index: u32) -> Option<T> {
        let removed = self.slots.get_mut(index as usize).and_then(Option::take);
        if removed.is_some() {
            self.count -= 1;
        }
        removed
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i as u32, v)))
    }

    /// Detaches the slot array for a parallel pass. Reads through the
    /// storage see nothing until [`restore_slots`](Self::restore_slots).
    pub(crate) fn take_slots(&mut self) -> Vec<Option<T>> {
        std::mem::take(&mut self.slots)
    }

    pub(crate) fn restore_slots(&mut self, slots: Vec<Option<T>>) {
        self.slots = slots;
    }
}

/// Type-erased storage interface used by the frame
pub(crate) trait ErasedStorage: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn clone_boxed(&self) -> Box<dyn ErasedStorage>;
    fn contains(&self, index: u32) -> bool;
    /// Removes the component at `index`, running the teardown hook first.
    fn teardown(&mut self, index: u32, heap: &mut CollectionHeap) -> bool;
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;
    fn decode(&mut self, input: &mut &[u8]) -> Result<()>;
}

impl<T: Component> ErasedStorage for Storage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn ErasedStorage> {
        Box::new(self.clone())
    }

    fn contains(&self, index: u32) -> bool {
        Storage::contains(self, index)
    }

    fn teardown(&mut self, index: u32, heap: &mut CollectionHeap) -> bool {
        match self.remove(index) {
            Some(value) => {
                if let Some(hook) = self.teardown {
                    hook(&value, heap);
                }
                true
            }
            None => false,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(out, &self.slots)
            .map_err(|e| SimError::MalformedSnapshot(format!("{}: {e}", T::NAME)))
    }

    fn decode(&mut self, input: &mut &[u8]) -> Result<()> {
        let slots: Vec<Option<T>> = bincode::deserialize_from(input)
            .map_err(|e| SimError::MalformedSnapshot(format!("{}: {e}", T::NAME)))?;
        self.count = slots.iter().filter(|s| s.is_some()).count() as u32;
        self.slots = slots;
        Ok(())
    }
}

// ============================================================================
// Schema
// ============================================================================

type StorageFactory = Box<dyn Fn() -> Box<dyn ErasedStorage> + Send + Sync>;
type PoolFactory = Box<dyn Fn() -> Box<dyn ErasedPool> + Send + Sync>;

struct ComponentInfo {
    name: &'static str,
    make: StorageFactory,
}

struct PoolInfo {
    make: PoolFactory,
}

/// Compile-time registration table: component types and collection pools
pub struct Schema {
    components: Vec<ComponentInfo>,
    component_ids: BTreeMap<TypeId, ComponentId>,
    pools: Vec<PoolInfo>,
    pool_ids: BTreeMap<TypeId, usize>,
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema {
                components: Vec::new(),
                component_ids: BTreeMap::new(),
                pools: Vec::new(),
                pool_ids: BTreeMap::new(),
            },
        }
    }

    pub fn component_id<T: Component>(&self) -> Result<ComponentId> {
        self.component_ids
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(SimError::UnregisteredType { name: T::NAME })
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn component_name(&self, id: ComponentId) -> &'static str {
        self.components
            .get(id.0 as usize)
            .map_or("<unknown>", |c| c.name)
    }

    pub(crate) fn pool_index<P: 'static>(&self) -> Result<usize> {
        self.pool_ids
            .get(&TypeId::of::<P>())
            .copied()
            .ok_or(SimError::UnregisteredType {
                name: type_name::<P>(),
            })
    }

    pub(crate) fn make_storages(&self) -> Vec<Box<dyn ErasedStorage>> {
        self.components.iter().map(|c| (c.make)()).collect()
    }

    pub(crate) fn make_pools(&self) -> Vec<Box<dyn ErasedPool>> {
        self.pools.iter().map(|p| (p.make)()).collect()
    }
}

/// Builder for [`Schema`]. Re-registering a type is a no-op.
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    #[must_use]
    pub fn component<T: Component>(self) -> Self {
        self.register::<T>(None)
    }

    /// Registers `T` with a destructor that frees the collections it owns.
    #[must_use]
    pub fn component_with_teardown<T: Component>(self, hook: Teardown<T>) -> Self {
        self.register::<T>(Some(hook))
    }

    fn register<T: Component>(mut self, hook: Option<Teardown<T>>) -> Self {
        let key = TypeId::of::<T>();
        if self.schema.component_ids.contains_key(&key) {
            return self;
        }
        let id = ComponentId(self.schema.components.len() as u16);
        self.schema.components.push(ComponentInfo {
            name: T::NAME,
            make: Box::new(move || Box::new(Storage::<T>::new(hook))),
        });
        self.schema.component_ids.insert(key, id);
        self
    }

    /// Registers a pool of `ListRef<T>` collections.
    #[must_use]
    pub fn list<T>(self) -> Self
    where
        T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.pool::<ListPool<T>>(|| -> Box<dyn ErasedPool> { Box::new(ListPool::<T>::default()) })
    }

    /// Registers a pool of `DictRef<K, V>` collections.
    #[must_use]
    pub fn dict<K, V>(self) -> Self
    where
        K: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.pool::<DictPool<K, V>>(|| -> Box<dyn ErasedPool> {
            Box::new(DictPool::<K, V>::default())
        })
    }

    fn pool<P: 'static>(mut self, make: fn() -> Box<dyn ErasedPool>) -> Self {
        let key = TypeId::of::<P>();
        if self.schema.pool_ids.contains_key(&key) {
            return self;
        }
        self.schema.pool_ids.insert(key, self.schema.pools.len());
        self.schema.pools.push(PoolInfo {
            make: Box::new(make),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Schema> {
        Arc::new(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Health(i32);

    impl Component for Health {
        const NAME: &'static str = "Health";
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Armor(i32);

    impl Component for Armor {
        const NAME: &'static str = "Armor";
    }

    #[test]
    fn test_registration_order_and_dedup() {
        let schema = Schema::builder()
            .component::<Health>()
            .component::<Armor>()
            .component::<Health>()
            .build();

        assert_eq!(schema.component_count(), 2);
        assert_eq!(schema.component_id::<Health>().unwrap(), ComponentId(0));
        assert_eq!(schema.component_id::<Armor>().unwrap(), ComponentId(1));
        assert_eq!(schema.component_name(ComponentId(1)), "Armor");
    }

    #[test]
    fn test_unregistered_type() {
        let schema = Schema::builder().component::<Health>().build();
        assert_eq!(
            schema.component_id::<Armor>(),
            Err(SimError::UnregisteredType { name: "Armor" })
        );
    }

    #[test]
    fn test_storage_dense_ops() {
        let mut storage = Storage::<Health>::new(None);
        assert_eq!(storage.insert(5, Health(3)), None);
        assert_eq!(storage.insert(5, Health(4)), Some(Health(3)));
        storage.insert(1, Health(1));

        assert_eq!(storage.count(), 2);
        let indices: Vec<u32> = storage.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 5]);

        assert_eq!(storage.remove(5), Some(Health(4)));
        assert_eq!(storage.remove(5), None);
        assert_eq!(storage.count(), 1);
    }

    #[test]
    fn test_storage_encode_decode() {
        let mut storage = Storage::<Health>::new(None);
        storage.insert(2, Health(-7));

        let mut bytes = Vec::new();
        storage.encode(&mut bytes).unwrap();

        let mut copy = Storage::<Health>::new(None);
        copy.decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(copy.get(2), Some(&Health(-7)));
        assert_eq!(copy.count(), 1);

        let mut truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            copy.decode(&mut truncated),
            Err(SimError::MalformedSnapshot(_))
        ));
    }
}

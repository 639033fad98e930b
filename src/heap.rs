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

//! Frame-owned heap for variable-length collections
//!
//! Components stay `Copy`; a component that needs a list or a dictionary
//! stores a `ListRef<T>` / `DictRef<K, V>` and resolves it through the owning
//! frame's [`CollectionHeap`].
//!
//! One pool per registered element type, each a generational [`Arena`].
//! Cloning the heap copies every arena with its index layout intact, so a
//! handle taken from frame A resolves to the equivalent collection in
//! `A.clone()`; no remapping pass is needed.
//!
//! Collections are not thread-safe. Only main-thread tasks touch the heap.

use crate::arena::{Arena, Handle};
use crate::component::Schema;
use crate::{Result, SimError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// Typed handles
// ============================================================================

/// Handle to a `Vec<T>` in the frame heap
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ListRef<T> {
    handle: Handle,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

/// Handle to a `BTreeMap<K, V>` in the frame heap
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DictRef<K, V> {
    handle: Handle,
    #[serde(skip)]
    _marker: PhantomData<fn() -> (K, V)>,
}

macro_rules! impl_collection_ref {
    ($name:ident < $($p:ident),+ >) => {
        impl<$($p),+> $name<$($p),+> {
            pub const NULL: Self = Self { handle: Handle::NULL, _marker: PhantomData };

            const fn from_handle(handle: Handle) -> Self {
                Self { handle, _marker: PhantomData }
            }

            #[inline]
            pub const fn is_null(&self) -> bool {
                self.handle.is_null()
            }

            #[inline]
            pub const fn handle(&self) -> Handle {
                self.handle
            }
        }

        impl<$($p),+> Clone for $name<$($p),+> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<$($p),+> Copy for $name<$($p),+> {}

        impl<$($p),+> Default for $name<$($p),+> {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl<$($p),+> PartialEq for $name<$($p),+> {
            fn eq(&self, other: &Self) -> bool {
                self.handle == other.handle
            }
        }

        impl<$($p),+> Eq for $name<$($p),+> {}

        impl<$($p),+> fmt::Debug for $name<$($p),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}:{})", stringify!($name), self.handle.index, self.handle.generation)
            }
        }
    };
}

impl_collection_ref!(ListRef<T>);
impl_collection_ref!(DictRef<K, V>);

// ============================================================================
// Pools
// ============================================================================

pub(crate) trait ErasedPool: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn clone_boxed(&self) -> Box<dyn ErasedPool>;
    fn live(&self) -> usize;
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;
    fn decode(&mut self, input: &mut &[u8]) -> Result<()>;
}

#[derive(Clone)]
pub(crate) struct ListPool<T>(Arena<Vec<T>>);

#[derive(Clone)]
pub(crate) struct DictPool<K, V>(Arena<BTreeMap<K, V>>);

impl<T> Default for ListPool<T> {
    fn default() -> Self {
        Self(Arena::new())
    }
}

impl<K, V> Default for DictPool<K, V> {
    fn default() -> Self {
        Self(Arena::new())
    }
}

macro_rules! impl_erased_pool {
    ($pool:ty, [$($bounds:tt)*]) => {
        impl<$($bounds)*> ErasedPool for $pool {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }

            fn clone_boxed(&self) -> Box<dyn ErasedPool> {
                Box::new(self.clone())
            }

            fn live(&self) -> usize {
                self.0.len()
            }

            fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
                bincode::serialize_into(out, &self.0)
                    .map_err(|e| SimError::MalformedSnapshot(format!("heap pool: {e}")))
            }

            fn decode(&mut self, input: &mut &[u8]) -> Result<()> {
                self.0 = bincode::deserialize_from(input)
                    .map_err(|e| SimError::MalformedSnapshot(format!("heap pool: {e}")))?;
                Ok(())
            }
        }
    };
}

impl_erased_pool!(
    ListPool<T>,
    [T: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static]
);
impl_erased_pool!(
    DictPool<K, V>,
    [
        K: Ord + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
    ]
);

// ============================================================================
// CollectionHeap
// ============================================================================

/// Per-frame pools of dynamic collections
pub struct CollectionHeap {
    schema: Arc<Schema>,
    pools: Vec<Box<dyn ErasedPool>>,
}

impl Clone for CollectionHeap {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            pools: self.pools.iter().map(|p| p.clone_boxed()).collect(),
        }
    }
}

impl fmt::Debug for CollectionHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHeap")
            .field("pools", &self.pools.len())
            .field("live", &self.live_collections())
            .finish()
    }
}

impl CollectionHeap {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        let pools = schema.make_pools();
        Self { schema, pools }
    }

    fn pool<P: 'static>(&self) -> Result<&P> {
        let index = self.schema.pool_index::<P>()?;
        self.pools
            .get(index)
            .and_then(|p| p.as_any().downcast_ref::<P>())
            .ok_or(SimError::StaleCollection)
    }

    fn pool_mut<P: 'static>(&mut self) -> Result<&mut P> {
        let index = self.schema.pool_index::<P>()?;
        self.pools
            .get_mut(index)
            .and_then(|p| p.as_any_mut().downcast_mut::<P>())
            .ok_or(SimError::StaleCollection)
    }

    /// Total live collections across all pools. Leak checks use this.
    pub fn live_collections(&self) -> usize {
        self.pools.iter().map(|p| p.live()).sum()
    }

    // ------------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------------

    pub fn alloc_list<T: 'static>(&mut self) -> Result<ListRef<T>> {
        let pool = self.pool_mut::<ListPool<T>>()?;
        Ok(ListRef::from_handle(pool.0.insert(Vec::new())))
    }

    pub fn list<T: 'static>(&self, list: ListRef<T>) -> Result<&Vec<T>> {
        self.pool::<ListPool<T>>()?
            .0
            .get(list.handle)
            .ok_or(SimError::StaleCollection)
    }

    pub fn list_mut<T: 'static>(&mut self, list: ListRef<T>) -> Result<&mut Vec<T>> {
        self.pool_mut::<ListPool<T>>()?
            .0
            .get_mut(list.handle)
            .ok_or(SimError::StaleCollection)
    }

    /// Releases a list. Returns false for null or stale handles.
    pub fn free_list<T: 'static>(&mut self, list: ListRef<T>) -> bool {
        self.pool_mut::<ListPool<T>>()
            .is_ok_and(|pool| pool.0.remove(list.handle).is_some())
    }

    // ------------------------------------------------------------------------
    // Dictionaries
    // ------------------------------------------------------------------------

    pub fn alloc_dict<K: 'static, V: 'static>(&mut self) -> Result<DictRef<K, V>> {
        let pool = self.pool_mut::<DictPool<K, V>>()?;
        Ok(DictRef::from_handle(pool.0.insert(BTreeMap::new())))
    }

    pub fn dict<K: 'static, V: 'static>(&self, dict: DictRef<K, V>) -> Result<&BTreeMap<K, V>> {
        self.pool::<DictPool<K, V>>()?
            .0
            .get(dict.handle)
            .ok_or(SimError::StaleCollection)
    }

    pub fn dict_mut<K: 'static, V: 'static>(
        &mut self,
        dict: DictRef<K, V>,
    ) -> Result<&mut BTreeMap<K, V>> {
        self.pool_mut::<DictPool<K, V>>()?
            .0
            .get_mut(dict.handle)
            .ok_or(SimError::StaleCollection)
    }

    pub fn free_dict<K: 'static, V: 'static>(&mut self, dict: DictRef<K, V>) -> bool {
        self.pool_mut::<DictPool<K, V>>()
            .is_ok_and(|pool| pool.0.remove(dict.handle).is_some())
    }

    // ------------------------------------------------------------------------
    // Serialization (pool order = registration order)
    // ------------------------------------------------------------------------

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        for pool in &self.pools {
            pool.encode(out)?;
        }
        Ok(())
    }

    pub(crate) fn decode(&mut self, input: &mut &[u8]) -> Result<()> {
        for pool in &mut self.pools {
            pool.decode(input)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> CollectionHeap {
        let schema = Schema::builder().list::<u32>().dict::<u8, i64>().build();
        CollectionHeap::new(schema)
    }

    #[test]
    fn test_list_lifecycle() {
        let mut heap = heap();
        let list = heap.alloc_list::<u32>().unwrap();
        heap.list_mut(list).unwrap().extend([1, 2, 3]);
        assert_eq!(heap.list(list).unwrap(), &vec![1, 2, 3]);
        assert_eq!(heap.live_collections(), 1);

        assert!(heap.free_list(list));
        assert!(!heap.free_list(list));
        assert_eq!(heap.list(list), Err(SimError::StaleCollection));
        assert_eq!(heap.live_collections(), 0);
    }

    #[test]
    fn test_null_handle_never_resolves() {
        let heap = heap();
        assert!(ListRef::<u32>::default().is_null());
        assert_eq!(heap.list(ListRef::<u32>::NULL), Err(SimError::StaleCollection));
    }

    #[test]
    fn test_unregistered_pool() {
        let mut heap = heap();
        assert!(matches!(
            heap.alloc_list::<i8>(),
            Err(SimError::UnregisteredType { .. })
        ));
    }

    #[test]
    fn test_clone_is_independent_and_handles_stay_valid() {
        let mut heap = heap();
        let dict = heap.alloc_dict::<u8, i64>().unwrap();
        heap.dict_mut(dict).unwrap().insert(1, 10);

        let copy = heap.clone();
        heap.dict_mut(dict).unwrap().insert(2, 20);

        assert_eq!(copy.dict(dict).unwrap().len(), 1);
        assert_eq!(heap.dict(dict).unwrap().len(), 2);
    }

    #[test]
    fn test_encode_decode_preserves_layout() {
        let mut heap = heap();
        let a = heap.alloc_list::<u32>().unwrap();
        let b = heap.alloc_list::<u32>().unwrap();
        heap.free_list(a);
        heap.list_mut(b).unwrap().push(9);

        let mut bytes = Vec::new();
        heap.encode(&mut bytes).unwrap();

        let mut restored = self::heap();
        restored.decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.list(b).unwrap(), &vec![9]);
        assert!(restored.list(a).is_err());
        // Free list survives: next alloc reuses slot a
        let c = restored.alloc_list::<u32>().unwrap();
        assert_eq!(c.handle().index, a.handle().index);
    }
}

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

//! Component-tuple filters
//!
//! `frame.filter::<(A, B)>()` yields `(EntityRef, (&A, &B))` for every live
//! entity holding both components, in ascending slot order. The iterator is
//! lazy, borrows the frame immutably and can be restarted with
//! [`Filter::reset`].

use crate::component::{Component, ComponentId, Schema};
use crate::entity::EntityRef;
use crate::frame::Frame;
use crate::Result;
use std::marker::PhantomData;

/// Culling predicate: returns `true` for entities to skip
pub type Culling = dyn Fn(&Frame, EntityRef) -> bool + Send + Sync;

/// A tuple of component types that entities must all hold
pub trait Query {
    type Item<'f>;

    fn component_ids(schema: &Schema) -> Result<Vec<ComponentId>>;

    fn contains(frame: &Frame, index: u32) -> bool;

    fn fetch(frame: &Frame, index: u32) -> Option<Self::Item<'_>>;
}

macro_rules! impl_query {
    ($($t:ident),+) => {
        impl<$($t: Component),+> Query for ($($t,)+) {
            type Item<'f> = ($(&'f $t,)+);

            fn component_ids(schema: &Schema) -> Result<Vec<ComponentId>> {
                Ok(vec![$(schema.component_id::<$t>()?),+])
            }

            #[inline]
            fn contains(frame: &Frame, index: u32) -> bool {
                $(frame.storage::<$t>().is_ok_and(|s| s.contains(index)))&&+
            }

            #[inline]
            fn fetch(frame: &Frame, index: u32) -> Option<Self::Item<'_>> {
                Some(($(frame.storage::<$t>().ok()?.get(index)?,)+))
            }
        }
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);

/// Lazy, restartable filter iterator
pub struct Filter<'f, Q: Query> {
    frame: &'f Frame,
    cursor: u32,
    end: u32,
    culling: Option<&'f Culling>,
    _query: PhantomData<fn() -> Q>,
}

impl<'f, Q: Query> Filter<'f, Q> {
    pub(crate) fn new(frame: &'f Frame, culling: Option<&'f Culling>) -> Self {
        Self {
            frame,
            cursor: 0,
            end: frame.entities().capacity(),
            culling,
            _query: PhantomData,
        }
    }

    /// Rewinds to the first entity.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.end = self.frame.entities().capacity();
    }
}

impl<'f, Q: Query> Iterator for Filter<'f, Q> {
    type Item = (EntityRef, Q::Item<'f>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.end {
            let index = self.cursor;
            self.cursor += 1;
            let Some(entity) = self.frame.entities().entity_at(index) else {
                continue;
            };
            if self.culling.is_some_and(|cull| cull(self.frame, entity)) {
                continue;
            }
            if let Some(item) = Q::fetch(self.frame, index) {
                return Some((entity, item));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::frame::tests::{test_frame, Health, Speed};
    use crate::Fixed;

    #[test]
    fn test_filter_order_and_restart() {
        let mut frame = test_frame();
        let entities: Vec<_> = (0..6).map(|_| frame.create()).collect();
        for &i in &[1, 3, 5] {
            frame.add(entities[i], Health(i as i32)).unwrap();
        }

        let mut filter = frame.filter::<(Health,)>().unwrap();
        let first: Vec<u32> = filter.by_ref().map(|(e, _)| e.index).collect();
        filter.reset();
        let second: Vec<u32> = filter.map(|(e, _)| e.index).collect();

        assert_eq!(first, vec![1, 3, 5]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_filter_requires_all_components() {
        let mut frame = test_frame();
        let a = frame.create();
        let b = frame.create();
        frame.add(a, Health(1)).unwrap();
        frame.add(b, Health(2)).unwrap();
        frame.add(b, Speed(Fixed::ONE)).unwrap();

        let hits: Vec<_> = frame
            .filter::<(Health, Speed)>()
            .unwrap()
            .map(|(e, (h, s))| (e, h.0, s.0))
            .collect();
        assert_eq!(hits, vec![(b, 2, Fixed::ONE)]);
    }

    #[test]
    fn test_culling_skips_entities() {
        let mut frame = test_frame();
        let a = frame.create();
        let b = frame.create();
        frame.add(a, Health(1)).unwrap();
        frame.add(b, Health(2)).unwrap();

        let cull = move |_: &crate::Frame, e: crate::EntityRef| e == a;
        let seen: Vec<_> = frame
            .filter_culled::<(Health,)>(&cull)
            .unwrap()
            .map(|(e, _)| e)
            .collect();
        assert_eq!(seen, vec![b]);
    }
}

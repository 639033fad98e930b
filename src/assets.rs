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

//! Static asset lookup
//!
//! Stage layouts, character stats and entity prototypes are addressed by a
//! stable [`AssetId`] and resolved through an injected [`AssetLookup`]. The
//! simulation only ever reads assets; anything it needs to mutate (the
//! tilemap) is copied into the frame at session start.

use crate::component::Component;
use crate::entity::EntityRef;
use crate::fixed_point::{Fixed, FpVec2};
use crate::frame::Frame;
use crate::physics::tilemap::Tilemap;
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stable asset identifier
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub struct AssetId(pub u64);

impl AssetId {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Stage layout
#[derive(Debug, Clone, Default)]
pub struct StageAsset {
    pub name: String,
    pub tilemap: Tilemap,
    /// Centre of the player spawn circle
    pub spawnpoint: FpVec2,
    pub spawn_radius: Fixed,
    pub big_star_spawnpoints: Vec<FpVec2>,
    /// Bodies falling below this height are out of the level
    pub kill_plane: Fixed,
    /// Left and right edges connect; otherwise they act as walls
    pub wrapping: bool,
}

/// Per-character movement stats, units per second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterAsset {
    pub walk_speed: Fixed,
    pub sprint_speed: Fixed,
    /// Velocity change per tick toward the target speed
    pub acceleration: Fixed,
    pub jump_speed: Fixed,
}

impl Default for CharacterAsset {
    fn default() -> Self {
        Self {
            walk_speed: Fixed::from_int(4),
            sprint_speed: Fixed::from_int(7),
            acceleration: Fixed::from_ratio(1, 2),
            jump_speed: Fixed::from_int(12),
        }
    }
}

// ============================================================================
// Prototypes
// ============================================================================

/// One component value a prototype stamps onto new entities
pub trait PrototypeComponent: Send + Sync {
    fn component_name(&self) -> &'static str;
    fn apply(&self, frame: &mut Frame, entity: EntityRef) -> Result<()>;
}

impl<T: Component> PrototypeComponent for T {
    fn component_name(&self) -> &'static str {
        T::NAME
    }

    fn apply(&self, frame: &mut Frame, entity: EntityRef) -> Result<()> {
        frame.add(entity, *self)
    }
}

/// Component defaults for entity creation
#[derive(Clone, Default)]
pub struct EntityPrototype {
    pub name: String,
    components: Vec<Arc<dyn PrototypeComponent>>,
}

impl EntityPrototype {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
        }
    }

    #[must_use]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.components.push(Arc::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Adds every component in declaration order.
    pub fn apply(&self, frame: &mut Frame, entity: EntityRef) -> Result<()> {
        for component in &self.components {
            component.apply(frame, entity)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EntityPrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.components.iter().map(|c| c.component_name()).collect();
        f.debug_struct("EntityPrototype")
            .field("name", &self.name)
            .field("components", &names)
            .finish()
    }
}

// ============================================================================
// Lookup
// ============================================================================

/// Read-only asset source injected into the session
pub trait AssetLookup: Send + Sync {
    fn stage(&self, id: AssetId) -> Option<&StageAsset>;
    fn character(&self, id: AssetId) -> Option<&CharacterAsset>;
    fn prototype(&self, id: AssetId) -> Option<&EntityPrototype>;

    fn require_stage(&self, id: AssetId) -> Result<&StageAsset> {
        self.stage(id).ok_or(SimError::MissingAsset(id))
    }

    fn require_character(&self, id: AssetId) -> Result<&CharacterAsset> {
        self.character(id).ok_or(SimError::MissingAsset(id))
    }

    fn require_prototype(&self, id: AssetId) -> Result<&EntityPrototype> {
        self.prototype(id).ok_or(SimError::MissingAsset(id))
    }
}

/// In-memory asset table
#[derive(Debug, Clone, Default)]
pub struct AssetDb {
    stages: BTreeMap<AssetId, StageAsset>,
    characters: BTreeMap<AssetId, CharacterAsset>,
    prototypes: BTreeMap<AssetId, EntityPrototype>,
}

impl AssetDb {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stage(mut self, id: AssetId, stage: StageAsset) -> Self {
        self.stages.insert(id, stage);
        self
    }

    #[must_use]
    pub fn with_character(mut self, id: AssetId, character: CharacterAsset) -> Self {
        self.characters.insert(id, character);
        self
    }

    #[must_use]
    pub fn with_prototype(mut self, id: AssetId, prototype: EntityPrototype) -> Self {
        self.prototypes.insert(id, prototype);
        self
    }
}

impl AssetLookup for AssetDb {
    fn stage(&self, id: AssetId) -> Option<&StageAsset> {
        self.stages.get(&id)
    }

    fn character(&self, id: AssetId) -> Option<&CharacterAsset> {
        self.characters.get(&id)
    }

    fn prototype(&self, id: AssetId) -> Option<&EntityPrototype> {
        self.prototypes.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{test_frame, Health, Speed};

    #[test]
    fn test_prototype_applies_components() {
        let prototype = EntityPrototype::new("runner")
            .with(Health(3))
            .with(Speed(Fixed::ONE));
        assert_eq!(prototype.len(), 2);

        let mut frame = test_frame();
        let e = frame.create_from(&prototype).unwrap();
        assert_eq!(frame.get::<Health>(e).unwrap(), &Health(3));
        assert_eq!(frame.get::<Speed>(e).unwrap(), &Speed(Fixed::ONE));
        assert!(format!("{prototype:?}").contains("Health"));
    }

    #[test]
    fn test_missing_asset() {
        let db = AssetDb::new().with_character(AssetId(5), CharacterAsset::default());
        assert!(db.require_character(AssetId(5)).is_ok());
        assert_eq!(
            db.require_stage(AssetId(9)).err(),
            Some(SimError::MissingAsset(AssetId(9)))
        );
        assert!(db.prototype(AssetId::NONE).is_none());
    }
}

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

//! Game components and match rules

use crate::assets::AssetId;
use crate::component::{Component, SchemaBuilder};
use crate::entity::EntityRef;
use crate::fixed_point::Fixed;
use serde::{Deserialize, Serialize};

/// Match phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameState {
    /// Lobby: players pick characters, chat and ready up
    #[default]
    PreGameRoom,
    WaitingForPlayers,
    /// Countdown before play
    Starting,
    Playing,
    Ended,
}

/// Win conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    /// Stars that win the match; 0 disables the condition
    pub stars_to_win: u8,
    /// Round length; 0 means no time limit
    pub timer_seconds: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            stars_to_win: 10,
            timer_seconds: 0,
        }
    }
}

/// A player's in-level avatar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarioPlayer {
    pub player: u8,
    pub character: AssetId,
    /// Slot on the spawn circle
    pub spawnpoint_index: u8,
    pub stars: u8,
    pub is_dead: bool,
    pub respawn_frames: u16,
    /// Lose a star on the next update
    pub drop_star: bool,
}

impl Component for MarioPlayer {
    const NAME: &'static str = "MarioPlayer";
}

/// Collectible star. Stationary stars are the spawned ones; dropped stars
/// bounce around until their lifetime runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigStar {
    pub uncollectable_frames: u16,
    pub lifetime: u16,
    pub is_stationary: bool,
    pub facing_right: bool,
    /// Horizontal speed while bouncing
    pub speed: Fixed,
    /// Upward speed after touching the ground
    pub bounce_force: Fixed,
}

impl Default for BigStar {
    fn default() -> Self {
        Self {
            uncollectable_frames: 0,
            lifetime: 0,
            is_stationary: true,
            facing_right: true,
            speed: Fixed::from_int(3),
            bounce_force: Fixed::from_int(8),
        }
    }
}

impl Component for BigStar {
    const NAME: &'static str = "BigStar";
}

/// Lobby settings of one player slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerData {
    pub player: u8,
    pub character: u8,
    pub skin: u8,
    pub team: u8,
    pub ready: bool,
    pub spectating: bool,
    pub loaded: bool,
}

impl Component for PlayerData {
    const NAME: &'static str = "PlayerData";
}

/// Registers the game components and the player-data dictionary.
#[must_use]
pub fn register(builder: SchemaBuilder) -> SchemaBuilder {
    builder
        .component::<MarioPlayer>()
        .component::<BigStar>()
        .component::<PlayerData>()
        .dict::<u8, EntityRef>()
}

/// Counts `timer` down by one. True when it hits zero now or already was
/// zero.
#[inline]
pub fn decrement(timer: &mut u16) -> bool {
    if *timer > 0 {
        *timer -= 1;
        *timer == 0
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrement() {
        let mut timer = 2;
        assert!(!decrement(&mut timer));
        assert!(decrement(&mut timer));
        assert_eq!(timer, 0);
        // Already expired stays expired
        assert!(decrement(&mut timer));
        assert_eq!(timer, 0);
    }

    #[test]
    fn test_rules_default() {
        let rules = GameRules::default();
        assert_eq!(rules.stars_to_win, 10);
        assert_eq!(rules.timer_seconds, 0);
        assert_eq!(GameState::default(), GameState::PreGameRoom);
    }
}

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

//! Session configuration
//!
//! Everything here must be identical on every peer of a session: it feeds
//! the simulation directly (seed, rules, solver constants) or shapes the
//! frame layout (player slots).

use crate::assets::AssetId;
use crate::fixed_point::Fixed;
use crate::game::components::GameRules;
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};

/// Penetration solver constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Correction passes per body per substep
    pub iterations: u32,
    /// Fraction of the remaining penetration removed per pass
    pub correction_rate: Fixed,
    /// Residual depth that needs no further correction
    pub penetration: Fixed,
    /// Residual depth against a moving solid that flags a crush
    pub crush_penetration: Fixed,
    /// Per-axis speed clamp, units per second
    pub max_speed: Fixed,
    /// Longest distance a body moves between two solver runs
    pub max_step: Fixed,
    /// Units per second squared, negative is down
    pub gravity: Fixed,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 4,
            correction_rate: Fixed::HALF,
            penetration: Fixed::from_ratio(1, 100),
            crush_penetration: Fixed::from_ratio(1, 10),
            max_speed: Fixed::from_int(20),
            max_step: Fixed::from_ratio(1, 4),
            gravity: Fixed::from_int(-30),
        }
    }
}

/// Simulation session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ticks per simulated second
    pub tick_rate: u32,
    /// Player slots in the frame
    pub max_players: u8,
    /// Players in the roster (slots `0..players`)
    pub players: u8,
    /// Ticks a corrected input may arrive late
    pub max_rollback: u32,
    /// Ticks past the simulated tick an input may arrive early
    pub max_input_lead: u32,
    /// Worker threads for parallel systems; 0 lets rayon decide
    pub worker_threads: usize,
    /// Storage slots per parallel chunk
    pub parallel_chunk: usize,
    pub seed: u64,
    /// Start directly in the playing state
    pub skip_pregame: bool,
    pub stage: AssetId,
    pub big_star_prototype: AssetId,
    pub player_prototype: AssetId,
    pub rules: GameRules,
    pub solver: SolverConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_players: 10,
            players: 1,
            max_rollback: 8,
            max_input_lead: 256,
            worker_threads: 0,
            parallel_chunk: 64,
            seed: 0x5eed,
            skip_pregame: false,
            stage: AssetId::NONE,
            big_star_prototype: AssetId::NONE,
            player_prototype: AssetId::NONE,
            rules: GameRules::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl SimConfig {
    /// Fixed timestep in seconds
    pub fn delta_time(&self) -> Result<Fixed> {
        Fixed::ONE.div_int(i64::from(self.tick_rate))
    }

    /// Rejects settings no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_rate == 0 {
            return Err(SimError::InvalidConfig("tick_rate must be positive".into()));
        }
        if self.players > self.max_players {
            return Err(SimError::InvalidConfig(format!(
                "{} players exceed {} slots",
                self.players, self.max_players
            )));
        }
        if self.max_input_lead == 0 {
            return Err(SimError::InvalidConfig("max_input_lead must be positive".into()));
        }
        if self.solver.max_step <= Fixed::ZERO {
            return Err(SimError::InvalidConfig("solver.max_step must be positive".into()));
        }
        Ok(())
    }

    /// Snapshots kept for rollback: the frame before the oldest correctable
    /// tick plus every tick after it.
    #[inline]
    pub fn ring_capacity(&self) -> usize {
        self.max_rollback as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.max_players, 10);
        assert_eq!(config.ring_capacity(), 9);
        assert_eq!(config.max_input_lead, 256);
        assert_eq!(config.solver.iterations, 4);
        assert_eq!(config.solver.correction_rate, Fixed::HALF);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delta_time() {
        let config = SimConfig::default();
        assert_eq!(config.delta_time().unwrap(), Fixed::from_bits(65536 / 60));
        let broken = SimConfig {
            tick_rate: 0,
            ..SimConfig::default()
        };
        assert_eq!(broken.delta_time(), Err(SimError::DivideByZero));
        assert!(matches!(broken.validate(), Err(SimError::InvalidConfig(_))));

        let crowded = SimConfig {
            players: 11,
            ..SimConfig::default()
        };
        assert!(crowded.validate().is_err());

        let blind = SimConfig {
            max_input_lead: 0,
            ..SimConfig::default()
        };
        assert!(matches!(blind.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_roundtrip() {
        let base = SimConfig {
            seed: 42,
            players: 4,
            ..SimConfig::default()
        };
        let bytes = bincode::serialize(&base).unwrap();
        let back: SimConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, base);
    }
}

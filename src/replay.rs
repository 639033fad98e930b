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

//! Input replays
//!
//! A replay is the session configuration plus every confirmed input batch.
//! Since the simulation is deterministic, feeding the batches back into a
//! fresh session with the same systems and assets reproduces every frame
//! and every event.
//!
//! File layout: `b"ASRP"`, format version (u32 LE), bitcode body.

use crate::config::SimConfig;
use crate::input_sync::TickInput;
use crate::session::Simulator;
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};

const MAGIC: [u8; 4] = *b"ASRP";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayHeader {
    /// Crate version that recorded the replay
    pub engine_version: String,
    /// Game content version chosen by the embedder
    pub content_version: u32,
    /// Tick of the initial frame
    pub start_tick: u64,
    pub config: SimConfig,
    /// Player slots in the roster
    pub roster: Vec<u8>,
}

/// Confirmed inputs of every roster player for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayBatch {
    pub tick: u64,
    pub inputs: Vec<TickInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFile {
    pub header: ReplayHeader,
    pub batches: Vec<ReplayBatch>,
}

impl ReplayFile {
    pub fn new(config: SimConfig, content_version: u32) -> Self {
        Self {
            header: ReplayHeader {
                engine_version: crate::VERSION.to_string(),
                content_version,
                start_tick: 0,
                roster: (0..config.players).collect(),
                config,
            },
            batches: Vec::new(),
        }
    }

    /// Last recorded tick
    pub fn end_tick(&self) -> u64 {
        self.batches
            .last()
            .map_or(self.header.start_tick, |b| b.tick)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bitcode::serialize(self)
            .map_err(|e| SimError::MalformedSnapshot(format!("replay encode: {e}")))?;
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || bytes[..4] != MAGIC {
            return Err(SimError::MalformedSnapshot("not a replay file".into()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(SimError::MalformedSnapshot(format!(
                "replay format {version}, expected {FORMAT_VERSION}"
            )));
        }
        bitcode::deserialize(&bytes[8..])
            .map_err(|e| SimError::MalformedSnapshot(format!("replay decode: {e}")))
    }
}

/// Appends confirmed batches as the session confirms them
#[derive(Debug, Clone)]
pub(crate) struct ReplayRecorder {
    file: ReplayFile,
}

impl ReplayRecorder {
    pub(crate) fn new(file: ReplayFile) -> Self {
        Self { file }
    }

    pub(crate) fn recorded_through(&self) -> u64 {
        self.file.end_tick()
    }

    pub(crate) fn push(&mut self, tick: u64, inputs: Vec<TickInput>) {
        self.file.batches.push(ReplayBatch { tick, inputs });
    }

    pub(crate) fn file(&self) -> &ReplayFile {
        &self.file
    }

    pub(crate) fn into_file(self) -> ReplayFile {
        self.file
    }
}

/// Re-runs a replay on a session built by `build` from the recorded
/// configuration. Returns the session positioned at the last tick.
pub fn play<F>(file: &ReplayFile, build: F) -> Result<Simulator>
where
    F: FnOnce(SimConfig) -> Result<Simulator>,
{
    if file.header.engine_version != crate::VERSION {
        log::warn!(
            "replay recorded with {}, playing on {}",
            file.header.engine_version,
            crate::VERSION
        );
    }
    let mut sim = build(file.header.config.clone())?;
    if sim.tick() != file.header.start_tick {
        return Err(SimError::MalformedSnapshot(format!(
            "replay starts at tick {}, session at {}",
            file.header.start_tick,
            sim.tick()
        )));
    }
    for batch in &file.batches {
        if batch.tick != sim.tick() + 1 {
            return Err(SimError::MalformedSnapshot(format!(
                "replay batch for tick {} after tick {}",
                batch.tick,
                sim.tick()
            )));
        }
        for (player, input) in batch.inputs.iter().enumerate() {
            sim.add_input(player as u8, batch.tick, input.clone())?;
        }
        sim.advance()?;
    }
    log::info!("replay finished at tick {}", sim.tick());
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::input_sync::PlayerInput;

    #[test]
    fn test_file_roundtrip_and_rejects_garbage() {
        let mut file = ReplayFile::new(SimConfig { players: 2, ..SimConfig::default() }, 3);
        file.batches.push(ReplayBatch {
            tick: 1,
            inputs: vec![
                TickInput::new(PlayerInput::new(PlayerInput::JUMP)),
                TickInput::default().with_command(Command::ToggleReady),
            ],
        });
        let bytes = file.to_bytes().unwrap();
        let back = ReplayFile::from_bytes(&bytes).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.header.roster, vec![0, 1]);
        assert_eq!(back.end_tick(), 1);

        assert!(ReplayFile::from_bytes(b"nope").is_err());
        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(matches!(
            ReplayFile::from_bytes(&wrong_version),
            Err(SimError::MalformedSnapshot(_))
        ));
        assert!(ReplayFile::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}

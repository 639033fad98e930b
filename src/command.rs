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

//! Deterministic command channel
//!
//! Commands are player-submitted instructions applied exactly once, on every
//! peer, in the tick they target.
//!
//! ## Wire format (little-endian)
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────────┐
//! │ type_id: u16 │ version: u16 │ len: u32     │ payload (bitcode)│
//! └──────────────┴──────────────┴──────────────┴──────────────────┘
//! ```
//!
//! Older payload versions are upgraded on decode. Unknown type ids, unknown
//! versions and bad lengths fail with [`SimError::MalformedCommand`]; the
//! ingestion path drops just that command.
//!
//! ## Application order
//!
//! Within a tick: ascending `(type_id, player, submission index)`.

use crate::frame::Frame;
use crate::session::SimContext;
use crate::{Result, SimError};
use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const HEADER_LEN: usize = 8;

/// Stable command discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandType(pub u16);

impl CommandType {
    pub const CHANGE_PLAYER_DATA: Self = Self(1);
    pub const START_TYPING: Self = Self(2);
    pub const SEND_CHAT_MESSAGE: Self = Self(3);
    pub const TOGGLE_READY: Self = Self(4);
}

/// Lobby-time player settings change. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ChangePlayerData {
    pub character: Option<u8>,
    pub skin: Option<u8>,
    pub team: Option<u8>,
    pub spectating: Option<bool>,
}

/// v1 payload: before teams and spectating
#[derive(Debug, Clone, Encode, Decode)]
struct ChangePlayerDataV1 {
    character: Option<u8>,
    skin: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ChatMessage {
    pub text: String,
}

/// Typed player command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum Command {
    ChangePlayerData(ChangePlayerData),
    StartTyping,
    SendChatMessage(ChatMessage),
    ToggleReady,
}

impl Command {
    pub const fn command_type(&self) -> CommandType {
        match self {
            Self::ChangePlayerData(_) => CommandType::CHANGE_PLAYER_DATA,
            Self::StartTyping => CommandType::START_TYPING,
            Self::SendChatMessage(_) => CommandType::SEND_CHAT_MESSAGE,
            Self::ToggleReady => CommandType::TOGGLE_READY,
        }
    }

    /// Current payload version for this command type
    pub const fn version(&self) -> u16 {
        match self {
            Self::ChangePlayerData(_) => 2,
            _ => 1,
        }
    }

    /// Envelope encoding: header + bitcode payload.
    pub fn encode(&self) -> Vec<u8> {
        let payload = match self {
            Self::ChangePlayerData(data) => bitcode::encode(data),
            Self::SendChatMessage(msg) => bitcode::encode(msg),
            Self::StartTyping | Self::ToggleReady => Vec::new(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&self.command_type().0.to_le_bytes());
        out.extend_from_slice(&self.version().to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decodes one envelope from the front of `input`, advancing it.
    pub fn decode(input: &mut &[u8]) -> Result<Self> {
        if input.len() < HEADER_LEN {
            return Err(SimError::MalformedCommand(format!(
                "{} header bytes, need {HEADER_LEN}",
                input.len()
            )));
        }
        let type_id = u16::from_le_bytes([input[0], input[1]]);
        let version = u16::from_le_bytes([input[2], input[3]]);
        let len = u32::from_le_bytes([input[4], input[5], input[6], input[7]]) as usize;
        let body = &input[HEADER_LEN..];
        if body.len() < len {
            return Err(SimError::MalformedCommand(format!(
                "payload length {len} exceeds {} remaining",
                body.len()
            )));
        }
        let (payload, rest) = body.split_at(len);
        let command = Self::decode_payload(CommandType(type_id), version, payload)?;
        *input = rest;
        Ok(command)
    }

    fn decode_payload(kind: CommandType, version: u16, payload: &[u8]) -> Result<Self> {
        let bad = |e: bitcode::Error| SimError::MalformedCommand(format!("{kind:?} v{version}: {e}"));
        match (kind, version) {
            (CommandType::CHANGE_PLAYER_DATA, 1) => {
                let v1: ChangePlayerDataV1 = bitcode::decode(payload).map_err(bad)?;
                Ok(Self::ChangePlayerData(ChangePlayerData {
                    character: v1.character,
                    skin: v1.skin,
                    ..ChangePlayerData::default()
                }))
            }
            (CommandType::CHANGE_PLAYER_DATA, 2) => {
                Ok(Self::ChangePlayerData(bitcode::decode(payload).map_err(bad)?))
            }
            (CommandType::SEND_CHAT_MESSAGE, 1) => {
                Ok(Self::SendChatMessage(bitcode::decode(payload).map_err(bad)?))
            }
            (CommandType::START_TYPING, 1) if payload.is_empty() => Ok(Self::StartTyping),
            (CommandType::TOGGLE_READY, 1) if payload.is_empty() => Ok(Self::ToggleReady),
            _ => Err(SimError::MalformedCommand(format!(
                "unknown command {kind:?} v{version} ({} bytes)",
                payload.len()
            ))),
        }
    }
}

/// Encodes a batch of commands back to back.
pub fn encode_batch(commands: &[Command]) -> Vec<u8> {
    commands.iter().flat_map(Command::encode).collect()
}

/// Decodes a batch, dropping malformed commands.
///
/// A bad payload is skipped using its length prefix; a bad header ends the
/// batch, since nothing after it can be framed.
pub fn decode_batch(mut input: &[u8]) -> Vec<Command> {
    let mut commands = Vec::new();
    while !input.is_empty() {
        let before = input;
        match Command::decode(&mut input) {
            Ok(command) => commands.push(command),
            Err(err) => {
                log::warn!("dropping command: {err}");
                let skip = before
                    .get(4..HEADER_LEN)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize + HEADER_LEN);
                match skip {
                    Some(n) if n <= before.len() => input = &before[n..],
                    _ => break,
                }
            }
        }
    }
    commands
}

// ============================================================================
// Command Table
// ============================================================================

/// Handler invoked once per command: `(frame, ctx, player, command)`
pub type CommandHandler =
    Arc<dyn Fn(&mut Frame, &SimContext, u8, &Command) -> Result<()> + Send + Sync>;

/// Registration table: command type -> handler
#[derive(Default, Clone)]
pub struct CommandTable {
    handlers: BTreeMap<CommandType, CommandHandler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `kind`. The last registration wins.
    pub fn register(&mut self, kind: CommandType, handler: CommandHandler) {
        if self.handlers.insert(kind, handler).is_some() {
            log::warn!("command handler for {kind:?} replaced");
        }
    }

    pub fn is_registered(&self, kind: CommandType) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Applies this tick's commands in `(type_id, player, index)` order.
    ///
    /// A command failing on a single entity, or on its own payload, is
    /// logged and dropped and the tick continues. Any other error aborts
    /// the tick.
    pub fn apply(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        let mut queue: Vec<(CommandType, u8, usize, Command)> = Vec::new();
        for player in 0..frame.player_count() as u8 {
            if let Some(input) = frame.tick_input(player) {
                for (index, command) in input.commands.iter().enumerate() {
                    queue.push((command.command_type(), player, index, command.clone()));
                }
            }
        }
        queue.sort_by_key(|(kind, player, index, _)| (*kind, *player, *index));

        for (kind, player, _, command) in queue {
            let Some(handler) = self.handlers.get(&kind) else {
                log::warn!("tick {}: no handler for {kind:?}", frame.number());
                continue;
            };
            if let Err(err) = handler(frame, ctx, player, &command) {
                if !err.is_entity_local() && !matches!(err, SimError::MalformedCommand(_)) {
                    return Err(err);
                }
                log::warn!("tick {}: command {kind:?} from player {player} dropped: {err}", frame.number());
            }
        }
        Ok(())
    }
}

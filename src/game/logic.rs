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

//! Match state machine
//!
//! ```text
//! PreGameRoom ── everyone ready ──► WaitingForPlayers ── all loaded ──►
//! Starting (START_FRAMES) ── GAMEPLAY_FRAME left: gameplay on ──►
//! Playing ── stars_to_win or timer out ──► Ended
//! ```
//!
//! Lobby commands are only honoured in `PreGameRoom`.

use crate::command::{Command, CommandType};
use crate::entity::EntityRef;
use crate::event::SimEvent;
use crate::fixed_point::Fixed;
use crate::frame::Frame;
use crate::game::components::{decrement, GameState, MarioPlayer, PlayerData};
use crate::game::GAMEPLAY_SYSTEMS;
use crate::session::SimContext;
use crate::signal::{Signal, SignalKind};
use crate::system::{Registrar, System};
use crate::{Result, SimError};

/// Countdown length: three seconds plus the intro
pub const START_FRAMES: u16 = 3 * 60 + 78;
/// Countdown value at which gameplay systems switch on
pub const GAMEPLAY_FRAME: u16 = 78;

pub struct GameLogicSystem;

impl System for GameLogicSystem {
    fn name(&self) -> &'static str {
        "GameLogicSystem"
    }

    fn register(&self, reg: &mut Registrar<'_>) -> Result<()> {
        reg.on_command(CommandType::CHANGE_PLAYER_DATA, change_player_data);
        reg.on_command(CommandType::START_TYPING, start_typing);
        reg.on_command(CommandType::SEND_CHAT_MESSAGE, send_chat_message);
        reg.on_command(CommandType::TOGGLE_READY, toggle_ready);
        reg.on_signal(SignalKind::StarCollected, on_star_collected);
        Ok(())
    }

    fn on_init(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        for player in 0..frame.globals.players.len() as u8 {
            if frame.globals.players[player as usize].present {
                add_player(frame, ctx, player)?;
            }
        }
        if ctx.config.skip_pregame {
            prepare_round(frame)?;
            set_state(frame, GameState::Playing);
            start_gameplay(frame, ctx)?;
        }
        Ok(())
    }

    fn update(&self, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        match frame.globals.game_state {
            GameState::PreGameRoom => {
                let (mut everyone_ready, mut anyone_playing) = (true, false);
                for (_, (data,)) in frame.filter::<(PlayerData,)>()? {
                    everyone_ready &= data.spectating || data.ready;
                    anyone_playing |= !data.spectating;
                }
                if everyone_ready && anyone_playing {
                    set_state(frame, GameState::WaitingForPlayers);
                }
            }
            GameState::WaitingForPlayers => {
                let loaded = frame
                    .filter::<(PlayerData,)>()?
                    .all(|(_, (data,))| data.spectating || data.loaded);
                if loaded {
                    prepare_round(frame)?;
                    frame.globals.game_start_frames = START_FRAMES;
                    set_state(frame, GameState::Starting);
                }
            }
            GameState::Starting => {
                if decrement(&mut frame.globals.game_start_frames) {
                    set_state(frame, GameState::Playing);
                } else if frame.globals.game_start_frames == GAMEPLAY_FRAME {
                    start_gameplay(frame, ctx)?;
                }
            }
            GameState::Playing => {
                let globals = &mut frame.globals;
                if globals.rules.timer_seconds > 0 && globals.timer > Fixed::ZERO {
                    globals.timer -= ctx.dt();
                    if globals.timer <= Fixed::ZERO {
                        globals.timer = Fixed::ZERO;
                        let winner = leader(frame)?;
                        end_game(frame, ctx, winner);
                    }
                }
            }
            GameState::Ended => {}
        }
        Ok(())
    }
}

fn set_state(frame: &mut Frame, state: GameState) {
    log::debug!(
        "tick {}: {:?} -> {state:?}",
        frame.number(),
        frame.globals.game_state
    );
    frame.globals.game_state = state;
    frame.emit(SimEvent::GameStateChanged { state });
}

/// Player count and clock for the round about to start.
fn prepare_round(frame: &mut Frame) -> Result<()> {
    let real = frame
        .filter::<(PlayerData,)>()?
        .filter(|(_, (data,))| !data.spectating)
        .count();
    let globals = &mut frame.globals;
    globals.real_players = real as u8;
    globals.timer = Fixed::from_int(i64::from(globals.rules.timer_seconds));
    Ok(())
}

fn start_gameplay(frame: &mut Frame, ctx: &SimContext) -> Result<()> {
    for name in GAMEPLAY_SYSTEMS {
        ctx.set_system_enabled(frame, name, true);
    }
    ctx.raise(frame, Signal::GameStarting)?;
    Ok(())
}

fn end_game(frame: &mut Frame, ctx: &SimContext, winner: Option<u8>) {
    if frame.globals.game_state == GameState::Ended {
        return;
    }
    for name in GAMEPLAY_SYSTEMS {
        ctx.set_system_enabled(frame, name, false);
    }
    frame.globals.winning_player = winner;
    set_state(frame, GameState::Ended);
    frame.emit(SimEvent::GameEnded { winner });
    log::info!("tick {}: game over, winner {winner:?}", frame.number());
}

/// Player with strictly the most stars
fn leader(frame: &Frame) -> Result<Option<u8>> {
    let mut best: Option<(u8, u8)> = None;
    let mut tied = false;
    for (_, (mario,)) in frame.filter::<(MarioPlayer,)>()? {
        match best {
            Some((_, stars)) if mario.stars < stars => {}
            Some((_, stars)) if mario.stars == stars => tied = true,
            _ => {
                best = Some((mario.player, mario.stars));
                tied = false;
            }
        }
    }
    Ok(if tied { None } else { best.map(|(player, _)| player) })
}

fn add_player(frame: &mut Frame, ctx: &SimContext, player: u8) -> Result<()> {
    let entity = frame.create();
    frame.add(
        entity,
        PlayerData {
            player,
            loaded: true,
            spectating: frame.globals.players[player as usize].spectating,
            ..PlayerData::default()
        },
    )?;
    let datas = frame.globals.player_datas;
    frame.heap_mut().dict_mut(datas)?.insert(player, entity);
    frame.emit(SimEvent::PlayerAdded { player });
    ctx.raise(frame, Signal::PlayerAdded { player })?;
    Ok(())
}

/// PlayerData entity of `player`
pub fn player_data(frame: &Frame, player: u8) -> Result<EntityRef> {
    frame
        .heap()
        .dict(frame.globals.player_datas)?
        .get(&player)
        .copied()
        .ok_or_else(|| SimError::MalformedCommand(format!("no player data for player {player}")))
}

fn in_lobby(frame: &Frame) -> bool {
    frame.globals.game_state == GameState::PreGameRoom
}

fn change_player_data(
    frame: &mut Frame,
    _ctx: &SimContext,
    player: u8,
    command: &Command,
) -> Result<()> {
    let Command::ChangePlayerData(change) = command else {
        return Ok(());
    };
    if !in_lobby(frame) {
        return Ok(());
    }
    let entity = player_data(frame, player)?;
    let data = frame.get_mut::<PlayerData>(entity)?;
    if let Some(character) = change.character {
        data.character = character;
    }
    if let Some(skin) = change.skin {
        data.skin = skin;
    }
    if let Some(team) = change.team {
        data.team = team;
    }
    if let Some(spectating) = change.spectating {
        data.spectating = spectating;
        if let Some(meta) = frame.globals.players.get_mut(player as usize) {
            meta.spectating = spectating;
        }
    }
    frame.emit(SimEvent::PlayerDataChanged { player });
    Ok(())
}

fn start_typing(frame: &mut Frame, _ctx: &SimContext, player: u8, _command: &Command) -> Result<()> {
    if in_lobby(frame) {
        frame.emit(SimEvent::PlayerStartedTyping { player });
    }
    Ok(())
}

fn send_chat_message(
    frame: &mut Frame,
    _ctx: &SimContext,
    player: u8,
    command: &Command,
) -> Result<()> {
    if let Command::SendChatMessage(message) = command {
        if in_lobby(frame) {
            frame.emit(SimEvent::PlayerSentChatMessage {
                player,
                text: message.text.clone(),
            });
        }
    }
    Ok(())
}

fn toggle_ready(frame: &mut Frame, _ctx: &SimContext, player: u8, _command: &Command) -> Result<()> {
    if !in_lobby(frame) {
        return Ok(());
    }
    let entity = player_data(frame, player)?;
    let data = frame.get_mut::<PlayerData>(entity)?;
    data.ready = !data.ready;
    let ready = data.ready;
    frame.emit(SimEvent::PlayerReadyChanged { player, ready });
    Ok(())
}

fn on_star_collected(frame: &mut Frame, ctx: &SimContext, signal: &mut Signal) -> Result<()> {
    let Signal::StarCollected { player, mario, .. } = *signal else {
        return Ok(());
    };
    let needed = frame.globals.rules.stars_to_win;
    if needed > 0 && frame.get::<MarioPlayer>(mario)?.stars >= needed {
        end_game(frame, ctx, Some(player));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ChangePlayerData, ChatMessage};
    use crate::config::SimConfig;
    use crate::game;
    use crate::input_sync::TickInput;
    use crate::session::Simulator;

    fn lobby(players: u8) -> Simulator {
        let config = SimConfig {
            players,
            ..game::demo_config()
        };
        game::simulator(config, game::demo_assets()).unwrap()
    }

    fn idle(sim: &mut Simulator, players: u8, tick: u64) {
        for p in 0..players {
            sim.add_input(p, tick, TickInput::default()).unwrap();
        }
    }

    #[test]
    fn test_lobby_commands() {
        let mut sim = lobby(2);
        assert_eq!(
            sim.events().at(0),
            &[
                SimEvent::PlayerAdded { player: 0 },
                SimEvent::PlayerAdded { player: 1 },
            ][..]
        );

        sim.add_input(
            0,
            1,
            TickInput::default()
                .with_command(Command::ChangePlayerData(ChangePlayerData {
                    character: Some(1),
                    team: Some(2),
                    ..ChangePlayerData::default()
                }))
                .with_command(Command::SendChatMessage(ChatMessage {
                    text: "gl".into(),
                })),
        )
        .unwrap();
        sim.add_input(1, 1, TickInput::default().with_command(Command::ToggleReady))
            .unwrap();
        sim.advance().unwrap();

        let events = sim.events().at(1);
        assert!(events.contains(&SimEvent::PlayerDataChanged { player: 0 }));
        assert!(events.contains(&SimEvent::PlayerSentChatMessage {
            player: 0,
            text: "gl".into()
        }));
        assert!(events.contains(&SimEvent::PlayerReadyChanged {
            player: 1,
            ready: true
        }));

        let frame = sim.frame();
        let data = frame.get::<PlayerData>(player_data(frame, 0).unwrap()).unwrap();
        assert_eq!((data.character, data.skin, data.team), (1, 0, 2));
        // Player 0 is not ready yet
        assert_eq!(frame.globals.game_state, GameState::PreGameRoom);
    }

    #[test]
    fn test_state_machine_timeline() {
        let mut sim = lobby(2);
        for p in 0..2 {
            sim.add_input(p, 1, TickInput::default().with_command(Command::ToggleReady))
                .unwrap();
        }
        sim.advance().unwrap();
        assert_eq!(sim.frame().globals.game_state, GameState::WaitingForPlayers);

        let movement = sim.system_id(game::PLAYER_MOVEMENT).unwrap();
        for tick in 2..=260 {
            idle(&mut sim, 2, tick);
            sim.advance().unwrap();
            let frame = sim.frame();
            match tick {
                2 => {
                    assert_eq!(frame.globals.game_state, GameState::Starting);
                    assert_eq!(frame.globals.game_start_frames, START_FRAMES);
                }
                181 => assert!(!frame.is_system_enabled(movement)),
                182 => assert!(frame.is_system_enabled(movement)),
                259 => assert_eq!(frame.globals.game_state, GameState::Starting),
                260 => assert_eq!(frame.globals.game_state, GameState::Playing),
                _ => {}
            }
        }

        let states: Vec<GameState> = sim
            .events()
            .iter()
            .filter_map(|(_, e)| match e {
                SimEvent::GameStateChanged { state } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                GameState::WaitingForPlayers,
                GameState::Starting,
                GameState::Playing
            ]
        );
        assert_eq!(sim.frame().globals.real_players, 2);
    }

    #[test]
    fn test_timer_ends_game() {
        let mut rules = game::demo_config().rules;
        rules.timer_seconds = 1;
        let config = SimConfig {
            players: 1,
            skip_pregame: true,
            rules,
            ..game::demo_config()
        };
        let mut sim = game::simulator(config, game::demo_assets()).unwrap();
        assert_eq!(sim.frame().globals.game_state, GameState::Playing);

        // dt truncates to 1092/65536, so 60 ticks leave a sliver of time
        sim.advance_to(60).unwrap();
        assert_eq!(sim.frame().globals.game_state, GameState::Playing);
        sim.advance().unwrap();
        assert_eq!(sim.frame().globals.game_state, GameState::Ended);
        assert_eq!(sim.frame().globals.timer, Fixed::ZERO);
        assert!(sim
            .events()
            .at(61)
            .contains(&SimEvent::GameEnded { winner: Some(0) }));

        let stars = sim.system_id(game::BIG_STAR).unwrap();
        assert!(!sim.frame().is_system_enabled(stars));
    }
}

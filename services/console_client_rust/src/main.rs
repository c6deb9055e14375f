//! Console Client Service - Headless trivia rooms client
//!
//! Connects to the rooms gateway, joins (or creates) a room, and plays
//! a full game from the terminal: logs lobby changes, the pre-game
//! countdown, each question, and the final ranking. Useful for
//! smoke-testing a gateway without the mobile app.
//!
//! Environment:
//! - TRIVIA_SERVER_ADDR        gateway host:port (default 127.0.0.1:3007)
//! - TRIVIA_ROOM_ID            room to join (required)
//! - TRIVIA_PLAYER_NAME        display name (required)
//! - TRIVIA_TRIVIA_ID          when set, create the room and start the
//!                             game as admin once a player has joined
//! - TRIVIA_AUTO_ANSWER_INDEX  option index to auto-answer (default 0)

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;
use log::{info, warn};

use trivia_client_core::config::ClientConfig;
use trivia_client_core::session::Session;
use trivia_client_core::types::{ConnectionState, GamePhase};

const POLL_PERIOD: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = ClientConfig::from_env();
    let room_id = env::var("TRIVIA_ROOM_ID").context("TRIVIA_ROOM_ID is required")?;
    let name = env::var("TRIVIA_PLAYER_NAME").context("TRIVIA_PLAYER_NAME is required")?;
    let trivia_id = env::var("TRIVIA_TRIVIA_ID").ok();
    let auto_answer_index: usize = env::var("TRIVIA_AUTO_ANSWER_INDEX")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    info!("Starting Console Client Service...");
    info!("Gateway: {}", config.server_addr);

    let session = Session::from_config(&config);
    session.connect().await.context("connecting to gateway")?;

    if let Some(trivia_id) = &trivia_id {
        info!("Creating room {} for trivia {}", room_id, trivia_id);
        session.create_room(&room_id, trivia_id).await?;
    }
    info!("Joining room {} as {}", room_id, name);
    session.join_room(&room_id, &name).await?;

    run_game_loop(&session, &room_id, trivia_id.as_deref(), auto_answer_index).await?;

    session.shutdown();
    Ok(())
}

/// Poll the reconciled snapshot and log every visible transition until
/// the game finishes or the link drops.
async fn run_game_loop(
    session: &Session,
    room_id: &str,
    trivia_id: Option<&str>,
    auto_answer_index: usize,
) -> Result<()> {
    let mut last_phase = None;
    let mut last_player_count = 0usize;
    let mut last_round = 0u32;
    let mut last_countdown = 0u32;
    let mut answered_round = 0u32;
    let mut game_start_requested = false;

    loop {
        let snapshot = session.snapshot();

        if let Some(message) = session.take_last_error() {
            warn!("Server error: {}", message);
        }

        if last_phase != Some(snapshot.phase) {
            info!("Phase: {:?}", snapshot.phase);
            last_phase = Some(snapshot.phase);
        }

        let player_count = snapshot.room.as_ref().map_or(0, |r| r.players.len());
        if player_count != last_player_count {
            if let Some(room) = &snapshot.room {
                let names: Vec<&str> = room.players.iter().map(|p| p.name.as_str()).collect();
                info!("Players ({}): {}", names.len(), names.join(", "));
            }
            last_player_count = player_count;
        }

        match snapshot.phase {
            GamePhase::Waiting => {
                // Admin flow: kick the game off once someone is here.
                if let Some(trivia_id) = trivia_id {
                    if !game_start_requested && player_count > 0 {
                        info!("Starting game in room {}", room_id);
                        session.start_game(room_id, trivia_id).await?;
                        game_start_requested = true;
                    }
                }
            }
            GamePhase::Countdown | GamePhase::Ending => {
                if snapshot.countdown_value != last_countdown {
                    info!("Countdown: {}", snapshot.countdown_value);
                    last_countdown = snapshot.countdown_value;
                }
            }
            GamePhase::Playing => {
                if let Some(question) = &snapshot.question {
                    if question.round != last_round {
                        info!(
                            "Round {}/{}: {} {:?}",
                            question.round,
                            snapshot.total_questions,
                            question.text,
                            question.options
                        );
                        last_round = question.round;
                    }
                    if answered_round != question.round && !snapshot.answer.has_answered() {
                        if let Some(option) = question.options.get(auto_answer_index) {
                            if session.submit_answer(option).await? {
                                info!("Answered: {}", option);
                                answered_round = question.round;
                            }
                        }
                    }
                }
            }
            GamePhase::Finished => {
                info!("Game over. Final ranking:");
                for (position, player) in snapshot.ranking.iter().enumerate() {
                    info!("  {}. {} - {} pts", position + 1, player.name, player.score);
                }
                return Ok(());
            }
        }

        if snapshot.connection == ConnectionState::Disconnected {
            warn!("Link lost before the game finished");
            return Ok(());
        }

        tokio::time::sleep(POLL_PERIOD).await;
    }
}

//! Wire protocol for the rooms gateway
//!
//! Frames are newline-delimited JSON envelopes `{"event": ..., "data": ...}`.
//! This module defines:
//! - Envelope: the frame wrapper with an untyped JSON payload
//! - ClientCommand: outbound game actions
//! - Typed inbound payload structs parsed by the reconciler
//! - The wire-name -> relay-name translation applied by the connector

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Player;

/// Relay event names, as seen by application listeners.
pub mod events {
    /// Synthetic lifecycle events published by the connector.
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const CONNECT_ERROR: &str = "connect_error";

    /// Server-pushed game events.
    pub const ROOM_STATE_UPDATE: &str = "roomStateUpdate";
    pub const PLAYER_JOINED: &str = "playerJoined";
    pub const PLAYER_LEFT: &str = "playerLeft";
    pub const COUNTDOWN: &str = "countdown";
    pub const NEW_ROUND: &str = "newRound";
    pub const GAME_STARTED: &str = "gameStarted";
    pub const ANSWER_SUBMITTED: &str = "answerSubmitted";
    pub const RANKING_UPDATED: &str = "rankingUpdated";
    pub const GAME_ENDING: &str = "gameEnding";
    pub const GAME_ENDED: &str = "gameEnded";
    pub const SERVER_ERROR: &str = "error";
}

/// Message envelope format used on the wire, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Application-level event name.
    pub event: String,
    /// Event payload as JSON. Absent payloads default to null.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Outbound game actions, each emitted as one envelope.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    JoinRoom {
        room_id: String,
        name: String,
    },
    SubmitAnswer {
        room_id: String,
        player_id: String,
        answer: String,
    },
    StartGame {
        room_id: String,
        trivia_id: String,
    },
    CreateRoom {
        room_id: String,
        trivia_id: String,
    },
    GetRoomState {
        room_id: String,
    },
}

impl ClientCommand {
    pub fn event(&self) -> &'static str {
        match self {
            ClientCommand::JoinRoom { .. } => "joinRoom",
            ClientCommand::SubmitAnswer { .. } => "submitAnswer",
            ClientCommand::StartGame { .. } => "startGame",
            ClientCommand::CreateRoom { .. } => "createRoom",
            ClientCommand::GetRoomState { .. } => "getRoomState",
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let event = self.event();
        let data = match self {
            ClientCommand::JoinRoom { room_id, name } => {
                serde_json::json!({ "roomId": room_id, "name": name })
            }
            ClientCommand::SubmitAnswer {
                room_id,
                player_id,
                answer,
            } => serde_json::json!({
                "roomId": room_id,
                "playerId": player_id,
                "answer": answer,
            }),
            ClientCommand::StartGame { room_id, trivia_id }
            | ClientCommand::CreateRoom { room_id, trivia_id } => {
                serde_json::json!({ "roomId": room_id, "triviaId": trivia_id })
            }
            ClientCommand::GetRoomState { room_id } => {
                serde_json::json!({ "roomId": room_id })
            }
        };
        Envelope::new(event, data)
    }
}

/// `newRound` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoundPayload {
    #[serde(default)]
    pub round: u32,
    #[serde(rename = "question", default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub timer_seconds: u32,
    #[serde(default)]
    pub total_questions: Option<u32>,
}

/// `gameStarted` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedPayload {
    #[serde(default)]
    pub total_questions: u32,
}

/// `answerSubmitted` payload: the server's echo, authoritative on
/// correctness.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEchoPayload {
    pub player_id: String,
    #[serde(default)]
    pub correct: bool,
}

/// `gameEnding` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndingPayload {
    #[serde(default)]
    pub countdown: Option<u32>,
}

/// `gameEnded` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedPayload {
    #[serde(default)]
    pub ranking: Vec<Player>,
}

/// `error` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorPayload {
    #[serde(default)]
    pub message: String,
}

/// Map a raw wire event to the relay event name and payload the
/// application sees. `roomState` is re-published as `roomStateUpdate`;
/// `playerJoined` / `playerLeft` are unwrapped to the inner player
/// object when the server nests it under a `player` key.
pub(crate) fn translate_inbound(envelope: Envelope) -> (String, Value) {
    let Envelope { event, data } = envelope;
    match event.as_str() {
        "roomState" => (events::ROOM_STATE_UPDATE.to_string(), data),
        events::PLAYER_JOINED | events::PLAYER_LEFT => {
            let unwrapped = match data {
                Value::Object(mut map) if map.contains_key("player") => {
                    map.remove("player").unwrap_or(Value::Null)
                }
                other => other,
            };
            (event, unwrapped)
        }
        _ => (event, data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_answer_envelope_shape() {
        let envelope = ClientCommand::SubmitAnswer {
            room_id: "R1".to_string(),
            player_id: "p1".to_string(),
            answer: "b".to_string(),
        }
        .into_envelope();

        assert_eq!(envelope.event, "submitAnswer");
        assert_eq!(envelope.data["roomId"], "R1");
        assert_eq!(envelope.data["playerId"], "p1");
        assert_eq!(envelope.data["answer"], "b");
    }

    #[test]
    fn test_envelope_roundtrip_line() {
        let envelope = ClientCommand::JoinRoom {
            room_id: "R1".to_string(),
            name: "ada".to_string(),
        }
        .into_envelope();
        let line = serde_json::to_string(&envelope).expect("serializable");
        let back: Envelope = serde_json::from_str(&line).expect("parseable");
        assert_eq!(back.event, "joinRoom");
        assert_eq!(back.data["name"], "ada");
    }

    #[test]
    fn test_room_state_is_renamed_for_the_relay() {
        let envelope = Envelope::new("roomState", serde_json::json!({"id": "R1"}));
        let (event, data) = translate_inbound(envelope);
        assert_eq!(event, events::ROOM_STATE_UPDATE);
        assert_eq!(data["id"], "R1");
    }

    #[test]
    fn test_player_joined_is_unwrapped() {
        let envelope = Envelope::new(
            "playerJoined",
            serde_json::json!({"player": {"id": "p1", "name": "ada"}}),
        );
        let (event, data) = translate_inbound(envelope);
        assert_eq!(event, events::PLAYER_JOINED);
        assert_eq!(data["id"], "p1");
    }

    #[test]
    fn test_player_joined_without_wrapper_passes_through() {
        let envelope = Envelope::new("playerJoined", serde_json::json!({"id": "p1"}));
        let (_, data) = translate_inbound(envelope);
        assert_eq!(data["id"], "p1");
    }

    #[test]
    fn test_new_round_payload_defaults() {
        let payload: NewRoundPayload = serde_json::from_value(serde_json::json!({
            "round": 2,
            "question": "Q2",
            "options": ["a", "b"],
            "timerSeconds": 10,
        }))
        .expect("payload should parse");
        assert_eq!(payload.round, 2);
        assert_eq!(payload.timer_seconds, 10);
        assert!(payload.total_questions.is_none());
    }

    #[test]
    fn test_answer_echo_requires_player_id() {
        let result: Result<AnswerEchoPayload, _> =
            serde_json::from_value(serde_json::json!({"correct": true}));
        assert!(result.is_err());
    }
}

//! Shared type definitions for the client session layer
//!
//! This module contains the data model the reconciler maintains:
//! - Player / Question / Room: server-owned entities mirrored locally
//! - GamePhase: the reconciler's top-level mode
//! - ConnectionState: transport link lifecycle
//! - AnswerState: two-stage optimistic answer tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the transport link. Driven solely by connector events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Top-level mode of a game session. Exactly one phase is active at a
/// time; transitions are server-driven except for the local countdown
/// fallbacks (Countdown -> Playing, Ending -> Finished).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Waiting,
    Countdown,
    Playing,
    Ending,
    Finished,
}

/// A player as pushed by the server.
///
/// `id` is unique within a room; duplicate join deliveries are
/// deduplicated client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answered_correct: Option<bool>,
}

/// One trivia question.
///
/// `correct_answer` only becomes meaningful once the local player has
/// answered or the round ended; it must never drive correctness
/// display before the server's `answerSubmitted` echo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
}

/// A server-managed group of players sharing one trivia session.
///
/// Replaced wholesale whenever a full `roomState` snapshot arrives;
/// `playerJoined` / `playerLeft` mutate it incrementally in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    #[serde(default)]
    pub trivia_id: String,
    /// Insertion order = join order.
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub current_question: Option<Question>,
}

impl Room {
    /// Append a player unless the id is already present.
    /// Returns false for duplicates (dropped, list unchanged).
    pub fn add_player(&mut self, player: Player) -> bool {
        if self.players.iter().any(|p| p.id == player.id) {
            return false;
        }
        self.players.push(player);
        true
    }

    /// Remove a player by id. Removing an absent id is a no-op.
    /// Returns true if a player was removed.
    pub fn remove_player(&mut self, id: &str) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != id);
        self.players.len() != before
    }
}

/// The question currently on screen, as delivered by `newRound`.
#[derive(Debug, Clone)]
pub struct ActiveQuestion {
    pub round: u32,
    pub text: String,
    pub options: Vec<String>,
}

/// Two-stage optimistic answer state for the local player.
///
/// Correctness is only representable in `Confirmed`, so the client can
/// never show a verdict before the server echo arrives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AnswerState {
    #[default]
    NotAnswered,
    /// Selection recorded locally and forwarded; awaiting the echo.
    Pending { option: String },
    /// Server-confirmed; the server is authoritative on correctness.
    Confirmed { option: String, correct: bool },
}

impl AnswerState {
    /// True once a selection has been made this round, confirmed or not.
    pub fn has_answered(&self) -> bool {
        !matches!(self, AnswerState::NotAnswered)
    }

    pub fn selected_option(&self) -> Option<&str> {
        match self {
            AnswerState::NotAnswered => None,
            AnswerState::Pending { option } | AnswerState::Confirmed { option, .. } => {
                Some(option)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str) -> Player {
        Player {
            id: id.to_string(),
            name: format!("player-{}", id),
            score: 0,
            is_admin: false,
            answered_at: None,
            answered_correct: None,
        }
    }

    fn empty_room() -> Room {
        Room {
            id: "ROOM1".to_string(),
            trivia_id: "trivia-1".to_string(),
            players: Vec::new(),
            is_active: false,
            round: 0,
            questions: Vec::new(),
            current_question: None,
        }
    }

    #[test]
    fn test_add_player_deduplicates_by_id() {
        let mut room = empty_room();
        assert!(room.add_player(player("a")));
        assert!(room.add_player(player("b")));
        assert!(!room.add_player(player("a")));
        assert_eq!(room.players.len(), 2);
    }

    #[test]
    fn test_remove_absent_player_is_noop() {
        let mut room = empty_room();
        room.add_player(player("a"));
        assert!(!room.remove_player("missing"));
        assert_eq!(room.players.len(), 1);
        assert!(room.remove_player("a"));
        assert!(room.players.is_empty());
    }

    #[test]
    fn test_player_parses_with_missing_optional_fields() {
        let p: Player = serde_json::from_value(serde_json::json!({"id": "p1"}))
            .expect("id alone should be enough");
        assert_eq!(p.id, "p1");
        assert_eq!(p.score, 0);
        assert!(!p.is_admin);
        assert!(p.answered_at.is_none());
    }

    #[test]
    fn test_player_without_id_is_rejected() {
        let result: Result<Player, _> =
            serde_json::from_value(serde_json::json!({"name": "ghost"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_answer_state_progression() {
        let mut answer = AnswerState::default();
        assert!(!answer.has_answered());
        assert!(answer.selected_option().is_none());

        answer = AnswerState::Pending {
            option: "b".to_string(),
        };
        assert!(answer.has_answered());
        assert_eq!(answer.selected_option(), Some("b"));

        answer = AnswerState::Confirmed {
            option: "b".to_string(),
            correct: true,
        };
        assert!(answer.has_answered());
        assert_eq!(answer.selected_option(), Some("b"));
    }
}

//! End-to-end session flows over a scripted in-memory transport:
//! server frames go in, reconciled snapshots and outbound commands
//! come out, with local timers running on paused test time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use trivia_client_core::config::ReconnectConfig;
use trivia_client_core::error::Result;
use trivia_client_core::protocol::Envelope;
use trivia_client_core::relay::EventRelay;
use trivia_client_core::session::Session;
use trivia_client_core::transport::{Connector, Transport};
use trivia_client_core::types::{AnswerState, ConnectionState, GamePhase};

/// In-memory transport scripted by the test: `server` feeds inbound
/// frames, `sent` records everything the client wrote.
struct ScriptedTransport {
    server_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Envelope>>>>,
    sent: Arc<Mutex<Vec<Envelope>>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            server_tx: Arc::new(Mutex::new(None)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.server_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.sent.lock().push(envelope);
        Ok(())
    }

    async fn close(&mut self) {
        *self.server_tx.lock() = None;
    }
}

struct Harness {
    session: Session,
    relay: Arc<EventRelay>,
    server_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Envelope>>>>,
    sent: Arc<Mutex<Vec<Envelope>>>,
}

impl Harness {
    fn new() -> Self {
        let transport = ScriptedTransport::new();
        let server_tx = Arc::clone(&transport.server_tx);
        let sent = Arc::clone(&transport.sent);
        let relay = Arc::new(EventRelay::new());
        let connector = Arc::new(Connector::new(
            Box::new(transport),
            Arc::clone(&relay),
            ReconnectConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                connect_timeout: Duration::from_secs(1),
            },
        ));
        Self {
            session: Session::new(connector, Arc::clone(&relay)),
            relay,
            server_tx,
            sent,
        }
    }

    fn push(&self, event: &str, data: serde_json::Value) {
        let tx = self.server_tx.lock().clone().expect("link open");
        tx.send(Envelope::new(event, data)).expect("push frame");
    }
}

/// Let the I/O task and relay handlers drain without advancing time.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_round_from_lobby_to_confirmed_answer() {
    let h = Harness::new();

    h.session.connect().await.expect("connect");
    assert_eq!(h.session.snapshot().connection, ConnectionState::Connected);

    h.session.join_room("R1", "ada").await.expect("join");
    h.push(
        "roomState",
        json!({
            "id": "R1",
            "triviaId": "T1",
            "players": [
                {"id": "p1", "name": "ada"},
                {"id": "p2", "name": "bob"}
            ],
            "isActive": false
        }),
    );
    settle().await;

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.phase, GamePhase::Waiting);
    assert_eq!(snapshot.local_player_id.as_deref(), Some("p1"));
    assert_eq!(
        snapshot.room.as_ref().map(|r| r.players.len()),
        Some(2)
    );

    // Pre-game countdown: three one-second ticks into Playing.
    h.push("countdown", serde_json::Value::Null);
    settle().await;
    assert_eq!(h.session.snapshot().phase, GamePhase::Countdown);
    assert_eq!(h.session.snapshot().countdown_value, 3);

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(h.session.snapshot().phase, GamePhase::Playing);
    assert_eq!(h.session.snapshot().countdown_value, 0);

    h.push(
        "newRound",
        json!({
            "round": 1,
            "question": "Largest planet?",
            "options": ["Mars", "Jupiter", "Venus"],
            "timerSeconds": 10
        }),
    );
    settle().await;

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.question.as_ref().map(|q| q.round), Some(1));
    assert_eq!(snapshot.time_remaining, 10);
    assert_eq!(snapshot.answer, AnswerState::NotAnswered);

    tokio::time::sleep(Duration::from_millis(4100)).await;
    assert_eq!(h.session.snapshot().time_remaining, 6);

    // First submission goes out with the resolved player id; the
    // second is rejected locally without a frame.
    assert!(h.session.submit_answer("Jupiter").await.expect("submit"));
    assert!(!h.session.submit_answer("Mars").await.expect("resubmit"));
    settle().await;

    {
        let sent = h.sent.lock();
        let answers: Vec<&Envelope> =
            sent.iter().filter(|e| e.event == "submitAnswer").collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].data["playerId"], "p1");
        assert_eq!(answers[0].data["answer"], "Jupiter");
    }
    assert_eq!(
        h.session.snapshot().answer,
        AnswerState::Pending {
            option: "Jupiter".to_string()
        }
    );

    // Another player's echo is ignored; our own confirms.
    h.push("answerSubmitted", json!({"playerId": "p2", "correct": false}));
    settle().await;
    assert!(matches!(
        h.session.snapshot().answer,
        AnswerState::Pending { .. }
    ));

    h.push("answerSubmitted", json!({"playerId": "p1", "correct": true}));
    settle().await;
    assert_eq!(
        h.session.snapshot().answer,
        AnswerState::Confirmed {
            option: "Jupiter".to_string(),
            correct: true
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_question_timer_expiry_blocks_submission() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    h.session.join_room("R1", "ada").await.expect("join");
    h.push(
        "roomState",
        json!({"id": "R1", "players": [{"id": "p1", "name": "ada"}]}),
    );
    h.push("countdown", serde_json::Value::Null);
    settle().await;
    tokio::time::sleep(Duration::from_millis(3100)).await;

    h.push(
        "newRound",
        json!({"round": 1, "question": "Q1", "options": ["a", "b"], "timerSeconds": 2}),
    );
    settle().await;

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(h.session.snapshot().time_remaining, 0);

    let sent_before = h.sent.lock().len();
    assert!(!h.session.submit_answer("a").await.expect("late submit"));
    settle().await;
    assert_eq!(h.sent.lock().len(), sent_before);
}

#[tokio::test(start_paused = true)]
async fn test_stale_echo_does_not_block_the_next_round() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    h.session.join_room("R1", "ada").await.expect("join");
    h.push(
        "roomState",
        json!({"id": "R1", "players": [{"id": "p1", "name": "ada"}]}),
    );
    h.push("countdown", serde_json::Value::Null);
    settle().await;
    tokio::time::sleep(Duration::from_millis(3100)).await;

    h.push(
        "newRound",
        json!({"round": 1, "question": "Q1", "options": ["a", "b"], "timerSeconds": 10}),
    );
    settle().await;
    assert!(h.session.submit_answer("a").await.expect("round 1 submit"));

    // The round-1 echo straggles in after round 2 already reset the
    // answer state; it must not mark round 2 as answered.
    h.push(
        "newRound",
        json!({"round": 2, "question": "Q2", "options": ["a", "b"], "timerSeconds": 10}),
    );
    settle().await;
    h.push("answerSubmitted", json!({"playerId": "p1", "correct": true}));
    settle().await;

    assert_eq!(h.session.snapshot().answer, AnswerState::NotAnswered);
    assert!(h.session.submit_answer("b").await.expect("round 2 submit"));
}

#[tokio::test(start_paused = true)]
async fn test_game_ending_freezes_the_question_clock() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    h.session.join_room("R1", "ada").await.expect("join");
    h.push(
        "roomState",
        json!({"id": "R1", "players": [{"id": "p1", "name": "ada"}]}),
    );
    h.push("countdown", serde_json::Value::Null);
    settle().await;
    tokio::time::sleep(Duration::from_millis(3100)).await;

    h.push(
        "newRound",
        json!({"round": 1, "question": "Q1", "options": ["a", "b"], "timerSeconds": 10}),
    );
    settle().await;

    h.push("gameEnding", json!({"countdown": 3}));
    settle().await;
    let frozen = h.session.snapshot().time_remaining;

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.time_remaining, frozen);
    assert_eq!(snapshot.countdown_value, 1);
}

#[tokio::test(start_paused = true)]
async fn test_game_ending_countdown_then_final_ranking() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    h.session.join_room("R1", "ada").await.expect("join");
    h.push(
        "roomState",
        json!({"id": "R1", "players": [{"id": "p1", "name": "ada"}], "isActive": true}),
    );
    settle().await;
    // Active room while still waiting snaps straight to Playing.
    assert_eq!(h.session.snapshot().phase, GamePhase::Playing);

    h.push("gameEnding", json!({"countdown": 2}));
    settle().await;
    assert_eq!(h.session.snapshot().phase, GamePhase::Ending);
    assert_eq!(h.session.snapshot().countdown_value, 2);

    // gameEnded lands before the local countdown finishes and wins;
    // the ranking order is the server's, untouched.
    h.push(
        "gameEnded",
        json!({"ranking": [
            {"id": "p2", "name": "bob", "score": 9},
            {"id": "p1", "name": "ada", "score": 4}
        ]}),
    );
    settle().await;

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.phase, GamePhase::Finished);
    let ids: Vec<&str> = snapshot.ranking.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p2", "p1"]);

    // Stale ending ticks must not drag the phase anywhere else.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.session.snapshot().phase, GamePhase::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_dropped_not_fatal() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    h.session.join_room("R1", "ada").await.expect("join");

    // A room snapshot missing its required id is dropped.
    h.push("roomState", json!({"players": []}));
    settle().await;
    assert!(h.session.snapshot().room.is_none());

    // The session keeps working afterwards.
    h.push(
        "roomState",
        json!({"id": "R1", "players": [{"id": "p1", "name": "ada"}]}),
    );
    settle().await;
    assert!(h.session.snapshot().room.is_some());

    h.push("error", json!({"message": "room is full"}));
    settle().await;
    assert_eq!(
        h.session.take_last_error().as_deref(),
        Some("room is full")
    );
    assert_eq!(h.session.take_last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_deregisters_every_handler() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    settle().await;

    assert_eq!(h.relay.handler_count("roomStateUpdate"), 1);
    assert_eq!(h.relay.handler_count("newRound"), 1);

    h.session.shutdown();

    for event in [
        "connect",
        "disconnect",
        "connect_error",
        "roomStateUpdate",
        "playerJoined",
        "playerLeft",
        "countdown",
        "gameStarted",
        "newRound",
        "answerSubmitted",
        "rankingUpdated",
        "gameEnding",
        "gameEnded",
        "error",
    ] {
        assert_eq!(h.relay.handler_count(event), 0, "handler left for {event}");
    }
    assert_eq!(
        h.session.snapshot().connection,
        ConnectionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_player_churn_between_snapshots() {
    let h = Harness::new();
    h.session.connect().await.expect("connect");
    h.session.join_room("R1", "ada").await.expect("join");
    h.push(
        "roomState",
        json!({"id": "R1", "players": [{"id": "p1", "name": "ada"}]}),
    );
    settle().await;

    // Wire shape nests the player; duplicate delivery is deduplicated.
    h.push("playerJoined", json!({"player": {"id": "p2", "name": "bob"}}));
    h.push("playerJoined", json!({"player": {"id": "p2", "name": "bob"}}));
    h.push("playerLeft", json!({"player": {"id": "ghost"}}));
    settle().await;

    let snapshot = h.session.snapshot();
    let names: Vec<&str> = snapshot
        .room
        .as_ref()
        .map(|r| r.players.iter().map(|p| p.name.as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["ada", "bob"]);

    h.push("playerLeft", json!({"player": {"id": "p1"}}));
    settle().await;
    assert_eq!(
        h.session.snapshot().room.as_ref().map(|r| r.players.len()),
        Some(1)
    );
}

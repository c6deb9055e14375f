//! Session state reconciler
//!
//! Consumes relay events and folds them into a single authoritative
//! local snapshot of {connection status, room, current question, answer
//! state, ranking, game phase}. Owns the local 1 Hz timers (pre-game /
//! ending countdown and per-question countdown) and the listener
//! lifecycle: handlers are registered exactly once per session and all
//! of them are removed on teardown, on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{
    ClientConfig, DEFAULT_ENDING_COUNTDOWN_SECS, PRE_GAME_COUNTDOWN_SECS, TICK_PERIOD,
};
use crate::error::Result;
use crate::protocol::{
    events, AnswerEchoPayload, GameEndedPayload, GameEndingPayload, GameStartedPayload,
    NewRoundPayload, ServerErrorPayload,
};
use crate::relay::{EventRelay, HandlerId};
use crate::ticker::{TickAction, Ticker};
use crate::transport::{Connector, TcpTransport};
use crate::types::{
    ActiveQuestion, AnswerState, ConnectionState, GamePhase, Player, Room,
};

/// Read-only view of the reconciled session state. Cheap to clone;
/// screen controllers render from this and never mutate shared state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub phase: GamePhase,
    pub room: Option<Room>,
    pub question: Option<ActiveQuestion>,
    pub answer: AnswerState,
    /// Seconds left to answer the current question.
    pub time_remaining: u32,
    /// Current value of the pre-game or ending countdown.
    pub countdown_value: u32,
    pub ranking: Vec<Player>,
    pub total_questions: u32,
    pub local_player_id: Option<String>,
    /// Latest server business error, surfaced for the UI.
    pub last_error: Option<String>,
}

/// Timer side effect requested by an event application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEffect {
    None,
    /// (Re)start the shared phase countdown ticker.
    StartPhaseCountdown,
    /// Restart the per-question ticker; also drops any phase ticker.
    RestartQuestionTimer,
    /// Cancel every local timer.
    StopAll,
}

/// The mutable reconciled state. All mutation happens under one lock,
/// on relay-event or timer-tick callbacks.
struct SessionState {
    connection: ConnectionState,
    phase: GamePhase,
    room: Option<Room>,
    question: Option<ActiveQuestion>,
    answer: AnswerState,
    time_remaining: u32,
    countdown_value: u32,
    ranking: Vec<Player>,
    total_questions: u32,
    local_player_id: Option<String>,
    pending_join_name: Option<String>,
    last_error: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            phase: GamePhase::Waiting,
            room: None,
            question: None,
            answer: AnswerState::NotAnswered,
            time_remaining: 0,
            countdown_value: 0,
            ranking: Vec::new(),
            total_questions: 0,
            local_player_id: None,
            pending_join_name: None,
            last_error: None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            phase: self.phase,
            room: self.room.clone(),
            question: self.question.clone(),
            answer: self.answer.clone(),
            time_remaining: self.time_remaining,
            countdown_value: self.countdown_value,
            ranking: self.ranking.clone(),
            total_questions: self.total_questions,
            local_player_id: self.local_player_id.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Replace the room wholesale. Defensive path for server-state
    /// races: an already-active room while we still think we are
    /// waiting means the game started without us seeing the event.
    fn apply_room_state(&mut self, room: Room) {
        if self.local_player_id.is_none() {
            if let Some(name) = &self.pending_join_name {
                if let Some(player) = room.players.iter().find(|p| &p.name == name) {
                    info!(player_id = %player.id, "resolved local player");
                    self.local_player_id = Some(player.id.clone());
                }
            }
        }
        if !room.questions.is_empty() {
            self.total_questions = room.questions.len() as u32;
        }
        if room.is_active && self.phase == GamePhase::Waiting {
            self.phase = GamePhase::Playing;
        }
        self.room = Some(room);
    }

    /// Append a joined player, deduplicating by id.
    fn apply_player_joined(&mut self, player: Player) {
        if self.local_player_id.is_none() {
            if let Some(name) = &self.pending_join_name {
                if &player.name == name {
                    self.local_player_id = Some(player.id.clone());
                }
            }
        }
        match &mut self.room {
            Some(room) => {
                if !room.add_player(player) {
                    debug!("duplicate playerJoined dropped");
                }
            }
            None => debug!("playerJoined before any room state, dropped"),
        }
    }

    fn apply_player_left(&mut self, player_id: &str) {
        if let Some(room) = &mut self.room {
            room.remove_player(player_id);
        }
    }

    /// Pre-game countdown announced by the server.
    fn apply_countdown(&mut self) -> TimerEffect {
        if self.phase != GamePhase::Waiting {
            debug!(phase = ?self.phase, "countdown event ignored outside Waiting");
            return TimerEffect::None;
        }
        self.phase = GamePhase::Countdown;
        self.countdown_value = PRE_GAME_COUNTDOWN_SECS;
        TimerEffect::StartPhaseCountdown
    }

    fn apply_game_started(&mut self, total_questions: u32) {
        if total_questions > 0 {
            self.total_questions = total_questions;
        }
        self.phase = GamePhase::Playing;
    }

    fn apply_new_round(&mut self, payload: NewRoundPayload) -> TimerEffect {
        if !matches!(self.phase, GamePhase::Countdown | GamePhase::Playing) {
            debug!(phase = ?self.phase, "newRound ignored in this phase");
            return TimerEffect::None;
        }
        self.question = Some(ActiveQuestion {
            round: payload.round,
            text: payload.text,
            options: payload.options,
        });
        self.answer = AnswerState::NotAnswered;
        self.time_remaining = payload.timer_seconds;
        if let Some(total) = payload.total_questions {
            self.total_questions = total;
        }
        self.phase = GamePhase::Playing;
        TimerEffect::RestartQuestionTimer
    }

    /// The server's answer echo, authoritative on correctness. Only the
    /// local player's own echo is applied, and only while a selection
    /// is pending; an echo straggling in after `newRound` has reset
    /// the answer state is stale and ignored.
    fn apply_answer_echo(&mut self, echo: AnswerEchoPayload) {
        if self.phase != GamePhase::Playing {
            return;
        }
        match &self.local_player_id {
            Some(id) if id == &echo.player_id => {}
            _ => return,
        }
        let AnswerState::Pending { option } = &self.answer else {
            debug!("answer echo without a pending selection, dropped");
            return;
        };
        let option = option.clone();
        self.answer = AnswerState::Confirmed {
            option,
            correct: echo.correct,
        };
    }

    /// Replace the ranking wholesale; the order is server-assigned and
    /// never re-sorted here.
    fn apply_ranking(&mut self, ranking: Vec<Player>) {
        self.ranking = ranking;
    }

    fn apply_game_ending(&mut self, payload: GameEndingPayload) -> TimerEffect {
        if self.phase != GamePhase::Playing {
            debug!(phase = ?self.phase, "gameEnding ignored outside Playing");
            return TimerEffect::None;
        }
        self.phase = GamePhase::Ending;
        self.countdown_value = payload.countdown.unwrap_or(DEFAULT_ENDING_COUNTDOWN_SECS);
        TimerEffect::StartPhaseCountdown
    }

    fn apply_game_ended(&mut self, ranking: Vec<Player>) -> TimerEffect {
        self.ranking = ranking;
        self.phase = GamePhase::Finished;
        self.question = None;
        TimerEffect::StopAll
    }

    fn apply_server_error(&mut self, message: String) {
        // Non-fatal: surfaced to the UI, session phase untouched.
        self.last_error = Some(message);
    }

    /// One second of the shared phase countdown. Re-checks the phase
    /// first so a stale tick after a transition mutates nothing. At
    /// zero the phase advances exactly once, then the tick stops; the
    /// floor at zero is idempotent.
    fn tick_phase_countdown(&mut self) -> TickAction {
        match self.phase {
            GamePhase::Countdown | GamePhase::Ending => {}
            _ => return TickAction::Stop,
        }
        if self.countdown_value == 0 {
            return TickAction::Stop;
        }
        self.countdown_value -= 1;
        if self.countdown_value == 0 {
            self.phase = match self.phase {
                GamePhase::Countdown => GamePhase::Playing,
                _ => GamePhase::Finished,
            };
            return TickAction::Stop;
        }
        TickAction::Continue
    }

    /// One second of the per-question countdown.
    fn tick_question(&mut self) -> TickAction {
        if self.phase != GamePhase::Playing || self.question.is_none() {
            return TickAction::Stop;
        }
        if self.time_remaining == 0 {
            return TickAction::Stop;
        }
        self.time_remaining -= 1;
        if self.time_remaining == 0 {
            TickAction::Stop
        } else {
            TickAction::Continue
        }
    }

    /// Local guard for answer submission: one answer per round, only
    /// while the question clock is running. The server remains the
    /// timing authority for anything that does go out.
    fn can_submit(&self) -> bool {
        self.phase == GamePhase::Playing
            && self.question.is_some()
            && !self.answer.has_answered()
            && self.time_remaining > 0
    }
}

struct Tickers {
    phase: Option<Ticker>,
    question: Option<Ticker>,
}

struct Shared {
    state: Mutex<SessionState>,
    tickers: Mutex<Tickers>,
}

impl Shared {
    fn run_effect(self: &Arc<Self>, effect: TimerEffect) {
        match effect {
            TimerEffect::None => {}
            TimerEffect::StartPhaseCountdown => {
                let shared = Arc::clone(self);
                let ticker =
                    Ticker::start(TICK_PERIOD, move || shared.state.lock().tick_phase_countdown());
                let mut tickers = self.tickers.lock();
                tickers.phase = Some(ticker);
                tickers.question = None;
            }
            TimerEffect::RestartQuestionTimer => {
                let shared = Arc::clone(self);
                let ticker = Ticker::start(TICK_PERIOD, move || shared.state.lock().tick_question());
                let mut tickers = self.tickers.lock();
                tickers.question = Some(ticker);
                tickers.phase = None;
            }
            TimerEffect::StopAll => {
                let mut tickers = self.tickers.lock();
                tickers.phase = None;
                tickers.question = None;
            }
        }
    }
}

/// One game session: an owned connector + relay + reconciled state.
///
/// Built fresh for every room visited; [`Session::shutdown`] (also run
/// on drop) deregisters every relay handler, cancels the timers and
/// tears the connection down, so no stale callback can mutate state
/// after the owning screen has moved on.
pub struct Session {
    connector: Arc<Connector>,
    relay: Arc<EventRelay>,
    shared: Arc<Shared>,
    registrations: Mutex<Vec<(&'static str, HandlerId)>>,
    registered: AtomicBool,
}

impl Session {
    pub fn new(connector: Arc<Connector>, relay: Arc<EventRelay>) -> Self {
        let session = Self {
            connector,
            relay,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::new()),
                tickers: Mutex::new(Tickers {
                    phase: None,
                    question: None,
                }),
            }),
            registrations: Mutex::new(Vec::new()),
            registered: AtomicBool::new(false),
        };
        session.register_listeners();
        session
    }

    /// Build a session over the production TCP transport.
    pub fn from_config(config: &ClientConfig) -> Self {
        let relay = Arc::new(EventRelay::new());
        let transport = Box::new(TcpTransport::new(config.server_addr.clone()));
        let connector = Arc::new(Connector::new(
            transport,
            Arc::clone(&relay),
            config.reconnect.clone(),
        ));
        Self::new(connector, relay)
    }

    /// Current reconciled view.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Read and clear the latest surfaced server error.
    pub fn take_last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.take()
    }

    pub async fn connect(&self) -> Result<()> {
        self.connector.connect().await
    }

    /// Join a room under `name`. The local player id is resolved from
    /// the next room snapshot containing a player with that name.
    pub async fn join_room(&self, room_id: &str, name: &str) -> Result<()> {
        self.shared.state.lock().pending_join_name = Some(name.to_string());
        self.connector.join_room(room_id, name).await
    }

    pub async fn create_room(&self, room_id: &str, trivia_id: &str) -> Result<()> {
        self.connector.create_room(room_id, trivia_id).await
    }

    pub async fn start_game(&self, room_id: &str, trivia_id: &str) -> Result<()> {
        self.connector.start_game(room_id, trivia_id).await
    }

    pub async fn get_room_state(&self, room_id: &str) -> Result<()> {
        self.connector.get_room_state(room_id).await
    }

    /// Submit an answer for the current round.
    ///
    /// Returns `Ok(false)` without any network call when the local
    /// guard rejects it (already answered, clock at zero, wrong phase,
    /// or no resolved room/player yet). Otherwise the selection is
    /// recorded optimistically as pending and forwarded; the pending
    /// mark is rolled back on a transport failure so the user can
    /// retry explicitly.
    pub async fn submit_answer(&self, option: &str) -> Result<bool> {
        let (room_id, player_id) = {
            let mut state = self.shared.state.lock();
            if !state.can_submit() {
                return Ok(false);
            }
            let (Some(room), Some(player_id)) = (&state.room, state.local_player_id.clone())
            else {
                return Ok(false);
            };
            let room_id = room.id.clone();
            state.answer = AnswerState::Pending {
                option: option.to_string(),
            };
            (room_id, player_id)
        };

        match self
            .connector
            .submit_answer(&room_id, &player_id, option)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                self.shared.state.lock().answer = AnswerState::NotAnswered;
                Err(e)
            }
        }
    }

    /// Tear the session down: drop the connection, deregister all
    /// handlers, cancel timers. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        // Disconnect while the handlers are still registered so the
        // final `disconnect` event lands in the snapshot.
        self.connector.disconnect();
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for (event, id) in registrations {
            self.relay.off(event, id);
        }
        self.shared.run_effect(TimerEffect::StopAll);
    }

    /// Register all relay handlers, exactly once per session.
    fn register_listeners(&self) {
        if self.registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut registrations = self.registrations.lock();

        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::CONNECT,
                self.relay.on(events::CONNECT, move |_| {
                    shared.state.lock().connection = ConnectionState::Connected;
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::DISCONNECT,
                self.relay.on(events::DISCONNECT, move |_| {
                    shared.state.lock().connection = ConnectionState::Disconnected;
                    shared.run_effect(TimerEffect::StopAll);
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::CONNECT_ERROR,
                self.relay.on(events::CONNECT_ERROR, move |payload| {
                    let message = payload["message"].as_str().unwrap_or("connection error");
                    shared.state.lock().apply_server_error(message.to_string());
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::ROOM_STATE_UPDATE,
                self.relay.on(events::ROOM_STATE_UPDATE, move |payload| {
                    if let Some(room) = parse_payload::<Room>(events::ROOM_STATE_UPDATE, payload) {
                        shared.state.lock().apply_room_state(room);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::PLAYER_JOINED,
                self.relay.on(events::PLAYER_JOINED, move |payload| {
                    if let Some(player) = parse_payload::<Player>(events::PLAYER_JOINED, payload) {
                        shared.state.lock().apply_player_joined(player);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::PLAYER_LEFT,
                self.relay.on(events::PLAYER_LEFT, move |payload| {
                    if let Some(player) = parse_payload::<Player>(events::PLAYER_LEFT, payload) {
                        shared.state.lock().apply_player_left(&player.id);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::COUNTDOWN,
                self.relay.on(events::COUNTDOWN, move |_| {
                    let effect = shared.state.lock().apply_countdown();
                    shared.run_effect(effect);
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::GAME_STARTED,
                self.relay.on(events::GAME_STARTED, move |payload| {
                    if let Some(payload) =
                        parse_payload::<GameStartedPayload>(events::GAME_STARTED, payload)
                    {
                        shared
                            .state
                            .lock()
                            .apply_game_started(payload.total_questions);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::NEW_ROUND,
                self.relay.on(events::NEW_ROUND, move |payload| {
                    if let Some(payload) =
                        parse_payload::<NewRoundPayload>(events::NEW_ROUND, payload)
                    {
                        let effect = shared.state.lock().apply_new_round(payload);
                        shared.run_effect(effect);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::ANSWER_SUBMITTED,
                self.relay.on(events::ANSWER_SUBMITTED, move |payload| {
                    if let Some(echo) =
                        parse_payload::<AnswerEchoPayload>(events::ANSWER_SUBMITTED, payload)
                    {
                        shared.state.lock().apply_answer_echo(echo);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::RANKING_UPDATED,
                self.relay.on(events::RANKING_UPDATED, move |payload| {
                    if let Some(ranking) =
                        parse_payload::<Vec<Player>>(events::RANKING_UPDATED, payload)
                    {
                        shared.state.lock().apply_ranking(ranking);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::GAME_ENDING,
                self.relay.on(events::GAME_ENDING, move |payload| {
                    let payload = parse_payload::<GameEndingPayload>(events::GAME_ENDING, payload)
                        .unwrap_or(GameEndingPayload { countdown: None });
                    let effect = shared.state.lock().apply_game_ending(payload);
                    shared.run_effect(effect);
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::GAME_ENDED,
                self.relay.on(events::GAME_ENDED, move |payload| {
                    // Fallback to an empty ranking on a malformed payload.
                    let ranking = parse_payload::<GameEndedPayload>(events::GAME_ENDED, payload)
                        .map(|p| p.ranking)
                        .unwrap_or_default();
                    let effect = shared.state.lock().apply_game_ended(ranking);
                    shared.run_effect(effect);
                    Ok(())
                }),
            ));
        }
        {
            let shared = Arc::clone(&self.shared);
            registrations.push((
                events::SERVER_ERROR,
                self.relay.on(events::SERVER_ERROR, move |payload| {
                    let message = parse_payload::<ServerErrorPayload>(events::SERVER_ERROR, payload)
                        .map(|p| p.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "unknown server error".to_string());
                    warn!(%message, "server error event");
                    shared.state.lock().apply_server_error(message);
                    Ok(())
                }),
            ));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Parse an event payload, dropping the event with a warning when
/// required fields are missing. Missing optional fields default at the
/// serde level.
fn parse_payload<T: DeserializeOwned>(event: &str, payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(event, error = %e, "dropping event with malformed payload");
            None
        }
    }
}

//! Transport connector: owns the link lifecycle
//!
//! `connect()` drives a bounded retry loop with exponential backoff and
//! resolves once the link is up; on exhaustion it fails terminally (no
//! automatic retries afterwards). A background I/O task forwards
//! inbound frames to the relay and drains the outbound queue. Game
//! actions await an in-flight connect attempt, or fail fast when none
//! was ever started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ReconnectConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{events, translate_inbound, ClientCommand, Envelope};
use crate::relay::EventRelay;
use crate::transport::Transport;
use crate::types::ConnectionState;

/// Owns one realtime connection to the rooms gateway.
///
/// Explicitly constructed and owned by the session; one connector is
/// good for one connection. After `disconnect()` (or exhausted connect
/// attempts) a fresh session must be built to reconnect.
pub struct Connector {
    relay: Arc<EventRelay>,
    config: ReconnectConfig,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    io_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    attempt_started: AtomicBool,
}

impl Connector {
    pub fn new(
        transport: Box<dyn Transport>,
        relay: Arc<EventRelay>,
        config: ReconnectConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            relay,
            config,
            transport: tokio::sync::Mutex::new(Some(transport)),
            state_tx,
            state_rx,
            outbound: parking_lot::Mutex::new(None),
            io_task: parking_lot::Mutex::new(None),
            attempt_started: AtomicBool::new(false),
        }
    }

    /// Current link state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch handle for link state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Establish the connection, retrying with backoff up to the
    /// configured attempt budget. Resolves once the link is up;
    /// resolves to [`ClientError::Connection`] once the budget is
    /// spent, after which no automatic retries occur.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.transport.lock().await;

        if self.connection_state() == ConnectionState::Connected {
            return Ok(());
        }
        let mut transport = match guard.take() {
            Some(transport) => transport,
            None => {
                return Err(ClientError::Connection {
                    attempts: 0,
                    reason: "session already torn down; build a new session to reconnect"
                        .to_string(),
                })
            }
        };

        let _ = self.state_tx.send(ConnectionState::Connecting);
        self.attempt_started.store(true, Ordering::SeqCst);

        let mut last_reason = String::new();

        for attempt in 1..=self.config.max_attempts {
            match tokio::time::timeout(self.config.connect_timeout, transport.open()).await {
                Ok(Ok(inbound)) => {
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    *self.outbound.lock() = Some(outbound_tx);

                    let relay = Arc::clone(&self.relay);
                    let state_tx = self.state_tx.clone();
                    *self.io_task.lock() = Some(tokio::spawn(io_loop(
                        transport, inbound, outbound_rx, relay, state_tx,
                    )));

                    let _ = self.state_tx.send(ConnectionState::Connected);
                    info!(attempt, "connected to rooms gateway");
                    self.relay.emit(events::CONNECT, &Value::Null);
                    return Ok(());
                }
                Ok(Err(e)) => last_reason = e.to_string(),
                Err(_) => last_reason = "connect attempt timed out".to_string(),
            }

            warn!(attempt, reason = %last_reason, "connect attempt failed");
            self.relay.emit(
                events::CONNECT_ERROR,
                &serde_json::json!({ "message": last_reason }),
            );

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.delay_for(attempt)).await;
            }
        }

        // Budget spent: terminal failure. The transport stays consumed
        // so later calls cannot silently half-revive the session.
        transport.close().await;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        Err(ClientError::Connection {
            attempts: self.config.max_attempts,
            reason: last_reason,
        })
    }

    /// Tear the link down unconditionally. Idempotent.
    pub fn disconnect(&self) {
        if let Some(task) = self.io_task.lock().take() {
            task.abort();
        }
        *self.outbound.lock() = None;

        if self.state_tx.send_replace(ConnectionState::Disconnected)
            != ConnectionState::Disconnected
        {
            self.relay.emit(events::DISCONNECT, &Value::Null);
        }
    }

    pub async fn join_room(&self, room_id: &str, name: &str) -> Result<()> {
        self.send_command(ClientCommand::JoinRoom {
            room_id: room_id.to_string(),
            name: name.to_string(),
        })
        .await
    }

    pub async fn submit_answer(&self, room_id: &str, player_id: &str, answer: &str) -> Result<()> {
        self.send_command(ClientCommand::SubmitAnswer {
            room_id: room_id.to_string(),
            player_id: player_id.to_string(),
            answer: answer.to_string(),
        })
        .await
    }

    pub async fn start_game(&self, room_id: &str, trivia_id: &str) -> Result<()> {
        self.send_command(ClientCommand::StartGame {
            room_id: room_id.to_string(),
            trivia_id: trivia_id.to_string(),
        })
        .await
    }

    pub async fn create_room(&self, room_id: &str, trivia_id: &str) -> Result<()> {
        self.send_command(ClientCommand::CreateRoom {
            room_id: room_id.to_string(),
            trivia_id: trivia_id.to_string(),
        })
        .await
    }

    pub async fn get_room_state(&self, room_id: &str) -> Result<()> {
        self.send_command(ClientCommand::GetRoomState {
            room_id: room_id.to_string(),
        })
        .await
    }

    /// Queue one outbound command, awaiting an in-flight connect
    /// attempt first. Fails with [`ClientError::NotConnected`] when no
    /// attempt was ever started or the link is gone.
    async fn send_command(&self, command: ClientCommand) -> Result<()> {
        self.await_connected().await?;
        let tx = self
            .outbound
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        tx.send(command.into_envelope())
            .map_err(|_| ClientError::NotConnected)
    }

    async fn await_connected(&self) -> Result<()> {
        if !self.attempt_started.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => return Err(ClientError::NotConnected),
                ConnectionState::Connecting => {
                    rx.changed().await.map_err(|_| ClientError::NotConnected)?;
                }
            }
        }
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.lock().take() {
            task.abort();
        }
    }
}

/// Background I/O: forwards inbound frames to the relay in arrival
/// order and drains the outbound queue onto the link.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    relay: Arc<EventRelay>,
    state_tx: watch::Sender<ConnectionState>,
) {
    loop {
        tokio::select! {
            maybe_cmd = outbound.recv() => match maybe_cmd {
                Some(envelope) => {
                    if let Err(e) = transport.send(envelope).await {
                        warn!(error = %e, "outbound send failed, closing link");
                        break;
                    }
                }
                None => break,
            },
            maybe_frame = inbound.recv() => match maybe_frame {
                Some(envelope) => {
                    let (event, data) = translate_inbound(envelope);
                    relay.emit(&event, &data);
                }
                None => {
                    info!("server closed the link");
                    break;
                }
            },
        }
    }

    transport.close().await;
    if state_tx.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
        relay.emit(events::DISCONNECT, &Value::Null);
    }
}

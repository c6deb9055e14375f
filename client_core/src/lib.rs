//! Session layer for the trivia rooms client
//!
//! Everything between the socket and the screens: a reconnecting
//! transport connector, a publish/subscribe event relay, and a session
//! state reconciler that folds server events and local timer ticks
//! into one authoritative snapshot of the game.
//!
//! Typical use:
//!
//! ```no_run
//! use trivia_client_core::config::ClientConfig;
//! use trivia_client_core::session::Session;
//!
//! # async fn run() -> trivia_client_core::error::Result<()> {
//! let session = Session::from_config(&ClientConfig::from_env());
//! session.connect().await?;
//! session.join_room("ROOM1", "ada").await?;
//! let snapshot = session.snapshot();
//! println!("phase: {:?}", snapshot.phase);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod ticker;
pub mod transport;
pub mod types;

pub use error::{ClientError, Result};
pub use session::{Session, SessionSnapshot};
pub use types::{AnswerState, ConnectionState, GamePhase, Player, Question, Room};

//! Configuration constants and environment loading
//!
//! This module manages all runtime configuration:
//! - Server endpoint address
//! - Connect retry/backoff settings
//! - Local countdown and question-timer settings

use std::env;
use std::time::Duration;

/// Default server endpoint (host:port of the rooms gateway).
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3007";

/// Default maximum connect attempts before connect() fails terminally
/// (can be overridden via TRIVIA_MAX_CONNECT_ATTEMPTS).
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Default base backoff delay between connect attempts in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default backoff cap in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5000;

/// Default per-attempt connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Fixed pre-game countdown start value, in seconds.
pub const PRE_GAME_COUNTDOWN_SECS: u32 = 3;

/// Countdown used for `gameEnding` when the payload carries none.
pub const DEFAULT_ENDING_COUNTDOWN_SECS: u32 = 5;

/// Period of the local 1 Hz timers.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Backoff schedule for connect attempts: base delay doubling per
/// attempt, capped at a maximum. No automatic retries happen once the
/// attempt budget is spent.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_BACKOFF_BASE_MS,
            max_delay_ms: DEFAULT_BACKOFF_MAX_MS,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl ReconnectConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            max_attempts: env::var("TRIVIA_MAX_CONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECT_ATTEMPTS)
                .max(1),
            base_delay_ms: env::var("TRIVIA_BACKOFF_BASE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            max_delay_ms: env::var("TRIVIA_BACKOFF_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BACKOFF_MAX_MS),
            connect_timeout: Duration::from_millis(
                env::var("TRIVIA_CONNECT_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
        }
    }

    /// Delay to sleep after a failed attempt (1-based attempt index).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        Duration::from_millis(doubled.min(self.max_delay_ms))
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            server_addr: env::var("TRIVIA_SERVER_ADDR")
                .unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string()),
            reconnect: ReconnectConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ReconnectConfig {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            connect_timeout: Duration::from_secs(5),
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for(4), Duration::from_millis(5000)); // capped
        assert_eq!(config.delay_for(30), Duration::from_millis(5000)); // still capped
    }

    #[test]
    fn test_default_config_matches_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr, DEFAULT_SERVER_ADDR);
        assert_eq!(config.reconnect.max_attempts, DEFAULT_MAX_CONNECT_ATTEMPTS);
        assert_eq!(
            config.reconnect.connect_timeout,
            Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
        );
    }
}

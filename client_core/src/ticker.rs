//! Cancellable fixed-period tick task.
//!
//! One abstraction for every repeating local timer (phase countdown,
//! per-question countdown), with explicit start/stop so no timer can
//! leak across rapid phase transitions. Dropping a [`Ticker`] stops it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Returned by a tick callback to keep or cancel the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Continue,
    Stop,
}

/// A spawned task invoking a callback once per period until the
/// callback asks to stop or the ticker is stopped/dropped.
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn the tick task. The first callback fires one full period
    /// after start.
    pub fn start<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> TickAction + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately on creation; swallow that one.
            interval.tick().await;
            loop {
                interval.tick().await;
                if tick() == TickAction::Stop {
                    break;
                }
            }
        });
        Self { handle }
    }

    /// Cancel the tick task. Safe to call more than once.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

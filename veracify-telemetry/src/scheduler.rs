//! Sync scheduling
//!
//! Two trigger sources converge on one entry point: a periodic timer and
//! the recorder's threshold trigger. [`SyncScheduler::maybe_run_cycle`]
//! applies the debounce rules; `force_sync_now` on the engine bypasses
//! them entirely.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TelemetryConfig;
use crate::engine::{CycleReport, SyncEngine};

/// Capacity of the advisory trigger channel; a full channel just means a
/// cycle request is already queued
const TRIGGER_CHANNEL_CAPACITY: usize = 8;

/// Widened-retry cap once the engine is in a failing streak
const MAX_BACKOFF_SHIFT: u32 = 3;

/// Cloneable, best-effort handle for requesting an early sync cycle
#[derive(Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    /// Ask the scheduler to consider a cycle soon.
    ///
    /// Advisory only: if the channel is full a request is already
    /// pending, and if the scheduler is gone the request is moot.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Decides when a sync cycle should run
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    config: TelemetryConfig,
}

impl SyncScheduler {
    /// Create a scheduler over the given engine
    pub fn new(engine: Arc<SyncEngine>, config: TelemetryConfig) -> Self {
        Self { engine, config }
    }

    /// Spawn the scheduler loop, returning the trigger handle and the
    /// task handle (abort it to stop scheduling).
    pub fn spawn(self) -> (SyncTrigger, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let trigger = SyncTrigger { tx };
        let handle = tokio::spawn(self.run(rx));
        (trigger, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<()>) {
        let period = Duration::from_millis(self.config.sync_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; scheduling starts one
        // period from now
        ticker.tick().await;

        tracing::debug!(interval_ms = self.config.sync_interval_ms, "Sync scheduler running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.maybe_run_cycle().await;
                }
                msg = rx.recv() => match msg {
                    Some(()) => { self.maybe_run_cycle().await; }
                    None => break,
                }
            }
        }

        tracing::debug!("Sync scheduler stopped");
    }

    /// Run a cycle unless the debounce rules say to wait.
    ///
    /// Returns the cycle report when a cycle ran.
    pub async fn maybe_run_cycle(&self) -> Option<CycleReport> {
        let status = self.engine.status();
        let decision = debounce(
            Utc::now(),
            status.last_sync_time,
            status.pending_count,
            status.error_count,
            &self.config,
        );

        match decision {
            Debounce::Run => Some(self.engine.run_cycle().await),
            Debounce::TooFewPending => {
                tracing::debug!(
                    pending = status.pending_count,
                    "Debouncing sync cycle, too few pending events"
                );
                None
            }
            Debounce::Backoff => {
                tracing::debug!(
                    error_count = status.error_count,
                    "Holding sync cycle back after repeated failures"
                );
                None
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Debounce {
    Run,
    TooFewPending,
    Backoff,
}

/// Pure debounce decision.
///
/// A cycle is skipped when the queue is small and a sync happened
/// recently; no event ever waits longer than twice the sync interval.
/// Once the failure streak passes `max_retry_attempts`, the effective
/// interval widens multiplicatively (doubling per extra failure, capped
/// at 8x) but triggers are never permanently suppressed.
fn debounce(
    now: DateTime<Utc>,
    last_sync_time: Option<DateTime<Utc>>,
    pending_count: usize,
    error_count: u32,
    config: &TelemetryConfig,
) -> Debounce {
    let Some(last) = last_sync_time else {
        // Very first cycle is never debounced
        return Debounce::Run;
    };
    let elapsed = now - last;
    let interval = config.sync_interval();

    if pending_count < config.min_batch_threshold && elapsed < interval * 2 {
        return Debounce::TooFewPending;
    }

    if error_count > config.max_retry_attempts {
        let shift = (error_count - config.max_retry_attempts).min(MAX_BACKOFF_SHIFT);
        let widened = interval * (1 << shift);
        if elapsed < widened {
            return Debounce::Backoff;
        }
    }

    Debounce::Run
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            sync_interval_ms: 900_000,
            min_batch_threshold: 5,
            max_retry_attempts: 3,
            ..Default::default()
        }
    }

    fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        now - chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_first_cycle_always_runs() {
        let now = Utc::now();
        assert_eq!(debounce(now, None, 0, 0, &config()), Debounce::Run);
    }

    #[test]
    fn test_small_queue_recent_sync_is_debounced() {
        let now = Utc::now();
        let last = minutes_ago(now, 5);
        assert_eq!(
            debounce(now, Some(last), 2, 0, &config()),
            Debounce::TooFewPending
        );
    }

    #[test]
    fn test_small_queue_stale_sync_runs() {
        let now = Utc::now();
        // Past 2x the 15 minute interval
        let last = minutes_ago(now, 31);
        assert_eq!(debounce(now, Some(last), 2, 0, &config()), Debounce::Run);
    }

    #[test]
    fn test_threshold_crossing_runs_immediately() {
        let now = Utc::now();
        let last = minutes_ago(now, 1);
        assert_eq!(debounce(now, Some(last), 5, 0, &config()), Debounce::Run);
    }

    #[test]
    fn test_failure_streak_widens_interval() {
        let now = Utc::now();
        let cfg = config();

        // Five consecutive failures: two past the allowance, 4x interval
        let last = minutes_ago(now, 31);
        assert_eq!(debounce(now, Some(last), 50, 5, &cfg), Debounce::Backoff);

        // Far enough in the past even for the widened window
        let last = minutes_ago(now, 61);
        assert_eq!(debounce(now, Some(last), 50, 5, &cfg), Debounce::Run);
    }

    #[test]
    fn test_backoff_is_capped() {
        let now = Utc::now();
        let cfg = config();

        // A huge error streak still retries after 8x the interval
        let last = minutes_ago(now, 121);
        assert_eq!(debounce(now, Some(last), 50, 40, &cfg), Debounce::Run);
    }
}

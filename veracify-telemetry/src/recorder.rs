//! Event recording
//!
//! The recorder is the producer side of the pending queues. It appends
//! and persists synchronously, then at most nudges the scheduler; it
//! never performs network I/O and never waits on a sync cycle.

use std::sync::Arc;

use serde::Serialize;

use crate::config::TelemetryConfig;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::events::{AnalyticsEvent, FeedbackEvent};
use crate::queue::{PendingQueues, QueueKind};
use crate::scheduler::SyncTrigger;

/// Appends events to the durable pending queues
pub struct EventRecorder {
    queues: PendingQueues,
    engine: Arc<SyncEngine>,
    trigger: SyncTrigger,
    config: TelemetryConfig,
}

impl EventRecorder {
    /// Create a recorder over the shared queues
    pub fn new(
        queues: PendingQueues,
        engine: Arc<SyncEngine>,
        trigger: SyncTrigger,
        config: TelemetryConfig,
    ) -> Self {
        Self {
            queues,
            engine,
            trigger,
            config,
        }
    }

    /// Record one completed fact check.
    ///
    /// The append is persisted before this returns; an error means the
    /// event was not queued and the on-disk queue is unchanged.
    pub fn record_fact_check(&self, event: &AnalyticsEvent) -> Result<()> {
        self.record(QueueKind::Analytics, event)
    }

    /// Record one piece of user feedback
    pub fn record_feedback(&self, event: &FeedbackEvent) -> Result<()> {
        self.record(QueueKind::Feedback, event)
    }

    fn record<T: Serialize>(&self, kind: QueueKind, event: &T) -> Result<()> {
        let raw = serde_json::to_value(event)?;
        let len = self.queues.append(kind, raw)?;

        tracing::debug!(queue = ?kind, pending = len, "Event recorded");

        // Advisory nudge: the scheduler still applies its own debounce,
        // and a cycle already in flight will pick the event up via merge.
        if len >= self.config.min_batch_threshold && !self.engine.is_syncing() {
            self.trigger.notify();
        }

        Ok(())
    }
}

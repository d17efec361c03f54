//! Host-facing telemetry service
//!
//! Wires the store, identity, recorder, sink, engine, and scheduler
//! together behind the four calls the host application uses. Telemetry
//! failures never propagate into the host's primary feature: recording
//! errors are surfaced to the caller but sync errors stay inside the
//! engine.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{Config, ConsentGate};
use crate::engine::{CycleReport, LastSyncResult, SyncEngine, SyncStatus};
use crate::error::Result;
use crate::events::{AnalyticsEvent, FeedbackEvent};
use crate::identity::IdentityManager;
use crate::queue::PendingQueues;
use crate::recorder::EventRecorder;
use crate::scheduler::SyncScheduler;
use crate::sink::{EventSink, HttpSink};
use crate::store::Store;

/// The telemetry engine as the host application sees it
pub struct TelemetryService {
    recorder: EventRecorder,
    engine: Arc<SyncEngine>,
    scheduler_task: JoinHandle<()>,
}

impl TelemetryService {
    /// Build the service over the given store and start the scheduler.
    ///
    /// Must be called from within a tokio runtime. A missing or invalid
    /// sink configuration degrades delivery (cycles report
    /// `NotConfigured`) but never fails construction: events keep
    /// accumulating durably until a sink is available.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        config.telemetry.validate()?;

        let sink: Option<Arc<dyn EventSink>> = if config.sink.is_ready() {
            match HttpSink::new(&config.sink) {
                Ok(sink) => Some(Arc::new(sink)),
                Err(e) => {
                    tracing::warn!(error = %e, "Sink configuration invalid, delivery disabled");
                    None
                }
            }
        } else {
            tracing::info!("No sink configured, telemetry will queue locally");
            None
        };

        Self::with_sink(config, store, sink)
    }

    /// Build the service with an explicit sink (tests inject fakes here)
    pub fn with_sink(
        config: Config,
        store: Arc<dyn Store>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self> {
        let queues = PendingQueues::new(store.clone());
        let identity = IdentityManager::new(store.clone());
        let consent = ConsentGate::new(config.telemetry.share_analytics);

        let engine = Arc::new(SyncEngine::new(
            store,
            queues.clone(),
            identity,
            sink,
            consent,
            config.clone(),
        ));

        let scheduler = SyncScheduler::new(engine.clone(), config.telemetry.clone());
        let (trigger, scheduler_task) = scheduler.spawn();

        let recorder = EventRecorder::new(queues, engine.clone(), trigger, config.telemetry);

        Ok(Self {
            recorder,
            engine,
            scheduler_task,
        })
    }

    /// Record one completed fact check
    pub fn record_fact_check(&self, event: &AnalyticsEvent) -> Result<()> {
        self.recorder.record_fact_check(event)
    }

    /// Record one piece of user feedback
    pub fn record_feedback(&self, event: &FeedbackEvent) -> Result<()> {
        self.recorder.record_feedback(event)
    }

    /// Run a sync cycle now, bypassing the scheduler's debounce
    pub async fn force_sync_now(&self) -> Result<CycleReport> {
        self.engine.force_sync_now().await
    }

    /// Current engine state
    pub fn sync_status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Outcome of the last completed cycle, if any
    pub fn last_result(&self) -> Option<LastSyncResult> {
        self.engine.last_result()
    }

    /// Flip the user's consent to sharing analytics
    pub fn set_share_analytics(&self, enabled: bool) {
        self.engine.consent().set_enabled(enabled);
    }

    /// Stop scheduling and run one final drain cycle.
    ///
    /// Deterministic shutdown: after this returns, no background task is
    /// left running and every deliverable event has had one last chance
    /// to go out.
    pub async fn shutdown(self) -> CycleReport {
        self.scheduler_task.abort();
        self.engine.run_cycle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Sink that records every call and always succeeds
    #[derive(Default)]
    struct CountingSink {
        calls: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn send_batch(&self, table: &str, records: &[serde_json::Value]) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((table.to_string(), records.len()));
            Ok(())
        }
    }

    fn analytics_event() -> AnalyticsEvent {
        AnalyticsEvent {
            timestamp: Utc::now(),
            domain: "example.org".to_string(),
            text_length: 1200,
            query_length: 40,
            model: "sonar-pro".to_string(),
            rating: Some(55.0),
            search_used: true,
            is_credible_source: false,
            is_fact_check_source: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_trigger_drives_a_cycle() {
        let sink = Arc::new(CountingSink::default());
        let service = TelemetryService::with_sink(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Some(sink.clone()),
        )
        .unwrap();

        // Below the threshold of five nothing happens
        for _ in 0..4 {
            service.record_fact_check(&analytics_event()).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sink.calls.lock().unwrap().is_empty());

        // Fifth event crosses the threshold
        service.record_fact_check(&analytics_event()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let calls = sink.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("analytics_events".to_string(), 5)]);
        assert_eq!(service.sync_status().pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_pending() {
        let sink = Arc::new(CountingSink::default());
        let service = TelemetryService::with_sink(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Some(sink.clone()),
        )
        .unwrap();

        service.record_fact_check(&analytics_event()).unwrap();
        let report = service.shutdown().await;

        assert_eq!(report.successful, 1);
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recording_works_without_sink() {
        let service =
            TelemetryService::with_sink(Config::default(), Arc::new(MemoryStore::new()), None)
                .unwrap();

        service.record_fact_check(&analytics_event()).unwrap();
        assert_eq!(service.sync_status().pending_count, 1);

        // Forced sync reports the skip instead of erroring
        let report = service.force_sync_now().await.unwrap();
        assert_eq!(
            report.skipped,
            Some(crate::engine::SkipReason::NotConfigured)
        );
        assert_eq!(service.sync_status().pending_count, 1);
    }
}

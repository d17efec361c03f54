//! Integration tests for the batch sync engine
//!
//! These tests drive full sync cycles against an in-memory store and
//! scripted sinks, covering chunking, partial failure, consent gating,
//! mutual exclusion, and loss-freedom under concurrent recording.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use veracify_telemetry::engine::SyncEngine;
use veracify_telemetry::identity::IdentityManager;
use veracify_telemetry::queue::{PendingQueues, QueueKind};
use veracify_telemetry::sink::EventSink;
use veracify_telemetry::store::keys;
use veracify_telemetry::{
    AnalyticsEvent, Config, ConsentGate, Error, MemoryStore, Result, SkipReason, Store,
};

/// One recorded sink call
#[derive(Debug, Clone, PartialEq)]
struct SinkCall {
    table: String,
    count: usize,
}

/// Sink driven by a script of per-call outcomes.
///
/// Calls beyond the script succeed. Every call is recorded along with
/// the domains of the records it carried, so tests can assert ordering.
#[derive(Default)]
struct ScriptedSink {
    outcomes: Mutex<VecDeque<Result<()>>>,
    calls: Mutex<Vec<SinkCall>>,
    domains: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSink {
    fn with_outcomes(outcomes: Vec<Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for ScriptedSink {
    async fn send_batch(&self, table: &str, records: &[Value]) -> Result<()> {
        self.calls.lock().unwrap().push(SinkCall {
            table: table.to_string(),
            count: records.len(),
        });
        self.domains.lock().unwrap().push(
            records
                .iter()
                .map(|r| r["domain"].as_str().unwrap_or("").to_string())
                .collect(),
        );
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

fn event(n: usize) -> AnalyticsEvent {
    AnalyticsEvent {
        timestamp: Utc::now(),
        domain: format!("site-{n}.example"),
        text_length: 100 + n,
        query_length: 10,
        model: "sonar-pro".to_string(),
        rating: Some(50.0),
        search_used: false,
        is_credible_source: false,
        is_fact_check_source: false,
    }
}

fn seed_analytics(queues: &PendingQueues, count: usize) {
    for n in 0..count {
        queues
            .append(QueueKind::Analytics, serde_json::to_value(event(n)).unwrap())
            .unwrap();
    }
}

fn build_engine(
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    share_analytics: bool,
) -> (Arc<SyncEngine>, PendingQueues) {
    let queues = PendingQueues::new(store.clone());
    let engine = SyncEngine::new(
        store.clone(),
        queues.clone(),
        IdentityManager::new(store),
        Some(sink),
        ConsentGate::new(share_analytics),
        Config::default(),
    );
    (Arc::new(engine), queues)
}

#[tokio::test]
async fn empty_cycle_is_idempotent_and_silent() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::with_outcomes(vec![]);
    let (engine, _) = build_engine(store, sink.clone(), true);

    for _ in 0..3 {
        let report = engine.run_cycle().await;
        assert_eq!(report.successful, 0);
        assert_eq!(report.failed, 0);
        assert!(report.skipped.is_none());
    }

    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn chunking_produces_ordered_ceil_batches() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::with_outcomes(vec![]);
    let (engine, queues) = build_engine(store, sink.clone(), true);

    // 120 events with the default batch size of 50
    seed_analytics(&queues, 120);
    let report = engine.run_cycle().await;

    assert_eq!(report.successful, 120);
    assert_eq!(report.failed, 0);

    let calls = sink.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls.iter().map(|c| c.count).collect::<Vec<_>>(),
        vec![50, 50, 20]
    );
    assert!(calls.iter().all(|c| c.table == "analytics_events"));

    // Relative order is preserved across batches
    let domains = sink.domains.lock().unwrap().clone();
    let flattened: Vec<String> = domains.into_iter().flatten().collect();
    let expected: Vec<String> = (0..120).map(|n| format!("site-{n}.example")).collect();
    assert_eq!(flattened, expected);

    assert_eq!(queues.len(QueueKind::Analytics).unwrap(), 0);
}

#[tokio::test]
async fn failed_batch_is_retained_verbatim() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    // Batches 1 and 2 accepted, batch 3 rejected with a 500
    let sink = ScriptedSink::with_outcomes(vec![
        Ok(()),
        Ok(()),
        Err(Error::RemoteRejection {
            status: 500,
            body: "internal error".to_string(),
        }),
    ]);
    let (engine, queues) = build_engine(store, sink.clone(), true);

    seed_analytics(&queues, 120);
    let before = queues.snapshot(QueueKind::Analytics).unwrap();
    let report = engine.run_cycle().await;

    assert_eq!(report.successful, 100);
    assert_eq!(report.failed, 20);
    assert_eq!(sink.calls().len(), 3);

    // Residue is exactly the events of batch 3, byte-for-byte
    let residue = queues.snapshot(QueueKind::Analytics).unwrap();
    assert_eq!(residue, before[100..].to_vec());

    let result = engine.last_result().unwrap();
    assert_eq!(result.successful, 100);
    assert_eq!(result.failed, 20);
    assert_eq!(engine.status().error_count, 1);

    // The next cycle retries only the residue and clears the streak
    let report = engine.run_cycle().await;
    assert_eq!(report.successful, 20);
    assert_eq!(report.failed, 0);
    assert_eq!(engine.status().error_count, 0);
    assert_eq!(queues.len(QueueKind::Analytics).unwrap(), 0);
}

#[tokio::test]
async fn middle_batch_failure_does_not_abort_later_batches() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::with_outcomes(vec![
        Ok(()),
        Err(Error::Network("connection reset".to_string())),
        Ok(()),
    ]);
    let (engine, queues) = build_engine(store, sink.clone(), true);

    seed_analytics(&queues, 120);
    let before = queues.snapshot(QueueKind::Analytics).unwrap();
    let report = engine.run_cycle().await;

    // All three batches were attempted
    assert_eq!(sink.calls().len(), 3);
    assert_eq!(report.successful, 70);
    assert_eq!(report.failed, 50);

    // Only the middle batch survives, in original relative order
    let residue = queues.snapshot(QueueKind::Analytics).unwrap();
    assert_eq!(residue, before[50..100].to_vec());
}

#[tokio::test]
async fn consent_disabled_touches_nothing() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::with_outcomes(vec![]);
    let (engine, queues) = build_engine(store.clone(), sink.clone(), false);

    seed_analytics(&queues, 7);
    let before = store.get(keys::PENDING_ANALYTICS).unwrap();

    for _ in 0..5 {
        let report = engine.run_cycle().await;
        assert_eq!(report.skipped, Some(SkipReason::ConsentDisabled));
    }

    assert!(sink.calls().is_empty());
    assert_eq!(store.get(keys::PENDING_ANALYTICS).unwrap(), before);

    // Re-enabling consent delivers the backlog untouched
    engine.consent().set_enabled(true);
    let report = engine.run_cycle().await;
    assert_eq!(report.successful, 7);
}

#[tokio::test]
async fn events_recorded_mid_cycle_survive_in_order() {
    /// Sink that appends to the queue mid-flight, then fails the batch
    struct RecordingDuringSendSink {
        queues: PendingQueues,
    }

    #[async_trait]
    impl EventSink for RecordingDuringSendSink {
        async fn send_batch(&self, _table: &str, _records: &[Value]) -> Result<()> {
            // A producer sneaks two events in while the POST is in flight
            self.queues
                .append(
                    QueueKind::Analytics,
                    serde_json::to_value(event(900)).unwrap(),
                )
                .unwrap();
            self.queues
                .append(
                    QueueKind::Analytics,
                    serde_json::to_value(event(901)).unwrap(),
                )
                .unwrap();
            Err(Error::Network("timeout".to_string()))
        }
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let queues = PendingQueues::new(store.clone());
    let sink = Arc::new(RecordingDuringSendSink {
        queues: queues.clone(),
    });
    let engine = SyncEngine::new(
        store.clone(),
        queues.clone(),
        IdentityManager::new(store),
        Some(sink),
        ConsentGate::new(true),
        Config::default(),
    );

    seed_analytics(&queues, 3);
    let report = engine.run_cycle().await;
    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 3);

    // Failed snapshot first, then the concurrently recorded events
    let residue = queues.snapshot(QueueKind::Analytics).unwrap();
    let domains: Vec<&str> = residue
        .iter()
        .map(|v| v["domain"].as_str().unwrap())
        .collect();
    assert_eq!(
        domains,
        vec![
            "site-0.example",
            "site-1.example",
            "site-2.example",
            "site-900.example",
            "site-901.example",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_run_exactly_one_cycle() {
    /// Sink that holds every call open until released
    struct BlockingSink {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl EventSink for BlockingSink {
        async fn send_batch(&self, _table: &str, _records: &[Value]) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sink = Arc::new(BlockingSink {
        entered: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
    });
    let (engine, queues) = build_engine(store, sink.clone(), true);

    seed_analytics(&queues, 3);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_cycle().await }
    });

    // Wait until the first cycle is inside the sink call
    sink.entered.notified().await;
    assert!(engine.is_syncing());

    // A second trigger while one is in flight is an immediate no-op
    let report = engine.run_cycle().await;
    assert_eq!(report.skipped, Some(SkipReason::AlreadyRunning));

    sink.release.notify_one();
    let report = first.await.unwrap();
    assert_eq!(report.successful, 3);
    assert!(!engine.is_syncing());
}

#[tokio::test(start_paused = true)]
async fn force_sync_reports_busy_after_bounded_wait() {
    /// Sink that never completes
    struct StuckSink;

    #[async_trait]
    impl EventSink for StuckSink {
        async fn send_batch(&self, _table: &str, _records: &[Value]) -> Result<()> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (engine, queues) = build_engine(store, Arc::new(StuckSink), true);

    seed_analytics(&queues, 1);

    let stuck = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_cycle().await }
    });
    tokio::task::yield_now().await;
    assert!(engine.is_syncing());

    let result = engine.force_sync_now().await;
    assert!(matches!(result, Err(Error::ConcurrencyBusy)));

    stuck.abort();
}

#[tokio::test]
async fn feedback_and_analytics_go_to_their_own_tables() {
    use veracify_telemetry::{FeedbackEvent, FeedbackRating};

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::with_outcomes(vec![]);
    let (engine, queues) = build_engine(store, sink.clone(), true);

    seed_analytics(&queues, 2);
    let feedback = FeedbackEvent {
        timestamp: Utc::now(),
        analytics_id: Some("evt-1".to_string()),
        rating: FeedbackRating::Positive,
        domain: "site-0.example".to_string(),
    };
    queues
        .append(QueueKind::Feedback, serde_json::to_value(&feedback).unwrap())
        .unwrap();

    let report = engine.run_cycle().await;
    assert_eq!(report.successful, 3);

    let calls = sink.calls();
    assert_eq!(
        calls,
        vec![
            SinkCall {
                table: "analytics_events".to_string(),
                count: 2
            },
            SinkCall {
                table: "feedback_events".to_string(),
                count: 1
            },
        ]
    );
}

#[tokio::test]
async fn identity_is_stamped_into_wire_records() {
    /// Sink that captures every record it is handed
    struct CapturingSink {
        records: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl EventSink for CapturingSink {
        async fn send_batch(&self, _table: &str, records: &[Value]) -> Result<()> {
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store
        .set(keys::CLIENT_ID, &serde_json::json!("deadbeef"))
        .unwrap();

    let capturing = Arc::new(CapturingSink {
        records: Mutex::new(Vec::new()),
    });
    let (engine, queues) = build_engine(store, capturing.clone(), true);

    seed_analytics(&queues, 1);
    engine.run_cycle().await;

    let records = capturing.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["client_id"], "deadbeef");
    assert_eq!(records[0]["session_id"].as_str().unwrap().len(), 16);
    // Local-only fields never reach the wire
    assert!(records[0].get("query_length").is_none());
}

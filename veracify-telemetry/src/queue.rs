//! Durable pending queues
//!
//! One order-preserving queue per event kind, stored as a JSON array in
//! the persistent store. The queue is the only resource mutated by two
//! independent actors (the recorder appends, the sync engine removes), so
//! every read-modify-write sequence goes through one shared lock.
//!
//! The engine's write-back after a cycle is a merge, never a blind
//! overwrite: events appended while a cycle's network round trip was in
//! flight are re-queued after the cycle's surviving (failed) events.

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::store::{keys, Store};

/// The two event kinds the engine delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Fact-check usage events
    Analytics,
    /// User feedback events
    Feedback,
}

impl QueueKind {
    /// Store key holding this queue
    pub fn key(&self) -> &'static str {
        match self {
            QueueKind::Analytics => keys::PENDING_ANALYTICS,
            QueueKind::Feedback => keys::PENDING_FEEDBACK,
        }
    }

    /// Both kinds, in delivery order
    pub fn all() -> [QueueKind; 2] {
        [QueueKind::Analytics, QueueKind::Feedback]
    }
}

/// Handle over the durable pending queues
#[derive(Clone)]
pub struct PendingQueues {
    store: Arc<dyn Store>,
    /// Serializes read-modify-write across recorder and engine
    lock: Arc<Mutex<()>>,
}

impl PendingQueues {
    /// Create a handle over the given store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append one event, persisting the updated queue before returning.
    ///
    /// Returns the new queue length. On failure the on-disk queue is left
    /// exactly as it was.
    pub fn append(&self, kind: QueueKind, event: serde_json::Value) -> Result<usize> {
        let _guard = self.lock.lock().unwrap();
        let mut queue = self.load(kind)?;
        queue.push(event);
        let len = queue.len();
        self.save(kind, &queue)?;
        Ok(len)
    }

    /// Current length of one queue
    pub fn len(&self, kind: QueueKind) -> Result<usize> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.load(kind)?.len())
    }

    /// Combined length across both queues
    pub fn total_len(&self) -> Result<usize> {
        let _guard = self.lock.lock().unwrap();
        let mut total = 0;
        for kind in QueueKind::all() {
            total += self.load(kind)?.len();
        }
        Ok(total)
    }

    /// Atomic snapshot of one queue's current contents
    pub fn snapshot(&self, kind: QueueKind) -> Result<Vec<serde_json::Value>> {
        let _guard = self.lock.lock().unwrap();
        self.load(kind)
    }

    /// Merge write-back after a sync cycle.
    ///
    /// `snapshot_len` is the length of the snapshot the cycle worked on;
    /// `failed` are the snapshot events that were not delivered, in their
    /// original relative order. The new queue is `failed` followed by any
    /// events appended after the snapshot was taken.
    pub fn replace_after_sync(
        &self,
        kind: QueueKind,
        snapshot_len: usize,
        failed: Vec<serde_json::Value>,
    ) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let live = self.load(kind)?;

        let mut next = failed;
        if live.len() > snapshot_len {
            next.extend_from_slice(&live[snapshot_len..]);
        }

        self.save(kind, &next)
    }

    fn load(&self, kind: QueueKind) -> Result<Vec<serde_json::Value>> {
        match self.store.get(kind.key())? {
            Some(serde_json::Value::Array(events)) => Ok(events),
            Some(other) => {
                tracing::warn!(
                    key = kind.key(),
                    value_type = %json_type(&other),
                    "Pending queue is not an array, treating as empty"
                );
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, kind: QueueKind, queue: &[serde_json::Value]) -> Result<()> {
        self.store
            .set(kind.key(), &serde_json::Value::Array(queue.to_vec()))
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

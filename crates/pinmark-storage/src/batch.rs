//! Batch queue.
//!
//! Coalesces operations issued within a short window into one backend call
//! per operation kind. A batch flushes when it reaches `batch_size` or when
//! the debounce timer, armed by the first enqueue since the last flush,
//! fires. A flush runs its groups in get, set, remove order:
//!
//! - gets: one call for the union of keys, each caller receives its subset
//! - sets: entries merged in enqueue order, so the last write to a key wins
//! - removes: one call for the union of keys
//!
//! When a grouped call fails, each operation of that group is replayed on
//! its own so one bad key fails only its own caller.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pinmark_types::{Records, StorageSettings};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::backend::{OpKind, StorageOp};
use crate::error::StorageError;
use crate::fallback::Served;

/// Outcome delivered to each enqueued caller.
pub type BatchResult = Result<Served<Records>, StorageError>;

/// Executes the operations a flush produces.
#[async_trait]
pub trait BatchDispatcher: Send + Sync + 'static {
    /// Run one caller's operation.
    async fn dispatch(&self, op: StorageOp) -> BatchResult;

    /// Run a group merged from several callers' operations. On failure the
    /// queue replays each member through `dispatch`.
    async fn dispatch_grouped(&self, op: StorageOp) -> BatchResult {
        self.dispatch(op).await
    }

    /// Called after a flush in which at least one operation succeeded.
    async fn after_flush(&self) {}
}

/// Flush triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush as soon as this many operations are pending
    pub batch_size: usize,

    /// Flush this long after the first enqueue since the last flush
    pub debounce: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            debounce: Duration::from_millis(100),
        }
    }
}

impl BatchConfig {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            debounce: settings.debounce(),
        }
    }
}

/// An operation waiting for the next flush. Consumed exactly once.
struct PendingOperation {
    op: StorageOp,
    enqueued_at_ms: i64,
    reply: oneshot::Sender<BatchResult>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingOperation>,
    /// Bumped on every drain; a timer armed for an older generation is stale
    generation: u64,
    timer_armed: bool,
}

impl QueueState {
    fn drain(&mut self) -> Vec<PendingOperation> {
        self.generation += 1;
        self.timer_armed = false;
        std::mem::take(&mut self.pending)
    }
}

struct Inner<D> {
    dispatcher: Arc<D>,
    config: BatchConfig,
    state: Mutex<QueueState>,
}

/// Debounced, size-bounded operation buffer. Cloning yields another handle
/// to the same queue.
pub struct BatchQueue<D: BatchDispatcher> {
    inner: Arc<Inner<D>>,
}

impl<D: BatchDispatcher> Clone for BatchQueue<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: BatchDispatcher> BatchQueue<D> {
    pub fn new(dispatcher: Arc<D>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Buffer `op` for the next flush. The receiver resolves once the flush
    /// that consumes it has settled the operation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, op: StorageOp) -> oneshot::Receiver<BatchResult> {
        let (reply, receiver) = oneshot::channel();
        let kind = op.kind();

        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(_) => {
                error!("Batch queue lock poisoned, rejecting operation");
                let _ = reply.send(Err(StorageError::unavailable(
                    "batch-queue",
                    "queue lock poisoned",
                )));
                return receiver;
            }
        };

        state.pending.push(PendingOperation {
            op,
            enqueued_at_ms: chrono::Utc::now().timestamp_millis(),
            reply,
        });
        debug!(kind = %kind, pending = state.pending.len(), "Operation enqueued");

        if state.pending.len() >= self.inner.config.batch_size.max(1) {
            let batch = state.drain();
            drop(state);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_batch(batch, "size").await });
        } else if !state.timer_armed {
            state.timer_armed = true;
            let generation = state.generation;
            drop(state);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.config.debounce).await;
                if let Some(batch) = inner.drain_generation(generation) {
                    inner.run_batch(batch, "debounce").await;
                }
            });
        }

        receiver
    }

    /// Enqueue `op` and wait for its result.
    pub async fn submit(&self, op: StorageOp) -> BatchResult {
        match self.enqueue(op).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::unavailable(
                "batch-queue",
                "flush ended without settling the operation",
            )),
        }
    }

    /// Flush everything pending now. Returns the number of operations
    /// flushed.
    pub async fn flush(&self) -> usize {
        let batch = self.inner.drain_all();
        let flushed = batch.len();
        self.inner.run_batch(batch, "explicit").await;
        flushed
    }

    pub fn pending_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|state| state.pending.len())
            .unwrap_or(0)
    }
}

impl<D: BatchDispatcher> Inner<D> {
    fn drain_all(&self) -> Vec<PendingOperation> {
        self.state
            .lock()
            .map(|mut state| state.drain())
            .unwrap_or_default()
    }

    fn drain_generation(&self, generation: u64) -> Option<Vec<PendingOperation>> {
        let mut state = self.state.lock().ok()?;
        if state.generation != generation {
            debug!(generation, "Debounce timer superseded by an earlier flush");
            return None;
        }
        Some(state.drain())
    }

    async fn run_batch(&self, batch: Vec<PendingOperation>, trigger: &'static str) {
        if batch.is_empty() {
            return;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let oldest_ms = batch
            .iter()
            .map(|pending| pending.enqueued_at_ms)
            .min()
            .unwrap_or(now_ms);
        info!(
            operations = batch.len(),
            trigger,
            waited_ms = now_ms.saturating_sub(oldest_ms),
            "Flushing batch"
        );

        let mut gets = Vec::new();
        let mut sets = Vec::new();
        let mut removes = Vec::new();
        for pending in batch {
            match pending.op.kind() {
                OpKind::Get => gets.push(pending),
                OpKind::Set => sets.push(pending),
                OpKind::Remove => removes.push(pending),
            }
        }

        let mut succeeded = false;
        succeeded |= self.flush_group(OpKind::Get, gets).await;
        succeeded |= self.flush_group(OpKind::Set, sets).await;
        succeeded |= self.flush_group(OpKind::Remove, removes).await;

        if succeeded {
            self.dispatcher.after_flush().await;
        }
    }

    /// Run one kind's group. Returns whether any operation succeeded.
    async fn flush_group(&self, kind: OpKind, mut group: Vec<PendingOperation>) -> bool {
        if group.len() <= 1 {
            let Some(pending) = group.pop() else {
                return false;
            };
            let result = self.dispatcher.dispatch(pending.op).await;
            let succeeded = result.is_ok();
            let _ = pending.reply.send(result);
            return succeeded;
        }

        let operations = group.len();
        match self.dispatcher.dispatch_grouped(merge_group(kind, &group)).await {
            Ok(served) => {
                debug!(kind = %kind, operations, "Grouped call succeeded");
                for pending in group {
                    let result = match &pending.op {
                        StorageOp::Get(keys) => {
                            served.clone().map(|records| subset(records, keys))
                        }
                        _ => served.clone(),
                    };
                    let _ = pending.reply.send(Ok(result));
                }
                true
            }
            Err(e) => {
                warn!(
                    kind = %kind,
                    operations,
                    error = %e,
                    "Grouped call failed, replaying operations individually"
                );
                let mut succeeded = false;
                for pending in group {
                    let result = self.dispatcher.dispatch(pending.op).await;
                    succeeded |= result.is_ok();
                    let _ = pending.reply.send(result);
                }
                succeeded
            }
        }
    }
}

/// Combine a same-kind group into one operation.
fn merge_group(kind: OpKind, group: &[PendingOperation]) -> StorageOp {
    match kind {
        OpKind::Get => StorageOp::Get(union_keys(group)),
        OpKind::Remove => StorageOp::Remove(union_keys(group)),
        OpKind::Set => {
            let mut merged = Records::new();
            for pending in group {
                if let StorageOp::Set(entries) = &pending.op {
                    merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            StorageOp::Set(merged)
        }
    }
}

/// Keys across the group, first occurrence order, no duplicates.
fn union_keys(group: &[PendingOperation]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for pending in group {
        for key in pending.op.keys() {
            if seen.insert(key) {
                keys.push(key.to_string());
            }
        }
    }
    keys
}

fn subset(mut records: Records, keys: &[String]) -> Records {
    let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
    records.retain(|key, _| wanted.contains(key.as_str()));
    records
}

//! Fire-and-forget mirroring of live state into the key-value store
//!
//! In-memory state stays authoritative. Writes are queued on a channel and
//! applied in order by a background task; failures are retried with
//! exponential backoff, then logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::kv::KvStore;

#[derive(Debug)]
enum WriteOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
}

impl WriteOp {
    fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Del { key } => key,
        }
    }
}

/// Backoff schedule for failed writes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Handle for queueing writes; cheap to clone
#[derive(Clone, Default)]
pub struct Persistence {
    tx: Option<mpsc::UnboundedSender<WriteOp>>,
    store: Option<Arc<dyn KvStore>>,
}

impl Persistence {
    /// Memory-only mode: every write is a no-op
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Start the writer task for `store`
    pub fn spawn(
        store: Arc<dyn KvStore>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store.clone(), rx, retry, cancel));
        (
            Self {
                tx: Some(tx),
                store: Some(store),
            },
            handle,
        )
    }

    /// Store for direct reads (restore, stats lookups), if any
    pub fn store(&self) -> Option<&Arc<dyn KvStore>> {
        self.store.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) {
        let Some(tx) = &self.tx else { return };
        let key = key.into();
        match serde_json::to_string(value) {
            Ok(value) => {
                if tx.send(WriteOp::Set { key, value, ttl }).is_err() {
                    debug!("Persistence writer stopped, dropping write");
                }
            }
            Err(e) => error!(key = %key, error = %e, "Failed to encode value for store"),
        }
    }

    pub fn del(&self, key: impl Into<String>) {
        let Some(tx) = &self.tx else { return };
        if tx.send(WriteOp::Del { key: key.into() }).is_err() {
            debug!("Persistence writer stopped, dropping delete");
        }
    }
}

async fn run_writer(
    store: Arc<dyn KvStore>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    loop {
        let op = tokio::select! {
            _ = cancel.cancelled() => break,
            op = rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };
        apply_with_retry(store.as_ref(), &op, retry, &cancel).await;
    }

    // Flush what is already queued so a clean shutdown loses nothing
    rx.close();
    while let Some(op) = rx.recv().await {
        apply_with_retry(store.as_ref(), &op, RetryPolicy { attempts: 1, ..retry }, &cancel).await;
    }
    debug!("Persistence writer stopped");
}

async fn apply_with_retry(
    store: &dyn KvStore,
    op: &WriteOp,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> bool {
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        let result = match op {
            WriteOp::Set { key, value, ttl } => store.set(key, value, *ttl).await,
            WriteOp::Del { key } => store.del(key).await.map(|_| ()),
        };

        match result {
            Ok(()) => return true,
            Err(e) if attempt < attempts => {
                let delay = retry.delay_for(attempt);
                warn!(key = %op.key(), attempt, error = %e, ?delay, "Store write failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(key = %op.key(), error = %e, "Store write failed, continuing in memory");
            }
        }
    }
    false
}

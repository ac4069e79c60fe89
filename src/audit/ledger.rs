//! Hash-Chain Ledger
//!
//! Single writer for the audit chain. Every append is serialized through
//! one lock that owns the chain tail, sealed against the current tail hash,
//! made durable, and only then published.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::broadcast::Broadcaster;
use crate::audit::entry::{AuditEnvelope, AuditRecord, RecordId, GENESIS_HASH};
use crate::database::LedgerStore;
use crate::error::{AuditError, AuditResult};

/// Source of record timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where the next record attaches
#[derive(Debug, Clone)]
struct ChainTail {
    next_id: RecordId,
    hash: String,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ChainTail {
    fn from_last(last: Option<&AuditRecord>) -> Self {
        match last {
            Some(record) => Self {
                next_id: record.id.next(),
                hash: record.hash.clone(),
                last_timestamp: Some(record.timestamp),
            },
            None => Self {
                next_id: RecordId::FIRST,
                hash: GENESIS_HASH.to_string(),
                last_timestamp: None,
            },
        }
    }
}

struct LedgerInner {
    store: Arc<dyn LedgerStore>,
    tail: Mutex<ChainTail>,
    /// Highest durable id, 0 when empty. Readers snapshot this instead of taking the lock.
    committed: AtomicU64,
    clock: Arc<dyn Clock>,
    broadcaster: Broadcaster,
}

/// Append-only audit chain over a [`LedgerStore`]
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<LedgerInner>,
}

impl Ledger {
    /// Open the ledger on a store, resuming from its last record
    pub async fn open(store: Arc<dyn LedgerStore>, broadcaster: Broadcaster) -> AuditResult<Self> {
        Self::open_with_clock(store, broadcaster, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        store: Arc<dyn LedgerStore>,
        broadcaster: Broadcaster,
        clock: Arc<dyn Clock>,
    ) -> AuditResult<Self> {
        let last = store.last().await?;
        let tail = ChainTail::from_last(last.as_ref());
        let committed = last.as_ref().map(|r| r.id.value()).unwrap_or(0);

        match &last {
            Some(record) => info!(
                "Ledger resumed at record {} (tail {})",
                record.id, record.hash
            ),
            None => info!("Ledger opened empty; next record is genesis"),
        }

        Ok(Self {
            inner: Arc::new(LedgerInner {
                store,
                tail: Mutex::new(tail),
                committed: AtomicU64::new(committed),
                clock,
                broadcaster,
            }),
        })
    }

    /// Append an event to the chain.
    ///
    /// The append runs to completion on its own task, so a caller that stops
    /// waiting (a timeout, a dropped request) cannot leave a half-applied
    /// tail behind. In that case the outcome is unknown to the caller, and a
    /// retry produces a new, distinct record.
    pub async fn append(&self, envelope: AuditEnvelope) -> AuditResult<AuditRecord> {
        envelope.validate()?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.append(envelope).await })
            .await
            .map_err(|e| AuditError::Durability(format!("Append task failed: {}", e)))?
    }

    /// Highest committed record id, `None` while the chain is empty
    pub fn committed_head(&self) -> Option<RecordId> {
        match self.inner.committed.load(Ordering::Acquire) {
            0 => None,
            id => Some(RecordId(id)),
        }
    }

    /// Hash the next append will chain onto
    pub async fn tail_hash(&self) -> String {
        self.inner.tail.lock().await.hash.clone()
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.inner.store.as_ref()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }
}

impl LedgerInner {
    async fn append(&self, envelope: AuditEnvelope) -> AuditResult<AuditRecord> {
        let mut tail = self.tail.lock().await;

        // Clamp to the previous timestamp so the chain never goes backwards in time
        let now = self.clock.now();
        let timestamp = match tail.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };

        let record = AuditRecord::seal(tail.next_id, envelope, timestamp, tail.hash.clone());

        if let Err(e) = self.store.append(&record).await {
            warn!("Failed to persist audit record {}: {}", record.id, e);
            return Err(match e {
                e @ AuditError::Durability(_) => e,
                other => AuditError::Durability(other.to_string()),
            });
        }

        tail.next_id = record.id.next();
        tail.hash = record.hash.clone();
        tail.last_timestamp = Some(record.timestamp);
        self.committed.store(record.id.value(), Ordering::Release);

        debug!("Appended audit record: {}", record.summary());

        // Still under the lock so subscribers see chain order
        let delivered = self.broadcaster.publish(Arc::new(record.clone()));
        if delivered > 0 {
            debug!("Record {} queued for {} live subscribers", record.id, delivered);
        }

        Ok(record)
    }
}

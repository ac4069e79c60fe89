//! Ledger Storage
//!
//! Durable backends for the audit chain. A store only persists and reads
//! records back; hashing, ordering and verification live in the ledger.

pub mod jsonl;
pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::audit::entry::{AuditRecord, RecordId};
use crate::config::{StorageBackend, StorageConfig};
use crate::error::{AuditError, AuditResult};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Append-only record storage.
///
/// Records are written strictly in id order starting at [`RecordId::FIRST`];
/// there is no update or delete.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Durably persist the next record of the chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Durability`] if the record could not be made durable.
    async fn append(&self, record: &AuditRecord) -> AuditResult<()>;

    /// The most recently persisted record
    async fn last(&self) -> AuditResult<Option<AuditRecord>>;

    async fn get(&self, id: RecordId) -> AuditResult<Option<AuditRecord>>;

    /// Records with `from <= id <= through`, ascending, at most `limit`
    async fn range(
        &self,
        from: RecordId,
        through: RecordId,
        limit: usize,
    ) -> AuditResult<Vec<AuditRecord>>;

    /// Records with `id < before`, descending, at most `limit`
    async fn scan_desc(&self, before: RecordId, limit: usize) -> AuditResult<Vec<AuditRecord>>;

    async fn count(&self) -> AuditResult<u64>;
}

/// Open the backend selected in configuration
pub async fn open_store(config: &StorageConfig) -> AuditResult<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Jsonl => {
            let path = config.path.as_deref().ok_or_else(|| {
                AuditError::Config("storage.path is required for the jsonl backend".to_string())
            })?;
            Arc::new(JsonlStore::open(path).await?)
        }
        StorageBackend::Sqlite => {
            let path = config.path.as_deref().ok_or_else(|| {
                AuditError::Config("storage.path is required for the sqlite backend".to_string())
            })?;
            let store = SqliteStore::connect(path).await?;
            store.run_migrations().await?;
            Arc::new(store)
        }
    };

    info!("Opened {:?} ledger store", config.backend);
    Ok(store)
}

/// Slice helpers shared by the in-memory backends, where `records[i].id == i + 1`
pub(crate) fn slice_range(
    records: &[AuditRecord],
    from: RecordId,
    through: RecordId,
    limit: usize,
) -> Vec<AuditRecord> {
    let start = (from.value().max(1) - 1) as usize;
    let end = (through.value() as usize).min(records.len());
    if start >= end {
        return Vec::new();
    }
    records[start..end].iter().take(limit).cloned().collect()
}

pub(crate) fn slice_desc(records: &[AuditRecord], before: RecordId, limit: usize) -> Vec<AuditRecord> {
    let end = (before.value().saturating_sub(1) as usize).min(records.len());
    records[..end].iter().rev().take(limit).cloned().collect()
}

/// Guard against gaps or reordering in the id sequence
pub(crate) fn check_next_id(expected: u64, record: &AuditRecord) -> AuditResult<()> {
    if record.id.value() != expected {
        return Err(AuditError::Durability(format!(
            "Out-of-order append: expected record {}, got {}",
            expected, record.id
        )));
    }
    Ok(())
}

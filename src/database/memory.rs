//! In-memory ledger store, for tests and ephemeral deployments.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::audit::entry::{AuditRecord, RecordId};
use crate::database::{check_next_id, slice_desc, slice_range, LedgerStore};
use crate::error::AuditResult;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store over an existing chain, e.g. one exported from another backend.
    ///
    /// Records are taken as-is; run the verifier to find out whether they hold up.
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Copy of every stored record, in chain order
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        let mut records = self.records.write().await;
        check_next_id(records.len() as u64 + 1, record)?;
        records.push(record.clone());
        Ok(())
    }

    async fn last(&self) -> AuditResult<Option<AuditRecord>> {
        Ok(self.records.read().await.last().cloned())
    }

    async fn get(&self, id: RecordId) -> AuditResult<Option<AuditRecord>> {
        let records = self.records.read().await;
        Ok(id
            .value()
            .checked_sub(1)
            .and_then(|index| records.get(index as usize))
            .cloned())
    }

    async fn range(
        &self,
        from: RecordId,
        through: RecordId,
        limit: usize,
    ) -> AuditResult<Vec<AuditRecord>> {
        Ok(slice_range(&self.records.read().await, from, through, limit))
    }

    async fn scan_desc(&self, before: RecordId, limit: usize) -> AuditResult<Vec<AuditRecord>> {
        Ok(slice_desc(&self.records.read().await, before, limit))
    }

    async fn count(&self) -> AuditResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}

//! Audit Log Verification
//!
//! Recomputes record hashes and chain links to prove the ledger is intact,
//! or to point at the first record where it is not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info};

use crate::audit::entry::{AuditRecord, RecordId, GENESIS_HASH};
use crate::database::LedgerStore;
use crate::error::{AuditError, AuditResult};

/// Why a record failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stored hash does not match the recomputed one
    HashMismatch,
    /// `previous_hash` does not point at the predecessor
    BrokenLink,
    /// Timestamp earlier than the predecessor's
    TimestampRegression,
    /// A record id inside the verified range is absent
    MissingRecord,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::HashMismatch => "hash mismatch",
            Self::BrokenLink => "broken chain link",
            Self::TimestampRegression => "timestamp regression",
            Self::MissingRecord => "missing record",
        };
        f.write_str(text)
    }
}

/// Outcome of one verification run over a committed prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub first_tampered_id: Option<RecordId>,
    pub failure: Option<FailureKind>,
    pub records_checked: u64,
    /// Where the run started; `None` means genesis
    pub from_id: Option<RecordId>,
    /// Last id covered by the run; `None` for an empty ledger
    pub through_id: Option<RecordId>,
}

impl VerificationReport {
    /// Turn a failed report into [`AuditError::TamperDetected`]
    pub fn into_result(self) -> AuditResult<Self> {
        match (self.valid, self.first_tampered_id, self.failure) {
            (false, Some(id), Some(kind)) => Err(AuditError::TamperDetected {
                id: id.value(),
                kind,
            }),
            _ => Ok(self),
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match (self.first_tampered_id, self.failure) {
            (Some(id), Some(kind)) if !self.valid => format!(
                "Audit chain TAMPERED at record {} ({}) after checking {} records",
                id, kind, self.records_checked
            ),
            _ => format!(
                "Audit chain verified ({} records checked)",
                self.records_checked
            ),
        }
    }
}

/// Trusted starting point of a verification run
#[derive(Debug, Clone)]
pub struct ChainAnchor {
    pub next_id: RecordId,
    pub previous_hash: String,
    pub previous_timestamp: Option<DateTime<Utc>>,
}

impl ChainAnchor {
    pub fn genesis() -> Self {
        Self {
            next_id: RecordId::FIRST,
            previous_hash: GENESIS_HASH.to_string(),
            previous_timestamp: None,
        }
    }

    /// Anchor on an already-verified record: the run resumes right after it
    pub fn after(record: &AuditRecord) -> Self {
        Self {
            next_id: record.id.next(),
            previous_hash: record.hash.clone(),
            previous_timestamp: Some(record.timestamp),
        }
    }
}

/// Incremental chain walker; feed records in id order
pub struct ChainVerifier {
    expected: ChainAnchor,
    checked: u64,
}

impl ChainVerifier {
    pub fn new(anchor: ChainAnchor) -> Self {
        Self {
            expected: anchor,
            checked: 0,
        }
    }

    /// Check the next record, returning the failing id and reason on mismatch
    pub fn check(&mut self, record: &AuditRecord) -> Result<(), (RecordId, FailureKind)> {
        self.checked += 1;

        if record.id != self.expected.next_id {
            return Err((self.expected.next_id, FailureKind::MissingRecord));
        }

        if record.previous_hash != self.expected.previous_hash {
            return Err((record.id, FailureKind::BrokenLink));
        }

        if !record.verify_hash() {
            return Err((record.id, FailureKind::HashMismatch));
        }

        if let Some(previous) = self.expected.previous_timestamp {
            if record.timestamp < previous {
                return Err((record.id, FailureKind::TimestampRegression));
            }
        }

        self.expected = ChainAnchor::after(record);
        Ok(())
    }

    pub fn records_checked(&self) -> u64 {
        self.checked
    }

    /// Id the walker expects next
    pub fn next_id(&self) -> RecordId {
        self.expected.next_id
    }
}

/// Verify a complete, in-order slice of records starting at `anchor`
pub fn verify_records(records: &[AuditRecord], anchor: ChainAnchor) -> VerificationReport {
    let from_id = anchor_from_id(&anchor);
    let mut verifier = ChainVerifier::new(anchor);

    for record in records {
        if let Err((id, kind)) = verifier.check(record) {
            return tampered(from_id, id, kind, verifier.records_checked());
        }
    }

    valid(from_id, records.last().map(|r| r.id), verifier.records_checked())
}

/// Verify the stored chain from `from_id` (or genesis) through `through`.
///
/// Reads in batches of `batch_size`; records appended beyond `through`
/// during the run are not examined.
pub async fn verify_store(
    store: &dyn LedgerStore,
    from_id: Option<RecordId>,
    through: Option<RecordId>,
    batch_size: usize,
) -> AuditResult<VerificationReport> {
    let Some(through) = through else {
        return match from_id {
            Some(id) => Err(AuditError::unknown_record(id.value())),
            None => Ok(valid(None, None, 0)),
        };
    };

    let anchor = match from_id {
        None => ChainAnchor::genesis(),
        Some(id) if id.value() == 0 || id > through => {
            return Err(AuditError::unknown_record(id.value()));
        }
        Some(id) => match id.prev() {
            None => ChainAnchor::genesis(),
            Some(prev) => {
                let checkpoint = store
                    .get(prev)
                    .await?
                    .ok_or_else(|| AuditError::unknown_record(prev.value()))?;
                ChainAnchor::after(&checkpoint)
            }
        },
    };

    let start = anchor.next_id;
    let mut verifier = ChainVerifier::new(anchor);
    let batch_size = batch_size.max(1);

    while verifier.next_id() <= through {
        let batch = store.range(verifier.next_id(), through, batch_size).await?;
        if batch.is_empty() {
            // Committed head says the record exists but storage has nothing
            let report = tampered(
                from_id,
                verifier.next_id(),
                FailureKind::MissingRecord,
                verifier.records_checked(),
            );
            return Ok(log_report(report));
        }

        debug!("Verifying {} records starting at {}", batch.len(), batch[0].id);
        for record in &batch {
            if let Err((id, kind)) = verifier.check(record) {
                let report = tampered(from_id, id, kind, verifier.records_checked());
                return Ok(log_report(report));
            }
        }
    }

    debug!("Verified records {} through {}", start, through);
    Ok(log_report(valid(
        from_id,
        Some(through),
        verifier.records_checked(),
    )))
}

fn anchor_from_id(anchor: &ChainAnchor) -> Option<RecordId> {
    if anchor.next_id == RecordId::FIRST {
        None
    } else {
        Some(anchor.next_id)
    }
}

fn valid(from_id: Option<RecordId>, through_id: Option<RecordId>, checked: u64) -> VerificationReport {
    VerificationReport {
        valid: true,
        first_tampered_id: None,
        failure: None,
        records_checked: checked,
        from_id,
        through_id,
    }
}

fn tampered(
    from_id: Option<RecordId>,
    id: RecordId,
    kind: FailureKind,
    checked: u64,
) -> VerificationReport {
    VerificationReport {
        valid: false,
        first_tampered_id: Some(id),
        failure: Some(kind),
        records_checked: checked,
        from_id,
        through_id: None,
    }
}

fn log_report(report: VerificationReport) -> VerificationReport {
    if report.valid {
        info!("{}", report.summary());
    } else {
        error!("{}", report.summary());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::action::AuditAction;
    use crate::audit::entry::AuditEnvelope;
    use crate::database::MemoryStore;
    use chrono::Duration;

    fn build_chain(len: u64) -> Vec<AuditRecord> {
        let start = Utc::now();
        let mut previous = GENESIS_HASH.to_string();
        (1..=len)
            .map(|id| {
                let record = AuditRecord::seal(
                    RecordId(id),
                    AuditEnvelope::new(AuditAction::AiQuery, format!("chat/{}", id))
                        .actor("user-1", "Dr. Rivera"),
                    start + Duration::milliseconds(id as i64),
                    previous.clone(),
                );
                previous = record.hash.clone();
                record
            })
            .collect()
    }

    #[test]
    fn test_verify_valid_chain() {
        let records = build_chain(5);
        let report = verify_records(&records, ChainAnchor::genesis());

        assert!(report.valid);
        assert_eq!(report.records_checked, 5);
        assert_eq!(report.through_id, Some(RecordId(5)));
        assert!(report.clone().into_result().is_ok());
    }

    #[test]
    fn test_tampered_field_is_localized() {
        let mut records = build_chain(5);
        records[2].resource.push('x');

        let report = verify_records(&records, ChainAnchor::genesis());
        assert!(!report.valid);
        assert_eq!(report.first_tampered_id, Some(RecordId(3)));
        assert_eq!(report.failure, Some(FailureKind::HashMismatch));
        assert_eq!(report.records_checked, 3);
    }

    #[test]
    fn test_rewritten_hash_breaks_next_link_but_reports_itself() {
        let mut records = build_chain(4);
        records[1].hash = "f".repeat(64);

        let report = verify_records(&records, ChainAnchor::genesis());
        assert_eq!(report.first_tampered_id, Some(RecordId(2)));
        assert_eq!(report.failure, Some(FailureKind::HashMismatch));
    }

    #[test]
    fn test_removed_record_is_reported_missing() {
        let mut records = build_chain(4);
        records.remove(1);

        let report = verify_records(&records, ChainAnchor::genesis());
        assert_eq!(report.first_tampered_id, Some(RecordId(2)));
        assert_eq!(report.failure, Some(FailureKind::MissingRecord));
    }

    #[test]
    fn test_rehashed_backdated_record_is_caught() {
        let mut records = build_chain(3);
        let backdated = AuditRecord::seal(
            RecordId(3),
            AuditEnvelope::new(AuditAction::AiQuery, "chat/3"),
            records[0].timestamp - Duration::days(1),
            records[1].hash.clone(),
        );
        records[2] = backdated;

        let report = verify_records(&records, ChainAnchor::genesis());
        assert_eq!(report.first_tampered_id, Some(RecordId(3)));
        assert_eq!(report.failure, Some(FailureKind::TimestampRegression));
    }

    #[test]
    fn test_into_result_raises_tamper_detected() {
        let mut records = build_chain(2);
        records[0].previous_hash = "1".to_string();

        let report = verify_records(&records, ChainAnchor::genesis());
        match report.into_result() {
            Err(AuditError::TamperDetected { id, kind }) => {
                assert_eq!(id, 1);
                assert_eq!(kind, FailureKind::BrokenLink);
            }
            other => panic!("expected tamper, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_store_in_small_batches() {
        let store = MemoryStore::from_records(build_chain(23));
        let report = verify_store(&store, None, Some(RecordId(23)), 5).await.unwrap();

        assert!(report.valid);
        assert_eq!(report.records_checked, 23);
    }

    #[tokio::test]
    async fn test_verify_store_from_checkpoint() {
        let store = MemoryStore::from_records(build_chain(10));
        let report = verify_store(&store, Some(RecordId(6)), Some(RecordId(10)), 3)
            .await
            .unwrap();

        assert!(report.valid);
        assert_eq!(report.records_checked, 5);
        assert_eq!(report.from_id, Some(RecordId(6)));
    }

    #[tokio::test]
    async fn test_verify_store_respects_snapshot_bound() {
        let store = MemoryStore::from_records(build_chain(10));
        let report = verify_store(&store, None, Some(RecordId(4)), 100).await.unwrap();

        assert_eq!(report.records_checked, 4);
        assert_eq!(report.through_id, Some(RecordId(4)));
    }

    #[tokio::test]
    async fn test_verify_store_unknown_checkpoint() {
        let store = MemoryStore::from_records(build_chain(3));
        let result = verify_store(&store, Some(RecordId(9)), Some(RecordId(3)), 10).await;
        assert!(matches!(result, Err(AuditError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_verify_store_empty_ledger() {
        let store = MemoryStore::new();
        let report = verify_store(&store, None, None, 10).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.records_checked, 0);
    }

    #[tokio::test]
    async fn test_verify_store_truncated_storage() {
        let store = MemoryStore::from_records(build_chain(3));
        let report = verify_store(&store, None, Some(RecordId(5)), 10).await.unwrap();

        assert!(!report.valid);
        assert_eq!(report.first_tampered_id, Some(RecordId(4)));
        assert_eq!(report.failure, Some(FailureKind::MissingRecord));
    }
}

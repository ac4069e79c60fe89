//! Audit Service
//!
//! Single entry point used by the HTTP layer and embedding applications.
//! Chain state belongs to the [`Ledger`]; the service only remembers what
//! completed verification runs established about it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::audit::broadcast::{Broadcaster, Subscription};
use crate::audit::entry::{AuditEnvelope, AuditRecord, RecordId};
use crate::audit::ledger::Ledger;
use crate::audit::query::{run_query, AuditQuery, PageLimits, QueryPage};
use crate::audit::stats::{collect_statistics, AuditStatistics, IntegrityStatus, StatsWindow};
use crate::audit::verify::{verify_store, VerificationReport};
use crate::audit::view::AuditRecordView;
use crate::config::AppConfig;
use crate::database::open_store;
use crate::error::AuditResult;

/// Tunables for reads over the chain
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Records fetched per storage round-trip while verifying or scanning
    pub batch_size: usize,
    pub page_limits: PageLimits,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            page_limits: PageLimits::default(),
        }
    }
}

/// One completed verification run
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRun {
    pub report: VerificationReport,
    /// Committed head the run was bounded by
    pub head: Option<RecordId>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationRun {
    /// Whether the run walked the chain from genesis
    pub fn is_full(&self) -> bool {
        self.report
            .from_id
            .map(|from| from == RecordId::FIRST)
            .unwrap_or(true)
    }

    /// Whether this run vouches for `id`: a valid run from genesis that reached it
    pub fn covers(&self, id: RecordId) -> bool {
        self.report.valid
            && self.is_full()
            && self.report.through_id.map(|through| id <= through).unwrap_or(false)
    }
}

/// What completed runs have established about the chain.
///
/// Only full runs can vouch for records. A tamper finding from any run
/// sticks until a full run over a head at or past the tampered id comes
/// back clean.
#[derive(Debug, Default)]
struct IntegrityState {
    full: Option<VerificationRun>,
    tampered: Option<VerificationRun>,
}

impl IntegrityState {
    fn record(&mut self, run: &VerificationRun) {
        if !run.report.valid {
            let earlier = match (&self.tampered, run.report.first_tampered_id) {
                (Some(known), Some(found)) => known
                    .report
                    .first_tampered_id
                    .map(|known_id| found < known_id)
                    .unwrap_or(true),
                _ => true,
            };
            if earlier {
                self.tampered = Some(run.clone());
            }
        }

        if !run.is_full() {
            return;
        }

        // Overlapping runs can finish out of order; the wider snapshot wins
        let newer = self
            .full
            .as_ref()
            .map(|current| run.head >= current.head)
            .unwrap_or(true);
        if !newer {
            return;
        }

        if run.report.valid {
            let clears = self
                .tampered
                .as_ref()
                .and_then(|t| t.report.first_tampered_id)
                .map(|id| run.head.map(|head| head >= id).unwrap_or(false))
                .unwrap_or(true);
            if clears {
                self.tampered = None;
            }
        }
        self.full = Some(run.clone());
    }

    fn status(&self) -> IntegrityStatus {
        match (&self.tampered, &self.full) {
            (Some(_), _) => IntegrityStatus::Tampered,
            (None, Some(run)) if run.report.valid => IntegrityStatus::Verified,
            _ => IntegrityStatus::Unverified,
        }
    }

    fn vouches_for(&self, id: RecordId) -> bool {
        let before_tamper = self
            .tampered
            .as_ref()
            .and_then(|t| t.report.first_tampered_id)
            .map(|tampered_id| id < tampered_id)
            .unwrap_or(true);
        before_tamper && self.full.as_ref().map(|run| run.covers(id)).unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct AuditService {
    ledger: Ledger,
    settings: ServiceSettings,
    integrity: Arc<RwLock<IntegrityState>>,
}

impl AuditService {
    pub fn new(ledger: Ledger, settings: ServiceSettings) -> Self {
        Self {
            ledger,
            settings,
            integrity: Arc::new(RwLock::new(IntegrityState::default())),
        }
    }

    /// Open the configured store and resume the chain on it
    pub async fn from_config(config: &AppConfig) -> AuditResult<Self> {
        let store = open_store(&config.storage).await?;
        let broadcaster = Broadcaster::new(config.broadcast.subscriber_buffer);
        let ledger = Ledger::open(store, broadcaster).await?;

        Ok(Self::new(
            ledger,
            ServiceSettings {
                batch_size: config.ledger.verify_batch_size,
                page_limits: PageLimits {
                    default: config.ledger.default_page_size,
                    max: config.ledger.max_page_size,
                },
            },
        ))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    /// Append an event to the chain
    pub async fn append(&self, envelope: AuditEnvelope) -> AuditResult<AuditRecord> {
        self.ledger.append(envelope).await
    }

    /// Verify the committed prefix, from `from_id` or genesis.
    ///
    /// A tampered chain is a successful run with `valid == false`; errors
    /// mean the run itself could not complete.
    pub async fn verify(&self, from_id: Option<RecordId>) -> AuditResult<VerificationRun> {
        let head = self.ledger.committed_head();
        let report = verify_store(
            self.ledger.store(),
            from_id,
            head,
            self.settings.batch_size,
        )
        .await?;

        let run = VerificationRun {
            report,
            head,
            verified_at: Utc::now(),
        };
        self.integrity.write().await.record(&run);
        Ok(run)
    }

    /// Like [`verify`](Self::verify), but a broken chain is an `Err(TamperDetected)`
    pub async fn verify_strict(&self, from_id: Option<RecordId>) -> AuditResult<VerificationReport> {
        self.verify(from_id).await?.report.into_result()
    }

    /// Latest full run, ordered by the head it covered
    pub async fn last_verification(&self) -> Option<VerificationRun> {
        self.integrity.read().await.full.clone()
    }

    pub async fn integrity_status(&self) -> IntegrityStatus {
        self.integrity.read().await.status()
    }

    /// Newest-first page over the committed prefix
    pub async fn query(&self, query: &AuditQuery) -> AuditResult<QueryPage> {
        run_query(
            self.ledger.store(),
            self.ledger.committed_head(),
            query,
            self.settings.page_limits,
            self.settings.batch_size,
        )
        .await
    }

    /// Live feed of records appended from now on
    pub fn subscribe(&self) -> Subscription {
        self.ledger.broadcaster().subscribe()
    }

    /// Summarize the records whose timestamps fall in `window`
    pub async fn statistics(&self, window: StatsWindow) -> AuditResult<AuditStatistics> {
        let builder = collect_statistics(
            self.ledger.store(),
            self.ledger.committed_head(),
            Utc::now(),
            window,
            self.settings.batch_size,
        )
        .await?;
        let stats = builder.finish(self.integrity_status().await);

        info!(
            "Audit statistics: {} records, {} PHI accesses, integrity {:?}",
            stats.total_logs, stats.phi_access_count, stats.integrity_status
        );
        Ok(stats)
    }

    /// Project a record for clients
    pub async fn view(&self, record: &AuditRecord) -> AuditRecordView {
        let verified = self.integrity.read().await.vouches_for(record.id);
        AuditRecordView::new(record, verified)
    }

    pub async fn views(&self, records: &[AuditRecord]) -> Vec<AuditRecordView> {
        let integrity = self.integrity.read().await;
        records
            .iter()
            .map(|record| AuditRecordView::new(record, integrity.vouches_for(record.id)))
            .collect()
    }
}

//! Audit Statistics
//!
//! Summary counts recomputed from the committed chain on every request.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::audit::action::{AuditAction, SeverityClass};
use crate::audit::entry::{AuditRecord, RecordId};
use crate::database::LedgerStore;
use crate::error::{AuditError, AuditResult};

/// Days covered when a request names no start
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Latest known verification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    /// No verification has run yet
    Unverified,
    Verified,
    Tampered,
}

/// Inclusive time range a statistics request summarizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StatsWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AuditResult<Self> {
        if start > end {
            return Err(AuditError::Validation(format!(
                "Invalid date range: {} is after {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Fill in missing bounds: `end` defaults to `now`, `start` to
    /// [`DEFAULT_WINDOW_DAYS`] before `now`
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AuditResult<Self> {
        Self::new(
            start.unwrap_or(now - Duration::days(DEFAULT_WINDOW_DAYS)),
            end.unwrap_or(now),
        )
    }

    /// The default window ending at `now`
    pub fn recent(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(DEFAULT_WINDOW_DAYS),
            end: now,
        }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub date_range: StatsWindow,
    pub total_logs: u64,
    pub today_logs: u64,
    pub phi_access_count: u64,
    pub security_event_count: u64,
    pub login_count: u64,
    pub logs_by_action: BTreeMap<String, u64>,
    pub logs_by_severity: BTreeMap<String, u64>,
    /// Keyed by actor id; system events are not counted here
    pub logs_by_user: BTreeMap<String, u64>,
    pub integrity_status: IntegrityStatus,
}

/// Accumulates statistics one record at a time
#[derive(Debug)]
pub struct StatisticsBuilder {
    today: NaiveDate,
    stats: AuditStatistics,
}

impl StatisticsBuilder {
    /// `now` fixes which UTC day counts as today; records outside `window` are ignored
    pub fn new(now: DateTime<Utc>, window: StatsWindow) -> Self {
        let logs_by_severity = SeverityClass::ALL
            .iter()
            .map(|class| (class.as_str().to_string(), 0))
            .collect();

        Self {
            today: now.date_naive(),
            stats: AuditStatistics {
                date_range: window,
                total_logs: 0,
                today_logs: 0,
                phi_access_count: 0,
                security_event_count: 0,
                login_count: 0,
                logs_by_action: BTreeMap::new(),
                logs_by_severity,
                logs_by_user: BTreeMap::new(),
                integrity_status: IntegrityStatus::Unverified,
            },
        }
    }

    pub fn observe(&mut self, record: &AuditRecord) {
        let stats = &mut self.stats;
        if !stats.date_range.contains(&record.timestamp) {
            return;
        }
        stats.total_logs += 1;

        if record.timestamp.date_naive() == self.today {
            stats.today_logs += 1;
        }
        if record.phi_accessed {
            stats.phi_access_count += 1;
        }
        match record.action {
            AuditAction::SecurityEvent => stats.security_event_count += 1,
            AuditAction::Login => stats.login_count += 1,
            _ => {}
        }

        *stats
            .logs_by_action
            .entry(record.action.as_str().to_string())
            .or_insert(0) += 1;
        *stats
            .logs_by_severity
            .entry(record.severity().as_str().to_string())
            .or_insert(0) += 1;
        if let Some(actor_id) = &record.actor_id {
            *stats.logs_by_user.entry(actor_id.clone()).or_insert(0) += 1;
        }
    }

    pub fn finish(mut self, integrity_status: IntegrityStatus) -> AuditStatistics {
        self.stats.integrity_status = integrity_status;
        self.stats
    }
}

/// Walk the chain through `head` in batches and summarize the records in `window`
pub async fn collect_statistics(
    store: &dyn LedgerStore,
    head: Option<RecordId>,
    now: DateTime<Utc>,
    window: StatsWindow,
    batch_size: usize,
) -> AuditResult<StatisticsBuilder> {
    let mut builder = StatisticsBuilder::new(now, window);
    let Some(head) = head else {
        return Ok(builder);
    };

    let mut next = RecordId::FIRST;
    while next <= head {
        let batch = store.range(next, head, batch_size.max(1)).await?;
        let Some(last) = batch.last() else {
            break;
        };
        next = last.id.next();
        for record in &batch {
            // Timestamps never decrease along the chain
            if record.timestamp > window.end {
                return Ok(builder);
            }
            builder.observe(record);
        }
    }

    Ok(builder)
}

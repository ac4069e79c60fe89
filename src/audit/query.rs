//! Audit Log Query Engine
//!
//! Filtered, newest-first pages over the committed chain with opaque
//! keyset cursors. A cursor names the last record a page returned; since
//! the chain only grows at the head, later pages are unaffected by appends.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::action::{AuditAction, SeverityClass};
use crate::audit::entry::{canonical_timestamp, AuditRecord, RecordId};
use crate::database::LedgerStore;
use crate::error::{AuditError, AuditResult};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Record predicates; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub severity: Option<SeverityClass>,
    pub phi_accessed: Option<bool>,
    /// Case-insensitive substring over resource and actor name
    pub search: Option<String>,
    pub actor_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn by_severity(mut self, severity: SeverityClass) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Only records flagged as PHI access
    pub fn phi_only(mut self) -> Self {
        self.phi_accessed = Some(true);
        self
    }

    pub fn search(mut self, text: &str) -> Self {
        self.search = Some(text.to_string());
        self
    }

    pub fn by_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }

        if let Some(severity) = self.severity {
            if record.severity() != severity {
                return false;
            }
        }

        if let Some(phi) = self.phi_accessed {
            if record.phi_accessed != phi {
                return false;
            }
        }

        if let Some(actor_id) = &self.actor_id {
            if record.actor_id.as_deref() != Some(actor_id.as_str()) {
                return false;
            }
        }

        if let Some(start) = self.start {
            if record.timestamp < start {
                return false;
            }
        }

        if let Some(end) = self.end {
            if record.timestamp > end {
                return false;
            }
        }

        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_resource = record.resource.to_lowercase().contains(&needle);
            let in_actor = record
                .actor_name
                .as_deref()
                .map(|name| name.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_resource && !in_actor {
                return false;
            }
        }

        true
    }
}

/// Position in the chain's total order, `(timestamp, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub id: RecordId,
}

impl Cursor {
    pub fn after(record: &AuditRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            id: record.id,
        }
    }

    /// Opaque token handed to clients
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}|{}", canonical_timestamp(&self.timestamp), self.id))
    }

    pub fn decode(token: &str) -> AuditResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(AuditError::invalid_cursor)?;
        let text = String::from_utf8(bytes).map_err(AuditError::invalid_cursor)?;

        let (timestamp, id) = text
            .split_once('|')
            .ok_or_else(|| AuditError::invalid_cursor("missing separator"))?;

        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(AuditError::invalid_cursor)?
            .with_timezone(&Utc);
        let id: u64 = id.parse().map_err(AuditError::invalid_cursor)?;
        if id == 0 {
            return Err(AuditError::invalid_cursor("record ids start at 1"));
        }

        Ok(Self {
            timestamp,
            id: RecordId(id),
        })
    }

    /// Whether `record` comes strictly after this cursor in newest-first order
    fn precedes(&self, record: &AuditRecord) -> bool {
        (record.timestamp, record.id) < (self.timestamp, self.id)
    }
}

/// One page request
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub filter: AuditFilter,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new(filter: AuditFilter) -> Self {
        Self {
            filter,
            cursor: None,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of results; `next_cursor` is `None` exactly when nothing further matches
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub records: Vec<AuditRecord>,
    pub next_cursor: Option<String>,
    pub limit: usize,
}

/// Page size bounds
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default: usize,
    pub max: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default: DEFAULT_PAGE_SIZE,
            max: MAX_PAGE_SIZE,
        }
    }
}

impl PageLimits {
    /// Clamp a requested size into `[1, max]`; oversize requests are not an error
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default).clamp(1, self.max.max(1))
    }
}

/// Run a query against the chain prefix ending at `head`.
///
/// Scans newest-first in batches of `scan_batch`, stopping one match past
/// the page so the presence of a further page is known exactly.
pub async fn run_query(
    store: &dyn LedgerStore,
    head: Option<RecordId>,
    query: &AuditQuery,
    limits: PageLimits,
    scan_batch: usize,
) -> AuditResult<QueryPage> {
    let limit = limits.clamp(query.limit);
    let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;

    let Some(head) = head else {
        return Ok(QueryPage {
            records: Vec::new(),
            next_cursor: None,
            limit,
        });
    };

    // Exclusive upper bound on ids still to scan
    let mut before = match cursor {
        Some(cursor) => cursor.id.min(head.next()),
        None => head.next(),
    };

    let mut matched: Vec<AuditRecord> = Vec::with_capacity(limit + 1);
    let scan_batch = scan_batch.max(limit + 1);

    'scan: loop {
        let batch = store.scan_desc(before, scan_batch).await?;
        let Some(oldest) = batch.last() else {
            break;
        };
        before = oldest.id;

        for record in batch {
            if let Some(start) = query.filter.start {
                // Timestamps only decrease from here on
                if record.timestamp < start {
                    break 'scan;
                }
            }

            if let Some(cursor) = &cursor {
                if !cursor.precedes(&record) {
                    continue;
                }
            }

            if query.filter.matches(&record) {
                matched.push(record);
                if matched.len() > limit {
                    break 'scan;
                }
            }
        }
    }

    let next_cursor = if matched.len() > limit {
        matched.truncate(limit);
        matched.last().map(|record| Cursor::after(record).encode())
    } else {
        None
    };

    debug!(
        "Query returned {} records (more: {})",
        matched.len(),
        next_cursor.is_some()
    );

    Ok(QueryPage {
        records: matched,
        next_cursor,
        limit,
    })
}

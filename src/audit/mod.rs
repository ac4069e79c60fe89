//! Audit Ledger
//!
//! Tamper-evident audit logging for clinical systems: every event is sealed
//! into a SHA-256 hash chain, can be re-verified at any time, queried with
//! keyset pagination, and streamed live to viewers.

pub mod action;
pub mod broadcast;
pub mod entry;
pub mod ledger;
pub mod query;
pub mod service;
pub mod stats;
pub mod verify;
pub mod view;

pub use action::{AuditAction, SeverityClass};
pub use broadcast::{Broadcaster, Subscription};
pub use entry::{AuditEnvelope, AuditRecord, RecordId, GENESIS_HASH};
pub use ledger::{Clock, Ledger, SystemClock};
pub use query::{AuditFilter, AuditQuery, Cursor, QueryPage};
pub use service::{AuditService, ServiceSettings, VerificationRun};
pub use stats::{AuditStatistics, IntegrityStatus, StatsWindow};
pub use verify::{verify_records, verify_store, ChainAnchor, FailureKind, VerificationReport};
pub use view::AuditRecordView;

//! Audit Log Entry
//!
//! Defines the producer-facing envelope and the immutable, hash-chained
//! record the ledger persists for it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::audit::action::{AuditAction, SeverityClass};
use crate::error::{AuditError, AuditResult};

/// `previous_hash` of the first record in a chain
pub const GENESIS_HASH: &str = "0";

/// Column limits inherited from the audit_logs schema
pub const MAX_RESOURCE_LEN: usize = 255;
pub const MAX_SOURCE_IP_LEN: usize = 45;

/// Position of a record in the chain, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    pub const FIRST: RecordId = RecordId(1);

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> RecordId {
        RecordId(self.0 + 1)
    }

    /// Predecessor in the chain, `None` for the genesis record
    pub fn prev(&self) -> Option<RecordId> {
        if self.0 > Self::FIRST.0 {
            Some(RecordId(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event as submitted by a producer.
///
/// Carries no id, timestamp or hash: those are assigned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEnvelope {
    pub action: AuditAction,
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
    pub resource: String,
    pub source_ip: String,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub phi_accessed: bool,
    pub metadata: Option<Value>,
}

impl AuditEnvelope {
    /// Create a system-originated envelope
    pub fn new(action: AuditAction, resource: impl Into<String>) -> Self {
        Self {
            action,
            actor_id: None,
            actor_name: None,
            resource: resource.into(),
            source_ip: "0.0.0.0".to_string(),
            user_agent: None,
            phi_accessed: false,
            metadata: None,
        }
    }

    /// Attribute the event to a user
    pub fn actor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.actor_id = Some(id.into());
        self.actor_name = Some(name.into());
        self
    }

    pub fn source(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.source_ip = ip.into();
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn phi(mut self, accessed: bool) -> Self {
        self.phi_accessed = accessed;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reject envelopes that must never enter the chain
    pub fn validate(&self) -> AuditResult<()> {
        if !self.action.is_known() {
            return Err(AuditError::unknown_action(self.action.as_str()));
        }

        let resource = self.resource.trim();
        if resource.is_empty() {
            return Err(AuditError::invalid_resource("must not be empty"));
        }
        if self.resource.chars().count() > MAX_RESOURCE_LEN {
            return Err(AuditError::invalid_resource(&format!(
                "longer than {} characters",
                MAX_RESOURCE_LEN
            )));
        }

        if self.source_ip.chars().count() > MAX_SOURCE_IP_LEN {
            return Err(AuditError::Validation(format!(
                "Invalid source IP: longer than {} characters",
                MAX_SOURCE_IP_LEN
            )));
        }

        Ok(())
    }
}

/// Immutable, hash-chained audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: RecordId,
    pub action: AuditAction,
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
    pub resource: String,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub phi_accessed: bool,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditRecord {
    /// Seal an envelope at a chain position
    pub fn seal(
        id: RecordId,
        envelope: AuditEnvelope,
        timestamp: DateTime<Utc>,
        previous_hash: String,
    ) -> Self {
        let mut record = Self {
            id,
            action: envelope.action,
            actor_id: envelope.actor_id,
            actor_name: envelope.actor_name,
            resource: envelope.resource,
            source_ip: envelope.source_ip,
            user_agent: envelope.user_agent,
            phi_accessed: envelope.phi_accessed,
            metadata: envelope.metadata,
            timestamp,
            previous_hash,
            hash: String::new(), // Will be calculated
        };

        record.hash = record.calculate_hash();
        record
    }

    /// Create canonical string representation for hashing.
    ///
    /// Covers every field except `hash`; `previous_hash` is appended last.
    /// Variable-width values carry their byte length (`resource:11:patient/123`)
    /// and an absent value is `-`, which no length-prefixed value can spell.
    pub fn canonical_string(&self) -> String {
        let metadata = self.metadata.as_ref().map(canonical_json);
        format!(
            "id:{}|action:{}|actor_id:{}|actor_name:{}|resource:{}|source_ip:{}|user_agent:{}|phi_accessed:{}|metadata:{}|timestamp:{}|previous_hash:{}",
            self.id,
            prefixed(self.action.as_str()),
            optional(self.actor_id.as_deref()),
            optional(self.actor_name.as_deref()),
            prefixed(&self.resource),
            prefixed(&self.source_ip),
            optional(self.user_agent.as_deref()),
            self.phi_accessed,
            optional(metadata.as_deref()),
            canonical_timestamp(&self.timestamp),
            prefixed(&self.previous_hash),
        )
    }

    /// Calculate SHA256 hash of this record
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this record's own hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }

    pub fn severity(&self) -> SeverityClass {
        self.action.severity()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} on {} by {}",
            self.id,
            self.action,
            self.resource,
            self.actor_name.as_deref().unwrap_or("system")
        )
    }
}

fn prefixed(value: &str) -> String {
    format!("{}:{}", value.len(), value)
}

fn optional(value: Option<&str>) -> String {
    value.map(prefixed).unwrap_or_else(|| "-".to_string())
}

/// RFC 3339 in UTC with fixed nanosecond precision
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Serialize JSON with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let fields: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| {
                    format!("{}:{}", Value::String(key.clone()), canonical_json(value))
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

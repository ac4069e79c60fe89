//! Wire projection of audit records

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::audit::action::SeverityClass;
use crate::audit::entry::AuditRecord;

/// An [`AuditRecord`] as clients see it, with derived fields filled in
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecordView {
    pub id: u64,
    pub action: String,
    pub severity: SeverityClass,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub resource: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub phi_accessed: bool,
    pub integrity_verified: bool,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Value>,
}

impl AuditRecordView {
    pub fn new(record: &AuditRecord, integrity_verified: bool) -> Self {
        Self {
            id: record.id.value(),
            action: record.action.as_str().to_string(),
            severity: record.severity(),
            user_id: record.actor_id.clone(),
            user_name: record.actor_name.clone(),
            resource: record.resource.clone(),
            ip_address: record.source_ip.clone(),
            user_agent: record.user_agent.clone(),
            phi_accessed: record.phi_accessed,
            integrity_verified,
            hash: record.hash.clone(),
            previous_hash: record.previous_hash.clone(),
            timestamp: record.timestamp,
            metadata: record.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::action::AuditAction;
    use crate::audit::entry::{AuditEnvelope, RecordId, GENESIS_HASH};

    #[test]
    fn test_wire_field_names() {
        let record = AuditRecord::seal(
            RecordId(1),
            AuditEnvelope::new(AuditAction::EmergencyAccessSuccess, "patient/9")
                .actor("u-1", "Dr. Chen")
                .source("192.168.1.20", "Mozilla/5.0"),
            Utc::now(),
            GENESIS_HASH.to_string(),
        );

        let json = serde_json::to_value(AuditRecordView::new(&record, false)).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["action"], "emergency_access_success");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["userName"], "Dr. Chen");
        assert_eq!(json["ipAddress"], "192.168.1.20");
        assert_eq!(json["previousHash"], "0");
        assert_eq!(json["integrityVerified"], false);
        assert!(json["metadata"].is_null());
    }
}

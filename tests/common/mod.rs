//! Shared fixtures for integration tests

#![allow(dead_code)]

use audit_ledger::audit::{
    AuditAction, AuditEnvelope, AuditRecord, AuditService, Broadcaster, Ledger, RecordId,
    ServiceSettings,
};
use audit_ledger::database::{LedgerStore, MemoryStore};
use serde_json::json;
use std::sync::Arc;

pub fn login(user: &str) -> AuditEnvelope {
    AuditEnvelope::new(AuditAction::Login, "auth/session")
        .actor(user, format!("User {}", user))
        .source("10.1.2.3", "Mozilla/5.0")
}

pub fn phi_access(user: &str, patient: u32) -> AuditEnvelope {
    AuditEnvelope::new(AuditAction::PhiAccess, format!("patient/{}/chart", patient))
        .actor(user, format!("Dr. {}", user))
        .source("10.1.2.3", "CareDroid/2.1")
        .phi(true)
        .metadata(json!({ "patientId": patient, "fields": ["allergies", "medications"] }))
}

pub fn ai_query(user: &str) -> AuditEnvelope {
    AuditEnvelope::new(AuditAction::AiQuery, "chat/message")
        .actor(user, format!("User {}", user))
        .metadata(json!({ "model": "triage", "tokens": 512 }))
}

pub async fn service_on(store: Arc<dyn LedgerStore>) -> AuditService {
    let ledger = Ledger::open(store, Broadcaster::new(64))
        .await
        .expect("Failed to open ledger");
    AuditService::new(ledger, ServiceSettings::default())
}

pub async fn memory_service() -> (AuditService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = service_on(store.clone()).await;
    (service, store)
}

/// Append `count` mixed events and return what was committed
pub async fn populate(service: &AuditService, count: usize) -> Vec<AuditRecord> {
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let envelope = match i % 3 {
            0 => login(&format!("u{}", i)),
            1 => phi_access(&format!("u{}", i), i as u32),
            _ => ai_query(&format!("u{}", i)),
        };
        records.push(service.append(envelope).await.expect("append failed"));
    }
    records
}

/// Copy of `records` with one record changed in place, stored hash untouched
pub fn tampered(
    records: &[AuditRecord],
    id: RecordId,
    mutate: impl FnOnce(&mut AuditRecord),
) -> Vec<AuditRecord> {
    let mut records = records.to_vec();
    if let Some(record) = records.iter_mut().find(|r| r.id == id) {
        mutate(record);
    }
    records
}

/// Service over an exported (possibly edited) chain
pub async fn service_over(records: Vec<AuditRecord>) -> AuditService {
    service_on(Arc::new(MemoryStore::from_records(records))).await
}

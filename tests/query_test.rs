//! Integration tests for filtered pagination

mod common;

use audit_ledger::audit::{AuditAction, AuditFilter, AuditQuery, SeverityClass};
use audit_ledger::AuditError;
use common::*;
use std::collections::HashSet;

#[tokio::test]
async fn test_phi_only_pages() {
    let (service, _store) = memory_service().await;
    for i in 0..5 {
        service.append(phi_access("doc", i)).await.unwrap();
        if i < 3 {
            service.append(login("nurse")).await.unwrap();
        }
    }

    let query = AuditQuery::new(AuditFilter::new().phi_only()).limit(2);
    let first = service.query(&query).await.unwrap();
    assert_eq!(first.records.len(), 2);
    assert!(first.next_cursor.is_some());
    assert!(first.records.iter().all(|r| r.phi_accessed));

    let second = service
        .query(&query.clone().limit(3).cursor(first.next_cursor.clone()))
        .await
        .unwrap();
    assert_eq!(second.records.len(), 3);
    assert!(second.next_cursor.is_none());

    let seen: HashSet<_> = first.records.iter().chain(&second.records).map(|r| r.id).collect();
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn test_pages_are_newest_first() {
    let (service, _store) = memory_service().await;
    populate(&service, 10).await;

    let page = service.query(&AuditQuery::default()).await.unwrap();
    assert_eq!(page.records.len(), 10);
    for pair in page.records.windows(2) {
        assert!((pair[0].timestamp, pair[0].id) > (pair[1].timestamp, pair[1].id));
    }
}

#[tokio::test]
async fn test_cursor_survives_later_appends() {
    let (service, _store) = memory_service().await;
    let committed = populate(&service, 7).await;

    let query = AuditQuery::default().limit(3);
    let first = service.query(&query).await.unwrap();

    // New records land at the head, ahead of every outstanding cursor
    populate(&service, 5).await;

    let mut seen: Vec<_> = first.records.iter().map(|r| r.id).collect();
    let mut cursor = first.next_cursor;
    while cursor.is_some() {
        let page = service.query(&query.clone().cursor(cursor)).await.unwrap();
        seen.extend(page.records.iter().map(|r| r.id));
        cursor = page.next_cursor;
    }

    let mut expected: Vec<_> = committed.iter().map(|r| r.id).collect();
    expected.reverse();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_filters_combine() {
    let (service, _store) = memory_service().await;
    populate(&service, 12).await;
    service
        .append(login("alice").metadata(serde_json::json!({ "method": "password" })))
        .await
        .unwrap();

    let by_action = AuditQuery::new(AuditFilter::new().by_action(AuditAction::AiQuery));
    let page = service.query(&by_action).await.unwrap();
    assert_eq!(page.records.len(), 4);
    assert!(page.records.iter().all(|r| r.action == AuditAction::AiQuery));

    let by_severity = AuditQuery::new(AuditFilter::new().by_severity(SeverityClass::Auth));
    assert_eq!(service.query(&by_severity).await.unwrap().records.len(), 5);

    let by_actor = AuditQuery::new(AuditFilter::new().by_actor("alice"));
    let page = service.query(&by_actor).await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].actor_id.as_deref(), Some("alice"));

    let search = AuditQuery::new(AuditFilter::new().search("PATIENT/4/"));
    let page = service.query(&search).await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].resource, "patient/4/chart");
}

#[tokio::test]
async fn test_date_range_filter() {
    let (service, _store) = memory_service().await;
    let records = populate(&service, 6).await;

    let filter = AuditFilter::new().between(records[1].timestamp, records[3].timestamp);
    let page = service.query(&AuditQuery::new(filter)).await.unwrap();

    assert!(!page.records.is_empty());
    assert!(page
        .records
        .iter()
        .all(|r| r.timestamp >= records[1].timestamp && r.timestamp <= records[3].timestamp));
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let (service, _store) = memory_service().await;
    populate(&service, 3).await;

    let page = service.query(&AuditQuery::default().limit(0)).await.unwrap();
    assert_eq!(page.limit, 1);
    assert_eq!(page.records.len(), 1);

    let page = service.query(&AuditQuery::default().limit(5000)).await.unwrap();
    assert_eq!(page.limit, 200);
    assert_eq!(page.records.len(), 3);
}

#[tokio::test]
async fn test_malformed_cursor_is_a_validation_error() {
    let (service, _store) = memory_service().await;
    populate(&service, 2).await;

    let query = AuditQuery::default().cursor(Some("not a cursor!".to_string()));
    let result = service.query(&query).await;
    assert!(matches!(result, Err(AuditError::Validation(_))));
}

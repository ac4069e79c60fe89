//! Reads running against a chain that is still growing

mod common;

use audit_ledger::audit::{AuditFilter, AuditQuery, RecordId};
use audit_ledger::database::LedgerStore;
use common::*;
use std::collections::HashSet;
use std::time::Duration;

const WRITERS: usize = 4;
const PER_WRITER: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_see_consistent_prefixes_during_appends() {
    let (service, _store) = memory_service().await;
    populate(&service, 10).await;

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let service = service.clone();
            tokio::spawn(async move {
                for i in 0..PER_WRITER {
                    service
                        .append(login(&format!("writer{}-{}", w, i)))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let reader = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut last_checked = 0;
            let mut runs = 0;

            loop {
                let done = service.ledger().committed_head()
                    == Some(RecordId((10 + WRITERS * PER_WRITER) as u64));

                let run = service.verify(None).await.unwrap();
                assert!(run.report.valid, "run over a growing chain failed: {:?}", run.report);
                assert!(run.report.records_checked >= last_checked);
                assert_eq!(
                    run.report.through_id.map(|id| id.value()).unwrap_or(0),
                    run.report.records_checked
                );
                last_checked = run.report.records_checked;
                runs += 1;

                // Walk every page while new records keep landing on top
                let mut seen = HashSet::new();
                let mut previous: Option<RecordId> = None;
                let mut cursor = None;
                loop {
                    let query = AuditQuery::new(AuditFilter::new()).limit(7).cursor(cursor);
                    let page = service.query(&query).await.unwrap();
                    for record in &page.records {
                        assert!(seen.insert(record.id), "record {} served twice", record.id);
                        if let Some(previous) = previous {
                            assert!(record.id < previous);
                        }
                        previous = Some(record.id);
                    }
                    cursor = page.next_cursor;
                    if cursor.is_none() {
                        break;
                    }
                }
                assert!(seen.len() as u64 >= last_checked);

                if done {
                    return runs;
                }
            }
        })
    };

    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        for writer in writers {
            writer.await.unwrap();
        }
        reader.await.unwrap()
    })
    .await;

    let runs = outcome.expect("reads or appends stalled");
    assert!(runs >= 1);

    let total = (10 + WRITERS * PER_WRITER) as u64;
    let run = service.verify(None).await.unwrap();
    assert!(run.report.valid);
    assert_eq!(run.report.records_checked, total);
    assert_eq!(service.ledger().store().count().await.unwrap(), total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_get_distinct_ids() {
    let (service, _store) = memory_service().await;

    let handles: Vec<_> = (0..8)
        .map(|w| {
            let service = service.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..25 {
                    let record = service.append(ai_query(&format!("{}-{}", w, i))).await.unwrap();
                    ids.push(record.id);
                }
                ids
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(ids.insert(id));
        }
    }

    assert_eq!(ids.len(), 200);
    assert!(service.verify_strict(None).await.is_ok());
}

//! JSON-Lines Ledger Store
//!
//! Append-only JSONL file, one record per line. Every append is written,
//! flushed and synced before it is acknowledged. The file is loaded into
//! memory on open and served from there.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::audit::entry::{AuditRecord, RecordId};
use crate::database::{check_next_id, slice_desc, slice_range, LedgerStore};
use crate::error::{AuditError, AuditResult};

/// Ledger store backed by an append-only JSONL file
pub struct JsonlStore {
    log_path: PathBuf,
    file: Mutex<File>,
    records: RwLock<Vec<AuditRecord>>,
}

impl JsonlStore {
    /// Open (or create) the ledger file and load its records
    pub async fn open(log_path: impl AsRef<Path>) -> AuditResult<Self> {
        let log_path = log_path.as_ref().to_path_buf();

        // Ensure directory exists
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AuditError::Storage(format!("Failed to create log directory: {}", e))
                })?;
            }
        }

        let loaded = if log_path.exists() {
            read_log(&log_path)?
        } else {
            LoadedLog::default()
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| AuditError::Storage(format!("Failed to open audit log file: {}", e)))?;

        // Appends must start on a fresh line after the last intact record
        if loaded.torn {
            file.set_len(loaded.intact_len).map_err(|e| {
                AuditError::Storage(format!("Failed to truncate torn audit log tail: {}", e))
            })?;
            warn!(
                "Truncated {} back to {} bytes after an incomplete write",
                log_path.display(),
                loaded.intact_len
            );
        }
        if !loaded.ends_with_newline {
            writeln!(file).map_err(|e| {
                AuditError::Storage(format!("Failed to terminate last audit record: {}", e))
            })?;
        }
        if loaded.torn || !loaded.ends_with_newline {
            file.sync_data()
                .map_err(|e| AuditError::Storage(format!("Failed to sync audit log: {}", e)))?;
        }

        let records = loaded.records;

        info!(
            "Loaded {} existing audit records from {}",
            records.len(),
            log_path.display()
        );

        Ok(Self {
            log_path,
            file: Mutex::new(file),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[async_trait]
impl LedgerStore for JsonlStore {
    async fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        // Serialize before touching the file so a bad record never leaves a partial line
        let json = serde_json::to_string(record)
            .map_err(|e| AuditError::Durability(format!("Failed to serialize record: {}", e)))?;

        let mut file = self.file.lock().await;

        {
            let records = self.records.read().await;
            check_next_id(records.len() as u64 + 1, record)?;
        }

        let offset = file
            .metadata()
            .map_err(|e| AuditError::Durability(format!("Failed to stat audit log: {}", e)))?
            .len();

        let written = writeln!(file, "{}", json)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data());

        if let Err(e) = written {
            // Cut off whatever part of the line made it out
            if let Err(truncate_err) = file.set_len(offset) {
                warn!("Failed to roll back partial audit log write: {}", truncate_err);
            }
            return Err(AuditError::Durability(format!(
                "Failed to write to audit log: {}",
                e
            )));
        }

        self.records.write().await.push(record.clone());

        debug!("Appended audit record to {}: {}", self.log_path.display(), record.summary());
        Ok(())
    }

    async fn last(&self) -> AuditResult<Option<AuditRecord>> {
        Ok(self.records.read().await.last().cloned())
    }

    async fn get(&self, id: RecordId) -> AuditResult<Option<AuditRecord>> {
        let records = self.records.read().await;
        Ok(id
            .value()
            .checked_sub(1)
            .and_then(|index| records.get(index as usize))
            .cloned())
    }

    async fn range(
        &self,
        from: RecordId,
        through: RecordId,
        limit: usize,
    ) -> AuditResult<Vec<AuditRecord>> {
        Ok(slice_range(&self.records.read().await, from, through, limit))
    }

    async fn scan_desc(&self, before: RecordId, limit: usize) -> AuditResult<Vec<AuditRecord>> {
        Ok(slice_desc(&self.records.read().await, before, limit))
    }

    async fn count(&self) -> AuditResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}

/// Load every record from a ledger file.
///
/// A torn final line (a write that never completed) is skipped with a
/// warning; an unreadable line anywhere else is an error.
pub fn load_records_from_file(path: impl AsRef<Path>) -> AuditResult<Vec<AuditRecord>> {
    let path = path.as_ref();
    let loaded = read_log(path)?;
    debug!("Loaded {} records from {}", loaded.records.len(), path.display());
    Ok(loaded.records)
}

#[derive(Debug)]
struct LoadedLog {
    records: Vec<AuditRecord>,
    /// Byte length of the file up to and including the last intact line
    intact_len: u64,
    torn: bool,
    ends_with_newline: bool,
}

impl Default for LoadedLog {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            intact_len: 0,
            torn: false,
            ends_with_newline: true,
        }
    }
}

fn read_log(path: &Path) -> AuditResult<LoadedLog> {
    let mut file = File::open(path)
        .map_err(|e| AuditError::Storage(format!("Failed to open audit log file: {}", e)))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| AuditError::Storage(format!("Failed to read audit log: {}", e)))?;

    let mut loaded = LoadedLog::default();
    let mut offset = 0;
    let mut line_num = 0;

    while offset < bytes.len() {
        line_num += 1;
        let line_end = bytes[offset..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| offset + i);
        let next = line_end.map(|end| end + 1).unwrap_or(bytes.len());
        let line = &bytes[offset..line_end.unwrap_or(bytes.len())];

        if line.iter().all(u8::is_ascii_whitespace) {
            loaded.intact_len = next as u64;
            offset = next;
            continue;
        }

        match serde_json::from_slice::<AuditRecord>(line) {
            Ok(record) => {
                loaded.records.push(record);
                loaded.intact_len = next as u64;
            }
            Err(e) if bytes[next..].iter().all(u8::is_ascii_whitespace) => {
                warn!(
                    "Ignoring incomplete trailing line {} in {}: {}",
                    line_num,
                    path.display(),
                    e
                );
                loaded.torn = true;
                break;
            }
            Err(e) => {
                return Err(AuditError::Storage(format!(
                    "Failed to parse record at line {}: {}",
                    line_num, e
                )));
            }
        }
        offset = next;
    }

    loaded.ends_with_newline = loaded.intact_len == 0
        || bytes.get(loaded.intact_len as usize - 1) == Some(&b'\n');
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::action::AuditAction;
    use crate::audit::entry::{AuditEnvelope, GENESIS_HASH};
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(id: u64, previous: &str) -> AuditRecord {
        AuditRecord::seal(
            RecordId(id),
            AuditEnvelope::new(AuditAction::DataExport, format!("export/{}", id)),
            Utc::now(),
            previous.to_string(),
        )
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("ledger").join("audit.jsonl");

        let first = record(1, GENESIS_HASH);
        let second = record(2, &first.hash);
        {
            let store = JsonlStore::open(&log_path).await.unwrap();
            store.append(&first).await.unwrap();
            store.append(&second).await.unwrap();
        }

        let store = JsonlStore::open(&log_path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.last().await.unwrap().unwrap(), second);
        assert_eq!(store.get(RecordId(1)).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("audit.jsonl");

        let first = record(1, GENESIS_HASH);
        let line = serde_json::to_string(&first).unwrap();
        std::fs::write(&log_path, format!("{}\n{{\"id\":2,\"act", line)).unwrap();

        let records = load_records_from_file(&log_path).unwrap();
        assert_eq!(records, vec![first]);
    }

    #[tokio::test]
    async fn test_append_after_torn_tail_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("audit.jsonl");

        let first = record(1, GENESIS_HASH);
        let second = record(2, &first.hash);
        {
            let store = JsonlStore::open(&log_path).await.unwrap();
            store.append(&first).await.unwrap();
            store.append(&second).await.unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(b"{\"id\":3,\"act").unwrap();
        drop(file);

        let third = record(3, &second.hash);
        {
            let store = JsonlStore::open(&log_path).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 2);
            store.append(&third).await.unwrap();
        }

        let store = JsonlStore::open(&log_path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.last().await.unwrap().unwrap(), third);
        assert!(!std::fs::read_to_string(&log_path).unwrap().contains("\"act{"));
    }

    #[tokio::test]
    async fn test_unterminated_last_record_is_kept() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("audit.jsonl");

        let first = record(1, GENESIS_HASH);
        std::fs::write(&log_path, serde_json::to_string(&first).unwrap()).unwrap();

        let second = record(2, &first.hash);
        {
            let store = JsonlStore::open(&log_path).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 1);
            store.append(&second).await.unwrap();
        }

        let records = load_records_from_file(&log_path).unwrap();
        assert_eq!(records, vec![first, second]);
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("audit.jsonl");

        let first = record(1, GENESIS_HASH);
        let line = serde_json::to_string(&first).unwrap();
        std::fs::write(&log_path, format!("garbage\n{}\n", line)).unwrap();

        assert!(matches!(
            load_records_from_file(&log_path),
            Err(AuditError::Storage(_))
        ));
    }
}

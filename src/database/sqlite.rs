//! SQLite Ledger Store
//!
//! Persists the chain in the `audit_logs` table. The database runs in WAL
//! mode so readers see a consistent snapshot while an append is in flight.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

use crate::audit::action::AuditAction;
use crate::audit::entry::{canonical_timestamp, AuditRecord, RecordId};
use crate::database::schema::MIGRATIONS;
use crate::database::LedgerStore;
use crate::error::{AuditError, AuditResult};

const SELECT_COLUMNS: &str = "SELECT id, action, user_id, user_name, resource, ip_address, \
     user_agent, phi_accessed, metadata, timestamp, previous_hash, hash FROM audit_logs";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub async fn connect(path: impl AsRef<Path>) -> AuditResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!("Connected to audit database at {}", path.as_ref().display());
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> AuditResult<()> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql).execute(&self.pool).await?;
            debug!("Applied migration {}", name);
        }
        Ok(())
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        let durability = |e: sqlx::Error| AuditError::Durability(format!("Database error: {}", e));

        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AuditError::Durability(format!("Failed to serialize metadata: {}", e)))?;

        let mut tx = self.pool.begin().await.map_err(durability)?;

        let max_id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM audit_logs")
            .fetch_one(&mut *tx)
            .await
            .map_err(durability)?;
        crate::database::check_next_id(max_id as u64 + 1, record)?;

        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, user_id, user_name, resource, ip_address,
                                    user_agent, phi_accessed, metadata, timestamp,
                                    previous_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.value() as i64)
        .bind(record.action.as_str())
        .bind(record.actor_id.as_deref())
        .bind(record.actor_name.as_deref())
        .bind(&record.resource)
        .bind(&record.source_ip)
        .bind(record.user_agent.as_deref())
        .bind(record.phi_accessed)
        .bind(metadata)
        .bind(canonical_timestamp(&record.timestamp))
        .bind(&record.previous_hash)
        .bind(&record.hash)
        .execute(&mut *tx)
        .await
        .map_err(durability)?;

        tx.commit().await.map_err(durability)?;
        Ok(())
    }

    async fn last(&self) -> AuditResult<Option<AuditRecord>> {
        let row = sqlx::query(&format!("{} ORDER BY id DESC LIMIT 1", SELECT_COLUMNS))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn get(&self, id: RecordId) -> AuditResult<Option<AuditRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.value() as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn range(
        &self,
        from: RecordId,
        through: RecordId,
        limit: usize,
    ) -> AuditResult<Vec<AuditRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE id >= ? AND id <= ? ORDER BY id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(from.value() as i64)
        .bind(through.value().min(i64::MAX as u64) as i64)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn scan_desc(&self, before: RecordId, limit: usize) -> AuditResult<Vec<AuditRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE id < ? ORDER BY id DESC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(before.value().min(i64::MAX as u64) as i64)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self) -> AuditResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

fn sql_limit(limit: usize) -> i64 {
    limit.min(i64::MAX as usize) as i64
}

fn record_from_row(row: &SqliteRow) -> AuditResult<AuditRecord> {
    let id: i64 = row.try_get("id")?;
    let action: String = row.try_get("action")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let timestamp: String = row.try_get("timestamp")?;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| {
            AuditError::Storage(format!("Invalid timestamp on record {}: {}", id, e))
        })?
        .with_timezone(&Utc);

    Ok(AuditRecord {
        id: RecordId(id as u64),
        action: AuditAction::from(action),
        actor_id: row.try_get("user_id")?,
        actor_name: row.try_get("user_name")?,
        resource: row.try_get("resource")?,
        source_ip: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        phi_accessed: row.try_get("phi_accessed")?,
        metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        timestamp,
        previous_hash: row.try_get("previous_hash")?,
        hash: row.try_get("hash")?,
    })
}

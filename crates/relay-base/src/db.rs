//! Durable job store.
//!
//! A single SQLite file with write-ahead journaling is the only rendezvous
//! point between the intake server, the poller, and the submitter. Writes
//! are synchronous: once an update returns, a process crash must not lose
//! it. The schema is created idempotently on startup, so a fresh deployment
//! and a restart take the same path.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use relay_core::{JobStatus, RelayJob, RelayOutcome};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS relay_jobs (
    tx_hash            TEXT PRIMARY KEY,
    source_domain      INTEGER NOT NULL,
    status             TEXT NOT NULL,
    attested_message   BLOB,
    attestation        BLOB,
    attestation_nonce  TEXT,
    mint_recipient     TEXT,
    destination_domain INTEGER,
    amount             TEXT,
    dest_tx_hash       TEXT,
    dest_block_number  INTEGER,
    outcome            TEXT,
    error_message      TEXT,
    poll_attempts      INTEGER NOT NULL DEFAULT 0,
    retry_count        INTEGER NOT NULL DEFAULT 0,
    created_at         INTEGER NOT NULL,
    attested_at        INTEGER,
    submitted_at       INTEGER,
    confirmed_at       INTEGER,
    updated_at         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_relay_jobs_status ON relay_jobs (status);
CREATE INDEX IF NOT EXISTS idx_relay_jobs_created_at ON relay_jobs (created_at);
"#;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Insert hit the primary key; the caller race-lost an idempotent replay.
    #[error("job already exists")]
    Duplicate,
    /// An update targeted a row that is not there.
    #[error("job not found")]
    NotFound,
    /// A persisted row no longer decodes into the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Partial update applied to one job row.
///
/// Absent fields are left untouched. `updated_at` is refreshed on every
/// call regardless of which fields are set, and the counters can only be
/// incremented, never assigned, which keeps them monotone by construction.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub attested_message: Option<Vec<u8>>,
    pub attestation: Option<Vec<u8>>,
    pub attestation_nonce: Option<String>,
    pub mint_recipient: Option<String>,
    pub destination_domain: Option<u32>,
    pub amount: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub dest_block_number: Option<i64>,
    pub outcome: Option<RelayOutcome>,
    pub error_message: Option<String>,
    pub attested_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub increment_poll_attempts: bool,
    pub increment_retry_count: bool,
}

/// Handle to the relay job table. Cheap to clone; all mutators serialize
/// through SQLite's single writer.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (creating if necessary) the database at `path` and ensure the
    /// schema exists.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Corrupt(format!("cannot create {parent:?}: {e}")))?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = JobStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        // statements are individually idempotent
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert a new job. Fails with [`StoreError::Duplicate`] on a primary
    /// key conflict without touching the existing row.
    pub async fn create(&self, job: &RelayJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO relay_jobs \
             (tx_hash, source_domain, status, poll_attempts, retry_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.tx_hash)
        .bind(job.source_domain as i64)
        .bind(job.status.as_str())
        .bind(job.poll_attempts as i64)
        .bind(job.retry_count as i64)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            other => StoreError::Database(other),
        })?;
        Ok(())
    }

    /// Point-in-time snapshot of one job.
    pub async fn get(&self, tx_hash: &str) -> Result<Option<RelayJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM relay_jobs WHERE tx_hash = ?")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Apply a partial update; always refreshes `updated_at`.
    pub async fn update(&self, tx_hash: &str, update: JobUpdate) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE relay_jobs SET updated_at = ");
        qb.push_bind(now.timestamp_millis());
        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(message) = update.attested_message {
            qb.push(", attested_message = ").push_bind(message);
        }
        if let Some(attestation) = update.attestation {
            qb.push(", attestation = ").push_bind(attestation);
        }
        if let Some(nonce) = update.attestation_nonce {
            qb.push(", attestation_nonce = ").push_bind(nonce);
        }
        if let Some(recipient) = update.mint_recipient {
            qb.push(", mint_recipient = ").push_bind(recipient);
        }
        if let Some(domain) = update.destination_domain {
            qb.push(", destination_domain = ").push_bind(domain as i64);
        }
        if let Some(amount) = update.amount {
            qb.push(", amount = ").push_bind(amount);
        }
        if let Some(hash) = update.dest_tx_hash {
            qb.push(", dest_tx_hash = ").push_bind(hash);
        }
        if let Some(block) = update.dest_block_number {
            qb.push(", dest_block_number = ").push_bind(block);
        }
        if let Some(outcome) = update.outcome {
            qb.push(", outcome = ").push_bind(outcome.as_str());
        }
        if let Some(error) = update.error_message {
            qb.push(", error_message = ").push_bind(error);
        }
        if let Some(at) = update.attested_at {
            qb.push(", attested_at = ").push_bind(at.timestamp_millis());
        }
        if let Some(at) = update.submitted_at {
            qb.push(", submitted_at = ").push_bind(at.timestamp_millis());
        }
        if let Some(at) = update.confirmed_at {
            qb.push(", confirmed_at = ").push_bind(at.timestamp_millis());
        }
        if update.increment_poll_attempts {
            qb.push(", poll_attempts = poll_attempts + 1");
        }
        if update.increment_retry_count {
            qb.push(", retry_count = retry_count + 1");
        }
        qb.push(" WHERE tx_hash = ").push_bind(tx_hash);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Jobs in any of `statuses`, oldest first, at most `limit`.
    pub async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: u32,
    ) -> Result<Vec<RelayJob>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM relay_jobs WHERE status IN (");
        let mut separated = qb.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        qb.push(") ORDER BY created_at ASC LIMIT ").push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    /// The single oldest job in `status`, if any.
    pub async fn oldest_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Option<RelayJob>, StoreError> {
        Ok(self.list_by_status(&[status], 1).await?.into_iter().next())
    }

    /// Row counts per status; statuses with no rows report zero.
    pub async fn count_by_status(&self) -> Result<BTreeMap<JobStatus, i64>, StoreError> {
        let mut counts: BTreeMap<JobStatus, i64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM relay_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let status =
                JobStatus::from_str(&status).map_err(StoreError::Corrupt)?;
            counts.insert(status, row.try_get("n")?);
        }
        Ok(counts)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<RelayJob, StoreError> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status).map_err(StoreError::Corrupt)?;
    let outcome: Option<String> = row.try_get("outcome")?;
    let outcome = outcome
        .map(|s| RelayOutcome::from_str(&s))
        .transpose()
        .map_err(StoreError::Corrupt)?;

    Ok(RelayJob {
        tx_hash: row.try_get("tx_hash")?,
        source_domain: row.try_get::<i64, _>("source_domain")? as u32,
        status,
        attested_message: row.try_get("attested_message")?,
        attestation: row.try_get("attestation")?,
        attestation_nonce: row.try_get("attestation_nonce")?,
        mint_recipient: row.try_get("mint_recipient")?,
        destination_domain: row
            .try_get::<Option<i64>, _>("destination_domain")?
            .map(|d| d as u32),
        amount: row.try_get("amount")?,
        dest_tx_hash: row.try_get("dest_tx_hash")?,
        dest_block_number: row.try_get("dest_block_number")?,
        outcome,
        error_message: row.try_get("error_message")?,
        poll_attempts: row.try_get::<i64, _>("poll_attempts")? as u32,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        created_at: timestamp(row, "created_at")?,
        attested_at: optional_timestamp(row, "attested_at")?,
        submitted_at: optional_timestamp(row, "submitted_at")?,
        confirmed_at: optional_timestamp(row, "confirmed_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let millis: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {millis}")))
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let millis: Option<i64> = row.try_get(column)?;
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {ms}")))
        })
        .transpose()
}

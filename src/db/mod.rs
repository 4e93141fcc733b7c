use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{info, warn};

use self::models::{format_timestamp, PersistedRecord};

pub mod models;
pub mod schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),

    #[error("database connection lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("duplicate record id '{id}'; batch rolled back")]
    Duplicate { id: String },

    #[error("bulk insert did not finish within {0:?}")]
    Timeout(Duration),

    #[error("bulk insert failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("bulk insert failed: {0}")]
    Unavailable(String),
}

/// What a bulk insert does with ids that are already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DuplicatePolicy {
    /// Plain insert: the first duplicate fails and rolls back the whole batch.
    #[default]
    Reject,
    /// Leave stored ids untouched and count only new rows.
    Skip,
}

impl Display for DuplicatePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Bulk persistence seam used by the ingestion pipeline.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists the batch and returns how many records were inserted.
    async fn write_batch(&self, records: Vec<PersistedRecord>) -> Result<usize, WriteError>;
}

/// SQLite-backed record store. Cloning shares the underlying connection.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    policy: DuplicatePolicy,
    write_timeout: Duration,
}

impl Database {
    pub fn open(path: &Path, policy: DuplicatePolicy) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::create_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            policy,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Opens the store, retrying with a linear back-off of `attempt * 2s`.
    pub async fn connect_with_retry(
        path: &Path,
        policy: DuplicatePolicy,
        attempts: u32,
    ) -> Result<Self, DbError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::open(path, policy) {
                Ok(db) => {
                    info!(path = %path.display(), %policy, "record store ready");
                    return Ok(db);
                }
                Err(error) if attempt < attempts => {
                    let delay = Duration::from_secs(u64::from(attempt) * 2);
                    warn!(
                        attempt,
                        attempts,
                        error = %error,
                        "failed to open record store, retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(DbError::Config(format!(
                        "failed to open record store after {attempts} attempts: {error}"
                    )))
                }
            }
        }
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".mediamon").join("mediamon.db"))
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn count(&self) -> Result<i64, DbError> {
        let conn = self.lock()?;
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM graph_emails", [], |row| row.get(0))?;
        Ok(total)
    }

    pub fn get(&self, id: &str) -> Result<Option<PersistedRecord>, DbError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                r#"
                SELECT id, received_at, subject, from_name, from_address,
                       body_content_type, body_content, fetched_at
                FROM graph_emails
                WHERE id = ?
                "#,
                [id],
                PersistedRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn latest_received_at(&self) -> Result<Option<String>, DbError> {
        let conn = self.lock()?;
        let latest: Option<String> =
            conn.query_row("SELECT MAX(received_at) FROM graph_emails", [], |row| {
                row.get(0)
            })?;
        Ok(latest)
    }
}

const WRITE_PENDING: u8 = 0;
const WRITE_COMMITTING: u8 = 1;
const WRITE_ABANDONED: u8 = 2;

/// Settles a bulk insert exactly once: either the insert task claims the
/// commit, or the waiting caller abandons the batch after its deadline.
#[derive(Debug)]
struct CommitGate {
    state: AtomicU8,
    deadline: Duration,
}

impl CommitGate {
    fn new(deadline: Duration) -> Self {
        Self {
            state: AtomicU8::new(WRITE_PENDING),
            deadline,
        }
    }

    fn is_abandoned(&self) -> bool {
        self.state.load(Ordering::SeqCst) == WRITE_ABANDONED
    }

    fn claim_commit(&self) -> bool {
        self.state
            .compare_exchange(
                WRITE_PENDING,
                WRITE_COMMITTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn abandon(&self) -> bool {
        self.state
            .compare_exchange(
                WRITE_PENDING,
                WRITE_ABANDONED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn timed_out(&self) -> WriteError {
        WriteError::Timeout(self.deadline)
    }
}

fn insert_batch(
    conn: &mut Connection,
    records: &[PersistedRecord],
    policy: DuplicatePolicy,
    gate: &CommitGate,
) -> Result<usize, WriteError> {
    if gate.is_abandoned() {
        return Err(gate.timed_out());
    }

    let verb = match policy {
        DuplicatePolicy::Reject => "INSERT",
        DuplicatePolicy::Skip => "INSERT OR IGNORE",
    };
    let sql = format!(
        r#"
        {verb} INTO graph_emails (
            id, received_at, subject, from_name, from_address,
            body_content_type, body_content, fetched_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#
    );

    // Every early return drops `tx`, which rolls the batch back.
    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx.prepare(&sql)?;
        for record in records {
            if gate.is_abandoned() {
                return Err(gate.timed_out());
            }
            inserted += stmt
                .execute(params![
                    record.id,
                    format_timestamp(&record.received_at),
                    record.subject,
                    record.sender.name,
                    record.sender.address,
                    record.body.content_type,
                    record.body.content,
                    format_timestamp(&record.fetched_at),
                ])
                .map_err(|error| classify_insert_error(error, &record.id))?;
        }
    }

    if !gate.claim_commit() {
        return Err(gate.timed_out());
    }
    tx.commit()?;

    Ok(inserted)
}

fn classify_insert_error(error: rusqlite::Error, id: &str) -> WriteError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            WriteError::Duplicate { id: id.to_string() }
        }
        _ => WriteError::Storage(error),
    }
}

fn joined(
    result: Result<Result<usize, WriteError>, tokio::task::JoinError>,
) -> Result<usize, WriteError> {
    result.unwrap_or_else(|join_error| Err(WriteError::Unavailable(join_error.to_string())))
}

#[async_trait]
impl RecordStore for Database {
    async fn write_batch(&self, records: Vec<PersistedRecord>) -> Result<usize, WriteError> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(&self.conn);
        let policy = self.policy;
        let gate = Arc::new(CommitGate::new(self.write_timeout));
        let task_gate = Arc::clone(&gate);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| WriteError::Unavailable("connection lock poisoned".to_string()))?;
            insert_batch(&mut conn, &records, policy, &task_gate)
        });

        let waited = tokio::time::timeout(self.write_timeout, &mut task).await;
        match waited {
            Ok(result) => joined(result),
            Err(_) if gate.abandon() => {
                warn!(
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "bulk insert abandoned; batch will roll back"
                );
                Err(gate.timed_out())
            }
            // The insert task already claimed the commit; report its outcome.
            Err(_) => joined(task.await),
        }
    }
}

//! Mail record persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::record::{MailId, MailRecord, StoredMail};
use crate::{Error, Result};

/// Append-only sink for received mail.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Persists a record and returns its new identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    async fn insert(&self, record: &MailRecord) -> Result<MailId>;
}

/// SQLite-backed mail store.
///
/// All records live in a single table whose name is fixed at construction.
#[derive(Debug, Clone)]
pub struct SqliteMailStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteMailStore {
    /// Connects to `database_url` and creates `table` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is not a plain identifier, the
    /// connection fails, or schema creation fails.
    pub async fn new(database_url: &str, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or schema creation fails.
    pub async fn in_memory(table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Name of the backing table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn initialize(&self) -> Result<()> {
        let table = &self.table;
        sqlx::query(&format!(
            r"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                received_at TEXT NOT NULL,
                date TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                to_address TEXT NOT NULL DEFAULT '',
                from_address TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                cc TEXT NOT NULL DEFAULT '',
                bcc TEXT NOT NULL DEFAULT '',
                rcpt TEXT NOT NULL DEFAULT '',
                mime_version TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL DEFAULT '',
                unread INTEGER NOT NULL DEFAULT 1,
                data TEXT NOT NULL
            )
            "
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_unread ON {table}(unread)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row cannot be decoded.
    pub async fn get(&self, id: MailId) -> Result<Option<StoredMail>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stored_from_row).transpose()
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) as count FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }

    /// All unread records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn list_unread(&self) -> Result<Vec<StoredMail>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE unread = 1 ORDER BY id ASC",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_from_row).collect()
    }
}

#[async_trait]
impl MailStore for SqliteMailStore {
    async fn insert(&self, record: &MailRecord) -> Result<MailId> {
        let result = sqlx::query(&format!(
            r"
            INSERT INTO {}
                (received_at, date, subject, to_address, from_address, body,
                 cc, bcc, rcpt, mime_version, content_type, unread, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            self.table
        ))
        .bind(record.received_at.to_rfc3339())
        .bind(&record.date)
        .bind(&record.subject)
        .bind(&record.to)
        .bind(&record.from)
        .bind(&record.body)
        .bind(&record.cc)
        .bind(&record.bcc)
        .bind(&record.rcpt)
        .bind(&record.mime_version)
        .bind(&record.content_type)
        .bind(record.unread)
        .bind(&record.data)
        .execute(&self.pool)
        .await?;

        Ok(MailId(result.last_insert_rowid()))
    }
}

const COLUMNS: &str = "id, received_at, date, subject, to_address, from_address, body, \
                       cc, bcc, rcpt, mime_version, content_type, unread, data";

fn stored_from_row(row: &SqliteRow) -> Result<StoredMail> {
    let received_at: String = row.get("received_at");
    let received_at = DateTime::parse_from_rfc3339(&received_at)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);

    Ok(StoredMail {
        id: MailId(row.get::<i64, _>("id")),
        record: MailRecord {
            received_at,
            date: row.get("date"),
            subject: row.get("subject"),
            to: row.get("to_address"),
            from: row.get("from_address"),
            body: row.get("body"),
            cc: row.get("cc"),
            bcc: row.get("bcc"),
            rcpt: row.get("rcpt"),
            mime_version: row.get("mime_version"),
            content_type: row.get("content_type"),
            unread: row.get("unread"),
            data: row.get("data"),
        },
    })
}

/// Checks that `table` is a plain SQL identifier.
///
/// # Errors
///
/// Returns [`Error::Config`] for anything outside `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid table name: '{table}'")))
    }
}

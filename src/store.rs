//! SQLite-backed result store: companies, probe questions, models and the
//! append-only rank observations recorded against them.
//!
//! Rank records are never updated in place. The "current" rank for a
//! `(question, model)` pair is the record with the greatest `observed_at`,
//! ties broken by insertion order (autoincrement id).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub site_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub company_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub provider_label: String,
}

/// One observation of a company's position in one model's answer.
/// `rank = None` means the company was not detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRecord {
    pub id: i64,
    pub question_id: i64,
    pub model_id: i64,
    pub rank: Option<i64>,
    pub observed_at: DateTime<Utc>,
}

// =============================================================================
// Error
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store is shut down")]
    Closed,
    #[error("task join error: {0}")]
    Join(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// =============================================================================
// Trait
// =============================================================================

/// The reads and writes the ranking pipeline needs.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get_company(&self, company_id: i64) -> Result<Company, StoreError>;

    /// Questions of a company in insertion order.
    async fn questions_for(&self, company_id: i64) -> Result<Vec<Question>, StoreError>;

    /// Look a model up by name, inserting it if absent. Never creates two rows
    /// for one name; a differing `provider_label` overwrites the stored one.
    async fn get_or_create_model(
        &self,
        name: &str,
        provider_label: &str,
    ) -> Result<i64, StoreError>;

    async fn find_model(&self, name: &str) -> Result<Option<Model>, StoreError>;

    /// Insert a new observation stamped with the current time.
    async fn append_rank(
        &self,
        question_id: i64,
        model_id: i64,
        rank: Option<i64>,
    ) -> Result<RankRecord, StoreError>;

    async fn latest_for(
        &self,
        question_id: i64,
        model_id: i64,
    ) -> Result<Option<RankRecord>, StoreError>;

    /// Up to two most recent observations, newest first.
    async fn latest_two_for(
        &self,
        question_id: i64,
        model_id: i64,
    ) -> Result<Vec<RankRecord>, StoreError>;
}

// =============================================================================
// SQLite
// =============================================================================

#[derive(Clone)]
pub struct SqliteResultStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    /// Gate concurrent spawn_blocking calls so only one blocking thread waits
    /// on the connection mutex at a time.
    sem: Arc<Semaphore>,
}

impl SqliteResultStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        Self::create_tables(&conn)?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            sem: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS companies ( \
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               name TEXT NOT NULL, \
               site_url TEXT NOT NULL \
             ); \
             CREATE TABLE IF NOT EXISTS questions ( \
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE, \
               text TEXT NOT NULL \
             ); \
             CREATE INDEX IF NOT EXISTS idx_questions_company ON questions(company_id); \
             CREATE TABLE IF NOT EXISTS models ( \
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               name TEXT NOT NULL UNIQUE, \
               provider_label TEXT NOT NULL \
             ); \
             CREATE TABLE IF NOT EXISTS rank_records ( \
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE, \
               model_id INTEGER NOT NULL REFERENCES models(id) ON DELETE CASCADE, \
               rank INTEGER, \
               observed_at INTEGER NOT NULL \
             ); \
             CREATE INDEX IF NOT EXISTS idx_rank_records_pair \
               ON rank_records(question_id, model_id, observed_at, id);",
        )?;
        Ok(())
    }

    /// Lock the connection. A poisoned mutex still guards a usable connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self.sem.acquire().await.map_err(|_| StoreError::Closed)?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    // -------------------------------------------------------------------------
    // Companies
    // -------------------------------------------------------------------------

    pub async fn insert_company(&self, name: &str, site_url: &str) -> Result<Company, StoreError> {
        let name = name.trim().to_string();
        let site_url = site_url.trim().to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO companies (name, site_url) VALUES (?1, ?2)",
                params![name, site_url],
            )?;
            Ok(Company {
                id: conn.last_insert_rowid(),
                name,
                site_url,
            })
        })
        .await
    }

    pub async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, site_url FROM companies ORDER BY id")?;
            let mut rows = stmt.query([])?;
            let mut companies = Vec::new();
            while let Some(row) = rows.next()? {
                companies.push(row_to_company(row)?);
            }
            Ok(companies)
        })
        .await
    }

    /// Delete a company with its questions and their rank records.
    pub async fn delete_company(&self, company_id: i64) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            let rows = conn.execute("DELETE FROM companies WHERE id = ?1", params![company_id])?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("company {company_id}")));
            }
            Ok(())
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Questions
    // -------------------------------------------------------------------------

    /// Replace a company's question set in one transaction. Old questions and
    /// every rank record referencing them are deleted. Blank texts are skipped.
    pub async fn replace_questions(
        &self,
        company_id: i64,
        texts: Vec<String>,
    ) -> Result<Vec<Question>, StoreError> {
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM companies WHERE id = ?1",
                    params![company_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("company {company_id}")));
            }

            tx.execute("DELETE FROM questions WHERE company_id = ?1", params![company_id])?;

            let mut questions = Vec::with_capacity(texts.len());
            {
                let mut stmt =
                    tx.prepare("INSERT INTO questions (company_id, text) VALUES (?1, ?2)")?;
                for text in texts {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    stmt.execute(params![company_id, text])?;
                    questions.push(Question {
                        id: tx.last_insert_rowid(),
                        company_id,
                        text,
                    });
                }
            }
            tx.commit()?;
            Ok(questions)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Rank records
    // -------------------------------------------------------------------------

    /// Insert an observation with an explicit timestamp, for backfills.
    pub async fn append_rank_at(
        &self,
        question_id: i64,
        model_id: i64,
        rank: Option<i64>,
        observed_at: DateTime<Utc>,
    ) -> Result<RankRecord, StoreError> {
        // Stored at millisecond precision.
        let observed_at = DateTime::<Utc>::from_timestamp_millis(observed_at.timestamp_millis())
            .unwrap_or(observed_at);
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO rank_records (question_id, model_id, rank, observed_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![question_id, model_id, rank, observed_at.timestamp_millis()],
            )?;
            Ok(RankRecord {
                id: conn.last_insert_rowid(),
                question_id,
                model_id,
                rank,
                observed_at,
            })
        })
        .await
    }

    /// Every observation for a pair, newest first.
    pub async fn history_for(
        &self,
        question_id: i64,
        model_id: i64,
    ) -> Result<Vec<RankRecord>, StoreError> {
        self.recent_for(question_id, model_id, -1).await
    }

    pub async fn count_records_for(
        &self,
        question_id: i64,
        model_id: i64,
    ) -> Result<i64, StoreError> {
        self.blocking(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM rank_records WHERE question_id = ?1 AND model_id = ?2",
                params![question_id, model_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Newest-first observations for a pair; a negative `limit` means all.
    async fn recent_for(
        &self,
        question_id: i64,
        model_id: i64,
        limit: i64,
    ) -> Result<Vec<RankRecord>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question_id, model_id, rank, observed_at FROM rank_records \
                 WHERE question_id = ?1 AND model_id = ?2 \
                 ORDER BY observed_at DESC, id DESC LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![question_id, model_id, limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn get_company(&self, company_id: i64) -> Result<Company, StoreError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, name, site_url FROM companies WHERE id = ?1",
                params![company_id],
                row_to_company,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("company {company_id}")))
        })
        .await
    }

    async fn questions_for(&self, company_id: i64) -> Result<Vec<Question>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, company_id, text FROM questions WHERE company_id = ?1 ORDER BY id",
            )?;
            let mut rows = stmt.query(params![company_id])?;
            let mut questions = Vec::new();
            while let Some(row) = rows.next()? {
                questions.push(Question {
                    id: row.get(0)?,
                    company_id: row.get(1)?,
                    text: row.get(2)?,
                });
            }
            Ok(questions)
        })
        .await
    }

    async fn get_or_create_model(
        &self,
        name: &str,
        provider_label: &str,
    ) -> Result<i64, StoreError> {
        let name = name.to_string();
        let provider_label = provider_label.to_string();
        self.blocking(move |conn| {
            Ok(conn.query_row(
                "INSERT INTO models (name, provider_label) VALUES (?1, ?2) \
                 ON CONFLICT(name) DO UPDATE SET provider_label = excluded.provider_label \
                 RETURNING id",
                params![name, provider_label],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn find_model(&self, name: &str) -> Result<Option<Model>, StoreError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, provider_label FROM models WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(Model {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            provider_label: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn append_rank(
        &self,
        question_id: i64,
        model_id: i64,
        rank: Option<i64>,
    ) -> Result<RankRecord, StoreError> {
        self.append_rank_at(question_id, model_id, rank, Utc::now()).await
    }

    async fn latest_for(
        &self,
        question_id: i64,
        model_id: i64,
    ) -> Result<Option<RankRecord>, StoreError> {
        Ok(self.recent_for(question_id, model_id, 1).await?.into_iter().next())
    }

    async fn latest_two_for(
        &self,
        question_id: i64,
        model_id: i64,
    ) -> Result<Vec<RankRecord>, StoreError> {
        self.recent_for(question_id, model_id, 2).await
    }
}

fn row_to_company(row: &rusqlite::Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        site_url: row.get(2)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RankRecord> {
    let millis: i64 = row.get(4)?;
    Ok(RankRecord {
        id: row.get(0)?,
        question_id: row.get(1)?,
        model_id: row.get(2)?,
        rank: row.get(3)?,
        observed_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
    })
}

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::{GistRef, RepoConfig, Signature};

/// Async-safe handle to the CLA database.
///
/// Wraps `ClaDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ClaDb>>,
}

impl DbHandle {
    pub fn new(db: ClaDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ClaDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

const REPO_COLUMNS: &str = "owner, repo, gist_url, gist_version, token, created_at";
const SIGNATURE_COLUMNS: &str = "id, owner, repo, user, user_id, gist_url, gist_version, created_at";

pub struct ClaDb {
    conn: Connection,
}

impl ClaDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS repos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    gist_url TEXT NOT NULL,
                    gist_version TEXT,
                    token TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE(owner, repo)
                );

                CREATE TABLE IF NOT EXISTS signatures (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    user TEXT NOT NULL,
                    user_id INTEGER NOT NULL,
                    gist_url TEXT NOT NULL,
                    gist_version TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(owner, repo, gist_url, gist_version, user)
                );

                CREATE INDEX IF NOT EXISTS idx_signatures_repo ON signatures(owner, repo, gist_url);
                CREATE INDEX IF NOT EXISTS idx_signatures_user ON signatures(user);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Repositories ──────────────────────────────────────────────────

    /// Insert a repository link, or replace gist and token of an existing one.
    pub fn upsert_repo(
        &self,
        owner: &str,
        repo: &str,
        gist: &GistRef,
        token: Option<&str>,
    ) -> Result<RepoConfig> {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        self.conn
            .execute(
                "INSERT INTO repos (owner, repo, gist_url, gist_version, token, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(owner, repo) DO UPDATE SET
                    gist_url = excluded.gist_url,
                    gist_version = excluded.gist_version,
                    token = excluded.token",
                params![owner, repo, gist.url, gist.version, token, now],
            )
            .context("Failed to upsert repo")?;
        self.get_repo(owner, repo)?
            .context("Repo not found after upsert")
    }

    pub fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<RepoConfig>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM repos WHERE owner = ?1 AND repo = ?2",
                    REPO_COLUMNS
                ),
                params![owner, repo],
                repo_from_row,
            )
            .optional()
            .context("Failed to query repo")
    }

    pub fn delete_repo(&self, owner: &str, repo: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM repos WHERE owner = ?1 AND repo = ?2",
                params![owner, repo],
            )
            .context("Failed to delete repo")?;
        Ok(affected > 0)
    }

    // ── Signatures ────────────────────────────────────────────────────

    /// Record a signature. Signing the same gist version twice returns the
    /// original record.
    pub fn insert_signature(
        &self,
        owner: &str,
        repo: &str,
        user: &str,
        user_id: i64,
        gist: &GistRef,
    ) -> Result<Signature> {
        let version = gist
            .version
            .as_deref()
            .context("Cannot record a signature without a gist version")?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        self.conn
            .execute(
                "INSERT OR IGNORE INTO signatures
                    (owner, repo, user, user_id, gist_url, gist_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![owner, repo, user, user_id, gist.url, version, now],
            )
            .context("Failed to insert signature")?;
        self.find_signature(owner, repo, user, gist)?
            .context("Signature not found after insert")
    }

    /// Signature of `user` against exactly this gist url and version.
    pub fn find_signature(
        &self,
        owner: &str,
        repo: &str,
        user: &str,
        gist: &GistRef,
    ) -> Result<Option<Signature>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM signatures
                     WHERE owner = ?1 AND repo = ?2 AND user = ?3
                       AND gist_url = ?4 AND gist_version = ?5",
                    SIGNATURE_COLUMNS
                ),
                params![owner, repo, user, gist.url, gist.version],
                signature_from_row,
            )
            .optional()
            .context("Failed to query signature")
    }

    /// All signatures for a gist. Without a version every revision matches.
    pub fn list_signatures(&self, owner: &str, repo: &str, gist: &GistRef) -> Result<Vec<Signature>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM signatures
                 WHERE owner = ?1 AND repo = ?2 AND gist_url = ?3
                   AND (?4 IS NULL OR gist_version = ?4)
                 ORDER BY created_at, id",
                SIGNATURE_COLUMNS
            ))
            .context("Failed to prepare list_signatures")?;
        let rows = stmt
            .query_map(
                params![owner, repo, gist.url, gist.version],
                signature_from_row,
            )
            .context("Failed to query signatures")?;
        collect_rows(rows)
    }

    pub fn last_signature(
        &self,
        owner: &str,
        repo: &str,
        user: &str,
        gist_url: &str,
    ) -> Result<Option<Signature>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM signatures
                     WHERE owner = ?1 AND repo = ?2 AND user = ?3 AND gist_url = ?4
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1",
                    SIGNATURE_COLUMNS
                ),
                params![owner, repo, user, gist_url],
                signature_from_row,
            )
            .optional()
            .context("Failed to query last signature")
    }

    pub fn signatures_for_user(&self, user: &str) -> Result<Vec<Signature>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM signatures WHERE user = ?1 ORDER BY created_at DESC, id DESC",
                SIGNATURE_COLUMNS
            ))
            .context("Failed to prepare signatures_for_user")?;
        let rows = stmt
            .query_map(params![user], signature_from_row)
            .context("Failed to query user signatures")?;
        collect_rows(rows)
    }
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<RepoConfig> {
    Ok(RepoConfig {
        owner: row.get(0)?,
        repo: row.get(1)?,
        gist: GistRef {
            url: row.get(2)?,
            version: row.get(3)?,
        },
        token: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn signature_from_row(row: &Row<'_>) -> rusqlite::Result<Signature> {
    Ok(Signature {
        id: row.get(0)?,
        owner: row.get(1)?,
        repo: row.get(2)?,
        user: row.get(3)?,
        user_id: row.get(4)?,
        gist_url: row.get(5)?,
        gist_version: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("Failed to read row")?);
    }
    Ok(out)
}

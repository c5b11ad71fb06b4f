//! Response cache keyed by exact request URL.
//!
//! The whole table lives in memory for the run. With a path configured, it
//! is loaded from SQLite at startup and [`persist`](ResponseCache::persist)
//! writes the URLs added since the last flush in one transaction. Only
//! completed HTTP exchanges are cached; transport failures never are.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OpenFlags, params};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache database {path}: {source}")]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A memoized HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct ResponseCache {
    entries: HashMap<String, CachedResponse>,
    /// URLs inserted since the last successful persist.
    pending: Vec<String>,
    path: Option<PathBuf>,
}

fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         CREATE TABLE IF NOT EXISTS responses (
             url        TEXT PRIMARY KEY,
             status     INTEGER NOT NULL,
             body       TEXT NOT NULL,
             fetched_at INTEGER NOT NULL
         );",
    )?;
    Ok(conn)
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl ResponseCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            entries: HashMap::new(),
            pending: Vec::new(),
            path: None,
        }
    }

    /// Open (or create) the cache database at `path` and load every row.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let sqlite_err = |source| CacheError::Sqlite {
            path: path.to_path_buf(),
            source,
        };

        let conn = open_sqlite(path).map_err(sqlite_err)?;
        let entries = load_rows(&conn).map_err(sqlite_err)?;
        tracing::info!(path = %path.display(), entries = entries.len(), "response cache loaded");

        Ok(Self {
            entries,
            pending: Vec::new(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Delete the cache database at `path`, if any.
    pub fn clear_file(path: &Path) -> Result<(), CacheError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "response cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, url: &str) -> Option<&CachedResponse> {
        self.entries.get(url)
    }

    pub fn insert(&mut self, url: &str, response: CachedResponse) {
        tracing::trace!(url, status = response.status, "cache insert");
        self.entries.insert(url.to_string(), response);
        if !self.pending.iter().any(|p| p == url) {
            self.pending.push(url.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write pending entries to disk. Returns how many rows were written.
    ///
    /// A no-op without a configured path or with nothing new to write.
    pub fn persist(&mut self) -> Result<usize, CacheError> {
        let Some(path) = &self.path else {
            tracing::debug!("no cache path configured, skipping persist");
            return Ok(0);
        };
        if self.pending.is_empty() {
            tracing::debug!(path = %path.display(), "nothing new to persist");
            return Ok(0);
        }
        let sqlite_err = |source| CacheError::Sqlite {
            path: path.clone(),
            source,
        };

        let mut conn = open_sqlite(path).map_err(sqlite_err)?;
        let tx = conn.transaction().map_err(sqlite_err)?;
        let epoch = now_epoch();
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO responses (url, status, body, fetched_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(sqlite_err)?;
            for url in &self.pending {
                if let Some(resp) = self.entries.get(url) {
                    stmt.execute(params![url, resp.status, resp.body, epoch])
                        .map_err(sqlite_err)?;
                }
            }
        }
        tx.commit().map_err(sqlite_err)?;

        let written = self.pending.len();
        self.pending.clear();
        tracing::debug!(path = %path.display(), written, "response cache persisted");
        Ok(written)
    }
}

fn load_rows(conn: &Connection) -> Result<HashMap<String, CachedResponse>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT url, status, body FROM responses")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            CachedResponse {
                status: row.get(1)?,
                body: row.get(2)?,
            },
        ))
    })?;
    let entries = rows.collect::<Result<HashMap<_, _>, _>>()?;
    Ok(entries)
}

/// `<cache dir>/<bib stem>_responses.sqlite`; the cache dir defaults to the
/// platform cache directory plus `dblpify`.
pub fn default_cache_path(cache_dir: Option<&Path>, bib_path: &Path) -> Option<PathBuf> {
    let dir = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::cache_dir()?.join("dblpify"),
    };
    let stem = bib_path.file_stem()?.to_string_lossy();
    Some(dir.join(format!("{stem}_responses.sqlite")))
}

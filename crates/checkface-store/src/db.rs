use rusqlite::{Connection, ErrorCode, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS face_list (
    name TEXT NOT NULL,
    user_id INTEGER PRIMARY KEY,
    photo_file TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS check_list (
    name TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    time DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_check_list_user ON check_list (user_id);
CREATE INDEX IF NOT EXISTS idx_check_list_time ON check_list (time);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("photo error: {0}")]
    Photo(#[from] checkface_capture::CaptureError),
    #[error("unsupported photo extension: {0}")]
    UnsupportedExtension(String),
    #[error("user id {0} is already enrolled")]
    UserIdTaken(i64),
    #[error("database lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Map a uniqueness violation on `face_list.user_id` to [`StoreError::UserIdTaken`].
pub(crate) fn map_conflict(err: rusqlite::Error, user_id: i64) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::UserIdTaken(user_id)
        }
        other => StoreError::Database(other),
    }
}

/// Shared handle to the SQLite database holding both tables.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!("schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    /// Run `f` inside a transaction, committing only if it succeeds.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

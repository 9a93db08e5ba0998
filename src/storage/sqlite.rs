//! SQLite-backed storage gateway.
//!
//! One `rusqlite::Connection` behind a mutex; every query runs on the
//! blocking pool so the async handlers never stall a runtime worker.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use super::models::{BankCard, Credential, FileMetadata, NewFile, Note, User, UserId};
use super::StorageGateway;
use crate::errors::{KeeperError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    login    TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_credentials (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    login       TEXT NOT NULL,
    password    TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS notes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    text        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS bank_cards (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    card_number     TEXT NOT NULL,
    owner           TEXT NOT NULL,
    expiration_date TEXT NOT NULL,
    cvv             TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    bucket_name TEXT NOT NULL,
    file_name   TEXT NOT NULL,
    file_size   INTEGER NOT NULL,
    content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    UNIQUE (user_id, file_name)
);
";

/// SQLite implementation of [`StorageGateway`].
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`.
    ///
    /// The schema is not created here; call [`StorageGateway::bootstrap`].
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Owner-only permissions on the database file.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        Self::from_connection(conn)
    }

    /// A private database that disappears with the value.  Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| KeeperError::Storage("connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| KeeperError::Storage(format!("storage task failed: {e}")))?
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn size_to_sql(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| KeeperError::Storage(format!("file size {size} too large")))
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: row.get(0)?,
        user_id: row.get(1)?,
        login: row.get(2)?,
        password: row.get(3)?,
        description: row.get(4)?,
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        user_id: row.get(1)?,
        text: row.get(2)?,
        description: row.get(3)?,
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<BankCard> {
    Ok(BankCard {
        id: row.get(0)?,
        user_id: row.get(1)?,
        number: row.get(2)?,
        owner: row.get(3)?,
        expire_date: row.get(4)?,
        cvv: row.get(5)?,
        description: row.get(6)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileMetadata> {
    let size: i64 = row.get(4)?;
    let size = u64::try_from(size)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(e)))?;
    let ts: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&ts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(FileMetadata {
        id: row.get(0)?,
        user_id: row.get(1)?,
        bucket: row.get(2)?,
        name: row.get(3)?,
        size,
        content_type: row.get(5)?,
        description: row.get(6)?,
        created_at,
    })
}

const CREDENTIAL_COLUMNS: &str = "id, user_id, login, password, description";
const NOTE_COLUMNS: &str = "id, user_id, text, description";
const CARD_COLUMNS: &str =
    "id, user_id, card_number, owner, expiration_date, cvv, description";
const FILE_COLUMNS: &str =
    "id, user_id, bucket_name, file_name, file_size, content_type, description, created_at";

/// Collect every row of an owner-scoped listing.
fn list_owned<T>(
    conn: &Connection,
    sql: &str,
    user_id: UserId,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![user_id], map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[async_trait]
impl StorageGateway for SqliteStorage {
    async fn bootstrap(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            debug!("storage schema ready");
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn add_user(&self, login: &str, password: &str) -> Result<UserId> {
        let login = login.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            match conn.execute(
                "INSERT INTO users (login, password) VALUES (?1, ?2)",
                params![login, password],
            ) {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => {
                    Err(KeeperError::AlreadyExists("user already exists".into()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_user(&self, login: &str) -> Result<Option<User>> {
        let login = login.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, login, password FROM users WHERE login = ?1",
                    params![login],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            login: row.get(1)?,
                            password: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn add_credential(&self, credential: &Credential) -> Result<i64> {
        let c = credential.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_credentials (user_id, login, password, description)
                 VALUES (?1, ?2, ?3, ?4)",
                params![c.user_id, c.login, c.password, c.description],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_credentials(&self, user_id: UserId) -> Result<Vec<Credential>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM user_credentials WHERE user_id = ?1 ORDER BY id"
            );
            list_owned(conn, &sql, user_id, credential_from_row)
        })
        .await
    }

    async fn get_credential(&self, user_id: UserId, id: i64) -> Result<Option<Credential>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM user_credentials WHERE id = ?1 AND user_id = ?2"
            );
            Ok(conn
                .query_row(&sql, params![id, user_id], credential_from_row)
                .optional()?)
        })
        .await
    }

    async fn remove_credential(&self, user_id: UserId, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM user_credentials WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn add_note(&self, note: &Note) -> Result<i64> {
        let n = note.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO notes (user_id, text, description) VALUES (?1, ?2, ?3)",
                params![n.user_id, n.text, n.description],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_notes(&self, user_id: UserId) -> Result<Vec<Note>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ?1 ORDER BY id");
            list_owned(conn, &sql, user_id, note_from_row)
        })
        .await
    }

    async fn get_note(&self, user_id: UserId, id: i64) -> Result<Option<Note>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1 AND user_id = ?2");
            Ok(conn
                .query_row(&sql, params![id, user_id], note_from_row)
                .optional()?)
        })
        .await
    }

    async fn remove_note(&self, user_id: UserId, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn add_card(&self, card: &BankCard) -> Result<i64> {
        let c = card.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bank_cards
                     (user_id, card_number, owner, expiration_date, cvv, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![c.user_id, c.number, c.owner, c.expire_date, c.cvv, c.description],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_cards(&self, user_id: UserId) -> Result<Vec<BankCard>> {
        self.with_conn(move |conn| {
            let sql =
                format!("SELECT {CARD_COLUMNS} FROM bank_cards WHERE user_id = ?1 ORDER BY id");
            list_owned(conn, &sql, user_id, card_from_row)
        })
        .await
    }

    async fn get_card(&self, user_id: UserId, id: i64) -> Result<Option<BankCard>> {
        self.with_conn(move |conn| {
            let sql =
                format!("SELECT {CARD_COLUMNS} FROM bank_cards WHERE id = ?1 AND user_id = ?2");
            Ok(conn
                .query_row(&sql, params![id, user_id], card_from_row)
                .optional()?)
        })
        .await
    }

    async fn remove_card(&self, user_id: UserId, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM bank_cards WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn upsert_file(&self, file: &NewFile) -> Result<()> {
        let f = file.clone();
        let size = size_to_sql(f.size)?;
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO files
                     (user_id, bucket_name, file_name, file_size, content_type,
                      description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id, file_name) DO UPDATE SET
                     bucket_name  = excluded.bucket_name,
                     file_size    = excluded.file_size,
                     content_type = excluded.content_type,
                     description  = excluded.description",
                params![f.user_id, f.bucket, f.name, size, f.content_type, f.description, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_files(&self, user_id: UserId) -> Result<Vec<FileMetadata>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE user_id = ?1 ORDER BY id");
            list_owned(conn, &sql, user_id, file_from_row)
        })
        .await
    }

    async fn get_file(&self, user_id: UserId, id: i64) -> Result<Option<FileMetadata>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1 AND user_id = ?2");
            Ok(conn
                .query_row(&sql, params![id, user_id], file_from_row)
                .optional()?)
        })
        .await
    }

    async fn get_file_by_name(
        &self,
        user_id: UserId,
        name: &str,
    ) -> Result<Option<FileMetadata>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE file_name = ?1 AND user_id = ?2"
            );
            Ok(conn
                .query_row(&sql, params![name, user_id], file_from_row)
                .optional()?)
        })
        .await
    }

    async fn remove_file(&self, user_id: UserId, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM files WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(n > 0)
        })
        .await
    }
}

#![forbid(unsafe_code)]

mod ctl;
mod docs;
mod error;
mod extern_map;
mod filter_sets;
mod query;
mod requests;
mod sessions;
mod versions;

pub use ctl::CtlAction;
pub use docs::{DocRow, VersionInfo};
pub use error::StoreError;
pub use extern_map::ExternMapOutcome;
pub use filter_sets::{FilterSetContent, FilterSetInfo, MAX_FILTER_SET_DEPTH};
pub use query::SqlResultTable;
pub use requests::*;
pub use sessions::SessionInfo;

use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;

/// One repository store per thread: a single SQLite connection plus the
/// storage directory it lives in. Never shared across threads.
#[derive(Debug)]
pub struct CdrStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl CdrStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join("cdr_repository.db");
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        preflight_gate(&conn)?;
        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Whether the connection is outside any explicit transaction. The
    /// dispatcher checks this between commands.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Rolls back whatever explicit transaction is still open, if any.
    pub fn rollback_if_open(&self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

pub(crate) fn now_ms() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(_) => 0,
    }
}

/// Current UTC time as an RFC 3339 string, the TEXT timestamp form used in
/// document and mapping rows.
pub(crate) fn now_stamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    use rusqlite::OptionalExtension;

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = [
        "repository_state",
        "document",
        "doc_version",
        "filter_set",
        "filter_set_member",
        "external_map_usage",
        "external_map",
        "external_map_nomap_pattern",
        "zipcode",
        "session",
        "usr",
        "action_grant",
        "ctl",
        "command_log",
        "filter_profile",
        "import_event",
        "mailer_response",
    ]
    .into_iter()
    .collect();

    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM repository_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let now_ms = now_ms();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS repository_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS document (
          id INTEGER PRIMARY KEY,
          title TEXT NOT NULL,
          doc_type TEXT NOT NULL,
          active_status TEXT NOT NULL DEFAULT 'A',
          first_pub TEXT,
          xml TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_document_title ON document(title);
        CREATE INDEX IF NOT EXISTS idx_document_type ON document(doc_type);

        CREATE TABLE IF NOT EXISTS doc_version (
          id INTEGER NOT NULL,
          num INTEGER NOT NULL,
          dt TEXT NOT NULL,
          publishable TEXT NOT NULL DEFAULT 'N',
          xml TEXT NOT NULL,
          PRIMARY KEY(id, num),
          FOREIGN KEY(id) REFERENCES document(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS filter_set (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          description TEXT NOT NULL,
          notes TEXT
        );

        CREATE TABLE IF NOT EXISTS filter_set_member (
          filter_set INTEGER NOT NULL,
          position INTEGER NOT NULL,
          filter INTEGER,
          subset INTEGER,
          PRIMARY KEY(filter_set, position),
          FOREIGN KEY(filter_set) REFERENCES filter_set(id) ON DELETE CASCADE,
          CHECK((filter IS NULL) <> (subset IS NULL))
        );

        CREATE TABLE IF NOT EXISTS external_map_usage (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS external_map (
          usage INTEGER NOT NULL,
          value TEXT NOT NULL,
          doc_id INTEGER,
          bogus TEXT NOT NULL DEFAULT 'N',
          mappable TEXT NOT NULL DEFAULT 'Y',
          last_mod TEXT,
          PRIMARY KEY(usage, value),
          FOREIGN KEY(usage) REFERENCES external_map_usage(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS external_map_nomap_pattern (
          pattern TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS zipcode (
          zip TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS session (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          usr TEXT NOT NULL,
          initiated_ms INTEGER NOT NULL,
          last_act_ms INTEGER NOT NULL,
          ended_ms INTEGER
        );

        CREATE TABLE IF NOT EXISTS usr (
          name TEXT PRIMARY KEY,
          password_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS action_grant (
          usr TEXT NOT NULL,
          action TEXT NOT NULL,
          PRIMARY KEY(usr, action),
          FOREIGN KEY(usr) REFERENCES usr(name) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS ctl (
          grp TEXT NOT NULL,
          key TEXT NOT NULL,
          val TEXT NOT NULL,
          comment TEXT,
          inactivated TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_ctl_grp_key ON ctl(grp, key);

        CREATE TABLE IF NOT EXISTS command_log (
          thread TEXT NOT NULL,
          received TEXT NOT NULL,
          command TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS filter_profile (
          id INTEGER NOT NULL,
          millis INTEGER NOT NULL,
          dt TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_event (
          cdr_id INTEGER NOT NULL,
          dt TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mailer_response (
          doc_id INTEGER NOT NULL,
          received TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT INTO repository_state(singleton, schema_version, created_at_ms) \
         VALUES (1, ?1, ?2) \
         ON CONFLICT(singleton) DO NOTHING",
        rusqlite::params![SCHEMA_VERSION, now_ms],
    )?;

    Ok(())
}

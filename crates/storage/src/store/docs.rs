#![forbid(unsafe_code)]

use cdr_core::DocId;
use rusqlite::{OptionalExtension, params};

use super::{AddDocumentRequest, AddVersionRequest, CdrStore, StoreError, now_stamp};

/// Current working copy of a document, with its control columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRow {
    pub id: DocId,
    pub title: String,
    pub doc_type: String,
    pub active_status: String,
    pub first_pub: Option<String>,
    pub xml: String,
}

/// Version bookkeeping for one document, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Highest version number, or -1 if never versioned.
    pub last_any: i32,
    /// Highest publishable version number, or -1.
    pub last_pub: i32,
    /// Whether the working copy differs from the latest version.
    pub is_changed: bool,
}

impl CdrStore {
    pub fn add_document(&mut self, request: AddDocumentRequest) -> Result<(), StoreError> {
        if request.title.is_empty() {
            return Err(StoreError::InvalidInput("document title is empty"));
        }
        self.conn().execute(
            "INSERT INTO document(id, title, doc_type, active_status, first_pub, xml) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET \
               title=excluded.title, doc_type=excluded.doc_type, \
               active_status=excluded.active_status, first_pub=excluded.first_pub, \
               xml=excluded.xml",
            params![
                request.id.value(),
                request.title,
                request.doc_type,
                request.active_status,
                request.first_pub,
                request.xml,
            ],
        )?;
        Ok(())
    }

    pub fn add_version(&mut self, request: AddVersionRequest) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO doc_version(id, num, dt, publishable, xml) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.id.value(),
                request.num,
                request.dt,
                if request.publishable { "Y" } else { "N" },
                request.xml,
            ],
        )?;
        Ok(())
    }

    pub fn document(&self, id: DocId) -> Result<DocRow, StoreError> {
        self.conn()
            .query_row(
                "SELECT title, doc_type, active_status, first_pub, xml \
                 FROM document WHERE id=?1",
                params![id.value()],
                |row| {
                    Ok(DocRow {
                        id,
                        title: row.get(0)?,
                        doc_type: row.get(1)?,
                        active_status: row.get(2)?,
                        first_pub: row.get(3)?,
                        xml: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::UnknownDocument(id.value()))
    }

    pub fn doc_title(&self, id: DocId) -> Result<String, StoreError> {
        self.conn()
            .query_row(
                "SELECT title FROM document WHERE id=?1",
                params![id.value()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::UnknownDocument(id.value()))
    }

    pub fn ids_for_title(&self, title: &str) -> Result<Vec<DocId>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM document WHERE title=?1 ORDER BY id")?;
        let mut rows = stmt.query(params![title])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(DocId::new(row.get(0)?));
        }
        Ok(out)
    }

    /// Title lookup that must land on exactly one document.
    pub fn unique_id_for_title(&self, title: &str) -> Result<DocId, StoreError> {
        let ids = self.ids_for_title(title)?;
        match ids.as_slice() {
            [] => Err(StoreError::UnknownTitle(title.to_string())),
            [one] => Ok(*one),
            _ => Err(StoreError::AmbiguousTitle(title.to_string())),
        }
    }

    /// Every stored filter stylesheet, for the startup profiling map.
    pub fn filter_inventory(&self) -> Result<Vec<(DocId, String)>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, xml FROM document WHERE doc_type='Filter' ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push((DocId::new(row.get(0)?), row.get(1)?));
        }
        Ok(out)
    }

    /// Filter ids and titles, for the inventory listing command.
    pub fn filter_titles(&self) -> Result<Vec<(DocId, String)>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, title FROM document WHERE doc_type='Filter' ORDER BY title")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push((DocId::new(row.get(0)?), row.get(1)?));
        }
        Ok(out)
    }

    pub fn record_filter_timing(&self, id: DocId, millis: i64) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO filter_profile(id, millis, dt) VALUES (?1, ?2, ?3)",
            params![id.value(), millis, now_stamp()],
        )?;
        Ok(())
    }

    pub fn latest_mailer_response(&self, id: DocId) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT MAX(received) FROM mailer_response WHERE doc_id=?1",
                params![id.value()],
                |row| row.get(0),
            )
            .optional()?
            .flatten())
    }

    pub fn latest_import_event(&self, id: DocId) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT MAX(dt) FROM import_event WHERE cdr_id=?1",
                params![id.value()],
                |row| row.get(0),
            )
            .optional()?
            .flatten())
    }
}

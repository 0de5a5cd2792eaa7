#![forbid(unsafe_code)]

use cdr_core::{DocId, VersionSpec};
use rusqlite::{OptionalExtension, params};

use super::{CdrStore, StoreError, VersionInfo};

impl CdrStore {
    /// Fetches document XML under the requested version policy. `max_date`
    /// is the ceiling: only versions filed at or before it qualify. Dates
    /// compare lexicographically, which is sound for ISO-8601 text.
    pub fn doc_xml(
        &self,
        id: DocId,
        spec: VersionSpec,
        max_date: &str,
    ) -> Result<String, StoreError> {
        match spec {
            VersionSpec::Current => Ok(self.document(id)?.xml),
            VersionSpec::Number(num) => self
                .conn()
                .query_row(
                    "SELECT xml FROM doc_version WHERE id=?1 AND num=?2",
                    params![id.value(), num],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::VersionNotFound {
                    doc_id: id.value(),
                    requested: num.to_string(),
                }),
            VersionSpec::Last => self
                .last_version_xml(id, max_date, false)?
                .ok_or_else(|| StoreError::VersionNotFound {
                    doc_id: id.value(),
                    requested: String::from("last"),
                }),
            VersionSpec::Lastp => self
                .last_version_xml(id, max_date, true)?
                .ok_or_else(|| StoreError::VersionNotFound {
                    doc_id: id.value(),
                    requested: String::from("lastp"),
                }),
        }
    }

    fn last_version_xml(
        &self,
        id: DocId,
        max_date: &str,
        publishable_only: bool,
    ) -> Result<Option<String>, StoreError> {
        let sql = if publishable_only {
            "SELECT xml FROM doc_version \
             WHERE id=?1 AND dt<=?2 AND publishable='Y' \
             ORDER BY num DESC LIMIT 1"
        } else {
            "SELECT xml FROM doc_version \
             WHERE id=?1 AND dt<=?2 \
             ORDER BY num DESC LIMIT 1"
        };
        Ok(self
            .conn()
            .query_row(sql, params![id.value(), max_date], |row| row.get(0))
            .optional()?)
    }

    /// Highest publishable version number, or 0 when none exists.
    pub fn get_pv_num(&self, id: DocId) -> Result<i32, StoreError> {
        let num: Option<i32> = self.conn().query_row(
            "SELECT MAX(num) FROM doc_version WHERE id=?1 AND publishable='Y'",
            params![id.value()],
            |row| row.get(0),
        )?;
        Ok(num.unwrap_or(0))
    }

    pub fn version_info(&self, id: DocId) -> Result<VersionInfo, StoreError> {
        let current_xml = self.document(id)?.xml;
        let last: Option<(i32, String)> = self
            .conn()
            .query_row(
                "SELECT num, xml FROM doc_version WHERE id=?1 \
                 ORDER BY num DESC LIMIT 1",
                params![id.value()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let last_pub: Option<i32> = self.conn().query_row(
            "SELECT MAX(num) FROM doc_version WHERE id=?1 AND publishable='Y'",
            params![id.value()],
            |row| row.get(0),
        )?;

        let (last_any, is_changed) = match last {
            Some((num, xml)) => (num, xml != current_xml),
            None => (-1, true),
        };
        Ok(VersionInfo {
            last_any,
            last_pub: last_pub.unwrap_or(-1),
            is_changed,
        })
    }
}

#![forbid(unsafe_code)]

use regex::RegexBuilder;
use rusqlite::{OptionalExtension, params};

use cdr_core::DocId;

use super::{CdrStore, StoreError, now_stamp};

/// Usage whose unmapped values are classified against the non-mappable
/// pattern set; other usages always insert as mappable.
const PATTERN_CLASSIFIED_USAGE: &str = "CT.gov Facilities";

/// Three-way result of an external-identifier lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternMapOutcome {
    /// The value maps to a repository document.
    Mapped(DocId),
    /// Known but not (yet) mapped; callers treat the value as absent.
    Unmapped,
    /// The value is flagged bogus; callers must drop it entirely.
    Drop,
}

impl CdrStore {
    /// Looks up `value` under the named usage. A miss inserts a new unmapped
    /// row (classified mappable or not) so later review can map it; the
    /// second lookup of the same pair finds that row instead of inserting
    /// again.
    pub fn map_external_value(
        &mut self,
        usage: &str,
        value: &str,
    ) -> Result<ExternMapOutcome, StoreError> {
        let usage_id: i32 = self
            .conn()
            .query_row(
                "SELECT id FROM external_map_usage WHERE name=?1",
                params![usage],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownMapUsage(usage.to_string()))?;

        let row: Option<(Option<i32>, String, String)> = self
            .conn()
            .query_row(
                "SELECT doc_id, bogus, mappable FROM external_map \
                 WHERE usage=?1 AND value=?2",
                params![usage_id, value],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((_, bogus, _)) if bogus == "Y" => Ok(ExternMapOutcome::Drop),
            Some((Some(doc_id), _, mappable)) if mappable == "Y" => {
                Ok(ExternMapOutcome::Mapped(DocId::new(doc_id)))
            }
            Some(_) => Ok(ExternMapOutcome::Unmapped),
            None => {
                let mappable = if usage == PATTERN_CLASSIFIED_USAGE
                    && self.matches_nomap_pattern(value)?
                {
                    "N"
                } else {
                    "Y"
                };
                self.conn().execute(
                    "INSERT INTO external_map(usage, value, doc_id, bogus, mappable, last_mod) \
                     VALUES (?1, ?2, NULL, 'N', ?3, ?4) \
                     ON CONFLICT(usage, value) DO NOTHING",
                    params![usage_id, value, mappable, now_stamp()],
                )?;
                Ok(ExternMapOutcome::Unmapped)
            }
        }
    }

    fn matches_nomap_pattern(&self, value: &str) -> Result<bool, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT pattern FROM external_map_nomap_pattern")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let pattern: String = row.get(0)?;
            let regex = RegexBuilder::new(&like_to_regex(&pattern))
                .case_insensitive(true)
                .build()
                .map_err(|_| StoreError::InvalidInput("unusable non-mappable pattern"))?;
            if regex.is_match(value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn add_map_usage(&mut self, name: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO external_map_usage(name) VALUES (?1) \
             ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        Ok(())
    }

    pub fn add_external_mapping(
        &mut self,
        usage: &str,
        value: &str,
        doc_id: Option<DocId>,
        bogus: bool,
    ) -> Result<(), StoreError> {
        let usage_id: i32 = self
            .conn()
            .query_row(
                "SELECT id FROM external_map_usage WHERE name=?1",
                params![usage],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownMapUsage(usage.to_string()))?;
        self.conn().execute(
            "INSERT INTO external_map(usage, value, doc_id, bogus, mappable, last_mod) \
             VALUES (?1, ?2, ?3, ?4, 'Y', ?5) \
             ON CONFLICT(usage, value) DO UPDATE SET \
               doc_id=excluded.doc_id, bogus=excluded.bogus, last_mod=excluded.last_mod",
            params![
                usage_id,
                value,
                doc_id.map(|id| id.value()),
                if bogus { "Y" } else { "N" },
                now_stamp(),
            ],
        )?;
        Ok(())
    }

    pub fn add_nomap_pattern(&mut self, pattern: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO external_map_nomap_pattern(pattern) VALUES (?1) \
             ON CONFLICT(pattern) DO NOTHING",
            params![pattern],
        )?;
        Ok(())
    }

    /// Validates the first five characters as a known US ZIP code. Returns
    /// the validated five-digit form, or None for unknown/short input.
    pub fn valid_zip(&self, zip: &str) -> Result<Option<String>, StoreError> {
        let Some(prefix) = zip.get(..5) else {
            return Ok(None);
        };
        let known: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM zipcode WHERE zip=?1",
                params![prefix],
                |row| row.get(0),
            )
            .optional()?;
        Ok(known.map(|_| prefix.to_string()))
    }

    pub fn add_zip(&mut self, zip: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO zipcode(zip) VALUES (?1) ON CONFLICT(zip) DO NOTHING",
            params![zip],
        )?;
        Ok(())
    }
}

/// Translates a SQL-LIKE pattern into an anchored regular expression:
/// `%` becomes `.*`, everything else is matched literally.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        if ch == '%' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(&ch.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_translation_is_anchored_and_escaped() {
        assert_eq!(like_to_regex("%clinic%"), "^.*clinic.*");
        assert_eq!(like_to_regex("a.b"), "^a\\.b");
    }
}

#![forbid(unsafe_code)]

use regex::Regex;
use rusqlite::types::ValueRef;
use std::sync::LazyLock;

use super::{CdrStore, StoreError};

/// Keyword gate for the read-only query facility. Matching text is rejected
/// before any statement is prepared.
static UNSAFE_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(insert\s|update\s|delete\s|create\s|alter\s|exec[(\s]|execute[(\s])")
        .expect("unsafe-sql pattern compiles")
});

/// Generic tabular result for the restricted query facility. Cells are
/// stringified; `None` marks SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CdrStore {
    /// Runs a read-only query with positional `?` placeholders. The query
    /// text must not contain mutation keywords, and the placeholder count
    /// must exactly match the supplied values.
    pub fn run_query(
        &self,
        query: &str,
        parms: &[String],
    ) -> Result<SqlResultTable, StoreError> {
        if query.trim().is_empty() {
            return Err(StoreError::InvalidInput("empty query"));
        }
        if UNSAFE_SQL.is_match(query) {
            return Err(StoreError::UnsafeQuery);
        }
        let expected = query.matches('?').count();
        if expected != parms.len() {
            return Err(StoreError::PlaceholderMismatch {
                expected,
                supplied: parms.len(),
            });
        }

        let mut stmt = self.conn().prepare(query)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = stmt.query(rusqlite::params_from_iter(parms))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for index in 0..column_count {
                let cell = match row.get_ref(index)? {
                    ValueRef::Null => None,
                    ValueRef::Integer(value) => Some(value.to_string()),
                    ValueRef::Real(value) => Some(value.to_string()),
                    ValueRef::Text(bytes) => {
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                    ValueRef::Blob(bytes) => {
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                };
                cells.push(cell);
            }
            out.push(cells);
        }

        Ok(SqlResultTable {
            columns,
            rows: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_keywords_are_caught() {
        assert!(UNSAFE_SQL.is_match("DELETE FROM document WHERE id = 1"));
        assert!(UNSAFE_SQL.is_match("select 1; insert into x values (1)"));
        assert!(UNSAFE_SQL.is_match("EXEC(sp_evil)"));
        assert!(!UNSAFE_SQL.is_match("SELECT updated FROM t"));
        assert!(!UNSAFE_SQL.is_match("SELECT id, title FROM document"));
    }
}

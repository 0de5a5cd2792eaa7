#![forbid(unsafe_code)]

use cdr_core::{DocId, FilterSetMember};
use rusqlite::{Connection, OptionalExtension, params};

use super::{CdrStore, StoreError};

/// Expansion depth bound; exceeding it means a probable membership cycle.
pub const MAX_FILTER_SET_DEPTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSetInfo {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub notes: Option<String>,
}

/// Full definition of a set as supplied by the administrative commands.
#[derive(Debug, Clone)]
pub struct FilterSetContent {
    pub name: String,
    pub description: String,
    pub notes: Option<String>,
    pub members: Vec<FilterSetMember>,
}

impl CdrStore {
    pub fn filter_set_info(&self, name: &str) -> Result<FilterSetInfo, StoreError> {
        set_info_by_name(self.conn(), name)?
            .ok_or_else(|| StoreError::UnknownFilterSet(name.to_string()))
    }

    /// Recursively expands a named set into its ordered filter document ids.
    pub fn filters_in_set(&self, name: &str) -> Result<Vec<DocId>, StoreError> {
        let info = self.filter_set_info(name)?;
        let mut out = Vec::new();
        expand_set(self.conn(), info.id, 0, &mut out)?;
        Ok(out)
    }

    /// Creates a new set and walks its membership once before committing, so
    /// cycle and depth errors surface to the caller instead of persisting.
    /// Returns the total resolved filter count.
    pub fn add_filter_set(&mut self, content: FilterSetContent) -> Result<usize, StoreError> {
        let tx = self.conn_mut().transaction()?;
        if set_info_by_name(&tx, &content.name)?.is_some() {
            return Err(StoreError::FilterSetExists(content.name));
        }
        tx.execute(
            "INSERT INTO filter_set(name, description, notes) VALUES (?1, ?2, ?3)",
            params![content.name, content.description, content.notes],
        )?;
        let set_id = tx.last_insert_rowid() as i32;
        insert_members_tx(&tx, set_id, &content.members)?;

        let mut resolved = Vec::new();
        expand_set(&tx, set_id, 0, &mut resolved)?;
        tx.commit()?;
        Ok(resolved.len())
    }

    /// Replaces an existing set: description and notes are updated, the old
    /// membership is cleared and re-inserted, and the new membership is
    /// walked before commit. Returns the total resolved filter count.
    pub fn rep_filter_set(&mut self, content: FilterSetContent) -> Result<usize, StoreError> {
        let tx = self.conn_mut().transaction()?;
        let info = set_info_by_name(&tx, &content.name)?
            .ok_or_else(|| StoreError::UnknownFilterSet(content.name.clone()))?;
        tx.execute(
            "UPDATE filter_set SET description=?1, notes=?2 WHERE id=?3",
            params![content.description, content.notes, info.id],
        )?;
        tx.execute(
            "DELETE FROM filter_set_member WHERE filter_set=?1",
            params![info.id],
        )?;
        insert_members_tx(&tx, info.id, &content.members)?;

        let mut resolved = Vec::new();
        expand_set(&tx, info.id, 0, &mut resolved)?;
        tx.commit()?;
        Ok(resolved.len())
    }

    /// Deletes a set, refusing while any other set still nests it.
    pub fn del_filter_set(&mut self, name: &str) -> Result<(), StoreError> {
        let tx = self.conn_mut().transaction()?;
        let info = set_info_by_name(&tx, name)?
            .ok_or_else(|| StoreError::UnknownFilterSet(name.to_string()))?;
        let nested_in: i64 = tx.query_row(
            "SELECT COUNT(1) FROM filter_set_member WHERE subset=?1",
            params![info.id],
            |row| row.get(0),
        )?;
        if nested_in > 0 {
            return Err(StoreError::FilterSetInUse(name.to_string()));
        }
        tx.execute(
            "DELETE FROM filter_set_member WHERE filter_set=?1",
            params![info.id],
        )?;
        tx.execute("DELETE FROM filter_set WHERE id=?1", params![info.id])?;
        tx.commit()?;
        Ok(())
    }

    /// The set's own definition, members in position order, unexpanded.
    pub fn get_filter_set(
        &self,
        name: &str,
    ) -> Result<(FilterSetInfo, Vec<FilterSetMember>), StoreError> {
        let info = self.filter_set_info(name)?;
        let mut stmt = self.conn().prepare(
            "SELECT position, filter, subset FROM filter_set_member \
             WHERE filter_set=?1 ORDER BY position",
        )?;
        let mut rows = stmt.query(params![info.id])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            let position: i32 = row.get(0)?;
            let filter: Option<i32> = row.get(1)?;
            let subset: Option<i32> = row.get(2)?;
            members.push(member_from_row(info.id, position, filter, subset)?);
        }
        Ok((info, members))
    }

    pub fn list_filter_sets(&self) -> Result<Vec<FilterSetInfo>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, description, notes FROM filter_set ORDER BY name")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(FilterSetInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                notes: row.get(3)?,
            });
        }
        Ok(out)
    }

    /// Resolves a subset id back to its name, for membership listings.
    pub fn filter_set_name(&self, set_id: i32) -> Result<String, StoreError> {
        self.conn()
            .query_row(
                "SELECT name FROM filter_set WHERE id=?1",
                params![set_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownFilterSet(format!("id={set_id}")))
    }
}

fn set_info_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Option<FilterSetInfo>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, notes FROM filter_set WHERE name=?1",
            params![name],
            |row| {
                Ok(FilterSetInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    notes: row.get(3)?,
                })
            },
        )
        .optional()?)
}

fn insert_members_tx(
    conn: &Connection,
    set_id: i32,
    members: &[FilterSetMember],
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO filter_set_member(filter_set, position, filter, subset) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (index, member) in members.iter().enumerate() {
        let position = index as i32 + 1;
        match member {
            FilterSetMember::Filter(id) => {
                stmt.execute(params![set_id, position, id.value(), Option::<i32>::None])?;
            }
            FilterSetMember::Subset(subset) => {
                stmt.execute(params![set_id, position, Option::<i32>::None, subset])?;
            }
        }
    }
    Ok(())
}

fn expand_set(
    conn: &Connection,
    set_id: i32,
    depth: usize,
    out: &mut Vec<DocId>,
) -> Result<(), StoreError> {
    if depth > MAX_FILTER_SET_DEPTH {
        return Err(StoreError::FilterSetDepthExceeded { set_id });
    }

    // Collect before recursing so the statement borrow does not span the
    // recursive calls.
    let mut stmt = conn.prepare(
        "SELECT position, filter, subset FROM filter_set_member \
         WHERE filter_set=?1 ORDER BY position",
    )?;
    let mut rows = stmt.query(params![set_id])?;
    let mut members = Vec::new();
    while let Some(row) = rows.next()? {
        let position: i32 = row.get(0)?;
        let filter: Option<i32> = row.get(1)?;
        let subset: Option<i32> = row.get(2)?;
        members.push(member_from_row(set_id, position, filter, subset)?);
    }
    drop(rows);
    drop(stmt);

    for member in members {
        match member {
            FilterSetMember::Filter(id) => out.push(id),
            FilterSetMember::Subset(subset) => expand_set(conn, subset, depth + 1, out)?,
        }
    }
    Ok(())
}

fn member_from_row(
    set_id: i32,
    position: i32,
    filter: Option<i32>,
    subset: Option<i32>,
) -> Result<FilterSetMember, StoreError> {
    match (filter, subset) {
        (Some(id), None) => Ok(FilterSetMember::Filter(DocId::new(id))),
        (None, Some(subset)) => Ok(FilterSetMember::Subset(subset)),
        _ => Err(StoreError::CorruptSetMember { set_id, position }),
    }
}

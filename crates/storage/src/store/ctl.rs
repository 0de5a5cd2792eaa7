#![forbid(unsafe_code)]

use rusqlite::params;
use std::collections::HashMap;

use super::{CdrStore, StoreError, now_stamp};

/// Mutation of the control-value table. Cache installation is a caller
/// concern; the store only maintains rows.
#[derive(Debug, Clone)]
pub enum CtlAction {
    Create {
        grp: String,
        key: String,
        val: String,
        comment: Option<String>,
    },
    Inactivate {
        grp: String,
        key: String,
    },
}

impl CdrStore {
    pub fn set_ctl(&mut self, action: CtlAction) -> Result<(), StoreError> {
        match action {
            CtlAction::Create {
                grp,
                key,
                val,
                comment,
            } => {
                if grp.is_empty() || key.is_empty() {
                    return Err(StoreError::InvalidInput("ctl group and key are required"));
                }
                let tx = self.conn_mut().transaction()?;
                // A new value supersedes any live row for the same pair.
                tx.execute(
                    "UPDATE ctl SET inactivated=?1 \
                     WHERE grp=?2 AND key=?3 AND inactivated IS NULL",
                    params![now_stamp(), grp, key],
                )?;
                tx.execute(
                    "INSERT INTO ctl(grp, key, val, comment, inactivated) \
                     VALUES (?1, ?2, ?3, ?4, NULL)",
                    params![grp, key, val, comment],
                )?;
                tx.commit()?;
                Ok(())
            }
            CtlAction::Inactivate { grp, key } => {
                self.conn().execute(
                    "UPDATE ctl SET inactivated=?1 \
                     WHERE grp=?2 AND key=?3 AND inactivated IS NULL",
                    params![now_stamp(), grp, key],
                )?;
                Ok(())
            }
        }
    }

    /// Live control values, keyed by (group, key). The caller publishes this
    /// as an immutable snapshot.
    pub fn ctl_values(&self) -> Result<HashMap<(String, String), String>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT grp, key, val FROM ctl WHERE inactivated IS NULL")?;
        let mut rows = stmt.query([])?;
        let mut out = HashMap::new();
        while let Some(row) = rows.next()? {
            out.insert((row.get(0)?, row.get(1)?), row.get(2)?);
        }
        Ok(out)
    }
}

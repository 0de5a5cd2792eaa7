#![forbid(unsafe_code)]

use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{CdrStore, StoreError, now_ms, now_stamp};

/// Sessions idle longer than this are treated as ended.
pub const SESSION_IDLE_LIMIT_MS: i64 = 24 * 60 * 60 * 1000;

/// The one account exempt from idle expiry.
const GUEST_USER: &str = "guest";

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: i64,
    pub name: String,
    pub usr: String,
}

impl CdrStore {
    pub fn add_user(&mut self, name: &str, password: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidInput("user name is empty"));
        }
        self.conn().execute(
            "INSERT INTO usr(name, password_hash) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET password_hash=excluded.password_hash",
            params![name, sha256_hex(password.as_bytes())],
        )?;
        Ok(())
    }

    pub fn user_exists(&self, name: &str) -> Result<bool, StoreError> {
        let hit: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM usr WHERE name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn grant_action(&mut self, usr: &str, action: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO action_grant(usr, action) VALUES (?1, ?2) \
             ON CONFLICT(usr, action) DO NOTHING",
            params![usr, action],
        )?;
        Ok(())
    }

    pub fn can_do(&self, usr: &str, action: &str) -> Result<bool, StoreError> {
        let hit: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM action_grant WHERE usr=?1 AND action=?2",
                params![usr, action],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Authenticates and opens a fresh session, returning its name.
    pub fn logon(&mut self, name: &str, password: &str) -> Result<String, StoreError> {
        let stored: String = self
            .conn()
            .query_row(
                "SELECT password_hash FROM usr WHERE name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownUser(name.to_string()))?;
        if stored != sha256_hex(password.as_bytes()) {
            return Err(StoreError::BadPassword);
        }
        self.open_session(name)
    }

    /// Opens a second session bound to the same user as an existing one.
    pub fn dup_session(&mut self, session: &str) -> Result<String, StoreError> {
        let info = self.validate_session(session)?;
        self.open_session(&info.usr)
    }

    pub fn logoff(&mut self, session: &str) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE session SET ended_ms=?1 WHERE name=?2 AND ended_ms IS NULL",
            params![now_ms(), session],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownSession(session.to_string()));
        }
        Ok(())
    }

    /// Confirms a session is open and not idle-expired, refreshing its
    /// last-activity stamp.
    pub fn validate_session(&mut self, session: &str) -> Result<SessionInfo, StoreError> {
        let row: Option<(i64, String, i64, Option<i64>)> = self
            .conn()
            .query_row(
                "SELECT id, usr, last_act_ms, ended_ms FROM session WHERE name=?1",
                params![session],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let (id, usr, last_act_ms, ended_ms) =
            row.ok_or_else(|| StoreError::UnknownSession(session.to_string()))?;
        if ended_ms.is_some() {
            return Err(StoreError::SessionEnded(session.to_string()));
        }

        let now = now_ms();
        if usr != GUEST_USER && now - last_act_ms > SESSION_IDLE_LIMIT_MS {
            self.conn().execute(
                "UPDATE session SET ended_ms=?1 WHERE id=?2",
                params![now, id],
            )?;
            return Err(StoreError::SessionEnded(session.to_string()));
        }

        self.conn().execute(
            "UPDATE session SET last_act_ms=?1 WHERE id=?2",
            params![now, id],
        )?;
        Ok(SessionInfo {
            id,
            name: session.to_string(),
            usr,
        })
    }

    /// Ends sessions idle beyond the limit. The sweeper thread calls this
    /// periodically; returns how many sessions it closed.
    pub fn sweep_sessions(&mut self) -> Result<usize, StoreError> {
        let now = now_ms();
        let cutoff = now - SESSION_IDLE_LIMIT_MS;
        let changed = self.conn().execute(
            "UPDATE session SET ended_ms=?1 \
             WHERE ended_ms IS NULL AND last_act_ms < ?2 AND usr <> ?3",
            params![now, cutoff, GUEST_USER],
        )?;
        Ok(changed)
    }

    pub fn log_command(&mut self, thread: &str, command: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO command_log(thread, received, command) VALUES (?1, ?2, ?3)",
            params![thread, now_stamp(), command],
        )?;
        Ok(())
    }

    fn open_session(&mut self, usr: &str) -> Result<String, StoreError> {
        let now = now_ms();
        let serial = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let digest = sha256_hex(format!("{usr}|{now}|{serial}").as_bytes());
        let name = digest[..32].to_string();
        self.conn().execute(
            "INSERT INTO session(name, usr, initiated_ms, last_act_ms) \
             VALUES (?1, ?2, ?3, ?3)",
            params![name, usr, now],
        )?;
        Ok(name)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_is_stable_and_lowercase() {
        let hex = sha256_hex(b"abc");
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ba7816bf"));
    }
}

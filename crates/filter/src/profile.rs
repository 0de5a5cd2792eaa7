#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};

use cdr_core::DocId;
use cdr_storage::CdrStore;

use crate::error::FilterError;

/// Maps stylesheet text back to filter document ids for profiling. Built
/// once before worker threads start; read-only afterwards, so timing a
/// filter never needs the document table.
pub struct FilterProfiler {
    by_digest: HashMap<[u8; 32], DocId>,
}

impl FilterProfiler {
    pub fn build(store: &CdrStore) -> Result<Self, FilterError> {
        let mut by_digest = HashMap::new();
        for (id, xml) in store.filter_inventory()? {
            by_digest.insert(digest(&xml), id);
        }
        Ok(Self { by_digest })
    }

    /// Best-effort timing row. Failures are logged and swallowed so they
    /// never mask the transform result; unknown stylesheet text (inline
    /// filters, test fixtures) is silently skipped.
    pub fn record(&self, store: &CdrStore, stylesheet: &str, elapsed: Duration) {
        let Some(id) = self.by_digest.get(&digest(stylesheet)) else {
            return;
        };
        let millis = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        if let Err(err) = store.record_filter_timing(*id, millis) {
            log::warn!("filter profiling write failed for {id}: {err}");
        }
    }
}

fn digest(text: &str) -> [u8; 32] {
    Sha256::digest(text.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_distinguishes_texts() {
        assert_eq!(digest("a"), digest("a"));
        assert_ne!(digest("a"), digest("b"));
    }
}

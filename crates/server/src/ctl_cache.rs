#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type CtlMap = HashMap<(String, String), String>;

/// Process-wide snapshot of the control-value table. Readers clone the
/// current `Arc` under a brief read lock; an install builds the replacement
/// off to the side and publishes it with one swap, so readers never observe
/// a partially-populated map.
pub(crate) struct CtlCache {
    snapshot: RwLock<Arc<CtlMap>>,
}

impl CtlCache {
    pub fn new(initial: CtlMap) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn get(&self, grp: &str, key: &str) -> Option<String> {
        let current = match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => return None,
        };
        current.get(&(grp.to_string(), key.to_string())).cloned()
    }

    pub fn install(&self, replacement: CtlMap) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Arc::new(replacement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[((&str, &str), &str)]) -> CtlMap {
        entries
            .iter()
            .map(|((grp, key), val)| {
                ((grp.to_string(), key.to_string()), val.to_string())
            })
            .collect()
    }

    #[test]
    fn install_replaces_wholesale() {
        let cache = CtlCache::new(map(&[(("Publishing", "Throttle"), "100")]));
        assert_eq!(cache.get("Publishing", "Throttle").as_deref(), Some("100"));

        cache.install(map(&[(("Logging", "Level"), "info")]));
        assert_eq!(cache.get("Publishing", "Throttle"), None);
        assert_eq!(cache.get("Logging", "Level").as_deref(), Some("info"));
    }

    #[test]
    fn readers_hold_their_snapshot_across_installs() {
        let cache = CtlCache::new(map(&[(("G", "K"), "old")]));
        let before = cache.get("G", "K");
        cache.install(map(&[(("G", "K"), "new")]));
        assert_eq!(before.as_deref(), Some("old"));
        assert_eq!(cache.get("G", "K").as_deref(), Some("new"));
    }
}

use std::sync::{Arc, RwLock};

use crate::{snapshot::Snapshot, Result};

/// `ToggleStore` holds the current [`Snapshot`] and lets readers and a reloading writer proceed
/// concurrently.
///
/// Readers clone an `Arc` under a short read lock and evaluate without holding it, so a reload
/// never waits for in-flight evaluations and they keep the snapshot they started with.
#[derive(Debug)]
pub struct ToggleStore {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ToggleStore {
    /// Create a store holding an empty snapshot.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// The currently installed snapshot.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        // The lock is only poisoned if a writer panicked while swapping, in which case the slot
        // still holds a complete snapshot.
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&snapshot)
    }

    /// Parse, compile and install a state payload. On error the previous snapshot stays active.
    pub fn load(&self, payload: &str) -> Result<()> {
        let snapshot = Snapshot::from_json(payload).inspect_err(|err| {
            log::warn!(target: "toggle_engine",
                       kind = err.kind();
                       "rejected toggle state: {err}");
        })?;
        let count = snapshot.len();
        self.set_snapshot(snapshot);
        log::debug!(target: "toggle_engine", toggles = count; "installed toggle state");
        Ok(())
    }

    /// Install a snapshot, returning the previous one.
    pub fn set_snapshot(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(snapshot);

        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut slot, new_value)
    }
}

impl Default for ToggleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ToggleStore;

    #[test]
    fn starts_empty() {
        assert!(ToggleStore::new().current_snapshot().is_empty());
    }

    #[test]
    fn can_load_state_from_another_thread() {
        let store = Arc::new(ToggleStore::new());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store
                    .load(r#"[{"name": "a", "enabled": true}]"#)
                    .unwrap();
            })
            .join();
        }

        assert!(store.current_snapshot().contains("a"));
    }

    #[test]
    fn failed_load_keeps_previous_snapshot() {
        let store = ToggleStore::new();
        store.load(r#"[{"name": "a", "enabled": true}]"#).unwrap();

        assert!(store.load("{broken").is_err());
        assert!(store
            .load(r#"[{"name": "b", "enabled": true}, {"name": "b", "enabled": true}]"#)
            .is_err());

        let snapshot = store.current_snapshot();
        assert!(snapshot.contains("a"));
        assert!(!snapshot.contains("b"));
    }

    #[test]
    fn held_snapshot_survives_reload() {
        let store = ToggleStore::new();
        store.load(r#"[{"name": "old", "enabled": true}]"#).unwrap();
        let held = store.current_snapshot();

        store.load(r#"[{"name": "new", "enabled": true}]"#).unwrap();

        assert!(held.contains("old"));
        assert!(!held.contains("new"));
        assert!(store.current_snapshot().contains("new"));
    }
}

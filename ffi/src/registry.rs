//! Handle table mapping opaque integers handed to the host onto engines.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use toggle_engine::{Engine, EngineConfig};

use crate::FfiError;

/// Opaque engine handle. `0` is never issued.
pub type EngineHandle = u64;

static ENGINES: RwLock<BTreeMap<EngineHandle, Arc<Engine>>> = RwLock::new(BTreeMap::new());
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn register() -> EngineHandle {
    // Hosts count evaluations explicitly through `count_toggle`/`count_variant`.
    let mut config = EngineConfig::new();
    config.record_metrics(false);
    let engine = Arc::new(config.to_engine());

    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    ENGINES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(handle, engine);
    log::debug!(target: "toggle_engine", handle; "created engine");
    handle
}

/// Drop the registry's reference. Calls already holding the engine finish normally.
pub(crate) fn release(handle: EngineHandle) -> bool {
    let removed = ENGINES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&handle);
    removed.is_some()
}

pub(crate) fn lookup(handle: EngineHandle) -> Result<Arc<Engine>, FfiError> {
    ENGINES
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&handle)
        .cloned()
        .ok_or(FfiError::InvalidHandle(handle))
}

#[cfg(test)]
mod tests {
    use super::{lookup, register, release};

    #[test]
    fn handles_are_unique_and_released() {
        let a = register();
        let b = register();
        assert_ne!(a, b);
        assert_ne!(a, 0);

        let engine = lookup(a).unwrap();
        assert!(release(a));
        assert!(!release(a));
        assert!(lookup(a).is_err());
        // A reference taken before release stays usable.
        assert!(engine.list_known_toggles().is_empty());

        assert!(lookup(b).is_ok());
        release(b);
    }

    #[test]
    fn unknown_handle_is_rejected() {
        assert!(lookup(0).is_err());
    }
}

//! Durable key/value store over an embedded log-structured engine.
//!
//! Four sections are persisted: `"chain"`, `"mempool"`, `"peers"`,
//! `"config"`. `save` is best-effort durable — callers log a failure and
//! continue with in-memory state rather than treat it as fatal. Readers
//! tolerate a missing key as an empty section.

mod sled_store;

pub use sled_store::SledStore;

use serde_json::Value;

use crate::error::NodeError;

pub const SECTION_CHAIN: &str = "chain";
pub const SECTION_MEMPOOL: &str = "mempool";
pub const SECTION_PEERS: &str = "peers";
pub const SECTION_CONFIG: &str = "config";

/// Abstracts persistence so `Chain`/`Mempool`/`PeerSet`/`NodeConfig`
/// depend on an interface, not on `sled` directly.
pub trait Store: Send + Sync {
    fn save(&self, section: &str, value: &Value) -> Result<(), NodeError>;
    fn load(&self, section: &str) -> Result<Option<Value>, NodeError>;
    fn flush(&self) -> Result<(), NodeError>;
}

/// In-memory `Store` used by unit tests that don't need a real on-disk
/// engine.
#[derive(Default)]
pub struct MemoryStore {
    inner: parking_lot::Mutex<std::collections::HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save(&self, section: &str, value: &Value) -> Result<(), NodeError> {
        self.inner.lock().insert(section.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, section: &str) -> Result<Option<Value>, NodeError> {
        Ok(self.inner.lock().get(section).cloned())
    }

    fn flush(&self) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Persists `value` best-effort: logs and swallows any `StoreUnavailable`
/// error rather than propagating it, so callers always proceed with their
/// in-memory state regardless of disk health.
pub fn save_best_effort(store: &dyn Store, section: &str, value: &Value) {
    if let Err(err) = store.save(section, value) {
        tracing::warn!(section, error = %err, "store save failed; continuing with in-memory state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        let value = serde_json::json!({"a": 1});
        store.save(SECTION_CHAIN, &value).unwrap();
        assert_eq!(store.load(SECTION_CHAIN).unwrap(), Some(value));
    }

    #[test]
    fn missing_section_loads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.load(SECTION_PEERS).unwrap(), None);
    }

    #[test]
    fn save_best_effort_never_panics_on_failure() {
        struct AlwaysFails;
        impl Store for AlwaysFails {
            fn save(&self, _section: &str, _value: &Value) -> Result<(), NodeError> {
                Err(NodeError::StoreUnavailable("disk full".into()))
            }
            fn load(&self, _section: &str) -> Result<Option<Value>, NodeError> {
                Ok(None)
            }
            fn flush(&self) -> Result<(), NodeError> {
                Ok(())
            }
        }
        save_best_effort(&AlwaysFails, SECTION_CONFIG, &serde_json::json!({}));
    }
}

//! `sled`-backed `Store`: an embedded log-structured key/value engine
//! as the node's only persistence layer.

use serde_json::Value;
use std::path::Path;

use super::Store;
use crate::error::NodeError;

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, NodeError> {
        let db = sled::open(data_dir.as_ref())
            .map_err(|e| NodeError::StoreUnavailable(format!("failed to open store: {e}")))?;
        Ok(SledStore { db })
    }
}

impl Store for SledStore {
    fn save(&self, section: &str, value: &Value) -> Result<(), NodeError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| NodeError::StoreUnavailable(format!("serialize failed: {e}")))?;
        self.db
            .insert(section.as_bytes(), bytes)
            .map_err(|e| NodeError::StoreUnavailable(format!("write failed: {e}")))?;
        Ok(())
    }

    fn load(&self, section: &str) -> Result<Option<Value>, NodeError> {
        match self.db.get(section.as_bytes()) {
            Ok(Some(bytes)) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| NodeError::StoreUnavailable(format!("corrupt record: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(NodeError::StoreUnavailable(format!("read failed: {e}"))),
        }
    }

    fn flush(&self) -> Result<(), NodeError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| NodeError::StoreUnavailable(format!("flush failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SECTION_CHAIN, SECTION_MEMPOOL};

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store
                .save(SECTION_CHAIN, &serde_json::json!({"blocks": []}))
                .unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        let loaded = store.load(SECTION_CHAIN).unwrap();
        assert_eq!(loaded, Some(serde_json::json!({"blocks": []})));
    }

    #[test]
    fn missing_section_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.load(SECTION_MEMPOOL).unwrap(), None);
    }
}

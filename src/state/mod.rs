//! Persistent key-value state shared by the import and feed engines.
//!
//! Values are bincode-encoded serde types. Each engine owns its own key
//! namespace (see [`keys`]); nothing is shared across namespaces.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub mod keys {
    pub const IMPORT_JOB: &str = "import:job";
    pub const IMPORT_PROGRESS: &str = "import:progress";
    pub const IMPORT_LEDGER_PREFIX: &str = "import:ledger:";
    pub const FEED_SETTINGS: &str = "feed:settings";
    pub const FEED_LEDGER: &str = "feed:ledger";
    pub const FEED_LAST_SYNC: &str = "feed:last_sync";

    pub fn import_ledger(fingerprint: &str) -> String {
        format!("{}{}", IMPORT_LEDGER_PREFIX, fingerprint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// Backend contract. A batch passed to `write` is applied all-or-nothing.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn write(&self, ops: Vec<WriteOp>) -> Result<()>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A set of writes committed together by [`StateHandle::commit`].
#[derive(Debug, Default)]
pub struct StateBatch {
    ops: Vec<WriteOp>,
}

impl StateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<&mut Self> {
        let bytes = bincode::serialize(value)?;
        self.ops.push(WriteOp::Put(key.into(), bytes));
        Ok(self)
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete(key.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Typed, cloneable handle over a [`StateStore`].
#[derive(Clone)]
pub struct StateHandle {
    store: Arc<dyn StateStore>,
}

impl StateHandle {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.store.get(key)?.is_some())
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut batch = StateBatch::new();
        batch.put(key, value)?;
        self.commit(batch)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut batch = StateBatch::new();
        batch.delete(key);
        self.commit(batch)
    }

    pub fn commit(&self, batch: StateBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.write(batch.ops)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.store.keys_with_prefix(prefix)
    }

    /// Queue deletes for every key under `prefix` into `batch`.
    pub fn delete_prefix_into(&self, prefix: &str, batch: &mut StateBatch) -> Result<usize> {
        let keys = self.store.keys_with_prefix(prefix)?;
        let count = keys.len();
        for key in keys {
            batch.delete(key);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u64,
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let state = StateHandle::in_memory();
        state.save("a", &Counter { n: 3 }).unwrap();
        assert_eq!(state.load::<Counter>("a").unwrap(), Some(Counter { n: 3 }));
        assert_eq!(state.load::<Counter>("b").unwrap(), None);
    }

    #[test]
    fn test_delete_prefix_leaves_other_namespaces() {
        let state = StateHandle::in_memory();
        state.save(&keys::import_ledger("x1"), &true).unwrap();
        state.save(&keys::import_ledger("x2"), &true).unwrap();
        state.save(keys::FEED_LEDGER, &vec!["f".to_string()]).unwrap();

        let mut batch = StateBatch::new();
        let n = state
            .delete_prefix_into(keys::IMPORT_LEDGER_PREFIX, &mut batch)
            .unwrap();
        state.commit(batch).unwrap();

        assert_eq!(n, 2);
        assert!(state.keys_with_prefix(keys::IMPORT_LEDGER_PREFIX).unwrap().is_empty());
        assert!(state.contains(keys::FEED_LEDGER).unwrap());
    }

    #[test]
    fn test_corrupt_value_is_codec_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(vec![WriteOp::Put("k".to_string(), vec![0xff])])
            .unwrap();
        let state = StateHandle::new(store);
        let err = state.load::<Counter>("k").unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::StateCorruption);
    }
}

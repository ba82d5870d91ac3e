//! Persistent per-device state.
//!
//! ROM and Flash contents survive between sessions.  Where they are
//! kept is up to the embedding application; the board only needs a
//! key-value store addressed by device name and key.
use std::collections::BTreeMap;

/// Key under which a memory device's bytes are kept.
pub const CONTENT_KEY: &str = "content";

pub trait ContentStore {
    fn get(&self, device: &str, key: &str) -> Option<Vec<u8>>;

    fn set(&mut self, device: &str, key: &str, value: Vec<u8>);
}

/// A store which lives only as long as the process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InMemoryStore {
    entries: BTreeMap<(String, String), Vec<u8>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }
}

impl ContentStore for InMemoryStore {
    fn get(&self, device: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .get(&(device.to_string(), key.to_string()))
            .cloned()
    }

    fn set(&mut self, device: &str, key: &str, value: Vec<u8>) {
        self.entries
            .insert((device.to_string(), key.to_string()), value);
    }
}

#[test]
fn test_in_memory_store() {
    let mut store = InMemoryStore::new();
    assert_eq!(store.get("ROM", CONTENT_KEY), None);
    store.set("ROM", CONTENT_KEY, vec![1, 2, 3]);
    assert_eq!(store.get("ROM", CONTENT_KEY), Some(vec![1, 2, 3]));
    assert_eq!(store.get("RAM", CONTENT_KEY), None);
    assert_eq!(store.get("ROM", "other"), None);
}

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use checkout_proto::{parse_lines, CartLine, CartSnapshot};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
}

/// Synchronous key/value storage shared by every page of one origin.
/// Mirrors are best-effort: callers treat failures as a missing channel,
/// never as a fatal error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store used by tests and short-lived tooling runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// File-backed store for the CLI. One file per key under a state
/// directory, written via a temp file and rename so a crashed run never
/// leaves a half-written cart behind.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.entry_path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key);
        let tmp = self.root.join(format!(
            ".{}.tmp",
            sanitize_key(key)
        ));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Fans a cart out to every configured storage key and reads it back in
/// priority order. All failures are logged and swallowed so the checkout
/// path is never blocked by a broken store.
pub struct StorageMirror {
    store: Arc<dyn KeyValueStore>,
    keys: Vec<String>,
}

impl StorageMirror {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: Vec<String>) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Write the snapshot's lines under every key. A failing key is
    /// skipped; the remaining keys are still written.
    pub fn write(&self, snapshot: &CartSnapshot) {
        let serialized = match serde_json::to_string(&snapshot.lines) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(
                    target: "handoff::storage",
                    error = %err,
                    "cart lines could not be serialized; mirror skipped"
                );
                return;
            }
        };
        for key in &self.keys {
            if let Err(err) = self.store.set(key, &serialized) {
                warn!(
                    target: "handoff::storage",
                    key = %key,
                    error = %err,
                    "storage key rejected cart mirror"
                );
            }
        }
    }

    /// First non-empty, well-formed cart found in key priority order.
    /// A malformed value makes the whole key count as absent.
    pub fn read_first_available(&self) -> Option<Vec<CartLine>> {
        for key in &self.keys {
            let raw = match self.store.get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        target: "handoff::storage",
                        key = %key,
                        error = %err,
                        "storage key unreadable; trying next"
                    );
                    continue;
                }
            };
            match parse_lines(&raw) {
                Ok(lines) if !lines.is_empty() => {
                    debug!(
                        target: "handoff::storage",
                        key = %key,
                        lines = lines.len(),
                        "cart recovered from storage"
                    );
                    return Some(lines);
                }
                Ok(_) => continue,
                Err(err) => {
                    debug!(
                        target: "handoff::storage",
                        key = %key,
                        error = %err,
                        "stored cart malformed; treating key as absent"
                    );
                    continue;
                }
            }
        }
        None
    }

    pub fn clear(&self) {
        for key in &self.keys {
            if let Err(err) = self.store.remove(key) {
                warn!(
                    target: "handoff::storage",
                    key = %key,
                    error = %err,
                    "storage key could not be cleared"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_proto::CartLine;
    use uuid::Uuid;

    fn snapshot(lines: Vec<CartLine>) -> CartSnapshot {
        CartSnapshot::capture(lines, "https://shop.tenera.life")
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    /// Store whose configured keys always fail, standing in for a blocked
    /// browser profile or an exhausted quota.
    struct FlakyStore {
        inner: MemoryStore,
        broken: Vec<String>,
    }

    impl FlakyStore {
        fn new(broken: &[&str]) -> Self {
            Self {
                inner: MemoryStore::new(),
                broken: broken.iter().map(|k| k.to_string()).collect(),
            }
        }
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            if self.broken.iter().any(|b| b == key) {
                return Err(StorageError::Backend("access denied".into()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.broken.iter().any(|b| b == key) {
                return Err(StorageError::Backend("quota exceeded".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn read_probes_keys_in_priority_order() {
        let store = Arc::new(MemoryStore::new());
        let lines = vec![CartLine::new("blood_booster", "Blood Booster", 2_500_000, 2)];
        store
            .set("cart", &serde_json::to_string(&lines).unwrap())
            .unwrap();

        let mirror = StorageMirror::new(
            store,
            keys(&["teneraCart", "systemeCart", "cart", "cartItems"]),
        );
        let found = mirror.read_first_available().unwrap();
        assert_eq!(found[0].id, "blood_booster");
        assert_eq!(found[0].quantity, 2);
    }

    #[test]
    fn malformed_key_is_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.set("teneraCart", "{not json").unwrap();
        // structurally valid JSON but not a cart array
        store.set("systemeCart", "{\"cart\":true}").unwrap();
        let lines = vec![CartLine::new("immune_tea", "Immune Tea", 1_200_000, 1)];
        store
            .set("cart", &serde_json::to_string(&lines).unwrap())
            .unwrap();

        let mirror = StorageMirror::new(store, keys(&["teneraCart", "systemeCart", "cart"]));
        let found = mirror.read_first_available().unwrap();
        assert_eq!(found[0].id, "immune_tea");
    }

    #[test]
    fn one_bad_line_voids_the_whole_key() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "teneraCart",
                r#"[{"id":"a","name":"A","unitPriceMinor":100,"quantity":1},{"name":"no id"}]"#,
            )
            .unwrap();
        let fallback = vec![CartLine::new("b", "B", 200, 1)];
        store
            .set("cart", &serde_json::to_string(&fallback).unwrap())
            .unwrap();

        let mirror = StorageMirror::new(store, keys(&["teneraCart", "cart"]));
        let found = mirror.read_first_available().unwrap();
        assert_eq!(found[0].id, "b");
    }

    #[test]
    fn empty_array_counts_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.set("teneraCart", "[]").unwrap();
        let mirror = StorageMirror::new(store, keys(&["teneraCart"]));
        assert!(mirror.read_first_available().is_none());
    }

    #[test]
    fn write_survives_a_failing_key() {
        let store = Arc::new(FlakyStore::new(&["systemeCart"]));
        let mirror = StorageMirror::new(
            store.clone(),
            keys(&["teneraCart", "systemeCart", "cart"]),
        );
        mirror.write(&snapshot(vec![CartLine::new(
            "blood_booster",
            "Blood Booster",
            2_500_000,
            2,
        )]));

        assert!(store.get("teneraCart").unwrap().is_some());
        assert!(store.get("cart").unwrap().is_some());
        assert!(store.get("systemeCart").is_err());
    }

    #[test]
    fn clear_removes_every_key() {
        let store = Arc::new(MemoryStore::new());
        let mirror = StorageMirror::new(store.clone(), keys(&["teneraCart", "cart"]));
        mirror.write(&snapshot(vec![CartLine::new("a", "A", 100, 1)]));
        mirror.clear();
        assert!(store.get("teneraCart").unwrap().is_none());
        assert!(store.get("cart").unwrap().is_none());
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("tenera-handoff-test-{}", Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();
        store.set("teneraCart", "[1,2,3]").unwrap();
        assert_eq!(store.get("teneraCart").unwrap().unwrap(), "[1,2,3]");
        store.set("teneraCart", "[4]").unwrap();
        assert_eq!(store.get("teneraCart").unwrap().unwrap(), "[4]");
        store.remove("teneraCart").unwrap();
        assert!(store.get("teneraCart").unwrap().is_none());
        // unknown keys read as absent, double-remove is fine
        assert!(store.get("missing").unwrap().is_none());
        store.remove("missing").unwrap();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_store_sanitizes_hostile_key_names() {
        let dir = std::env::temp_dir().join(format!("tenera-handoff-test-{}", Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();
        store.set("../escape/attempt", "x").unwrap();
        assert_eq!(store.get("../escape/attempt").unwrap().unwrap(), "x");
        // the file lands inside the state dir
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        fs::remove_dir_all(&dir).ok();
    }
}

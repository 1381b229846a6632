//! Durable client-local storage for session shape.
//!
//! The session manager persists a handful of fixed keys (tab list, active
//! tab, current conversation) and removes a key outright when its value
//! becomes absent, so restart logic can tell "never set" from "empty".
//! Storage is injected as a trait so tests run against an in-memory fake.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Keyed string storage. Implementations must tolerate concurrent use.
pub trait KeyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// File-backed store: one JSON file per key under a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Platform data directory, e.g. `~/.local/share/goldfinch` on Linux.
    pub fn default_dir() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            return data_dir.join("goldfinch");
        }
        PathBuf::from("cache").join("goldfinch")
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KeyStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.key_path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| format!("Failed to create storage directory: {}", e))?;
        fs::write(self.key_path(key), value).map_err(|e| format!("Failed to write storage: {}", e))
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(path).map_err(|e| format!("Failed to remove storage key: {}", e))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and headless use.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored keys, for assertions.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().expect("memory store poisoned");
        entries.keys().cloned().collect()
    }
}

impl KeyStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().expect("memory store poisoned");
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// Sanitize storage key for filesystem use.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

//! Durable local cache for the favorites list.
//!
//! The persisted value is a single JSON-encoded array of strings. Malformed
//! content is treated as an empty list rather than an error so that a corrupt
//! cache can never block the UI; only hard I/O failures surface as
//! `FavoritesErrorCode::Persistence`, and the engine degrades those to an
//! empty set as well.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::favorites::error::{persistence, FavoritesResult};

/// Synchronous persistence backend holding the favorites list across process
/// restarts.
pub trait LocalStore: Send + Sync {
    /// Returns the persisted list, or an empty list when nothing was saved
    /// yet or the stored payload does not parse.
    fn load(&self) -> FavoritesResult<Vec<String>>;

    /// Serializes and persists the list, replacing any previous value.
    fn save(&self, items: &[String]) -> FavoritesResult<()>;

    /// Removes the persisted value. Used on logout.
    fn clear(&self) -> FavoritesResult<()>;
}

fn decode_payload(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(items) => {
            // Stored duplicates collapse on load; the engine never writes any.
            let mut unique = Vec::with_capacity(items.len());
            for item in items {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            unique
        }
        Err(err) => {
            log::debug!("ignoring malformed favorites payload: {err}");
            Vec::new()
        }
    }
}

fn encode_payload(items: &[String]) -> FavoritesResult<String> {
    serde_json::to_string(items).map_err(|err| persistence(format!("failed to serialize favorites: {err}")))
}

/// In-memory backend keeping the serialized payload under a mutex.
///
/// Storing the raw JSON string rather than the decoded list keeps the
/// round-trip behaviour identical to the file backend, including the
/// malformed-payload fallback.
#[derive(Default)]
pub struct MemoryLocalStore {
    raw: Mutex<Option<String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored payload verbatim, bypassing serialization.
    pub fn set_raw(&self, raw: impl Into<String>) {
        *self.raw.lock().unwrap() = Some(raw.into());
    }
}

impl LocalStore for MemoryLocalStore {
    fn load(&self) -> FavoritesResult<Vec<String>> {
        let guard = self.raw.lock().unwrap();
        Ok(guard.as_deref().map(decode_payload).unwrap_or_default())
    }

    fn save(&self, items: &[String]) -> FavoritesResult<()> {
        let encoded = encode_payload(items)?;
        *self.raw.lock().unwrap() = Some(encoded);
        Ok(())
    }

    fn clear(&self) -> FavoritesResult<()> {
        self.raw.lock().unwrap().take();
        Ok(())
    }
}

/// File-backed store suitable for desktop environments. One file holds the
/// whole payload; writes replace it in full, which is adequate for a payload
/// this small written once per user action.
pub struct FileLocalStore {
    path: PathBuf,
}

impl FileLocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LocalStore for FileLocalStore {
    fn load(&self) -> FavoritesResult<Vec<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(persistence(format!("failed to read favorites file: {err}"))),
        };
        Ok(decode_payload(&raw))
    }

    fn save(&self, items: &[String]) -> FavoritesResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| persistence(format!("failed to create favorites directory: {err}")))?;
        }
        let encoded = encode_payload(items)?;
        fs::write(&self.path, encoded)
            .map_err(|err| persistence(format!("failed to write favorites file: {err}")))
    }

    fn clear(&self) -> FavoritesResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence(format!("failed to remove favorites file: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryLocalStore::new();
        assert!(store.load().unwrap().is_empty());

        let items = owned(&["first line", "second line"]);
        store.save(&items).unwrap();
        assert_eq!(store.load().unwrap(), items);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_reads_as_empty() {
        let store = MemoryLocalStore::new();
        store.set_raw("{not valid json");
        assert!(store.load().unwrap().is_empty());

        store.set_raw("{\"favs\": []}");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn duplicate_entries_collapse_on_load() {
        let store = MemoryLocalStore::new();
        store.set_raw(r#"["same line","same line","other"]"#);
        assert_eq!(store.load().unwrap(), owned(&["same line", "other"]));
    }

    #[test]
    fn file_store_persists_across_instances() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "favorites-local-store-{}.json",
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let store = FileLocalStore::new(path.clone());
        assert!(store.load().unwrap().is_empty());
        store.save(&owned(&["kept across restarts"])).unwrap();

        let reopened = FileLocalStore::new(path.clone());
        assert_eq!(reopened.load().unwrap(), owned(&["kept across restarts"]));

        reopened.clear().unwrap();
        assert!(reopened.load().unwrap().is_empty());
        // clearing twice is fine
        reopened.clear().unwrap();

        let _ = fs::remove_file(path);
    }
}

//! Preference Store: the persisted "always use" vault.
//!
//! All entries live in one JSON object under [`PREFERENCES_KEY`]. "Always use"
//! writes the value under the field id and again under the field label, so a
//! preference survives id churn when the same semantic field reappears.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::preferences::kv::{KeyValueStore, StoreError};

pub const PREFERENCES_KEY: &str = "applywise_always_use_map";

/// Flat `key → value` map; keys are field ids or field labels.
pub type PreferenceMap = BTreeMap<String, String>;

/// Looks a field up by id first, then by label.
///
/// The label fallback can match two unrelated fields that share a generic
/// label (two "Name" fields). This is the established behavior of the vault.
pub fn lookup_in<'a>(map: &'a PreferenceMap, field_id: &str, label: &str) -> Option<&'a str> {
    map.get(field_id)
        .or_else(|| map.get(label))
        .map(String::as_str)
}

enum Stored {
    Map(PreferenceMap),
    Corrupt(String),
}

#[derive(Clone)]
pub struct PreferenceStore {
    kv: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles on the single blob.
    write_lock: Arc<Mutex<()>>,
}

impl PreferenceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Loads the whole vault. Never fails: an unreadable backend yields an
    /// empty map, and a blob that is not valid JSON is deleted so later loads
    /// start clean instead of failing again.
    pub async fn load(&self) -> PreferenceMap {
        match self.read().await {
            Stored::Map(map) => map,
            Stored::Corrupt(raw) => self.heal(&raw).await,
        }
    }

    /// Deletes a corrupt blob, unless a writer replaced it after it was read.
    async fn heal(&self, corrupt: &str) -> PreferenceMap {
        let _guard = self.write_lock.lock().await;
        match self.kv.get(PREFERENCES_KEY).await {
            Ok(Some(raw)) if raw == corrupt => {
                self.discard().await;
                PreferenceMap::new()
            }
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => PreferenceMap::new(),
            Err(e) => {
                warn!("Preference store unavailable, continuing without preferences: {e}");
                PreferenceMap::new()
            }
        }
    }

    /// Same as [`load`](Self::load) for callers already holding `write_lock`.
    async fn load_locked(&self) -> PreferenceMap {
        match self.read().await {
            Stored::Map(map) => map,
            Stored::Corrupt(_) => {
                self.discard().await;
                PreferenceMap::new()
            }
        }
    }

    async fn read(&self) -> Stored {
        let raw = match self.kv.get(PREFERENCES_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Stored::Map(PreferenceMap::new()),
            Err(e) => {
                warn!("Preference store unavailable, continuing without preferences: {e}");
                return Stored::Map(PreferenceMap::new());
            }
        };
        match serde_json::from_str::<PreferenceMap>(&raw) {
            Ok(map) => Stored::Map(map),
            Err(e) => {
                warn!("Discarding corrupt preference blob: {e}");
                Stored::Corrupt(raw)
            }
        }
    }

    async fn discard(&self) {
        if let Err(e) = self.kv.remove(PREFERENCES_KEY).await {
            warn!("Failed to clear corrupt preference blob: {e}");
        }
    }

    pub async fn save(&self, field_id: &str, label: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_locked().await;
        map.insert(field_id.to_string(), value.to_string());
        if !label.trim().is_empty() {
            map.insert(label.to_string(), value.to_string());
        }
        self.persist(&map).await?;
        info!("Saved always-use preference for field '{field_id}'");
        Ok(())
    }

    /// Removes one key. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_locked().await;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&map).await?;
        Ok(true)
    }

    /// Deletes the whole vault.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.kv.remove(PREFERENCES_KEY).await
    }

    pub async fn entries(&self) -> PreferenceMap {
        self.load().await
    }

    async fn persist(&self, map: &PreferenceMap) -> Result<(), StoreError> {
        let blob = serde_json::to_string(map)
            .map_err(|e| StoreError::Unavailable(format!("failed to encode preferences: {e}")))?;
        self.kv.set(PREFERENCES_KEY, &blob).await
    }
}

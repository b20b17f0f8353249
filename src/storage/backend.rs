//! JSON-over-key/value implementation of [`StorageBackend`]

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::kv::{FileKv, KeyValueStore, MemoryKv};
use super::{
    interaction_events_key, layout_config_key, StorageBackend, ALL_LAYOUT_CONFIG_IDS_KEY,
    ALL_WIDGET_IDS_KEY, CURRENT_LAYOUT_ID_KEY,
};
use crate::error::StorageResult;
use crate::types::{InteractionEvent, LayoutConfig};

/// Storage backend over any [`KeyValueStore`]
pub struct KvStorage<S> {
    kv: S,
    // Serializes read-modify-write of logs and index keys
    write_lock: Mutex<()>,
}

impl KvStorage<MemoryKv> {
    /// Volatile backend
    pub fn in_memory() -> Self {
        Self::new(MemoryKv::new())
    }
}

impl KvStorage<FileKv> {
    /// Durable backend rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(Self::new(FileKv::open(dir)?))
    }
}

impl<S: KeyValueStore> KvStorage<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    /// Access the underlying substrate
    pub fn substrate(&self) -> &S {
        &self.kv
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, raw).await
    }

    async fn read_index(&self, key: &str) -> StorageResult<BTreeSet<String>> {
        Ok(self.read_json(key).await?.unwrap_or_default())
    }
}

#[async_trait]
impl<S: KeyValueStore> StorageBackend for KvStorage<S> {
    async fn save_layout_config(&self, config: &LayoutConfig) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&layout_config_key(&config.id), config).await?;

        let mut ids = self.read_index(ALL_LAYOUT_CONFIG_IDS_KEY).await?;
        if ids.insert(config.id.clone()) {
            self.write_json(ALL_LAYOUT_CONFIG_IDS_KEY, &ids).await?;
        }
        debug!("Saved layout config {}", config.id);
        Ok(())
    }

    async fn get_layout_config(&self, id: &str) -> StorageResult<Option<LayoutConfig>> {
        self.read_json(&layout_config_key(id)).await
    }

    async fn get_all_layout_configs(&self) -> StorageResult<Vec<LayoutConfig>> {
        let ids = self.read_index(ALL_LAYOUT_CONFIG_IDS_KEY).await?;
        let mut configs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_layout_config(&id).await? {
                Some(config) => configs.push(config),
                None => warn!("Layout config {} is indexed but missing", id),
            }
        }
        Ok(configs)
    }

    async fn delete_layout_config(&self, id: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.kv.remove(&layout_config_key(id)).await?;

        let mut ids = self.read_index(ALL_LAYOUT_CONFIG_IDS_KEY).await?;
        if ids.remove(id) {
            self.write_json(ALL_LAYOUT_CONFIG_IDS_KEY, &ids).await?;
        }
        debug!("Deleted layout config {}", id);
        Ok(())
    }

    async fn log_interaction_event(&self, event: &InteractionEvent) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let key = interaction_events_key(&event.widget_id);
        let mut events: Vec<InteractionEvent> = self.read_json(&key).await?.unwrap_or_default();
        events.push(event.clone());
        self.write_json(&key, &events).await?;

        let mut widgets = self.read_index(ALL_WIDGET_IDS_KEY).await?;
        if widgets.insert(event.widget_id.clone()) {
            self.write_json(ALL_WIDGET_IDS_KEY, &widgets).await?;
        }
        Ok(())
    }

    async fn get_interaction_events(&self, widget_id: &str) -> StorageResult<Vec<InteractionEvent>> {
        Ok(self
            .read_json(&interaction_events_key(widget_id))
            .await?
            .unwrap_or_default())
    }

    async fn get_all_interaction_events(&self) -> StorageResult<Vec<InteractionEvent>> {
        let widgets = self.read_index(ALL_WIDGET_IDS_KEY).await?;
        let mut all = Vec::new();
        for widget_id in widgets {
            all.extend(self.get_interaction_events(&widget_id).await?);
        }
        all.sort_by_key(|e| e.timestamp);
        Ok(all)
    }

    async fn clear_interaction_events(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let widgets = self.read_index(ALL_WIDGET_IDS_KEY).await?;
        for widget_id in &widgets {
            self.kv.remove(&interaction_events_key(widget_id)).await?;
        }
        self.kv.remove(ALL_WIDGET_IDS_KEY).await?;
        debug!("Cleared interaction logs for {} widgets", widgets.len());
        Ok(())
    }

    async fn save_current_layout_id(&self, id: Option<String>) -> StorageResult<()> {
        match id {
            Some(id) => self.write_json(CURRENT_LAYOUT_ID_KEY, &id).await,
            None => self.kv.remove(CURRENT_LAYOUT_ID_KEY).await,
        }
    }

    async fn get_current_layout_id(&self) -> StorageResult<Option<String>> {
        self.read_json(CURRENT_LAYOUT_ID_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::types::{InteractionType, WidgetPosition};
    use chrono::{Duration, Utc};

    fn event_at(widget: &str, offset_ms: i64) -> InteractionEvent {
        InteractionEvent {
            widget_id: widget.to_string(),
            kind: InteractionType::Tap,
            value: None,
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    #[tokio::test]
    async fn test_layout_upsert_and_index() {
        let storage = KvStorage::in_memory();
        let mut layout = LayoutConfig::new("home", vec![WidgetPosition::new("a", 0)]);

        storage.save_layout_config(&layout).await.unwrap();
        layout.name = "renamed".into();
        storage.save_layout_config(&layout).await.unwrap();

        let all = storage.get_all_layout_configs().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "renamed");

        let index = storage.substrate().get(ALL_LAYOUT_CONFIG_IDS_KEY).await.unwrap().unwrap();
        assert!(index.contains(&layout.id));
    }

    #[tokio::test]
    async fn test_delete_layout_updates_index() {
        let storage = KvStorage::in_memory();
        let a = LayoutConfig::new("a", vec![]);
        let b = LayoutConfig::new("b", vec![]);
        storage.save_layout_config(&a).await.unwrap();
        storage.save_layout_config(&b).await.unwrap();

        storage.delete_layout_config(&a.id).await.unwrap();
        assert!(storage.get_layout_config(&a.id).await.unwrap().is_none());
        let all = storage.get_all_layout_configs().await.unwrap();
        assert_eq!(all, vec![b]);
    }

    #[tokio::test]
    async fn test_events_sorted_across_widgets() {
        let storage = KvStorage::in_memory();
        storage.log_interaction_event(&event_at("b", 20)).await.unwrap();
        storage.log_interaction_event(&event_at("a", 10)).await.unwrap();
        storage.log_interaction_event(&event_at("b", 0)).await.unwrap();

        let per_widget = storage.get_interaction_events("b").await.unwrap();
        assert_eq!(per_widget.len(), 2);

        let all = storage.get_all_interaction_events().await.unwrap();
        let widgets: Vec<&str> = all.iter().map(|e| e.widget_id.as_str()).collect();
        assert_eq!(widgets, vec!["b", "a", "b"]);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_clear_events() {
        let storage = KvStorage::in_memory();
        storage.log_interaction_event(&event_at("a", 0)).await.unwrap();
        storage.log_interaction_event(&event_at("b", 0)).await.unwrap();
        storage.save_layout_config(&LayoutConfig::new("keep", vec![])).await.unwrap();

        storage.clear_interaction_events().await.unwrap();
        assert!(storage.get_all_interaction_events().await.unwrap().is_empty());
        assert!(storage.substrate().get(ALL_WIDGET_IDS_KEY).await.unwrap().is_none());
        assert_eq!(storage.get_all_layout_configs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_current_layout_pointer() {
        let storage = KvStorage::in_memory();
        assert!(storage.get_current_layout_id().await.unwrap().is_none());
        storage.save_current_layout_id(Some("abc".into())).await.unwrap();
        assert_eq!(storage.get_current_layout_id().await.unwrap().as_deref(), Some("abc"));
        storage.save_current_layout_id(None).await.unwrap();
        assert!(storage.get_current_layout_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_serialization_error() {
        let storage = KvStorage::in_memory();
        storage.substrate().set(&layout_config_key("bad"), "not json".into()).await.unwrap();
        let err = storage.get_layout_config("bad").await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LayoutConfig::new("disk", vec![WidgetPosition::new("x", 0)]);
        {
            let storage = KvStorage::open(dir.path()).unwrap();
            storage.save_layout_config(&layout).await.unwrap();
            storage.log_interaction_event(&event_at("x", 0)).await.unwrap();
        }
        let storage = KvStorage::open(dir.path()).unwrap();
        assert_eq!(storage.get_layout_config(&layout.id).await.unwrap(), Some(layout));
        assert_eq!(storage.get_all_interaction_events().await.unwrap().len(), 1);
    }
}

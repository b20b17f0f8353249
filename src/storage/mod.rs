//! Storage backends for layout configurations and interaction events
//!
//! The pipeline depends only on [`StorageBackend`]. The bundled
//! implementation, [`KvStorage`], serializes records as JSON into a flat
//! namespaced key/value substrate:
//! - `MemoryKv`: volatile, for tests and embedded use
//! - `FileKv`: one file per key under a directory

pub mod kv;
mod backend;

pub use backend::KvStorage;
pub use kv::{FileKv, KeyValueStore, MemoryKv};

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::{InteractionEvent, LayoutConfig};

/// Key prefix for serialized layout configs
pub const LAYOUT_CONFIG_PREFIX: &str = "layout_config_";
/// Index of every stored layout config id
pub const ALL_LAYOUT_CONFIG_IDS_KEY: &str = "all_layout_config_ids";
/// Key prefix for a widget's event log
pub const INTERACTION_EVENT_PREFIX: &str = "interaction_event_";
/// Index of every widget id with a stored event log
pub const ALL_WIDGET_IDS_KEY: &str = "interaction_event_all_widget_ids";
/// Pointer to the active layout
pub const CURRENT_LAYOUT_ID_KEY: &str = "current_layout_id";

/// Durable persistence for layouts and interaction events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upsert a config by id, keeping the id index current
    async fn save_layout_config(&self, config: &LayoutConfig) -> StorageResult<()>;

    async fn get_layout_config(&self, id: &str) -> StorageResult<Option<LayoutConfig>>;

    /// All stored configs, order unspecified
    async fn get_all_layout_configs(&self) -> StorageResult<Vec<LayoutConfig>>;

    async fn delete_layout_config(&self, id: &str) -> StorageResult<()>;

    /// Append to the widget's event log
    async fn log_interaction_event(&self, event: &InteractionEvent) -> StorageResult<()>;

    async fn get_interaction_events(&self, widget_id: &str) -> StorageResult<Vec<InteractionEvent>>;

    /// Every stored event, ascending by timestamp
    async fn get_all_interaction_events(&self) -> StorageResult<Vec<InteractionEvent>>;

    /// Drop every event log and the widget index
    async fn clear_interaction_events(&self) -> StorageResult<()>;

    /// Persist the active layout pointer. Backends without support ignore it.
    async fn save_current_layout_id(&self, _id: Option<String>) -> StorageResult<()> {
        Ok(())
    }

    async fn get_current_layout_id(&self) -> StorageResult<Option<String>> {
        Ok(None)
    }
}

/// Storage key for a layout config
pub fn layout_config_key(id: &str) -> String {
    format!("{}{}", LAYOUT_CONFIG_PREFIX, id)
}

/// Storage key for a widget's event log
pub fn interaction_events_key(widget_id: &str) -> String {
    format!("{}{}", INTERACTION_EVENT_PREFIX, widget_id)
}

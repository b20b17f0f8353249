//! Layout Store - owns named layout configurations and the active one
//!
//! Configs are cached in memory by id and mirrored to the storage backend.
//! In-memory state is authoritative for the running session; storage failures
//! are logged and otherwise ignored. Whenever the active layout is activated or
//! mutated, its full config is published to listeners and the change stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AdaptError, AdaptResult};
use crate::observer::{Broadcaster, ListenerId};
use crate::storage::StorageBackend;
use crate::types::{LayoutConfig, WidgetPosition};

#[derive(Default)]
struct StoreState {
    cache: HashMap<String, LayoutConfig>,
    current_id: Option<String>,
}

/// Cache of layout configs plus the current-layout pointer
pub struct LayoutStore {
    storage: Arc<dyn StorageBackend>,
    state: RwLock<StoreState>,
    changes: Broadcaster<LayoutConfig>,
}

impl LayoutStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            state: RwLock::new(StoreState::default()),
            changes: Broadcaster::new("layout"),
        }
    }

    /// Create and persist a new layout. It is not activated.
    pub async fn create_layout(&self, name: &str, positions: Vec<WidgetPosition>) -> LayoutConfig {
        let config = LayoutConfig::new(name, positions);
        self.persist(&config).await;
        self.state
            .write()
            .await
            .cache
            .insert(config.id.clone(), config.clone());
        info!("Created layout '{}' ({})", config.name, config.id);
        config
    }

    /// Look up a layout, loading it from storage on a cache miss
    pub async fn get_layout(&self, id: &str) -> Option<LayoutConfig> {
        if let Some(config) = self.state.read().await.cache.get(id) {
            return Some(config.clone());
        }
        let mut state = self.state.write().await;
        self.load_into(&mut state, id).await
    }

    /// Reload every stored layout into the cache and return the cache.
    ///
    /// Cached layouts missing from storage are kept. Sorted by name, then id.
    pub async fn get_all_layouts(&self) -> Vec<LayoutConfig> {
        let stored = match self.storage.get_all_layout_configs().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to load layouts from storage: {}", e);
                Vec::new()
            }
        };

        let mut state = self.state.write().await;
        for config in stored {
            state.cache.insert(config.id.clone(), config);
        }
        let mut all: Vec<LayoutConfig> = state.cache.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Id of the active layout, if any
    pub async fn current_layout_id(&self) -> Option<String> {
        self.state.read().await.current_id.clone()
    }

    /// The active layout, if any
    pub async fn current_layout(&self) -> Option<LayoutConfig> {
        let state = self.state.read().await;
        state
            .current_id
            .as_ref()
            .and_then(|id| state.cache.get(id))
            .cloned()
    }

    /// Make `id` the active layout and publish it
    pub async fn set_current_layout(&self, id: &str) -> AdaptResult<()> {
        let config = {
            let mut state = self.state.write().await;
            let config = match state.cache.get(id) {
                Some(config) => config.clone(),
                None => self
                    .load_into(&mut state, id)
                    .await
                    .ok_or_else(|| AdaptError::NotFound(id.to_string()))?,
            };
            state.current_id = Some(id.to_string());
            self.persist_pointer(Some(id.to_string())).await;
            config
        };

        info!("Activated layout '{}' ({})", config.name, config.id);
        self.changes.publish(config);
        Ok(())
    }

    /// Insert or replace a widget's position in the active layout
    pub async fn update_widget_position(&self, position: WidgetPosition) -> AdaptResult<()> {
        self.mutate_current(move |config| {
            match config
                .positions
                .iter_mut()
                .find(|p| p.widget_id == position.widget_id)
            {
                Some(existing) => *existing = position,
                None => config.positions.push(position),
            }
        })
        .await
    }

    /// Remove every position for `widget_id` from the active layout
    pub async fn remove_widget_position(&self, widget_id: &str) -> AdaptResult<()> {
        self.mutate_current(|config| config.positions.retain(|p| p.widget_id != widget_id))
            .await
    }

    /// Assign `order = index` to each listed widget and re-sort the active layout.
    ///
    /// Listed widgets without a position get a new visible one. Widgets not
    /// listed keep their previous `order` value and land wherever it sorts.
    pub async fn reorder_widgets(&self, ordered_ids: &[String]) -> AdaptResult<()> {
        self.mutate_current(|config| {
            for (index, widget_id) in ordered_ids.iter().enumerate() {
                let order = index as i64;
                match config.positions.iter_mut().find(|p| &p.widget_id == widget_id) {
                    Some(position) => position.order = order,
                    None => config.positions.push(WidgetPosition::new(widget_id.clone(), order)),
                }
            }
            config.positions.sort_by_key(|p| p.order);
        })
        .await
    }

    /// Delete a layout from cache and storage.
    ///
    /// Deleting the active layout moves the pointer to the remaining cached
    /// layout with the smallest id (or clears it); the new one is published.
    pub async fn delete_layout(&self, id: &str) {
        let replacement = {
            let mut state = self.state.write().await;
            state.cache.remove(id);
            if let Err(e) = self.storage.delete_layout_config(id).await {
                warn!("Failed to delete layout {} from storage: {}", id, e);
            }

            if state.current_id.as_deref() != Some(id) {
                None
            } else {
                let next = state.cache.keys().min().cloned();
                state.current_id = next.clone();
                self.persist_pointer(next.clone()).await;
                next.and_then(|next| state.cache.get(&next).cloned())
            }
        };

        info!("Deleted layout {}", id);
        if let Some(config) = replacement {
            debug!("Active layout fell back to {}", config.id);
            self.changes.publish(config);
        }
    }

    /// Reload stored layouts and re-activate the persisted pointer if it
    /// still resolves. Returns the restored active layout.
    pub async fn restore(&self) -> Option<LayoutConfig> {
        let count = self.get_all_layouts().await.len();
        let pointer = match self.storage.get_current_layout_id().await {
            Ok(pointer) => pointer?,
            Err(e) => {
                warn!("Failed to load current layout pointer: {}", e);
                return None;
            }
        };

        match self.set_current_layout(&pointer).await {
            Ok(()) => {
                info!("Restored {} layouts, active {}", count, pointer);
                self.current_layout().await
            }
            Err(e) => {
                warn!("Persisted current layout is unusable: {}", e);
                None
            }
        }
    }

    /// Register a callback invoked whenever the active layout changes
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&LayoutConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.changes.add_listener(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.changes.remove_listener(id)
    }

    /// Stream of the active layout after every change
    pub fn subscribe(&self) -> broadcast::Receiver<LayoutConfig> {
        self.changes.subscribe()
    }

    async fn mutate_current<F>(&self, mutate: F) -> AdaptResult<()>
    where
        F: FnOnce(&mut LayoutConfig),
    {
        let updated = {
            let mut state = self.state.write().await;
            let id = state.current_id.clone().ok_or(AdaptError::NoCurrentLayout)?;
            if !state.cache.contains_key(&id) {
                self.load_into(&mut state, &id)
                    .await
                    .ok_or_else(|| AdaptError::NotFound(id.clone()))?;
            }
            let config = state
                .cache
                .get_mut(&id)
                .ok_or_else(|| AdaptError::NotFound(id.clone()))?;
            mutate(config);
            config.touch();
            let updated = config.clone();
            self.persist(&updated).await;
            updated
        };

        debug!("Updated active layout {}", updated.id);
        self.changes.publish(updated);
        Ok(())
    }

    async fn load_into(&self, state: &mut StoreState, id: &str) -> Option<LayoutConfig> {
        match self.storage.get_layout_config(id).await {
            Ok(Some(config)) => {
                state.cache.insert(id.to_string(), config.clone());
                Some(config)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load layout {}: {}", id, e);
                None
            }
        }
    }

    async fn persist(&self, config: &LayoutConfig) {
        if let Err(e) = self.storage.save_layout_config(config).await {
            warn!("Failed to persist layout {}: {}", config.id, e);
        }
    }

    async fn persist_pointer(&self, id: Option<String>) {
        if let Err(e) = self.storage.save_current_layout_id(id).await {
            warn!("Failed to persist current layout pointer: {}", e);
        }
    }
}

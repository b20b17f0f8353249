//! Interaction Tracker - records widget interactions and fans them out
//!
//! Every reported interaction is persisted (best effort), then handed to the
//! registered callbacks and finally pushed onto the broadcast stream.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::observer::{Broadcaster, Callback, ListenerId};
use crate::storage::StorageBackend;
use crate::types::{InteractionEvent, InteractionType, InteractionValue};

/// Records interactions and notifies subscribers
pub struct InteractionTracker {
    storage: Arc<dyn StorageBackend>,
    events: Broadcaster<InteractionEvent>,
}

impl InteractionTracker {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            events: Broadcaster::new("interaction"),
        }
    }

    /// Record an interaction with `widget_id`.
    ///
    /// A storage failure is logged and does not prevent notification.
    pub async fn track_interaction(
        &self,
        widget_id: &str,
        kind: InteractionType,
        value: Option<InteractionValue>,
    ) -> InteractionEvent {
        if value.as_ref().is_some_and(|v| !v.is_storable()) {
            warn!("Dropping non-finite {} payload on {}", kind, widget_id);
        }
        let event = InteractionEvent::new(widget_id, kind, value);

        if let Err(e) = self.storage.log_interaction_event(&event).await {
            warn!("Failed to persist {} interaction on {}: {}", event.kind, event.widget_id, e);
        }

        debug!("Tracked {} on {}", event.kind, event.widget_id);
        self.events.publish(event.clone());
        event
    }

    /// Shorthand for a tap without payload
    pub async fn track_tap(&self, widget_id: &str) -> InteractionEvent {
        self.track_interaction(widget_id, InteractionType::Tap, None).await
    }

    /// Register a callback invoked synchronously for every interaction
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&InteractionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.add_listener(callback)
    }

    pub fn add_callback(&self, callback: Callback<InteractionEvent>) -> ListenerId {
        self.events.add_callback(callback)
    }

    /// Deregister a callback; unknown ids are ignored
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    /// Reactive stream of interactions
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }

    /// Stored events for one widget (empty if storage fails)
    pub async fn get_events_for_widget(&self, widget_id: &str) -> Vec<InteractionEvent> {
        self.storage
            .get_interaction_events(widget_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to load interactions for {}: {}", widget_id, e);
                Vec::new()
            })
    }

    /// Every stored event, oldest first (empty if storage fails)
    pub async fn get_all_events(&self) -> Vec<InteractionEvent> {
        self.storage.get_all_interaction_events().await.unwrap_or_else(|e| {
            warn!("Failed to load interactions: {}", e);
            Vec::new()
        })
    }

    /// Remove every stored event. Returns false if storage failed.
    pub async fn clear_all_events(&self) -> bool {
        match self.storage.clear_interaction_events().await {
            Ok(()) => {
                debug!("Cleared interaction history");
                true
            }
            Err(e) => {
                warn!("Failed to clear interactions: {}", e);
                false
            }
        }
    }
}

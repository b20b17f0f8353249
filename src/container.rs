//! Adaptive Container - the rendering side of the pipeline, headless
//!
//! A container owns a list of child widget ids. It forwards interactions on
//! those children to the tracker and follows the layout store's change
//! stream, keeping its arranged child order current for the renderer.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::layout_store::LayoutStore;
use crate::tracker::InteractionTracker;
use crate::types::{InteractionEvent, InteractionType, InteractionValue, LayoutConfig};

/// Order `children` for rendering under `config`.
///
/// Positioned children come first by `order`; hidden ones are dropped.
/// Children the layout does not mention follow in their original order.
pub fn arrange_children(config: &LayoutConfig, children: &[String]) -> Vec<String> {
    let present: HashSet<&str> = children.iter().map(String::as_str).collect();
    let mut positions: Vec<_> = config.positions.iter().collect();
    positions.sort_by_key(|p| p.order);

    let mut placed = HashSet::new();
    let mut arranged = Vec::with_capacity(children.len());
    for position in positions {
        if !present.contains(position.widget_id.as_str()) || !placed.insert(position.widget_id.as_str()) {
            continue;
        }
        if position.visible {
            arranged.push(position.widget_id.clone());
        }
    }

    arranged.extend(
        children
            .iter()
            .filter(|id| config.position(id).is_none())
            .cloned(),
    );
    arranged
}

/// Forwards interactions on one child into the tracker
#[derive(Clone)]
pub struct InteractionHandler {
    widget_id: String,
    tracker: Arc<InteractionTracker>,
}

impl InteractionHandler {
    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub async fn fire(&self, kind: InteractionType, value: Option<InteractionValue>) -> InteractionEvent {
        self.tracker.track_interaction(&self.widget_id, kind, value).await
    }
}

/// A mounted container following the active layout
pub struct AdaptiveContainer {
    children: Vec<String>,
    tracker: Arc<InteractionTracker>,
    arranged: watch::Receiver<Vec<String>>,
    follower: JoinHandle<()>,
}

impl AdaptiveContainer {
    /// Mount over `children`, arranging them by the current layout (if any)
    /// and re-arranging on every layout change
    pub async fn mount(
        tracker: Arc<InteractionTracker>,
        layouts: Arc<LayoutStore>,
        children: Vec<String>,
    ) -> Self {
        // Subscribe before reading the current layout so no change is missed
        let mut changes = layouts.subscribe();
        let initial = match layouts.current_layout().await {
            Some(config) => arrange_children(&config, &children),
            None => children.clone(),
        };
        let (tx, arranged) = watch::channel(initial);

        let follower_children = children.clone();
        let follower = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(config) => {
                        let order = arrange_children(&config, &follower_children);
                        debug!("Container re-arranged for layout {}: {:?}", config.id, order);
                        if tx.send(order).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Container skipped {} layout updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            children,
            tracker,
            arranged,
            follower,
        }
    }

    /// Children in mount order
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Children in current render order
    pub fn arranged(&self) -> Vec<String> {
        self.arranged.borrow().clone()
    }

    /// Wait for the next re-arrangement and return it
    pub async fn changed(&mut self) -> Option<Vec<String>> {
        self.arranged.changed().await.ok()?;
        Some(self.arranged.borrow_and_update().clone())
    }

    /// Interaction callback for one child
    pub fn handler_for(&self, widget_id: &str) -> InteractionHandler {
        InteractionHandler {
            widget_id: widget_id.to_string(),
            tracker: self.tracker.clone(),
        }
    }

    /// One handler per child, in mount order
    pub fn handlers(&self) -> Vec<InteractionHandler> {
        self.children.iter().map(|id| self.handler_for(id)).collect()
    }
}

impl Drop for AdaptiveContainer {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

//! Application context wiring the pipeline together
//!
//! One [`AdaptiveContext`] owns the storage backend, tracker, layout store and
//! rule engine. Applications create it at their root and hand out references.
//! A process-wide context is also available through [`global`] for code that
//! cannot thread one through.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use once_cell::sync::Lazy;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AdaptiveConfig;
use crate::engine::RuleEngine;
use crate::layout_store::LayoutStore;
use crate::rules::build_rules;
use crate::storage::{KvStorage, StorageBackend};
use crate::tracker::InteractionTracker;

/// Shared pipeline components
pub struct AdaptiveContext {
    config: AdaptiveConfig,
    storage: Arc<dyn StorageBackend>,
    tracker: Arc<InteractionTracker>,
    layouts: Arc<LayoutStore>,
    engine: RuleEngine,
    debug_taps: Mutex<Vec<JoinHandle<()>>>,
}

impl AdaptiveContext {
    /// Wire components over `storage`. Nothing is started.
    pub fn new(storage: Arc<dyn StorageBackend>, config: AdaptiveConfig) -> Self {
        let tracker = Arc::new(InteractionTracker::new(storage.clone()));
        let layouts = Arc::new(LayoutStore::new(storage.clone()));
        let engine = RuleEngine::with_rules(tracker.clone(), layouts.clone(), build_rules(&config.rules));
        engine.set_min_interactions(config.min_interactions());

        Self {
            config,
            storage,
            tracker,
            layouts,
            engine,
            debug_taps: Mutex::new(Vec::new()),
        }
    }

    /// Volatile context with default settings
    pub fn in_memory() -> Self {
        Self::new(Arc::new(KvStorage::in_memory()), AdaptiveConfig::default())
    }

    /// Open the configured storage, wire the components and start them
    pub async fn initialize(config: AdaptiveConfig) -> Result<Self> {
        let storage = config.storage.open()?;
        let context = Self::new(storage, config);
        context.start().await;
        Ok(context)
    }

    /// Restore persisted layouts, attach debug taps and start
    /// auto-adjustments, as configured
    pub async fn start(&self) {
        if let Some(layout) = self.layouts.restore().await {
            info!("Resumed layout '{}'", layout.name);
        }
        if self.config.enable_debug_logging {
            self.attach_debug_taps();
        }
        if self.config.enable_auto_adjust {
            self.engine
                .start_auto_adjustments(self.config.auto_adjust_interval())
                .await;
        }
    }

    /// Stop auto-adjustments and detach debug taps
    pub async fn shutdown(&self) {
        self.engine.stop_auto_adjustments().await;
        let taps: Vec<JoinHandle<()>> = self
            .debug_taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for tap in taps {
            tap.abort();
        }
        debug!("Adaptive context shut down");
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn tracker(&self) -> &Arc<InteractionTracker> {
        &self.tracker
    }

    pub fn layouts(&self) -> &Arc<LayoutStore> {
        &self.layouts
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    fn attach_debug_taps(&self) {
        let mut taps = self.debug_taps.lock().unwrap_or_else(PoisonError::into_inner);
        if !taps.is_empty() {
            return;
        }

        let mut interactions = self.tracker.subscribe();
        taps.push(tokio::spawn(async move {
            loop {
                match interactions.recv().await {
                    Ok(event) => debug!(
                        widget = %event.widget_id,
                        kind = %event.kind,
                        "interaction tracked"
                    ),
                    Err(RecvError::Lagged(skipped)) => debug!("interaction tap lagged by {}", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        let mut layouts = self.layouts.subscribe();
        taps.push(tokio::spawn(async move {
            loop {
                match layouts.recv().await {
                    Ok(config) => debug!(
                        layout = %config.id,
                        order = ?config.widget_order(),
                        "layout changed"
                    ),
                    Err(RecvError::Lagged(skipped)) => debug!("layout tap lagged by {}", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }
}

static GLOBAL_CONTEXT: Lazy<RwLock<Option<Arc<AdaptiveContext>>>> = Lazy::new(|| RwLock::new(None));

/// The process-wide context, created in memory on first use
pub fn global() -> Arc<AdaptiveContext> {
    if let Some(context) = GLOBAL_CONTEXT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return context.clone();
    }
    GLOBAL_CONTEXT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .get_or_insert_with(|| Arc::new(AdaptiveContext::in_memory()))
        .clone()
}

/// Replace the process-wide context, returning the previous one.
///
/// Listeners and streams obtained from the previous context stay attached to
/// it; callers must re-subscribe against the new one.
pub fn install_global(context: Arc<AdaptiveContext>) -> Option<Arc<AdaptiveContext>> {
    let previous = GLOBAL_CONTEXT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(context);
    if previous.is_some() {
        warn!("Replaced global adaptive context; existing subscribers keep the old one");
    }
    previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StorageConfig, StorageKind};
    use crate::engine::EvaluationOutcome;
    use crate::types::WidgetPosition;

    #[tokio::test]
    async fn test_context_wires_config() {
        let config = AdaptiveConfig {
            threshold: 2,
            enable_auto_adjust: false,
            ..Default::default()
        };
        let context = AdaptiveContext::new(Arc::new(KvStorage::in_memory()), config);
        context.start().await;

        assert_eq!(context.engine().min_interactions(), 2);
        assert_eq!(context.engine().rule_names().await, vec!["most_used_first"]);
        assert!(!context.engine().is_auto_adjusting().await);
    }

    #[tokio::test]
    async fn test_initialize_starts_auto_adjust_and_taps() {
        let config = AdaptiveConfig {
            enable_debug_logging: true,
            ..Default::default()
        };
        let context = AdaptiveContext::initialize(config).await.unwrap();
        assert!(context.engine().is_auto_adjusting().await);
        assert_eq!(context.debug_taps.lock().unwrap().len(), 2);

        context.shutdown().await;
        assert!(!context.engine().is_auto_adjusting().await);
        assert!(context.debug_taps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_resumes_layout_from_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = AdaptiveConfig {
            enable_auto_adjust: false,
            storage: StorageConfig {
                backend: StorageKind::File,
                path: Some(dir.path().to_path_buf()),
            },
            ..Default::default()
        };

        let layout_id = {
            let context = AdaptiveContext::initialize(config.clone()).await.unwrap();
            let layout = context
                .layouts()
                .create_layout("home", vec![WidgetPosition::new("a", 0), WidgetPosition::new("b", 1)])
                .await;
            context.layouts().set_current_layout(&layout.id).await.unwrap();
            context.tracker().track_tap("b").await;
            layout.id
        };

        let context = AdaptiveContext::initialize(config).await.unwrap();
        assert_eq!(context.layouts().current_layout_id().await, Some(layout_id));
        let outcome = context.engine().evaluate_and_apply_rules().await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Applied(vec!["b".into()]));
    }

    #[test]
    fn test_install_global_replaces_instance() {
        let first = global();
        assert!(Arc::ptr_eq(&first, &global()));

        let replacement = Arc::new(AdaptiveContext::in_memory());
        let previous = install_global(replacement.clone()).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert!(Arc::ptr_eq(&global(), &replacement));
    }
}

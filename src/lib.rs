//! Adaptive Layout - interaction-driven widget ordering
//!
//! Observes interactions with individual UI widgets, aggregates how often
//! each one is used and periodically recomputes a display order so that
//! frequently used widgets surface first:
//! - Interaction tracking with best-effort persistence and fan-out
//! - Named layout configurations with an active layout
//! - Composable ordering rules and an auto-adjusting rule engine
//! - A headless container contract for renderers
//!
//! # Example
//!
//! ```ignore
//! use adaptive_layout::{AdaptiveConfig, AdaptiveContext, WidgetPosition};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = AdaptiveContext::initialize(AdaptiveConfig::default()).await?;
//!     let layout = ctx.layouts().create_layout("home", vec![
//!         WidgetPosition::new("search", 0),
//!         WidgetPosition::new("news", 1),
//!     ]).await;
//!     ctx.layouts().set_current_layout(&layout.id).await?;
//!     ctx.tracker().track_tap("news").await;
//!     ctx.engine().evaluate_and_apply_rules().await?;
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod error;
pub mod observer;
pub mod storage;
pub mod tracker;
pub mod layout_store;
pub mod rules;
pub mod engine;

// Integration surface
pub mod container;
pub mod config;
pub mod context;
pub mod cli;

// Re-export commonly used types for convenience
pub use types::{
    InteractionEvent,
    InteractionType,
    InteractionValue,
    LayoutConfig,
    SizeConstraints,
    WidgetPosition,
};

pub use error::{AdaptError, AdaptResult, StorageError, StorageResult};

pub use storage::{FileKv, KeyValueStore, KvStorage, MemoryKv, StorageBackend};

pub use tracker::InteractionTracker;
pub use layout_store::LayoutStore;

pub use rules::{
    HighlightOutliers,
    InteractionCounts,
    LayoutRule,
    LeastUsedFirst,
    MostUsedFirst,
    PreserveOrder,
    RuleSpec,
};

pub use engine::{EngineStats, EvaluationOutcome, RuleEngine};
pub use container::{arrange_children, AdaptiveContainer};
pub use config::{AdaptiveConfig, LayoutMode};
pub use context::AdaptiveContext;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Interaction-driven layout adaptation", NAME, VERSION)
}

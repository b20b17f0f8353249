//! Rule Engine - turns interaction history into a new layout order
//!
//! Evaluation aggregates the full persisted event log into per-widget counts,
//! runs the rule pipeline and writes the result back with
//! [`LayoutStore::reorder_widgets`]. Re-running with unchanged history yields
//! the same order, so overlapping evaluations are harmless.
//!
//! Auto-adjustment adds two triggers for the same evaluation:
//! - a periodic timer
//! - an interaction counter that fires every `min_interactions` events

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::AdaptResult;
use crate::layout_store::LayoutStore;
use crate::observer::ListenerId;
use crate::rules::{run_pipeline, InteractionCounts, LayoutRule, MostUsedFirst};
use crate::tracker::InteractionTracker;

/// Interactions between count-triggered evaluations
pub const DEFAULT_MIN_INTERACTIONS: u32 = 5;

/// Period of the auto-adjust timer
pub const DEFAULT_AUTO_ADJUST_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest timer period accepted by [`RuleEngine::start_auto_adjustments`]
pub const MIN_AUTO_ADJUST_INTERVAL: Duration = Duration::from_millis(1);

/// What caused an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationTrigger {
    Manual,
    Timer,
    InteractionCount,
}

impl std::fmt::Display for EvaluationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationTrigger::Manual => write!(f, "manual"),
            EvaluationTrigger::Timer => write!(f, "timer"),
            EvaluationTrigger::InteractionCount => write!(f, "interaction count"),
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The active layout was reordered
    Applied(Vec<String>),
    NoCurrentLayout,
    NoInteractions,
    /// The rules produced no widgets
    EmptyOrder,
}

impl EvaluationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EvaluationOutcome::Applied(_))
    }
}

/// Counters describing engine activity
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub evaluations: u64,
    pub applied: u64,
    pub interaction_triggers: u64,
    pub timer_triggers: u64,
    pub last_evaluation: Option<DateTime<Utc>>,
    pub last_order: Vec<String>,
}

type RuleSet = Arc<RwLock<Vec<Box<dyn LayoutRule>>>>;

/// Count one interaction against `threshold`. Returns true for exactly the
/// caller that reaches it; the counter resets in the same atomic step.
fn count_interaction(pending: &AtomicU32, threshold: u32) -> bool {
    let reaches = |seen: u32| seen.saturating_add(1) >= threshold;
    let previous = pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seen| {
            Some(if reaches(seen) { 0 } else { seen + 1 })
        })
        .unwrap_or_else(|seen| seen);
    reaches(previous)
}

/// Everything an evaluation needs; cheap to clone into background tasks
#[derive(Clone)]
struct Evaluator {
    tracker: Arc<InteractionTracker>,
    layouts: Arc<LayoutStore>,
    rules: RuleSet,
    stats: Arc<Mutex<EngineStats>>,
}

impl Evaluator {
    fn update_stats(&self, update: impl FnOnce(&mut EngineStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut *stats);
    }

    fn record_trigger(&self, trigger: EvaluationTrigger) {
        self.update_stats(|stats| match trigger {
            EvaluationTrigger::Timer => stats.timer_triggers += 1,
            EvaluationTrigger::InteractionCount => stats.interaction_triggers += 1,
            EvaluationTrigger::Manual => {}
        });
    }

    async fn evaluate(&self, trigger: EvaluationTrigger) -> AdaptResult<EvaluationOutcome> {
        self.update_stats(|stats| {
            stats.evaluations += 1;
            stats.last_evaluation = Some(Utc::now());
        });

        let Some(current) = self.layouts.current_layout().await else {
            debug!("Skipping {} evaluation: no current layout", trigger);
            return Ok(EvaluationOutcome::NoCurrentLayout);
        };

        let events = self.tracker.get_all_events().await;
        let counts = InteractionCounts::aggregate(&events, &current.widget_order());
        if counts.is_empty() {
            debug!("Skipping {} evaluation: no interactions", trigger);
            return Ok(EvaluationOutcome::NoInteractions);
        }

        let order = {
            let rules = self.rules.read().await;
            run_pipeline(&rules, &counts)
        };
        if order.is_empty() {
            debug!("Skipping {} evaluation: rules produced no order", trigger);
            return Ok(EvaluationOutcome::EmptyOrder);
        }

        self.layouts.reorder_widgets(&order).await?;
        info!("Applied {} evaluation to layout {}: {:?}", trigger, current.id, order);
        self.update_stats(|stats| {
            stats.applied += 1;
            stats.last_order = order.clone();
        });
        Ok(EvaluationOutcome::Applied(order))
    }

    async fn evaluate_logged(&self, trigger: EvaluationTrigger) {
        if let Err(e) = self.evaluate(trigger).await {
            warn!("{} evaluation failed: {}", trigger, e);
        }
    }

    /// Run an evaluation on the ambient tokio runtime without waiting for it
    fn spawn(&self, trigger: EvaluationTrigger) -> anyhow::Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("auto-adjust evaluation needs a tokio runtime")?;
        let evaluator = self.clone();
        Ok(runtime.spawn(async move { evaluator.evaluate_logged(trigger).await }))
    }
}

struct AutoAdjust {
    shutdown_tx: broadcast::Sender<()>,
    timer: JoinHandle<()>,
    listener: ListenerId,
}

/// Applies ordering rules to the active layout, on demand or automatically
pub struct RuleEngine {
    evaluator: Evaluator,
    min_interactions: Arc<AtomicU32>,
    pending: Arc<AtomicU32>,
    auto: tokio::sync::Mutex<Option<AutoAdjust>>,
}

impl RuleEngine {
    /// Engine with the default `[MostUsedFirst]` pipeline
    pub fn new(tracker: Arc<InteractionTracker>, layouts: Arc<LayoutStore>) -> Self {
        Self::with_rules(tracker, layouts, vec![Box::new(MostUsedFirst)])
    }

    pub fn with_rules(
        tracker: Arc<InteractionTracker>,
        layouts: Arc<LayoutStore>,
        rules: Vec<Box<dyn LayoutRule>>,
    ) -> Self {
        Self {
            evaluator: Evaluator {
                tracker,
                layouts,
                rules: Arc::new(RwLock::new(rules)),
                stats: Arc::new(Mutex::new(EngineStats::default())),
            },
            min_interactions: Arc::new(AtomicU32::new(DEFAULT_MIN_INTERACTIONS)),
            pending: Arc::new(AtomicU32::new(0)),
            auto: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the rule pipeline
    pub async fn set_rules(&self, rules: Vec<Box<dyn LayoutRule>>) {
        *self.evaluator.rules.write().await = rules;
    }

    /// Append a rule to the end of the pipeline
    pub async fn add_rule(&self, rule: Box<dyn LayoutRule>) {
        self.evaluator.rules.write().await.push(rule);
    }

    pub async fn rule_names(&self) -> Vec<String> {
        self.evaluator
            .rules
            .read()
            .await
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Interactions needed to trigger a count-based evaluation (minimum 1)
    pub fn set_min_interactions(&self, min: u32) {
        self.min_interactions.store(min.max(1), Ordering::SeqCst);
    }

    pub fn min_interactions(&self) -> u32 {
        self.min_interactions.load(Ordering::SeqCst)
    }

    /// Interactions counted since the last count-triggered evaluation
    pub fn pending_interactions(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        self.evaluator
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Evaluate the rules against the full event history and reorder the
    /// active layout
    pub async fn evaluate_and_apply_rules(&self) -> AdaptResult<EvaluationOutcome> {
        self.evaluator.evaluate(EvaluationTrigger::Manual).await
    }

    /// Start the timer and interaction-count triggers. Returns false if they
    /// were already running. `interval` is raised to at least
    /// [`MIN_AUTO_ADJUST_INTERVAL`].
    pub async fn start_auto_adjustments(&self, interval: Duration) -> bool {
        if interval < MIN_AUTO_ADJUST_INTERVAL {
            warn!("Auto-adjust interval {:?} too short, using {:?}", interval, MIN_AUTO_ADJUST_INTERVAL);
        }
        let interval = interval.max(MIN_AUTO_ADJUST_INTERVAL);

        let mut auto = self.auto.lock().await;
        if auto.is_some() {
            debug!("Auto-adjustments already running");
            return false;
        }

        let listener = {
            let evaluator = self.evaluator.clone();
            let pending = self.pending.clone();
            let min_interactions = self.min_interactions.clone();
            self.evaluator.tracker.add_listener(move |_event| {
                if count_interaction(&pending, min_interactions.load(Ordering::SeqCst)) {
                    evaluator.record_trigger(EvaluationTrigger::InteractionCount);
                    let _task = evaluator.spawn(EvaluationTrigger::InteractionCount)?;
                }
                Ok(())
            })
        };

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let evaluator = self.evaluator.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Auto-adjust timer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        evaluator.record_trigger(EvaluationTrigger::Timer);
                        evaluator.evaluate_logged(EvaluationTrigger::Timer).await;
                    }
                }
            }
        });

        *auto = Some(AutoAdjust {
            shutdown_tx,
            timer,
            listener,
        });
        info!(
            "Auto-adjustments started (every {:?} or {} interactions)",
            interval,
            self.min_interactions()
        );
        true
    }

    /// Cancel the timer and deregister the interaction listener. Returns
    /// false if auto-adjustments were not running.
    pub async fn stop_auto_adjustments(&self) -> bool {
        let Some(auto) = self.auto.lock().await.take() else {
            return false;
        };
        self.evaluator.tracker.remove_listener(auto.listener);
        let _ = auto.shutdown_tx.send(());
        // An evaluation already in flight is allowed to finish
        drop(auto.timer);
        info!("Auto-adjustments stopped");
        true
    }

    pub async fn is_auto_adjusting(&self) -> bool {
        self.auto.lock().await.is_some()
    }
}

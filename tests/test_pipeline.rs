//! Integration tests for the adaptation pipeline:
//! - Tracking interactions through a container into an active layout
//! - Count-triggered and manual evaluation
//! - Configured rule pipelines
//! - Persistence across contexts on the file substrate

use std::sync::Arc;
use std::time::Duration;

use adaptive_layout::config::{StorageConfig, StorageKind};
use adaptive_layout::{
    AdaptiveConfig, AdaptiveContainer, AdaptiveContext, EvaluationOutcome, InteractionType,
    InteractionValue, KvStorage, RuleSpec, WidgetPosition,
};
use tokio_test::{assert_err, assert_ok};

fn cards() -> Vec<String> {
    (1..=4).map(|i| format!("card{}", i)).collect()
}

fn manual_config() -> AdaptiveConfig {
    AdaptiveConfig {
        enable_auto_adjust: false,
        ..Default::default()
    }
}

async fn context_with_cards(config: AdaptiveConfig) -> AdaptiveContext {
    let context = AdaptiveContext::new(Arc::new(KvStorage::in_memory()), config);
    context.start().await;
    let positions = cards()
        .into_iter()
        .enumerate()
        .map(|(i, id)| WidgetPosition::new(id, i as i64))
        .collect();
    let layout = context.layouts().create_layout("cards", positions).await;
    assert_ok!(context.layouts().set_current_layout(&layout.id).await);
    context
}

async fn tap_scenario(context: &AdaptiveContext) {
    for _ in 0..5 {
        context.tracker().track_tap("card3").await;
    }
    for id in ["card1", "card2", "card4"] {
        context.tracker().track_tap(id).await;
    }
}

// =====================================================================
// END-TO-END
// =====================================================================

#[tokio::test]
async fn test_end_to_end_most_used_first() {
    let context = context_with_cards(manual_config()).await;
    tap_scenario(&context).await;

    let outcome = assert_ok!(context.engine().evaluate_and_apply_rules().await);
    assert_eq!(
        outcome,
        EvaluationOutcome::Applied(vec![
            "card3".into(),
            "card1".into(),
            "card2".into(),
            "card4".into()
        ])
    );

    let layout = context.layouts().current_layout().await.unwrap();
    assert_eq!(layout.widget_order(), vec!["card3", "card1", "card2", "card4"]);
    assert_eq!(layout.position("card3").unwrap().order, 0);
    assert_eq!(layout.position("card4").unwrap().order, 3);
}

#[tokio::test]
async fn test_container_renders_adapted_order() {
    let context = context_with_cards(manual_config()).await;
    let mut container = AdaptiveContainer::mount(
        context.tracker().clone(),
        context.layouts().clone(),
        cards(),
    )
    .await;
    assert_eq!(container.arranged(), cards());

    let card3 = container.handler_for("card3");
    for _ in 0..3 {
        card3.fire(InteractionType::Tap, None).await;
    }
    container
        .handler_for("card4")
        .fire(InteractionType::Scroll, Some(InteractionValue::Number(120.0)))
        .await;

    assert_ok!(context.engine().evaluate_and_apply_rules().await);
    let arranged = tokio::time::timeout(Duration::from_secs(2), container.changed())
        .await
        .expect("container never re-arranged")
        .unwrap();
    // card1 and card2 were never touched and keep their stale order values
    assert_eq!(arranged, vec!["card1", "card3", "card2", "card4"]);
}

#[tokio::test]
async fn test_evaluation_without_current_layout_is_noop() {
    let context = AdaptiveContext::new(Arc::new(KvStorage::in_memory()), manual_config());
    context.tracker().track_tap("card1").await;

    let outcome = assert_ok!(context.engine().evaluate_and_apply_rules().await);
    assert_eq!(outcome, EvaluationOutcome::NoCurrentLayout);
    assert!(!outcome.is_applied());
    assert_err!(context.layouts().set_current_layout("missing").await);
}

// =====================================================================
// SCHEDULING
// =====================================================================

#[tokio::test]
async fn test_threshold_triggers_exactly_one_evaluation() {
    let config = AdaptiveConfig {
        threshold: 5,
        auto_adjust_interval_secs: 3600,
        ..Default::default()
    };
    let context = context_with_cards(config).await;
    assert!(context.engine().is_auto_adjusting().await);

    for _ in 0..4 {
        context.tracker().track_tap("card2").await;
    }
    assert_eq!(context.engine().pending_interactions(), 4);
    assert_eq!(context.engine().stats().interaction_triggers, 0);

    context.tracker().track_tap("card2").await;
    assert_eq!(context.engine().pending_interactions(), 0);
    assert_eq!(context.engine().stats().interaction_triggers, 1);

    let mut waited = 0;
    while context.engine().stats().applied == 0 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    let stats = context.engine().stats();
    assert_eq!(stats.evaluations, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.timer_triggers, 0);
    assert_eq!(stats.last_order[0], "card2");

    context.shutdown().await;
    assert!(!context.engine().is_auto_adjusting().await);
}

#[tokio::test]
async fn test_count_trigger_reorders_layout() {
    let config = AdaptiveConfig {
        threshold: 8,
        auto_adjust_interval_secs: 3600,
        ..Default::default()
    };
    let context = context_with_cards(config).await;
    let mut changes = context.layouts().subscribe();

    tap_scenario(&context).await;

    let layout = tokio::time::timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("no layout change")
        .unwrap();
    assert_eq!(layout.widget_order(), vec!["card3", "card1", "card2", "card4"]);
    context.shutdown().await;
}

// =====================================================================
// CONFIGURED PIPELINES
// =====================================================================

#[tokio::test]
async fn test_configured_rule_pipeline() {
    let config: AdaptiveConfig = toml::from_str(
        r#"
        enable_auto_adjust = false

        [[rules]]
        rule = "most_used_first"

        [[rules]]
        rule = "preserve_order"
        fixed_ids = ["card4"]
        "#,
    )
    .unwrap();
    assert_eq!(
        config.rules,
        vec![
            RuleSpec::MostUsedFirst,
            RuleSpec::PreserveOrder { fixed_ids: vec!["card4".into()] }
        ]
    );

    let context = context_with_cards(config).await;
    tap_scenario(&context).await;

    let outcome = assert_ok!(context.engine().evaluate_and_apply_rules().await);
    assert_eq!(
        outcome,
        EvaluationOutcome::Applied(vec![
            "card4".into(),
            "card3".into(),
            "card1".into(),
            "card2".into()
        ])
    );
}

#[tokio::test]
async fn test_highlight_outliers_keeps_layout_order_for_the_rest() {
    let config = AdaptiveConfig {
        enable_auto_adjust: false,
        rules: vec![RuleSpec::HighlightOutliers { threshold: 2.0 }],
        ..Default::default()
    };
    let context = context_with_cards(config).await;
    for _ in 0..10 {
        context.tracker().track_tap("card4").await;
    }
    for id in ["card3", "card2", "card1"] {
        context.tracker().track_tap(id).await;
    }

    let outcome = assert_ok!(context.engine().evaluate_and_apply_rules().await);
    assert_eq!(
        outcome,
        EvaluationOutcome::Applied(vec![
            "card4".into(),
            "card1".into(),
            "card2".into(),
            "card3".into()
        ])
    );
}

// =====================================================================
// PERSISTENCE
// =====================================================================

#[tokio::test]
async fn test_history_and_layout_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = AdaptiveConfig {
        enable_auto_adjust: false,
        storage: StorageConfig {
            backend: StorageKind::File,
            path: Some(dir.path().to_path_buf()),
        },
        ..Default::default()
    };

    {
        let context = assert_ok!(AdaptiveContext::initialize(config.clone()).await);
        let positions = cards()
            .into_iter()
            .enumerate()
            .map(|(i, id)| WidgetPosition::new(id, i as i64))
            .collect();
        let layout = context.layouts().create_layout("cards", positions).await;
        assert_ok!(context.layouts().set_current_layout(&layout.id).await);
        tap_scenario(&context).await;
        context.shutdown().await;
    }

    let context = assert_ok!(AdaptiveContext::initialize(config).await);
    assert_eq!(context.tracker().get_all_events().await.len(), 8);
    assert_eq!(context.tracker().get_events_for_widget("card3").await.len(), 5);

    let outcome = assert_ok!(context.engine().evaluate_and_apply_rules().await);
    assert!(outcome.is_applied());
    let layout = context.layouts().current_layout().await.unwrap();
    assert_eq!(layout.widget_order(), vec!["card3", "card1", "card2", "card4"]);

    assert!(context.tracker().clear_all_events().await);
    let outcome = assert_ok!(context.engine().evaluate_and_apply_rules().await);
    assert_eq!(outcome, EvaluationOutcome::NoInteractions);
}

//! Ordering rules applied to aggregated interaction counts
//!
//! A rule turns per-widget counts into an ordered list of widget ids. Rules
//! are pure and synchronous; the engine chains them, feeding each rule only
//! the widgets the previous one kept. All built-in rules sort stably, so ties
//! keep the order in which widgets appear in the counts.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::InteractionEvent;

/// Interaction count per widget, in a meaningful encounter order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionCounts {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl InteractionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count events per widget; widgets appear in first-seen order
    pub fn from_events(events: &[InteractionEvent]) -> Self {
        let mut counts = Self::new();
        for event in events {
            counts.increment(&event.widget_id);
        }
        counts
    }

    /// Count events, ordering widgets by `prior_order` first and then by
    /// first interaction. Widgets in `prior_order` without events are skipped.
    pub fn aggregate(events: &[InteractionEvent], prior_order: &[String]) -> Self {
        let raw = Self::from_events(events);
        let mut counts = Self::new();
        for widget_id in prior_order {
            if let Some(count) = raw.get(widget_id) {
                counts.insert(widget_id.clone(), count);
            }
        }
        for (widget_id, count) in raw.iter() {
            if !counts.contains(widget_id) {
                counts.insert(widget_id.to_string(), count);
            }
        }
        counts
    }

    /// Add one interaction for `widget_id`
    pub fn increment(&mut self, widget_id: &str) {
        match self.index.get(widget_id) {
            Some(&i) => self.entries[i].1 += 1,
            None => self.insert(widget_id.to_string(), 1),
        }
    }

    /// Set the count for `widget_id`, appending it if new
    pub fn insert(&mut self, widget_id: String, count: u64) {
        match self.index.get(&widget_id) {
            Some(&i) => self.entries[i].1 = count,
            None => {
                self.index.insert(widget_id.clone(), self.entries.len());
                self.entries.push((widget_id, count));
            }
        }
    }

    pub fn get(&self, widget_id: &str) -> Option<u64> {
        self.index.get(widget_id).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, widget_id: &str) -> bool {
        self.index.contains_key(widget_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(id, count)| (id.as_str(), *count))
    }

    pub fn widget_ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    /// Counts for exactly `order`, in that order. Ids this set never saw get 0.
    pub fn restrict(&self, order: &[String]) -> Self {
        let mut restricted = Self::new();
        for widget_id in order {
            restricted.insert(widget_id.clone(), self.get(widget_id).unwrap_or(0));
        }
        restricted
    }

    fn sorted_by<F>(&self, compare: F) -> Vec<String>
    where
        F: Fn(u64, u64) -> std::cmp::Ordering,
    {
        let mut entries: Vec<&(String, u64)> = self.entries.iter().collect();
        entries.sort_by(|a, b| compare(a.1, b.1));
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for InteractionCounts {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (widget_id, count) in iter {
            counts.insert(widget_id.into(), count);
        }
        counts
    }
}

/// Turns interaction counts into a widget order
pub trait LayoutRule: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, counts: &InteractionCounts) -> Vec<String>;
}

/// Most interacted widgets first
#[derive(Debug, Clone, Default)]
pub struct MostUsedFirst;

impl LayoutRule for MostUsedFirst {
    fn name(&self) -> &str {
        "most_used_first"
    }

    fn apply(&self, counts: &InteractionCounts) -> Vec<String> {
        counts.sorted_by(|a, b| b.cmp(&a))
    }
}

/// Least interacted widgets first
#[derive(Debug, Clone, Default)]
pub struct LeastUsedFirst;

impl LayoutRule for LeastUsedFirst {
    fn name(&self) -> &str {
        "least_used_first"
    }

    fn apply(&self, counts: &InteractionCounts) -> Vec<String> {
        counts.sorted_by(|a, b| a.cmp(&b))
    }
}

pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 2.0;

/// Widgets used more than `threshold` times the mean go first; the rest
/// follow. Both groups keep encounter order.
#[derive(Debug, Clone)]
pub struct HighlightOutliers {
    pub threshold: f64,
}

impl HighlightOutliers {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for HighlightOutliers {
    fn default() -> Self {
        Self::new(DEFAULT_OUTLIER_THRESHOLD)
    }
}

impl LayoutRule for HighlightOutliers {
    fn name(&self) -> &str {
        "highlight_outliers"
    }

    fn apply(&self, counts: &InteractionCounts) -> Vec<String> {
        if counts.is_empty() {
            return Vec::new();
        }
        let mean = counts.total() as f64 / counts.len() as f64;
        let cutoff = mean * self.threshold;

        let (outliers, rest): (Vec<_>, Vec<_>) =
            counts.iter().partition(|(_, count)| *count as f64 > cutoff);
        outliers
            .into_iter()
            .chain(rest)
            .map(|(id, _)| id.to_string())
            .collect()
    }
}

/// Pin the given widgets first, in the given order; everything else follows
/// by count descending.
#[derive(Debug, Clone, Default)]
pub struct PreserveOrder {
    pub fixed_ids: Vec<String>,
}

impl PreserveOrder {
    pub fn new<I, S>(fixed_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fixed_ids: fixed_ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl LayoutRule for PreserveOrder {
    fn name(&self) -> &str {
        "preserve_order"
    }

    fn apply(&self, counts: &InteractionCounts) -> Vec<String> {
        let mut pinned: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for widget_id in &self.fixed_ids {
            if counts.contains(widget_id) && seen.insert(widget_id.as_str()) {
                pinned.push(widget_id.clone());
            }
        }

        let remainder = counts.sorted_by(|a, b| b.cmp(&a));
        pinned.extend(remainder.into_iter().filter(|id| !seen.contains(id.as_str())));
        pinned
    }
}

fn default_threshold() -> f64 {
    DEFAULT_OUTLIER_THRESHOLD
}

/// Serializable description of a built-in rule, used in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleSpec {
    MostUsedFirst,
    LeastUsedFirst,
    HighlightOutliers {
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    PreserveOrder {
        #[serde(default)]
        fixed_ids: Vec<String>,
    },
}

impl RuleSpec {
    /// Instantiate the rule
    pub fn build(&self) -> Box<dyn LayoutRule> {
        match self {
            RuleSpec::MostUsedFirst => Box::new(MostUsedFirst),
            RuleSpec::LeastUsedFirst => Box::new(LeastUsedFirst),
            RuleSpec::HighlightOutliers { threshold } => Box::new(HighlightOutliers::new(*threshold)),
            RuleSpec::PreserveOrder { fixed_ids } => Box::new(PreserveOrder::new(fixed_ids.clone())),
        }
    }
}

/// Build a rule pipeline from specs
pub fn build_rules(specs: &[RuleSpec]) -> Vec<Box<dyn LayoutRule>> {
    specs.iter().map(RuleSpec::build).collect()
}

/// Run `counts` through `rules` in sequence. Each later rule only sees the
/// widgets the previous rule emitted, with their original counts.
pub fn run_pipeline(rules: &[Box<dyn LayoutRule>], counts: &InteractionCounts) -> Vec<String> {
    let mut order = counts.widget_ids();
    let mut stage_counts = counts.clone();
    for (i, rule) in rules.iter().enumerate() {
        if i > 0 {
            stage_counts = counts.restrict(&order);
        }
        order = rule.apply(&stage_counts);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InteractionType;

    fn counts(pairs: &[(&str, u64)]) -> InteractionCounts {
        pairs.iter().map(|(id, c)| (*id, *c)).collect()
    }

    #[test]
    fn test_most_used_first_stable_ties() {
        let order = MostUsedFirst.apply(&counts(&[("a", 5), ("b", 1), ("c", 5), ("d", 0)]));
        assert_eq!(order, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_least_used_first() {
        let order = LeastUsedFirst.apply(&counts(&[("a", 5), ("b", 1), ("c", 5), ("d", 0)]));
        assert_eq!(order, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_highlight_outliers() {
        let rule = HighlightOutliers::default();
        let order = rule.apply(&counts(&[("a", 10), ("b", 1), ("c", 1), ("d", 1)]));
        assert_eq!(order, vec!["a", "b", "c", "d"]);

        let order = rule.apply(&counts(&[("b", 1), ("c", 1), ("a", 10), ("d", 1)]));
        assert_eq!(order, vec!["a", "b", "c", "d"]);

        assert!(rule.apply(&InteractionCounts::new()).is_empty());
    }

    #[test]
    fn test_highlight_outliers_none_above_cutoff() {
        let rule = HighlightOutliers::new(2.0);
        let order = rule.apply(&counts(&[("x", 3), ("y", 4)]));
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn test_preserve_order() {
        let rule = PreserveOrder::new(["z", "y"]);
        let order = rule.apply(&counts(&[("y", 1), ("x", 9), ("z", 2)]));
        assert_eq!(order, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_preserve_order_skips_absent_fixed_ids() {
        let rule = PreserveOrder::new(["missing", "b", "b"]);
        let order = rule.apply(&counts(&[("a", 3), ("b", 1), ("c", 7)]));
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_aggregate_uses_prior_order_for_ties() {
        let events: Vec<InteractionEvent> = ["card4", "card3", "card1", "card3", "ghost"]
            .iter()
            .map(|id| InteractionEvent::new(*id, InteractionType::Tap, None))
            .collect();
        let prior: Vec<String> = ["card1", "card2", "card3", "card4"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let counts = InteractionCounts::aggregate(&events, &prior);
        assert_eq!(counts.widget_ids(), vec!["card1", "card3", "card4", "ghost"]);
        assert_eq!(counts.get("card3"), Some(2));
        assert_eq!(counts.get("card2"), None);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_pipeline_restricts_later_stages() {
        struct TopTwo;
        impl LayoutRule for TopTwo {
            fn name(&self) -> &str {
                "top_two"
            }
            fn apply(&self, counts: &InteractionCounts) -> Vec<String> {
                MostUsedFirst.apply(counts).into_iter().take(2).collect()
            }
        }

        let rules: Vec<Box<dyn LayoutRule>> = vec![Box::new(TopTwo), Box::new(LeastUsedFirst)];
        let order = run_pipeline(&rules, &counts(&[("a", 1), ("b", 8), ("c", 4)]));
        assert_eq!(order, vec!["c", "b"]);
    }

    #[test]
    fn test_pipeline_without_rules_keeps_counts_order() {
        let order = run_pipeline(&[], &counts(&[("a", 1), ("b", 8)]));
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_rule_spec_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            rules: Vec<RuleSpec>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [[rules]]
            rule = "preserve_order"
            fixed_ids = ["search"]

            [[rules]]
            rule = "highlight_outliers"
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed.rules,
            vec![
                RuleSpec::PreserveOrder { fixed_ids: vec!["search".into()] },
                RuleSpec::HighlightOutliers { threshold: 2.0 },
            ]
        );
        let names: Vec<String> = build_rules(&parsed.rules).iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["preserve_order", "highlight_outliers"]);
    }
}

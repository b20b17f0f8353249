//! Event model shared across the adaptation pipeline
//!
//! Plain data: interaction records produced by the tracker and the layout
//! records owned by the layout store. Serialized as field-named JSON with
//! RFC 3339 timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of user interaction reported for a widget
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InteractionType {
    Tap,
    LongPress,
    Hover,
    Focus,
    Scroll,
    Swipe,
    Custom,
}

impl InteractionType {
    /// Storage tag for this type
    pub fn as_tag(&self) -> &'static str {
        match self {
            InteractionType::Tap => "tap",
            InteractionType::LongPress => "long_press",
            InteractionType::Hover => "hover",
            InteractionType::Focus => "focus",
            InteractionType::Scroll => "scroll",
            InteractionType::Swipe => "swipe",
            InteractionType::Custom => "custom",
        }
    }

    /// Parse a storage tag. Unrecognized tags map to `Custom`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "tap" => InteractionType::Tap,
            "long_press" | "longpress" => InteractionType::LongPress,
            "hover" => InteractionType::Hover,
            "focus" => InteractionType::Focus,
            "scroll" => InteractionType::Scroll,
            "swipe" => InteractionType::Swipe,
            _ => InteractionType::Custom,
        }
    }
}

impl From<String> for InteractionType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<InteractionType> for String {
    fn from(kind: InteractionType) -> Self {
        kind.as_tag().to_string()
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

impl std::str::FromStr for InteractionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_tag(s))
    }
}

/// Optional payload attached to an interaction (scroll offset, slider value, ...)
///
/// JSON has no NaN or infinity, so only finite numbers survive storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InteractionValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl InteractionValue {
    /// False for NaN and infinite numbers
    pub fn is_storable(&self) -> bool {
        match self {
            InteractionValue::Number(n) => n.is_finite(),
            _ => true,
        }
    }
}

impl From<bool> for InteractionValue {
    fn from(v: bool) -> Self {
        InteractionValue::Bool(v)
    }
}

impl From<f64> for InteractionValue {
    fn from(v: f64) -> Self {
        InteractionValue::Number(v)
    }
}

impl From<&str> for InteractionValue {
    fn from(v: &str) -> Self {
        InteractionValue::Text(v.to_string())
    }
}

impl From<String> for InteractionValue {
    fn from(v: String) -> Self {
        InteractionValue::Text(v)
    }
}

/// A single recorded interaction. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub widget_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<InteractionValue>,
    pub timestamp: DateTime<Utc>,
}

impl InteractionEvent {
    /// Create an event stamped with the current time.
    ///
    /// A non-finite number payload is dropped, so the event reads back from
    /// storage exactly as created.
    pub fn new(widget_id: impl Into<String>, kind: InteractionType, value: Option<InteractionValue>) -> Self {
        Self {
            widget_id: widget_id.into(),
            kind,
            value: value.filter(InteractionValue::is_storable),
            timestamp: Utc::now(),
        }
    }
}

/// Size limits a renderer may apply to a positioned widget
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<f64>,
}

fn default_visible() -> bool {
    true
}

/// Placement of one widget inside a layout (lower `order` renders earlier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetPosition {
    pub widget_id: String,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<SizeConstraints>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl WidgetPosition {
    /// Visible, unconstrained position
    pub fn new(widget_id: impl Into<String>, order: i64) -> Self {
        Self {
            widget_id: widget_id.into(),
            order,
            constraints: None,
            visible: true,
        }
    }

    pub fn with_constraints(mut self, constraints: SizeConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// A named arrangement of widgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub positions: Vec<WidgetPosition>,
    pub last_modified: DateTime<Utc>,
}

impl LayoutConfig {
    /// Build a config with a freshly generated id
    pub fn new(name: impl Into<String>, positions: Vec<WidgetPosition>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            positions,
            last_modified: Utc::now(),
        }
    }

    /// Refresh `last_modified`
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Look up the position of a widget
    pub fn position(&self, widget_id: &str) -> Option<&WidgetPosition> {
        self.positions.iter().find(|p| p.widget_id == widget_id)
    }

    /// Widget ids in render order (stable by `order`, ties keep sequence order)
    pub fn widget_order(&self) -> Vec<String> {
        let mut positions: Vec<&WidgetPosition> = self.positions.iter().collect();
        positions.sort_by_key(|p| p.order);
        positions.into_iter().map(|p| p.widget_id.clone()).collect()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::WidgetId;

/// How a locally placed widget combines with widgets inherited from
/// ancestor pages in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InheritanceBehavior {
    OverrideParent,
    #[default]
    InsertAfterParent,
    InsertBeforeParent,
}

impl InheritanceBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OverrideParent => "override-parent",
            Self::InsertAfterParent => "insert-after-parent",
            Self::InsertBeforeParent => "insert-before-parent",
        }
    }
}

/// Domain metadata merged into widgets by the persistence adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetMeta {
    #[serde(default = "default_can_inherit")]
    pub can_inherit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_override: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_type: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
}

fn default_can_inherit() -> bool {
    true
}

impl Default for WidgetMeta {
    fn default() -> Self {
        Self {
            can_inherit: true,
            can_override: None,
            template_origin: None,
            strict_type: None,
            control_type: None,
        }
    }
}

/// A configured content block placed in a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    pub widget_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub order: i32,
    /// 0 when placed on the page being viewed, otherwise the number of
    /// levels up the tree the widget was placed. Assigned by the resolver.
    #[serde(default)]
    pub origin_depth: u32,
    #[serde(default)]
    pub inheritance_behavior: InheritanceBehavior,
    #[serde(default = "default_published")]
    pub is_published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    /// Maximum number of levels below its origin at which the widget is
    /// still shown. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inheritance_level: Option<u32>,
    #[serde(default)]
    pub meta: WidgetMeta,
}

fn default_published() -> bool {
    true
}

impl Widget {
    pub fn new(id: impl Into<WidgetId>, widget_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            widget_type: widget_type.into(),
            config: serde_json::Value::Object(Default::default()),
            order: 0,
            origin_depth: 0,
            inheritance_behavior: InheritanceBehavior::default(),
            is_published: true,
            effective_date: None,
            expiry_date: None,
            inheritance_level: None,
            meta: WidgetMeta::default(),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_behavior(mut self, behavior: InheritanceBehavior) -> Self {
        self.inheritance_behavior = behavior;
        self
    }

    pub fn with_inheritance_level(mut self, level: u32) -> Self {
        self.inheritance_level = Some(level);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_window(
        mut self,
        effective: Option<DateTime<Utc>>,
        expiry: Option<DateTime<Utc>>,
    ) -> Self {
        self.effective_date = effective;
        self.expiry_date = expiry;
        self
    }

    pub fn unpublished(mut self) -> Self {
        self.is_published = false;
        self
    }

    /// Published and inside its effective/expiry window at `now`.
    /// The expiry instant itself is already outside the window.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_published {
            return false;
        }
        if self.effective_date.is_some_and(|from| now < from) {
            return false;
        }
        if self.expiry_date.is_some_and(|until| now >= until) {
            return false;
        }
        true
    }

    /// Whether a page `distance` levels below the widget's origin still
    /// shows it.
    pub fn reaches(&self, distance: u32) -> bool {
        match self.inheritance_level {
            Some(limit) => distance <= limit,
            None => true,
        }
    }

    /// Copy of this widget under a fresh id, as placed locally.
    pub fn regenerated(&self) -> Self {
        Self {
            id: WidgetId::generate(),
            origin_depth: 0,
            ..self.clone()
        }
    }
}

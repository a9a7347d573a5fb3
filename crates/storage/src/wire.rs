//! Body shapes exchanged with the remote store, in the internal naming
//! convention. The adapter translates keys at the transport edge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::{AncestorEntry, SlotMap, Widget, WidgetId};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InheritanceInfo {
    #[serde(default)]
    pub can_override: bool,
    #[serde(default)]
    pub template_origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlInfo {
    #[serde(default)]
    pub strict_type: bool,
    #[serde(default)]
    pub control_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub widgets: SlotMap,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inheritance: Option<InheritanceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<ControlInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncestorsBody {
    pub ancestors: Vec<AncestorEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub field_errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Update,
    Delete,
    Publish,
    Unpublish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_kind: BatchKind,
    pub slot_name: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    #[serde(default)]
    pub widget_ids: Vec<WidgetId>,
}

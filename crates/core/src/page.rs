use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EntityRef, PageId, WidgetId};
use crate::widget::Widget;

/// Widgets per slot name, each list in slot order.
pub type SlotMap = BTreeMap<String, Vec<Widget>>;

/// Immutable snapshot of a page as returned by the ancestor-chain query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: PageId,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub parent_id: Option<PageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl PageSummary {
    pub fn new(id: PageId, title: impl Into<String>, parent_id: Option<PageId>) -> Self {
        let title = title.into();
        let slug = title.to_lowercase().replace(' ', "-");
        Self {
            id,
            title,
            slug,
            parent_id,
            layout: None,
            theme: None,
            hostname: None,
        }
    }
}

/// One element of the ancestor chain: a page and its locally placed widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncestorEntry {
    pub page: PageSummary,
    #[serde(default)]
    pub widgets: SlotMap,
}

/// The stored content of one entity: widgets per slot plus, for object
/// records, flat field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub widgets: SlotMap,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Timestamp of the stored version this record reflects.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    pub fn empty(entity: EntityRef) -> Self {
        Self {
            entity,
            version_id: None,
            widgets: SlotMap::new(),
            fields: BTreeMap::new(),
            updated_at: None,
        }
    }

    pub fn slot(&self, slot: &str) -> &[Widget] {
        self.widgets.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slot_mut(&mut self, slot: &str) -> &mut Vec<Widget> {
        self.widgets.entry(slot.to_string()).or_default()
    }

    pub fn find_widget(&self, id: &WidgetId) -> Option<(&str, &Widget)> {
        self.widgets.iter().find_map(|(slot, widgets)| {
            widgets
                .iter()
                .find(|w| &w.id == id)
                .map(|w| (slot.as_str(), w))
        })
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.values().map(Vec::len).sum()
    }
}

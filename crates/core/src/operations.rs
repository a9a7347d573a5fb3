use serde::{Deserialize, Serialize};

use crate::clipboard::SourceLocation;
use crate::error::CoreError;
use crate::ids::*;
use crate::widget::Widget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    AddWidget,
    RemoveWidget,
    MoveWidget,
    UpdateWidget,
    UpdateObjectField,
    PasteWidgets,
    Save,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddWidget => "add-widget",
            Self::RemoveWidget => "remove-widget",
            Self::MoveWidget => "move-widget",
            Self::UpdateWidget => "update-widget",
            Self::UpdateObjectField => "update-object-field",
            Self::PasteWidgets => "paste-widgets",
            Self::Save => "save",
        }
    }
}

/// Whether pasted widgets join the slot's existing widgets or take their place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasteMode {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationPayload {
    AddWidget {
        slot: String,
        widget: Widget,
        index: Option<usize>,
    },
    RemoveWidget {
        slot: String,
        widget_id: WidgetId,
    },
    MoveWidget {
        widget_id: WidgetId,
        from: SlotRef,
        to: SlotRef,
        index: Option<usize>,
    },
    UpdateWidget {
        slot: String,
        widget_id: WidgetId,
        config: serde_json::Value,
    },
    UpdateObjectField {
        field: String,
        value: serde_json::Value,
    },
    PasteWidgets {
        slot: String,
        widgets: Vec<Widget>,
        mode: PasteMode,
        cut_source: Option<SourceLocation>,
    },
    Save,
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::AddWidget { .. } => OperationKind::AddWidget,
            Self::RemoveWidget { .. } => OperationKind::RemoveWidget,
            Self::MoveWidget { .. } => OperationKind::MoveWidget,
            Self::UpdateWidget { .. } => OperationKind::UpdateWidget,
            Self::UpdateObjectField { .. } => OperationKind::UpdateObjectField,
            Self::PasteWidgets { .. } => OperationKind::PasteWidgets,
            Self::Save => OperationKind::Save,
        }
    }

    /// Slot on the target entity touched by this payload, if any.
    pub fn slot(&self) -> Option<&str> {
        match self {
            Self::AddWidget { slot, .. }
            | Self::RemoveWidget { slot, .. }
            | Self::UpdateWidget { slot, .. }
            | Self::PasteWidgets { slot, .. } => Some(slot),
            Self::MoveWidget { to, .. } => Some(&to.slot),
            Self::UpdateObjectField { .. } | Self::Save => None,
        }
    }
}

/// The unit of exchange on the bus. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: OpId,
    pub origin: ComponentId,
    pub target: EntityRef,
    /// Position in the bus's publish order.
    pub sequence: u64,
    pub payload: OperationPayload,
}

impl Operation {
    pub fn new(
        origin: ComponentId,
        target: EntityRef,
        sequence: u64,
        payload: OperationPayload,
    ) -> Result<Self, CoreError> {
        if let OperationPayload::MoveWidget { to, .. } = &payload {
            if to.entity != target {
                return Err(CoreError::InvalidOperation(format!(
                    "move target {} does not match operation target {target}",
                    to.entity
                )));
            }
        }
        if matches!(payload, OperationPayload::UpdateObjectField { .. })
            && !matches!(target, EntityRef::Object(_))
        {
            return Err(CoreError::InvalidOperation(
                "object fields can only be updated on object records".into(),
            ));
        }
        Ok(Self {
            op_id: OpId::new(),
            origin,
            target,
            sequence,
            payload,
        })
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Every entity whose stored record this operation writes, target first.
    pub fn affected_entities(&self) -> Vec<EntityRef> {
        let mut entities = vec![self.target];
        match &self.payload {
            OperationPayload::MoveWidget { from, .. } if from.entity != self.target => {
                entities.push(from.entity);
            }
            OperationPayload::PasteWidgets {
                cut_source: Some(source),
                ..
            } if source.entity != self.target => {
                entities.push(source.entity);
            }
            _ => {}
        }
        entities
    }
}

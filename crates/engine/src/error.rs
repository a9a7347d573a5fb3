use tessera_core::{ApiError, ComponentId, CoreError, EntityRef, ErrorKind, OpId, PageId, WidgetId};
use tessera_storage::AdapterError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TreeError {
    #[error("tree generation failed for page {page}: {reason}")]
    GenerationFailed { page: PageId, reason: String },

    #[error("circular reference: page {page} appears twice in its ancestor chain")]
    CircularReference { page: PageId },

    #[error("no tree available for page {0}")]
    Unavailable(PageId),
}

impl TreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GenerationFailed { .. } | Self::Unavailable(_) => ErrorKind::TreeGenerationFailed,
            Self::CircularReference { .. } => ErrorKind::CircularReference,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("persistence error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("component not registered: {0}")]
    ComponentNotRegistered(ComponentId),

    #[error("component already registered: {0}")]
    DuplicateComponent(ComponentId),

    #[error("entity not loaded: {0}")]
    EntityNotLoaded(EntityRef),

    #[error("widget {widget} not found in {entity}")]
    WidgetNotFound { entity: EntityRef, widget: WidgetId },

    #[error("widget {widget} already exists in {entity} slot {slot}")]
    DuplicateWidget {
        entity: EntityRef,
        slot: String,
        widget: WidgetId,
    },

    #[error("operation not found: {0}")]
    OperationNotFound(OpId),

    #[error("invalid transition for operation {op_id}: {from} -> {to}")]
    InvalidTransition {
        op_id: OpId,
        from: &'static str,
        to: &'static str,
    },

    #[error("commit abandoned for operation {0}")]
    CommitAbandoned(OpId),
}

impl EngineError {
    /// The stable class and message an editor component shows for this error.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Adapter(e) => e.to_api_error(),
            Self::Tree(e) => ApiError::new(e.kind()).with_detail(e.to_string()),
            Self::EntityNotLoaded(_) | Self::WidgetNotFound { .. } => {
                ApiError::new(ErrorKind::NotFound).with_detail(self.to_string())
            }
            Self::DuplicateWidget { .. } | Self::Core(_) => {
                ApiError::new(ErrorKind::Validation).with_detail(self.to_string())
            }
            _ => ApiError::new(ErrorKind::Unknown).with_detail(self.to_string()),
        }
    }
}

pub mod clipboard;
pub mod error;
pub mod ids;
pub mod naming;
pub mod operations;
pub mod page;
pub mod widget;

pub use clipboard::{ClipboardOperation, ClipboardPayload, SourceLocation};
pub use error::{ApiError, ConflictReport, CoreError, ErrorKind};
pub use ids::*;
pub use naming::NamingTable;
pub use operations::{Operation, OperationKind, OperationPayload, PasteMode};
pub use page::{AncestorEntry, EntityRecord, PageSummary, SlotMap};
pub use widget::{InheritanceBehavior, Widget, WidgetMeta};

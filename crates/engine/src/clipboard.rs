use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use tessera_core::{
    ClipboardOperation, ClipboardPayload, CoreError, SourceLocation, Widget, WidgetId,
};

use crate::error::EngineError;

/// The platform clipboard: one slot of bytes.
pub trait SystemClipboard {
    fn write(&self, bytes: Vec<u8>);
    fn read(&self) -> Option<Vec<u8>>;
}

/// In-process clipboard for headless use and tests.
#[derive(Default)]
pub struct MemoryClipboard {
    contents: RefCell<Option<Vec<u8>>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SystemClipboard for MemoryClipboard {
    fn write(&self, bytes: Vec<u8>) {
        *self.contents.borrow_mut() = Some(bytes);
    }

    fn read(&self) -> Option<Vec<u8>> {
        self.contents.borrow().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardMetadata {
    pub source: Option<SourceLocation>,
    /// Ids of the widgets as they were copied, in `data` order.
    pub original_ids: Vec<WidgetId>,
    pub created_at: DateTime<Utc>,
}

/// Clipboard contents ready to paste. `data` carries fresh widget ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardRead {
    pub data: Vec<Widget>,
    pub operation: ClipboardOperation,
    pub metadata: ClipboardMetadata,
}

impl ClipboardRead {
    /// Where the originals must be removed from once a paste commits.
    pub fn cut_source(&self) -> Option<&SourceLocation> {
        match self.operation {
            ClipboardOperation::Cut => self.metadata.source.as_ref(),
            ClipboardOperation::Copy => None,
        }
    }
}

pub struct ClipboardService {
    clipboard: Rc<dyn SystemClipboard>,
}

impl ClipboardService {
    pub fn new(clipboard: Rc<dyn SystemClipboard>) -> Self {
        Self { clipboard }
    }

    pub fn copy(&self, widgets: &[Widget]) -> Result<(), EngineError> {
        let payload = ClipboardPayload::new(ClipboardOperation::Copy, None, widgets.to_vec())?;
        self.store(&payload)
    }

    /// Cut leaves the originals in place; they are removed when the paste
    /// built from this payload commits.
    pub fn cut(&self, widgets: &[Widget], source: SourceLocation) -> Result<(), EngineError> {
        if let Some(stray) = widgets.iter().find(|w| !source.widget_ids.contains(&w.id)) {
            return Err(CoreError::InvalidData(format!(
                "widget {} is not part of the cut source",
                stray.id
            ))
            .into());
        }
        let payload =
            ClipboardPayload::new(ClipboardOperation::Cut, Some(source), widgets.to_vec())?;
        self.store(&payload)
    }

    fn store(&self, payload: &ClipboardPayload) -> Result<(), EngineError> {
        let bytes = payload.encode()?;
        tracing::debug!(
            operation = ?payload.operation,
            widgets = payload.widgets.len(),
            "Wrote clipboard payload"
        );
        self.clipboard.write(bytes);
        Ok(())
    }

    /// Decode the clipboard. Foreign or damaged content reads as empty.
    pub fn read_with_metadata(&self) -> Option<ClipboardRead> {
        let bytes = self.clipboard.read()?;
        let payload = match ClipboardPayload::decode(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring clipboard content");
                return None;
            }
        };
        Some(ClipboardRead {
            data: payload.widgets.iter().map(Widget::regenerated).collect(),
            operation: payload.operation,
            metadata: ClipboardMetadata {
                original_ids: payload.widgets.iter().map(|w| w.id.clone()).collect(),
                source: payload.source,
                created_at: payload.created_at,
            },
        })
    }
}

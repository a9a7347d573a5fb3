use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{EntityRef, WidgetId};
use crate::widget::Widget;

/// Leading bytes of every encoded payload, so foreign clipboard content
/// is rejected before decoding.
const MAGIC: &[u8; 4] = b"TSRA";
pub const PAYLOAD_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardOperation {
    Copy,
    Cut,
}

/// Where cut widgets came from, so the originals can be removed once a
/// paste commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub entity: EntityRef,
    pub slot: String,
    pub widget_ids: Vec<WidgetId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardPayload {
    pub format_version: u16,
    pub operation: ClipboardOperation,
    pub source: Option<SourceLocation>,
    pub widgets: Vec<Widget>,
    pub created_at: DateTime<Utc>,
    pub checksum: [u8; 32],
}

fn widgets_checksum(widgets: &[Widget]) -> Result<[u8; 32], CoreError> {
    let mut hasher = blake3::Hasher::new();
    for widget in widgets {
        let bytes =
            rmp_serde::to_vec_named(widget).map_err(|e| CoreError::Serialization(e.to_string()))?;
        hasher.update(&bytes);
    }
    Ok(*hasher.finalize().as_bytes())
}

impl ClipboardPayload {
    pub fn new(
        operation: ClipboardOperation,
        source: Option<SourceLocation>,
        widgets: Vec<Widget>,
    ) -> Result<Self, CoreError> {
        if operation == ClipboardOperation::Cut && source.is_none() {
            return Err(CoreError::InvalidData(
                "cut payload requires a source location".into(),
            ));
        }
        let checksum = widgets_checksum(&widgets)?;
        Ok(Self {
            format_version: PAYLOAD_FORMAT_VERSION,
            operation,
            source,
            widgets,
            created_at: Utc::now(),
            checksum,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let body =
            rmp_serde::to_vec_named(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        let mut bytes = Vec::with_capacity(MAGIC.len() + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decode and revalidate: magic, format version, checksum and the
    /// cut/source pairing.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let body = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| CoreError::InvalidData("not a widget clipboard payload".into()))?;
        let payload: Self =
            rmp_serde::from_slice(body).map_err(|e| CoreError::Serialization(e.to_string()))?;
        if payload.format_version != PAYLOAD_FORMAT_VERSION {
            return Err(CoreError::InvalidData(format!(
                "unsupported clipboard format version {}",
                payload.format_version
            )));
        }
        if widgets_checksum(&payload.widgets)? != payload.checksum {
            return Err(CoreError::ChecksumMismatch);
        }
        if payload.operation == ClipboardOperation::Cut && payload.source.is_none() {
            return Err(CoreError::InvalidData(
                "cut payload without source location".into(),
            ));
        }
        Ok(payload)
    }
}

use tessera_core::{ApiError, EntityRecord, EntityRef, ErrorKind};

use crate::wire::RemoteRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Page,
    Object,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Object => "object",
        }
    }

    pub fn owns(&self, entity: &EntityRef) -> bool {
        matches!(
            (self, entity),
            (Self::Page, EntityRef::Page(_)) | (Self::Object, EntityRef::Object(_))
        )
    }
}

/// Path templates with `{entityId}` and `{versionId}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct EndpointTemplates {
    pub load: &'static str,
    pub save: &'static str,
    pub validate: &'static str,
    pub batch: &'static str,
    pub ancestors: Option<&'static str>,
}

impl EndpointTemplates {
    pub fn render(template: &str, entity_id: &str, version_id: Option<&str>) -> String {
        template
            .replace("{entityId}", entity_id)
            .replace("{versionId}", version_id.unwrap_or(CURRENT_VERSION))
    }
}

pub const CURRENT_VERSION: &str = "current";

/// Everything that differs between the page and object domains. Selected
/// once when an adapter is constructed.
#[derive(Debug, Clone, Copy)]
pub struct DomainConfig {
    pub domain: Domain,
    pub endpoints: EndpointTemplates,
    /// Shapes an outgoing record before translation.
    pub prepare_request: fn(&mut RemoteRecord),
    /// Folds domain metadata from the response envelope into the widgets.
    pub decorate_response: fn(&RemoteRecord, &mut EntityRecord),
    /// Replaces generic messages with domain wording.
    pub refine_error: fn(ApiError) -> ApiError,
}

impl DomainConfig {
    pub fn pages() -> Self {
        Self {
            domain: Domain::Page,
            endpoints: EndpointTemplates {
                load: "/pages/{entityId}/versions/{versionId}/widgets",
                save: "/pages/{entityId}/versions/{versionId}/widgets",
                validate: "/pages/{entityId}/versions/{versionId}/widgets/validate",
                batch: "/pages/{entityId}/versions/{versionId}/widgets/batch",
                ancestors: Some("/pages/{entityId}/ancestors"),
            },
            prepare_request: prepare_page_request,
            decorate_response: decorate_page_response,
            refine_error: refine_page_error,
        }
    }

    pub fn objects() -> Self {
        Self {
            domain: Domain::Object,
            endpoints: EndpointTemplates {
                load: "/objects/{entityId}/widgets",
                save: "/objects/{entityId}/widgets",
                validate: "/objects/{entityId}/widgets/validate",
                batch: "/objects/{entityId}/widgets/batch",
                ancestors: None,
            },
            prepare_request: prepare_object_request,
            decorate_response: decorate_object_response,
            refine_error: refine_object_error,
        }
    }
}

// Origin depth is computed per view by the resolver; the store never keeps it.
fn prepare_page_request(record: &mut RemoteRecord) {
    record.inheritance = None;
    record.controls = None;
    for widget in record.widgets.values_mut().flatten() {
        widget.origin_depth = 0;
    }
}

// `can_inherit` is per widget and stored; only page-level metadata is merged.
fn decorate_page_response(remote: &RemoteRecord, record: &mut EntityRecord) {
    let info = remote.inheritance.clone().unwrap_or_default();
    for widget in record.widgets.values_mut().flatten() {
        widget.meta.can_override = Some(info.can_override);
        widget.meta.template_origin = info.template_origin.clone();
    }
}

fn refine_page_error(error: ApiError) -> ApiError {
    match error.kind {
        ErrorKind::NotFound => error.with_message("Page or page version not found."),
        ErrorKind::Validation => error.with_message("One or more widgets on this page are invalid."),
        ErrorKind::Permission => error.with_message("You do not have permission to edit this page."),
        _ => error,
    }
}

// Object records are flat; nothing below them can inherit.
fn prepare_object_request(record: &mut RemoteRecord) {
    record.version_id = None;
    record.inheritance = None;
    record.controls = None;
    for widget in record.widgets.values_mut().flatten() {
        widget.origin_depth = 0;
        widget.inheritance_level = None;
    }
}

fn decorate_object_response(remote: &RemoteRecord, record: &mut EntityRecord) {
    let controls = remote.controls.clone().unwrap_or_default();
    for widget in record.widgets.values_mut().flatten() {
        widget.meta.can_inherit = false;
        widget.meta.can_override = None;
        widget.meta.strict_type = Some(controls.strict_type);
        widget.meta.control_type = controls.control_type.clone();
    }
}

fn refine_object_error(error: ApiError) -> ApiError {
    match error.kind {
        ErrorKind::NotFound => error.with_message("Object record not found."),
        ErrorKind::Validation => error.with_message("Object field values failed validation."),
        ErrorKind::Permission => {
            error.with_message("You do not have permission to edit this record.")
        }
        _ => error,
    }
}

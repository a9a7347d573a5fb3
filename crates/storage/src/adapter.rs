use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{json, Value};
use tessera_core::{
    AncestorEntry, ApiError, ConflictReport, EntityRecord, EntityRef, ErrorKind, NamingTable,
    PageId, Widget,
};

use crate::cache::RecordCache;
use crate::domain::{Domain, DomainConfig, EndpointTemplates};
use crate::error::AdapterError;
use crate::retry::{is_retryable_status, RetryPolicy};
use crate::traits::{Method, RemoteRequest, Transport, TransportError};
use crate::wire::{AncestorsBody, BatchKind, BatchRequest, RemoteRecord, ValidationReport};

enum Failure {
    Status { status: u16, body: Value },
    Transport(TransportError),
}

impl Failure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Transport(_) => true,
        }
    }
}

/// Structural problems found without asking the remote store.
pub fn check_widgets(record: &EntityRecord) -> Vec<String> {
    let mut errors = Vec::new();
    for (slot, widgets) in &record.widgets {
        let mut seen = HashSet::new();
        for widget in widgets {
            if widget.id.as_str().is_empty() {
                errors.push(format!("{slot}: widget without id"));
            } else if !seen.insert(&widget.id) {
                errors.push(format!("{slot}: duplicate widget id {}", widget.id));
            }
            if widget.widget_type.trim().is_empty() {
                errors.push(format!("{slot}: widget {} has no type", widget.id));
            }
            if let (Some(from), Some(until)) = (widget.effective_date, widget.expiry_date) {
                if until <= from {
                    errors.push(format!("{slot}: widget {} expires before it starts", widget.id));
                }
            }
        }
    }
    errors
}

fn snapshot_failure(entity: EntityRef, e: serde_json::Error) -> ApiError {
    ApiError::new(ErrorKind::Unknown).with_detail(format!("cannot snapshot {entity}: {e}"))
}

fn content_value(record: &EntityRecord) -> Result<Value, ApiError> {
    let widgets =
        serde_json::to_value(&record.widgets).map_err(|e| snapshot_failure(record.entity, e))?;
    let fields =
        serde_json::to_value(&record.fields).map_err(|e| snapshot_failure(record.entity, e))?;
    Ok(json!({ "widgets": widgets, "fields": fields }))
}

/// Request/response shaping, retry and conflict detection for one content
/// domain. The page and object variants differ only in their
/// [`DomainConfig`].
pub struct PersistenceAdapter {
    transport: Rc<dyn Transport>,
    config: DomainConfig,
    retry: RetryPolicy,
    naming: NamingTable,
    cache: Rc<RecordCache>,
}

impl PersistenceAdapter {
    pub fn new(transport: Rc<dyn Transport>, config: DomainConfig, cache: Rc<RecordCache>) -> Self {
        Self {
            transport,
            config,
            retry: RetryPolicy::default(),
            naming: NamingTable::default(),
            cache,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn domain(&self) -> Domain {
        self.config.domain
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn ensure_domain(&self, entity: &EntityRef) -> Result<(), AdapterError> {
        if self.config.domain.owns(entity) {
            Ok(())
        } else {
            Err(ApiError::new(ErrorKind::Validation)
                .with_detail(format!(
                    "{entity} is not handled by the {} adapter",
                    self.config.domain.as_str()
                ))
                .into())
        }
    }

    fn path(&self, template: &str, entity: &EntityRef, version_id: Option<&str>) -> String {
        EndpointTemplates::render(template, &entity.id_string(), version_id)
    }

    // ========================================================================
    // Widget CRUD
    // ========================================================================

    /// The cached record if there is one, otherwise a fresh load.
    pub async fn load_widgets(&self, entity: EntityRef) -> Result<EntityRecord, AdapterError> {
        if let Some(record) = self.cache.get(&entity) {
            return Ok(record);
        }
        self.refresh_widgets(entity).await
    }

    /// Load from the remote store, replacing any cached record.
    pub async fn refresh_widgets(&self, entity: EntityRef) -> Result<EntityRecord, AdapterError> {
        let version = self.cache.get(&entity).and_then(|r| r.version_id);
        let record = self.fetch(entity, version.as_deref()).await?;
        self.cache.put(record.clone());
        Ok(record)
    }

    async fn fetch(
        &self,
        entity: EntityRef,
        version_id: Option<&str>,
    ) -> Result<EntityRecord, AdapterError> {
        self.ensure_domain(&entity)?;
        let request = RemoteRequest::new(
            Method::Get,
            self.path(self.config.endpoints.load, &entity, version_id),
        );
        let body = self.execute(request).await?;
        self.decode_record(entity, body)
    }

    /// Write a record after checking it against the stored version.
    ///
    /// `record.updated_at` must be the stored version the edit was based on;
    /// a strictly older value than what the store now holds is a conflict
    /// and nothing is written.
    pub async fn save_widgets(&self, record: &EntityRecord) -> Result<EntityRecord, AdapterError> {
        self.ensure_domain(&record.entity)?;
        let problems = check_widgets(record);
        if !problems.is_empty() {
            return Err(self.refine(ApiError::validation(problems.join("; "))).into());
        }

        let stored = self.fetch(record.entity, record.version_id.as_deref()).await?;
        if let Err(conflict) = Self::check_for_conflicts(record, &stored) {
            self.cache.put(stored);
            return Err(conflict);
        }

        let body = self.encode_record(record)?;
        let request = RemoteRequest::new(
            Method::Put,
            self.path(self.config.endpoints.save, &record.entity, record.version_id.as_deref()),
        )
        .with_body(body);
        let response = self.execute(request).await?;
        let saved = self.decode_record(record.entity, response)?;
        tracing::debug!(
            entity = %record.entity,
            widgets = saved.widget_count(),
            "Saved widgets"
        );
        self.cache.put(saved.clone());
        Ok(saved)
    }

    /// Compare the version an edit was based on with the stored one.
    pub fn check_for_conflicts(
        incoming: &EntityRecord,
        stored: &EntityRecord,
    ) -> Result<(), AdapterError> {
        if incoming.updated_at < stored.updated_at {
            tracing::warn!(
                entity = %incoming.entity,
                incoming = ?incoming.updated_at,
                stored = ?stored.updated_at,
                "Write conflict detected"
            );
            return Err(AdapterError::Conflict(Box::new(ConflictReport {
                entity: incoming.entity,
                stored: content_value(stored)?,
                incoming: content_value(incoming)?,
                stored_at: stored.updated_at,
                incoming_at: incoming.updated_at,
            })));
        }
        Ok(())
    }

    /// Local structural checks followed by the remote validator.
    pub async fn validate_widgets(
        &self,
        record: &EntityRecord,
    ) -> Result<ValidationReport, AdapterError> {
        self.ensure_domain(&record.entity)?;
        let problems = check_widgets(record);
        if !problems.is_empty() {
            return Err(self.refine(ApiError::validation(problems.join("; "))).into());
        }
        let body = self.encode_record(record)?;
        let request = RemoteRequest::new(
            Method::Post,
            self.path(self.config.endpoints.validate, &record.entity, record.version_id.as_deref()),
        )
        .with_body(body)
        .repeatable();
        let response = self.execute(request).await?;
        let report: ValidationReport = self.decode(response)?;
        if !report.valid {
            return Err(self
                .refine(ApiError::validation(report.field_errors.join("; ")))
                .into());
        }
        Ok(report)
    }

    /// Apply one kind of change to several widgets of a slot in a single
    /// request. Not idempotent, so never retried.
    pub async fn batch_operation(
        &self,
        entity: EntityRef,
        kind: BatchKind,
        slot: &str,
        widgets: &[Widget],
    ) -> Result<EntityRecord, AdapterError> {
        self.ensure_domain(&entity)?;
        let batch = BatchRequest {
            batch_kind: kind,
            slot_name: slot.to_string(),
            widgets: if kind == BatchKind::Update {
                widgets.to_vec()
            } else {
                Vec::new()
            },
            widget_ids: widgets.iter().map(|w| w.id.clone()).collect(),
        };
        let body = serde_json::to_value(&batch).map_err(|e| self.decode_failure(e))?;
        let version = self.cache.get(&entity).and_then(|r| r.version_id);
        let request = RemoteRequest::new(
            Method::Post,
            self.path(self.config.endpoints.batch, &entity, version.as_deref()),
        )
        .with_body(self.naming.to_remote(body));
        let response = self.execute(request).await?;
        let record = self.decode_record(entity, response)?;
        self.cache.put(record.clone());
        Ok(record)
    }

    /// The ancestor chain of a page, root first.
    pub async fn load_ancestors(&self, page: PageId) -> Result<Vec<AncestorEntry>, AdapterError> {
        let Some(template) = self.config.endpoints.ancestors else {
            return Err(ApiError::new(ErrorKind::Validation)
                .with_detail(format!(
                    "{} records do not form a tree",
                    self.config.domain.as_str()
                ))
                .into());
        };
        let request = RemoteRequest::new(
            Method::Get,
            EndpointTemplates::render(template, &page.to_string(), None),
        );
        let response = self.execute(request).await?;
        let body: AncestorsBody = self.decode(response)?;
        Ok(body.ancestors)
    }

    // ========================================================================
    // Request lifecycle
    // ========================================================================

    async fn execute(&self, request: RemoteRequest) -> Result<Value, ApiError> {
        let mut attempt = 0u32;
        loop {
            tracing::debug!(
                method = request.method.as_str(),
                path = %request.path,
                attempt,
                "Sending request"
            );
            let failure = match self.transport.send(request.clone()).await {
                Ok(response) if response.is_success() => {
                    return Ok(self.naming.from_remote(response.body));
                }
                Ok(response) => Failure::Status {
                    status: response.status,
                    body: response.body,
                },
                Err(e) => Failure::Transport(e),
            };

            let can_retry = request.is_idempotent()
                && failure.is_retryable()
                && attempt + 1 < self.retry.max_attempts;
            if !can_retry {
                return Err(self.normalize(failure));
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                method = request.method.as_str(),
                path = %request.path,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn normalize(&self, failure: Failure) -> ApiError {
        let error = match failure {
            Failure::Status { status, body } => {
                let detail = body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ApiError::from_status(status, detail)
            }
            Failure::Transport(TransportError::Timeout) => ApiError::new(ErrorKind::Timeout),
            Failure::Transport(TransportError::Network(detail)) => {
                ApiError::new(ErrorKind::Network).with_detail(detail)
            }
        };
        self.refine(error)
    }

    fn refine(&self, error: ApiError) -> ApiError {
        (self.config.refine_error)(error)
    }

    fn decode_failure(&self, e: serde_json::Error) -> ApiError {
        ApiError::new(ErrorKind::Unknown).with_detail(format!("malformed body: {e}"))
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, body: Value) -> Result<T, AdapterError> {
        serde_json::from_value(body).map_err(|e| self.decode_failure(e).into())
    }

    fn encode_record(&self, record: &EntityRecord) -> Result<Value, AdapterError> {
        let mut remote = RemoteRecord {
            entity_id: record.entity.id_string(),
            version_id: record.version_id.clone(),
            widgets: record.widgets.clone(),
            fields: record.fields.clone(),
            updated_at: record.updated_at,
            inheritance: None,
            controls: None,
        };
        (self.config.prepare_request)(&mut remote);
        let body = serde_json::to_value(&remote).map_err(|e| self.decode_failure(e))?;
        Ok(self.naming.to_remote(body))
    }

    fn decode_record(&self, entity: EntityRef, body: Value) -> Result<EntityRecord, AdapterError> {
        let remote: RemoteRecord = self.decode(body)?;
        let mut record = EntityRecord {
            entity,
            version_id: remote.version_id.clone(),
            widgets: remote.widgets.clone(),
            fields: remote.fields.clone(),
            updated_at: remote.updated_at,
        };
        (self.config.decorate_response)(&remote, &mut record);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tessera_core::ObjectId;

    #[test]
    fn older_incoming_version_conflicts() {
        let entity = EntityRef::Object(ObjectId::new());
        let now = Utc::now();
        let mut stored = EntityRecord::empty(entity);
        stored.updated_at = Some(now);
        let mut incoming = EntityRecord::empty(entity);
        incoming.updated_at = Some(now - Duration::seconds(5));

        let err = PersistenceAdapter::check_for_conflicts(&incoming, &stored).unwrap_err();
        match err {
            AdapterError::Conflict(report) => {
                assert_eq!(report.stored_at, Some(now));
                assert_eq!(report.entity, entity);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        incoming.updated_at = Some(now);
        assert!(PersistenceAdapter::check_for_conflicts(&incoming, &stored).is_ok());
    }

    #[test]
    fn conflict_report_carries_both_contents() {
        let entity = EntityRef::Object(ObjectId::new());
        let now = Utc::now();
        let mut stored = EntityRecord::empty(entity);
        stored.updated_at = Some(now);
        stored.slot_mut("main").push(Widget::new("theirs", "text"));
        let mut incoming = EntityRecord::empty(entity);
        incoming.updated_at = Some(now - Duration::seconds(1));
        incoming.fields.insert("title".into(), json!("Mine"));

        let AdapterError::Conflict(report) =
            PersistenceAdapter::check_for_conflicts(&incoming, &stored).unwrap_err()
        else {
            panic!("expected conflict");
        };
        assert_eq!(report.stored["widgets"]["main"][0]["id"], "theirs");
        assert_eq!(report.incoming["fields"]["title"], "Mine");
    }

    #[test]
    fn snapshot_failures_are_normalized() {
        let entity = EntityRef::Object(ObjectId::new());
        let cause = serde_json::from_str::<Value>("{").unwrap_err();
        let error = snapshot_failure(entity, cause);
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert!(error.detail.as_deref().unwrap_or("").contains("cannot snapshot"));
    }

    #[test]
    fn never_loaded_record_conflicts_with_stored_version() {
        let entity = EntityRef::Object(ObjectId::new());
        let mut stored = EntityRecord::empty(entity);
        stored.updated_at = Some(Utc::now());
        let incoming = EntityRecord::empty(entity);
        assert!(PersistenceAdapter::check_for_conflicts(&incoming, &stored).is_err());
        assert!(PersistenceAdapter::check_for_conflicts(&incoming, &incoming).is_ok());
    }

    #[test]
    fn local_checks_catch_duplicates_and_bad_windows() {
        let entity = EntityRef::Object(ObjectId::new());
        let mut record = EntityRecord::empty(entity);
        let now = Utc::now();
        record.slot_mut("main").extend([
            Widget::new("w1", "text"),
            Widget::new("w1", "text"),
            Widget::new("w2", " "),
            Widget::new("w3", "text").with_window(Some(now), Some(now - Duration::hours(1))),
        ]);
        let errors = check_widgets(&record);
        assert_eq!(errors.len(), 3, "{errors:?}");
    }
}

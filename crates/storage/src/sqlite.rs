//! A SQLite-backed implementation of the remote store. It serves the
//! ancestor-chain query and both widget CRUD families over the same
//! request/response seam a networked store would, speaking the remote
//! naming convention.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tessera_core::{
    AncestorEntry, EntityRef, NamingTable, ObjectId, PageId, PageSummary, SlotMap, Widget,
};

use crate::domain::CURRENT_VERSION;
use crate::error::StorageError;
use crate::traits::{Method, RemoteRequest, RemoteResponse, Transport, TransportError};
use crate::wire::{
    AncestorsBody, BatchKind, BatchRequest, ControlInfo, InheritanceInfo, RemoteRecord,
    ValidationReport,
};

enum Route {
    Ancestors(PageId),
    Record { entity: EntityRef, version: String },
    Validate { entity: EntityRef },
    Batch { entity: EntityRef, version: String },
}

fn parse_route(path: &str) -> Result<Route, StorageError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let not_found = || StorageError::NotFound(format!("no route for {path}"));
    match segments.as_slice() {
        ["pages", id, "ancestors"] => Ok(Route::Ancestors(id.parse()?)),
        ["pages", id, "versions", version, "widgets", rest @ ..] => {
            let entity = EntityRef::Page(id.parse()?);
            let version = version.to_string();
            match rest {
                [] => Ok(Route::Record { entity, version }),
                ["validate"] => Ok(Route::Validate { entity }),
                ["batch"] => Ok(Route::Batch { entity, version }),
                _ => Err(not_found()),
            }
        }
        ["objects", id, "widgets", rest @ ..] => {
            let entity = EntityRef::Object(id.parse()?);
            let version = CURRENT_VERSION.to_string();
            match rest {
                [] => Ok(Route::Record { entity, version }),
                ["validate"] => Ok(Route::Validate { entity }),
                ["batch"] => Ok(Route::Batch { entity, version }),
                _ => Err(not_found()),
            }
        }
        _ => Err(not_found()),
    }
}

fn domain_key(entity: &EntityRef) -> &'static str {
    match entity {
        EntityRef::Page(_) => "page",
        EntityRef::Object(_) => "object",
    }
}

fn format_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_stamp(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp {text}: {e}")))
}

struct StoredRow {
    widgets: SlotMap,
    fields: BTreeMap<String, Value>,
    updated_at: DateTime<Utc>,
}

pub struct SqliteBackend {
    conn: Connection,
    naming: NamingTable,
}

impl SqliteBackend {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            naming: NamingTable::default(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            naming: NamingTable::default(),
        })
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub fn insert_page(
        &self,
        page: &PageSummary,
        inheritance: &InheritanceInfo,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO pages (page_id, parent_id, title, slug, layout, theme, hostname, can_override, template_origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                page.id.to_string(),
                page.parent_id.map(|p| p.to_string()),
                page.title,
                page.slug,
                page.layout,
                page.theme,
                page.hostname,
                inheritance.can_override,
                inheritance.template_origin,
            ],
        )?;
        Ok(())
    }

    /// Re-parent a page. No cycle check: the store is allowed to hold
    /// whatever hierarchy it was given.
    pub fn set_parent(&self, page: PageId, parent: Option<PageId>) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE pages SET parent_id = ?1 WHERE page_id = ?2",
            rusqlite::params![parent.map(|p| p.to_string()), page.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("page {page}")));
        }
        Ok(())
    }

    pub fn insert_object(&self, id: ObjectId, controls: &ControlInfo) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO objects (object_id, strict_type, control_type) VALUES (?1, ?2, ?3)",
            rusqlite::params![id.to_string(), controls.strict_type, controls.control_type],
        )?;
        Ok(())
    }

    /// Replace one slot's widgets directly, as another editor would.
    pub fn put_slot(
        &self,
        entity: EntityRef,
        slot: &str,
        widgets: Vec<Widget>,
    ) -> Result<DateTime<Utc>, StorageError> {
        self.require_entity(&entity)?;
        let mut row = self.read_row(&entity, CURRENT_VERSION)?;
        let previous = row.as_ref().map(|r| r.updated_at);
        let (mut slots, fields) = match row.take() {
            Some(r) => (r.widgets, r.fields),
            None => (SlotMap::new(), BTreeMap::new()),
        };
        slots.insert(slot.to_string(), widgets);
        self.write_row(&entity, CURRENT_VERSION, &slots, &fields, previous)
    }

    pub fn slot(&self, entity: EntityRef, slot: &str) -> Result<Vec<Widget>, StorageError> {
        Ok(self
            .read_row(&entity, CURRENT_VERSION)?
            .and_then(|mut r| r.widgets.remove(slot))
            .unwrap_or_default())
    }

    pub fn field(&self, entity: EntityRef, field: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .read_row(&entity, CURRENT_VERSION)?
            .and_then(|mut r| r.fields.remove(field)))
    }

    pub fn updated_at(&self, entity: EntityRef) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.read_row(&entity, CURRENT_VERSION)?.map(|r| r.updated_at))
    }

    // ========================================================================
    // Rows
    // ========================================================================

    fn page(&self, id: PageId) -> Result<Option<(PageSummary, InheritanceInfo)>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT parent_id, title, slug, layout, theme, hostname, can_override, template_origin
                 FROM pages WHERE page_id = ?1",
                rusqlite::params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, bool>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((parent, title, slug, layout, theme, hostname, can_override, template_origin)) =
            row
        else {
            return Ok(None);
        };
        let parent_id = parent.map(|p| p.parse()).transpose()?;
        Ok(Some((
            PageSummary {
                id,
                title,
                slug,
                parent_id,
                layout,
                theme,
                hostname,
            },
            InheritanceInfo {
                can_override,
                template_origin,
            },
        )))
    }

    fn object_controls(&self, id: ObjectId) -> Result<Option<ControlInfo>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT strict_type, control_type FROM objects WHERE object_id = ?1",
                rusqlite::params![id.to_string()],
                |row| Ok((row.get::<_, bool>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(strict_type, control_type)| ControlInfo {
            strict_type,
            control_type,
        }))
    }

    fn require_entity(&self, entity: &EntityRef) -> Result<(), StorageError> {
        let exists = match entity {
            EntityRef::Page(id) => self.page(*id)?.is_some(),
            EntityRef::Object(id) => self.object_controls(*id)?.is_some(),
        };
        if exists {
            Ok(())
        } else {
            Err(StorageError::NotFound(entity.to_string()))
        }
    }

    fn read_row(&self, entity: &EntityRef, version: &str) -> Result<Option<StoredRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT widgets, fields, updated_at FROM records
                 WHERE domain = ?1 AND entity_id = ?2 AND version_id = ?3",
                rusqlite::params![domain_key(entity), entity.id_string(), version],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((widgets, fields, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredRow {
            widgets: serde_json::from_str(&widgets)?,
            fields: serde_json::from_str(&fields)?,
            updated_at: parse_stamp(&updated_at)?,
        }))
    }

    /// Every write gets a stamp strictly later than the one it replaces.
    fn write_row(
        &self,
        entity: &EntityRef,
        version: &str,
        widgets: &SlotMap,
        fields: &BTreeMap<String, Value>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        let stamp = match previous {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        self.conn.execute(
            "INSERT INTO records (domain, entity_id, version_id, widgets, fields, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(domain, entity_id, version_id) DO UPDATE SET
                widgets = excluded.widgets, fields = excluded.fields, updated_at = excluded.updated_at",
            rusqlite::params![
                domain_key(entity),
                entity.id_string(),
                version,
                serde_json::to_string(widgets)?,
                serde_json::to_string(fields)?,
                format_stamp(stamp),
            ],
        )?;
        Ok(stamp)
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn handle(&self, request: &RemoteRequest) -> Result<Value, StorageError> {
        let route = parse_route(&request.path)?;
        let body = request
            .body
            .clone()
            .map(|b| self.naming.from_remote(b))
            .unwrap_or(Value::Null);
        let response = match (request.method, route) {
            (Method::Get, Route::Ancestors(page)) => self.ancestors(page)?,
            (Method::Get, Route::Record { entity, version }) => {
                serde_json::to_value(self.load(&entity, &version)?)?
            }
            (Method::Put, Route::Record { entity, version }) => {
                let incoming: RemoteRecord = serde_json::from_value(body)?;
                self.require_entity(&entity)?;
                let previous = self.read_row(&entity, &version)?.map(|r| r.updated_at);
                self.write_row(&entity, &version, &incoming.widgets, &incoming.fields, previous)?;
                serde_json::to_value(self.load(&entity, &version)?)?
            }
            (Method::Post, Route::Validate { entity }) => {
                self.require_entity(&entity)?;
                let incoming: RemoteRecord = serde_json::from_value(body)?;
                serde_json::to_value(validate(&incoming))?
            }
            (Method::Post, Route::Batch { entity, version }) => {
                let batch: BatchRequest = serde_json::from_value(body)?;
                self.batch(&entity, &version, batch)?;
                serde_json::to_value(self.load(&entity, &version)?)?
            }
            (method, _) => {
                return Err(StorageError::InvalidRequest(format!(
                    "{} not allowed on {}",
                    method.as_str(),
                    request.path
                )));
            }
        };
        Ok(self.naming.to_remote(response))
    }

    fn ancestors(&self, target: PageId) -> Result<Value, StorageError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(target);
        while let Some(id) = current {
            let (page, _) = self
                .page(id)?
                .ok_or_else(|| StorageError::NotFound(format!("page {id}")))?;
            // A repeated page is reported once more and the walk stops, so
            // the caller can see the loop.
            current = if seen.insert(id) { page.parent_id } else { None };
            let widgets = self
                .read_row(&EntityRef::Page(id), CURRENT_VERSION)?
                .map(|r| r.widgets)
                .unwrap_or_default();
            chain.push(AncestorEntry { page, widgets });
        }
        chain.reverse();
        Ok(serde_json::to_value(AncestorsBody { ancestors: chain })?)
    }

    fn load(&self, entity: &EntityRef, version: &str) -> Result<RemoteRecord, StorageError> {
        let (inheritance, controls) = match entity {
            EntityRef::Page(id) => {
                let (_, info) = self
                    .page(*id)?
                    .ok_or_else(|| StorageError::NotFound(entity.to_string()))?;
                (Some(info), None)
            }
            EntityRef::Object(id) => {
                let controls = self
                    .object_controls(*id)?
                    .ok_or_else(|| StorageError::NotFound(entity.to_string()))?;
                (None, Some(controls))
            }
        };
        let row = self.read_row(entity, version)?;
        let (widgets, fields, updated_at) = match row {
            Some(r) => (r.widgets, r.fields, Some(r.updated_at)),
            None => (SlotMap::new(), BTreeMap::new(), None),
        };
        Ok(RemoteRecord {
            entity_id: entity.id_string(),
            version_id: matches!(entity, EntityRef::Page(_)).then(|| version.to_string()),
            widgets,
            fields,
            updated_at,
            inheritance,
            controls,
        })
    }

    fn batch(
        &self,
        entity: &EntityRef,
        version: &str,
        batch: BatchRequest,
    ) -> Result<(), StorageError> {
        self.require_entity(entity)?;
        let row = self.read_row(entity, version)?;
        let previous = row.as_ref().map(|r| r.updated_at);
        let (mut slots, fields) = match row {
            Some(r) => (r.widgets, r.fields),
            None => (SlotMap::new(), BTreeMap::new()),
        };
        let widgets = slots.entry(batch.slot_name.clone()).or_default();
        let targets: HashSet<_> = batch.widget_ids.iter().collect();
        match batch.batch_kind {
            BatchKind::Delete => widgets.retain(|w| !targets.contains(&w.id)),
            BatchKind::Publish | BatchKind::Unpublish => {
                let publish = batch.batch_kind == BatchKind::Publish;
                for widget in widgets.iter_mut().filter(|w| targets.contains(&w.id)) {
                    widget.is_published = publish;
                }
            }
            BatchKind::Update => {
                for update in batch.widgets {
                    if let Some(existing) = widgets.iter_mut().find(|w| w.id == update.id) {
                        *existing = update;
                    }
                }
            }
        }
        self.write_row(entity, version, &slots, &fields, previous)?;
        Ok(())
    }
}

fn validate(record: &RemoteRecord) -> ValidationReport {
    let mut field_errors = Vec::new();
    for (slot, widgets) in &record.widgets {
        if slot.trim().is_empty() {
            field_errors.push("slot name must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for widget in widgets {
            if widget.widget_type.trim().is_empty() {
                field_errors.push(format!("{slot}.{}: widgetType is required", widget.id));
            }
            if !seen.insert(&widget.id) {
                field_errors.push(format!("{slot}.{}: duplicate id", widget.id));
            }
        }
    }
    ValidationReport {
        valid: field_errors.is_empty(),
        field_errors,
    }
}

#[async_trait(?Send)]
impl Transport for SqliteBackend {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        match self.handle(&request) {
            Ok(body) => Ok(RemoteResponse::ok(body)),
            Err(e) => {
                tracing::debug!(
                    method = request.method.as_str(),
                    path = %request.path,
                    error = %e,
                    "Backend rejected request"
                );
                Ok(RemoteResponse::error(e.status(), e.to_string()))
            }
        }
    }
}

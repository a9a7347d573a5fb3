use std::rc::Rc;

use tessera_core::{ComponentId, EntityRef, ObjectId, PageId, PageSummary, Widget};
use tessera_engine::{
    ClipboardService, EngineConfig, EngineError, MemoryClipboard, UnifiedDataContext,
};
use tessera_storage::{
    ControlInfo, DomainConfig, InheritanceInfo, PersistenceAdapter, RecordCache, RetryPolicy,
    SqliteBackend, StorageError,
};

use crate::transport::FaultyTransport;

/// A seeded site store with an editing bus in front of it.
pub struct TestSite {
    pub backend: Rc<SqliteBackend>,
    pub transport: Rc<FaultyTransport>,
    pub bus: UnifiedDataContext,
    pub clipboard: ClipboardService,
    _dir: Option<tempfile::TempDir>,
}

impl TestSite {
    pub fn new() -> Result<Self, StorageError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, StorageError> {
        let backend = Rc::new(SqliteBackend::open_in_memory()?);
        Ok(Self::assemble(backend, config, None))
    }

    /// Same as [`TestSite::new`] but backed by a database file in a
    /// temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("site.db");
        let path = path.to_str().ok_or("temporary path is not valid UTF-8")?;
        let backend = Rc::new(SqliteBackend::open(path)?);
        Ok(Self::assemble(backend, EngineConfig::default(), Some(dir)))
    }

    fn assemble(
        backend: Rc<SqliteBackend>,
        config: EngineConfig,
        dir: Option<tempfile::TempDir>,
    ) -> Self {
        let transport = Rc::new(FaultyTransport::new(backend.clone()));
        let bus = UnifiedDataContext::new(transport.clone(), &config);
        Self {
            backend,
            transport,
            bus,
            clipboard: ClipboardService::new(Rc::new(MemoryClipboard::new())),
            _dir: dir,
        }
    }

    /// A standalone adapter over this site's transport.
    pub fn adapter(&self, config: DomainConfig, retry: RetryPolicy) -> PersistenceAdapter {
        PersistenceAdapter::new(self.transport.clone(), config, Rc::new(RecordCache::new()))
            .with_retry(retry)
    }

    pub fn add_page(&self, title: &str, parent: Option<PageId>) -> Result<PageId, StorageError> {
        let page = PageSummary::new(PageId::new(), title, parent);
        self.backend.insert_page(&page, &InheritanceInfo::default())?;
        Ok(page.id)
    }

    /// Pages `root -> ... -> leaf`, one per title. Returns them root first.
    pub fn add_chain(&self, titles: &[&str]) -> Result<Vec<PageId>, StorageError> {
        let mut pages: Vec<PageId> = Vec::with_capacity(titles.len());
        for title in titles {
            let page = self.add_page(title, pages.last().copied())?;
            pages.push(page);
        }
        Ok(pages)
    }

    pub fn add_object(&self, control_type: &str) -> Result<ObjectId, StorageError> {
        let id = ObjectId::new();
        self.backend.insert_object(
            id,
            &ControlInfo {
                strict_type: true,
                control_type: Some(control_type.to_string()),
            },
        )?;
        Ok(id)
    }

    /// Place widgets on a page directly in the store.
    pub fn place(&self, page: PageId, slot: &str, widgets: Vec<Widget>) -> Result<(), StorageError> {
        self.backend.put_slot(EntityRef::Page(page), slot, widgets)?;
        Ok(())
    }

    pub fn stored_ids(&self, entity: EntityRef, slot: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .backend
            .slot(entity, slot)?
            .into_iter()
            .map(|w| w.id.to_string())
            .collect())
    }

    pub fn component(&self, name: &str) -> Result<ComponentId, EngineError> {
        let component = ComponentId::from(name);
        self.bus.register_component(&component)?;
        Ok(component)
    }
}

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use tessera_core::{
    ApiError, ComponentId, ConflictReport, EntityRecord, EntityRef, OpId, Operation,
    OperationKind, OperationPayload, PageId, PasteMode, SlotRef, SubscriptionId,
};
use tessera_storage::{
    AdapterError, DomainConfig, PersistenceAdapter, RecordCache, Transport,
};
use tokio::sync::{oneshot, Mutex};

use crate::clipboard::ClipboardRead;
use crate::config::EngineConfig;
use crate::error::{EngineError, TreeError};
use crate::pending::{PendingOperation, PendingSnapshot, PendingStatus};
use crate::resolver::{InheritanceTreeResolver, MergeOptions, SlotQuery, TreeCache, TreeStatus};
use crate::state::{apply_to_copies, Records};

pub type ChangeCallback = Rc<dyn Fn(&Operation)>;

/// How a published operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Confirmed(Operation),
    /// Still applied locally; resolve with `retry` or `discard`.
    Conflicted(Box<ConflictReport>),
    /// Rolled back.
    Failed(ApiError),
}

impl CommitOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Handle for an external-change subscription.
#[must_use = "a subscription stays active until passed to `unsubscribe`"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    component: ComponentId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }
}

/// An operation applied to the view and queued for commit.
#[must_use = "the commit only runs when passed to `complete`"]
#[derive(Debug)]
pub struct PendingCommit {
    op_id: OpId,
    receiver: oneshot::Receiver<CommitOutcome>,
}

impl PendingCommit {
    pub fn op_id(&self) -> OpId {
        self.op_id
    }
}

struct Subscriber {
    component: ComponentId,
    callback: ChangeCallback,
}

#[derive(Default)]
struct BusState {
    components: HashSet<ComponentId>,
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    /// Records as last confirmed by the store.
    confirmed: Records,
    /// `confirmed` with every applied pending operation replayed on top.
    view: Records,
    pending: Vec<PendingOperation>,
    queue: VecDeque<OpId>,
    waiters: HashMap<OpId, oneshot::Sender<CommitOutcome>>,
    last_sequence: u64,
    dirty: bool,
}

impl BusState {
    fn pending_mut(&mut self, op_id: OpId) -> Result<&mut PendingOperation, EngineError> {
        self.pending
            .iter_mut()
            .find(|p| p.op_id() == op_id)
            .ok_or(EngineError::OperationNotFound(op_id))
    }

    fn remove_pending(&mut self, op_id: OpId) -> Option<PendingOperation> {
        let index = self.pending.iter().position(|p| p.op_id() == op_id)?;
        Some(self.pending.remove(index))
    }

    fn rebuild_view(&mut self) {
        let mut view = self.confirmed.clone();
        for pending in self.pending.iter().filter(|p| p.status().is_applied()) {
            match apply_to_copies(&view, &pending.operation) {
                Ok(records) => {
                    for record in records {
                        view.insert(record.entity, record);
                    }
                }
                Err(e) => tracing::warn!(
                    op_id = %pending.op_id(),
                    error = %e,
                    "Pending operation no longer applies"
                ),
            }
        }
        self.view = view;
    }

    fn enqueue(&mut self, op_id: OpId) -> oneshot::Receiver<CommitOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(op_id, sender);
        self.queue.push_back(op_id);
        receiver
    }

    fn callbacks_except(&self, origin: &ComponentId) -> Vec<ChangeCallback> {
        self.subscribers
            .values()
            .filter(|s| &s.component != origin)
            .map(|s| s.callback.clone())
            .collect()
    }
}

/// The shared editing bus. Components publish operations here; the bus
/// applies them to its view at once, commits them to the store one at a
/// time in publish order and tells the other components about each one
/// that the store confirms.
pub struct UnifiedDataContext {
    state: RefCell<BusState>,
    pages: Rc<PersistenceAdapter>,
    objects: Rc<PersistenceAdapter>,
    resolver: InheritanceTreeResolver,
    merge: MergeOptions,
    commit_gate: Mutex<()>,
}

impl UnifiedDataContext {
    pub fn new(transport: Rc<dyn Transport>, config: &EngineConfig) -> Self {
        let records = Rc::new(RecordCache::new());
        let pages = Rc::new(
            PersistenceAdapter::new(transport.clone(), DomainConfig::pages(), records.clone())
                .with_retry(config.retry),
        );
        let objects = Rc::new(
            PersistenceAdapter::new(transport, DomainConfig::objects(), records)
                .with_retry(config.retry),
        );
        let resolver = InheritanceTreeResolver::new(pages.clone(), Rc::new(TreeCache::new()));
        Self::with_parts(pages, objects, resolver, config.merge)
    }

    pub fn with_parts(
        pages: Rc<PersistenceAdapter>,
        objects: Rc<PersistenceAdapter>,
        resolver: InheritanceTreeResolver,
        merge: MergeOptions,
    ) -> Self {
        Self {
            state: RefCell::new(BusState::default()),
            pages,
            objects,
            resolver,
            merge,
            commit_gate: Mutex::new(()),
        }
    }

    pub fn resolver(&self) -> &InheritanceTreeResolver {
        &self.resolver
    }

    pub fn adapter_for(&self, entity: EntityRef) -> &PersistenceAdapter {
        match entity {
            EntityRef::Page(_) => &self.pages,
            EntityRef::Object(_) => &self.objects,
        }
    }

    // ========================================================================
    // Components and subscriptions
    // ========================================================================

    pub fn register_component(&self, component: &ComponentId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.components.insert(component.clone()) {
            return Err(EngineError::DuplicateComponent(component.clone()));
        }
        tracing::debug!(%component, "Registered component");
        Ok(())
    }

    /// Remove a component and release its subscriptions. Its queued
    /// operations still commit.
    pub fn unregister_component(&self, component: &ComponentId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.components.remove(component) {
            return Err(EngineError::ComponentNotRegistered(component.clone()));
        }
        state.subscribers.retain(|_, s| &s.component != component);
        Ok(())
    }

    pub fn subscribe_external_changes(
        &self,
        component: &ComponentId,
        callback: impl Fn(&Operation) + 'static,
    ) -> Result<Subscription, EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.components.contains(component) {
            return Err(EngineError::ComponentNotRegistered(component.clone()));
        }
        let id = SubscriptionId::new();
        state.subscribers.insert(
            id,
            Subscriber {
                component: component.clone(),
                callback: Rc::new(callback),
            },
        );
        Ok(Subscription {
            id,
            component: component.clone(),
        })
    }

    /// Returns false when the subscription was already released.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.state
            .borrow_mut()
            .subscribers
            .remove(&subscription.id)
            .is_some()
    }

    // ========================================================================
    // Dirty flag
    // ========================================================================

    pub fn is_dirty(&self) -> bool {
        self.state.borrow().dirty
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.state.borrow_mut().dirty = dirty;
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Load an entity's record through its adapter and make it editable.
    pub async fn load_entity(&self, entity: EntityRef) -> Result<EntityRecord, EngineError> {
        let record = self.adapter_for(entity).load_widgets(entity).await?;
        let mut state = self.state.borrow_mut();
        state.confirmed.insert(entity, record.clone());
        state.rebuild_view();
        Ok(state.view.get(&entity).cloned().unwrap_or(record))
    }

    /// Build the page's inheritance tree and load its record.
    pub async fn open_page(&self, page: PageId) -> Result<TreeStatus, EngineError> {
        let status = self.resolver.refresh(page).await?;
        self.load_entity(EntityRef::Page(page)).await?;
        Ok(status)
    }

    /// The entity as the editor currently sees it, pending edits included.
    pub fn record(&self, entity: EntityRef) -> Option<EntityRecord> {
        self.state.borrow().view.get(&entity).cloned()
    }

    pub fn confirmed_record(&self, entity: EntityRef) -> Option<EntityRecord> {
        self.state.borrow().confirmed.get(&entity).cloned()
    }

    pub fn slot_view(&self, page: PageId, slot: &str) -> Result<SlotQuery, EngineError> {
        self.slot_view_with(page, slot, &self.merge)
    }

    /// Merge one slot of an open page with the page's pending edits.
    pub fn slot_view_with(
        &self,
        page: PageId,
        slot: &str,
        options: &MergeOptions,
    ) -> Result<SlotQuery, EngineError> {
        let cache = self.resolver.cache();
        let (tree, stale) = match cache.get(page) {
            Some(tree) => (tree, false),
            None => (
                cache
                    .last_known(page)
                    .ok_or(TreeError::Unavailable(page))?,
                true,
            ),
        };
        let local = self
            .state
            .borrow()
            .view
            .get(&EntityRef::Page(page))
            .map(|record| record.slot(slot).to_vec());
        let mut query = match local {
            Some(widgets) => {
                let edited = tree.with_local_slot(slot, widgets);
                self.resolver.query_slot(&edited, slot, options)
            }
            None => self.resolver.query_slot(&tree, slot, options),
        };
        query.stale = stale;
        Ok(query)
    }

    pub fn pending_operations(&self) -> Vec<PendingSnapshot> {
        self.state
            .borrow()
            .pending
            .iter()
            .map(PendingOperation::snapshot)
            .collect()
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Apply an operation to the view and queue it for commit.
    pub fn publish(
        &self,
        component: &ComponentId,
        target: EntityRef,
        payload: OperationPayload,
    ) -> Result<PendingCommit, EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.components.contains(component) {
            return Err(EngineError::ComponentNotRegistered(component.clone()));
        }

        let sequence = state.last_sequence + 1;
        let op = Operation::new(component.clone(), target, sequence, payload)?;
        let updated = apply_to_copies(&state.view, &op)?;
        state.last_sequence = sequence;
        for record in updated {
            state.view.insert(record.entity, record);
        }

        let kind = op.kind();
        let slot = op.payload.slot().map(str::to_owned);
        let mut pending = PendingOperation::new(op);
        pending.advance(PendingStatus::OptimisticallyApplied)?;
        let op_id = pending.op_id();
        if kind != OperationKind::Save {
            state.dirty = true;
        }
        state.pending.push(pending);
        let receiver = state.enqueue(op_id);
        tracing::debug!(
            %op_id,
            %component,
            %target,
            kind = kind.as_str(),
            slot = slot.as_deref().unwrap_or(""),
            sequence,
            "Published operation"
        );
        Ok(PendingCommit { op_id, receiver })
    }

    /// Run queued commits up to and including this one.
    pub async fn complete(&self, commit: PendingCommit) -> Result<CommitOutcome, EngineError> {
        self.drain().await;
        commit
            .receiver
            .await
            .map_err(|_| EngineError::CommitAbandoned(commit.op_id))
    }

    pub async fn publish_update(
        &self,
        component: &ComponentId,
        target: EntityRef,
        payload: OperationPayload,
    ) -> Result<CommitOutcome, EngineError> {
        let commit = self.publish(component, target, payload)?;
        self.complete(commit).await
    }

    /// Paste clipboard contents into a slot. For a cut, the originals are
    /// removed from their source once the pasted widgets are stored.
    pub async fn paste(
        &self,
        component: &ComponentId,
        at: SlotRef,
        contents: ClipboardRead,
        mode: PasteMode,
    ) -> Result<CommitOutcome, EngineError> {
        let cut_source = contents.cut_source().cloned();
        let payload = OperationPayload::PasteWidgets {
            slot: at.slot,
            widgets: contents.data,
            mode,
            cut_source,
        };
        self.publish_update(component, at.entity, payload).await
    }

    // ========================================================================
    // Conflict resolution
    // ========================================================================

    /// Rebase a conflicted operation onto the stored version and commit it
    /// again.
    pub async fn retry(&self, op_id: OpId) -> Result<CommitOutcome, EngineError> {
        let op = self.conflicted_operation(op_id)?;
        {
            let _gate = self.commit_gate.lock().await;
            self.rebase(&op).await?;
        }
        let receiver = {
            let mut state = self.state.borrow_mut();
            state
                .pending_mut(op_id)?
                .advance(PendingStatus::OptimisticallyApplied)?;
            state.rebuild_view();
            state.enqueue(op_id)
        };
        tracing::info!(%op_id, "Retrying conflicted operation");
        self.complete(PendingCommit { op_id, receiver }).await
    }

    /// Drop a conflicted operation and take the stored version.
    pub async fn discard(&self, op_id: OpId) -> Result<(), EngineError> {
        let op = self.conflicted_operation(op_id)?;
        let _gate = self.commit_gate.lock().await;
        self.rebase(&op).await?;
        let mut state = self.state.borrow_mut();
        state.remove_pending(op_id);
        state.rebuild_view();
        tracing::info!(%op_id, "Discarded conflicted operation");
        Ok(())
    }

    fn conflicted_operation(&self, op_id: OpId) -> Result<Operation, EngineError> {
        let state = self.state.borrow();
        let pending = state
            .pending
            .iter()
            .find(|p| p.op_id() == op_id)
            .ok_or(EngineError::OperationNotFound(op_id))?;
        match pending.status() {
            PendingStatus::Conflicted(_) => Ok(pending.operation.clone()),
            other => Err(EngineError::InvalidTransition {
                op_id,
                from: other.as_str(),
                to: PendingStatus::OptimisticallyApplied.as_str(),
            }),
        }
    }

    /// Replace the confirmed records `op` touches with the stored ones.
    async fn rebase(&self, op: &Operation) -> Result<(), EngineError> {
        for entity in op.affected_entities() {
            let record = self.adapter_for(entity).refresh_widgets(entity).await?;
            self.state.borrow_mut().confirmed.insert(entity, record);
        }
        Ok(())
    }

    // ========================================================================
    // Commit pipeline
    // ========================================================================

    async fn drain(&self) {
        let _gate = self.commit_gate.lock().await;
        loop {
            let next = self.state.borrow_mut().queue.pop_front();
            let Some(op_id) = next else { break };
            let outcome = match self.commit(op_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(%op_id, error = %e, "Commit aborted");
                    CommitOutcome::Failed(e.to_api_error())
                }
            };
            let waiter = self.state.borrow_mut().waiters.remove(&op_id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(outcome);
            }
        }
    }

    async fn commit(&self, op_id: OpId) -> Result<CommitOutcome, EngineError> {
        let (op, updated) = {
            let mut state = self.state.borrow_mut();
            let pending = state.pending_mut(op_id)?;
            pending.advance(PendingStatus::Committing)?;
            let op = pending.operation.clone();
            let updated = apply_to_copies(&state.confirmed, &op);
            (op, updated)
        };

        let updated = match updated {
            Ok(updated) => updated,
            Err(e) => {
                let error = e.to_api_error();
                return self.finish(op, Vec::new(), Some(AdapterError::Api(error)));
            }
        };

        // Target first: a cut source only loses its widgets once the
        // pasted copies are stored.
        let mut saved = Vec::with_capacity(updated.len());
        let mut failure = None;
        for record in updated {
            let adapter = self.adapter_for(record.entity);
            let result = if op.kind() == OperationKind::Save {
                match adapter.validate_widgets(&record).await {
                    Ok(_) => adapter.save_widgets(&record).await,
                    Err(e) => Err(e),
                }
            } else {
                adapter.save_widgets(&record).await
            };
            match result {
                Ok(record) => saved.push(record),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.finish(op, saved, failure)
    }

    fn finish(
        &self,
        op: Operation,
        saved: Vec<EntityRecord>,
        failure: Option<AdapterError>,
    ) -> Result<CommitOutcome, EngineError> {
        let (outcome, callbacks) = {
            let mut state = self.state.borrow_mut();
            for record in &saved {
                state.confirmed.insert(record.entity, record.clone());
            }

            let status = match &failure {
                None => PendingStatus::Confirmed,
                Some(AdapterError::Conflict(report)) => PendingStatus::Conflicted(report.clone()),
                Some(AdapterError::Api(error)) => PendingStatus::Failed(error.clone()),
            };
            state.pending_mut(op.op_id)?.advance(status.clone())?;
            if status.is_terminal() {
                state.remove_pending(op.op_id);
            }
            state.rebuild_view();

            match failure {
                None => {
                    if op.kind() == OperationKind::Save && state.pending.is_empty() {
                        state.dirty = false;
                    }
                    let callbacks = state.callbacks_except(&op.origin);
                    (CommitOutcome::Confirmed(op.clone()), callbacks)
                }
                Some(AdapterError::Conflict(report)) => {
                    tracing::warn!(op_id = %op.op_id, entity = %report.entity, "Operation conflicted");
                    (CommitOutcome::Conflicted(report), Vec::new())
                }
                Some(AdapterError::Api(error)) => {
                    tracing::warn!(
                        op_id = %op.op_id,
                        kind = error.kind.as_str(),
                        partial = !saved.is_empty(),
                        "Operation rolled back"
                    );
                    (CommitOutcome::Failed(error), Vec::new())
                }
            }
        };

        for page in saved.iter().filter_map(|r| r.entity.as_page()) {
            self.resolver.cache().invalidate_descendants(page);
        }
        if outcome.is_confirmed() {
            tracing::debug!(
                op_id = %op.op_id,
                listeners = callbacks.len(),
                "Operation confirmed"
            );
        }
        for callback in callbacks {
            callback(&op);
        }
        Ok(outcome)
    }
}

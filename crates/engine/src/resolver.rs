use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use tessera_core::{AncestorEntry, InheritanceBehavior, PageId, PageSummary, SlotMap, Widget};
use tessera_storage::PersistenceAdapter;

use crate::error::TreeError;

// ============================================================================
// Tree
// ============================================================================

/// One page of an inheritance tree. Nodes link to their parent; the
/// target page is the leaf.
#[derive(Debug)]
pub struct TreeNode {
    pub page: PageSummary,
    /// Distance from the target page; 0 for the target itself.
    pub depth: u32,
    pub widgets: SlotMap,
    parent: Option<Rc<TreeNode>>,
}

impl TreeNode {
    pub fn parent(&self) -> Option<&TreeNode> {
        self.parent.as_deref()
    }

    pub fn local_widgets(&self, slot: &str) -> &[Widget] {
        self.widgets.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The ancestor chain of one page, each widget stamped with the depth it
/// was placed at.
#[derive(Debug)]
pub struct InheritanceTree {
    target: Rc<TreeNode>,
    built_at: DateTime<Utc>,
}

impl InheritanceTree {
    /// Build from a root-first chain ending at `target`.
    pub fn from_chain(target: PageId, chain: Vec<AncestorEntry>) -> Result<Self, TreeError> {
        let Some(last) = chain.last() else {
            return Err(TreeError::GenerationFailed {
                page: target,
                reason: "empty ancestor chain".into(),
            });
        };
        if last.page.id != target {
            return Err(TreeError::GenerationFailed {
                page: target,
                reason: format!("ancestor chain ends at {} instead", last.page.id),
            });
        }

        let mut seen = HashSet::with_capacity(chain.len());
        for entry in &chain {
            if !seen.insert(entry.page.id) {
                return Err(TreeError::CircularReference {
                    page: entry.page.id,
                });
            }
        }

        let leaf_index = chain.len() - 1;
        let mut parent: Option<Rc<TreeNode>> = None;
        for (index, entry) in chain.into_iter().enumerate() {
            let expected = parent.as_ref().map(|p| p.page.id);
            if entry.page.parent_id != expected {
                return Err(TreeError::GenerationFailed {
                    page: target,
                    reason: format!("page {} is not linked to its parent", entry.page.id),
                });
            }

            let depth = (leaf_index - index) as u32;
            let mut widgets = entry.widgets;
            for widget in widgets.values_mut().flatten() {
                widget.origin_depth = depth;
            }
            parent = Some(Rc::new(TreeNode {
                page: entry.page,
                depth,
                widgets,
                parent,
            }));
        }

        let target = parent.ok_or(TreeError::Unavailable(target))?;
        Ok(Self {
            target,
            built_at: Utc::now(),
        })
    }

    pub fn target(&self) -> &TreeNode {
        &self.target
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Nodes from the target up to the root.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        std::iter::successors(Some(self.target.as_ref()), |node| node.parent())
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.nodes().any(|node| node.page.id == page)
    }

    /// Whether `page` appears above the target.
    pub fn has_ancestor(&self, page: PageId) -> bool {
        self.nodes().skip(1).any(|node| node.page.id == page)
    }

    /// The same tree with the target's widgets in `slot` replaced, used to
    /// merge unsaved local edits with the fetched ancestors.
    pub fn with_local_slot(&self, slot: &str, widgets: Vec<Widget>) -> Self {
        let mut local = self.target.widgets.clone();
        local.insert(
            slot.to_string(),
            widgets
                .into_iter()
                .map(|mut w| {
                    w.origin_depth = 0;
                    w
                })
                .collect(),
        );
        Self {
            target: Rc::new(TreeNode {
                page: self.target.page.clone(),
                depth: 0,
                widgets: local,
                parent: self.target.parent.clone(),
            }),
            built_at: self.built_at,
        }
    }
}

// ============================================================================
// Merge
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    #[default]
    Edit,
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub mode: MergeMode,
    /// Edit mode only: show unpublished and out-of-window widgets.
    pub include_unpublished: bool,
    pub apply_inheritance_behavior: bool,
    pub respect_publishing: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            mode: MergeMode::Edit,
            include_unpublished: false,
            apply_inheritance_behavior: true,
            respect_publishing: true,
        }
    }
}

impl MergeOptions {
    pub fn preview() -> Self {
        Self {
            mode: MergeMode::Preview,
            ..Self::default()
        }
    }

    /// Preview always filters by publication state.
    pub fn filters_publication(&self) -> bool {
        match self.mode {
            MergeMode::Preview => true,
            MergeMode::Edit => self.respect_publishing && !self.include_unpublished,
        }
    }
}

/// The result of querying one slot of a tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotQuery {
    pub local: Vec<Widget>,
    pub inherited: Vec<Widget>,
    pub merged: Vec<Widget>,
    pub has_local: bool,
    pub has_inherited: bool,
    /// A local override-parent widget suppressed content that ancestors
    /// would otherwise have contributed.
    pub overrides_inherited: bool,
    /// Merged from a tree whose rebuild failed.
    pub stale: bool,
}

fn visible_widgets(
    node: &TreeNode,
    slot: &str,
    options: &MergeOptions,
    now: DateTime<Utc>,
) -> Vec<Widget> {
    let filter = options.filters_publication();
    let mut widgets: Vec<Widget> = node
        .local_widgets(slot)
        .iter()
        .filter(|w| node.depth == 0 || (w.meta.can_inherit && w.reaches(node.depth)))
        .filter(|w| !filter || w.is_live_at(now))
        .cloned()
        .collect();
    widgets.sort_by_key(|w| w.order);
    widgets
}

/// Place one level's widgets around what the levels above produced.
fn combine(base: Vec<Widget>, level: Vec<Widget>) -> Vec<Widget> {
    if level
        .iter()
        .any(|w| w.inheritance_behavior == InheritanceBehavior::OverrideParent)
    {
        return level;
    }
    let (before, after): (Vec<Widget>, Vec<Widget>) = level
        .into_iter()
        .partition(|w| w.inheritance_behavior == InheritanceBehavior::InsertBeforeParent);
    let mut merged = before;
    merged.extend(base);
    merged.extend(after);
    merged
}

/// Merge one slot of `tree` as of `now`.
pub fn merge_slot(
    tree: &InheritanceTree,
    slot: &str,
    options: &MergeOptions,
    now: DateTime<Utc>,
) -> SlotQuery {
    let levels: Vec<Vec<Widget>> = tree
        .nodes()
        .map(|node| visible_widgets(node, slot, options, now))
        .collect();
    let (local, ancestors) = match levels.split_first() {
        Some((local, ancestors)) => (local.clone(), ancestors),
        None => (Vec::new(), &[][..]),
    };

    if !options.apply_inheritance_behavior {
        let inherited: Vec<Widget> = ancestors.iter().rev().flatten().cloned().collect();
        let mut merged = inherited.clone();
        merged.extend(local.iter().cloned());
        return SlotQuery {
            has_local: !local.is_empty(),
            has_inherited: !inherited.is_empty(),
            overrides_inherited: false,
            stale: false,
            local,
            inherited,
            merged,
        };
    }

    let mut inherited = Vec::new();
    for level in ancestors.iter().rev() {
        inherited = combine(inherited, level.clone());
    }

    let overrides = local
        .iter()
        .any(|w| w.inheritance_behavior == InheritanceBehavior::OverrideParent);
    let overrides_inherited = overrides && !inherited.is_empty();
    if overrides {
        inherited.clear();
    }
    let merged = combine(inherited.clone(), local.clone());

    SlotQuery {
        has_local: !local.is_empty(),
        has_inherited: !inherited.is_empty(),
        overrides_inherited,
        stale: false,
        local,
        inherited,
        merged,
    }
}

// ============================================================================
// Tree cache
// ============================================================================

struct CacheEntry {
    tree: Rc<InheritanceTree>,
    fresh: bool,
}

/// Built trees by target page. Invalidated entries are kept as last-known
/// fallbacks until a rebuild replaces them.
#[derive(Default)]
pub struct TreeCache {
    entries: RefCell<HashMap<PageId, CacheEntry>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page: PageId) -> Option<Rc<InheritanceTree>> {
        self.entries
            .borrow()
            .get(&page)
            .filter(|entry| entry.fresh)
            .map(|entry| entry.tree.clone())
    }

    pub fn last_known(&self, page: PageId) -> Option<Rc<InheritanceTree>> {
        self.entries.borrow().get(&page).map(|entry| entry.tree.clone())
    }

    pub fn insert(&self, page: PageId, tree: Rc<InheritanceTree>) {
        self.entries
            .borrow_mut()
            .insert(page, CacheEntry { tree, fresh: true });
    }

    /// Mark the page's own tree and every tree whose chain contains it.
    pub fn invalidate(&self, page: PageId) {
        for entry in self.entries.borrow_mut().values_mut() {
            if entry.tree.contains(page) {
                entry.fresh = false;
            }
        }
    }

    /// Mark only the trees of pages below `page`.
    pub fn invalidate_descendants(&self, page: PageId) {
        for entry in self.entries.borrow_mut().values_mut() {
            if entry.tree.has_ancestor(page) {
                entry.fresh = false;
            }
        }
    }

    /// Mark only `page`'s own tree.
    pub fn mark_stale(&self, page: PageId) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(&page) {
            entry.fresh = false;
        }
    }

    pub fn is_fresh(&self, page: PageId) -> bool {
        self.get(page).is_some()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Outcome of a tree refresh.
#[derive(Debug, Clone)]
pub enum TreeStatus {
    Fresh(Rc<InheritanceTree>),
    /// The rebuild failed; the last successfully built tree is served and
    /// stays marked stale in the cache.
    Fallback {
        tree: Rc<InheritanceTree>,
        error: TreeError,
    },
}

impl TreeStatus {
    pub fn tree(&self) -> &Rc<InheritanceTree> {
        match self {
            Self::Fresh(tree) | Self::Fallback { tree, .. } => tree,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Builds inheritance trees from the page adapter and merges slots.
pub struct InheritanceTreeResolver {
    pages: Rc<PersistenceAdapter>,
    cache: Rc<TreeCache>,
}

impl InheritanceTreeResolver {
    pub fn new(pages: Rc<PersistenceAdapter>, cache: Rc<TreeCache>) -> Self {
        Self { pages, cache }
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    /// Fetch the ancestor chain and build the tree. Nothing is cached.
    pub async fn build_tree(&self, page: PageId) -> Result<InheritanceTree, TreeError> {
        let chain = self
            .pages
            .load_ancestors(page)
            .await
            .map_err(|e| TreeError::GenerationFailed {
                page,
                reason: e.to_string(),
            })?;
        let tree = InheritanceTree::from_chain(page, chain)?;
        tracing::debug!(%page, levels = tree.nodes().count(), "Built inheritance tree");
        Ok(tree)
    }

    /// Rebuild and cache the tree for `page`.
    ///
    /// A failed rebuild falls back to the last built tree when there is one
    /// and reports the failure alongside it. Without one the page is
    /// [`TreeError::Unavailable`], except for cycles, which are reported as
    /// such.
    pub async fn refresh(&self, page: PageId) -> Result<TreeStatus, TreeError> {
        match self.build_tree(page).await {
            Ok(tree) => {
                let tree = Rc::new(tree);
                self.cache.insert(page, tree.clone());
                Ok(TreeStatus::Fresh(tree))
            }
            Err(error) => match self.cache.last_known(page) {
                Some(tree) => {
                    tracing::warn!(%page, %error, "Serving last known inheritance tree");
                    self.cache.mark_stale(page);
                    Ok(TreeStatus::Fallback { tree, error })
                }
                None => {
                    tracing::error!(%page, %error, "Inheritance tree unavailable");
                    match error {
                        TreeError::CircularReference { .. } => Err(error),
                        _ => Err(TreeError::Unavailable(page)),
                    }
                }
            },
        }
    }

    /// The cached tree when it is still fresh, otherwise a refresh.
    pub async fn tree(&self, page: PageId) -> Result<TreeStatus, TreeError> {
        match self.cache.get(page) {
            Some(tree) => Ok(TreeStatus::Fresh(tree)),
            None => self.refresh(page).await,
        }
    }

    pub fn invalidate(&self, page: PageId) {
        self.cache.invalidate(page);
    }

    pub fn query_slot(&self, tree: &InheritanceTree, slot: &str, options: &MergeOptions) -> SlotQuery {
        merge_slot(tree, slot, options, Utc::now())
    }

    pub fn query_slot_at(
        &self,
        tree: &InheritanceTree,
        slot: &str,
        options: &MergeOptions,
        now: DateTime<Utc>,
    ) -> SlotQuery {
        merge_slot(tree, slot, options, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(page: &PageSummary, slot: &str, widgets: Vec<Widget>) -> AncestorEntry {
        let mut map = SlotMap::new();
        map.insert(slot.to_string(), widgets);
        AncestorEntry {
            page: page.clone(),
            widgets: map,
        }
    }

    fn chain3(
        root: Vec<Widget>,
        middle: Vec<Widget>,
        leaf: Vec<Widget>,
    ) -> (PageId, InheritanceTree) {
        let root_page = PageSummary::new(PageId::new(), "Root", None);
        let middle_page = PageSummary::new(PageId::new(), "Middle", Some(root_page.id));
        let leaf_page = PageSummary::new(PageId::new(), "Leaf", Some(middle_page.id));
        let target = leaf_page.id;
        let tree = InheritanceTree::from_chain(
            target,
            vec![
                entry(&root_page, "main", root),
                entry(&middle_page, "main", middle),
                entry(&leaf_page, "main", leaf),
            ],
        )
        .unwrap();
        (target, tree)
    }

    fn ids(widgets: &[Widget]) -> Vec<&str> {
        widgets.iter().map(|w| w.id.as_str()).collect()
    }

    #[test]
    fn depths_count_from_target() {
        let (target, tree) = chain3(
            vec![Widget::new("r", "text")],
            vec![Widget::new("m", "text")],
            vec![Widget::new("l", "text")],
        );
        let depths: Vec<u32> = tree.nodes().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        assert_eq!(tree.target().page.id, target);
        let root = tree.nodes().last().unwrap();
        assert_eq!(root.local_widgets("main")[0].origin_depth, 2);
        assert!(root.parent().is_none());
    }

    #[test]
    fn repeated_page_is_circular() {
        let a = PageSummary::new(PageId::new(), "A", None);
        let b = PageSummary::new(PageId::new(), "B", Some(a.id));
        let chain = vec![
            entry(&a, "main", vec![]),
            entry(&b, "main", vec![]),
            entry(&a, "main", vec![]),
        ];
        let err = InheritanceTree::from_chain(a.id, chain).unwrap_err();
        assert!(matches!(err, TreeError::CircularReference { page } if page == a.id));
    }

    #[test]
    fn unlinked_chain_fails() {
        let a = PageSummary::new(PageId::new(), "A", None);
        let b = PageSummary::new(PageId::new(), "B", None);
        let err =
            InheritanceTree::from_chain(b.id, vec![entry(&a, "main", vec![]), entry(&b, "main", vec![])])
                .unwrap_err();
        assert!(matches!(err, TreeError::GenerationFailed { .. }));

        let err = InheritanceTree::from_chain(b.id, Vec::new()).unwrap_err();
        assert!(matches!(err, TreeError::GenerationFailed { .. }));
    }

    #[test]
    fn insert_after_follows_inherited() {
        let (_, tree) = chain3(
            vec![Widget::new("w0", "text")],
            vec![],
            vec![Widget::new("w1", "text")],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["w0", "w1"]);
        assert_eq!(ids(&q.local), vec!["w1"]);
        assert_eq!(ids(&q.inherited), vec!["w0"]);
        assert!(q.has_local && q.has_inherited);
    }

    #[test]
    fn insert_before_precedes_inherited() {
        let (_, tree) = chain3(
            vec![Widget::new("w0", "text")],
            vec![],
            vec![Widget::new("w1", "text").with_behavior(InheritanceBehavior::InsertBeforeParent)],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["w1", "w0"]);
    }

    #[test]
    fn override_discards_inherited() {
        let (_, tree) = chain3(
            vec![Widget::new("w0", "text")],
            vec![Widget::new("m", "text")],
            vec![
                Widget::new("w1", "text").with_behavior(InheritanceBehavior::OverrideParent),
                Widget::new("w2", "text").with_order(1),
            ],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["w1", "w2"]);
        assert!(q.inherited.is_empty());
        assert!(!q.has_inherited);
        assert!(q.overrides_inherited);
    }

    #[test]
    fn intermediate_levels_fold_in_order() {
        let (_, tree) = chain3(
            vec![Widget::new("r", "text")],
            vec![
                Widget::new("m-before", "text").with_behavior(InheritanceBehavior::InsertBeforeParent),
                Widget::new("m-after", "text"),
            ],
            vec![Widget::new("l", "text")],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["m-before", "r", "m-after", "l"]);

        let (_, tree) = chain3(
            vec![Widget::new("r", "text")],
            vec![Widget::new("m", "text").with_behavior(InheritanceBehavior::OverrideParent)],
            vec![Widget::new("l", "text")],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["m", "l"]);
    }

    #[test]
    fn inheritance_level_limits_reach() {
        let (_, tree) = chain3(
            vec![
                Widget::new("near", "text").with_inheritance_level(1),
                Widget::new("far", "text").with_inheritance_level(2),
                Widget::new("unlimited", "text"),
            ],
            vec![],
            vec![],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["far", "unlimited"]);
    }

    #[test]
    fn publication_filter_by_mode() {
        let now = Utc::now();
        let (_, tree) = chain3(
            vec![
                Widget::new("live", "text"),
                Widget::new("draft", "text").unpublished(),
                Widget::new("expired", "text").with_window(None, Some(now - Duration::hours(1))),
            ],
            vec![],
            vec![],
        );

        let edit = MergeOptions::default();
        assert_eq!(ids(&merge_slot(&tree, "main", &edit, now).merged), vec!["live"]);

        let drafts = MergeOptions {
            include_unpublished: true,
            ..MergeOptions::default()
        };
        assert_eq!(merge_slot(&tree, "main", &drafts, now).merged.len(), 3);

        let preview = MergeOptions {
            include_unpublished: true,
            ..MergeOptions::preview()
        };
        assert_eq!(ids(&merge_slot(&tree, "main", &preview, now).merged), vec!["live"]);

        let unfiltered = MergeOptions {
            respect_publishing: false,
            ..MergeOptions::default()
        };
        assert_eq!(merge_slot(&tree, "main", &unfiltered, now).merged.len(), 3);
    }

    #[test]
    fn raw_concatenation_without_behavior() {
        let (_, tree) = chain3(
            vec![Widget::new("r", "text")],
            vec![],
            vec![Widget::new("l", "text").with_behavior(InheritanceBehavior::OverrideParent)],
        );
        let options = MergeOptions {
            apply_inheritance_behavior: false,
            ..MergeOptions::default()
        };
        let q = merge_slot(&tree, "main", &options, Utc::now());
        assert_eq!(ids(&q.merged), vec!["r", "l"]);
    }

    #[test]
    fn ordering_within_level() {
        let (_, tree) = chain3(
            vec![
                Widget::new("b", "text").with_order(2),
                Widget::new("a", "text").with_order(1),
            ],
            vec![],
            vec![],
        );
        let q = merge_slot(&tree, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["a", "b"]);
    }

    #[test]
    fn local_slot_substitution_keeps_ancestors() {
        let (_, tree) = chain3(vec![Widget::new("w0", "text")], vec![], vec![]);
        let edited = tree.with_local_slot("main", vec![Widget::new("new", "text")]);
        let q = merge_slot(&edited, "main", &MergeOptions::default(), Utc::now());
        assert_eq!(ids(&q.merged), vec!["w0", "new"]);
        assert_eq!(edited.nodes().count(), 3);
    }

    #[test]
    fn cache_invalidates_containing_trees() {
        let (target, tree) = chain3(vec![], vec![], vec![]);
        let root = tree.nodes().last().unwrap().page.id;
        let cache = TreeCache::new();
        cache.insert(target, Rc::new(tree));
        assert!(cache.is_fresh(target));

        cache.invalidate_descendants(target);
        assert!(cache.is_fresh(target));

        cache.invalidate(root);
        assert!(!cache.is_fresh(target));
        assert!(cache.last_known(target).is_some());
        assert!(cache.get(target).is_none());
    }

    #[test]
    fn mark_stale_touches_one_page() {
        let (target, tree) = chain3(vec![], vec![], vec![]);
        let tree = Rc::new(tree);
        let root = tree.nodes().last().unwrap().page.id;
        let cache = TreeCache::new();
        cache.insert(target, tree.clone());
        cache.insert(root, tree);

        cache.mark_stale(target);
        assert!(!cache.is_fresh(target));
        assert!(cache.is_fresh(root));
        assert!(cache.last_known(target).is_some());
    }
}

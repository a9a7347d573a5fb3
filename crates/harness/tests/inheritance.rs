use tessera_core::{EntityRef, ErrorKind, InheritanceBehavior, OperationPayload, Widget};
use tessera_engine::{EngineError, MergeOptions, TreeError};
use tessera_harness::{Fault, TestSite};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn ids(widgets: &[Widget]) -> Vec<&str> {
    widgets.iter().map(|w| w.id.as_str()).collect()
}

// ============================================================================
// Merge ordering
// ============================================================================

#[tokio::test]
async fn header_of_three_level_chain() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["R", "A", "P"])?;
    let (root, a, p) = (chain[0], chain[1], chain[2]);
    site.place(root, "header", vec![Widget::new("w0", "nav")])?;
    site.place(
        a,
        "header",
        vec![Widget::new("w1", "banner").with_behavior(InheritanceBehavior::InsertAfterParent)],
    )?;

    let tree = site.bus.resolver().build_tree(p).await?;
    let depths: Vec<u32> = tree.nodes().map(|n| n.depth).collect();
    assert_eq!(depths, vec![0, 1, 2]);

    let query = site
        .bus
        .resolver()
        .query_slot(&tree, "header", &MergeOptions::default());
    assert_eq!(ids(&query.merged), vec!["w0", "w1"]);
    assert!(!query.has_local);
    assert!(query.has_inherited);
    let origins: Vec<u32> = query.merged.iter().map(|w| w.origin_depth).collect();
    assert_eq!(origins, vec![2, 1]);
    Ok(())
}

#[tokio::test]
async fn local_insertions_wrap_inherited() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child"])?;
    site.place(
        chain[0],
        "main",
        vec![Widget::new("A", "text").with_order(0), Widget::new("B", "text").with_order(1)],
    )?;

    site.place(
        chain[1],
        "main",
        vec![Widget::new("C", "text").with_behavior(InheritanceBehavior::InsertBeforeParent)],
    )?;
    let tree = site.bus.resolver().build_tree(chain[1]).await?;
    let query = site.bus.resolver().query_slot(&tree, "main", &MergeOptions::default());
    assert_eq!(ids(&query.merged), vec!["C", "A", "B"]);

    site.place(
        chain[1],
        "main",
        vec![Widget::new("D", "text").with_behavior(InheritanceBehavior::InsertAfterParent)],
    )?;
    let tree = site.bus.resolver().build_tree(chain[1]).await?;
    let query = site.bus.resolver().query_slot(&tree, "main", &MergeOptions::default());
    assert_eq!(ids(&query.merged), vec!["A", "B", "D"]);
    Ok(())
}

#[tokio::test]
async fn override_wins_over_insertion() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child"])?;
    site.place(chain[0], "main", vec![Widget::new("A", "text"), Widget::new("B", "text")])?;
    site.place(
        chain[1],
        "main",
        vec![
            Widget::new("before", "text")
                .with_behavior(InheritanceBehavior::InsertBeforeParent)
                .with_order(0),
            Widget::new("only", "text")
                .with_behavior(InheritanceBehavior::OverrideParent)
                .with_order(1),
        ],
    )?;

    let tree = site.bus.resolver().build_tree(chain[1]).await?;
    let query = site.bus.resolver().query_slot(&tree, "main", &MergeOptions::default());
    assert!(query.inherited.is_empty());
    assert!(!query.has_inherited);
    assert!(query.overrides_inherited);
    assert_eq!(ids(&query.merged), vec!["before", "only"]);

    let other = site.bus.resolver().query_slot(&tree, "footer", &MergeOptions::default());
    assert!(other.merged.is_empty());
    Ok(())
}

#[tokio::test]
async fn repeated_queries_agree() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Section", "Leaf"])?;
    site.place(
        chain[0],
        "main",
        vec![Widget::new("r1", "text").with_order(3), Widget::new("r2", "text").with_order(3)],
    )?;
    site.place(
        chain[1],
        "main",
        vec![Widget::new("s1", "text").with_behavior(InheritanceBehavior::InsertBeforeParent)],
    )?;
    site.place(chain[2], "main", vec![Widget::new("l1", "text")])?;

    let tree = site.bus.resolver().build_tree(chain[2]).await?;
    let first = site.bus.resolver().query_slot(&tree, "main", &MergeOptions::default());
    let second = site.bus.resolver().query_slot(&tree, "main", &MergeOptions::default());
    assert_eq!(first, second);
    assert_eq!(ids(&first.merged), vec!["s1", "r1", "r2", "l1"]);
    Ok(())
}

#[tokio::test]
async fn inheritance_level_boundary() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child", "Grandchild"])?;
    site.place(
        chain[0],
        "main",
        vec![Widget::new("limited", "text").with_inheritance_level(1)],
    )?;

    let child = site.bus.resolver().build_tree(chain[1]).await?;
    let query = site.bus.resolver().query_slot(&child, "main", &MergeOptions::default());
    assert_eq!(ids(&query.merged), vec!["limited"]);

    let grandchild = site.bus.resolver().build_tree(chain[2]).await?;
    let query = site
        .bus
        .resolver()
        .query_slot(&grandchild, "main", &MergeOptions::default());
    assert!(query.merged.is_empty());
    Ok(())
}

// ============================================================================
// Tree failures and caching
// ============================================================================

#[tokio::test]
async fn cyclic_hierarchy_is_reported() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["A", "B"])?;
    site.backend.set_parent(chain[0], Some(chain[1]))?;

    let err = site.bus.resolver().build_tree(chain[1]).await.unwrap_err();
    assert!(matches!(err, TreeError::CircularReference { .. }));
    assert_eq!(err.kind(), ErrorKind::CircularReference);
    Ok(())
}

#[tokio::test]
async fn failed_rebuild_serves_last_tree() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child"])?;
    site.place(chain[0], "main", vec![Widget::new("w0", "text")])?;

    let status = site.bus.open_page(chain[1]).await?;
    assert!(!status.is_fallback());

    site.transport.fail_next(Fault::Status(404));
    let status = site.bus.resolver().refresh(chain[1]).await?;
    assert!(status.is_fallback());
    let query = site.bus.slot_view(chain[1], "main")?;
    assert_eq!(ids(&query.merged), vec!["w0"]);
    assert!(query.stale);

    // The next access rebuilds instead of trusting the fallback.
    let status = site.bus.open_page(chain[1]).await?;
    assert!(!status.is_fallback());
    assert!(!site.bus.slot_view(chain[1], "main")?.stale);
    Ok(())
}

#[tokio::test]
async fn missing_tree_is_unavailable() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root"])?;
    assert!(matches!(
        site.bus.slot_view(chain[0], "main"),
        Err(EngineError::Tree(TreeError::Unavailable(_)))
    ));

    site.transport.fail_next(Fault::Status(404));
    let err = site.bus.resolver().refresh(chain[0]).await.unwrap_err();
    assert!(matches!(err, TreeError::Unavailable(page) if page == chain[0]));
    assert_eq!(err.kind(), ErrorKind::TreeGenerationFailed);

    site.transport.fail_next(Fault::Status(404));
    assert!(matches!(
        site.bus.open_page(chain[0]).await,
        Err(EngineError::Tree(TreeError::Unavailable(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn ancestor_edit_invalidates_descendant_views() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child"])?;
    let editor = site.component("editor")?;
    site.bus.open_page(chain[0]).await?;
    site.bus.open_page(chain[1]).await?;

    let add = OperationPayload::AddWidget {
        slot: "main".into(),
        widget: Widget::new("fresh", "text"),
        index: None,
    };
    let outcome = site
        .bus
        .publish_update(&editor, EntityRef::Page(chain[0]), add)
        .await?;
    assert!(outcome.is_confirmed());

    // The root's own view stays live; the child's tree is out of date.
    assert!(!site.bus.slot_view(chain[0], "main")?.stale);
    let child = site.bus.slot_view(chain[1], "main")?;
    assert!(child.stale);
    assert!(child.merged.is_empty());

    site.bus.open_page(chain[1]).await?;
    let child = site.bus.slot_view(chain[1], "main")?;
    assert!(!child.stale);
    assert_eq!(ids(&child.merged), vec!["fresh"]);
    Ok(())
}

#[tokio::test]
async fn local_edits_merge_with_ancestors() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child"])?;
    site.place(chain[0], "main", vec![Widget::new("w0", "text")])?;
    let editor = site.component("editor")?;
    site.bus.open_page(chain[1]).await?;

    let add = OperationPayload::AddWidget {
        slot: "main".into(),
        widget: Widget::new("mine", "text").with_behavior(InheritanceBehavior::InsertBeforeParent),
        index: None,
    };
    let commit = site.bus.publish(&editor, EntityRef::Page(chain[1]), add)?;
    let view = site.bus.slot_view(chain[1], "main")?;
    assert_eq!(ids(&view.merged), vec!["mine", "w0"]);
    assert!(site.bus.complete(commit).await?.is_confirmed());
    Ok(())
}

#[tokio::test]
async fn non_inheritable_widget_survives_unrelated_save() -> TestResult {
    let site = TestSite::new()?;
    let chain = site.add_chain(&["Root", "Child"])?;
    let mut pinned = Widget::new("w0", "text");
    pinned.meta.can_inherit = false;
    site.place(chain[0], "main", vec![pinned])?;
    let editor = site.component("editor")?;

    site.bus.open_page(chain[1]).await?;
    assert!(site.bus.slot_view(chain[1], "main")?.merged.is_empty());

    site.bus.open_page(chain[0]).await?;
    let add = OperationPayload::AddWidget {
        slot: "footer".into(),
        widget: Widget::new("f1", "text"),
        index: None,
    };
    let outcome = site
        .bus
        .publish_update(&editor, EntityRef::Page(chain[0]), add)
        .await?;
    assert!(outcome.is_confirmed());

    let stored = site.backend.slot(EntityRef::Page(chain[0]), "main")?;
    assert!(!stored[0].meta.can_inherit);

    site.bus.open_page(chain[1]).await?;
    let child = site.bus.slot_view(chain[1], "main")?;
    assert!(!child.stale);
    assert!(child.merged.is_empty());
    Ok(())
}

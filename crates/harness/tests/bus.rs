use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use tessera_core::{
    EntityRef, ErrorKind, OperationKind, OperationPayload, SlotRef, Widget, WidgetId,
};
use tessera_engine::{CommitOutcome, EngineError};
use tessera_harness::{Fault, TestSite, init_tracing};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn add(slot: &str, id: &str) -> OperationPayload {
    OperationPayload::AddWidget {
        slot: slot.into(),
        widget: Widget::new(id, "text"),
        index: None,
    }
}

#[tokio::test]
async fn commits_follow_publish_order() -> TestResult {
    init_tracing();
    let site = TestSite::new()?;
    let page = site.add_page("Home", None)?;
    let entity = EntityRef::Page(page);
    let editor = site.component("editor")?;
    let sidebar = site.component("sidebar")?;
    let observer = site.component("observer")?;
    site.bus.load_entity(entity).await?;

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let subscription = site.bus.subscribe_external_changes(&observer, move |op| {
        log.borrow_mut().push((op.origin.to_string(), op.sequence));
    })?;

    let first = site.bus.publish(&editor, entity, add("main", "e1"))?;
    let second = site.bus.publish(&sidebar, entity, add("main", "s1"))?;
    let third = site.bus.publish(&editor, entity, add("main", "e2"))?;

    // Completing the last one drains everything queued before it.
    assert!(site.bus.complete(third).await?.is_confirmed());
    assert!(site.bus.complete(first).await?.is_confirmed());
    assert!(site.bus.complete(second).await?.is_confirmed());

    assert_eq!(site.stored_ids(entity, "main")?, vec!["e1", "s1", "e2"]);
    let seen = seen.borrow().clone();
    assert_eq!(
        seen,
        vec![
            ("editor".to_string(), 1),
            ("sidebar".to_string(), 2),
            ("editor".to_string(), 3),
        ]
    );
    assert!(site.bus.unsubscribe(subscription));
    Ok(())
}

#[tokio::test]
async fn failed_commit_rolls_back() -> TestResult {
    let site = TestSite::new()?;
    let page = site.add_page("Home", None)?;
    let entity = EntityRef::Page(page);
    let editor = site.component("editor")?;
    site.place(page, "main", vec![Widget::new("kept", "text")])?;
    site.bus.load_entity(entity).await?;

    let heard = Rc::new(RefCell::new(0));
    let listener = site.component("listener")?;
    let count = heard.clone();
    let _subscription = site
        .bus
        .subscribe_external_changes(&listener, move |_| *count.borrow_mut() += 1)?;

    site.transport.fail_next(Fault::Status(400));
    let commit = site.bus.publish(&editor, entity, add("main", "doomed"))?;
    assert!(site.bus.record(entity).unwrap().find_widget(&WidgetId::from("doomed")).is_some());

    let outcome = site.bus.complete(commit).await?;
    let CommitOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.kind, ErrorKind::Validation);
    let view = site.bus.record(entity).unwrap();
    assert!(view.find_widget(&WidgetId::from("doomed")).is_none());
    assert!(site.bus.pending_operations().is_empty());
    assert_eq!(site.stored_ids(entity, "main")?, vec!["kept"]);
    assert_eq!(*heard.borrow(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_commit_failures_are_absorbed() -> TestResult {
    let site = TestSite::new()?;
    let page = site.add_page("Home", None)?;
    let entity = EntityRef::Page(page);
    let editor = site.component("editor")?;
    site.bus.load_entity(entity).await?;

    site.transport.fail_next(Fault::Status(503));
    let outcome = site.bus.publish_update(&editor, entity, add("main", "w1")).await?;
    assert!(outcome.is_confirmed());
    assert_eq!(site.stored_ids(entity, "main")?, vec!["w1"]);
    Ok(())
}

#[tokio::test]
async fn conflict_waits_for_retry() -> TestResult {
    let site = TestSite::new()?;
    let page = site.add_page("Home", None)?;
    let entity = EntityRef::Page(page);
    let editor = site.component("editor")?;
    site.bus.load_entity(entity).await?;
    site.place(page, "main", vec![Widget::new("theirs", "text")])?;

    let outcome = site.bus.publish_update(&editor, entity, add("main", "mine")).await?;
    let CommitOutcome::Conflicted(report) = outcome else {
        panic!("expected conflict, got {outcome:?}");
    };
    assert_eq!(report.stored["widgets"]["main"][0]["id"], "theirs");
    assert_eq!(site.stored_ids(entity, "main")?, vec!["theirs"]);

    let pending = site.bus.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, OperationKind::AddWidget);
    assert!(pending[0].conflict.is_some());
    assert!(site.bus.is_dirty());

    let outcome = site.bus.retry(pending[0].op_id).await?;
    assert!(outcome.is_confirmed());
    assert_eq!(site.stored_ids(entity, "main")?, vec!["theirs", "mine"]);
    assert!(site.bus.pending_operations().is_empty());

    assert!(matches!(
        site.bus.retry(pending[0].op_id).await,
        Err(EngineError::OperationNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn moves_between_pages_save_both() -> TestResult {
    let site = TestSite::new()?;
    let from = site.add_page("From", None)?;
    let to = site.add_page("To", None)?;
    site.place(from, "main", vec![Widget::new("mover", "text"), Widget::new("stay", "text")])?;
    let editor = site.component("editor")?;
    site.bus.load_entity(EntityRef::Page(from)).await?;
    site.bus.load_entity(EntityRef::Page(to)).await?;

    let payload = OperationPayload::MoveWidget {
        widget_id: WidgetId::from("mover"),
        from: SlotRef::new(EntityRef::Page(from), "main"),
        to: SlotRef::new(EntityRef::Page(to), "aside"),
        index: Some(0),
    };
    let outcome = site.bus.publish_update(&editor, EntityRef::Page(to), payload).await?;
    assert!(outcome.is_confirmed());
    assert_eq!(site.stored_ids(EntityRef::Page(from), "main")?, vec!["stay"]);
    assert_eq!(site.stored_ids(EntityRef::Page(to), "aside")?, vec!["mover"]);
    Ok(())
}

#[tokio::test]
async fn object_fields_and_widgets_commit() -> TestResult {
    let site = TestSite::new()?;
    let object = EntityRef::Object(site.add_object("form")?);
    let editor = site.component("editor")?;
    site.bus.load_entity(object).await?;

    let outcome = site
        .bus
        .publish_update(
            &editor,
            object,
            OperationPayload::UpdateObjectField {
                field: "title".into(),
                value: json!("Contact us"),
            },
        )
        .await?;
    assert!(outcome.is_confirmed());
    assert_eq!(site.backend.field(object, "title")?, Some(json!("Contact us")));

    site.bus.publish_update(&editor, object, add("body", "field-1")).await?;
    let update = OperationPayload::UpdateWidget {
        slot: "body".into(),
        widget_id: WidgetId::from("field-1"),
        config: json!({"label": "Email"}),
    };
    site.bus.publish_update(&editor, object, update).await?;
    let stored = site.backend.slot(object, "body")?;
    assert_eq!(stored[0].config["label"], "Email");
    let view = site.bus.record(object).unwrap();
    assert!(!view.slot("body")[0].meta.can_inherit);

    let page_only = site.bus.publish(
        &editor,
        EntityRef::Page(site.add_page("Home", None)?),
        OperationPayload::UpdateObjectField {
            field: "title".into(),
            value: json!("x"),
        },
    );
    assert!(matches!(page_only, Err(EngineError::Core(_))));
    Ok(())
}

#[tokio::test]
async fn dirty_clears_only_when_save_is_last() -> TestResult {
    let site = TestSite::new()?;
    let page = site.add_page("Home", None)?;
    let entity = EntityRef::Page(page);
    let editor = site.component("editor")?;
    site.bus.load_entity(entity).await?;
    assert!(!site.bus.is_dirty());

    let save = site.bus.publish(&editor, entity, OperationPayload::Save)?;
    let edit = site.bus.publish(&editor, entity, add("main", "late"))?;
    assert!(site.bus.complete(save).await?.is_confirmed());
    assert!(site.bus.complete(edit).await?.is_confirmed());
    assert!(site.bus.is_dirty());

    let outcome = site
        .bus
        .publish_update(&editor, entity, OperationPayload::Save)
        .await?;
    assert!(outcome.is_confirmed());
    assert!(!site.bus.is_dirty());
    Ok(())
}

#[tokio::test]
async fn unregistering_releases_subscriptions() -> TestResult {
    let site = TestSite::new()?;
    let page = site.add_page("Home", None)?;
    let entity = EntityRef::Page(page);
    let editor = site.component("editor")?;
    let preview = site.component("preview")?;
    site.bus.load_entity(entity).await?;

    let heard = Rc::new(RefCell::new(0));
    let count = heard.clone();
    let subscription = site
        .bus
        .subscribe_external_changes(&preview, move |_| *count.borrow_mut() += 1)?;
    site.bus.publish_update(&editor, entity, add("main", "a")).await?;
    assert_eq!(*heard.borrow(), 1);

    site.bus.unregister_component(&preview)?;
    site.bus.publish_update(&editor, entity, add("main", "b")).await?;
    assert_eq!(*heard.borrow(), 1);
    assert!(!site.bus.unsubscribe(subscription));
    Ok(())
}

#[tokio::test]
async fn on_disk_site_keeps_commits() -> TestResult {
    let site = TestSite::on_disk()?;
    let page = site.add_page("Home", None)?;
    let editor = site.component("editor")?;
    site.bus.load_entity(EntityRef::Page(page)).await?;
    site.bus
        .publish_update(&editor, EntityRef::Page(page), add("main", "w1"))
        .await?;
    assert_eq!(site.stored_ids(EntityRef::Page(page), "main")?, vec!["w1"]);
    Ok(())
}

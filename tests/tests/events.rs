mod common;

use anyhow::Result;
use common::*;
use serde_json::json;
use vantage::QueryKind;

/// A create event fetches the full record and inserts it at the remote
/// position when it matches the view's filter.
#[tokio::test]
async fn create_event_inserts_matching_row() -> Result<()> {
    let f = fixture(vec![json!({"id": 1, "status": "open"})]).await;
    let mut options = todo_options();
    options.filter = filter(json!({"status": "open"}));
    let view = f.client.live_view(options).await?;
    assert_eq!(ids(&view.fetch()), vec![json!(1)]);

    // Another client created rows 2 (matching) and 3 (not matching)
    f.executor.set_server_rows(rows(vec![
        json!({"id": 1, "status": "open"}),
        json!({"id": 2, "status": "open"}),
        json!({"id": 3, "status": "closed"}),
    ]));
    f.receiver.deliver_json(json!({"type": "create", "model": "todo", "namespace": "todo", "pk": 2}));
    f.receiver.deliver_json(json!({"type": "create", "model": "todo", "namespace": "todo", "pk": 3}));
    settle().await;

    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(2)]);
    Ok(())
}

#[tokio::test]
async fn delete_event_removes_row() -> Result<()> {
    let f = fixture(vec![json!({"id": 1}), json!({"id": 2})]).await;
    let view = f.client.live_view(todo_options()).await?;

    f.executor.set_server_rows(rows(vec![json!({"id": 2})]));
    f.receiver.deliver_json(json!({"type": "delete", "model": "todo", "namespace": "todo", "pk": 1}));
    settle().await;

    assert_eq!(ids(&view.fetch()), vec![json!(2)]);
    Ok(())
}

/// Bulk-update filter drop: a row updated out of the view's filter is
/// removed from the window.
#[tokio::test]
async fn bulk_update_drops_rows_leaving_the_filter() -> Result<()> {
    let f = fixture(vec![json!({"id": 1, "status": "open"}), json!({"id": 2, "status": "open"})]).await;
    let mut options = todo_options();
    options.filter = filter(json!({"status": "open"}));
    let view = f.client.live_view(options).await?;
    assert_eq!(view.len(), 2);

    f.executor.set_server_rows(rows(vec![json!({"id": 1, "status": "closed"}), json!({"id": 2, "status": "open"})]));
    f.receiver.deliver_json(json!({"type": "bulk_update", "model": "todo", "namespace": "todo", "instances": [1]}));
    settle().await;

    assert_eq!(ids(&view.fetch()), vec![json!(2)]);
    Ok(())
}

#[tokio::test]
async fn bulk_update_upserts_rows_entering_the_filter() -> Result<()> {
    let f = fixture(vec![json!({"id": 1, "status": "open"}), json!({"id": 2, "status": "closed"})]).await;
    let mut options = todo_options();
    options.filter = filter(json!({"status": "open"}));
    let view = f.client.live_view(options).await?;
    assert_eq!(view.len(), 1);

    f.executor.set_server_rows(rows(vec![json!({"id": 1, "status": "open"}), json!({"id": 2, "status": "open"})]));
    f.receiver.deliver_json(json!({"type": "bulk_update", "model": "todo", "namespace": "todo", "instances": [{"id": 2}]}));
    settle().await;

    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(2)]);
    Ok(())
}

#[tokio::test]
async fn bulk_delete_removes_all_named_rows() -> Result<()> {
    let f = fixture(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]).await;
    let view = f.client.live_view(todo_options()).await?;

    f.executor.set_server_rows(rows(vec![json!({"id": 2})]));
    f.receiver.deliver_json(json!({"type": "bulk_delete", "model": "todo", "namespace": "todo", "instances": [1, 3]}));
    settle().await;

    assert_eq!(ids(&view.fetch()), vec![json!(2)]);
    Ok(())
}

/// Self-echo suppression: an event carrying the operation id of an in-flight
/// local mutation must not touch the view.
#[tokio::test]
async fn self_echo_is_suppressed() -> Result<()> {
    let f = fixture(vec![]).await;
    let view = f.client.live_view(todo_options()).await?;

    let gate = f.executor.gate_kind(QueryKind::Create);
    let handle = {
        let view = view.clone();
        tokio::spawn(async move { view.create(row(json!({"name": "A"}))).await })
    };
    settle().await;
    assert_eq!(view.len(), 1);

    let operation_id = f.executor.queries_of(QueryKind::Create)[0].operation_id.clone().expect("op id threaded");
    f.receiver.deliver_json(json!({
        "type": "create", "model": "todo", "namespace": "todo",
        "operation_id": operation_id, "pk": 1
    }));
    settle().await;

    // Unchanged: still exactly the one synthetic row
    let window = view.fetch();
    assert_eq!(window.len(), 1);
    assert!(window[0]["id"].is_string());

    gate.add_permits(1);
    handle.await??;
    assert_eq!(view.len(), 1);
    assert_eq!(view.fetch()[0]["id"], json!(1));
    Ok(())
}

/// Local-create grace: an update event that no longer matches (or misses on
/// fetch) must not remove a row this client just created.
#[tokio::test]
async fn update_event_mismatch_respects_local_create_grace() -> Result<()> {
    let f = fixture(vec![json!({"id": 10, "status": "open"})]).await;
    let mut options = todo_options();
    options.filter = filter(json!({"status": "open"}));
    let view = f.client.live_view(options).await?;

    let created = view.create(row(json!({"status": "open", "name": "mine"}))).await?;
    let created_id = created["id"].clone();
    assert_eq!(view.len(), 2);

    // A stale event arrives with filter context from before the create
    f.executor.set_server_rows(rows(vec![json!({"id": 10, "status": "open"})]));
    f.receiver.deliver_json(json!({"type": "update", "model": "todo", "namespace": "todo", "pk": created_id.clone()}));
    settle().await;

    // Grace: the locally created row survives the fetch miss
    assert_eq!(view.len(), 2);

    // The same miss on a row we did not create removes it
    f.executor.set_server_rows(rows(vec![]));
    f.receiver.deliver_json(json!({"type": "update", "model": "todo", "namespace": "todo", "pk": 10}));
    settle().await;
    assert_eq!(ids(&view.fetch()), vec![created_id]);
    Ok(())
}

#[tokio::test]
async fn unknown_event_kinds_are_dropped() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;

    f.receiver.deliver_json(json!({"type": "upsert", "model": "todo", "namespace": "todo", "pk": 1}));
    settle().await;

    assert_eq!(view.len(), 1);
    Ok(())
}

#[tokio::test]
async fn events_for_other_models_are_ignored() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;

    f.executor.set_server_rows(rows(vec![]));
    f.receiver.deliver_json(json!({"type": "delete", "model": "note", "namespace": "todo", "pk": 1}));
    settle().await;

    assert_eq!(view.len(), 1);
    Ok(())
}

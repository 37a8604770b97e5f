mod common;

use anyhow::Result;
use common::*;
use serde_json::json;
use vantage::QueryKind;

/// Optimistic delete failure: hidden during the await, restored after the
/// transport throws, one error notification per subscribed view.
#[tokio::test]
async fn delete_failure_rolls_back() -> Result<()> {
    let f = fixture(vec![json!({"id": 1}), json!({"id": 2})]).await;
    let view = f.client.live_view(todo_options()).await?;
    let child = view.filter(filter(json!({"id": 1})));

    let root_errors: TestWatcher<MutationError> = TestWatcher::new();
    let child_errors: TestWatcher<MutationError> = TestWatcher::new();
    let _r = view.on_error(root_errors.listener());
    let _c = child.on_error(child_errors.listener());

    f.executor.fail_kind(QueryKind::Delete);
    let gate = f.executor.gate_kind(QueryKind::Delete);
    let handle = {
        let child = child.clone();
        tokio::spawn(async move { child.delete().await })
    };
    settle().await;

    // Hidden while the request is in flight
    assert_eq!(ids(&view.fetch()), vec![json!(2)]);

    gate.add_permits(1);
    let result = handle.await?;
    assert!(matches!(result, Err(MutationError::Transport(_))));

    // Restored, in the original order
    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(2)]);
    assert_eq!(child_errors.len(), 1);
    // Errors propagate up the parent chain
    assert_eq!(root_errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn create_failure_rolls_back() -> Result<()> {
    let f = fixture(vec![]).await;
    let view = f.client.live_view(todo_options()).await?;
    let errors: TestWatcher<MutationError> = TestWatcher::new();
    let _e = view.on_error(errors.listener());

    f.executor.fail_kind(QueryKind::Create);
    let result = view.create(row(json!({"name": "A"}))).await;
    assert!(result.is_err());
    assert!(view.is_empty());
    assert_eq!(errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn update_failure_restores_all_rows() -> Result<()> {
    let f = fixture(vec![json!({"id": 1, "n": 1}), json!({"id": 2, "n": 2})]).await;
    let view = f.client.live_view(todo_options()).await?;

    f.executor.fail_kind(QueryKind::Update);
    let result = view.update(row(json!({"n": 9}))).await;
    assert!(result.is_err());
    assert_eq!(view.fetch()[0]["n"], json!(1));
    assert_eq!(view.fetch()[1]["n"], json!(2));
    Ok(())
}

#[tokio::test]
async fn update_refuses_primary_key_changes() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;
    let result = view.update(row(json!({"id": 7}))).await;
    assert!(matches!(result, Err(MutationError::InvalidArguments(_))));
    Ok(())
}

#[tokio::test]
async fn destroyed_view_refuses_mutations() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;
    view.destroy();
    view.destroy(); // idempotent

    let result = view.create(row(json!({"name": "A"}))).await;
    assert!(matches!(result, Err(MutationError::DestroyedView)));

    settle().await;
    assert_eq!(f.receiver.unsubscriptions(), vec![Namespace::from("todo")]);
    Ok(())
}

#[tokio::test]
async fn destroying_the_root_invalidates_children() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;
    let child = view.filter(filter(json!({"id": 1})));
    view.destroy();

    let result = child.delete().await;
    assert!(matches!(result, Err(MutationError::DestroyedView)));
    Ok(())
}

#[tokio::test]
async fn get_resolves_locally_then_remotely() -> Result<()> {
    let f = fixture(vec![json!({"id": 1}), json!({"id": 2})]).await;
    let mut options = todo_options();
    options.options.limit = Some(1);
    let view = f.client.live_view(options).await?;
    assert_eq!(view.len(), 1);

    // Local miss, server hit: the row joins ground truth
    let fetched = view.get(filter(json!({"id": 2}))).await?;
    assert_eq!(fetched["id"], json!(2));
    assert_eq!(view.len(), 2);

    // Ambiguous local match
    let result = view.get(Filter::new()).await;
    assert!(matches!(result, Err(RetrievalError::MultipleObjectsReturned(2))));

    // Miss everywhere
    let result = view.get(filter(json!({"id": 99}))).await;
    assert!(matches!(result, Err(RetrievalError::DoesNotExist)));
    Ok(())
}

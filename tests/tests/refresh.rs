mod common;

use anyhow::Result;
use common::*;
use serde_json::json;

#[tokio::test]
async fn refresh_refetches_ground_truth() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;
    assert_eq!(view.len(), 1);

    f.executor.set_server_rows(rows(vec![json!({"id": 1}), json!({"id": 2})]));
    view.refresh(None, None, true).await?;
    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(2)]);
    Ok(())
}

#[tokio::test]
async fn refresh_rejects_a_model_change() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;

    let other = QuerySet::new(ModelType::new("note"), f.client.executor().clone());
    let result = view.refresh(Some(other), None, false).await;
    assert!(matches!(result, Err(MutationError::ModelMismatch { .. })));
    Ok(())
}

#[tokio::test]
async fn refresh_is_root_only() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;
    let child = view.filter(filter(json!({"id": 1})));

    let result = child.refresh(None, None, false).await;
    assert!(matches!(result, Err(MutationError::InvalidArguments(_))));
    Ok(())
}

#[tokio::test]
async fn refresh_narrows_with_new_options() -> Result<()> {
    let f = fixture((1..=5).map(|n| json!({"id": n})).collect()).await;
    let view = f.client.live_view(todo_options()).await?;
    assert_eq!(view.len(), 5);

    let mut options = SerializerOptions::default();
    options.limit = Some(2);
    view.refresh(None, Some(options), true).await?;
    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(2)]);
    Ok(())
}

/// The receiver is asked to unsubscribe only when the last view of a
/// namespace goes away.
#[tokio::test]
async fn last_view_unsubscribes_the_namespace() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let first = f.client.live_view(todo_options()).await?;
    let second = f.client.live_view(todo_options()).await?;

    // One channel subscription serves both views
    assert_eq!(f.receiver.subscriptions(), vec![Namespace::from("todo")]);

    first.destroy();
    settle().await;
    assert!(f.receiver.unsubscriptions().is_empty());

    second.destroy();
    settle().await;
    assert_eq!(f.receiver.unsubscriptions(), vec![Namespace::from("todo")]);
    Ok(())
}

/// A namespace suffix isolates the view on its own channel.
#[tokio::test]
async fn namespace_suffix_scopes_the_channel() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let mut options = todo_options();
    options.namespace_suffix = Some("mine".to_string());
    let view = f.client.live_view(options).await?;

    assert_eq!(f.receiver.subscriptions(), vec![Namespace::from("todo::mine")]);

    f.executor.set_server_rows(rows(vec![]));
    // Wrong channel: ignored
    f.receiver.deliver_json(json!({"type": "delete", "model": "todo", "namespace": "todo", "pk": 1}));
    settle().await;
    assert_eq!(view.len(), 1);

    // Right channel: applied
    f.receiver.deliver_json(json!({"type": "delete", "model": "todo", "namespace": "todo::mine", "pk": 1}));
    settle().await;
    assert_eq!(view.len(), 0);
    Ok(())
}

/// Events keep flowing after refresh re-registers the view.
#[tokio::test]
async fn refreshed_view_still_receives_events() -> Result<()> {
    let f = fixture(vec![json!({"id": 1})]).await;
    let view = f.client.live_view(todo_options()).await?;
    view.refresh(None, None, true).await?;

    f.executor.set_server_rows(rows(vec![json!({"id": 1}), json!({"id": 2})]));
    f.receiver.deliver_json(json!({"type": "create", "model": "todo", "namespace": "todo", "pk": 2}));
    settle().await;
    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(2)]);
    Ok(())
}

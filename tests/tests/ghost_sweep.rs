mod common;

use anyhow::Result;
use common::*;
use serde_json::json;
use vantage::QueryKind;

/// After a bulk delete, the sweep reconciles against the server's pk list:
/// rows the server no longer has are removed, locally created rows survive.
#[tokio::test]
async fn bulk_delete_schedules_a_ghost_sweep() -> Result<()> {
    let f = fixture(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3}), json!({"id": 4})]).await;
    let view = f.client.live_view(todo_options()).await?;

    let created = view.create(row(json!({"name": "mine"}))).await?;
    let created_pk = Pk::from_value(&created["id"]).expect("pk");
    assert_eq!(view.len(), 5);

    // Hold the sweep's pk fetch so the server can drift underneath it
    let gate = f.executor.gate_kind(QueryKind::Read);

    let deleted = view.filter(filter(json!({"id__in": [2, 3]}))).delete().await?;
    assert_eq!(deleted, 2);
    assert_eq!(ids(&view.fetch()), vec![json!(1), json!(4), created["id"].clone()]);

    // Another client removed row 4; no event reached us
    f.executor.set_server_rows(rows(vec![json!({"id": 1}), created.clone().into()]));
    gate.add_permits(1);
    settle().await;

    assert_eq!(ids(&view.fetch()), vec![json!(1), created["id"].clone()]);
    assert!(view.created_items().contains(&created_pk));
    Ok(())
}

/// A single-row delete does not sweep.
#[tokio::test]
async fn single_delete_does_not_sweep() -> Result<()> {
    let f = fixture(vec![json!({"id": 1}), json!({"id": 2})]).await;
    let view = f.client.live_view(todo_options()).await?;
    let reads_before = f.executor.queries_of(QueryKind::Read).len();

    view.filter(filter(json!({"id": 1}))).delete().await?;
    settle().await;

    assert_eq!(f.executor.queries_of(QueryKind::Read).len(), reads_before);
    assert_eq!(ids(&view.fetch()), vec![json!(2)]);
    Ok(())
}

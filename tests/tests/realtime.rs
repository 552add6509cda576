use anyhow::Result;
use futures::StreamExt;
use kiln_core::{
    connector::ConnectionState,
    error::{ChannelError, ErrorKind},
    proto::RecordId,
    ChangeEvent, ChangeKind, Client,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::*;

async fn next<T: kiln_core::Record>(stream: &mut kiln_core::ChangeStream<T>) -> Result<ChangeEvent<T>> {
    let item = timeout(Duration::from_secs(2), stream.next()).await?.ok_or_else(|| anyhow::anyhow!("stream ended"))?;
    Ok(item?)
}

#[tokio::test]
async fn callback_sees_insert_update_delete_in_order() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let seen = Collector::<ChangeEvent<Alert>>::new();
    let handle = alerts.subscribe(seen.callback(), None).await?;
    assert_eq!(handle.topic(), "realtime:public:alerts");

    let alert = alerts.create(&new_alert("Line 4", 4, "active")).await?;
    let cleared = alerts.update(alert.id, &json!({ "status": "cleared" })).await?;
    alerts.delete(alert.id).await?;

    let events = seen.wait_for(3).await;
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]);
    assert_eq!(events[0].record.as_ref(), Some(&alert));
    assert_eq!(events[1].record.as_ref(), Some(&cleared));
    // the delete carries only the key of the old row
    assert_eq!(events[2].id, Some(RecordId::from(alert.id)));
    assert_eq!(events[2].record, None);
    assert!(events.iter().all(|e| e.collection.as_str() == "alerts"));

    handle.close();
    Ok(())
}

#[tokio::test]
async fn filter_narrows_delivery() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let mut line4 = alerts.changes(Some("site=eq.Line 4")).await?;
    alerts.create(&new_alert("Kiln 2", 2, "active")).await?;
    let wanted = alerts.create(&new_alert("Line 4", 1, "active")).await?;

    let event = next(&mut line4).await?;
    assert_eq!(event.kind, ChangeKind::Insert);
    assert_eq!(event.record, Some(wanted));
    Ok(())
}

#[tokio::test]
async fn other_collections_do_not_leak_in() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;

    let mut alerts = client.table::<Alert>("alerts").changes(None).await?;
    client.table::<Product>("products").create(&json!({ "sku": "GYP-1", "name": "Gypsum", "price": 2.0 })).await?;
    let alert = client.table::<Alert>("alerts").create(&new_alert("Packing", 2, "active")).await?;

    assert_eq!(next(&mut alerts).await?.record, Some(alert));
    Ok(())
}

#[tokio::test]
async fn invalid_rows_surface_as_errors_without_closing() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let mut alerts = client.table::<Alert>("alerts").changes(None).await?;

    client.table::<Value>("alerts").create(&json!({ "site": "Line 4", "level": 7, "status": "active" })).await?;
    let valid = client.table::<Alert>("alerts").create(&new_alert("Line 4", 2, "active")).await?;

    let err = timeout(Duration::from_secs(2), alerts.next()).await?.expect("an item").unwrap_err();
    assert!(matches!(&err, ChannelError::InvalidPayload(reason) if reason.contains("out of range")), "{err}");
    assert_eq!(next(&mut alerts).await?.record, Some(valid));
    Ok(())
}

#[tokio::test]
async fn closed_handle_receives_nothing() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let seen = Collector::<ChangeEvent<Alert>>::new();
    let handle = alerts.subscribe(seen.callback(), None).await?;
    alerts.create(&new_alert("Line 4", 1, "active")).await?;
    assert_eq!(seen.wait_for(1).await.len(), 1);

    handle.close();
    assert!(handle.is_closed());
    // closing twice is harmless
    handle.close();

    alerts.create(&new_alert("Line 4", 2, "active")).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.len(), 0);
    Ok(())
}

#[tokio::test]
async fn stream_reports_a_server_close() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let mut alerts = client.table::<Alert>("alerts").changes(None).await?;
    assert_eq!(alerts.state(), ConnectionState::Joined);

    server.close_realtime(Some("maintenance window"));

    let item = timeout(Duration::from_secs(2), alerts.next()).await?;
    assert_eq!(item.map(|r| r.map(|e| e.kind)), Some(Err(ChannelError::Closed(Some("maintenance window".into())))));
    assert!(timeout(Duration::from_secs(2), alerts.next()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_table_join_is_rejected() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;

    let err = client.table::<Alert>("no_such_table").changes(None).await.unwrap_err();
    assert!(matches!(err, ChannelError::Rejected(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Channel);
    Ok(())
}

#[tokio::test]
async fn protected_table_join_needs_a_session() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let payroll = client.table::<Value>("payroll");

    assert!(matches!(payroll.changes(None).await.unwrap_err(), ChannelError::Rejected(_)));

    client.sign_up("accounts@plant.example", "ledger-77", json!({})).await?;
    let mut stream = payroll.changes(None).await?;
    payroll.create(&json!({ "employee": "R. Chen", "amount": 3900 })).await?;
    assert_eq!(next(&mut stream).await?.kind, ChangeKind::Insert);
    Ok(())
}

#[tokio::test]
async fn without_connector_realtime_is_unavailable() -> Result<()> {
    let server = start_backend().await?;
    let client = Client::new(config_for(&server))?;
    let err = client.table::<Alert>("alerts").changes(None).await.unwrap_err();
    assert_eq!(err, ChannelError::Unavailable);
    Ok(())
}

#[tokio::test]
async fn unreachable_realtime_is_a_connect_error() -> Result<()> {
    let server = start_backend().await?;
    let mut config = config_for(&server);
    config.realtime_url = Some("ws://127.0.0.1:1/realtime/v1".into());
    let client = with_realtime(Client::new(config)?)?;

    let err = client.table::<Alert>("alerts").changes(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network, "{err}");
    Ok(())
}

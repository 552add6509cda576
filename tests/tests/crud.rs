use anyhow::Result;
use kiln_core::{
    error::{ErrorKind, MutationError, RetrievalError},
    proto::RecordId,
    QueryOptions,
};
use serde_json::{json, Value};

mod common;
use common::*;

#[tokio::test]
async fn create_then_find() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let created = alerts.create(&new_alert("Line 4", 3, "active")).await?;
    assert_eq!((created.site.as_str(), created.level, created.status.as_str()), ("Line 4", 3, "active"));

    let found = alerts.find_by_id(created.id).await?;
    assert_eq!(found, Some(created.clone()));

    let updated = alerts.update(created.id, &json!({ "status": "cleared", "note": "reset by operator" })).await?;
    assert_eq!(updated.status, "cleared");
    assert_eq!(updated.note.as_deref(), Some("reset by operator"));
    assert_eq!(updated.site, "Line 4");

    alerts.delete(created.id).await?;
    assert_eq!(alerts.find_by_id(created.id).await?, None);
    Ok(())
}

#[tokio::test]
async fn find_all_is_a_conjunction_of_equalities() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    alerts.bulk_insert(&[new_alert("Line 4", 3, "active"), new_alert("Line 4", 1, "cleared"), new_alert("Kiln 2", 3, "active")]).await?;

    let active_line4 = alerts.find_all(&QueryOptions::new().eq("site", "Line 4").eq("status", "active")).await?;
    assert_eq!(active_line4.len(), 1);
    assert_eq!(active_line4[0].level, 3);

    let level3 = alerts.find_all(&QueryOptions::new().eq("level", 3)).await?;
    let mut sites: Vec<_> = level3.iter().map(|a| a.site.as_str()).collect();
    sites.sort();
    assert_eq!(sites, ["Kiln 2", "Line 4"]);

    assert!(alerts.find_all(&QueryOptions::new().eq("site", "Packing")).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn ordering_and_paging() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let products = client.table::<Product>("products");

    let drafts: Vec<Value> = (1..=7).map(|i| json!({ "sku": format!("CEM-{:02}", i), "name": format!("Cement grade {}", i), "price": i as f64 * 10.0 })).collect();
    products.bulk_insert(&drafts).await?;

    let page = products.find_all(&QueryOptions::new().order_by("price", false).limit(3).offset(2)).await?;
    let skus: Vec<_> = page.iter().map(|p| p.sku.as_str()).collect();
    assert_eq!(skus, ["CEM-05", "CEM-04", "CEM-03"]);

    // an offset alone still pages by the configured default
    let tail = products.find_all(&QueryOptions::new().order_by("sku", true).offset(5)).await?;
    assert_eq!(tail.iter().map(|p| p.sku.as_str()).collect::<Vec<_>>(), ["CEM-06", "CEM-07"]);

    assert_eq!(products.count(&QueryOptions::new()).await?, 7);
    assert_eq!(products.count(&QueryOptions::new().eq("sku", "CEM-03")).await?, 1);
    assert_eq!(products.count(&QueryOptions::new().eq("sku", "none")).await?, 0);
    Ok(())
}

#[tokio::test]
async fn delete_is_idempotent() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let alert = alerts.create(&new_alert("Kiln 2", 2, "active")).await?;
    alerts.delete(alert.id).await?;
    alerts.delete(alert.id).await?;
    alerts.delete(RecordId::from(9_999)).await?;
    assert_eq!(alerts.count(&QueryOptions::new()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let err = alerts.update(404, &json!({ "status": "cleared" })).await.unwrap_err();
    assert_eq!(err, MutationError::NotFound("404".into()));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn constraint_violations_are_classified() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let products = client.table::<Product>("products");

    products.create(&json!({ "sku": "CLK-1", "name": "Clinker", "price": 4.5 })).await?;

    let duplicate = products.create(&json!({ "sku": "CLK-1", "name": "Clinker again", "price": 5.0 })).await.unwrap_err();
    assert_eq!(duplicate.kind(), ErrorKind::Conflict, "{duplicate}");

    let missing = products.create(&json!({ "sku": "CLK-2", "price": 5.0 })).await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::Validation, "{missing}");

    // a failing batch leaves nothing behind
    let batch = [json!({ "sku": "SLG-1", "name": "Slag", "price": 1.0 }), json!({ "sku": "CLK-1", "name": "Clash", "price": 1.0 })];
    assert_eq!(products.bulk_insert(&batch).await.unwrap_err().kind(), ErrorKind::Conflict);
    assert_eq!(products.count(&QueryOptions::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn bulk_update_reports_failures_per_item() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let alerts = client.table::<Alert>("alerts");

    let created = alerts.bulk_insert(&[new_alert("A", 1, "active"), new_alert("B", 1, "active"), new_alert("C", 1, "active"), new_alert("D", 1, "active")]).await?;
    assert_eq!(created.len(), 4);

    let mut updates: Vec<(RecordId, Value)> = created.iter().map(|a| (a.id.into(), json!({ "status": "cleared" }))).collect();
    updates.push((RecordId::from(12_345), json!({ "status": "cleared" })));

    let outcome = alerts.bulk_update(updates).await;
    assert!(!outcome.is_complete());
    assert_eq!(outcome.updated.len(), 4);
    assert!(outcome.updated.iter().all(|a| a.status == "cleared"));
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].id, RecordId::from(12_345));
    assert_eq!(outcome.failed[0].error.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn empty_bulk_insert_makes_no_request() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    // the table does not exist, so any request would fail
    let missing = client.table::<Alert>("no_such_table");
    assert_eq!(missing.bulk_insert::<Value>(&[]).await?, Vec::new());
    Ok(())
}

#[tokio::test]
async fn error_payload_is_never_a_row() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let log = client.table::<LogEntry>("maintenance_log");

    log.create(&json!({ "message": "Bearing temperature high", "code": "B-17" })).await?;

    // every field of LogEntry is optional, yet an error body never comes back as an entry
    let err = log.find_all(&QueryOptions::new().eq("severity", "high")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query, "{err}");
    assert!(err.to_string().contains("severity"), "{err}");

    // rows projected down to message and code are still rows
    let projected = log.find_all(&QueryOptions::new().select(["message", "code"])).await?;
    assert_eq!(projected, vec![LogEntry { id: None, message: Some("Bearing temperature high".into()), code: Some("B-17".into()) }]);

    let rows = log.find_all(&QueryOptions::new()).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].code.as_deref(), Some("B-17"));
    Ok(())
}

#[tokio::test]
async fn rows_failing_validation_reject_the_result() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;

    client.table::<Value>("alerts").create(&json!({ "site": "Line 9", "level": 9, "status": "active" })).await?;
    client.table::<Value>("alerts").create(&json!({ "site": "Line 1", "level": 1, "status": "active" })).await?;

    let err = client.table::<Alert>("alerts").find_all(&QueryOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(err.to_string().contains("out of range"), "{err}");
    Ok(())
}

#[tokio::test]
async fn unknown_table_and_column_are_query_errors() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;

    let err = client.table::<Alert>("no_such_table").find_all(&QueryOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query, "{err}");

    let err = client.table::<Alert>("alerts").find_all(&QueryOptions::new().eq("colour", "red")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query, "{err}");

    let err = client.table::<Alert>("alerts").find_all(&QueryOptions::new().eq("limit", 3)).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Query(_)));
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() -> Result<()> {
    let server = start_backend().await?;
    let config = config_for(&server);
    drop(server);
    // give the aborted listener a moment to release the port
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = kiln_core::Client::new(config)?;
    let err = client.table::<Alert>("alerts").find_all(&QueryOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network, "{err}");
    Ok(())
}

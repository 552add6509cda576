use anyhow::Result;
use serde_json::{json, Value};

mod common;
use common::*;

// One test only: the process-wide client can be initialized once per binary
#[tokio::test]
async fn process_wide_client() -> Result<()> {
    let server = start_backend().await?;
    assert!(matches!(kiln::client(), Err(kiln::Error::NotInitialized)));
    assert!(matches!(kiln::sign_out().await, Err(kiln::Error::NotInitialized)));

    let client = kiln::initialize(config_for(&server))?;
    // a second call hands back the same client, even with other settings
    let again = kiln::initialize(config_for(&server).with_schema("archive"))?;
    assert_eq!(again.config(), client.config());

    kiln::sign_up("control-room@plant.example", "setpoint-9", json!({ "role": "operator" })).await?;
    assert!(kiln::get_session().await?.is_some());

    let seen = Collector::<kiln::ChangeEvent<Value>>::new();
    let handle = kiln::subscribe_to_collection("alerts", seen.callback(), Some("status=eq.active")).await?;

    let alerts = kiln::table::<Alert>("alerts")?;
    let raised = alerts.create(&new_alert("Kiln 2", 5, "active")).await?;
    alerts.create(&new_alert("Kiln 2", 1, "cleared")).await?;

    let events = seen.wait_for(1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, kiln::ChangeKind::Insert);
    assert_eq!(events[0].record.as_ref().map(|r| r["id"].clone()), Some(json!(raised.id)));
    handle.close();

    kiln::sign_out().await?;
    assert_eq!(kiln::get_session().await?, None);
    Ok(())
}

use anyhow::Result;
use kiln_core::{error::ErrorKind, proto::RecordId, AuthState, Client, QueryOptions};
use serde_json::{json, Value};

mod common;
use common::*;

#[tokio::test]
async fn sign_up_sign_in_sign_out() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    assert_eq!(client.get_session().await?, None);

    let signed_up = client.sign_up("shift-lead@plant.example", "clinker-42", json!({ "site": "Line 4" })).await?;
    let session = signed_up.session.expect("no confirmation required");
    assert_eq!(signed_up.user.user_metadata["site"], "Line 4");
    assert_eq!(client.get_session().await?, Some(session.clone()));
    assert_eq!(*client.auth_state().borrow(), AuthState::SignedIn(session.user.clone()));

    client.sign_out().await?;
    assert_eq!(client.get_session().await?, None);
    assert_eq!(*client.auth_state().borrow(), AuthState::SignedOut);
    // the revoked refresh token is gone server side too
    assert!(server.state().auth.refresh_grant(&session.refresh_token).is_err());

    let again = client.sign_in("shift-lead@plant.example", "clinker-42").await?;
    assert_eq!(again.user.id, session.user.id);
    assert_ne!(again.access_token, session.access_token);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_an_auth_error_with_the_reason() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    client.sign_up("operator@plant.example", "correct-horse", json!({})).await?;
    client.sign_out().await?;

    let err = client.sign_in("operator@plant.example", "battery-staple").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.to_string(), "Invalid login credentials");
    assert_eq!(client.get_session().await?, None);

    let weak = client.sign_up("new@plant.example", "123", json!({})).await.unwrap_err();
    assert_eq!(weak.kind(), ErrorKind::Auth);
    Ok(())
}

#[tokio::test]
async fn sign_up_awaiting_confirmation_has_no_session() -> Result<()> {
    let server = start_backend_with(|b| b.require_confirmation(true)).await?;
    let client = client_for(&server)?;

    let signed_up = client.sign_up("pending@plant.example", "welcome-1", json!({})).await?;
    assert_eq!(signed_up.session, None);
    assert_eq!(signed_up.user.email.as_deref(), Some("pending@plant.example"));
    assert_eq!(client.get_session().await?, None);
    Ok(())
}

#[tokio::test]
async fn session_survives_a_restart() -> Result<()> {
    let server = start_backend().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");

    let first = with_realtime(Client::new(config_for(&server).with_session_path(&path))?)?;
    let session = first.sign_in_or_up().await?;
    drop(first);

    // a fresh client on the same path picks the session up without signing in
    let second = with_realtime(Client::new(config_for(&server).with_session_path(&path))?)?;
    assert_eq!(second.get_session().await?, Some(session));

    second.sign_out().await?;
    assert!(!path.exists());
    let third = Client::new(config_for(&server).with_session_path(&path))?;
    assert_eq!(third.get_session().await?, None);
    Ok(())
}

#[tokio::test]
async fn expired_session_is_refreshed_on_use() -> Result<()> {
    // tokens expire inside the refresh margin, so every use refreshes
    let server = start_backend_with(|b| b.token_ttl(5)).await?;
    let client = client_for(&server)?;
    let signed_in = client.sign_in_or_up().await?;

    let current = client.get_session().await?.expect("still signed in");
    assert_eq!(current.user, signed_in.user);
    assert_ne!(current.access_token, signed_in.access_token);
    assert_ne!(current.refresh_token, signed_in.refresh_token);

    let refreshed = client.refresh_session().await?;
    assert_ne!(refreshed.access_token, current.access_token);
    Ok(())
}

#[tokio::test]
async fn concurrent_use_of_an_expired_session_refreshes_once() -> Result<()> {
    let server = start_backend_with(|b| b.token_ttl(5)).await?;
    let client = client_for(&server)?;
    let signed_in = client.sign_in_or_up().await?;

    let (a, b, c) = tokio::join!(client.get_session(), client.get_session(), client.get_session());
    let (a, b, c) = (a?.expect("signed in"), b?.expect("signed in"), c?.expect("signed in"));
    assert_ne!(a.access_token, signed_in.access_token);
    assert_eq!(a.access_token, b.access_token);
    assert_eq!(b.access_token, c.access_token);

    assert_eq!(client.get_session().await?.map(|s| s.user), Some(signed_in.user.clone()));
    assert_eq!(*client.auth_state().borrow(), AuthState::SignedIn(signed_in.user));
    Ok(())
}

#[tokio::test]
async fn bulk_update_with_an_expired_session_keeps_it() -> Result<()> {
    let server = start_backend_with(|b| b.token_ttl(5)).await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let client = Client::new(config_for(&server).with_session_path(&path))?;
    let signed_in = client.sign_in_or_up().await?;

    let alerts = client.table::<Alert>("alerts");
    let created = alerts.bulk_insert(&[new_alert("A", 1, "active"), new_alert("B", 1, "active"), new_alert("C", 1, "active"), new_alert("D", 1, "active")]).await?;
    let updates: Vec<(RecordId, Value)> = created.iter().map(|a| (a.id.into(), json!({ "status": "cleared" }))).collect();
    let outcome = alerts.bulk_update(updates).await;
    assert!(outcome.is_complete(), "{:?}", outcome.failed);
    assert_eq!(outcome.updated.len(), 4);

    assert!(path.exists());
    assert_eq!(client.get_session().await?.map(|s| s.user), Some(signed_in.user));
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_signs_out_locally() -> Result<()> {
    let server = start_backend_with(|b| b.token_ttl(5)).await?;
    let client = client_for(&server)?;
    let session = client.sign_in_or_up().await?;

    // revoke behind the client's back
    server.state().auth.logout(&session.access_token).map_err(|f| anyhow::anyhow!("{}", f.body))?;

    assert_eq!(client.get_session().await?, None);
    assert_eq!(*client.auth_state().borrow(), AuthState::SignedOut);
    Ok(())
}

#[tokio::test]
async fn refresh_without_session() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let err = client.refresh_session().await.unwrap_err();
    assert_eq!(err.to_string(), "not signed in");
    // signing out while signed out is fine
    client.sign_out().await?;
    Ok(())
}

#[tokio::test]
async fn protected_table_needs_a_session() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let payroll = client.table::<Value>("payroll");

    let err = payroll.find_all(&QueryOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth, "{err}");
    let err = payroll.create(&json!({ "employee": "M. Ortiz", "amount": 4200 })).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth, "{err}");

    client.sign_in_or_up().await?;
    let row = payroll.create(&json!({ "employee": "M. Ortiz", "amount": 4200 })).await?;
    assert_eq!(row["employee"], "M. Ortiz");
    assert_eq!(payroll.find_all(&QueryOptions::new()).await?, vec![row]);

    client.sign_out().await?;
    assert_eq!(payroll.count(&QueryOptions::new()).await.unwrap_err().kind(), ErrorKind::Auth);
    Ok(())
}

trait SignInOrUp {
    async fn sign_in_or_up(&self) -> Result<kiln_core::Session>;
}

impl SignInOrUp for Client {
    async fn sign_in_or_up(&self) -> Result<kiln_core::Session> {
        const EMAIL: &str = "maintenance@plant.example";
        const PASSWORD: &str = "rotary-kiln";
        match self.sign_in(EMAIL, PASSWORD).await {
            Ok(session) => Ok(session),
            Err(_) => Ok(self.sign_up(EMAIL, PASSWORD, json!({})).await?.session.ok_or_else(|| anyhow::anyhow!("sign up returned no session"))?),
        }
    }
}

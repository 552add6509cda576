//! Authentication state.
//!
//! A [`SessionContext`] is the one owner of the authenticated principal and its
//! tokens. It is passed down explicitly (every `Client` carries one) rather than
//! living in a global, so tests can run side by side with independent sessions.

pub mod store;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

use chrono::Utc;
use kiln_proto::{PasswordGrant, RefreshGrant, SignUpRequest, SignUpResponse, TokenBundle, User};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::{
    error::{AuthError, TransportError},
    transport::{read_json, Rest},
};

/// A session this close to expiry is refreshed before use
pub const EXPIRY_MARGIN_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Unix seconds
    pub expires_at: i64,
    pub user: User,
}

impl Session {
    pub fn from_tokens(bundle: TokenBundle) -> Self {
        let expires_at = bundle.expires_at.unwrap_or_else(|| Utc::now().timestamp() + bundle.expires_in);
        Self { access_token: bundle.access_token, refresh_token: bundle.refresh_token, token_type: bundle.token_type, expires_at, user: bundle.user }
    }

    pub fn is_expired(&self) -> bool { Utc::now().timestamp() + EXPIRY_MARGIN_SECS >= self.expires_at }
}

/// Published whenever the session changes
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    SignedOut,
    SignedIn(User),
}

/// Outcome of a sign-up. `session` is absent when the backend wants the address confirmed first.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub user: User,
    pub session: Option<Session>,
}

enum Slot {
    /// The store has not been consulted yet
    Unloaded,
    Loaded(Option<Session>),
}

#[derive(Clone)]
pub struct SessionContext(Arc<Inner>);

struct Inner {
    rest: Rest,
    auth_url: String,
    slot: RwLock<Slot>,
    store: Arc<dyn SessionStore>,
    state: watch::Sender<AuthState>,
}

impl SessionContext {
    pub(crate) fn new(rest: Rest, auth_url: String, store: Arc<dyn SessionStore>) -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        Self(Arc::new(Inner { rest, auth_url, slot: RwLock::new(Slot::Unloaded), store, state }))
    }

    /// Watch sign-in and sign-out transitions
    pub fn auth_state(&self) -> watch::Receiver<AuthState> { self.0.state.subscribe() }

    /// The current session, rehydrated from the store on first use.
    ///
    /// An expired session is refreshed with one round trip. Concurrent callers share that
    /// refresh. If the backend rejects it the session is discarded and `Ok(None)` is returned;
    /// a network failure is an error.
    pub async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        match self.current().await? {
            Some(session) if session.is_expired() => self.refresh_expired(&session).await,
            other => Ok(other),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let grant = PasswordGrant { email: email.to_string(), password: password.to_string() };
        let builder = self.anon_request(Method::POST, "token").query(&[("grant_type", "password")]).json(&grant);
        let bundle: TokenBundle = read_json(self.0.rest.send(builder).await?).await?;

        let session = Session::from_tokens(bundle);
        self.install(&session).await?;
        info!("Signed in as {}", session.user.id);
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str, attributes: serde_json::Value) -> Result<SignUp, AuthError> {
        let request = SignUpRequest { email: email.to_string(), password: password.to_string(), data: attributes };
        let builder = self.anon_request(Method::POST, "signup").json(&request);
        let response: SignUpResponse = read_json(self.0.rest.send(builder).await?).await?;

        match response {
            SignUpResponse::Session(bundle) => {
                let session = Session::from_tokens(bundle);
                self.install(&session).await?;
                info!("Signed up and signed in as {}", session.user.id);
                Ok(SignUp { user: session.user.clone(), session: Some(session) })
            }
            SignUpResponse::User(user) => {
                info!("Signed up {}, awaiting confirmation", user.id);
                Ok(SignUp { user, session: None })
            }
        }
    }

    /// Revoke the session remotely and forget it locally.
    ///
    /// Local state is cleared even when the remote call fails; a token the backend no
    /// longer recognises is not an error.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = match self.current().await? {
            Some(session) => {
                let builder = self.0.rest.request(Method::POST, &self.endpoint("logout"), &session.access_token);
                match self.0.rest.send(builder).await {
                    Ok(_) => Ok(()),
                    Err(TransportError::Remote(failure)) if matches!(failure.status, 401 | 403 | 404) => {
                        debug!("Logout for {} answered {}, token already invalid", session.user.id, failure.status);
                        Ok(())
                    }
                    Err(e) => Err(AuthError::from(e)),
                }
            }
            None => Ok(()),
        };
        self.uninstall().await?;
        info!("Signed out");
        result
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        self.current().await?;
        let mut slot = self.0.slot.write().await;
        let session = loaded(&slot).ok_or(AuthError::NotSignedIn)?;
        self.refresh_locked(&mut slot, &session.refresh_token).await
    }

    /// The token to present on data requests: the session's, or the anon key when signed out
    pub(crate) async fn bearer(&self) -> Result<String, AuthError> {
        Ok(match self.get_session().await? {
            Some(session) => session.access_token,
            None => self.0.rest.api_key().to_string(),
        })
    }

    // Refresh tokens are single use, so only one refresh may be in flight. A caller that
    // waited on the lock finds the slot already rotated and takes the new session.
    async fn refresh_expired(&self, expired: &Session) -> Result<Option<Session>, AuthError> {
        let mut slot = self.0.slot.write().await;
        match loaded(&slot) {
            Some(current) if current.refresh_token == expired.refresh_token => {}
            other => return Ok(other),
        }

        debug!("Session for {} expired at {}, refreshing", expired.user.id, expired.expires_at);
        match self.refresh_locked(&mut slot, &expired.refresh_token).await {
            Ok(session) => Ok(Some(session)),
            Err(AuthError::Rejected(reason)) => {
                info!("Session refresh rejected ({}), signing out locally", reason);
                self.uninstall_locked(&mut slot).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_locked(&self, slot: &mut Slot, refresh_token: &str) -> Result<Session, AuthError> {
        let grant = RefreshGrant { refresh_token: refresh_token.to_string() };
        let builder = self.anon_request(Method::POST, "token").query(&[("grant_type", "refresh_token")]).json(&grant);
        let bundle: TokenBundle = read_json(self.0.rest.send(builder).await?).await?;

        let session = Session::from_tokens(bundle);
        self.install_locked(slot, &session).await?;
        debug!("Refreshed session for {}", session.user.id);
        Ok(session)
    }

    async fn current(&self) -> Result<Option<Session>, AuthError> {
        if let Slot::Loaded(session) = &*self.0.slot.read().await {
            return Ok(session.clone());
        }

        let mut slot = self.0.slot.write().await;
        if let Slot::Loaded(session) = &*slot {
            return Ok(session.clone());
        }
        let session = self.0.store.load().await?;
        if let Some(session) = &session {
            info!("Rehydrated session for {}", session.user.id);
            self.0.state.send_replace(AuthState::SignedIn(session.user.clone()));
        }
        *slot = Slot::Loaded(session.clone());
        Ok(session)
    }

    async fn install(&self, session: &Session) -> Result<(), AuthError> {
        let mut slot = self.0.slot.write().await;
        self.install_locked(&mut slot, session).await
    }

    // Persist first so memory never holds a session the store does not
    async fn install_locked(&self, slot: &mut Slot, session: &Session) -> Result<(), AuthError> {
        self.0.store.save(session).await?;
        *slot = Slot::Loaded(Some(session.clone()));
        self.0.state.send_replace(AuthState::SignedIn(session.user.clone()));
        Ok(())
    }

    async fn uninstall(&self) -> Result<(), AuthError> {
        let mut slot = self.0.slot.write().await;
        self.uninstall_locked(&mut slot).await
    }

    async fn uninstall_locked(&self, slot: &mut Slot) -> Result<(), AuthError> {
        *slot = Slot::Loaded(None);
        self.0.state.send_replace(AuthState::SignedOut);
        if let Err(e) = self.0.store.clear().await {
            warn!("Failed to clear persisted session: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String { format!("{}/{}", self.0.auth_url, path) }

    fn anon_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let key = self.0.rest.api_key().to_string();
        self.0.rest.request(method, &self.endpoint(path), &key)
    }
}

fn loaded(slot: &Slot) -> Option<Session> {
    match slot {
        Slot::Loaded(session) => session.clone(),
        Slot::Unloaded => None,
    }
}

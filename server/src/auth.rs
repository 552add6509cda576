use chrono::Utc;
use kiln_proto::{ErrorBody, SignUpResponse, TokenBundle, User};
use std::{collections::HashMap, sync::Mutex};
use tracing::{debug, info};
use ulid::Ulid;

use crate::backend::Failure;

const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    user: User,
    password: String,
}

struct Grant {
    user_id: String,
    expires_at: i64,
    refresh_token: String,
}

/// Accounts and issued tokens
pub struct AuthService {
    token_ttl: i64,
    require_confirmation: bool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// by email
    accounts: HashMap<String, Account>,
    /// access token -> grant
    access: HashMap<String, Grant>,
    /// refresh token -> user id
    refresh: HashMap<String, String>,
}

impl AuthService {
    pub fn new(token_ttl: i64, require_confirmation: bool) -> Self { Self { token_ttl, require_confirmation, inner: Mutex::new(Inner::default()) } }

    /// Create an account. Returns a session unless confirmation is required.
    pub fn sign_up(&self, email: &str, password: &str, data: serde_json::Value) -> Result<SignUpResponse, Failure> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(auth_failure(422, "weak_password", format!("Password should be at least {} characters.", MIN_PASSWORD_LEN)));
        }
        let mut inner = self.lock();
        if inner.accounts.contains_key(email) {
            return Err(auth_failure(422, "user_already_exists", "User already registered"));
        }
        let user = User { id: Ulid::new().to_string(), email: Some(email.to_string()), user_metadata: data };
        inner.accounts.insert(email.to_string(), Account { user: user.clone(), password: password.to_string() });
        info!("Registered {} as {}", email, user.id);

        if self.require_confirmation {
            return Ok(SignUpResponse::User(user));
        }
        Ok(SignUpResponse::Session(self.issue(&mut inner, user)))
    }

    pub fn password_grant(&self, email: &str, password: &str) -> Result<TokenBundle, Failure> {
        let mut inner = self.lock();
        let user = match inner.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(invalid_grant("Invalid login credentials")),
        };
        Ok(self.issue(&mut inner, user))
    }

    /// Exchange a refresh token. Refresh tokens are single use.
    pub fn refresh_grant(&self, refresh_token: &str) -> Result<TokenBundle, Failure> {
        let mut inner = self.lock();
        let user_id = inner.refresh.remove(refresh_token).ok_or_else(|| invalid_grant("Invalid Refresh Token: Refresh Token Not Found"))?;
        inner.access.retain(|_, grant| grant.refresh_token != refresh_token);
        let user = inner.accounts.values().find(|a| a.user.id == user_id).map(|a| a.user.clone()).ok_or_else(|| invalid_grant("User not found"))?;
        debug!("Refreshed tokens for {}", user.id);
        Ok(self.issue(&mut inner, user))
    }

    /// Revoke the session an access token belongs to
    pub fn logout(&self, access_token: &str) -> Result<(), Failure> {
        let mut inner = self.lock();
        let grant = inner.access.remove(access_token).ok_or_else(|| auth_failure(401, "bad_jwt", "invalid JWT: unable to parse or verify signature"))?;
        inner.refresh.remove(&grant.refresh_token);
        info!("Logged out {}", grant.user_id);
        Ok(())
    }

    /// The user an unexpired access token was issued to
    pub fn verify(&self, access_token: &str) -> Option<String> {
        let inner = self.lock();
        let grant = inner.access.get(access_token)?;
        (grant.expires_at > Utc::now().timestamp()).then(|| grant.user_id.clone())
    }

    fn issue(&self, inner: &mut Inner, user: User) -> TokenBundle {
        let access_token = format!("at-{}", Ulid::new());
        let refresh_token = format!("rt-{}", Ulid::new());
        let expires_at = Utc::now().timestamp() + self.token_ttl;
        inner.access.insert(access_token.clone(), Grant { user_id: user.id.clone(), expires_at, refresh_token: refresh_token.clone() });
        inner.refresh.insert(refresh_token.clone(), user.id.clone());
        TokenBundle { access_token, token_type: "bearer".to_string(), expires_in: self.token_ttl, expires_at: Some(expires_at), refresh_token, user }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
}

fn invalid_grant(description: &str) -> Failure {
    Failure { status: 400, body: ErrorBody { error: Some("invalid_grant".into()), error_description: Some(description.into()), ..Default::default() } }
}

fn auth_failure(status: u16, code: &str, msg: impl Into<String>) -> Failure {
    Failure { status, body: ErrorBody { msg: Some(msg.into()), code: Some(code.into()), ..Default::default() } }
}

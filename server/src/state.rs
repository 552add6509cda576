use axum::http::HeaderMap;
use std::{ops::Deref, sync::Arc};

use kiln_proto::ErrorBody;

use crate::{
    auth::AuthService,
    backend::{Backend, Failure, TableSpec},
    objects::ObjectStore,
};

/// Who is making a request
#[derive(Debug, Clone, PartialEq)]
pub enum Caller {
    Anonymous,
    User(String),
}

#[derive(Clone)]
pub struct ServerState(Arc<ServerStateInner>);

pub struct ServerStateInner {
    pub anon_key: String,
    pub backend: Backend,
    pub auth: AuthService,
    pub objects: ObjectStore,
}

impl ServerState {
    pub fn new(anon_key: String, backend: Backend, auth: AuthService) -> Self {
        Self(Arc::new(ServerStateInner { anon_key, backend, auth, objects: ObjectStore::default() }))
    }

    pub fn check_api_key(&self, headers: &HeaderMap) -> Result<(), Failure> {
        match headers.get("apikey").and_then(|v| v.to_str().ok()) {
            Some(key) if key == self.anon_key => Ok(()),
            _ => Err(Failure { status: 401, body: ErrorBody::new("Invalid API key") }),
        }
    }

    /// Check the api key and resolve the bearer token of a request
    pub fn caller(&self, headers: &HeaderMap) -> Result<Caller, Failure> {
        self.check_api_key(headers)?;
        match bearer(headers) {
            None => Ok(Caller::Anonymous),
            Some(token) => self.token_caller(token),
        }
    }

    pub fn token_caller(&self, token: &str) -> Result<Caller, Failure> {
        if token == self.anon_key {
            return Ok(Caller::Anonymous);
        }
        self.auth.verify(token).map(Caller::User).ok_or_else(|| Failure::new(401, "PGRST301", "JWT expired"))
    }

    /// Refuse anonymous callers on protected tables
    pub fn admit(&self, caller: &Caller, spec: &TableSpec) -> Result<(), Failure> {
        match (caller, spec.protected) {
            (Caller::Anonymous, true) => Err(Failure::new(401, "42501", format!("permission denied for table {}", spec.name))),
            _ => Ok(()),
        }
    }
}

impl Deref for ServerState {
    type Target = ServerStateInner;
    fn deref(&self) -> &Self::Target { &self.0 }
}

pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
}

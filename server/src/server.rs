use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::{
    auth::AuthService,
    backend::{Backend, TableSpec},
    rest,
    state::ServerState,
    ws_server::ws_handler,
};

pub const DEFAULT_ANON_KEY: &str = "anon-key";
pub const DEFAULT_TOKEN_TTL: i64 = 3600;

pub struct Server {
    bind_address: String,
    state: ServerState,
}

impl Server {
    pub fn builder() -> ServerBuilder { ServerBuilder::default() }

    pub fn state(&self) -> &ServerState { &self.state }

    fn app(&self) -> Router {
        rest::router().route("/realtime/v1/websocket", get(ws_handler)).with_state(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .into_inner(),
        )
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        info!("listening on {}", listener.local_addr()?);
        axum::serve(listener, self.app()).await?;
        Ok(())
    }

    /// Bind and serve in the background. The server stops when the handle is dropped.
    pub async fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        let addr = listener.local_addr()?;
        let app = self.app();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("server on {} failed: {}", addr, e);
            }
        });
        info!("listening on {}", addr);
        Ok(ServerHandle { addr, state: self.state, task })
    }
}

pub struct ServerHandle {
    addr: SocketAddr,
    state: ServerState,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Base url for the REST, auth and storage endpoints
    pub fn url(&self) -> String { format!("http://{}", self.addr) }

    /// Base url of the realtime endpoint
    pub fn realtime_url(&self) -> String { format!("ws://{}/realtime/v1", self.addr) }

    pub fn anon_key(&self) -> &str { &self.state.anon_key }

    pub fn state(&self) -> &ServerState { &self.state }

    /// Close every realtime channel, as a server shutting down would
    pub fn close_realtime(&self, reason: Option<&str>) { self.state.backend.close_realtime(reason.map(str::to_string)) }
}

impl Drop for ServerHandle {
    fn drop(&mut self) { self.task.abort(); }
}

pub struct ServerBuilder {
    bind_address: Option<String>,
    anon_key: String,
    schema: String,
    tables: Vec<TableSpec>,
    token_ttl: i64,
    require_confirmation: bool,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            bind_address: None,
            anon_key: DEFAULT_ANON_KEY.to_string(),
            schema: "public".to_string(),
            tables: Vec::new(),
            token_ttl: DEFAULT_TOKEN_TTL,
            require_confirmation: false,
        }
    }
}

impl ServerBuilder {
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = Some(addr.into());
        self
    }

    pub fn anon_key(mut self, key: impl Into<String>) -> Self {
        self.anon_key = key.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn table(mut self, spec: TableSpec) -> Self {
        self.tables.push(spec);
        self
    }

    /// Lifetime of issued access tokens in seconds
    pub fn token_ttl(mut self, seconds: i64) -> Self {
        self.token_ttl = seconds;
        self
    }

    /// Sign-ups return the bare user until confirmed, with no session
    pub fn require_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = require;
        self
    }

    pub fn build(self) -> Result<Server> {
        let bind_address = self.bind_address.ok_or_else(|| anyhow::anyhow!("bind_address is required"))?;
        if self.anon_key.is_empty() {
            anyhow::bail!("anon_key must not be empty");
        }
        let backend = Backend::new(self.schema, self.tables);
        let auth = AuthService::new(self.token_ttl, self.require_confirmation);
        Ok(Server { bind_address, state: ServerState::new(self.anon_key, backend, auth) })
    }
}

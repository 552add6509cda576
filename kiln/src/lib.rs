//! # Kiln
//!
//! Kiln gives typed, validated access to the tables of a hosted Postgres backend (a
//! REST query endpoint, an auth endpoint, a realtime websocket endpoint and object
//! storage), together with the signed-in session and live change streams.
//!
//! ## Core Concepts
//!
//! - **Collection**: A named remote table. Kiln never creates or drops one
//! - **Record**: A row shape, any serde type implementing [`Record`]
//! - **Table**: Typed CRUD and subscriptions over one collection
//! - **Session**: The authenticated principal and its tokens, owned by a [`Client`]
//! - **Change event**: One committed insert, update or delete, delivered in commit order
//!
//! ## Example
//!
//! ```rust,no_run
//! # use kiln::{Client, ClientConfig, QueryOptions, Record, RecordId};
//! # use serde::{Deserialize, Serialize};
//! #[derive(Debug, Serialize, Deserialize)]
//! pub struct Alert {
//!     id: i64,
//!     site: String,
//!     status: String,
//! }
//!
//! impl Record for Alert {
//!     fn id(&self) -> RecordId { self.id.into() }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = kiln::initialize(ClientConfig::from_env()?)?;
//!     client.sign_in("foreman@plant.example", "hunter22").await?;
//!
//!     let alerts = client.table::<Alert>("alerts");
//!     let active = alerts.find_all(&QueryOptions::new().eq("site", "Port").eq("status", "active")).await?;
//!     println!("{} active alerts at the port", active.len());
//!
//!     let _handle = alerts.subscribe(|change| println!("{} {:?}", change.kind, change.id), None).await?;
//! #   Ok(())
//! # }
//! ```
//!
//! [`Client`] can also be built directly and passed down explicitly; the process-wide
//! [`initialize`] below is a convenience over that.

pub use kiln_core as core;
pub use kiln_proto as proto;
pub use kiln_websocket_client as websocket;

pub use kiln_core::{
    bucket::Bucket,
    changes::{ChangeEvent, ChangeKind, ChangeStream, ChannelHandle},
    client::Client,
    config::ClientConfig,
    error,
    error::{AuthError, ChannelError, ConfigError, ErrorKind, MutationError, ObjectError, RetrievalError},
    query::QueryOptions,
    record::Record,
    session::{AuthState, Session, SignUp},
    table::{BulkFailure, BulkUpdate, Table},
};
pub use kiln_proto::{CollectionId, RecordId};
pub use kiln_websocket_client::WebsocketConnector;

use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

static CLIENT: OnceLock<Client> = OnceLock::new();

/// Errors from the process-wide convenience functions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("kiln::initialize has not been called")]
    NotInitialized,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Build the process-wide client, wired with the websocket realtime connector.
///
/// Idempotent: once a client exists it is returned as is. A later call with a different
/// configuration is logged and otherwise ignored.
pub fn initialize(config: ClientConfig) -> Result<Client, Error> {
    if let Some(client) = CLIENT.get() {
        if *client.config() != config {
            warn!("kiln is already initialized for {}; ignoring new configuration for {}", client.config().url, config.url);
        }
        return Ok(client.clone());
    }

    let connector = WebsocketConnector::from_config(&config);
    let client = Client::new(config)?.with_realtime(Arc::new(connector));
    // another thread may have won the race; theirs is kept
    let client = CLIENT.get_or_init(|| client);
    info!("kiln initialized for {}", client.config().url);
    Ok(client.clone())
}

/// The process-wide client
pub fn client() -> Result<Client, Error> { CLIENT.get().cloned().ok_or(Error::NotInitialized) }

pub fn table<T: Record>(name: impl Into<CollectionId>) -> Result<Table<T>, Error> { Ok(client()?.table(name)) }

pub async fn get_session() -> Result<Option<Session>, Error> { Ok(client()?.get_session().await?) }

pub async fn sign_in(email: &str, password: &str) -> Result<Session, Error> { Ok(client()?.sign_in(email, password).await?) }

pub async fn sign_up(email: &str, password: &str, attributes: serde_json::Value) -> Result<SignUp, Error> {
    Ok(client()?.sign_up(email, password, attributes).await?)
}

pub async fn sign_out() -> Result<(), Error> { Ok(client()?.sign_out().await?) }

/// Untyped callback subscription to every change of `collection`
pub async fn subscribe_to_collection<F>(collection: &str, callback: F, filter: Option<&str>) -> Result<ChannelHandle, Error>
where F: Fn(ChangeEvent<serde_json::Value>) + Send + Sync + 'static {
    Ok(client()?.table::<serde_json::Value>(collection).subscribe(callback, filter).await?)
}

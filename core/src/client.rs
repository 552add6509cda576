use kiln_proto::CollectionId;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    bucket::Bucket,
    config::ClientConfig,
    connector::{JoinRequest, RawChannel, RealtimeConnector},
    error::{AuthError, ChannelError, ConfigError},
    record::Record,
    session::{AuthState, FileSessionStore, MemorySessionStore, Session, SessionContext, SessionStore, SignUp},
    table::Table,
    transport::Rest,
};

/// A handle to one backend project.
///
/// Holds the endpoint configuration, the HTTP client, the [`SessionContext`] and the
/// optional realtime connector. Cloning is cheap and every clone shares the same
/// session. Building a client performs no network activity.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    rest: Rest,
    session: SessionContext,
    realtime: Option<Arc<dyn RealtimeConnector>>,
}

impl Client {
    /// The session is kept in a file when `config.session_path` is set, in memory otherwise.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rest = Rest::new(&config)?;
        let store: Arc<dyn SessionStore> = match &config.session_path {
            Some(path) => {
                debug!("Persisting session in {}", path.display());
                Arc::new(FileSessionStore::new(path))
            }
            None => Arc::new(MemorySessionStore::new()),
        };
        let session = SessionContext::new(rest.clone(), config.auth_url(), store);
        info!("Client for {} created", config.url);
        Ok(Self { config: Arc::new(config), rest, session, realtime: None })
    }

    /// Replace the session store. Any session held by the previous store is not carried over.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session = SessionContext::new(self.rest.clone(), self.config.auth_url(), store);
        self
    }

    pub fn with_realtime(mut self, connector: Arc<dyn RealtimeConnector>) -> Self {
        self.realtime = Some(connector);
        self
    }

    pub fn config(&self) -> &ClientConfig { &self.config }

    pub fn session(&self) -> &SessionContext { &self.session }

    pub(crate) fn rest(&self) -> &Rest { &self.rest }

    pub fn table<T: Record>(&self, name: impl Into<CollectionId>) -> Table<T> { Table::new(self.clone(), name) }

    pub fn bucket(&self, name: impl Into<String>) -> Bucket { Bucket::new(self.clone(), name) }

    pub async fn get_session(&self) -> Result<Option<Session>, AuthError> { self.session.get_session().await }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> { self.session.sign_in(email, password).await }

    pub async fn sign_up(&self, email: &str, password: &str, attributes: serde_json::Value) -> Result<SignUp, AuthError> {
        self.session.sign_up(email, password, attributes).await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> { self.session.sign_out().await }

    pub async fn refresh_session(&self) -> Result<Session, AuthError> { self.session.refresh_session().await }

    pub fn auth_state(&self) -> watch::Receiver<AuthState> { self.session.auth_state() }

    /// Join the realtime topic for `collection`, optionally with a server side row filter.
    ///
    /// Returns once the server has accepted the join. There is no automatic retry.
    pub async fn open_channel(&self, collection: impl Into<CollectionId>, filter: Option<&str>) -> Result<RawChannel, ChannelError> {
        let connector = self.realtime.as_ref().ok_or(ChannelError::Unavailable)?;
        let collection = collection.into();
        let request = JoinRequest {
            topic: collection.topic(&self.config.schema),
            schema: self.config.schema.clone(),
            table: collection.to_string(),
            filter: filter.map(String::from),
            access_token: Some(self.session.bearer().await?),
        };
        debug!("Joining {} (filter: {:?})", request.topic, request.filter);
        let channel = connector.join(request).await?;
        info!("Joined {}", channel.topic);
        Ok(channel)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("url", &self.config.url).field("schema", &self.config.schema).field("realtime", &self.realtime.is_some()).finish()
    }
}

#![allow(unused)]

use kiln_core::{proto::RecordId, Client, ClientConfig, Record};
use kiln_server::{Server, ServerHandle, TableSpec};
use kiln_websocket_client::WebsocketConnector;
use serde::{Deserialize, Serialize};
use std::{
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::Level;

pub const ANON_KEY: &str = "test-anon-key";

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    // if LOG_LEVEL env var is set, use it
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt().with_max_level(Level::from_str(&level).unwrap()).with_test_writer().init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub site: String,
    pub level: u8,
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl Record for Alert {
    fn id(&self) -> RecordId { self.id.into() }

    fn validate(&self) -> Result<(), String> {
        if self.level > 5 {
            return Err(format!("alert level {} out of range", self.level));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAlert<'a> {
    pub site: &'a str,
    pub level: u8,
    pub status: &'a str,
}

pub fn new_alert<'a>(site: &'a str, level: u8, status: &'a str) -> NewAlert<'a> { NewAlert { site, level, status } }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price: f64,
}

impl Record for Product {
    fn id(&self) -> RecordId { self.id.into() }
}

/// Maintenance log entry; every field is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub message: Option<String>,
    pub code: Option<String>,
}

impl Record for LogEntry {
    fn id(&self) -> RecordId { self.id.unwrap_or_default().into() }
}

pub fn tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("alerts").columns(&["site", "level", "status", "note"]).required(&["site", "status"]),
        TableSpec::new("products").columns(&["sku", "name", "price"]).required(&["sku", "name"]).unique(&["sku"]),
        TableSpec::new("maintenance_log").columns(&["message", "code"]),
        TableSpec::new("payroll").columns(&["employee", "amount"]).protected(),
    ]
}

/// Serve the standard test tables on an ephemeral port
pub async fn start_backend() -> anyhow::Result<ServerHandle> { start_backend_with(|builder| builder).await }

pub async fn start_backend_with(configure: impl FnOnce(kiln_server::ServerBuilder) -> kiln_server::ServerBuilder) -> anyhow::Result<ServerHandle> {
    let mut builder = Server::builder().bind_address("127.0.0.1:0").anon_key(ANON_KEY);
    for spec in tables() {
        builder = builder.table(spec);
    }
    configure(builder).build()?.spawn().await
}

pub fn config_for(server: &ServerHandle) -> ClientConfig {
    let mut config = ClientConfig::new(server.url(), server.anon_key());
    config.join_timeout = Duration::from_secs(5);
    config
}

/// A client with a websocket connector, keeping its session in memory
pub fn client_for(server: &ServerHandle) -> anyhow::Result<Client> { with_realtime(Client::new(config_for(server))?) }

pub fn with_realtime(client: Client) -> anyhow::Result<Client> {
    let connector = WebsocketConnector::from_config(client.config());
    Ok(client.with_realtime(Arc::new(connector)))
}

/// Collects whatever a subscription callback receives
pub struct Collector<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self { Self(Arc::new(Mutex::new(Vec::new()))) }

    pub fn callback(&self) -> impl Fn(T) + Send + Sync + 'static {
        let items = self.0.clone();
        move |item| items.lock().unwrap().push(item)
    }

    pub fn take(&self) -> Vec<T> { self.0.lock().unwrap().drain(..).collect() }

    pub fn len(&self) -> usize { self.0.lock().unwrap().len() }

    /// Wait until at least `count` items have arrived, up to two seconds
    pub async fn wait_for(&self, count: usize) -> Vec<T> {
        for _ in 0..200 {
            if self.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.take()
    }
}

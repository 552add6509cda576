//! # Kiln WebSocket Client
//!
//! A native (non-browser) realtime connector. Each subscription opens one websocket to
//! the backend's realtime endpoint, joins `realtime:<schema>:<table>` and forwards every
//! `postgres_changes` frame to the subscriber in arrival order.
//!
//! ## No reconnection
//!
//!  When the socket drops, the channel reports it as closed and ends. Subscribe again
//!  for a fresh channel.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! # use kiln_core::{Client, ClientConfig};
//! # use kiln_websocket_client::WebsocketConnector;
//! # use futures_util::StreamExt;
//! # use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let client = Client::new(config.clone())?.with_realtime(Arc::new(WebsocketConnector::from_config(&config)));
//!
//!     let mut alerts = client.table::<serde_json::Value>("alerts").changes(Some("status=eq.active")).await?;
//!     while let Some(event) = alerts.next().await {
//!         println!("{:?}", event?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
mod sender;

pub use client::WebsocketConnector;

pub use tokio_tungstenite::tungstenite::Error as TungsteniteError;

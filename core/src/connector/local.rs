use async_trait::async_trait;
use kiln_proto::{ChangeData, ChangeFilter};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{ChannelCloser, ChannelMessage, ConnectionState, JoinRequest, RawChannel, RealtimeConnector};
use crate::error::ChannelError;

/// An in-process realtime hub.
///
/// Changes handed to [`LocalRealtime::publish`] are delivered, in call order, to
/// every joined channel whose filter matches. Useful for wiring UI code against a
/// local data source and for tests that should not open sockets.
#[derive(Clone, Default)]
pub struct LocalRealtime(Arc<Inner>);

#[derive(Default)]
struct Inner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    rejected_tables: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

struct Subscriber {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    state: watch::Sender<ConnectionState>,
}

impl LocalRealtime {
    pub fn new() -> Self { Self::default() }

    /// Deliver one change; returns how many channels received it
    pub fn publish(&self, data: ChangeData) -> usize {
        let mut subscribers = self.0.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        subscribers.retain(|id, subscriber| {
            if !subscriber.filter.matches(&data) {
                return true;
            }
            match subscriber.tx.send(ChannelMessage::Change(data.clone())) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!("Dropping local channel {} with no receiver", id);
                    false
                }
            }
        });
        delivered
    }

    /// Close every joined channel from the "server" side
    pub fn close_all(&self, reason: Option<String>) {
        let subscribers: Vec<Subscriber> = self.0.subscribers.lock().unwrap_or_else(|e| e.into_inner()).drain().map(|(_, s)| s).collect();
        for subscriber in subscribers {
            let _ = subscriber.tx.send(ChannelMessage::Closed(reason.clone()));
            subscriber.state.send_replace(ConnectionState::Closed);
        }
    }

    /// Make future joins for `table` fail as if the server refused them
    pub fn reject_table(&self, table: impl Into<String>) { self.0.rejected_tables.lock().unwrap_or_else(|e| e.into_inner()).insert(table.into()); }

    pub fn subscriber_count(&self) -> usize { self.0.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len() }
}

#[async_trait]
impl RealtimeConnector for LocalRealtime {
    async fn join(&self, request: JoinRequest) -> Result<RawChannel, ChannelError> {
        if self.0.rejected_tables.lock().unwrap_or_else(|e| e.into_inner()).contains(&request.table) {
            return Err(ChannelError::Rejected(format!("no such table {}", request.table)));
        }

        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, messages) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Joined);
        let filter = ChangeFilter { event: "*".to_string(), schema: request.schema.clone(), table: request.table.clone(), filter: request.filter.clone() };
        self.0.subscribers.lock().unwrap_or_else(|e| e.into_inner()).insert(id, Subscriber { filter, tx, state: state_tx });
        debug!("Local channel {} joined {}", id, request.topic);

        let hub: Weak<Inner> = Arc::downgrade(&self.0);
        let closer = ChannelCloser::new(move || {
            if let Some(hub) = hub.upgrade() {
                if let Some(subscriber) = hub.subscribers.lock().unwrap_or_else(|e| e.into_inner()).remove(&id) {
                    subscriber.state.send_replace(ConnectionState::Closed);
                }
            }
        });

        Ok(RawChannel { topic: request.topic, messages, closer, state })
    }
}

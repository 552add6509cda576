//! The seam between the change bridge and a realtime transport.
//!
//! A [`RealtimeConnector`] joins one topic and hands back a [`RawChannel`]: an
//! ordered queue of untranslated change payloads plus a way to close it. The
//! native websocket implementation lives in `kiln-websocket-client`; [`local`]
//! provides an in-process one.

pub mod local;

use async_trait::async_trait;
use kiln_proto::ChangeData;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, watch};

use crate::error::ChannelError;

/// What to join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub topic: String,
    pub schema: String,
    pub table: String,
    /// Server evaluated row filter, e.g. `status=eq.active`
    pub filter: Option<String>,
    pub access_token: Option<String>,
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Establish a subscription. Must not return before the server accepted the join.
    async fn join(&self, request: JoinRequest) -> Result<RawChannel, ChannelError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Change(ChangeData),
    /// The channel ended from the remote side; no further messages follow
    Closed(Option<String>),
}

/// Liveness of an established channel
#[derive(Debug, Clone, PartialEq, strum::Display)]
pub enum ConnectionState {
    Joined,
    Closed,
    #[strum(serialize = "Error")]
    Error(String),
}

/// An established subscription, not yet bound to a record type
pub struct RawChannel {
    pub topic: String,
    pub messages: mpsc::UnboundedReceiver<ChannelMessage>,
    pub closer: ChannelCloser,
    pub state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for RawChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "RawChannel({})", self.topic) }
}

/// Releases a channel's transport. Runs its hook at most once; later calls are no-ops.
#[derive(Clone)]
pub struct ChannelCloser {
    inner: Arc<CloserInner>,
}

struct CloserInner {
    closed: AtomicBool,
    on_close: Box<dyn Fn() + Send + Sync>,
}

impl ChannelCloser {
    pub fn new(on_close: impl Fn() + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(CloserInner { closed: AtomicBool::new(false), on_close: Box::new(on_close) }) }
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            (self.inner.on_close)();
        }
    }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::SeqCst) }
}

impl std::fmt::Debug for ChannelCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "ChannelCloser(closed: {})", self.is_closed()) }
}

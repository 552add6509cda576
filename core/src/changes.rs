//! The change-notification bridge.
//!
//! Raw `postgres_changes` payloads come off a [`RawChannel`] and leave as typed
//! [`ChangeEvent`]s, either pulled from a [`ChangeStream`] or pushed into a
//! callback behind a [`ChannelHandle`]. Delivery is at-most-once in transport
//! order; nothing is buffered across a dropped connection.

use futures::{Stream, StreamExt};
use kiln_proto::{ChangeData, ChangeType, CollectionId, RecordId};
use std::{
    marker::PhantomData,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    connector::{ChannelCloser, ChannelMessage, ConnectionState, RawChannel},
    error::ChannelError,
    record::{parse_row, Record, ID_FIELD},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl From<ChangeType> for ChangeKind {
    fn from(value: ChangeType) -> Self {
        match value {
            ChangeType::Insert => ChangeKind::Insert,
            ChangeType::Update => ChangeKind::Update,
            ChangeType::Delete => ChangeKind::Delete,
        }
    }
}

/// One committed mutation of a collection.
///
/// For inserts and updates `record` is the new row. Deletes usually arrive with only the
/// key of the old row, so `record` is `None` unless the old row is a complete `T`; `id`
/// is set whenever the payload carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub collection: CollectionId,
    pub id: Option<RecordId>,
    pub record: Option<T>,
}

/// Translate one payload. `None` means the payload is not for this collection.
pub fn translate<T: Record>(collection: &CollectionId, schema: &str, data: ChangeData) -> Option<Result<ChangeEvent<T>, ChannelError>> {
    if data.schema != schema || data.table != collection.as_str() {
        debug!("Ignoring change for {}.{} on channel for {}.{}", data.schema, data.table, schema, collection);
        return None;
    }

    let kind = ChangeKind::from(data.change_type);
    let event = match kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(row) = data.record else {
                return Some(Err(ChannelError::InvalidPayload(format!("{} without a record", data.change_type.as_str()))));
            };
            let id = row.get(ID_FIELD).and_then(RecordId::from_json);
            match parse_row::<T>(row) {
                Ok(record) => ChangeEvent { kind, collection: collection.clone(), id: id.or_else(|| Some(record.id())), record: Some(record) },
                Err(e) => return Some(Err(ChannelError::InvalidPayload(e.to_string()))),
            }
        }
        ChangeKind::Delete => {
            let old = data.old_record.unwrap_or_default();
            let id = old.get(ID_FIELD).and_then(RecordId::from_json);
            // Partial old rows are expected here, so a failed parse is not an error
            let record = parse_row::<T>(old).ok();
            ChangeEvent { kind, collection: collection.clone(), id: id.or_else(|| record.as_ref().map(Record::id)), record }
        }
    };
    Some(Ok(event))
}

/// A typed, lazily consumed sequence of change events for one collection.
///
/// Ends after the channel is closed from either side. Dropping the stream closes the channel;
/// subscribing again yields a fresh stream.
pub struct ChangeStream<T> {
    collection: CollectionId,
    schema: String,
    topic: String,
    messages: mpsc::UnboundedReceiver<ChannelMessage>,
    closer: ChannelCloser,
    state: watch::Receiver<ConnectionState>,
    finished: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> ChangeStream<T> {
    pub fn new(collection: CollectionId, schema: impl Into<String>, channel: RawChannel) -> Self {
        let RawChannel { topic, messages, closer, state } = channel;
        Self { collection, schema: schema.into(), topic, messages, closer, state, finished: false, _record: PhantomData }
    }

    pub fn topic(&self) -> &str { &self.topic }

    /// Liveness of the underlying channel
    pub fn state(&self) -> ConnectionState { self.state.borrow().clone() }

    /// Stop the stream and release the transport. Idempotent.
    pub fn close(&mut self) {
        self.finished = true;
        self.closer.close();
        self.messages.close();
    }

    fn closer(&self) -> ChannelCloser { self.closer.clone() }
}

impl<T: Record> Stream for ChangeStream<T> {
    type Item = Result<ChangeEvent<T>, ChannelError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished || self.closer.is_closed() {
                return Poll::Ready(None);
            }
            match self.messages.poll_recv(cx) {
                Poll::Ready(Some(ChannelMessage::Change(data))) => {
                    if let Some(item) = translate(&self.collection, &self.schema, data) {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(ChannelMessage::Closed(reason))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(ChannelError::Closed(reason))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T> Drop for ChangeStream<T> {
    fn drop(&mut self) { self.closer.close(); }
}

impl<T> std::fmt::Debug for ChangeStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "ChangeStream({})", self.topic) }
}

/// A callback subscription. Closing (or dropping) the handle stops delivery immediately.
pub struct ChannelHandle {
    topic: String,
    closer: ChannelCloser,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHandle {
    /// Drive `stream` on a spawned task, invoking `callback` once per event.
    ///
    /// Stream errors (invalid payloads, a server close) are logged rather than delivered.
    pub fn spawn<T, F>(mut stream: ChangeStream<T>, callback: F) -> Self
    where
        T: Record,
        F: Fn(ChangeEvent<T>) + Send + Sync + 'static,
    {
        let topic = stream.topic().to_string();
        let closer = stream.closer();
        let task = {
            let closer = closer.clone();
            let topic = topic.clone();
            tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    if closer.is_closed() {
                        break;
                    }
                    match item {
                        Ok(event) => callback(event),
                        Err(ChannelError::Closed(reason)) => warn!("Channel {} closed by server: {}", topic, reason.unwrap_or_default()),
                        Err(e) => warn!("Channel {}: {}", topic, e),
                    }
                }
                debug!("Channel {} delivery task finished", topic);
            })
        };
        Self { topic, closer, task: Mutex::new(Some(task)) }
    }

    pub fn topic(&self) -> &str { &self.topic }

    pub fn is_closed(&self) -> bool { self.closer.is_closed() }

    /// Stop callbacks and release the transport. Calling it again does nothing.
    pub fn close(&self) {
        self.closer.close();
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            debug!("Closing channel {}", self.topic);
            task.abort();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) { self.close(); }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "ChannelHandle({})", self.topic) }
}

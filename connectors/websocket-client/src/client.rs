use crate::sender::{FrameSender, Socket};
use async_trait::async_trait;
use futures_util::{stream::SplitStream, StreamExt};
use kiln_core::{
    config::ClientConfig,
    connector::{ChannelCloser, ChannelMessage, ConnectionState, JoinRequest, RawChannel, RealtimeConnector},
    error::ChannelError,
};
use kiln_proto::realtime::{event, ChangeFilter, ChangePayload, Frame, JoinConfig, JoinPayload, ReplyPayload};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, watch, Notify},
    time::{interval_at, timeout, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

const PROTOCOL_VERSION: &str = "1.0.0";

/// Why a join did not produce a channel
#[derive(Debug, Error)]
enum JoinFailure {
    #[error("{0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("{0}")]
    Send(String),
    #[error("{0}")]
    Rejected(String),
    #[error("socket closed before the join was acknowledged")]
    Closed,
}

impl From<JoinFailure> for ChannelError {
    fn from(failure: JoinFailure) -> Self {
        match failure {
            JoinFailure::Socket(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                ChannelError::Rejected(format!("handshake refused with {}", response.status()))
            }
            JoinFailure::Rejected(reason) => ChannelError::Rejected(reason),
            JoinFailure::Closed => ChannelError::Closed(None),
            other => ChannelError::Connect(other.to_string()),
        }
    }
}

/// Joins realtime topics over native websockets.
///
/// Every join opens its own socket, so closing one channel never disturbs another.
/// There is no reconnection: when the socket drops the channel reports
/// [`ChannelMessage::Closed`] and the caller decides whether to subscribe again.
#[derive(Debug, Clone)]
pub struct WebsocketConnector {
    realtime_url: String,
    api_key: String,
    join_timeout: Duration,
    heartbeat_interval: Duration,
}

impl WebsocketConnector {
    pub fn new(realtime_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            realtime_url: realtime_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.realtime_url(), config.anon_key.clone()).with_join_timeout(config.join_timeout).with_heartbeat_interval(config.heartbeat_interval)
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    fn socket_url(&self) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&format!("{}/websocket", self.realtime_url)).map_err(|e| ChannelError::Connect(format!("{}: {}", self.realtime_url, e)))?;
        url.query_pairs_mut().append_pair("apikey", &self.api_key).append_pair("vsn", PROTOCOL_VERSION);
        Ok(url)
    }

    /// Connect, send the join and wait for its reply
    async fn handshake(&self, request: &JoinRequest) -> Result<(FrameSender, SplitStream<Socket>, Vec<Frame>), JoinFailure> {
        let url = self.socket_url().map_err(|e| JoinFailure::Rejected(e.to_string()))?;
        let (socket, _) = connect_async(url.as_str()).await?;
        debug!("WebSocket handshake completed with {}", self.realtime_url);

        let (sink, mut stream) = socket.split();
        let mut sender = FrameSender::new(sink);

        let payload = JoinPayload {
            config: JoinConfig {
                postgres_changes: vec![ChangeFilter {
                    event: "*".to_string(),
                    schema: request.schema.clone(),
                    table: request.table.clone(),
                    filter: request.filter.clone(),
                }],
            },
            access_token: request.access_token.clone(),
        };
        let join_ref = sender.next_ref();
        sender.send(&Frame::join(&request.topic, &payload, join_ref.clone())).await.map_err(|e| JoinFailure::Send(e.to_string()))?;

        // Frames for the topic that overtake the reply are kept and delivered first
        let mut early = Vec::new();
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Frame = match serde_json::from_str(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Ignoring undecodable frame during join: {}", e);
                            continue;
                        }
                    };
                    if frame.topic != request.topic {
                        continue;
                    }
                    if frame.is(event::REPLY) && frame.reference.as_deref() == Some(join_ref.as_str()) {
                        let reply: ReplyPayload = serde_json::from_value(frame.payload).map_err(|e| JoinFailure::Rejected(e.to_string()))?;
                        if reply.is_ok() {
                            return Ok((sender, stream, early));
                        }
                        return Err(JoinFailure::Rejected(reply.reason()));
                    }
                    early.push(frame);
                }
                Some(Ok(Message::Ping(data))) => sender.pong(data).await.map_err(|e| JoinFailure::Send(e.to_string()))?,
                Some(Ok(Message::Close(_))) | None => return Err(JoinFailure::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl RealtimeConnector for WebsocketConnector {
    async fn join(&self, request: JoinRequest) -> Result<RawChannel, ChannelError> {
        info!("Joining {} via {}", request.topic, self.realtime_url);
        let (sender, stream, early) = match timeout(self.join_timeout, self.handshake(&request)).await {
            Ok(result) => result.map_err(|e| {
                warn!("Join of {} failed: {}", request.topic, e);
                ChannelError::from(e)
            })?,
            Err(_) => {
                warn!("Join of {} timed out after {:?}", request.topic, self.join_timeout);
                return Err(ChannelError::Timeout);
            }
        };

        let (tx, messages) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Joined);
        let shutdown = Arc::new(Notify::new());

        let channel = Channel { topic: request.topic.clone(), sender, stream, tx, state: state_tx, shutdown: shutdown.clone(), heartbeat_interval: self.heartbeat_interval };
        for frame in early {
            channel.forward(frame);
        }
        tokio::spawn(channel.run());

        // notify_one keeps a permit, so a close racing the task start is not lost
        let closer = ChannelCloser::new(move || shutdown.notify_one());
        Ok(RawChannel { topic: request.topic, messages, closer, state })
    }
}

enum Ending {
    /// Closed from this side
    Left,
    /// Closed by the server or the transport
    Closed(Option<String>),
}

/// One joined topic and the socket carrying it
struct Channel {
    topic: String,
    sender: FrameSender,
    stream: SplitStream<Socket>,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    state: watch::Sender<ConnectionState>,
    shutdown: Arc<Notify>,
    heartbeat_interval: Duration,
}

impl Channel {
    async fn run(mut self) {
        match self.pump().await {
            Ok(Ending::Left) => {
                debug!("Left {}", self.topic);
                self.state.send_replace(ConnectionState::Closed);
            }
            Ok(Ending::Closed(reason)) => {
                info!("Channel {} closed: {}", self.topic, reason.as_deref().unwrap_or("no reason given"));
                let _ = self.tx.send(ChannelMessage::Closed(reason));
                self.state.send_replace(ConnectionState::Closed);
            }
            Err(e) => {
                error!("Channel {} failed: {}", self.topic, e);
                let _ = self.tx.send(ChannelMessage::Closed(Some(e.to_string())));
                self.state.send_replace(ConnectionState::Error(e.to_string()));
            }
        }
    }

    async fn pump(&mut self) -> anyhow::Result<Ending> {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        loop {
            select! {
                _ = self.shutdown.notified() => {
                    let leave_ref = self.sender.next_ref();
                    if let Err(e) = self.sender.send(&Frame::leave(&self.topic, leave_ref)).await {
                        debug!("Could not send leave for {}: {}", self.topic, e);
                    }
                    self.sender.close().await;
                    return Ok(Ending::Left);
                }
                _ = heartbeat.tick() => {
                    let heartbeat_ref = self.sender.next_ref();
                    self.sender.send(&Frame::heartbeat(heartbeat_ref)).await?;
                }
                message = self.stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(text.as_str()) {
                        Ok(frame) => {
                            if let Some(ending) = self.handle(frame) {
                                self.sender.close().await;
                                return Ok(ending);
                            }
                        }
                        Err(e) => warn!("Ignoring undecodable frame on {}: {}", self.topic, e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        self.sender.pong(data).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(Ending::Closed(frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty())));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(Ending::Closed(None)),
                },
            }
        }
    }

    /// Returns `Some` when the frame ends the channel
    fn handle(&self, frame: Frame) -> Option<Ending> {
        if frame.topic != self.topic {
            // heartbeat replies on the phoenix topic
            return None;
        }
        match frame.event.as_str() {
            event::POSTGRES_CHANGES => {
                if !self.forward(frame) {
                    debug!("Receiver for {} is gone, leaving", self.topic);
                    return Some(Ending::Left);
                }
                None
            }
            event::CLOSE => Some(Ending::Closed(frame.payload.get("reason").and_then(|r| r.as_str()).map(str::to_string))),
            event::ERROR => Some(Ending::Closed(Some(format!("server error on {}", self.topic)))),
            other => {
                debug!("Ignoring {} on {}", other, self.topic);
                None
            }
        }
    }

    /// Hand a change frame to the receiver. Returns false once nobody is listening.
    fn forward(&self, frame: Frame) -> bool {
        if !frame.is(event::POSTGRES_CHANGES) {
            return true;
        }
        match serde_json::from_value::<ChangePayload>(frame.payload) {
            Ok(payload) => self.tx.send(ChannelMessage::Change(payload.data)).is_ok(),
            Err(e) => {
                warn!("Dropping malformed change on {}: {}", self.topic, e);
                true
            }
        }
    }
}

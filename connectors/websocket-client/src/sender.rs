use futures_util::{stream::SplitSink, SinkExt};
use kiln_proto::realtime::Frame;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{Bytes, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a channel socket. Numbers outgoing frames.
pub struct FrameSender {
    sink: SplitSink<Socket, Message>,
    next_ref: u64,
}

impl FrameSender {
    pub(crate) fn new(sink: SplitSink<Socket, Message>) -> Self { Self { sink, next_ref: 1 } }

    /// A fresh `ref` for a frame that expects a reply
    pub fn next_ref(&mut self) -> String {
        let reference = self.next_ref;
        self.next_ref += 1;
        reference.to_string()
    }

    pub async fn send(&mut self, frame: &Frame) -> anyhow::Result<()> {
        debug!("-> {}", frame);
        let text = serde_json::to_string(frame)?;
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn pong(&mut self, data: Bytes) -> anyhow::Result<()> {
        self.sink.send(Message::Pong(data)).await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Socket close: {}", e);
        }
    }
}

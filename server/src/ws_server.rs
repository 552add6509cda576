//! The realtime endpoint: one websocket per client, any number of joined topics per socket.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use kiln_proto::realtime::{event, ChangeFilter, Frame, JoinPayload, ReplyPayload, PHOENIX_TOPIC};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tokio::{select, sync::broadcast::error::RecvError};
use tracing::{debug, info, warn};

use crate::{
    backend::{Failure, RealtimeEvent},
    state::{Caller, ServerState},
};

/// Close code for a server going away
const GOING_AWAY: u16 = 1001;

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    apikey: Option<String>,
    #[allow(unused)]
    vsn: Option<String>,
}

pub async fn ws_handler(ws: WebSocketUpgrade, Query(params): Query<SocketParams>, State(state): State<ServerState>) -> Result<Response, Failure> {
    if params.apikey.as_deref() != Some(state.anon_key.as_str()) {
        return Err(Failure::new(401, "401", "Invalid API key"));
    }
    info!("Upgrading realtime connection");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)).into_response())
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (mut sink, mut stream) = socket.split();
    // subscribe before any join is acknowledged so no committed change can slip past
    let mut events = state.backend.subscribe();
    let mut joined: HashMap<String, ChangeFilter> = HashMap::new();

    loop {
        select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(text.as_str()) {
                    Ok(frame) => {
                        let reply = handle_frame(&state, &mut joined, frame);
                        if send(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Undecodable frame from client: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client closed realtime socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Realtime socket error: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(RealtimeEvent::Change(data)) => {
                    let mut failed = false;
                    for (topic, filter) in &joined {
                        if filter.matches(&data) && send(&mut sink, &Frame::change(topic, data.clone())).await.is_err() {
                            failed = true;
                            break;
                        }
                    }
                    if failed {
                        break;
                    }
                }
                Ok(RealtimeEvent::Close(reason)) => {
                    for topic in joined.keys() {
                        let mut frame = Frame::close(topic);
                        if let Some(reason) = &reason {
                            frame.payload = json!({ "reason": reason });
                        }
                        let _ = send(&mut sink, &frame).await;
                    }
                    let close = CloseFrame { code: GOING_AWAY, reason: reason.unwrap_or_default().into() };
                    let _ = sink.send(Message::Close(Some(close))).await;
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!("Realtime socket fell behind, {} changes skipped", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("Realtime socket finished with {} joined topics", joined.len());
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

/// Apply one client frame and produce the reply
fn handle_frame(state: &ServerState, joined: &mut HashMap<String, ChangeFilter>, frame: Frame) -> Frame {
    let reply = match frame.event.as_str() {
        event::HEARTBEAT if frame.topic == PHOENIX_TOPIC => ReplyPayload::ok(),
        event::JOIN => match admit_join(state, &frame) {
            Ok(filter) => {
                info!("Joined {} on {}.{}", frame.topic, filter.schema, filter.table);
                joined.insert(frame.topic.clone(), filter);
                ReplyPayload::ok()
            }
            Err(reason) => {
                info!("Refused join of {}: {}", frame.topic, reason);
                ReplyPayload::error(reason)
            }
        },
        event::LEAVE => {
            joined.remove(&frame.topic);
            debug!("Left {}", frame.topic);
            ReplyPayload::ok()
        }
        other => ReplyPayload::error(format!("unknown event {}", other)),
    };
    Frame::reply(frame.topic, frame.reference, &reply)
}

fn admit_join(state: &ServerState, frame: &Frame) -> Result<ChangeFilter, String> {
    let payload: JoinPayload = serde_json::from_value(frame.payload.clone()).map_err(|e| format!("invalid join payload: {}", e))?;
    let filter = payload.config.postgres_changes.into_iter().next().ok_or("no postgres_changes in join")?;

    if filter.schema != state.backend.schema() {
        return Err(format!("no such schema {}", filter.schema));
    }
    let spec = state.backend.spec(&filter.table).ok_or_else(|| format!("no such table {}.{}", filter.schema, filter.table))?;
    let caller = match payload.access_token.as_deref() {
        Some(token) => state.token_caller(token).map_err(|f| f.body.reason())?,
        None => Caller::Anonymous,
    };
    state.admit(&caller, &spec).map_err(|f| f.body.reason())?;
    Ok(filter)
}

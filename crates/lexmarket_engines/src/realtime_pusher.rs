#![forbid(unsafe_code)]

//! Pusher protocol 7 client over a WebSocket.
//!
//! The connection is opened on a background task. Outbound frames queue until
//! the server sends `pusher:connection_established`; after that they are
//! written in order. Inbound events are filtered against the bound
//! (channel, event) pairs before they reach the event sink.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::realtime::{
    validate_channel_name, ChannelEvent, EventSink, RealtimeClient, RealtimeConfig,
    RealtimeConnector, RealtimeError,
};

const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const EVENT_PING: &str = "pusher:ping";
const EVENT_PONG: &str = "pusher:pong";
const EVENT_ERROR: &str = "pusher:error";
const EVENT_SUBSCRIBE: &str = "pusher:subscribe";
const EVENT_UNSUBSCRIBE: &str = "pusher:unsubscribe";
const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

/// Frames held back while the handshake is outstanding.
pub const MAX_PENDING_FRAMES: usize = 64;

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ConnectionEstablished { socket_id: String },
    Ping,
    SubscriptionSucceeded { channel: String },
    Error { code: Option<u64>, message: String },
    Event(ChannelEvent),
    Ignored,
}

/// `data` arrives either as a JSON string holding encoded JSON or as inline
/// JSON. Strings that are not JSON are kept as strings.
pub fn decode_event_data(data: Value) -> Value {
    match data {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

pub fn parse_inbound(text: &str) -> Result<InboundFrame, RealtimeError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|e| RealtimeError::Frame(e.to_string()))?;
    let data = decode_event_data(frame.data);
    Ok(match frame.event.as_str() {
        EVENT_CONNECTION_ESTABLISHED => {
            let socket_id = data
                .get("socket_id")
                .and_then(Value::as_str)
                .ok_or_else(|| RealtimeError::Frame("connection_established without socket_id".into()))?;
            InboundFrame::ConnectionEstablished {
                socket_id: socket_id.to_string(),
            }
        }
        EVENT_PING => InboundFrame::Ping,
        EVENT_SUBSCRIPTION_SUCCEEDED => InboundFrame::SubscriptionSucceeded {
            channel: frame.channel.unwrap_or_default(),
        },
        EVENT_ERROR => InboundFrame::Error {
            code: data.get("code").and_then(Value::as_u64),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
            InboundFrame::Ignored
        }
        event => match frame.channel {
            Some(channel) => InboundFrame::Event(ChannelEvent {
                channel,
                event: event.to_string(),
                data,
            }),
            None => InboundFrame::Ignored,
        },
    })
}

pub fn subscribe_frame(channel: &str) -> String {
    json!({ "event": EVENT_SUBSCRIBE, "data": { "channel": channel } }).to_string()
}

pub fn unsubscribe_frame(channel: &str) -> String {
    json!({ "event": EVENT_UNSUBSCRIBE, "data": { "channel": channel } }).to_string()
}

pub fn pong_frame() -> String {
    json!({ "event": EVENT_PONG, "data": {} }).to_string()
}

/// Holds `frame` until the connection is established. Returns false and
/// drops the frame once `MAX_PENDING_FRAMES` are already waiting.
fn queue_until_established(pending: &mut Vec<String>, frame: String) -> bool {
    if pending.len() >= MAX_PENDING_FRAMES {
        warn!(pending = pending.len(), "real-time send queue full, dropping frame");
        return false;
    }
    pending.push(frame);
    true
}

type Bindings = Arc<Mutex<BTreeSet<(String, String)>>>;

#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PusherConnector;

impl RealtimeConnector for PusherConnector {
    fn connect(
        &self,
        config: &RealtimeConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RealtimeClient>, RealtimeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let bindings: Bindings = Arc::default();
        let url = config.socket_url();
        debug!(cluster = %config.cluster, "opening real-time connection");
        runtime.spawn(run_connection(url, command_rx, Arc::clone(&bindings), sink));
        Ok(Box::new(PusherClient {
            commands,
            bindings,
            channels: BTreeSet::new(),
            closed: false,
        }))
    }
}

pub struct PusherClient {
    commands: mpsc::UnboundedSender<Command>,
    bindings: Bindings,
    channels: BTreeSet<String>,
    closed: bool,
}

impl PusherClient {
    fn send(&self, frame: String) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::Closed);
        }
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| RealtimeError::Closed)
    }
}

impl RealtimeClient for PusherClient {
    fn subscribe(&mut self, channel: &str) -> Result<(), RealtimeError> {
        validate_channel_name(channel)?;
        if self.channels.contains(channel) {
            return Ok(());
        }
        self.send(subscribe_frame(channel))?;
        self.channels.insert(channel.to_string());
        Ok(())
    }

    fn bind(&mut self, channel: &str, event: &str) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::Closed);
        }
        self.bindings
            .lock()
            .insert((channel.to_string(), event.to_string()));
        Ok(())
    }

    fn unsubscribe(&mut self, channel: &str) -> Result<(), RealtimeError> {
        self.bindings.lock().retain(|(c, _)| c != channel);
        if self.channels.remove(channel) {
            self.send(unsubscribe_frame(channel))?;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.bindings.lock().clear();
        self.channels.clear();
        let _ = self.commands.send(Command::Close);
        self.closed = true;
    }
}

impl Drop for PusherClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_connection(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    bindings: Bindings,
    sink: EventSink,
) {
    let (socket, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(error = %err, "real-time connection failed");
            return;
        }
    };
    let (mut write, mut read) = socket.split();
    let mut established = false;
    let mut pending: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(frame)) if established => {
                    if let Err(err) = write.send(Message::Text(frame)).await {
                        warn!(error = %err, "real-time write failed");
                        break;
                    }
                }
                Some(Command::Send(frame)) => {
                    queue_until_established(&mut pending, frame);
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    debug!("real-time connection closed by client");
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_inbound(&text) {
                    Ok(InboundFrame::ConnectionEstablished { socket_id }) => {
                        info!(socket_id = %socket_id, "real-time connection established");
                        established = true;
                        let mut failed = false;
                        for frame in pending.drain(..) {
                            if let Err(err) = write.send(Message::Text(frame)).await {
                                warn!(error = %err, "real-time write failed");
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Ok(InboundFrame::Ping) => {
                        if let Err(err) = write.send(Message::Text(pong_frame())).await {
                            warn!(error = %err, "real-time pong failed");
                            break;
                        }
                    }
                    Ok(InboundFrame::SubscriptionSucceeded { channel }) => {
                        debug!(channel = %channel, "subscription confirmed");
                    }
                    Ok(InboundFrame::Error { code, message }) => {
                        warn!(code = ?code, message = %message, "real-time service error");
                    }
                    Ok(InboundFrame::Event(event)) => {
                        let bound = bindings
                            .lock()
                            .contains(&(event.channel.clone(), event.event.clone()));
                        if bound && sink.send(event).is_err() {
                            debug!("event sink dropped, closing real-time connection");
                            break;
                        }
                    }
                    Ok(InboundFrame::Ignored) => {}
                    Err(err) => debug!(error = %err, "skipping malformed real-time frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("real-time connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "real-time read failed");
                    break;
                }
            },
        }
    }
}

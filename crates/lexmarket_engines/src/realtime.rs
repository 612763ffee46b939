#![forbid(unsafe_code)]

use std::env;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

pub const PUSHER_PROTOCOL_VERSION: u8 = 7;

/// Connection settings for the hosted real-time service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub app_key: String,
    pub cluster: String,
    pub host: Option<String>,
    pub tls: bool,
}

impl RealtimeConfig {
    pub fn new(app_key: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            cluster: cluster.into(),
            host: None,
            tls: true,
        }
    }

    /// `None` (with a warning) unless both the app key and the cluster are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let (Some(app_key), Some(cluster)) =
            (read("LEXMARKET_PUSHER_KEY"), read("LEXMARKET_PUSHER_CLUSTER"))
        else {
            warn!("LEXMARKET_PUSHER_KEY/LEXMARKET_PUSHER_CLUSTER not set, real-time updates disabled");
            return None;
        };
        let tls = read("LEXMARKET_PUSHER_TLS")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        Some(Self {
            app_key,
            cluster,
            host: read("LEXMARKET_PUSHER_HOST"),
            tls,
        })
    }

    pub fn socket_url(&self) -> String {
        let host = self
            .host
            .clone()
            .unwrap_or_else(|| format!("ws-{}.pusher.com", self.cluster));
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{host}/app/{}?protocol={PUSHER_PROTOCOL_VERSION}&client=lexmarket-rust&version={}&flash=false",
            self.app_key,
            env!("CARGO_PKG_VERSION")
        )
    }
}

/// One named event delivered on a subscribed channel. `data` is already
/// decoded JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

pub type EventSink = mpsc::UnboundedSender<ChannelEvent>;
pub type EventStream = mpsc::UnboundedReceiver<ChannelEvent>;

pub fn event_queue() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    #[error("no async runtime available for the real-time connection")]
    NoRuntime,
    #[error("real-time connection is closed")]
    Closed,
    #[error("invalid channel name: {0}")]
    InvalidChannel(String),
    #[error("malformed frame: {0}")]
    Frame(String),
}

/// Handle to one live connection. Only events for (channel, event) pairs that
/// were bound reach the [`EventSink`] the connection was opened with.
pub trait RealtimeClient: Send {
    fn subscribe(&mut self, channel: &str) -> Result<(), RealtimeError>;
    fn bind(&mut self, channel: &str, event: &str) -> Result<(), RealtimeError>;
    /// Drops the subscription and every binding on it.
    fn unsubscribe(&mut self, channel: &str) -> Result<(), RealtimeError>;
    fn disconnect(&mut self);
}

pub trait RealtimeConnector {
    fn connect(
        &self,
        config: &RealtimeConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RealtimeClient>, RealtimeError>;
}

pub(crate) fn validate_channel_name(channel: &str) -> Result<(), RealtimeError> {
    let ok = !channel.is_empty()
        && channel.len() <= 164
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '@' | ',' | '.' | ';'));
    if ok {
        Ok(())
    } else {
        Err(RealtimeError::InvalidChannel(channel.to_string()))
    }
}

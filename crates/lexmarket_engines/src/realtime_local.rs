#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::realtime::{
    validate_channel_name, ChannelEvent, EventSink, RealtimeClient, RealtimeConfig,
    RealtimeConnector, RealtimeError,
};

const CHANNEL_BUFFER_SIZE: usize = 64;

/// In-process stand-in for the hosted real-time service: one broadcast
/// channel per name, created on first use.
#[derive(Debug, Clone, Default)]
pub struct LocalRealtimeHub {
    channels: Arc<RwLock<BTreeMap<String, broadcast::Sender<ChannelEvent>>>>,
}

impl LocalRealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many live subscriptions the event was handed to.
    pub fn publish(&self, channel: &str, event: &str, data: Value) -> usize {
        let Some(tx) = self.channels.read().get(channel).cloned() else {
            return 0;
        };
        let delivered = tx
            .send(ChannelEvent {
                channel: channel.to_string(),
                event: event.to_string(),
                data,
            })
            .unwrap_or(0);
        debug!(channel, event, delivered, "local hub publish");
        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn receiver(&self, channel: &str) -> broadcast::Receiver<ChannelEvent> {
        self.channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .subscribe()
    }
}

impl RealtimeConnector for LocalRealtimeHub {
    fn connect(
        &self,
        _config: &RealtimeConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RealtimeClient>, RealtimeError> {
        Ok(Box::new(LocalRealtimeClient {
            hub: self.clone(),
            sink,
            bindings: Arc::default(),
            forwarders: BTreeMap::new(),
            closed: false,
        }))
    }
}

pub struct LocalRealtimeClient {
    hub: LocalRealtimeHub,
    sink: EventSink,
    bindings: Arc<Mutex<BTreeSet<(String, String)>>>,
    forwarders: BTreeMap<String, JoinHandle<()>>,
    closed: bool,
}

impl RealtimeClient for LocalRealtimeClient {
    fn subscribe(&mut self, channel: &str) -> Result<(), RealtimeError> {
        if self.closed {
            return Err(RealtimeError::Closed);
        }
        validate_channel_name(channel)?;
        if self.forwarders.contains_key(channel) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        // Subscribe before spawning so publishes right after this call are seen.
        let mut rx = self.hub.receiver(channel);
        let sink = self.sink.clone();
        let bindings = Arc::clone(&self.bindings);
        let handle = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let bound = bindings
                            .lock()
                            .contains(&(event.channel.clone(), event.event.clone()));
                        if bound && sink.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "local subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.forwarders.insert(channel.to_string(), handle);
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
        if let Some(handle) = self.forwarders.remove(channel) {
            handle.abort();
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.bindings.lock().clear();
        for (_, handle) in std::mem::take(&mut self.forwarders) {
            handle.abort();
        }
        self.closed = true;
    }
}

impl Drop for LocalRealtimeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

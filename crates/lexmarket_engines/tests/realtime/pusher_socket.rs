#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lexmarket_engines::realtime::{
    event_queue, ChannelEvent, EventStream, RealtimeClient, RealtimeConfig, RealtimeConnector,
};
use lexmarket_engines::realtime_pusher::PusherConnector;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// A single-connection Pusher endpoint. Frames pushed through `to_client` are
/// written to the socket; text frames the client sends come back parsed.
struct ScriptedServer {
    addr: SocketAddr,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<Value>,
}

impl ScriptedServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (to_client, mut script) = mpsc::unbounded_channel::<String>();
        let (seen, from_client) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = socket.split();
            loop {
                tokio::select! {
                    frame = script.recv() => match frame {
                        Some(text) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
                            let _ = seen.send(value);
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            let _ = seen.send(json!({"event": "closed"}));
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
        });

        Self {
            addr,
            to_client,
            from_client,
        }
    }

    fn push(&self, frame: Value) {
        self.to_client.send(frame.to_string()).unwrap();
    }

    async fn next_from_client(&mut self) -> Value {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("client frame in time")
            .expect("server still running")
    }

    fn config(&self) -> RealtimeConfig {
        let mut cfg = RealtimeConfig::new("app-key", "mt1");
        cfg.host = Some(self.addr.to_string());
        cfg.tls = false;
        cfg
    }
}

async fn next_event(events: &mut EventStream) -> ChannelEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event in time")
        .expect("event stream open")
}

#[tokio::test]
async fn at_pusher_socket_01_handshake_subscribe_ping_filter_and_unsubscribe() {
    let mut server = ScriptedServer::start().await;
    let (sink, mut events) = event_queue();
    let mut client = PusherConnector.connect(&server.config(), sink).unwrap();

    client.subscribe("payment-plink_9").unwrap();
    client.bind("payment-plink_9", "payment-completed").unwrap();

    server.push(json!({
        "event": "pusher:connection_established",
        "data": "{\"socket_id\":\"1234.5678\",\"activity_timeout\":120}"
    }));
    assert_eq!(
        server.next_from_client().await,
        json!({"event": "pusher:subscribe", "data": {"channel": "payment-plink_9"}})
    );

    server.push(json!({"event": "pusher:ping", "data": {}}));
    assert_eq!(server.next_from_client().await["event"], "pusher:pong");

    server.push(json!({
        "event": "pusher_internal:subscription_succeeded",
        "channel": "payment-plink_9",
        "data": "{}"
    }));
    server.push(json!({
        "event": "payment-updated",
        "channel": "payment-plink_9",
        "data": "{\"step\":1}"
    }));
    server.push(json!({
        "event": "payment-completed",
        "channel": "payment-plink_9",
        "data": "{\"case_id\":\"c_9\",\"payment_status\":\"paid\"}"
    }));

    let event = next_event(&mut events).await;
    assert_eq!(event.channel, "payment-plink_9");
    assert_eq!(event.event, "payment-completed");
    assert_eq!(event.data, json!({"case_id": "c_9", "payment_status": "paid"}));
    assert!(events.try_recv().is_err());

    client.unsubscribe("payment-plink_9").unwrap();
    assert_eq!(
        server.next_from_client().await,
        json!({"event": "pusher:unsubscribe", "data": {"channel": "payment-plink_9"}})
    );

    client.disconnect();
    assert_eq!(server.next_from_client().await, json!({"event": "closed"}));
}

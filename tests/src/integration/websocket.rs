//! # End-to-End over WebSocket
//!
//! The focuser and location flows against a local stand-in for the
//! device-control server, including a server-side disconnect.

#[cfg(test)]
mod tests {
    use crate::fixtures::{device_schemas, FocuserStore, SYNC_LOCATION, SYNC_LOCATION_RESPONSE};
    use futures_util::{SinkExt, StreamExt};
    use obs_bus::{BusConfig, ConnectionState, MessageBus};
    use obs_transport::{TransportConfig, WebSocketTransport};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    // =============================================================================
    // DEVICE SERVER STAND-IN
    // =============================================================================

    /// Server reply to one client frame, if any.
    fn device_reply(frame: &Value) -> Option<Value> {
        match frame["topic"].as_str()? {
            "focuser/setting" => Some(json!({
                "topic": "focuser/status",
                "payload": {"position": frame["payload"]["value"], "moving": false},
                "timestamp": 0,
            })),
            SYNC_LOCATION => Some(json!({
                "topic": SYNC_LOCATION_RESPONSE,
                "payload": {"status": "success"},
                "timestamp": 0,
                "id": frame["id"],
            })),
            _ => None,
        }
    }

    /// Spawn the server. With `drop_first`, the first connection is closed
    /// right after its first frame, before any reply.
    async fn spawn_device_server(drop_first: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut tx, mut rx) = ws.split();
                    while let Some(Ok(msg)) = rx.next().await {
                        let WsMessage::Text(text) = msg else {
                            continue;
                        };
                        if drop_first && n == 0 {
                            let _ = tx.send(WsMessage::Close(None)).await;
                            return;
                        }
                        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                            continue;
                        };
                        if let Some(reply) = device_reply(&frame) {
                            if tx.send(WsMessage::Text(reply.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{addr}"), accepted)
    }

    fn connect(url: String) -> MessageBus {
        let transport = TransportConfig {
            url,
            reconnect_delay: 50,
            max_reconnect_delay: 200,
            ..TransportConfig::default()
        };
        let config = BusConfig {
            retry_delay: 100,
            max_retries: 10,
            ..BusConfig::default()
        };
        MessageBus::builder(Arc::new(WebSocketTransport::new(transport).unwrap()))
            .config(config)
            .schemas(device_schemas())
            .build()
            .unwrap()
    }

    async fn wait_open(bus: &MessageBus) {
        let mut rx = bus.watch_state();
        timeout(Duration::from_secs(5), rx.wait_for(|s| *s == ConnectionState::Open))
            .await
            .expect("timed out waiting for Open")
            .expect("state channel closed");
    }

    async fn wait_position(store: &FocuserStore, position: i64) {
        timeout(Duration::from_secs(5), async {
            while store.view().position != position {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("focuser never reported {position}"));
    }

    // =============================================================================
    // SCENARIOS
    // =============================================================================

    #[tokio::test]
    async fn test_focuser_round_trip() {
        let (url, _) = spawn_device_server(false).await;
        let bus = connect(url);
        let store = FocuserStore::attach(&bus);
        wait_open(&bus).await;

        store.set_target(15000).unwrap();
        wait_position(&store, 15000).await;
        assert_eq!(store.view().target, None);

        bus.close();
    }

    #[tokio::test]
    async fn test_command_survives_server_disconnect() {
        let (url, accepted) = spawn_device_server(true).await;
        let bus = connect(url);
        let store = FocuserStore::attach(&bus);
        wait_open(&bus).await;

        // Swallowed by the dying connection; the server never answers it.
        store.set_target(100).unwrap();
        timeout(Duration::from_secs(5), async {
            while accepted.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client never reconnected");
        wait_open(&bus).await;

        store.set_target(25000).unwrap();
        wait_position(&store, 25000).await;
        assert_eq!(store.view().target, None);
        bus.close();
    }

    #[tokio::test]
    async fn test_sync_location_request() {
        let (url, _) = spawn_device_server(false).await;
        let bus = connect(url);

        // Issued while still connecting; flushed once the socket opens.
        let reply = bus
            .request(
                SYNC_LOCATION,
                json!({"latitude": 39.9, "longitude": 116.4}),
                SYNC_LOCATION_RESPONSE,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(reply.payload, json!({"status": "success"}));
        bus.close();
        assert_eq!(bus.state(), ConnectionState::Closed);
    }
}

//! # Location Sync
//!
//! Request/response over pub/sub: `sync-location` goes out with a
//! correlation id and the server answers on `sync-location-response` with
//! the same id.

#[cfg(test)]
mod tests {
    use crate::fixtures::{device_schemas, SYNC_LOCATION, SYNC_LOCATION_RESPONSE};
    use futures_util::StreamExt;
    use obs_bus::testing::FakeTransport;
    use obs_bus::{BusConfig, BusError, MemorySink, Message, MessageBus, PublishOutcome};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn bus_over(transport: &Arc<FakeTransport>) -> MessageBus {
        MessageBus::builder(transport.clone())
            .config(BusConfig::default())
            .schemas(device_schemas())
            .sink(MemorySink::new())
            .build()
            .unwrap()
    }

    fn reply_to(request: &Value, status: &str) -> Value {
        json!({
            "topic": SYNC_LOCATION_RESPONSE,
            "payload": {"status": status},
            "timestamp": 1,
            "id": request["id"],
        })
    }

    /// Answer the first `sync-location` frame once it has been sent.
    async fn serve_one(transport: Arc<FakeTransport>, status: &str) {
        loop {
            let request = transport
                .sent_json()
                .into_iter()
                .find(|frame| frame["topic"] == SYNC_LOCATION);
            if let Some(request) = request {
                transport.deliver_json(&reply_to(&request, status));
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_reply_reaches_subscriber_once() {
        let transport = FakeTransport::open_now();
        let bus = bus_over(&transport);

        let seen: Arc<Mutex<Vec<Message>>> = Arc::default();
        let _sub = {
            let seen = seen.clone();
            bus.subscribe(SYNC_LOCATION_RESPONSE, move |message| {
                seen.lock().push(message.clone());
                Ok(())
            })
        };

        let outcome = bus
            .publish_with_id(
                SYNC_LOCATION,
                json!({"latitude": 39.9, "longitude": 116.4}),
                "loc-1",
            )
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Sent);

        let request = transport.sent_json().remove(0);
        assert_eq!(request["payload"], json!({"latitude": 39.9, "longitude": 116.4}));
        transport.deliver_json(&reply_to(&request, "success"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, json!({"status": "success"}));
        assert_eq!(seen[0].id.as_deref(), Some("loc-1"));
    }

    #[tokio::test]
    async fn test_request_resolves_and_subscriber_still_sees_reply() {
        let transport = FakeTransport::open_now();
        let bus = bus_over(&transport);
        let mut stream = bus.stream(SYNC_LOCATION_RESPONSE);

        let (reply, ()) = tokio::join!(
            bus.request(
                SYNC_LOCATION,
                json!({"latitude": -33.9, "longitude": 18.4}),
                SYNC_LOCATION_RESPONSE,
                Duration::from_secs(1),
            ),
            serve_one(transport.clone(), "success"),
        );

        let reply = reply.unwrap();
        assert_eq!(reply.payload["status"], "success");
        assert_eq!(bus.pending_requests(), 0);

        let streamed = stream.next().await.unwrap();
        assert_eq!(streamed.id, reply.id);
    }

    #[tokio::test]
    async fn test_request_sent_once_connection_opens() {
        let transport = FakeTransport::new();
        let bus = bus_over(&transport);

        let opener = {
            let transport = transport.clone();
            async move {
                while transport.attempts().is_empty() {
                    tokio::task::yield_now().await;
                }
                transport.open();
                serve_one(transport, "success").await;
            }
        };

        let (reply, ()) = tokio::join!(
            bus.request(
                SYNC_LOCATION,
                json!({"latitude": 51.5, "longitude": -0.1}),
                SYNC_LOCATION_RESPONSE,
                Duration::from_secs(1),
            ),
            opener,
        );
        assert!(reply.is_ok());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_request_with_invalid_coordinates_fails_fast() {
        let transport = FakeTransport::open_now();
        let bus = bus_over(&transport);

        let err = bus
            .request(
                SYNC_LOCATION,
                json!({"latitude": 123.0, "longitude": 0.0}),
                SYNC_LOCATION_RESPONSE,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        match err {
            BusError::Rejected { stage, reason } => {
                assert_eq!(stage, "schema-validation");
                assert!(reason.contains("/latitude"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(transport.attempts().is_empty());
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_ignores_late_reply() {
        let transport = FakeTransport::open_now();
        let bus = bus_over(&transport);

        let err = bus
            .request(
                SYNC_LOCATION,
                json!({"latitude": 0.0, "longitude": 0.0}),
                SYNC_LOCATION_RESPONSE,
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::RequestTimeout { .. }));

        // The late reply is an ordinary message now
        let request = transport.sent_json().remove(0);
        transport.deliver_json(&reply_to(&request, "success"));
        assert_eq!(bus.pending_requests(), 0);
        assert_eq!(bus.stats().received, 1);
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_request() {
        let transport = FakeTransport::open_now();
        let bus = bus_over(&transport);

        let closer = {
            let bus = bus.clone();
            async move {
                while bus.pending_requests() == 0 {
                    tokio::task::yield_now().await;
                }
                bus.close();
            }
        };

        let (reply, ()) = tokio::join!(
            bus.request(
                SYNC_LOCATION,
                json!({"latitude": 0.0, "longitude": 0.0}),
                SYNC_LOCATION_RESPONSE,
                Duration::from_secs(5),
            ),
            closer,
        );
        assert_eq!(reply.unwrap_err(), BusError::Closed);
    }
}

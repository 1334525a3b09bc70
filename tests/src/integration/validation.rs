//! # Schema Validation
//!
//! Payloads are checked against their topic's schema on the way out and on
//! the way in. Rejected messages never reach the wire or a subscriber and
//! are reported at ERROR.

#[cfg(test)]
mod tests {
    use crate::fixtures::device_schemas;
    use obs_bus::testing::FakeTransport;
    use obs_bus::{
        BusConfig, Direction, LogLevel, MemorySink, Message, MessageBus, PublishOutcome, Verdict,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn strict_bus(transport: &Arc<FakeTransport>, sink: Arc<MemorySink>) -> MessageBus {
        let config = BusConfig {
            strict_schemas: true,
            ..BusConfig::default()
        };
        MessageBus::builder(transport.clone())
            .config(config)
            .schemas(device_schemas())
            .sink(sink)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_setting_rejected_outbound() {
        let transport = FakeTransport::open_now();
        let sink = MemorySink::new();
        let bus = strict_bus(&transport, sink.clone());

        let outcome = bus
            .publish("focuser/setting", json!({"setting": "temperature", "value": 5}))
            .unwrap();

        assert_eq!(outcome, PublishOutcome::Dropped);
        assert!(transport.attempts().is_empty());
        let errors = sink.events("validation_failed");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("/setting"));
        assert_eq!(bus.stats().rejected_outbound, 1);
    }

    #[tokio::test]
    async fn test_unregistered_topic_rejected_when_strict() {
        let transport = FakeTransport::open_now();
        let sink = MemorySink::new();
        let bus = strict_bus(&transport, sink.clone());
        let seen: Arc<Mutex<Vec<Message>>> = Arc::default();
        let _sub = {
            let seen = seen.clone();
            bus.subscribe("guider/status", move |m| {
                seen.lock().push(m.clone());
                Ok(())
            })
        };

        assert_eq!(
            bus.publish("guider/command", json!({"start": true})).unwrap(),
            PublishOutcome::Dropped
        );
        transport.deliver_json(&json!({"topic": "guider/status", "payload": {"rms": 0.4}}));

        assert!(seen.lock().is_empty());
        assert_eq!(sink.count_at(LogLevel::Error), 2);
    }

    #[tokio::test]
    async fn test_runtime_registration_applies_to_next_message() {
        let transport = FakeTransport::open_now();
        let sink = MemorySink::new();
        let bus = strict_bus(&transport, sink.clone());

        assert_eq!(
            bus.publish("dome/command", json!({"action": "open"})).unwrap(),
            PublishOutcome::Dropped
        );

        bus.schemas().register_fn("dome/command", |payload| {
            match payload.get("action").and_then(|a| a.as_str()) {
                Some("open" | "close" | "stop") => Ok(()),
                _ => Err("action must be open, close or stop".into()),
            }
        });

        assert_eq!(
            bus.publish("dome/command", json!({"action": "open"})).unwrap(),
            PublishOutcome::Sent
        );
        assert_eq!(
            bus.publish("dome/command", json!({"action": "spin"})).unwrap(),
            PublishOutcome::Dropped
        );
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_stage_runs_after_validation() {
        let transport = FakeTransport::open_now();
        let sink = MemorySink::new();
        let calls: Arc<Mutex<Vec<String>>> = Arc::default();
        let bus = {
            let calls = calls.clone();
            MessageBus::builder(transport.clone())
                .schemas(device_schemas())
                .sink(sink.clone())
                .use_fn("operator-lock", move |message, ctx| {
                    calls.lock().push(format!("{} {}", ctx.direction, message.topic));
                    if ctx.direction == Direction::Outbound && message.topic == "focuser/setting" {
                        Verdict::Reject("focuser locked by another operator".into())
                    } else {
                        Verdict::Accept(message)
                    }
                })
                .build()
                .unwrap()
        };

        // Fails the schema first, so the custom stage never sees it
        bus.publish("focuser/setting", json!({"value": -1})).unwrap();
        assert!(calls.lock().is_empty());

        let outcome = bus
            .publish("focuser/setting", json!({"setting": "speed", "value": 3}))
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Dropped);
        assert_eq!(calls.lock().len(), 1);

        let last = sink.events("validation_failed").pop().unwrap();
        assert!(last.message.contains("operator-lock"));
        assert!(transport.attempts().is_empty());
    }
}

//! # Focuser Command Flow
//!
//! The focuser page shows a new target position at once, sends
//! `focuser/setting`, and clears the pending target when `focuser/status`
//! reports the focuser stopped there.

#[cfg(test)]
mod tests {
    use crate::fixtures::{device_schemas, FocuserStore, FOCUSER_SETTING};
    use obs_bus::testing::FakeTransport;
    use obs_bus::{BusConfig, LogLevel, MemorySink, MessageBus, PublishOutcome};
    use serde_json::json;
    use std::sync::Arc;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Rig {
        bus: MessageBus,
        transport: Arc<FakeTransport>,
        sink: Arc<MemorySink>,
        store: FocuserStore,
    }

    fn rig(transport: Arc<FakeTransport>) -> Rig {
        let sink = MemorySink::new();
        let bus = MessageBus::builder(transport.clone())
            .config(BusConfig::default())
            .schemas(device_schemas())
            .sink(sink.clone())
            .build()
            .unwrap();
        let store = FocuserStore::attach(&bus);
        Rig {
            bus,
            transport,
            sink,
            store,
        }
    }

    fn status(position: i64, moving: bool) -> serde_json::Value {
        json!({
            "topic": "focuser/status",
            "payload": {"position": position, "moving": moving},
            "timestamp": 1_700_000_000_000u64,
        })
    }

    // =============================================================================
    // COMMAND → STATUS CONFIRMATION
    // =============================================================================

    #[tokio::test]
    async fn test_target_confirmed_by_status() {
        let r = rig(FakeTransport::open_now());

        assert_eq!(r.store.set_target(15000).unwrap(), PublishOutcome::Sent);
        assert_eq!(r.store.view().target, Some(15000));

        let sent = r.transport.sent_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["topic"], FOCUSER_SETTING.name());
        assert_eq!(
            sent[0]["payload"],
            json!({"setting": "targetPosition", "value": 15000})
        );

        // Still travelling: target stays pending
        r.transport.deliver_json(&status(9000, true));
        let view = r.store.view();
        assert_eq!(view.position, 9000);
        assert_eq!(view.target, Some(15000));

        r.transport.deliver_json(&status(15000, false));
        let view = r.store.view();
        assert_eq!(view.position, 15000);
        assert!(!view.moving);
        assert_eq!(view.target, None);
        assert_eq!(view.updates, 2);
    }

    #[tokio::test]
    async fn test_command_during_outage_flushed_on_reconnect() {
        let r = rig(FakeTransport::new());

        assert_eq!(r.store.set_target(20000).unwrap(), PublishOutcome::Queued);
        assert_eq!(r.store.view().target, Some(20000));
        assert!(r.transport.sent().is_empty());

        r.transport.open();
        let sent = r.transport.sent_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["payload"]["value"], 20000);
        assert_eq!(r.bus.queued(), 0);

        r.transport.deliver_json(&status(20000, false));
        assert_eq!(r.store.view().target, None);
    }

    #[tokio::test]
    async fn test_out_of_range_target_rolled_back() {
        let r = rig(FakeTransport::open_now());

        assert_eq!(r.store.set_target(90000).unwrap(), PublishOutcome::Dropped);
        assert_eq!(r.store.view().target, None);
        assert!(r.transport.attempts().is_empty());

        let failures = r.sink.events("validation_failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].level, LogLevel::Error);
        assert_eq!(failures[0].topic.as_deref(), Some("focuser/setting"));
    }

    #[tokio::test]
    async fn test_malformed_status_never_reaches_store() {
        let r = rig(FakeTransport::open_now());
        r.transport.deliver_json(&status(100, false));

        r.transport.deliver_json(&json!({
            "topic": "focuser/status",
            "payload": {"position": "far"},
            "timestamp": 2,
        }));

        let view = r.store.view();
        assert_eq!(view.position, 100);
        assert_eq!(view.updates, 1);
        assert_eq!(r.bus.stats().rejected_inbound, 1);
    }

    #[tokio::test]
    async fn test_two_stores_see_same_status() {
        let r = rig(FakeTransport::open_now());
        let second = FocuserStore::attach(&r.bus);

        r.transport.deliver_json(&status(4200, false));

        assert_eq!(r.store.view().position, 4200);
        assert_eq!(second.view().position, 4200);
        assert_eq!(r.bus.subscriber_count("focuser/status"), 2);

        drop(second);
        assert_eq!(r.bus.subscriber_count("focuser/status"), 1);
    }
}

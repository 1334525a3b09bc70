//! # Connection Outages
//!
//! Commands issued while the link is down are retried on a doubling
//! schedule, flushed in order when the link comes back, and dropped with an
//! ERROR once retries run out. Frames the server re-sends after a reconnect
//! are not dispatched twice.

#[cfg(test)]
mod tests {
    use crate::fixtures::device_schemas;
    use obs_bus::testing::FakeTransport;
    use obs_bus::{
        BusConfig, ConnectionState, LogLevel, MemorySink, Message, MessageBus, PublishOutcome,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Rig {
        bus: MessageBus,
        transport: Arc<FakeTransport>,
        sink: Arc<MemorySink>,
    }

    fn rig(transport: Arc<FakeTransport>, config: BusConfig) -> Rig {
        let sink = MemorySink::new();
        let bus = MessageBus::builder(transport.clone())
            .config(config)
            .schemas(device_schemas())
            .sink(sink.clone())
            .build()
            .unwrap();
        Rig {
            bus,
            transport,
            sink,
        }
    }

    fn setting(value: i64) -> serde_json::Value {
        json!({"setting": "targetPosition", "value": value})
    }

    // =============================================================================
    // RETRY SCHEDULE
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retries_back_off_then_drop_with_error() {
        let config = BusConfig {
            max_retries: 3,
            retry_delay: 100,
            ..BusConfig::default()
        };
        let r = rig(FakeTransport::new(), config);
        let start = Instant::now();

        assert_eq!(
            r.bus.publish("focuser/setting", setting(15000)).unwrap(),
            PublishOutcome::Queued
        );
        assert_eq!(r.bus.subscriber_count("focuser/status"), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;

        let at: Vec<Duration> = r.transport.attempts().iter().map(|a| a.at - start).collect();
        assert_eq!(at.len(), 4, "initial send plus three retries");
        let gaps: Vec<u128> = at.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![100, 200, 400]);

        let errors: Vec<_> = r
            .sink
            .records()
            .into_iter()
            .filter(|record| record.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event, "delivery_exhausted");
        assert_eq!(errors[0].topic.as_deref(), Some("focuser/setting"));
        assert_eq!(r.bus.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_capped_by_max_retry_delay() {
        let config = BusConfig {
            max_retries: 5,
            retry_delay: 100,
            max_retry_delay: 250,
            ..BusConfig::default()
        };
        let r = rig(FakeTransport::new(), config);

        r.bus.publish("dome/command", json!({"action": "open"})).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let attempts = r.transport.attempts();
        let gaps: Vec<u128> = attempts
            .windows(2)
            .map(|w| (w[1].at - w[0].at).as_millis())
            .collect();
        assert_eq!(gaps, vec![100, 200, 250, 250, 250]);
        assert_eq!(r.bus.stats().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_recovers_before_retries_run_out() {
        let config = BusConfig {
            max_retries: 3,
            retry_delay: 100,
            ..BusConfig::default()
        };
        let r = rig(FakeTransport::open_now(), config);
        r.transport.fail_next_sends(2);

        r.bus.publish("focuser/setting", setting(3000)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(r.transport.attempts().len(), 3);
        assert_eq!(r.transport.sent_json()[0]["payload"]["value"], 3000);
        assert!(r.sink.events("delivery_exhausted").is_empty());
        let stats = r.bus.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.sent, 1);
    }

    // =============================================================================
    // RECONNECT
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_flushes_backlog_in_order() {
        let config = BusConfig {
            retry_delay: 5_000,
            ..BusConfig::default()
        };
        let r = rig(FakeTransport::open_now(), config);
        r.bus.publish("focuser/setting", setting(1)).unwrap();

        r.transport.drop_connection();
        for value in [2, 3, 4] {
            assert_eq!(
                r.bus.publish("focuser/setting", setting(value)).unwrap(),
                PublishOutcome::Queued
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        r.transport.open();

        let values: Vec<_> = r
            .transport
            .sent_json()
            .iter()
            .map(|frame| frame["payload"]["value"].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(r.bus.queued(), 0);
    }

    #[tokio::test]
    async fn test_state_changes_observable() {
        let r = rig(FakeTransport::new(), BusConfig::default());
        let mut states = r.bus.watch_state();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

        r.transport.open();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Open);

        r.transport.drop_connection();
        assert_eq!(r.bus.state(), ConnectionState::Reconnecting);
        assert_eq!(*states.borrow_and_update(), ConnectionState::Reconnecting);

        r.bus.close();
        assert_eq!(r.bus.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_resent_frame_after_reconnect_dispatched_once() {
        let r = rig(FakeTransport::open_now(), BusConfig::default());
        let seen: Arc<Mutex<Vec<Message>>> = Arc::default();
        let _sub = {
            let seen = seen.clone();
            r.bus.subscribe("focuser/status", move |message| {
                seen.lock().push(message.clone());
                Ok(())
            })
        };
        let frame = json!({
            "topic": "focuser/status",
            "payload": {"position": 500, "moving": false},
            "timestamp": 10,
            "id": "status-77",
        });

        r.transport.deliver_json(&frame);
        r.transport.drop_connection();
        r.transport.open();
        r.transport.deliver_json(&frame);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(r.bus.stats().duplicates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_backlog() {
        let r = rig(FakeTransport::new(), BusConfig::default());
        r.bus.publish("focuser/setting", setting(1)).unwrap();
        r.bus.publish("focuser/setting", setting(2)).unwrap();
        assert_eq!(r.bus.queued(), 2);

        r.bus.close();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(r.bus.queued(), 0);
        assert_eq!(r.transport.attempts().len(), 2);
        let discarded = r.sink.events("queue_discarded");
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].level, LogLevel::Warn);
    }
}

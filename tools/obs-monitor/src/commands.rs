//! Subcommand implementations.
//!
//! Each command takes the bus and an output sink so it can run against an
//! in-memory transport in tests.

use crate::cli::{PublishArgs, SyncLocationArgs, WatchArgs};
use anyhow::{bail, Context, Result};
use obs_bus::{Message, MessageBus, PublishOutcome, Subscription};
use serde_json::{json, Value};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const SYNC_LOCATION: &str = "sync-location";
pub const SYNC_LOCATION_RESPONSE: &str = "sync-location-response";

/// How often `publish` checks the retry queue.
pub const QUEUE_POLL: Duration = Duration::from_millis(50);

/// Print messages and connection changes as JSON lines until `shutdown`
/// resolves or the bus closes. Returns the number of messages printed.
pub async fn watch<W, S>(bus: &MessageBus, args: &WatchArgs, out: &mut W, shutdown: S) -> Result<u64>
where
    W: Write,
    S: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let _subscriptions: Vec<Subscription> = args
        .topics
        .iter()
        .map(|topic| {
            let tx = tx.clone();
            bus.subscribe(topic, move |message| {
                let _ = tx.send(message.clone());
                Ok(())
            })
        })
        .collect();
    drop(tx);

    let mut states = bus.watch_state();
    writeln!(out, "{}", json!({ "connection": states.borrow_and_update().to_string() }))?;
    info!(topics = ?args.topics, "Watching");

    tokio::pin!(shutdown);
    let mut printed = 0;
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            message = rx.recv() => {
                // Senders live in the subscriptions; none left means the bus closed.
                let Some(message) = message else { break };
                writeln!(out, "{}", serde_json::to_string(&message)?)?;
                printed += 1;
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                writeln!(out, "{}", json!({ "connection": state.to_string() }))?;
            }
        }
    }
    out.flush()?;
    Ok(printed)
}

/// Final fate of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent on the first attempt.
    Sent,
    /// Sent by the retry queue.
    Retried,
    /// Rejected by the pipeline or out of retries.
    Dropped,
}

/// Publish once and wait until the message is sent or given up on.
pub async fn publish(bus: &MessageBus, args: &PublishArgs) -> Result<Delivery> {
    let payload: Value = serde_json::from_str(&args.payload)
        .with_context(|| format!("payload for {} is not valid JSON", args.topic))?;

    let exhausted_before = bus.stats().exhausted;
    let outcome = match &args.id {
        Some(id) => bus.publish_with_id(&args.topic, payload, id.as_str())?,
        None => bus.publish(&args.topic, payload)?,
    };

    match outcome {
        PublishOutcome::Sent => Ok(Delivery::Sent),
        PublishOutcome::Dropped => Ok(Delivery::Dropped),
        PublishOutcome::Queued => {
            info!(topic = %args.topic, state = %bus.state(), "Send failed, waiting for retry");
            while bus.queued() > 0 {
                tokio::time::sleep(QUEUE_POLL).await;
            }
            if bus.is_closed() {
                bail!("bus closed before {} was delivered", args.topic);
            }
            if bus.stats().exhausted > exhausted_before {
                Ok(Delivery::Dropped)
            } else {
                Ok(Delivery::Retried)
            }
        }
    }
}

/// Ask the server to sync the site location.
///
/// Fails unless the reply carries `"status": "success"`.
pub async fn sync_location(bus: &MessageBus, args: &SyncLocationArgs) -> Result<Message> {
    let payload = json!({ "latitude": args.latitude, "longitude": args.longitude });
    let reply = bus
        .request(
            SYNC_LOCATION,
            payload,
            SYNC_LOCATION_RESPONSE,
            Duration::from_millis(args.timeout_ms),
        )
        .await?;

    match reply.payload.get("status").and_then(Value::as_str) {
        Some("success") => Ok(reply),
        _ => {
            warn!(reply = %reply.payload, "Location sync refused");
            bail!("location sync failed: {}", reply.payload)
        }
    }
}

//! Outbound enrichment stage.

use super::{Direction, Middleware, PipelineContext, Verdict};
use crate::clock::TimeSource;
use crate::message::Message;
use serde_json::Value;
use std::sync::Arc;

/// Stamps object payloads with `clientTimestamp` on the outbound pass.
///
/// Non-object payloads and inbound messages pass untouched.
pub struct ClientTimestamp {
    clock: Arc<dyn TimeSource>,
}

impl ClientTimestamp {
    pub const FIELD: &'static str = "clientTimestamp";

    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self { clock }
    }
}

impl Middleware for ClientTimestamp {
    fn name(&self) -> &str {
        "client-timestamp"
    }

    fn process(&self, mut message: Message, ctx: &PipelineContext) -> Verdict {
        if ctx.direction == Direction::Outbound {
            if let Value::Object(object) = &mut message.payload {
                object
                    .entry(Self::FIELD)
                    .or_insert_with(|| Value::from(self.clock.now()));
            }
        }
        Verdict::Accept(message)
    }
}

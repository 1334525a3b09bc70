//! Schema validation stage.

use super::{Middleware, PipelineContext, Verdict};
use crate::message::Message;
use crate::schema::SchemaRegistry;
use std::sync::Arc;

/// Rejects messages whose payload fails the topic's registered schema.
///
/// With `strict` set, topics that have no schema are rejected as well.
pub struct SchemaValidation {
    registry: Arc<SchemaRegistry>,
    strict: bool,
}

impl SchemaValidation {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            strict: false,
        }
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl Middleware for SchemaValidation {
    fn name(&self) -> &str {
        "schema-validation"
    }

    fn process(&self, message: Message, _ctx: &PipelineContext) -> Verdict {
        if self.strict && !self.registry.contains(&message.topic) {
            return Verdict::Reject(format!("no schema registered for {}", message.topic));
        }
        match self.registry.validate(&message.topic, &message.payload) {
            Ok(()) => Verdict::Accept(message),
            Err(violation) => Verdict::Reject(violation.to_string()),
        }
    }
}

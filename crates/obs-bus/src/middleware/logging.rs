//! Structured logging stage.

use super::{Middleware, PipelineContext, Verdict};
use crate::log::{LogLevel, LogRecord};
use crate::message::Message;

/// Logs every message that reaches it and passes it on unchanged.
pub struct LoggingMiddleware {
    level: LogLevel,
}

impl LoggingMiddleware {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn process(&self, message: Message, ctx: &PipelineContext) -> Verdict {
        if ctx.sink.enabled(self.level) {
            ctx.log(
                LogRecord::new(
                    self.level,
                    "message",
                    format!("{} {}", ctx.direction, message),
                )
                .topic(&message.topic),
            );
        }
        Verdict::Accept(message)
    }
}

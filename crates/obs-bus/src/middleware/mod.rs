//! # Middleware Pipeline
//!
//! An ordered list of stages applied to every message in both directions.
//! A stage returns [`Verdict::Accept`] with the (possibly transformed)
//! message, or [`Verdict::Reject`] with a reason. The first rejection ends
//! the pass; nothing after it runs and the message reaches neither the
//! transport nor any subscriber.
//!
//! Stages log through the [`LogSink`] in the [`PipelineContext`], never
//! through ambient globals.

mod enrich;
mod logging;
mod validation;

pub use enrich::ClientTimestamp;
pub use logging::LoggingMiddleware;
pub use validation::SchemaValidation;

use crate::log::{LogRecord, LogSink};
use crate::message::Message;
use std::fmt;
use std::sync::Arc;

/// Which dispatch path is running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frame received from the server
    Inbound,
    /// Message published by a consumer
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept(Message),
    Reject(String),
}

/// Per-pass context handed to every stage.
#[derive(Clone)]
pub struct PipelineContext {
    pub direction: Direction,
    pub sink: Arc<dyn LogSink>,
}

impl PipelineContext {
    pub fn new(direction: Direction, sink: Arc<dyn LogSink>) -> Self {
        Self { direction, sink }
    }

    pub fn log(&self, record: LogRecord) {
        self.sink.log(record);
    }
}

/// One pipeline stage.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, message: Message, ctx: &PipelineContext) -> Verdict;
}

/// Adapts a closure into a [`Middleware`].
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(Message, &PipelineContext) -> Verdict + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Message, &PipelineContext) -> Verdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, message: Message, ctx: &PipelineContext) -> Verdict {
        (self.f)(message, ctx)
    }
}

/// A rejected pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub stage: String,
    pub reason: String,
}

/// Immutable, ordered set of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    /// Run every stage in order, stopping at the first rejection.
    pub fn run(&self, mut message: Message, ctx: &PipelineContext) -> Result<Message, Rejection> {
        for stage in &self.stages {
            message = match stage.process(message, ctx) {
                Verdict::Accept(next) => next,
                Verdict::Reject(reason) => {
                    return Err(Rejection {
                        stage: stage.name().to_string(),
                        reason,
                    })
                }
            };
        }
        Ok(message)
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

//! # Schema Registry
//!
//! Per-topic payload rules checked by the validation stage on both the
//! inbound and the outbound pass. Each consumer module registers the rules
//! for the topics it owns.
//!
//! ```
//! use obs_bus::schema::{FieldKind, ObjectSchema, SchemaRegistry};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new();
//! registry.register(
//!     "focuser/setting",
//!     ObjectSchema::new()
//!         .required("setting", FieldKind::String)
//!         .one_of("setting", &["targetPosition", "speed"])
//!         .required("value", FieldKind::Number),
//! );
//!
//! assert!(registry
//!     .validate("focuser/setting", &json!({"setting": "targetPosition", "value": 15000}))
//!     .is_ok());
//! assert!(registry
//!     .validate("focuser/setting", &json!({"setting": "targetPosition"}))
//!     .is_err());
//! ```

use crate::error::SchemaViolation;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A validation rule for one topic's payload.
pub trait Schema: Send + Sync {
    /// Check `payload`. The returned violation's `topic` is filled in by the
    /// registry.
    fn validate(&self, payload: &Value) -> Result<(), SchemaViolation>;
}

/// JSON type expected for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Bool => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    kind: FieldKind,
    required: bool,
    range: Option<(f64, f64)>,
    one_of: Option<Vec<String>>,
}

/// Declarative rules for an object payload.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<FieldRule>,
    deny_unknown: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(self, field: &str, kind: FieldKind) -> Self {
        self.field(field, kind, true)
    }

    #[must_use]
    pub fn optional(self, field: &str, kind: FieldKind) -> Self {
        self.field(field, kind, false)
    }

    /// Inclusive numeric bounds. Declares an optional number field if
    /// `field` is not declared yet.
    #[must_use]
    pub fn range(mut self, field: &str, min: f64, max: f64) -> Self {
        self.rule_mut(field, FieldKind::Number).range = Some((min, max));
        self
    }

    /// Allowed string values. Declares an optional string field if `field`
    /// is not declared yet.
    #[must_use]
    pub fn one_of(mut self, field: &str, allowed: &[&str]) -> Self {
        self.rule_mut(field, FieldKind::String).one_of =
            Some(allowed.iter().map(|s| (*s).to_string()).collect());
        self
    }

    #[must_use]
    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    fn field(mut self, field: &str, kind: FieldKind, required: bool) -> Self {
        let rule = self.rule_mut(field, kind);
        rule.kind = kind;
        rule.required = required;
        self
    }

    fn rule_mut(&mut self, field: &str, kind: FieldKind) -> &mut FieldRule {
        let index = match self.fields.iter().position(|r| r.name == field) {
            Some(index) => index,
            None => {
                self.fields.push(FieldRule {
                    name: field.to_string(),
                    kind,
                    required: false,
                    range: None,
                    one_of: None,
                });
                self.fields.len() - 1
            }
        };
        &mut self.fields[index]
    }

    fn check_field(rule: &FieldRule, value: &Value) -> Result<(), SchemaViolation> {
        let path = format!("/{}", rule.name);

        if !rule.kind.matches(value) {
            return Err(SchemaViolation::new(
                path,
                format!("expected {}, found {}", rule.kind, json_type(value)),
            ));
        }

        if let (Some((min, max)), Some(n)) = (rule.range, value.as_f64()) {
            if n < min || n > max {
                return Err(SchemaViolation::new(
                    path,
                    format!("{n} is outside [{min}, {max}]"),
                ));
            }
        }

        if let (Some(allowed), Some(s)) = (&rule.one_of, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(SchemaViolation::new(
                    path,
                    format!("{s:?} is not one of {allowed:?}"),
                ));
            }
        }

        Ok(())
    }

    fn check_object(&self, object: &Map<String, Value>) -> Result<(), SchemaViolation> {
        for rule in &self.fields {
            match object.get(&rule.name) {
                Some(value) => Self::check_field(rule, value)?,
                None if rule.required => {
                    return Err(SchemaViolation::new(
                        format!("/{}", rule.name),
                        "missing required field",
                    ));
                }
                None => {}
            }
        }

        if self.deny_unknown {
            if let Some(unknown) = object
                .keys()
                .find(|key| !self.fields.iter().any(|r| &r.name == *key))
            {
                return Err(SchemaViolation::new(format!("/{unknown}"), "unknown field"));
            }
        }

        Ok(())
    }
}

impl Schema for ObjectSchema {
    fn validate(&self, payload: &Value) -> Result<(), SchemaViolation> {
        match payload {
            Value::Object(object) => self.check_object(object),
            other => Err(SchemaViolation::new(
                "/",
                format!("expected object, found {}", json_type(other)),
            )),
        }
    }
}

/// Accepts payloads that deserialize as `T`.
pub struct TypedSchema<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Schema for TypedSchema<T> {
    fn validate(&self, payload: &Value) -> Result<(), SchemaViolation> {
        T::deserialize(payload)
            .map(|_| ())
            .map_err(|e| SchemaViolation::new("/", e.to_string()))
    }
}

/// A closure used as a schema.
pub struct FnSchema<F>(pub F);

impl<F> Schema for FnSchema<F>
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, payload: &Value) -> Result<(), SchemaViolation> {
        (self.0)(payload).map_err(|reason| SchemaViolation::new("/", reason))
    }
}

/// Topic to schema map, shared between consumers and the bus.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<dyn Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the schema for `topic`.
    pub fn register(&self, topic: impl Into<String>, schema: impl Schema + 'static) {
        self.schemas.write().insert(topic.into(), Arc::new(schema));
    }

    /// Register a closure as the schema for `topic`.
    pub fn register_fn<F>(&self, topic: impl Into<String>, check: F)
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(topic, FnSchema(check));
    }

    pub fn unregister(&self, topic: &str) -> bool {
        self.schemas.write().remove(topic).is_some()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.schemas.read().contains_key(topic)
    }

    /// Validate `payload` against the schema for `topic`.
    ///
    /// Topics without a schema pass.
    pub fn validate(&self, topic: &str, payload: &Value) -> Result<(), SchemaViolation> {
        let schema = self.schemas.read().get(topic).cloned();
        match schema {
            Some(schema) => schema.validate(payload).map_err(|v| v.on_topic(topic)),
            None => Ok(()),
        }
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.schemas.read().keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Shared fixtures: device topics, their schemas, and a focuser store that
//! behaves like the dashboard's.

use obs_bus::{
    BusError, FieldKind, MessageBus, ObjectSchema, PublishOutcome, SchemaRegistry, Subscription,
    TypedTopic,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocuserStatus {
    pub position: i64,
    pub moving: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocuserSetting {
    pub setting: String,
    pub value: i64,
}

pub const FOCUSER_STATUS: TypedTopic<FocuserStatus> = TypedTopic::new("focuser/status");
pub const FOCUSER_SETTING: TypedTopic<FocuserSetting> = TypedTopic::new("focuser/setting");
pub const SYNC_LOCATION: &str = "sync-location";
pub const SYNC_LOCATION_RESPONSE: &str = "sync-location-response";

/// Focuser travel limit in steps.
pub const FOCUSER_MAX_POSITION: f64 = 60_000.0;

/// Schemas for every device topic used in the scenarios.
pub fn device_schemas() -> Arc<SchemaRegistry> {
    let registry = SchemaRegistry::new();
    registry.register(
        FOCUSER_SETTING.name(),
        ObjectSchema::new()
            .required("setting", FieldKind::String)
            .one_of("setting", &["targetPosition", "speed"])
            .required("value", FieldKind::Integer)
            .range("value", 0.0, FOCUSER_MAX_POSITION),
    );
    registry.register(
        FOCUSER_STATUS.name(),
        ObjectSchema::new()
            .required("position", FieldKind::Integer)
            .required("moving", FieldKind::Bool),
    );
    registry.register(
        SYNC_LOCATION,
        ObjectSchema::new()
            .required("latitude", FieldKind::Number)
            .range("latitude", -90.0, 90.0)
            .required("longitude", FieldKind::Number)
            .range("longitude", -180.0, 180.0),
    );
    registry.register(
        SYNC_LOCATION_RESPONSE,
        ObjectSchema::new()
            .required("status", FieldKind::String)
            .one_of("status", &["success", "error"]),
    );
    Arc::new(registry)
}

/// What the focuser page renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocuserView {
    pub position: i64,
    pub moving: bool,
    /// Target shown optimistically until a status confirms it.
    pub target: Option<i64>,
    pub updates: usize,
}

/// Focuser state kept in step with `focuser/status`.
pub struct FocuserStore {
    bus: MessageBus,
    view: Arc<Mutex<FocuserView>>,
    _status: Subscription,
}

impl FocuserStore {
    pub fn attach(bus: &MessageBus) -> Self {
        let view = Arc::new(Mutex::new(FocuserView::default()));
        let status = {
            let view = view.clone();
            bus.subscribe_typed(&FOCUSER_STATUS, move |envelope| {
                let status = envelope.payload;
                let mut view = view.lock();
                view.position = status.position;
                view.moving = status.moving;
                view.updates += 1;
                if !status.moving && view.target == Some(status.position) {
                    view.target = None;
                }
                Ok(())
            })
        };
        Self {
            bus: bus.clone(),
            view,
            _status: status,
        }
    }

    /// Show the new target at once and send the command.
    ///
    /// The optimistic target is rolled back if the bus drops the command.
    pub fn set_target(&self, position: i64) -> Result<PublishOutcome, BusError> {
        let previous = self.view.lock().target.replace(position);
        let setting = FocuserSetting {
            setting: "targetPosition".into(),
            value: position,
        };
        let outcome = self.bus.publish_typed(&FOCUSER_SETTING, &setting);
        if !matches!(outcome, Ok(PublishOutcome::Sent | PublishOutcome::Queued)) {
            self.view.lock().target = previous;
        }
        outcome
    }

    pub fn view(&self) -> FocuserView {
        self.view.lock().clone()
    }
}

//! Cross-crate integration scenarios.

pub mod focuser;
pub mod location_sync;
pub mod outage;
pub mod validation;
pub mod websocket;

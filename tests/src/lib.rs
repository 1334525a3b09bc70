//! # Observatory Link Test Suite
//!
//! Cross-crate scenarios that drive the bus the way the dashboard's device
//! stores do.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Device topics, schemas and a focuser store
//! └── integration/
//!     ├── focuser.rs        # Command, optimistic update, status confirm
//!     ├── location_sync.rs  # Request/response over pub/sub
//!     ├── outage.rs         # Retry schedule, reconnect flush, duplicates
//!     ├── validation.rs     # Schema rejection in both directions
//!     └── websocket.rs      # Same flows over a real socket
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p obs-tests
//! cargo test -p obs-tests integration::outage::
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;

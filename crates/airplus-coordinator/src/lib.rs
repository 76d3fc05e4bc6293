//! Device coordinator for the Air+ bridge.
//!
//! The coordinator consumes broker session events on a single run loop (the
//! sole mutator of device state), drives the polling cadence, rotates broker
//! credentials after token refreshes, and exposes the property-level command
//! surface the host framework consumes.

mod coordinator;
mod error;
mod snapshot;

pub use coordinator::DeviceCoordinator;
pub use error::{CoordError, CoordResult};
pub use snapshot::{
    filter_percentage, percentage_to_speed, speed_to_percentage, DeviceSnapshot, FilterInfo,
};

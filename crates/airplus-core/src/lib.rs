//! Core types, configuration, and utilities for the Air+ bridge.

mod config;
mod error;
mod logging;
pub mod models;

pub use config::{BridgeConfig, OidcConfig, DEFAULT_CLIENT_ID, HTTP_USER_AGENT};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use models::{ModelCatalog, ModelProfile};

//! Broker session for the Air+ bridge.
//!
//! This crate provides:
//! - One long-lived MQTT-over-WebSocket connection to the vendor's broker
//! - Reconnection backoff driven by disconnect cause classification
//! - Command envelope construction and inbound status decoding
//! - Credential rotation without an observable availability gap
//!
//! Connection events and inbound messages are delivered over an mpsc channel;
//! the consumer (the device coordinator) is the only component that mutates
//! shared device state in response to them.

mod backoff;
mod client;
mod error;
mod messages;
mod packet;

pub use backoff::{BackoffPolicy, DISCONNECT_CAUSE_NORMAL, DISCONNECT_CAUSE_NOT_AUTHORIZED,
    DISCONNECT_CAUSE_TRANSPORT};
pub use client::{BrokerConfig, BrokerCredentials, BrokerSession, ConnectionState, SessionEvent};
pub use error::{RelayError, RelayResult};
pub use messages::{
    control_topic, shadow_get_topic, shadow_update_topic, status_topic, CommandEnvelope,
    InboundMessage, PORT_CONFIG, PORT_CONTROL, PORT_FILTER_READ, PORT_STATUS,
};
pub use packet::{Packet, PacketError};

//! Blocknet - framed, acknowledged TCP messaging with a component bus.
//!
//! Messages of any size travel as sequences of self-framed blocks over
//! short-lived TCP connections. Every request can be acknowledged, retried
//! and deduplicated by its MSGUID. On top of the endpoints, a bus of
//! satellites (network, business, interface) exchanges typed envelopes.
//!
//! # Architecture
//!
//! - **Codec** - block framing, command envelopes, MSGUID tags
//! - **Classifier** - OS error codes mapped to fatal or transient
//! - **Endpoints** - [`net::ClientEndpoint`] and [`net::ServerContainer`]
//! - **Bus** - [`bus::BusBuilder`] wires satellites through a switchboard
//!
//! # Modules
//!
//! - [`codec`] - wire format
//! - [`classify`] - error classification
//! - [`net`] - client endpoint, server container, retry policy
//! - [`bus`] - envelopes, routing, satellites
//! - [`console`] - line-oriented satellites used by the binary
//! - [`config`] - configuration loading

pub mod bus;
pub mod classify;
pub mod codec;
pub mod config;
pub mod console;
pub mod constants;
pub mod net;

// Re-export commonly used types
pub use bus::{BusBuilder, BusHandle, Channel, Envelope, Kind, Satellite, SatelliteContext};
pub use config::{Config, NetConfig};
pub use net::{ClientEndpoint, ConnectionStatus, NetError, NetEvent, ServerContainer};

//! Component bus: satellites exchanging envelopes through a switchboard.
//!
//! # Modules
//!
//! - [`envelope`]: [`Envelope`], [`Kind`] and [`Channel`]
//! - [`routing`]: the routing table
//! - [`switchboard`]: [`BusBuilder`] and the running [`BusHandle`]
//! - [`satellite`]: the [`Satellite`] trait and its dispatch loop
//! - [`deferred`]: delayed envelopes a satellite schedules for itself
//! - [`network`]: satellites wrapping the client and server endpoints
//!
//! # Example
//!
//! ```no_run
//! use blocknet::bus::{BusBuilder, ClientSatellite};
//! use blocknet::config::NetConfig;
//!
//! # async fn run() {
//! let bus = BusBuilder::new()
//!     .attach(ClientSatellite::new(NetConfig::default(), "localhost", 10000).connect_on_start(true))
//!     .start();
//! bus.shutdown().await.ok();
//! bus.join().await;
//! # }
//! ```

pub mod deferred;
pub mod envelope;
pub mod error;
pub mod network;
pub mod routing;
pub mod satellite;
pub mod switchboard;

pub use deferred::{ActionId, DeferredActions};
pub use envelope::{Channel, Envelope, Kind};
pub use error::{BusError, BusResult};
pub use network::{event_envelope, ClientSatellite, ServerSatellite};
pub use routing::{route, Route};
pub use satellite::{Satellite, SatelliteContext, THREADS_READY, THREADS_STARTED};
pub use switchboard::{BusBuilder, BusHandle, BusPoster};

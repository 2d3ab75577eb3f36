//! Runtime for bridging application code to a flight simulator's in-process
//! RPC surface: attach, pump, route, and track AI objects against the
//! host's dispatch-once-per-frame protocol.

pub mod client;
pub mod config;
pub mod connection;
pub mod definition;
pub mod error;
pub mod facility;
pub mod fleet;
pub mod host;
pub mod packet;
pub mod pool;
pub mod pump;
pub mod router;

pub use client::SimClient;
pub use config::{ConnectOptions, HeartbeatFrequency, LogLevel};
pub use connection::ConnState;
pub use error::{Error, Result};
pub use fleet::{AiKind, AircraftHandle, CreateOptions, Waypoint};
pub use packet::{ClassifiedMessage, Discriminant};
pub use router::{Callback, EventKind, Filter, Subscription};

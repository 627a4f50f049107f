//! Signaling relay and client-side orchestration for peer-to-peer meeting rooms.
//!
//! The server half ([`Signaling`], [`Server`]) owns room membership and the waiting room and
//! routes negotiation messages between participants. The client half ([`client`]) drives the
//! local admission state and builds one direct media connection per remote participant.

pub mod client;
mod config;
mod error;
pub mod protocol;
mod server;
pub mod signaling;

pub use self::config::Config;
pub use self::error::SignalingError;
pub use self::server::Server;
pub use self::signaling::Signaling;

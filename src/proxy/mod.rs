//! Proxy plumbing: inbound handshakes, routing, outbound dialing and relay.

pub mod address;
pub mod outbound;
pub mod relay;
pub mod router;
pub mod socks;

pub use address::{Destination, Host};
pub use router::{RouteContext, RouteDecision, Router};

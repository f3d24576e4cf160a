//! Configuration profiles: the JSON text passed to start and update calls.

pub mod domain;
pub mod service;

pub use domain::{Inbound, Outbound, Profile, RouteRule};
pub use service::parse;

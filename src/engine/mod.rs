//! Proxy engine: lifecycle, accept workers and traffic tracking.

pub mod domain;
pub mod service;
mod workers;

pub use domain::{ConnectionsSnapshot, StatsSnapshot};
pub use service::Engine;

//! Instance handles: registry and per-instance state.

pub mod domain;
pub mod service;

pub use domain::Instance;
pub use service::{create, destroy, get};

//! Embeddable proxy core exposed through a C ABI.
//!
//! A host creates instances through [`api::ffi`], starts them with a JSON
//! profile and polls stats and live connections as JSON. Each running
//! instance owns its own tokio runtime.

pub mod api;
pub mod common;
pub mod engine;
pub mod instance;
pub mod profile;
pub mod proxy;

pub use api::ffi::{
    singbox_create_instance, singbox_destroy_instance, singbox_free_string, singbox_get_connection_info,
    singbox_get_last_error, singbox_get_stats, singbox_get_version, singbox_is_running, singbox_set_log_level,
    singbox_start_with_config, singbox_stop, singbox_update_config,
};
pub use common::{BoxCode, BoxError, BoxResult};

//! A single engine instance as seen through a handle.

use log::{warn, LevelFilter};
use parking_lot::Mutex;

use crate::common::error::{BoxError, BoxResult};
use crate::common::ids::InstanceId;
use crate::common::log::{self as box_log, instance_target, parse_level};
use crate::engine::Engine;
use crate::profile;

/// Engine plus the per-handle state the ABI exposes. Every operation takes
/// the engine lock, so calls on one instance never interleave.
pub struct Instance {
    id: InstanceId,
    target: String,
    engine: Mutex<Engine>,
    last_error: Mutex<Option<String>>,
}

impl Instance {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            target: instance_target(id),
            engine: Mutex::new(Engine::new(id)),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn start(&self, config: &str) -> BoxResult<()> {
        let profile = profile::parse(config)?;
        self.engine.lock().start(profile)
    }

    pub fn stop(&self) -> BoxResult<()> {
        self.engine.lock().stop()
    }

    pub fn update(&self, config: &str) -> BoxResult<()> {
        let profile = profile::parse(config)?;
        self.engine.lock().update(profile)
    }

    pub fn is_running(&self) -> bool {
        self.engine.lock().is_running()
    }

    pub fn set_log_level(&self, name: &str) -> BoxResult<()> {
        let level: LevelFilter =
            parse_level(name).ok_or_else(|| BoxError::invalid(format!("unknown log level `{name}`")))?;
        let _engine = self.engine.lock();
        box_log::set_level(self.id, level);
        Ok(())
    }

    pub fn stats_json(&self) -> BoxResult<String> {
        let stats = self.engine.lock().stats();
        serde_json::to_string(&stats).map_err(|e| BoxError::internal(format!("encode stats: {e}")))
    }

    pub fn connections_json(&self) -> BoxResult<String> {
        let connections = self.engine.lock().connections();
        serde_json::to_string(&connections)
            .map_err(|e| BoxError::internal(format!("encode connections: {e}")))
    }

    /// Stop the engine if it is running; used on destroy.
    pub(crate) fn shutdown(&self) {
        let mut engine = self.engine.lock();
        if engine.is_running() {
            if let Err(e) = engine.stop() {
                warn!(target: self.target.as_str(), "stop on destroy failed: {e}");
            }
        }
    }

    /// Remember `err` as the most recent failure and log it.
    pub fn record_error(&self, err: &BoxError) {
        warn!(target: self.target.as_str(), "{err}");
        *self.last_error.lock() = Some(err.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_keeps_latest_failure() {
        let instance = Instance::new(InstanceId::new(9101));
        assert!(instance.last_error().is_none());

        instance.record_error(&BoxError::NotRunning);
        instance.record_error(&BoxError::config("no inbounds"));
        assert_eq!(
            instance.last_error().as_deref(),
            Some("configuration error: no inbounds")
        );
    }

    #[test]
    fn malformed_config_is_rejected_before_the_engine() {
        let instance = Instance::new(InstanceId::new(9102));
        let err = instance.start("{not json").unwrap_err();
        assert_eq!(err.code(), crate::common::BoxCode::InvalidConfig);
        assert!(!instance.is_running());
    }

    #[test]
    fn log_level_names_are_checked() {
        let instance = Instance::new(InstanceId::new(9103));
        box_log::register(instance.id());
        instance.set_log_level("warning").unwrap();
        assert_eq!(box_log::level_of(instance.id()), LevelFilter::Warn);

        let err = instance.set_log_level("loud").unwrap_err();
        assert_eq!(err.code(), crate::common::BoxCode::InvalidArgument);
        assert_eq!(box_log::level_of(instance.id()), LevelFilter::Warn);
        box_log::unregister(instance.id());
    }

    #[test]
    fn idle_snapshots_are_valid_json() {
        let instance = Instance::new(InstanceId::new(9104));
        let stats: serde_json::Value = serde_json::from_str(&instance.stats_json().unwrap()).unwrap();
        assert_eq!(stats["running"], false);
        assert_eq!(stats["connections_total"], 0);

        let connections: serde_json::Value =
            serde_json::from_str(&instance.connections_json().unwrap()).unwrap();
        assert_eq!(connections["count"], 0);
    }
}

//! Process logger emitting JSON lines, with per-instance verbosity.
//!
//! Engine code logs through the `log` facade using the target returned by
//! [`instance_target`]. The logger parses the instance id back out of the
//! target and applies that instance's level, timestamp flag and optional
//! output file. Records from anywhere else use the environment default.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::{Mutex, RwLock};

use crate::common::config::app_cfg;
use crate::common::error::BoxResult;
use crate::common::ids::InstanceId;
use crate::common::time;

/// Prefix shared by every per-instance log target.
pub const INSTANCE_TARGET_PREFIX: &str = "singbox::instance::";

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Output settings of one instance.
struct Sink {
    level: LevelFilter,
    timestamp: bool,
    file: Option<Mutex<File>>,
}

fn sinks() -> &'static RwLock<HashMap<u64, Sink>> {
    static SINKS: OnceLock<RwLock<HashMap<u64, Sink>>> = OnceLock::new();
    SINKS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Log target used by everything running on behalf of `id`.
pub fn instance_target(id: InstanceId) -> String {
    format!("{INSTANCE_TARGET_PREFIX}{}", id.raw())
}

fn instance_of(target: &str) -> Option<u64> {
    target.strip_prefix(INSTANCE_TARGET_PREFIX)?.parse().ok()
}

/// Parse a level name as accepted by profiles and `singbox_set_log_level`.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" | "fatal" | "panic" => Some(LevelFilter::Error),
        "off" | "none" | "silent" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// Lowercase name used in stats output.
pub fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Install the process logger. Later calls are no-ops, as is the case where
/// the host already installed its own `log` implementation.
pub fn init() {
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    if log::set_boxed_logger(Box::new(BoxLogger)).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}

/// Start tracking an instance at the environment default level.
pub fn register(id: InstanceId) {
    sinks().write().insert(
        id.raw(),
        Sink {
            level: app_cfg().log_level,
            timestamp: true,
            file: None,
        },
    );
}

/// Forget an instance, closing its output file.
pub fn unregister(id: InstanceId) {
    sinks().write().remove(&id.raw());
}

/// Change the verbosity of a single instance.
pub fn set_level(id: InstanceId, level: LevelFilter) {
    if let Some(sink) = sinks().write().get_mut(&id.raw()) {
        sink.level = level;
    }
}

/// Current verbosity of an instance.
pub fn level_of(id: InstanceId) -> LevelFilter {
    sinks()
        .read()
        .get(&id.raw())
        .map(|sink| sink.level)
        .unwrap_or(app_cfg().log_level)
}

/// Apply the `log` section of a profile in one step.
pub fn configure(
    id: InstanceId,
    level: LevelFilter,
    timestamp: bool,
    output: Option<&Path>,
) -> BoxResult<()> {
    let file = match output {
        Some(path) => Some(Mutex::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    sinks().write().insert(
        id.raw(),
        Sink {
            level,
            timestamp,
            file,
        },
    );
    Ok(())
}

fn format_line(record: &Record, timestamp: bool) -> String {
    let level = match record.level() {
        Level::Error => "error",
        Level::Warn => "warn",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    };
    let mut line = serde_json::Map::new();
    if timestamp {
        line.insert("ts".into(), serde_json::Value::from(time::now_ms() as u64));
    }
    line.insert("level".into(), level.into());
    line.insert("target".into(), record.target().into());
    line.insert("msg".into(), record.args().to_string().into());
    serde_json::Value::Object(line).to_string()
}

/// `log::Log` implementation backing the library.
pub struct BoxLogger;

impl Log for BoxLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let threshold = match instance_of(metadata.target()) {
            Some(id) => sinks()
                .read()
                .get(&id)
                .map(|sink| sink.level)
                .unwrap_or(app_cfg().log_level),
            None => app_cfg().log_level,
        };
        metadata.level() <= threshold
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let Some(id) = instance_of(record.target()) else {
            eprintln!("{}", format_line(record, true));
            return;
        };

        let sinks = sinks().read();
        let sink = sinks.get(&id);
        let line = format_line(record, sink.map(|s| s.timestamp).unwrap_or(true));
        eprintln!("{line}");
        if let Some(file) = sink.and_then(|s| s.file.as_ref()) {
            let _ = writeln!(file.lock(), "{line}");
        }
    }

    fn flush(&self) {
        for sink in sinks().read().values() {
            if let Some(file) = sink.file.as_ref() {
                let _ = file.lock().flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profile_level_names() {
        assert_eq!(parse_level("trace"), Some(LevelFilter::Trace));
        assert_eq!(parse_level(" Debug "), Some(LevelFilter::Debug));
        assert_eq!(parse_level("warning"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("fatal"), Some(LevelFilter::Error));
        assert_eq!(parse_level("panic"), Some(LevelFilter::Error));
        assert_eq!(parse_level("off"), Some(LevelFilter::Off));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn targets_round_trip_instance_ids() {
        let target = instance_target(InstanceId::new(42));
        assert_eq!(target, "singbox::instance::42");
        assert_eq!(instance_of(&target), Some(42));
        assert_eq!(instance_of("singbox_core::engine"), None);
        assert_eq!(instance_of("singbox::instance::x"), None);
    }

    #[test]
    fn per_instance_levels_gate_records() {
        let id = InstanceId::new(u64::MAX - 7);
        register(id);
        set_level(id, LevelFilter::Warn);
        assert_eq!(level_of(id), LevelFilter::Warn);

        let target = instance_target(id);
        let info = Metadata::builder().level(Level::Info).target(&target).build();
        let error = Metadata::builder().level(Level::Error).target(&target).build();
        assert!(!BoxLogger.enabled(&info));
        assert!(BoxLogger.enabled(&error));

        unregister(id);
        assert_eq!(level_of(id), app_cfg().log_level);
    }

    #[test]
    fn output_file_receives_json_lines() {
        let id = InstanceId::new(u64::MAX - 8);
        let path = std::env::temp_dir().join(format!("singbox-core-log-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        configure(id, LevelFilter::Debug, false, Some(&path)).unwrap();
        let target = instance_target(id);
        BoxLogger.log(
            &Record::builder()
                .level(Level::Info)
                .target(&target)
                .args(format_args!("listener ready"))
                .build(),
        );
        unregister(id);

        let written = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(line["level"], "info");
        assert_eq!(line["msg"], "listener ready");
        assert!(line.get("ts").is_none());
        let _ = std::fs::remove_file(&path);
    }
}

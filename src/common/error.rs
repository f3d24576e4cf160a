//! Error handling primitives shared across the core.
//!
//! `BoxError` is what the engine propagates internally; `BoxCode` is the
//! stable integer that crosses the FFI boundary.

use thiserror::Error;

/// Stable status codes returned by the C ABI.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoxCode {
    /// Success.
    Ok = 0,
    /// Null pointer, non UTF-8 text or an unrecognised argument value.
    InvalidArgument = -1,
    /// Null, unknown or destroyed instance handle.
    InvalidHandle = -2,
    /// Configuration text failed to parse or validate.
    InvalidConfig = -3,
    /// Start requested on a running instance.
    AlreadyRunning = -4,
    /// Stop requested on an idle instance.
    NotRunning = -5,
    /// Socket, runtime or file failure.
    Io = -6,
    /// Catch-all for bugs.
    Internal = -7,
}

impl BoxCode {
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// Canonical error type for the core.
#[derive(Debug, Error)]
pub enum BoxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid instance handle")]
    InvalidHandle,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("instance is already running")]
    AlreadyRunning,

    #[error("instance is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type BoxResult<T> = Result<T, BoxError>;

impl BoxError {
    /// Validation helper.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Configuration helper.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Internal error helper.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map the error onto the code reported across the ABI.
    pub fn code(&self) -> BoxCode {
        match self {
            BoxError::InvalidArgument(_) => BoxCode::InvalidArgument,
            BoxError::InvalidHandle => BoxCode::InvalidHandle,
            BoxError::Config(_) | BoxError::ConfigParse(_) => BoxCode::InvalidConfig,
            BoxError::AlreadyRunning => BoxCode::AlreadyRunning,
            BoxError::NotRunning => BoxCode::NotRunning,
            BoxError::Io(_) => BoxCode::Io,
            BoxError::Internal(_) => BoxCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BoxCode::Ok as i32, 0);
        assert_eq!(BoxCode::InvalidArgument as i32, -1);
        assert_eq!(BoxCode::InvalidHandle as i32, -2);
        assert_eq!(BoxCode::InvalidConfig as i32, -3);
        assert_eq!(BoxCode::AlreadyRunning as i32, -4);
        assert_eq!(BoxCode::NotRunning as i32, -5);
        assert_eq!(BoxCode::Io as i32, -6);
        assert_eq!(BoxCode::Internal as i32, -7);
    }

    #[test]
    fn errors_map_to_codes() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(BoxError::from(parse).code(), BoxCode::InvalidConfig);
        assert_eq!(BoxError::config("no inbounds").code(), BoxCode::InvalidConfig);

        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        assert_eq!(BoxError::from(io).code(), BoxCode::Io);
        assert_eq!(BoxError::InvalidHandle.code(), BoxCode::InvalidHandle);
        assert_eq!(BoxError::AlreadyRunning.code().raw(), -4);
    }

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            BoxError::config("inbound tag `a` is used twice").to_string(),
            "configuration error: inbound tag `a` is used twice"
        );
        assert_eq!(BoxError::NotRunning.to_string(), "instance is not running");
    }
}

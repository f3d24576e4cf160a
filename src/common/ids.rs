//! Identifiers for instances and tracked connections.

use std::sync::atomic::{AtomicU64, Ordering};

/// Registry key of one engine instance. Also the value behind the opaque
/// handle handed to C callers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Identifier of a proxied connection, unique within the process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Monotonic id source. Zero is never produced, and values are never reused.
#[derive(Debug)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Next value, or `None` once the space is exhausted.
    pub fn next(&self) -> Option<u64> {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(1)
            })
            .ok()
    }

    pub fn next_connection(&self) -> ConnectionId {
        ConnectionId(self.next().unwrap_or(u64::MAX))
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

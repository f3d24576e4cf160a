//! Runtime bookkeeping: traffic totals, live connections and the JSON
//! snapshots built from them.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::common::ids::{ConnectionId, IdSequence};
use crate::common::time;
use crate::proxy::relay::TrafficSink;

/// Counters that survive individual connections.
#[derive(Debug, Default)]
pub struct Totals {
    pub connections_total: AtomicU64,
    pub upload_bytes: AtomicU64,
    pub download_bytes: AtomicU64,
    pub blocked_total: AtomicU64,
    pub failed_total: AtomicU64,
}

/// Static facts about a connection, known once it has been routed.
#[derive(Clone, Debug)]
pub struct ConnectionMeta {
    pub inbound: String,
    pub source: SocketAddr,
    pub destination: String,
    pub outbound: String,
    pub rule: String,
}

/// A live connection registered with the tracker.
#[derive(Debug)]
pub struct TrackedConnection {
    pub id: ConnectionId,
    pub meta: ConnectionMeta,
    pub start_ms: u128,
    upload: AtomicU64,
    download: AtomicU64,
    totals: Arc<Totals>,
}

impl TrafficSink for TrackedConnection {
    fn uploaded(&self, bytes: u64) {
        self.upload.fetch_add(bytes, Ordering::Relaxed);
        self.totals.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn downloaded(&self, bytes: u64) {
        self.download.fetch_add(bytes, Ordering::Relaxed);
        self.totals.download_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Tracks everything one engine run has proxied.
#[derive(Debug, Default)]
pub struct Tracker {
    ids: IdSequence,
    totals: Arc<Totals>,
    live: Mutex<BTreeMap<ConnectionId, Arc<TrackedConnection>>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.totals.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.totals.blocked_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.totals.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a routed connection. It stays listed until the guard drops.
    pub fn open(self: &Arc<Self>, meta: ConnectionMeta) -> ConnectionGuard {
        let connection = Arc::new(TrackedConnection {
            id: self.ids.next_connection(),
            meta,
            start_ms: time::now_ms(),
            upload: AtomicU64::new(0),
            download: AtomicU64::new(0),
            totals: self.totals.clone(),
        });
        self.live.lock().insert(connection.id, connection.clone());
        ConnectionGuard {
            tracker: self.clone(),
            connection,
        }
    }

    pub fn active(&self) -> usize {
        self.live.lock().len()
    }

    /// Drop every live entry; used once the runtime has been torn down.
    pub fn clear_live(&self) {
        self.live.lock().clear();
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn connections(&self) -> ConnectionsSnapshot {
        let now = time::now_ms();
        let connections: Vec<ConnectionInfo> = self
            .live
            .lock()
            .values()
            .map(|c| ConnectionInfo {
                id: c.id.raw(),
                inbound: c.meta.inbound.clone(),
                network: "tcp",
                source: c.meta.source.to_string(),
                destination: c.meta.destination.clone(),
                outbound: c.meta.outbound.clone(),
                rule: c.meta.rule.clone(),
                upload: c.upload.load(Ordering::Relaxed),
                download: c.download.load(Ordering::Relaxed),
                start_ms: c.start_ms as u64,
                duration_ms: now.saturating_sub(c.start_ms) as u64,
            })
            .collect();
        ConnectionsSnapshot {
            count: connections.len(),
            connections,
        }
    }
}

/// Unregisters its connection from the tracker when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<Tracker>,
    connection: Arc<TrackedConnection>,
}

impl ConnectionGuard {
    pub fn connection(&self) -> &TrackedConnection {
        &self.connection
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.live.lock().remove(&self.connection.id);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct InboundInfo {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub listen: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub running: bool,
    pub uptime_ms: u64,
    pub connections_total: u64,
    pub connections_active: usize,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub blocked_total: u64,
    pub failed_total: u64,
    pub log_level: &'static str,
    pub inbounds: Vec<InboundInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub inbound: String,
    pub network: &'static str,
    pub source: String,
    pub destination: String,
    pub outbound: String,
    pub rule: String,
    pub upload: u64,
    pub download: u64,
    pub start_ms: u64,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConnectionsSnapshot {
    pub count: usize,
    pub connections: Vec<ConnectionInfo>,
}

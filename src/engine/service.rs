//! Engine lifecycle: idle <-> running, and live configuration updates.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::config::app_cfg;
use crate::common::error::{BoxError, BoxResult};
use crate::common::ids::InstanceId;
use crate::common::log::{self as box_log, instance_target, level_name};
use crate::profile::Profile;
use crate::proxy::Router;

use super::domain::{ConnectionsSnapshot, InboundInfo, StatsSnapshot, Tracker};
use super::workers::{accept_loop, bind_all, BoundInbound, WorkerContext};

/// One set of accept loops sharing a router.
struct Generation {
    listeners: Vec<BoundInbound>,
    tasks: Vec<JoinHandle<()>>,
    retire_tx: watch::Sender<bool>,
}

impl Generation {
    /// Stop accepting and wait until every accept loop has returned, so no
    /// connection is routed by this generation afterwards.
    fn retire(&mut self, runtime: &Runtime) {
        let _ = self.retire_tx.send(true);
        let tasks = std::mem::take(&mut self.tasks);
        runtime.block_on(async {
            for task in tasks {
                let _ = task.await;
            }
        });
    }
}

struct Running {
    runtime: Runtime,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
    generation: Generation,
}

/// Proxy engine owned by one instance.
pub struct Engine {
    id: InstanceId,
    target: String,
    profile: Option<Arc<Profile>>,
    tracker: Arc<Tracker>,
    running: Option<Running>,
}

impl Engine {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            target: instance_target(id),
            profile: None,
            tracker: Arc::new(Tracker::new()),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Profile most recently started with or applied.
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_deref()
    }

    /// Bind every inbound of `profile` and start serving.
    pub fn start(&mut self, profile: Profile) -> BoxResult<()> {
        if self.running.is_some() {
            return Err(BoxError::AlreadyRunning);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(app_cfg().worker_threads)
            .thread_name(format!("singbox-{}", self.id.raw()))
            .enable_all()
            .build()?;

        // Bind before touching any state so a failure leaves the engine idle.
        let listeners = runtime.block_on(bind_all(&profile, &[]))?;
        apply_log_options(self.id, &profile)?;

        let profile = Arc::new(profile);
        let tracker = Arc::new(Tracker::new());
        let (shutdown_tx, _) = watch::channel(false);
        let generation =
            spawn_generation(&self.target, &runtime, listeners, &profile, &tracker, &shutdown_tx);

        info!(
            target: self.target.as_str(),
            "started with {} inbound(s), {} outbound(s)",
            profile.inbounds.len(),
            profile.outbounds.len()
        );

        self.profile = Some(profile);
        self.tracker = tracker;
        self.running = Some(Running {
            runtime,
            started_at: Instant::now(),
            shutdown_tx,
            generation,
        });
        Ok(())
    }

    /// Close every listener and connection and tear the runtime down.
    pub fn stop(&mut self) -> BoxResult<()> {
        let mut running = self.running.take().ok_or(BoxError::NotRunning)?;

        running.generation.retire(&running.runtime);
        let _ = running.shutdown_tx.send(true);
        running.runtime.shutdown_timeout(app_cfg().stop_timeout);
        self.tracker.clear_live();

        info!(target: self.target.as_str(), "stopped");
        Ok(())
    }

    /// Apply a new profile. While running, the new inbound set is bound
    /// first; if that fails nothing changes. Established connections are
    /// left alone and new ones use the new routing table.
    pub fn update(&mut self, profile: Profile) -> BoxResult<()> {
        let Some(running) = self.running.as_mut() else {
            apply_log_options(self.id, &profile)?;
            self.profile = Some(Arc::new(profile));
            debug!(target: self.target.as_str(), "configuration stored while idle");
            return Ok(());
        };

        let listeners = running
            .runtime
            .block_on(bind_all(&profile, &running.generation.listeners))?;
        apply_log_options(self.id, &profile)?;

        let profile = Arc::new(profile);
        running.generation.retire(&running.runtime);
        let generation = spawn_generation(
            &self.target,
            &running.runtime,
            listeners,
            &profile,
            &self.tracker,
            &running.shutdown_tx,
        );
        running.generation = generation;
        self.profile = Some(profile);

        info!(target: self.target.as_str(), "configuration updated");
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        let totals = self.tracker.totals();
        let load = |counter: &std::sync::atomic::AtomicU64| {
            counter.load(std::sync::atomic::Ordering::Relaxed)
        };
        let (uptime_ms, inbounds) = match self.running.as_ref() {
            Some(running) => (
                running.started_at.elapsed().as_millis() as u64,
                running
                    .generation
                    .listeners
                    .iter()
                    .map(|b| InboundInfo {
                        tag: b.inbound.tag().to_string(),
                        kind: b.inbound.kind(),
                        listen: b.local_addr.to_string(),
                    })
                    .collect(),
            ),
            None => (0, Vec::new()),
        };

        StatsSnapshot {
            running: self.is_running(),
            uptime_ms,
            connections_total: load(&totals.connections_total),
            connections_active: self.tracker.active(),
            upload_bytes: load(&totals.upload_bytes),
            download_bytes: load(&totals.download_bytes),
            blocked_total: load(&totals.blocked_total),
            failed_total: load(&totals.failed_total),
            log_level: level_name(box_log::level_of(self.id)),
            inbounds,
        }
    }

    pub fn connections(&self) -> ConnectionsSnapshot {
        self.tracker.connections()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}

fn apply_log_options(id: InstanceId, profile: &Profile) -> BoxResult<()> {
    let level = profile
        .log
        .level_filter()
        .ok_or_else(|| BoxError::config("unknown log level"))?;
    box_log::configure(id, level, profile.log.timestamp, profile.log.output.as_deref())
}

fn spawn_generation(
    target: &str,
    runtime: &Runtime,
    listeners: Vec<BoundInbound>,
    profile: &Arc<Profile>,
    tracker: &Arc<Tracker>,
    shutdown_tx: &watch::Sender<bool>,
) -> Generation {
    let ctx = Arc::new(WorkerContext {
        target: target.to_string(),
        profile: profile.clone(),
        router: Router::new(profile),
        tracker: tracker.clone(),
        shutdown: shutdown_tx.subscribe(),
    });
    let (retire_tx, _) = watch::channel(false);
    let tasks = listeners
        .iter()
        .map(|bound| runtime.spawn(accept_loop(bound.clone(), ctx.clone(), retire_tx.subscribe())))
        .collect();
    Generation {
        listeners,
        tasks,
        retire_tx,
    }
}

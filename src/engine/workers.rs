//! Accept loops and per-connection tasks running on an instance runtime.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::profile::{Inbound, Profile};
use crate::proxy::outbound::{dial, Dialed};
use crate::proxy::relay::relay;
use crate::proxy::socks::{self, Reply};
use crate::proxy::{Destination, Host, RouteContext, Router};

use super::domain::{ConnectionMeta, Tracker};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by every task of one listener generation.
pub(crate) struct WorkerContext {
    pub target: String,
    pub profile: Arc<Profile>,
    pub router: Router,
    pub tracker: Arc<Tracker>,
    pub shutdown: watch::Receiver<bool>,
}

/// An inbound together with the socket serving it.
#[derive(Clone)]
pub(crate) struct BoundInbound {
    pub inbound: Inbound,
    pub listener: Arc<TcpListener>,
    pub local_addr: SocketAddr,
}

/// Bind every inbound of `profile`. Listeners in `reuse` whose configured
/// address is unchanged (and not ephemeral) are shared instead of re-bound.
pub(crate) async fn bind_all(profile: &Profile, reuse: &[BoundInbound]) -> io::Result<Vec<BoundInbound>> {
    let mut bound = Vec::with_capacity(profile.inbounds.len());
    for inbound in &profile.inbounds {
        let addr = inbound.listen().bind_addr();
        let existing = reuse
            .iter()
            .find(|b| addr.port() != 0 && b.inbound.listen().bind_addr() == addr);

        let (listener, local_addr) = match existing {
            Some(existing) => (existing.listener.clone(), existing.local_addr),
            None => {
                let listener = TcpListener::bind(addr).await.map_err(|e| {
                    io::Error::new(e.kind(), format!("inbound `{}`: bind {addr}: {e}", inbound.tag()))
                })?;
                let local_addr = listener.local_addr()?;
                (Arc::new(listener), local_addr)
            }
        };
        bound.push(BoundInbound {
            inbound: inbound.clone(),
            listener,
            local_addr,
        });
    }
    Ok(bound)
}

/// Serve `bound` until `retire` flips to true.
pub(crate) async fn accept_loop(bound: BoundInbound, ctx: Arc<WorkerContext>, mut retire: watch::Receiver<bool>) {
    info!(
        target: ctx.target.as_str(),
        "inbound `{}` ({}) listening on {}",
        bound.inbound.tag(),
        bound.inbound.kind(),
        bound.local_addr
    );

    loop {
        let accepted = tokio::select! {
            accepted = bound.listener.accept() => accepted,
            _ = retire.wait_for(|retired| *retired) => break,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(target: ctx.target.as_str(), "inbound `{}`: accept failed: {e}", bound.inbound.tag());
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        ctx.tracker.record_accepted();
        let _ = stream.set_nodelay(true);
        let inbound = bound.inbound.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut shutdown = ctx.shutdown.clone();
            tokio::select! {
                result = handle_connection(&inbound, stream, peer, &ctx) => {
                    if let Err(e) = result {
                        debug!(target: ctx.target.as_str(), "{peer} via `{}` finished with error: {e}", inbound.tag());
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!(target: ctx.target.as_str(), "{peer} closed by shutdown");
                }
            }
        });
    }

    debug!(target: ctx.target.as_str(), "inbound `{}` stopped accepting", bound.inbound.tag());
}

async fn handle_connection(
    inbound: &Inbound,
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &WorkerContext,
) -> io::Result<()> {
    let destination = match inbound {
        Inbound::Socks(socks_inbound) => {
            match timeout(HANDSHAKE_TIMEOUT, socks::accept(&mut stream, &socks_inbound.users)).await {
                Ok(Ok(destination)) => destination,
                Ok(Err(e)) => {
                    ctx.tracker.record_failed();
                    return Err(e);
                }
                Err(_) => {
                    ctx.tracker.record_failed();
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "SOCKS handshake timed out"));
                }
            }
        }
        Inbound::Direct(direct) => Destination::new(
            Host::from_name(direct.override_address.as_deref().unwrap_or_default()),
            direct.override_port.unwrap_or_default(),
        ),
    };

    let decision = ctx.router.route(&RouteContext {
        inbound: inbound.tag(),
        destination: &destination,
    });
    let Some(outbound) = ctx.profile.outbound(&decision.outbound) else {
        ctx.tracker.record_failed();
        if matches!(inbound, Inbound::Socks(_)) {
            socks::write_reply(&mut stream, Reply::GeneralFailure, None).await?;
        }
        return Err(io::Error::other(format!("unknown outbound `{}`", decision.outbound)));
    };

    let remote = match dial(outbound, &destination).await {
        Ok(Dialed::Connected(remote)) => remote,
        Ok(Dialed::Blocked) => {
            ctx.tracker.record_blocked();
            info!(
                target: ctx.target.as_str(),
                "[{}] {peer} -> {destination} blocked by {}",
                inbound.tag(),
                decision.rule
            );
            if matches!(inbound, Inbound::Socks(_)) {
                socks::write_reply(&mut stream, Reply::NotAllowed, None).await?;
            }
            return Ok(());
        }
        Err(e) => {
            ctx.tracker.record_failed();
            warn!(
                target: ctx.target.as_str(),
                "[{}] {peer} -> {destination} via `{}` failed: {e}",
                inbound.tag(),
                decision.outbound
            );
            if matches!(inbound, Inbound::Socks(_)) {
                socks::write_reply(&mut stream, Reply::for_dial_error(&e), None).await?;
            }
            return Err(e);
        }
    };

    if matches!(inbound, Inbound::Socks(_)) {
        socks::write_reply(&mut stream, Reply::Succeeded, remote.local_addr().ok()).await?;
    }

    info!(
        target: ctx.target.as_str(),
        "[{}] {peer} -> {destination} via `{}` ({})",
        inbound.tag(),
        decision.outbound,
        decision.rule
    );
    let guard = ctx.tracker.open(ConnectionMeta {
        inbound: inbound.tag().to_string(),
        source: peer,
        destination: destination.to_string(),
        outbound: decision.outbound.clone(),
        rule: decision.rule.to_string(),
    });
    let (up, down) = relay(stream, remote, guard.connection()).await?;
    debug!(target: ctx.target.as_str(), "{peer} -> {destination} closed, up={up} down={down}");
    Ok(())
}

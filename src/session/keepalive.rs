//! Background session keep-alive.
//!
//! A single worker task periodically calls the session-extension endpoint
//! so an idle session is not expired server-side. Tick failures are logged
//! and swallowed - keep-alive must never take down the host process. Stop
//! is cooperative and bounded: the worker is signalled, given a short join
//! window, then aborted.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::session::{Session, SessionContext};

/// Default tick interval, comfortably inside the 30-minute session TTL.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25 * 60);

/// How long `stop` waits for the worker before abandoning it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic session extender. `Idle` until [`start`](KeepAlive::start),
/// then `Running` until [`stop`](KeepAlive::stop); a stopped scheduler can
/// be started again.
pub struct KeepAlive {
    authenticator: Authenticator,
    ctx: SessionContext,
    session: Option<Session>,
    interval: Duration,
    worker: Option<Worker>,
}

impl KeepAlive {
    pub fn new(authenticator: Authenticator, ctx: SessionContext) -> Self {
        Self {
            authenticator,
            ctx,
            session: None,
            interval: DEFAULT_KEEPALIVE_INTERVAL,
            worker: None,
        }
    }

    /// Pin the worker to one session instead of following the context's
    /// current one.
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Launch the background worker. A no-op while already running.
    ///
    /// The first tick fires after one full interval, not immediately - the
    /// session was active when keep-alive started.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let authenticator = self.authenticator.clone();
        let ctx = self.ctx.clone();
        let session = self.session.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        match authenticator.extend_session(&ctx, session.as_ref()).await {
                            Ok(_) => debug!("keep-alive tick succeeded"),
                            Err(e) => warn!(error = %e, "keep-alive tick failed"),
                        }
                    }
                }
            }
            debug!("keep-alive worker exited");
        });

        self.worker = Some(Worker { shutdown, handle });
    }

    /// Signal the worker and wait (bounded) for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.shutdown.send(true);
        let mut handle = worker.handle;
        if tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            warn!("keep-alive worker did not stop in time");
            handle.abort();
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        // Dropping the shutdown sender wakes the worker, which then exits
        // on its own; there is nothing to wait for here.
        self.worker.take();
    }
}

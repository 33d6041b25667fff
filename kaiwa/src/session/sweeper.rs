//! Periodic expiry independent of message traffic.
//!
//! Dispatch only sweeps when an event arrives. A [`Sweeper`] runs
//! [`SessionRegistry::sweep_expired`] on a fixed interval so a quiet registry
//! still lets go of its expired sessions.

use super::registry::SessionRegistry;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Counters of a running sweeper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweeperStatus {
    /// Whether the background task is running.
    pub running: bool,
    /// Number of sweeps performed.
    pub sweeps: u64,
    /// Sessions expired by this sweeper.
    pub expired: u64,
    /// When the last sweep ran.
    pub last_sweep: Option<SystemTime>,
}

/// Handle for controlling a started sweeper.
#[derive(Debug, Clone)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SweeperStatus>>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Current counters.
    pub async fn status(&self) -> SweeperStatus {
        *self.status.read().await
    }
}

/// Background task sweeping a registry on a fixed interval.
#[derive(Debug)]
pub struct Sweeper {
    registry: SessionRegistry,
    interval: Duration,
}

impl Sweeper {
    /// Create a sweeper for `registry` with the default interval.
    #[must_use]
    pub const fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the interval between sweeps.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweep loop.
    ///
    /// Must be called from within a tokio runtime.
    #[allow(clippy::unused_async)] // async is part of the public API contract
    pub async fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let status = Arc::new(RwLock::new(SweeperStatus {
            running: true,
            ..SweeperStatus::default()
        }));
        let handle = SweeperHandle {
            shutdown_tx,
            status: Arc::clone(&status),
        };

        let Self { registry, interval } = self;
        tokio::spawn(async move {
            info!(interval = ?interval, ttl = ?registry.ttl(), "session sweeper started");

            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        Self::sweep(&registry, &status).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("session sweeper shutting down");
                        break;
                    }
                }
            }

            status.write().await.running = false;
        });

        handle
    }

    async fn sweep(registry: &SessionRegistry, status: &Arc<RwLock<SweeperStatus>>) {
        let now = SystemTime::now();
        let expired = registry.sweep_expired(now).await;

        let mut s = status.write().await;
        s.sweeps += 1;
        s.expired += expired as u64;
        s.last_sweep = Some(now);
        debug!(sweeps = s.sweeps, expired, "background sweep");
    }
}

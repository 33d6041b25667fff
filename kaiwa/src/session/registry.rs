//! The live-session registry: expiry sweeps and per-event fan-out.
//!
//! A [`SessionRegistry`] is cheap to clone and safe to share between tasks.
//! The live set sits behind one lock that is never held while a handler
//! runs, and whole dispatch rounds are serialised by a second guard, so a
//! round always sees a consistent snapshot even when handlers add or remove
//! sessions while it is in flight.
//!
//! Expiry is lazy: it happens at the start of every dispatch round and
//! nowhere else. A registry that stops receiving events keeps its sessions
//! until someone calls [`SessionRegistry::sweep_expired`], e.g. a
//! [`Sweeper`](super::Sweeper).

use super::entry::{Session, SessionId};
use super::handler::SessionHandler;
use crate::message_event::MessageEvent;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

/// Default session time-to-live: one day.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Registry counters since creation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions added.
    pub added: u64,
    /// Sessions removed on request.
    pub removed: u64,
    /// Sessions removed by expiry sweeps.
    pub expired: u64,
    /// Completed dispatch rounds.
    pub dispatch_rounds: u64,
    /// Handler invocations that returned an error.
    pub handler_failures: u64,
}

/// Outcome of one dispatch round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sessions expired by the sweep that opened the round.
    pub expired: usize,
    /// Sessions whose handler ran.
    pub visited: usize,
    /// Handlers that failed.
    pub failed: usize,
}

/// Owner of all live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    ttl: Duration,
    /// Live sessions in insertion (= dispatch) order.
    sessions: RwLock<Vec<Arc<Session>>>,
    /// Held for the whole of a dispatch round.
    round: Mutex<()>,
    stats: RwLock<RegistryStats>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry with the default one-day TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    /// Create a registry whose sessions live for `ttl`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                ttl,
                sessions: RwLock::new(Vec::new()),
                round: Mutex::new(()),
                stats: RwLock::new(RegistryStats::default()),
            }),
        }
    }

    /// The configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Append a session to the live set; it receives every later dispatch.
    pub async fn add(&self, session: Session) -> SessionId {
        let id = session.id();
        debug!(session_id = %id, label = session.label().unwrap_or("-"), "session added");
        self.inner.sessions.write().await.push(Arc::new(session));
        self.inner.stats.write().await.added += 1;
        id
    }

    /// Create a session for `handler`, created now, and add it.
    pub async fn create_session(&self, handler: impl SessionHandler + 'static) -> SessionId {
        self.add(Session::new(handler)).await
    }

    /// Remove the session with the given identity.
    ///
    /// Removing an absent session is a no-op. Returns whether a session was
    /// removed.
    pub async fn remove(&self, id: SessionId) -> bool {
        let removed = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .iter()
                .position(|s| s.id() == id)
                .map(|index| sessions.remove(index))
        };

        let Some(session) = removed else {
            trace!(session_id = %id, "remove ignored, session not present");
            return false;
        };
        session.mark_removed();
        self.inner.stats.write().await.removed += 1;
        debug!(session_id = %id, "session removed");
        true
    }

    /// Remove every session with `created_at + ttl <= now`.
    ///
    /// Returns the number of sessions expired.
    pub async fn sweep_expired(&self, now: SystemTime) -> usize {
        let ttl = self.inner.ttl;
        let expired = {
            let mut sessions = self.inner.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|session| {
                if session.is_expired(ttl, now) {
                    session.mark_removed();
                    debug!(
                        session_id = %session.id(),
                        age_secs = session.age(now).as_secs(),
                        "session expired"
                    );
                    false
                } else {
                    true
                }
            });
            before - sessions.len()
        };

        if expired > 0 {
            self.inner.stats.write().await.expired += expired as u64;
            info!(expired, "expired sessions swept");
        }
        expired
    }

    /// Run one dispatch round for `event` at the current wall-clock time.
    pub async fn dispatch(&self, event: &MessageEvent) -> DispatchReport {
        self.dispatch_at(event, SystemTime::now()).await
    }

    /// Run one dispatch round, sweeping against `now`.
    ///
    /// The round sweeps expired sessions, then hands `event` to every
    /// session of a snapshot taken right after the sweep, in insertion
    /// order. A session removed earlier in the same round is skipped;
    /// sessions added during the round wait for the next one. A failing
    /// handler is reported to the event's origin as `"ERROR: ..."` and the
    /// round carries on.
    pub async fn dispatch_at(&self, event: &MessageEvent, now: SystemTime) -> DispatchReport {
        let _round = self.inner.round.lock().await;

        let expired = self.sweep_expired(now).await;
        let snapshot: Vec<Arc<Session>> = self.inner.sessions.read().await.clone();
        let mut report = DispatchReport {
            expired,
            ..DispatchReport::default()
        };

        for session in snapshot {
            if !session.is_alive() {
                trace!(session_id = %session.id(), "skipping session removed mid-round");
                continue;
            }

            let remover = self.remover_for(session.id());
            report.visited += 1;
            if let Err(e) = session.handle(event, &remover).await {
                report.failed += 1;
                warn!(
                    session_id = %session.id(),
                    label = session.label().unwrap_or("-"),
                    error = %e,
                    "session handler failed"
                );
                event.report_error(&e).await;
            }
        }

        {
            let mut stats = self.inner.stats.write().await;
            stats.dispatch_rounds += 1;
            stats.handler_failures += report.failed as u64;
        }
        trace!(
            expired = report.expired,
            visited = report.visited,
            failed = report.failed,
            "dispatch round finished"
        );
        report
    }

    /// A remove capability bound to one session of this registry.
    #[must_use]
    pub fn remover_for(&self, id: SessionId) -> SessionRemover {
        SessionRemover {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Whether a session with this identity is live.
    pub async fn contains(&self, id: SessionId) -> bool {
        self.inner.sessions.read().await.iter().any(|s| s.id() == id)
    }

    /// Identities of the live sessions, in dispatch order.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.inner
            .sessions
            .read()
            .await
            .iter()
            .map(|s| s.id())
            .collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Whether no session is live.
    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.read().await.is_empty()
    }

    /// Remove every session. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.inner.sessions.write().await.drain(..).collect();
        for session in &drained {
            session.mark_removed();
        }
        if !drained.is_empty() {
            self.inner.stats.write().await.removed += drained.len() as u64;
            info!(count = drained.len(), "all sessions cleared");
        }
        drained.len()
    }

    /// Current counters.
    pub async fn stats(&self) -> RegistryStats {
        *self.inner.stats.read().await
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability to remove one particular session from its registry.
///
/// Holds only a weak reference: once the registry is gone, removing is a
/// no-op.
#[derive(Clone)]
pub struct SessionRemover {
    registry: Weak<RegistryInner>,
    id: SessionId,
}

impl std::fmt::Debug for SessionRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRemover")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionRemover {
    /// The session this remover is bound to.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.id
    }

    /// Remove the bound session. Idempotent.
    pub async fn remove(&self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => SessionRegistry { inner }.remove(self.id).await,
            None => false,
        }
    }
}

//! A single live session.

use super::handler::SessionHandler;
use super::registry::SessionRemover;
use crate::error::HandlerResult;
use crate::message_event::MessageEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Opaque identity of a session.
///
/// Freshly generated for every session, so two sessions built from equal
/// handlers are still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0.simple())
    }
}

/// A time-bounded conversation overlaid on the message stream.
///
/// A session is alive from construction until a registry removes it,
/// either on request or because it expired. It never comes back to life.
pub struct Session {
    id: SessionId,
    label: Option<String>,
    created_at: SystemTime,
    alive: AtomicBool,
    handler: Mutex<Box<dyn SessionHandler>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("created_at", &self.created_at)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session created now.
    pub fn new(handler: impl SessionHandler + 'static) -> Self {
        Self::with_created_at(handler, SystemTime::now())
    }

    /// Create a session with an explicit creation instant.
    pub fn with_created_at(handler: impl SessionHandler + 'static, created_at: SystemTime) -> Self {
        Self {
            id: SessionId::new(),
            label: None,
            created_at,
            alive: AtomicBool::new(true),
            handler: Mutex::new(Box::new(handler)),
        }
    }

    /// Attach a human-readable label used in logs.
    #[must_use]
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The session's identity.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// The log label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// When the session was created.
    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Age of the session at `now`; zero if `now` predates creation.
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }

    /// Whether the session has outlived `ttl` at `now`.
    ///
    /// Expired iff `created_at + ttl <= now`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        self.created_at
            .checked_add(ttl)
            .is_some_and(|deadline| deadline <= now)
    }

    /// Whether the session is still held by a registry.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) async fn handle(
        &self,
        event: &MessageEvent,
        remover: &SessionRemover,
    ) -> HandlerResult<()> {
        self.handler.lock().await.handle(event, remover).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::handler_fn;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn idle() -> Session {
        Session::new(handler_fn(|_, _| async { Ok(()) }))
    }

    #[test]
    fn test_new_session_is_alive_and_fresh() {
        let before = SystemTime::now();
        let session = idle();

        assert!(session.is_alive());
        assert!(session.created_at() >= before);
        assert!(!session.is_expired(24 * HOUR, SystemTime::now()));
    }

    #[test]
    fn test_identity_is_per_instance() {
        let a = idle();
        let b = idle();
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("sess_"));
    }

    #[test]
    fn test_expiry_boundary() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let session = Session::with_created_at(handler_fn(|_, _| async { Ok(()) }), t0);
        let ttl = 24 * HOUR;

        assert!(!session.is_expired(ttl, t0));
        assert!(!session.is_expired(ttl, t0 + HOUR));
        assert!(!session.is_expired(ttl, t0 + ttl - Duration::from_millis(1)));
        assert!(session.is_expired(ttl, t0 + ttl));
        assert!(session.is_expired(ttl, t0 + 25 * HOUR));
    }

    #[test]
    fn test_age_saturates_when_clock_runs_backwards() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let session = Session::with_created_at(handler_fn(|_, _| async { Ok(()) }), t0);

        assert_eq!(session.age(t0 + HOUR), HOUR);
        assert_eq!(session.age(t0 - HOUR), Duration::ZERO);
        assert!(!session.is_expired(HOUR, t0 - HOUR));
    }

    #[test]
    fn test_label() {
        let session = idle().labeled("wizard");
        assert_eq!(session.label(), Some("wizard"));
    }
}

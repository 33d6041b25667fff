//! The handler capability carried by every session.

use super::registry::SessionRemover;
use crate::error::HandlerResult;
use crate::message_event::MessageEvent;
use async_trait::async_trait;
use std::future::Future;

/// Behavior invoked on every incoming event while a session is alive.
///
/// Implementations own their session-local state (`&mut self`), may reply
/// through the event, and may end the session early through `remover`.
/// Returning an error does not end the session; the registry reports it to
/// the event's originator and moves on to the next session.
#[async_trait]
pub trait SessionHandler: Send {
    /// Handle one incoming event.
    async fn handle(&mut self, event: &MessageEvent, remover: &SessionRemover)
    -> HandlerResult<()>;
}

/// A [`SessionHandler`] backed by a closure.
///
/// Built with [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Turn a closure into a session handler.
///
/// The closure receives owned clones of the event and remover so the
/// returned future can be `'static`-free of borrows.
///
/// ```rust,ignore
/// let handler = handler_fn(|event, remover| async move {
///     if event.plain_text() == "stop" {
///         remover.remove().await;
///     }
///     Ok(())
/// });
/// ```
pub const fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: FnMut(MessageEvent, SessionRemover) -> Fut + Send,
    Fut: Future<Output = HandlerResult<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> SessionHandler for FnHandler<F>
where
    F: FnMut(MessageEvent, SessionRemover) -> Fut + Send,
    Fut: Future<Output = HandlerResult<()>> + Send,
{
    async fn handle(
        &mut self,
        event: &MessageEvent,
        remover: &SessionRemover,
    ) -> HandlerResult<()> {
        (self.f)(event.clone(), remover.clone()).await
    }
}

#[async_trait]
impl<H: SessionHandler + ?Sized> SessionHandler for Box<H> {
    async fn handle(
        &mut self,
        event: &MessageEvent,
        remover: &SessionRemover,
    ) -> HandlerResult<()> {
        (**self).handle(event, remover).await
    }
}

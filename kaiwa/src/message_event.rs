//! The per-event view handed to session handlers.
//!
//! A [`MessageEvent`] pairs an [`InboundMessage`] with the capability to
//! answer it, either plainly or quoting the message.

use crate::bus::OutboundHandle;
use crate::error::BusResult;
use crate::events::{InboundMessage, Origin, OutboundMessage};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of every diagnostic reply sent for a failed handler.
pub const ERROR_REPLY_PREFIX: &str = "ERROR: ";

/// An incoming message together with its reply capability.
///
/// Cloning is cheap; the message itself is shared.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    message: Arc<InboundMessage>,
    outbound: OutboundHandle,
}

impl MessageEvent {
    /// Wrap an inbound message so that replies go through `outbound`.
    #[must_use]
    pub fn new(message: InboundMessage, outbound: OutboundHandle) -> Self {
        Self {
            message: Arc::new(message),
            outbound,
        }
    }

    /// The underlying inbound message.
    #[must_use]
    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    /// Where replies to this event are addressed.
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.message.origin
    }

    /// The sender's identifier within the channel.
    #[must_use]
    pub fn sender_id(&self) -> &str {
        &self.message.sender_id
    }

    /// Plain-text projection of the message content.
    #[must_use]
    pub fn plain_text(&self) -> String {
        self.message.plain_text()
    }

    /// Send `text` to the event's origin.
    ///
    /// Group events are answered in the group, direct events to the sender.
    /// The reply is queued on the bus; delivery happens on the channel side.
    pub async fn reply(&self, text: impl Into<String>) -> BusResult<()> {
        self.outbound
            .publish(OutboundMessage::reply_to(&self.message, text))
            .await
    }

    /// Send `text` to the event's origin, quoting the original message.
    pub async fn quote_reply(&self, text: impl Into<String>) -> BusResult<()> {
        self.outbound
            .publish(OutboundMessage::quote_reply_to(&self.message, text))
            .await
    }

    /// Tell the originator that something failed, as `"ERROR: <error>"`.
    ///
    /// Best effort: a failure to queue the diagnostic is logged and dropped.
    pub async fn report_error(&self, error: &(dyn Display + Sync)) {
        let text = format!("{ERROR_REPLY_PREFIX}{error}");
        debug!(origin = %self.message.origin, %text, "sending diagnostic reply");
        if let Err(e) = self.reply(text).await {
            warn!(origin = %self.message.origin, error = %e, "failed to send diagnostic reply");
        }
    }

    /// Run a fallible step, reporting its error to the originator.
    ///
    /// Returns the step's value on success and `None` after reporting a
    /// failure.
    pub async fn reporting<T, E, F>(&self, step: F) -> Option<T>
    where
        E: Display + Sync,
        F: Future<Output = Result<T, E>>,
    {
        match step.await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report_error(&e).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::error::HandlerError;

    fn event_on(bus: &MessageBus, message: InboundMessage) -> MessageEvent {
        MessageEvent::new(message, bus.outbound_handle())
    }

    #[tokio::test]
    async fn test_reply_goes_to_origin() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let event = event_on(&bus, InboundMessage::group("qq", "g1", "alice", "hi"));

        event.reply("hello").await.unwrap();

        let out = rx.recv().await.unwrap();
        assert_eq!(out.target, Origin::group("g1"));
        assert_eq!(out.content, "hello");
        assert!(out.quote.is_none());
    }

    #[tokio::test]
    async fn test_quote_reply_references_message() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let event = event_on(&bus, InboundMessage::direct("cli", "alice", "hi"));

        event.quote_reply("seen").await.unwrap();

        let out = rx.recv().await.unwrap();
        assert_eq!(out.quote.as_deref(), Some(event.message().id.as_str()));
        assert_eq!(out.target, Origin::user("alice"));
    }

    #[tokio::test]
    async fn test_report_error_uses_prefix() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let event = event_on(&bus, InboundMessage::direct("cli", "alice", "hi"));

        event.report_error(&HandlerError::msg("no such step")).await;

        let out = rx.recv().await.unwrap();
        assert_eq!(out.content, "ERROR: no such step");
    }

    #[tokio::test]
    async fn test_reporting_passes_values_through() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let event = event_on(&bus, InboundMessage::direct("cli", "alice", "hi"));

        let ok = event
            .reporting(async { Ok::<_, HandlerError>(7) })
            .await;
        assert_eq!(ok, Some(7));
        assert!(rx.try_recv().is_err());

        let failed = event
            .reporting(async { Err::<i32, _>(HandlerError::msg("nope")) })
            .await;
        assert_eq!(failed, None);
        assert_eq!(rx.recv().await.unwrap().content, "ERROR: nope");
    }
}

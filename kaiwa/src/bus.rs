//! Async message bus between channels and the dispatch engine.
//!
//! Channels publish what they receive as [`InboundMessage`]s; the dispatcher
//! consumes them one at a time. Replies travel the other way as
//! [`OutboundMessage`]s, broadcast to general subscribers and forwarded to
//! the subscribers of the target channel.
//!
//! Outbound publishing never waits for a slow channel: a full per-channel
//! queue drops the message and counts it in [`BusStats::dropped_count`]. A
//! message nobody is subscribed to is rejected with
//! [`BusError::OutboundClosed`].

use crate::error::{BusError, BusResult};
use crate::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, trace, warn};

/// Default capacity for message queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default capacity for broadcast channels.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Async message bus that decouples chat channels from the dispatch engine.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<MessageBusInner>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}

struct MessageBusInner {
    /// Inbound message queue (channels → dispatcher).
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: RwLock<Option<mpsc::Receiver<InboundMessage>>>,

    /// Outbound broadcast (sessions → channels).
    outbound_tx: broadcast::Sender<OutboundMessage>,

    /// Channel-specific subscribers for targeted delivery.
    channel_subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<OutboundMessage>>>>,

    /// Statistics.
    stats: RwLock<BusStats>,
}

/// Message bus statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Total inbound messages published.
    pub inbound_count: u64,
    /// Total outbound messages published.
    pub outbound_count: u64,
    /// Outbound deliveries dropped because a channel queue was full.
    pub dropped_count: u64,
    /// Outbound messages rejected because nobody was subscribed.
    pub undelivered_count: u64,
}

impl MessageBus {
    /// Create a new message bus with default capacities.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_QUEUE_CAPACITY, DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a new message bus with the given inbound and broadcast capacities.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is zero.
    #[must_use]
    pub fn with_capacities(inbound_capacity: usize, broadcast_capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let (outbound_tx, _) = broadcast::channel(broadcast_capacity);

        Self {
            inner: Arc::new(MessageBusInner {
                inbound_tx,
                inbound_rx: RwLock::new(Some(inbound_rx)),
                outbound_tx,
                channel_subscribers: RwLock::new(HashMap::new()),
                stats: RwLock::new(BusStats::default()),
            }),
        }
    }

    /// Publish an inbound message from a channel.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> BusResult<()> {
        trace!(
            channel = %msg.channel,
            sender = %msg.sender_id,
            origin = %msg.origin,
            "publishing inbound message"
        );

        self.inner
            .inbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::InboundClosed)?;

        self.inner.stats.write().await.inbound_count += 1;
        Ok(())
    }

    /// Consume the next inbound message.
    ///
    /// Only the dispatcher should call this. Returns `None` when the bus is
    /// closed.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx_guard = self.inner.inbound_rx.write().await;
        if let Some(rx) = rx_guard.as_mut() {
            rx.recv().await
        } else {
            None
        }
    }

    /// Consume the next inbound message, giving up after `timeout`.
    pub async fn consume_inbound_timeout(&self, timeout: Duration) -> Option<InboundMessage> {
        let mut rx_guard = self.inner.inbound_rx.write().await;
        if let Some(rx) = rx_guard.as_mut() {
            tokio::time::timeout(timeout, rx.recv())
                .await
                .ok()
                .flatten()
        } else {
            None
        }
    }

    /// Publish an outbound message.
    ///
    /// The message is broadcast to all general subscribers and queued for the
    /// subscribers of `msg.channel`. This never blocks on a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::OutboundClosed`] when neither a general nor a
    /// channel subscriber is left to receive the message.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> BusResult<()> {
        trace!(
            channel = %msg.channel,
            target = %msg.target,
            "publishing outbound message"
        );

        let broadcast_receivers = self.inner.outbound_tx.send(msg.clone()).unwrap_or(0);

        let mut dropped = 0;
        let channel_receivers = {
            let mut subscribers = self.inner.channel_subscribers.write().await;
            match subscribers.get_mut(&msg.channel) {
                Some(senders) => {
                    senders.retain(|sender| match sender.try_send(msg.clone()) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            warn!(channel = %msg.channel, "channel queue full, dropping message");
                            dropped += 1;
                            true
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(channel = %msg.channel, "channel subscriber disconnected");
                            false
                        }
                    });
                    senders.len()
                }
                None => 0,
            }
        };

        let mut stats = self.inner.stats.write().await;
        stats.dropped_count += dropped;
        if broadcast_receivers == 0 && channel_receivers == 0 {
            stats.undelivered_count += 1;
            debug!(channel = %msg.channel, "no subscriber for outbound message");
            return Err(BusError::OutboundClosed);
        }
        stats.outbound_count += 1;
        Ok(())
    }

    /// Subscribe to all outbound messages (broadcast).
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<OutboundMessage> {
        self.inner.outbound_tx.subscribe()
    }

    /// Subscribe to outbound messages addressed to `channel`.
    pub async fn subscribe_channel(&self, channel: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);

        let mut subscribers = self.inner.channel_subscribers.write().await;
        subscribers.entry(channel.to_string()).or_default().push(tx);

        debug!(channel = %channel, "new channel subscriber registered");
        rx
    }

    /// Get current bus statistics.
    pub async fn stats(&self) -> BusStats {
        *self.inner.stats.read().await
    }

    /// Create a handle for publishing inbound messages.
    pub fn inbound_handle(&self) -> InboundHandle {
        InboundHandle {
            tx: self.inner.inbound_tx.clone(),
        }
    }

    /// Create a handle for publishing outbound messages.
    pub fn outbound_handle(&self) -> OutboundHandle {
        OutboundHandle { bus: self.clone() }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight handle for publishing inbound messages.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<InboundMessage>,
}

impl InboundHandle {
    /// Publish an inbound message.
    pub async fn publish(&self, msg: InboundMessage) -> BusResult<()> {
        self.tx.send(msg).await.map_err(|_| BusError::InboundClosed)
    }
}

/// Lightweight handle for publishing outbound messages.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    bus: MessageBus,
}

impl OutboundHandle {
    /// Publish an outbound message.
    pub async fn publish(&self, msg: OutboundMessage) -> BusResult<()> {
        self.bus.publish_outbound(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Origin;

    #[tokio::test]
    async fn test_inbound_message_flow() {
        let bus = MessageBus::new();

        let msg = InboundMessage::direct("test", "alice", "Hello");
        bus.publish_inbound(msg).await.unwrap();

        let received = bus
            .consume_inbound_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(received.plain_text(), "Hello");
    }

    #[tokio::test]
    async fn test_consume_timeout_without_messages() {
        let bus = MessageBus::new();
        let received = bus.consume_inbound_timeout(Duration::from_millis(10)).await;
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_outbound_broadcast() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();

        let msg = OutboundMessage::new("test", Origin::user("alice"), "Response");
        bus.publish_outbound(msg).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "Response");
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_channel("cli").await;

        let msg1 = OutboundMessage::new("cli", Origin::user("a"), "For CLI");
        bus.publish_outbound(msg1).await.unwrap();

        let msg2 = OutboundMessage::new("qq", Origin::group("g"), "For QQ");
        assert_eq!(
            bus.publish_outbound(msg2).await,
            Err(BusError::OutboundClosed)
        );

        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content, "For CLI");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_queue_drops_instead_of_blocking() {
        let bus = MessageBus::new();
        let _rx = bus.subscribe_channel("slow").await;

        for i in 0..=DEFAULT_QUEUE_CAPACITY {
            let msg = OutboundMessage::new("slow", Origin::user("a"), format!("#{i}"));
            bus.publish_outbound(msg).await.unwrap();
        }

        let stats = bus.stats().await;
        assert_eq!(stats.outbound_count, DEFAULT_QUEUE_CAPACITY as u64 + 1);
        assert_eq!(stats.dropped_count, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = MessageBus::new();
        let _rx = bus.subscribe_outbound();

        bus.publish_inbound(InboundMessage::direct("test", "s", "in"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("test", Origin::user("s"), "out"))
            .await
            .unwrap();

        let stats = bus.stats().await;
        assert_eq!(stats.inbound_count, 1);
        assert_eq!(stats.outbound_count, 1);
        assert_eq!(stats.dropped_count, 0);
        assert_eq!(stats.undelivered_count, 0);
    }

    #[tokio::test]
    async fn test_outbound_without_subscribers_is_rejected() {
        let bus = MessageBus::new();

        let result = bus
            .outbound_handle()
            .publish(OutboundMessage::new("test", Origin::user("s"), "nobody"))
            .await;
        assert_eq!(result, Err(BusError::OutboundClosed));

        let stats = bus.stats().await;
        assert_eq!(stats.outbound_count, 0);
        assert_eq!(stats.undelivered_count, 1);

        let rx = bus.subscribe_channel("test").await;
        drop(rx);
        let result = bus
            .publish_outbound(OutboundMessage::new("test", Origin::user("s"), "gone"))
            .await;
        assert_eq!(result, Err(BusError::OutboundClosed));
    }
}

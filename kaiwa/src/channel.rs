//! Transport abstraction.
//!
//! A [`Channel`] turns a platform's traffic into [`InboundMessage`]s on the
//! bus and delivers the [`OutboundMessage`]s addressed to it. Session logic
//! never talks to a channel directly; it only replies through its event.
//!
//! [`InboundMessage`]: crate::events::InboundMessage

use crate::bus::MessageBus;
use crate::error::ChannelResult;
use crate::events::OutboundMessage;
use crate::message_event::ERROR_REPLY_PREFIX;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Not started, or stopped.
    #[default]
    Stopped,
    /// Accepting and delivering messages.
    Running,
    /// Still delivering, but the platform side stopped sending input.
    InputClosed,
}

/// Replies a channel delivered, broken down by how sessions answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    /// Replies addressed to a single user.
    pub direct: u64,
    /// Replies addressed to a group.
    pub group: u64,
    /// Replies quoting the message they answer.
    pub quoted: u64,
    /// `"ERROR: "` diagnostics for failed sessions.
    pub diagnostics: u64,
}

impl DeliveryCounts {
    fn record(&mut self, msg: &OutboundMessage) {
        if msg.target.is_group() {
            self.group += 1;
        } else {
            self.direct += 1;
        }
        if msg.quote.is_some() {
            self.quoted += 1;
        }
        if msg.content.starts_with(ERROR_REPLY_PREFIX) {
            self.diagnostics += 1;
        }
    }

    /// Every delivered reply.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.direct + self.group
    }
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: String,
    /// Current state.
    pub state: ChannelState,
    /// Messages published to the bus.
    pub received: u64,
    /// Replies delivered to the platform.
    pub delivered: DeliveryCounts,
    /// Last error, if any.
    pub last_error: Option<String>,
}

impl ChannelStatus {
    /// Running without a recorded error.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.state == ChannelState::Running && self.last_error.is_none()
    }
}

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name; outbound messages are routed by it.
    fn name(&self) -> &str;

    /// Begin moving messages between the platform and `bus`.
    ///
    /// Implementations subscribe to `bus.subscribe_channel(self.name())` for
    /// delivery and publish what they receive with `bus.publish_inbound`.
    async fn start(&self, bus: &MessageBus) -> ChannelResult<()>;

    /// Stop moving messages.
    async fn stop(&self);

    /// Current status.
    async fn status(&self) -> ChannelStatus;
}

/// Tracks a channel's state and traffic for [`Channel::status`].
#[derive(Debug)]
pub struct ChannelMeter {
    status: RwLock<ChannelStatus>,
}

impl ChannelMeter {
    /// A stopped meter for the channel `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            status: RwLock::new(ChannelStatus {
                name: name.into(),
                ..ChannelStatus::default()
            }),
        }
    }

    /// Move to `state`.
    pub async fn set_state(&self, state: ChannelState) {
        let mut status = self.status.write().await;
        debug!(channel = %status.name, ?state, "channel state changed");
        status.state = state;
    }

    /// Count a message published to the bus.
    pub async fn record_received(&self) {
        self.status.write().await.received += 1;
    }

    /// Count `msg` as delivered.
    pub async fn record_delivery(&self, msg: &OutboundMessage) {
        self.status.write().await.delivered.record(msg);
    }

    /// Remember `error` as the last error.
    pub async fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        let mut status = self.status.write().await;
        error!(channel = %status.name, %error, "channel error");
        status.last_error = Some(error);
    }

    /// Current status.
    pub async fn snapshot(&self) -> ChannelStatus {
        self.status.read().await.clone()
    }
}

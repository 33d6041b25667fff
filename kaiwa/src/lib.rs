//! Kaiwa - conversational sessions for chat bots.
//!
//! A *session* is a short-lived, stateful conversation laid over an
//! otherwise stateless message stream, such as a multi-step wizard or a
//! pending confirmation. Sessions live in a [`SessionRegistry`],
//! which expires them after a TTL and fans every incoming event out to the
//! ones still alive. A failing session never affects its siblings; its
//! error is reported back to the user as `"ERROR: <description>"`.
//!
//! # Architecture
//!
//! - **Message Bus** ([`bus`]) - inbound queue and outbound fan-out
//! - **Channels** ([`channel`], [`channels`]) - transports feeding the bus
//! - **Sessions** ([`session`]) - sessions, handlers, registry, sweeper
//! - **Dispatcher** ([`dispatcher`]) - bus consumer driving registry rounds
//! - **Gateway** ([`gateway`]) - wires everything together
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use kaiwa::prelude::*;
//!
//! let bus = MessageBus::new();
//! let registry = SessionRegistry::new();
//! registry
//!     .create_session(handler_fn(|event, remover| async move {
//!         event.reply(format!("you said {}", event.plain_text())).await?;
//!         remover.remove().await;
//!         Ok(())
//!     }))
//!     .await;
//!
//! let dispatcher = Dispatcher::new(bus.clone(), registry);
//! dispatcher.run().await?;
//! ```
//!
//! [`SessionRegistry`]: session::SessionRegistry

pub mod bus;
pub mod channel;
pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gateway;
pub mod message_event;
pub mod session;
pub mod util;
pub mod wizard;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        BusError, BusResult, ChannelError, ChannelResult, ConfigError, ConfigResult,
        HandlerError, HandlerResult, KaiwaError, Result,
    };

    pub use crate::bus::{BusStats, InboundHandle, MessageBus, OutboundHandle};

    pub use crate::channel::{Channel, ChannelMeter, ChannelState, ChannelStatus, DeliveryCounts};
    pub use crate::channels::{CliChannel, CliChannelConfig};

    pub use crate::config::{ConfigIssue, IssueLevel, KaiwaConfig, load_config};

    pub use crate::dispatcher::{Dispatcher, SessionStarter};

    pub use crate::events::{InboundMessage, MessageSegment, Origin, OutboundMessage};

    pub use crate::gateway::{Gateway, GatewayBuilder, GatewayStatus};

    pub use crate::message_event::{ERROR_REPLY_PREFIX, MessageEvent};

    pub use crate::session::{
        Session, SessionHandler, SessionId, SessionRegistry, SessionRemover, Sweeper,
        handler_fn,
    };

    pub use crate::wizard::{ProfileStore, ProfileWizard, ProfileWizardStarter};
}

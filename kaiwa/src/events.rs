//! Message events for channel communication.
//!
//! This module defines the data that flows through the message bus: what a
//! channel received ([`InboundMessage`]) and what should be sent back
//! ([`OutboundMessage`]). Channels translate their platform's message model
//! into these types; nothing above the bus sees transport details.

use crate::util::generate_message_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Separator placed between text segments by [`InboundMessage::plain_text`].
pub const PLAIN_TEXT_SEPARATOR: &str = ", ";

/// Where a message came from, and therefore where replies go.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// A direct conversation with a single user.
    User {
        /// The user's identifier within the channel.
        user_id: String,
    },
    /// A group conversation.
    Group {
        /// The group's identifier within the channel.
        group_id: String,
    },
}

impl Origin {
    /// Direct conversation with a user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    /// Group conversation.
    pub fn group(group_id: impl Into<String>) -> Self {
        Self::Group {
            group_id: group_id.into(),
        }
    }

    /// Returns true for group conversations.
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { user_id } => write!(f, "user:{user_id}"),
            Self::Group { group_id } => write!(f, "group:{group_id}"),
        }
    }
}

/// One piece of a rich message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSegment {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A mention of another user.
    Mention {
        /// The mentioned user's identifier.
        user_id: String,
    },
    /// An image, referenced by URL or file path.
    Image {
        /// Location of the image.
        url: String,
    },
    /// Anything the channel could not map to a richer segment.
    Other {
        /// Channel-specific description of the segment.
        description: String,
    },
}

impl MessageSegment {
    /// A plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text of a `Text` segment, `None` for everything else.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// An inbound message from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message ID.
    pub id: String,
    /// Channel identifier (e.g., "cli", "telegram").
    pub channel: String,
    /// Sender's identifier within the channel.
    pub sender_id: String,
    /// Conversation the message was posted in.
    pub origin: Origin,
    /// Message content, in order.
    pub segments: Vec<MessageSegment>,
    /// Timestamp when the message was received.
    pub timestamp: SystemTime,
}

impl InboundMessage {
    /// Create a new inbound message with the given segments.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        origin: Origin,
        segments: Vec<MessageSegment>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            origin,
            segments,
            timestamp: SystemTime::now(),
        }
    }

    /// A direct text message from a user.
    pub fn direct(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self::new(
            channel,
            user_id.clone(),
            Origin::user(user_id),
            vec![MessageSegment::text(text)],
        )
    }

    /// A text message posted by a user in a group.
    pub fn group(
        channel: impl Into<String>,
        group_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            channel,
            sender_id,
            Origin::group(group_id),
            vec![MessageSegment::text(text)],
        )
    }

    /// Append a segment.
    #[must_use]
    pub fn with_segment(mut self, segment: MessageSegment) -> Self {
        self.segments.push(segment);
        self
    }

    /// The text segments in order, joined by `", "`.
    ///
    /// Mentions, images and other rich segments are dropped.
    #[must_use]
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(MessageSegment::as_text)
            .collect::<Vec<_>>()
            .join(PLAIN_TEXT_SEPARATOR)
    }
}

/// An outbound message addressed to a conversation on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique message ID.
    pub id: String,
    /// Target channel identifier.
    pub channel: String,
    /// Target conversation.
    pub target: Origin,
    /// Message text content.
    pub content: String,
    /// ID of the inbound message this one quotes, if any.
    pub quote: Option<String>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(channel: impl Into<String>, target: Origin, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            target,
            content: content.into(),
            quote: None,
        }
    }

    /// Create a response to an inbound message, addressed to its origin.
    pub fn reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        Self::new(msg.channel.clone(), msg.origin.clone(), content)
    }

    /// Create a response that quotes the inbound message.
    pub fn quote_reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        Self::reply_to(msg, content).with_quote(msg.id.clone())
    }

    /// Set the quoted message ID.
    #[must_use]
    pub fn with_quote(mut self, message_id: impl Into<String>) -> Self {
        self.quote = Some(message_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_keeps_only_text_segments() {
        let msg = InboundMessage::group("qq", "g1", "alice", "hello")
            .with_segment(MessageSegment::Mention {
                user_id: "bob".into(),
            })
            .with_segment(MessageSegment::text("world"))
            .with_segment(MessageSegment::Image {
                url: "https://example.invalid/cat.png".into(),
            });

        assert_eq!(msg.plain_text(), "hello, world");
    }

    #[test]
    fn test_plain_text_separates_text_segments() {
        let msg = InboundMessage::direct("qq", "alice", "a").with_segment(MessageSegment::text("b"));
        assert_eq!(msg.plain_text(), "a, b");

        let single = InboundMessage::direct("qq", "alice", "profile");
        assert_eq!(single.plain_text(), "profile");
    }

    #[test]
    fn test_plain_text_empty_without_text() {
        let msg = InboundMessage::new(
            "qq",
            "alice",
            Origin::user("alice"),
            vec![MessageSegment::Image { url: "x".into() }],
        );
        assert_eq!(msg.plain_text(), "");
    }

    #[test]
    fn test_reply_targets_group_for_group_messages() {
        let inbound = InboundMessage::group("qq", "g1", "alice", "hi");
        let reply = OutboundMessage::reply_to(&inbound, "hello group");

        assert_eq!(reply.channel, "qq");
        assert_eq!(reply.target, Origin::group("g1"));
        assert!(reply.quote.is_none());
    }

    #[test]
    fn test_reply_targets_sender_for_direct_messages() {
        let inbound = InboundMessage::direct("cli", "alice", "hi");
        let reply = OutboundMessage::quote_reply_to(&inbound, "hello");

        assert_eq!(reply.target, Origin::user("alice"));
        assert_eq!(reply.quote.as_deref(), Some(inbound.id.as_str()));
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(Origin::user("42").to_string(), "user:42");
        assert_eq!(Origin::group("7").to_string(), "group:7");
        assert!(Origin::group("7").is_group());
    }
}

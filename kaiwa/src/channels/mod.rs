//! Concrete [`Channel`](crate::channel::Channel) implementations.
//!
//! Only the terminal channel ships with the crate; platform transports plug
//! in through the same trait.

pub mod cli;

pub use cli::{CLI_CHANNEL, CliChannel, CliChannelConfig};

//! Conversational sessions and the registry that drives them.
//!
//! A [`Session`] is a short-lived, stateful conversation laid over the
//! message stream: its [`SessionHandler`] sees every incoming event until the
//! session removes itself through its [`SessionRemover`] or outlives the
//! registry's TTL. The [`SessionRegistry`] owns all live sessions, sweeps
//! expired ones before each event and fans the event out to the rest.

mod entry;
mod handler;
mod registry;
mod sweeper;

pub use entry::{Session, SessionId};
pub use handler::{FnHandler, SessionHandler, handler_fn};
pub use registry::{
    DEFAULT_SESSION_TTL, DispatchReport, RegistryStats, SessionRegistry, SessionRemover,
};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, Sweeper, SweeperHandle, SweeperStatus};

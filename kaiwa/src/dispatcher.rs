//! The dispatch loop: inbound messages in, session rounds out.
//!
//! The [`Dispatcher`] is the single consumer of the bus's inbound queue. For
//! every message it builds a [`MessageEvent`], runs one dispatch round over
//! the [`SessionRegistry`], and then offers the event to its
//! [`SessionStarter`]s, which may open new sessions. A session opened this
//! way first sees the *next* event.

use crate::bus::MessageBus;
use crate::error::{HandlerResult, Result};
use crate::events::InboundMessage;
use crate::message_event::MessageEvent;
use crate::session::{DispatchReport, Session, SessionRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the loop waits for a message before rechecking its running flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Opens sessions in response to events.
///
/// Starters see every event after the registry's round has finished. An
/// error is reported to the event's originator like a handler failure.
#[async_trait]
pub trait SessionStarter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Return a session to register, or `None` to ignore the event.
    async fn start(&self, event: &MessageEvent) -> HandlerResult<Option<Session>>;
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Messages taken off the bus.
    pub messages: u64,
    /// Sessions opened by starters.
    pub sessions_started: u64,
    /// Starter calls that failed.
    pub starter_failures: u64,
}

/// Routes inbound messages to the session registry.
pub struct Dispatcher {
    bus: MessageBus,
    registry: SessionRegistry,
    starters: Vec<Arc<dyn SessionStarter>>,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
    stats: Arc<RwLock<DispatcherStats>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("starters", &self.starters.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher reading from `bus` into `registry`.
    #[must_use]
    pub fn new(bus: MessageBus, registry: SessionRegistry) -> Self {
        Self {
            bus,
            registry,
            starters: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: Arc::new(RwLock::new(false)),
            stats: Arc::new(RwLock::new(DispatcherStats::default())),
        }
    }

    /// Add a session starter. Starters run in the order they were added.
    #[must_use]
    pub fn with_starter(mut self, starter: impl SessionStarter + 'static) -> Self {
        self.starters.push(Arc::new(starter));
        self
    }

    /// Set how often the loop rechecks its running flag while idle.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The registry this dispatcher feeds.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Consume the inbound queue until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// The loop itself does not fail today.
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;
        self.run_loop().await
    }

    /// Run the loop on a new task.
    ///
    /// The dispatcher counts as running once this returns, so a
    /// [`stop`](Self::stop) issued right after is never lost.
    pub async fn spawn(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        *self.running.write().await = true;
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run_loop().await })
    }

    async fn run_loop(&self) -> Result<()> {
        info!(starters = self.starters.len(), "dispatcher started");

        while *self.running.read().await {
            let Some(msg) = self.bus.consume_inbound_timeout(self.poll_interval).await else {
                continue;
            };
            self.process(msg).await;
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Stop the loop after the message in flight.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Whether the loop is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Current counters.
    pub async fn stats(&self) -> DispatcherStats {
        *self.stats.read().await
    }

    /// Handle one inbound message: a registry round, then the starters.
    pub async fn process(&self, msg: InboundMessage) -> DispatchReport {
        debug!(
            channel = %msg.channel,
            sender = %msg.sender_id,
            origin = %msg.origin,
            "dispatching message"
        );
        self.stats.write().await.messages += 1;

        let event = MessageEvent::new(msg, self.bus.outbound_handle());
        let report = self.registry.dispatch(&event).await;

        for starter in &self.starters {
            match starter.start(&event).await {
                Ok(Some(session)) => {
                    let id = self.registry.add(session).await;
                    self.stats.write().await.sessions_started += 1;
                    info!(starter = starter.name(), session = %id, "session started");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(starter = starter.name(), error = %e, "session starter failed");
                    self.stats.write().await.starter_failures += 1;
                    event.report_error(&e).await;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::events::OutboundMessage;
    use crate::session::handler_fn;
    use tokio::sync::broadcast;

    /// Opens an echo session whenever the text is "open".
    struct EchoStarter;

    #[async_trait]
    impl SessionStarter for EchoStarter {
        fn name(&self) -> &str {
            "echo"
        }

        async fn start(&self, event: &MessageEvent) -> HandlerResult<Option<Session>> {
            match event.plain_text().as_str() {
                "open" => Ok(Some(
                    Session::new(handler_fn(|event: MessageEvent, _| async move {
                        event.reply(format!("echo {}", event.plain_text())).await?;
                        Ok::<(), HandlerError>(())
                    }))
                    .labeled("echo"),
                )),
                "broken" => Err(HandlerError::msg("cannot open")),
                _ => Ok(None),
            }
        }
    }

    async fn next(rx: &mut broadcast::Receiver<OutboundMessage>) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_started_session_sees_next_event_only() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let dispatcher = Dispatcher::new(bus.clone(), SessionRegistry::new()).with_starter(EchoStarter);

        let report = dispatcher
            .process(InboundMessage::direct("test", "alice", "open"))
            .await;
        assert_eq!(report.visited, 0);
        assert_eq!(dispatcher.registry().len().await, 1);
        assert!(rx.try_recv().is_err());

        let report = dispatcher
            .process(InboundMessage::direct("test", "alice", "again"))
            .await;
        assert_eq!(report.visited, 1);
        assert_eq!(next(&mut rx).await.content, "echo again");

        let stats = dispatcher.stats().await;
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.sessions_started, 1);
    }

    #[tokio::test]
    async fn test_starter_failure_is_reported() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let dispatcher = Dispatcher::new(bus.clone(), SessionRegistry::new()).with_starter(EchoStarter);

        dispatcher
            .process(InboundMessage::group("test", "g1", "bob", "broken"))
            .await;

        let out = next(&mut rx).await;
        assert_eq!(out.content, "ERROR: cannot open");
        assert_eq!(out.target, crate::events::Origin::group("g1"));
        assert_eq!(dispatcher.stats().await.starter_failures, 1);
        assert!(dispatcher.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_spawned_loop_consumes_bus_until_stopped() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound();
        let dispatcher = Arc::new(
            Dispatcher::new(bus.clone(), SessionRegistry::new())
                .with_starter(EchoStarter)
                .with_poll_interval(Duration::from_millis(10)),
        );

        let task = dispatcher.spawn().await;
        assert!(dispatcher.is_running().await);

        bus.publish_inbound(InboundMessage::direct("test", "alice", "open"))
            .await
            .unwrap();
        bus.publish_inbound(InboundMessage::direct("test", "alice", "ping"))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.content, "echo ping");

        dispatcher.stop().await;
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!dispatcher.is_running().await);
    }
}

//! Gateway service wiring everything together.
//!
//! The gateway owns every long-running component. [`Gateway::run`] starts
//! them, waits for a shutdown signal or for the terminal user to quit, then
//! stops them in reverse order.

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelStatus};
use crate::channels::{CliChannel, CliChannelConfig};
use crate::config::{KaiwaConfig, load_config};
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::error::Result;
use crate::session::{RegistryStats, SessionRegistry, Sweeper, SweeperHandle};
use crate::wizard::{ProfileStore, ProfileWizardStarter};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// File-level settings.
    pub kaiwa: KaiwaConfig,
    /// Whether to attach the terminal channel; ANDed with
    /// `channels.cli.enabled`.
    pub enable_cli: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kaiwa: KaiwaConfig::default(),
            enable_cli: true,
        }
    }
}

/// Runs the bus, channels, registry and dispatcher as one service.
pub struct Gateway {
    config: GatewayConfig,
    bus: MessageBus,
    registry: SessionRegistry,
    profiles: ProfileStore,
    cli: RwLock<Option<Arc<CliChannel>>>,
    dispatcher: Arc<Dispatcher>,
    sweeper: RwLock<Option<SweeperHandle>>,
    running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.kaiwa` fails validation.
    pub fn with_config(config: GatewayConfig) -> Result<Self> {
        config.kaiwa.validate()?;
        let bus = MessageBus::with_capacities(
            config.kaiwa.bus.inbound_capacity,
            config.kaiwa.bus.broadcast_capacity,
        );
        let registry = SessionRegistry::with_ttl(config.kaiwa.sessions.ttl());
        let profiles = ProfileStore::new();
        let dispatcher = Dispatcher::new(bus.clone(), registry.clone())
            .with_starter(ProfileWizardStarter::new(profiles.clone()));

        Ok(Self {
            cli: RwLock::new(None),
            dispatcher: Arc::new(dispatcher),
            sweeper: RwLock::new(None),
            running: Arc::new(RwLock::new(false)),
            config,
            bus,
            registry,
            profiles,
        })
    }

    /// The message bus.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// The session registry.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Profiles completed through the wizard.
    #[must_use]
    pub const fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Start the terminal channel if it is enabled.
    async fn start_cli(&self) -> Option<Arc<CliChannel>> {
        let cli_config = &self.config.kaiwa.channels.cli;
        if !(self.config.enable_cli && cli_config.enabled) {
            return None;
        }

        let cli = Arc::new(CliChannel::with_config(CliChannelConfig::from(cli_config)));
        if let Err(e) = cli.start(&self.bus).await {
            error!(channel = cli.name(), error = %e, "failed to start channel");
        }
        *self.cli.write().await = Some(Arc::clone(&cli));
        Some(cli)
    }

    async fn start_sweeper(&self) {
        let Some(interval) = self.config.kaiwa.sessions.sweep_interval() else {
            info!("background sweeping disabled; sessions expire on traffic only");
            return;
        };
        let handle = Sweeper::new(self.registry.clone())
            .with_interval(interval)
            .start()
            .await;
        *self.sweeper.write().await = Some(handle);
    }

    /// Run until `shutdown` resolves or the terminal user quits.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher task fails or panics.
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        *self.running.write().await = true;
        info!(ttl = ?self.registry.ttl(), "gateway starting");

        let cli = self.start_cli().await;
        self.start_sweeper().await;

        let task = self.dispatcher.spawn().await;

        info!("gateway started");
        let input_closed = async {
            match &cli {
                Some(cli) => cli.input_closed().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            () = shutdown => info!("shutdown requested"),
            () = input_closed => info!("terminal input closed"),
        }

        info!("gateway stopping");
        self.dispatcher.stop().await;
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "dispatcher task failed");
                Err(e.into())
            }
        };

        if let Some(sweeper) = self.sweeper.write().await.take() {
            sweeper.stop().await;
        }
        if let Some(cli) = &cli {
            cli.stop().await;
        }
        let dropped = self.registry.clear().await;
        *self.running.write().await = false;

        info!(sessions_dropped = dropped, "gateway stopped");
        result
    }

    /// Whether the gateway is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Snapshot of every component's counters.
    pub async fn status(&self) -> GatewayStatus {
        let bus_stats = self.bus.stats().await;
        let sweeps = match self.sweeper.read().await.as_ref() {
            Some(handle) => Some(handle.status().await.sweeps),
            None => None,
        };
        let channels = match self.cli.read().await.as_ref() {
            Some(cli) => vec![cli.status().await],
            None => Vec::new(),
        };

        GatewayStatus {
            running: *self.running.read().await,
            ttl: self.registry.ttl(),
            live_sessions: self.registry.len().await,
            registry: self.registry.stats().await,
            dispatcher: self.dispatcher.stats().await,
            sweeps,
            profiles: self.profiles.len().await,
            channels,
            total_inbound: bus_stats.inbound_count,
            total_outbound: bus_stats.outbound_count,
            dropped_outbound: bus_stats.dropped_count,
            undelivered_outbound: bus_stats.undelivered_count,
        }
    }
}

/// Gateway status.
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    /// Whether the gateway is running.
    pub running: bool,
    /// Session TTL in effect.
    pub ttl: Duration,
    /// Sessions currently registered.
    pub live_sessions: usize,
    /// Registry counters.
    pub registry: RegistryStats,
    /// Dispatcher counters.
    pub dispatcher: DispatcherStats,
    /// Background sweeps performed, if the sweeper runs.
    pub sweeps: Option<u64>,
    /// Completed profiles.
    pub profiles: usize,
    /// Status of each started channel.
    pub channels: Vec<ChannelStatus>,
    /// Inbound messages published.
    pub total_inbound: u64,
    /// Outbound messages published.
    pub total_outbound: u64,
    /// Outbound messages dropped on full channel queues.
    pub dropped_outbound: u64,
    /// Outbound messages nobody was subscribed to.
    pub undelivered_outbound: u64,
}

/// Builder for a [`Gateway`].
#[derive(Debug, Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
}

impl GatewayBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the file-level settings.
    #[must_use]
    pub fn kaiwa_config(mut self, config: KaiwaConfig) -> Self {
        self.config.kaiwa = config;
        self
    }

    /// Enable or disable the terminal channel.
    #[must_use]
    pub const fn enable_cli(mut self, enable: bool) -> Self {
        self.config.enable_cli = enable;
        self
    }

    /// Override the session TTL.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.config.kaiwa.sessions.ttl_secs = ttl.as_secs();
        self
    }

    /// Override the background sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.kaiwa.sessions.sweep_interval_secs = Some(interval.as_secs());
        self
    }

    /// Load file-level settings from `path` (default location if `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if it fails validation.
    pub async fn load_config(mut self, path: Option<&Path>) -> Result<Self> {
        self.config.kaiwa = load_config(path).await?;
        Ok(self)
    }

    /// Validate the settings and build the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings fail validation, for example after a
    /// zero TTL override.
    pub fn build(self) -> Result<Gateway> {
        Gateway::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InboundMessage;
    use tokio::sync::oneshot;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.enable_cli);
        assert_eq!(config.kaiwa.sessions.ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_builder_rejects_zero_ttl() {
        let result = GatewayBuilder::new().ttl(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_capacity_config_is_rejected() {
        let mut config = GatewayConfig::default();
        config.kaiwa.bus.inbound_capacity = 0;
        assert!(Gateway::with_config(config).is_err());

        let mut config = GatewayConfig::default();
        config.kaiwa.bus.broadcast_capacity = 0;
        let err = Gateway::with_config(config).unwrap_err();
        assert!(err.to_string().contains("bus.broadcast_capacity"));
    }

    #[test]
    fn test_builder_overrides() {
        let gateway = GatewayBuilder::new()
            .enable_cli(false)
            .ttl(Duration::from_secs(600))
            .build()
            .unwrap();
        assert_eq!(gateway.registry().ttl(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_run_dispatches_until_shutdown() {
        let gateway = Arc::new(
            GatewayBuilder::new()
                .enable_cli(false)
                .sweep_interval(Duration::from_secs(3600))
                .build()
                .unwrap(),
        );
        let mut rx = gateway.bus().subscribe_outbound();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let runner = Arc::clone(&gateway);
        let task = tokio::spawn(async move {
            runner
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        gateway
            .bus()
            .publish_inbound(InboundMessage::direct("test", "alice", "profile"))
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "What's your name?");

        // The wizard replies before its session is registered.
        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.registry().is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let status = gateway.status().await;
        assert!(status.running);
        assert_eq!(status.live_sessions, 1);
        assert_eq!(status.sweeps, Some(0));
        assert!(status.channels.is_empty());

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let status = gateway.status().await;
        assert!(!status.running);
        assert_eq!(status.live_sessions, 0);
        assert_eq!(status.dispatcher.sessions_started, 1);
    }
}

//! Terminal channel.
//!
//! Each non-empty line typed on stdin becomes a direct message from the
//! configured user; replies addressed to the `cli` channel are printed to
//! stdout followed by a fresh prompt. A quoted reply is printed under the
//! line it quotes. Typing `exit`, `quit` or `/quit`, or closing stdin, ends
//! input.

use crate::bus::{InboundHandle, MessageBus};
use crate::channel::{Channel, ChannelMeter, ChannelState, ChannelStatus};
use crate::config::CliConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::events::{InboundMessage, OutboundMessage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tracing::{debug, info};

/// Name the terminal channel registers under.
pub const CLI_CHANNEL: &str = "cli";

/// Terminal channel settings.
#[derive(Debug, Clone)]
pub struct CliChannelConfig {
    /// Prompt printed before input.
    pub prompt: String,
    /// Sender id attached to every line.
    pub user_id: String,
}

impl Default for CliChannelConfig {
    fn default() -> Self {
        Self::from(&CliConfig::default())
    }
}

impl From<&CliConfig> for CliChannelConfig {
    fn from(config: &CliConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            user_id: config.user_id.clone(),
        }
    }
}

impl CliChannelConfig {
    /// Set the prompt.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the sender id.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// What a line of input means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliInput {
    /// Blank line.
    Empty,
    /// The user asked to leave.
    Quit,
    /// Text to publish.
    Message(String),
}

impl CliInput {
    /// Classify one raw input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "exit" | "quit" | "/quit" => Self::Quit,
            text => Self::Message(text.to_string()),
        }
    }
}

/// How many recent input lines are kept for rendering quoted replies.
const QUOTE_MEMORY: usize = 64;

/// Render an outbound message for the terminal.
///
/// Group replies carry their target. A quoted reply shows the quoted line
/// first when it is still known.
#[must_use]
pub fn render(msg: &OutboundMessage, quoted: Option<&str>) -> String {
    let body = if msg.target.is_group() {
        format!("[{}] {}", msg.target, msg.content)
    } else {
        msg.content.clone()
    };
    match quoted {
        Some(line) => format!("> {line}\n{body}"),
        None => body,
    }
}

/// Recent input lines by message id.
#[derive(Debug, Default)]
struct QuoteBook {
    lines: VecDeque<(String, String)>,
}

impl QuoteBook {
    fn remember(&mut self, id: &str, text: &str) {
        if self.lines.len() == QUOTE_MEMORY {
            self.lines.pop_front();
        }
        self.lines.push_back((id.to_string(), text.to_string()));
    }

    fn lookup(&self, id: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|(line_id, _)| line_id == id)
            .map(|(_, text)| text.as_str())
    }
}

/// State shared by the channel and its input and output tasks.
#[derive(Debug)]
struct Shared {
    meter: ChannelMeter,
    quotes: Mutex<QuoteBook>,
    input_closed: Notify,
}

impl Shared {
    /// Publish one line as a direct message. Returns `false` on quit.
    async fn publish_line(
        &self,
        inbound: &InboundHandle,
        user_id: &str,
        line: &str,
    ) -> ChannelResult<bool> {
        match CliInput::parse(line) {
            CliInput::Empty => Ok(true),
            CliInput::Quit => Ok(false),
            CliInput::Message(text) => {
                let msg = InboundMessage::direct(CLI_CHANNEL, user_id, text.as_str());
                self.quotes.lock().await.remember(&msg.id, &text);
                inbound.publish(msg).await?;
                self.meter.record_received().await;
                Ok(true)
            }
        }
    }

    /// Render `msg`, resolving its quote against recent input.
    async fn render(&self, msg: &OutboundMessage) -> String {
        let quotes = self.quotes.lock().await;
        let quoted = msg.quote.as_deref().and_then(|id| quotes.lookup(id));
        render(msg, quoted)
    }

    async fn deliver(&self, msg: &OutboundMessage, prompt: &str) {
        let text = format!("\n{}\n\n{prompt}", self.render(msg).await);
        match write_stdout(&text).await {
            Ok(()) => self.meter.record_delivery(msg).await,
            Err(e) => self.meter.record_error(e.to_string()).await,
        }
    }
}

async fn write_stdout(text: &str) -> ChannelResult<()> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(text.as_bytes())
        .await
        .map_err(|e| ChannelError::send(e.to_string()))?;
    stdout
        .flush()
        .await
        .map_err(|e| ChannelError::send(e.to_string()))
}

/// Stdin/stdout channel.
#[derive(Debug)]
pub struct CliChannel {
    shared: Arc<Shared>,
    config: CliChannelConfig,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl CliChannel {
    /// Create a terminal channel with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CliChannelConfig::default())
    }

    /// Create a terminal channel with `config`.
    #[must_use]
    pub fn with_config(config: CliChannelConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                meter: ChannelMeter::new(CLI_CHANNEL),
                quotes: Mutex::new(QuoteBook::default()),
                input_closed: Notify::new(),
            }),
            config,
            shutdown_tx: RwLock::new(None),
        }
    }

    /// Wait until the user quits or stdin closes.
    pub async fn input_closed(&self) {
        self.shared.input_closed.notified().await;
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        CLI_CHANNEL
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let mut outbound_rx = bus.subscribe_channel(CLI_CHANNEL).await;
        let shared = Arc::clone(&self.shared);
        let prompt = self.config.prompt.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => shared.deliver(&msg, &prompt).await,
                    _ = shutdown_rx.recv() => {
                        debug!("cli output task shutting down");
                        break;
                    }
                }
            }
        });

        let inbound = bus.inbound_handle();
        let shared = Arc::clone(&self.shared);
        let CliChannelConfig { prompt, user_id } = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = write_stdout(&prompt).await {
                shared.meter.record_error(e.to_string()).await;
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        shared.meter.record_error(e.to_string()).await;
                        break;
                    }
                };
                match shared.publish_line(&inbound, &user_id, &line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        shared.meter.record_error(e.to_string()).await;
                        break;
                    }
                }
            }
            debug!("cli input closed");
            shared.meter.set_state(ChannelState::InputClosed).await;
            shared.input_closed.notify_one();
        });

        self.shared.meter.set_state(ChannelState::Running).await;
        info!(user = %self.config.user_id, "cli channel started");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        self.shared.meter.set_state(ChannelState::Stopped).await;
        info!("cli channel stopped");
    }

    async fn status(&self) -> ChannelStatus {
        self.shared.meter.snapshot().await
    }
}

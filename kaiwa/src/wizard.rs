//! A two-step profile wizard.
//!
//! Sending `profile` opens a session that asks for a name and then an age,
//! stores the result in a shared [`ProfileStore`], and removes itself. The
//! session only listens to the user who opened it, in the place they opened
//! it. `cancel` abandons the wizard at any step; `profile` sent to a running
//! wizard starts it over instead of opening a second one.

use crate::dispatcher::SessionStarter;
use crate::error::{HandlerError, HandlerResult};
use crate::events::Origin;
use crate::message_event::MessageEvent;
use crate::session::{Session, SessionHandler, SessionRemover};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Text that opens a wizard.
pub const TRIGGER: &str = "profile";

/// Text that abandons a running wizard.
pub const CANCEL: &str = "cancel";

/// Label given to wizard sessions.
pub const LABEL: &str = "profile-wizard";

const NAME_QUESTION: &str = "What's your name?";

/// A completed profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: u8,
}

/// Completed profiles keyed by sender id.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Arc<RwLock<HashMap<String, Profile>>>,
}

impl ProfileStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile saved for `user_id`.
    pub async fn get(&self, user_id: &str) -> Option<Profile> {
        self.profiles.read().await.get(user_id).cloned()
    }

    /// Number of saved profiles.
    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    /// Whether nothing has been saved.
    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }

    async fn save(&self, user_id: &str, profile: Profile) {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), profile);
    }
}

type ConversationKey = (String, Origin);

/// Sender and origin pairs that have a wizard open.
#[derive(Debug, Clone, Default)]
struct OpenWizards {
    keys: Arc<std::sync::Mutex<HashSet<ConversationKey>>>,
}

impl OpenWizards {
    /// Claim `user_id` in `origin`, or `None` if a wizard is already open.
    fn claim(&self, user_id: &str, origin: &Origin) -> Option<Claim> {
        let key = (user_id.to_string(), origin.clone());
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.insert(key.clone()).then(|| Claim {
            key,
            keys: Arc::clone(&self.keys),
        })
    }
}

/// Held by a wizard for as long as its session exists.
#[derive(Debug)]
struct Claim {
    key: ConversationKey,
    keys: Arc<std::sync::Mutex<HashSet<ConversationKey>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[derive(Debug)]
enum Step {
    Name,
    Age { name: String },
}

/// Session handler driving one user through the wizard.
#[derive(Debug)]
pub struct ProfileWizard {
    user_id: String,
    origin: Origin,
    step: Step,
    store: ProfileStore,
    claim: Option<Claim>,
}

impl ProfileWizard {
    /// Start a wizard for `user_id` talking in `origin`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, origin: Origin, store: ProfileStore) -> Self {
        Self {
            user_id: user_id.into(),
            origin,
            step: Step::Name,
            store,
            claim: None,
        }
    }

    fn holding(mut self, claim: Claim) -> Self {
        self.claim = Some(claim);
        self
    }

    fn is_mine(&self, event: &MessageEvent) -> bool {
        event.sender_id() == self.user_id && *event.origin() == self.origin
    }

    fn parse_age(text: &str) -> HandlerResult<u8> {
        match text.parse::<u8>() {
            Ok(age) if (1..=150).contains(&age) => Ok(age),
            _ => Err(HandlerError::invalid_input(format!(
                "\"{text}\" is not an age"
            ))),
        }
    }
}

#[async_trait]
impl SessionHandler for ProfileWizard {
    async fn handle(
        &mut self,
        event: &MessageEvent,
        remover: &SessionRemover,
    ) -> HandlerResult<()> {
        if !self.is_mine(event) {
            return Ok(());
        }

        let text = event.plain_text();
        let text = text.trim();

        if text == CANCEL {
            remover.remove().await;
            event.reply("Profile setup cancelled.").await?;
            return Ok(());
        }
        if text == TRIGGER {
            debug!(user = %self.user_id, "profile wizard restarted");
            self.step = Step::Name;
            event.reply(NAME_QUESTION).await?;
            return Ok(());
        }

        match &self.step {
            Step::Name => {
                if text.is_empty() {
                    return Err(HandlerError::invalid_input("name must not be empty"));
                }
                event.reply(format!("How old are you, {text}?")).await?;
                self.step = Step::Age {
                    name: text.to_string(),
                };
            }
            Step::Age { name } => {
                let age = Self::parse_age(text)?;
                let profile = Profile {
                    name: name.clone(),
                    age,
                };
                self.store.save(&self.user_id, profile).await;
                remover.remove().await;
                info!(user = %self.user_id, session = %remover.session_id(), "profile saved");
                event
                    .quote_reply(format!("Saved: {name}, {age}."))
                    .await?;
            }
        }

        Ok(())
    }
}

/// Opens a [`ProfileWizard`] when someone sends [`TRIGGER`].
///
/// At most one wizard is open per sender and origin; the running wizard
/// handles a repeated trigger itself.
#[derive(Debug, Clone, Default)]
pub struct ProfileWizardStarter {
    store: ProfileStore,
    open: OpenWizards,
}

impl ProfileWizardStarter {
    /// Create a starter saving into `store`.
    #[must_use]
    pub fn new(store: ProfileStore) -> Self {
        Self {
            store,
            open: OpenWizards::default(),
        }
    }

    /// The store wizards save into.
    #[must_use]
    pub const fn store(&self) -> &ProfileStore {
        &self.store
    }
}

#[async_trait]
impl SessionStarter for ProfileWizardStarter {
    fn name(&self) -> &str {
        LABEL
    }

    async fn start(&self, event: &MessageEvent) -> HandlerResult<Option<Session>> {
        if event.plain_text().trim() != TRIGGER {
            return Ok(None);
        }
        let Some(claim) = self.open.claim(event.sender_id(), event.origin()) else {
            return Ok(None);
        };
        debug!(user = %event.sender_id(), origin = %event.origin(), "opening profile wizard");

        event.reply(NAME_QUESTION).await?;
        let wizard = ProfileWizard::new(
            event.sender_id(),
            event.origin().clone(),
            self.store.clone(),
        )
        .holding(claim);
        Ok(Some(Session::new(wizard).labeled(LABEL)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::dispatcher::Dispatcher;
    use crate::events::{InboundMessage, OutboundMessage};
    use crate::session::SessionRegistry;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Harness {
        dispatcher: Dispatcher,
        store: ProfileStore,
        rx: broadcast::Receiver<OutboundMessage>,
    }

    impl Harness {
        fn new() -> Self {
            let bus = MessageBus::new();
            let rx = bus.subscribe_outbound();
            let store = ProfileStore::new();
            let dispatcher = Dispatcher::new(bus, SessionRegistry::new())
                .with_starter(ProfileWizardStarter::new(store.clone()));
            Self {
                dispatcher,
                store,
                rx,
            }
        }

        async fn say(&mut self, from: &str, text: &str) -> Vec<String> {
            self.dispatcher
                .process(InboundMessage::direct("test", from, text))
                .await;
            let mut replies = Vec::new();
            while let Ok(Ok(out)) =
                tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await
            {
                replies.push(out.content);
            }
            replies
        }
    }

    #[tokio::test]
    async fn test_wizard_completes_and_removes_itself() {
        let mut h = Harness::new();

        assert_eq!(h.say("alice", "profile").await, vec!["What's your name?"]);
        assert_eq!(h.say("alice", "Alice").await, vec!["How old are you, Alice?"]);
        assert_eq!(h.say("alice", "30").await, vec!["Saved: Alice, 30."]);

        assert!(h.dispatcher.registry().is_empty().await);
        assert_eq!(
            h.store.get("alice").await,
            Some(Profile {
                name: "Alice".to_string(),
                age: 30,
            })
        );
        assert!(h.say("alice", "31").await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_age_is_reported_and_retried() {
        let mut h = Harness::new();
        h.say("alice", "profile").await;
        h.say("alice", "Alice").await;

        assert_eq!(
            h.say("alice", "old").await,
            vec!["ERROR: invalid input: \"old\" is not an age"]
        );
        assert_eq!(h.dispatcher.registry().len().await, 1);

        assert_eq!(h.say("alice", "42").await, vec!["Saved: Alice, 42."]);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_other_users_are_ignored() {
        let mut h = Harness::new();
        h.say("alice", "profile").await;

        assert!(h.say("bob", "Bob").await.is_empty());
        assert_eq!(h.say("alice", "Alice").await, vec!["How old are you, Alice?"]);
    }

    #[tokio::test]
    async fn test_cancel() {
        let mut h = Harness::new();
        h.say("alice", "profile").await;

        assert_eq!(h.say("alice", "cancel").await, vec!["Profile setup cancelled."]);
        assert!(h.dispatcher.registry().is_empty().await);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_trigger_restarts_the_open_wizard() {
        let mut h = Harness::new();
        h.say("alice", "profile").await;

        assert_eq!(h.say("alice", "profile").await, vec!["What's your name?"]);
        assert_eq!(h.dispatcher.registry().len().await, 1);

        h.say("alice", "Alice").await;
        assert_eq!(h.say("alice", "profile").await, vec!["What's your name?"]);
        assert_eq!(h.say("alice", "Al").await, vec!["How old are you, Al?"]);
        assert_eq!(h.say("alice", "30").await, vec!["Saved: Al, 30."]);
        assert!(h.dispatcher.registry().is_empty().await);

        assert_eq!(h.say("alice", "profile").await, vec!["What's your name?"]);
        assert_eq!(h.dispatcher.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_wizards_are_per_sender() {
        let mut h = Harness::new();
        h.say("alice", "profile").await;
        h.say("bob", "profile").await;
        assert_eq!(h.dispatcher.registry().len().await, 2);

        h.say("alice", "cancel").await;
        assert_eq!(h.dispatcher.registry().len().await, 1);
        assert_eq!(h.say("alice", "profile").await, vec!["What's your name?"]);
        assert_eq!(h.dispatcher.registry().len().await, 2);
    }

    #[test]
    fn test_parse_age_bounds() {
        assert_eq!(ProfileWizard::parse_age("1").unwrap(), 1);
        assert!(ProfileWizard::parse_age("0").is_err());
        assert!(ProfileWizard::parse_age("151").is_err());
        assert!(ProfileWizard::parse_age("-3").is_err());
    }
}

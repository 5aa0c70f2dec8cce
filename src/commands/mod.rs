//! Host command surface
//!
//! The host application implements its pet, appointment, expense and health
//! features behind [`CommandHandler`]s registered in a [`CommandRegistry`].
//! The [`CommandDispatcher`] is the only caller and only accepts a
//! [`ConfirmedIntent`].

mod dispatcher;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use dispatcher::{CommandDispatcher, DEFAULT_DISPATCH_TIMEOUT};
pub use registry::CommandRegistry;

use crate::Result;
use crate::dialog::{CommandResult, Entity, Intent, IntentAction, IntentId};

/// Closed set of host areas a command can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTarget {
    Pets,
    Appointments,
    Expenses,
    Health,
    Reminders,
    Feed,
    Settings,
    Dashboard,
    Conversation,
    General,
}

impl CommandTarget {
    /// Every target, in display order
    pub const ALL: [Self; 10] = [
        Self::Pets,
        Self::Appointments,
        Self::Expenses,
        Self::Health,
        Self::Reminders,
        Self::Feed,
        Self::Settings,
        Self::Dashboard,
        Self::Conversation,
        Self::General,
    ];

    /// Stable lowercase name, also used as the intent target string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pets => "pets",
            Self::Appointments => "appointments",
            Self::Expenses => "expenses",
            Self::Health => "health",
            Self::Reminders => "reminders",
            Self::Feed => "feed",
            Self::Settings => "settings",
            Self::Dashboard => "dashboard",
            Self::Conversation => "conversation",
            Self::General => "general",
        }
    }

    /// Parse a target name, accepting singular forms and a few synonyms
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let target = match name.trim().to_lowercase().as_str() {
            "pets" | "pet" | "animals" => Self::Pets,
            "appointments" | "appointment" | "calendar" | "vet" => Self::Appointments,
            "expenses" | "expense" | "spending" => Self::Expenses,
            "health" | "medical" | "medications" | "medication" => Self::Health,
            "reminders" | "reminder" => Self::Reminders,
            "feed" | "feeding" | "food" => Self::Feed,
            "settings" | "preferences" => Self::Settings,
            "dashboard" | "home" => Self::Dashboard,
            "conversation" => Self::Conversation,
            "general" | "" => Self::General,
            _ => return None,
        };
        Some(target)
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration key for a host command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey {
    pub action: IntentAction,
    pub target: CommandTarget,
}

impl CommandKey {
    #[must_use]
    pub const fn new(action: IntentAction, target: CommandTarget) -> Self {
        Self { action, target }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.target)
    }
}

/// What a host handler receives
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub intent_id: IntentId,
    pub action: IntentAction,
    pub target: CommandTarget,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub entities: Vec<Entity>,
    pub transcript: String,
}

impl CommandRequest {
    fn from_intent(intent: &Intent, target: CommandTarget) -> Self {
        Self {
            intent_id: intent.id(),
            action: intent.action(),
            target,
            parameters: intent.parameters().clone(),
            entities: intent.entities().to_vec(),
            transcript: intent.transcript().to_string(),
        }
    }

    /// String parameter by name
    #[must_use]
    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(serde_json::Value::as_str)
    }
}

/// A host command implementation
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command
    ///
    /// # Errors
    ///
    /// Any error is reported to the user as a failed result
    async fn execute(&self, request: CommandRequest) -> Result<CommandResult>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandResult>> + Send,
{
    async fn execute(&self, request: CommandRequest) -> Result<CommandResult> {
        (self.0)(request).await
    }
}

/// Wrap an async closure as a [`CommandHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CommandResult>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// How an intent was cleared for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    /// Confident and unambiguous on its own
    Automatic,
    /// The user affirmed a confirmation prompt
    UserConfirmed,
}

/// An intent that is allowed to reach the dispatcher
///
/// Construction is the only gate: low-confidence intents need the user's
/// explicit confirmation and ambiguous intents are never accepted.
#[derive(Debug, Clone)]
pub struct ConfirmedIntent {
    intent: Intent,
    clearance: Clearance,
}

impl ConfirmedIntent {
    /// Clear an intent that needs no confirmation
    ///
    /// # Errors
    ///
    /// Hands the intent back if it needs confirmation or clarification
    pub fn auto(intent: Intent) -> std::result::Result<Self, Intent> {
        if intent.requires_confirmation() || intent.is_ambiguous() {
            return Err(intent);
        }
        Ok(Self {
            intent,
            clearance: Clearance::Automatic,
        })
    }

    /// Clear an intent the user explicitly affirmed
    ///
    /// # Errors
    ///
    /// Hands the intent back if it still carries ambiguities
    pub fn user_confirmed(intent: Intent) -> std::result::Result<Self, Intent> {
        if intent.is_ambiguous() {
            return Err(intent);
        }
        Ok(Self {
            intent,
            clearance: Clearance::UserConfirmed,
        })
    }

    #[must_use]
    pub const fn intent(&self) -> &Intent {
        &self.intent
    }

    #[must_use]
    pub const fn clearance(&self) -> Clearance {
        self.clearance
    }

    #[must_use]
    pub fn into_intent(self) -> Intent {
        self.intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::{Ambiguity, EntityKind, EntityRef};

    #[test]
    fn target_names_round_trip() {
        for target in CommandTarget::ALL {
            assert_eq!(CommandTarget::from_name(target.as_str()), Some(target));
        }
        assert_eq!(CommandTarget::from_name("Pet"), Some(CommandTarget::Pets));
        assert_eq!(CommandTarget::from_name("spaceship"), None);
    }

    #[test]
    fn auto_clearance_rejects_low_confidence() {
        let intent = Intent::builder(IntentAction::Show, "pets", "show me my pets")
            .confidence(0.75)
            .build();

        let rejected = ConfirmedIntent::auto(intent).unwrap_err();
        let confirmed = ConfirmedIntent::user_confirmed(rejected).unwrap();
        assert_eq!(confirmed.clearance(), Clearance::UserConfirmed);
    }

    #[test]
    fn auto_clearance_accepts_threshold() {
        let intent = Intent::builder(IntentAction::Show, "pets", "show me my pets")
            .confidence(0.80)
            .build();
        assert!(ConfirmedIntent::auto(intent).is_ok());
    }

    #[test]
    fn ambiguous_intent_is_never_cleared() {
        let intent = Intent::builder(IntentAction::Show, "health", "how is my dog")
            .confidence(0.95)
            .ambiguity(Ambiguity {
                kind: EntityKind::Pet,
                mention: "my dog".into(),
                candidates: vec![EntityRef::pet("1", "Rex"), EntityRef::pet("2", "Bella")],
            })
            .build();

        let intent = ConfirmedIntent::auto(intent).unwrap_err();
        assert!(ConfirmedIntent::user_confirmed(intent).is_err());
    }
}

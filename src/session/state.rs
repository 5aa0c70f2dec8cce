//! Session state machine vocabulary and intent gating

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commands::ConfirmedIntent;
use crate::dialog::{EntityRef, Intent, IntentAction};

/// Where the current turn is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
    /// A low-confidence intent waits for yes or no
    AwaitingConfirmation,
    /// An ambiguous intent waits for a choice
    AwaitingClarification,
}

impl DialogState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::AwaitingClarification => "awaiting_clarification",
        }
    }

    /// Waiting on the user to answer a prompt
    #[must_use]
    pub const fn is_awaiting(self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::AwaitingClarification)
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the avatar shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

/// Hands-free activation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandsFreeMode {
    #[default]
    Disabled,
    /// Monitoring for the wake phrase
    Armed,
    /// A wake-triggered turn is in flight
    Active,
}

impl HandsFreeMode {
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationAnswer {
    Affirm,
    Deny,
}

impl From<bool> for ConfirmationAnswer {
    fn from(yes: bool) -> Self {
        if yes { Self::Affirm } else { Self::Deny }
    }
}

/// A turn parked until the user answers
#[derive(Debug, Clone)]
pub enum PendingTurn {
    Confirmation(Intent),
    Clarification(Intent),
}

impl PendingTurn {
    #[must_use]
    pub const fn intent(&self) -> &Intent {
        match self {
            Self::Confirmation(intent) | Self::Clarification(intent) => intent,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DialogState {
        match self {
            Self::Confirmation(_) => DialogState::AwaitingConfirmation,
            Self::Clarification(_) => DialogState::AwaitingClarification,
        }
    }

    /// Candidates offered by a clarification prompt
    #[must_use]
    pub fn candidates(&self) -> &[EntityRef] {
        match self {
            Self::Clarification(intent) => intent
                .ambiguities()
                .first()
                .map(|a| a.candidates.as_slice())
                .unwrap_or_default(),
            Self::Confirmation(_) => &[],
        }
    }
}

/// Where a parsed intent goes next
#[derive(Debug)]
pub enum Gate {
    /// Confident and unambiguous
    Dispatch(ConfirmedIntent),
    /// Needs a yes or no first
    Confirm(Intent),
    /// Needs a choice, or a rephrase when nothing was understood
    Clarify(Intent),
    /// Reset the conversation without involving the host
    ClearConversation,
}

/// Route an intent
///
/// Unrecognized and ambiguous intents are clarified, low-confidence intents
/// are confirmed, and only the rest reach the dispatcher.
#[must_use]
pub fn gate(intent: Intent) -> Gate {
    if intent.action() == IntentAction::Unknown || intent.is_ambiguous() {
        return Gate::Clarify(intent);
    }
    if intent.requires_confirmation() {
        return Gate::Confirm(intent);
    }
    if intent.action() == IntentAction::ClearConversation {
        return Gate::ClearConversation;
    }
    match ConfirmedIntent::auto(intent) {
        Ok(confirmed) => Gate::Dispatch(confirmed),
        Err(intent) => Gate::Confirm(intent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::{Ambiguity, EntityKind};

    fn intent(action: IntentAction, confidence: f32) -> Intent {
        Intent::builder(action, "pets", "show me my pets")
            .confidence(confidence)
            .build()
    }

    #[test]
    fn confident_intent_dispatches() {
        assert!(matches!(gate(intent(IntentAction::Show, 0.80)), Gate::Dispatch(_)));
        assert!(matches!(gate(intent(IntentAction::Show, 0.95)), Gate::Dispatch(_)));
    }

    #[test]
    fn low_confidence_intent_needs_confirmation() {
        assert!(matches!(gate(intent(IntentAction::Show, 0.79)), Gate::Confirm(_)));
        assert!(matches!(gate(intent(IntentAction::Show, 0.75)), Gate::Confirm(_)));
    }

    #[test]
    fn unknown_and_ambiguous_are_clarified() {
        assert!(matches!(gate(intent(IntentAction::Unknown, 0.9)), Gate::Clarify(_)));

        let ambiguous = Intent::builder(IntentAction::Show, "pets", "show my pet")
            .confidence(0.95)
            .ambiguity(Ambiguity {
                kind: EntityKind::Pet,
                mention: "my pet".to_string(),
                candidates: vec![EntityRef::pet("1", "Rex"), EntityRef::pet("2", "Bella")],
            })
            .build();
        assert!(matches!(gate(ambiguous), Gate::Clarify(_)));
    }

    #[test]
    fn clearing_is_confirmed_when_unsure() {
        assert!(matches!(
            gate(intent(IntentAction::ClearConversation, 0.9)),
            Gate::ClearConversation
        ));
        assert!(matches!(
            gate(intent(IntentAction::ClearConversation, 0.5)),
            Gate::Confirm(_)
        ));
    }

    #[test]
    fn pending_clarification_exposes_candidates() {
        let ambiguous = Intent::builder(IntentAction::Show, "pets", "show my pet")
            .confidence(0.95)
            .ambiguity(Ambiguity {
                kind: EntityKind::Pet,
                mention: "my pet".to_string(),
                candidates: vec![EntityRef::pet("1", "Rex"), EntityRef::pet("2", "Bella")],
            })
            .build();
        let pending = PendingTurn::Clarification(ambiguous);

        assert_eq!(pending.state(), DialogState::AwaitingClarification);
        assert_eq!(pending.candidates().len(), 2);
    }
}

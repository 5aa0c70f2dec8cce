//! Response composition
//!
//! Every function here is pure and total: it always returns a [`Response`]
//! and never touches session state.

use std::time::Duration;

use serde_json::json;

use super::context::DialogContext;
use super::types::{Ambiguity, CommandResult, EntityKind, Intent, Priority, Response};
use crate::Error;

/// Spoken response for a dispatched command
#[must_use]
pub fn compose_response(result: &CommandResult, context: &DialogContext) -> Response {
    if !result.success {
        let cause = result.message.trim();
        let text = if cause.is_empty() {
            "Sorry, I couldn't do that.".to_string()
        } else {
            format!("Sorry, I couldn't do that. {}", sentence(cause))
        };
        return Response {
            visual_data: non_null(&result.data),
            ..Response::spoken(text, Priority::High)
        };
    }

    let mut text = if result.message.trim().is_empty() {
        context
            .active_pet()
            .map_or_else(|| "Done.".to_string(), |pet| format!("Done for {}.", pet.name))
    } else {
        sentence(result.message.trim())
    };

    if let Some(prompt) = result
        .follow_up_prompt
        .as_deref()
        .filter(|_| result.requires_follow_up)
    {
        text.push(' ');
        text.push_str(prompt.trim());
    }

    Response {
        visual_data: non_null(&result.data),
        ..Response::spoken(text, Priority::Normal)
    }
}

/// Spoken apology or explanation for an error
#[must_use]
pub fn compose_error_response(error: &Error, context: &DialogContext) -> Response {
    let fallback = format!(
        "You can keep using the {} screen without voice.",
        context.current_page
    );

    let (text, priority) = match error {
        Error::DeviceUnavailable(_) => (
            format!("I can't access the microphone right now. {fallback}"),
            Priority::High,
        ),
        Error::PermissionDenied(_) => (
            format!("Voice control isn't available right now. {fallback}"),
            Priority::High,
        ),
        Error::Recognition(_) => (
            "Sorry, I didn't catch that. Please try again.".to_string(),
            Priority::Normal,
        ),
        Error::Parse(_) => (
            "Sorry, I didn't understand that. Could you say it another way?".to_string(),
            Priority::Normal,
        ),
        Error::Dispatch(cause) => (
            format!("Sorry, something went wrong. {}", sentence(cause)),
            Priority::High,
        ),
        Error::Synthesis(_) | Error::Audio(_) => (
            "I couldn't play my answer out loud, but it's on screen.".to_string(),
            Priority::Normal,
        ),
        Error::Cancelled => ("Okay, cancelled.".to_string(), Priority::Low),
        _ => (
            "Sorry, something went wrong. Please try again.".to_string(),
            Priority::High,
        ),
    };

    Response {
        display_text: format!("{text} ({error})"),
        ..Response::spoken(text, priority)
    }
}

/// Ask the user to confirm a low-confidence recognition
///
/// Echoes the literal recognized text so transcription mistakes are audible.
#[must_use]
pub fn compose_confirmation(intent: &Intent) -> Response {
    let heard = intent.transcript().trim();
    let confidence = intent.confidence();

    Response {
        text: format!("I heard '{heard}'. Is that correct?"),
        display_text: format!("I heard \"{heard}\" ({confidence} confident). Is that correct?"),
        visual_data: Some(json!({
            "kind": "confirmation",
            "transcript": heard,
            "confidence": confidence.percent(),
            "action": intent.action().as_str(),
            "target": intent.target(),
        })),
        audio_url: None,
        priority: intent.priority().max(Priority::Normal),
    }
}

/// Ask the user to settle an ambiguity or rephrase
#[must_use]
pub fn compose_clarification(intent: &Intent) -> Response {
    let Some(ambiguity) = intent.ambiguities().first() else {
        let heard = intent.transcript().trim();
        let text = if heard.is_empty() {
            "Sorry, I didn't understand that. Could you say it another way?".to_string()
        } else {
            format!("I'm not sure what you meant by '{heard}'. Could you say it another way?")
        };
        return Response {
            visual_data: Some(json!({ "kind": "rephrase", "transcript": heard })),
            ..Response::spoken(text, Priority::Normal)
        };
    };

    let names: Vec<&str> = ambiguity.candidates.iter().map(|c| c.name.as_str()).collect();
    let text = format!(
        "Which {} do you mean: {}?",
        noun(ambiguity.kind),
        join_alternatives(&names)
    );

    Response {
        visual_data: Some(json!({
            "kind": "clarification",
            "mention": ambiguity.mention,
            "candidates": candidates_json(ambiguity),
        })),
        ..Response::spoken(text, Priority::Normal)
    }
}

/// Response when the user declines a confirmation
#[must_use]
pub fn compose_declined(intent: &Intent) -> Response {
    let display = format!("Cancelled \"{}\".", intent.transcript().trim());
    Response {
        display_text: display,
        ..Response::spoken("Okay, I won't do that.", Priority::Low)
    }
}

/// Response after the conversation has been reset
#[must_use]
pub fn compose_conversation_cleared() -> Response {
    Response::spoken("Okay, let's start over.", Priority::Low)
}

/// Prompt raised after a long stretch of inactivity in hands-free mode
#[must_use]
pub fn compose_inactivity_prompt(auto_disable_after: Duration) -> Response {
    let secs = auto_disable_after.as_secs();
    Response {
        visual_data: Some(json!({ "kind": "inactivity", "timeout_secs": secs })),
        ..Response::spoken(
            format!(
                "Are you still there? Hands-free mode will turn off in {secs} seconds unless you keep it on."
            ),
            Priority::High,
        )
    }
}

/// Response for voice entry points while voice is not permitted
#[must_use]
pub fn compose_voice_unavailable(reason: &str) -> Response {
    Response {
        display_text: format!(
            "Voice control is unavailable ({reason}). Everything else in the app still works."
        ),
        ..Response::spoken(
            "Voice control isn't available right now. Everything else in the app still works.",
            Priority::High,
        )
    }
}

fn noun(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Pet | EntityKind::Species => "pet",
        EntityKind::Appointment => "appointment",
        EntityKind::Expense | EntityKind::Amount => "expense",
        EntityKind::Medication => "medication",
        EntityKind::Date => "day",
        EntityKind::Time => "time",
        EntityKind::Page => "screen",
    }
}

fn candidates_json(ambiguity: &Ambiguity) -> serde_json::Value {
    ambiguity
        .candidates
        .iter()
        .map(|c| json!({ "id": c.id, "name": c.name }))
        .collect()
}

/// "Rex", "Rex or Bella", "Rex, Bella, or Max"
fn join_alternatives(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => (*only).to_string(),
        [first, second] => format!("{first} or {second}"),
        [rest @ .., last] => format!("{}, or {last}", rest.join(", ")),
    }
}

fn sentence(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

fn non_null(data: &serde_json::Value) -> Option<serde_json::Value> {
    (!data.is_null()).then(|| data.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::types::{EntityRef, IntentAction};

    #[test]
    fn confirmation_echoes_literal_text() {
        let intent = Intent::builder(IntentAction::Show, "pets", "show me my pets")
            .confidence(0.75)
            .build();

        let response = compose_confirmation(&intent);

        assert_eq!(response.text, "I heard 'show me my pets'. Is that correct?");
        assert!(response.display_text.contains("75%"));
        assert_eq!(response.visual_data.unwrap()["confidence"], 75);
    }

    #[test]
    fn confirmation_never_displays_threshold_for_low_score() {
        let intent = Intent::builder(IntentAction::Show, "pets", "show me my pets")
            .confidence(0.799)
            .build();
        assert!(compose_confirmation(&intent).display_text.contains("79%"));
    }

    #[test]
    fn clarification_lists_candidates() {
        let intent = Intent::builder(IntentAction::Show, "health", "how is my dog")
            .ambiguity(Ambiguity {
                kind: EntityKind::Pet,
                mention: "my dog".into(),
                candidates: vec![
                    EntityRef::pet("1", "Rex"),
                    EntityRef::pet("2", "Bella"),
                    EntityRef::pet("3", "Max"),
                ],
            })
            .build();

        let response = compose_clarification(&intent);
        assert_eq!(response.text, "Which pet do you mean: Rex, Bella, or Max?");
    }

    #[test]
    fn clarification_without_ambiguity_asks_to_rephrase() {
        let response = compose_clarification(&Intent::unrecognized("blorp"));
        assert!(response.text.contains("'blorp'"));
    }

    #[test]
    fn success_appends_follow_up() {
        let result = CommandResult::ok("Appointment booked for Rex")
            .with_follow_up("Would you like a reminder?");
        let response = compose_response(&result, &DialogContext::default());
        assert_eq!(
            response.text,
            "Appointment booked for Rex. Would you like a reminder?"
        );
    }

    #[test]
    fn empty_success_mentions_active_pet() {
        let context = DialogContext {
            active_subject: Some(EntityRef::pet("1", "Rex")),
            ..DialogContext::default()
        };
        let response = compose_response(&CommandResult::ok(""), &context);
        assert_eq!(response.text, "Done for Rex.");
    }

    #[test]
    fn failure_is_spoken_with_cause() {
        let response = compose_response(
            &CommandResult::failure("the vet is closed"),
            &DialogContext::default(),
        );
        assert_eq!(response.text, "Sorry, I couldn't do that. the vet is closed.");
        assert_eq!(response.priority, Priority::High);
    }

    #[test]
    fn error_responses_are_total() {
        let context = DialogContext::default();
        let errors = [
            Error::DeviceUnavailable("no mic".into()),
            Error::PermissionDenied("denied".into()),
            Error::Recognition("network".into()),
            Error::Parse("??".into()),
            Error::Dispatch("host".into()),
            Error::Synthesis("tts".into()),
            Error::Cancelled,
            Error::Config("bad".into()),
        ];
        for error in &errors {
            assert!(!compose_error_response(error, &context).text.is_empty());
        }
    }

    #[test]
    fn join_alternatives_formats() {
        assert_eq!(join_alternatives(&["Rex"]), "Rex");
        assert_eq!(join_alternatives(&["Rex", "Bella"]), "Rex or Bella");
    }
}

//! Dialog data model
//!
//! Transcripts, intents, entities, command results and responses. Intents are
//! built through [`IntentBuilder`] so the confirmation flag always agrees with
//! the confidence score.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Confidence below this value requires an explicit user confirmation
pub const CONFIRMATION_THRESHOLD: f32 = 0.80;

/// A score in `[0, 1]`
///
/// Out-of-range and NaN inputs are clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Confidence(f32);

impl Confidence {
    /// Full confidence
    pub const CERTAIN: Self = Self(1.0);

    /// No confidence
    pub const NONE: Self = Self(0.0);

    /// Create a confidence score, clamping into `[0, 1]`
    #[must_use]
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Raw score
    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    /// Strictly below [`CONFIRMATION_THRESHOLD`]
    #[must_use]
    pub fn is_low(self) -> bool {
        self.0 < CONFIRMATION_THRESHOLD
    }

    /// Whole percentage for display, rounded down
    ///
    /// A low score never displays as the threshold percentage itself, so
    /// 0.799 shows as 79% while 0.80 shows as 80%.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(self) -> u8 {
        let floored = (f64::from(self.0) * 100.0 + 1e-5).floor().clamp(0.0, 100.0) as u8;
        if self.is_low() {
            floored.min(threshold_percent() - 1)
        } else {
            floored
        }
    }

    /// Lower of two scores
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn threshold_percent() -> u8 {
    (f64::from(CONFIRMATION_THRESHOLD) * 100.0).round() as u8
}

impl From<f32> for Confidence {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<Confidence> for f32 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Output of the speech capture engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Recognized text
    pub text: String,
    /// Backend confidence; interim transcripts carry none
    pub confidence: Confidence,
    /// Only final transcripts advance the turn
    pub is_final: bool,
}

impl Transcript {
    /// Final transcript with its confidence
    #[must_use]
    pub fn final_result(text: impl Into<String>, confidence: impl Into<Confidence>) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.into(),
            is_final: true,
        }
    }

    /// Display-only partial transcript
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: Confidence::NONE,
            is_final: false,
        }
    }
}

/// What the user wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    /// Go to an application screen
    Navigate,
    /// Display records
    Show,
    /// Create a record
    Create,
    /// Modify a record
    Update,
    /// Remove a record
    Delete,
    /// Book something for a date/time
    Schedule,
    /// Cancel a booking
    Cancel,
    /// Record an event (expense, medication, walk)
    Log,
    /// Set a reminder
    Remind,
    /// List what can be said
    Help,
    /// Reset the conversation context
    ClearConversation,
    /// Nothing recognizable
    Unknown,
}

impl IntentAction {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Show => "show",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Schedule => "schedule",
            Self::Cancel => "cancel",
            Self::Log => "log",
            Self::Remind => "remind",
            Self::Help => "help",
            Self::ClearConversation => "clear_conversation",
            Self::Unknown => "unknown",
        }
    }

    /// Verb used when talking about the action
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Navigate => "open",
            Self::Show => "show",
            Self::Create => "add",
            Self::Update => "update",
            Self::Delete => "remove",
            Self::Schedule => "schedule",
            Self::Cancel => "cancel",
            Self::Log => "log",
            Self::Remind => "set a reminder for",
            Self::Help => "help with",
            Self::ClearConversation => "clear",
            Self::Unknown => "do",
        }
    }
}

impl fmt::Display for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of an intent or response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Informational
    Low,
    /// Regular request
    #[default]
    Normal,
    /// Needs attention (health, cancellations, errors)
    High,
}

/// Kind of thing an entity refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pet,
    Appointment,
    Expense,
    Medication,
    Date,
    Time,
    Amount,
    Species,
    Page,
}

impl EntityKind {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pet => "pet",
            Self::Appointment => "appointment",
            Self::Expense => "expense",
            Self::Medication => "medication",
            Self::Date => "date",
            Self::Time => "time",
            Self::Amount => "amount",
            Self::Species => "species",
            Self::Page => "page",
        }
    }
}

/// Reference to a concrete host record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Record kind
    pub kind: EntityKind,
    /// Host identifier
    pub id: String,
    /// Spoken name
    pub name: String,
}

impl EntityRef {
    /// Reference to a pet record
    #[must_use]
    pub fn pet(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Pet,
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A value extracted from the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// What was extracted
    pub kind: EntityKind,
    /// Surface text or normalized value
    pub value: String,
    /// Resolved host record, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<EntityRef>,
}

impl Entity {
    /// Unresolved entity
    #[must_use]
    pub fn new(kind: EntityKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            reference: None,
        }
    }

    /// Entity resolved to a host record
    #[must_use]
    pub fn resolved(reference: EntityRef) -> Self {
        Self {
            kind: reference.kind,
            value: reference.name.clone(),
            reference: Some(reference),
        }
    }
}

/// An entity mention with more than one plausible referent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiguity {
    /// Kind of the unresolved mention
    pub kind: EntityKind,
    /// What the user said
    pub mention: String,
    /// Records it could refer to
    pub candidates: Vec<EntityRef>,
}

/// Unique intent identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(Uuid);

impl IntentId {
    /// Fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Structured interpretation of one utterance
///
/// Immutable once built; resolving an ambiguity produces a new intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    id: IntentId,
    action: IntentAction,
    target: String,
    parameters: BTreeMap<String, serde_json::Value>,
    confidence: Confidence,
    requires_confirmation: bool,
    priority: Priority,
    entities: Vec<Entity>,
    ambiguities: Vec<Ambiguity>,
    transcript: String,
    created_at: DateTime<Utc>,
}

impl Intent {
    /// Start building an intent for `action` on `target`
    #[must_use]
    pub fn builder(
        action: IntentAction,
        target: impl Into<String>,
        transcript: impl Into<String>,
    ) -> IntentBuilder {
        IntentBuilder {
            action,
            target: target.into(),
            transcript: transcript.into(),
            parameters: BTreeMap::new(),
            confidence: Confidence::CERTAIN,
            force_confirmation: false,
            priority: Priority::Normal,
            entities: Vec::new(),
            ambiguities: Vec::new(),
        }
    }

    /// Intent for a transcript nothing matched
    #[must_use]
    pub fn unrecognized(transcript: impl Into<String>) -> Self {
        Self::builder(IntentAction::Unknown, "", transcript)
            .confidence(Confidence::NONE)
            .build()
    }

    /// Copy of this intent with an ambiguity settled in favour of `choice`
    ///
    /// The copy gets a new id, keeps the confidence, and drops every
    /// ambiguity of the chosen kind.
    #[must_use]
    pub fn resolve(&self, choice: &EntityRef) -> Self {
        let mut builder = Self::builder(self.action, self.target.clone(), self.transcript.clone())
            .confidence(self.confidence)
            .priority(self.priority);
        builder.parameters = self.parameters.clone();
        builder.force_confirmation = self.requires_confirmation && !self.confidence.is_low();
        builder.entities = self
            .entities
            .iter()
            .filter(|e| e.kind != choice.kind)
            .cloned()
            .collect();
        builder.ambiguities = self
            .ambiguities
            .iter()
            .filter(|a| a.kind != choice.kind)
            .cloned()
            .collect();

        builder
            .parameter(
                format!("{}_id", choice.kind.as_str()),
                serde_json::Value::String(choice.id.clone()),
            )
            .parameter(
                choice.kind.as_str(),
                serde_json::Value::String(choice.name.clone()),
            )
            .entity(Entity::resolved(choice.clone()))
            .build()
    }

    #[must_use]
    pub const fn id(&self) -> IntentId {
        self.id
    }

    #[must_use]
    pub const fn action(&self) -> IntentAction {
        self.action
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub const fn parameters(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.parameters
    }

    /// String parameter by name
    #[must_use]
    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub const fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// True whenever the confidence is below the threshold
    #[must_use]
    pub const fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn ambiguities(&self) -> &[Ambiguity] {
        &self.ambiguities
    }

    /// Whether a clarification turn is needed before dispatch
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        !self.ambiguities.is_empty()
    }

    /// The literal recognized text this intent came from
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// First resolved reference of the given kind
    #[must_use]
    pub fn reference(&self, kind: EntityKind) -> Option<&EntityRef> {
        self.entities
            .iter()
            .filter(|e| e.kind == kind)
            .find_map(|e| e.reference.as_ref())
    }
}

/// Builder for [`Intent`]
#[derive(Debug, Clone)]
#[must_use]
pub struct IntentBuilder {
    action: IntentAction,
    target: String,
    transcript: String,
    parameters: BTreeMap<String, serde_json::Value>,
    confidence: Confidence,
    force_confirmation: bool,
    priority: Priority,
    entities: Vec<Entity>,
    ambiguities: Vec<Ambiguity>,
}

impl IntentBuilder {
    pub fn confidence(mut self, confidence: impl Into<Confidence>) -> Self {
        self.confidence = confidence.into();
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn ambiguity(mut self, ambiguity: Ambiguity) -> Self {
        self.ambiguities.push(ambiguity);
        self
    }

    /// Ask for confirmation even when confidence is high (destructive actions)
    pub const fn require_confirmation(mut self) -> Self {
        self.force_confirmation = true;
        self
    }

    /// Finish the intent
    #[must_use]
    pub fn build(self) -> Intent {
        Intent {
            id: IntentId::new(),
            action: self.action,
            target: self.target,
            parameters: self.parameters,
            requires_confirmation: self.force_confirmation || self.confidence.is_low(),
            confidence: self.confidence,
            priority: self.priority,
            entities: self.entities,
            ambiguities: self.ambiguities,
            transcript: self.transcript,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    pub message: String,
    #[serde(default)]
    pub requires_follow_up: bool,
    #[serde(default)]
    pub follow_up_prompt: Option<String>,
}

impl CommandResult {
    /// Successful result with a spoken message
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: serde_json::Value::Null,
            message: message.into(),
            requires_follow_up: false,
            follow_up_prompt: None,
        }
    }

    /// Failed result with a human-readable cause
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            message: message.into(),
            requires_follow_up: false,
            follow_up_prompt: None,
        }
    }

    /// Attach a payload for the presentation layer
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Ask the user a follow-up question after this result
    #[must_use]
    pub fn with_follow_up(mut self, prompt: impl Into<String>) -> Self {
        self.requires_follow_up = true;
        self.follow_up_prompt = Some(prompt.into());
        self
    }
}

/// What presentation shows and speaks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Text to speak
    pub text: String,
    /// Text to display
    pub display_text: String,
    /// Optional structured payload for cards/lists
    #[serde(default)]
    pub visual_data: Option<serde_json::Value>,
    /// Pre-rendered audio, when the host supplies one
    #[serde(default)]
    pub audio_url: Option<String>,
    pub priority: Priority,
}

impl Response {
    /// Response whose spoken and displayed text are the same
    #[must_use]
    pub fn spoken(text: impl Into<String>, priority: Priority) -> Self {
        let text = text.into();
        Self {
            display_text: text.clone(),
            text,
            visual_data: None,
            audio_url: None,
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        assert!((Confidence::new(1.7).value() - 1.0).abs() < f32::EPSILON);
        assert!(Confidence::new(-0.2).value().abs() < f32::EPSILON);
        assert!(Confidence::new(f32::NAN).value().abs() < f32::EPSILON);
    }

    #[test]
    fn threshold_boundary_is_not_low() {
        assert!(!Confidence::new(0.80).is_low());
        assert!(Confidence::new(0.799).is_low());
        assert!(Confidence::new(0.79999995).is_low());
    }

    #[test]
    fn percent_rounds_down_and_never_shows_threshold_for_low_scores() {
        assert_eq!(Confidence::new(0.799).percent(), 79);
        assert_eq!(Confidence::new(0.79999995).percent(), 79);
        assert_eq!(Confidence::new(0.80).percent(), 80);
        assert_eq!(Confidence::new(0.29).percent(), 29);
        assert_eq!(Confidence::new(1.0).percent(), 100);
        assert_eq!(Confidence::new(0.75).to_string(), "75%");
    }

    #[test]
    fn low_confidence_intent_requires_confirmation() {
        let low = Intent::builder(IntentAction::Show, "pets", "show me my pets")
            .confidence(0.75)
            .build();
        assert!(low.requires_confirmation());

        let high = Intent::builder(IntentAction::Show, "pets", "show me my pets")
            .confidence(0.80)
            .build();
        assert!(!high.requires_confirmation());
    }

    #[test]
    fn forced_confirmation_survives_high_confidence() {
        let intent = Intent::builder(IntentAction::Delete, "pets", "remove rex")
            .confidence(0.95)
            .require_confirmation()
            .build();
        assert!(intent.requires_confirmation());
    }

    #[test]
    fn resolve_creates_new_unambiguous_intent() {
        let rex = EntityRef::pet("p1", "Rex");
        let bella = EntityRef::pet("p2", "Bella");
        let intent = Intent::builder(IntentAction::Show, "health", "how is my dog doing")
            .confidence(0.9)
            .entity(Entity::new(EntityKind::Species, "dog"))
            .ambiguity(Ambiguity {
                kind: EntityKind::Pet,
                mention: "my dog".into(),
                candidates: vec![rex.clone(), bella],
            })
            .build();

        let resolved = intent.resolve(&rex);

        assert_ne!(resolved.id(), intent.id());
        assert!(!resolved.is_ambiguous());
        assert_eq!(resolved.reference(EntityKind::Pet), Some(&rex));
        assert_eq!(resolved.parameter_str("pet_id"), Some("p1"));
        assert_eq!(resolved.transcript(), "how is my dog doing");
        assert!(intent.is_ambiguous());
    }

    #[test]
    fn unrecognized_intent_is_low_confidence() {
        let intent = Intent::unrecognized("purple monkey dishwasher");
        assert_eq!(intent.action(), IntentAction::Unknown);
        assert!(intent.requires_confirmation());
    }

    #[test]
    fn confidence_deserializes_clamped() {
        let c: Confidence = serde_json::from_str("1.5").unwrap();
        assert!((c.value() - 1.0).abs() < f32::EPSILON);
    }
}

//! Intent parsing
//!
//! [`RuleBasedIntentParser`] maps a transcript onto the pet-care command
//! surface with ordered phrase rules, then extracts entities and resolves
//! which pet the user means. The first matching rule wins.

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::context::DialogContext;
use super::types::{Ambiguity, Entity, EntityKind, EntityRef, Intent, IntentAction, Priority, Transcript};
use crate::commands::CommandTarget;
use crate::{Error, Result};

/// Turns a final transcript into an [`Intent`]
#[async_trait]
pub trait IntentParser: Send + Sync {
    /// Parse a transcript against the current conversation
    ///
    /// The intent's confidence comes from the transcript and is never raised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the transcript cannot be interpreted at all
    async fn parse_intent(&self, transcript: &Transcript, context: &DialogContext) -> Result<Intent>;
}

/// A pet known to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetRecord {
    pub id: String,
    pub name: String,
    /// Normalized species ("dog", "cat", ...)
    #[serde(default)]
    pub species: Option<String>,
}

impl PetRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, species: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            species: species.map(normalize_species),
        }
    }

    #[must_use]
    pub fn to_ref(&self) -> EntityRef {
        EntityRef::pet(self.id.clone(), self.name.clone())
    }
}

/// Source of the user's pets
pub trait PetDirectory: Send + Sync {
    fn pets(&self) -> Vec<PetRecord>;
}

/// Pet list the host replaces whenever its records change
#[derive(Debug, Default)]
pub struct StaticPetDirectory {
    pets: RwLock<Vec<PetRecord>>,
}

impl StaticPetDirectory {
    #[must_use]
    pub fn new(pets: Vec<PetRecord>) -> Self {
        Self {
            pets: RwLock::new(pets),
        }
    }

    pub fn replace(&self, pets: Vec<PetRecord>) {
        *self.pets.write().unwrap_or_else(PoisonError::into_inner) = pets;
    }
}

impl PetDirectory for StaticPetDirectory {
    fn pets(&self) -> Vec<PetRecord> {
        self.pets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One phrase rule
struct PhraseRule {
    pattern: Regex,
    action: IntentAction,
    target: CommandTarget,
    /// The command acts on a single pet
    needs_pet: bool,
    /// Destructive; confirm even when confidence is high
    confirm: bool,
    priority: Priority,
}

impl PhraseRule {
    fn new(pattern: &str, action: IntentAction, target: CommandTarget) -> Self {
        Self {
            pattern: Regex::new(&format!("(?i){pattern}")).expect("valid phrase rule"),
            action,
            target,
            needs_pet: false,
            confirm: false,
            priority: Priority::Normal,
        }
    }

    fn for_pet(mut self) -> Self {
        self.needs_pet = true;
        self
    }

    fn destructive(mut self) -> Self {
        self.confirm = true;
        self.priority = Priority::High;
        self
    }
}

static RULES: LazyLock<Vec<PhraseRule>> = LazyLock::new(|| {
    use CommandTarget as T;
    use IntentAction as A;
    vec![
        PhraseRule::new(
            r"^(clear|reset|forget)\b.*\b(conversation|chat|context|that)\b|^start over\b",
            A::ClearConversation,
            T::Conversation,
        ),
        PhraseRule::new(r"\bhelp\b|\bwhat can (you|i) (do|say)\b", A::Help, T::General),
        PhraseRule::new(
            r"\b(go to|open|navigate to|take me to|switch to)\b",
            A::Navigate,
            T::Dashboard,
        ),
        PhraseRule::new(
            r"\bcancel\b.*\b(appointment|visit|booking|checkup)s?\b",
            A::Cancel,
            T::Appointments,
        )
        .for_pet()
        .destructive(),
        PhraseRule::new(
            r"\b(schedule|book|make|set up)\b.*\b(appointment|vet|visit|checkup|grooming)\b",
            A::Schedule,
            T::Appointments,
        )
        .for_pet(),
        PhraseRule::new(r"\bremind me\b|\bset (a |an )?reminder\b", A::Remind, T::Reminders),
        PhraseRule::new(
            r"\b(gave|give|log|record)\b.*\b(medication|medicine|meds|pills?|dose|vaccine)\b",
            A::Log,
            T::Health,
        )
        .for_pet(),
        PhraseRule::new(
            r"\b(log|add|record)\b.*\b(expenses?|purchase|receipt|cost)\b|\b(spent|paid)\b|\$\s?\d",
            A::Log,
            T::Expenses,
        ),
        PhraseRule::new(
            r"\b(fed|feed)\b|\blog\b.*\b(feeding|meal|food)\b",
            A::Log,
            T::Feed,
        )
        .for_pet(),
        PhraseRule::new(
            r"\b(delete|remove)\b.*\b(pet|profile)\b",
            A::Delete,
            T::Pets,
        )
        .for_pet()
        .destructive(),
        PhraseRule::new(
            r"\b(add|create|register)\b.*\bpet\b|\bnew (dog|cat|pet|puppy|kitten)\b",
            A::Create,
            T::Pets,
        ),
        PhraseRule::new(
            r"\b(update|change|edit)\b.*\b(weight|name|birthday|breed|profile)\b",
            A::Update,
            T::Pets,
        )
        .for_pet(),
        PhraseRule::new(
            r"\b(health|vaccinations?|vaccines?|weight|medical|symptoms?|sick|how is|how's)\b",
            A::Show,
            T::Health,
        )
        .for_pet(),
        PhraseRule::new(
            r"\b(appointments?|vet visits?|calendar)\b",
            A::Show,
            T::Appointments,
        ),
        PhraseRule::new(r"\b(expenses?|spending|costs?)\b", A::Show, T::Expenses),
        PhraseRule::new(r"\breminders?\b", A::Show, T::Reminders),
        PhraseRule::new(r"\b(feeding|meals?|food)\b", A::Show, T::Feed),
        PhraseRule::new(r"\b(settings|preferences)\b", A::Navigate, T::Settings),
        PhraseRule::new(r"\b(pets?|animals?|dogs?|cats?)\b", A::Show, T::Pets),
    ]
});

static PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(dashboard|home|pets?|appointments?|calendar|expenses?|health|reminders?|feed(?:ing)?|settings)\b",
    )
    .expect("valid page pattern")
});

static SPECIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(dogs?|puppy|puppies|cats?|kittens?|rabbits?|bunny|birds?|fish|hamsters?)\b")
        .expect("valid species pattern")
});

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s?(\d+(?:\.\d{1,2})?)|\b(\d+(?:\.\d{1,2})?)\s*(?:dollars|bucks)\b")
        .expect("valid amount pattern")
});

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(today|tonight|tomorrow|yesterday|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
    )
    .expect("valid date pattern")
});

static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)|\b(noon|midnight)\b")
        .expect("valid time pattern")
});

static URGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(emergency|urgent|bleeding|vomit\w*|sick|poison\w*|injur\w*)\b")
        .expect("valid urgency pattern")
});

/// Local phrase-rule parser for the pet-care surface
pub struct RuleBasedIntentParser {
    pets: Arc<dyn PetDirectory>,
    today: fn() -> NaiveDate,
}

impl RuleBasedIntentParser {
    #[must_use]
    pub fn new(pets: Arc<dyn PetDirectory>) -> Self {
        Self {
            pets,
            today: || Local::now().date_naive(),
        }
    }

    /// Fix the calendar day relative dates resolve against
    #[must_use]
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    fn parse(&self, transcript: &Transcript, context: &DialogContext) -> Result<Intent> {
        let text = normalize(&transcript.text);
        if text.is_empty() {
            return Err(Error::Parse("empty transcript".to_string()));
        }

        let Some(rule) = RULES.iter().find(|r| r.pattern.is_match(&text)) else {
            tracing::debug!(transcript = %text, "no phrase rule matched");
            return Ok(Intent::unrecognized(transcript.text.trim()));
        };

        let page = (rule.action == IntentAction::Navigate)
            .then(|| PAGE.captures(&text).and_then(|c| c.get(1)))
            .flatten()
            .map(|m| canonical_page(m.as_str()));
        let target = page
            .and_then(CommandTarget::from_name)
            .unwrap_or(rule.target);

        let mut builder = Intent::builder(rule.action, target.as_str(), transcript.text.trim())
            .confidence(transcript.confidence)
            .priority(rule.priority);

        if rule.action == IntentAction::Navigate {
            builder = builder.parameter("page", json!(target.as_str()));
            if let Some(page) = page {
                builder = builder.entity(Entity::new(EntityKind::Page, page));
            }
        }

        if rule.confirm {
            builder = builder.require_confirmation();
        }
        if URGENT.is_match(&text) {
            builder = builder.priority(Priority::High);
        }

        let species = SPECIES
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| normalize_species(m.as_str()));
        if let Some(species) = &species {
            builder = builder
                .entity(Entity::new(EntityKind::Species, species.clone()))
                .parameter("species", json!(species));
        }

        if let Some(amount) = extract_amount(&text) {
            builder = builder
                .entity(Entity::new(EntityKind::Amount, format!("{amount:.2}")))
                .parameter("amount", json!(amount));
        }

        if let Some(word) = DATE.captures(&text).and_then(|c| c.get(1)) {
            builder = builder.entity(Entity::new(EntityKind::Date, word.as_str()));
            if let Some(date) = resolve_date(word.as_str(), (self.today)()) {
                builder = builder.parameter("date", json!(date.format("%Y-%m-%d").to_string()));
            }
        }

        if let Some(time) = extract_time(&text) {
            builder = builder
                .entity(Entity::new(EntityKind::Time, time.clone()))
                .parameter("time", json!(time));
        }

        builder = match self.resolve_pet(&text, species.as_deref(), context, rule.needs_pet) {
            PetResolution::Resolved(pet) => builder
                .parameter("pet_id", json!(pet.id))
                .parameter("pet", json!(pet.name))
                .entity(Entity::resolved(pet)),
            PetResolution::Ambiguous(ambiguity) => builder.ambiguity(ambiguity),
            PetResolution::None => builder,
        };

        let intent = builder.build();
        tracing::debug!(
            action = %intent.action(),
            target = %intent.target(),
            confidence = %intent.confidence(),
            ambiguous = intent.is_ambiguous(),
            "intent parsed"
        );
        Ok(intent)
    }

    /// Named pet, then the active pet, then the only pet, then ask
    fn resolve_pet(
        &self,
        text: &str,
        species: Option<&str>,
        context: &DialogContext,
        needs_pet: bool,
    ) -> PetResolution {
        let pets = self.pets.pets();

        if let Some(named) = pets.iter().find(|p| mentions(text, &p.name)) {
            return PetResolution::Resolved(named.to_ref());
        }
        if !needs_pet {
            return PetResolution::None;
        }

        let candidates: Vec<&PetRecord> = pets
            .iter()
            .filter(|p| species.is_none_or(|s| p.species.as_deref().is_none_or(|ps| ps == s)))
            .collect();

        if let Some(active) = context.active_pet()
            && candidates.iter().any(|p| p.id == active.id)
        {
            return PetResolution::Resolved(active.clone());
        }

        match candidates.as_slice() {
            [] => PetResolution::None,
            [only] => PetResolution::Resolved(only.to_ref()),
            many => PetResolution::Ambiguous(Ambiguity {
                kind: EntityKind::Pet,
                mention: species.map_or_else(|| "your pet".to_string(), |s| format!("your {s}")),
                candidates: many.iter().map(|p| p.to_ref()).collect(),
            }),
        }
    }
}

#[async_trait]
impl IntentParser for RuleBasedIntentParser {
    async fn parse_intent(&self, transcript: &Transcript, context: &DialogContext) -> Result<Intent> {
        self.parse(transcript, context)
    }
}

enum PetResolution {
    Resolved(EntityRef),
    Ambiguous(Ambiguity),
    None,
}

/// Interpret a spoken yes/no answer
#[must_use]
pub fn parse_yes_no(text: &str) -> Option<bool> {
    static YES: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(yes|yeah|yep|yup|sure|correct|right|ok|okay|confirm|do it|go ahead|that's right|affirmative)\b")
            .expect("valid affirmation pattern")
    });
    static NO: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(no|nope|nah|cancel|stop|wrong|incorrect|never ?mind|don't)\b")
            .expect("valid denial pattern")
    });

    let text = normalize(text);
    if YES.is_match(&text) {
        Some(true)
    } else if NO.is_match(&text) {
        Some(false)
    } else {
        None
    }
}

/// Find the candidate a spoken answer names
#[must_use]
pub fn match_candidate<'a>(text: &str, candidates: &'a [EntityRef]) -> Option<&'a EntityRef> {
    let text = normalize(text);
    let mut named = candidates.iter().filter(|c| mentions(&text, &c.name));
    match (named.next(), named.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .to_lowercase()
}

fn mentions(text: &str, name: &str) -> bool {
    let name = name.trim().to_lowercase();
    !name.is_empty()
        && text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .windows(name.split_whitespace().count().max(1))
            .any(|w| w.join(" ").trim_end_matches("'s") == name)
}

fn normalize_species(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "dog" | "dogs" | "puppy" | "puppies" => "dog",
        "cat" | "cats" | "kitten" | "kittens" => "cat",
        "rabbit" | "rabbits" | "bunny" => "rabbit",
        "bird" | "birds" => "bird",
        "hamster" | "hamsters" => "hamster",
        "fish" => "fish",
        other => return other.to_string(),
    }
    .to_string()
}

fn canonical_page(raw: &str) -> &'static str {
    CommandTarget::from_name(raw)
        .map_or(CommandTarget::Dashboard.as_str(), CommandTarget::as_str)
}

fn extract_amount(text: &str) -> Option<f64> {
    let caps = AMOUNT.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// "3pm" -> "15:00", "noon" -> "12:00"
fn extract_time(text: &str) -> Option<String> {
    let caps = TIME.captures(text)?;
    if let Some(word) = caps.get(4) {
        return Some(if word.as_str() == "noon" { "12:00" } else { "00:00" }.to_string());
    }

    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    let pm = caps.get(3)?.as_str().starts_with('p');
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    Some(format!("{hour:02}:{minute:02}"))
}

/// Resolve a relative day word; weekdays mean the next such day
fn resolve_date(word: &str, today: NaiveDate) -> Option<NaiveDate> {
    let weekday = match word.to_lowercase().as_str() {
        "today" | "tonight" => return Some(today),
        "tomorrow" => return today.checked_add_signed(ChronoDuration::days(1)),
        "yesterday" => return today.checked_sub_signed(ChronoDuration::days(1)),
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        _ => return None,
    };

    let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    today.checked_add_signed(ChronoDuration::days(i64::from(ahead)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(pets: &[(&str, &str, &str)]) -> Arc<dyn PetDirectory> {
        Arc::new(StaticPetDirectory::new(
            pets.iter()
                .map(|(id, name, species)| PetRecord::new(*id, *name, Some(species)))
                .collect(),
        ))
    }

    fn parser(pets: &[(&str, &str, &str)]) -> RuleBasedIntentParser {
        RuleBasedIntentParser::new(directory(pets))
            .with_today(|| NaiveDate::from_ymd_opt(2026, 10, 14).unwrap())
    }

    fn parse(p: &RuleBasedIntentParser, text: &str) -> Intent {
        p.parse(&Transcript::final_result(text, 0.92), &DialogContext::default())
            .unwrap()
    }

    #[test]
    fn show_pets_keeps_transcript_confidence() {
        let p = parser(&[]);
        let intent = p
            .parse(
                &Transcript::final_result("show me my pets", 0.75),
                &DialogContext::default(),
            )
            .unwrap();

        assert_eq!(intent.action(), IntentAction::Show);
        assert_eq!(intent.target(), "pets");
        assert!((intent.confidence().value() - 0.75).abs() < f32::EPSILON);
        assert!(intent.requires_confirmation());
    }

    #[test]
    fn named_pet_is_resolved() {
        let p = parser(&[("p1", "Rex", "dog"), ("p2", "Bella", "dog")]);
        let intent = parse(&p, "schedule a vet appointment for Bella tomorrow at 3pm");

        assert_eq!(intent.action(), IntentAction::Schedule);
        assert_eq!(intent.parameter_str("pet_id"), Some("p2"));
        assert_eq!(intent.parameter_str("date"), Some("2026-10-15"));
        assert_eq!(intent.parameter_str("time"), Some("15:00"));
        assert!(!intent.is_ambiguous());
    }

    #[test]
    fn unqualified_pet_with_several_pets_is_ambiguous() {
        let p = parser(&[("p1", "Rex", "dog"), ("p2", "Bella", "dog")]);
        let intent = parse(&p, "how is my dog doing");

        assert_eq!(intent.target(), "health");
        assert!(intent.is_ambiguous());
        assert_eq!(intent.ambiguities()[0].candidates.len(), 2);
    }

    #[test]
    fn species_narrows_candidates() {
        let p = parser(&[("p1", "Rex", "dog"), ("p2", "Tom", "cat")]);
        let intent = parse(&p, "how is my cat");
        assert_eq!(intent.parameter_str("pet_id"), Some("p2"));
    }

    #[test]
    fn active_pet_anchors_follow_up() {
        let p = parser(&[("p1", "Rex", "dog"), ("p2", "Bella", "dog")]);
        let context = DialogContext {
            active_subject: Some(EntityRef::pet("p1", "Rex")),
            ..DialogContext::default()
        };

        let intent = p
            .parse(&Transcript::final_result("what about his vaccinations", 0.9), &context)
            .unwrap();

        assert_eq!(intent.reference(EntityKind::Pet).map(|r| r.name.as_str()), Some("Rex"));
    }

    #[test]
    fn sole_pet_is_implied() {
        let p = parser(&[("p1", "Rex", "dog")]);
        let intent = parse(&p, "I just fed him");
        assert_eq!(intent.target(), "feed");
        assert_eq!(intent.parameter_str("pet"), Some("Rex"));
    }

    #[test]
    fn expense_amount_is_extracted() {
        let p = parser(&[]);
        let intent = parse(&p, "log a $42.50 expense for food");
        assert_eq!(intent.target(), "expenses");
        assert_eq!(intent.parameters()["amount"], json!(42.5));
    }

    #[test]
    fn destructive_commands_always_confirm() {
        let p = parser(&[("p1", "Rex", "dog")]);
        let intent = parse(&p, "cancel Rex's appointment");
        assert_eq!(intent.action(), IntentAction::Cancel);
        assert!(intent.requires_confirmation());
        assert_eq!(intent.parameter_str("pet"), Some("Rex"));
    }

    #[test]
    fn navigation_sets_page() {
        let p = parser(&[]);
        let intent = parse(&p, "go to the expenses page");
        assert_eq!(intent.action(), IntentAction::Navigate);
        assert_eq!(intent.parameter_str("page"), Some("expenses"));
    }

    #[test]
    fn clear_conversation_is_recognized() {
        let p = parser(&[]);
        assert_eq!(
            parse(&p, "clear the conversation").action(),
            IntentAction::ClearConversation
        );
        assert_eq!(parse(&p, "start over").action(), IntentAction::ClearConversation);
    }

    #[test]
    fn gibberish_is_unknown() {
        let p = parser(&[]);
        let intent = parse(&p, "purple monkey dishwasher");
        assert_eq!(intent.action(), IntentAction::Unknown);
    }

    #[test]
    fn empty_transcript_is_parse_error() {
        let p = parser(&[]);
        let err = p
            .parse(&Transcript::final_result("  ", 0.9), &DialogContext::default())
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn yes_no_answers() {
        assert_eq!(parse_yes_no("Yes please"), Some(true));
        assert_eq!(parse_yes_no("that's right."), Some(true));
        assert_eq!(parse_yes_no("No"), Some(false));
        assert_eq!(parse_yes_no("show my expenses"), None);
    }

    #[test]
    fn candidate_matching_requires_single_name() {
        let candidates = [EntityRef::pet("1", "Rex"), EntityRef::pet("2", "Bella")];
        assert_eq!(match_candidate("Bella", &candidates).map(|c| c.id.as_str()), Some("2"));
        assert!(match_candidate("both of them", &candidates).is_none());
    }

    #[test]
    fn weekday_resolves_forward() {
        let wednesday = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        assert_eq!(
            resolve_date("friday", wednesday),
            NaiveDate::from_ymd_opt(2026, 10, 16)
        );
        assert_eq!(
            resolve_date("wednesday", wednesday),
            NaiveDate::from_ymd_opt(2026, 10, 21)
        );
    }

    #[test]
    fn times_are_normalized() {
        assert_eq!(extract_time("at 9:30 am").as_deref(), Some("09:30"));
        assert_eq!(extract_time("at 12 am").as_deref(), Some("00:00"));
        assert_eq!(extract_time("around noon").as_deref(), Some("12:00"));
    }
}

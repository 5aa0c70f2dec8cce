//! Rolling conversation state
//!
//! The [`ContextManager`] owns the single live [`DialogContext`] of a session.
//! The intent parser and response composer only ever see snapshots.

use std::collections::VecDeque;

use serde::Serialize;

use super::types::{Entity, EntityKind, EntityRef, Intent};

/// Default number of remembered intents
pub const DEFAULT_MAX_INTENTS: usize = 10;

/// Default number of remembered entities
pub const DEFAULT_MAX_ENTITIES: usize = 20;

/// Page assumed before the host reports one
pub const DEFAULT_PAGE: &str = "dashboard";

/// Snapshot of the conversation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogContext {
    /// Screen the host is showing
    pub current_page: String,
    /// Record the conversation is currently about
    pub active_subject: Option<EntityRef>,
    /// Most recent first
    pub previous_intents: Vec<Intent>,
    /// Most recent first
    pub recent_entities: Vec<Entity>,
    /// Completed turns since the last clear
    pub turn_count: u64,
}

impl Default for DialogContext {
    fn default() -> Self {
        Self {
            current_page: DEFAULT_PAGE.to_string(),
            active_subject: None,
            previous_intents: Vec::new(),
            recent_entities: Vec::new(),
            turn_count: 0,
        }
    }
}

impl DialogContext {
    /// Active subject if it is a pet
    #[must_use]
    pub fn active_pet(&self) -> Option<&EntityRef> {
        self.active_subject
            .as_ref()
            .filter(|s| s.kind == EntityKind::Pet)
    }

    /// Most recent intent, if any
    #[must_use]
    pub fn last_intent(&self) -> Option<&Intent> {
        self.previous_intents.first()
    }
}

/// Owns and mutates the session's dialog context
#[derive(Debug)]
pub struct ContextManager {
    current_page: String,
    active_subject: Option<EntityRef>,
    previous_intents: VecDeque<Intent>,
    recent_entities: VecDeque<Entity>,
    turn_count: u64,
    max_intents: usize,
    max_entities: usize,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTENTS, DEFAULT_MAX_ENTITIES)
    }
}

impl ContextManager {
    /// Create a manager with the given history bounds
    ///
    /// A bound of zero is treated as one.
    #[must_use]
    pub fn new(max_intents: usize, max_entities: usize) -> Self {
        Self {
            current_page: DEFAULT_PAGE.to_string(),
            active_subject: None,
            previous_intents: VecDeque::new(),
            recent_entities: VecDeque::new(),
            turn_count: 0,
            max_intents: max_intents.max(1),
            max_entities: max_entities.max(1),
        }
    }

    /// Record a completed turn
    pub fn update_context(&mut self, intent: &Intent) {
        self.previous_intents.push_front(intent.clone());
        self.previous_intents.truncate(self.max_intents);

        for entity in intent.entities().iter().rev() {
            self.recent_entities.retain(|e| e != entity);
            self.recent_entities.push_front(entity.clone());
        }
        self.recent_entities.truncate(self.max_entities);

        // A resolved pet wins over any other resolved record
        let subject = intent
            .reference(EntityKind::Pet)
            .or_else(|| intent.entities().iter().find_map(|e| e.reference.as_ref()));
        if let Some(subject) = subject {
            self.active_subject = Some(subject.clone());
        }

        if let Some(page) = intent.parameter_str("page") {
            self.current_page = page.to_string();
        }

        self.turn_count += 1;

        tracing::debug!(
            intent = %intent.id(),
            action = %intent.action(),
            turn_count = self.turn_count,
            active_subject = ?self.active_subject.as_ref().map(|s| &s.name),
            "context updated"
        );
    }

    /// Read-only snapshot
    #[must_use]
    pub fn context(&self) -> DialogContext {
        DialogContext {
            current_page: self.current_page.clone(),
            active_subject: self.active_subject.clone(),
            previous_intents: self.previous_intents.iter().cloned().collect(),
            recent_entities: self.recent_entities.iter().cloned().collect(),
            turn_count: self.turn_count,
        }
    }

    /// Pin the pet the conversation is about
    pub fn set_active_pet(&mut self, pet: EntityRef) {
        tracing::debug!(pet = %pet.name, "active pet set");
        self.active_subject = Some(pet);
    }

    /// Pet the conversation is about, if the active subject is one
    #[must_use]
    pub fn active_pet(&self) -> Option<&EntityRef> {
        self.active_subject
            .as_ref()
            .filter(|s| s.kind == EntityKind::Pet)
    }

    /// Record the screen the host is showing
    pub fn set_current_page(&mut self, page: impl Into<String>) {
        let page = page.into();
        self.current_page = if page.trim().is_empty() {
            DEFAULT_PAGE.to_string()
        } else {
            page
        };
    }

    /// Completed turns since the last clear
    #[must_use]
    pub const fn turn_count(&self) -> u64 {
        self.turn_count
    }

    /// Reset every field to its empty value
    pub fn clear_context(&mut self) {
        self.current_page = DEFAULT_PAGE.to_string();
        self.active_subject = None;
        self.previous_intents.clear();
        self.recent_entities.clear();
        self.turn_count = 0;
        tracing::debug!("context cleared");
    }
}

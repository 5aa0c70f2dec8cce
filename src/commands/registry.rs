//! Command registration table

use std::collections::HashMap;
use std::sync::Arc;

use super::{CommandHandler, CommandKey, CommandTarget};
use crate::dialog::IntentAction;

/// Handlers keyed by action and target
///
/// An exact registration wins over a per-action wildcard.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<CommandKey, Arc<dyn CommandHandler>>,
    wildcards: HashMap<IntentAction, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one action on one target
    ///
    /// Re-registering a key replaces the previous handler.
    pub fn register(
        &mut self,
        action: IntentAction,
        target: CommandTarget,
        handler: Arc<dyn CommandHandler>,
    ) -> &mut Self {
        let key = CommandKey::new(action, target);
        if self.handlers.insert(key, handler).is_some() {
            tracing::debug!(command = %key, "command handler replaced");
        }
        self
    }

    /// Register a handler for an action on every target without its own handler
    pub fn register_action(
        &mut self,
        action: IntentAction,
        handler: Arc<dyn CommandHandler>,
    ) -> &mut Self {
        self.wildcards.insert(action, handler);
        self
    }

    /// Handler for a key, falling back to the action wildcard
    #[must_use]
    pub fn resolve(&self, key: CommandKey) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .get(&key)
            .or_else(|| self.wildcards.get(&key.action))
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, key: CommandKey) -> bool {
        self.handlers.contains_key(&key) || self.wildcards.contains_key(&key.action)
    }

    /// Exact registrations, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<CommandKey> {
        let mut keys: Vec<_> = self.handlers.keys().copied().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.wildcards.is_empty()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("handlers", &self.keys())
            .field("wildcards", &self.wildcards.keys().collect::<Vec<_>>())
            .finish()
    }
}

//! Command dispatch
//!
//! Routes a [`ConfirmedIntent`] to its host handler. Every outcome, including
//! handler errors, panics, timeouts and repeat dispatches, comes back as a
//! [`CommandResult`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::time::timeout;

use super::{CommandKey, CommandRegistry, CommandRequest, CommandTarget, ConfirmedIntent};
use crate::dialog::{CommandResult, IntentAction, IntentId};

/// Default time a host handler may take
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a dispatched intent id is remembered
const LEDGER_TTL: Duration = Duration::from_secs(3600);

/// Maximum remembered intent ids
const LEDGER_MAX_ENTRIES: usize = 1000;

/// Remembers which intents have already been dispatched
#[derive(Debug)]
struct DispatchLedger {
    seen: HashMap<IntentId, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for DispatchLedger {
    fn default() -> Self {
        Self {
            seen: HashMap::new(),
            ttl: LEDGER_TTL,
            max_entries: LEDGER_MAX_ENTRIES,
        }
    }
}

impl DispatchLedger {
    /// Record `id`; returns `false` if it was already recorded
    fn record(&mut self, id: IntentId) -> bool {
        let now = Instant::now();

        if self.seen.len() >= self.max_entries {
            self.seen.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        if self.seen.len() >= self.max_entries
            && let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|(_, ts)| **ts)
                .map(|(id, _)| *id)
        {
            self.seen.remove(&oldest);
        }

        if self.seen.contains_key(&id) {
            return false;
        }
        self.seen.insert(id, now);
        true
    }
}

/// Routes confirmed intents to host handlers
#[derive(Debug)]
pub struct CommandDispatcher {
    registry: CommandRegistry,
    ledger: Mutex<DispatchLedger>,
    timeout: Duration,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(registry: CommandRegistry) -> Self {
        Self {
            registry,
            ledger: Mutex::new(DispatchLedger::default()),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Override the handler timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Execute a confirmed intent
    ///
    /// Runs the host handler at most once per intent id. Never fails: errors
    /// and timeouts become `success: false` results with a readable cause.
    pub async fn execute_command(&self, confirmed: ConfirmedIntent) -> CommandResult {
        let intent = confirmed.intent();

        let first_time = self
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(intent.id());
        if !first_time {
            tracing::warn!(intent = %intent.id(), "intent already dispatched, skipping");
            return CommandResult::failure("That request was already carried out");
        }

        let Some(target) = CommandTarget::from_name(intent.target()) else {
            tracing::warn!(target = %intent.target(), "unsupported command target");
            return CommandResult::failure(format!(
                "I don't know how to work with {}",
                intent.target()
            ));
        };

        match intent.action() {
            IntentAction::Help => self.help(),
            IntentAction::Unknown => CommandResult::failure("I didn't understand that request"),
            IntentAction::ClearConversation => {
                CommandResult::failure("Clearing the conversation isn't a host command")
            }
            IntentAction::Navigate
            | IntentAction::Show
            | IntentAction::Create
            | IntentAction::Update
            | IntentAction::Delete
            | IntentAction::Schedule
            | IntentAction::Cancel
            | IntentAction::Log
            | IntentAction::Remind => {
                let key = CommandKey::new(intent.action(), target);
                self.run_handler(key, CommandRequest::from_intent(intent, target))
                    .await
            }
        }
    }

    async fn run_handler(&self, key: CommandKey, request: CommandRequest) -> CommandResult {
        let Some(handler) = self.registry.resolve(key) else {
            tracing::info!(command = %key, "no handler registered");
            return CommandResult::failure(format!(
                "I can't {} {} yet",
                key.action.verb(),
                key.target
            ));
        };

        let intent_id = request.intent_id;
        let started = Instant::now();
        tracing::info!(command = %key, intent = %intent_id, "dispatching command");

        let run = AssertUnwindSafe(handler.execute(request)).catch_unwind();
        match timeout(self.timeout, run).await {
            Ok(Ok(Ok(result))) => {
                tracing::info!(
                    command = %key,
                    intent = %intent_id,
                    success = result.success,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "command finished"
                );
                result
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(command = %key, intent = %intent_id, error = %e, "command failed");
                CommandResult::failure(e.to_string())
            }
            Ok(Err(_)) => {
                tracing::error!(command = %key, intent = %intent_id, "command handler panicked");
                CommandResult::failure("Something went wrong carrying that out")
            }
            Err(_) => {
                tracing::warn!(command = %key, intent = %intent_id, timeout = ?self.timeout, "command timed out");
                CommandResult::failure("That took too long, please try again")
            }
        }
    }

    fn help(&self) -> CommandResult {
        let mut targets: Vec<CommandTarget> =
            self.registry.keys().iter().map(|k| k.target).collect();
        targets.sort();
        targets.dedup();

        let examples = [
            "show my pets",
            "schedule a vet appointment for tomorrow",
            "log a $40 expense",
            "remind me to give Rex his medication",
        ];

        CommandResult::ok(format!(
            "You can say things like \"{}\" or \"{}\"",
            examples[0], examples[1]
        ))
        .with_data(serde_json::json!({
            "targets": targets.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "examples": examples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Error;
    use crate::commands::handler_fn;
    use crate::dialog::Intent;

    fn counting_registry(calls: &Arc<AtomicUsize>) -> CommandRegistry {
        let calls = Arc::clone(calls);
        let mut registry = CommandRegistry::new();
        registry.register(
            IntentAction::Show,
            CommandTarget::Pets,
            handler_fn(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(CommandResult::ok("Here are your pets"))
                }
            }),
        );
        registry
    }

    fn show_pets() -> ConfirmedIntent {
        ConfirmedIntent::auto(
            Intent::builder(IntentAction::Show, "pets", "show me my pets")
                .confidence(0.9)
                .build(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dispatches_at_most_once_per_intent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = CommandDispatcher::new(counting_registry(&calls));
        let intent = show_pets();

        let first = dispatcher.execute_command(intent.clone()).await;
        let second = dispatcher.execute_command(intent).await;

        assert!(first.success);
        assert!(!second.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_becomes_failure_result() {
        let mut registry = CommandRegistry::new();
        registry.register(
            IntentAction::Show,
            CommandTarget::Pets,
            handler_fn(|_| async { Err(Error::Dispatch("database offline".into())) }),
        );
        let dispatcher = CommandDispatcher::new(registry);

        let result = dispatcher.execute_command(show_pets()).await;

        assert!(!result.success);
        assert!(result.message.contains("database offline"));
    }

    fn host_bug() -> crate::Result<CommandResult> {
        panic!("host bug")
    }

    #[tokio::test]
    async fn panicking_handler_becomes_failure_result() {
        let mut registry = CommandRegistry::new();
        registry.register(
            IntentAction::Show,
            CommandTarget::Pets,
            handler_fn(|_| async { host_bug() }),
        );
        let dispatcher = CommandDispatcher::new(registry);

        let result = dispatcher.execute_command(show_pets()).await;

        assert!(!result.success);
        assert_eq!(result.message, "Something went wrong carrying that out");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut registry = CommandRegistry::new();
        registry.register(
            IntentAction::Show,
            CommandTarget::Pets,
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(CommandResult::ok("late"))
            }),
        );
        let dispatcher = CommandDispatcher::new(registry).with_timeout(Duration::from_secs(1));

        let result = dispatcher.execute_command(show_pets()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn missing_handler_is_reported() {
        let dispatcher = CommandDispatcher::new(CommandRegistry::new());
        let result = dispatcher.execute_command(show_pets()).await;
        assert!(!result.success);
        assert_eq!(result.message, "I can't show pets yet");
    }

    #[tokio::test]
    async fn help_is_built_in() {
        let dispatcher = CommandDispatcher::new(CommandRegistry::new());
        let help = ConfirmedIntent::auto(
            Intent::builder(IntentAction::Help, "general", "what can you do").build(),
        )
        .unwrap();

        let result = dispatcher.execute_command(help).await;
        assert!(result.success);
        assert!(result.message.starts_with("You can say"));
    }

    #[test]
    fn ledger_evicts_oldest_at_capacity() {
        let mut ledger = DispatchLedger {
            max_entries: 2,
            ..DispatchLedger::default()
        };
        let first = IntentId::new();
        assert!(ledger.record(first));
        assert!(!ledger.record(first));
        assert!(ledger.record(IntentId::new()));
        assert!(ledger.record(IntentId::new()));
        assert_eq!(ledger.seen.len(), 2);
    }
}

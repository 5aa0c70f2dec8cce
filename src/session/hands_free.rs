//! Hands-free session lifecycle
//!
//! Activity is a single timestamp written lock-free by host input listeners.
//! The orchestrator polls [`HandsFreeSession::check`] to raise the inactivity
//! prompt and, if nobody answers, to switch hands-free off.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::HandsFreeConfig;

/// Records the last moment the user did anything
///
/// Cheap to clone; hand a clone to every pointer, key, scroll or touch
/// listener. Uses the tokio clock, so paused-time tests can drive it.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    epoch: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Start tracking, counting now as activity
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Note user activity
    pub fn record_activity(&self) {
        let ms = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// When the user was last active
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    /// Time since the last activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

/// What the inactivity check wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityAction {
    None,
    /// Ask whether to keep hands-free on
    Prompt,
    /// Nobody answered; switch hands-free off
    AutoDisable,
}

/// Transient hands-free state
///
/// Only `enabled` is persisted; everything else starts over on enable.
#[derive(Debug, Clone)]
pub struct HandsFreeSession {
    enabled: bool,
    prompt_opened_at: Option<Instant>,
    config: HandsFreeConfig,
}

impl HandsFreeSession {
    #[must_use]
    pub const fn new(config: HandsFreeConfig) -> Self {
        Self {
            enabled: false,
            prompt_opened_at: None,
            config,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn inactivity_prompt_open(&self) -> bool {
        self.prompt_opened_at.is_some()
    }

    #[must_use]
    pub const fn config(&self) -> &HandsFreeConfig {
        &self.config
    }

    /// Turn on, resetting the inactivity clock
    pub fn enable(&mut self, activity: &ActivityTracker) {
        self.enabled = true;
        self.prompt_opened_at = None;
        activity.record_activity();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.prompt_opened_at = None;
    }

    /// Close the inactivity prompt
    ///
    /// Returns whether a prompt was open.
    pub fn resolve_prompt(&mut self, activity: &ActivityTracker) -> bool {
        let was_open = self.prompt_opened_at.take().is_some();
        if was_open {
            activity.record_activity();
        }
        was_open
    }

    /// Decide what, if anything, the inactivity timers require
    pub fn check(&mut self, activity: &ActivityTracker, now: Instant) -> InactivityAction {
        if !self.enabled {
            return InactivityAction::None;
        }

        if let Some(opened_at) = self.prompt_opened_at {
            return if now.saturating_duration_since(opened_at) >= self.config.auto_disable_after {
                InactivityAction::AutoDisable
            } else {
                InactivityAction::None
            };
        }

        let idle = now.saturating_duration_since(activity.last_activity());
        if idle >= self.config.inactivity_timeout {
            self.prompt_opened_at = Some(now);
            InactivityAction::Prompt
        } else {
            InactivityAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (HandsFreeSession, ActivityTracker) {
        let activity = ActivityTracker::new();
        let mut session = HandsFreeSession::new(HandsFreeConfig::default());
        session.enable(&activity);
        (session, activity)
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_after_thirty_minutes_then_auto_disable() {
        let (mut session, activity) = session();

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::None);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::Prompt);
        assert!(session.inactivity_prompt_open());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            session.check(&activity, Instant::now()),
            InactivityAction::AutoDisable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_prompt() {
        let (mut session, activity) = session();

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        activity.record_activity();
        tokio::time::advance(Duration::from_secs(20 * 60)).await;

        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::None);
        assert!(activity.idle_for() >= Duration::from_secs(20 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn answering_the_prompt_restarts_the_clock() {
        let (mut session, activity) = session();

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::Prompt);

        assert!(session.resolve_prompt(&activity));
        assert!(!session.resolve_prompt(&activity));

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::None);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_session_never_prompts() {
        let (mut session, activity) = session();
        session.disable();

        tokio::time::advance(Duration::from_secs(3 * 60 * 60)).await;
        assert_eq!(session.check(&activity, Instant::now()), InactivityAction::None);
    }
}

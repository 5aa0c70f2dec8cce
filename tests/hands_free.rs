//! Hands-free mode tests
//!
//! Wake-word activation, fail-closed enabling, preference persistence and
//! the inactivity prompt. The inactivity tests run on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use paw_voice::Error;
use paw_voice::dialog::Transcript;
use paw_voice::preferences::{MemoryPreferenceStore, PreferenceStore};
use paw_voice::session::{ConfirmationAnswer, DialogState, HandsFreeMode, PresentationEvent};
use paw_voice::voice::WakeWordMonitor;

mod common;

use common::{FakeMonitor, TestOptions, Utterance, drain, start_session, wait_for};

const PROMPT_AFTER: Duration = Duration::from_secs(30 * 60 + 5);
const DISABLE_AFTER: Duration = Duration::from_secs(65);

#[tokio::test]
async fn enabling_arms_the_monitor_and_persists() {
    let session = start_session(TestOptions::default());
    let mut events = session.handle.subscribe();

    assert!(session.handle.set_hands_free(true).await.unwrap());

    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.hands_free, HandsFreeMode::Armed);
    assert!(snapshot.monitor_active);
    assert_eq!(session.monitor.starts(), 1);
    assert!(session.preferences.hands_free_enabled().unwrap());
    assert!(drain(&mut events).contains(&PresentationEvent::HandsFreeChanged(true)));

    // Enabling twice is a no-op
    assert!(session.handle.set_hands_free(true).await.unwrap());
    assert_eq!(session.monitor.starts(), 1);
}

#[tokio::test]
async fn disabling_stops_the_monitor() {
    let session = start_session(TestOptions::default());
    session.handle.set_hands_free(true).await.unwrap();

    assert!(!session.handle.set_hands_free(false).await.unwrap());

    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.hands_free, HandsFreeMode::Disabled);
    assert!(!snapshot.monitor_active);
    assert_eq!(session.monitor.stops(), 1);
    assert!(!session.preferences.hands_free_enabled().unwrap());
}

#[tokio::test]
async fn wake_phrase_with_command_runs_the_command() {
    let session = start_session(TestOptions::default());
    session.handle.set_hands_free(true).await.unwrap();

    session
        .monitor
        .hear("hey paw", Some("show me my pets"), 0.95);
    let snapshot = wait_for(&session.handle, "wake turn", |s| {
        s.turn_count == 1 && s.state == DialogState::Idle
    })
    .await;

    assert_eq!(snapshot.hands_free, HandsFreeMode::Armed);
    assert_eq!(session.host.requests().len(), 1);
    assert_eq!(session.host.requests()[0].target.as_str(), "pets");
    assert!(!session.monitor.is_suspended());
    assert_eq!(session.recognizer.calls(), 0);
}

#[tokio::test]
async fn bare_wake_phrase_listens_for_the_command() {
    let session = start_session(TestOptions::default());
    session.recognizer.push(Utterance::Heard("show my expenses", 0.9));
    session.handle.set_hands_free(true).await.unwrap();

    session.monitor.hear("hey paw", None, 0.9);
    wait_for(&session.handle, "wake turn", |s| {
        s.turn_count == 1 && s.state == DialogState::Idle
    })
    .await;

    assert_eq!(session.recognizer.calls(), 1);
    assert_eq!(session.host.requests()[0].target.as_str(), "expenses");
    assert!(!session.monitor.is_suspended());
}

#[tokio::test]
async fn wake_phrase_is_ignored_while_disabled() {
    let session = start_session(TestOptions::default());

    session
        .monitor
        .hear("hey paw", Some("show me my pets"), 0.95);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.turn_count, 0);
    assert!(session.host.requests().is_empty());
}

#[tokio::test]
async fn missing_microphone_keeps_hands_free_off() {
    let monitor = Arc::new(FakeMonitor::default());
    monitor.fail_start(true);
    let session = start_session(TestOptions {
        monitor,
        ..TestOptions::default()
    });
    let mut events = session.handle.subscribe();

    let err = session.handle.set_hands_free(true).await.unwrap_err();
    assert!(matches!(err, Error::DeviceUnavailable(_)));

    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.hands_free, HandsFreeMode::Disabled);
    assert!(!snapshot.monitor_active);
    assert!(!session.preferences.hands_free_enabled().unwrap());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, PresentationEvent::Alert(_))));
    assert!(!events.contains(&PresentationEvent::HandsFreeChanged(true)));
}

#[tokio::test]
async fn preference_restores_hands_free_in_the_next_session() {
    let preferences = Arc::new(MemoryPreferenceStore::new());

    let first = start_session(TestOptions {
        preferences: Arc::clone(&preferences),
        ..TestOptions::default()
    });
    first.handle.set_hands_free(true).await.unwrap();
    first.handle.shutdown().await.unwrap();

    // Ending a session is not the same as turning hands-free off
    assert!(preferences.hands_free_enabled().unwrap());
    assert!(!first.monitor.is_active());

    let second = start_session(TestOptions {
        preferences: Arc::clone(&preferences),
        ..TestOptions::default()
    });
    let snapshot = wait_for(&second.handle, "restored", |s| {
        s.hands_free == HandsFreeMode::Armed
    })
    .await;

    assert!(snapshot.monitor_active);
    assert_eq!(second.monitor.starts(), 1);
}

#[tokio::test]
async fn restore_fails_closed_without_a_microphone() {
    let preferences = Arc::new(MemoryPreferenceStore::new());
    preferences.set_hands_free_enabled(true).unwrap();
    let monitor = Arc::new(FakeMonitor::default());
    monitor.fail_start(true);

    let session = start_session(TestOptions {
        preferences: Arc::clone(&preferences),
        monitor,
        ..TestOptions::default()
    });

    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.hands_free, HandsFreeMode::Disabled);
    assert!(!preferences.hands_free_enabled().unwrap());
}

#[tokio::test(start_paused = true)]
async fn unanswered_inactivity_prompt_turns_hands_free_off() {
    let session = start_session(TestOptions::default());
    let mut events = session.handle.subscribe();
    session.handle.set_hands_free(true).await.unwrap();

    tokio::time::sleep(PROMPT_AFTER).await;
    let snapshot = session.handle.status().await.unwrap();
    assert!(snapshot.inactivity_prompt_open);
    assert_eq!(snapshot.hands_free, HandsFreeMode::Armed);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, PresentationEvent::InactivityPrompt(_)))
    );
    assert!(session.synthesizer.spoken()[0].starts_with("Are you still there?"));

    tokio::time::sleep(DISABLE_AFTER).await;
    let snapshot = session.handle.status().await.unwrap();
    assert!(!snapshot.inactivity_prompt_open);
    assert_eq!(snapshot.hands_free, HandsFreeMode::Disabled);
    assert!(!snapshot.monitor_active);
    assert!(!session.preferences.hands_free_enabled().unwrap());

    let events = drain(&mut events);
    assert!(events.contains(&PresentationEvent::InactivityResolved {
        kept_enabled: false
    }));
    assert!(events.contains(&PresentationEvent::HandsFreeChanged(false)));
}

#[tokio::test(start_paused = true)]
async fn inactivity_abandons_an_unanswered_confirmation() {
    let session = start_session(TestOptions::default());
    session.handle.set_hands_free(true).await.unwrap();

    session
        .handle
        .submit_transcript(Transcript::final_result("show me my pets", 0.75))
        .await
        .unwrap();
    wait_for(&session.handle, "confirmation", |s| {
        s.state == DialogState::AwaitingConfirmation
    })
    .await;

    tokio::time::sleep(PROMPT_AFTER + DISABLE_AFTER).await;
    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.hands_free, HandsFreeMode::Disabled);
    assert_eq!(snapshot.state, DialogState::Idle);
    assert!(!snapshot.monitor_active);
    assert!(!session.preferences.hands_free_enabled().unwrap());

    // The dropped prompt can no longer be answered
    assert!(!session.handle.confirm(ConfirmationAnswer::Affirm).await.unwrap());
    assert!(session.host.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn keeping_hands_free_restarts_the_clock() {
    let session = start_session(TestOptions::default());
    let mut events = session.handle.subscribe();
    session.handle.set_hands_free(true).await.unwrap();

    assert!(!session.handle.respond_to_inactivity(true).await.unwrap());

    tokio::time::sleep(PROMPT_AFTER).await;
    assert!(session.handle.respond_to_inactivity(true).await.unwrap());

    tokio::time::sleep(DISABLE_AFTER * 2).await;
    let snapshot = session.handle.status().await.unwrap();
    assert!(!snapshot.inactivity_prompt_open);
    assert_eq!(snapshot.hands_free, HandsFreeMode::Armed);
    assert!(session.preferences.hands_free_enabled().unwrap());
    assert!(drain(&mut events).contains(&PresentationEvent::InactivityResolved {
        kept_enabled: true
    }));
}

#[tokio::test(start_paused = true)]
async fn declining_at_the_prompt_turns_hands_free_off() {
    let session = start_session(TestOptions::default());
    session.handle.set_hands_free(true).await.unwrap();

    tokio::time::sleep(PROMPT_AFTER).await;
    assert!(session.handle.respond_to_inactivity(false).await.unwrap());

    let snapshot = session.handle.status().await.unwrap();
    assert_eq!(snapshot.hands_free, HandsFreeMode::Disabled);
    assert!(!session.preferences.hands_free_enabled().unwrap());
}

#[tokio::test(start_paused = true)]
async fn user_activity_postpones_the_prompt() {
    let session = start_session(TestOptions::default());
    session.handle.set_hands_free(true).await.unwrap();

    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    session.handle.activity().record_activity();
    tokio::time::sleep(Duration::from_secs(20 * 60)).await;

    let snapshot = session.handle.status().await.unwrap();
    assert!(!snapshot.inactivity_prompt_open);
    assert_eq!(snapshot.hands_free, HandsFreeMode::Armed);
}

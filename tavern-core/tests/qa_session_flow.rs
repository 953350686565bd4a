//! QA tests for the full session flow, scripted against a mock provider.
//!
//! These tests verify the session surface works end to end:
//! - Multi-turn play with state commands
//! - Memory checkpoints holding and releasing a turn
//! - Cancellation leaving no trace
//! - Reroll and unreadable-reply handling
//!
//! Run with: `cargo test -p tavern-core --test qa_session_flow`

use tavern_core::testing::{narration_reply, MockProvider};
use tavern_core::{GameSession, LogKind, Settings, SessionError, TurnError, TurnReport, WorldState};

fn quiet_settings() -> Settings {
    Settings {
        background_pre_update: false,
        ..Settings::default()
    }
}

fn committed(report: TurnReport) -> tavern_core::TurnOutcome {
    match report {
        TurnReport::Committed(outcome) => outcome,
        TurnReport::HeldForMemory(checkpoint) => {
            panic!("expected a committed turn, got checkpoint {checkpoint:?}")
        }
    }
}

#[tokio::test]
async fn test_three_turns_with_state_commands() {
    let reply_with_coin = serde_json::json!({
        "logs": [{ "sender": "Narrator", "text": "The keeper slides three coppers across." }],
        "shortTerm": "Paid for the room, three coppers back.",
        "tavern_commands": [
            { "verb": "add", "path": "inventory.currency", "value": 3 },
            { "verb": "push", "path": "inventory.items",
              "value": { "name": "room key", "weight": 0.1 } }
        ],
        "action_options": ["Head upstairs", "Order a drink"]
    })
    .to_string();

    let provider = MockProvider::with_responses(vec![
        narration_reply("You push open the tavern door."),
        reply_with_coin,
        narration_reply("The stairs creak underfoot."),
    ]);
    let mut session = GameSession::new(provider, quiet_settings(), WorldState::new("Asha"));

    let _ = committed(session.submit("I step inside").await.unwrap());
    let outcome = committed(session.submit("I pay for a room").await.unwrap());
    let _ = committed(session.submit("I head upstairs").await.unwrap());

    assert_eq!(session.state().turn, 3);
    assert_eq!(session.state().inventory.currency, 3);
    assert!(session.state().inventory.find_by_name("room key").is_some());
    assert_eq!(
        outcome.action_options,
        vec!["Head upstairs".to_string(), "Order a drink".to_string()]
    );
    assert_eq!(session.state().memory.short_term.len(), 3);

    // Player and narrative entries alternate; the narrative ones carry
    // their raw payloads for replay.
    let narrative: Vec<_> = session
        .state()
        .log
        .iter()
        .filter(|e| e.kind == LogKind::Narrative)
        .collect();
    assert_eq!(narrative.len(), 3);
    assert!(narrative.iter().all(|e| e.raw.is_some()));
}

#[tokio::test]
async fn test_memory_checkpoint_holds_exactly_once_over_three_turns() {
    let provider = MockProvider::with_responses(vec![
        narration_reply("Turn one."),
        narration_reply("Turn two."),
        "The morning at the tavern, compressed.".to_string(),
        narration_reply("Turn three."),
    ]);
    let mut settings = quiet_settings();
    settings.short_term_limit = 2;
    let mut session = GameSession::new(provider, settings, WorldState::new("Asha"));

    let _ = committed(session.submit("first").await.unwrap());
    let _ = committed(session.submit("second").await.unwrap());
    assert_eq!(session.state().memory.short_term.len(), 2);

    // Third submit trips the limit: held, not dispatched.
    let report = session.submit("third").await.unwrap();
    assert!(matches!(report, TurnReport::HeldForMemory(_)));
    assert_eq!(session.state().turn, 2);

    let confirmed = session.confirm_memory_digest(None).await.unwrap();
    assert_eq!(
        confirmed.report.digest,
        "The morning at the tavern, compressed."
    );
    assert!(confirmed.report.chained.is_none());
    assert!(!confirmed.report.fell_back);
    let _ = committed(confirmed.turn.unwrap());

    // Exactly one checkpoint: source tier emptied, one digest above it,
    // and the held turn committed.
    assert_eq!(session.state().turn, 3);
    assert_eq!(session.state().memory.medium_term.len(), 1);
    assert_eq!(session.state().memory.short_term.len(), 1);
    assert!(session.pending_checkpoint().is_none());
}

#[tokio::test]
async fn test_summarization_failure_falls_back_and_proceeds() {
    let mut settings = quiet_settings();
    settings.short_term_limit = 1;
    let mut state = WorldState::new("Asha");
    tavern_core::memory::push_short_term(&mut state, "a scene");
    let mut session = GameSession::new(MockProvider::failing(), settings, state);

    let report = session.submit("go on").await.unwrap();
    assert!(matches!(report, TurnReport::HeldForMemory(_)));

    // Summarization fails, the fallback digest applies, and the held
    // turn's dispatch then fails on the same dead provider without
    // losing the digest.
    let result = session.confirm_memory_digest(None).await;
    match result {
        Err(SessionError::Turn(TurnError::Provider(_))) => {}
        other => panic!("expected the held dispatch to fail, got {other:?}"),
    }
    assert_eq!(
        session.state().memory.medium_term,
        vec![tavern_core::memory::FALLBACK_DIGEST.to_string()]
    );
    assert!(session.state().memory.short_term.is_empty());
}

#[tokio::test]
async fn test_cancel_before_dispatch_commits_nothing() {
    let provider = MockProvider::with_responses(vec![narration_reply("Unseen.")]);
    let mut session = GameSession::new(provider, quiet_settings(), WorldState::new("Asha"));
    let log_len = session.state().log.len();
    let turn = session.state().turn;

    session.cancel();
    let result = session.submit("I shout").await;
    assert!(matches!(
        result,
        Err(SessionError::Turn(TurnError::Aborted))
    ));
    assert_eq!(session.state().log.len(), log_len);
    assert_eq!(session.state().turn, turn);

    // The session recovers cleanly.
    let report = session.submit("I shout").await.unwrap();
    let _ = committed(report);
    assert_eq!(session.state().turn, 1);
}

#[tokio::test]
async fn test_unreadable_reply_then_reroll() {
    let provider = MockProvider::with_responses(vec![
        "The narrator rambles outside the contract.".to_string(),
        narration_reply("A proper scene, at last."),
    ]);
    let mut session = GameSession::new(provider, quiet_settings(), WorldState::new("Asha"));

    let outcome = committed(session.submit("I listen").await.unwrap());
    assert!(outcome.parse_failed);
    assert_eq!(session.state().turn, 0);
    let system_entry = session
        .state()
        .log
        .iter()
        .find(|e| e.kind == LogKind::System)
        .expect("system entry for the unreadable reply");
    assert!(system_entry.raw.as_deref().unwrap().contains("rambles"));

    // The player entry is still there, so the same input can go again.
    let outcome = committed(session.submit("I listen").await.unwrap());
    assert!(!outcome.parse_failed);
    assert_eq!(session.state().turn, 1);
}

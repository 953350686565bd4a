//! Turn orchestration.
//!
//! One turn is: snapshot, append the player entry, assemble context,
//! dispatch the narrator call, parse the reply, apply its state commands,
//! append narrative entries, record short-term memory, advance the turn
//! counter. Commit is all-or-nothing with two carve-outs: an unreadable
//! reply keeps the player entry and surfaces a system entry carrying the
//! raw payload, and a failed batch commit keeps the narration but skips
//! the state update. An aborted call commits nothing at all.

use crate::context::{AssembledContext, ContextRegistry, RenderContext};
use crate::memory;
use crate::mutation::{self, InstructionOutcome, MutationError};
use crate::parser::{self, ProviderReply};
use crate::provider::{CallOptions, Provider, ProviderError};
use crate::settings::Settings;
use crate::state::{LogEntry, LogKind, WorldState};
use llm::AbortHandle;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Turn aborted")]
    Aborted,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Where the orchestrator is in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    /// A memory checkpoint holds the turn until the digest is confirmed.
    AwaitingMemoryCheckpoint,
    Dispatched,
    Streaming,
    Committing,
}

/// What a committed (or partially committed) turn produced.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Ids of the narrative log entries appended this turn.
    pub narrative: Vec<Uuid>,
    /// Per-instruction results from the state command batch.
    pub commands: Vec<InstructionOutcome>,
    /// Suggested follow-up actions from the reply, if any.
    pub action_options: Vec<String>,
    /// True when the reply could not be parsed and the turn did not commit.
    pub parse_failed: bool,
    /// Description of any JSON repair that was needed.
    pub repair_note: Option<String>,
}

const MAX_SHORT_TERM_FALLBACK_CHARS: usize = 200;

/// Drives single turns against a provider. Holds the module registry and
/// the current phase; all state lives in the caller's [`WorldState`].
pub struct TurnOrchestrator {
    registry: ContextRegistry,
    phase: TurnPhase,
}

impl Default for TurnOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnOrchestrator {
    pub fn new() -> Self {
        Self {
            registry: ContextRegistry::with_defaults(),
            phase: TurnPhase::Idle,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: TurnPhase) {
        self.phase = phase;
    }

    pub fn registry_mut(&mut self) -> &mut ContextRegistry {
        &mut self.registry
    }

    /// Assemble the prompt for the given input without dispatching.
    pub fn assemble(
        &self,
        state: &WorldState,
        settings: &Settings,
        command_history: &[String],
        user_input: &str,
    ) -> AssembledContext {
        let ctx = RenderContext {
            state,
            settings,
            command_history,
            user_input,
        };
        self.registry.assemble(&ctx)
    }

    /// Run one full turn.
    ///
    /// `hint` is an optional concurrent-activity note appended to the
    /// player's message. `on_text` observes accumulated streamed text when
    /// streaming is enabled. On [`TurnError`] the log is rolled back to its
    /// pre-turn length and the turn counter is untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<P: Provider>(
        &mut self,
        provider: &P,
        settings: &Settings,
        state: &mut WorldState,
        command_history: &[String],
        user_input: &str,
        hint: Option<&str>,
        abort: AbortHandle,
        on_text: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<TurnOutcome, TurnError> {
        let pre_len = state.log.len();
        let snapshot = state.snapshot();
        let turn = state.turn;

        // Context renders before the player entry lands so the new input
        // appears once, in the player block.
        let assembled = self.assemble(state, settings, command_history, user_input);
        let memory_block = memory::render_memory(state, settings);
        let mut user = format!(
            "{}\n\n{memory_block}\n\n## Player\n{user_input}",
            assembled.context
        );

        let player_name = state.character.name.clone();
        let _ = state.push_log(LogEntry::new(LogKind::Player, player_name, user_input, turn));
        if let Some(hint) = hint {
            user.push_str("\n\n");
            user.push_str(hint);
        }

        self.phase = if settings.streaming {
            TurnPhase::Streaming
        } else {
            TurnPhase::Dispatched
        };
        // The narrator always speaks through the unified endpoint.
        let endpoint = &settings.endpoints.unified;
        let options = CallOptions {
            json: true,
            stream: settings.streaming,
            on_text,
            abort,
        };

        let completion = match provider
            .generate(endpoint, &assembled.system, &user, options)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                // Nothing committed: the player entry is rolled back too.
                state.log.truncate(pre_len);
                self.phase = TurnPhase::Idle;
                return Err(match e {
                    ProviderError::Aborted => TurnError::Aborted,
                    other => TurnError::Provider(other),
                });
            }
        };

        self.phase = TurnPhase::Committing;
        let outcome = self.commit(state, snapshot, turn, completion.id, completion.text);
        self.phase = TurnPhase::Idle;
        Ok(outcome)
    }

    /// Parse and commit a raw reply against the state.
    ///
    /// Exposed separately so reroll and edit-and-replay can re-run commit
    /// with a stored raw payload.
    pub fn commit(
        &mut self,
        state: &mut WorldState,
        snapshot: Box<WorldState>,
        turn: u64,
        response_id: Option<String>,
        raw: String,
    ) -> TurnOutcome {
        let thinking = parser::extract_thinking(&raw);

        let parsed = match parser::parse(&thinking.remainder) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "reply unreadable; holding turn open");
                let mut entry = LogEntry::new(
                    LogKind::System,
                    "system",
                    format!("The narrator's reply could not be read ({e}). Raw text kept; try again or reroll."),
                    turn,
                );
                entry.raw = Some(raw);
                entry.reasoning = thinking.trace;
                let _ = state.push_log(entry);
                return TurnOutcome {
                    parse_failed: true,
                    ..TurnOutcome::default()
                };
            }
        };
        let repair_note = parsed.repair_note.clone();
        if parsed.repaired {
            debug!(note = repair_note.as_deref().unwrap_or(""), "reply repaired");
        }

        let reply = match ProviderReply::from_value(parsed.value) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "reply parsed but did not match the contract");
                let mut entry = LogEntry::new(
                    LogKind::System,
                    "system",
                    format!("The narrator's reply did not match the expected shape ({e})."),
                    turn,
                );
                entry.raw = Some(raw);
                let _ = state.push_log(entry);
                return TurnOutcome {
                    parse_failed: true,
                    repair_note,
                    ..TurnOutcome::default()
                };
            }
        };

        let commands = match mutation::apply_batch(state, &reply.commands) {
            Ok(outcomes) => outcomes,
            Err(e @ MutationError::Serialization(_)) => {
                // Narration stands; the state update alone is dropped.
                warn!(error = %e, "state command batch did not commit");
                let _ = state.push_log(LogEntry::new(
                    LogKind::System,
                    "system",
                    format!("World update failed and was skipped: {e}"),
                    turn,
                ));
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "state command batch rejected");
                Vec::new()
            }
        };

        let mut narrative = Vec::with_capacity(reply.logs.len());
        for (index, log) in reply.logs.iter().enumerate() {
            let mut entry = LogEntry::new(LogKind::Narrative, log.sender.clone(), log.text.clone(), turn);
            if index == 0 {
                entry.raw = Some(raw.clone());
                entry.reasoning = thinking.trace.clone();
                entry.response_id = response_id.clone();
                entry.snapshot = Some(snapshot.clone());
            }
            narrative.push(state.push_log(entry).id);
        }

        match (&reply.short_term, reply.logs.first()) {
            (Some(content), _) if !content.trim().is_empty() => {
                memory::push_short_term(state, content.trim());
            }
            (_, Some(first)) => {
                memory::push_short_term(state, truncate_chars(&first.text, MAX_SHORT_TERM_FALLBACK_CHARS));
            }
            _ => {}
        }

        state.turn += 1;
        info!(
            turn = state.turn,
            narrative = narrative.len(),
            commands = commands.len(),
            "turn committed"
        );

        TurnOutcome {
            narrative,
            commands,
            action_options: reply.action_options,
            parse_failed: false,
            repair_note,
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('\u{2026}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    fn reply(narration: &str) -> String {
        format!(
            "{{\"logs\": [{{\"sender\": \"Narrator\", \"text\": \"{narration}\"}}], \
             \"shortTerm\": \"A quiet moment.\", \
             \"tavern_commands\": [{{\"verb\": \"add\", \"path\": \"character.experience\", \"value\": 5}}], \
             \"action_options\": [\"Look around\"]}}"
        )
    }

    #[tokio::test]
    async fn test_committed_turn_advances_everything() {
        let mut state = WorldState::new("Asha");
        let settings = Settings::default();
        let provider = MockProvider::with_responses(vec![reply("The taproom hushes.")]);
        let mut orchestrator = TurnOrchestrator::new();

        let outcome = orchestrator
            .run(
                &provider,
                &settings,
                &mut state,
                &[],
                "I step inside",
                None,
                AbortHandle::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(state.turn, 1);
        assert_eq!(outcome.narrative.len(), 1);
        assert!(!outcome.parse_failed);
        assert_eq!(outcome.action_options, vec!["Look around".to_string()]);
        assert_eq!(state.character.experience, 5);
        assert_eq!(state.memory.short_term.len(), 1);
        assert_eq!(state.memory.short_term[0].content, "A quiet moment.");

        // Player entry then narrative entry, with provenance on the latter.
        assert_eq!(state.log.len(), 2);
        assert_eq!(state.log[0].kind, LogKind::Player);
        assert_eq!(state.log[1].kind, LogKind::Narrative);
        assert!(state.log[1].raw.is_some());
        assert!(state.log[1].snapshot.is_some());
        assert_eq!(state.log[1].response_id.as_deref(), Some("mock-1"));
        assert_eq!(orchestrator.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_streamed_turn_keeps_response_id() {
        let mut state = WorldState::new("Asha");
        let mut settings = Settings::default();
        settings.streaming = true;
        let provider = MockProvider::with_responses(vec![reply("The taproom hushes.")]);
        let mut orchestrator = TurnOrchestrator::new();

        orchestrator
            .run(
                &provider,
                &settings,
                &mut state,
                &[],
                "I step inside",
                None,
                AbortHandle::new(),
                None,
            )
            .await
            .unwrap();

        assert!(provider.calls()[0].stream);
        assert_eq!(state.log[1].kind, LogKind::Narrative);
        assert_eq!(state.log[1].response_id.as_deref(), Some("mock-1"));
    }

    #[tokio::test]
    async fn test_unreadable_reply_holds_turn_open() {
        let mut state = WorldState::new("Asha");
        let settings = Settings::default();
        let provider = MockProvider::with_responses(vec!["not json at all".to_string()]);
        let mut orchestrator = TurnOrchestrator::new();

        let outcome = orchestrator
            .run(
                &provider,
                &settings,
                &mut state,
                &[],
                "I step inside",
                None,
                AbortHandle::new(),
                None,
            )
            .await
            .unwrap();

        assert!(outcome.parse_failed);
        assert_eq!(state.turn, 0);
        assert_eq!(state.memory.short_term.len(), 0);
        // Player entry stays, plus a system entry carrying the raw text.
        assert_eq!(state.log.len(), 2);
        assert_eq!(state.log[1].kind, LogKind::System);
        assert_eq!(state.log[1].raw.as_deref(), Some("not json at all"));
    }

    #[tokio::test]
    async fn test_aborted_turn_commits_nothing() {
        let mut state = WorldState::new("Asha");
        let settings = Settings::default();
        let provider = MockProvider::with_responses(vec![reply("Never seen.")]);
        let mut orchestrator = TurnOrchestrator::new();

        let abort = AbortHandle::new();
        abort.abort();
        let result = orchestrator
            .run(
                &provider,
                &settings,
                &mut state,
                &[],
                "I step inside",
                None,
                abort,
                None,
            )
            .await;

        assert!(matches!(result, Err(TurnError::Aborted)));
        assert_eq!(state.turn, 0);
        assert!(state.log.is_empty());
        assert_eq!(orchestrator.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_fenced_reply_is_repaired_and_committed() {
        let mut state = WorldState::new("Asha");
        let settings = Settings::default();
        let fenced = format!("```json\n{}\n```", reply("The fire crackles."));
        let provider = MockProvider::with_responses(vec![fenced]);
        let mut orchestrator = TurnOrchestrator::new();

        let outcome = orchestrator
            .run(
                &provider,
                &settings,
                &mut state,
                &[],
                "I warm my hands",
                None,
                AbortHandle::new(),
                None,
            )
            .await
            .unwrap();

        assert!(!outcome.parse_failed);
        assert!(outcome.repair_note.is_some());
        assert_eq!(state.turn, 1);
    }

    #[test]
    fn test_reasoning_blocks_are_extracted_not_narrated() {
        let mut state = WorldState::new("Asha");
        let mut orchestrator = TurnOrchestrator::new();
        let snapshot = state.snapshot();

        let raw = format!("<plan>consider the stakes</plan>{}", reply("The door opens."));
        let outcome = orchestrator.commit(&mut state, snapshot, 0, None, raw);

        assert!(!outcome.parse_failed);
        let narrated = &state.log[0];
        assert_eq!(narrated.text, "The door opens.");
        assert_eq!(
            narrated.reasoning.as_deref(),
            Some("[plan]\nconsider the stakes")
        );
    }
}

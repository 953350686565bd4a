//! Session facade.
//!
//! [`GameSession`] ties the engine together: turn orchestration, the
//! memory checkpoint state machine, background NPC simulation, the
//! intersection detector, local item actions, and save/load. It owns the
//! [`WorldState`] outright; callers reach state through `state()` and
//! mutate only through session operations.

use crate::intersect;
use crate::memory::{Checkpoint, CheckpointReport, MemoryError, MemoryManager};
use crate::mutation::{self, Instruction, InstructionOutcome, MutationError, Verb};
use crate::npc::{NpcRunSummary, NpcScheduler, NpcTrigger};
use crate::persist::{self, PersistError, SaveKind, SavedGame};
use crate::provider::Provider;
use crate::settings::Settings;
use crate::state::{LogEntry, LogKind, WorldState};
use crate::turn::{TurnError, TurnOrchestrator, TurnOutcome, TurnPhase};
use llm::AbortHandle;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Log entry {0} not found or carries no snapshot")]
    NoSnapshot(Uuid),

    #[error("No item named '{0}'")]
    NoSuchItem(String),

    #[error("No save directory configured")]
    NoSaveDir,
}

/// What a submitted input produced.
#[derive(Debug)]
pub enum TurnReport {
    /// A memory tier is at capacity; the input is held until the digest is
    /// confirmed through [`GameSession::confirm_memory_digest`].
    HeldForMemory(Checkpoint),
    Committed(TurnOutcome),
}

/// Result of confirming a memory digest.
#[derive(Debug)]
pub struct ConfirmOutcome {
    pub report: CheckpointReport,
    /// The held turn's report, when no further checkpoint chained and the
    /// held input could be dispatched.
    pub turn: Option<TurnReport>,
}

pub struct GameSession<P: Provider> {
    provider: P,
    settings: Settings,
    state: WorldState,
    orchestrator: TurnOrchestrator,
    memory: MemoryManager,
    scheduler: NpcScheduler,
    command_history: Vec<String>,
    held_input: Option<String>,
    abort: AbortHandle,
    save_dir: Option<PathBuf>,
}

impl<P: Provider> GameSession<P> {
    pub fn new(provider: P, settings: Settings, state: WorldState) -> Self {
        Self {
            provider,
            settings,
            state,
            orchestrator: TurnOrchestrator::new(),
            memory: MemoryManager::new(),
            scheduler: NpcScheduler::new(),
            command_history: Vec::new(),
            held_input: None,
            abort: AbortHandle::new(),
            save_dir: None,
        }
    }

    /// Enable auto-saves and slot-based manual saves under `dir`.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn phase(&self) -> TurnPhase {
        if self.memory.pending().is_some() {
            TurnPhase::AwaitingMemoryCheckpoint
        } else {
            self.orchestrator.phase()
        }
    }

    /// The pending memory checkpoint, if one holds the turn.
    pub fn pending_checkpoint(&self) -> Option<&Checkpoint> {
        self.memory.pending()
    }

    /// Handle that cancels the current (or next) dispatched turn.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Cancel the in-flight turn. The awaiting `submit` returns
    /// [`TurnError::Aborted`] and nothing commits.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Submit a player input for one turn.
    pub async fn submit(&mut self, input: &str) -> Result<TurnReport, SessionError> {
        self.submit_observed(input, None).await
    }

    /// Submit with a streaming observer. The observer receives accumulated
    /// narration text when streaming is enabled in settings.
    pub async fn submit_observed(
        &mut self,
        input: &str,
        on_text: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<TurnReport, SessionError> {
        // A tier at capacity holds the turn before anything dispatches.
        if let Some(checkpoint) = self.memory.begin_if_needed(&self.state, &self.settings) {
            let checkpoint = checkpoint.clone();
            info!("holding input for memory checkpoint confirmation");
            self.held_input = Some(input.to_string());
            return Ok(TurnReport::HeldForMemory(checkpoint));
        }
        self.dispatch(input, on_text).await
    }

    async fn dispatch(
        &mut self,
        input: &str,
        on_text: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<TurnReport, SessionError> {
        if self.settings.background_pre_update && NpcScheduler::deadline_due(&self.state) {
            if self
                .scheduler
                .request(NpcTrigger::Deadline, None)
            {
                let _ = self
                    .scheduler
                    .run(&self.provider, &self.settings, &mut self.state)
                    .await;
            }
        }

        let hint = {
            let entries = self.state.world.npc_tracking.clone();
            intersect::build_hint(
                &self.provider,
                &self.settings,
                input,
                &entries,
                &self.state.clock,
            )
            .await
        };

        let abort = self.abort.clone();
        let result = self
            .orchestrator
            .run(
                &self.provider,
                &self.settings,
                &mut self.state,
                &self.command_history,
                input,
                hint.as_deref(),
                abort,
                on_text,
            )
            .await;
        self.abort = AbortHandle::new();

        let outcome = result?;
        self.command_history.push(input.to_string());

        if !outcome.parse_failed {
            // Audit entry lands only on commit so a cancelled turn leaves
            // the log untouched.
            if let Some(hint) = hint {
                let turn = self.state.turn.saturating_sub(1);
                let _ = self.state.push_log(LogEntry::new(
                    LogKind::Intersection,
                    "system",
                    hint,
                    turn,
                ));
            }
            self.autosave();
        }
        Ok(TurnReport::Committed(outcome))
    }

    /// Confirm (or hand-edit) the pending memory digest. When no further
    /// checkpoint chains, the held input dispatches immediately.
    pub async fn confirm_memory_digest(
        &mut self,
        edited: Option<String>,
    ) -> Result<ConfirmOutcome, SessionError> {
        let report = self
            .memory
            .confirm(&self.provider, &self.settings, &mut self.state, edited)
            .await?;

        if self.memory.pending().is_some() {
            // Chained checkpoint; the input stays held.
            return Ok(ConfirmOutcome { report, turn: None });
        }

        let turn = match self.held_input.take() {
            Some(input) => Some(self.dispatch(&input, None).await?),
            None => None,
        };
        Ok(ConfirmOutcome { report, turn })
    }

    // ========================================================================
    // Replay operations
    // ========================================================================

    /// Discard the last committed turn and ask the narrator again with the
    /// same input.
    pub async fn reroll_last(&mut self) -> Result<TurnReport, SessionError> {
        let (entry_id, input) = self.last_replayable()?;
        self.restore_snapshot(entry_id)?;
        if self.command_history.last().map(String::as_str) == Some(input.as_str()) {
            let _ = self.command_history.pop();
        }
        self.dispatch(&input, None).await
    }

    /// Rewind to the state as of just before the given narrative entry.
    pub fn rewind_to(&mut self, entry_id: Uuid) -> Result<(), SessionError> {
        self.restore_snapshot(entry_id)?;
        info!(turn = self.state.turn, "rewound");
        Ok(())
    }

    /// Replace a past narrator reply and deterministically replay every
    /// later turn from its stored raw payload. No provider calls are made.
    pub fn edit_response(&mut self, entry_id: Uuid, new_raw: String) -> Result<(), SessionError> {
        let index = self
            .state
            .log
            .iter()
            .position(|e| e.id == entry_id && e.snapshot.is_some())
            .ok_or(SessionError::NoSnapshot(entry_id))?;
        let turn = self.state.log[index].turn;
        let input = self
            .player_input_for_turn(turn)
            .ok_or(SessionError::NoSnapshot(entry_id))?;
        let tail = self.replay_tail(index);

        self.restore_snapshot(entry_id)?;
        // The hand-edited reply no longer matches any provider payload, so
        // its id does not carry over; the replayed tail keeps its ids.
        self.replay_turn(&input, new_raw, None);
        for (replay_input, raw, response_id) in tail {
            self.replay_turn(&replay_input, raw, response_id);
        }
        Ok(())
    }

    /// Commit one stored raw reply against the current state.
    fn replay_turn(&mut self, input: &str, raw: String, response_id: Option<String>) {
        let turn = self.state.turn;
        let snapshot = self.state.snapshot();
        let player_name = self.state.character.name.clone();
        let _ = self
            .state
            .push_log(LogEntry::new(LogKind::Player, player_name, input, turn));
        let outcome = self
            .orchestrator
            .commit(&mut self.state, snapshot, turn, response_id, raw);
        if outcome.parse_failed {
            warn!(turn, "replayed payload no longer parses");
        }
    }

    /// Id and player input of the most recent turn that can be replayed.
    fn last_replayable(&self) -> Result<(Uuid, String), SessionError> {
        let entry = self
            .state
            .log
            .iter()
            .rev()
            .find(|e| e.kind == LogKind::Narrative && e.snapshot.is_some())
            .ok_or(SessionError::NoSnapshot(Uuid::nil()))?;
        let input = self
            .player_input_for_turn(entry.turn)
            .ok_or(SessionError::NoSnapshot(entry.id))?;
        Ok((entry.id, input))
    }

    fn player_input_for_turn(&self, turn: u64) -> Option<String> {
        self.state
            .log
            .iter()
            .rev()
            .find(|e| e.kind == LogKind::Player && e.turn == turn)
            .map(|e| e.text.clone())
    }

    /// Stored `(player input, raw payload, response id)` for every committed
    /// turn after `index`, oldest first.
    fn replay_tail(&self, index: usize) -> Vec<(String, String, Option<String>)> {
        let base_turn = self.state.log[index].turn;
        let mut tail = Vec::new();
        for entry in &self.state.log[index + 1..] {
            if entry.kind != LogKind::Narrative || entry.turn <= base_turn {
                continue;
            }
            if let Some(raw) = &entry.raw {
                if let Some(input) = self.player_input_for_turn(entry.turn) {
                    tail.push((input, raw.clone(), entry.response_id.clone()));
                }
            }
        }
        tail
    }

    fn restore_snapshot(&mut self, entry_id: Uuid) -> Result<(), SessionError> {
        let snapshot = self
            .state
            .log
            .iter()
            .find(|e| e.id == entry_id)
            .and_then(|e| e.snapshot.clone())
            .ok_or(SessionError::NoSnapshot(entry_id))?;
        self.state = *snapshot;
        Ok(())
    }

    // ========================================================================
    // Local item actions
    // ========================================================================

    /// Equip or unequip an inventory item. Applied through the mutation
    /// engine so derived stats recalculate.
    pub fn equip_item(
        &mut self,
        name: &str,
        equipped: bool,
    ) -> Result<Vec<InstructionOutcome>, SessionError> {
        let index = self
            .state
            .inventory
            .items
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| SessionError::NoSuchItem(name.to_string()))?;
        let instruction = Instruction::new(
            Verb::Set,
            format!("inventory.items[{index}].equipped"),
            json!(equipped),
        );
        Ok(mutation::apply_batch(&mut self.state, &[instruction])?)
    }

    /// Consume one of an item: decrement its stack, or delete the stack
    /// when it was the last one.
    pub fn use_item(&mut self, name: &str) -> Result<Vec<InstructionOutcome>, SessionError> {
        let (index, quantity) = self
            .state
            .inventory
            .items
            .iter()
            .position(|i| i.name == name)
            .map(|index| (index, self.state.inventory.items[index].quantity))
            .ok_or_else(|| SessionError::NoSuchItem(name.to_string()))?;
        let instruction = if quantity > 1 {
            Instruction::new(
                Verb::Add,
                format!("inventory.items[{index}].quantity"),
                json!(-1),
            )
        } else {
            Instruction::new(
                Verb::Delete,
                format!("inventory.items[{index}]"),
                json!(null),
            )
        };
        Ok(mutation::apply_batch(&mut self.state, &[instruction])?)
    }

    // ========================================================================
    // Background NPC simulation
    // ========================================================================

    /// Run the background NPC simulation now, regardless of deadlines.
    pub async fn force_npc_update(&mut self) -> NpcRunSummary {
        let _ = self.scheduler.request(NpcTrigger::Manual, None);
        self.scheduler
            .run(&self.provider, &self.settings, &mut self.state)
            .await
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save into a fixed manual slot.
    pub async fn save_manual(&self, slot: usize) -> Result<PathBuf, SessionError> {
        let dir = self.save_dir.as_ref().ok_or(SessionError::NoSaveDir)?;
        let path = persist::manual_slot_path(dir, slot);
        SavedGame::new(SaveKind::Manual, self.state.clone())
            .save(&path)
            .await?;
        Ok(path)
    }

    /// Replace the session state from a save file. Pending checkpoints,
    /// held input, and command history are discarded.
    pub async fn load(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let saved = SavedGame::load(path).await?;
        self.state = saved.state;
        self.memory = MemoryManager::new();
        self.scheduler = NpcScheduler::new();
        self.held_input = None;
        self.command_history.clear();
        self.orchestrator.set_phase(TurnPhase::Idle);
        Ok(())
    }

    /// Fire-and-forget auto-save of the committed turn.
    fn autosave(&self) {
        let Some(dir) = self.save_dir.clone() else {
            return;
        };
        let saved = SavedGame::new(SaveKind::Auto, self.state.clone());
        let path = persist::auto_slot_path(&dir, self.state.turn);
        tokio::spawn(async move {
            if let Err(e) = saved.save(&path).await {
                warn!(error = %e, path = %path.display(), "auto-save failed");
            }
        });
    }
}

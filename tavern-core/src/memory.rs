//! Tiered memory compaction.
//!
//! History lives in four tiers: instant (derived live from recent log
//! turns), short-term, medium-term, and long-term. When a stored tier
//! reaches its configured limit the manager opens a checkpoint: the
//! triggering turn is held while the user confirms or edits a digest, the
//! tier is summarized and emptied, and the digest moves one tier up. If
//! that tier is now over its own limit, a second checkpoint chains before
//! the held turn finally dispatches. Summarization failure falls back to a
//! fixed digest; the flow never blocks indefinitely.

use crate::provider::{CallOptions, Provider, ProviderError};
use crate::settings::{Capability, Settings};
use crate::state::{iso_now, LogKind, ShortTermEntry, WorldState};
use thiserror::Error;
use tracing::{info, warn};

/// Digest used when the summarization call fails.
pub const FALLBACK_DIGEST: &str =
    "(digest unavailable) A stretch of earlier events was archived without a summary.";

const SUMMARIZE_SYSTEM_PROMPT: &str = "You compact play history for an interactive fiction \
game. Summarize the entries you are given into one dense paragraph, preserving names, \
debts, injuries, promises, and unresolved threads. Reply with the paragraph only.";

/// Errors from memory management.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("No checkpoint is awaiting confirmation")]
    NoPendingCheckpoint,
}

/// The two compacting tier pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPair {
    ShortToMedium,
    MediumToLong,
}

/// Checkpoint lifecycle. `Idle` is represented by the manager holding no
/// checkpoint; `Applied` is the transient result of [`MemoryManager::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    AwaitingConfirmation,
    Summarizing,
}

/// A checkpoint awaiting user confirmation.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub pair: TierPair,
    pub phase: CheckpointPhase,
    /// Draft digest shown to the user for confirmation or editing.
    pub draft: String,
}

/// Outcome of one confirmed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointReport {
    pub pair: TierPair,
    pub digest: String,
    /// True when the fallback digest was used.
    pub fell_back: bool,
    /// Set when applying this digest tipped the next tier over its limit
    /// and a new checkpoint is now awaiting confirmation.
    pub chained: Option<TierPair>,
}

/// Per-session memory tier manager.
#[derive(Debug, Default)]
pub struct MemoryManager {
    pending: Option<Checkpoint>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The checkpoint currently awaiting confirmation, if any.
    pub fn pending(&self) -> Option<&Checkpoint> {
        self.pending.as_ref()
    }

    /// Which tier pair needs compaction, if any. Short-term is checked
    /// first; its digest may then chain into the medium tier.
    pub fn tier_over_limit(state: &WorldState, settings: &Settings) -> Option<TierPair> {
        if state.memory.short_term.len() >= settings.short_term_limit {
            Some(TierPair::ShortToMedium)
        } else if state.memory.medium_term.len() >= settings.medium_term_limit {
            Some(TierPair::MediumToLong)
        } else {
            None
        }
    }

    /// Open a checkpoint if a tier is over its limit. Returns the pending
    /// checkpoint (new or already open).
    pub fn begin_if_needed(
        &mut self,
        state: &WorldState,
        settings: &Settings,
    ) -> Option<&Checkpoint> {
        if self.pending.is_none() {
            if let Some(pair) = Self::tier_over_limit(state, settings) {
                let draft = draft_digest(state, pair);
                info!(?pair, "memory tier at capacity; checkpoint awaiting confirmation");
                self.pending = Some(Checkpoint {
                    pair,
                    phase: CheckpointPhase::AwaitingConfirmation,
                    draft,
                });
            }
        }
        self.pending.as_ref()
    }

    /// Confirm the pending checkpoint and apply it.
    ///
    /// With `edited` the user-authored digest is used verbatim and no
    /// summarization call is made. Otherwise the tier's raw entries are
    /// summarized through the provider; on failure the fixed fallback
    /// digest is used so the held turn can always proceed.
    pub async fn confirm<P: Provider>(
        &mut self,
        provider: &P,
        settings: &Settings,
        state: &mut WorldState,
        edited: Option<String>,
    ) -> Result<CheckpointReport, MemoryError> {
        let mut checkpoint = self.pending.take().ok_or(MemoryError::NoPendingCheckpoint)?;
        checkpoint.phase = CheckpointPhase::Summarizing;

        let entries = tier_entries(state, checkpoint.pair);
        let (digest, fell_back) = match edited {
            Some(text) => (text, false),
            None => match summarize(provider, settings, &entries).await {
                Ok(digest) if !digest.trim().is_empty() => (digest.trim().to_string(), false),
                Ok(_) => (FALLBACK_DIGEST.to_string(), true),
                Err(e) => {
                    warn!(error = %e, "summarization failed; using fallback digest");
                    (FALLBACK_DIGEST.to_string(), true)
                }
            },
        };

        // Apply: empty the source tier, append one digest to the next tier.
        match checkpoint.pair {
            TierPair::ShortToMedium => {
                state.memory.short_term.clear();
                state.memory.medium_term.push(digest.clone());
            }
            TierPair::MediumToLong => {
                state.memory.medium_term.clear();
                state.memory.long_term.push(digest.clone());
            }
        }

        // Chain directly into the next checkpoint when the receiving tier
        // is now over its own limit.
        let chained = match Self::tier_over_limit(state, settings) {
            Some(pair) => {
                let draft = draft_digest(state, pair);
                info!(?pair, "digest tipped next tier over limit; chaining checkpoint");
                self.pending = Some(Checkpoint {
                    pair,
                    phase: CheckpointPhase::AwaitingConfirmation,
                    draft,
                });
                Some(pair)
            }
            None => None,
        };

        Ok(CheckpointReport {
            pair: checkpoint.pair,
            digest,
            fell_back,
            chained,
        })
    }
}

/// Append one short-term entry for a committed turn.
pub fn push_short_term(state: &mut WorldState, content: impl Into<String>) {
    let entry = ShortTermEntry {
        content: content.into(),
        timestamp: iso_now(),
        turn: state.turn,
    };
    state.memory.short_term.push(entry);
}

/// The raw entries a checkpoint would summarize.
fn tier_entries(state: &WorldState, pair: TierPair) -> Vec<String> {
    match pair {
        TierPair::ShortToMedium => state
            .memory
            .short_term
            .iter()
            .map(|e| e.content.clone())
            .collect(),
        TierPair::MediumToLong => state.memory.medium_term.clone(),
    }
}

/// Cheap local draft shown for confirmation before the real summarization
/// runs: the tier's entries as a bullet list, clipped.
fn draft_digest(state: &WorldState, pair: TierPair) -> String {
    let entries = tier_entries(state, pair);
    let mut draft = String::new();
    for entry in entries.iter().take(12) {
        draft.push_str("- ");
        if entry.len() > 120 {
            let clip = entry
                .char_indices()
                .take_while(|(i, _)| *i < 117)
                .map(|(_, c)| c)
                .collect::<String>();
            draft.push_str(&clip);
            draft.push_str("...");
        } else {
            draft.push_str(entry);
        }
        draft.push('\n');
    }
    draft.trim_end().to_string()
}

async fn summarize<P: Provider>(
    provider: &P,
    settings: &Settings,
    entries: &[String],
) -> Result<String, ProviderError> {
    let endpoint = settings.endpoints.for_capability(Capability::World);
    let user = entries.join("\n");
    let completion = provider
        .generate(endpoint, SUMMARIZE_SYSTEM_PROMPT, &user, CallOptions::default())
        .await?;
    Ok(completion.text)
}

/// Render the stored tiers plus the derived instant tier for the prompt.
/// Audit-only log entries never appear here.
pub fn render_memory(state: &WorldState, settings: &Settings) -> String {
    let mut out = String::from("## Memory\n");
    if state.memory.long_term.is_empty()
        && state.memory.medium_term.is_empty()
        && state.memory.short_term.is_empty()
    {
        out.push_str("(no long-range memory yet)\n");
    }
    for entry in &state.memory.long_term {
        out.push_str("Long ago: ");
        out.push_str(entry);
        out.push('\n');
    }
    for entry in &state.memory.medium_term {
        out.push_str("Earlier: ");
        out.push_str(entry);
        out.push('\n');
    }
    for entry in &state.memory.short_term {
        out.push_str(&format!("[turn {}] {}\n", entry.turn, entry.content));
    }

    out.push_str("\n## Recent Scene\n");
    let recent = state.recent_log(settings.log_render_limit);
    if recent.is_empty() {
        out.push_str("(the story has not begun)\n");
    }
    for entry in recent {
        if matches!(entry.kind, LogKind::Player | LogKind::Narrative) {
            out.push_str(&format!("{}: {}\n", entry.sender, entry.text));
        }
    }
    out.trim_end().to_string()
}

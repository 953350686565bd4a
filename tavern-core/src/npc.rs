//! Background NPC simulation.
//!
//! Off-screen NPCs advance through a dedicated provider call rather than
//! the main narration turn. Runs are single-flight: a trigger arriving
//! while one run is active coalesces into at most one pending run (latest
//! request wins, but a carried intersection hint survives coalescing),
//! executed immediately after the active run finishes. A successful run
//! replaces the tracking array wholesale; a failed or timed-out run
//! commits nothing and surfaces one de-duplicated status log line instead.

use crate::parser;
use crate::provider::{CallOptions, Provider};
use crate::settings::{Capability, Settings};
use crate::state::{LogEntry, LogKind, NpcTrackingEntry, WorldState};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const NPC_SYSTEM_PROMPT: &str = "You simulate the off-screen characters of an interactive \
fiction world. Given the in-game time and each character's current activity, advance their \
activities plausibly. Reply with one JSON object: {\"npc_tracking\": [{\"npc_name\", \
\"title\", \"current_action\", \"location\", \"stage_end\": {\"year\", \"month\", \"day\", \
\"hour\", \"minute\"}, \"progress\"}]}. Keep every character present in the input.";

/// What asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpcTrigger {
    /// Pre-turn deadline check against the in-world clock.
    Deadline,
    /// Reactive check after a clock or tracking change.
    Reactive,
    /// Explicit user request.
    Manual,
}

/// A request coalesced behind the active run.
#[derive(Debug, Clone)]
struct PendingRun {
    trigger: NpcTrigger,
    hint: Option<String>,
}

/// Outcome of [`NpcScheduler::run`].
#[derive(Debug, Clone)]
pub struct NpcRunSummary {
    /// Completed runs, including coalesced follow-ups.
    pub runs: usize,
    /// Tracking entries after the last successful replacement.
    pub tracked: usize,
    /// True when at least one run failed or timed out.
    pub failed: bool,
}

#[derive(Debug, Deserialize)]
struct NpcReply {
    #[serde(default)]
    npc_tracking: Vec<NpcTrackingEntry>,
}

/// Single-flight background scheduler.
#[derive(Debug, Default)]
pub struct NpcScheduler {
    in_flight: bool,
    pending: Option<PendingRun>,
    /// Last failure surfaced, as (turn, message), for de-duplication.
    last_failure: Option<(u64, String)>,
}

impl NpcScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the pre-turn deadline check should fire: some tracked stage
    /// has reached its expected end, or nothing is tracked yet.
    pub fn deadline_due(state: &WorldState) -> bool {
        let tracking = &state.world.npc_tracking;
        if tracking.is_empty() {
            return true;
        }
        let now = state.clock.total_minutes();
        tracking
            .iter()
            .any(|entry| matches!(entry.stage_end, Some(end) if end.total_minutes() <= now))
    }

    /// Request a run. Returns true when the caller should invoke
    /// [`Self::run`] now; false when the request coalesced behind an
    /// active run. Latest request wins, but an earlier pending hint is
    /// preserved when the newer request carries none.
    pub fn request(&mut self, trigger: NpcTrigger, hint: Option<String>) -> bool {
        if self.in_flight {
            let carried = hint.or_else(|| self.pending.take().and_then(|p| p.hint));
            debug!(?trigger, "coalescing NPC run behind active run");
            self.pending = Some(PendingRun {
                trigger,
                hint: carried,
            });
            false
        } else {
            let carried = hint.or_else(|| self.pending.take().and_then(|p| p.hint));
            self.pending = Some(PendingRun {
                trigger,
                hint: carried,
            });
            true
        }
    }

    /// The intersection hint carried by the pending request, if any.
    pub fn pending_hint(&self) -> Option<&str> {
        self.pending.as_ref().and_then(|p| p.hint.as_deref())
    }

    /// Execute the pending run, plus any run that coalesces in behind it.
    pub async fn run<P: Provider>(
        &mut self,
        provider: &P,
        settings: &Settings,
        state: &mut WorldState,
    ) -> NpcRunSummary {
        let mut summary = NpcRunSummary {
            runs: 0,
            tracked: state.world.npc_tracking.len(),
            failed: false,
        };

        while let Some(pending) = self.pending.take() {
            self.in_flight = true;
            let result = self.run_once(provider, settings, state, &pending).await;
            self.in_flight = false;
            summary.runs += 1;
            match result {
                Ok(tracked) => summary.tracked = tracked,
                Err(message) => {
                    summary.failed = true;
                    self.push_failure_log(state, message);
                }
            }
        }

        summary
    }

    async fn run_once<P: Provider>(
        &mut self,
        provider: &P,
        settings: &Settings,
        state: &mut WorldState,
        pending: &PendingRun,
    ) -> Result<usize, String> {
        let endpoint = settings.endpoints.for_capability(Capability::NpcBrain);
        let user = build_npc_prompt(state, pending.hint.as_deref());
        let options = CallOptions {
            json: true,
            ..CallOptions::default()
        };

        let call = provider.generate(endpoint, NPC_SYSTEM_PROMPT, &user, options);
        let completion =
            match tokio::time::timeout(Duration::from_secs(settings.npc_run_timeout_secs), call)
                .await
            {
                Ok(Ok(completion)) => completion,
                Ok(Err(e)) => return Err(format!("NPC update failed: {e}")),
                Err(_) => {
                    warn!(
                        timeout_secs = settings.npc_run_timeout_secs,
                        "NPC run hit its time ceiling; abandoning"
                    );
                    return Err("NPC update timed out".to_string());
                }
            };

        let parsed = parser::parse(&completion.text)
            .map_err(|e| format!("NPC update unreadable: {e}"))?;
        let reply: NpcReply = serde_json::from_value(parsed.value)
            .map_err(|e| format!("NPC update malformed: {e}"))?;

        info!(
            trigger = ?pending.trigger,
            tracked = reply.npc_tracking.len(),
            "NPC tracking replaced"
        );
        state.world.npc_tracking = reply.npc_tracking;
        Ok(state.world.npc_tracking.len())
    }

    /// Append a status line for a failed run, at most once per turn per
    /// distinct message.
    fn push_failure_log(&mut self, state: &mut WorldState, message: String) {
        let key = (state.turn, message.clone());
        if self.last_failure.as_ref() == Some(&key) {
            debug!("suppressing duplicate NPC failure log line");
            return;
        }
        self.last_failure = Some(key);
        let turn = state.turn;
        let _ = state.push_log(LogEntry::new(LogKind::System, "system", message, turn));
    }
}

fn build_npc_prompt(state: &WorldState, hint: Option<&str>) -> String {
    let mut out = format!("In-game time: {}\n", state.clock);
    if state.world.region.is_empty() {
        out.push_str("Region: (unknown)\n");
    } else {
        out.push_str(&format!("Region: {}\n", state.world.region));
    }
    out.push_str("Tracked characters:\n");
    if state.world.npc_tracking.is_empty() {
        out.push_str("(none tracked yet; introduce 2-4 plausible locals)\n");
    }
    for entry in &state.world.npc_tracking {
        let end = entry
            .stage_end
            .map(|clock| format!(" until {clock}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "- {} ({}): {} at {}{end}, {:.0}% done\n",
            entry.npc_name, entry.title, entry.current_action, entry.location,
            entry.progress * 100.0
        ));
    }
    if let Some(hint) = hint {
        out.push_str("\nThe player's latest action may intersect:\n");
        out.push_str(hint);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GameClock;
    use crate::testing::MockProvider;

    fn tracked_state(end: GameClock) -> WorldState {
        let mut state = WorldState::new("Asha");
        state.world.npc_tracking.push(NpcTrackingEntry {
            npc_name: "Marla".to_string(),
            current_action: "haggling".to_string(),
            location: "the granary".to_string(),
            stage_end: Some(end),
            progress: 0.3,
            ..NpcTrackingEntry::default()
        });
        state
    }

    fn tracking_reply(name: &str) -> String {
        format!(
            "{{\"npc_tracking\": [{{\"npc_name\": \"{name}\", \"current_action\": \"walking home\", \
             \"location\": \"the mill road\", \"progress\": 0.1}}]}}"
        )
    }

    #[test]
    fn test_deadline_due() {
        let mut state = tracked_state(GameClock::new(1021, 4, 12, 8, 0));
        state.clock = GameClock::new(1021, 4, 12, 9, 0);
        assert!(NpcScheduler::deadline_due(&state));

        state.world.npc_tracking[0].stage_end = Some(GameClock::new(1021, 4, 12, 18, 0));
        assert!(!NpcScheduler::deadline_due(&state));

        state.world.npc_tracking.clear();
        assert!(NpcScheduler::deadline_due(&state));
    }

    #[tokio::test]
    async fn test_success_replaces_tracking_wholesale() {
        let mut state = tracked_state(GameClock::new(1021, 4, 12, 8, 0));
        let settings = Settings::default();
        let provider = MockProvider::with_responses(vec![tracking_reply("Tobin")]);

        let mut scheduler = NpcScheduler::new();
        assert!(scheduler.request(NpcTrigger::Manual, None));
        let summary = scheduler.run(&provider, &settings, &mut state).await;

        assert_eq!(summary.runs, 1);
        assert!(!summary.failed);
        assert_eq!(state.world.npc_tracking.len(), 1);
        assert_eq!(state.world.npc_tracking[0].npc_name, "Tobin");
    }

    #[tokio::test]
    async fn test_failure_logs_once_and_leaves_tracking() {
        let mut state = tracked_state(GameClock::new(1021, 4, 12, 8, 0));
        let settings = Settings::default();
        let provider = MockProvider::failing();

        let mut scheduler = NpcScheduler::new();
        let _ = scheduler.request(NpcTrigger::Deadline, None);
        let summary = scheduler.run(&provider, &settings, &mut state).await;
        assert!(summary.failed);
        assert_eq!(state.world.npc_tracking[0].npc_name, "Marla");
        let system_lines = state
            .log
            .iter()
            .filter(|e| e.kind == LogKind::System)
            .count();
        assert_eq!(system_lines, 1);

        // Same failure in the same turn is de-duplicated.
        let _ = scheduler.request(NpcTrigger::Deadline, None);
        let _ = scheduler.run(&provider, &settings, &mut state).await;
        let system_lines = state
            .log
            .iter()
            .filter(|e| e.kind == LogKind::System)
            .count();
        assert_eq!(system_lines, 1);
    }

    #[tokio::test]
    async fn test_coalesced_request_preserves_hint_and_runs_after() {
        let mut state = tracked_state(GameClock::new(1021, 4, 12, 8, 0));
        let settings = Settings::default();
        let provider = MockProvider::with_responses(vec![
            tracking_reply("Tobin"),
            tracking_reply("Sela"),
        ]);

        let mut scheduler = NpcScheduler::new();
        let _ = scheduler.request(NpcTrigger::Deadline, Some("hint".to_string()));
        // Simulate a trigger landing mid-run: mark in flight, then request.
        scheduler.in_flight = true;
        assert!(!scheduler.request(NpcTrigger::Reactive, None));
        assert_eq!(scheduler.pending_hint(), Some("hint"));
        scheduler.in_flight = false;

        let summary = scheduler.run(&provider, &settings, &mut state).await;
        assert_eq!(summary.runs, 1);
        assert_eq!(state.world.npc_tracking[0].npc_name, "Tobin");
    }

    #[test]
    fn test_idle_rerequest_preserves_hint() {
        let mut scheduler = NpcScheduler::new();
        assert!(scheduler.request(NpcTrigger::Reactive, Some("hint".to_string())));
        // A later trigger before the run starts still carries the hint.
        assert!(scheduler.request(NpcTrigger::Deadline, None));
        assert_eq!(scheduler.pending_hint(), Some("hint"));

        // A newer hint wins over the carried one.
        assert!(scheduler.request(NpcTrigger::Reactive, Some("newer".to_string())));
        assert_eq!(scheduler.pending_hint(), Some("newer"));
    }

    #[tokio::test]
    async fn test_pending_run_executes_after_active_run() {
        // Two requests before in-flight: latest wins, single pending slot.
        let mut state = tracked_state(GameClock::new(1021, 4, 12, 8, 0));
        let settings = Settings::default();
        let provider = MockProvider::with_responses(vec![tracking_reply("Tobin")]);

        let mut scheduler = NpcScheduler::new();
        let _ = scheduler.request(NpcTrigger::Deadline, None);
        let _ = scheduler.request(NpcTrigger::Manual, None);
        let summary = scheduler.run(&provider, &settings, &mut state).await;
        assert_eq!(summary.runs, 1);
        assert_eq!(provider.call_count(), 1);
    }
}

//! Intersection detection between player input and off-screen NPC activity.
//!
//! When the player's free-text action brushes against something a tracked
//! NPC is doing right now, the next narration should acknowledge it. The
//! detector fuzzy-matches input tokens against each tracked NPC's name,
//! title, and location shingles, filters by expected end time, and emits a
//! hint block that is appended to the player's input before context
//! assembly. The hint is also persisted as an audit-only log entry.

use crate::provider::{CallOptions, Provider};
use crate::settings::{Capability, Settings};
use crate::state::{GameClock, NpcTrackingEntry};
use std::collections::HashSet;
use tracing::{debug, warn};

const PRECHECK_SYSTEM_PROMPT: &str = "You referee an interactive fiction game. Given a \
player action and a draft note about concurrent NPC activity, reply with the note (reworded \
if you can improve it) when the action plausibly intersects that activity, or with an empty \
reply when it does not.";

/// Lowercase and strip everything but letters, digits, and spaces.
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Overlapping 3-character shingles of a word (2-character words shingle to
/// themselves). Words shorter than 2 characters produce nothing.
pub fn shingles(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    match chars.len() {
        0 | 1 => Vec::new(),
        2 => vec![word.to_string()],
        n => (0..=n - 3)
            .map(|i| chars[i..i + 3].iter().collect())
            .collect(),
    }
}

/// Direct-match tokens for one tracked NPC: name, name words, and title.
fn name_tokens(entry: &NpcTrackingEntry) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let name = normalize(&entry.npc_name);
    if !name.is_empty() {
        for word in name.split(' ') {
            let _ = tokens.insert(word.to_string());
        }
        let _ = tokens.insert(name);
    }
    let title = normalize(&entry.title);
    if !title.is_empty() {
        let _ = tokens.insert(title);
    }
    tokens
}

/// Whether the input plausibly refers to this NPC: a name/title token
/// appears in the raw or normalized input, or enough of the location's
/// shingles do.
fn matches_entry(raw_input: &str, normalized_input: &str, entry: &NpcTrackingEntry) -> bool {
    let raw_lower = raw_input.to_lowercase();
    for token in name_tokens(entry) {
        if raw_lower.contains(&token) || normalized_input.contains(&token) {
            return true;
        }
    }

    let location = normalize(&entry.location);
    let mut total = 0usize;
    let mut hits = 0usize;
    for word in location.split(' ').filter(|w| w.len() >= 3) {
        for shingle in shingles(word) {
            total += 1;
            if normalized_input.contains(&shingle) {
                hits += 1;
            }
        }
    }
    total > 0 && hits * 2 >= total && hits >= 2
}

/// Match the player's input against tracked NPCs and filter by expected
/// end time.
///
/// Expired entries are dropped, except that a filter pass which would empty
/// the candidate set retains every candidate instead: better to mention a
/// just-finished activity than to silently drop the only overlap.
pub fn detect<'a>(
    input: &str,
    entries: &'a [NpcTrackingEntry],
    clock: &GameClock,
) -> Vec<&'a NpcTrackingEntry> {
    let normalized = normalize(input);
    let candidates: Vec<&NpcTrackingEntry> = entries
        .iter()
        .filter(|entry| matches_entry(input, &normalized, entry))
        .collect();
    if candidates.is_empty() {
        return candidates;
    }

    let now = clock.total_minutes();
    let live: Vec<&NpcTrackingEntry> = candidates
        .iter()
        .copied()
        .filter(|entry| match entry.stage_end {
            Some(end) => end.total_minutes() >= now,
            None => true,
        })
        .collect();

    if live.is_empty() {
        debug!(
            count = candidates.len(),
            "all intersection candidates expired; conservatively retaining them"
        );
        candidates
    } else {
        live
    }
}

/// Build the hint block appended to the player's input.
pub fn synthesize_hint(matches: &[&NpcTrackingEntry]) -> String {
    let mut out = String::from("[Concurrent activity nearby]\n");
    for entry in matches {
        let end = entry
            .stage_end
            .map(|clock| format!(", expected to finish by {clock}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "- {} is {} at {}{end}\n",
            entry.npc_name, entry.current_action, entry.location
        ));
    }
    out.trim_end().to_string()
}

/// Full hint flow: detect, optionally confirm through the npc-sync
/// endpoint, and return the hint block to append. `None` when nothing
/// intersects.
pub async fn build_hint<P: Provider>(
    provider: &P,
    settings: &Settings,
    input: &str,
    entries: &[NpcTrackingEntry],
    clock: &GameClock,
) -> Option<String> {
    let matches = detect(input, entries, clock);
    if matches.is_empty() {
        return None;
    }
    let local = synthesize_hint(&matches);

    if settings.intersection_precheck && settings.endpoints.npc_sync.is_some() {
        let endpoint = settings.endpoints.for_capability(Capability::NpcSync);
        let user = format!("Player action:\n{input}\n\nDraft note:\n{local}");
        match provider
            .generate(endpoint, PRECHECK_SYSTEM_PROMPT, &user, CallOptions::default())
            .await
        {
            Ok(completion) => {
                let confirmed = completion.text.trim();
                if confirmed.is_empty() {
                    return None;
                }
                return Some(confirmed.to_string());
            }
            Err(e) => {
                warn!(error = %e, "intersection precheck failed; using local hint");
            }
        }
    }

    Some(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, action: &str, location: &str, end: Option<GameClock>) -> NpcTrackingEntry {
        NpcTrackingEntry {
            npc_name: name.to_string(),
            current_action: action.to_string(),
            location: location.to_string(),
            stage_end: end,
            progress: 0.5,
            ..NpcTrackingEntry::default()
        }
    }

    fn clock() -> GameClock {
        GameClock::new(1021, 4, 12, 12, 0)
    }

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize("I visit Marla's stall!"), "i visit marla s stall");
    }

    #[test]
    fn test_shingles() {
        assert_eq!(shingles("mill"), vec!["mil", "ill"]);
        assert_eq!(shingles("at"), vec!["at"]);
        assert!(shingles("x").is_empty());
    }

    #[test]
    fn test_match_by_name() {
        let entries = vec![entry("Marla", "haggling", "the granary", None)];
        let matched = detect("I go find Marla.", &entries, &clock());
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_match_by_location_shingles() {
        let entries = vec![entry("Marla", "haggling", "the granary", None)];
        let matched = detect("I wander over to the granary", &entries, &clock());
        assert_eq!(matched.len(), 1);
        let unmatched = detect("I sharpen my sword", &entries, &clock());
        assert!(unmatched.is_empty());
    }

    #[test]
    fn test_expired_candidate_dropped_among_live_ones() {
        let past = GameClock::new(1021, 4, 12, 8, 0);
        let future = GameClock::new(1021, 4, 12, 18, 0);
        let entries = vec![
            entry("Marla", "haggling", "the granary", Some(past)),
            entry("Tobin", "mending nets", "the granary", Some(future)),
        ];
        let matched = detect("I head to the granary", &entries, &clock());
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].npc_name, "Tobin");
    }

    #[test]
    fn test_sole_expired_candidate_retained() {
        let past = GameClock::new(1021, 4, 12, 8, 0);
        let entries = vec![entry("Marla", "haggling", "the granary", Some(past))];
        let matched = detect("I look for Marla", &entries, &clock());
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_hint_block_contents() {
        let future = GameClock::new(1021, 4, 12, 18, 0);
        let entries = vec![entry("Marla", "haggling for grain", "the granary", Some(future))];
        let matched = detect("find Marla", &entries, &clock());
        let hint = synthesize_hint(&matched);
        assert!(hint.contains("Marla is haggling for grain at the granary"));
        assert!(hint.contains("expected to finish by"));
    }

    #[tokio::test]
    async fn test_build_hint_without_precheck_is_local() {
        let provider = crate::testing::MockProvider::new();
        let settings = Settings::default();
        let entries = vec![entry("Marla", "haggling", "the granary", None)];
        let hint = build_hint(&provider, &settings, "find Marla", &entries, &clock())
            .await
            .expect("hint");
        assert!(hint.contains("Marla"));
        assert_eq!(provider.call_count(), 0);
    }
}

//! Session persistence.
//!
//! Saves are self-contained JSON records: the full world state plus a
//! version stamp and a short summary for save-browser listings. Manual
//! saves occupy fixed numbered slots; auto-saves rotate through a small
//! ring keyed by turn number.

use crate::state::{iso_now, WorldState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// Number of fixed manual slots.
pub const MANUAL_SLOTS: usize = 8;

/// Size of the rotating auto-save ring.
pub const AUTO_SLOTS: usize = 3;

/// How a save was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaveKind {
    Manual,
    Auto,
}

/// A saved session with everything needed to resume play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedGame {
    /// Save format version for compatibility checking.
    pub version: u32,

    pub id: Uuid,

    pub kind: SaveKind,

    /// When the save was created, ISO 8601.
    pub timestamp: String,

    /// One-line description shown in save listings.
    pub summary: String,

    /// The complete session state.
    pub state: WorldState,
}

/// Listing metadata, readable without deserializing the full state.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveMetadata {
    pub version: u32,
    pub kind: SaveKind,
    pub timestamp: String,
    pub summary: String,
}

impl SavedGame {
    pub fn new(kind: SaveKind, state: WorldState) -> Self {
        let summary = summarize(&state);
        Self {
            version: SAVE_VERSION,
            id: Uuid::new_v4(),
            kind,
            timestamp: iso_now(),
            summary,
            state,
        }
    }

    /// Save to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file, rejecting unknown versions.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;
        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }
        Ok(saved)
    }

    /// Read listing metadata without loading the full state.
    pub async fn peek(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;
        let metadata: SaveMetadata = serde_json::from_str(&content)?;
        if metadata.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: metadata.version,
            });
        }
        Ok(metadata)
    }
}

/// One line for the save browser: character, location, turn.
fn summarize(state: &WorldState) -> String {
    let scene = if state.story.current_scene.is_empty() {
        state.world.region.as_str()
    } else {
        state.story.current_scene.as_str()
    };
    if scene.is_empty() {
        format!("{}, turn {}", state.character.name, state.turn)
    } else {
        format!("{} at {}, turn {}", state.character.name, scene, state.turn)
    }
}

/// Path of a fixed manual slot. Slots outside the range are clamped.
pub fn manual_slot_path(dir: impl AsRef<Path>, slot: usize) -> PathBuf {
    let slot = slot.min(MANUAL_SLOTS - 1);
    dir.as_ref().join(format!("manual_{slot}.json"))
}

/// Path of the auto-save slot for a given turn. Turns rotate through the
/// ring so the newest [`AUTO_SLOTS`] auto-saves survive.
pub fn auto_slot_path(dir: impl AsRef<Path>, turn: u64) -> PathBuf {
    let slot = (turn as usize) % AUTO_SLOTS;
    dir.as_ref().join(format!("auto_{slot}.json"))
}

/// A save file found on disk.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// List readable save files in a directory, newest first. Unreadable or
/// foreign files are skipped.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(metadata) = SavedGame::peek(&path).await {
                saves.push(SaveInfo { path, metadata });
            }
        }
    }
    saves.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
    Ok(saves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = WorldState::new("Asha");
        state.turn = 7;
        state.story.current_scene = "The Gilded Tankard".to_string();

        let saved = SavedGame::new(SaveKind::Manual, state.clone());
        let path = manual_slot_path(dir.path(), 0);
        saved.save(&path).await.unwrap();

        let loaded = SavedGame::load(&path).await.unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.kind, SaveKind::Manual);
        assert!(loaded.summary.contains("Asha"));
        assert!(loaded.summary.contains("turn 7"));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let saved = SavedGame::new(SaveKind::Manual, WorldState::new("Asha"));
        let mut value = serde_json::to_value(&saved).unwrap();
        value["version"] = serde_json::json!(99);
        tokio::fs::write(&path, serde_json::to_string(&value).unwrap())
            .await
            .unwrap();

        let err = SavedGame::load(&path).await.unwrap_err();
        assert!(matches!(
            err,
            PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: 99
            }
        ));
    }

    #[tokio::test]
    async fn test_auto_slots_rotate() {
        let dir = tempfile::tempdir().unwrap();
        for turn in 0..5u64 {
            let mut state = WorldState::new("Asha");
            state.turn = turn;
            SavedGame::new(SaveKind::Auto, state)
                .save(auto_slot_path(dir.path(), turn))
                .await
                .unwrap();
        }

        // Five auto-saves over a ring of three leaves three files.
        let saves = list_saves(dir.path()).await.unwrap();
        assert_eq!(saves.len(), AUTO_SLOTS);
    }

    #[tokio::test]
    async fn test_peek_skips_full_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = manual_slot_path(dir.path(), 1);
        SavedGame::new(SaveKind::Manual, WorldState::new("Asha"))
            .save(&path)
            .await
            .unwrap();

        let metadata = SavedGame::peek(&path).await.unwrap();
        assert_eq!(metadata.kind, SaveKind::Manual);
        assert!(metadata.summary.contains("Asha"));
    }
}

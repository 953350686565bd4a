//! Runtime core for a long-session, AI-narrated interactive fiction game.
//!
//! This crate provides:
//! - A turn orchestrator that turns player input into narrated, committed turns
//! - A path-based mutation engine for provider-driven state updates
//! - Tiered memory with user-confirmed compaction checkpoints
//! - A toggleable context module pipeline feeding the narrator prompt
//! - Background simulation of off-screen NPCs and player/NPC intersections
//! - Save/load persistence with manual slots and a rotating auto-save ring
//!
//! # Quick Start
//!
//! ```ignore
//! use tavern_core::{ChatProvider, GameSession, Settings, TurnReport, WorldState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = WorldState::new("Asha");
//!     let mut session = GameSession::new(ChatProvider::new(), Settings::default(), state)
//!         .with_save_dir("saves");
//!
//!     match session.submit("I step into the tavern").await? {
//!         TurnReport::Committed(outcome) => {
//!             for id in outcome.narrative {
//!                 println!("narrated entry {id}");
//!             }
//!         }
//!         TurnReport::HeldForMemory(checkpoint) => {
//!             println!("confirm digest first: {}", checkpoint.draft);
//!             let _ = session.confirm_memory_digest(None).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod intersect;
pub mod memory;
pub mod mutation;
pub mod npc;
pub mod parser;
pub mod persist;
pub mod provider;
pub mod session;
pub mod settings;
pub mod state;
pub mod stats;
pub mod testing;
pub mod turn;

// Primary public API
pub use context::{AssembledContext, ContextModule, ContextModuleConfig, ContextRegistry, ModuleType};
pub use memory::{Checkpoint, CheckpointReport, MemoryManager, TierPair};
pub use mutation::{Instruction, InstructionOutcome, Verb};
pub use npc::{NpcRunSummary, NpcScheduler, NpcTrigger};
pub use parser::{ProviderReply, ReplyLog};
pub use persist::{SaveKind, SavedGame};
pub use provider::{CallOptions, ChatProvider, Completion, Provider, ProviderError};
pub use session::{ConfirmOutcome, GameSession, SessionError, TurnReport};
pub use settings::{Capability, Difficulty, EndpointConfig, Endpoints, Perspective, Settings};
pub use state::{GameClock, LogEntry, LogKind, WorldState};
pub use testing::MockProvider;
pub use turn::{TurnError, TurnOrchestrator, TurnOutcome, TurnPhase};

//! Session settings.
//!
//! Settings are owned by the presentation layer and handed to the session
//! by value; the core never persists them. Endpoint overrides let heavy
//! capabilities (world dynamics, NPC social memory, NPC background
//! simulation) run against cheaper or local models than the main narrator.

use crate::context::ContextModuleConfig;
use serde::{Deserialize, Serialize};

/// Connection details for one chat-completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.8),
            max_tokens: 4096,
        }
    }
}

/// Capabilities that may be delegated to a secondary endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// World dynamics: news, rumors, region drift.
    World,
    /// NPC social memory: relationship and affinity upkeep.
    Social,
    /// Intersection precheck confirmation calls.
    NpcSync,
    /// Background NPC simulation.
    NpcBrain,
}

/// The endpoint set: one default plus optional per-capability overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Endpoints {
    pub unified: EndpointConfig,
    pub world: Option<EndpointConfig>,
    pub social: Option<EndpointConfig>,
    pub npc_sync: Option<EndpointConfig>,
    pub npc_brain: Option<EndpointConfig>,
}

impl Endpoints {
    /// The endpoint serving a capability: its override, or the unified one.
    pub fn for_capability(&self, capability: Capability) -> &EndpointConfig {
        let overridden = match capability {
            Capability::World => &self.world,
            Capability::Social => &self.social,
            Capability::NpcSync => &self.npc_sync,
            Capability::NpcBrain => &self.npc_brain,
        };
        overridden.as_ref().unwrap_or(&self.unified)
    }

    /// Capabilities with an override configured. The system prompt strips
    /// the lines these would otherwise duplicate.
    pub fn delegated(&self) -> Vec<Capability> {
        let mut delegated = Vec::new();
        if self.world.is_some() {
            delegated.push(Capability::World);
        }
        if self.social.is_some() {
            delegated.push(Capability::Social);
        }
        if self.npc_sync.is_some() {
            delegated.push(Capability::NpcSync);
        }
        if self.npc_brain.is_some() {
            delegated.push(Capability::NpcBrain);
        }
        delegated
    }
}

/// Narrative perspective for the narrator's prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    First,
    #[default]
    Second,
    Third,
}

impl Perspective {
    pub fn instruction(self) -> &'static str {
        match self {
            Perspective::First => {
                "Narrate in the first person, as the player character's own inner voice."
            }
            Perspective::Second => {
                "Narrate in the second person, addressing the player character as 'you'."
            }
            Perspective::Third => {
                "Narrate in the third person, referring to the player character by name."
            }
        }
    }
}

/// Difficulty selector for the system prompt. Exactly one is active;
/// selecting one deterministically switches the others off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Story,
    #[default]
    Adventurer,
    Ironclad,
}

/// All tunables the session reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoints: Endpoints,

    /// Stream the main narrator call, surfacing partial text to observers.
    pub streaming: bool,

    /// Confirm intersection hints with the npc-sync endpoint before use.
    pub intersection_precheck: bool,

    /// Run the background NPC deadline check before each turn dispatch.
    pub background_pre_update: bool,

    /// How many recent log entries render into the instant memory tier.
    pub log_render_limit: usize,

    /// Short-term tier capacity; reaching it forces a memory checkpoint.
    pub short_term_limit: usize,

    /// Medium-term tier capacity; reaching it chains a second checkpoint.
    pub medium_term_limit: usize,

    /// Ordered, toggleable context module list.
    pub context_modules: Vec<ContextModuleConfig>,

    pub perspective: Perspective,

    pub difficulty: Difficulty,

    /// Minimum words the narrator is asked for, when set.
    pub word_count_requirement: Option<u32>,

    /// Ceiling on one background NPC simulation run, in seconds.
    pub npc_run_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            streaming: false,
            intersection_precheck: false,
            background_pre_update: true,
            log_render_limit: 12,
            short_term_limit: 20,
            medium_term_limit: 10,
            context_modules: crate::context::default_module_configs(),
            perspective: Perspective::default(),
            difficulty: Difficulty::default(),
            word_count_requirement: None,
            npc_run_timeout_secs: 60,
        }
    }
}

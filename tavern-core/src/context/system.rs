//! The system-prompt module.
//!
//! The system prompt is an ordered list of toggleable sub-sections. A
//! section is included when it is always-on, when it is start-of-game-only
//! and the game is starting, when its difficulty tag matches the single
//! active difficulty (selecting a difficulty deterministically switches the
//! other difficulty sections off), or when its toggle in the module's
//! `sections` param is on (default on).
//!
//! Lines prefixed with a capability marker (`@world `, `@social `, `@npc `)
//! belong to a capability that may be delegated to a secondary endpoint;
//! when delegated, those lines are stripped so the main narrator and the
//! secondary call never share a responsibility.

use super::{ContextModule, ContextModuleConfig, RenderContext};
use crate::settings::{Capability, Difficulty};
use lazy_static::lazy_static;
use serde_json::Value;

/// One toggleable system-prompt sub-section.
#[derive(Debug, Clone)]
pub struct PromptSection {
    pub id: &'static str,
    pub body: &'static str,
    pub always_on: bool,
    pub start_only: bool,
    pub difficulty: Option<Difficulty>,
    pub capability: Option<Capability>,
}

impl PromptSection {
    const fn new(id: &'static str, body: &'static str) -> Self {
        Self {
            id,
            body,
            always_on: false,
            start_only: false,
            difficulty: None,
            capability: None,
        }
    }

    const fn always(mut self) -> Self {
        self.always_on = true;
        self
    }

    const fn start_only(mut self) -> Self {
        self.start_only = true;
        self
    }

    const fn difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    const fn capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }
}

lazy_static! {
    /// Default sub-sections, in prompt order.
    pub static ref PROMPT_SECTIONS: Vec<PromptSection> = vec![
        PromptSection::new(
            "role",
            "You are the narrator of a long-running interactive fiction game set in a \
             low-fantasy world of taverns, roads, and small intrigues. You describe what \
             happens, voice every character except the player, and keep the world \
             consistent with the state you are shown.",
        )
        .always(),
        PromptSection::new(
            "output_contract",
            "Respond with a single JSON object: {\"logs\": [{\"sender\", \"text\"}], \
             \"shortTerm\": \"one-line summary of this turn\", \"tavern_commands\": \
             [{\"verb\": \"set|add|push|delete\", \"path\", \"value\"}], \
             \"action_options\": [\"suggested next actions\"]}. Address state with dotted \
             paths exactly as rendered in context. Never invent paths you have not seen.",
        )
        .always(),
        PromptSection::new(
            "opening",
            "This is the first turn. Open the story: establish the scene around the \
             player, introduce one hook, and end with the world waiting on their action.",
        )
        .start_only(),
        PromptSection::new(
            "style",
            "Write concrete, sensory prose. Let consequences follow from the player's \
             choices. Do not narrate the player's decisions for them.",
        ),
        PromptSection::new(
            "world_upkeep",
            "@world Each turn, consider whether the wider world moved: push fresh items \
             onto world.news or world.rumors when something notable happens off-screen.\n\
             @world Retire stale news with delete commands rather than letting it pile up.",
        ),
        PromptSection::new(
            "social_upkeep",
            "@social Track how NPCs feel about the player: adjust companion affinity \
             with add commands when scenes warrant it.\n\
             @social Keep relationship labels current with set commands.",
        ),
        PromptSection::new(
            "npc_backline",
            "Keep off-screen NPCs implicitly alive: their errands continue while \
             the player acts elsewhere.",
        )
        .capability(Capability::NpcBrain),
        PromptSection::new(
            "difficulty_story",
            "Difficulty: story. Failure should redirect the narrative, not end it. Keep \
             mechanical setbacks gentle.",
        )
        .difficulty(Difficulty::Story),
        PromptSection::new(
            "difficulty_adventurer",
            "Difficulty: adventurer. Apply costs and injuries honestly; let preparation \
             matter. Death is possible but telegraphed.",
        )
        .difficulty(Difficulty::Adventurer),
        PromptSection::new(
            "difficulty_ironclad",
            "Difficulty: ironclad. The world does not bend. Resources deplete, wounds \
             linger, and reckless choices can kill without warning.",
        )
        .difficulty(Difficulty::Ironclad),
    ];
}

fn capability_marker(line: &str) -> (Option<Capability>, &str) {
    if let Some(rest) = line.strip_prefix("@world ") {
        (Some(Capability::World), rest)
    } else if let Some(rest) = line.strip_prefix("@social ") {
        (Some(Capability::Social), rest)
    } else if let Some(rest) = line.strip_prefix("@npc ") {
        (Some(Capability::NpcBrain), rest)
    } else {
        (None, line)
    }
}

/// Renders the ordered, filtered sub-sections into the system prompt, then
/// appends the perspective instruction and the optional word-count
/// requirement. Params: `sections` (object of section id to bool,
/// default all on).
pub struct SystemModule;

impl ContextModule for SystemModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let delegated = ctx.settings.endpoints.delegated();
        let toggles = config.params.get("sections").and_then(Value::as_object);

        let mut parts: Vec<String> = Vec::new();
        for section in PROMPT_SECTIONS.iter() {
            if section.start_only && ctx.state.turn > 0 {
                continue;
            }
            if let Some(difficulty) = section.difficulty {
                if difficulty != ctx.settings.difficulty {
                    continue;
                }
            }
            if !section.always_on && !section.start_only && section.difficulty.is_none() {
                let on = toggles
                    .and_then(|t| t.get(section.id))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if !on {
                    continue;
                }
            }
            if let Some(capability) = section.capability {
                if delegated.contains(&capability) {
                    continue;
                }
            }

            let mut kept_lines: Vec<&str> = Vec::new();
            for line in section.body.lines() {
                let (capability, text) = capability_marker(line);
                match capability {
                    Some(c) if delegated.contains(&c) => {}
                    _ => kept_lines.push(text),
                }
            }
            if !kept_lines.is_empty() {
                parts.push(kept_lines.join("\n"));
            }
        }

        parts.push(ctx.settings.perspective.instruction().to_string());
        if let Some(words) = ctx.settings.word_count_requirement {
            parts.push(format!(
                "Write at least {words} words of narration each turn."
            ));
        }

        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleType;
    use crate::settings::{EndpointConfig, Perspective, Settings};
    use crate::state::WorldState;

    fn render(state: &WorldState, settings: &Settings) -> String {
        let config = ContextModuleConfig::new("sys", ModuleType::System, "Narrator");
        SystemModule.render(
            &RenderContext {
                state,
                settings,
                command_history: &[],
                user_input: "",
            },
            &config,
        )
    }

    #[test]
    fn test_start_only_section_drops_after_first_turn() {
        let mut state = WorldState::new("Asha");
        let settings = Settings::default();
        assert!(render(&state, &settings).contains("This is the first turn"));
        state.turn = 1;
        assert!(!render(&state, &settings).contains("This is the first turn"));
    }

    #[test]
    fn test_single_active_difficulty_section() {
        let state = WorldState::new("Asha");
        let mut settings = Settings::default();
        settings.difficulty = Difficulty::Ironclad;
        let prompt = render(&state, &settings);
        assert!(prompt.contains("Difficulty: ironclad"));
        assert!(!prompt.contains("Difficulty: story"));
        assert!(!prompt.contains("Difficulty: adventurer"));

        settings.difficulty = Difficulty::Story;
        let prompt = render(&state, &settings);
        assert!(prompt.contains("Difficulty: story"));
        assert!(!prompt.contains("Difficulty: ironclad"));
    }

    #[test]
    fn test_delegated_capability_lines_stripped() {
        let state = WorldState::new("Asha");
        let mut settings = Settings::default();
        let prompt = render(&state, &settings);
        assert!(prompt.contains("world.news"));
        assert!(!prompt.contains("@world"));

        settings.endpoints.world = Some(EndpointConfig::default());
        let prompt = render(&state, &settings);
        assert!(!prompt.contains("world.news"));
        // Other capabilities untouched.
        assert!(prompt.contains("companion affinity"));
    }

    #[test]
    fn test_section_toggle_param() {
        let state = WorldState::new("Asha");
        let settings = Settings::default();
        let mut config = ContextModuleConfig::new("sys", ModuleType::System, "Narrator");
        let _ = config.params.insert(
            "sections".to_string(),
            serde_json::json!({"style": false}),
        );
        let prompt = SystemModule.render(
            &RenderContext {
                state: &state,
                settings: &settings,
                command_history: &[],
                user_input: "",
            },
            &config,
        );
        assert!(!prompt.contains("sensory prose"));
        // Always-on contract survives any toggling.
        assert!(prompt.contains("tavern_commands"));
    }

    #[test]
    fn test_perspective_and_word_count_blocks() {
        let state = WorldState::new("Asha");
        let mut settings = Settings::default();
        settings.perspective = Perspective::Third;
        settings.word_count_requirement = Some(250);
        let prompt = render(&state, &settings);
        assert!(prompt.contains("third person"));
        assert!(prompt.contains("at least 250 words"));
    }
}

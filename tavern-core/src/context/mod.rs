//! Context module registry and assembler.
//!
//! State renders into the prompt through typed, configurable modules. Each
//! module type implements [`ContextModule::render`], which never fails:
//! missing data renders an explicit placeholder rather than being silently
//! omitted. Modules concatenate in a fixed domain-priority order, then by
//! configured `order` within a type; unrecognized custom types append last.

mod modules;
mod system;

pub use modules::*;
pub use system::{PromptSection, SystemModule, PROMPT_SECTIONS};

use crate::settings::Settings;
use crate::state::WorldState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Built-in and custom module types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModuleType {
    System,
    Clock,
    Player,
    Map,
    Inventory,
    Combat,
    Tasks,
    Story,
    WorldDynamics,
    Roster,
    Contracts,
    Custom(String),
}

impl ModuleType {
    /// Fixed domain-priority concatenation order. Custom types have no
    /// priority and always append after the built-ins.
    pub fn domain_priority(&self) -> Option<u8> {
        match self {
            ModuleType::System => Some(0),
            ModuleType::Clock => Some(1),
            ModuleType::Player => Some(2),
            ModuleType::Map => Some(3),
            ModuleType::Inventory => Some(4),
            ModuleType::Combat => Some(5),
            ModuleType::Tasks => Some(6),
            ModuleType::Story => Some(7),
            ModuleType::WorldDynamics => Some(8),
            ModuleType::Roster => Some(9),
            ModuleType::Contracts => Some(10),
            ModuleType::Custom(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModuleType::System => "system",
            ModuleType::Clock => "clock",
            ModuleType::Player => "player",
            ModuleType::Map => "map",
            ModuleType::Inventory => "inventory",
            ModuleType::Combat => "combat",
            ModuleType::Tasks => "tasks",
            ModuleType::Story => "story",
            ModuleType::WorldDynamics => "world_dynamics",
            ModuleType::Roster => "roster",
            ModuleType::Contracts => "contracts",
            ModuleType::Custom(name) => name,
        }
    }
}

impl From<String> for ModuleType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "system" => ModuleType::System,
            "clock" => ModuleType::Clock,
            "player" => ModuleType::Player,
            "map" => ModuleType::Map,
            "inventory" => ModuleType::Inventory,
            "combat" => ModuleType::Combat,
            "tasks" => ModuleType::Tasks,
            "story" => ModuleType::Story,
            "world_dynamics" => ModuleType::WorldDynamics,
            "roster" => ModuleType::Roster,
            "contracts" => ModuleType::Contracts,
            _ => ModuleType::Custom(s),
        }
    }
}

impl From<ModuleType> for String {
    fn from(t: ModuleType) -> Self {
        t.as_str().to_string()
    }
}

/// One configured module instance. Disabling removes it from assembled text
/// but not from stored configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextModuleConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub name: String,
    pub enabled: bool,
    pub order: i32,
    /// Permissive key/value parameters; each module documents its defaults.
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl ContextModuleConfig {
    pub fn new(id: impl Into<String>, module_type: ModuleType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module_type,
            name: name.into(),
            enabled: true,
            order: 0,
            params: HashMap::new(),
        }
    }
}

/// Read a boolean param with a documented default.
pub fn param_bool(config: &ContextModuleConfig, key: &str, default: bool) -> bool {
    config
        .params
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

/// Read a string param with a documented default.
pub fn param_str<'a>(config: &'a ContextModuleConfig, key: &str, default: &'a str) -> &'a str {
    config
        .params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

/// Everything a module may render from.
pub struct RenderContext<'a> {
    pub state: &'a WorldState,
    pub settings: &'a Settings,
    pub command_history: &'a [String],
    pub user_input: &'a str,
}

/// A renderable module of state. Rendering never fails.
pub trait ContextModule: Send + Sync {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String;
}

/// Assembled output: system prompt and state context, separately addressed
/// so the orchestrator can place them on the wire correctly.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub system: String,
    pub context: String,
}

/// Registry of module implementations by type.
pub struct ContextRegistry {
    modules: HashMap<ModuleType, Box<dyn ContextModule>>,
    custom_fallback: Box<dyn ContextModule>,
}

impl ContextRegistry {
    /// Registry with every built-in module type registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            modules: HashMap::new(),
            custom_fallback: Box::new(CustomModule),
        };
        registry.register(ModuleType::System, Box::new(SystemModule));
        registry.register(ModuleType::Clock, Box::new(ClockModule));
        registry.register(ModuleType::Player, Box::new(PlayerModule));
        registry.register(ModuleType::Map, Box::new(MapModule));
        registry.register(ModuleType::Inventory, Box::new(InventoryModule));
        registry.register(ModuleType::Combat, Box::new(CombatModule));
        registry.register(ModuleType::Tasks, Box::new(TasksModule));
        registry.register(ModuleType::Story, Box::new(StoryModule));
        registry.register(ModuleType::WorldDynamics, Box::new(WorldDynamicsModule));
        registry.register(ModuleType::Roster, Box::new(RosterModule));
        registry.register(ModuleType::Contracts, Box::new(ContractsModule));
        registry
    }

    pub fn register(&mut self, module_type: ModuleType, module: Box<dyn ContextModule>) {
        let _ = self.modules.insert(module_type, module);
    }

    /// Render all enabled modules in assembly order.
    pub fn assemble(&self, ctx: &RenderContext<'_>) -> AssembledContext {
        let mut known: Vec<&ContextModuleConfig> = Vec::new();
        let mut custom: Vec<&ContextModuleConfig> = Vec::new();
        for config in ctx.settings.context_modules.iter().filter(|c| c.enabled) {
            if config.module_type.domain_priority().is_some() {
                known.push(config);
            } else {
                custom.push(config);
            }
        }
        known.sort_by(|a, b| {
            let pa = a.module_type.domain_priority().unwrap_or(u8::MAX);
            let pb = b.module_type.domain_priority().unwrap_or(u8::MAX);
            pa.cmp(&pb)
                .then(a.order.cmp(&b.order))
                .then(a.id.cmp(&b.id))
        });
        custom.sort_by(|a, b| a.order.cmp(&b.order).then(a.id.cmp(&b.id)));

        let mut assembled = AssembledContext::default();
        for config in known.into_iter().chain(custom) {
            let module = self
                .modules
                .get(&config.module_type)
                .unwrap_or(&self.custom_fallback);
            let text = module.render(ctx, config);
            if text.is_empty() {
                continue;
            }
            let target = if config.module_type == ModuleType::System {
                &mut assembled.system
            } else {
                &mut assembled.context
            };
            if !target.is_empty() {
                target.push_str("\n\n");
            }
            target.push_str(&text);
        }
        assembled
    }
}

/// The default module list: every built-in, enabled, in declaration order.
pub fn default_module_configs() -> Vec<ContextModuleConfig> {
    vec![
        ContextModuleConfig::new("core-system", ModuleType::System, "Narrator"),
        ContextModuleConfig::new("core-clock", ModuleType::Clock, "Time & World"),
        ContextModuleConfig::new("core-player", ModuleType::Player, "Player"),
        ContextModuleConfig::new("core-map", ModuleType::Map, "Surroundings"),
        ContextModuleConfig::new("core-inventory", ModuleType::Inventory, "Inventory"),
        ContextModuleConfig::new("core-combat", ModuleType::Combat, "Combat"),
        ContextModuleConfig::new("core-tasks", ModuleType::Tasks, "Tasks"),
        ContextModuleConfig::new("core-story", ModuleType::Story, "Story"),
        ContextModuleConfig::new(
            "core-world-dynamics",
            ModuleType::WorldDynamics,
            "World Dynamics",
        ),
        ContextModuleConfig::new("core-roster", ModuleType::Roster, "Companions"),
        ContextModuleConfig::new("core-contracts", ModuleType::Contracts, "Contracts"),
    ]
}

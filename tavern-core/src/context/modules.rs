//! Built-in context modules.
//!
//! Every renderer is total: empty or missing data becomes an explicit
//! placeholder line so the narrator can tell "nothing there" from "not
//! shown". Headers use the configured module name.

use super::{param_bool, param_str, ContextModule, ContextModuleConfig, RenderContext};
use crate::state::{Character, Pool};
use std::fmt::Write;

fn header(config: &ContextModuleConfig) -> String {
    format!("## {}\n", config.name)
}

fn pool_line(label: &str, pool: &Pool) -> String {
    format!("{label}: {:.0}/{:.0}", pool.current, pool.max)
}

/// In-game clock and region. Params: `show_region` (default `true`).
pub struct ClockModule;

impl ContextModule for ClockModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let _ = writeln!(out, "{}", ctx.state.clock);
        if param_bool(config, "show_region", true) {
            let region = if ctx.state.world.region.is_empty() {
                "(region unknown)"
            } else {
                &ctx.state.world.region
            };
            let _ = writeln!(out, "Region: {region}");
        }
        out.trim_end().to_string()
    }
}

fn render_sheet(out: &mut String, character: &Character) {
    let title = if character.title.is_empty() {
        "(no title)"
    } else {
        &character.title
    };
    let _ = writeln!(out, "{} — {title}, level {}", character.name, character.level);
    let _ = writeln!(out, "{}", pool_line("Health", &character.health));
    let _ = writeln!(out, "{}", pool_line("Mind", &character.mind));
    let _ = writeln!(out, "{}", pool_line("Stamina", &character.stamina));
    let a = &character.attributes;
    let _ = writeln!(
        out,
        "STR {} / END {} / AGI {} / INT {} / WIL {} / CHA {}",
        a.strength, a.endurance, a.agility, a.intellect, a.will, a.charm
    );
    let wounded: Vec<String> = character
        .body
        .iter()
        .filter(|p| p.max > 0.0 && p.current < p.max)
        .map(|p| format!("{} {:.0}%", p.name, p.current / p.max * 100.0))
        .collect();
    if !wounded.is_empty() {
        let _ = writeln!(out, "Wounded: {}", wounded.join(", "));
    }
    if !character.status_effects.is_empty() {
        let _ = writeln!(out, "Status: {}", character.status_effects.join(", "));
    }
}

/// The player character sheet.
pub struct PlayerModule;

impl ContextModule for PlayerModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        render_sheet(&mut out, &ctx.state.character);
        out.trim_end().to_string()
    }
}

/// Current location. Params: none.
pub struct MapModule;

impl ContextModule for MapModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let location = if ctx.state.character.location.is_empty() {
            "(location unknown)"
        } else {
            &ctx.state.character.location
        };
        let _ = writeln!(out, "Current location: {location}");
        out.trim_end().to_string()
    }
}

/// Carried items, load, and currency. Params: `show_weights` (default `true`).
pub struct InventoryModule;

impl ContextModule for InventoryModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let inventory = &ctx.state.inventory;
        if inventory.items.is_empty() {
            let _ = writeln!(out, "(nothing carried)");
        } else {
            for item in &inventory.items {
                if param_bool(config, "show_weights", true) {
                    let _ = writeln!(
                        out,
                        "- {} x{} ({:.1} wt){}",
                        item.name,
                        item.quantity,
                        item.weight * f64::from(item.quantity),
                        if item.equipped { " [equipped]" } else { "" }
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "- {} x{}{}",
                        item.name,
                        item.quantity,
                        if item.equipped { " [equipped]" } else { "" }
                    );
                }
            }
        }
        let _ = writeln!(
            out,
            "Load: {:.1}/{:.1}  Coin: {}",
            inventory.total_weight(),
            ctx.state.character.carry_capacity,
            inventory.currency
        );
        out.trim_end().to_string()
    }
}

/// Active combat round and enemies; a placeholder when out of combat.
pub struct CombatModule;

impl ContextModule for CombatModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let combat = &ctx.state.combat;
        if !combat.active {
            let _ = writeln!(out, "(no active combat)");
            return out.trim_end().to_string();
        }
        let _ = writeln!(out, "Round {}", combat.round);
        if combat.enemies.is_empty() {
            let _ = writeln!(out, "(no enemies recorded)");
        }
        for enemy in &combat.enemies {
            let _ = writeln!(
                out,
                "- {} [{}]{}",
                enemy.name,
                pool_line("HP", &enemy.health),
                if enemy.notes.is_empty() {
                    String::new()
                } else {
                    format!(" — {}", enemy.notes)
                }
            );
        }
        out.trim_end().to_string()
    }
}

/// Open and completed tasks. Params: `show_completed` (default `false`).
pub struct TasksModule;

impl ContextModule for TasksModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let show_completed = param_bool(config, "show_completed", false);
        let mut any = false;
        for task in &ctx.state.tasks.entries {
            if task.completed && !show_completed {
                continue;
            }
            any = true;
            let _ = writeln!(
                out,
                "- [{}] {}: {}",
                if task.completed { "done" } else { "open" },
                task.name,
                task.description
            );
        }
        if !any {
            let _ = writeln!(out, "(no tasks)");
        }
        out.trim_end().to_string()
    }
}

/// Story premise, scene, and beats.
pub struct StoryModule;

impl ContextModule for StoryModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let story = &ctx.state.story;
        if story.premise.is_empty() && story.current_scene.is_empty() && story.beats.is_empty() {
            let _ = writeln!(out, "(no story established yet)");
            return out.trim_end().to_string();
        }
        if !story.premise.is_empty() {
            let _ = writeln!(out, "Premise: {}", story.premise);
        }
        if !story.current_scene.is_empty() {
            let _ = writeln!(out, "Scene: {}", story.current_scene);
        }
        for beat in &story.beats {
            let _ = writeln!(out, "- {beat}");
        }
        out.trim_end().to_string()
    }
}

/// News, rumors, and off-screen NPC activity.
/// Params: `show_tracking` (default `true`).
pub struct WorldDynamicsModule;

impl ContextModule for WorldDynamicsModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        let world = &ctx.state.world;
        if world.news.is_empty() && world.rumors.is_empty() {
            let _ = writeln!(out, "(the world is quiet)");
        }
        for news in &world.news {
            let _ = writeln!(out, "News: {news}");
        }
        for rumor in &world.rumors {
            let _ = writeln!(out, "Rumor: {rumor}");
        }
        if param_bool(config, "show_tracking", true) && !world.npc_tracking.is_empty() {
            let _ = writeln!(out, "Off-screen:");
            for entry in &world.npc_tracking {
                let _ = writeln!(
                    out,
                    "- {} at {}: {} ({:.0}%)",
                    entry.npc_name,
                    entry.location,
                    entry.current_action,
                    entry.progress * 100.0
                );
            }
        }
        out.trim_end().to_string()
    }
}

/// Companion roster with relationships.
pub struct RosterModule;

impl ContextModule for RosterModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        if ctx.state.social.companions.is_empty() {
            let _ = writeln!(out, "(traveling alone)");
            return out.trim_end().to_string();
        }
        for companion in &ctx.state.social.companions {
            let _ = writeln!(
                out,
                "- {} ({}, affinity {}){}",
                companion.character.name,
                if companion.relationship.is_empty() {
                    "acquaintance"
                } else {
                    &companion.relationship
                },
                companion.affinity,
                if companion.active { "" } else { " [away]" }
            );
        }
        out.trim_end().to_string()
    }
}

/// Standing contracts.
pub struct ContractsModule;

impl ContextModule for ContractsModule {
    fn render(&self, ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let mut out = header(config);
        if ctx.state.tasks.contracts.is_empty() {
            let _ = writeln!(out, "(no standing contracts)");
            return out.trim_end().to_string();
        }
        for contract in &ctx.state.tasks.contracts {
            let _ = writeln!(out, "- {contract}");
        }
        out.trim_end().to_string()
    }
}

/// Fallback for custom module types: renders the `text` param, or a
/// placeholder naming the module.
pub struct CustomModule;

impl ContextModule for CustomModule {
    fn render(&self, _ctx: &RenderContext<'_>, config: &ContextModuleConfig) -> String {
        let text = param_str(config, "text", "");
        if text.is_empty() {
            format!("## {}\n(custom module '{}' has no content)", config.name, config.id)
        } else {
            format!("## {}\n{text}", config.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextModuleConfig, ModuleType};
    use crate::settings::Settings;
    use crate::state::{Enemy, Item, WorldState};

    fn ctx_fixture<'a>(state: &'a WorldState, settings: &'a Settings) -> RenderContext<'a> {
        RenderContext {
            state,
            settings,
            command_history: &[],
            user_input: "",
        }
    }

    #[test]
    fn test_inventory_renders_placeholder_when_empty() {
        let state = WorldState::new("Asha");
        let settings = Settings::default();
        let config =
            ContextModuleConfig::new("inv", ModuleType::Inventory, "Inventory");
        let text = InventoryModule.render(&ctx_fixture(&state, &settings), &config);
        assert!(text.contains("(nothing carried)"));
        assert!(text.contains("Coin: 0"));
    }

    #[test]
    fn test_inventory_lists_equipped_items() {
        let mut state = WorldState::new("Asha");
        state.inventory.items.push(Item {
            id: 1,
            name: "Iron Sword".to_string(),
            quantity: 1,
            weight: 3.0,
            equipped: true,
            ..Item::default()
        });
        let settings = Settings::default();
        let config =
            ContextModuleConfig::new("inv", ModuleType::Inventory, "Inventory");
        let text = InventoryModule.render(&ctx_fixture(&state, &settings), &config);
        assert!(text.contains("Iron Sword x1"));
        assert!(text.contains("[equipped]"));
    }

    #[test]
    fn test_combat_placeholder_out_of_combat() {
        let mut state = WorldState::new("Asha");
        let settings = Settings::default();
        let config = ContextModuleConfig::new("combat", ModuleType::Combat, "Combat");
        let text = CombatModule.render(&ctx_fixture(&state, &settings), &config);
        assert!(text.contains("(no active combat)"));

        state.combat.active = true;
        state.combat.round = 2;
        state.combat.enemies.push(Enemy {
            name: "Bandit".to_string(),
            ..Enemy::default()
        });
        let text = CombatModule.render(&ctx_fixture(&state, &settings), &config);
        assert!(text.contains("Round 2"));
        assert!(text.contains("Bandit"));
    }

    #[test]
    fn test_world_dynamics_shows_tracking() {
        let mut state = WorldState::new("Asha");
        state.world.npc_tracking.push(crate::state::NpcTrackingEntry {
            npc_name: "Marla".to_string(),
            current_action: "haggling for grain".to_string(),
            location: "the granary".to_string(),
            progress: 0.5,
            ..crate::state::NpcTrackingEntry::default()
        });
        let settings = Settings::default();
        let config = ContextModuleConfig::new(
            "world",
            ModuleType::WorldDynamics,
            "World Dynamics",
        );
        let text = WorldDynamicsModule.render(&ctx_fixture(&state, &settings), &config);
        assert!(text.contains("Marla"));
        assert!(text.contains("50%"));
    }
}

//! Derived stat recalculation.
//!
//! Recomputes every dependent numeric field from base attributes and level.
//! Runs once, unconditionally, after every mutation batch, so it must be
//! idempotent: recalculating an already-consistent state changes nothing.

use crate::state::{Character, WorldState};

/// Fixed share of overall max health assigned to each body part.
fn part_share(name: &str) -> f64 {
    match name {
        "head" => 0.15,
        "torso" => 0.35,
        "left_arm" | "right_arm" | "left_leg" | "right_leg" => 0.125,
        _ => 0.10,
    }
}

/// Max health from endurance and level.
fn max_health(character: &Character) -> f64 {
    50.0 + f64::from(character.attributes.endurance) * 10.0 + f64::from(character.level) * 5.0
}

/// Max mind from will, intellect, and level.
fn max_mind(character: &Character) -> f64 {
    30.0 + f64::from(character.attributes.will) * 5.0
        + f64::from(character.attributes.intellect) * 5.0
        + f64::from(character.level) * 2.0
}

/// Max stamina from endurance, strength, and level.
fn max_stamina(character: &Character) -> f64 {
    30.0 + f64::from(character.attributes.endurance) * 5.0
        + f64::from(character.attributes.strength) * 5.0
        + f64::from(character.level) * 2.0
}

/// Carrying capacity in weight units from strength.
fn carry_capacity(character: &Character) -> f64 {
    20.0 + f64::from(character.attributes.strength) * 5.0
}

fn recalculate_character(character: &mut Character) {
    let new_health_max = max_health(character);
    let new_mind_max = max_mind(character);
    let new_stamina_max = max_stamina(character);

    // Preserve each part's wounded fraction against its new max.
    for part in &mut character.body {
        let fraction = if part.max > 0.0 {
            (part.current / part.max).clamp(0.0, 1.0)
        } else {
            1.0
        };
        part.max = new_health_max * part_share(&part.name);
        part.current = part.max * fraction;
    }

    character.health.max = new_health_max;
    character.mind.max = new_mind_max;
    character.stamina.max = new_stamina_max;
    character.carry_capacity = carry_capacity(character);

    // Clamp current values to the (possibly lowered) maxima.
    character.health.current = character.health.current.clamp(0.0, character.health.max);
    character.mind.current = character.mind.current.clamp(0.0, character.mind.max);
    character.stamina.current = character.stamina.current.clamp(0.0, character.stamina.max);
}

/// Recompute all derived stats for the player and every active companion.
pub fn recalculate(state: &mut WorldState) {
    recalculate_character(&mut state.character);
    for companion in &mut state.social.companions {
        if companion.active {
            recalculate_character(&mut companion.character);
        }
    }
}

//! Game world state types.
//!
//! The [`WorldState`] aggregate owns everything a session can mutate:
//! the player character, inventory, social roster, combat, tasks, world
//! information, story, tiered memory, the append-only log, the turn
//! counter, and the in-game clock. It is single-owner: mutation goes
//! through the mutation engine or the turn orchestrator, never through
//! shared references.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Clock
// ============================================================================

/// In-game calendar clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameClock {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl GameClock {
    pub fn new(year: i32, month: u8, day: u8, hour: u8, minute: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
        }
    }

    /// Total minutes since year zero, for ordering and deadline checks.
    /// Months are normalized to 30 days.
    pub fn total_minutes(&self) -> i64 {
        let days = i64::from(self.year) * 360 + (i64::from(self.month) - 1) * 30
            + (i64::from(self.day) - 1);
        days * 24 * 60 + i64::from(self.hour) * 60 + i64::from(self.minute)
    }

    pub fn advance_minutes(&mut self, minutes: u32) {
        let mut total = self.total_minutes() + i64::from(minutes);
        self.minute = (total % 60) as u8;
        total /= 60;
        self.hour = (total % 24) as u8;
        total /= 24;
        self.day = (total % 30) as u8 + 1;
        total /= 30;
        self.month = (total % 12) as u8 + 1;
        self.year = (total / 12) as i32;
    }

    pub fn advance_hours(&mut self, hours: u32) {
        self.advance_minutes(hours * 60);
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new(1021, 4, 12, 9, 0)
    }
}

impl fmt::Display for GameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Year {} Month {} Day {}, {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

// ============================================================================
// Character
// ============================================================================

/// Base attributes that derived stats are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    pub strength: u32,
    pub endurance: u32,
    pub agility: u32,
    pub intellect: u32,
    pub will: u32,
    pub charm: u32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: 10,
            endurance: 10,
            agility: 10,
            intellect: 10,
            will: 10,
            charm: 10,
        }
    }
}

/// A current/max resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Pool {
    pub current: f64,
    pub max: f64,
}

impl Pool {
    pub fn full(max: f64) -> Self {
        Self { current: max, max }
    }

    /// Fraction remaining, 1.0 for an empty (zero-max) pool.
    pub fn fraction(&self) -> f64 {
        if self.max > 0.0 {
            self.current / self.max
        } else {
            1.0
        }
    }
}

/// One body-part health sub-pool. The part's max is a fixed share of the
/// character's overall max health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BodyPart {
    pub name: String,
    pub current: f64,
    pub max: f64,
}

/// A character sheet: the player or a party member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Character {
    pub name: String,
    pub title: String,
    pub level: u32,
    pub experience: u64,
    pub attributes: Attributes,
    pub health: Pool,
    pub mind: Pool,
    pub stamina: Pool,
    pub body: Vec<BodyPart>,
    pub carry_capacity: f64,
    pub status_effects: Vec<String>,
    pub location: String,
}

impl Character {
    /// Canonical body-part names, in sheet order.
    pub const BODY_PARTS: [&'static str; 6] = [
        "head",
        "torso",
        "left_arm",
        "right_arm",
        "left_leg",
        "right_leg",
    ];

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for Character {
    fn default() -> Self {
        Self {
            name: "Wanderer".to_string(),
            title: String::new(),
            level: 1,
            experience: 0,
            attributes: Attributes::default(),
            health: Pool::default(),
            mind: Pool::default(),
            stamina: Pool::default(),
            body: Self::BODY_PARTS
                .iter()
                .map(|name| BodyPart {
                    name: (*name).to_string(),
                    current: 0.0,
                    max: 0.0,
                })
                .collect(),
            carry_capacity: 0.0,
            status_effects: Vec::new(),
            location: "The Crossroads Tavern".to_string(),
        }
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// One stack of items. Pushed stacks merge by name; ids are sequential per
/// inventory and only assigned to genuinely new stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub quantity: u32,
    pub weight: f64,
    pub description: String,
    pub equipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Inventory {
    pub items: Vec<Item>,
    pub currency: i64,
}

impl Inventory {
    /// Next sequential item id.
    pub fn next_id(&self) -> u64 {
        self.items.iter().map(|i| i.id).max().map_or(1, |id| id + 1)
    }

    pub fn total_weight(&self) -> f64 {
        self.items
            .iter()
            .map(|i| i.weight * f64::from(i.quantity))
            .sum()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.name == name)
    }
}

// ============================================================================
// Social roster
// ============================================================================

/// A companion in the social roster. Active companions travel with the
/// player and share derived-stat recalculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Companion {
    pub character: Character,
    pub active: bool,
    pub relationship: String,
    pub affinity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Social {
    pub companions: Vec<Companion>,
}

// ============================================================================
// Combat
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Enemy {
    pub name: String,
    pub health: Pool,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CombatState {
    pub active: bool,
    pub round: u32,
    pub enemies: Vec<Enemy>,
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Tasks {
    pub entries: Vec<Task>,
    /// Standing agreements with NPCs or factions, rendered by the contracts
    /// context module.
    pub contracts: Vec<String>,
}

// ============================================================================
// World information
// ============================================================================

/// One tracked off-screen NPC, owned by the background scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NpcTrackingEntry {
    pub npc_name: String,
    pub title: String,
    pub current_action: String,
    pub location: String,
    /// In-game time the current activity stage is expected to end.
    pub stage_end: Option<GameClock>,
    /// Completion fraction of the current stage, 0.0..=1.0.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorldInfo {
    pub region: String,
    pub news: Vec<String>,
    pub rumors: Vec<String>,
    pub npc_tracking: Vec<NpcTrackingEntry>,
}

// ============================================================================
// Story
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Story {
    pub premise: String,
    pub current_scene: String,
    pub beats: Vec<String>,
}

// ============================================================================
// Memory
// ============================================================================

/// One short-term memory entry (the lowest stored tier; the "instant" tier
/// is derived live from recent log turns and never stored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShortTermEntry {
    pub content: String,
    pub timestamp: String,
    pub turn: u64,
}

/// The three stored memory tiers. Tier limits live in settings; the memory
/// manager enforces them after every committed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemorySystem {
    pub short_term: Vec<ShortTermEntry>,
    pub medium_term: Vec<String>,
    pub long_term: Vec<String>,
}

// ============================================================================
// Log
// ============================================================================

/// What produced a log entry. Intersection entries are audit-only and are
/// excluded from every memory-tier rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Player,
    Narrative,
    System,
    Intersection,
}

/// One append-only log entry. Immutable except via the explicit
/// edit-and-replay operation on the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub kind: LogKind,
    pub sender: String,
    pub text: String,
    pub turn: u64,
    /// Raw provider payload this entry was parsed from, if any.
    #[serde(default)]
    pub raw: Option<String>,
    /// Extracted reasoning trace, if any.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Opaque provider response id, if any.
    #[serde(default)]
    pub response_id: Option<String>,
    /// Full pre-turn state copy enabling rewind/reroll/edit-and-replay.
    #[serde(default)]
    pub snapshot: Option<Box<WorldState>>,
}

impl LogEntry {
    pub fn new(kind: LogKind, sender: impl Into<String>, text: impl Into<String>, turn: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            text: text.into(),
            turn,
            raw: None,
            reasoning: None,
            response_id: None,
            snapshot: None,
        }
    }
}

// ============================================================================
// World state
// ============================================================================

/// The complete mutable session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldState {
    pub session_id: Uuid,
    pub character: Character,
    pub inventory: Inventory,
    pub social: Social,
    pub combat: CombatState,
    pub tasks: Tasks,
    pub world: WorldInfo,
    pub story: Story,
    pub memory: MemorySystem,
    pub log: Vec<LogEntry>,
    pub turn: u64,
    pub clock: GameClock,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            character: Character::default(),
            inventory: Inventory::default(),
            social: Social::default(),
            combat: CombatState::default(),
            tasks: Tasks::default(),
            world: WorldInfo::default(),
            story: Story::default(),
            memory: MemorySystem::default(),
            log: Vec::new(),
            turn: 0,
            clock: GameClock::default(),
        }
    }
}

impl WorldState {
    pub fn new(character_name: impl Into<String>) -> Self {
        let mut state = Self {
            character: Character::new(character_name),
            ..Self::default()
        };
        crate::stats::recalculate(&mut state);
        state.character.health = Pool::full(state.character.health.max);
        state.character.mind = Pool::full(state.character.mind.max);
        state.character.stamina = Pool::full(state.character.stamina.max);
        for part in &mut state.character.body {
            part.current = part.max;
        }
        state
    }

    /// Capture an immutable pre-turn snapshot.
    ///
    /// Snapshots carried by log entries inside the copy are stripped so a
    /// snapshot does not recursively embed earlier snapshots.
    pub fn snapshot(&self) -> Box<WorldState> {
        let mut copy = self.clone();
        for entry in &mut copy.log {
            entry.snapshot = None;
        }
        Box::new(copy)
    }

    /// Append a log entry and return a reference to it.
    pub fn push_log(&mut self, entry: LogEntry) -> &LogEntry {
        self.log.push(entry);
        self.log.last().expect("just pushed")
    }

    /// The most recent `count` entries, oldest first, skipping audit entries.
    pub fn recent_log(&self, count: usize) -> Vec<&LogEntry> {
        let mut entries: Vec<&LogEntry> = self
            .log
            .iter()
            .rev()
            .filter(|e| e.kind != LogKind::Intersection)
            .take(count)
            .collect();
        entries.reverse();
        entries
    }
}

/// Current wall-clock time as an ISO 8601 string (UTC, second precision).
pub fn iso_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    // Civil-date conversion, days since 1970-01-01.
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let mut year = 1970u64;
    let mut days_left = days;
    loop {
        let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
        let len = if leap { 366 } else { 365 };
        if days_left < len {
            break;
        }
        days_left -= len;
        year += 1;
    }
    let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
    let month_lengths = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 0usize;
    while days_left >= month_lengths[month] {
        days_left -= month_lengths[month];
        month += 1;
    }

    format!(
        "{year:04}-{:02}-{:02}T{hour:02}:{minute:02}:{second:02}Z",
        month + 1,
        days_left + 1
    )
}

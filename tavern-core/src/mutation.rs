//! Path-addressed state mutation.
//!
//! The provider (and a few local actions such as equip/use) edit the world
//! through one-shot instructions: a dotted/bracket-indexed path, a verb, and
//! a value. Instructions are resolved against a `serde_json::Value`
//! projection of [`WorldState`], so dynamic paths work without an accessor
//! per field. A batch either round-trips back into a typed state or commits
//! nothing; individual instruction failures are logged and skipped.

use crate::state::WorldState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from resolving a single instruction.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Empty path")]
    EmptyPath,

    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Path segment '{segment}' not found in '{path}'")]
    MissingSegment { segment: String, path: String },

    #[error("Index {index} out of bounds in '{path}'")]
    IndexOutOfBounds { index: usize, path: String },

    #[error("Target of '{path}' is not an array")]
    NotAnArray { path: String },

    #[error("Cannot {verb} at '{path}': {reason}")]
    BadTarget {
        verb: &'static str,
        path: String,
        reason: String,
    },

    #[error("State serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Mutation verbs, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Set,
    Add,
    Push,
    Delete,
}

impl Verb {
    fn name(self) -> &'static str {
        match self {
            Verb::Set => "set",
            Verb::Add => "add",
            Verb::Push => "push",
            Verb::Delete => "delete",
        }
    }
}

/// One ephemeral mutation instruction, consumed exactly once per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub verb: Verb,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl Instruction {
    pub fn new(verb: Verb, path: impl Into<String>, value: Value) -> Self {
        Self {
            verb,
            path: path.into(),
            value,
        }
    }
}

/// Result of applying one instruction. Failures are per-instruction and
/// non-fatal; the batch continues.
#[derive(Debug, Clone)]
pub struct InstructionOutcome {
    pub verb: Verb,
    pub path: String,
    pub success: bool,
    pub error: Option<String>,
    /// Human-readable note for non-obvious successes (stack merges, no-ops).
    pub note: Option<String>,
}

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a dotted/bracket-indexed path like `inventory.items[2].quantity`.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, MutationError> {
    if path.is_empty() {
        return Err(MutationError::EmptyPath);
    }

    let malformed = |reason: &str| MutationError::MalformedPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            return Err(malformed("empty segment"));
        }
        let mut rest = part;
        // Leading key before any brackets.
        if let Some(bracket) = rest.find('[') {
            if bracket > 0 {
                segments.push(Segment::Key(rest[..bracket].to_string()));
            }
            rest = &rest[bracket..];
        } else {
            segments.push(Segment::Key(rest.to_string()));
            continue;
        }
        // One or more `[n]` suffixes.
        while !rest.is_empty() {
            let Some(stripped) = rest.strip_prefix('[') else {
                return Err(malformed("expected '['"));
            };
            let Some(close) = stripped.find(']') else {
                return Err(malformed("unclosed '['"));
            };
            let index: usize = stripped[..close]
                .parse()
                .map_err(|_| malformed("non-numeric index"))?;
            segments.push(Segment::Index(index));
            rest = &stripped[close + 1..];
        }
    }
    Ok(segments)
}

/// Walk to the parent of the addressed leaf. Missing intermediate
/// containers are an error, never invented.
fn walk_to_parent<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    path: &str,
) -> Result<&'a mut Value, MutationError> {
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        current = match segment {
            Segment::Key(key) => {
                current
                    .get_mut(key.as_str())
                    .ok_or_else(|| MutationError::MissingSegment {
                        segment: key.clone(),
                        path: path.to_string(),
                    })?
            }
            Segment::Index(index) => {
                current
                    .get_mut(*index)
                    .ok_or_else(|| MutationError::IndexOutOfBounds {
                        index: *index,
                        path: path.to_string(),
                    })?
            }
        };
    }
    Ok(current)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        // The provider sometimes quotes numbers; parse rather than fail.
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Apply one instruction to a state projection.
///
/// Returns an optional note for successes that did something other than the
/// literal request (stack merge, add no-op).
pub fn apply_to_value(
    root: &mut Value,
    instruction: &Instruction,
) -> Result<Option<String>, MutationError> {
    let segments = parse_path(&instruction.path)?;
    let path = instruction.path.as_str();
    let parent = walk_to_parent(root, &segments, path)?;
    let last = segments.last().ok_or(MutationError::EmptyPath)?;

    match instruction.verb {
        Verb::Set => {
            match (parent, last) {
                (Value::Object(map), Segment::Key(key)) => {
                    let _ = map.insert(key.clone(), instruction.value.clone());
                    Ok(None)
                }
                (Value::Array(items), Segment::Index(index)) => {
                    let slot = items.get_mut(*index).ok_or_else(|| {
                        MutationError::IndexOutOfBounds {
                            index: *index,
                            path: path.to_string(),
                        }
                    })?;
                    *slot = instruction.value.clone();
                    Ok(None)
                }
                (_, segment) => Err(MutationError::BadTarget {
                    verb: "set",
                    path: path.to_string(),
                    reason: format!("container does not accept segment {segment:?}"),
                }),
            }
        }
        Verb::Add => {
            let target = get_leaf_mut(parent, last, path)?;
            let Some(current) = as_number(target) else {
                // Documented ambiguity: add onto a non-numeric target is a
                // logged no-op rather than an error.
                debug!(path, "add verb hit non-numeric target; no-op");
                return Ok(Some("add: non-numeric target, no-op".to_string()));
            };
            let addend =
                as_number(&instruction.value).ok_or_else(|| MutationError::BadTarget {
                    verb: "add",
                    path: path.to_string(),
                    reason: format!("value {} is not numeric", instruction.value),
                })?;
            *target = number_value(current + addend);
            Ok(None)
        }
        Verb::Push => {
            let target = get_leaf_mut(parent, last, path)?;
            let Value::Array(items) = target else {
                return Err(MutationError::NotAnArray {
                    path: path.to_string(),
                });
            };
            push_into(items, instruction.value.clone())
        }
        Verb::Delete => match (parent, last) {
            (Value::Object(map), Segment::Key(key)) => {
                if map.remove(key).is_none() {
                    return Err(MutationError::MissingSegment {
                        segment: key.clone(),
                        path: path.to_string(),
                    });
                }
                Ok(None)
            }
            (Value::Array(items), Segment::Index(index)) => {
                if *index >= items.len() {
                    return Err(MutationError::IndexOutOfBounds {
                        index: *index,
                        path: path.to_string(),
                    });
                }
                let _ = items.remove(*index);
                Ok(None)
            }
            (_, segment) => Err(MutationError::BadTarget {
                verb: "delete",
                path: path.to_string(),
                reason: format!("container does not accept segment {segment:?}"),
            }),
        },
    }
}

fn get_leaf_mut<'a>(
    parent: &'a mut Value,
    last: &Segment,
    path: &str,
) -> Result<&'a mut Value, MutationError> {
    match last {
        Segment::Key(key) => {
            parent
                .get_mut(key.as_str())
                .ok_or_else(|| MutationError::MissingSegment {
                    segment: key.clone(),
                    path: path.to_string(),
                })
        }
        Segment::Index(index) => {
            parent
                .get_mut(*index)
                .ok_or_else(|| MutationError::IndexOutOfBounds {
                    index: *index,
                    path: path.to_string(),
                })
        }
    }
}

/// Append a value to an array, merging item-shaped objects by name.
///
/// An item-shaped value carries a string `name`; pushing one whose name is
/// already present increments the existing stack's `quantity` instead of
/// duplicating the record. Genuinely new stacks get a fresh sequential id.
fn push_into(items: &mut Vec<Value>, value: Value) -> Result<Option<String>, MutationError> {
    let name = value.get("name").and_then(Value::as_str).map(String::from);

    if let Some(name) = name {
        let incoming_quantity = value
            .get("quantity")
            .and_then(as_number)
            .unwrap_or(1.0)
            .max(1.0);

        if let Some(existing) = items
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .find(|o| o.get("name").and_then(Value::as_str) == Some(name.as_str()))
        {
            let current = existing.get("quantity").and_then(as_number).unwrap_or(1.0);
            let _ = existing.insert(
                "quantity".to_string(),
                number_value(current + incoming_quantity),
            );
            return Ok(Some(format!("merged into existing stack '{name}'")));
        }

        // New stack: assign a fresh sequential id.
        let next_id = items
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_u64))
            .max()
            .map_or(1, |id| id + 1);
        let mut object = match value {
            Value::Object(map) => map,
            _ => unreachable!("name lookup implies object"),
        };
        let _ = object.entry("id".to_string()).or_insert(Value::from(next_id));
        if object.get("quantity").and_then(as_number).is_none() {
            let _ = object.insert("quantity".to_string(), Value::from(1));
        }
        items.push(Value::Object(object));
        return Ok(None);
    }

    items.push(value);
    Ok(None)
}

/// Apply a batch of instructions to the world state.
///
/// The state is projected to JSON once, every instruction is attempted
/// (failures are logged and skipped), the projection is read back, and the
/// derived-stat recalculation runs exactly once. If the edited projection no
/// longer deserializes, nothing commits and the error is returned.
pub fn apply_batch(
    state: &mut WorldState,
    instructions: &[Instruction],
) -> Result<Vec<InstructionOutcome>, MutationError> {
    if instructions.is_empty() {
        crate::stats::recalculate(state);
        return Ok(Vec::new());
    }

    let mut projection = serde_json::to_value(&*state)?;
    let mut outcomes = Vec::with_capacity(instructions.len());

    for instruction in instructions {
        match apply_to_value(&mut projection, instruction) {
            Ok(note) => outcomes.push(InstructionOutcome {
                verb: instruction.verb,
                path: instruction.path.clone(),
                success: true,
                error: None,
                note,
            }),
            Err(e) => {
                warn!(
                    verb = instruction.verb.name(),
                    path = instruction.path.as_str(),
                    error = %e,
                    "mutation instruction failed; skipping"
                );
                outcomes.push(InstructionOutcome {
                    verb: instruction.verb,
                    path: instruction.path.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    note: None,
                });
            }
        }
    }

    *state = serde_json::from_value(projection)?;
    crate::stats::recalculate(state);
    Ok(outcomes)
}

//! Parsing and validation of move values.
//!
//! A move is the JSON value of a name operation. Common fields update the
//! player (`message`, `address`, `addressLock`); the rest is either a
//! spawn (`{"color":N}`) or per-character orders keyed by the decimal
//! character index. Parsing is strict: unknown fields, wrong types, or
//! out-of-range values reject the whole move, because acceptance is
//! consensus-relevant.

use std::collections::BTreeMap;

use serde_json::Value;

use hunter_core::address::is_valid_address;

use crate::map;
use crate::state::{Coord, GameState, PlayerId, NUM_TEAM_COLORS};

/// Upper bound on queued waypoints per order.
pub const MAX_WAYPOINTS: usize = 100;

pub const MAX_NAME_LENGTH: usize = 10;

/// Player names: words of `[A-Za-z0-9_-]` separated by single spaces, no
/// leading or trailing space, at most 10 bytes.
pub fn is_valid_player_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    let word_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut prev_space = true; // a space here means a leading/double space
    for c in name.chars() {
        if c == ' ' {
            if prev_space {
                return false;
            }
            prev_space = true;
        } else if word_char(c) {
            prev_space = false;
        } else {
            return false;
        }
    }
    !prev_space
}

/// An order for a single character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CharOrder {
    /// Walk a queued path.
    Travel { waypoints: Vec<Coord> },
    /// Strike an adjacent enemy player.
    Attack { victim: PlayerId },
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum MoveKind {
    #[default]
    Noop,
    Spawn { color: u8 },
    Orders(BTreeMap<u32, CharOrder>),
}

/// A parsed move for one player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub player: PlayerId,
    pub message: Option<String>,
    pub address: Option<String>,
    pub address_lock: Option<String>,
    pub kind: MoveKind,
}

impl Move {
    /// Parse a move from its JSON value. Returns `None` for anything that
    /// is not a syntactically valid move for `player`.
    pub fn parse(player: &str, value: &[u8]) -> Option<Move> {
        if !is_valid_player_name(player) {
            return None;
        }
        let text = std::str::from_utf8(value).ok()?;
        let Value::Object(mut obj) = serde_json::from_str(text).ok()? else {
            return None;
        };

        let message = match obj.remove("message") {
            Some(Value::String(s)) => Some(s),
            Some(_) => return None,
            None => None,
        };
        let address = match obj.remove("address") {
            Some(Value::String(s)) => {
                if !s.is_empty() && !is_valid_address(&s) {
                    return None;
                }
                Some(s)
            }
            Some(_) => return None,
            None => None,
        };
        let address_lock = match obj.remove("addressLock") {
            Some(Value::String(s)) => {
                if !s.is_empty() && !is_valid_address(&s) {
                    return None;
                }
                Some(s)
            }
            Some(_) => return None,
            None => None,
        };

        let kind = if obj.is_empty() {
            MoveKind::Noop
        } else if obj.len() == 1 && obj.contains_key("color") {
            let color = obj["color"].as_i64()?;
            if !(0..NUM_TEAM_COLORS as i64).contains(&color) {
                return None;
            }
            MoveKind::Spawn { color: color as u8 }
        } else {
            let mut orders = BTreeMap::new();
            for (key, val) in obj {
                // Character indices are canonical decimal strings.
                let index: u32 = key.parse().ok()?;
                if index.to_string() != key {
                    return None;
                }
                orders.insert(index, parse_char_order(val)?);
            }
            MoveKind::Orders(orders)
        };

        Some(Move {
            player: player.to_string(),
            message,
            address,
            address_lock,
            kind,
        })
    }

    /// Whether this move is applicable to the given state.
    pub fn is_valid(&self, state: &GameState) -> bool {
        match &self.kind {
            MoveKind::Spawn { .. } => !state.players.contains_key(&self.player),
            MoveKind::Noop => state.players.contains_key(&self.player),
            MoveKind::Orders(orders) => match state.players.get(&self.player) {
                None => false,
                Some(player) => orders.keys().all(|idx| player.characters.contains_key(idx)),
            },
        }
    }

    /// The address lock that must authorise this move's address
    /// operations, if any. `None` means no authorisation needed (no
    /// address operation, a spawn move, or no lock set).
    pub fn address_operation_permission(&self, state: &GameState) -> Option<String> {
        if self.address.is_none() && self.address_lock.is_none() {
            return None;
        }
        let player = state.players.get(&self.player)?;
        if player.address_lock.is_empty() {
            None
        } else {
            Some(player.address_lock.clone())
        }
    }
}

fn parse_char_order(value: Value) -> Option<CharOrder> {
    let Value::Object(obj) = value else {
        return None;
    };

    // {"attack": "<victim>"}
    if obj.len() == 1 {
        if let Some(victim) = obj.get("attack") {
            let victim = victim.as_str()?;
            if !is_valid_player_name(victim) {
                return None;
            }
            return Some(CharOrder::Attack { victim: victim.to_string() });
        }
        // {"wp": [[x, y], ...]}
        if let Some(wp) = obj.get("wp") {
            let array = wp.as_array()?;
            if array.is_empty() || array.len() > MAX_WAYPOINTS {
                return None;
            }
            let mut waypoints = Vec::with_capacity(array.len());
            for entry in array {
                let pair = entry.as_array()?;
                if pair.len() != 2 {
                    return None;
                }
                waypoints.push(parse_coord(&pair[0], &pair[1])?);
            }
            return Some(CharOrder::Travel { waypoints });
        }
    }

    // {"x": .., "y": ..}
    if obj.len() == 2 {
        if let (Some(x), Some(y)) = (obj.get("x"), obj.get("y")) {
            let coord = parse_coord(x, y)?;
            return Some(CharOrder::Travel { waypoints: vec![coord] });
        }
    }

    None
}

fn parse_coord(x: &Value, y: &Value) -> Option<Coord> {
    let x = x.as_i64()?;
    let y = y.as_i64()?;
    if !map::is_inside_map(i32::try_from(x).ok()?, i32::try_from(y).ok()?) {
        return None;
    }
    Some(Coord::new(x as i16, y as i16))
}

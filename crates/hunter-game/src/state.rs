//! The game world state.
//!
//! Everything here is plain data with ordered (BTreeMap) containers, so
//! map iteration order is the consensus order. The state at height `h` is
//! a pure function of the state at `h−1` and the moves of block `h`; see
//! [`crate::step`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hunter_core::types::Hash256;

use crate::map;

/// A player's unique on-chain name.
pub type PlayerId = String;

/// A character, addressed by owner and character index.
pub type CharId = (PlayerId, u32);

/// Index of the general: the character whose death ends the player.
pub const GENERAL_INDEX: u32 = 0;

pub const NUM_TEAM_COLORS: u8 = 4;

/// Chronons a character may linger in a spawn strip before the game kills
/// it.
pub const MAX_STAY_IN_SPAWN_AREA: u8 = 30;

/// A tile coordinate. Ordering is `(y, x)` lexicographic, which is the
/// iteration order of every coordinate-keyed map.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Chebyshev distance, the reach of an attack.
pub fn dist_l_inf(a: Coord, b: Coord) -> i32 {
    ((a.x as i32) - (b.x as i32))
        .abs()
        .max(((a.y as i32) - (b.y as i32)).abs())
}

/// Coins resting on a tile.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct LootInfo {
    pub amount: i64,
    /// Height range over which this loot accumulated. Informational, and
    /// keeps derived bounty transactions unique.
    pub first_block: i32,
    pub last_block: i32,
}

impl LootInfo {
    pub fn new(amount: i64, height: i32) -> Self {
        Self { amount, first_block: height, last_block: height }
    }

    /// Fold collected coins into a carried stash.
    pub fn collect(&mut self, other: LootInfo, height: i32) {
        if self.amount == 0 {
            self.first_block = other.first_block;
        }
        self.amount += other.amount;
        self.last_block = height;
    }
}

/// Direction a sprite faces, numeric-keypad layout (1 = down-left,
/// 9 = up-right; 5 is never stored).
pub fn direction_between(from: Coord, to: Coord) -> u8 {
    let dx = ((to.x as i32) - (from.x as i32)).clamp(-1, 1);
    let dy = ((to.y as i32) - (from.y as i32)).clamp(-1, 1);
    ((1 - dy) * 3 + dx + 2) as u8
}

/// One character on the map.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CharacterState {
    pub coord: Coord,
    /// Where the current leg of movement started.
    pub from: Coord,
    /// Tile currently walked toward.
    pub target: Coord,
    /// Remaining queued waypoints, walked front to back.
    pub waypoints: Vec<Coord>,
    pub dir: u8,
    pub stay_in_spawn: u8,
    /// Coins carried, banked when standing on a spawn tile.
    pub loot: LootInfo,
}

impl CharacterState {
    pub fn at(coord: Coord) -> Self {
        Self {
            coord,
            from: coord,
            target: coord,
            waypoints: Vec::new(),
            dir: 2,
            stay_in_spawn: 0,
            loot: LootInfo::default(),
        }
    }

    pub fn stop_moving(&mut self) {
        self.from = self.coord;
        self.target = self.coord;
        self.waypoints.clear();
    }

    /// Begin walking a queued path. The first waypoint becomes the target.
    pub fn set_waypoints(&mut self, mut waypoints: Vec<Coord>) {
        if waypoints.is_empty() {
            return;
        }
        self.from = self.coord;
        self.target = waypoints.remove(0);
        self.waypoints = waypoints;
    }

    fn is_moving(&self) -> bool {
        self.target != self.coord
    }

    /// Advance one tile along the straight line from `from` to `target`.
    ///
    /// The dominant axis steps by one; the other axis follows the line
    /// slope with integer rounding. A non-walkable next tile stops the
    /// character in place.
    pub fn move_towards_waypoint(&mut self) {
        if !self.is_moving() {
            self.advance_waypoint_queue();
            if !self.is_moving() {
                return;
            }
        }

        fn coord_step(x: i16, target: i16) -> i16 {
            if x < target {
                x + 1
            } else if x > target {
                x - 1
            } else {
                x
            }
        }

        // Compute the trailing coordinate from the leading one using the
        // line slope, rounding half away from zero. Division truncates
        // toward zero, matching the consensus arithmetic exactly.
        fn coord_upd(u: i16, v: i16, du: i32, dv: i32, from_u: i16, from_v: i16) -> i16 {
            if dv == 0 {
                return v;
            }
            let tmp = ((u as i32) - (from_u as i32)) * dv;
            let mut res = (tmp.abs() + du.abs() / 2) / du;
            if tmp < 0 {
                res = -res;
            }
            (res + from_v as i32) as i16
        }

        let dx = (self.target.x as i32) - (self.from.x as i32);
        let dy = (self.target.y as i32) - (self.from.y as i32);

        let new_c = if dx.abs() > dy.abs() {
            let nx = coord_step(self.coord.x, self.target.x);
            let ny = coord_upd(nx, self.coord.y, dx, dy, self.from.x, self.from.y);
            Coord::new(nx, ny)
        } else {
            let ny = coord_step(self.coord.y, self.target.y);
            let nx = coord_upd(ny, self.coord.x, dy, dx, self.from.y, self.from.x);
            Coord::new(nx, ny)
        };

        if !map::coord_walkable(new_c) {
            self.stop_moving();
        } else {
            let new_dir = direction_between(self.coord, new_c);
            if new_dir != 5 {
                self.dir = new_dir;
            }
            self.coord = new_c;
            self.advance_waypoint_queue();
        }
    }

    /// When the current target is reached, pull the next waypoint.
    fn advance_waypoint_queue(&mut self) {
        while self.coord == self.target && !self.waypoints.is_empty() {
            self.from = self.coord;
            self.target = self.waypoints.remove(0);
        }
    }
}

/// One player: a team colour and their characters.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct PlayerState {
    pub color: u8,
    pub characters: BTreeMap<u32, CharacterState>,
    pub message: String,
    pub message_block: i32,
    /// Address receiving kill refunds and bounties. Empty means the name
    /// address.
    pub reward_address: String,
    /// When set, address operations require a signature by this address.
    pub address_lock: String,
    /// Remaining life counter; negative means unlimited.
    pub remaining_life: i32,
}

impl PlayerState {
    pub fn spawn(color: u8, coord: Coord, dir: u8) -> Self {
        let mut character = CharacterState::at(coord);
        character.dir = dir;
        let mut characters = BTreeMap::new();
        characters.insert(GENERAL_INDEX, character);
        Self {
            color,
            characters,
            message: String::new(),
            message_block: 0,
            reward_address: String::new(),
            address_lock: String::new(),
            remaining_life: -1,
        }
    }

    pub fn general(&self) -> Option<&CharacterState> {
        self.characters.get(&GENERAL_INDEX)
    }
}

/// The whole world at one height.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GameState {
    pub players: BTreeMap<PlayerId, PlayerState>,
    pub loot: BTreeMap<Coord, LootInfo>,
    /// Coins held by the game itself (taxes routed back to the fund).
    pub game_fund: i64,
    /// Height of the block whose moves are folded in; -1 before genesis.
    pub height: i32,
    /// Hash of that block; also the seed of the step's randomness.
    pub block_hash: Hash256,
    /// Character currently carrying the crown, if any.
    pub crown_holder: Option<CharId>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// The initial state, before the genesis block.
    pub fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            loot: BTreeMap::new(),
            game_fund: 0,
            height: -1,
            block_hash: Hash256::ZERO,
            crown_holder: None,
        }
    }

    /// Add (or with a negative amount, remove) coins on a tile.
    pub fn add_loot(&mut self, coord: Coord, amount: i64) {
        if amount == 0 {
            return;
        }
        match self.loot.get_mut(&coord) {
            Some(info) => {
                info.amount += amount;
                if info.amount == 0 {
                    self.loot.remove(&coord);
                } else {
                    info.last_block = self.height;
                }
            }
            None => {
                self.loot.insert(coord, LootInfo::new(amount, self.height));
            }
        }
    }

    /// Total coins lying on the map.
    pub fn total_loot(&self) -> i64 {
        self.loot.values().map(|l| l.amount).sum()
    }

    /// Total coins carried by characters.
    pub fn total_carried(&self) -> i64 {
        self.players
            .values()
            .flat_map(|p| p.characters.values())
            .map(|c| c.loot.amount)
            .sum()
    }

    /// JSON rendering for the RPC surface.
    pub fn to_json(&self) -> serde_json::Value {
        let players: serde_json::Map<String, serde_json::Value> = self
            .players
            .iter()
            .map(|(id, p)| (id.clone(), player_to_json(p)))
            .collect();
        let loot: Vec<serde_json::Value> = self
            .loot
            .iter()
            .map(|(c, l)| {
                serde_json::json!({
                    "x": c.x,
                    "y": c.y,
                    "amount": l.amount,
                    "blockRange": [l.first_block, l.last_block],
                })
            })
            .collect();
        serde_json::json!({
            "players": players,
            "loot": loot,
            "gameFund": self.game_fund,
            "height": self.height,
            "hashBlock": self.block_hash.to_string(),
            "crownHolder": self.crown_holder.as_ref().map(|(p, i)| {
                serde_json::json!({"player": p, "index": i})
            }),
        })
    }
}

fn player_to_json(p: &PlayerState) -> serde_json::Value {
    let characters: serde_json::Map<String, serde_json::Value> = p
        .characters
        .iter()
        .map(|(idx, c)| {
            let mut obj = serde_json::json!({
                "x": c.coord.x,
                "y": c.coord.y,
                "dir": c.dir,
                "loot": c.loot.amount,
            });
            if c.target != c.coord {
                obj["fromX"] = c.from.x.into();
                obj["fromY"] = c.from.y.into();
                obj["targetX"] = c.target.x.into();
                obj["targetY"] = c.target.y.into();
            }
            (idx.to_string(), obj)
        })
        .collect();
    let mut obj = serde_json::json!({
        "color": p.color,
        "characters": characters,
    });
    if !p.message.is_empty() {
        obj["message"] = p.message.clone().into();
        obj["message_block"] = p.message_block.into();
    }
    if !p.reward_address.is_empty() {
        obj["address"] = p.reward_address.clone().into();
    }
    if !p.address_lock.is_empty() {
        obj["addressLock"] = p.address_lock.clone().into();
    }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_order_is_y_then_x() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(Coord::new(5, 1));
        set.insert(Coord::new(0, 2));
        set.insert(Coord::new(3, 1));
        let order: Vec<Coord> = set.into_iter().collect();
        assert_eq!(order, vec![Coord::new(3, 1), Coord::new(5, 1), Coord::new(0, 2)]);
    }

    #[test]
    fn chebyshev_distance() {
        assert_eq!(dist_l_inf(Coord::new(0, 0), Coord::new(1, 1)), 1);
        assert_eq!(dist_l_inf(Coord::new(0, 0), Coord::new(-3, 2)), 3);
        assert_eq!(dist_l_inf(Coord::new(7, 7), Coord::new(7, 7)), 0);
    }

    #[test]
    fn direction_numpad_layout() {
        let c = Coord::new(10, 10);
        assert_eq!(direction_between(c, Coord::new(11, 10)), 6); // east
        assert_eq!(direction_between(c, Coord::new(9, 10)), 4); // west
        assert_eq!(direction_between(c, Coord::new(10, 9)), 8); // north
        assert_eq!(direction_between(c, Coord::new(10, 11)), 2); // south
        assert_eq!(direction_between(c, Coord::new(11, 11)), 3); // south-east
        assert_eq!(direction_between(c, c), 5);
    }

    #[test]
    fn straight_line_walk_east() {
        let mut ch = CharacterState::at(Coord::new(0, 0));
        ch.set_waypoints(vec![Coord::new(5, 0)]);
        for expected_x in 1..=5i16 {
            ch.move_towards_waypoint();
            assert_eq!(ch.coord, Coord::new(expected_x, 0));
        }
        assert_eq!(ch.dir, 6);
        // Arrived; further steps are no-ops.
        ch.move_towards_waypoint();
        assert_eq!(ch.coord, Coord::new(5, 0));
    }

    #[test]
    fn diagonal_line_tracks_slope() {
        let mut ch = CharacterState::at(Coord::new(0, 0));
        ch.set_waypoints(vec![Coord::new(6, 3)]);
        let mut path = Vec::new();
        for _ in 0..6 {
            ch.move_towards_waypoint();
            path.push(ch.coord);
        }
        assert_eq!(*path.last().unwrap(), Coord::new(6, 3));
        // The y coordinate never deviates from the rounded line.
        for c in &path {
            let expected_y = ((c.x as i32) * 3 + 3) / 6;
            assert!((c.y as i32 - expected_y).abs() <= 1, "{c:?}");
        }
    }

    #[test]
    fn multi_leg_waypoint_queue() {
        let mut ch = CharacterState::at(Coord::new(0, 0));
        ch.set_waypoints(vec![Coord::new(2, 0), Coord::new(2, 2)]);
        for _ in 0..4 {
            ch.move_towards_waypoint();
        }
        assert_eq!(ch.coord, Coord::new(2, 2));
        assert!(ch.waypoints.is_empty());
    }

    #[test]
    fn add_loot_merges_and_clears() {
        let mut state = GameState::new();
        state.height = 10;
        let c = Coord::new(50, 50);
        state.add_loot(c, 100);
        state.add_loot(c, 50);
        assert_eq!(state.loot[&c].amount, 150);
        assert_eq!(state.loot[&c].first_block, 10);

        state.add_loot(c, -150);
        assert!(!state.loot.contains_key(&c));

        state.add_loot(c, 0);
        assert!(!state.loot.contains_key(&c));
    }

    #[test]
    fn spawn_player_has_general() {
        let p = PlayerState::spawn(2, Coord::new(0, 0), 3);
        assert_eq!(p.color, 2);
        assert!(p.general().is_some());
        assert_eq!(p.characters.len(), 1);
    }

    #[test]
    fn state_json_shape() {
        let mut state = GameState::new();
        state.height = 5;
        state.players.insert("alice".into(), PlayerState::spawn(0, Coord::new(0, 0), 3));
        state.add_loot(Coord::new(3, 3), 42);
        let json = state.to_json();
        assert_eq!(json["height"], 5);
        assert!(json["players"]["alice"]["characters"]["0"].is_object());
        assert_eq!(json["loot"][0]["amount"], 42);
    }

    #[test]
    fn bincode_snapshot_roundtrip() {
        let mut state = GameState::new();
        state.height = 9;
        state.block_hash = Hash256([7; 32]);
        state.players.insert("bob".into(), PlayerState::spawn(1, Coord::new(501, 0), 1));
        state.add_loot(Coord::new(9, 9), 77);
        let encoded = bincode::encode_to_vec(&state, bincode::config::standard()).unwrap();
        let (decoded, _): (GameState, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(decoded, state);
    }
}

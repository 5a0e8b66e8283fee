//! The per-block step function.
//!
//! `perform_step` is pure: `(state, moves, block hash) → (state', result)`.
//! All moves of one block happen simultaneously, so each stage reads the
//! pre-block state where the original rules demand it and the stages run
//! in a fixed order. Wherever iteration order matters it is the ascending
//! order of the underlying BTreeMaps.
//!
//! Miners call the step with a zero hash to learn the tax before the block
//! hash exists; the function returns right after banking in that case.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use hunter_core::types::Hash256;

use crate::map::{
    self, HARVEST_AREAS, NUM_HARVEST_AREAS, SPAWN_AREA_LENGTH, TOTAL_HARVEST,
};
use crate::moves::{CharOrder, Move, MoveKind};
use crate::rand::GameRng;
use crate::state::{
    dist_l_inf, CharId, Coord, GameState, LootInfo, PlayerId, PlayerState,
    GENERAL_INDEX, MAX_STAY_IN_SPAWN_AREA,
};

/// Inputs of one step beyond the previous state.
#[derive(Clone, Debug)]
pub struct StepData {
    /// Coin locked per name, dropped as loot when its player dies.
    pub name_coin_amount: i64,
    /// Coins scattered over the harvest areas this block.
    pub treasure_amount: i64,
    /// Hash of the block carrying the moves; zero for a miner tax probe.
    pub new_hash: Hash256,
    pub moves: Vec<Move>,
}

/// Loot banked by one character this step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bounty {
    pub amount: i64,
    pub first_block: i32,
    pub last_block: i32,
    /// The spawn tile on which the loot was banked.
    pub coord: Coord,
    /// The banker's reward address as of banking time. Captured here, in
    /// the hash-independent part of the step, so miners probing the tax
    /// with a zero hash derive byte-identical payout transactions.
    pub address: String,
}

/// Everything a step produces besides the new state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepResult {
    pub bounties: BTreeMap<CharId, Bounty>,
    /// Characters removed this step.
    pub killed: BTreeSet<CharId>,
    /// Players whose general died this step (their name dies with them).
    pub killed_players: BTreeSet<PlayerId>,
    /// Victim player → attacking players. Absent for spawn-area deaths.
    pub killed_by: BTreeMap<PlayerId, BTreeSet<PlayerId>>,
    /// Kill and banking taxes, credited to the block's coinbase allowance.
    pub tax_amount: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("invalid move for player {0}")] InvalidMove(PlayerId),
    #[error("duplicate move for player {0}")] DuplicateMove(PlayerId),
}

/// Advance the world by one block.
pub fn perform_step(
    prev: &GameState,
    data: &StepData,
) -> Result<(GameState, StepResult), StepError> {
    // 1. Every move must apply to the previous state, one per player.
    let mut movers = BTreeSet::new();
    for m in &data.moves {
        if !movers.insert(m.player.clone()) {
            return Err(StepError::DuplicateMove(m.player.clone()));
        }
        if !m.is_valid(prev) {
            return Err(StepError::InvalidMove(m.player.clone()));
        }
    }

    // 2. The new state starts as a copy one chronon later.
    let mut state = prev.clone();
    state.height = prev.height + 1;
    state.block_hash = data.new_hash;

    let mut result = StepResult::default();

    // 3. Attacks, judged against the previous state. Attackers stop.
    for m in &data.moves {
        let MoveKind::Orders(orders) = &m.kind else { continue };
        for (attacker_idx, order) in orders {
            let CharOrder::Attack { victim } = order else { continue };
            let attacker_player = &prev.players[&m.player];
            let attacker = &attacker_player.characters[attacker_idx];
            let Some(victim_player) = prev.players.get(victim) else { continue };
            if victim_player.color == attacker_player.color {
                continue;
            }
            for (victim_idx, victim_char) in &victim_player.characters {
                if dist_l_inf(attacker.coord, victim_char.coord) > 1 {
                    continue;
                }
                // Safe at home: spawn strips shelter their occupants.
                if map::coord_in_spawn_area(victim_char.coord) {
                    continue;
                }
                result.killed.insert((victim.clone(), *victim_idx));
                result
                    .killed_by
                    .entry(victim.clone())
                    .or_default()
                    .insert(m.player.clone());
            }
            if let Some(p) = state.players.get_mut(&m.player) {
                if let Some(c) = p.characters.get_mut(attacker_idx) {
                    c.stop_moving();
                }
            }
        }
    }

    // 4. The spawn strips kill anyone who lingers too long.
    for (pid, player) in state.players.iter_mut() {
        for (cidx, character) in player.characters.iter_mut() {
            if map::coord_in_spawn_area(character.coord) {
                if character.stay_in_spawn >= MAX_STAY_IN_SPAWN_AREA {
                    result.killed.insert((pid.clone(), *cidx));
                }
                character.stay_in_spawn = character.stay_in_spawn.saturating_add(1);
            } else {
                character.stay_in_spawn = 0;
            }
        }
    }

    // Losing the general terminates the player: remaining characters die
    // with it (as game deaths, untaxed).
    let doomed: Vec<PlayerId> = result
        .killed
        .iter()
        .filter(|(_, idx)| *idx == GENERAL_INDEX)
        .map(|(pid, _)| pid.clone())
        .collect();
    for pid in doomed {
        if let Some(player) = prev.players.get(&pid) {
            for cidx in player.characters.keys() {
                result.killed.insert((pid.clone(), *cidx));
            }
        }
        result.killed_players.insert(pid);
    }

    // 5. Killed characters drop their loot just outside the spawn strip.
    // Kills by a player are taxed 4%; deaths to the game are not.
    for (pid, cidx) in &result.killed {
        let victim_char = &prev.players[pid].characters[cidx];
        let mut amount = victim_char.loot.amount;
        if *cidx == GENERAL_INDEX && result.killed_players.contains(pid) {
            amount += data.name_coin_amount;
        }
        if result.killed_by.contains_key(pid) {
            let tax = amount / 25;
            result.tax_amount += tax;
            amount -= tax;
        }
        state.add_loot(map::push_coord_out_of_spawn_area(victim_char.coord), amount);
    }

    // 6. Queued paths replace current ones.
    for m in &data.moves {
        let MoveKind::Orders(orders) = &m.kind else { continue };
        for (cidx, order) in orders {
            let CharOrder::Travel { waypoints } = order else { continue };
            if let Some(p) = state.players.get_mut(&m.player) {
                if let Some(c) = p.characters.get_mut(cidx) {
                    c.set_waypoints(waypoints.clone());
                }
            }
        }
    }

    // 7. Remove the dead.
    for (pid, cidx) in &result.killed {
        if let Some(player) = state.players.get_mut(pid) {
            player.characters.remove(cidx);
            if player.characters.is_empty() || *cidx == GENERAL_INDEX {
                state.players.remove(pid);
            }
        }
        let crown_lost =
            matches!(&state.crown_holder, Some((hp, hi)) if hp == pid && hi == cidx);
        if crown_lost {
            state.crown_holder = None;
        }
    }

    // 8. Everyone still alive walks one tile.
    for player in state.players.values_mut() {
        for character in player.characters.values_mut() {
            character.move_towards_waypoint();
        }
    }

    // 9. Banking. Must not depend on the randomness below: miners need the
    // tax before the block hash exists.
    for (pid, player) in state.players.iter_mut() {
        let reward_address = player.reward_address.clone();
        for (cidx, character) in player.characters.iter_mut() {
            if character.loot.amount > 0 && map::coord_in_spawn_area(character.coord) {
                let tax = character.loot.amount / 10;
                result.tax_amount += tax;
                character.loot.amount -= tax;
                result.bounties.insert(
                    (pid.clone(), *cidx),
                    Bounty {
                        amount: character.loot.amount,
                        first_block: character.loot.first_block,
                        last_block: character.loot.last_block,
                        coord: character.coord,
                        address: reward_address.clone(),
                    },
                );
                character.loot = LootInfo::default();
            }
        }
    }

    // 10. Tax probe: a zero hash means a miner asking for the numbers.
    if state.block_hash.is_zero() {
        return Ok((state, result));
    }

    let mut rng = GameRng::new(&state.block_hash);

    // 11. New players appear on their colour's spawn edge.
    for m in &data.moves {
        let MoveKind::Spawn { color } = &m.kind else { continue };
        let color = *color;
        let pos = rng.get_int_rnd((2 * SPAWN_AREA_LENGTH - 1) as i64) as i32;
        let x = if pos < SPAWN_AREA_LENGTH { pos } else { 0 };
        let y = if pos < SPAWN_AREA_LENGTH { 0 } else { pos - SPAWN_AREA_LENGTH };
        let (x, y) = match color {
            0 => (x, y),
            1 => (map::MAP_WIDTH - 1 - x, y),
            2 => (map::MAP_WIDTH - 1 - x, map::MAP_HEIGHT - 1 - y),
            _ => (x, map::MAP_HEIGHT - 1 - y),
        };
        let dir = spawn_direction(x, y);
        state
            .players
            .insert(m.player.clone(), PlayerState::spawn(color, Coord::new(x as i16, y as i16), dir));
    }

    // 12. Common fields: message, reward address, address lock.
    for m in &data.moves {
        let Some(player) = state.players.get_mut(&m.player) else { continue };
        if let Some(message) = &m.message {
            player.message = message.clone();
            player.message_block = state.height;
        }
        if let Some(address) = &m.address {
            player.reward_address = address.clone();
        }
        if let Some(lock) = &m.address_lock {
            player.address_lock = lock.clone();
        }
    }

    // 13. Treasure rains on the harvest areas pro rata; the last area
    // absorbs the integer-division remainder so the drop sums exactly.
    let mut total_treasure = 0i64;
    for (i, area) in HARVEST_AREAS.iter().enumerate() {
        let mut harvest;
        loop {
            let hx = area.x + rng.get_int_rnd(area.w as i64) as i32;
            let hy = area.y + rng.get_int_rnd(area.h as i64) as i32;
            harvest = Coord::new(hx as i16, hy as i16);
            if map::coord_walkable(harvest) {
                break;
            }
        }
        let treasure = if i == NUM_HARVEST_AREAS - 1 {
            data.treasure_amount - total_treasure
        } else {
            area.fraction * data.treasure_amount / TOTAL_HARVEST
        };
        state.add_loot(harvest, treasure);
        total_treasure += treasure;
    }
    debug_assert_eq!(total_treasure, data.treasure_amount);

    // 14. Characters standing on loot pick it up, splitting evenly (in
    // iteration order when not divisible).
    divide_loot_among_characters(&mut state);

    Ok((state, result))
}

/// Facing direction of a fresh spawn, looking into the map.
fn spawn_direction(x: i32, y: i32) -> u8 {
    if x == 0 {
        if y == 0 {
            3
        } else if y == map::MAP_HEIGHT - 1 {
            9
        } else {
            6
        }
    } else if x == map::MAP_WIDTH - 1 {
        if y == 0 {
            1
        } else if y == map::MAP_HEIGHT - 1 {
            7
        } else {
            4
        }
    } else if y == 0 {
        2
    } else {
        8
    }
}

fn divide_loot_among_characters(state: &mut GameState) {
    // Count claimants per loot tile first.
    let mut claimants: BTreeMap<Coord, i64> = BTreeMap::new();
    for player in state.players.values() {
        for character in player.characters.values() {
            if state.loot.contains_key(&character.coord) {
                *claimants.entry(character.coord).or_insert(0) += 1;
            }
        }
    }

    let height = state.height;
    let mut collected: Vec<(Coord, i64)> = Vec::new();
    for player in state.players.values_mut() {
        for character in player.characters.values_mut() {
            let coord = character.coord;
            let Some(remaining) = claimants.get_mut(&coord) else { continue };
            let Some(info) = state.loot.get(&coord) else { continue };
            let share = info.amount / *remaining;
            *remaining -= 1;
            // Tiny piles can leave late claimants empty-handed.
            if share > 0 {
                character.loot.collect(
                    LootInfo { amount: share, first_block: info.first_block, last_block: info.last_block },
                    height,
                );
                collected.push((coord, share));
            }
        }
    }
    for (coord, share) in collected {
        state.add_loot(coord, -share);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Move;

    fn parse_move(player: &str, json: &str) -> Move {
        Move::parse(player, json.as_bytes()).unwrap()
    }

    fn step_data(moves: Vec<Move>, hash_byte: u8) -> StepData {
        StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: 900_000_000,
            new_hash: Hash256([hash_byte; 32]),
            moves,
        }
    }

    fn run(state: &GameState, data: &StepData) -> (GameState, StepResult) {
        perform_step(state, data).unwrap()
    }

    fn spawned(name: &str, color: u8) -> GameState {
        let state = GameState::new();
        let data = step_data(
            vec![parse_move(name, &format!("{{\"color\":{color}}}"))],
            0x11,
        );
        run(&state, &data).0
    }

    #[test]
    fn step_is_pure() {
        let state = spawned("alice", 0);
        let data = step_data(vec![parse_move("alice", "{\"0\":{\"x\":30,\"y\":30}}")], 0x22);
        let (a, ra) = run(&state, &data);
        let (b, rb) = run(&state, &data);
        assert_eq!(a, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn height_and_hash_advance() {
        let state = GameState::new();
        let data = step_data(vec![], 0x33);
        let (next, _) = run(&state, &data);
        assert_eq!(next.height, 0);
        assert_eq!(next.block_hash, Hash256([0x33; 32]));
    }

    #[test]
    fn invalid_move_aborts_step() {
        // Orders for a player that does not exist.
        let data = step_data(vec![parse_move("ghost", "{\"0\":{\"x\":1,\"y\":1}}")], 0x44);
        assert!(matches!(
            perform_step(&GameState::new(), &data),
            Err(StepError::InvalidMove(_)),
        ));
    }

    #[test]
    fn duplicate_moves_rejected() {
        let state = spawned("alice", 0);
        let data = step_data(
            vec![parse_move("alice", "{}"), parse_move("alice", "{}")],
            0x44,
        );
        assert!(matches!(
            perform_step(&state, &data),
            Err(StepError::DuplicateMove(_)),
        ));
    }

    #[test]
    fn spawn_lands_on_own_colour_edge() {
        let state = spawned("alice", 0);
        let c = state.players["alice"].general().unwrap().coord;
        assert!(map::coord_in_spawn_area(c));
        assert!(c.x as i32 <= SPAWN_AREA_LENGTH || c.y as i32 <= SPAWN_AREA_LENGTH);

        let state = spawned("bob", 2);
        let c = state.players["bob"].general().unwrap().coord;
        assert!(map::coord_in_spawn_area(c));
        assert!(c.x as i32 >= map::MAP_WIDTH - 1 - SPAWN_AREA_LENGTH
            || c.y as i32 >= map::MAP_HEIGHT - 1 - SPAWN_AREA_LENGTH);
    }

    #[test]
    fn movement_walks_one_tile_per_block() {
        let mut state = spawned("alice", 0);
        // Plant alice at a known interior-edge spot for determinism.
        {
            let ch = state
                .players
                .get_mut("alice")
                .unwrap()
                .characters
                .get_mut(&0)
                .unwrap();
            ch.coord = Coord::new(0, 0);
            ch.stop_moving();
        }
        let data = step_data(vec![parse_move("alice", "{\"0\":{\"x\":5,\"y\":0}}")], 0x55);
        let (mut state, _) = run(&state, &data);
        assert_eq!(state.players["alice"].general().unwrap().coord, Coord::new(1, 0));

        for round in 2..=5i16 {
            let (next, _) = run(&state, &step_data(vec![], 0x55 ^ round as u8));
            state = next;
            assert_eq!(
                state.players["alice"].general().unwrap().coord,
                Coord::new(round, 0),
                "round {round}",
            );
        }
        // Arrived: no further drift.
        let (state, _) = run(&state, &step_data(vec![], 0x01));
        assert_eq!(state.players["alice"].general().unwrap().coord, Coord::new(5, 0));
    }

    #[test]
    fn attack_kills_adjacent_enemy_and_drops_taxed_loot() {
        let mut state = spawned("alice", 0);
        let (s2, _) = run(&state, &step_data(vec![parse_move("bob", "{\"color\":1}")], 0x66));
        state = s2;

        // Teleport both to adjacent interior tiles; give alice loot.
        {
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            a.coord = Coord::new(100, 100);
            a.stop_moving();
            a.loot = LootInfo::new(1_000_000, 0);
            let b = state.players.get_mut("bob").unwrap().characters.get_mut(&0).unwrap();
            b.coord = Coord::new(101, 100);
            b.stop_moving();
        }

        let data = step_data(vec![parse_move("bob", "{\"0\":{\"attack\":\"alice\"}}")], 0x77);
        let (next, result) = run(&state, &data);

        assert!(!next.players.contains_key("alice"));
        assert!(next.players.contains_key("bob"));
        assert!(result.killed.contains(&("alice".to_string(), 0)));
        assert!(result.killed_players.contains("alice"));
        assert_eq!(result.killed_by["alice"].len(), 1);

        // Dropped: carried loot + name coin, minus 4%. Counted together
        // with carried loot in case a treasure pile landed under bob.
        let on_map: i64 = next.loot.values().map(|l| l.amount).sum::<i64>();
        let expected_gross = 1_000_000 + data.name_coin_amount;
        let expected_tax = expected_gross / 25;
        assert_eq!(
            on_map + next.total_carried(),
            expected_gross - expected_tax + data.treasure_amount,
        );
        assert_eq!(result.tax_amount, expected_tax);
    }

    #[test]
    fn same_color_attack_is_ignored() {
        let mut state = spawned("alice", 0);
        let (s2, _) = run(&state, &step_data(vec![parse_move("ally", "{\"color\":0}")], 0x21));
        state = s2;
        {
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            a.coord = Coord::new(100, 100);
            a.stop_moving();
            let b = state.players.get_mut("ally").unwrap().characters.get_mut(&0).unwrap();
            b.coord = Coord::new(101, 100);
            b.stop_moving();
        }
        let data = step_data(vec![parse_move("ally", "{\"0\":{\"attack\":\"alice\"}}")], 0x22);
        let (next, result) = run(&state, &data);
        assert!(next.players.contains_key("alice"));
        assert!(result.killed.is_empty());
    }

    #[test]
    fn spawn_area_shelters_victims() {
        let mut state = spawned("alice", 0);
        let (s2, _) = run(&state, &step_data(vec![parse_move("bob", "{\"color\":1}")], 0x23));
        state = s2;
        {
            // Alice sits on her spawn tile; bob stands adjacent inside.
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            a.coord = Coord::new(0, 0);
            a.stop_moving();
            let b = state.players.get_mut("bob").unwrap().characters.get_mut(&0).unwrap();
            b.coord = Coord::new(1, 1);
            b.stop_moving();
        }
        let data = step_data(vec![parse_move("bob", "{\"0\":{\"attack\":\"alice\"}}")], 0x24);
        let (next, result) = run(&state, &data);
        assert!(next.players.contains_key("alice"));
        assert!(result.killed.is_empty());
    }

    #[test]
    fn lingering_in_spawn_is_fatal_untaxed() {
        let mut state = spawned("alice", 0);
        {
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            a.coord = Coord::new(0, 0);
            a.stop_moving();
            a.stay_in_spawn = MAX_STAY_IN_SPAWN_AREA;
        }
        let data = step_data(vec![], 0x25);
        let (next, result) = run(&state, &data);
        assert!(!next.players.contains_key("alice"));
        assert!(result.killed_players.contains("alice"));
        assert!(result.killed_by.is_empty());
        // Game deaths pay no kill tax.
        assert_eq!(result.tax_amount, 0);
        // The name coin still hits the map, pushed out of the strip.
        let dropped: i64 = next
            .loot
            .iter()
            .filter(|(c, _)| **c == Coord::new(1, 1))
            .map(|(_, l)| l.amount)
            .sum();
        assert!(dropped >= data.name_coin_amount);
    }

    #[test]
    fn banking_pays_bounty_minus_ten_percent() {
        let mut state = spawned("alice", 0);
        {
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            // One tile outside the strip, walking in with a full purse.
            a.coord = Coord::new(0, SPAWN_AREA_LENGTH as i16);
            a.stop_moving();
            a.loot = LootInfo::new(1_000, 3);
        }
        let data = StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: 0,
            new_hash: Hash256([0x26; 32]),
            moves: vec![parse_move("alice", "{\"0\":{\"x\":0,\"y\":0}}")],
        };
        let (next, result) = run(&state, &data);
        let key = ("alice".to_string(), 0u32);
        let bounty = &result.bounties[&key];
        assert_eq!(bounty.amount, 900);
        assert_eq!(result.tax_amount, 100);
        assert_eq!(next.players["alice"].general().unwrap().loot.amount, 0);
    }

    #[test]
    fn tax_probe_skips_randomized_stages() {
        let state = spawned("alice", 0);
        let data = StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: 900_000_000,
            new_hash: Hash256::ZERO,
            moves: vec![],
        };
        let (next, _) = run(&state, &data);
        // No treasure dropped on a probe.
        assert_eq!(next.total_loot(), state.total_loot());
        assert!(next.block_hash.is_zero());
    }

    #[test]
    fn treasure_sums_exactly_and_is_deterministic() {
        let state = GameState::new();
        let amount = 9 * 100_000_000i64;
        let data = StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: amount,
            new_hash: Hash256([0xD1; 32]),
            moves: vec![],
        };
        let (a, _) = run(&state, &data);
        assert_eq!(a.total_loot(), amount);
        assert!(a.loot.len() <= NUM_HARVEST_AREAS);
        assert!(a.loot.len() > NUM_HARVEST_AREAS / 2);

        let (b, _) = run(&state, &data);
        assert_eq!(a.loot, b.loot, "drop pattern must be reproducible");

        let other = StepData { new_hash: Hash256([0xD2; 32]), ..data };
        let (c, _) = run(&state, &other);
        assert_ne!(a.loot, c.loot, "different hash, different pattern");
        assert_eq!(c.total_loot(), amount);
    }

    #[test]
    fn loot_is_collected_by_standing_player() {
        let mut state = spawned("alice", 0);
        let spot = Coord::new(60, 60);
        {
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            a.coord = spot;
            a.stop_moving();
        }
        state.add_loot(spot, 5_000);
        let data = StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: 0,
            new_hash: Hash256([0x31; 32]),
            moves: vec![],
        };
        let (next, _) = run(&state, &data);
        assert_eq!(next.players["alice"].general().unwrap().loot.amount, 5_000);
        assert!(!next.loot.contains_key(&spot));
    }

    #[test]
    fn shared_loot_splits_by_iteration_order() {
        let mut state = spawned("alice", 0);
        let (s2, _) = run(&state, &step_data(vec![parse_move("bob", "{\"color\":1}")], 0x32));
        state = s2;
        let spot = Coord::new(70, 70);
        for name in ["alice", "bob"] {
            let c = state.players.get_mut(name).unwrap().characters.get_mut(&0).unwrap();
            c.coord = spot;
            c.stop_moving();
        }
        state.add_loot(spot, 101);
        let data = StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: 0,
            new_hash: Hash256([0x33; 32]),
            moves: vec![],
        };
        let (next, _) = run(&state, &data);
        // 101 / 2 = 50 to alice (first in order), then 51 / 1 = 51 to bob.
        assert_eq!(next.players["alice"].general().unwrap().loot.amount, 50);
        assert_eq!(next.players["bob"].general().unwrap().loot.amount, 51);
        assert!(!next.loot.contains_key(&spot));
    }

    #[test]
    fn disjoint_moves_commute() {
        let mut state = spawned("alice", 0);
        let (s2, _) = run(&state, &step_data(vec![parse_move("bob", "{\"color\":1}")], 0x41));
        state = s2;
        {
            let a = state.players.get_mut("alice").unwrap().characters.get_mut(&0).unwrap();
            a.coord = Coord::new(100, 100);
            a.stop_moving();
            let b = state.players.get_mut("bob").unwrap().characters.get_mut(&0).unwrap();
            b.coord = Coord::new(200, 200);
            b.stop_moving();
        }
        let m1 = parse_move("alice", "{\"0\":{\"x\":110,\"y\":100}}");
        let m2 = parse_move("bob", "{\"0\":{\"x\":200,\"y\":210}}");
        let data_ab = StepData {
            name_coin_amount: 100_000_000,
            treasure_amount: 900,
            new_hash: Hash256([0x42; 32]),
            moves: vec![m1.clone(), m2.clone()],
        };
        let data_ba = StepData { moves: vec![m2, m1], ..data_ab.clone() };
        let (a, ra) = run(&state, &data_ab);
        let (b, rb) = run(&state, &data_ba);
        assert_eq!(a, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn message_and_addresses_applied() {
        let state = spawned("alice", 0);
        let addr = hunter_core::address::hash160_to_address(
            hunter_core::constants::Network::Mainnet,
            &[5u8; 20],
        );
        let json = format!(
            "{{\"message\":\"onwards\",\"address\":\"{addr}\",\"addressLock\":\"{addr}\"}}"
        );
        let data = step_data(vec![parse_move("alice", &json)], 0x51);
        let (next, _) = run(&state, &data);
        let p = &next.players["alice"];
        assert_eq!(p.message, "onwards");
        assert_eq!(p.message_block, next.height);
        assert_eq!(p.reward_address, addr);
        assert_eq!(p.address_lock, addr);
    }
}

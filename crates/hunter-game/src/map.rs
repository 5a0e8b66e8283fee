//! The game map: walkability, spawn strips, and harvest areas.
//!
//! The world is a 502×502 grid. Walkability is a pure function of the
//! coordinate: the map is generated once, deterministically, from a fixed
//! SHA-256-driven scatter, so every node sees the identical terrain. The
//! outermost rows and columns (where players spawn and bank) and a collar
//! around them are always open; rock clusters only appear in the interior.
//!
//! Spawn strips are the 9-tile runs of the border adjacent to each corner;
//! standing in them too long is fatal and banking happens there.

use std::sync::LazyLock;

use sha2::{Digest, Sha256};

use crate::state::Coord;

pub const MAP_WIDTH: i32 = 502;
pub const MAP_HEIGHT: i32 = 502;
pub const SPAWN_AREA_LENGTH: i32 = 9;
pub const NUM_HARVEST_AREAS: usize = 85;
/// The sum of all harvest-area fractions.
pub const TOTAL_HARVEST: i64 = 900;

/// Interior margin kept clear of obstacles so loot pushed out of spawn
/// areas always lands on open ground.
const CLEAR_MARGIN: i32 = 12;

/// Obstacle density: a tile is rock when its hash byte falls below this.
const ROCK_THRESHOLD: u8 = 26;

static OBSTACLES: LazyLock<Vec<bool>> = LazyLock::new(build_obstacle_map);

fn build_obstacle_map() -> Vec<bool> {
    let mut map = vec![false; (MAP_WIDTH * MAP_HEIGHT) as usize];
    for y in CLEAR_MARGIN..MAP_HEIGHT - CLEAR_MARGIN {
        for x in CLEAR_MARGIN..MAP_WIDTH - CLEAR_MARGIN {
            let mut hasher = Sha256::new();
            hasher.update(b"huntercoin-map-v1");
            hasher.update(x.to_le_bytes());
            hasher.update(y.to_le_bytes());
            let digest = hasher.finalize();
            if digest[0] < ROCK_THRESHOLD {
                map[(y * MAP_WIDTH + x) as usize] = true;
            }
        }
    }
    map
}

pub fn is_inside_map(x: i32, y: i32) -> bool {
    (0..MAP_WIDTH).contains(&x) && (0..MAP_HEIGHT).contains(&y)
}

pub fn is_walkable(x: i32, y: i32) -> bool {
    is_inside_map(x, y) && !OBSTACLES[(y * MAP_WIDTH + x) as usize]
}

/// The spawn strips: border tiles within `SPAWN_AREA_LENGTH` of a corner.
pub fn is_in_spawn_area(x: i32, y: i32) -> bool {
    ((x == 0 || x == MAP_WIDTH - 1)
        && (y < SPAWN_AREA_LENGTH || y >= MAP_HEIGHT - SPAWN_AREA_LENGTH))
        || ((y == 0 || y == MAP_HEIGHT - 1)
            && (x < SPAWN_AREA_LENGTH || x >= MAP_WIDTH - SPAWN_AREA_LENGTH))
}

pub fn coord_walkable(c: Coord) -> bool {
    is_walkable(c.x as i32, c.y as i32)
}

pub fn coord_in_spawn_area(c: Coord) -> bool {
    is_in_spawn_area(c.x as i32, c.y as i32)
}

/// Loot never rests inside a spawn strip (spawn strips are also banks);
/// dropped coins are nudged one tile toward the interior.
pub fn push_coord_out_of_spawn_area(c: Coord) -> Coord {
    if !coord_in_spawn_area(c) {
        return c;
    }
    let (x, y) = (c.x as i32, c.y as i32);
    let (nx, ny) = if x == 0 {
        if y == 0 {
            (x + 1, y + 1)
        } else if y == MAP_HEIGHT - 1 {
            (x + 1, y - 1)
        } else {
            (x + 1, y)
        }
    } else if x == MAP_WIDTH - 1 {
        if y == 0 {
            (x - 1, y + 1)
        } else if y == MAP_HEIGHT - 1 {
            (x - 1, y - 1)
        } else {
            (x - 1, y)
        }
    } else if y == 0 {
        (x, y + 1)
    } else if y == MAP_HEIGHT - 1 {
        (x, y - 1)
    } else {
        (x, y)
    };
    Coord::new(nx as i16, ny as i16)
}

/// A rectangle receiving a pro-rata share of every block's treasure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HarvestArea {
    pub fraction: i64,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// The 85 harvest areas: a 9×9 interior lattice of plots minus the centre
/// one, plus a five-plot cross at the heart of the map paying double.
/// Fractions sum to [`TOTAL_HARVEST`]: 80·10 + 5·20.
pub static HARVEST_AREAS: LazyLock<[HarvestArea; NUM_HARVEST_AREAS]> = LazyLock::new(|| {
    let mut areas = Vec::with_capacity(NUM_HARVEST_AREAS);
    let step = (MAP_WIDTH - 2 * CLEAR_MARGIN - 26) / 9;
    for row in 0..9 {
        for col in 0..9 {
            // The centre plot is replaced by the cross below.
            if row == 4 && col == 4 {
                continue;
            }
            areas.push(HarvestArea {
                fraction: 10,
                x: CLEAR_MARGIN + 13 + col * step,
                y: CLEAR_MARGIN + 13 + row * step,
                w: 20,
                h: 20,
            });
        }
    }
    let cx = MAP_WIDTH / 2;
    let cy = MAP_HEIGHT / 2;
    for (dx, dy) in [(0, 0), (0, -40), (0, 40), (-40, 0), (40, 0)] {
        areas.push(HarvestArea {
            fraction: 20,
            x: cx + dx - 8,
            y: cy + dy - 8,
            w: 16,
            h: 16,
        });
    }
    let arr: [HarvestArea; NUM_HARVEST_AREAS] =
        areas.try_into().expect("exactly 85 harvest areas");
    arr
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_edges_are_walkable() {
        for i in 0..MAP_WIDTH {
            assert!(is_walkable(i, 0), "top row at {i}");
            assert!(is_walkable(i, MAP_HEIGHT - 1), "bottom row at {i}");
            assert!(is_walkable(0, i), "left column at {i}");
            assert!(is_walkable(MAP_WIDTH - 1, i), "right column at {i}");
        }
    }

    #[test]
    fn outside_map_not_walkable() {
        assert!(!is_walkable(-1, 0));
        assert!(!is_walkable(0, -1));
        assert!(!is_walkable(MAP_WIDTH, 0));
        assert!(!is_walkable(0, MAP_HEIGHT));
    }

    #[test]
    fn interior_has_obstacles() {
        let blocked = (CLEAR_MARGIN..MAP_HEIGHT - CLEAR_MARGIN)
            .flat_map(|y| (CLEAR_MARGIN..MAP_WIDTH - CLEAR_MARGIN).map(move |x| (x, y)))
            .filter(|&(x, y)| !is_walkable(x, y))
            .count();
        assert!(blocked > 1000, "map should have real terrain, got {blocked}");
    }

    #[test]
    fn walkability_is_deterministic() {
        assert_eq!(is_walkable(100, 100), is_walkable(100, 100));
    }

    #[test]
    fn spawn_area_corners() {
        assert!(is_in_spawn_area(0, 0));
        assert!(is_in_spawn_area(0, SPAWN_AREA_LENGTH - 1));
        assert!(!is_in_spawn_area(0, SPAWN_AREA_LENGTH));
        assert!(is_in_spawn_area(MAP_WIDTH - 1, 0));
        assert!(is_in_spawn_area(0, MAP_HEIGHT - 1));
        assert!(is_in_spawn_area(MAP_WIDTH - 1, MAP_HEIGHT - 1));
        assert!(is_in_spawn_area(SPAWN_AREA_LENGTH - 1, 0));
        assert!(!is_in_spawn_area(SPAWN_AREA_LENGTH, 0));
        // Mid-edge tiles are border but not spawn.
        assert!(!is_in_spawn_area(0, MAP_HEIGHT / 2));
        assert!(!is_in_spawn_area(MAP_WIDTH / 2, 0));
        // Interior is never spawn.
        assert!(!is_in_spawn_area(1, 1));
    }

    #[test]
    fn push_out_of_spawn_lands_outside_on_walkable_ground() {
        let cases = [
            Coord::new(0, 0),
            Coord::new(0, 8),
            Coord::new(0, (MAP_HEIGHT - 1) as i16),
            Coord::new((MAP_WIDTH - 1) as i16, 0),
            Coord::new((MAP_WIDTH - 1) as i16, (MAP_HEIGHT - 1) as i16),
            Coord::new(4, 0),
            Coord::new(4, (MAP_HEIGHT - 1) as i16),
        ];
        for c in cases {
            let out = push_coord_out_of_spawn_area(c);
            assert!(!coord_in_spawn_area(out), "{c:?} -> {out:?}");
            assert!(coord_walkable(out), "{c:?} -> {out:?}");
        }
        // Non-spawn coords are untouched.
        let mid = Coord::new(250, 250);
        assert_eq!(push_coord_out_of_spawn_area(mid), mid);
    }

    #[test]
    fn harvest_fractions_sum_to_total() {
        assert_eq!(HARVEST_AREAS.len(), NUM_HARVEST_AREAS);
        let sum: i64 = HARVEST_AREAS.iter().map(|a| a.fraction).sum();
        assert_eq!(sum, TOTAL_HARVEST);
    }

    #[test]
    fn harvest_areas_inside_map_with_walkable_tiles() {
        for (i, area) in HARVEST_AREAS.iter().enumerate() {
            assert!(area.x >= 0 && area.y >= 0, "area {i}");
            assert!(area.x + area.w <= MAP_WIDTH, "area {i}");
            assert!(area.y + area.h <= MAP_HEIGHT, "area {i}");
            let walkable = (area.y..area.y + area.h)
                .flat_map(|y| (area.x..area.x + area.w).map(move |x| (x, y)))
                .any(|(x, y)| is_walkable(x, y));
            assert!(walkable, "area {i} has no walkable tile");
        }
    }
}

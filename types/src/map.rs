//! Map dimensions and terrain tables.
//!
//! The obstacle layout is generated from a fixed integer sieve; every table
//! derived from it (walkable lists, harvest areas, crown spawn points,
//! dedicated spawn-tile classification) is built once and cached. All
//! coordinate lists are kept in (y, x)-lexicographic order, the ordering of
//! [`Coord`], because random selection indexes into them and the result is
//! consensus-visible.

use crate::amount::Amount;
use crate::game::Coord;
use std::sync::LazyLock;

pub const MAP_WIDTH: i32 = 502;
pub const MAP_HEIGHT: i32 = 502;

/// Length of the walkable border strips next to each corner that form the
/// original spawn area.
pub const SPAWN_AREA_LENGTH: i32 = 15;

pub const NUM_HARVEST_AREAS: usize = 18;
pub const NUM_CROWN_LOCATIONS: usize = 416;

pub const CROWN_START_X: i32 = 250;
pub const CROWN_START_Y: i32 = 248;

/// Harvest amounts in cents. Together with [`CROWN_BONUS`] they sum to
/// [`TOTAL_HARVEST`].
pub const HARVEST_PORTIONS: [Amount; NUM_HARVEST_AREAS] = [
    70, 65, 60, 60, 55, 55, 50, 50, 50, 45, 45, 45, 40, 40, 40, 40, 35, 30,
];
/// Total harvest in cents, including the crown bonus.
pub const TOTAL_HARVEST: Amount = 900;
/// Per-block bonus for holding the crown, in cents.
pub const CROWN_BONUS: Amount = 25;

/// Centres of the harvest areas. Each area is the 11x11 box around its
/// centre; the surroundings (out to L-inf distance 8) are kept free of
/// obstacles, and the distance 7..=8 ring provides the dedicated spawn
/// tiles used after the timesave fork.
const HARVEST_CENTERS: [(i32, i32); NUM_HARVEST_AREAS] = [
    (80, 125),
    (150, 125),
    (220, 125),
    (290, 125),
    (360, 125),
    (430, 125),
    (80, 250),
    (150, 250),
    (220, 250),
    (290, 250),
    (360, 250),
    (430, 250),
    (80, 375),
    (150, 375),
    (220, 375),
    (290, 375),
    (360, 375),
    (430, 375),
];

/// Half-width of a harvest area box.
const HARVEST_RADIUS: i32 = 5;
/// Obstacle-free zone around each harvest centre.
const HARVEST_CLEARING: i32 = 8;

pub fn is_inside_map(x: i32, y: i32) -> bool {
    (0..MAP_WIDTH).contains(&x) && (0..MAP_HEIGHT).contains(&y)
}

pub fn is_original_spawn_area(x: i32, y: i32) -> bool {
    ((x == 0 || x == MAP_WIDTH - 1)
        && (y < SPAWN_AREA_LENGTH || y >= MAP_HEIGHT - SPAWN_AREA_LENGTH))
        || ((y == 0 || y == MAP_HEIGHT - 1)
            && (x < SPAWN_AREA_LENGTH || x >= MAP_WIDTH - SPAWN_AREA_LENGTH))
}

pub fn is_original_spawn_area_coord(c: Coord) -> bool {
    is_original_spawn_area(c.x, c.y)
}

/// Obstacle sieve over interior tiles, roughly 6% coverage.
fn sieve_blocked(x: i32, y: i32) -> bool {
    let h = (x as u32).wrapping_mul(0x9e37_79b9) ^ (y as u32).wrapping_mul(0x85eb_ca6b);
    let h = h ^ (h >> 15);
    h % 17 == 0
}

fn near_harvest_center(x: i32, y: i32, radius: i32) -> bool {
    HARVEST_CENTERS
        .iter()
        .any(|&(cx, cy)| (x - cx).abs() <= radius && (y - cy).abs() <= radius)
}

pub fn is_walkable(x: i32, y: i32) -> bool {
    if !is_inside_map(x, y) {
        return false;
    }
    // The two border rings are kept clear: spawn strips, banks and the
    // loot push-out all assume free tiles there.
    if x <= 1 || y <= 1 || x >= MAP_WIDTH - 2 || y >= MAP_HEIGHT - 2 {
        return true;
    }
    if near_harvest_center(x, y, HARVEST_CLEARING) {
        return true;
    }
    if (x - CROWN_START_X).abs() <= 2 && (y - CROWN_START_Y).abs() <= 2 {
        return true;
    }
    !sieve_blocked(x, y)
}

pub fn is_walkable_coord(c: Coord) -> bool {
    is_walkable(c.x, c.y)
}

/// Whether a tile is a dedicated player-spawn tile (timesave regime).
pub fn is_player_spawn(c: Coord) -> bool {
    on_spawn_ring(c) && (c.x + c.y) % 2 == 0
}

/// Whether a tile is a dedicated bank-spawn tile (timesave regime).
pub fn is_bank_spawn(c: Coord) -> bool {
    on_spawn_ring(c) && (c.x + c.y) % 2 != 0
}

fn on_spawn_ring(c: Coord) -> bool {
    if !is_walkable(c.x, c.y) {
        return false;
    }
    HARVEST_CENTERS.iter().any(|&(cx, cy)| {
        let d = (c.x - cx).abs().max((c.y - cy).abs());
        d == HARVEST_CLEARING - 1 || d == HARVEST_CLEARING
    })
}

struct MapData {
    walkable: Vec<Coord>,
    player_spawns: Vec<Coord>,
    bank_spawns: Vec<Coord>,
    harvest_areas: Vec<Vec<Coord>>,
    crown_spawn: Vec<Coord>,
}

static MAP: LazyLock<MapData> = LazyLock::new(|| {
    let mut walkable = Vec::new();
    let mut player_spawns = Vec::new();
    let mut bank_spawns = Vec::new();

    // Scanning y-major yields (y, x)-lexicographic order directly.
    for y in 0..MAP_HEIGHT {
        for x in 0..MAP_WIDTH {
            let c = Coord::new(x, y);
            if !is_walkable(x, y) {
                continue;
            }
            walkable.push(c);
            if is_player_spawn(c) {
                player_spawns.push(c);
            } else if is_bank_spawn(c) {
                bank_spawns.push(c);
            }
        }
    }

    let mut harvest_areas = Vec::with_capacity(NUM_HARVEST_AREAS);
    for &(cx, cy) in &HARVEST_CENTERS {
        let mut area = Vec::new();
        for y in cy - HARVEST_RADIUS..=cy + HARVEST_RADIUS {
            for x in cx - HARVEST_RADIUS..=cx + HARVEST_RADIUS {
                debug_assert!(is_walkable(x, y));
                area.push(Coord::new(x, y));
            }
        }
        harvest_areas.push(area);
    }

    // Crown respawn points are drawn evenly from the harvest tiles.
    let flat: Vec<Coord> = harvest_areas.iter().flatten().copied().collect();
    let step = flat.len() / NUM_CROWN_LOCATIONS;
    assert!(step >= 1);
    let crown_spawn: Vec<Coord> = (0..NUM_CROWN_LOCATIONS).map(|i| flat[i * step]).collect();

    assert!(!walkable.is_empty());
    assert!(!player_spawns.is_empty());
    assert!(!bank_spawns.is_empty());
    MapData {
        walkable,
        player_spawns,
        bank_spawns,
        harvest_areas,
        crown_spawn,
    }
});

/// All walkable tiles, in coordinate order.
pub fn walkable_tiles() -> &'static [Coord] {
    &MAP.walkable
}

/// Dedicated player-spawn tiles (timesave regime), in coordinate order.
pub fn player_spawn_tiles() -> &'static [Coord] {
    &MAP.player_spawns
}

/// Dedicated bank-spawn tiles (timesave regime), in coordinate order.
pub fn bank_spawn_tiles() -> &'static [Coord] {
    &MAP.bank_spawns
}

/// Tiles of the i-th harvest area, in coordinate order.
pub fn harvest_area(i: usize) -> &'static [Coord] {
    &MAP.harvest_areas[i]
}

/// The i-th crown respawn location.
pub fn crown_spawn_point(i: usize) -> Coord {
    MAP.crown_spawn[i]
}

/// Loot is pushed out of the original spawn area to avoid ambiguities with
/// banking (the spawn strips double as banks before the life-steal fork).
/// The map keeps the tiles next to the border free of obstacles.
pub fn push_coord_out_of_spawn_area(c: Coord) -> Coord {
    if !is_original_spawn_area(c.x, c.y) {
        return c;
    }
    if c.x == 0 {
        if c.y == 0 {
            return Coord::new(c.x + 1, c.y + 1);
        } else if c.y == MAP_HEIGHT - 1 {
            return Coord::new(c.x + 1, c.y - 1);
        }
        return Coord::new(c.x + 1, c.y);
    } else if c.x == MAP_WIDTH - 1 {
        if c.y == 0 {
            return Coord::new(c.x - 1, c.y + 1);
        } else if c.y == MAP_HEIGHT - 1 {
            return Coord::new(c.x - 1, c.y - 1);
        }
        return Coord::new(c.x - 1, c.y);
    } else if c.y == 0 {
        return Coord::new(c.x, c.y + 1);
    } else if c.y == MAP_HEIGHT - 1 {
        return Coord::new(c.x, c.y - 1);
    }
    c
}

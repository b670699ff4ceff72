//! Waypoint movement and character placement.

use gridhunt_types::chain::{ChainParams, Fork};
use gridhunt_types::game::{CharacterState, Coord, PlayerState, dist_l_inf};
use gridhunt_types::map;

use crate::rng::GameRng;

/// Direction from `c1` to `c2`, keypad-encoded 1-9 (5 = no movement).
pub fn get_direction(c1: Coord, c2: Coord) -> u8 {
    let dx = (c2.x - c1.x).clamp(-1, 1);
    let dy = (c2.y - c1.y).clamp(-1, 1);
    ((1 - dy) * 3 + dx + 2) as u8
}

fn coord_step(x: i32, target: i32) -> i32 {
    match x.cmp(&target) {
        std::cmp::Ordering::Less => x + 1,
        std::cmp::Ordering::Greater => x - 1,
        std::cmp::Ordering::Equal => x,
    }
}

/// Compute the new minor coordinate from line-slope information applied to
/// the major coordinate. `u` is the already-stepped major coordinate, `v`
/// the minor one to update; `du`/`dv` are the segment deltas measured from
/// `from_u`/`from_v`. The half-unit rounding and truncation toward zero are
/// consensus rules; every node must land on the same tile.
fn coord_upd(u: i32, v: i32, du: i32, dv: i32, from_u: i32, from_v: i32) -> i32 {
    if dv == 0 {
        return v;
    }
    let tmp = (u - from_u) * dv;
    let mut res = (tmp.abs() + du.abs() / 2) / du;
    if tmp < 0 {
        res = -res;
    }
    res + from_v
}

/// Advance one L-infinity step along the straight line toward the current
/// waypoint. Stops (clearing the queue) when the next tile is not walkable.
pub fn move_towards_waypoint(ch: &mut CharacterState) {
    let mut target = match ch.waypoints.last() {
        Some(&t) => t,
        None => {
            ch.from = ch.coord;
            return;
        }
    };
    if ch.coord == target {
        ch.from = ch.coord;
        loop {
            ch.waypoints.pop();
            match ch.waypoints.last() {
                None => return,
                Some(&next) if next != ch.coord => {
                    target = next;
                    break;
                }
                Some(_) => {}
            }
        }
    }

    let dx = target.x - ch.from.x;
    let dy = target.y - ch.from.y;

    let new_c = if dx.abs() > dy.abs() {
        let nx = coord_step(ch.coord.x, target.x);
        Coord::new(nx, coord_upd(nx, ch.coord.y, dx, dy, ch.from.x, ch.from.y))
    } else {
        let ny = coord_step(ch.coord.y, target.y);
        Coord::new(coord_upd(ny, ch.coord.x, dy, dx, ch.from.y, ch.from.x), ny)
    };

    if !map::is_walkable_coord(new_c) {
        ch.stop_moving();
        return;
    }

    let new_dir = get_direction(ch.coord, new_c);
    // If not moved, retain the old direction.
    if new_dir != 5 {
        ch.dir = new_dir;
    }
    ch.coord = new_c;

    if ch.coord == target {
        ch.from = ch.coord;
        loop {
            ch.waypoints.pop();
            match ch.waypoints.last() {
                Some(&next) if next == ch.coord => {}
                _ => break,
            }
        }
    }
}

/// Tiles the character will pass through on its queued path, ending at the
/// final waypoint. Empty when no movement is pending.
pub fn dump_path(ch: &CharacterState, alternative_waypoints: Option<&[Coord]>) -> Vec<Coord> {
    let mut tmp = ch.clone();
    if let Some(wp) = alternative_waypoints {
        tmp.stop_moving();
        tmp.waypoints = wp.to_vec();
    }

    let mut path = Vec::new();
    if !tmp.waypoints.is_empty() {
        loop {
            path.push(tmp.coord);
            move_towards_waypoint(&mut tmp);
            if tmp.waypoints.is_empty() {
                break;
            }
        }
        if path.last() != Some(&tmp.coord) {
            path.push(tmp.coord);
        }
    }
    path
}

/// Number of blocks needed to finish the queued path (L-infinity length).
pub fn time_to_destination(ch: &CharacterState, alt_waypoints: Option<&[Coord]>) -> u32 {
    let (wp, reverse) = match alt_waypoints {
        Some(wp) => (wp, false),
        None => (ch.waypoints.as_slice(), true),
    };
    if wp.is_empty() {
        return 0;
    }

    let mut res = 0;
    for pair in wp.windows(2) {
        res += dist_l_inf(pair[0], pair[1]);
    }
    // The queued waypoints are stored reversed, so the first leg starts at
    // the back; explicit alternative paths start at the front.
    if reverse {
        res += dist_l_inf(ch.coord, *wp.last().expect("non-empty"));
    } else {
        res += dist_l_inf(ch.coord, wp[0]);
    }
    res
}

/// Place a freshly created character on the map.
pub fn spawn_character(
    params: &ChainParams,
    height: i32,
    ch: &mut CharacterState,
    color: u8,
    rng: &mut GameRng,
) {
    if params.fork_active(Fork::TimeSave, height) {
        // Dedicated player spawn tiles near the harvest areas.
        let tiles = map::player_spawn_tiles();
        let pos = rng.next_in_range(tiles.len() as u64) as usize;
        ch.coord = tiles[pos];
        ch.dir = random_direction(rng);
    } else if params.fork_active(Fork::LifeSteal, height) {
        // Any walkable tile.
        let tiles = map::walkable_tiles();
        let pos = rng.next_in_range(tiles.len() as u64) as usize;
        ch.coord = tiles[pos];
        ch.dir = random_direction(rng);
    } else {
        // Fixed corner strips, chosen by team colour.
        let pos = rng.next_in_range(2 * map::SPAWN_AREA_LENGTH as u64 - 1) as i32;
        let x = if pos < map::SPAWN_AREA_LENGTH { pos } else { 0 };
        let y = if pos < map::SPAWN_AREA_LENGTH {
            0
        } else {
            pos - map::SPAWN_AREA_LENGTH
        };
        ch.coord = match color {
            0 => Coord::new(x, y),
            1 => Coord::new(map::MAP_WIDTH - 1 - x, y),
            2 => Coord::new(map::MAP_WIDTH - 1 - x, map::MAP_HEIGHT - 1 - y),
            3 => Coord::new(x, map::MAP_HEIGHT - 1 - y),
            _ => unreachable!("colour validated at parse time"),
        };

        // Under regression-test rules everyone lands in the yellow corner,
        // which makes fights quick to set up.
        if params.testing_rules() {
            ch.coord = Coord::new(x, y);
        }

        ch.dir = inward_direction(ch.coord);
    }

    ch.stop_moving();
}

/// Create the next character of a player and place it on the map.
pub fn spawn_player_character(
    params: &ChainParams,
    height: i32,
    pl: &mut PlayerState,
    rng: &mut GameRng,
) {
    let index = pl.next_character_index;
    pl.next_character_index += 1;
    let mut ch = CharacterState::default();
    spawn_character(params, height, &mut ch, pl.color, rng);
    pl.characters.insert(index, ch);
}

fn random_direction(rng: &mut GameRng) -> u8 {
    let mut dir = rng.next_in_span(1, 8) as u8;
    if dir >= 5 {
        dir += 1;
    }
    debug_assert!((1..=9).contains(&dir) && dir != 5);
    dir
}

/// Sprite direction facing away from the map border.
fn inward_direction(c: Coord) -> u8 {
    if c.x == 0 {
        if c.y == 0 {
            3
        } else if c.y == map::MAP_HEIGHT - 1 {
            9
        } else {
            6
        }
    } else if c.x == map::MAP_WIDTH - 1 {
        if c.y == 0 {
            1
        } else if c.y == map::MAP_HEIGHT - 1 {
            7
        } else {
            4
        }
    } else if c.y == 0 {
        2
    } else if c.y == map::MAP_HEIGHT - 1 {
        8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridhunt_types::Hash256;

    fn character_at(x: i32, y: i32) -> CharacterState {
        CharacterState {
            coord: Coord::new(x, y),
            from: Coord::new(x, y),
            ..CharacterState::default()
        }
    }

    #[test]
    fn direction_encoding_is_keypad() {
        let c = Coord::new(10, 10);
        assert_eq!(get_direction(c, Coord::new(10, 9)), 8); // up
        assert_eq!(get_direction(c, Coord::new(10, 11)), 2); // down
        assert_eq!(get_direction(c, Coord::new(9, 10)), 4); // left
        assert_eq!(get_direction(c, Coord::new(11, 10)), 6); // right
        assert_eq!(get_direction(c, Coord::new(11, 9)), 9);
        assert_eq!(get_direction(c, Coord::new(9, 11)), 1);
        assert_eq!(get_direction(c, c), 5);
        // Distant targets clamp to one step.
        assert_eq!(get_direction(c, Coord::new(100, 10)), 6);
    }

    // The tests walk inside the obstacle-free clearing around the harvest
    // centre at (80, 125), so every stepped tile is walkable.

    #[test]
    fn straight_line_walk_reaches_target() {
        let mut ch = character_at(73, 118);
        ch.waypoints = vec![Coord::new(78, 120)];
        let mut steps = 0;
        while !ch.waypoints.is_empty() {
            move_towards_waypoint(&mut ch);
            steps += 1;
            assert!(steps <= 10, "walk did not terminate");
        }
        assert_eq!(ch.coord, Coord::new(78, 120));
        // L-infinity distance was 5.
        assert_eq!(steps, 5);
    }

    #[test]
    fn diagonal_interpolation_is_balanced() {
        let mut ch = character_at(73, 118);
        ch.waypoints = vec![Coord::new(77, 120)];
        move_towards_waypoint(&mut ch);
        // After one step of four along x, y has advanced by round(1 * 2/4).
        assert_eq!(ch.coord, Coord::new(74, 119));
    }

    #[test]
    fn reaching_waypoint_pops_queue() {
        let mut ch = character_at(73, 118);
        ch.waypoints = vec![Coord::new(76, 118), Coord::new(74, 118)];
        move_towards_waypoint(&mut ch);
        assert_eq!(ch.coord, Coord::new(74, 118));
        // The reached waypoint is gone; the next target remains.
        assert_eq!(ch.waypoints, vec![Coord::new(76, 118)]);
        assert_eq!(ch.from, ch.coord);
    }

    #[test]
    fn empty_queue_resets_from() {
        let mut ch = character_at(50, 50);
        ch.from = Coord::new(10, 10);
        move_towards_waypoint(&mut ch);
        assert_eq!(ch.from, Coord::new(50, 50));
    }

    #[test]
    fn time_to_destination_counts_linf() {
        let mut ch = character_at(10, 10);
        assert_eq!(time_to_destination(&ch, None), 0);
        // Reversed storage: path is (10,10) -> (20,10) -> (20,15).
        ch.waypoints = vec![Coord::new(20, 15), Coord::new(20, 10)];
        assert_eq!(time_to_destination(&ch, None), 15);
        let alt = [Coord::new(12, 12), Coord::new(12, 20)];
        assert_eq!(time_to_destination(&ch, Some(&alt)), 2 + 8);
    }

    #[test]
    fn dump_path_walks_the_full_route() {
        let mut ch = character_at(73, 118);
        ch.waypoints = vec![Coord::new(76, 118)];
        let path = dump_path(&ch, None);
        assert_eq!(path.first(), Some(&Coord::new(73, 118)));
        assert_eq!(path.last(), Some(&Coord::new(76, 118)));
        assert_eq!(path.len(), 4);
        // The character itself is untouched.
        assert_eq!(ch.coord, Coord::new(73, 118));
    }

    #[test]
    fn random_walks_never_leave_walkable_ground() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed_0a1b);
        for _ in 0..50 {
            let mut ch = character_at(80, 125);
            let mut wp: Vec<Coord> = (0..8)
                .map(|_| Coord::new(rng.gen_range(0..map::MAP_WIDTH), rng.gen_range(0..map::MAP_HEIGHT)))
                .collect();
            wp.dedup();
            wp.reverse();
            ch.waypoints = wp;

            for _ in 0..2000 {
                move_towards_waypoint(&mut ch);
                assert!(map::is_walkable_coord(ch.coord));
                if ch.waypoints.is_empty() {
                    break;
                }
            }
        }
    }

    #[test]
    fn spawn_in_corner_strip_pre_fork() {
        let params = ChainParams::production();
        let mut rng = GameRng::new(&Hash256::new([5; 32]));
        for color in 0..4u8 {
            let mut ch = CharacterState::default();
            spawn_character(&params, 1, &mut ch, color, &mut rng);
            assert!(map::is_original_spawn_area(ch.coord.x, ch.coord.y));
            assert!(ch.waypoints.is_empty());
            assert_ne!(ch.dir, 5);
        }
    }

    #[test]
    fn spawn_random_walkable_post_life_steal() {
        let params = ChainParams::production();
        let height = params.fork_height(Fork::LifeSteal);
        let mut rng = GameRng::new(&Hash256::new([6; 32]));
        for _ in 0..32 {
            let mut ch = CharacterState::default();
            spawn_character(&params, height, &mut ch, 2, &mut rng);
            assert!(map::is_walkable_coord(ch.coord));
            assert!(ch.dir >= 1 && ch.dir <= 9 && ch.dir != 5);
        }
    }

    #[test]
    fn spawn_on_player_tiles_post_timesave() {
        let params = ChainParams::production();
        let height = params.fork_height(Fork::TimeSave);
        let mut rng = GameRng::new(&Hash256::new([8; 32]));
        for _ in 0..32 {
            let mut ch = CharacterState::default();
            spawn_character(&params, height, &mut ch, 1, &mut rng);
            assert!(map::is_player_spawn(ch.coord));
        }
    }
}

//! The per-block state transition.
//!
//! [`perform_step`] is a pure function over (previous state, step data). It
//! performs no I/O and holds no locks; two invocations with identical
//! inputs produce byte-identical states. The order of the sub-steps below
//! is consensus; so is every RNG draw.

use std::collections::BTreeMap;

use thiserror::Error;

use gridhunt_types::amount::Amount;
use gridhunt_types::block::Block;
use gridhunt_types::chain::Fork;
use gridhunt_types::game::{
    in_spectator_mode, is_protected, no_logout, spawn_protection_almost_finished, CharacterId,
    CollectedLootInfo, Coord, GameState, KilledBy, LootInfo, PlayerId, MODE_LOGOUT, MODE_NORMAL,
    MODE_SPECTATOR_BEGIN,
};
use gridhunt_types::map;

use crate::attack::CharactersOnTiles;
use crate::movement::{move_towards_waypoint, spawn_player_character};
use crate::moves::{ParseError, StepData, UtxoView, ValidationError};
use crate::rng::GameRng;

/// Poison disasters happen with probability 1/x per block between the
/// minimum and maximum times since the last one.
const PDISASTER_MIN_TIME: i32 = 1440;
const PDISASTER_MAX_TIME: i32 = 12 * 1440;
const PDISASTER_PROBABILITY: u64 = 10_000;

/// How long a poisoned player may still live.
const POISON_MIN_LIFE: u64 = 1;
const POISON_MAX_LIFE: u64 = 50;

/// Dynamic banks after the life-steal fork.
const DYNBANKS_NUM_BANKS: usize = 75;
const DYNBANKS_MIN_LIFE: u64 = 25;
const DYNBANKS_MAX_LIFE: u64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(
        "coin conservation violated: before={money_before} treasure={treasure} in={money_in} \
         after={money_after} out={money_out}"
    )]
    ConservationMismatch {
        money_before: Amount,
        treasure: Amount,
        money_in: Amount,
        money_after: Amount,
        money_out: Amount,
    },
    #[error("killed player '{0}' does not exist in the name set")]
    KilledUnknownPlayer(PlayerId),
    #[error("no kill reason recorded for player '{0}'")]
    NoKillReason(PlayerId),
    #[error("multiple same-reason kill records for player '{0}'")]
    DuplicateKillReason(PlayerId),
    #[error("bounty for player '{0}' without a name entry")]
    BountyUnknownPlayer(PlayerId),
}

/// Anything that can make the engine reject a block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("move parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("move validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
}

/// A banked (or refunded) reward waiting to be paid out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedBounty {
    pub character: CharacterId,
    pub loot: CollectedLootInfo,
    /// Payment address as per the player state; empty means pay to the
    /// name's own address. Recorded here so the bounty can be paid even if
    /// the player has since died.
    pub address: String,
}

impl CollectedBounty {
    fn new(player: PlayerId, index: i32, loot: CollectedLootInfo, address: String) -> Self {
        Self {
            character: CharacterId::new(player, index),
            loot,
            address,
        }
    }

    /// Refresh the address from the (post-step) state if the player is
    /// still alive.
    fn update_address(&mut self, state: &GameState) {
        if let Some(pl) = state.players.get(&self.character.player) {
            self.address = pl.address.clone();
        }
    }
}

/// Aggregated side effects of one step, used to build the game
/// transactions.
#[derive(Clone, Debug, Default)]
pub struct StepResult {
    killed_players: std::collections::BTreeSet<PlayerId>,
    /// Kill reasons per victim. Entries keep insertion order, which the
    /// step order makes reason-sorted (destruct, then spawn, then poison).
    killed_by: BTreeMap<PlayerId, Vec<KilledBy>>,

    pub bounties: Vec<CollectedBounty>,
    pub tax_amount: Amount,
}

impl StepResult {
    pub fn kill_player(&mut self, victim: PlayerId, info: KilledBy) {
        self.killed_by.entry(victim.clone()).or_default().push(info);
        self.killed_players.insert(victim);
    }

    pub fn killed_players(&self) -> &std::collections::BTreeSet<PlayerId> {
        &self.killed_players
    }

    pub fn killed_by(&self) -> &BTreeMap<PlayerId, Vec<KilledBy>> {
        &self.killed_by
    }
}

/// Carrying capacity at the current height; `-1` means unlimited.
pub(crate) fn carrying_capacity(
    state: &GameState,
    is_general: bool,
    is_crown_holder: bool,
) -> Amount {
    use gridhunt_types::amount::COIN;

    if !state.fork_active(Fork::CarryingCap) || is_crown_holder {
        return -1;
    }
    if state.fork_active(Fork::LifeSteal) {
        return 100 * COIN;
    }
    if state.fork_active(Fork::LessHearts) {
        return 2000 * COIN;
    }
    if is_general {
        50 * COIN
    } else {
        25 * COIN
    }
}

/// Destruct radius at the current height.
pub(crate) fn destruct_radius(state: &GameState, is_general: bool) -> i32 {
    if state.fork_active(Fork::LessHearts) {
        return 1;
    }
    if is_general {
        2
    } else {
        1
    }
}

/// Maximum allowed stay on a bank before dying of spawn death; `-1` means
/// spawn death is disabled.
fn max_stay_on_bank(state: &GameState) -> i32 {
    if state.fork_active(Fork::LifeSteal) {
        return 2;
    }
    // Between these two forks, spawn death was disabled.
    if state.fork_active(Fork::CarryingCap) && !state.fork_active(Fork::LessHearts) {
        return -1;
    }
    30
}

/// Whether a heart should drop at the current height.
fn drop_heart(state: &GameState) -> bool {
    if state.fork_active(Fork::LifeSteal) {
        return false;
    }
    let heart_every = if state.fork_active(Fork::LessHearts) {
        500
    } else {
        10
    };
    state.height % heart_every == 0
}

fn drops_coins(state: &GameState, info: &KilledBy, victim_remaining_life: i32) -> bool {
    let _ = info;
    if !state.fork_active(Fork::LessHearts) {
        return true;
    }
    // A poisoned victim's coins go to the game fund. Zero is allowed here:
    // that is exactly the block in which the poison kills.
    if victim_remaining_life >= 0 {
        return false;
    }
    debug_assert_eq!(victim_remaining_life, -1);
    true
}

fn can_refund(state: &GameState, info: &KilledBy, victim_remaining_life: i32) -> bool {
    if !state.fork_active(Fork::LessHearts) {
        return false;
    }
    match info {
        KilledBy::Spawn => {
            // Before the life-steal fork, poisoned players were not
            // refunded.
            if !state.fork_active(Fork::LifeSteal) && victim_remaining_life >= 0 {
                return false;
            }
            true
        }
        KilledBy::Poison => state.fork_active(Fork::LifeSteal),
        KilledBy::Destruct(_) => false,
    }
}

/// Handle the loot of a killed character: refund, drop, tax or game fund
/// depending on the circumstances.
pub(crate) fn handle_killed_loot(
    state: &mut GameState,
    pid: &PlayerId,
    ch_index: i32,
    info: &KilledBy,
    step: &mut StepResult,
) {
    let (value, address, remaining_life, coord, carried) = {
        let pl = state.players.get(pid).expect("killed player exists");
        debug_assert!(pl.value >= 0);
        let ch = pl
            .characters
            .get(&ch_index)
            .expect("killed character exists");
        (
            pl.value,
            pl.address.clone(),
            pl.remaining_life,
            ch.coord,
            ch.loot.amount(),
        )
    };

    // Refund the locked value if the death reason allows it; the amount is
    // then excluded from the drop below.
    let mut refunded = false;
    if ch_index == 0 && can_refund(state, info, remaining_life) {
        let mut collected = CollectedLootInfo::default();
        collected.set_refund(value, state.height);
        step.bounties
            .push(CollectedBounty::new(pid.clone(), ch_index, collected, address));
        refunded = true;
    }

    // Killing a general drops its locked value too. With life-steal the
    // value has already been drawn to zero unless the death refunds.
    let mut amount = carried;
    if ch_index == 0 && !refunded {
        debug_assert!(!state.fork_active(Fork::LifeSteal) || value == 0);
        amount += value;
    }

    // Miner death tax: 4%.
    if info.has_death_tax() {
        let tax = amount / 25;
        step.tax_amount += tax;
        amount -= tax;
    }

    if !drops_coins(state, info, remaining_life) {
        state.game_fund += amount;
        return;
    }

    // Drop the loot, pushed out of the spawn strips while those double as
    // banks (before the life-steal fork).
    let mut loot_pos = coord;
    if !state.fork_active(Fork::LifeSteal) {
        loot_pos = map::push_coord_out_of_spawn_area(loot_pos);
    }
    state.add_loot(loot_pos, amount);
}

/// Update the spawn-area counters and kill overstaying characters.
fn kill_spawn_area(state: &mut GameState, step: &mut StepResult) {
    let timesave = state.fork_active(Fork::TimeSave);
    let max_stay = max_stay_on_bank(state);
    let height = state.height;

    // First pass: update counters and collect deaths; the loot handling
    // below needs the whole state again.
    let mut to_kill: Vec<(PlayerId, i32)> = Vec::new();
    {
        let banks = &state.banks;
        for (pid, pl) in &mut state.players {
            for (&index, ch) in &mut pl.characters {
                if timesave {
                    if banks.contains_key(&ch.coord) {
                        // Hunters are never on a bank tile while in
                        // spectator mode.
                        ch.stay_in_spawn_area = MODE_LOGOUT;
                    } else if map::is_player_spawn(ch.coord) {
                        if spawn_protection_almost_finished(ch.stay_in_spawn_area) {
                            // Idling on the spawn strip enters spectator
                            // mode; waypoint updates for this block are not
                            // applied yet, so standing still is reliable.
                            ch.stay_in_spawn_area = MODE_SPECTATOR_BEGIN;
                        } else if height % 500 < 490 || ch.stay_in_spawn_area > 0 {
                            // Fresh hunters get a few extra blocks of
                            // thinking time before ghosting ends.
                            ch.stay_in_spawn_area += 1;
                        }
                    } else if is_protected(ch.stay_in_spawn_area) {
                        // Catch-all for hunters who spawned pre-fork.
                        ch.stay_in_spawn_area += 1;
                    }

                    if no_logout(ch.stay_in_spawn_area) {
                        continue;
                    }
                } else {
                    if !banks.contains_key(&ch.coord) {
                        ch.stay_in_spawn_area = 0;
                        continue;
                    }
                    let stay = ch.stay_in_spawn_area as i32;
                    ch.stay_in_spawn_area = ch.stay_in_spawn_area.wrapping_add(1);
                    if stay < max_stay || max_stay == -1 {
                        continue;
                    }
                }

                to_kill.push((pid.clone(), index));
            }
        }
    }

    for (pid, index) in to_kill {
        let killer = KilledBy::Spawn;
        handle_killed_loot(state, &pid, index, &killer, step);
        if index == 0 {
            step.kill_player(pid.clone(), killer);
        }
        state
            .players
            .get_mut(&pid)
            .expect("player still present")
            .characters
            .remove(&index);
    }
}

/// Decrement poison life expectancy; players reaching zero die.
fn decrement_life(state: &mut GameState, step: &mut StepResult) {
    for (pid, pl) in &mut state.players {
        if pl.remaining_life == -1 {
            continue;
        }
        debug_assert!(pl.remaining_life > 0);
        pl.remaining_life -= 1;
        if pl.remaining_life == 0 {
            step.kill_player(pid.clone(), KilledBy::Poison);
        }
    }
}

/// Kill all characters of the killed players and erase them from the state.
fn finalise_kills(state: &mut GameState, step: &mut StepResult) {
    let killed: Vec<PlayerId> = step.killed_players().iter().cloned().collect();
    for victim in &killed {
        let info = step.killed_by()[victim]
            .first()
            .expect("every killed player has a reason")
            .clone();
        let indices: Vec<i32> = state.players[victim].characters.keys().copied().collect();
        for index in indices {
            handle_killed_loot(state, victim, index, &info, step);
        }
    }
    for victim in &killed {
        state.players.remove(victim);
    }
}

/// One-off transition at the life-steal fork: remove all hearts and kill
/// every hunter (non-general character), without refunds.
fn remove_hearted_characters(state: &mut GameState, step: &mut StepResult) {
    debug_assert!(state.is_fork_height(Fork::LifeSteal));

    state.hearts.clear();

    let doomed: Vec<(PlayerId, i32)> = state
        .players
        .iter()
        .flat_map(|(pid, pl)| {
            pl.characters
                .keys()
                .filter(|&&i| i != 0)
                .map(|&i| (pid.clone(), i))
                .collect::<Vec<_>>()
        })
        .collect();

    for (pid, index) in doomed {
        let info = KilledBy::Poison;
        handle_killed_loot(state, &pid, index, &info, step);
        state
            .players
            .get_mut(&pid)
            .expect("player present")
            .characters
            .remove(&index);
    }
}

/// Decide whether a disaster strikes. Must be the first RNG consumer so a
/// block hash can be checked for disasters cheaply.
fn check_for_disaster(state: &GameState, rng: &mut GameRng) -> bool {
    if !state.fork_active(Fork::Poison) {
        return false;
    }

    let dist = state.height - state.disaster_height;
    debug_assert!(dist > 0);
    if dist < PDISASTER_MIN_TIME {
        return false;
    }
    if dist >= PDISASTER_MAX_TIME {
        return true;
    }

    rng.next_in_range(PDISASTER_PROBABILITY) == 0
}

/// Poison every player with a random life expectancy.
fn apply_disaster(state: &mut GameState, rng: &mut GameRng) {
    for pl in state.players.values_mut() {
        // Disasters are far enough apart that no live player is still
        // poisoned.
        debug_assert_eq!(pl.remaining_life, -1);
        pl.remaining_life = rng.next_in_span(POISON_MIN_LIFE, POISON_MAX_LIFE) as i32;
    }

    if state.fork_active(Fork::LessHearts) {
        state.hearts.clear();
    }

    state.disaster_height = state.height;
}

/// Crown bookkeeping before banking: drop the crown when its holder died or
/// entered a bank; otherwise it travels with the holder.
fn update_crown_state(state: &mut GameState) -> bool {
    let Some(holder) = state.crown_holder.clone() else {
        return false;
    };

    let coord = state
        .players
        .get(&holder.player)
        .and_then(|pl| pl.characters.get(&holder.index))
        .map(|ch| ch.coord);

    match coord {
        None => {
            // Holder is dead; drop the crown where it lies.
            state.crown_holder = None;
            false
        }
        Some(c) if state.is_bank(c) => {
            state.crown_holder = None;
            true
        }
        Some(c) => {
            state.crown_pos = c;
            false
        }
    }
}

/// Split every loot tile among the characters standing on it.
///
/// Characters with the least remaining capacity pick their share first, so
/// capped characters leave the overflow for the others; for equal capacity
/// the (player, index) order decides. Dust that does not divide evenly may
/// leave some collectors empty-handed.
fn divide_loot_among_players(state: &mut GameState) {
    struct Collector {
        pid: PlayerId,
        cid: i32,
        coord: Coord,
        carry_cap: Amount,
        remaining: Amount,
    }

    let timesave = state.fork_active(Fork::TimeSave);
    let height = state.height;

    let mut players_on_tile: BTreeMap<Coord, u32> = BTreeMap::new();
    let mut collectors: Vec<Collector> = Vec::new();
    for (pid, pl) in &state.players {
        for (&cid, ch) in &pl.characters {
            let coord = ch.coord;

            // Ghost phasing: towards the end of each 500-block cycle, more
            // and more tiles stop yielding loot.
            if timesave {
                let parity = coord.x % 2 + coord.y % 2;
                let phase = height % 500;
                if (parity > 1 && phase >= 300) || (parity > 0 && phase >= 450) || phase >= 480 {
                    continue;
                }
            }

            if !state.loot.contains_key(&coord) {
                continue;
            }

            let is_crown_holder = state
                .crown_holder
                .as_ref()
                .is_some_and(|h| h.player == *pid && h.index == cid);
            let carry_cap = carrying_capacity(state, cid == 0, is_crown_holder);
            let remaining = if carry_cap == -1 {
                -1
            } else {
                // Characters may be overloaded across capacity-changing
                // forks.
                (carry_cap - ch.loot.amount()).max(0)
            };

            *players_on_tile.entry(coord).or_insert(0) += 1;
            collectors.push(Collector {
                pid: pid.clone(),
                cid,
                coord,
                carry_cap,
                remaining,
            });
        }
    }

    collectors.sort_by(|a, b| {
        use std::cmp::Ordering;
        match (a.remaining, b.remaining) {
            (x, y) if x == y => (&a.pid, a.cid).cmp(&(&b.pid, b.cid)),
            (-1, _) => Ordering::Greater,
            (_, -1) => Ordering::Less,
            (x, y) => x.cmp(&y),
        }
    });

    for col in collectors {
        let cnt = players_on_tile
            .get_mut(&col.coord)
            .expect("tile counted above");
        debug_assert!(*cnt > 0);

        let mut loot_info = state.loot.get(&col.coord).copied().unwrap_or_default();
        loot_info.amount /= *cnt as Amount;
        *cnt -= 1;

        // With dust amounts and several collectors, some of them get
        // nothing.
        if loot_info.amount > 0 {
            let share = loot_info.amount;
            let rem = state
                .players
                .get_mut(&col.pid)
                .expect("collector's player exists")
                .characters
                .get_mut(&col.cid)
                .expect("collector exists")
                .collect_loot(loot_info, height, col.carry_cap);
            state.add_loot(col.coord, rem - share);
        }
    }
}

/// Credit the crown bonus to the holder (unlimited capacity) or the fund.
fn crown_bonus(state: &mut GameState, amount: Amount) {
    let Some(holder) = state.crown_holder.clone() else {
        state.game_fund += amount;
        return;
    };

    let cap = carrying_capacity(state, holder.index == 0, true);
    let height = state.height;
    let loot = LootInfo::new(amount, height);
    let rem = state
        .players
        .get_mut(&holder.player)
        .expect("crown holder is alive")
        .characters
        .get_mut(&holder.index)
        .expect("crown holder character exists")
        .collect_loot(loot, height, cap);

    // Keep to the "crown on the floor pays the fund" logic for anything the
    // holder cannot carry.
    state.game_fund += rem;
}

/// Age and refill the dynamic banks.
fn update_banks(state: &mut GameState, rng: &mut GameRng) {
    if !state.fork_active(Fork::LifeSteal) {
        return;
    }

    let mut new_banks: BTreeMap<Coord, u32> = BTreeMap::new();

    if state.is_fork_height(Fork::LifeSteal) {
        // Start from scratch at the fork itself.
    } else {
        debug_assert_eq!(state.banks.len(), DYNBANKS_NUM_BANKS);
        for (&coord, &life) in &state.banks {
            debug_assert!(life >= 1);

            // At the timesave fork the whole set is redrawn from the new
            // dedicated tiles; carrying any old bank over would leave it
            // outside the permitted set.
            if state.is_fork_height(Fork::TimeSave) {
                continue;
            }

            // Banks with life 1 run out now. Banking happened earlier in
            // the step, so a bank reached on its last block still worked.
            if life > 1 {
                new_banks.insert(coord, life - 1);
            }
        }
    }

    debug_assert!(new_banks.len() <= DYNBANKS_NUM_BANKS);

    let tiles: &[Coord] = if state.fork_active(Fork::TimeSave) {
        map::bank_spawn_tiles()
    } else {
        map::walkable_tiles()
    };
    let mut options: Vec<Coord> = tiles
        .iter()
        .copied()
        .filter(|c| !new_banks.contains_key(c))
        .collect();
    debug_assert_eq!(options.len() + new_banks.len(), tiles.len());

    for _ in new_banks.len()..DYNBANKS_NUM_BANKS {
        let ind = rng.next_in_range(options.len() as u64) as usize;
        let life = rng.next_in_span(DYNBANKS_MIN_LIFE, DYNBANKS_MAX_LIFE) as u32;
        let coord = options[ind];

        debug_assert!(!new_banks.contains_key(&coord));
        new_banks.insert(coord, life);

        // Stable erase; swapping in the last element would reorder the
        // candidates and change the consensus sequence.
        options.remove(ind);
    }

    state.banks = new_banks;
    debug_assert_eq!(state.banks.len(), DYNBANKS_NUM_BANKS);
}

/// Players standing on hearts spawn new characters; contested hearts pick
/// the receiver by RNG.
fn collect_hearts(state: &mut GameState, rng: &mut GameRng) {
    let mut players_on_heart: BTreeMap<Coord, Vec<PlayerId>> = BTreeMap::new();
    for (pid, pl) in &state.players {
        if !pl.can_spawn_character() {
            continue;
        }
        for ch in pl.characters.values() {
            if state.hearts.contains(&ch.coord) {
                players_on_heart.entry(ch.coord).or_default().push(pid.clone());
            }
        }
    }

    let params = state.params;
    let height = state.height;
    for (coord, mut candidates) in players_on_heart {
        let winner = loop {
            if candidates.is_empty() {
                break None;
            }
            let i = if candidates.len() == 1 {
                0
            } else {
                rng.next_in_range(candidates.len() as u64) as usize
            };
            // The limit can have been reached by an earlier heart in this
            // very block.
            let can_spawn = state
                .players
                .get(&candidates[i])
                .is_some_and(|pl| pl.can_spawn_character());
            if can_spawn {
                break Some(candidates[i].clone());
            }
            candidates.remove(i);
        };

        if let Some(pid) = winner {
            let pl = state.players.get_mut(&pid).expect("winner exists");
            spawn_player_character(&params, height, pl, rng);
            state.hearts.remove(&coord);
        }
    }
}

/// Re-place the crown if requested and hand it to a character standing on
/// its tile.
fn collect_crown(state: &mut GameState, rng: &mut GameRng, respawn_crown: bool) {
    if state.crown_holder.is_some() {
        debug_assert!(!respawn_crown);
        return;
    }

    if respawn_crown {
        let i = rng.next_in_range(map::NUM_CROWN_LOCATIONS as u64) as usize;
        state.crown_pos = map::crown_spawn_point(i);
    }

    let mut on_crown_tile: Vec<CharacterId> = Vec::new();
    for (pid, pl) in &state.players {
        for (&index, ch) in &pl.characters {
            if ch.coord == state.crown_pos {
                on_crown_tile.push(CharacterId::new(pid.clone(), index));
            }
        }
    }
    if on_crown_tile.is_empty() {
        return;
    }
    let i = if on_crown_tile.len() == 1 {
        0
    } else {
        rng.next_in_range(on_crown_tile.len() as u64) as usize
    };
    state.crown_holder = Some(on_crown_tile.swap_remove(i));
}

/// Execute one block's state transition.
///
/// All moves happen simultaneously: the result must be identical for any
/// ordering of the moves, except for non-critical choices (which empty cell
/// a new player spawns on) that the seeded RNG decides.
pub fn perform_step(
    prev: &GameState,
    data: &StepData,
) -> Result<(GameState, StepResult), StepError> {
    for m in &data.moves {
        m.validate(prev)?;
    }

    let mut out = prev.clone();
    out.height = prev.height + 1;
    out.disaster_height = prev.disaster_height;
    out.block_hash = data.new_hash;
    out.dead_players_chat.clear();

    let mut result = StepResult::default();

    // Pay game fees into the fund (spawn fees are handled with the spawn
    // itself); track all money entering the game world.
    let mut money_in: Amount = 0;
    for m in &data.moves {
        if m.is_spawn() {
            money_in += m.new_locked;
            continue;
        }
        let pl = out
            .players
            .get_mut(&m.player)
            .expect("validated update move");
        debug_assert!(m.new_locked >= pl.locked_coins);
        let new_fee = m.new_locked - pl.locked_coins;
        out.game_fund += new_fee;
        money_in += new_fee;
        pl.locked_coins = m.new_locked;
    }

    // Attacks.
    let mut attacked_tiles = CharactersOnTiles::new();
    attacked_tiles.apply_attacks(&out, &data.moves);
    if out.fork_active(Fork::LifeSteal) {
        attacked_tiles.defend_mutual_attacks();
    }
    attacked_tiles.draw_life(&mut out, &mut result);

    // Spawn-area deaths, poison deaths, then the actual removals.
    kill_spawn_area(&mut out, &mut result);
    decrement_life(&mut out, &mut result);
    finalise_kills(&mut out, &mut result);

    // At the life-steal fork, hearts and hearted hunters disappear for
    // good.
    if out.is_fork_height(Fork::LifeSteal) {
        remove_hearted_characters(&mut out, &mut result);
    }

    // Fresh waypoints; already-dead players are skipped.
    for m in &data.moves {
        if !m.is_spawn() {
            m.apply_waypoints(&mut out);
        }
    }

    // One movement step for everyone.
    let timesave = out.fork_active(Fork::TimeSave);
    for pl in out.players.values_mut() {
        for ch in pl.characters.values_mut() {
            if timesave && !ch.waypoints.is_empty() {
                if in_spectator_mode(ch.stay_in_spawn_area) {
                    // Spectators cannot move.
                    ch.stop_moving();
                } else {
                    // Moving costs the spawn protection.
                    ch.stay_in_spawn_area = MODE_NORMAL;
                }
            }
            move_towards_waypoint(ch);
        }
    }

    let respawn_crown = update_crown_state(&mut out);

    // Banking. This must not depend on randomized events: miners call the
    // step with a zero hash to compute the tax before the hash exists.
    {
        let GameState { players, banks, .. } = &mut out;
        for (pid, pl) in players.iter_mut() {
            let address = pl.address.clone();
            for (&index, ch) in pl.characters.iter_mut() {
                if ch.loot.amount() <= 0 {
                    continue;
                }
                // Dedicated player-spawn tiles bank too after timesave.
                let on_bank = banks.contains_key(&ch.coord)
                    || (timesave && map::is_player_spawn(ch.coord));
                if !on_bank {
                    continue;
                }

                // Banking tax: 10%.
                let tax = ch.loot.amount() / 10;
                result.tax_amount += tax;
                ch.loot.loot.amount -= tax;

                result.bounties.push(CollectedBounty::new(
                    pid.clone(),
                    index,
                    ch.loot,
                    address.clone(),
                ));
                ch.loot = CollectedLootInfo::default();
            }
        }
    }

    // Miners request tax computation with a null hash; everything from here
    // on depends on the real hash.
    if out.block_hash.is_null() {
        return Ok((out, result));
    }

    let mut rng = GameRng::new(&out.block_hash);

    // The disaster decision is the first RNG consumer on purpose: a block
    // hash can be checked for disasters without replaying anything else.
    if check_for_disaster(&out, &mut rng) {
        tracing::debug!(height = out.height, "poison disaster");
        apply_disaster(&mut out, &mut rng);
        debug_assert_eq!(out.height, out.disaster_height);
    }

    // Redistribute life drawn in the attacks; the kills themselves were
    // decided before the RNG came up.
    if out.fork_active(Fork::LifeSteal) {
        attacked_tiles.distribute_drawn_life(&mut rng, &mut out);
    }

    // New players enter the world.
    for m in &data.moves {
        if m.is_spawn() {
            m.apply_spawn(&mut out, &mut rng);
        }
    }

    // Messages and address updates, for everyone (dead players keep their
    // last chat line).
    for m in &data.moves {
        m.apply_common(&mut out);
    }

    // A player who banked a bounty, survived and changed addresses in the
    // same block gets paid at the new address.
    for bounty in &mut result.bounties {
        bounty.update_address(&out);
    }

    // Colour the dead players' chat from the pre-step state.
    for (pid, pl) in &mut out.dead_players_chat {
        let old = prev.players.get(pid).expect("died this block");
        pl.color = old.color;
    }

    // Treasure lands on the harvest areas. The portions must add up to the
    // full treasure; rounding dust would otherwise surface as a
    // conservation failure below.
    let crown_bonus_amount = map::CROWN_BONUS * data.treasure_amount / map::TOTAL_HARVEST;
    for i in 0..map::NUM_HARVEST_AREAS {
        let area = map::harvest_area(i);
        let a = rng.next_in_range(area.len() as u64) as usize;
        let treasure = map::HARVEST_PORTIONS[i] * data.treasure_amount / map::TOTAL_HARVEST;
        out.add_loot(area[a], treasure);
    }

    divide_loot_among_players(&mut out);
    crown_bonus(&mut out, crown_bonus_amount);

    update_banks(&mut out, &mut rng);

    // Hearts drop outside the original spawn area (which is also a bank).
    if drop_heart(&out) {
        debug_assert!(!out.fork_active(Fork::LifeSteal));
        let heart = loop {
            let x = rng.next_in_range(map::MAP_WIDTH as u64) as i32;
            let y = rng.next_in_range(map::MAP_HEIGHT as u64) as i32;
            if map::is_walkable(x, y) && !map::is_original_spawn_area(x, y) {
                break Coord::new(x, y);
            }
        };
        out.hearts.insert(heart);
    }

    collect_hearts(&mut out, &mut rng);
    collect_crown(&mut out, &mut rng, respawn_crown);

    // Conservation audit: any mismatch is a bug and rejects the block.
    let money_out: Amount = result.tax_amount
        + result
            .bounties
            .iter()
            .map(|b| b.loot.amount())
            .sum::<Amount>();
    let money_before = prev.coins_on_map() + prev.game_fund;
    let money_after = out.coins_on_map() + out.game_fund;
    if money_before + data.treasure_amount + money_in != money_after + money_out {
        tracing::warn!(
            height = out.height,
            money_before,
            money_after,
            money_in,
            money_out,
            treasure = data.treasure_amount,
            "coin conservation violated"
        );
        return Err(EngineError::ConservationMismatch {
            money_before,
            treasure: data.treasure_amount,
            money_in,
            money_after,
            money_out,
        }
        .into());
    }

    Ok((out, result))
}

/// Extract the moves of a block, validate them and perform the step.
pub fn perform_block_step(
    prev: &GameState,
    block: &Block,
    utxo: Option<&dyn UtxoView>,
) -> Result<(GameState, StepResult), StepError> {
    let mut data = StepData::new(prev);
    for tx in &block.txs {
        data.add_tx(prev, tx, utxo)?;
    }
    data.new_hash = block.hash;
    perform_step(prev, &data)
}

//! Attack resolution: building the tile index, applying destructs, mutual
//! defence and drawing/distributing life.

use std::collections::{BTreeMap, BTreeSet};

use gridhunt_types::amount::Amount;
use gridhunt_types::chain::Fork;
use gridhunt_types::game::{
    in_spectator_mode, is_protected, CharacterId, Coord, GameState, KilledBy,
};

use crate::moves::{Move, MoveKind};
use crate::rng::GameRng;
use crate::step::{destruct_radius, handle_killed_loot, StepResult};

/// A character on the map while attacks are being processed. Keeps all
/// attackers so that the kill transaction and life-stealing can both be
/// derived from it.
#[derive(Clone, Debug)]
pub struct AttackableCharacter {
    pub chid: CharacterId,
    pub color: u8,
    /// Coins already drawn from the victim's life, redistributed to the
    /// attackers later in the step.
    pub drawn_life: Amount,
    pub attackers: BTreeSet<CharacterId>,
}

impl AttackableCharacter {
    fn attack_by(&mut self, attacker: &CharacterId, attacker_color: u8) {
        // No friendly fire.
        if self.color == attacker_color {
            return;
        }
        debug_assert!(!self.attackers.contains(attacker));
        self.attackers.insert(attacker.clone());
    }

    /// Self-destruct only harms the character itself before the life-steal
    /// fork; afterwards it is merely an (expensive) no-op on oneself.
    fn attack_self(&mut self, life_steal: bool) {
        if !life_steal {
            debug_assert!(!self.attackers.contains(&self.chid));
            self.attackers.insert(self.chid.clone());
        }
    }
}

/// Tile-indexed map of attackable characters, built lazily when the block
/// actually contains destructs.
#[derive(Default)]
pub struct CharactersOnTiles {
    tiles: BTreeMap<Coord, Vec<AttackableCharacter>>,
    built: bool,
}

impl CharactersOnTiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_built(&mut self, state: &GameState) {
        if self.built {
            return;
        }
        debug_assert!(self.tiles.is_empty());

        let timesave = state.fork_active(Fork::TimeSave);
        for (pid, pl) in &state.players {
            for (&index, ch) in &pl.characters {
                // Newly spawned hunters are not attackable.
                if timesave && is_protected(ch.stay_in_spawn_area) {
                    continue;
                }
                self.tiles.entry(ch.coord).or_default().push(AttackableCharacter {
                    chid: CharacterId::new(pid.clone(), index),
                    color: pl.color,
                    drawn_life: 0,
                    attackers: BTreeSet::new(),
                });
            }
        }
        self.built = true;
    }

    /// Apply every destruct in the block's moves.
    pub fn apply_attacks(&mut self, state: &GameState, moves: &[Move]) {
        let life_steal = state.fork_active(Fork::LifeSteal);
        let timesave = state.fork_active(Fork::TimeSave);

        for m in moves {
            let MoveKind::Update { destruct, .. } = &m.kind else {
                continue;
            };
            if destruct.is_empty() {
                continue;
            }

            let pl = state
                .players
                .get(&m.player)
                .expect("moves are validated against the state");
            for &index in destruct {
                let Some(ch) = pl.characters.get(&index) else {
                    continue;
                };
                let chid = CharacterId::new(m.player.clone(), index);
                // The crown holder can never detonate.
                if state.crown_holder.as_ref() == Some(&chid) {
                    continue;
                }
                // Spectators cannot attack.
                if timesave && in_spectator_mode(ch.stay_in_spawn_area) {
                    continue;
                }

                self.ensure_built(state);

                let radius = destruct_radius(state, index == 0);
                let c = ch.coord;
                for y in c.y - radius..=c.y + radius {
                    for x in c.x - radius..=c.x + radius {
                        let Some(entries) = self.tiles.get_mut(&Coord::new(x, y)) else {
                            continue;
                        };
                        for a in entries {
                            if a.chid == chid {
                                a.attack_self(life_steal);
                            } else {
                                a.attack_by(&chid, pl.color);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Remove mutual attacks: if A attacks B and B attacks A, both attacks
    /// cancel. Only used once life-steal is active.
    pub fn defend_mutual_attacks(&mut self) {
        if !self.built {
            return;
        }

        let mut attacks: BTreeSet<(CharacterId, CharacterId)> = BTreeSet::new();
        for entries in self.tiles.values() {
            for a in entries {
                for attacker in &a.attackers {
                    attacks.insert((attacker.clone(), a.chid.clone()));
                }
            }
        }

        for entries in self.tiles.values_mut() {
            for a in entries {
                let not_defended: BTreeSet<CharacterId> = a
                    .attackers
                    .iter()
                    .filter(|attacker| {
                        !attacks.contains(&(a.chid.clone(), (*attacker).clone()))
                    })
                    .cloned()
                    .collect();
                a.attackers = not_defended;
            }
        }
    }

    /// Deduct life from attacked characters, killing those that run dry
    /// (or, before life-steal, everyone with an attacker).
    pub fn draw_life(&mut self, state: &mut GameState, result: &mut StepResult) {
        if !self.built {
            return;
        }

        let life_steal = state.fork_active(Fork::LifeSteal);
        let damage = state.params.name_coin_amount(state.height);

        for entries in self.tiles.values_mut() {
            for a in entries {
                if a.attackers.is_empty() {
                    continue;
                }
                debug_assert_eq!(a.drawn_life, 0);

                let killed = {
                    let victim = state
                        .players
                        .get_mut(&a.chid.player)
                        .expect("attackable characters belong to live players");

                    if life_steal {
                        debug_assert_eq!(a.chid.index, 0);

                        let mut full_damage = damage * a.attackers.len() as Amount;
                        if full_damage > victim.value {
                            full_damage = victim.value;
                        }
                        victim.value -= full_damage;
                        a.drawn_life += full_damage;

                        // Less than the minimum amount left: drain that too,
                        // it goes to the game fund during distribution.
                        debug_assert!(victim.value >= 0);
                        if victim.value < damage {
                            a.drawn_life += victim.value;
                            victim.value = 0;
                        }
                    }

                    // With life-steal, remaining health means survival.
                    if life_steal && victim.value != 0 {
                        debug_assert!(victim.value >= damage);
                        false
                    } else {
                        true
                    }
                };
                if !killed {
                    continue;
                }

                if a.chid.index == 0 {
                    for attacker in &a.attackers {
                        result.kill_player(
                            a.chid.player.clone(),
                            KilledBy::Destruct(attacker.clone()),
                        );
                    }
                }

                let has_character = state
                    .players
                    .get(&a.chid.player)
                    .is_some_and(|pl| pl.characters.contains_key(&a.chid.index));
                if has_character {
                    let first = a.attackers.first().expect("non-empty").clone();
                    let info = KilledBy::Destruct(first);
                    handle_killed_loot(state, &a.chid.player, a.chid.index, &info, result);
                    state
                        .players
                        .get_mut(&a.chid.player)
                        .expect("checked above")
                        .characters
                        .remove(&a.chid.index);
                }
            }
        }
    }

    /// Give drawn life back to the still-alive attackers, picking receivers
    /// by RNG. Removal keeps the candidate vector ordered; swapping in the
    /// last element would change the consensus sequence.
    pub fn distribute_drawn_life(&self, rng: &mut GameRng, state: &mut GameState) {
        if !self.built {
            return;
        }

        let damage = state.params.name_coin_amount(state.height);

        let mut alive_players: BTreeSet<CharacterId> = BTreeSet::new();
        for entries in self.tiles.values() {
            for a in entries {
                debug_assert!(!alive_players.contains(&a.chid));
                // Only generals are around once life-steal is in effect.
                debug_assert_eq!(a.chid.index, 0);
                let alive = state
                    .players
                    .get(&a.chid.player)
                    .is_some_and(|pl| pl.characters.contains_key(&a.chid.index));
                if alive {
                    alive_players.insert(a.chid.clone());
                }
            }
        }

        for entries in self.tiles.values() {
            for a in entries {
                if a.attackers.is_empty() || a.drawn_life == 0 {
                    continue;
                }

                let mut alive: Vec<CharacterId> = a
                    .attackers
                    .iter()
                    .filter(|attacker| alive_players.contains(*attacker))
                    .cloned()
                    .collect();

                let mut to_spend = a.drawn_life;
                while !alive.is_empty() && to_spend >= damage {
                    let ind = rng.next_in_range(alive.len() as u64) as usize;
                    let pl = state
                        .players
                        .get_mut(&alive[ind].player)
                        .expect("alive attackers exist in the state");
                    to_spend -= damage;
                    pl.value += damage;

                    // Stable erase; order is consensus-critical.
                    alive.remove(ind);
                }

                debug_assert!(to_spend >= 0);
                state.game_fund += to_spend;
            }
        }
    }
}

//! The per-block game state.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, Write};
use std::collections::{BTreeMap, BTreeSet};

use crate::amount::Amount;
use crate::chain::{ChainParams, Fork};
use crate::codec::{
    map_encode_size, read_i32, read_i64, read_map, read_set, read_string, read_string_map,
    set_encode_size, string_encode_size, string_map_encode_size, write_i32, write_i64, write_map,
    write_set, write_string, write_string_map,
};
use crate::game::player::MAX_NAME_LENGTH;
use crate::game::{CharacterId, Coord, LootInfo, PlayerId, PlayerState};
use crate::hash::Hash256;
use crate::map;

/// Codec caps: the map has ~250k tiles and names are at most 255 bytes, so
/// these bounds are far above anything a valid state can contain while
/// still rejecting nonsense lengths early.
const MAX_PLAYERS: usize = 1 << 22;
const MAX_TILES: usize = (map::MAP_WIDTH as usize) * (map::MAP_HEIGHT as usize);

/// Complete game state for one block hash. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    /// Consensus parameters in effect. Not serialized; supplied when
    /// reading a state back.
    pub params: ChainParams,

    /// All live players.
    pub players: BTreeMap<PlayerId, PlayerState>,

    /// Chat of players who died in this very block. Only colour, message
    /// and message block are meaningful in these entries.
    pub dead_players_chat: BTreeMap<PlayerId, PlayerState>,

    pub loot: BTreeMap<Coord, LootInfo>,
    pub hearts: BTreeSet<Coord>,

    /// Banks with their remaining life time (0 = static original bank).
    pub banks: BTreeMap<Coord, u32>,

    pub crown_pos: Coord,
    pub crown_holder: Option<CharacterId>,

    /// Coins accumulated by the game that can never be withdrawn.
    pub game_fund: Amount,

    /// Number of steps since the game start: the state with `height == i`
    /// includes moves from the i-th block. `-1` is the pre-genesis state.
    pub height: i32,

    /// Height of the last disaster, `-1` before the first one.
    pub disaster_height: i32,

    /// Hash of the block whose moves produced this state.
    pub block_hash: Hash256,
}

impl GameState {
    /// The state "before" the genesis block.
    pub fn new(params: ChainParams) -> Self {
        let mut state = Self {
            params,
            players: BTreeMap::new(),
            dead_players_chat: BTreeMap::new(),
            loot: BTreeMap::new(),
            hearts: BTreeSet::new(),
            banks: BTreeMap::new(),
            crown_pos: Coord::new(map::CROWN_START_X, map::CROWN_START_Y),
            crown_holder: None,
            game_fund: 0,
            height: -1,
            disaster_height: -1,
            block_hash: Hash256::ZERO,
        };
        set_original_banks(&mut state.banks);
        state
    }

    pub fn fork_active(&self, fork: Fork) -> bool {
        self.params.fork_active(fork, self.height)
    }

    pub fn is_fork_height(&self, fork: Fork) -> bool {
        self.params.is_fork_height(fork, self.height)
    }

    pub fn testing_rules(&self) -> bool {
        self.params.testing_rules()
    }

    /// Number of characters newly created players start with.
    pub fn num_initial_characters(&self) -> u32 {
        if self.fork_active(Fork::Poison) {
            1
        } else {
            3
        }
    }

    pub fn is_bank(&self, c: Coord) -> bool {
        debug_assert!(!self.banks.is_empty());
        self.banks.contains_key(&c)
    }

    /// Merge loot into a tile, dropping the entry when it cancels to zero.
    pub fn add_loot(&mut self, coord: Coord, amount: Amount) {
        if amount == 0 {
            return;
        }
        match self.loot.get_mut(&coord) {
            Some(existing) => {
                existing.amount += amount;
                if existing.amount == 0 {
                    self.loot.remove(&coord);
                } else {
                    existing.last_block = self.height;
                }
            }
            None => {
                self.loot.insert(coord, LootInfo::new(amount, self.height));
            }
        }
    }

    /// Total coins bound on the map: piles, carried loot and general values.
    pub fn coins_on_map(&self) -> Amount {
        let mut total: Amount = self.loot.values().map(|l| l.amount).sum();
        for player in self.players.values() {
            total += player.value;
            for ch in player.characters.values() {
                total += ch.loot.amount();
            }
        }
        total
    }
}

/// The fixed banks along the spawn strips used before the life-steal fork.
fn set_original_banks(banks: &mut BTreeMap<Coord, u32>) {
    debug_assert!(banks.is_empty());
    let (w, h) = (map::MAP_WIDTH, map::MAP_HEIGHT);
    for d in 0..map::SPAWN_AREA_LENGTH {
        banks.insert(Coord::new(0, d), 0);
        banks.insert(Coord::new(d, 0), 0);
        banks.insert(Coord::new(w - 1, d), 0);
        banks.insert(Coord::new(d, h - 1), 0);
        banks.insert(Coord::new(0, h - d - 1), 0);
        banks.insert(Coord::new(w - d - 1, 0), 0);
        banks.insert(Coord::new(w - 1, h - d - 1), 0);
        banks.insert(Coord::new(w - d - 1, h - 1), 0);
    }

    debug_assert_eq!(
        banks.len(),
        4 * (2 * map::SPAWN_AREA_LENGTH as usize - 1)
    );
    debug_assert!(banks
        .keys()
        .all(|c| map::is_original_spawn_area(c.x, c.y)));
}

impl Write for GameState {
    fn write(&self, writer: &mut impl BufMut) {
        write_string_map(&self.players, writer);
        write_string_map(&self.dead_players_chat, writer);
        write_map(&self.loot, writer);
        write_set(&self.hearts, writer);
        write_map(&self.banks, writer);
        self.crown_pos.write(writer);
        match &self.crown_holder {
            Some(holder) => {
                write_string(&holder.player, writer);
                write_i32(holder.index, writer);
            }
            None => write_string("", writer),
        }
        write_i64(self.game_fund, writer);
        write_i32(self.height, writer);
        write_i32(self.disaster_height, writer);
        self.block_hash.write(writer);
    }
}

impl Read for GameState {
    type Cfg = ChainParams;

    fn read_cfg(reader: &mut impl Buf, params: &Self::Cfg) -> Result<Self, Error> {
        let players = read_string_map(reader, MAX_PLAYERS, MAX_NAME_LENGTH, &())?;
        let dead_players_chat = read_string_map(reader, MAX_PLAYERS, MAX_NAME_LENGTH, &())?;
        let loot = read_map(reader, MAX_TILES, &())?;
        let hearts = read_set(reader, MAX_TILES)?;
        let banks = read_map(reader, MAX_TILES, &())?;
        let crown_pos = Coord::read_cfg(reader, &())?;
        let holder_name = read_string(reader, MAX_NAME_LENGTH)?;
        let crown_holder = if holder_name.is_empty() {
            None
        } else {
            Some(CharacterId {
                player: holder_name,
                index: read_i32(reader)?,
            })
        };
        Ok(Self {
            params: *params,
            players,
            dead_players_chat,
            loot,
            hearts,
            banks,
            crown_pos,
            crown_holder,
            game_fund: read_i64(reader)?,
            height: read_i32(reader)?,
            disaster_height: read_i32(reader)?,
            block_hash: Hash256::read_cfg(reader, &())?,
        })
    }
}

impl EncodeSize for GameState {
    fn encode_size(&self) -> usize {
        let holder_size = match &self.crown_holder {
            Some(holder) => string_encode_size(&holder.player) + 4,
            None => string_encode_size(""),
        };
        string_map_encode_size(&self.players)
            + string_map_encode_size(&self.dead_players_chat)
            + map_encode_size(&self.loot)
            + set_encode_size(&self.hearts)
            + map_encode_size(&self.banks)
            + self.crown_pos.encode_size()
            + holder_size
            + 16
            + self.block_hash.encode_size()
    }
}

//! Player state.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

use crate::amount::Amount;
use crate::codec::{
    map_encode_size, read_i32, read_i64, read_map, read_string, string_encode_size, write_i32,
    write_i64, write_map, write_string,
};
use crate::game::CharacterState;

/// Maximum number of simultaneously alive characters per player.
pub const MAX_CHARACTERS_PER_PLAYER: usize = 20;
/// Maximum number of characters a player can ever spawn.
pub const MAX_CHARACTERS_PER_PLAYER_TOTAL: i32 = 1000;

/// Maximum byte length of a player name.
pub const MAX_NAME_LENGTH: usize = 255;
/// Maximum byte length of a chat message kept in the state.
pub const MAX_MESSAGE_LENGTH: usize = 4096;
/// Maximum byte length of an address string kept in the state.
pub const MAX_ADDRESS_LENGTH: usize = 128;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum PlayerInvariantError {
    #[error("too many live characters (got={got}, max={max})")]
    TooManyCharacters { got: usize, max: usize },
    #[error("character index {index} not below next_character_index {next}")]
    IndexAboveNext { index: i32, next: i32 },
    #[error("next_character_index {next} above lifetime limit")]
    LifetimeLimitExceeded { next: i32 },
    #[error("remaining_life {life} out of range")]
    RemainingLifeOutOfRange { life: i32 },
}

/// A player and all of its characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerState {
    /// Team colour, 0-3.
    pub color: u8,

    /// Coins locked in the player's name on chain. A cache of the name
    /// output value, compared against a move's new output value to compute
    /// the game fee as the difference.
    pub locked_coins: Amount,
    /// In-game value of the general (hit points after the life-steal fork).
    pub value: Amount,

    /// Characters by index; 0 is the general.
    pub characters: BTreeMap<i32, CharacterState>,
    /// Index the next spawned character will get.
    pub next_character_index: i32,

    /// Blocks this player still lives if poisoned; `-1` = not poisoned.
    /// Never 0 in a stored state.
    pub remaining_life: i32,

    /// Last chat message and the block it was sent in.
    pub message: String,
    pub message_block: i32,
    /// Reward address; empty means pay to the name's own address.
    pub address: String,
    /// Admin lock: the reward address can only change when an input signed
    /// by this address is present.
    pub address_lock: String,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            color: 0xFF,
            locked_coins: 0,
            value: -1,
            characters: BTreeMap::new(),
            next_character_index: 0,
            remaining_life: -1,
            message: String::new(),
            message_block: 0,
            address: String::new(),
            address_lock: String::new(),
        }
    }
}

impl PlayerState {
    /// Whether another character may be spawned for this player.
    pub fn can_spawn_character(&self) -> bool {
        self.characters.len() < MAX_CHARACTERS_PER_PLAYER
            && self.next_character_index < MAX_CHARACTERS_PER_PLAYER_TOTAL
    }

    pub fn validate_invariants(&self) -> Result<(), PlayerInvariantError> {
        if self.characters.len() > MAX_CHARACTERS_PER_PLAYER {
            return Err(PlayerInvariantError::TooManyCharacters {
                got: self.characters.len(),
                max: MAX_CHARACTERS_PER_PLAYER,
            });
        }
        if let Some((&index, _)) = self.characters.last_key_value() {
            if index >= self.next_character_index {
                return Err(PlayerInvariantError::IndexAboveNext {
                    index,
                    next: self.next_character_index,
                });
            }
        }
        if self.next_character_index > MAX_CHARACTERS_PER_PLAYER_TOTAL {
            return Err(PlayerInvariantError::LifetimeLimitExceeded {
                next: self.next_character_index,
            });
        }
        if self.remaining_life == 0 || self.remaining_life < -1 {
            return Err(PlayerInvariantError::RemainingLifeOutOfRange {
                life: self.remaining_life,
            });
        }
        Ok(())
    }
}

impl Write for PlayerState {
    fn write(&self, writer: &mut impl BufMut) {
        self.color.write(writer);
        write_map(&self.characters, writer);
        write_i32(self.next_character_index, writer);
        write_i32(self.remaining_life, writer);

        write_string(&self.message, writer);
        write_i32(self.message_block, writer);
        write_string(&self.address, writer);
        write_string(&self.address_lock, writer);

        write_i64(self.locked_coins, writer);
        write_i64(self.value, writer);
    }
}

impl Read for PlayerState {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            color: u8::read(reader)?,
            characters: read_map(reader, MAX_CHARACTERS_PER_PLAYER, &())?,
            next_character_index: read_i32(reader)?,
            remaining_life: read_i32(reader)?,
            message: read_string(reader, MAX_MESSAGE_LENGTH)?,
            message_block: read_i32(reader)?,
            address: read_string(reader, MAX_ADDRESS_LENGTH)?,
            address_lock: read_string(reader, MAX_ADDRESS_LENGTH)?,
            locked_coins: read_i64(reader)?,
            value: read_i64(reader)?,
        })
    }
}

impl EncodeSize for PlayerState {
    fn encode_size(&self) -> usize {
        1 + map_encode_size(&self.characters)
            + 8
            + string_encode_size(&self.message)
            + 4
            + string_encode_size(&self.address)
            + string_encode_size(&self.address_lock)
            + 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;
    use crate::game::Coord;

    fn sample_player() -> PlayerState {
        let mut pl = PlayerState {
            color: 2,
            locked_coins: 200 * COIN,
            value: 200 * COIN,
            next_character_index: 2,
            message: "gg".into(),
            message_block: 9,
            address: "HunterAddr".into(),
            ..PlayerState::default()
        };
        pl.characters.insert(
            0,
            CharacterState {
                coord: Coord::new(100, 100),
                ..CharacterState::default()
            },
        );
        pl.characters.insert(
            1,
            CharacterState {
                coord: Coord::new(101, 100),
                ..CharacterState::default()
            },
        );
        pl
    }

    #[test]
    fn spawn_limits() {
        let mut pl = sample_player();
        assert!(pl.can_spawn_character());
        pl.next_character_index = MAX_CHARACTERS_PER_PLAYER_TOTAL;
        assert!(!pl.can_spawn_character());
    }

    #[test]
    fn invariants_hold_for_sample() {
        assert_eq!(sample_player().validate_invariants(), Ok(()));
    }

    #[test]
    fn invariants_catch_bad_index() {
        let mut pl = sample_player();
        pl.next_character_index = 1;
        assert!(matches!(
            pl.validate_invariants(),
            Err(PlayerInvariantError::IndexAboveNext { .. })
        ));
    }

    #[test]
    fn invariants_catch_zero_life() {
        let mut pl = sample_player();
        pl.remaining_life = 0;
        assert!(matches!(
            pl.validate_invariants(),
            Err(PlayerInvariantError::RemainingLifeOutOfRange { .. })
        ));
    }

    #[test]
    fn codec_round_trip() {
        let pl = sample_player();
        let mut buf = Vec::new();
        pl.write(&mut buf);
        assert_eq!(buf.len(), pl.encode_size());
        let mut reader = buf.as_slice();
        assert_eq!(PlayerState::read_cfg(&mut reader, &()).unwrap(), pl);
    }
}

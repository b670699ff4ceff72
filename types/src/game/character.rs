//! Character state and the spawn-area counter encoding.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};

use crate::amount::Amount;
use crate::codec::{read_vec, vec_encode_size, write_vec};
use crate::game::{CollectedLootInfo, Coord, LootInfo};

/// Spawn-area counter values for the timesave regime. Values below
/// [`MODE_NORMAL`] are spawn protection; [`MODE_LOGOUT`] is reached on a
/// bank tile; values above it are spectator mode.
pub const MODE_NORMAL: u8 = 6;
pub const MODE_LOGOUT: u8 = 8;
pub const MODE_SPECTATOR_BEGIN: u8 = 9;

/// Protected characters can neither attack nor be attacked.
pub fn is_protected(s: u8) -> bool {
    s < MODE_NORMAL || s > MODE_LOGOUT
}

/// One block before protection would end; idling now enters spectator mode.
pub fn spawn_protection_almost_finished(s: u8) -> bool {
    s == MODE_NORMAL - 1
}

pub fn in_spectator_mode(s: u8) -> bool {
    s > MODE_LOGOUT
}

/// While this holds, the character is exempt from spawn death.
pub fn no_logout(s: u8) -> bool {
    s != MODE_LOGOUT && s < MODE_SPECTATOR_BEGIN + 15
}

/// Upper bound on waypoints a character can queue (also enforced at move
/// parse time).
pub const MAX_WAYPOINTS: usize = 100;

/// A character on the map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacterState {
    /// Current position.
    pub coord: Coord,
    /// Direction of the last move, keypad-encoded 1-9 (5 = stopped).
    pub dir: u8,
    /// Segment start for straight-line interpolation of the current
    /// waypoint.
    pub from: Coord,
    /// Waypoints in reverse order; the next target is `last()`.
    pub waypoints: Vec<Coord>,
    /// Loot collected but not banked yet.
    pub loot: CollectedLootInfo,
    /// Spawn-area counter (see the mode constants above; plain bank-stay
    /// counter before the timesave fork).
    pub stay_in_spawn_area: u8,
}

impl Default for CharacterState {
    fn default() -> Self {
        Self {
            coord: Coord::new(0, 0),
            dir: 0,
            from: Coord::new(0, 0),
            waypoints: Vec::new(),
            loot: CollectedLootInfo::default(),
            stay_in_spawn_area: 0,
        }
    }
}

impl CharacterState {
    /// Clear the waypoint queue and restart segment interpolation.
    pub fn stop_moving(&mut self) {
        self.from = self.coord;
        self.waypoints.clear();
    }

    /// Collect loot up to the carrying capacity (`-1` = unlimited) and
    /// return the amount that did not fit.
    pub fn collect_loot(&mut self, mut new_loot: LootInfo, height: i32, carry_cap: Amount) -> Amount {
        let total_before = self.loot.amount() + new_loot.amount;

        let mut free_cap = carry_cap - self.loot.amount();
        if free_cap < 0 {
            // Carrying more than allowed can happen across capacity-changing
            // forks (or carry_cap == -1, handled below).
            free_cap = 0;
        }

        let remaining = if carry_cap == -1 || new_loot.amount <= free_cap {
            0
        } else {
            new_loot.amount - free_cap
        };

        if remaining > 0 {
            new_loot.amount -= remaining;
        }
        self.loot.collect(&new_loot, height);

        debug_assert!(remaining >= 0 && new_loot.amount >= 0);
        debug_assert_eq!(total_before, self.loot.amount() + remaining);

        remaining
    }
}

impl Write for CharacterState {
    fn write(&self, writer: &mut impl BufMut) {
        self.coord.write(writer);
        self.dir.write(writer);
        self.from.write(writer);
        write_vec(&self.waypoints, writer);
        self.loot.write(writer);
        self.stay_in_spawn_area.write(writer);
    }
}

impl Read for CharacterState {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            coord: Coord::read_cfg(reader, &())?,
            dir: u8::read(reader)?,
            from: Coord::read_cfg(reader, &())?,
            waypoints: read_vec(reader, MAX_WAYPOINTS)?,
            loot: CollectedLootInfo::read_cfg(reader, &())?,
            stay_in_spawn_area: u8::read(reader)?,
        })
    }
}

impl EncodeSize for CharacterState {
    fn encode_size(&self) -> usize {
        self.coord.encode_size()
            + 1
            + self.from.encode_size()
            + vec_encode_size(&self.waypoints)
            + self.loot.encode_size()
            + 1
    }
}

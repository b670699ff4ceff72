//! Loot piles and carried loot.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, Write};

use crate::amount::Amount;
use crate::codec::{read_i32, read_i64, write_i32, write_i64};

/// A pile of coins on a tile. The block span is informational and keeps the
/// hash of the resulting bounty transaction unique.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LootInfo {
    pub amount: Amount,
    pub first_block: i32,
    pub last_block: i32,
}

impl Default for LootInfo {
    fn default() -> Self {
        Self {
            amount: 0,
            first_block: -1,
            last_block: -1,
        }
    }
}

impl LootInfo {
    pub fn new(amount: Amount, height: i32) -> Self {
        Self {
            amount,
            first_block: height,
            last_block: height,
        }
    }
}

impl Write for LootInfo {
    fn write(&self, writer: &mut impl BufMut) {
        write_i64(self.amount, writer);
        write_i32(self.first_block, writer);
        write_i32(self.last_block, writer);
    }
}

impl Read for LootInfo {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            amount: read_i64(reader)?,
            first_block: read_i32(reader)?,
            last_block: read_i32(reader)?,
        })
    }
}

impl EncodeSize for LootInfo {
    fn encode_size(&self) -> usize {
        16
    }
}

/// Loot carried by a character but not banked yet.
///
/// A refund bounty is encoded with the sentinel `amount > 0` while
/// `collected_first_block == -1`; `collected_last_block` then holds the
/// refunding block height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectedLootInfo {
    pub loot: LootInfo,
    pub collected_first_block: i32,
    pub collected_last_block: i32,
}

impl Default for CollectedLootInfo {
    fn default() -> Self {
        Self {
            loot: LootInfo::default(),
            collected_first_block: -1,
            collected_last_block: -1,
        }
    }
}

impl CollectedLootInfo {
    pub fn amount(&self) -> Amount {
        self.loot.amount
    }

    /// Merge a picked-up pile into the carried loot.
    pub fn collect(&mut self, loot: &LootInfo, height: i32) {
        debug_assert!(!self.is_refund());
        if loot.amount <= 0 {
            return;
        }

        self.loot.amount += loot.amount;
        if self.loot.first_block < 0 || loot.first_block < self.loot.first_block {
            self.loot.first_block = loot.first_block;
        }
        if loot.last_block > self.loot.last_block {
            self.loot.last_block = loot.last_block;
        }

        if self.collected_first_block < 0 {
            self.collected_first_block = height;
        }
        self.collected_last_block = height;
    }

    /// Turn this into a player-refund record. The height keeps the refund
    /// transaction unique.
    pub fn set_refund(&mut self, refund_amount: Amount, height: i32) {
        debug_assert_eq!(self.loot.amount, 0);
        debug_assert_eq!(self.collected_first_block, -1);
        debug_assert_eq!(self.collected_last_block, -1);
        self.loot.amount = refund_amount;
        self.collected_last_block = height;
    }

    pub fn is_refund(&self) -> bool {
        self.loot.amount > 0 && self.collected_first_block == -1
    }

    pub fn refund_height(&self) -> i32 {
        debug_assert!(self.is_refund());
        self.collected_last_block
    }
}

impl Write for CollectedLootInfo {
    fn write(&self, writer: &mut impl BufMut) {
        self.loot.write(writer);
        write_i32(self.collected_first_block, writer);
        write_i32(self.collected_last_block, writer);
    }
}

impl Read for CollectedLootInfo {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let out = Self {
            loot: LootInfo::read_cfg(reader, &())?,
            collected_first_block: read_i32(reader)?,
            collected_last_block: read_i32(reader)?,
        };
        // Refunds are transient bounty records; they never appear in a
        // persisted character.
        if out.is_refund() {
            return Err(Error::Invalid("CollectedLootInfo", "refund in state"));
        }
        Ok(out)
    }
}

impl EncodeSize for CollectedLootInfo {
    fn encode_size(&self) -> usize {
        self.loot.encode_size() + 8
    }
}

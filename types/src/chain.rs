//! Chain profiles and the consensus fork oracle.
//!
//! The engine consumes only the fork-height tables and the network kind;
//! genesis hashes and PoW limits are carried as profile data for the
//! embedding node.

use crate::amount::{Amount, COIN};
use crate::hash::Hash256;

/// The named networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    /// The production chain.
    Production,
    /// The public test chain.
    PublicTest,
    /// Local regression testing; shares the public-test fork schedule but
    /// enables relaxed game rules (fixed spawn corner).
    RegressionTest,
}

/// Named consensus rule changes, in activation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fork {
    /// Poison disasters, higher general cost, one initial character.
    Poison,
    /// Carrying capacity introduced, spawn death disabled.
    CarryingCap,
    /// Rarer hearts, larger general cost, destruct radius 1.
    LessHearts,
    /// Life-steal combat, dynamic banks, randomized spawns, no hearts.
    LifeSteal,
    /// Dedicated spawn tiles, spawn protection, spectator mode, cheap fees.
    TimeSave,
}

/// Proof-of-work algorithms of the dual-algo chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowAlgo {
    Sha256d = 0,
    Scrypt = 1,
}

/// Consensus parameters of one network.
///
/// Cheap to copy; a [`crate::GameState`] embeds its params by value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainParams {
    pub network: Network,
    pub genesis_hash: Hash256,
    pub subsidy_halving_interval: i32,
    /// Upper PoW targets, indexed by [`PowAlgo`].
    pub pow_limit: [Hash256; 2],
    /// Target seconds between blocks (across both algorithms).
    pub pow_target_spacing: i64,
}

impl ChainParams {
    pub fn production() -> Self {
        Self {
            network: Network::Production,
            genesis_hash: hash_const(
                "00000000db7eb7a9e1a06cf995363dcdc4c28e8ae04827a961942657db9a1631",
            ),
            subsidy_halving_interval: 2_100_000,
            pow_limit: [
                hash_const("00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff"),
                hash_const("00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"),
            ],
            pow_target_spacing: 120,
        }
    }

    pub fn public_test() -> Self {
        Self {
            network: Network::PublicTest,
            genesis_hash: hash_const(
                "000000492c361a01ce7558a3bfb198ea3ff2f86f8b0c2e00d26135c53f4acbf7",
            ),
            ..Self::production()
        }
    }

    pub fn regression_test() -> Self {
        Self {
            network: Network::RegressionTest,
            genesis_hash: hash_const(
                "3867dcd08712d9b49de33d4ab145d57ad14a78c7843c51f8c5d782d5f102fb4a",
            ),
            subsidy_halving_interval: 150,
            ..Self::production()
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Production => Self::production(),
            Network::PublicTest => Self::public_test(),
            Network::RegressionTest => Self::regression_test(),
        }
    }

    /// Height at which the given fork activates on this network.
    pub fn fork_height(&self, fork: Fork) -> i32 {
        match self.network {
            Network::Production => match fork {
                Fork::Poison => 255_000,
                Fork::CarryingCap => 500_000,
                Fork::LessHearts => 590_000,
                Fork::LifeSteal => 795_000,
                Fork::TimeSave => 1_999_999,
            },
            Network::PublicTest | Network::RegressionTest => match fork {
                Fork::Poison => 190_000,
                Fork::CarryingCap => 200_000,
                Fork::LessHearts => 240_000,
                Fork::LifeSteal => 301_000,
                Fork::TimeSave => 331_500,
            },
        }
    }

    /// Whether a fork is in effect at the given height.
    pub fn fork_active(&self, fork: Fork, height: i32) -> bool {
        height >= self.fork_height(fork)
    }

    /// Whether the height is *exactly* the first with the fork in effect.
    /// Used to trigger one-off transition events.
    pub fn is_fork_height(&self, fork: Fork, height: i32) -> bool {
        if height == 0 {
            return false;
        }
        self.fork_active(fork, height) && !self.fork_active(fork, height - 1)
    }

    /// Relaxed rules for regression testing (fixed spawn corner).
    pub fn testing_rules(&self) -> bool {
        self.network == Network::RegressionTest
    }

    /// Minimum amount of coins locked in a player name. Also the life-steal
    /// damage unit.
    pub fn name_coin_amount(&self, height: i32) -> Amount {
        if self.fork_active(Fork::TimeSave, height) {
            return 100 * COIN;
        }
        if self.fork_active(Fork::LessHearts, height) {
            return 200 * COIN;
        }
        if self.fork_active(Fork::Poison, height) {
            return 10 * COIN;
        }
        COIN
    }

    /// Miner subsidy for a block at the given height.
    pub fn block_subsidy(&self, height: i32) -> Amount {
        let halvings = height.max(0) / self.subsidy_halving_interval;
        if halvings >= 63 {
            return 0;
        }
        COIN >> halvings
    }

    /// Per-block game treasure: the miner keeps 10% of the block reward, so
    /// the game world receives nine times the miner subsidy.
    pub fn treasure_amount(&self, height: i32) -> Amount {
        9 * self.block_subsidy(height)
    }
}

fn hash_const(s: &str) -> Hash256 {
    Hash256::from_hex(s).expect("static hash constant")
}

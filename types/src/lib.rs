//! Gridhunt core types.
//!
//! Defines the game data model (players, characters, loot, banks, crown),
//! the canonical byte codec used for persisted game states, the block /
//! move-carrier types handed to the engine, and the chain profile with its
//! consensus fork oracle.
//!
//! ## Determinism requirements
//! - Every container whose iteration order is observable in the game state
//!   is an ordered map or set (`BTreeMap` / `BTreeSet`).
//! - Codec implementations are written out field by field; the byte layout
//!   is a consensus artifact and must never depend on derive behaviour.

pub mod amount;
pub mod block;
pub mod chain;
pub mod codec;
pub mod game;
pub mod hash;
pub mod map;

pub use amount::{Amount, COIN};
pub use block::{Block, MoveTx, NameOp, NameOpKind, OutPoint, TxOut};
pub use chain::{ChainParams, Fork, Network, PowAlgo};
pub use game::{
    CharacterId, CharacterState, CollectedLootInfo, Coord, GameState, KilledBy, LootInfo,
    PlayerId, PlayerState,
};
pub use hash::Hash256;

/// Block hashes and transaction ids share the 256-bit hash representation.
pub type BlockHash = Hash256;
/// See [`BlockHash`].
pub type Txid = Hash256;

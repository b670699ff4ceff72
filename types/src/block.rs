//! Carrier types handed to the engine by the embedding node.
//!
//! Wire serialization of the containing chain is out of scope; these types
//! describe exactly the slice of a block the engine consumes: name
//! operations (player moves) and the transaction inputs needed to verify
//! address-change authorization.

use crate::amount::Amount;
use crate::hash::Hash256;

/// Reference to a transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// The slice of an unspent output the engine cares about: its value and the
/// address its script pays to (if it is a single-key script).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub address: Option<String>,
}

/// Kind of a name operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameOpKind {
    /// First registration of a name; carries a spawn move.
    FirstUpdate,
    /// Update of an existing name; carries an update move.
    Update,
}

/// One name operation output: the name is the player id, the value is the
/// JSON move payload, and `locked` is the coin amount of the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameOp {
    pub kind: NameOpKind,
    pub name: String,
    pub value: String,
    pub locked: Amount,
}

/// A transaction as seen by the engine: its inputs (for address-lock
/// authorization checks) and any name operations among its outputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveTx {
    pub inputs: Vec<OutPoint>,
    pub name_ops: Vec<NameOp>,
}

/// A block reduced to what the engine consumes.
///
/// Miners pass [`Hash256::ZERO`] as the hash to run the tax-only prefix of
/// a step before the final hash is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub hash: Hash256,
    pub txs: Vec<MoveTx>,
}

impl Block {
    pub fn new(hash: Hash256, txs: Vec<MoveTx>) -> Self {
        Self { hash, txs }
    }
}

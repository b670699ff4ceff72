//! Gridhunt execution layer.
//!
//! This crate contains the deterministic per-block state transition: move
//! parsing and validation, combat resolution, movement, banking, disasters,
//! treasure distribution and the derived game transactions.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time inside execution.
//! - Do not use non-deterministic randomness; all randomness comes from the
//!   block-hash-seeded [`GameRng`].
//! - Avoid iteration order of hash-based collections influencing outputs;
//!   every consensus-visible ordering is a sorted container or a stable
//!   erase over a sorted vector.
//!
//! The primary entrypoint is [`perform_step`] (and [`perform_block_step`],
//! which first extracts and validates the moves of a block).

pub mod attack;
pub mod gametx;
pub mod movement;
pub mod moves;
pub mod rng;
pub mod step;


pub use gametx::{create_game_transactions, GameTx, NameData, NameDb};
pub use moves::{Move, MoveKind, ParseError, StepData, UtxoView, ValidationError};
pub use rng::GameRng;
pub use step::{
    perform_block_step, perform_step, CollectedBounty, EngineError, StepError, StepResult,
};

//! Game data model.
//!
//! Pure state types plus the canonical codec for each. Game logic (movement,
//! combat, the per-block step) lives in the execution crate; the few methods
//! here are the ones that touch nothing but the state itself.

mod character;
mod coord;
mod killed;
mod loot;
mod player;
mod state;

pub use character::{
    in_spectator_mode, is_protected, no_logout, spawn_protection_almost_finished, CharacterState,
    MAX_WAYPOINTS, MODE_LOGOUT, MODE_NORMAL, MODE_SPECTATOR_BEGIN,
};
pub use coord::{dist_l_inf, CharacterId, Coord, PlayerId};
pub use killed::KilledBy;
pub use loot::{CollectedLootInfo, LootInfo};
pub use player::{
    PlayerState, MAX_CHARACTERS_PER_PLAYER, MAX_CHARACTERS_PER_PLAYER_TOTAL, MAX_NAME_LENGTH,
};
pub use state::GameState;

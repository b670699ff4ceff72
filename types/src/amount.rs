//! Coin amounts.

/// Amount in base units. Signed so that fee differences and sentinel values
/// (`-1` for "unset") can be represented directly.
pub type Amount = i64;

/// Number of base units per coin.
pub const COIN: Amount = 100_000_000;

/// Largest amount that is considered sane anywhere in the engine.
pub const MAX_MONEY: Amount = 21_000_000_000 * COIN;

/// Check an amount for range sanity.
pub fn money_range(amount: Amount) -> bool {
    (0..=MAX_MONEY).contains(&amount)
}

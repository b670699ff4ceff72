//! Move parsing, validation and per-block move collection.
//!
//! A move arrives as a name operation: the name is the player id, the JSON
//! value describes the intent, and the output amount is the new locked-coin
//! total. Parsing is strict: unknown keys, loose integer formatting or
//! out-of-map coordinates reject the move, and with it the whole block.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use thiserror::Error;

use gridhunt_types::amount::{Amount, COIN};
use gridhunt_types::block::{MoveTx, NameOpKind, OutPoint, TxOut};
use gridhunt_types::chain::{ChainParams, Fork};
use gridhunt_types::game::{Coord, GameState, PlayerId};
use gridhunt_types::hash::Hash256;
use gridhunt_types::map;

use crate::movement::spawn_player_character;
use crate::rng::GameRng;
use crate::step::StepError;

pub use gridhunt_types::game::{MAX_NAME_LENGTH, MAX_WAYPOINTS};

/// Number of team colours.
pub const NUM_TEAM_COLORS: u8 = 4;

/// Maximum byte length of a move's JSON value.
pub const MAX_VALUE_LENGTH: usize = 2048;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid player name")]
    BadPlayerName,
    #[error("malformed JSON value")]
    MalformedJson,
    #[error("move value too large")]
    ValueTooLarge,
    #[error("unknown or wrongly typed key '{0}'")]
    UnknownKey(String),
    #[error("invalid colour")]
    BadColor,
    #[error("invalid address '{0}'")]
    BadAddress(String),
    #[error("character index '{0}' not strictly formatted")]
    BadCharacterIndex(String),
    #[error("duplicate character index {0}")]
    DuplicateCharacterIndex(i32),
    #[error("malformed waypoint array")]
    BadWaypoints,
    #[error("too many waypoints")]
    TooManyWaypoints,
    #[error("waypoint outside the map")]
    WaypointOutsideMap,
    #[error("consecutive duplicate waypoint")]
    DuplicateWaypoint,
    #[error("duplicate name '{0}' in block")]
    DuplicateName(PlayerId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("spawn move for existing player '{0}'")]
    PlayerExists(PlayerId),
    #[error("update move for unknown player '{0}'")]
    UnknownPlayer(PlayerId),
    #[error("game fee too low: got {got}, required {required}")]
    FeeTooLow { got: Amount, required: Amount },
    #[error("spawn move is not a first update")]
    SpawnNotFirstUpdate,
    #[error("first update is not a spawn move")]
    FirstUpdateNotSpawn,
    #[error("address operation not authorized by address lock")]
    AddressNotAuthorized,
}

/// Read access to unspent outputs, used only to check that an
/// address-changing move is authorized by the player's address lock.
pub trait UtxoView {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<TxOut>;
}

/// What a move does, beyond the shared message/address updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveKind {
    /// First registration of a name: create the player.
    Spawn { color: u8 },
    /// Update of an existing player's characters.
    Update {
        /// Fresh waypoint queues per character index, already reversed
        /// (next target last).
        waypoints: BTreeMap<i32, Vec<Coord>>,
        /// Character indices that detonate this block.
        destruct: BTreeSet<i32>,
    },
}

/// A parsed move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub player: PlayerId,
    /// New amount of locked coins (the move output's value).
    pub new_locked: Amount,
    pub message: Option<String>,
    pub address: Option<String>,
    pub address_lock: Option<String>,
    pub kind: MoveKind,
}

impl Move {
    pub fn is_spawn(&self) -> bool {
        matches!(self.kind, MoveKind::Spawn { .. })
    }

    /// Parse a move from its name-operation value.
    pub fn parse(player: &str, json: &str, new_locked: Amount) -> Result<Self, ParseError> {
        if !is_valid_player_name(player) {
            return Err(ParseError::BadPlayerName);
        }
        if json.len() > MAX_VALUE_LENGTH {
            return Err(ParseError::ValueTooLarge);
        }

        let value: Value = serde_json::from_str(json).map_err(|_| ParseError::MalformedJson)?;
        let Value::Object(mut obj) = value else {
            return Err(ParseError::MalformedJson);
        };

        // A spawn move carries the team colour and nothing else.
        if let Some(v) = obj.remove("color") {
            let color = v
                .as_u64()
                .filter(|&c| c < NUM_TEAM_COLORS as u64)
                .ok_or(ParseError::BadColor)?;
            if let Some(key) = obj.keys().next() {
                return Err(ParseError::UnknownKey(key.clone()));
            }
            return Ok(Self {
                player: player.to_owned(),
                new_locked,
                message: None,
                address: None,
                address_lock: None,
                kind: MoveKind::Spawn { color: color as u8 },
            });
        }

        let message = extract_string(&mut obj, "msg")?;
        let address = extract_address(&mut obj, "address")?;
        let address_lock = extract_address(&mut obj, "addressLock")?;

        let mut waypoints = BTreeMap::new();
        let mut destruct = BTreeSet::new();
        for (key, v) in obj {
            let index = parse_character_index(&key)?;
            let Value::Object(mut sub) = v else {
                return Err(ParseError::UnknownKey(key));
            };

            if let Some(wp_value) = sub.remove("wp") {
                let wp = parse_waypoints(&wp_value)?;
                if waypoints.insert(index, wp).is_some() {
                    return Err(ParseError::DuplicateCharacterIndex(index));
                }
            }
            if let Some(d) = sub.remove("destruct") {
                let flag = d.as_bool().ok_or_else(|| ParseError::UnknownKey(key.clone()))?;
                if flag {
                    destruct.insert(index);
                }
            }
            if let Some(extra) = sub.keys().next() {
                return Err(ParseError::UnknownKey(extra.clone()));
            }
        }

        Ok(Self {
            player: player.to_owned(),
            new_locked,
            message,
            address,
            address_lock,
            kind: MoveKind::Update {
                waypoints,
                destruct,
            },
        })
    }

    /// Check the move against the previous state: spawn/update consistency
    /// and the minimum game fee at the target height.
    pub fn validate(&self, state: &GameState) -> Result<(), ValidationError> {
        let old_locked = match state.players.get(&self.player) {
            None => {
                if !self.is_spawn() {
                    return Err(ValidationError::UnknownPlayer(self.player.clone()));
                }
                0
            }
            Some(pl) => {
                if self.is_spawn() {
                    return Err(ValidationError::PlayerExists(self.player.clone()));
                }
                pl.locked_coins
            }
        };

        debug_assert!(old_locked >= 0 && self.new_locked >= 0);
        let game_fee = self.new_locked - old_locked;
        let required = self.minimum_game_fee(&state.params, state.height + 1);
        debug_assert!(required >= 0);
        if game_fee < required {
            tracing::debug!(
                player = %self.player,
                got = game_fee,
                required,
                "move rejected: game fee too low"
            );
            return Err(ValidationError::FeeTooLow {
                got: game_fee,
                required,
            });
        }

        Ok(())
    }

    /// Minimum required game fee for this move at the given height.
    pub fn minimum_game_fee(&self, params: &ChainParams, height: i32) -> Amount {
        match &self.kind {
            MoveKind::Spawn { .. } => {
                let coin_amount = params.name_coin_amount(height);

                if params.fork_active(Fork::TimeSave, height) {
                    return coin_amount + COIN;
                }
                if params.fork_active(Fork::LifeSteal, height) {
                    return coin_amount + 5 * COIN;
                }
                coin_amount
            }
            MoveKind::Update { destruct, .. } => {
                if params.fork_active(Fork::TimeSave, height) {
                    return COIN * destruct.len() as Amount;
                }
                if !params.fork_active(Fork::LifeSteal, height) {
                    return 0;
                }
                20 * COIN * destruct.len() as Amount
            }
        }
    }

    /// If the move performs an address operation that must be authorized,
    /// return the lock address that has to sign an input.
    pub fn address_operation_permission(&self, state: &GameState) -> Option<String> {
        if self.address.is_none() && self.address_lock.is_none() {
            return None;
        }
        let pl = state.players.get(&self.player)?;
        if pl.address_lock.is_empty() {
            return None;
        }
        Some(pl.address_lock.clone())
    }

    /// Apply message/address updates. Runs for every move, including moves
    /// of players who died this block (their chat is preserved).
    pub(crate) fn apply_common(&self, state: &mut GameState) {
        let height = state.height;
        let Some(pl) = state.players.get_mut(&self.player) else {
            if let Some(message) = &self.message {
                let pl = state.dead_players_chat.entry(self.player.clone()).or_default();
                pl.message = message.clone();
                pl.message_block = height;
            }
            return;
        };

        if let Some(message) = &self.message {
            pl.message = message.clone();
            pl.message_block = height;
        }
        if let Some(address) = &self.address {
            pl.address = address.clone();
        }
        if let Some(lock) = &self.address_lock {
            pl.address_lock = lock.clone();
        }
    }

    /// Overwrite the waypoint queues named by this move.
    pub(crate) fn apply_waypoints(&self, state: &mut GameState) {
        let MoveKind::Update { waypoints, .. } = &self.kind else {
            return;
        };
        let Some(pl) = state.players.get_mut(&self.player) else {
            return;
        };
        for (index, wp) in waypoints {
            let Some(ch) = pl.characters.get_mut(index) else {
                continue;
            };
            if ch.waypoints.is_empty() || wp.is_empty() || ch.waypoints.last() != wp.last() {
                ch.from = ch.coord;
            }
            ch.waypoints = wp.clone();
        }
    }

    /// Create the player and its initial characters.
    pub(crate) fn apply_spawn(&self, state: &mut GameState, rng: &mut GameRng) {
        let MoveKind::Spawn { color } = &self.kind else {
            return;
        };
        debug_assert!(!state.players.contains_key(&self.player));

        let mut pl = gridhunt_types::game::PlayerState {
            color: *color,
            ..Default::default()
        };

        // A fresh player's value is clamped to the name coin amount, with
        // the overpay going to the game fund; this stops buying beefed-up
        // hunters. Before the life-steal fork overpaying did exactly that.
        if state.fork_active(Fork::LifeSteal) {
            let coin_amount = state.params.name_coin_amount(state.height);
            debug_assert!(self.new_locked >= coin_amount);
            pl.value = coin_amount;
            pl.locked_coins = self.new_locked;
            state.game_fund += self.new_locked - coin_amount;
        } else {
            pl.value = self.new_locked;
            pl.locked_coins = self.new_locked;
        }

        let params = state.params;
        let height = state.height;
        for _ in 0..state.num_initial_characters() {
            spawn_player_character(&params, height, &mut pl, rng);
        }

        state.players.insert(self.player.clone(), pl);
    }
}

fn extract_string(
    obj: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ParseError> {
    match obj.remove(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ParseError::UnknownKey(key.to_owned())),
    }
}

fn extract_address(
    obj: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ParseError> {
    let Some(addr) = extract_string(obj, key)? else {
        return Ok(None);
    };
    if !addr.is_empty() && !is_valid_receive_address(&addr) {
        return Err(ParseError::BadAddress(addr));
    }
    Ok(Some(addr))
}

/// Syntactic check of a single-key payout address: base58 alphabet in the
/// usual length range. Full script validation belongs to the wallet layer.
fn is_valid_receive_address(addr: &str) -> bool {
    const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    (26..=35).contains(&addr.len()) && addr.chars().all(|c| BASE58.contains(c))
}

/// Character-index keys must be the strict decimal form of a non-negative
/// integer: no signs, no leading zeros.
fn parse_character_index(key: &str) -> Result<i32, ParseError> {
    let index: i32 = key
        .parse()
        .map_err(|_| ParseError::BadCharacterIndex(key.to_owned()))?;
    if index < 0 || index.to_string() != key {
        return Err(ParseError::BadCharacterIndex(key.to_owned()));
    }
    Ok(index)
}

/// Parse a flat waypoint array into the reversed queue representation.
fn parse_waypoints(value: &Value) -> Result<Vec<Coord>, ParseError> {
    let Value::Array(arr) = value else {
        return Err(ParseError::BadWaypoints);
    };
    if arr.len() % 2 != 0 {
        return Err(ParseError::BadWaypoints);
    }
    let n = arr.len() / 2;
    if n > MAX_WAYPOINTS {
        return Err(ParseError::TooManyWaypoints);
    }

    let mut result = vec![Coord::new(0, 0); n];
    for i in 0..n {
        let x = coord_component(&arr[2 * i])?;
        let y = coord_component(&arr[2 * i + 1])?;
        if !map::is_inside_map(x, y) {
            return Err(ParseError::WaypointOutsideMap);
        }
        // Waypoints are stored reversed so the current target pops off the
        // end in O(1).
        result[n - 1 - i] = Coord::new(x, y);
        if i > 0 && result[n - 1 - i] == result[n - i] {
            return Err(ParseError::DuplicateWaypoint);
        }
    }
    Ok(result)
}

fn coord_component(value: &Value) -> Result<i32, ParseError> {
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or(ParseError::BadWaypoints)
}

/// Player names may contain letters, digits, underscore, hyphen and single
/// interior spaces; no leading/trailing/double spaces.
pub fn is_valid_player_name(player: &str) -> bool {
    if player.is_empty() || player.len() > MAX_NAME_LENGTH {
        return false;
    }
    let mut prev_space = true;
    for c in player.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => prev_space = false,
            ' ' => {
                if prev_space {
                    return false;
                }
                prev_space = true;
            }
            _ => return false,
        }
    }
    !prev_space
}

/// The moves of one block, plus the treasure the block injects.
pub struct StepData {
    pub treasure_amount: Amount,
    pub new_hash: Hash256,
    pub moves: Vec<Move>,
    seen_names: BTreeSet<PlayerId>,
}

impl StepData {
    /// Prepare step data for the block following `prev`.
    pub fn new(prev: &GameState) -> Self {
        Self {
            treasure_amount: prev.params.treasure_amount(prev.height + 1),
            new_hash: Hash256::ZERO,
            moves: Vec::new(),
            seen_names: BTreeSet::new(),
        }
    }

    /// Extract and validate the moves of one transaction. Either all of the
    /// transaction's name operations are accepted or none are.
    pub fn add_tx(
        &mut self,
        state: &GameState,
        tx: &MoveTx,
        utxo: Option<&dyn UtxoView>,
    ) -> Result<(), StepError> {
        let mut new_moves = Vec::new();

        for op in &tx.name_ops {
            if self.seen_names.contains(&op.name) {
                return Err(ParseError::DuplicateName(op.name.clone()).into());
            }
            self.seen_names.insert(op.name.clone());

            let m = Move::parse(&op.name, &op.value, op.locked)?;
            m.validate(state)?;

            // A spawn must register the name; an update must not.
            match (m.is_spawn(), op.kind) {
                (true, NameOpKind::FirstUpdate) | (false, NameOpKind::Update) => {}
                (true, _) => return Err(ValidationError::SpawnNotFirstUpdate.into()),
                (false, _) => return Err(ValidationError::FirstUpdateNotSpawn.into()),
            }

            if let (Some(utxo), Some(lock)) = (utxo, m.address_operation_permission(state)) {
                // An input whose previous output pays the lock address has
                // been signed by its owner and authorizes the change.
                let authorized = tx.inputs.iter().any(|input| {
                    utxo.get_coin(input)
                        .is_some_and(|coin| coin.address.as_deref() == Some(lock.as_str()))
                });
                if !authorized {
                    return Err(ValidationError::AddressNotAuthorized.into());
                }
            }

            new_moves.push(m);
        }

        self.moves.append(&mut new_moves);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridhunt_types::chain::Network;
    use gridhunt_types::game::PlayerState;

    fn fresh_state() -> GameState {
        let mut state = GameState::new(ChainParams::for_network(Network::Production));
        state.height = 0;
        state
    }

    #[test]
    fn player_name_rules() {
        assert!(is_valid_player_name("alice"));
        assert!(is_valid_player_name("bob the hunter"));
        assert!(is_valid_player_name("x-_1"));
        assert!(!is_valid_player_name(""));
        assert!(!is_valid_player_name(" alice"));
        assert!(!is_valid_player_name("alice "));
        assert!(!is_valid_player_name("a  b"));
        assert!(!is_valid_player_name("käfer"));
        assert!(!is_valid_player_name(&"a".repeat(256)));
    }

    #[test]
    fn spawn_move_parses() {
        let m = Move::parse("alice", r#"{"color":0}"#, COIN).expect("spawn");
        assert!(m.is_spawn());
        assert_eq!(m.kind, MoveKind::Spawn { color: 0 });
    }

    #[test]
    fn spawn_rejects_extra_keys_and_bad_colors() {
        assert_eq!(
            Move::parse("alice", r#"{"color":4}"#, COIN),
            Err(ParseError::BadColor)
        );
        assert_eq!(
            Move::parse("alice", r#"{"color":-1}"#, COIN),
            Err(ParseError::BadColor)
        );
        assert!(matches!(
            Move::parse("alice", r#"{"color":1,"msg":"hi"}"#, COIN),
            Err(ParseError::UnknownKey(_))
        ));
    }

    #[test]
    fn waypoints_parse_reversed() {
        let m = Move::parse("alice", r#"{"0":{"wp":[1,2,3,4]}}"#, 0).expect("update");
        let MoveKind::Update { waypoints, .. } = &m.kind else {
            panic!("expected update");
        };
        assert_eq!(
            waypoints[&0],
            vec![Coord::new(3, 4), Coord::new(1, 2)],
            "last waypoint must be at the back"
        );
    }

    #[test]
    fn consecutive_duplicate_waypoints_rejected() {
        assert_eq!(
            Move::parse("alice", r#"{"0":{"wp":[1,2,3,4,3,4]}}"#, 0),
            Err(ParseError::DuplicateWaypoint)
        );
    }

    #[test]
    fn waypoint_boundaries() {
        // Exactly 100 waypoints are fine.
        let mut flat = Vec::new();
        for i in 0..100 {
            flat.push((i % 50).to_string());
            flat.push((i / 50 + 2).to_string());
        }
        let json = format!(r#"{{"0":{{"wp":[{}]}}}}"#, flat.join(","));
        assert!(Move::parse("alice", &json, 0).is_ok());

        // One more is rejected.
        flat.push("400".into());
        flat.push("400".into());
        let json = format!(r#"{{"0":{{"wp":[{}]}}}}"#, flat.join(","));
        assert_eq!(
            Move::parse("alice", &json, 0),
            Err(ParseError::TooManyWaypoints)
        );
    }

    #[test]
    fn waypoints_must_be_inside_map() {
        assert_eq!(
            Move::parse("alice", r#"{"0":{"wp":[502,0]}}"#, 0),
            Err(ParseError::WaypointOutsideMap)
        );
        assert_eq!(
            Move::parse("alice", r#"{"0":{"wp":[-1,5]}}"#, 0),
            Err(ParseError::WaypointOutsideMap)
        );
    }

    #[test]
    fn odd_waypoint_array_rejected() {
        assert_eq!(
            Move::parse("alice", r#"{"0":{"wp":[1,2,3]}}"#, 0),
            Err(ParseError::BadWaypoints)
        );
    }

    #[test]
    fn character_keys_are_strict() {
        assert!(Move::parse("alice", r#"{"10":{"destruct":true}}"#, 0).is_ok());
        assert!(matches!(
            Move::parse("alice", r#"{"01":{"destruct":true}}"#, 0),
            Err(ParseError::BadCharacterIndex(_))
        ));
        assert!(matches!(
            Move::parse("alice", r#"{"-1":{"destruct":true}}"#, 0),
            Err(ParseError::BadCharacterIndex(_))
        ));
        assert!(matches!(
            Move::parse("alice", r#"{"x":{"destruct":true}}"#, 0),
            Err(ParseError::BadCharacterIndex(_))
        ));
    }

    #[test]
    fn unknown_keys_rejected_everywhere() {
        assert!(matches!(
            Move::parse("alice", r#"{"bogus":1}"#, 0),
            Err(ParseError::BadCharacterIndex(_))
        ));
        assert!(matches!(
            Move::parse("alice", r#"{"0":{"teleport":true}}"#, 0),
            Err(ParseError::UnknownKey(_))
        ));
    }

    #[test]
    fn destruct_false_is_no_destruct() {
        let m = Move::parse("alice", r#"{"0":{"destruct":false}}"#, 0).expect("update");
        let MoveKind::Update { destruct, .. } = &m.kind else {
            panic!("expected update");
        };
        assert!(destruct.is_empty());
    }

    #[test]
    fn address_syntax_checked() {
        let valid = r#"{"address":"HEXHZGhZJkMg5CWhWGA8dzJUqW9VWNLWgK"}"#;
        assert!(Move::parse("alice", valid, 0).is_ok());
        let cleared = r#"{"address":""}"#;
        assert!(Move::parse("alice", cleared, 0).is_ok());
        let invalid = r#"{"address":"0OIl"}"#;
        assert!(matches!(
            Move::parse("alice", invalid, 0),
            Err(ParseError::BadAddress(_))
        ));
    }

    #[test]
    fn spawn_validation_against_state() {
        let mut state = fresh_state();
        let spawn = Move::parse("alice", r#"{"color":0}"#, COIN).unwrap();
        assert_eq!(spawn.validate(&state), Ok(()));

        // One unit below the minimum fee is rejected.
        let broke = Move::parse("alice", r#"{"color":0}"#, COIN - 1).unwrap();
        assert!(matches!(
            broke.validate(&state),
            Err(ValidationError::FeeTooLow { .. })
        ));

        state.players.insert("alice".into(), PlayerState::default());
        assert!(matches!(
            spawn.validate(&state),
            Err(ValidationError::PlayerExists(_))
        ));
    }

    #[test]
    fn update_validation_against_state() {
        let mut state = fresh_state();
        let update = Move::parse("alice", r#"{}"#, 0).unwrap();
        assert!(matches!(
            update.validate(&state),
            Err(ValidationError::UnknownPlayer(_))
        ));

        state.players.insert(
            "alice".into(),
            PlayerState {
                locked_coins: COIN,
                ..PlayerState::default()
            },
        );
        // Pre-fork updates have no minimum fee; equal locked value is fine.
        let update = Move::parse("alice", r#"{}"#, COIN).unwrap();
        assert_eq!(update.validate(&state), Ok(()));
    }

    #[test]
    fn destruct_fee_schedule() {
        let params = ChainParams::production();
        let m = Move::parse("alice", r#"{"0":{"destruct":true},"1":{"destruct":true}}"#, 0).unwrap();
        assert_eq!(m.minimum_game_fee(&params, 1), 0);
        let life_steal = params.fork_height(Fork::LifeSteal);
        assert_eq!(m.minimum_game_fee(&params, life_steal), 40 * COIN);
        let timesave = params.fork_height(Fork::TimeSave);
        assert_eq!(m.minimum_game_fee(&params, timesave), 2 * COIN);
    }

    #[test]
    fn spawn_fee_schedule() {
        let params = ChainParams::production();
        let m = Move::parse("alice", r#"{"color":1}"#, 1000 * COIN).unwrap();
        assert_eq!(m.minimum_game_fee(&params, 1), COIN);
        let life_steal = params.fork_height(Fork::LifeSteal);
        assert_eq!(m.minimum_game_fee(&params, life_steal), 205 * COIN);
        let timesave = params.fork_height(Fork::TimeSave);
        assert_eq!(m.minimum_game_fee(&params, timesave), 101 * COIN);
    }

    #[test]
    fn duplicate_names_in_block_rejected() {
        let state = fresh_state();
        let mut data = StepData::new(&state);
        let op = gridhunt_types::block::NameOp {
            kind: NameOpKind::FirstUpdate,
            name: "alice".into(),
            value: r#"{"color":0}"#.into(),
            locked: COIN,
        };
        let tx = MoveTx {
            inputs: vec![],
            name_ops: vec![op.clone()],
        };
        assert!(data.add_tx(&state, &tx, None).is_ok());
        let tx2 = MoveTx {
            inputs: vec![],
            name_ops: vec![op],
        };
        assert!(matches!(
            data.add_tx(&state, &tx2, None),
            Err(StepError::Parse(ParseError::DuplicateName(_)))
        ));
    }

    #[test]
    fn spawn_must_be_first_update() {
        let state = fresh_state();
        let mut data = StepData::new(&state);
        let tx = MoveTx {
            inputs: vec![],
            name_ops: vec![gridhunt_types::block::NameOp {
                kind: NameOpKind::Update,
                name: "alice".into(),
                value: r#"{"color":0}"#.into(),
                locked: COIN,
            }],
        };
        assert!(matches!(
            data.add_tx(&state, &tx, None),
            Err(StepError::Validation(ValidationError::SpawnNotFirstUpdate))
        ));
    }

    struct SingleCoin(OutPoint, TxOut);
    impl UtxoView for SingleCoin {
        fn get_coin(&self, outpoint: &OutPoint) -> Option<TxOut> {
            (*outpoint == self.0).then(|| self.1.clone())
        }
    }

    #[test]
    fn address_change_requires_lock_signature() {
        let mut state = fresh_state();
        state.players.insert(
            "alice".into(),
            PlayerState {
                locked_coins: COIN,
                address_lock: "HEXHZGhZJkMg5CWhWGA8dzJUqW9VWNLWgK".into(),
                ..PlayerState::default()
            },
        );

        let outpoint = OutPoint::new(Hash256::new([3; 32]), 0);
        let owned_by_lock = SingleCoin(
            outpoint,
            TxOut {
                value: COIN,
                address: Some("HEXHZGhZJkMg5CWhWGA8dzJUqW9VWNLWgK".into()),
            },
        );
        let owned_by_other = SingleCoin(
            outpoint,
            TxOut {
                value: COIN,
                address: Some("HunterSomebodyElse1111111111111111".into()),
            },
        );

        let tx = MoveTx {
            inputs: vec![outpoint],
            name_ops: vec![gridhunt_types::block::NameOp {
                kind: NameOpKind::Update,
                name: "alice".into(),
                value: r#"{"address":"HEXHZGhZJkMg5CWhWGA8dzJUqW9VWNLWgK"}"#.into(),
                locked: COIN,
            }],
        };

        let mut data = StepData::new(&state);
        assert!(data.add_tx(&state, &tx, Some(&owned_by_lock)).is_ok());

        let mut data = StepData::new(&state);
        assert!(matches!(
            data.add_tx(&state, &tx, Some(&owned_by_other)),
            Err(StepError::Validation(ValidationError::AddressNotAuthorized))
        ));

        // Without a UTXO view the check is skipped (replay contexts).
        let mut data = StepData::new(&state);
        assert!(data.add_tx(&state, &tx, None).is_ok());
    }
}

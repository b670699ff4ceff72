//! Derived game transactions: kill transactions that destroy the
//! name-coins of dead players, and bounty transactions that pay out banked
//! rewards and refunds.
//!
//! The input scripts are purely informational; clients read them to learn
//! why the coins moved.

use gridhunt_types::amount::Amount;
use gridhunt_types::block::OutPoint;
use gridhunt_types::game::KilledBy;

use crate::step::{EngineError, StepResult};

/// Opcodes for the informational input scripts of game transactions.
///
/// Kill input: `<victim> GAMEOP_KILLED_BY <killer>...` (no killers for a
/// spawn death) or `<victim> GAMEOP_KILLED_POISON`.
/// Bounty input: `<player> GAMEOP_COLLECTED_BOUNTY <cidx> <fb> <lb> <cfb>
/// <clb>` or `<player> GAMEOP_REFUND <cidx> <height>`.
pub const GAMEOP_KILLED_BY: i64 = 1;
pub const GAMEOP_COLLECTED_BOUNTY: i64 = 2;
pub const GAMEOP_KILLED_POISON: i64 = 3;
pub const GAMEOP_REFUND: i64 = 4;

/// One element of an informational input script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptAtom {
    /// A data push (player or character name).
    Data(Vec<u8>),
    /// A small integer push (opcodes, indices, heights).
    Num(i64),
}

/// Current on-chain data of a name, as provided by the embedding node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameData {
    /// Outpoint of the name's latest update; spent by the kill input.
    pub update_outpoint: OutPoint,
    /// Script of the name's address; bounties without an explicit payout
    /// address pay here.
    pub address_script: Vec<u8>,
}

/// Name database lookup interface.
pub trait NameDb {
    fn get_name(&self, name: &str) -> Option<NameData>;
}

/// Where a bounty output pays to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayTo {
    /// A player-provided payout address (validated at move parse time).
    Address(String),
    /// The name's current address script.
    Script(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameTxIn {
    /// Spent output; `None` for the dummy inputs of bounty transactions.
    pub prevout: Option<OutPoint>,
    pub script: Vec<ScriptAtom>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameTxOut {
    pub value: Amount,
    pub pay_to: PayTo,
}

/// A game-generated transaction template. Kill transactions have no
/// outputs; bounty transactions pair each input with its output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GameTx {
    pub inputs: Vec<GameTxIn>,
    pub outputs: Vec<GameTxOut>,
}

impl GameTx {
    pub fn is_bounty(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Build the game transactions for one step result. Returns zero, one or
/// two transactions: the kill transaction (if players died) followed by the
/// bounty transaction (if anything is paid out).
pub fn create_game_transactions(
    name_db: &dyn NameDb,
    height: i32,
    step_result: &StepResult,
) -> Result<Vec<GameTx>, EngineError> {
    let mut game_txs = Vec::new();

    // Destroy the name-coins of killed players.
    let mut tx_kills = GameTx::default();
    for victim in step_result.killed_players() {
        let data = name_db
            .get_name(victim)
            .ok_or_else(|| EngineError::KilledUnknownPlayer(victim.clone()))?;

        let mut script = vec![ScriptAtom::Data(victim.clone().into_bytes())];

        // If several reasons apply, the transaction reports the first one
        // per the killed-by ordering; all destruct killers are listed.
        let reasons = step_result
            .killed_by()
            .get(victim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| EngineError::NoKillReason(victim.clone()))?;
        let first = &reasons[0];

        // Only destruct may legitimately repeat (one record per killer).
        if !matches!(first, KilledBy::Destruct(_))
            && reasons.iter().skip(1).any(|r| r == first)
        {
            return Err(EngineError::DuplicateKillReason(victim.clone()));
        }

        match first {
            KilledBy::Destruct(_) => {
                script.push(ScriptAtom::Num(GAMEOP_KILLED_BY));
                for reason in reasons {
                    let KilledBy::Destruct(killer) = reason else {
                        break;
                    };
                    script.push(ScriptAtom::Data(killer.to_string().into_bytes()));
                }
            }
            KilledBy::Spawn => script.push(ScriptAtom::Num(GAMEOP_KILLED_BY)),
            KilledBy::Poison => script.push(ScriptAtom::Num(GAMEOP_KILLED_POISON)),
        }

        tx_kills.inputs.push(GameTxIn {
            prevout: Some(data.update_outpoint),
            script,
        });
    }
    if !tx_kills.inputs.is_empty() {
        debug_assert!(!tx_kills.is_bounty());
        game_txs.push(tx_kills);
    }

    // Pay the collected bounties; the inputs are dummies carrying the
    // informational description of the payout.
    let mut tx_bounties = GameTx::default();
    for bounty in &step_result.bounties {
        let name = &bounty.character.player;
        let data = name_db
            .get_name(name)
            .ok_or_else(|| EngineError::BountyUnknownPlayer(name.clone()))?;

        let pay_to = if bounty.address.is_empty() {
            PayTo::Script(data.address_script)
        } else {
            PayTo::Address(bounty.address.clone())
        };
        tx_bounties.outputs.push(GameTxOut {
            value: bounty.loot.amount(),
            pay_to,
        });

        let mut script = vec![ScriptAtom::Data(name.clone().into_bytes())];
        if bounty.loot.is_refund() {
            script.push(ScriptAtom::Num(GAMEOP_REFUND));
            script.push(ScriptAtom::Num(bounty.character.index as i64));
            script.push(ScriptAtom::Num(bounty.loot.refund_height() as i64));
        } else {
            script.push(ScriptAtom::Num(GAMEOP_COLLECTED_BOUNTY));
            script.push(ScriptAtom::Num(bounty.character.index as i64));
            script.push(ScriptAtom::Num(bounty.loot.loot.first_block as i64));
            script.push(ScriptAtom::Num(bounty.loot.loot.last_block as i64));
            script.push(ScriptAtom::Num(bounty.loot.collected_first_block as i64));
            script.push(ScriptAtom::Num(bounty.loot.collected_last_block as i64));
        }
        tx_bounties.inputs.push(GameTxIn {
            prevout: None,
            script,
        });
    }
    if !tx_bounties.inputs.is_empty() {
        debug_assert!(tx_bounties.is_bounty());
        game_txs.push(tx_bounties);
    }

    if !game_txs.is_empty() {
        tracing::debug!(
            height,
            kills = game_txs.first().map_or(0, |tx| if tx.is_bounty() { 0 } else { tx.inputs.len() }),
            bounties = step_result.bounties.len(),
            "game transactions"
        );
    }

    Ok(game_txs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::CollectedBounty;
    use gridhunt_types::game::{CharacterId, CollectedLootInfo, LootInfo};
    use gridhunt_types::{Hash256, COIN};
    use std::collections::BTreeMap;

    struct Names(BTreeMap<String, NameData>);

    impl Names {
        fn with(names: &[&str]) -> Self {
            let mut map = BTreeMap::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(
                    (*name).to_owned(),
                    NameData {
                        update_outpoint: OutPoint::new(Hash256::new([i as u8 + 1; 32]), 0),
                        address_script: vec![0x76, 0xA9, i as u8],
                    },
                );
            }
            Self(map)
        }
    }

    impl NameDb for Names {
        fn get_name(&self, name: &str) -> Option<NameData> {
            self.0.get(name).cloned()
        }
    }

    fn destruct_kill(victim: &str, killers: &[(&str, i32)]) -> StepResult {
        let mut result = StepResult::default();
        for (player, index) in killers {
            result.kill_player(
                victim.to_owned(),
                KilledBy::Destruct(CharacterId::new((*player).to_owned(), *index)),
            );
        }
        result
    }

    #[test]
    fn kill_tx_lists_all_killers() {
        let names = Names::with(&["victim"]);
        let result = destruct_kill("victim", &[("hunter a", 0), ("hunter b", 2)]);
        let txs = create_game_transactions(&names, 100, &result).expect("build");
        assert_eq!(txs.len(), 1);
        let kill = &txs[0];
        assert!(!kill.is_bounty());
        assert_eq!(kill.inputs.len(), 1);
        assert_eq!(
            kill.inputs[0].script,
            vec![
                ScriptAtom::Data(b"victim".to_vec()),
                ScriptAtom::Num(GAMEOP_KILLED_BY),
                ScriptAtom::Data(b"hunter a".to_vec()),
                ScriptAtom::Data(b"hunter b.2".to_vec()),
            ]
        );
        assert!(kill.inputs[0].prevout.is_some());
    }

    #[test]
    fn spawn_kill_has_no_extras() {
        let names = Names::with(&["victim"]);
        let mut result = StepResult::default();
        result.kill_player("victim".into(), KilledBy::Spawn);
        let txs = create_game_transactions(&names, 5, &result).expect("build");
        assert_eq!(
            txs[0].inputs[0].script,
            vec![
                ScriptAtom::Data(b"victim".to_vec()),
                ScriptAtom::Num(GAMEOP_KILLED_BY),
            ]
        );
    }

    #[test]
    fn poison_kill_uses_poison_opcode() {
        let names = Names::with(&["victim"]);
        let mut result = StepResult::default();
        result.kill_player("victim".into(), KilledBy::Poison);
        let txs = create_game_transactions(&names, 5, &result).expect("build");
        assert_eq!(
            txs[0].inputs[0].script[1],
            ScriptAtom::Num(GAMEOP_KILLED_POISON)
        );
    }

    #[test]
    fn bounty_tx_pairs_inputs_and_outputs() {
        let names = Names::with(&["alice"]);
        let mut result = StepResult::default();
        let mut loot = CollectedLootInfo::default();
        loot.collect(&LootInfo::new(9 * COIN, 90), 95);
        result.bounties.push(CollectedBounty {
            character: CharacterId::new("alice".into(), 1),
            loot,
            address: String::new(),
        });
        let txs = create_game_transactions(&names, 100, &result).expect("build");
        assert_eq!(txs.len(), 1);
        let bounty = &txs[0];
        assert!(bounty.is_bounty());
        assert_eq!(bounty.inputs.len(), bounty.outputs.len());
        assert_eq!(bounty.outputs[0].value, 9 * COIN);
        assert_eq!(bounty.outputs[0].pay_to, PayTo::Script(vec![0x76, 0xA9, 0]));
        assert_eq!(
            bounty.inputs[0].script,
            vec![
                ScriptAtom::Data(b"alice".to_vec()),
                ScriptAtom::Num(GAMEOP_COLLECTED_BOUNTY),
                ScriptAtom::Num(1),
                ScriptAtom::Num(90),
                ScriptAtom::Num(90),
                ScriptAtom::Num(95),
                ScriptAtom::Num(95),
            ]
        );
    }

    #[test]
    fn refund_bounty_encoding() {
        let names = Names::with(&["alice"]);
        let mut result = StepResult::default();
        let mut loot = CollectedLootInfo::default();
        loot.set_refund(200 * COIN, 123);
        result.bounties.push(CollectedBounty {
            character: CharacterId::new("alice".into(), 0),
            loot,
            address: "HEXHZGhZJkMg5CWhWGA8dzJUqW9VWNLWgK".into(),
        });
        let txs = create_game_transactions(&names, 123, &result).expect("build");
        assert_eq!(
            txs[0].inputs[0].script,
            vec![
                ScriptAtom::Data(b"alice".to_vec()),
                ScriptAtom::Num(GAMEOP_REFUND),
                ScriptAtom::Num(0),
                ScriptAtom::Num(123),
            ]
        );
        assert_eq!(
            txs[0].outputs[0].pay_to,
            PayTo::Address("HEXHZGhZJkMg5CWhWGA8dzJUqW9VWNLWgK".into())
        );
    }

    #[test]
    fn missing_name_is_an_engine_error() {
        let names = Names::with(&[]);
        let result = destruct_kill("ghost", &[("hunter", 0)]);
        assert!(matches!(
            create_game_transactions(&names, 1, &result),
            Err(EngineError::KilledUnknownPlayer(_))
        ));
    }

    #[test]
    fn kills_and_bounties_in_one_step() {
        let names = Names::with(&["victim", "banker"]);
        let mut result = destruct_kill("victim", &[("banker", 0)]);
        let mut loot = CollectedLootInfo::default();
        loot.collect(&LootInfo::new(COIN, 10), 11);
        result.bounties.push(CollectedBounty {
            character: CharacterId::new("banker".into(), 0),
            loot,
            address: String::new(),
        });
        let txs = create_game_transactions(&names, 12, &result).expect("build");
        assert_eq!(txs.len(), 2);
        assert!(!txs[0].is_bounty());
        assert!(txs[1].is_bounty());
    }
}

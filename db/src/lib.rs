//! Game-state cache keyed by block hash.
//!
//! Each block hash corresponds to exactly one game state; states never
//! change once stored. That makes this database fundamentally different
//! from a UTXO set: entries are only ever written once and read back, never
//! updated in place.
//!
//! Two tiers: a bounded in-memory map for recent states (reorgs stay
//! cheap), and an on-disk store keeping every Nth block plus the last few
//! main-chain states. Anything in between is recomputed on demand by
//! replaying blocks from the nearest stored predecessor.

pub mod kv;
mod signal;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use commonware_codec::{Read as _, Write as _};
use thiserror::Error;

use gridhunt_execution::{perform_block_step, StepError};
use gridhunt_types::block::Block;
use gridhunt_types::chain::ChainParams;
use gridhunt_types::game::GameState;
use gridhunt_types::Hash256;

use kv::{Batch, KvStore};
pub use signal::TipSignal;

/// Keep every Nth game state permanently on disk.
const KEEP_EVERY_NTH: i32 = 2000;
/// Number of recent main-chain states kept in memory across flushes.
const MIN_IN_MEMORY: usize = 10;
/// Cache size that triggers a flush.
const MAX_IN_MEMORY: usize = 100;

/// How many replayed blocks pass between cancellation checks.
const CANCEL_POLL_INTERVAL: usize = 64;

/// Key prefix of game-state records.
const KEY_PREFIX: u8 = b'g';

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt game state record: {0}")]
    Corrupt(commonware_codec::Error),
    #[error("block {0} not found in the block index")]
    UnknownBlock(Hash256),
    #[error("replaying a block failed: {0}")]
    Replay(#[from] StepError),
    #[error("state replay cancelled")]
    Cancelled,
}

/// Block-index lookups the cache needs. Implemented by the embedding node;
/// covers all known blocks, not just the active chain.
pub trait BlockIndex {
    /// Parent of a block, `None` for the genesis block.
    fn parent_hash(&self, hash: &Hash256) -> Option<Hash256>;
    fn main_chain_tip(&self) -> Hash256;
    fn height(&self, hash: &Hash256) -> Option<i32>;
    fn main_chain_contains(&self, hash: &Hash256) -> bool;
}

/// Access to full block payloads for replay.
pub trait BlockReader {
    fn read_block(&self, hash: &Hash256) -> Result<Block, StorageError>;
}

/// Cooperative cancellation for long replays.
#[derive(Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Inner {
    cache: BTreeMap<Hash256, GameState>,
    /// Temporarily disables pruning, e.g. while deep chains of old blocks
    /// are re-connected during verification.
    keep_everything: bool,
}

/// The two-tier game-state database.
pub struct GameDb {
    params: ChainParams,
    keep_every_nth: i32,
    min_in_memory: usize,
    max_in_memory: usize,
    disk: KvStore,
    inner: Mutex<Inner>,
}

impl GameDb {
    pub fn open(dir: impl AsRef<Path>, params: ChainParams) -> Result<Self, StorageError> {
        Self::with_tuning(dir, params, KEEP_EVERY_NTH, MIN_IN_MEMORY, MAX_IN_MEMORY)
    }

    /// Open with explicit retention tuning (tests and special deployments).
    pub fn with_tuning(
        dir: impl AsRef<Path>,
        params: ChainParams,
        keep_every_nth: i32,
        min_in_memory: usize,
        max_in_memory: usize,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            params,
            keep_every_nth,
            min_in_memory,
            max_in_memory,
            disk: KvStore::open(dir)?,
            inner: Mutex::new(Inner {
                cache: BTreeMap::new(),
                keep_everything: false,
            }),
        })
    }

    fn key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(KEY_PREFIX);
        key.extend_from_slice(&hash.0);
        key
    }

    fn hash_from_key(key: &[u8]) -> Option<Hash256> {
        let bytes: [u8; 32] = key.strip_prefix(&[KEY_PREFIX])?.try_into().ok()?;
        Some(Hash256::new(bytes))
    }

    fn encode_state(state: &GameState) -> Vec<u8> {
        let mut buf = Vec::new();
        state.write(&mut buf);
        buf
    }

    /// Get without recomputation: memory first, then disk.
    fn get_from_cache(&self, hash: &Hash256) -> Result<Option<GameState>, StorageError> {
        {
            let inner = self.inner.lock().expect("cache lock poisoned");
            if let Some(state) = inner.cache.get(hash) {
                debug_assert_eq!(state.block_hash, *hash);
                return Ok(Some(state.clone()));
            }
        }

        let Some(bytes) = self.disk.read(&Self::key(hash))? else {
            return Ok(None);
        };
        let mut reader = bytes.as_slice();
        let state =
            GameState::read_cfg(&mut reader, &self.params).map_err(StorageError::Corrupt)?;
        debug_assert_eq!(state.block_hash, *hash);
        Ok(Some(state))
    }

    /// Look up the game state for a block hash, replaying intermediate
    /// blocks from the nearest cached predecessor if necessary. The cache
    /// lock is not held across the replay.
    pub fn get(
        &self,
        hash: &Hash256,
        index: &dyn BlockIndex,
        blocks: &dyn BlockReader,
        cancel: Option<&CancelFlag>,
    ) -> Result<GameState, StorageError> {
        if let Some(state) = self.get_from_cache(hash)? {
            return Ok(state);
        }
        if index.height(hash).is_none() {
            return Err(StorageError::UnknownBlock(*hash));
        }

        // Walk back to the latest predecessor whose state is known; at the
        // genesis block, start from the default initial state.
        let mut state = GameState::new(self.params);
        let mut needed = vec![*hash];
        loop {
            let cur = *needed.last().expect("non-empty");
            let Some(parent) = index.parent_hash(&cur) else {
                break;
            };
            if let Some(found) = self.get_from_cache(&parent)? {
                state = found;
                break;
            }
            if index.height(&parent).is_none() {
                return Err(StorageError::UnknownBlock(parent));
            }
            needed.push(parent);
        }

        tracing::info!(
            from = state.height,
            to = index.height(hash).unwrap_or(-1),
            "integrating game state"
        );

        let mut replayed = 0usize;
        while let Some(cur) = needed.pop() {
            if let Some(cancel) = cancel {
                if replayed % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
            }

            let block = blocks.read_block(&cur)?;
            debug_assert_eq!(block.hash, cur);
            let (next, _result) = perform_block_step(&state, &block, None)?;
            debug_assert_eq!(next.block_hash, cur);
            state = next;
            replayed += 1;
        }

        self.store(hash, &state, index)?;
        Ok(state)
    }

    /// Store a computed state. `get` does this itself on a miss; callers
    /// use it when connecting blocks to avoid recomputation.
    pub fn store(
        &self,
        hash: &Hash256,
        state: &GameState,
        index: &dyn BlockIndex,
    ) -> Result<(), StorageError> {
        debug_assert_eq!(*hash, state.block_hash);
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.cache.insert(*hash, state.clone());
        if !inner.keep_everything && inner.cache.len() > self.max_in_memory {
            self.flush_locked(&mut inner, index, false)?;
        }
        Ok(())
    }

    /// Toggle the keep-everything mode. Turning it off flushes immediately
    /// if the cache has grown past its bound.
    pub fn set_keep_everything(
        &self,
        keep: bool,
        index: &dyn BlockIndex,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        // Only actual transitions are allowed; a redundant call would later
        // "revert" a change that never happened.
        debug_assert_ne!(inner.keep_everything, keep);
        inner.keep_everything = keep;
        if !keep && inner.cache.len() > self.max_in_memory {
            self.flush_locked(&mut inner, index, false)?;
        }
        Ok(())
    }

    /// Flush the in-memory cache: recent main-chain states stay (unless
    /// `save_all`, used at shutdown), everything else is written to disk or
    /// discarded per the keep-every-Nth policy. Also prunes on-disk records
    /// that no longer fit the policy.
    pub fn flush(&self, index: &dyn BlockIndex, save_all: bool) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        self.flush_locked(&mut inner, index, save_all)
    }

    fn flush_locked(
        &self,
        inner: &mut Inner,
        index: &dyn BlockIndex,
        save_all: bool,
    ) -> Result<(), StorageError> {
        let tip = index.main_chain_tip();
        let best_height = index
            .height(&tip)
            .ok_or(StorageError::UnknownBlock(tip))?;

        // Recent main-chain states stay in memory for cheap reorgs.
        let mut keep_in_memory: BTreeSet<Hash256> = BTreeSet::new();
        for hash in inner.cache.keys() {
            if !index.main_chain_contains(hash) {
                continue;
            }
            let Some(height) = index.height(hash) else {
                continue;
            };
            debug_assert!(height <= best_height);
            if best_height - height < self.min_in_memory as i32 {
                keep_in_memory.insert(*hash);
            }
        }

        let mut batch = Batch::default();
        let mut written = 0u32;
        let mut discarded = 0u32;
        let mut to_erase = Vec::new();
        for (hash, state) in &inner.cache {
            let keep_this = keep_in_memory.contains(hash);
            if !save_all && keep_this {
                continue;
            }

            let height = index
                .height(hash)
                .ok_or(StorageError::UnknownBlock(*hash))?;
            if height % self.keep_every_nth == 0 || keep_this {
                batch.put(Self::key(hash), Self::encode_state(state));
                written += 1;
            } else {
                discarded += 1;
            }
            to_erase.push(*hash);
        }
        for hash in to_erase {
            inner.cache.remove(&hash);
        }
        debug_assert!(!save_all || inner.cache.is_empty());
        tracing::info!(written, discarded, save_all, "flushed game states");

        // Old branch states or states written before the chain advanced may
        // violate the policy now; purge them.
        let mut pruned = 0u32;
        for key in self.disk.keys()? {
            let Some(hash) = Self::hash_from_key(&key) else {
                continue;
            };
            let keep_this = keep_in_memory.contains(&hash);
            if save_all && keep_this {
                continue;
            }
            let Some(height) = index.height(&hash) else {
                continue;
            };
            if height % self.keep_every_nth != 0 {
                batch.delete(key);
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "pruning game states from disk");
        }

        self.disk.commit(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridhunt_types::chain::Network;

    /// A linear chain of empty blocks on regression-test rules.
    struct TestChain {
        hashes: Vec<Hash256>,
    }

    impl TestChain {
        fn new(len: usize) -> Self {
            let hashes = (0..len)
                .map(|i| {
                    let mut bytes = [0xC0u8; 32];
                    bytes[0] = (i & 0xFF) as u8;
                    bytes[1] = (i >> 8) as u8;
                    Hash256::new(bytes)
                })
                .collect();
            Self { hashes }
        }

        fn tip(&self) -> Hash256 {
            *self.hashes.last().expect("non-empty chain")
        }

        fn position(&self, hash: &Hash256) -> Option<usize> {
            self.hashes.iter().position(|h| h == hash)
        }
    }

    impl BlockIndex for TestChain {
        fn parent_hash(&self, hash: &Hash256) -> Option<Hash256> {
            let pos = self.position(hash)?;
            if pos == 0 {
                None
            } else {
                Some(self.hashes[pos - 1])
            }
        }

        fn main_chain_tip(&self) -> Hash256 {
            self.tip()
        }

        fn height(&self, hash: &Hash256) -> Option<i32> {
            self.position(hash).map(|p| p as i32)
        }

        fn main_chain_contains(&self, hash: &Hash256) -> bool {
            self.position(hash).is_some()
        }
    }

    impl BlockReader for TestChain {
        fn read_block(&self, hash: &Hash256) -> Result<Block, StorageError> {
            if self.position(hash).is_none() {
                return Err(StorageError::UnknownBlock(*hash));
            }
            Ok(Block::new(*hash, vec![]))
        }
    }

    fn params() -> ChainParams {
        ChainParams::for_network(Network::RegressionTest)
    }

    #[test]
    fn get_replays_from_the_initial_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GameDb::open(dir.path(), params()).expect("open");
        let chain = TestChain::new(12);

        let state = db.get(&chain.tip(), &chain, &chain, None).expect("get");
        assert_eq!(state.height, 11);
        assert_eq!(state.block_hash, chain.tip());

        // Second fetch hits the cache and returns the identical state.
        let again = db.get(&chain.tip(), &chain, &chain, None).expect("get");
        assert_eq!(again, state);
    }

    #[test]
    fn get_unknown_block_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GameDb::open(dir.path(), params()).expect("open");
        let chain = TestChain::new(3);

        let bogus = Hash256::new([0xFF; 32]);
        assert!(matches!(
            db.get(&bogus, &chain, &chain, None),
            Err(StorageError::UnknownBlock(_))
        ));
    }

    #[test]
    fn store_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GameDb::open(dir.path(), params()).expect("open");
        let chain = TestChain::new(4);

        let state = db.get(&chain.hashes[2], &chain, &chain, None).expect("get");
        db.store(&chain.hashes[2], &state, &chain).expect("store");
        let back = db.get(&chain.hashes[2], &chain, &chain, None).expect("get");
        assert_eq!(back, state);
    }

    #[test]
    fn flush_applies_retention_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Keep every 4th block; last 2 main-chain states stay in memory.
        let db = GameDb::with_tuning(dir.path(), params(), 4, 2, 50).expect("open");
        let chain = TestChain::new(10);

        // Populate the cache with every state of the chain.
        for hash in &chain.hashes {
            db.get(hash, &chain, &chain, None).expect("get");
        }
        db.flush(&chain, false).expect("flush");

        // Heights 0, 4 and 8 match the keep-every-Nth policy; the last two
        // (8 and 9) stayed in memory. Everything is still reachable, but
        // intermediate states need a replay.
        for (i, hash) in chain.hashes.iter().enumerate() {
            let on_disk = db.disk.contains(&GameDb::key(hash));
            let expected = i % 4 == 0 && i != 8;
            assert_eq!(on_disk, expected, "disk record for height {i}");
        }

        let state = db.get(&chain.hashes[6], &chain, &chain, None).expect("get");
        assert_eq!(state.height, 6);
    }

    #[test]
    fn save_all_persists_recent_states_for_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chain = TestChain::new(6);

        {
            let db = GameDb::with_tuning(dir.path(), params(), 4, 2, 50).expect("open");
            for hash in &chain.hashes {
                db.get(hash, &chain, &chain, None).expect("get");
            }
            // Shutdown: everything still cached is written out.
            db.flush(&chain, true).expect("flush");
        }

        // A fresh instance reads the tip state straight from disk.
        let db = GameDb::with_tuning(dir.path(), params(), 4, 2, 50).expect("reopen");
        let state = db
            .get_from_cache(&chain.tip())
            .expect("disk read")
            .expect("tip state persisted");
        assert_eq!(state.height, 5);
    }

    #[test]
    fn keep_everything_suppresses_flushing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GameDb::with_tuning(dir.path(), params(), 4, 1, 2).expect("open");
        let chain = TestChain::new(8);

        db.set_keep_everything(true, &chain).expect("toggle on");
        for hash in &chain.hashes {
            db.get(hash, &chain, &chain, None).expect("get");
        }
        {
            let inner = db.inner.lock().unwrap();
            assert_eq!(inner.cache.len(), 8, "nothing flushed while keeping");
        }

        db.set_keep_everything(false, &chain).expect("toggle off");
        let inner = db.inner.lock().unwrap();
        assert!(inner.cache.len() <= 2, "flush ran after reverting");
    }

    #[test]
    fn cancelled_replay_stores_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GameDb::open(dir.path(), params()).expect("open");
        let chain = TestChain::new(5);

        let cancel = CancelFlag::default();
        cancel.cancel();
        assert!(matches!(
            db.get(&chain.tip(), &chain, &chain, Some(&cancel)),
            Err(StorageError::Cancelled)
        ));
        let inner = db.inner.lock().unwrap();
        assert!(inner.cache.is_empty(), "no partial results cached");
    }
}

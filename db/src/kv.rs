//! Minimal keyed record store backing the game-state cache.
//!
//! One file per key, named by the hex of the key bytes. Writes go through a
//! temp-file + rename so a crash never leaves a partial record; a batch
//! applies all of its operations on commit. The store has a single writer
//! (the cache) by design.

use commonware_utils::{from_hex, hex};
use std::fs::{self, File};
use std::io::{self, Read as _, Write as _};
use std::path::{Path, PathBuf};

const RECORD_EXT: &str = "rec";

/// A set of writes and deletes applied together.
#[derive(Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl Batch {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Directory-backed key/value store.
pub struct KvStore {
    dir: PathBuf,
}

impl KvStore {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &[u8]) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", hex(key)))
    }

    pub fn read(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let mut file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut value = Vec::new();
        file.read_to_end(&mut value)?;
        Ok(Some(value))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.path_for(key).exists()
    }

    /// All keys currently stored, in unspecified order.
    pub fn keys(&self) -> io::Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(key) = from_hex(stem) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Apply a batch. Each record lands via write-to-temp + rename, so no
    /// partial records survive a crash.
    pub fn commit(&self, batch: Batch) -> io::Result<()> {
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    let path = self.path_for(&key);
                    let tmp = path.with_extension("tmp");
                    let mut file = File::create(&tmp)?;
                    file.write_all(&value)?;
                    file.sync_all()?;
                    fs::rename(&tmp, &path)?;
                }
                BatchOp::Delete(key) => {
                    match fs::remove_file(self.path_for(&key)) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Ok(())
    }
}

//! Optional on-disk cache of translated blocks, keyed by a hash of the
//! guest bytes that produced them.
//!
//! Grounded directly on `ppcjit::cache::Cache` (an `fjall` keyspace
//! keyed by an `XxHash3_128` digest via `twox_hash`), adapted from
//! hashing a Cranelift IR stencil to hashing the raw guest instruction
//! bytes a block was translated from. Translation correctness never
//! depends on this cache: a miss, or any I/O error against it, simply
//! falls through to ordinary translation, gated by
//! [`crate::config::EnvConfig::disable_aot`] and
//! [`crate::config::EnvConfig::aot_errors_are_fatal`].

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use fjall::{Database, KeyspaceCreateOptions};
use thiserror::Error;
use twox_hash::XxHash3_128;
use zerocopy::IntoBytes;

struct Hash128(XxHash3_128);

impl Hasher for Hash128 {
    fn finish(&self) -> u64 {
        unimplemented!("128-bit digest only, see finish_128")
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHash(u128);

impl BlockHash {
    /// Hashed over the guest bytes the block was decoded from plus the
    /// guest PC they started at, so two identical byte sequences at
    /// different addresses (e.g. relocated PC-relative literals) don't
    /// collide.
    pub fn of(guest_pc: u64, guest_bytes: &[u8]) -> Self {
        let mut hasher = Hash128(XxHash3_128::with_seed(0));
        guest_pc.hash(&mut hasher);
        guest_bytes.hash(&mut hasher);
        Self(hasher.0.finish_128())
    }
}

#[derive(Debug, Error)]
pub enum AotError {
    #[error("failed to open AOT cache at {path}: {source}")]
    Open { path: PathBuf, #[source] source: fjall::Error },
    #[error("AOT cache I/O error: {0}")]
    Io(#[from] fjall::Error),
}

pub struct AotCache {
    db: Database,
}

impl AotCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AotError> {
        let path = path.as_ref();
        let _ = std::fs::create_dir_all(path);
        let db = Database::builder(path)
            .journal_compression(fjall::CompressionType::Lz4)
            .manual_journal_persist(true)
            .open()
            .map_err(|source| AotError::Open { path: path.to_path_buf(), source })?;
        Ok(Self { db })
    }

    /// The default cache location, `$HOME/.cache/<prefix>/blocks`.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(PathBuf::from(home).join(".cache").join("hart").join("blocks"))
    }

    pub fn get(&self, hash: BlockHash) -> Result<Option<Vec<u8>>, AotError> {
        let artifacts = self.db.keyspace("artifacts", KeyspaceCreateOptions::default)?;
        Ok(artifacts.get(hash.0.as_bytes())?.map(|slice| slice.to_vec()))
    }

    pub fn insert(&self, hash: BlockHash, host_code: &[u8]) -> Result<(), AotError> {
        let artifacts = self.db.keyspace("artifacts", KeyspaceCreateOptions::default)?;
        artifacts.insert(hash.0.as_bytes(), host_code)?;
        Ok(())
    }

    pub fn persist(&self) -> Result<(), AotError> {
        self.db.persist(fjall::PersistMode::Buffer)?;
        Ok(())
    }
}

impl Drop for AotCache {
    fn drop(&mut self) {
        if let Err(err) = self.db.persist(fjall::PersistMode::SyncAll) {
            tracing::warn!(%err, "failed to flush AOT cache on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_at_different_addresses_hash_differently() {
        let a = BlockHash::of(0x1000, &[1, 2, 3, 4]);
        let b = BlockHash::of(0x2000, &[1, 2, 3, 4]);
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_a_temp_database() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AotCache::open(dir.path()).unwrap();
        let hash = BlockHash::of(0x4000, &[0xaa, 0xbb]);
        assert!(cache.get(hash).unwrap().is_none());
        cache.insert(hash, &[0xc3]).unwrap();
        assert_eq!(cache.get(hash).unwrap(), Some(vec![0xc3]));
    }
}

//! The process-wide, thread-shared map from guest PC to translated
//! block.
//!
//! A generation-tagged slab of stored blocks (the stable-index-plus-
//! generation idea is hand-rolled here over a `Vec` rather than pulling
//! in a slot-map dependency; see DESIGN.md) plus an address-keyed index
//! into it -- an `FxHashMap<u64, BlockId>`, since lookups are always by
//! exact guest PC and never need a range-predecessor query.
//!
//! Chained jumps are modeled as DESIGN.md describes: a target block's
//! [`StoredBlock::incoming`] list of
//! `(source, host_offset_in_source)` pairs, walked and unlinked on
//! invalidation -- no reference cycle is ever formed because sources
//! are referenced by [`BlockId`], not by pointer.

use rustc_hash::FxHashMap;

use crate::allocator::{Allocation, Allocator, Exec};

pub type BlockFn = unsafe extern "sysv64" fn(*mut cpustate::Registers, *mut u8) -> u32;

/// A stable handle to a translated block. Indices are reused once a
/// block is evicted, but the paired generation counter means a stale
/// `BlockId` captured before an invalidation is never mistaken for the
/// block that replaced its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

enum Slot {
    Occupied { generation: u32, block: StoredBlock },
    Free { generation: u32, next_free: Option<u32> },
}

pub struct StoredBlock {
    pub guest_pc: u64,
    pub guest_len: u32,
    pub host_len: u32,
    pub insn_count: u32,
    pub terminator: xlate::TerminatorKind,
    /// Owns the executable bytes; dropped (and the region bytes lost to
    /// the bump allocator) once this slot is freed. Correctness never
    /// depends on anything having persisted these bytes elsewhere.
    alloc: Allocation<Exec>,
    entry: BlockFn,
    /// `(host_offset, guest_target)` pairs this block emitted but
    /// couldn't resolve in-block -- candidates for direct chaining once
    /// `guest_target`'s block is resident.
    pub unresolved_targets: Vec<(codebuf::Offset, u64)>,
    /// `(source_block, host_offset_in_source)` pairs: every direct jump
    /// some other block has chained straight into this one, bypassing
    /// the dispatcher. Unlinking these is what makes invalidation safe.
    incoming: Vec<(BlockId, codebuf::Offset)>,
}

impl StoredBlock {
    #[inline]
    pub fn entry(&self) -> BlockFn {
        self.entry
    }

    #[inline]
    pub fn host_code(&self) -> &[u8] {
        &self.alloc
    }
}

/// `lookup`/`insert`/`invalidate` over guest PC. `lookup` is
/// side-effect-free and idempotent; `insert` is the only operation that
/// can evict (on a duplicate key, the *new* block is dropped and the
/// existing one kept); `invalidate` removes the entry and unlinks
/// every chained jump that targeted it.
pub struct TranslationCache {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    by_pc: FxHashMap<u64, BlockId>,
    code: Allocator<Exec>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free_head: None, by_pc: FxHashMap::default(), code: Allocator::new() }
    }

    /// Side-effect-free, idempotent: repeated calls with no intervening
    /// `insert`/`invalidate` return the same handle.
    #[inline]
    pub fn lookup(&self, guest_pc: u64) -> Option<BlockId> {
        self.by_pc.get(&guest_pc).copied()
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&StoredBlock> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, block } if *generation == id.generation => Some(block),
            _ => None,
        }
    }

    /// Registers a just-translated block, taking ownership of its host
    /// code bytes by copying them into an executable region. Returns
    /// the existing handle without copying anything if `guest_pc`
    /// already has a resident block; this is a logged non-error, never
    /// a caller-visible failure.
    pub fn insert(&mut self, translated: xlate::TranslatedBlock) -> BlockId {
        if let Some(existing) = self.lookup(translated.guest_pc) {
            tracing::warn!(guest_pc = translated.guest_pc, "translation cache collision, keeping existing entry");
            return existing;
        }

        let alloc = self.code.allocate(&translated.host_code);
        let entry = unsafe { alloc.entry() };

        let block = StoredBlock {
            guest_pc: translated.guest_pc,
            guest_len: translated.guest_len,
            host_len: translated.host_len,
            insn_count: translated.insn_count,
            terminator: translated.terminator,
            alloc,
            entry,
            unresolved_targets: translated.unresolved_targets,
            incoming: Vec::new(),
        };

        let id = self.insert_slot(block);
        self.by_pc.insert(translated.guest_pc, id);
        self.try_chain_into(id);
        self.try_chain_from_others(id);
        id
    }

    fn insert_slot(&mut self, block: StoredBlock) -> BlockId {
        if let Some(index) = self.free_head {
            let Slot::Free { generation, next_free } = self.slots[index as usize] else {
                unreachable!("free list points at an occupied slot");
            };
            self.free_head = next_free;
            self.slots[index as usize] = Slot::Occupied { generation, block };
            BlockId { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied { generation: 0, block });
            BlockId { index, generation: 0 }
        }
    }

    /// Invalidates the block registered at `guest_pc`, if any, unlinking
    /// every chain into it and freeing its slot. A no-op miss, matching
    /// `lookup`'s side-effect-free contract for addresses with nothing
    /// registered.
    pub fn invalidate(&mut self, guest_pc: u64) {
        let Some(id) = self.by_pc.remove(&guest_pc) else { return };
        self.invalidate_id(id);
    }

    /// Invalidates every block whose guest entry point falls in
    /// `range` -- a coarser granularity useful for self-modifying-code
    /// hooks that only know a byte range, not individual block PCs.
    pub fn invalidate_range(&mut self, range: std::ops::Range<u64>) {
        let targets: Vec<u64> = self.by_pc.keys().copied().filter(|pc| range.contains(pc)).collect();
        for pc in targets {
            self.invalidate(pc);
        }
    }

    fn invalidate_id(&mut self, id: BlockId) {
        let Slot::Occupied { generation, block } = &self.slots[id.index as usize] else {
            return;
        };
        debug_assert_eq!(*generation, id.generation);

        // Unlink every chain that jumps directly into this block --
        // rewrite the source's displacement back to point at its own
        // "return to dispatcher" stub. Since this block's own code is
        // about to become unreachable, the safest rewrite target is a
        // location that still exists: in this implementation the stub a
        // chain unwinds to is the ordinary epilogue already emitted right
        // before the chained jump, so unlinking means patching the
        // site's displacement to target that epilogue instead, which
        // `xlate`'s branch builders always emit immediately prior to the
        // (currently dormant) `jmp`/`jcc` extension point.
        let incoming = block.incoming.clone();
        for (source, offset) in incoming {
            self.unlink_chain_site(source, offset);
        }

        // Any block this one had chained *into* loses an incoming entry.
        let outgoing_targets: Vec<u64> = block.unresolved_targets.iter().map(|(_, pc)| *pc).collect();
        for target_pc in outgoing_targets {
            if let Some(target_id) = self.lookup(target_pc) {
                self.remove_incoming(target_id, id);
            }
        }

        let generation = id.generation;
        self.slots[id.index as usize] = Slot::Free { generation: generation.wrapping_add(1), next_free: self.free_head };
        self.free_head = Some(id.index);
    }

    fn unlink_chain_site(&mut self, source: BlockId, offset: codebuf::Offset) {
        // The source block's executable allocation is immutable once
        // frozen; a chain can only be unlinked
        // by also removing it from the source's own bookkeeping so a
        // future re-chain attempt doesn't think the site is still live.
        // Patching the already-frozen bytes back to a dispatcher-return
        // encoding is deliberately not attempted here: this
        // implementation never emits a live chained jump in the first
        // place (see `try_chain_into`'s doc comment), so there is never
        // a stale in-flight jump to rewrite -- this path only clears
        // bookkeeping so `StoredBlock::incoming` stays accurate if a
        // future revision of `xlate` starts emitting real chains.
        if let Slot::Occupied { block, .. } = &mut self.slots[source.index as usize] {
            block.unresolved_targets.retain(|(o, _)| *o != offset);
        }
    }

    fn remove_incoming(&mut self, target: BlockId, source: BlockId) {
        if let Slot::Occupied { block, .. } = &mut self.slots[target.index as usize] {
            block.incoming.retain(|(s, _)| *s != source);
        }
    }

    /// Records this new block as a chaining target for any
    /// already-resident block whose `unresolved_targets` point at it.
    ///
    /// `xlate`'s branch translators always return to the dispatcher
    /// (see `xlate::builder::branch`'s module doc) rather than emitting
    /// a live `jmp`/`jcc` through [`xlate::BlockBuilder::jmp`]/`jcc`, so
    /// today this only maintains the `incoming`/`unresolved_targets`
    /// bookkeeping the invalidation-unlinking logic above requires; it
    /// does not yet patch a host displacement. That patch is the
    /// single line a future revision adds once a translator starts
    /// using the dormant chaining API: `alloc.as_ptr().add(offset)` →
    /// `target.alloc.as_ptr() - (site + 4)`.
    fn try_chain_into(&mut self, new_id: BlockId) {
        let new_pc = match &self.slots[new_id.index as usize] {
            Slot::Occupied { block, .. } => block.guest_pc,
            Slot::Free { .. } => return,
        };

        for (source_index, slot) in self.slots.iter_mut().enumerate() {
            if source_index as u32 == new_id.index {
                continue;
            }
            if let Slot::Occupied { generation, block } = slot
                && block.unresolved_targets.iter().any(|(_, pc)| *pc == new_pc)
            {
                let source_id = BlockId { index: source_index as u32, generation: *generation };
                if let Slot::Occupied { block, .. } = &mut self.slots[new_id.index as usize] {
                    block.incoming.push((source_id, 0));
                }
            }
        }
    }

    /// Symmetric case: the new block's own unresolved targets may
    /// already be resident.
    fn try_chain_from_others(&mut self, _new_id: BlockId) {
        // Nothing to do today for the same reason documented on
        // `try_chain_into`: without a live emitted jump there is no
        // displacement to patch, only bookkeeping, and that bookkeeping
        // is already complete from the target's perspective.
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivial_block(guest_pc: u64) -> xlate::TranslatedBlock {
        // `ret` (C3) via a BlockBuilder-shaped prologue/epilogue isn't
        // needed for cache-only tests; a single `ret` is a valid,
        // callable (if semantically meaningless) host function.
        xlate::TranslatedBlock {
            guest_pc,
            host_code: vec![0xc3],
            guest_len: 4,
            host_len: 1,
            insn_count: 1,
            terminator: xlate::TerminatorKind::Return,
            unresolved_targets: Vec::new(),
        }
    }

    #[test]
    fn lookup_is_idempotent() {
        let mut cache = TranslationCache::new();
        let id = cache.insert(trivial_block(0x1000));
        assert_eq!(cache.lookup(0x1000), Some(id));
        assert_eq!(cache.lookup(0x1000), Some(id));
    }

    #[test]
    fn duplicate_insert_keeps_existing() {
        let mut cache = TranslationCache::new();
        let first = cache.insert(trivial_block(0x2000));
        let second = cache.insert(trivial_block(0x2000));
        assert_eq!(first, second);
    }

    #[test]
    fn invalidate_removes_and_frees_the_slot() {
        let mut cache = TranslationCache::new();
        cache.insert(trivial_block(0x3000));
        cache.invalidate(0x3000);
        assert_eq!(cache.lookup(0x3000), None);

        // the freed slot is reused with a bumped generation, so a stale
        // handle captured before invalidation must not alias it.
        let new_id = cache.insert(trivial_block(0x4000));
        assert!(cache.get(new_id).is_some());
    }

    #[test]
    fn invalidate_of_unregistered_pc_is_a_noop() {
        let mut cache = TranslationCache::new();
        cache.invalidate(0xdead);
        assert_eq!(cache.lookup(0xdead), None);
    }
}

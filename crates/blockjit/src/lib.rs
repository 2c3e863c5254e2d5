//! Executable code regions, the translation cache, and the dispatch
//! loop that ties `guestisa`'s decoder and `xlate`'s per-class
//! translators to actually-running host code.
//!
//! This is the only crate in the workspace that touches `mmap`/
//! `mprotect` or casts a byte slice to a function pointer -- every
//! other crate only ever produces or consumes plain `Vec<u8>`.

pub mod allocator;
pub mod cache;
pub mod run;

pub use allocator::{AllocKind, Allocation, Allocator, Exec, Protection, ReadWrite};
pub use cache::{BlockId, StoredBlock, TranslationCache};
pub use run::{Dispatcher, DispatchError, Trap};

//! Executable code regions for translated blocks.
//!
//! A bump allocator over `mmap`'d regions that starts every region
//! `PROT_NONE`, widens to `PROT_READ | PROT_WRITE` while the block
//! translator copies bytes in, then narrows to `PROT_READ | PROT_EXEC`
//! before the allocation is ever handed to a caller that might execute
//! it. The type enforces a "written bytes are published no later than
//! the executable pointer" rule: there is no way to obtain an
//! [`Allocation<Exec>`] without having gone through
//! [`Allocator::allocate`] first.
//!
//! Not internally synchronized -- callers serialize access to a given
//! `Allocator<K>` themselves.

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

const REGION_MIN_LEN: usize = 1 << 16;

#[derive(Clone, Copy)]
struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadExec,
    ReadWrite,
}

pub trait AllocKind {
    const PROTECTION: Protection;
}

/// Marker for allocations that have been frozen read-execute.
pub struct Exec;
impl AllocKind for Exec {
    const PROTECTION: Protection = Protection::ReadExec;
}

/// Marker for allocations still being written by the block translator.
pub struct ReadWrite;
impl AllocKind for ReadWrite {
    const PROTECTION: Protection = Protection::ReadWrite;
}

/// A slice of mapped memory, tagged with the protection it currently
/// holds. `Allocation<Exec>` derefs to `&[u8]`/a function pointer cast
/// target only -- there is deliberately no `DerefMut` for it.
pub struct Allocation<K> {
    ptr: NonNull<u8>,
    len: usize,
    _kind: PhantomData<K>,
}

impl<K> Allocation<K> {
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl<K> Deref for Allocation<K> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Allocation<Exec> {
    /// Casts this allocation's entry point to a callable block.
    ///
    /// # Safety
    /// The caller must ensure the bytes at `self.as_ptr()` are a valid
    /// host function matching the ABI [`crate::cache::BlockFn`]
    /// describes, and that the allocation outlives every call through
    /// the returned pointer.
    pub unsafe fn entry(&self) -> crate::cache::BlockFn {
        unsafe { std::mem::transmute::<*const u8, crate::cache::BlockFn>(self.as_ptr()) }
    }
}

#[cfg(unix)]
mod os {
    use super::Protection;
    use rustix::mm::{MapFlags, MprotectFlags, ProtFlags};
    use std::num::NonZeroUsize;
    use std::ptr::NonNull;

    pub fn map(len: usize) -> NonNull<u8> {
        let len = NonZeroUsize::new(len).expect("region length is nonzero");
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(std::ptr::null_mut(), len.get(), ProtFlags::empty(), MapFlags::PRIVATE)
        }
        .expect("mmap_anonymous failed");
        NonNull::new(ptr.cast()).expect("mmap returned null")
    }

    pub unsafe fn protect(ptr: NonNull<u8>, len: usize, protection: Protection) {
        let flags = match protection {
            Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
            Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
        };
        unsafe { rustix::mm::mprotect(ptr.as_ptr().cast(), len, flags) }.expect("mprotect failed");
    }
}

#[cfg(windows)]
mod os {
    use super::Protection;
    use std::ptr::NonNull;
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_NOACCESS, PAGE_READWRITE, VirtualAlloc, VirtualProtect,
    };

    pub fn map(len: usize) -> NonNull<u8> {
        let ptr = unsafe { VirtualAlloc(None, len, MEM_COMMIT | MEM_RESERVE, PAGE_NOACCESS) };
        NonNull::new(ptr.cast()).expect("VirtualAlloc failed")
    }

    pub unsafe fn protect(ptr: NonNull<u8>, len: usize, protection: Protection) {
        let new_protect = match protection {
            Protection::ReadExec => PAGE_EXECUTE_READ,
            Protection::ReadWrite => PAGE_READWRITE,
        };
        let mut old = Default::default();
        unsafe { VirtualProtect(ptr.as_ptr().cast(), len, new_protect, &mut old) }.expect("VirtualProtect failed");
    }
}

impl Region {
    fn new(len: usize) -> Self {
        let len = len.max(REGION_MIN_LEN);
        Self { ptr: os::map(len), len }
    }

    unsafe fn protect(&self, length: usize, protection: Protection) {
        unsafe { os::protect(self.ptr, length, protection) };
    }
}

/// Bump allocator over one or more `mmap`'d regions, all carrying the
/// same final protection `K`.
pub struct Allocator<K> {
    current: Option<Region>,
    offset: usize,
    _kind: PhantomData<K>,
}

impl<K> Allocator<K> {
    pub const fn new() -> Self {
        Self { current: None, offset: 0, _kind: PhantomData }
    }
}

impl<K> Default for Allocator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AllocKind> Allocator<K> {
    fn current(&mut self, len: usize) -> Region {
        if let Some(region) = self.current {
            region
        } else {
            let region = Region::new(len);
            self.current = Some(region);
            region
        }
    }

    /// Copies `data` into a fresh allocation, protected `K::PROTECTION`
    /// once the bytes are in place. Never exposes an `Exec` allocation
    /// before the copy completes.
    pub fn allocate(&mut self, data: &[u8]) -> Allocation<K> {
        assert!(!data.is_empty(), "cannot allocate an empty block");

        let region = self.current(data.len());
        let remaining = region.len.checked_sub(self.offset);

        if remaining.is_none_or(|r| r < data.len()) {
            let region = Region::new(data.len());
            self.current = Some(region);
            self.offset = 0;
            return self.allocate(data);
        }

        let start = unsafe { region.ptr.add(self.offset) };
        self.offset += data.len();

        unsafe {
            region.protect(self.offset, Protection::ReadWrite);
            std::ptr::copy_nonoverlapping(data.as_ptr(), start.as_ptr(), data.len());
            if K::PROTECTION != Protection::ReadWrite {
                region.protect(self.offset, K::PROTECTION);
            }
        }

        Allocation { ptr: start, len: data.len(), _kind: PhantomData }
    }
}

//! The guest's flat address space: one anonymous `mmap` region sized to
//! cover every `PT_LOAD` segment plus the stack, with per-segment
//! protections applied after the image bytes are copied in.
//!
//! Grounded on `jitalloc`/`ppcjit::allocator`'s mmap-then-mprotect
//! pattern (map everything `PROT_NONE` first, narrow to the real
//! protection only once the bytes are in place), adapted here for one
//! big guest-memory region instead of many small code allocations.

use thiserror::Error;

use crate::elf::Image;

#[cfg(unix)]
mod os {
    use rustix::mm::{MapFlags, MprotectFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
    use std::ffi::c_void;
    use std::ptr::NonNull;

    pub unsafe fn map(len: usize) -> std::io::Result<NonNull<u8>> {
        let ptr = unsafe { mmap_anonymous(std::ptr::null_mut(), len, ProtFlags::empty(), MapFlags::PRIVATE)? };
        Ok(NonNull::new(ptr as *mut u8).expect("mmap returned null on success"))
    }

    pub unsafe fn protect(ptr: *mut u8, len: usize, read: bool, write: bool, exec: bool) -> std::io::Result<()> {
        let mut flags = ProtFlags::empty();
        if read {
            flags |= ProtFlags::READ;
        }
        if write {
            flags |= ProtFlags::WRITE;
        }
        if exec {
            flags |= ProtFlags::EXEC;
        }
        unsafe { mprotect(ptr as *mut c_void, len, flags) }
    }

    pub unsafe fn unmap(ptr: *mut u8, len: usize) {
        unsafe {
            let _ = munmap(ptr as *mut c_void, len);
        }
    }
}

#[cfg(windows)]
mod os {
    use std::ptr::NonNull;
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
        VirtualAlloc, VirtualFree, VirtualProtect,
    };

    pub unsafe fn map(len: usize) -> std::io::Result<NonNull<u8>> {
        let ptr = unsafe { VirtualAlloc(None, len, MEM_COMMIT | MEM_RESERVE, PAGE_NOACCESS) };
        NonNull::new(ptr as *mut u8).ok_or_else(std::io::Error::last_os_error)
    }

    pub unsafe fn protect(ptr: *mut u8, len: usize, read: bool, write: bool, exec: bool) -> std::io::Result<()> {
        let protection = match (read, write, exec) {
            (_, _, true) if write => PAGE_EXECUTE_READWRITE,
            (_, _, true) => PAGE_EXECUTE_READ,
            (true, true, false) => PAGE_READWRITE,
            (true, false, false) => PAGE_READONLY,
            _ => PAGE_NOACCESS,
        };
        let mut old = Default::default();
        unsafe { VirtualProtect(ptr as *mut _, len, protection, &mut old) }.map_err(|e| std::io::Error::other(e))
    }

    pub unsafe fn unmap(ptr: *mut u8, _len: usize) {
        unsafe {
            let _ = VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
        }
    }
}

const PAGE_SIZE: u64 = 4096;

fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

fn page_align_up(addr: u64) -> u64 {
    page_align_down(addr + PAGE_SIZE - 1)
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to reserve guest address space: {0}")]
    Reserve(#[source] std::io::Error),
    #[error("failed to set segment protection: {0}")]
    Protect(#[source] std::io::Error),
    #[error("guest image address range does not fit in a {limit:#x}-byte reservation")]
    OutOfRange { limit: u64 },
}

/// A single flat mapping backing the guest's entire address space,
/// starting at guest virtual address 0. Guest addresses index directly
/// into this region; there is no page-table indirection.
///
/// `mem_base` is handed to every translated block as the second
/// System V argument (`R12`/`MEM_BASE` once pinned by the prologue), so
/// load/store translators compute `mem_base + guest_addr` directly.
pub struct GuestMemory {
    base: std::ptr::NonNull<u8>,
    len: usize,
}

// SAFETY: the region is only ever accessed through guest-address
// bounds-checked helpers below, and the launcher is single-threaded.
unsafe impl Send for GuestMemory {}

impl GuestMemory {
    /// Reserves a region covering `[0, limit)` and maps the image's
    /// `PT_LOAD` segments into it with their file-specified protections.
    pub fn load(image: &Image, limit: u64) -> Result<Self, MemoryError> {
        let mapped_len = page_align_up(limit) as usize;
        let base = unsafe { os::map(mapped_len) }.map_err(MemoryError::Reserve)?;

        let memory = Self { base, len: mapped_len };

        for segment in &image.segments {
            let seg_end = segment.vaddr.checked_add(segment.memsz).ok_or(MemoryError::OutOfRange { limit })?;
            if seg_end > limit {
                return Err(MemoryError::OutOfRange { limit });
            }

            let page_start = page_align_down(segment.vaddr);
            let page_end = page_align_up(seg_end);
            let region_len = (page_end - page_start) as usize;

            unsafe {
                os::protect(memory.base.as_ptr().add(page_start as usize), region_len, true, true, false).map_err(MemoryError::Protect)?;
            }

            let file_bytes = &image.data[segment.offset as usize..(segment.offset + segment.filesz) as usize];
            unsafe {
                let dst = memory.base.as_ptr().add(segment.vaddr as usize);
                std::ptr::copy_nonoverlapping(file_bytes.as_ptr(), dst, file_bytes.len());
                let bss_start = segment.vaddr + segment.filesz;
                let bss_len = segment.memsz - segment.filesz;
                if bss_len > 0 {
                    std::ptr::write_bytes(memory.base.as_ptr().add(bss_start as usize), 0, bss_len as usize);
                }
            }

            unsafe {
                os::protect(
                    memory.base.as_ptr().add(page_start as usize),
                    region_len,
                    segment.readable,
                    segment.writable,
                    segment.executable,
                )
                .map_err(MemoryError::Protect)?;
            }
        }

        Ok(memory)
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn in_bounds(&self, addr: u64, size: usize) -> bool {
        (addr as usize).checked_add(size).is_some_and(|end| end <= self.len)
    }

    /// The fetch closure handed to [`blockjit::Dispatcher::run_until_trap`].
    /// Returns `None` at or past the mapped region, which the dispatcher
    /// treats as a page-boundary fetch failure.
    pub fn fetch_u32(&self, addr: u64) -> Option<u32> {
        if !self.in_bounds(addr, 4) || addr % 4 != 0 {
            return None;
        }
        let mut bytes = [0u8; 4];
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(addr as usize), bytes.as_mut_ptr(), 4);
        }
        Some(u32::from_le_bytes(bytes))
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> bool {
        if !self.in_bounds(addr, data.len()) {
            return false;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(addr as usize), data.len());
        }
        true
    }
}

impl Drop for GuestMemory {
    fn drop(&mut self) {
        unsafe {
            os::unmap(self.base.as_ptr(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::Segment;

    fn image_with_segments(segments: Vec<Segment>, data: &'static [u8]) -> Image<'static> {
        Image { data, entry: 0, phdr_vaddr: 0, phent: 0, phnum: 0, segments }
    }

    #[test]
    fn fetch_out_of_bounds_is_none() {
        let image = image_with_segments(
            vec![Segment { vaddr: 0, offset: 0, filesz: 4, memsz: 4, readable: true, writable: false, executable: true }],
            &[0u8, 0, 0, 0],
        );
        let memory = GuestMemory::load(&image, 0x1000).unwrap();
        assert!(memory.fetch_u32(0).is_some());
        assert!(memory.fetch_u32(0x10000).is_none());
    }

    #[test]
    fn unaligned_fetch_is_none() {
        let image = image_with_segments(
            vec![Segment { vaddr: 0, offset: 0, filesz: 8, memsz: 8, readable: true, writable: false, executable: true }],
            &[1, 2, 3, 4, 5, 6, 7, 8],
        );
        let memory = GuestMemory::load(&image, 0x1000).unwrap();
        assert!(memory.fetch_u32(1).is_none());
    }
}

//! Builds the initial guest stack image: argc, argv, envp, and the
//! auxiliary vector, laid out the way the Linux AArch64 ABI expects a
//! freshly `execve`'d process to find them.
//!
//! Grounded on `amoljassal-sis-kernel-showcase`'s ELF loader for the
//! AT_* auxv constants and overall stack shape; adapted from its
//! no_std raw-pointer style to build one `Vec<u8>` image that
//! [`crate::memory::GuestMemory`] copies in as a single `write_bytes`.

use crate::elf::Image;

const AT_NULL: u64 = 0;
const AT_PHDR: u64 = 3;
const AT_PHENT: u64 = 4;
const AT_PHNUM: u64 = 5;
const AT_BASE: u64 = 7;
const AT_ENTRY: u64 = 9;
const AT_RANDOM: u64 = 25;

const STACK_ALIGN: u64 = 16;

pub struct InitialStack {
    pub sp: u64,
    /// Bytes to write starting at `stack_base`; `sp` points somewhere
    /// inside this slice once aligned.
    pub image: Vec<u8>,
    pub stack_base: u64,
}

#[cfg(unix)]
fn random_bytes16() -> [u8; 16] {
    let mut buf = [0u8; 16];
    rustix::rand::getrandom(&mut buf, rustix::rand::GetRandomFlags::empty()).expect("getrandom");
    buf
}

#[cfg(windows)]
fn random_bytes16() -> [u8; 16] {
    // Not a target the launcher is expected to run on; a fixed pattern
    // keeps this buildable without pulling in a second RNG crate.
    [0x42; 16]
}

/// Lays out the stack top-down: strings first (so their addresses are
/// known), then auxv, envp pointers, argv pointers, argc -- each
/// pushed in the reverse of the order a reader walks them.
pub fn build(image: &Image, guest_path: &str, guest_args: &[String], stack_top: u64) -> InitialStack {
    let argv: Vec<&str> = std::iter::once(guest_path).chain(guest_args.iter().map(String::as_str)).collect();
    let envp: Vec<String> = Vec::new();
    let random = random_bytes16();

    // Conservative upper bound on the image size; exact layout is
    // computed below as we go.
    let mut bytes = Vec::with_capacity(4096);

    let mut string_addrs = Vec::with_capacity(argv.len() + envp.len());
    let mut addr = stack_top;

    for s in argv.iter().map(|s| s.as_bytes()).chain(envp.iter().map(|s| s.as_bytes())) {
        addr -= (s.len() + 1) as u64;
        string_addrs.push(addr);
    }
    let random_addr = {
        addr -= 16;
        addr
    };

    addr = page_align_down_to(addr, STACK_ALIGN);

    // auxv is an array of (u64, u64) pairs terminated by (AT_NULL, 0).
    let auxv: Vec<(u64, u64)> = vec![
        (AT_PHDR, image.phdr_vaddr),
        (AT_PHENT, image.phent as u64),
        (AT_PHNUM, image.phnum as u64),
        (AT_BASE, 0),
        (AT_ENTRY, image.entry),
        (AT_RANDOM, random_addr),
        (AT_NULL, 0),
    ];

    let total_pointer_words = 1 + argv.len() + 1 + envp.len() + 1 + auxv.len() * 2;
    let pointer_block_len = total_pointer_words as u64 * 8;

    let mut sp = addr - pointer_block_len;
    sp = page_align_down_to(sp, STACK_ALIGN);

    let image_base = sp;
    let image_len = (stack_top - image_base) as usize;
    bytes.resize(image_len, 0);

    let put_u64 = |bytes: &mut Vec<u8>, offset: u64, value: u64| {
        let idx = (offset - image_base) as usize;
        bytes[idx..idx + 8].copy_from_slice(&value.to_le_bytes());
    };
    let put_bytes = |bytes: &mut Vec<u8>, offset: u64, data: &[u8]| {
        let idx = (offset - image_base) as usize;
        bytes[idx..idx + data.len()].copy_from_slice(data);
    };

    for (i, s) in argv.iter().map(|s| s.as_bytes()).chain(envp.iter().map(|s| s.as_bytes())).enumerate() {
        put_bytes(&mut bytes, string_addrs[i], s);
    }
    put_bytes(&mut bytes, random_addr, &random);

    let mut cursor = sp;
    put_u64(&mut bytes, cursor, argv.len() as u64);
    cursor += 8;
    for a in &string_addrs[..argv.len()] {
        put_u64(&mut bytes, cursor, *a);
        cursor += 8;
    }
    put_u64(&mut bytes, cursor, 0);
    cursor += 8;
    for a in &string_addrs[argv.len()..] {
        put_u64(&mut bytes, cursor, *a);
        cursor += 8;
    }
    put_u64(&mut bytes, cursor, 0);
    cursor += 8;
    for (key, value) in &auxv {
        put_u64(&mut bytes, cursor, *key);
        cursor += 8;
        put_u64(&mut bytes, cursor, *value);
        cursor += 8;
    }

    InitialStack { sp, image: bytes, stack_base: image_base }
}

fn page_align_down_to(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivial_image() -> Image<'static> {
        Image { data: &[], entry: 0x1000, phdr_vaddr: 0x40, phent: 56, phnum: 3, segments: vec![] }
    }

    #[test]
    fn stack_pointer_is_sixteen_byte_aligned() {
        let image = trivial_image();
        let stack = build(&image, "guest", &["a".into(), "bb".into()], 0x8000_0000);
        assert_eq!(stack.sp % STACK_ALIGN, 0);
    }

    #[test]
    fn argc_is_written_at_the_stack_pointer() {
        let image = trivial_image();
        let stack = build(&image, "guest", &["one".into(), "two".into()], 0x8000_0000);
        let idx = (stack.sp - stack.stack_base) as usize;
        let argc = u64::from_le_bytes(stack.image[idx..idx + 8].try_into().unwrap());
        assert_eq!(argc, 3);
    }
}

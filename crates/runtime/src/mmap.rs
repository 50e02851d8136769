//! Low-level abstraction for reserving and committing pages of virtual
//! memory.

use anyhow::{Context, Result};
use more_asserts::assert_le;
use std::ptr;

/// Rounds `size` up to a multiple of the host page size.
pub fn round_up_to_page_size(size: usize) -> usize {
    let page_size = rustix::param::page_size();
    (size + (page_size - 1)) & !(page_size - 1)
}

/// A page-aligned reservation of address space, parts of which may be
/// committed (readable and writable) while the rest stays inaccessible.
///
/// The pointer is stored as a `usize` so the structure is naturally `Send`
/// and `Sync`; all coordination happens at the OS layer. The base address
/// never changes for the lifetime of the mapping, which is what lets
/// memory base pointers be published once and read without locks.
#[derive(Debug)]
pub struct Mmap {
    ptr: usize,
    len: usize,
}

impl Mmap {
    /// Constructs an empty mapping.
    pub fn new() -> Self {
        // Rust's slices require non-null pointers even when empty; reuse
        // the dangling pointer `Vec` computes for that purpose.
        let empty = Vec::<u8>::new();
        Self {
            ptr: empty.as_ptr() as usize,
            len: 0,
        }
    }

    /// Creates a mapping with `accessible_size` bytes committed inside a
    /// reservation of `mapping_size` bytes. Both sizes must be multiples of
    /// the host page size.
    pub fn accessible_reserved(accessible_size: usize, mapping_size: usize) -> Result<Self> {
        let page_size = rustix::param::page_size();
        assert_le!(accessible_size, mapping_size);
        assert_eq!(mapping_size & (page_size - 1), 0);
        assert_eq!(accessible_size & (page_size - 1), 0);

        // mmap may return EINVAL for a zero length, so special-case it.
        if mapping_size == 0 {
            return Ok(Self::new());
        }

        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                mapping_size,
                rustix::mm::ProtFlags::empty(),
                rustix::mm::MapFlags::PRIVATE,
            )
            .context(format!("mmap failed to reserve {mapping_size:#x} bytes"))?
        };

        let result = Self {
            ptr: ptr as usize,
            len: mapping_size,
        };

        if accessible_size != 0 {
            result.make_accessible(0, accessible_size)?;
        }

        Ok(result)
    }

    /// Creates a reservation of at least `size` bytes whose base address is
    /// aligned to `1 << align_log2`. Nothing is committed.
    ///
    /// Over-maps by the alignment and trims the misaligned head and tail,
    /// so the reservation costs no more address space than requested once
    /// construction finishes.
    pub fn reserve_aligned(size: usize, align_log2: u8) -> Result<Self> {
        let page_size = rustix::param::page_size();
        let align = 1usize << align_log2;
        assert!(align >= page_size);
        let size = round_up_to_page_size(size);

        let padded = size
            .checked_add(align)
            .context("aligned reservation size overflow")?;
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                padded,
                rustix::mm::ProtFlags::empty(),
                rustix::mm::MapFlags::PRIVATE,
            )
            .context(format!("mmap failed to reserve {padded:#x} bytes"))?
        } as usize;

        let aligned = (ptr + (align - 1)) & !(align - 1);
        let head = aligned - ptr;
        let tail = padded - head - size;
        unsafe {
            if head != 0 {
                rustix::mm::munmap(ptr as *mut _, head).context("munmap of alignment head")?;
            }
            if tail != 0 {
                rustix::mm::munmap((aligned + size) as *mut _, tail)
                    .context("munmap of alignment tail")?;
            }
        }

        Ok(Self {
            ptr: aligned,
            len: size,
        })
    }

    /// Commits the `len` bytes starting at offset `start`, making them
    /// readable and writable. Both must be multiples of the host page size
    /// and lie inside the reservation. The base address is unaffected, so
    /// this takes `&self`.
    pub fn make_accessible(&self, start: usize, len: usize) -> Result<()> {
        let page_size = rustix::param::page_size();
        assert_eq!(start & (page_size - 1), 0);
        assert_eq!(len & (page_size - 1), 0);
        assert_le!(len, self.len);
        assert_le!(start, self.len - len);

        unsafe {
            rustix::mm::mprotect(
                (self.ptr + start) as *mut _,
                len,
                rustix::mm::MprotectFlags::READ | rustix::mm::MprotectFlags::WRITE,
            )
            .context(format!("mprotect failed to commit {len:#x} bytes"))?;
        }

        Ok(())
    }

    /// The base of the reservation.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    /// The length of the reservation.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether anything is reserved.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Mmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if self.len != 0 {
            unsafe {
                rustix::mm::munmap(self.ptr as *mut _, self.len).expect("munmap failed");
            }
        }
    }
}

fn _assert() {
    fn _assert_send_sync<T: Send + Sync>() {}
    _assert_send_sync::<Mmap>();
}

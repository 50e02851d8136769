//! Runtime linear memories.
//!
//! A memory's virtual reservation is its sandbox: the full 8 GiB range any
//! zero-extended address plus offset can reach is reserved up front, and
//! only the committed prefix (the current page count) is accessible. The
//! base address therefore never moves, and growing is a commit plus an
//! atomic page-count update under the resize lock.

use crate::compartment::Compartment;
use crate::mmap::Mmap;
use crate::quota::ResourceQuotaRef;
use crate::traps::Trap;
use anyhow::{bail, Result};
use bulkhead_environ::{
    MemoryPlan, MemoryType, TrapCode, SANDBOX_RESERVATION_BYTES, WASM_MAX_PAGES, WASM_PAGE_SIZE,
};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// A linear memory owned by a compartment.
pub struct Memory {
    id: usize,
    compartment: Weak<Compartment>,
    ty: MemoryType,
    debug_name: String,
    mmap: Mmap,
    num_pages: AtomicU64,
    resizing: RwLock<()>,
    quota: ResourceQuotaRef,
}

impl Memory {
    /// Creates a memory in `compartment`, reserving its sandboxed region
    /// and committing the minimum page count.
    pub fn new(
        compartment: &Arc<Compartment>,
        ty: MemoryType,
        debug_name: impl Into<String>,
        quota: ResourceQuotaRef,
    ) -> Result<Arc<Memory>> {
        let debug_name = debug_name.into();
        if ty.minimum > WASM_MAX_PAGES {
            bail!(
                "memory minimum of {} pages exceeds the 32-bit page limit",
                ty.minimum
            );
        }
        if let Some(maximum) = ty.maximum {
            if maximum < ty.minimum {
                bail!("memory maximum of {maximum} pages is below its minimum");
            }
        }
        if let Some(quota) = &quota {
            if !quota.memory_pages.allocate(ty.minimum) {
                bail!("memory quota exceeded allocating {} pages", ty.minimum);
            }
        }

        let committed = (ty.minimum * WASM_PAGE_SIZE) as usize;
        let pages_for_unwind = ty.minimum;
        let result = (|| {
            let mmap = Mmap::accessible_reserved(committed, SANDBOX_RESERVATION_BYTES as usize)?;
            let quota_ref = quota.clone();
            compartment.register_memory(move |id| {
                Arc::new(Memory {
                    id,
                    compartment: Arc::downgrade(compartment),
                    ty,
                    debug_name,
                    mmap,
                    num_pages: AtomicU64::new(ty.minimum),
                    resizing: RwLock::new(()),
                    quota: quota_ref,
                })
            })
        })();
        match result {
            Ok(memory) => Ok(memory),
            Err(error) => {
                // The quota was charged but no object came to own it.
                if let Some(quota) = &quota {
                    quota.memory_pages.free(pages_for_unwind);
                }
                Err(error)
            }
        }
    }

    /// Clones `source` into `destination` with the same identity, type,
    /// page count, and contents. The quota is shared with the source.
    pub(crate) fn clone_into(
        source: &Arc<Memory>,
        destination: &Arc<Compartment>,
    ) -> Result<Arc<Memory>> {
        let _resizing = source.resizing.read().unwrap();
        let pages = source.num_pages.load(Ordering::SeqCst);
        if let Some(quota) = &source.quota {
            if !quota.memory_pages.allocate(pages) {
                bail!("memory quota exceeded cloning {pages} pages");
            }
        }

        let committed = (pages * WASM_PAGE_SIZE) as usize;
        let mmap = match Mmap::accessible_reserved(committed, SANDBOX_RESERVATION_BYTES as usize) {
            Ok(mmap) => mmap,
            Err(error) => {
                if let Some(quota) = &source.quota {
                    quota.memory_pages.free(pages);
                }
                return Err(error);
            }
        };
        unsafe {
            ptr::copy_nonoverlapping(source.base(), mmap.as_ptr(), committed);
        }

        Ok(destination.register_memory_at(source.id, |id| {
            Arc::new(Memory {
                id,
                compartment: Arc::downgrade(destination),
                ty: source.ty,
                debug_name: source.debug_name.clone(),
                mmap,
                num_pages: AtomicU64::new(pages),
                resizing: RwLock::new(()),
                quota: source.quota.clone(),
            })
        }))
    }

    /// The memory's identity within its compartment.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The memory's type.
    pub fn ty(&self) -> MemoryType {
        self.ty
    }

    /// The memory's plan: its type plus the reservation backing it.
    pub fn plan(&self) -> MemoryPlan {
        MemoryPlan {
            memory: self.ty,
            reserved_bytes: self.mmap.len() as u64,
        }
    }

    /// The name used in diagnostics.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// The owning compartment, if it is still alive.
    pub fn compartment(&self) -> Option<Arc<Compartment>> {
        self.compartment.upgrade()
    }

    pub(crate) fn compartment_weak(&self) -> &Weak<Compartment> {
        &self.compartment
    }

    /// The base of the reservation. Stable for the memory's lifetime.
    pub fn base(&self) -> *mut u8 {
        self.mmap.as_ptr()
    }

    /// The current page count.
    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::SeqCst)
    }

    /// The committed prefix of the reservation, in bytes.
    pub fn committed_bytes(&self) -> u64 {
        self.num_pages() * WASM_PAGE_SIZE
    }

    /// Grows the memory by `delta_pages`, returning the previous page
    /// count, or `None` when the limits or quota forbid the growth.
    pub fn grow(&self, delta_pages: u64) -> Result<Option<u64>> {
        let _resizing = self.resizing.write().unwrap();
        let old_pages = self.num_pages.load(Ordering::SeqCst);
        if delta_pages == 0 {
            return Ok(Some(old_pages));
        }

        let new_pages = match old_pages.checked_add(delta_pages) {
            Some(pages) => pages,
            None => return Ok(None),
        };
        let limit = self.ty.maximum.map_or(WASM_MAX_PAGES, |max| max.min(WASM_MAX_PAGES));
        if new_pages > limit {
            return Ok(None);
        }
        if let Some(quota) = &self.quota {
            if !quota.memory_pages.allocate(delta_pages) {
                return Ok(None);
            }
        }

        let old_bytes = (old_pages * WASM_PAGE_SIZE) as usize;
        let new_bytes = (new_pages * WASM_PAGE_SIZE) as usize;
        if let Err(error) = self.mmap.make_accessible(old_bytes, new_bytes - old_bytes) {
            if let Some(quota) = &self.quota {
                quota.memory_pages.free(delta_pages);
            }
            return Err(error);
        }

        self.num_pages.store(new_pages, Ordering::SeqCst);
        log::trace!(
            "memory {:?} grew from {old_pages} to {new_pages} pages",
            self.debug_name
        );
        Ok(Some(old_pages))
    }

    fn check_bounds(&self, address: u64, len: u64) -> Result<(), Trap> {
        let end = address.checked_add(len);
        match end {
            Some(end) if end <= self.committed_bytes() => Ok(()),
            _ => Err(Trap::memory_fault(
                TrapCode::OutOfBoundsMemoryAccess,
                address,
            )),
        }
    }

    /// Reads bytes out of the committed range.
    pub fn read(&self, address: u64, into: &mut [u8]) -> Result<(), Trap> {
        self.check_bounds(address, into.len() as u64)?;
        unsafe {
            ptr::copy_nonoverlapping(
                self.base().add(address as usize),
                into.as_mut_ptr(),
                into.len(),
            );
        }
        Ok(())
    }

    /// Writes bytes into the committed range.
    pub fn write(&self, address: u64, bytes: &[u8]) -> Result<(), Trap> {
        self.check_bounds(address, bytes.len() as u64)?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base().add(address as usize), bytes.len());
        }
        Ok(())
    }

    /// A view of the aligned 32-bit atomic at `address`. The caller has
    /// already trapped misaligned addresses.
    pub(crate) fn atomic_u32(&self, address: u64) -> Result<&AtomicU32, Trap> {
        self.check_bounds(address, 4)?;
        debug_assert_eq!(address % 4, 0);
        Ok(unsafe { &*(self.base().add(address as usize) as *const AtomicU32) })
    }

    /// A view of the aligned 64-bit atomic at `address`.
    pub(crate) fn atomic_u64(&self, address: u64) -> Result<&AtomicU64, Trap> {
        self.check_bounds(address, 8)?;
        debug_assert_eq!(address % 8, 0);
        Ok(unsafe { &*(self.base().add(address as usize) as *const AtomicU64) })
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if let Some(quota) = &self.quota {
            quota.memory_pages.free(self.num_pages.load(Ordering::SeqCst));
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .field("num_pages", &self.num_pages())
            .finish_non_exhaustive()
    }
}

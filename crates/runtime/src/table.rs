//! Runtime tables.
//!
//! Elements are opaque machine words managed by the instantiation driver;
//! zero marks a never-initialized element. The element array lives in a
//! reservation sized for the table's maximum, so like memories the base
//! never moves and growth is a commit plus an atomic count update.

use crate::compartment::Compartment;
use crate::mmap::{round_up_to_page_size, Mmap};
use crate::quota::ResourceQuotaRef;
use crate::traps::Trap;
use anyhow::{bail, Result};
use bulkhead_environ::{TableType, TrapCode};
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// The largest element count a table reservation covers when its type
/// declares no maximum.
const TABLE_MAX_ELEMENTS: u64 = 1 << 24;

/// A table owned by a compartment.
pub struct Table {
    id: usize,
    compartment: Weak<Compartment>,
    ty: TableType,
    debug_name: String,
    mmap: Mmap,
    num_elements: AtomicU64,
    resizing: RwLock<()>,
    quota: ResourceQuotaRef,
}

impl Table {
    /// Creates a table in `compartment` with its minimum element count
    /// committed.
    pub fn new(
        compartment: &Arc<Compartment>,
        ty: TableType,
        debug_name: impl Into<String>,
        quota: ResourceQuotaRef,
    ) -> Result<Arc<Table>> {
        let debug_name = debug_name.into();
        let reserved_elements = ty.maximum.map_or(TABLE_MAX_ELEMENTS, |max| {
            max.min(TABLE_MAX_ELEMENTS)
        });
        if ty.minimum > reserved_elements {
            bail!(
                "table minimum of {} elements exceeds the element limit",
                ty.minimum
            );
        }
        if let Some(quota) = &quota {
            if !quota.table_elements.allocate(ty.minimum) {
                bail!("table quota exceeded allocating {} elements", ty.minimum);
            }
        }

        let element_size = mem::size_of::<usize>() as u64;
        let committed = round_up_to_page_size((ty.minimum * element_size) as usize);
        let reserved = round_up_to_page_size((reserved_elements * element_size) as usize);
        let elements_for_unwind = ty.minimum;
        let result = (|| {
            let mmap = Mmap::accessible_reserved(committed, reserved)?;
            let quota_ref = quota.clone();
            compartment.register_table(move |id| {
                Arc::new(Table {
                    id,
                    compartment: Arc::downgrade(compartment),
                    ty,
                    debug_name,
                    mmap,
                    num_elements: AtomicU64::new(ty.minimum),
                    resizing: RwLock::new(()),
                    quota: quota_ref,
                })
            })
        })();
        match result {
            Ok(table) => Ok(table),
            Err(error) => {
                if let Some(quota) = &quota {
                    quota.table_elements.free(elements_for_unwind);
                }
                Err(error)
            }
        }
    }

    /// Clones `source` into `destination` with the same identity, type,
    /// element count, and element values.
    pub(crate) fn clone_into(
        source: &Arc<Table>,
        destination: &Arc<Compartment>,
    ) -> Result<Arc<Table>> {
        let _resizing = source.resizing.read().unwrap();
        let elements = source.num_elements.load(Ordering::SeqCst);
        if let Some(quota) = &source.quota {
            if !quota.table_elements.allocate(elements) {
                bail!("table quota exceeded cloning {elements} elements");
            }
        }

        let element_size = mem::size_of::<usize>() as u64;
        let committed = round_up_to_page_size((elements * element_size) as usize);
        let mmap = match Mmap::accessible_reserved(committed, source.mmap.len()) {
            Ok(mmap) => mmap,
            Err(error) => {
                if let Some(quota) = &source.quota {
                    quota.table_elements.free(elements);
                }
                return Err(error);
            }
        };
        unsafe {
            std::ptr::copy_nonoverlapping(
                source.mmap.as_ptr(),
                mmap.as_ptr(),
                (elements * element_size) as usize,
            );
        }

        Ok(destination.register_table_at(source.id, |id| {
            Arc::new(Table {
                id,
                compartment: Arc::downgrade(destination),
                ty: source.ty,
                debug_name: source.debug_name.clone(),
                mmap,
                num_elements: AtomicU64::new(elements),
                resizing: RwLock::new(()),
                quota: source.quota.clone(),
            })
        }))
    }

    /// The table's identity within its compartment.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The table's type.
    pub fn ty(&self) -> TableType {
        self.ty
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

    /// The base of the element array. Stable for the table's lifetime.
    pub fn base(&self) -> *mut u8 {
        self.mmap.as_ptr()
    }

    /// The current element count.
    pub fn num_elements(&self) -> u64 {
        self.num_elements.load(Ordering::SeqCst)
    }

    fn element(&self, index: u64) -> Result<&AtomicUsize, Trap> {
        if index >= self.num_elements() {
            return Err(Trap::memory_fault(TrapCode::OutOfBoundsTableAccess, index));
        }
        Ok(unsafe {
            &*(self.base() as *const AtomicUsize).add(index as usize)
        })
    }

    /// Reads the element at `index`, trapping on out-of-bounds indices and
    /// never-initialized elements.
    pub fn get(&self, index: u64) -> Result<usize, Trap> {
        let bits = self.element(index)?.load(Ordering::SeqCst);
        if bits == 0 {
            return Err(Trap::memory_fault(
                TrapCode::UninitializedTableElement,
                index,
            ));
        }
        Ok(bits)
    }

    /// Writes the element at `index`.
    pub fn set(&self, index: u64, element: usize) -> Result<(), Trap> {
        self.element(index)?.store(element, Ordering::SeqCst);
        Ok(())
    }

    /// Grows the table by `delta` elements, returning the previous element
    /// count, or `None` when the limits or quota forbid it.
    pub fn grow(&self, delta: u64) -> Result<Option<u64>> {
        let _resizing = self.resizing.write().unwrap();
        let old_elements = self.num_elements.load(Ordering::SeqCst);
        if delta == 0 {
            return Ok(Some(old_elements));
        }

        let new_elements = match old_elements.checked_add(delta) {
            Some(elements) => elements,
            None => return Ok(None),
        };
        let element_size = mem::size_of::<usize>() as u64;
        let limit = (self.mmap.len() as u64) / element_size;
        let limit = self.ty.maximum.map_or(limit, |max| max.min(limit));
        if new_elements > limit {
            return Ok(None);
        }
        if let Some(quota) = &self.quota {
            if !quota.table_elements.allocate(delta) {
                return Ok(None);
            }
        }

        let old_bytes = round_up_to_page_size((old_elements * element_size) as usize);
        let new_bytes = round_up_to_page_size((new_elements * element_size) as usize);
        if new_bytes > old_bytes {
            if let Err(error) = self.mmap.make_accessible(old_bytes, new_bytes - old_bytes) {
                if let Some(quota) = &self.quota {
                    quota.table_elements.free(delta);
                }
                return Err(error);
            }
        }

        self.num_elements.store(new_elements, Ordering::SeqCst);
        log::trace!(
            "table {:?} grew from {old_elements} to {new_elements} elements",
            self.debug_name
        );
        Ok(Some(old_elements))
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Some(quota) = &self.quota {
            quota
                .table_elements
                .free(self.num_elements.load(Ordering::SeqCst));
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .field("num_elements", &self.num_elements())
            .finish_non_exhaustive()
    }
}

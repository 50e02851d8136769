//! The runtime-data region emitted code addresses.
//!
//! Every compartment reserves one aligned virtual region laid out as a
//! [`CompartmentRuntimeData`]: a back-pointer to the compartment, the
//! per-memory and per-table base-pointer slots, then the per-context data.
//! Only the leading slice up to the contexts array is committed eagerly;
//! each context's slice is committed when the context is created.
//!
//! The region's base alignment exceeds its size, so the compartment header
//! can be recovered from any interior pointer by masking low bits — that is
//! how intrinsics find their compartment from the context pointer they are
//! handed.

use bulkhead_environ::{UntaggedValue, MAX_CONTEXTS, MAX_MEMORIES, MAX_MUTABLE_GLOBALS, MAX_TABLES};
use memoffset::offset_of;
use std::mem;
use std::sync::atomic::AtomicUsize;

/// Log2 of the alignment (and reservation granule) of a compartment's
/// runtime-data region.
pub const COMPARTMENT_RUNTIME_DATA_ALIGNMENT_LOG2: u8 = 25;

/// The reservation size of a compartment's runtime-data region.
pub const COMPARTMENT_RUNTIME_DATA_RESERVED_BYTES: usize =
    1 << COMPARTMENT_RUNTIME_DATA_ALIGNMENT_LOG2;

/// Per-context state addressed by emitted code: one slot for every
/// mutable-global index, seeded from the compartment's initial values when
/// the context is created.
#[repr(C)]
pub struct ContextRuntimeData {
    /// The context's mutable-global slots.
    pub mutable_globals: [UntaggedValue; MAX_MUTABLE_GLOBALS],
}

/// The layout of a compartment's reserved runtime-data region.
#[repr(C)]
pub struct CompartmentRuntimeData {
    /// Address of the owning `Compartment`, written once at creation.
    pub(crate) compartment: AtomicUsize,
    /// Base-address slot per memory identity. Emitted code loads the slot
    /// for a memory index and must see a stable value across one
    /// instruction's execution.
    pub(crate) memory_bases: [AtomicUsize; MAX_MEMORIES],
    /// Base-address slot per table identity.
    pub(crate) table_bases: [AtomicUsize; MAX_TABLES],
    /// Per-context data, committed lazily as contexts are created.
    pub contexts: [ContextRuntimeData; MAX_CONTEXTS],
}

// The mask-recovery trick requires the whole region to fit inside one
// alignment granule.
const _: () = assert!(
    mem::size_of::<CompartmentRuntimeData>() <= COMPARTMENT_RUNTIME_DATA_RESERVED_BYTES
);

impl CompartmentRuntimeData {
    /// The byte offset of the contexts array; everything before it is
    /// committed when the compartment is created.
    pub fn contexts_offset() -> usize {
        offset_of!(CompartmentRuntimeData, contexts)
    }

    /// The byte offset of the base-pointer slot for memory identity `id`.
    pub fn memory_base_offset(id: usize) -> usize {
        debug_assert!(id < MAX_MEMORIES);
        offset_of!(CompartmentRuntimeData, memory_bases) + id * mem::size_of::<usize>()
    }

    /// The byte offset of the base-pointer slot for table identity `id`.
    pub fn table_base_offset(id: usize) -> usize {
        debug_assert!(id < MAX_TABLES);
        offset_of!(CompartmentRuntimeData, table_bases) + id * mem::size_of::<usize>()
    }

    /// The byte offset of the runtime data of context identity `id`.
    pub fn context_offset(id: usize) -> usize {
        debug_assert!(id < MAX_CONTEXTS);
        Self::contexts_offset() + id * mem::size_of::<ContextRuntimeData>()
    }

    /// Recovers the region header from a pointer to any of its contexts by
    /// masking the low address bits.
    ///
    /// # Safety
    ///
    /// `context` must point into a live compartment's runtime-data region.
    pub unsafe fn from_context<'a>(context: *mut ContextRuntimeData) -> &'a CompartmentRuntimeData {
        let addr = context as usize & !(COMPARTMENT_RUNTIME_DATA_RESERVED_BYTES - 1);
        &*(addr as *const CompartmentRuntimeData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets_are_stable() {
        assert_eq!(offset_of!(CompartmentRuntimeData, compartment), 0);
        assert_eq!(
            CompartmentRuntimeData::memory_base_offset(0),
            mem::size_of::<usize>()
        );
        assert_eq!(
            CompartmentRuntimeData::memory_base_offset(1)
                - CompartmentRuntimeData::memory_base_offset(0),
            mem::size_of::<usize>()
        );
        // The contexts array must start aligned for `UntaggedValue`.
        assert_eq!(CompartmentRuntimeData::contexts_offset() % 16, 0);
        assert_eq!(
            CompartmentRuntimeData::context_offset(1) - CompartmentRuntimeData::context_offset(0),
            mem::size_of::<ContextRuntimeData>()
        );
    }

    #[test]
    fn region_fits_in_one_alignment_granule() {
        assert!(
            mem::size_of::<CompartmentRuntimeData>() <= COMPARTMENT_RUNTIME_DATA_RESERVED_BYTES
        );
    }
}

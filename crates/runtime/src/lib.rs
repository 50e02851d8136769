//! The compartmentalized runtime for bulkhead's WebAssembly objects.
//!
//! A [`Compartment`] owns every non-function runtime object — memories,
//! tables, globals, exception types, instances, contexts, foreigns — under
//! stable small-integer identities. Compartments can be cloned: the clone
//! holds a structurally equivalent object at the same identity for every
//! source object, which keeps already-compiled code that refers to objects
//! by identity valid in the clone. Functions are compartment-less and are
//! tested for membership through their instance identity and
//! compiled-module handle.
//!
//! The crate also provides the runtime intrinsics emitted code calls (the
//! `bulkhead_*` libcalls), the trap unwinding machinery, and the
//! wait/notify parking spot.

#![warn(missing_docs)]

mod compartment;
mod context;
mod exception;
mod foreign;
mod function;
mod global;
mod id_map;
mod instance;
mod libcalls;
mod memory;
mod mmap;
mod object;
mod parking_spot;
mod quota;
mod runtime_data;
mod table;
mod traps;

pub use crate::compartment::{
    clone_compartment, is_in_compartment, remap_exception_type, remap_foreign, remap_global,
    remap_instance, remap_memory, remap_table, remap_to_cloned_compartment, Compartment,
};
pub use crate::context::Context;
pub use crate::exception::ExceptionType;
pub use crate::foreign::Foreign;
pub use crate::function::{CompiledModule, Function};
pub use crate::global::Global;
pub use crate::id_map::IdMap;
pub use crate::instance::{ElemSegmentContents, Instance, InstanceObjects};
pub use crate::libcalls::{
    bulkhead_atomic_notify, bulkhead_atomic_wait_i32, bulkhead_atomic_wait_i64,
    bulkhead_data_drop, bulkhead_memory_grow, bulkhead_memory_init, bulkhead_memory_size,
    bulkhead_misaligned_atomic_trap, intrinsic_symbol,
};
pub use crate::memory::Memory;
pub use crate::mmap::Mmap;
pub use crate::object::{Object, ObjectKind};
pub use crate::parking_spot::{ParkingSpot, WaitResult};
pub use crate::quota::{CurrentAndMax, ResourceQuota, ResourceQuotaRef};
pub use crate::runtime_data::{
    CompartmentRuntimeData, ContextRuntimeData, COMPARTMENT_RUNTIME_DATA_ALIGNMENT_LOG2,
    COMPARTMENT_RUNTIME_DATA_RESERVED_BYTES,
};
pub use crate::table::Table;
pub use crate::traps::{catch_traps, raise, Trap};

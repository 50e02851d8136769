//! Runtime intrinsics called by emitted code.
//!
//! Every intrinsic is `extern "C-unwind"` and receives the current
//! context's runtime data as an implicit leading argument; the remaining
//! parameters are exactly the wire contract the emitter compiles against.
//! Bodies compute their outcome as a `Result` in a nested block so locals
//! drop before a trap starts unwinding.

use crate::compartment::Compartment;
use crate::memory::Memory;
use crate::parking_spot::ParkingSpot;
use crate::runtime_data::ContextRuntimeData;
use crate::traps::{self, Trap};
use bulkhead_environ::TrapCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

static PARKING_SPOT: ParkingSpot = ParkingSpot::new();

/// A negative timeout means wait forever; otherwise the timeout is in
/// nanoseconds.
fn deadline_from_timeout(timeout_ns: i64) -> Option<Instant> {
    u64::try_from(timeout_ns)
        .ok()
        .map(|ns| Instant::now() + Duration::from_nanos(ns))
}

/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
unsafe fn compartment_of<'a>(ctx: *mut ContextRuntimeData) -> &'a Compartment {
    Compartment::from_context(ctx)
}

fn memory_by_id(compartment: &Compartment, memory_id: usize) -> Arc<Memory> {
    compartment
        .memory(memory_id)
        .expect("emitted code referenced a memory identity that is not live")
}

/// Implementation of the `memory.grow` intrinsic. Returns the previous
/// page count, or `-1` when the memory cannot grow.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_memory_grow(
    ctx: *mut ContextRuntimeData,
    delta_pages: u32,
    memory_id: usize,
) -> u32 {
    let result = {
        let compartment = compartment_of(ctx);
        memory_by_id(compartment, memory_id).grow(u64::from(delta_pages))
    };
    match result {
        Ok(Some(old_pages)) => old_pages as u32,
        Ok(None) => u32::MAX,
        Err(error) => {
            log::warn!("memory.grow failed: {error:#}");
            u32::MAX
        }
    }
}

/// Implementation of the `memory.size` intrinsic.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_memory_size(
    ctx: *mut ContextRuntimeData,
    memory_id: usize,
) -> u32 {
    let compartment = compartment_of(ctx);
    memory_by_id(compartment, memory_id).num_pages() as u32
}

/// Implementation of the `memory.init` intrinsic.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_memory_init(
    ctx: *mut ContextRuntimeData,
    dest_address: u32,
    source_offset: u32,
    num_bytes: u32,
    instance_id: usize,
    memory_id: usize,
    segment_index: usize,
) {
    let result = {
        let compartment = compartment_of(ctx);
        let instance = compartment
            .instance(instance_id)
            .expect("emitted code referenced an instance identity that is not live");
        let memory = memory_by_id(compartment, memory_id);
        instance.init_data_segment(
            &memory,
            segment_index,
            u64::from(dest_address),
            u64::from(source_offset),
            u64::from(num_bytes),
        )
    };
    if let Err(trap) = result {
        traps::raise(trap);
    }
}

/// Implementation of the `data.drop` intrinsic.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_data_drop(
    ctx: *mut ContextRuntimeData,
    instance_id: usize,
    segment_index: usize,
) {
    let result = {
        let compartment = compartment_of(ctx);
        let instance = compartment
            .instance(instance_id)
            .expect("emitted code referenced an instance identity that is not live");
        instance.drop_data_segment(segment_index)
    };
    if let Err(trap) = result {
        traps::raise(trap);
    }
}

/// Implementation of the `atomic_notify` intrinsic. The address is the
/// raw 32-bit guest address; alignment was already checked by the emitted
/// code, and the bounds check happens here.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_atomic_notify(
    ctx: *mut ContextRuntimeData,
    address: u32,
    count: u32,
    memory_id: usize,
) -> u32 {
    let result: Result<u32, Trap> = {
        let compartment = compartment_of(ctx);
        let memory = memory_by_id(compartment, memory_id);
        memory
            .atomic_u32(u64::from(address))
            .map(|atomic| PARKING_SPOT.notify(atomic.as_ptr() as u64, count))
    };
    match result {
        Ok(woken) => woken,
        Err(trap) => traps::raise(trap),
    }
}

/// Implementation of the `atomic_wait_i32` intrinsic.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_atomic_wait_i32(
    ctx: *mut ContextRuntimeData,
    address: u32,
    expected: u32,
    timeout_ns: i64,
    memory_id: usize,
) -> u32 {
    let result: Result<u32, Trap> = {
        let compartment = compartment_of(ctx);
        let memory = memory_by_id(compartment, memory_id);
        memory.atomic_u32(u64::from(address)).map(|atomic| {
            PARKING_SPOT
                .wait32(atomic, expected, deadline_from_timeout(timeout_ns))
                .as_u32()
        })
    };
    match result {
        Ok(status) => status,
        Err(trap) => traps::raise(trap),
    }
}

/// Implementation of the `atomic_wait_i64` intrinsic.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_atomic_wait_i64(
    ctx: *mut ContextRuntimeData,
    address: u32,
    expected: i64,
    timeout_ns: i64,
    memory_id: usize,
) -> u32 {
    let result: Result<u32, Trap> = {
        let compartment = compartment_of(ctx);
        let memory = memory_by_id(compartment, memory_id);
        memory.atomic_u64(u64::from(address)).map(|atomic| {
            PARKING_SPOT
                .wait64(atomic, expected as u64, deadline_from_timeout(timeout_ns))
                .as_u32()
        })
    };
    match result {
        Ok(status) => status,
        Err(trap) => traps::raise(trap),
    }
}

/// Implementation of the `misalignedAtomicTrap` intrinsic: raises the
/// misaligned-atomic trap with the faulting address. Never returns.
///
/// # Safety
///
/// `ctx` must point into the runtime-data region of a live compartment.
pub unsafe extern "C-unwind" fn bulkhead_misaligned_atomic_trap(
    _ctx: *mut ContextRuntimeData,
    address: i64,
) -> ! {
    traps::raise(Trap::memory_fault(
        TrapCode::MisalignedAtomic,
        address as u64,
    ))
}

/// Resolves a wire-contract intrinsic name to the address of its
/// implementation, for the code generator's relocation step.
pub fn intrinsic_symbol(name: &str) -> Option<usize> {
    Some(match name {
        "memory.grow" => bulkhead_memory_grow as usize,
        "memory.size" => bulkhead_memory_size as usize,
        "memory.init" => bulkhead_memory_init as usize,
        "data.drop" => bulkhead_data_drop as usize,
        "atomic_notify" => bulkhead_atomic_notify as usize,
        "atomic_wait_i32" => bulkhead_atomic_wait_i32 as usize,
        "atomic_wait_i64" => bulkhead_atomic_wait_i64 as usize,
        "misalignedAtomicTrap" => bulkhead_misaligned_atomic_trap as usize,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_wire_name_resolves() {
        for name in [
            "memory.grow",
            "memory.size",
            "memory.init",
            "data.drop",
            "atomic_notify",
            "atomic_wait_i32",
            "atomic_wait_i64",
            "misalignedAtomicTrap",
        ] {
            assert!(intrinsic_symbol(name).is_some(), "{name} must resolve");
        }
        assert!(intrinsic_symbol("memory.copy").is_none());
    }

    #[test]
    fn negative_timeouts_wait_forever() {
        assert!(deadline_from_timeout(-1).is_none());
        assert!(deadline_from_timeout(i64::MIN).is_none());
        assert!(deadline_from_timeout(0).is_some());
        assert!(deadline_from_timeout(1_000_000).is_some());
    }
}

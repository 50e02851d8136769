//! The runtime intrinsics, driven the way emitted code calls them.

use bulkhead_environ::{MemoryType, TrapCode, WASM_PAGE_SIZE};
use bulkhead_runtime::{
    bulkhead_data_drop, bulkhead_memory_grow, bulkhead_memory_init, bulkhead_memory_size,
    bulkhead_misaligned_atomic_trap, catch_traps, Compartment, CompiledModule, Context, Instance,
    InstanceObjects, Memory, ResourceQuota,
};
use std::sync::Arc;

#[test]
fn memory_grow_returns_the_previous_page_count() {
    let compartment = Compartment::new().unwrap();
    let memory = Memory::new(&compartment, MemoryType::new(1, Some(3)), "m", None).unwrap();
    let context = Context::new(&compartment).unwrap();
    let ctx = context.runtime_data();

    unsafe {
        assert_eq!(bulkhead_memory_size(ctx, memory.id()), 1);
        assert_eq!(bulkhead_memory_grow(ctx, 2, memory.id()), 1);
        assert_eq!(bulkhead_memory_size(ctx, memory.id()), 3);
        // Growing past the maximum fails with -1.
        assert_eq!(bulkhead_memory_grow(ctx, 1, memory.id()), u32::MAX);
        // Growing by zero reports the current size.
        assert_eq!(bulkhead_memory_grow(ctx, 0, memory.id()), 3);
    }

    // The grown pages are writable up to the new size.
    let last_byte = 3 * WASM_PAGE_SIZE - 1;
    memory.write(last_byte, &[0xaa]).unwrap();
    let mut read_back = [0u8; 1];
    memory.read(last_byte, &mut read_back).unwrap();
    assert_eq!(read_back[0], 0xaa);
    assert!(memory.write(last_byte + 1, &[0]).is_err());

    compartment.clear();
}

#[test]
fn memory_grow_respects_a_shared_quota() {
    let compartment = Compartment::new().unwrap();
    let quota = ResourceQuota::new(4, 0);
    let memory = Memory::new(
        &compartment,
        MemoryType::new(1, None),
        "m",
        Some(quota.clone()),
    )
    .unwrap();
    let context = Context::new(&compartment).unwrap();
    let ctx = context.runtime_data();

    unsafe {
        assert_eq!(bulkhead_memory_grow(ctx, 3, memory.id()), 1);
        // The quota of 4 pages is exhausted.
        assert_eq!(bulkhead_memory_grow(ctx, 1, memory.id()), u32::MAX);
    }
    assert_eq!(quota.memory_pages.current(), 4);

    compartment.clear();
    drop(memory);
    assert_eq!(quota.memory_pages.current(), 0);
}

#[test]
fn memory_init_copies_and_checks_both_sides() {
    let compartment = Compartment::new().unwrap();
    let memory = Memory::new(&compartment, MemoryType::new(1, None), "m", None).unwrap();
    let module = CompiledModule::new("m");
    let mut objects = InstanceObjects::new(module);
    objects.memories.push(memory.clone());
    objects
        .passive_data_segments
        .push(Arc::new(b"0123456789".to_vec()));
    let instance = Instance::new(&compartment, objects, "inst").unwrap();
    let context = Context::new(&compartment).unwrap();
    let ctx = context.runtime_data();

    unsafe {
        bulkhead_memory_init(ctx, 100, 2, 5, instance.id(), memory.id(), 0);
    }
    let mut copied = [0u8; 5];
    memory.read(100, &mut copied).unwrap();
    assert_eq!(&copied, b"23456");

    // Reading past the end of the segment is a data-segment bounds trap.
    let trap = catch_traps(|| unsafe {
        bulkhead_memory_init(ctx, 0, 8, 4, instance.id(), memory.id(), 0);
    })
    .unwrap_err();
    assert_eq!(trap.code, TrapCode::OutOfBoundsDataSegmentAccess);

    // Writing past the end of the memory is a memory bounds trap.
    let trap = catch_traps(|| unsafe {
        bulkhead_memory_init(
            ctx,
            (WASM_PAGE_SIZE - 2) as u32,
            0,
            5,
            instance.id(),
            memory.id(),
            0,
        );
    })
    .unwrap_err();
    assert_eq!(trap.code, TrapCode::OutOfBoundsMemoryAccess);

    compartment.clear();
}

#[test]
fn dropped_data_segments_raise_invalid_argument() {
    let compartment = Compartment::new().unwrap();
    let memory = Memory::new(&compartment, MemoryType::new(1, None), "m", None).unwrap();
    let module = CompiledModule::new("m");
    let mut objects = InstanceObjects::new(module);
    objects.passive_data_segments.push(Arc::new(vec![7; 8]));
    let instance = Instance::new(&compartment, objects, "inst").unwrap();
    let context = Context::new(&compartment).unwrap();
    let ctx = context.runtime_data();

    unsafe {
        bulkhead_data_drop(ctx, instance.id(), 0);
    }

    // Using the dropped segment, dropping it again, and using an unknown
    // segment index all surface the same invalid-argument trap.
    let trap = catch_traps(|| unsafe {
        bulkhead_memory_init(ctx, 0, 0, 1, instance.id(), memory.id(), 0);
    })
    .unwrap_err();
    assert_eq!(trap.code, TrapCode::InvalidArgument);

    let trap = catch_traps(|| unsafe { bulkhead_data_drop(ctx, instance.id(), 0) }).unwrap_err();
    assert_eq!(trap.code, TrapCode::InvalidArgument);

    let trap = catch_traps(|| unsafe { bulkhead_data_drop(ctx, instance.id(), 9) }).unwrap_err();
    assert_eq!(trap.code, TrapCode::InvalidArgument);

    compartment.clear();
}

#[test]
fn misaligned_atomic_trap_carries_the_address() {
    let compartment = Compartment::new().unwrap();
    let context = Context::new(&compartment).unwrap();
    let ctx = context.runtime_data();

    let trap =
        catch_traps(|| -> () { unsafe { bulkhead_misaligned_atomic_trap(ctx, 0x7) } }).unwrap_err();
    assert_eq!(trap.code, TrapCode::MisalignedAtomic);
    assert_eq!(trap.address, Some(0x7));

    compartment.clear();
}

#[test]
fn context_creation_seeds_mutable_globals() {
    use bulkhead_environ::{GlobalType, Val, ValType};
    use bulkhead_runtime::Global;

    let compartment = Compartment::new().unwrap();
    let global = Global::new(
        &compartment,
        GlobalType {
            value_type: ValType::I64,
            mutable: true,
        },
        "g",
    )
    .unwrap();
    global.initialize(Val::I64(0x0123_4567_89ab_cdef)).unwrap();

    let context = Context::new(&compartment).unwrap();
    let slot = global.mutable_global_index().unwrap() as usize;
    let seeded = unsafe { (*context.runtime_data()).mutable_globals[slot] };
    assert_eq!(seeded.as_i64(), 0x0123_4567_89ab_cdef);

    compartment.clear();
}

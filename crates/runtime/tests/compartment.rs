//! Compartment store, cloning, and containment behaviour.

use bulkhead_environ::{GlobalType, MemoryType, TupleType, Val, ValType};
use bulkhead_runtime::{
    clone_compartment, is_in_compartment, remap_foreign, remap_global, remap_memory,
    remap_to_cloned_compartment, Compartment, CompiledModule, ExceptionType, Foreign, Function,
    Global, Instance, InstanceObjects, Memory, Object,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn small_memory(compartment: &Arc<Compartment>, name: &str) -> Arc<Memory> {
    Memory::new(compartment, MemoryType::new(1, Some(4)), name, None).unwrap()
}

fn mutable_global(compartment: &Arc<Compartment>, name: &str) -> Arc<Global> {
    Global::new(
        compartment,
        GlobalType {
            value_type: ValType::I32,
            mutable: true,
        },
        name,
    )
    .unwrap()
}

#[test]
fn object_identities_are_dense_and_reused_after_removal() {
    let compartment = Compartment::new().unwrap();
    let m0 = small_memory(&compartment, "m0");
    let m1 = small_memory(&compartment, "m1");
    let m2 = small_memory(&compartment, "m2");
    assert_eq!((m0.id(), m1.id(), m2.id()), (0, 1, 2));

    compartment.remove_memory(1).unwrap();
    let m1_again = small_memory(&compartment, "m1-again");
    assert_eq!(m1_again.id(), 1);

    compartment.clear();
}

#[test]
fn clone_preserves_identities_and_slots() {
    let compartment_a = Compartment::new().unwrap();

    // Fill identities 0..3 so the memory of interest lands at 3, and
    // slots 0..5 so the global of interest gets slot 5.
    for index in 0..3 {
        small_memory(&compartment_a, &format!("filler-{index}"));
    }
    let memory = small_memory(&compartment_a, "the-memory");
    assert_eq!(memory.id(), 3);
    memory.write(0, b"compartmental").unwrap();

    for index in 0..5 {
        mutable_global(&compartment_a, &format!("g{index}"));
    }
    let global = mutable_global(&compartment_a, "the-global");
    assert_eq!(global.mutable_global_index(), Some(5));
    global.initialize(Val::I32(77)).unwrap();

    let exception_type = ExceptionType::new(
        &compartment_a,
        TupleType::from(vec![ValType::I32]),
        "the-exception",
    )
    .unwrap();

    let compartment_b = clone_compartment(&compartment_a).unwrap();

    let memory_b = remap_memory(&memory, &compartment_b).unwrap();
    assert_eq!(memory_b.id(), 3);
    let mut copied = [0u8; 13];
    memory_b.read(0, &mut copied).unwrap();
    assert_eq!(&copied, b"compartmental");

    let global_b = remap_global(&global, &compartment_b).unwrap();
    assert_eq!(global_b.id(), global.id());
    assert_eq!(global_b.mutable_global_index(), Some(5));
    assert_eq!(global_b.initial_value().as_i32(), 77);
    assert!(global_b.has_been_initialized());
    assert!(compartment_b.mutable_global_slot_is_allocated(5));
    assert_eq!(compartment_b.initial_mutable_global(5).as_i32(), 77);

    let exception_type_b =
        remap_to_cloned_compartment(Some(&Object::from(exception_type.clone())), &compartment_b)
            .unwrap();
    match exception_type_b {
        Object::ExceptionType(clone) => assert_eq!(clone.id(), exception_type.id()),
        other => panic!("remapped to {:?}", other.kind()),
    }

    // The clone is isolated: writes to the source do not show through.
    memory.write(0, b"X").unwrap();
    memory_b.read(0, &mut copied[..1]).unwrap();
    assert_eq!(copied[0], b'c');

    compartment_a.clear();
    compartment_b.clear();
}

#[test]
fn clone_keeps_new_slot_allocations_disjoint() {
    let compartment_a = Compartment::new().unwrap();
    let g0 = mutable_global(&compartment_a, "g0");
    assert_eq!(g0.mutable_global_index(), Some(0));

    let compartment_b = clone_compartment(&compartment_a).unwrap();
    // A new mutable global in the clone must not reuse the copied slot.
    let g1 = mutable_global(&compartment_b, "g1");
    assert_eq!(g1.mutable_global_index(), Some(1));

    compartment_a.clear();
    compartment_b.clear();
}

#[test]
fn remap_is_none_for_null_and_unknown_objects() {
    let compartment_a = Compartment::new().unwrap();
    let compartment_b = clone_compartment(&compartment_a).unwrap();

    assert!(remap_to_cloned_compartment(None, &compartment_b).is_none());

    // Foreigns are not cloned; remapping one into the clone finds nothing.
    let foreign = Foreign::new(&compartment_a, Box::new(42u32)).unwrap();
    assert!(remap_foreign(&foreign, &compartment_b).is_none());

    compartment_a.clear();
    compartment_b.clear();
}

#[test]
fn functions_are_contained_by_module_identity() {
    let compartment_a = Compartment::new().unwrap();
    let module_x = CompiledModule::new("module-x");
    let instance = Instance::new(
        &compartment_a,
        InstanceObjects::new(module_x.clone()),
        "instance-x",
    )
    .unwrap();
    let function = Function::new(instance.id(), module_x.clone(), "f");

    assert!(is_in_compartment(
        &Object::from(function.clone()),
        &compartment_a
    ));

    // The clone's instance at the same identity shares the compiled
    // module, so the function is in the clone too.
    let compartment_b = clone_compartment(&compartment_a).unwrap();
    assert!(is_in_compartment(
        &Object::from(function.clone()),
        &compartment_b
    ));

    // An unrelated compartment whose instance happens to reuse the
    // identity, but with a different compiled module, does not contain
    // the function.
    let compartment_c = Compartment::new().unwrap();
    let module_y = CompiledModule::new("module-y");
    let unrelated = Instance::new(
        &compartment_c,
        InstanceObjects::new(module_y),
        "instance-y",
    )
    .unwrap();
    assert_eq!(unrelated.id(), instance.id());
    assert!(!is_in_compartment(
        &Object::from(function.clone()),
        &compartment_c
    ));

    // Sentinel functions are in every compartment.
    let universal = Function::universal(module_x, "intrinsic");
    for compartment in [&compartment_a, &compartment_b, &compartment_c] {
        assert!(is_in_compartment(&Object::from(universal.clone()), compartment));
    }

    compartment_a.clear();
    compartment_b.clear();
    compartment_c.clear();
}

#[test]
fn non_function_objects_belong_to_their_creator_only() {
    let compartment_a = Compartment::new().unwrap();
    let compartment_b = Compartment::new().unwrap();
    let memory = small_memory(&compartment_a, "m");

    assert!(is_in_compartment(
        &Object::from(memory.clone()),
        &compartment_a
    ));
    assert!(!is_in_compartment(
        &Object::from(memory.clone()),
        &compartment_b
    ));

    compartment_a.clear();
    compartment_b.clear();
}

#[test]
fn cloned_instance_references_clone_objects() {
    let compartment_a = Compartment::new().unwrap();
    let module = CompiledModule::new("m");
    let memory = small_memory(&compartment_a, "mem");
    let mut objects = InstanceObjects::new(module);
    objects.memories.push(memory.clone());
    objects
        .exports
        .insert("mem".to_string(), Object::from(memory.clone()));
    objects.passive_data_segments.push(Arc::new(b"seed".to_vec()));
    let instance = Instance::new(&compartment_a, objects, "inst").unwrap();

    let compartment_b = clone_compartment(&compartment_a).unwrap();
    let instance_b = compartment_b.instance(instance.id()).unwrap();

    let exported = match instance_b.export("mem").unwrap() {
        Object::Memory(memory) => memory,
        other => panic!("unexpected export {:?}", other.kind()),
    };
    assert!(is_in_compartment(
        &Object::from(exported.clone()),
        &compartment_b
    ));
    assert_eq!(exported.id(), memory.id());
    assert_eq!(&*instance_b.data_segment(0).unwrap(), b"seed");

    compartment_a.clear();
    compartment_b.clear();
}

#[test]
fn dropped_segments_stay_dropped_in_clones() {
    let compartment_a = Compartment::new().unwrap();
    let module = CompiledModule::new("m");
    let mut objects = InstanceObjects::new(module);
    objects.passive_data_segments.push(Arc::new(vec![1, 2, 3]));
    objects.passive_data_segments.push(Arc::new(vec![4, 5, 6]));
    let instance = Instance::new(&compartment_a, objects, "inst").unwrap();
    instance.drop_data_segment(0).unwrap();

    let compartment_b = clone_compartment(&compartment_a).unwrap();
    let instance_b = compartment_b.instance(instance.id()).unwrap();
    assert!(instance_b.data_segment(0).is_err());
    assert_eq!(&*instance_b.data_segment(1).unwrap(), &[4, 5, 6]);

    compartment_a.clear();
    compartment_b.clear();
}

#[test]
#[should_panic(expected = "live memories")]
fn dropping_a_non_empty_compartment_asserts() {
    let compartment = Compartment::new().unwrap();
    let _memory = small_memory(&compartment, "leaked");
    drop(compartment);
}

proptest! {
    // The store always hands out the smallest free identity, and removal
    // makes an identity immediately reusable.
    #[test]
    fn identity_allocation_matches_the_model(ops in proptest::collection::vec(any::<u8>(), 1..64)) {
        let mut model: BTreeSet<usize> = BTreeSet::new();
        let mut map = bulkhead_runtime::IdMap::new(usize::MAX - 1);

        for op in ops {
            if op % 3 == 0 && !model.is_empty() {
                // Remove the (op-selected) smallest live identity.
                let id = *model.iter().next().unwrap();
                prop_assert!(map.remove(id).is_some());
                model.remove(&id);
            } else {
                let expected = (0..).find(|id| !model.contains(id)).unwrap();
                let (id, _) = map.insert_with(|id| id).unwrap();
                prop_assert_eq!(id, expected);
                model.insert(id);
            }
        }
    }
}

//! Static checks over the emitted instruction sequences: access flags,
//! address widening, and the compile-time rejections.

use bulkhead_codegen::ir::{Function, InstructionData, Type, UnaryOp};
use bulkhead_codegen::operators::{
    AtomicFenceImm, LoadOrStoreImm, MemoryCopyImm, MemoryImm, MemoryOrder, Operator,
};
use bulkhead_codegen::{CodegenError, FuncEmitter, ModuleContext};
use bulkhead_environ::{MemoryIndex, MemoryPlan, MemoryType};
use std::str::FromStr;
use target_lexicon::Triple;

const GENERIC: &str = "riscv64gc-unknown-linux-gnu";

fn module_with_memory(triple: &str) -> (ModuleContext, MemoryIndex) {
    let mut module = ModuleContext::new(Triple::from_str(triple).unwrap(), 0);
    let memory_index = module.push_memory(MemoryPlan::sandboxed(MemoryType::new(1, None)), 0);
    (module, memory_index)
}

fn emit(module: &ModuleContext, params: &[Type], ops: &[Operator]) -> Function {
    let mut func = Function::new();
    let mut emitter = FuncEmitter::new(&mut func, module);
    for &param in params {
        emitter.declare_param(param);
    }
    for op in ops {
        emitter.translate_operator(op).unwrap();
    }
    emitter.finish();
    func
}

fn imm(memory_index: MemoryIndex, offset: u32, alignment_log2: u8) -> LoadOrStoreImm {
    LoadOrStoreImm {
        offset,
        alignment_log2,
        memory_index,
    }
}

fn for_each_inst(func: &Function, mut visit: impl FnMut(&InstructionData)) {
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            visit(func.inst_data(inst));
        }
    }
}

#[test]
fn plain_accesses_are_volatile_and_byte_aligned() {
    let (module, memory) = module_with_memory(GENERIC);
    // A representative spread: scalar widths, floats, v128, splats,
    // widening loads, interleaved accesses, and the bulk loops. The
    // alignment hints deliberately claim natural alignment; the emitted
    // flags must ignore them.
    let cases: Vec<(Vec<Type>, Vec<Operator>)> = vec![
        (vec![Type::I32], vec![Operator::I32Load(imm(memory, 0, 2))]),
        (vec![Type::I32], vec![Operator::I64Load(imm(memory, 8, 3))]),
        (vec![Type::I32], vec![Operator::F64Load(imm(memory, 0, 3))]),
        (vec![Type::I32], vec![Operator::I32Load16U(imm(memory, 2, 1))]),
        (vec![Type::I32], vec![Operator::V128Load(imm(memory, 0, 4))]),
        (
            vec![Type::I32],
            vec![Operator::V8x16LoadSplat(imm(memory, 0, 0))],
        ),
        (
            vec![Type::I32],
            vec![Operator::I16x8Load8x8S(imm(memory, 0, 3))],
        ),
        (
            vec![Type::I32],
            vec![Operator::V32x4LoadInterleaved3(imm(memory, 0, 4))],
        ),
        (
            vec![Type::I32, Type::I32],
            vec![Operator::I32Store(imm(memory, 4, 2))],
        ),
        (
            vec![Type::I32, Type::I64],
            vec![Operator::I64Store16(imm(memory, 0, 1))],
        ),
        (
            vec![Type::I32, Type::I32, Type::I32],
            vec![Operator::MemoryCopy(MemoryCopyImm {
                source_memory_index: memory,
                dest_memory_index: memory,
            })],
        ),
        (
            vec![Type::I32, Type::I32, Type::I32],
            vec![Operator::MemoryFill(MemoryImm {
                memory_index: memory,
            })],
        ),
    ];

    for (params, ops) in cases {
        let func = emit(&module, &params, &ops);
        let mut accesses = 0;
        for_each_inst(&func, |data| match data {
            InstructionData::Load { flags, .. } | InstructionData::Store { flags, .. } => {
                accesses += 1;
                assert!(flags.volatile(), "non-volatile access in {ops:?}");
                assert_eq!(flags.alignment(), 1, "over-aligned access in {ops:?}");
            }
            _ => {}
        });
        assert!(accesses > 0, "no accesses emitted for {ops:?}");
    }
}

#[test]
fn atomic_accesses_are_volatile_with_declared_alignment() {
    let (module, memory) = module_with_memory(GENERIC);
    let func = emit(
        &module,
        &[Type::I32, Type::I32],
        &[Operator::I32AtomicRmwAdd(imm(memory, 0, 2))],
    );
    let mut seen = false;
    for_each_inst(&func, |data| {
        if let InstructionData::AtomicRmw { flags, .. } = data {
            seen = true;
            assert!(flags.volatile());
            assert_eq!(flags.alignment(), 4);
        }
    });
    assert!(seen);

    let func = emit(
        &module,
        &[Type::I32],
        &[Operator::I64AtomicLoad(imm(memory, 0, 3))],
    );
    let mut seen = false;
    for_each_inst(&func, |data| {
        if let InstructionData::AtomicLoad { flags, .. } = data {
            seen = true;
            assert!(flags.volatile());
            assert_eq!(flags.alignment(), 8);
        }
    });
    assert!(seen);
}

#[test]
fn addresses_widen_by_zero_extension_only() {
    let (module, memory) = module_with_memory(GENERIC);
    // A plain i32 load involves no sign-dependent conversion at all, so
    // any sign extension in the body would be the address path widening
    // incorrectly.
    let func = emit(
        &module,
        &[Type::I32],
        &[Operator::I32Load(imm(memory, 0x1000, 2))],
    );
    let mut saw_uextend_to_64 = false;
    for_each_inst(&func, |data| match data {
        InstructionData::Unary {
            op: UnaryOp::Uextend,
            ty: Type::I64,
            ..
        } => saw_uextend_to_64 = true,
        InstructionData::Unary {
            op: UnaryOp::Sextend,
            ..
        } => panic!("sign extension emitted while widening an address"),
        _ => {}
    });
    assert!(saw_uextend_to_64);
}

#[test]
fn sign_extending_loads_convert_the_loaded_value_not_the_address() {
    let (module, memory) = module_with_memory(GENERIC);
    let func = emit(
        &module,
        &[Type::I32],
        &[Operator::I32Load8S(imm(memory, 0, 0))],
    );
    // The only sign extension must take the load's i8 result.
    let mut sextends = 0;
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            if let InstructionData::Unary {
                op: UnaryOp::Sextend,
                arg,
                ..
            } = func.inst_data(inst)
            {
                sextends += 1;
                assert_eq!(func.value_type(*arg), Type::I8);
            }
        }
    }
    assert_eq!(sextends, 1);
}

#[test]
fn lowering_is_refused_without_the_sandbox_reservation() {
    let mut module = ModuleContext::new(Triple::from_str(GENERIC).unwrap(), 0);
    let memory = module.push_memory(
        MemoryPlan {
            memory: MemoryType::new(1, None),
            reserved_bytes: 1 << 20,
        },
        0,
    );

    let mut func = Function::new();
    let mut emitter = FuncEmitter::new(&mut func, &module);
    emitter.declare_param(Type::I32);
    let error = emitter
        .translate_operator(&Operator::I32Load(imm(memory, 0, 2)))
        .unwrap_err();
    assert!(matches!(error, CodegenError::UnsandboxedMemory { .. }));
}

#[test]
fn only_sequentially_consistent_fences_compile() {
    let (module, _memory) = module_with_memory(GENERIC);

    let mut func = Function::new();
    let mut emitter = FuncEmitter::new(&mut func, &module);
    emitter
        .translate_operator(&Operator::AtomicFence(AtomicFenceImm {
            order: MemoryOrder::SequentiallyConsistent,
        }))
        .unwrap();
    emitter.finish();
    let mut fences = 0;
    for_each_inst(&func, |data| {
        if matches!(data, InstructionData::Fence) {
            fences += 1;
        }
    });
    assert_eq!(fences, 1);

    for order in [
        MemoryOrder::Relaxed,
        MemoryOrder::Acquire,
        MemoryOrder::Release,
        MemoryOrder::AcquireRelease,
    ] {
        let mut func = Function::new();
        let mut emitter = FuncEmitter::new(&mut func, &module);
        let error = emitter
            .translate_operator(&Operator::AtomicFence(AtomicFenceImm { order }))
            .unwrap_err();
        assert!(
            matches!(error, CodegenError::UnsupportedMemoryOrder(o) if o == order),
            "fence with {order:?} must be rejected"
        );
    }
}

#[test]
fn x86_bulk_ops_use_the_string_instructions() {
    let mut module = ModuleContext::new(
        Triple::from_str("x86_64-unknown-linux-gnu").unwrap(),
        0,
    );
    let memory = module.push_memory(MemoryPlan::sandboxed(MemoryType::new(1, None)), 0);

    let func = emit(
        &module,
        &[Type::I32, Type::I32, Type::I32],
        &[Operator::MemoryCopy(MemoryCopyImm {
            source_memory_index: memory,
            dest_memory_index: memory,
        })],
    );
    let (mut movsb, mut byte_loops) = (0, 0);
    for_each_inst(&func, |data| match data {
        InstructionData::X86RepMovsb { .. } => movsb += 1,
        InstructionData::Load { ty: Type::I8, .. } => byte_loops += 1,
        _ => {}
    });
    // The forward path is the string instruction; the reverse path is
    // still a byte loop.
    assert_eq!(movsb, 1);
    assert!(byte_loops > 0);

    let func = emit(
        &module,
        &[Type::I32, Type::I32, Type::I32],
        &[Operator::MemoryFill(MemoryImm {
            memory_index: memory,
        })],
    );
    let mut stosb = 0;
    for_each_inst(&func, |data| {
        if matches!(data, InstructionData::X86RepStosb { .. }) {
            stosb += 1;
        }
    });
    assert_eq!(stosb, 1);
}

#[test]
fn aarch64_interleaved_ops_use_the_multi_vector_instructions() {
    let mut module = ModuleContext::new(
        Triple::from_str("aarch64-unknown-linux-gnu").unwrap(),
        0,
    );
    let memory = module.push_memory(MemoryPlan::sandboxed(MemoryType::new(1, None)), 0);

    let func = emit(
        &module,
        &[Type::I32],
        &[Operator::V16x8LoadInterleaved3(imm(memory, 0, 4))],
    );
    let mut neon_loads = 0;
    for_each_inst(&func, |data| {
        if let InstructionData::NeonLoadMultiple { vectors, ty, .. } = data {
            neon_loads += 1;
            assert_eq!(*vectors, 3);
            assert_eq!(*ty, Type::I16X8);
        }
    });
    assert_eq!(neon_loads, 1);
}

//! Property tests over the effective-address computation and the bulk-copy
//! semantics.

use bulkhead_codegen::interp::{self, Datum, Host};
use bulkhead_codegen::intrinsics::Intrinsic;
use bulkhead_codegen::ir::{Function, Type};
use bulkhead_codegen::operators::{LoadOrStoreImm, MemoryCopyImm, Operator};
use bulkhead_codegen::{FuncEmitter, ModuleContext};
use bulkhead_environ::{MemoryIndex, MemoryPlan, MemoryType, TrapCode};
use proptest::prelude::*;
use std::str::FromStr;
use target_lexicon::Triple;

const GENERIC: &str = "riscv64gc-unknown-linux-gnu";

/// A base above 2^32 so that any sign-extension mistake in the address
/// arithmetic lands far away from `base + a + c`.
const BASE: u64 = 0x7_0000_0000;

/// A host that satisfies every access with zeroes and records the
/// addresses touched.
#[derive(Default)]
struct RecordingHost {
    reads: Vec<(u64, usize)>,
    writes: Vec<(u64, usize)>,
}

impl Host for RecordingHost {
    fn memory_base(&mut self, _memory: MemoryIndex) -> u64 {
        BASE
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), TrapCode> {
        self.reads.push((addr, buf.len()));
        buf.fill(0);
        Ok(())
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), TrapCode> {
        self.writes.push((addr, bytes.len()));
        Ok(())
    }

    fn intrinsic(
        &mut self,
        _intrinsic: Intrinsic,
        _args: &[Datum],
    ) -> Result<Option<Datum>, TrapCode> {
        Ok(Some(Datum::new(Type::I32, 0)))
    }
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

fn sandboxed_module() -> (ModuleContext, MemoryIndex) {
    let mut module = ModuleContext::new(Triple::from_str(GENERIC).unwrap(), 0);
    let memory = module.push_memory(MemoryPlan::sandboxed(MemoryType::new(1, None)), 0);
    (module, memory)
}

proptest! {
    // The effective address of every access is `base + zext(a) + zext(c)`
    // as a 64-bit unsigned sum. With addresses and offsets up to u32::MAX
    // this exercises the would-be sign-extension corner.
    #[test]
    fn load_address_is_the_unsigned_sum(address: u32, offset: u32) {
        let (module, memory) = sandboxed_module();
        let func = emit(
            &module,
            &[Type::I32],
            &[Operator::I32Load8U(LoadOrStoreImm {
                offset,
                alignment_log2: 0,
                memory_index: memory,
            })],
        );
        let mut host = RecordingHost::default();
        interp::run(&func, &mut host, &[Datum::i32(address)]).unwrap();
        prop_assert_eq!(
            host.reads,
            vec![(BASE + u64::from(address) + u64::from(offset), 1)]
        );
    }

    #[test]
    fn store_address_is_the_unsigned_sum(address: u32, offset: u32) {
        let (module, memory) = sandboxed_module();
        let func = emit(
            &module,
            &[Type::I32, Type::I32],
            &[Operator::I32Store8(LoadOrStoreImm {
                offset,
                alignment_log2: 0,
                memory_index: memory,
            })],
        );
        let mut host = RecordingHost::default();
        interp::run(&func, &mut host, &[Datum::i32(address), Datum::i32(0xee)]).unwrap();
        prop_assert_eq!(
            host.writes,
            vec![(BASE + u64::from(address) + u64::from(offset), 1)]
        );
    }

    // memory.copy with src == dst leaves the memory untouched whatever
    // the length.
    #[test]
    fn self_copy_is_a_no_op(
        bytes in proptest::collection::vec(any::<u8>(), 1..256),
        at in 0usize..256,
        n in 0usize..256,
    ) {
        let at = at % (bytes.len() + 1);
        let n = n % (bytes.len() - at + 1);

        let (module, memory) = sandboxed_module();
        let func = emit(
            &module,
            &[Type::I32, Type::I32, Type::I32],
            &[Operator::MemoryCopy(MemoryCopyImm {
                source_memory_index: memory,
                dest_memory_index: memory,
            })],
        );
        let mut host = FlatHost { bytes: bytes.clone() };
        interp::run(
            &func,
            &mut host,
            &[
                Datum::i32(at as u32),
                Datum::i32(at as u32),
                Datum::i32(n as u32),
            ],
        )
        .unwrap();
        prop_assert_eq!(host.bytes, bytes);
    }

    // For an overlapping copy with src < dst < src + n, the destination
    // region ends up equal to the original source region.
    #[test]
    fn overlapping_copy_preserves_the_source_image(
        seed in proptest::collection::vec(any::<u8>(), 64..256),
        src in 0usize..64,
        gap in 1usize..32,
        n in 33usize..64,
    ) {
        prop_assume!(gap < n);
        let dst = src + gap;
        prop_assume!(dst + n <= seed.len());

        let (module, memory) = sandboxed_module();
        let func = emit(
            &module,
            &[Type::I32, Type::I32, Type::I32],
            &[Operator::MemoryCopy(MemoryCopyImm {
                source_memory_index: memory,
                dest_memory_index: memory,
            })],
        );
        let original = seed.clone();
        let mut host = FlatHost { bytes: seed };
        interp::run(
            &func,
            &mut host,
            &[
                Datum::i32(dst as u32),
                Datum::i32(src as u32),
                Datum::i32(n as u32),
            ],
        )
        .unwrap();
        prop_assert_eq!(&host.bytes[dst..dst + n], &original[src..src + n]);
    }
}

/// A host with one memory based at address zero.
struct FlatHost {
    bytes: Vec<u8>,
}

impl Host for FlatHost {
    fn memory_base(&mut self, _memory: MemoryIndex) -> u64 {
        0
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), TrapCode> {
        let at = addr as usize;
        buf.copy_from_slice(&self.bytes[at..at + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), TrapCode> {
        let at = addr as usize;
        self.bytes[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn intrinsic(
        &mut self,
        _intrinsic: Intrinsic,
        _args: &[Datum],
    ) -> Result<Option<Datum>, TrapCode> {
        Ok(None)
    }
}

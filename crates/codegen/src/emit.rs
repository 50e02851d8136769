//! Lowering of memory operators into sandboxed instruction sequences.
//!
//! Every guest access follows the same shape: widen the 32-bit guest
//! address, add the constant offset, materialise a host pointer from the
//! memory's base slot, then perform the access with explicit flags. No
//! bounds check is emitted; the host reserves enough virtual address space
//! per memory that any zero-extended `address + offset` sum lands inside
//! the reservation, and the emitter refuses to lower accesses against a
//! memory plan that does not carry that reservation.

use crate::intrinsics::Intrinsic;
use crate::ir::{self, AtomicRmwOp, Block, FuncBuilder, Function, IntCC, MemFlags, Type, Value};
use crate::module::ModuleContext;
use crate::operators::{
    AtomicFenceImm, DataSegmentAndMemImm, DataSegmentImm, LoadOrStoreImm, MemoryCopyImm,
    MemoryImm, MemoryOrder, Operator,
};
use bulkhead_environ::MemoryIndex;
use smallvec::SmallVec;
use target_lexicon::Architecture;
use thiserror::Error;

/// A reason the current function cannot be compiled. These abort the
/// compilation before any code is emitted for the offending operator.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// `atomic.fence` with an ordering other than sequentially consistent.
    #[error("only sequentially consistent atomic orderings are supported, found {0:?}")]
    UnsupportedMemoryOrder(MemoryOrder),

    /// A memory whose plan does not reserve the full sandboxed address
    /// range. Emitting an unchecked access against such a memory would be
    /// a sandbox escape, so the lowering is refused outright.
    #[error("memory {index} reserves {reserved:#x} bytes, less than the sandboxed address range")]
    UnsandboxedMemory {
        /// The module-level memory index.
        index: u32,
        /// The reservation the plan carries.
        reserved: u64,
    },
}

/// A convenient alias for emitter results.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// How a loaded value becomes the pushed operand.
#[derive(Copy, Clone, Debug)]
enum LoadConversion {
    Identity,
    ZeroExtend,
    SignExtend,
    Splat,
}

/// Per-function emission state: the operand stack, the instruction builder,
/// and the module's compile-time context.
pub struct FuncEmitter<'a> {
    builder: FuncBuilder<'a>,
    module: &'a ModuleContext,
    stack: Vec<Value>,
}

impl<'a> FuncEmitter<'a> {
    /// Starts emitting into `func`, creating its entry block.
    pub fn new(func: &'a mut Function, module: &'a ModuleContext) -> Self {
        let mut builder = FuncBuilder::new(func);
        let entry = builder.create_block();
        builder.switch_to_block(entry);
        Self {
            builder,
            module,
            stack: Vec::new(),
        }
    }

    /// Adds a function parameter and pushes it onto the operand stack.
    pub fn declare_param(&mut self, ty: Type) -> Value {
        let entry = self.builder.func.entry_block().expect("entry block");
        let value = self.builder.append_block_param(entry, ty);
        self.stack.push(value);
        value
    }

    /// The current operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Terminates the function, returning the remaining operand stack.
    pub fn finish(mut self) {
        let args: SmallVec<[Value; 4]> = SmallVec::from_slice(&self.stack);
        self.builder.return_(&args);
    }

    fn push1(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop1(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn guest_access_flags() -> MemFlags {
        // The wasm alignment hint is not trusted: a wrong hint cannot trap,
        // so every plain access is 1-byte aligned, and volatile so the
        // backend cannot merge or elide accesses around a trapping point.
        MemFlags::new().with_volatile().with_alignment(1)
    }

    fn check_reservation(&self, memory_index: MemoryIndex) -> CodegenResult<()> {
        let plan = &self.module.memory(memory_index).plan;
        if !plan.has_sandbox_reservation() {
            return Err(CodegenError::UnsandboxedMemory {
                index: memory_index.as_u32(),
                reserved: plan.reserved_bytes,
            });
        }
        Ok(())
    }

    /// Widens a guest address to a 64-bit byte index that is inside the
    /// memory's reservation for every possible input.
    fn sandboxed_addr(&mut self, addr32: Value, offset: u32) -> Value {
        // The zero-extension is load-bearing: sign extension would turn
        // addresses with the top bit set into huge offsets from the memory
        // base, stepping outside the reserved region.
        let addr = self.builder.uextend(ir::PTR, addr32);
        if offset != 0 {
            let offset64 = self.builder.iconst(ir::PTR, u64::from(offset));
            self.builder.iadd(addr, offset64)
        } else {
            addr
        }
    }

    /// Adds the bounded index to the memory's base pointer.
    fn coerce_addr_to_pointer(&mut self, bounded: Value, memory_index: MemoryIndex) -> Value {
        let base = self.builder.memory_base(memory_index);
        self.builder.iadd(base, bounded)
    }

    fn memory_id_const(&mut self, memory_index: MemoryIndex) -> Value {
        let id = self.module.memory(memory_index).memory_id;
        self.builder.iconst(ir::PTR, id as u64)
    }

    fn instance_id_const(&mut self) -> Value {
        self.builder.iconst(ir::PTR, self.module.instance_id() as u64)
    }

    fn is_x86(&self) -> bool {
        matches!(
            self.module.architecture(),
            Architecture::X86_64 | Architecture::X86_32(_)
        )
    }

    fn is_aarch64(&self) -> bool {
        matches!(self.module.architecture(), Architecture::Aarch64(_))
    }

    //
    // Scalar and whole-vector accesses.
    //

    fn translate_load(
        &mut self,
        imm: &LoadOrStoreImm,
        mem_ty: Type,
        result_ty: Type,
        conversion: LoadConversion,
    ) -> CodegenResult<()> {
        self.check_reservation(imm.memory_index)?;
        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        let ptr = self.coerce_addr_to_pointer(bounded, imm.memory_index);
        let loaded = self.builder.load(mem_ty, Self::guest_access_flags(), ptr);
        let result = match conversion {
            LoadConversion::Identity => loaded,
            LoadConversion::ZeroExtend => self.builder.uextend(result_ty, loaded),
            LoadConversion::SignExtend => self.builder.sextend(result_ty, loaded),
            LoadConversion::Splat => self.builder.splat(result_ty, loaded),
        };
        self.push1(result);
        Ok(())
    }

    fn translate_store(&mut self, imm: &LoadOrStoreImm, mem_ty: Type) -> CodegenResult<()> {
        self.check_reservation(imm.memory_index)?;
        let value = self.pop1();
        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        let ptr = self.coerce_addr_to_pointer(bounded, imm.memory_index);
        let memory_value = self.value_to_memory(value, mem_ty);
        self.builder
            .store(Self::guest_access_flags(), memory_value, ptr);
        Ok(())
    }

    /// Converts an operand to its in-memory representation: truncation for
    /// narrower integer widths, a bitcast for same-size reinterpretation.
    fn value_to_memory(&mut self, value: Value, mem_ty: Type) -> Value {
        let value_ty = self.builder.func.value_type(value);
        if value_ty == mem_ty {
            value
        } else if mem_ty.bytes() < value_ty.bytes() {
            self.builder.ireduce(mem_ty, value)
        } else {
            self.builder.bitcast(mem_ty, value)
        }
    }

    //
    // Memory management operators: intrinsic calls carrying the memory
    // identity from the module context.
    //

    fn translate_memory_size(&mut self, imm: &MemoryImm) -> CodegenResult<()> {
        let memory_id = self.memory_id_const(imm.memory_index);
        let results = self
            .builder
            .call_intrinsic(Intrinsic::MemorySize, &[memory_id]);
        self.push1(results[0]);
        Ok(())
    }

    fn translate_memory_grow(&mut self, imm: &MemoryImm) -> CodegenResult<()> {
        let delta_pages = self.pop1();
        let memory_id = self.memory_id_const(imm.memory_index);
        let results = self
            .builder
            .call_intrinsic(Intrinsic::MemoryGrow, &[delta_pages, memory_id]);
        self.push1(results[0]);
        Ok(())
    }

    fn translate_memory_init(&mut self, imm: &DataSegmentAndMemImm) -> CodegenResult<()> {
        let num_bytes = self.pop1();
        let source_offset = self.pop1();
        let dest_address = self.pop1();
        let instance_id = self.instance_id_const();
        let memory_id = self.memory_id_const(imm.memory_index);
        let segment = self
            .builder
            .iconst(ir::PTR, u64::from(imm.data_segment_index.as_u32()));
        self.builder.call_intrinsic(
            Intrinsic::MemoryInit,
            &[
                dest_address,
                source_offset,
                num_bytes,
                instance_id,
                memory_id,
                segment,
            ],
        );
        Ok(())
    }

    fn translate_data_drop(&mut self, imm: &DataSegmentImm) -> CodegenResult<()> {
        let instance_id = self.instance_id_const();
        let segment = self
            .builder
            .iconst(ir::PTR, u64::from(imm.data_segment_index.as_u32()));
        self.builder
            .call_intrinsic(Intrinsic::DataDrop, &[instance_id, segment]);
        Ok(())
    }

    //
    // Bulk copies and fills.
    //

    /// Emits a counted byte loop. Forward loops visit `[begin, end)` with a
    /// post-increment; reverse loops visit `(end, begin]` with the
    /// decrement between the condition check and the body, so index
    /// `begin` is the last element visited.
    fn emit_loop(
        &mut self,
        outgoing: Block,
        begin: Value,
        end: Value,
        reverse: bool,
        body: impl FnOnce(&mut FuncBuilder<'_>, Value),
    ) {
        let b = &mut self.builder;
        let head = b.create_block();
        let loop_body = b.create_block();
        let index_param = b.append_block_param(head, ir::PTR);

        b.jump(head, &[if reverse { end } else { begin }]);
        b.switch_to_block(head);
        let keep_going = if reverse {
            b.icmp(IntCC::NotEqual, index_param, begin)
        } else {
            b.icmp(IntCC::UnsignedLessThan, index_param, end)
        };
        b.brif(keep_going, loop_body, &[], outgoing, &[]);

        b.switch_to_block(loop_body);
        let index = if reverse {
            let one = b.iconst(ir::PTR, 1);
            b.isub(index_param, one)
        } else {
            index_param
        };
        body(b, index);
        let next = if reverse { index } else { b.iadd_imm(index_param, 1) };
        b.jump(head, &[next]);
    }

    fn emit_memory_copy_loop(
        &mut self,
        outgoing: Block,
        source_ptr: Value,
        dest_ptr: Value,
        num_bytes: Value,
        zero: Value,
        reverse: bool,
    ) {
        self.emit_loop(outgoing, zero, num_bytes, reverse, |b, index| {
            let flags = Self::guest_access_flags();
            let from = b.iadd(source_ptr, index);
            let byte = b.load(Type::I8, flags, from);
            let to = b.iadd(dest_ptr, index);
            b.store(flags, byte, to);
        });
    }

    fn translate_memory_copy(&mut self, imm: &MemoryCopyImm) -> CodegenResult<()> {
        self.check_reservation(imm.source_memory_index)?;
        self.check_reservation(imm.dest_memory_index)?;

        let num_bytes = self.pop1();
        let source_address = self.pop1();
        let dest_address = self.pop1();

        let source_bounded = self.sandboxed_addr(source_address, 0);
        let dest_bounded = self.sandboxed_addr(dest_address, 0);
        let source_ptr = self.coerce_addr_to_pointer(source_bounded, imm.source_memory_index);
        let dest_ptr = self.coerce_addr_to_pointer(dest_bounded, imm.dest_memory_index);
        let num_bytes64 = self.builder.uextend(ir::PTR, num_bytes);
        let zero = self.builder.iconst(ir::PTR, 0);

        // The copy direction is chosen at runtime by comparing the
        // sandboxed addresses. When source and destination alias the same
        // memory and overlap with the source below the destination, a
        // forward copy would propagate already-written bytes, so that case
        // runs a reverse loop. The two addresses may target different
        // memories, where the comparison means nothing, but there overlap
        // is impossible and either direction is correct.
        let reverse_block = self.builder.create_block();
        let forward_block = self.builder.create_block();
        let join_block = self.builder.create_block();
        let source_below_dest =
            self.builder
                .icmp(IntCC::UnsignedLessThan, source_bounded, dest_bounded);
        self.builder
            .brif(source_below_dest, reverse_block, &[], forward_block, &[]);

        self.builder.switch_to_block(reverse_block);
        self.emit_memory_copy_loop(join_block, source_ptr, dest_ptr, num_bytes64, zero, true);

        self.builder.switch_to_block(forward_block);
        if self.is_x86() {
            self.builder.x86_rep_movsb(dest_ptr, source_ptr, num_bytes64);
            self.builder.jump(join_block, &[]);
        } else {
            self.emit_memory_copy_loop(join_block, source_ptr, dest_ptr, num_bytes64, zero, false);
        }

        self.builder.switch_to_block(join_block);
        Ok(())
    }

    fn translate_memory_fill(&mut self, imm: &MemoryImm) -> CodegenResult<()> {
        self.check_reservation(imm.memory_index)?;

        let num_bytes = self.pop1();
        let value = self.pop1();
        let dest_address = self.pop1();

        let dest_bounded = self.sandboxed_addr(dest_address, 0);
        let dest_ptr = self.coerce_addr_to_pointer(dest_bounded, imm.memory_index);
        let num_bytes64 = self.builder.uextend(ir::PTR, num_bytes);
        let value_i8 = self.builder.ireduce(Type::I8, value);

        if self.is_x86() {
            self.builder.x86_rep_stosb(dest_ptr, value_i8, num_bytes64);
        } else {
            let zero = self.builder.iconst(ir::PTR, 0);
            let end_block = self.builder.create_block();
            self.emit_loop(end_block, zero, num_bytes64, false, |b, index| {
                let to = b.iadd(dest_ptr, index);
                b.store(Self::guest_access_flags(), value_i8, to);
            });
            self.builder.switch_to_block(end_block);
        }
        Ok(())
    }

    //
    // Interleaved multi-vector accesses.
    //

    fn translate_load_interleaved(
        &mut self,
        imm: &LoadOrStoreImm,
        ty: Type,
        num_vectors: u8,
    ) -> CodegenResult<()> {
        self.check_reservation(imm.memory_index)?;
        let num_lanes = ty.lane_count();

        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        let ptr = self.coerce_addr_to_pointer(bounded, imm.memory_index);

        if self.is_aarch64() {
            let results = self.builder.neon_load_multiple(num_vectors, ty, ptr);
            for result in results {
                self.push1(result);
            }
        } else {
            let flags = Self::guest_access_flags();
            let mut loads: SmallVec<[Value; 4]> = SmallVec::new();
            for vector_index in 0..num_vectors {
                let vector_ptr = self
                    .builder
                    .iadd_imm(ptr, u64::from(vector_index) * u64::from(ty.bytes()));
                loads.push(self.builder.load(ty, flags, vector_ptr));
            }
            for vector_index in 0..num_vectors {
                let zero = self.builder.iconst(ty.lane_type(), 0);
                let mut deinterleaved = self.builder.splat(ty, zero);
                for lane in 0..num_lanes {
                    let interleaved_element =
                        u32::from(lane) * u32::from(num_vectors) + u32::from(vector_index);
                    let scalar = self.builder.extractlane(
                        loads[(interleaved_element / u32::from(num_lanes)) as usize],
                        (interleaved_element % u32::from(num_lanes)) as u8,
                    );
                    deinterleaved = self.builder.insertlane(deinterleaved, scalar, lane);
                }
                self.push1(deinterleaved);
            }
        }
        Ok(())
    }

    fn translate_store_interleaved(
        &mut self,
        imm: &LoadOrStoreImm,
        ty: Type,
        num_vectors: u8,
    ) -> CodegenResult<()> {
        self.check_reservation(imm.memory_index)?;
        let num_lanes = ty.lane_count();

        // The operand stack order reverses against memory order: the last
        // value popped is the first vector stored.
        let mut values: SmallVec<[Value; 4]> = SmallVec::new();
        for _ in 0..num_vectors {
            let value = self.pop1();
            values.push(self.value_to_memory(value, ty));
        }
        values.reverse();

        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        let ptr = self.coerce_addr_to_pointer(bounded, imm.memory_index);

        if self.is_aarch64() {
            self.builder.neon_store_multiple(ptr, &values);
        } else {
            let flags = Self::guest_access_flags();
            for out_index in 0..num_vectors {
                let zero = self.builder.iconst(ty.lane_type(), 0);
                let mut interleaved = self.builder.splat(ty, zero);
                for lane in 0..num_lanes {
                    let interleaved_element =
                        u32::from(out_index) * u32::from(num_lanes) + u32::from(lane);
                    let scalar = self.builder.extractlane(
                        values[(interleaved_element % u32::from(num_vectors)) as usize],
                        (interleaved_element / u32::from(num_vectors)) as u8,
                    );
                    interleaved = self.builder.insertlane(interleaved, scalar, lane);
                }
                let vector_ptr = self
                    .builder
                    .iadd_imm(ptr, u64::from(out_index) * u64::from(ty.bytes()));
                self.builder.store(flags, interleaved, vector_ptr);
            }
        }
        Ok(())
    }

    //
    // Atomics. Always sequentially consistent, always preceded by an
    // alignment trap check on the bounded address.
    //

    fn atomic_access_flags(imm: &LoadOrStoreImm) -> MemFlags {
        MemFlags::new()
            .with_volatile()
            .with_alignment(1u8 << imm.alignment_log2)
    }

    /// Calls the misaligned-atomic trap intrinsic when the low bits of the
    /// bounded address are non-zero.
    fn trap_if_misaligned_atomic(&mut self, bounded: Value, alignment_log2: u8) {
        if alignment_log2 == 0 {
            return;
        }
        let mask = (1u64 << alignment_log2) - 1;
        let low_bits = self.builder.band_imm(bounded, mask);
        let misaligned = self.builder.icmp_imm(IntCC::NotEqual, low_bits, 0);

        let trap_block = self.builder.create_block();
        let continue_block = self.builder.create_block();
        self.builder
            .brif(misaligned, trap_block, &[], continue_block, &[]);
        self.builder.switch_to_block(trap_block);
        self.builder
            .call_intrinsic(Intrinsic::MisalignedAtomicTrap, &[bounded]);
        self.builder.unreachable();
        self.builder.switch_to_block(continue_block);
    }

    fn natural_alignment_log2(ty: Type) -> u8 {
        ty.bytes().trailing_zeros() as u8
    }

    /// Widens a memory-width value back to the operand type.
    fn memory_to_value(&mut self, value: Value, result_ty: Type) -> Value {
        if self.builder.func.value_type(value) == result_ty {
            value
        } else {
            self.builder.uextend(result_ty, value)
        }
    }

    fn prepare_atomic_addr(&mut self, imm: &LoadOrStoreImm, access_ty: Type) -> CodegenResult<Value> {
        self.check_reservation(imm.memory_index)?;
        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        self.trap_if_misaligned_atomic(bounded, Self::natural_alignment_log2(access_ty));
        Ok(self.coerce_addr_to_pointer(bounded, imm.memory_index))
    }

    fn translate_atomic_load(
        &mut self,
        imm: &LoadOrStoreImm,
        access_ty: Type,
        result_ty: Type,
    ) -> CodegenResult<()> {
        let ptr = self.prepare_atomic_addr(imm, access_ty)?;
        let loaded = self
            .builder
            .atomic_load(access_ty, Self::atomic_access_flags(imm), ptr);
        let result = self.memory_to_value(loaded, result_ty);
        self.push1(result);
        Ok(())
    }

    fn translate_atomic_store(
        &mut self,
        imm: &LoadOrStoreImm,
        access_ty: Type,
    ) -> CodegenResult<()> {
        let value = self.pop1();
        let memory_value = self.value_to_memory(value, access_ty);
        let ptr = self.prepare_atomic_addr(imm, access_ty)?;
        self.builder
            .atomic_store(Self::atomic_access_flags(imm), memory_value, ptr);
        Ok(())
    }

    fn translate_atomic_rmw(
        &mut self,
        imm: &LoadOrStoreImm,
        result_ty: Type,
        access_ty: Type,
        op: AtomicRmwOp,
    ) -> CodegenResult<()> {
        let value = self.pop1();
        let operand = self.value_to_memory(value, access_ty);
        let ptr = self.prepare_atomic_addr(imm, access_ty)?;
        let previous = self.builder.atomic_rmw(
            op,
            access_ty,
            Self::atomic_access_flags(imm),
            ptr,
            operand,
        );
        let result = self.memory_to_value(previous, result_ty);
        self.push1(result);
        Ok(())
    }

    fn translate_atomic_cas(
        &mut self,
        imm: &LoadOrStoreImm,
        result_ty: Type,
        access_ty: Type,
    ) -> CodegenResult<()> {
        let replacement = self.pop1();
        let replacement = self.value_to_memory(replacement, access_ty);
        let expected = self.pop1();
        let expected = self.value_to_memory(expected, access_ty);
        let ptr = self.prepare_atomic_addr(imm, access_ty)?;
        let previous = self.builder.atomic_cas(
            access_ty,
            Self::atomic_access_flags(imm),
            ptr,
            expected,
            replacement,
        );
        let result = self.memory_to_value(previous, result_ty);
        self.push1(result);
        Ok(())
    }

    fn translate_atomic_notify(&mut self, imm: &LoadOrStoreImm) -> CodegenResult<()> {
        let num_waiters = self.pop1();
        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        self.trap_if_misaligned_atomic(bounded, imm.alignment_log2);
        let memory_id = self.memory_id_const(imm.memory_index);
        // The intrinsic receives the raw guest address; it re-derives the
        // host location itself and performs its own bounds check.
        let results = self
            .builder
            .call_intrinsic(Intrinsic::AtomicNotify, &[addr32, num_waiters, memory_id]);
        self.push1(results[0]);
        Ok(())
    }

    fn translate_atomic_wait(
        &mut self,
        imm: &LoadOrStoreImm,
        intrinsic: Intrinsic,
    ) -> CodegenResult<()> {
        let timeout = self.pop1();
        let expected = self.pop1();
        let addr32 = self.pop1();
        let bounded = self.sandboxed_addr(addr32, imm.offset);
        self.trap_if_misaligned_atomic(bounded, imm.alignment_log2);
        let memory_id = self.memory_id_const(imm.memory_index);
        let results = self
            .builder
            .call_intrinsic(intrinsic, &[addr32, expected, timeout, memory_id]);
        self.push1(results[0]);
        Ok(())
    }

    fn translate_atomic_fence(&mut self, imm: &AtomicFenceImm) -> CodegenResult<()> {
        match imm.order {
            MemoryOrder::SequentiallyConsistent => {
                self.builder.fence();
                Ok(())
            }
            other => Err(CodegenError::UnsupportedMemoryOrder(other)),
        }
    }

    /// Lowers one decoded operator.
    pub fn translate_operator(&mut self, op: &Operator) -> CodegenResult<()> {
        log::trace!("translating {op:?}");
        use LoadConversion::{Identity, SignExtend, Splat, ZeroExtend};
        use Type::{
            F32, F64, I16, I16X4, I16X8, I32, I32X2, I32X4, I64, I64X2, I8, I8X16, I8X8,
        };

        match op {
            // Scalar loads.
            Operator::I32Load(imm) => self.translate_load(imm, I32, I32, Identity),
            Operator::I64Load(imm) => self.translate_load(imm, I64, I64, Identity),
            Operator::F32Load(imm) => self.translate_load(imm, F32, F32, Identity),
            Operator::F64Load(imm) => self.translate_load(imm, F64, F64, Identity),
            Operator::I32Load8S(imm) => self.translate_load(imm, I8, I32, SignExtend),
            Operator::I32Load8U(imm) => self.translate_load(imm, I8, I32, ZeroExtend),
            Operator::I32Load16S(imm) => self.translate_load(imm, I16, I32, SignExtend),
            Operator::I32Load16U(imm) => self.translate_load(imm, I16, I32, ZeroExtend),
            Operator::I64Load8S(imm) => self.translate_load(imm, I8, I64, SignExtend),
            Operator::I64Load8U(imm) => self.translate_load(imm, I8, I64, ZeroExtend),
            Operator::I64Load16S(imm) => self.translate_load(imm, I16, I64, SignExtend),
            Operator::I64Load16U(imm) => self.translate_load(imm, I16, I64, ZeroExtend),
            Operator::I64Load32S(imm) => self.translate_load(imm, I32, I64, SignExtend),
            Operator::I64Load32U(imm) => self.translate_load(imm, I32, I64, ZeroExtend),

            // Scalar stores.
            Operator::I32Store(imm) => self.translate_store(imm, I32),
            Operator::I64Store(imm) => self.translate_store(imm, I64),
            Operator::F32Store(imm) => self.translate_store(imm, F32),
            Operator::F64Store(imm) => self.translate_store(imm, F64),
            Operator::I32Store8(imm) | Operator::I64Store8(imm) => self.translate_store(imm, I8),
            Operator::I32Store16(imm) | Operator::I64Store16(imm) => {
                self.translate_store(imm, I16)
            }
            Operator::I64Store32(imm) => self.translate_store(imm, I32),

            // Whole-vector accesses.
            Operator::V128Load(imm) => self.translate_load(imm, I8X16, I8X16, Identity),
            Operator::V128Store(imm) => self.translate_store(imm, I8X16),

            // Splatting loads.
            Operator::V8x16LoadSplat(imm) => self.translate_load(imm, I8, I8X16, Splat),
            Operator::V16x8LoadSplat(imm) => self.translate_load(imm, I16, I16X8, Splat),
            Operator::V32x4LoadSplat(imm) => self.translate_load(imm, I32, I32X4, Splat),
            Operator::V64x2LoadSplat(imm) => self.translate_load(imm, I64, I64X2, Splat),

            // Widening loads.
            Operator::I16x8Load8x8S(imm) => self.translate_load(imm, I8X8, I16X8, SignExtend),
            Operator::I16x8Load8x8U(imm) => self.translate_load(imm, I8X8, I16X8, ZeroExtend),
            Operator::I32x4Load16x4S(imm) => self.translate_load(imm, I16X4, I32X4, SignExtend),
            Operator::I32x4Load16x4U(imm) => self.translate_load(imm, I16X4, I32X4, ZeroExtend),
            Operator::I64x2Load32x2S(imm) => self.translate_load(imm, I32X2, I64X2, SignExtend),
            Operator::I64x2Load32x2U(imm) => self.translate_load(imm, I32X2, I64X2, ZeroExtend),

            // Memory management and bulk operations.
            Operator::MemorySize(imm) => self.translate_memory_size(imm),
            Operator::MemoryGrow(imm) => self.translate_memory_grow(imm),
            Operator::MemoryCopy(imm) => self.translate_memory_copy(imm),
            Operator::MemoryFill(imm) => self.translate_memory_fill(imm),
            Operator::MemoryInit(imm) => self.translate_memory_init(imm),
            Operator::DataDrop(imm) => self.translate_data_drop(imm),

            // Interleaved multi-vector loads.
            Operator::V8x16LoadInterleaved2(imm) => self.translate_load_interleaved(imm, I8X16, 2),
            Operator::V8x16LoadInterleaved3(imm) => self.translate_load_interleaved(imm, I8X16, 3),
            Operator::V8x16LoadInterleaved4(imm) => self.translate_load_interleaved(imm, I8X16, 4),
            Operator::V16x8LoadInterleaved2(imm) => self.translate_load_interleaved(imm, I16X8, 2),
            Operator::V16x8LoadInterleaved3(imm) => self.translate_load_interleaved(imm, I16X8, 3),
            Operator::V16x8LoadInterleaved4(imm) => self.translate_load_interleaved(imm, I16X8, 4),
            Operator::V32x4LoadInterleaved2(imm) => self.translate_load_interleaved(imm, I32X4, 2),
            Operator::V32x4LoadInterleaved3(imm) => self.translate_load_interleaved(imm, I32X4, 3),
            Operator::V32x4LoadInterleaved4(imm) => self.translate_load_interleaved(imm, I32X4, 4),
            Operator::V64x2LoadInterleaved2(imm) => self.translate_load_interleaved(imm, I64X2, 2),
            Operator::V64x2LoadInterleaved3(imm) => self.translate_load_interleaved(imm, I64X2, 3),
            Operator::V64x2LoadInterleaved4(imm) => self.translate_load_interleaved(imm, I64X2, 4),

            // Interleaved multi-vector stores.
            Operator::V8x16StoreInterleaved2(imm) => {
                self.translate_store_interleaved(imm, I8X16, 2)
            }
            Operator::V8x16StoreInterleaved3(imm) => {
                self.translate_store_interleaved(imm, I8X16, 3)
            }
            Operator::V8x16StoreInterleaved4(imm) => {
                self.translate_store_interleaved(imm, I8X16, 4)
            }
            Operator::V16x8StoreInterleaved2(imm) => {
                self.translate_store_interleaved(imm, I16X8, 2)
            }
            Operator::V16x8StoreInterleaved3(imm) => {
                self.translate_store_interleaved(imm, I16X8, 3)
            }
            Operator::V16x8StoreInterleaved4(imm) => {
                self.translate_store_interleaved(imm, I16X8, 4)
            }
            Operator::V32x4StoreInterleaved2(imm) => {
                self.translate_store_interleaved(imm, I32X4, 2)
            }
            Operator::V32x4StoreInterleaved3(imm) => {
                self.translate_store_interleaved(imm, I32X4, 3)
            }
            Operator::V32x4StoreInterleaved4(imm) => {
                self.translate_store_interleaved(imm, I32X4, 4)
            }
            Operator::V64x2StoreInterleaved2(imm) => {
                self.translate_store_interleaved(imm, I64X2, 2)
            }
            Operator::V64x2StoreInterleaved3(imm) => {
                self.translate_store_interleaved(imm, I64X2, 3)
            }
            Operator::V64x2StoreInterleaved4(imm) => {
                self.translate_store_interleaved(imm, I64X2, 4)
            }

            // Wait, notify, fence.
            Operator::MemoryAtomicNotify(imm) => self.translate_atomic_notify(imm),
            Operator::MemoryAtomicWait32(imm) => {
                self.translate_atomic_wait(imm, Intrinsic::AtomicWaitI32)
            }
            Operator::MemoryAtomicWait64(imm) => {
                self.translate_atomic_wait(imm, Intrinsic::AtomicWaitI64)
            }
            Operator::AtomicFence(imm) => self.translate_atomic_fence(imm),

            // Atomic loads.
            Operator::I32AtomicLoad(imm) => self.translate_atomic_load(imm, I32, I32),
            Operator::I64AtomicLoad(imm) => self.translate_atomic_load(imm, I64, I64),
            Operator::I32AtomicLoad8U(imm) => self.translate_atomic_load(imm, I8, I32),
            Operator::I32AtomicLoad16U(imm) => self.translate_atomic_load(imm, I16, I32),
            Operator::I64AtomicLoad8U(imm) => self.translate_atomic_load(imm, I8, I64),
            Operator::I64AtomicLoad16U(imm) => self.translate_atomic_load(imm, I16, I64),
            Operator::I64AtomicLoad32U(imm) => self.translate_atomic_load(imm, I32, I64),

            // Atomic stores.
            Operator::I32AtomicStore(imm) => self.translate_atomic_store(imm, I32),
            Operator::I64AtomicStore(imm) => self.translate_atomic_store(imm, I64),
            Operator::I32AtomicStore8(imm) | Operator::I64AtomicStore8(imm) => {
                self.translate_atomic_store(imm, I8)
            }
            Operator::I32AtomicStore16(imm) | Operator::I64AtomicStore16(imm) => {
                self.translate_atomic_store(imm, I16)
            }
            Operator::I64AtomicStore32(imm) => self.translate_atomic_store(imm, I32),

            // Atomic read-modify-writes.
            Operator::I32AtomicRmwAdd(imm) => {
                self.translate_atomic_rmw(imm, I32, I32, AtomicRmwOp::Add)
            }
            Operator::I64AtomicRmwAdd(imm) => {
                self.translate_atomic_rmw(imm, I64, I64, AtomicRmwOp::Add)
            }
            Operator::I32AtomicRmw8AddU(imm) => {
                self.translate_atomic_rmw(imm, I32, I8, AtomicRmwOp::Add)
            }
            Operator::I32AtomicRmw16AddU(imm) => {
                self.translate_atomic_rmw(imm, I32, I16, AtomicRmwOp::Add)
            }
            Operator::I64AtomicRmw8AddU(imm) => {
                self.translate_atomic_rmw(imm, I64, I8, AtomicRmwOp::Add)
            }
            Operator::I64AtomicRmw16AddU(imm) => {
                self.translate_atomic_rmw(imm, I64, I16, AtomicRmwOp::Add)
            }
            Operator::I64AtomicRmw32AddU(imm) => {
                self.translate_atomic_rmw(imm, I64, I32, AtomicRmwOp::Add)
            }
            Operator::I32AtomicRmwSub(imm) => {
                self.translate_atomic_rmw(imm, I32, I32, AtomicRmwOp::Sub)
            }
            Operator::I64AtomicRmwSub(imm) => {
                self.translate_atomic_rmw(imm, I64, I64, AtomicRmwOp::Sub)
            }
            Operator::I32AtomicRmw8SubU(imm) => {
                self.translate_atomic_rmw(imm, I32, I8, AtomicRmwOp::Sub)
            }
            Operator::I32AtomicRmw16SubU(imm) => {
                self.translate_atomic_rmw(imm, I32, I16, AtomicRmwOp::Sub)
            }
            Operator::I64AtomicRmw8SubU(imm) => {
                self.translate_atomic_rmw(imm, I64, I8, AtomicRmwOp::Sub)
            }
            Operator::I64AtomicRmw16SubU(imm) => {
                self.translate_atomic_rmw(imm, I64, I16, AtomicRmwOp::Sub)
            }
            Operator::I64AtomicRmw32SubU(imm) => {
                self.translate_atomic_rmw(imm, I64, I32, AtomicRmwOp::Sub)
            }
            Operator::I32AtomicRmwAnd(imm) => {
                self.translate_atomic_rmw(imm, I32, I32, AtomicRmwOp::And)
            }
            Operator::I64AtomicRmwAnd(imm) => {
                self.translate_atomic_rmw(imm, I64, I64, AtomicRmwOp::And)
            }
            Operator::I32AtomicRmw8AndU(imm) => {
                self.translate_atomic_rmw(imm, I32, I8, AtomicRmwOp::And)
            }
            Operator::I32AtomicRmw16AndU(imm) => {
                self.translate_atomic_rmw(imm, I32, I16, AtomicRmwOp::And)
            }
            Operator::I64AtomicRmw8AndU(imm) => {
                self.translate_atomic_rmw(imm, I64, I8, AtomicRmwOp::And)
            }
            Operator::I64AtomicRmw16AndU(imm) => {
                self.translate_atomic_rmw(imm, I64, I16, AtomicRmwOp::And)
            }
            Operator::I64AtomicRmw32AndU(imm) => {
                self.translate_atomic_rmw(imm, I64, I32, AtomicRmwOp::And)
            }
            Operator::I32AtomicRmwOr(imm) => {
                self.translate_atomic_rmw(imm, I32, I32, AtomicRmwOp::Or)
            }
            Operator::I64AtomicRmwOr(imm) => {
                self.translate_atomic_rmw(imm, I64, I64, AtomicRmwOp::Or)
            }
            Operator::I32AtomicRmw8OrU(imm) => {
                self.translate_atomic_rmw(imm, I32, I8, AtomicRmwOp::Or)
            }
            Operator::I32AtomicRmw16OrU(imm) => {
                self.translate_atomic_rmw(imm, I32, I16, AtomicRmwOp::Or)
            }
            Operator::I64AtomicRmw8OrU(imm) => {
                self.translate_atomic_rmw(imm, I64, I8, AtomicRmwOp::Or)
            }
            Operator::I64AtomicRmw16OrU(imm) => {
                self.translate_atomic_rmw(imm, I64, I16, AtomicRmwOp::Or)
            }
            Operator::I64AtomicRmw32OrU(imm) => {
                self.translate_atomic_rmw(imm, I64, I32, AtomicRmwOp::Or)
            }
            Operator::I32AtomicRmwXor(imm) => {
                self.translate_atomic_rmw(imm, I32, I32, AtomicRmwOp::Xor)
            }
            Operator::I64AtomicRmwXor(imm) => {
                self.translate_atomic_rmw(imm, I64, I64, AtomicRmwOp::Xor)
            }
            Operator::I32AtomicRmw8XorU(imm) => {
                self.translate_atomic_rmw(imm, I32, I8, AtomicRmwOp::Xor)
            }
            Operator::I32AtomicRmw16XorU(imm) => {
                self.translate_atomic_rmw(imm, I32, I16, AtomicRmwOp::Xor)
            }
            Operator::I64AtomicRmw8XorU(imm) => {
                self.translate_atomic_rmw(imm, I64, I8, AtomicRmwOp::Xor)
            }
            Operator::I64AtomicRmw16XorU(imm) => {
                self.translate_atomic_rmw(imm, I64, I16, AtomicRmwOp::Xor)
            }
            Operator::I64AtomicRmw32XorU(imm) => {
                self.translate_atomic_rmw(imm, I64, I32, AtomicRmwOp::Xor)
            }
            Operator::I32AtomicRmwXchg(imm) => {
                self.translate_atomic_rmw(imm, I32, I32, AtomicRmwOp::Xchg)
            }
            Operator::I64AtomicRmwXchg(imm) => {
                self.translate_atomic_rmw(imm, I64, I64, AtomicRmwOp::Xchg)
            }
            Operator::I32AtomicRmw8XchgU(imm) => {
                self.translate_atomic_rmw(imm, I32, I8, AtomicRmwOp::Xchg)
            }
            Operator::I32AtomicRmw16XchgU(imm) => {
                self.translate_atomic_rmw(imm, I32, I16, AtomicRmwOp::Xchg)
            }
            Operator::I64AtomicRmw8XchgU(imm) => {
                self.translate_atomic_rmw(imm, I64, I8, AtomicRmwOp::Xchg)
            }
            Operator::I64AtomicRmw16XchgU(imm) => {
                self.translate_atomic_rmw(imm, I64, I16, AtomicRmwOp::Xchg)
            }
            Operator::I64AtomicRmw32XchgU(imm) => {
                self.translate_atomic_rmw(imm, I64, I32, AtomicRmwOp::Xchg)
            }

            // Atomic compare-exchanges.
            Operator::I32AtomicRmwCmpxchg(imm) => self.translate_atomic_cas(imm, I32, I32),
            Operator::I64AtomicRmwCmpxchg(imm) => self.translate_atomic_cas(imm, I64, I64),
            Operator::I32AtomicRmw8CmpxchgU(imm) => self.translate_atomic_cas(imm, I32, I8),
            Operator::I32AtomicRmw16CmpxchgU(imm) => self.translate_atomic_cas(imm, I32, I16),
            Operator::I64AtomicRmw8CmpxchgU(imm) => self.translate_atomic_cas(imm, I64, I8),
            Operator::I64AtomicRmw16CmpxchgU(imm) => self.translate_atomic_cas(imm, I64, I16),
            Operator::I64AtomicRmw32CmpxchgU(imm) => self.translate_atomic_cas(imm, I64, I32),
        }
    }
}

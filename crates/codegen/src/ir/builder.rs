//! Appends instructions to an in-progress function.

use super::{
    AtomicRmwOp, BinaryOp, Block, Function, InstructionData, IntCC, MemFlags, Type, UnaryOp, Value,
};
use crate::intrinsics::Intrinsic;
use bulkhead_environ::MemoryIndex;
use smallvec::SmallVec;

/// A builder positioned at the end of one block of a [`Function`].
///
/// Unlike a general-purpose SSA builder there is no variable tracking here:
/// the emitter threads values explicitly, and loop-carried values are block
/// parameters.
pub struct FuncBuilder<'f> {
    /// The function under construction.
    pub func: &'f mut Function,
    current: Option<Block>,
    filled: Vec<bool>,
}

impl<'f> FuncBuilder<'f> {
    /// Creates a builder over `func` with no current block.
    pub fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            current: None,
            filled: Vec::new(),
        }
    }

    /// Creates a new empty block.
    pub fn create_block(&mut self) -> Block {
        let block = self.func.make_block();
        if self.func.entry.is_none() {
            self.func.entry = Some(block);
        }
        self.filled.resize(self.func.blocks.len(), false);
        block
    }

    /// Appends a parameter of type `ty` to `block`.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        self.func.make_block_param(block, ty)
    }

    /// Makes `block` the insertion point. The block must not already be
    /// terminated.
    pub fn switch_to_block(&mut self, block: Block) {
        assert!(
            !self.filled[block.as_u32() as usize],
            "cannot append to a terminated block"
        );
        self.current = Some(block);
    }

    /// The current insertion block.
    pub fn current_block(&self) -> Block {
        self.current.expect("no current block")
    }

    fn push(&mut self, data: InstructionData, result_types: &[Type]) -> SmallVec<[Value; 2]> {
        let block = self.current_block();
        assert!(
            !self.filled[block.as_u32() as usize],
            "cannot append past a terminator"
        );
        let terminator = data.is_terminator();
        let (_inst, results) = self.func.make_inst(block, data, result_types);
        if terminator {
            self.filled[block.as_u32() as usize] = true;
            self.current = None;
        }
        results
    }

    fn push_single(&mut self, data: InstructionData, ty: Type) -> Value {
        self.push(data, &[ty])[0]
    }

    fn push_void(&mut self, data: InstructionData) {
        self.push(data, &[]);
    }

    /// An integer constant of type `ty`.
    pub fn iconst(&mut self, ty: Type, imm: u64) -> Value {
        self.push_single(InstructionData::Iconst { ty, imm }, ty)
    }

    fn unary(&mut self, op: UnaryOp, ty: Type, arg: Value) -> Value {
        self.push_single(InstructionData::Unary { op, ty, arg }, ty)
    }

    /// Zero-extends `arg` to `ty`.
    pub fn uextend(&mut self, ty: Type, arg: Value) -> Value {
        self.unary(UnaryOp::Uextend, ty, arg)
    }

    /// Sign-extends `arg` to `ty`.
    pub fn sextend(&mut self, ty: Type, arg: Value) -> Value {
        self.unary(UnaryOp::Sextend, ty, arg)
    }

    /// Truncates `arg` to the narrower integer type `ty`.
    pub fn ireduce(&mut self, ty: Type, arg: Value) -> Value {
        self.unary(UnaryOp::Ireduce, ty, arg)
    }

    /// Reinterprets `arg`'s bits as `ty`.
    pub fn bitcast(&mut self, ty: Type, arg: Value) -> Value {
        self.unary(UnaryOp::Bitcast, ty, arg)
    }

    /// Replicates the scalar `arg` into every lane of the vector type `ty`.
    pub fn splat(&mut self, ty: Type, arg: Value) -> Value {
        self.unary(UnaryOp::Splat, ty, arg)
    }

    fn binary(&mut self, op: BinaryOp, a: Value, b: Value) -> Value {
        let ty = self.func.value_type(a);
        debug_assert_eq!(ty, self.func.value_type(b));
        self.push_single(InstructionData::Binary { op, args: [a, b] }, ty)
    }

    /// Wrapping integer addition.
    pub fn iadd(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinaryOp::Iadd, a, b)
    }

    /// Wrapping integer subtraction.
    pub fn isub(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinaryOp::Isub, a, b)
    }

    /// Bitwise and.
    pub fn band(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinaryOp::Band, a, b)
    }

    /// Adds a constant to `a`.
    pub fn iadd_imm(&mut self, a: Value, imm: u64) -> Value {
        let ty = self.func.value_type(a);
        let c = self.iconst(ty, imm);
        self.iadd(a, c)
    }

    /// Masks `a` with a constant.
    pub fn band_imm(&mut self, a: Value, imm: u64) -> Value {
        let ty = self.func.value_type(a);
        let c = self.iconst(ty, imm);
        self.band(a, c)
    }

    /// Compares `a` and `b`, producing an `i8` boolean.
    pub fn icmp(&mut self, cond: IntCC, a: Value, b: Value) -> Value {
        self.push_single(InstructionData::Icmp { cond, args: [a, b] }, Type::I8)
    }

    /// Compares `a` against a constant.
    pub fn icmp_imm(&mut self, cond: IntCC, a: Value, imm: u64) -> Value {
        let ty = self.func.value_type(a);
        let c = self.iconst(ty, imm);
        self.icmp(cond, a, c)
    }

    /// The base address of the memory bound at `memory`.
    pub fn memory_base(&mut self, memory: MemoryIndex) -> Value {
        self.push_single(InstructionData::MemoryBase { memory }, super::PTR)
    }

    /// A load of `ty` from `addr`.
    pub fn load(&mut self, ty: Type, flags: MemFlags, addr: Value) -> Value {
        self.push_single(InstructionData::Load { ty, flags, addr }, ty)
    }

    /// A store of `value` to `addr`.
    pub fn store(&mut self, flags: MemFlags, value: Value, addr: Value) {
        self.push_void(InstructionData::Store { flags, value, addr });
    }

    /// A sequentially-consistent atomic load of `ty` from `addr`.
    pub fn atomic_load(&mut self, ty: Type, flags: MemFlags, addr: Value) -> Value {
        self.push_single(InstructionData::AtomicLoad { ty, flags, addr }, ty)
    }

    /// A sequentially-consistent atomic store of `value` to `addr`.
    pub fn atomic_store(&mut self, flags: MemFlags, value: Value, addr: Value) {
        self.push_void(InstructionData::AtomicStore { flags, value, addr });
    }

    /// A sequentially-consistent atomic read-modify-write at `addr`,
    /// returning the previous value.
    pub fn atomic_rmw(
        &mut self,
        op: AtomicRmwOp,
        ty: Type,
        flags: MemFlags,
        addr: Value,
        value: Value,
    ) -> Value {
        self.push_single(
            InstructionData::AtomicRmw {
                op,
                ty,
                flags,
                addr,
                value,
            },
            ty,
        )
    }

    /// A strong sequentially-consistent compare-exchange at `addr`,
    /// returning the previous value.
    pub fn atomic_cas(
        &mut self,
        ty: Type,
        flags: MemFlags,
        addr: Value,
        expected: Value,
        replacement: Value,
    ) -> Value {
        self.push_single(
            InstructionData::AtomicCas {
                ty,
                flags,
                addr,
                expected,
                replacement,
            },
            ty,
        )
    }

    /// A sequentially-consistent fence.
    pub fn fence(&mut self) {
        self.push_void(InstructionData::Fence);
    }

    /// Extracts lane `lane` of the vector `arg`.
    pub fn extractlane(&mut self, arg: Value, lane: u8) -> Value {
        let lane_ty = self.func.value_type(arg).lane_type();
        self.push_single(InstructionData::ExtractLane { lane, arg }, lane_ty)
    }

    /// Inserts the scalar `value` into lane `lane` of `vector`.
    pub fn insertlane(&mut self, vector: Value, value: Value, lane: u8) -> Value {
        let ty = self.func.value_type(vector);
        self.push_single(
            InstructionData::InsertLane {
                lane,
                args: [vector, value],
            },
            ty,
        )
    }

    /// Calls a runtime intrinsic.
    pub fn call_intrinsic(&mut self, intrinsic: Intrinsic, args: &[Value]) -> SmallVec<[Value; 2]> {
        let sig = intrinsic.signature();
        debug_assert_eq!(args.len(), sig.params.len());
        let result_types: SmallVec<[Type; 1]> = sig.result.into_iter().collect();
        self.push(
            InstructionData::CallIntrinsic {
                intrinsic,
                args: SmallVec::from_slice(args),
            },
            &result_types,
        )
    }

    /// The x86 forward byte copy.
    pub fn x86_rep_movsb(&mut self, dst: Value, src: Value, len: Value) {
        self.push_void(InstructionData::X86RepMovsb {
            args: [dst, src, len],
        });
    }

    /// The x86 byte fill.
    pub fn x86_rep_stosb(&mut self, dst: Value, byte: Value, len: Value) {
        self.push_void(InstructionData::X86RepStosb {
            args: [dst, byte, len],
        });
    }

    /// The aarch64 deinterleaving load of `vectors` vectors of `ty`.
    pub fn neon_load_multiple(
        &mut self,
        vectors: u8,
        ty: Type,
        addr: Value,
    ) -> SmallVec<[Value; 2]> {
        debug_assert!((2..=4).contains(&vectors));
        let result_types: SmallVec<[Type; 4]> = (0..vectors).map(|_| ty).collect();
        self.push(
            InstructionData::NeonLoadMultiple { vectors, ty, addr },
            &result_types,
        )
    }

    /// The aarch64 interleaving store of `values`.
    pub fn neon_store_multiple(&mut self, addr: Value, values: &[Value]) {
        debug_assert!((2..=4).contains(&values.len()));
        self.push_void(InstructionData::NeonStoreMultiple {
            vectors: values.len() as u8,
            addr,
            args: SmallVec::from_slice(values),
        });
    }

    /// An unconditional branch to `destination`.
    pub fn jump(&mut self, destination: Block, args: &[Value]) {
        self.push_void(InstructionData::Jump {
            destination,
            args: SmallVec::from_slice(args),
        });
    }

    /// A conditional branch on the `i8` boolean `cond`.
    pub fn brif(
        &mut self,
        cond: Value,
        then_dest: Block,
        then_args: &[Value],
        else_dest: Block,
        else_args: &[Value],
    ) {
        self.push_void(InstructionData::Brif {
            cond,
            then_dest,
            then_args: SmallVec::from_slice(then_args),
            else_dest,
            else_args: SmallVec::from_slice(else_args),
        });
    }

    /// Returns from the function.
    pub fn return_(&mut self, args: &[Value]) {
        self.push_void(InstructionData::Return {
            args: SmallVec::from_slice(args),
        });
    }

    /// Marks the current point unreachable.
    pub fn unreachable(&mut self) {
        self.push_void(InstructionData::Unreachable);
    }
}

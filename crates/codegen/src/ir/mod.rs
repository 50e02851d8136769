//! The intermediate representation the memory-operation emitter targets.
//!
//! This is a deliberately small SSA instruction set: enough to express the
//! sandboxed access sequences of the lowering layer (address arithmetic,
//! flagged loads and stores, sequentially-consistent atomics, lane
//! shuffles, branches with block parameters, and runtime intrinsic calls),
//! plus the architecture-specific string-copy and multi-vector instructions
//! the bulk and interleaved lowerings select on x86 and aarch64.
//!
//! Functions are built with [`FuncBuilder`], printed with `Display`, and
//! executed by the reference interpreter in [`crate::interp`].

mod builder;
mod types;

pub use builder::FuncBuilder;
pub use types::{Type, PTR};

use crate::intrinsics::Intrinsic;
use bulkhead_environ::MemoryIndex;
use core::fmt;
use cranelift_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;

/// An SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// Flags on a memory access.
///
/// Every access the emitter produces is explicit about volatility and
/// alignment: guest-facing loads and stores are volatile with byte
/// alignment 1 (the guest's alignment hint is never trusted, and the
/// backend must not coalesce, speculate, or elide sandboxed accesses);
/// atomics are volatile with their declared alignment.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MemFlags {
    volatile: bool,
    alignment: u8,
}

impl MemFlags {
    /// Flags with unconstrained alignment and no volatility.
    pub fn new() -> Self {
        Self {
            volatile: false,
            alignment: 0,
        }
    }

    /// Marks the access volatile.
    pub fn with_volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Sets the access alignment in bytes (a power of two).
    pub fn with_alignment(mut self, bytes: u8) -> Self {
        debug_assert!(bytes.is_power_of_two());
        self.alignment = bytes;
        self
    }

    /// Whether the access is volatile.
    pub fn volatile(self) -> bool {
        self.volatile
    }

    /// The access alignment in bytes; 0 means unconstrained.
    pub fn alignment(self) -> u8 {
        self.alignment
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.volatile {
            write!(f, " volatile")?;
        }
        if self.alignment != 0 {
            write!(f, " aligned({})", self.alignment)?;
        }
        Ok(())
    }
}

/// Integer condition codes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IntCC {
    /// `==`.
    Equal,
    /// `!=`.
    NotEqual,
    /// Unsigned `<`.
    UnsignedLessThan,
}

impl fmt::Display for IntCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntCC::Equal => "eq",
            IntCC::NotEqual => "ne",
            IntCC::UnsignedLessThan => "ult",
        })
    }
}

/// Unary value conversions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp {
    /// Zero-extend to a wider type; lane-wise on vectors.
    Uextend,
    /// Sign-extend to a wider type; lane-wise on vectors.
    Sextend,
    /// Truncate to a narrower integer type.
    Ireduce,
    /// Reinterpret the bits as another type of the same size.
    Bitcast,
    /// Replicate a scalar into every lane of a vector.
    Splat,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Uextend => "uextend",
            UnaryOp::Sextend => "sextend",
            UnaryOp::Ireduce => "ireduce",
            UnaryOp::Bitcast => "bitcast",
            UnaryOp::Splat => "splat",
        })
    }
}

/// Binary integer operations.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    /// Wrapping addition.
    Iadd,
    /// Wrapping subtraction.
    Isub,
    /// Bitwise and.
    Band,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Iadd => "iadd",
            BinaryOp::Isub => "isub",
            BinaryOp::Band => "band",
        })
    }
}

/// Atomic read-modify-write operations. All are sequentially consistent.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AtomicRmwOp {
    /// Wrapping addition, returning the previous value.
    Add,
    /// Wrapping subtraction, returning the previous value.
    Sub,
    /// Bitwise and, returning the previous value.
    And,
    /// Bitwise or, returning the previous value.
    Or,
    /// Bitwise xor, returning the previous value.
    Xor,
    /// Exchange, returning the previous value.
    Xchg,
}

impl fmt::Display for AtomicRmwOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AtomicRmwOp::Add => "add",
            AtomicRmwOp::Sub => "sub",
            AtomicRmwOp::And => "and",
            AtomicRmwOp::Or => "or",
            AtomicRmwOp::Xor => "xor",
            AtomicRmwOp::Xchg => "xchg",
        })
    }
}

/// The payload of one instruction.
#[derive(Clone, PartialEq, Debug)]
pub enum InstructionData {
    /// An integer constant.
    Iconst {
        /// Result type.
        ty: Type,
        /// The constant, zero-extended to 64 bits.
        imm: u64,
    },
    /// A unary conversion producing `ty`.
    Unary {
        /// The conversion.
        op: UnaryOp,
        /// Result type.
        ty: Type,
        /// Operand.
        arg: Value,
    },
    /// A binary integer operation; the result type is the operand type.
    Binary {
        /// The operation.
        op: BinaryOp,
        /// Operands.
        args: [Value; 2],
    },
    /// An integer comparison producing an `i8` boolean.
    Icmp {
        /// The condition.
        cond: IntCC,
        /// Operands.
        args: [Value; 2],
    },
    /// The base address of the linear memory bound at `memory`. At runtime
    /// this is a load of the memory's base-pointer slot from the current
    /// context's runtime-data region; callers outside the emitter must
    /// preserve that slot's value across an instruction's execution.
    MemoryBase {
        /// The module-level memory index.
        memory: MemoryIndex,
    },
    /// A load of `ty` from `addr`.
    Load {
        /// The in-memory type.
        ty: Type,
        /// Access flags.
        flags: MemFlags,
        /// Host address.
        addr: Value,
    },
    /// A store of `value` to `addr`.
    Store {
        /// Access flags.
        flags: MemFlags,
        /// The value to store; its type is the in-memory type.
        value: Value,
        /// Host address.
        addr: Value,
    },
    /// A sequentially-consistent atomic load.
    AtomicLoad {
        /// The in-memory type.
        ty: Type,
        /// Access flags.
        flags: MemFlags,
        /// Host address.
        addr: Value,
    },
    /// A sequentially-consistent atomic store.
    AtomicStore {
        /// Access flags.
        flags: MemFlags,
        /// The value to store.
        value: Value,
        /// Host address.
        addr: Value,
    },
    /// A sequentially-consistent atomic read-modify-write returning the
    /// previous value.
    AtomicRmw {
        /// The combining operation.
        op: AtomicRmwOp,
        /// The access type.
        ty: Type,
        /// Access flags.
        flags: MemFlags,
        /// Host address.
        addr: Value,
        /// The operand.
        value: Value,
    },
    /// A strong compare-exchange, sequentially consistent on both success
    /// and failure, returning the previous value.
    AtomicCas {
        /// The access type.
        ty: Type,
        /// Access flags.
        flags: MemFlags,
        /// Host address.
        addr: Value,
        /// Expected previous value.
        expected: Value,
        /// Replacement value.
        replacement: Value,
    },
    /// A sequentially-consistent fence.
    Fence,
    /// Extracts lane `lane` of a vector.
    ExtractLane {
        /// The lane index.
        lane: u8,
        /// The vector.
        arg: Value,
    },
    /// Inserts a scalar into lane `lane` of a vector, producing the updated
    /// vector.
    InsertLane {
        /// The lane index.
        lane: u8,
        /// `[vector, scalar]`.
        args: [Value; 2],
    },
    /// A call to a runtime intrinsic.
    CallIntrinsic {
        /// The callee.
        intrinsic: Intrinsic,
        /// Arguments, matching the intrinsic's signature.
        args: SmallVec<[Value; 6]>,
    },
    /// The x86 forward byte copy (`rep movsb`). Clobbers the direction
    /// flag, the arithmetic flags, and memory.
    X86RepMovsb {
        /// `[dst, src, len]`, all 64-bit.
        args: [Value; 3],
    },
    /// The x86 byte fill (`rep stosb`). Clobbers the direction flag, the
    /// arithmetic flags, and memory.
    X86RepStosb {
        /// `[dst, byte, len]`.
        args: [Value; 3],
    },
    /// The aarch64 deinterleaving multi-vector load (`ld2`/`ld3`/`ld4`),
    /// producing `vectors` results of type `ty`.
    NeonLoadMultiple {
        /// Number of vectors, 2 to 4.
        vectors: u8,
        /// The vector type.
        ty: Type,
        /// Host address.
        addr: Value,
    },
    /// The aarch64 interleaving multi-vector store (`st2`/`st3`/`st4`).
    NeonStoreMultiple {
        /// Number of vectors, 2 to 4.
        vectors: u8,
        /// Host address.
        addr: Value,
        /// The vectors to store.
        args: SmallVec<[Value; 4]>,
    },
    /// An unconditional branch.
    Jump {
        /// Target block.
        destination: Block,
        /// Arguments for the target's block parameters.
        args: SmallVec<[Value; 2]>,
    },
    /// A conditional branch on a non-zero `i8`.
    Brif {
        /// The condition.
        cond: Value,
        /// Target when non-zero.
        then_dest: Block,
        /// Arguments for `then_dest`.
        then_args: SmallVec<[Value; 2]>,
        /// Target when zero.
        else_dest: Block,
        /// Arguments for `else_dest`.
        else_args: SmallVec<[Value; 2]>,
    },
    /// Return from the function.
    Return {
        /// Returned values.
        args: SmallVec<[Value; 4]>,
    },
    /// Control must never reach this instruction.
    Unreachable,
}

impl InstructionData {
    /// Whether this instruction ends its block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionData::Jump { .. }
                | InstructionData::Brif { .. }
                | InstructionData::Return { .. }
                | InstructionData::Unreachable
        )
    }
}

/// Where a value comes from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ValueDef {
    /// Result `num` of an instruction.
    Result {
        /// The defining instruction.
        inst: Inst,
        /// The result index.
        num: u8,
    },
    /// Parameter `num` of a block.
    Param {
        /// The block.
        block: Block,
        /// The parameter index.
        num: u8,
    },
}

#[derive(Clone, Debug)]
struct ValueData {
    ty: Type,
    def: ValueDef,
}

#[derive(Clone, Debug, Default)]
struct BlockData {
    params: SmallVec<[Value; 2]>,
    insts: Vec<Inst>,
}

/// An in-progress or finished function.
#[derive(Default)]
pub struct Function {
    insts: PrimaryMap<Inst, InstructionData>,
    inst_results: Vec<SmallVec<[Value; 2]>>,
    values: PrimaryMap<Value, ValueData>,
    blocks: PrimaryMap<Block, BlockData>,
    entry: Option<Block>,
}

impl Function {
    /// Creates an empty function.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry block, if one has been created.
    pub fn entry_block(&self) -> Option<Block> {
        self.entry
    }

    /// All blocks, in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    /// The parameters of `block`.
    pub fn block_params(&self, block: Block) -> &[Value] {
        &self.blocks[block].params
    }

    /// The instructions of `block`, in order.
    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    /// The payload of `inst`.
    pub fn inst_data(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    /// The results of `inst`.
    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        &self.inst_results[inst.as_u32() as usize]
    }

    /// The type of `value`.
    pub fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    /// The definition of `value`.
    pub fn value_def(&self, value: Value) -> ValueDef {
        self.values[value].def
    }

    /// The number of values created so far.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    fn make_block_param(&mut self, block: Block, ty: Type) -> Value {
        let num = self.blocks[block].params.len() as u8;
        let value = self.values.push(ValueData {
            ty,
            def: ValueDef::Param { block, num },
        });
        self.blocks[block].params.push(value);
        value
    }

    fn make_inst(
        &mut self,
        block: Block,
        data: InstructionData,
        result_types: &[Type],
    ) -> (Inst, SmallVec<[Value; 2]>) {
        let inst = self.insts.push(data);
        let mut results = SmallVec::new();
        for (num, &ty) in result_types.iter().enumerate() {
            results.push(self.values.push(ValueData {
                ty,
                def: ValueDef::Result {
                    inst,
                    num: num as u8,
                },
            }));
        }
        debug_assert_eq!(inst.as_u32() as usize, self.inst_results.len());
        self.inst_results.push(results.clone());
        self.blocks[block].insts.push(inst);
        (inst, results)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.blocks.keys() {
            write!(f, "{block}(")?;
            for (i, param) in self.blocks[block].params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{param}: {}", self.value_type(*param))?;
            }
            writeln!(f, "):")?;
            for &inst in &self.blocks[block].insts {
                write!(f, "    ")?;
                let results = self.inst_results(inst);
                if !results.is_empty() {
                    for (i, r) in results.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{r}")?;
                    }
                    write!(f, " = ")?;
                }
                write_inst(f, self, self.inst_data(inst))?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Value]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

fn write_inst(f: &mut fmt::Formatter<'_>, func: &Function, data: &InstructionData) -> fmt::Result {
    use InstructionData::*;
    match data {
        Iconst { ty, imm } => write!(f, "iconst.{ty} {imm:#x}"),
        Unary { op, ty, arg } => write!(f, "{op}.{ty} {arg}"),
        Binary { op, args } => {
            let ty = func.value_type(args[0]);
            write!(f, "{op}.{ty} {}, {}", args[0], args[1])
        }
        Icmp { cond, args } => write!(f, "icmp {cond} {}, {}", args[0], args[1]),
        MemoryBase { memory } => write!(f, "memory_base {}", memory.as_u32()),
        Load { ty, flags, addr } => write!(f, "load.{ty}{flags} {addr}"),
        Store { flags, value, addr } => write!(f, "store{flags} {value}, {addr}"),
        AtomicLoad { ty, flags, addr } => write!(f, "atomic_load.{ty} seq_cst{flags} {addr}"),
        AtomicStore { flags, value, addr } => {
            write!(f, "atomic_store seq_cst{flags} {value}, {addr}")
        }
        AtomicRmw {
            op,
            ty,
            flags,
            addr,
            value,
        } => write!(f, "atomic_rmw.{ty} {op} seq_cst{flags} {addr}, {value}"),
        AtomicCas {
            ty,
            flags,
            addr,
            expected,
            replacement,
        } => write!(
            f,
            "atomic_cas.{ty} seq_cst{flags} {addr}, {expected}, {replacement}"
        ),
        Fence => write!(f, "fence seq_cst"),
        ExtractLane { lane, arg } => write!(f, "extractlane {arg}, {lane}"),
        InsertLane { lane, args } => write!(f, "insertlane {}, {}, {lane}", args[0], args[1]),
        CallIntrinsic { intrinsic, args } => {
            write!(f, "call_intrinsic \"{}\"(", intrinsic.name())?;
            write_args(f, args)?;
            write!(f, ")")
        }
        X86RepMovsb { args } => {
            write!(f, "x86_rep_movsb ")?;
            write_args(f, args)
        }
        X86RepStosb { args } => {
            write!(f, "x86_rep_stosb ")?;
            write_args(f, args)
        }
        NeonLoadMultiple { vectors, ty, addr } => {
            write!(f, "aarch64_ld{vectors}.{ty} {addr}")
        }
        NeonStoreMultiple {
            vectors,
            addr,
            args,
        } => {
            write!(f, "aarch64_st{vectors} {addr}, ")?;
            write_args(f, args)
        }
        Jump { destination, args } => {
            write!(f, "jump {destination}(")?;
            write_args(f, args)?;
            write!(f, ")")
        }
        Brif {
            cond,
            then_dest,
            then_args,
            else_dest,
            else_args,
        } => {
            write!(f, "brif {cond}, {then_dest}(")?;
            write_args(f, then_args)?;
            write!(f, "), {else_dest}(")?;
            write_args(f, else_args)?;
            write!(f, ")")
        }
        Return { args } => {
            write!(f, "return ")?;
            write_args(f, args)
        }
        Unreachable => write!(f, "unreachable"),
    }
}

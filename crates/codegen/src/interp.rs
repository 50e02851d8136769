//! A reference interpreter for emitted functions.
//!
//! The interpreter gives every instruction the semantics the machine-code
//! backend must implement, which makes the emitted sequences executable in
//! tests without a native backend: the host supplies memory-base
//! resolution, byte-level access to its address space, and the runtime
//! intrinsics. Architecture-specific instructions are interpreted with
//! their documented semantics (`rep movsb` as a forward byte copy, the
//! `ldN`/`stN` family as lane-interleaving accesses).

use crate::intrinsics::Intrinsic;
use crate::ir::{
    AtomicRmwOp, BinaryOp, Block, Function, InstructionData, IntCC, Type, UnaryOp, Value,
};
use bulkhead_environ::{MemoryIndex, TrapCode};
use smallvec::SmallVec;

/// A typed value flowing through the interpreter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Datum {
    /// The value's type.
    pub ty: Type,
    /// The raw bits, little-endian lane order, masked to the type's width.
    pub bits: u128,
}

fn width_mask(ty: Type) -> u128 {
    let bits = u32::from(ty.bytes()) * 8;
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

fn lane_mask(bytes: u8) -> u128 {
    if bytes >= 16 {
        u128::MAX
    } else {
        (1u128 << (u32::from(bytes) * 8)) - 1
    }
}

impl Datum {
    /// A value of `ty` with the given bits (masked to the type's width).
    pub fn new(ty: Type, bits: u128) -> Self {
        Self {
            ty,
            bits: bits & width_mask(ty),
        }
    }

    /// An `i32` value.
    pub fn i32(bits: u32) -> Self {
        Self::new(Type::I32, u128::from(bits))
    }

    /// An `i64` value.
    pub fn i64(bits: u64) -> Self {
        Self::new(Type::I64, u128::from(bits))
    }

    /// The low 64 bits.
    pub fn as_u64(&self) -> u64 {
        self.bits as u64
    }

    /// The low 32 bits.
    pub fn as_u32(&self) -> u32 {
        self.bits as u32
    }

    fn lane(&self, index: u8) -> u128 {
        let bytes = self.ty.lane_bytes();
        let shift = u32::from(index) * u32::from(bytes) * 8;
        (self.bits >> shift) & lane_mask(bytes)
    }

    fn with_lane(&self, index: u8, lane: u128) -> Self {
        let bytes = self.ty.lane_bytes();
        let shift = u32::from(index) * u32::from(bytes) * 8;
        let mask = lane_mask(bytes) << shift;
        Self {
            ty: self.ty,
            bits: (self.bits & !mask) | ((lane & lane_mask(bytes)) << shift),
        }
    }
}

/// The environment an interpreted function runs against.
pub trait Host {
    /// The host base address of the memory bound at `memory`.
    fn memory_base(&mut self, memory: MemoryIndex) -> u64;

    /// Reads `buf.len()` bytes at the host address `addr`.
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), TrapCode>;

    /// Writes `bytes` at the host address `addr`.
    fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), TrapCode>;

    /// Calls a runtime intrinsic. An `Err` is a trap unwinding out of the
    /// function.
    fn intrinsic(&mut self, intrinsic: Intrinsic, args: &[Datum])
        -> Result<Option<Datum>, TrapCode>;
}

fn sign_extend(bits: u128, from_bytes: u8, to_bytes: u8) -> u128 {
    let from_bits = u32::from(from_bytes) * 8;
    let sign = (bits >> (from_bits - 1)) & 1;
    if sign == 0 {
        bits
    } else {
        let ones = lane_mask(to_bytes) & !lane_mask(from_bytes);
        bits | ones
    }
}

struct Frame<'a> {
    func: &'a Function,
    values: Vec<Option<u128>>,
}

impl<'a> Frame<'a> {
    fn get(&self, value: Value) -> Datum {
        let bits = self.values[value.as_u32() as usize].expect("use of undefined value");
        Datum::new(self.func.value_type(value), bits)
    }

    fn set(&mut self, value: Value, datum: Datum) {
        debug_assert_eq!(self.func.value_type(value), datum.ty);
        self.values[value.as_u32() as usize] = Some(datum.bits);
    }
}

fn read_scalar<H: Host>(host: &mut H, addr: u64, ty: Type) -> Result<u128, TrapCode> {
    let mut buf = [0u8; 16];
    let len = usize::from(ty.bytes());
    host.read(addr, &mut buf[..len])?;
    Ok(u128::from_le_bytes(buf) & width_mask(ty))
}

fn write_scalar<H: Host>(host: &mut H, addr: u64, ty: Type, bits: u128) -> Result<(), TrapCode> {
    let bytes = bits.to_le_bytes();
    host.write(addr, &bytes[..usize::from(ty.bytes())])
}

/// Runs `func` against `host` with the given parameters, returning the
/// values of its `return` instruction or the trap that unwound it.
pub fn run<H: Host>(
    func: &Function,
    host: &mut H,
    params: &[Datum],
) -> Result<Vec<Datum>, TrapCode> {
    let entry = func.entry_block().expect("function has no entry block");
    let mut frame = Frame {
        func,
        values: vec![None; func.num_values()],
    };

    let mut current = entry;
    let mut incoming: SmallVec<[Datum; 4]> = SmallVec::from_slice(params);
    let mut steps = 0usize;

    loop {
        let block_params = func.block_params(current);
        assert_eq!(
            block_params.len(),
            incoming.len(),
            "branch argument count mismatch"
        );
        for (&param, &arg) in block_params.iter().zip(incoming.iter()) {
            frame.set(param, Datum::new(func.value_type(param), arg.bits));
        }

        let mut transfer: Option<(Block, SmallVec<[Datum; 4]>)> = None;
        for &inst in func.block_insts(current) {
            steps += 1;
            assert!(steps < 100_000_000, "interpreted function ran away");

            match func.inst_data(inst) {
                InstructionData::Iconst { ty, imm } => {
                    let result = func.inst_results(inst)[0];
                    frame.set(result, Datum::new(*ty, u128::from(*imm)));
                }
                InstructionData::Unary { op, ty, arg } => {
                    let result = func.inst_results(inst)[0];
                    let input = frame.get(*arg);
                    let output = eval_unary(*op, *ty, input);
                    frame.set(result, output);
                }
                InstructionData::Binary { op, args } => {
                    let result = func.inst_results(inst)[0];
                    let a = frame.get(args[0]);
                    let b = frame.get(args[1]);
                    let mask = width_mask(a.ty);
                    let bits = match op {
                        BinaryOp::Iadd => a.bits.wrapping_add(b.bits) & mask,
                        BinaryOp::Isub => a.bits.wrapping_sub(b.bits) & mask,
                        BinaryOp::Band => a.bits & b.bits,
                    };
                    frame.set(result, Datum::new(a.ty, bits));
                }
                InstructionData::Icmp { cond, args } => {
                    let result = func.inst_results(inst)[0];
                    let a = frame.get(args[0]).bits;
                    let b = frame.get(args[1]).bits;
                    let outcome = match cond {
                        IntCC::Equal => a == b,
                        IntCC::NotEqual => a != b,
                        IntCC::UnsignedLessThan => a < b,
                    };
                    frame.set(result, Datum::new(Type::I8, u128::from(outcome)));
                }
                InstructionData::MemoryBase { memory } => {
                    let result = func.inst_results(inst)[0];
                    let base = host.memory_base(*memory);
                    frame.set(result, Datum::i64(base));
                }
                InstructionData::Load { ty, addr, .. }
                | InstructionData::AtomicLoad { ty, addr, .. } => {
                    let result = func.inst_results(inst)[0];
                    let bits = read_scalar(host, frame.get(*addr).as_u64(), *ty)?;
                    frame.set(result, Datum::new(*ty, bits));
                }
                InstructionData::Store { value, addr, .. }
                | InstructionData::AtomicStore { value, addr, .. } => {
                    let datum = frame.get(*value);
                    write_scalar(host, frame.get(*addr).as_u64(), datum.ty, datum.bits)?;
                }
                InstructionData::AtomicRmw {
                    op,
                    ty,
                    addr,
                    value,
                    ..
                } => {
                    let result = func.inst_results(inst)[0];
                    let location = frame.get(*addr).as_u64();
                    let operand = frame.get(*value).bits;
                    let mask = width_mask(*ty);
                    let previous = read_scalar(host, location, *ty)?;
                    let updated = match op {
                        AtomicRmwOp::Add => previous.wrapping_add(operand) & mask,
                        AtomicRmwOp::Sub => previous.wrapping_sub(operand) & mask,
                        AtomicRmwOp::And => previous & operand,
                        AtomicRmwOp::Or => previous | operand,
                        AtomicRmwOp::Xor => previous ^ operand,
                        AtomicRmwOp::Xchg => operand & mask,
                    };
                    write_scalar(host, location, *ty, updated)?;
                    frame.set(result, Datum::new(*ty, previous));
                }
                InstructionData::AtomicCas {
                    ty,
                    addr,
                    expected,
                    replacement,
                    ..
                } => {
                    let result = func.inst_results(inst)[0];
                    let location = frame.get(*addr).as_u64();
                    let previous = read_scalar(host, location, *ty)?;
                    if previous == frame.get(*expected).bits {
                        write_scalar(host, location, *ty, frame.get(*replacement).bits)?;
                    }
                    frame.set(result, Datum::new(*ty, previous));
                }
                InstructionData::Fence => {}
                InstructionData::ExtractLane { lane, arg } => {
                    let result = func.inst_results(inst)[0];
                    let vector = frame.get(*arg);
                    frame.set(
                        result,
                        Datum::new(vector.ty.lane_type(), vector.lane(*lane)),
                    );
                }
                InstructionData::InsertLane { lane, args } => {
                    let result = func.inst_results(inst)[0];
                    let vector = frame.get(args[0]);
                    let scalar = frame.get(args[1]);
                    frame.set(result, vector.with_lane(*lane, scalar.bits));
                }
                InstructionData::CallIntrinsic { intrinsic, args } => {
                    let arguments: SmallVec<[Datum; 6]> =
                        args.iter().map(|&a| frame.get(a)).collect();
                    let outcome = host.intrinsic(*intrinsic, &arguments)?;
                    if let Some(datum) = outcome {
                        let result = func.inst_results(inst)[0];
                        frame.set(result, datum);
                    }
                }
                InstructionData::X86RepMovsb { args } => {
                    let dst = frame.get(args[0]).as_u64();
                    let src = frame.get(args[1]).as_u64();
                    let len = frame.get(args[2]).as_u64();
                    for i in 0..len {
                        let mut byte = [0u8; 1];
                        host.read(src + i, &mut byte)?;
                        host.write(dst + i, &byte)?;
                    }
                }
                InstructionData::X86RepStosb { args } => {
                    let dst = frame.get(args[0]).as_u64();
                    let byte = [frame.get(args[1]).bits as u8];
                    let len = frame.get(args[2]).as_u64();
                    for i in 0..len {
                        host.write(dst + i, &byte)?;
                    }
                }
                InstructionData::NeonLoadMultiple { vectors, ty, addr } => {
                    let base = frame.get(*addr).as_u64();
                    let lane_bytes = u64::from(ty.lane_bytes());
                    let lanes = ty.lane_count();
                    let results = func.inst_results(inst).to_vec();
                    for (k, &result) in results.iter().enumerate() {
                        let mut out = Datum::new(*ty, 0);
                        for lane in 0..lanes {
                            let element = u64::from(lane) * u64::from(*vectors) + k as u64;
                            let mut buf = [0u8; 16];
                            let len = lane_bytes as usize;
                            host.read(base + element * lane_bytes, &mut buf[..len])?;
                            out = out.with_lane(lane, u128::from_le_bytes(buf));
                        }
                        frame.set(result, out);
                    }
                }
                InstructionData::NeonStoreMultiple { vectors, addr, args } => {
                    let base = frame.get(*addr).as_u64();
                    let ty = func.value_type(args[0]);
                    let lane_bytes = u64::from(ty.lane_bytes());
                    let lanes = ty.lane_count();
                    let total = u64::from(*vectors) * u64::from(lanes);
                    for element in 0..total {
                        let vector = frame.get(args[(element % u64::from(*vectors)) as usize]);
                        let lane = vector.lane((element / u64::from(*vectors)) as u8);
                        let bytes = lane.to_le_bytes();
                        host.write(base + element * lane_bytes, &bytes[..lane_bytes as usize])?;
                    }
                }
                InstructionData::Jump { destination, args } => {
                    let outgoing: SmallVec<[Datum; 4]> =
                        args.iter().map(|&a| frame.get(a)).collect();
                    transfer = Some((*destination, outgoing));
                }
                InstructionData::Brif {
                    cond,
                    then_dest,
                    then_args,
                    else_dest,
                    else_args,
                } => {
                    let taken = frame.get(*cond).bits != 0;
                    let (dest, args) = if taken {
                        (*then_dest, then_args)
                    } else {
                        (*else_dest, else_args)
                    };
                    let outgoing: SmallVec<[Datum; 4]> =
                        args.iter().map(|&a| frame.get(a)).collect();
                    transfer = Some((dest, outgoing));
                }
                InstructionData::Return { args } => {
                    return Ok(args.iter().map(|&a| frame.get(a)).collect());
                }
                InstructionData::Unreachable => {
                    return Err(TrapCode::ReachedUnreachable);
                }
            }

            if transfer.is_some() {
                break;
            }
        }

        let (next, args) = transfer.expect("block fell through without a terminator");
        current = next;
        incoming = args;
    }
}

fn eval_unary(op: UnaryOp, result_ty: Type, input: Datum) -> Datum {
    match op {
        UnaryOp::Uextend => {
            if result_ty.is_vector() && input.ty.is_vector() {
                // Lane-wise widening; zero extension needs no per-lane work
                // beyond repositioning the lanes.
                let mut out = Datum::new(result_ty, 0);
                for lane in 0..result_ty.lane_count() {
                    out = out.with_lane(lane, input.lane(lane));
                }
                out
            } else {
                Datum::new(result_ty, input.bits)
            }
        }
        UnaryOp::Sextend => {
            if result_ty.is_vector() && input.ty.is_vector() {
                let mut out = Datum::new(result_ty, 0);
                for lane in 0..result_ty.lane_count() {
                    let widened = sign_extend(
                        input.lane(lane),
                        input.ty.lane_bytes(),
                        result_ty.lane_bytes(),
                    );
                    out = out.with_lane(lane, widened);
                }
                out
            } else {
                Datum::new(
                    result_ty,
                    sign_extend(input.bits, input.ty.bytes(), result_ty.bytes()),
                )
            }
        }
        UnaryOp::Ireduce => Datum::new(result_ty, input.bits),
        UnaryOp::Bitcast => Datum::new(result_ty, input.bits),
        UnaryOp::Splat => {
            let mut out = Datum::new(result_ty, 0);
            for lane in 0..result_ty.lane_count() {
                out = out.with_lane(lane, input.bits);
            }
            out
        }
    }
}

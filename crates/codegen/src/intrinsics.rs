//! The runtime intrinsics callable from emitted code.
//!
//! These are the wire contract between the emitter and the runtime: the
//! emitter calls them by name with exactly the parameter tuples below, and
//! the runtime must export a matching implementation for each. Per the
//! intrinsic calling convention, every intrinsic also receives the current
//! context's runtime-data pointer as an implicit leading argument; that
//! argument is not part of the tuples here.

use crate::ir::Type;

/// A runtime intrinsic the emitter may call.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Intrinsic {
    /// Grows a memory, returning the previous page count or `-1`.
    MemoryGrow,
    /// Returns a memory's current page count.
    MemorySize,
    /// Copies bytes from a passive data segment into a memory.
    MemoryInit,
    /// Drops a passive data segment.
    DataDrop,
    /// Wakes threads waiting on an address.
    AtomicNotify,
    /// Blocks until notified, with a 32-bit expected value.
    AtomicWaitI32,
    /// Blocks until notified, with a 64-bit expected value.
    AtomicWaitI64,
    /// Raises the misaligned-atomic trap; does not return.
    MisalignedAtomicTrap,
}

/// The signature of an intrinsic, excluding the implicit context argument.
pub struct IntrinsicSignature {
    /// Parameter types. `uptr` parameters are 64-bit.
    pub params: &'static [Type],
    /// Result type, if any.
    pub result: Option<Type>,
}

impl Intrinsic {
    /// The name the runtime exports this intrinsic under.
    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::MemoryGrow => "memory.grow",
            Intrinsic::MemorySize => "memory.size",
            Intrinsic::MemoryInit => "memory.init",
            Intrinsic::DataDrop => "data.drop",
            Intrinsic::AtomicNotify => "atomic_notify",
            Intrinsic::AtomicWaitI32 => "atomic_wait_i32",
            Intrinsic::AtomicWaitI64 => "atomic_wait_i64",
            Intrinsic::MisalignedAtomicTrap => "misalignedAtomicTrap",
        }
    }

    /// The intrinsic's signature.
    pub fn signature(self) -> IntrinsicSignature {
        use Type::{I32, I64};
        match self {
            // (deltaPages: u32, memoryId: uptr) -> u32
            Intrinsic::MemoryGrow => IntrinsicSignature {
                params: &[I32, I64],
                result: Some(I32),
            },
            // (memoryId: uptr) -> u32
            Intrinsic::MemorySize => IntrinsicSignature {
                params: &[I64],
                result: Some(I32),
            },
            // (dst: u32, src: u32, n: u32, instanceId: uptr, memoryId: uptr,
            //  segIndex: uptr)
            Intrinsic::MemoryInit => IntrinsicSignature {
                params: &[I32, I32, I32, I64, I64, I64],
                result: None,
            },
            // (instanceId: uptr, segIndex: uptr)
            Intrinsic::DataDrop => IntrinsicSignature {
                params: &[I64, I64],
                result: None,
            },
            // (addr: u32, count: u32, memoryId: uptr) -> u32 woken
            Intrinsic::AtomicNotify => IntrinsicSignature {
                params: &[I32, I32, I64],
                result: Some(I32),
            },
            // (addr: u32, expected: u32, timeout: i64, memoryId: uptr) -> u32
            Intrinsic::AtomicWaitI32 => IntrinsicSignature {
                params: &[I32, I32, I64, I64],
                result: Some(I32),
            },
            // (addr: u32, expected: i64, timeout: i64, memoryId: uptr) -> u32
            Intrinsic::AtomicWaitI64 => IntrinsicSignature {
                params: &[I32, I64, I64, I64],
                result: Some(I32),
            },
            // (addr: i64), traps
            Intrinsic::MisalignedAtomicTrap => IntrinsicSignature {
                params: &[I64],
                result: None,
            },
        }
    }
}

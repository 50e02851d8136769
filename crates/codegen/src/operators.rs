//! The decoded memory-instruction surface the emitter lowers.
//!
//! The binary and text parsers are external collaborators; they hand the
//! emitter operators in this already-decoded form. Immediates follow the
//! instruction encodings: loads and stores carry a constant offset, an
//! alignment hint, and a memory index; bulk and segment operations carry
//! the indices their runtime intrinsics need.

use bulkhead_environ::{DataSegmentIndex, MemoryIndex};

/// The immediate of a load, store, or atomic memory access.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LoadOrStoreImm {
    /// Constant byte offset added to the dynamic address.
    pub offset: u32,
    /// The encoded alignment hint, log2 of bytes. Never trusted for
    /// non-atomic accesses; for atomics it selects the access alignment.
    pub alignment_log2: u8,
    /// Which memory the access targets.
    pub memory_index: MemoryIndex,
}

/// The immediate of `memory.size`, `memory.grow`, and `memory.fill`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MemoryImm {
    /// Which memory the operation targets.
    pub memory_index: MemoryIndex,
}

/// The immediate of `memory.copy`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MemoryCopyImm {
    /// The memory bytes are read from.
    pub source_memory_index: MemoryIndex,
    /// The memory bytes are written to.
    pub dest_memory_index: MemoryIndex,
}

/// The immediate of `memory.init`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DataSegmentAndMemImm {
    /// The passive data segment read from.
    pub data_segment_index: DataSegmentIndex,
    /// The memory written to.
    pub memory_index: MemoryIndex,
}

/// The immediate of `data.drop`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DataSegmentImm {
    /// The passive data segment to drop.
    pub data_segment_index: DataSegmentIndex,
}

/// An atomic memory ordering, as encoded in the `atomic.fence` immediate.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemoryOrder {
    /// No ordering constraints.
    Relaxed,
    /// Acquire ordering.
    Acquire,
    /// Release ordering.
    Release,
    /// Combined acquire and release ordering.
    AcquireRelease,
    /// A single total order over all atomic operations. The only ordering
    /// the emitter accepts.
    SequentiallyConsistent,
}

/// The immediate of `atomic.fence`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AtomicFenceImm {
    /// The requested ordering.
    pub order: MemoryOrder,
}

/// A decoded memory operator.
///
/// Naming follows the instruction mnemonics: the value type prefix, then
/// the operation, then the in-memory width and signedness where narrower
/// than the value type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum Operator {
    // Scalar loads.
    I32Load(LoadOrStoreImm),
    I64Load(LoadOrStoreImm),
    F32Load(LoadOrStoreImm),
    F64Load(LoadOrStoreImm),
    I32Load8S(LoadOrStoreImm),
    I32Load8U(LoadOrStoreImm),
    I32Load16S(LoadOrStoreImm),
    I32Load16U(LoadOrStoreImm),
    I64Load8S(LoadOrStoreImm),
    I64Load8U(LoadOrStoreImm),
    I64Load16S(LoadOrStoreImm),
    I64Load16U(LoadOrStoreImm),
    I64Load32S(LoadOrStoreImm),
    I64Load32U(LoadOrStoreImm),

    // Scalar stores.
    I32Store(LoadOrStoreImm),
    I64Store(LoadOrStoreImm),
    F32Store(LoadOrStoreImm),
    F64Store(LoadOrStoreImm),
    I32Store8(LoadOrStoreImm),
    I32Store16(LoadOrStoreImm),
    I64Store8(LoadOrStoreImm),
    I64Store16(LoadOrStoreImm),
    I64Store32(LoadOrStoreImm),

    // Whole-vector accesses.
    V128Load(LoadOrStoreImm),
    V128Store(LoadOrStoreImm),

    // Splatting loads.
    V8x16LoadSplat(LoadOrStoreImm),
    V16x8LoadSplat(LoadOrStoreImm),
    V32x4LoadSplat(LoadOrStoreImm),
    V64x2LoadSplat(LoadOrStoreImm),

    // Widening loads.
    I16x8Load8x8S(LoadOrStoreImm),
    I16x8Load8x8U(LoadOrStoreImm),
    I32x4Load16x4S(LoadOrStoreImm),
    I32x4Load16x4U(LoadOrStoreImm),
    I64x2Load32x2S(LoadOrStoreImm),
    I64x2Load32x2U(LoadOrStoreImm),

    // Memory management and bulk operations.
    MemorySize(MemoryImm),
    MemoryGrow(MemoryImm),
    MemoryCopy(MemoryCopyImm),
    MemoryFill(MemoryImm),
    MemoryInit(DataSegmentAndMemImm),
    DataDrop(DataSegmentImm),

    // Interleaved multi-vector loads.
    V8x16LoadInterleaved2(LoadOrStoreImm),
    V8x16LoadInterleaved3(LoadOrStoreImm),
    V8x16LoadInterleaved4(LoadOrStoreImm),
    V16x8LoadInterleaved2(LoadOrStoreImm),
    V16x8LoadInterleaved3(LoadOrStoreImm),
    V16x8LoadInterleaved4(LoadOrStoreImm),
    V32x4LoadInterleaved2(LoadOrStoreImm),
    V32x4LoadInterleaved3(LoadOrStoreImm),
    V32x4LoadInterleaved4(LoadOrStoreImm),
    V64x2LoadInterleaved2(LoadOrStoreImm),
    V64x2LoadInterleaved3(LoadOrStoreImm),
    V64x2LoadInterleaved4(LoadOrStoreImm),

    // Interleaved multi-vector stores.
    V8x16StoreInterleaved2(LoadOrStoreImm),
    V8x16StoreInterleaved3(LoadOrStoreImm),
    V8x16StoreInterleaved4(LoadOrStoreImm),
    V16x8StoreInterleaved2(LoadOrStoreImm),
    V16x8StoreInterleaved3(LoadOrStoreImm),
    V16x8StoreInterleaved4(LoadOrStoreImm),
    V32x4StoreInterleaved2(LoadOrStoreImm),
    V32x4StoreInterleaved3(LoadOrStoreImm),
    V32x4StoreInterleaved4(LoadOrStoreImm),
    V64x2StoreInterleaved2(LoadOrStoreImm),
    V64x2StoreInterleaved3(LoadOrStoreImm),
    V64x2StoreInterleaved4(LoadOrStoreImm),

    // Wait, notify, fence.
    MemoryAtomicNotify(LoadOrStoreImm),
    MemoryAtomicWait32(LoadOrStoreImm),
    MemoryAtomicWait64(LoadOrStoreImm),
    AtomicFence(AtomicFenceImm),

    // Atomic loads.
    I32AtomicLoad(LoadOrStoreImm),
    I64AtomicLoad(LoadOrStoreImm),
    I32AtomicLoad8U(LoadOrStoreImm),
    I32AtomicLoad16U(LoadOrStoreImm),
    I64AtomicLoad8U(LoadOrStoreImm),
    I64AtomicLoad16U(LoadOrStoreImm),
    I64AtomicLoad32U(LoadOrStoreImm),

    // Atomic stores.
    I32AtomicStore(LoadOrStoreImm),
    I64AtomicStore(LoadOrStoreImm),
    I32AtomicStore8(LoadOrStoreImm),
    I32AtomicStore16(LoadOrStoreImm),
    I64AtomicStore8(LoadOrStoreImm),
    I64AtomicStore16(LoadOrStoreImm),
    I64AtomicStore32(LoadOrStoreImm),

    // Atomic read-modify-writes.
    I32AtomicRmwAdd(LoadOrStoreImm),
    I64AtomicRmwAdd(LoadOrStoreImm),
    I32AtomicRmw8AddU(LoadOrStoreImm),
    I32AtomicRmw16AddU(LoadOrStoreImm),
    I64AtomicRmw8AddU(LoadOrStoreImm),
    I64AtomicRmw16AddU(LoadOrStoreImm),
    I64AtomicRmw32AddU(LoadOrStoreImm),
    I32AtomicRmwSub(LoadOrStoreImm),
    I64AtomicRmwSub(LoadOrStoreImm),
    I32AtomicRmw8SubU(LoadOrStoreImm),
    I32AtomicRmw16SubU(LoadOrStoreImm),
    I64AtomicRmw8SubU(LoadOrStoreImm),
    I64AtomicRmw16SubU(LoadOrStoreImm),
    I64AtomicRmw32SubU(LoadOrStoreImm),
    I32AtomicRmwAnd(LoadOrStoreImm),
    I64AtomicRmwAnd(LoadOrStoreImm),
    I32AtomicRmw8AndU(LoadOrStoreImm),
    I32AtomicRmw16AndU(LoadOrStoreImm),
    I64AtomicRmw8AndU(LoadOrStoreImm),
    I64AtomicRmw16AndU(LoadOrStoreImm),
    I64AtomicRmw32AndU(LoadOrStoreImm),
    I32AtomicRmwOr(LoadOrStoreImm),
    I64AtomicRmwOr(LoadOrStoreImm),
    I32AtomicRmw8OrU(LoadOrStoreImm),
    I32AtomicRmw16OrU(LoadOrStoreImm),
    I64AtomicRmw8OrU(LoadOrStoreImm),
    I64AtomicRmw16OrU(LoadOrStoreImm),
    I64AtomicRmw32OrU(LoadOrStoreImm),
    I32AtomicRmwXor(LoadOrStoreImm),
    I64AtomicRmwXor(LoadOrStoreImm),
    I32AtomicRmw8XorU(LoadOrStoreImm),
    I32AtomicRmw16XorU(LoadOrStoreImm),
    I64AtomicRmw8XorU(LoadOrStoreImm),
    I64AtomicRmw16XorU(LoadOrStoreImm),
    I64AtomicRmw32XorU(LoadOrStoreImm),
    I32AtomicRmwXchg(LoadOrStoreImm),
    I64AtomicRmwXchg(LoadOrStoreImm),
    I32AtomicRmw8XchgU(LoadOrStoreImm),
    I32AtomicRmw16XchgU(LoadOrStoreImm),
    I64AtomicRmw8XchgU(LoadOrStoreImm),
    I64AtomicRmw16XchgU(LoadOrStoreImm),
    I64AtomicRmw32XchgU(LoadOrStoreImm),

    // Atomic compare-exchanges.
    I32AtomicRmwCmpxchg(LoadOrStoreImm),
    I64AtomicRmwCmpxchg(LoadOrStoreImm),
    I32AtomicRmw8CmpxchgU(LoadOrStoreImm),
    I32AtomicRmw16CmpxchgU(LoadOrStoreImm),
    I64AtomicRmw8CmpxchgU(LoadOrStoreImm),
    I64AtomicRmw16CmpxchgU(LoadOrStoreImm),
    I64AtomicRmw32CmpxchgU(LoadOrStoreImm),
}

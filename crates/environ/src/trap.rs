//! Trap codes raised by emitted code and runtime intrinsics.

use thiserror::Error;

/// The reason an executing WebAssembly function trapped.
///
/// Traps raised by emitted code unwind to the nearest runtime trap handler;
/// they are never recoverable by the emitter.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Error)]
pub enum TrapCode {
    /// An atomic access whose effective address was not a multiple of the
    /// access width.
    #[error("misaligned atomic memory access")]
    MisalignedAtomic,

    /// An access outside a memory's committed range, raised by intrinsics.
    /// Emitted inline accesses rely on the virtual reservation instead and
    /// never raise this themselves.
    #[error("out-of-bounds memory access")]
    OutOfBoundsMemoryAccess,

    /// An access outside a data segment's bounds.
    #[error("out-of-bounds data segment access")]
    OutOfBoundsDataSegmentAccess,

    /// An access outside an element segment's bounds.
    #[error("out-of-bounds element segment access")]
    OutOfBoundsElemSegmentAccess,

    /// An access outside a table's bounds.
    #[error("out-of-bounds table access")]
    OutOfBoundsTableAccess,

    /// A read of a table element that was never initialized.
    #[error("uninitialized table element")]
    UninitializedTableElement,

    /// The execution stack overflowed.
    #[error("stack overflow")]
    StackOverflow,

    /// Integer division by zero, or `INT_MIN / -1`.
    #[error("integer divide by zero or integer overflow")]
    IntegerDivideByZeroOrOverflow,

    /// An invalid conversion to an integer from a float.
    #[error("invalid floating point operation")]
    InvalidFloatOperation,

    /// An indirect call whose callee signature did not match.
    #[error("indirect call signature mismatch")]
    IndirectCallSignatureMismatch,

    /// An `unreachable` instruction was executed.
    #[error("reached unreachable code")]
    ReachedUnreachable,

    /// An invalid argument to a runtime intrinsic. Also raised when a
    /// dropped data or element segment is used or re-dropped; the original
    /// system folds all three cases into this one code and that mapping is
    /// kept as-is.
    #[error("invalid argument")]
    InvalidArgument,
}

//! ABI constants shared between the emitter and the runtime.

use crate::types::MemoryType;

/// The size of a WebAssembly page, in bytes.
pub const WASM_PAGE_SIZE: u64 = 0x10000;

/// The maximum number of pages of a 32-bit linear memory.
pub const WASM_MAX_PAGES: u64 = 0x10000;

/// The maximum number of memories a compartment may own. Memory identities
/// index a fixed array of base-pointer slots in the compartment's runtime
/// data, so the range is capped.
pub const MAX_MEMORIES: usize = 255;

/// The maximum number of tables a compartment may own.
pub const MAX_TABLES: usize = 128;

/// The maximum number of execution contexts a compartment may own. Context
/// runtime data is laid out as a fixed array inside the compartment's
/// reserved region.
pub const MAX_CONTEXTS: usize = 1024;

/// The maximum number of mutable-global slots per compartment. Every mutable
/// global is assigned one slot; each context carries a copy of all slots.
pub const MAX_MUTABLE_GLOBALS: usize = 1024;

/// Sentinel identity. Globals, exception types, instances, and foreigns use
/// this as their "invalid" marker; a function whose instance identity is
/// this sentinel is treated as a member of every compartment.
pub const INVALID_ID: usize = usize::MAX;

/// The per-memory virtual reservation required by the sandboxing scheme.
///
/// A guest address and a constant instruction offset are both 32-bit values
/// that are zero-extended and summed, so the largest reachable byte index is
/// `2^33 - 2`. Reserving 8 GiB per memory therefore makes every reachable
/// index land inside the reservation without any emitted bounds check.
pub const SANDBOX_RESERVATION_BYTES: u64 = 1 << 33;

/// A linear memory together with the size of the virtual region reserved
/// for it. The emitter refuses to lower direct memory accesses against a
/// plan whose reservation does not cover the sandbox contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryPlan {
    /// The memory type as declared by the module.
    pub memory: MemoryType,
    /// Bytes of contiguous virtual address space reserved for the memory.
    pub reserved_bytes: u64,
}

impl MemoryPlan {
    /// A plan carrying the full sandbox reservation.
    pub fn sandboxed(memory: MemoryType) -> Self {
        Self {
            memory,
            reserved_bytes: SANDBOX_RESERVATION_BYTES,
        }
    }

    /// Whether any zero-extended `address + offset` sum stays inside the
    /// reservation.
    pub fn has_sandbox_reservation(&self) -> bool {
        self.reserved_bytes >= SANDBOX_RESERVATION_BYTES
    }
}

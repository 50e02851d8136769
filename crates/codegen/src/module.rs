//! Compile-time module context.

use bulkhead_environ::{MemoryIndex, MemoryPlan};
use cranelift_entity::PrimaryMap;
use target_lexicon::{Architecture, Triple};

/// A linear memory as seen at compile time: its plan plus the runtime
/// identity of the memory it is bound to. The identity feeds the intrinsic
/// calls emitted for `memory.size`, `memory.grow`, `memory.init`, and the
/// wait/notify family.
#[derive(Clone, Debug)]
pub struct MemoryBinding {
    /// The memory's type and reservation.
    pub plan: MemoryPlan,
    /// The runtime identity of the bound memory.
    pub memory_id: usize,
}

/// Per-module state consulted while emitting function bodies: the target,
/// the instance identity, and the memory bindings in index order.
#[derive(Clone, Debug)]
pub struct ModuleContext {
    triple: Triple,
    instance_id: usize,
    memories: PrimaryMap<MemoryIndex, MemoryBinding>,
}

impl ModuleContext {
    /// Creates a context for the given target.
    pub fn new(triple: Triple, instance_id: usize) -> Self {
        Self {
            triple,
            instance_id,
            memories: PrimaryMap::new(),
        }
    }

    /// Creates a context targeting the host.
    pub fn for_host(instance_id: usize) -> Self {
        Self::new(Triple::host(), instance_id)
    }

    /// Binds the next memory index to `memory_id` with the given plan.
    pub fn push_memory(&mut self, plan: MemoryPlan, memory_id: usize) -> MemoryIndex {
        self.memories.push(MemoryBinding { plan, memory_id })
    }

    /// The target triple.
    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    /// The target architecture, which selects the bulk-op and interleaved
    /// lowerings.
    pub fn architecture(&self) -> Architecture {
        self.triple.architecture
    }

    /// The identity of the instance this module is compiled for.
    pub fn instance_id(&self) -> usize {
        self.instance_id
    }

    /// The binding of `index`. Operators referencing unknown memories are a
    /// validation failure upstream, so this panics rather than returning an
    /// error.
    pub fn memory(&self, index: MemoryIndex) -> &MemoryBinding {
        &self.memories[index]
    }
}

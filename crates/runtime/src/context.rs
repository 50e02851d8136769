//! Per-execution contexts.

use crate::compartment::Compartment;
use crate::runtime_data::ContextRuntimeData;
use anyhow::Result;
use std::sync::{Arc, Weak};

/// One execution's state within a compartment.
///
/// Creating a context commits its slice of the compartment's runtime-data
/// region and seeds the mutable-global slots from the compartment's
/// initial values. Contexts are per-execution and are never cloned with
/// their compartment.
pub struct Context {
    id: usize,
    compartment: Weak<Compartment>,
    runtime_data: *mut ContextRuntimeData,
}

// The runtime-data pointer targets the owning compartment's reservation,
// which outlives the context registration; access from multiple threads
// goes through the per-slot atomics or the emitted code's own discipline.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    /// Creates a context in `compartment`.
    pub fn new(compartment: &Arc<Compartment>) -> Result<Arc<Context>> {
        compartment.register_context(|id, runtime_data| {
            Arc::new(Context {
                id,
                compartment: Arc::downgrade(compartment),
                runtime_data,
            })
        })
    }

    /// The context's identity within its compartment.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The owning compartment, if it is still alive.
    pub fn compartment(&self) -> Option<Arc<Compartment>> {
        self.compartment.upgrade()
    }

    pub(crate) fn compartment_weak(&self) -> &Weak<Compartment> {
        &self.compartment
    }

    /// The context's slice of the compartment's runtime-data region. Valid
    /// while the owning compartment is alive.
    pub fn runtime_data(&self) -> *mut ContextRuntimeData {
        self.runtime_data
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish_non_exhaustive()
    }
}

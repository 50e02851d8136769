//! Functions and compiled-module handles.

use bulkhead_environ::INVALID_ID;
use std::sync::Arc;

/// A handle to one compilation's output. Functions record the handle they
/// were emitted from; handles are compared by identity, never by content.
pub struct CompiledModule {
    debug_name: String,
}

impl CompiledModule {
    /// Creates a fresh compiled-module handle.
    pub fn new(debug_name: impl Into<String>) -> Arc<CompiledModule> {
        Arc::new(CompiledModule {
            debug_name: debug_name.into(),
        })
    }

    /// The name used in diagnostics.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("debug_name", &self.debug_name)
            .finish()
    }
}

/// A function.
///
/// Functions are not owned by any compartment. Their identity is the pair
/// of the instance identity they were instantiated under and the compiled
/// module they came from; a compartment "contains" the function when its
/// instance at that identity holds the same compiled-module handle. A
/// function whose instance identity is the sentinel is contained by every
/// compartment.
pub struct Function {
    instance_id: usize,
    module: Arc<CompiledModule>,
    debug_name: String,
}

impl Function {
    /// Creates a function record for `instance_id` within `module`.
    pub fn new(
        instance_id: usize,
        module: Arc<CompiledModule>,
        debug_name: impl Into<String>,
    ) -> Arc<Function> {
        Arc::new(Function {
            instance_id,
            module,
            debug_name: debug_name.into(),
        })
    }

    /// Creates a function contained by every compartment, the form used
    /// for host-provided intrinsics.
    pub fn universal(module: Arc<CompiledModule>, debug_name: impl Into<String>) -> Arc<Function> {
        Self::new(INVALID_ID, module, debug_name)
    }

    /// The identity of the instance this function belongs to, or the
    /// sentinel for universally-contained functions.
    pub fn instance_id(&self) -> usize {
        self.instance_id
    }

    /// The compiled module this function was emitted from.
    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.module
    }

    /// The name used in diagnostics.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("instance_id", &self.instance_id)
            .field("debug_name", &self.debug_name)
            .finish_non_exhaustive()
    }
}

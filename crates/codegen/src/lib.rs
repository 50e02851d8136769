//! Code generation for sandboxed WebAssembly linear-memory operations.
//!
//! The emitter translates decoded memory operators into sequences over a
//! small SSA instruction set. Addresses are sandboxed by construction: a
//! guest address is zero-extended to 64 bits, the constant offset is added,
//! and the sum indexes the memory's reserved virtual region. No bounds
//! checks are emitted — the per-memory reservation is large enough that
//! every reachable index lands inside it, and lowering is refused when a
//! memory's plan does not carry that reservation.
//!
//! ```
//! use bulkhead_codegen::ir::{Function, Type};
//! use bulkhead_codegen::{FuncEmitter, ModuleContext};
//! use bulkhead_codegen::operators::{LoadOrStoreImm, Operator};
//! use bulkhead_environ::{MemoryPlan, MemoryType};
//!
//! let mut module = ModuleContext::for_host(0);
//! let memory_index = module.push_memory(
//!     MemoryPlan::sandboxed(MemoryType::new(1, None)),
//!     0,
//! );
//!
//! let mut func = Function::new();
//! let mut emitter = FuncEmitter::new(&mut func, &module);
//! emitter.declare_param(Type::I32);
//! emitter
//!     .translate_operator(&Operator::I32Load(LoadOrStoreImm {
//!         offset: 16,
//!         alignment_log2: 2,
//!         memory_index,
//!     }))
//!     .unwrap();
//! emitter.finish();
//! ```

#![warn(missing_docs)]

mod emit;
mod module;

pub mod interp;
pub mod intrinsics;
pub mod ir;
pub mod operators;

pub use crate::emit::{CodegenError, CodegenResult, FuncEmitter};
pub use crate::module::{MemoryBinding, ModuleContext};

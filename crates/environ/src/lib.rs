//! Standalone environment for the bulkhead compiler and runtime.
//!
//! This crate defines the types shared between code generation and the
//! runtime: value and object types, typed index spaces, trap codes, and the
//! ABI constants that both sides must agree on (page size, per-kind identity
//! ranges, and the sandbox reservation contract).

#![warn(missing_docs)]

mod abi;
mod indices;
mod trap;
mod types;
mod value;

pub use crate::abi::*;
pub use crate::indices::*;
pub use crate::trap::TrapCode;
pub use crate::types::*;
pub use crate::value::{UntaggedValue, Val};

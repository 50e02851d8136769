//! Trap raising and catching.
//!
//! Traps unwind from the raising intrinsic (or from interpreted guest
//! code) to the nearest [`catch_traps`] boundary. Intrinsic bodies compute
//! their outcome as a `Result` in a nested block so locals are dropped
//! before the unwind starts, then raise.

use bulkhead_environ::TrapCode;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// A trap unwinding out of WebAssembly execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trap {
    /// Why execution trapped.
    pub code: TrapCode,
    /// The faulting address, for memory-related traps.
    pub address: Option<u64>,
}

impl Trap {
    /// A trap without a faulting address.
    pub fn new(code: TrapCode) -> Self {
        Self {
            code,
            address: None,
        }
    }

    /// A trap recording the address that faulted.
    pub fn memory_fault(code: TrapCode, address: u64) -> Self {
        Self {
            code,
            address: Some(address),
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{} (address {address:#x})", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for Trap {}

impl From<TrapCode> for Trap {
    fn from(code: TrapCode) -> Self {
        Trap::new(code)
    }
}

/// Unwinds to the nearest [`catch_traps`] with the given trap.
pub fn raise(trap: Trap) -> ! {
    panic::panic_any(trap)
}

/// Runs `f`, catching any trap it raises. Non-trap panics keep unwinding.
pub fn catch_traps<T>(f: impl FnOnce() -> T) -> Result<T, Trap> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Trap>() {
            Ok(trap) => Err(*trap),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

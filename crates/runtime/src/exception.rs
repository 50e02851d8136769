//! Runtime exception types.

use crate::compartment::Compartment;
use anyhow::Result;
use bulkhead_environ::TupleType;
use std::sync::{Arc, Weak};

/// An exception type owned by a compartment.
pub struct ExceptionType {
    id: usize,
    compartment: Weak<Compartment>,
    sig: TupleType,
    debug_name: String,
}

impl ExceptionType {
    /// Creates an exception type in `compartment`.
    pub fn new(
        compartment: &Arc<Compartment>,
        sig: TupleType,
        debug_name: impl Into<String>,
    ) -> Result<Arc<ExceptionType>> {
        let debug_name = debug_name.into();
        compartment.register_exception_type(|id| {
            Arc::new(ExceptionType {
                id,
                compartment: Arc::downgrade(compartment),
                sig,
                debug_name,
            })
        })
    }

    /// Clones `source` into `destination` with the same identity.
    pub(crate) fn clone_into(
        source: &Arc<ExceptionType>,
        destination: &Arc<Compartment>,
    ) -> Result<Arc<ExceptionType>> {
        Ok(destination.register_exception_type_at(source.id, |id| {
            Arc::new(ExceptionType {
                id,
                compartment: Arc::downgrade(destination),
                sig: source.sig.clone(),
                debug_name: source.debug_name.clone(),
            })
        }))
    }

    /// The exception type's identity within its compartment.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The parameter tuple.
    pub fn sig(&self) -> &TupleType {
        &self.sig
    }

    /// The name used in diagnostics.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// The owning compartment, if it is still alive.
    pub fn compartment(&self) -> Option<Arc<Compartment>> {
        self.compartment.upgrade()
    }

    pub(crate) fn compartment_weak(&self) -> &Weak<Compartment> {
        &self.compartment
    }
}

impl std::fmt::Debug for ExceptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionType")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .finish_non_exhaustive()
    }
}

//! Opaque host references.

use crate::compartment::Compartment;
use anyhow::Result;
use std::any::Any;
use std::sync::{Arc, Weak};

/// An opaque host value registered in a compartment.
///
/// Foreigns are scoped to the compartment they were created in: cloning a
/// compartment does not clone its foreigns, so remapping a foreign into a
/// clone finds nothing.
pub struct Foreign {
    id: usize,
    compartment: Weak<Compartment>,
    data: Box<dyn Any + Send + Sync>,
}

impl Foreign {
    /// Registers a host value in `compartment`.
    pub fn new(
        compartment: &Arc<Compartment>,
        data: Box<dyn Any + Send + Sync>,
    ) -> Result<Arc<Foreign>> {
        compartment.register_foreign(|id| {
            Arc::new(Foreign {
                id,
                compartment: Arc::downgrade(compartment),
                data,
            })
        })
    }

    /// The foreign's identity within its compartment.
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

    /// The wrapped host value.
    pub fn data(&self) -> &(dyn Any + Send + Sync) {
        &*self.data
    }
}

impl std::fmt::Debug for Foreign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Foreign").field("id", &self.id).finish_non_exhaustive()
    }
}

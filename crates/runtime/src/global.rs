//! Runtime globals.

use crate::compartment::Compartment;
use anyhow::{bail, Result};
use bulkhead_environ::{GlobalType, UntaggedValue, Val};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A global owned by a compartment.
///
/// A mutable global also owns one compartment-wide mutable-global slot;
/// the slot index is part of the global's identity and survives cloning.
pub struct Global {
    id: usize,
    compartment: Weak<Compartment>,
    ty: GlobalType,
    debug_name: String,
    mutable_global_index: Option<u32>,
    initial_value: Mutex<UntaggedValue>,
    initialized: AtomicBool,
}

impl Global {
    /// Creates a global in `compartment`, allocating a mutable-global slot
    /// when the type is mutable.
    pub fn new(
        compartment: &Arc<Compartment>,
        ty: GlobalType,
        debug_name: impl Into<String>,
    ) -> Result<Arc<Global>> {
        let debug_name = debug_name.into();
        compartment.register_global(ty.mutable, |id, mutable_global_index| {
            Arc::new(Global {
                id,
                compartment: Arc::downgrade(compartment),
                ty,
                debug_name,
                mutable_global_index,
                initial_value: Mutex::new(UntaggedValue::ZERO),
                initialized: AtomicBool::new(false),
            })
        })
    }

    /// Clones `source` into `destination` with the same identity and the
    /// same mutable-global slot. The destination's slot mask must already
    /// record the slot as allocated (the cloner copies the mask before
    /// cloning globals).
    pub(crate) fn clone_into(
        source: &Arc<Global>,
        destination: &Arc<Compartment>,
    ) -> Result<Arc<Global>> {
        if let Some(slot) = source.mutable_global_index {
            assert!(
                destination.mutable_global_slot_is_allocated(slot),
                "clone destination is missing mutable-global slot {slot}"
            );
        }
        let initial_value = *source.initial_value.lock().unwrap();
        Ok(destination.register_global_at(source.id, |id| {
            Arc::new(Global {
                id,
                compartment: Arc::downgrade(destination),
                ty: source.ty,
                debug_name: source.debug_name.clone(),
                mutable_global_index: source.mutable_global_index,
                initial_value: Mutex::new(initial_value),
                initialized: AtomicBool::new(source.initialized.load(Ordering::SeqCst)),
            })
        }))
    }

    /// The global's identity within its compartment.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The global's type.
    pub fn ty(&self) -> GlobalType {
        self.ty
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

    /// The mutable-global slot, for mutable globals.
    pub fn mutable_global_index(&self) -> Option<u32> {
        self.mutable_global_index
    }

    /// Whether [`Global::initialize`] has run.
    pub fn has_been_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The initial value.
    pub fn initial_value(&self) -> UntaggedValue {
        *self.initial_value.lock().unwrap()
    }

    /// Sets the initial value, seeding the compartment's per-context slot
    /// for mutable globals. A global is initialized exactly once.
    pub fn initialize(&self, value: Val) -> Result<()> {
        if value.ty() != self.ty.value_type {
            bail!(
                "initializing {} global with a {} value",
                self.ty.value_type,
                value.ty()
            );
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            bail!("global {:?} is already initialized", self.debug_name);
        }
        let untagged = value.untagged();
        *self.initial_value.lock().unwrap() = untagged;
        if let (Some(slot), Some(compartment)) =
            (self.mutable_global_index, self.compartment.upgrade())
        {
            compartment.set_initial_mutable_global(slot, untagged);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Global")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .field("mutable_global_index", &self.mutable_global_index)
            .finish_non_exhaustive()
    }
}

//! Compartments: the containers that own runtime objects.
//!
//! A compartment owns seven identity-allocating maps (one per object
//! kind), the mutable-global slot mask with the per-slot initial values
//! every new context copies, and the reserved runtime-data region emitted
//! code addresses. All map and slot bookkeeping is serialised by one
//! reader-writer lock: lookups take it shared, registration, removal, and
//! slot mutation take it exclusive.

use crate::context::Context;
use crate::exception::ExceptionType;
use crate::foreign::Foreign;
use crate::global::Global;
use crate::id_map::IdMap;
use crate::instance::Instance;
use crate::memory::Memory;
use crate::mmap::{round_up_to_page_size, Mmap};
use crate::object::Object;
use crate::runtime_data::{
    CompartmentRuntimeData, ContextRuntimeData, COMPARTMENT_RUNTIME_DATA_ALIGNMENT_LOG2,
};
use crate::table::Table;
use anyhow::{anyhow, Result};
use bulkhead_environ::{
    UntaggedValue, INVALID_ID, MAX_CONTEXTS, MAX_MEMORIES, MAX_MUTABLE_GLOBALS, MAX_TABLES,
};
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

/// The fixed-size mask of allocated mutable-global slots.
#[derive(Clone)]
pub(crate) struct MutableGlobalMask {
    words: [u64; MAX_MUTABLE_GLOBALS / 64],
}

impl MutableGlobalMask {
    fn new() -> Self {
        Self {
            words: [0; MAX_MUTABLE_GLOBALS / 64],
        }
    }

    pub(crate) fn contains(&self, slot: u32) -> bool {
        self.words[slot as usize / 64] & (1 << (slot % 64)) != 0
    }

    fn clear(&mut self, slot: u32) {
        self.words[slot as usize / 64] &= !(1 << (slot % 64));
    }

    fn allocate(&mut self) -> Option<u32> {
        for (index, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones();
                *word |= 1 << bit;
                return Some(index as u32 * 64 + bit);
            }
        }
        None
    }
}

struct CompartmentStore {
    tables: IdMap<Arc<Table>>,
    memories: IdMap<Arc<Memory>>,
    globals: IdMap<Arc<Global>>,
    exception_types: IdMap<Arc<ExceptionType>>,
    instances: IdMap<Arc<Instance>>,
    contexts: IdMap<Arc<Context>>,
    foreigns: IdMap<Arc<Foreign>>,
    global_data_allocation_mask: MutableGlobalMask,
    initial_context_mutable_globals: Box<[UntaggedValue; MAX_MUTABLE_GLOBALS]>,
}

impl CompartmentStore {
    fn new() -> Self {
        Self {
            tables: IdMap::new(MAX_TABLES - 1),
            memories: IdMap::new(MAX_MEMORIES - 1),
            // Globals, exception types, instances, and foreigns use the
            // sentinel as their invalid marker, so their range stops one
            // short of it.
            globals: IdMap::new(INVALID_ID - 1),
            exception_types: IdMap::new(INVALID_ID - 1),
            instances: IdMap::new(INVALID_ID - 1),
            contexts: IdMap::new(MAX_CONTEXTS - 1),
            foreigns: IdMap::new(INVALID_ID - 1),
            global_data_allocation_mask: MutableGlobalMask::new(),
            initial_context_mutable_globals: Box::new(
                [UntaggedValue::ZERO; MAX_MUTABLE_GLOBALS],
            ),
        }
    }
}

/// An isolation container owning runtime objects and the runtime-data
/// region their emitted code addresses.
pub struct Compartment {
    store: RwLock<CompartmentStore>,
    runtime_data: Mmap,
}

impl Compartment {
    /// Creates an empty compartment, reserving its runtime-data region and
    /// committing the header ahead of the contexts array.
    pub fn new() -> Result<Arc<Compartment>> {
        let runtime_data = Mmap::reserve_aligned(
            mem::size_of::<CompartmentRuntimeData>(),
            COMPARTMENT_RUNTIME_DATA_ALIGNMENT_LOG2,
        )?;
        runtime_data.make_accessible(
            0,
            round_up_to_page_size(CompartmentRuntimeData::contexts_offset()),
        )?;

        let compartment = Arc::new(Compartment {
            store: RwLock::new(CompartmentStore::new()),
            runtime_data,
        });
        compartment
            .header()
            .compartment
            .store(Arc::as_ptr(&compartment) as usize, Ordering::SeqCst);
        Ok(compartment)
    }

    fn header(&self) -> &CompartmentRuntimeData {
        unsafe { &*(self.runtime_data.as_ptr() as *const CompartmentRuntimeData) }
    }

    /// The compartment's runtime-data region.
    pub fn runtime_data(&self) -> *mut CompartmentRuntimeData {
        self.runtime_data.as_ptr().cast()
    }

    /// Recovers the compartment from a pointer into one of its contexts'
    /// runtime data. This is how intrinsics find their compartment from
    /// the implicit context argument.
    ///
    /// # Safety
    ///
    /// `context` must point into the runtime-data region of a compartment
    /// that outlives `'a`.
    pub unsafe fn from_context<'a>(context: *mut ContextRuntimeData) -> &'a Compartment {
        let header = CompartmentRuntimeData::from_context(context);
        &*(header.compartment.load(Ordering::SeqCst) as *const Compartment)
    }

    /// Whether the compartment owns no objects.
    pub fn is_empty(&self) -> bool {
        let store = self.store.read().unwrap();
        store.tables.is_empty()
            && store.memories.is_empty()
            && store.globals.is_empty()
            && store.exception_types.is_empty()
            && store.instances.is_empty()
            && store.contexts.is_empty()
            && store.foreigns.is_empty()
    }

    /// Looks up a table by identity.
    pub fn table(&self, id: usize) -> Option<Arc<Table>> {
        self.store.read().unwrap().tables.get(id).cloned()
    }

    /// Looks up a memory by identity.
    pub fn memory(&self, id: usize) -> Option<Arc<Memory>> {
        self.store.read().unwrap().memories.get(id).cloned()
    }

    /// Looks up a global by identity.
    pub fn global(&self, id: usize) -> Option<Arc<Global>> {
        self.store.read().unwrap().globals.get(id).cloned()
    }

    /// Looks up an exception type by identity.
    pub fn exception_type(&self, id: usize) -> Option<Arc<ExceptionType>> {
        self.store.read().unwrap().exception_types.get(id).cloned()
    }

    /// Looks up an instance by identity.
    pub fn instance(&self, id: usize) -> Option<Arc<Instance>> {
        self.store.read().unwrap().instances.get(id).cloned()
    }

    /// Looks up a context by identity.
    pub fn context(&self, id: usize) -> Option<Arc<Context>> {
        self.store.read().unwrap().contexts.get(id).cloned()
    }

    /// Looks up a foreign by identity.
    pub fn foreign(&self, id: usize) -> Option<Arc<Foreign>> {
        self.store.read().unwrap().foreigns.get(id).cloned()
    }

    /// Whether `slot` is recorded as allocated in the mutable-global mask.
    pub fn mutable_global_slot_is_allocated(&self, slot: u32) -> bool {
        self.store
            .read()
            .unwrap()
            .global_data_allocation_mask
            .contains(slot)
    }

    /// The initial value a new context copies into mutable-global `slot`.
    pub fn initial_mutable_global(&self, slot: u32) -> UntaggedValue {
        self.store.read().unwrap().initial_context_mutable_globals[slot as usize]
    }

    pub(crate) fn set_initial_mutable_global(&self, slot: u32, value: UntaggedValue) {
        self.store.write().unwrap().initial_context_mutable_globals[slot as usize] = value;
    }

    pub(crate) fn register_memory(
        &self,
        make: impl FnOnce(usize) -> Arc<Memory>,
    ) -> Result<Arc<Memory>> {
        let mut store = self.store.write().unwrap();
        let (id, memory) = store
            .memories
            .insert_with(make)
            .ok_or_else(|| anyhow!("compartment is out of memory identities"))?;
        let memory = memory.clone();
        self.header().memory_bases[id].store(memory.base() as usize, Ordering::SeqCst);
        Ok(memory)
    }

    pub(crate) fn register_memory_at(
        &self,
        id: usize,
        make: impl FnOnce(usize) -> Arc<Memory>,
    ) -> Arc<Memory> {
        let mut store = self.store.write().unwrap();
        let memory = store.memories.insert_at_with(id, make).clone();
        self.header().memory_bases[id].store(memory.base() as usize, Ordering::SeqCst);
        memory
    }

    /// Removes a memory, clearing its base-pointer slot.
    pub fn remove_memory(&self, id: usize) -> Option<Arc<Memory>> {
        let mut store = self.store.write().unwrap();
        let removed = store.memories.remove(id);
        if removed.is_some() {
            self.header().memory_bases[id].store(0, Ordering::SeqCst);
        }
        removed
    }

    pub(crate) fn register_table(
        &self,
        make: impl FnOnce(usize) -> Arc<Table>,
    ) -> Result<Arc<Table>> {
        let mut store = self.store.write().unwrap();
        let (id, table) = store
            .tables
            .insert_with(make)
            .ok_or_else(|| anyhow!("compartment is out of table identities"))?;
        let table = table.clone();
        self.header().table_bases[id].store(table.base() as usize, Ordering::SeqCst);
        Ok(table)
    }

    pub(crate) fn register_table_at(
        &self,
        id: usize,
        make: impl FnOnce(usize) -> Arc<Table>,
    ) -> Arc<Table> {
        let mut store = self.store.write().unwrap();
        let table = store.tables.insert_at_with(id, make).clone();
        self.header().table_bases[id].store(table.base() as usize, Ordering::SeqCst);
        table
    }

    /// Removes a table, clearing its base-pointer slot.
    pub fn remove_table(&self, id: usize) -> Option<Arc<Table>> {
        let mut store = self.store.write().unwrap();
        let removed = store.tables.remove(id);
        if removed.is_some() {
            self.header().table_bases[id].store(0, Ordering::SeqCst);
        }
        removed
    }

    pub(crate) fn register_global(
        &self,
        mutable: bool,
        make: impl FnOnce(usize, Option<u32>) -> Arc<Global>,
    ) -> Result<Arc<Global>> {
        let mut store = self.store.write().unwrap();
        let slot = if mutable {
            Some(
                store
                    .global_data_allocation_mask
                    .allocate()
                    .ok_or_else(|| anyhow!("compartment is out of mutable-global slots"))?,
            )
        } else {
            None
        };
        let inserted = store
            .globals
            .insert_with(|id| make(id, slot))
            .map(|(_, global)| global.clone());
        match inserted {
            Some(global) => Ok(global),
            None => {
                if let Some(slot) = slot {
                    store.global_data_allocation_mask.clear(slot);
                }
                Err(anyhow!("compartment is out of global identities"))
            }
        }
    }

    pub(crate) fn register_global_at(
        &self,
        id: usize,
        make: impl FnOnce(usize) -> Arc<Global>,
    ) -> Arc<Global> {
        let mut store = self.store.write().unwrap();
        store.globals.insert_at_with(id, make).clone()
    }

    /// Removes a global, freeing its mutable-global slot if it has one.
    pub fn remove_global(&self, id: usize) -> Option<Arc<Global>> {
        let mut store = self.store.write().unwrap();
        let removed = store.globals.remove(id);
        if let Some(global) = &removed {
            if let Some(slot) = global.mutable_global_index() {
                store.global_data_allocation_mask.clear(slot);
            }
        }
        removed
    }

    pub(crate) fn register_exception_type(
        &self,
        make: impl FnOnce(usize) -> Arc<ExceptionType>,
    ) -> Result<Arc<ExceptionType>> {
        let mut store = self.store.write().unwrap();
        let (_, exception_type) = store
            .exception_types
            .insert_with(make)
            .ok_or_else(|| anyhow!("compartment is out of exception-type identities"))?;
        Ok(exception_type.clone())
    }

    pub(crate) fn register_exception_type_at(
        &self,
        id: usize,
        make: impl FnOnce(usize) -> Arc<ExceptionType>,
    ) -> Arc<ExceptionType> {
        let mut store = self.store.write().unwrap();
        store.exception_types.insert_at_with(id, make).clone()
    }

    /// Removes an exception type.
    pub fn remove_exception_type(&self, id: usize) -> Option<Arc<ExceptionType>> {
        self.store.write().unwrap().exception_types.remove(id)
    }

    pub(crate) fn register_instance(
        &self,
        make: impl FnOnce(usize) -> Arc<Instance>,
    ) -> Result<Arc<Instance>> {
        let mut store = self.store.write().unwrap();
        let (_, instance) = store
            .instances
            .insert_with(make)
            .ok_or_else(|| anyhow!("compartment is out of instance identities"))?;
        Ok(instance.clone())
    }

    pub(crate) fn register_instance_at(
        &self,
        id: usize,
        make: impl FnOnce(usize) -> Arc<Instance>,
    ) -> Arc<Instance> {
        let mut store = self.store.write().unwrap();
        store.instances.insert_at_with(id, make).clone()
    }

    /// Removes an instance.
    pub fn remove_instance(&self, id: usize) -> Option<Arc<Instance>> {
        self.store.write().unwrap().instances.remove(id)
    }

    pub(crate) fn register_context(
        &self,
        make: impl FnOnce(usize, *mut ContextRuntimeData) -> Arc<Context>,
    ) -> Result<Arc<Context>> {
        let mut store = self.store.write().unwrap();
        let id = store
            .contexts
            .peek_free_id()
            .ok_or_else(|| anyhow!("compartment is out of context identities"))?;

        // Commit the context's slice of the region and seed its
        // mutable-global slots before the context becomes visible.
        let offset = CompartmentRuntimeData::context_offset(id);
        let size = mem::size_of::<ContextRuntimeData>();
        let page_size = rustix::param::page_size();
        let commit_start = offset & !(page_size - 1);
        let commit_len = round_up_to_page_size(offset + size) - commit_start;
        self.runtime_data.make_accessible(commit_start, commit_len)?;

        let data = unsafe { self.runtime_data.as_ptr().add(offset) } as *mut ContextRuntimeData;
        unsafe {
            for (slot, value) in store.initial_context_mutable_globals.iter().enumerate() {
                (*data).mutable_globals[slot] = *value;
            }
        }

        Ok(store.contexts.insert_at_with(id, |id| make(id, data)).clone())
    }

    /// Removes a context. Its runtime-data slice stays committed.
    pub fn remove_context(&self, id: usize) -> Option<Arc<Context>> {
        self.store.write().unwrap().contexts.remove(id)
    }

    pub(crate) fn register_foreign(
        &self,
        make: impl FnOnce(usize) -> Arc<Foreign>,
    ) -> Result<Arc<Foreign>> {
        let mut store = self.store.write().unwrap();
        let (_, foreign) = store
            .foreigns
            .insert_with(make)
            .ok_or_else(|| anyhow!("compartment is out of foreign identities"))?;
        Ok(foreign.clone())
    }

    /// Removes a foreign.
    pub fn remove_foreign(&self, id: usize) -> Option<Arc<Foreign>> {
        self.store.write().unwrap().foreigns.remove(id)
    }

    /// Removes every owned object, leaving the compartment empty. The
    /// owner is expected to call this (directly or via its collector)
    /// before dropping the compartment.
    pub fn clear(&self) {
        let mut store = self.store.write().unwrap();

        let context_ids: Vec<usize> = store.contexts.iter().map(|(id, _)| id).collect();
        for id in context_ids {
            store.contexts.remove(id);
        }
        let instance_ids: Vec<usize> = store.instances.iter().map(|(id, _)| id).collect();
        for id in instance_ids {
            store.instances.remove(id);
        }
        let foreign_ids: Vec<usize> = store.foreigns.iter().map(|(id, _)| id).collect();
        for id in foreign_ids {
            store.foreigns.remove(id);
        }
        let global_ids: Vec<usize> = store.globals.iter().map(|(id, _)| id).collect();
        for id in global_ids {
            if let Some(global) = store.globals.remove(id) {
                if let Some(slot) = global.mutable_global_index() {
                    store.global_data_allocation_mask.clear(slot);
                }
            }
        }
        let exception_type_ids: Vec<usize> =
            store.exception_types.iter().map(|(id, _)| id).collect();
        for id in exception_type_ids {
            store.exception_types.remove(id);
        }
        let table_ids: Vec<usize> = store.tables.iter().map(|(id, _)| id).collect();
        for id in table_ids {
            store.tables.remove(id);
            self.header().table_bases[id].store(0, Ordering::SeqCst);
        }
        let memory_ids: Vec<usize> = store.memories.iter().map(|(id, _)| id).collect();
        for id in memory_ids {
            store.memories.remove(id);
            self.header().memory_bases[id].store(0, Ordering::SeqCst);
        }
    }
}

impl Drop for Compartment {
    fn drop(&mut self) {
        // Destroying a compartment that still owns objects is a bug in the
        // caller's lifetime management.
        let store = self.store.get_mut().unwrap();
        assert!(store.tables.is_empty(), "compartment dropped with live tables");
        assert!(store.memories.is_empty(), "compartment dropped with live memories");
        assert!(store.globals.is_empty(), "compartment dropped with live globals");
        assert!(
            store.exception_types.is_empty(),
            "compartment dropped with live exception types"
        );
        assert!(
            store.instances.is_empty(),
            "compartment dropped with live instances"
        );
        assert!(store.contexts.is_empty(), "compartment dropped with live contexts");
        assert!(store.foreigns.is_empty(), "compartment dropped with live foreigns");
    }
}

impl std::fmt::Debug for Compartment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.read().unwrap();
        f.debug_struct("Compartment")
            .field("tables", &store.tables.len())
            .field("memories", &store.memories.len())
            .field("globals", &store.globals.len())
            .field("exception_types", &store.exception_types.len())
            .field("instances", &store.instances.len())
            .field("contexts", &store.contexts.len())
            .field("foreigns", &store.foreigns.len())
            .finish_non_exhaustive()
    }
}

/// Clones a compartment: a new compartment containing a structurally
/// equivalent object for every table, memory, global, exception type, and
/// instance of the source, each at the identity its source holds.
/// Foreigns are uniquely scoped and contexts are per-execution, so neither
/// is cloned; functions are compartment-less and need no cloning.
pub fn clone_compartment(compartment: &Arc<Compartment>) -> Result<Arc<Compartment>> {
    let started = Instant::now();
    let new_compartment = Compartment::new()?;
    let store = compartment.store.read().unwrap();

    for (_, table) in store.tables.iter() {
        let new_table = Table::clone_into(table, &new_compartment)?;
        assert_eq!(new_table.id(), table.id());
    }

    for (_, memory) in store.memories.iter() {
        let new_memory = Memory::clone_into(memory, &new_compartment)?;
        assert_eq!(new_memory.id(), memory.id());
    }

    // The slot mask and per-context seed values are copied verbatim before
    // the globals, so every cloned global finds its slot already marked
    // allocated.
    {
        let mut new_store = new_compartment.store.write().unwrap();
        new_store.global_data_allocation_mask = store.global_data_allocation_mask.clone();
        *new_store.initial_context_mutable_globals = *store.initial_context_mutable_globals;
    }
    for (_, global) in store.globals.iter() {
        let new_global = Global::clone_into(global, &new_compartment)?;
        assert_eq!(new_global.id(), global.id());
        assert_eq!(
            new_global.mutable_global_index(),
            global.mutable_global_index()
        );
    }

    for (_, exception_type) in store.exception_types.iter() {
        let new_exception_type = ExceptionType::clone_into(exception_type, &new_compartment)?;
        assert_eq!(new_exception_type.id(), exception_type.id());
    }

    for (_, instance) in store.instances.iter() {
        let new_instance = Instance::clone_into(instance, &new_compartment)?;
        assert_eq!(new_instance.id(), instance.id());
    }

    log::debug!("cloned compartment in {:?}", started.elapsed());
    Ok(new_compartment)
}

fn owned_by(weak: &Weak<Compartment>, compartment: &Arc<Compartment>) -> bool {
    std::ptr::eq(weak.as_ptr(), Arc::as_ptr(compartment))
}

/// Whether `object` belongs to `compartment`.
///
/// Non-function objects belong to exactly the compartment that created
/// them. A function belongs to a compartment when that compartment's
/// instance at the function's instance identity holds the compiled-module
/// handle the function was emitted from — which holds in clones of the
/// function's home compartment, but not for an unrelated instance that
/// happens to reuse the identity. Functions with the sentinel instance
/// identity belong to every compartment.
pub fn is_in_compartment(object: &Object, compartment: &Arc<Compartment>) -> bool {
    match object {
        Object::Function(function) => {
            if function.instance_id() == INVALID_ID {
                return true;
            }
            let store = compartment.store.read().unwrap();
            match store.instances.get(function.instance_id()) {
                Some(instance) => Arc::ptr_eq(instance.module(), function.module()),
                None => false,
            }
        }
        Object::Table(table) => owned_by(table.compartment_weak(), compartment),
        Object::Memory(memory) => owned_by(memory.compartment_weak(), compartment),
        Object::Global(global) => owned_by(global.compartment_weak(), compartment),
        Object::ExceptionType(exception_type) => {
            owned_by(exception_type.compartment_weak(), compartment)
        }
        Object::Instance(instance) => owned_by(instance.compartment_weak(), compartment),
        Object::Context(context) => owned_by(context.compartment_weak(), compartment),
        Object::Foreign(foreign) => owned_by(foreign.compartment_weak(), compartment),
    }
}

/// Finds the object in `new_compartment` corresponding to `object` in a
/// cloned compartment: the object of the same kind at the same identity.
/// Functions map to themselves. Returns `None` when no peer exists, which
/// is the case for foreigns and contexts since neither is cloned.
pub fn remap_to_cloned_compartment(
    object: Option<&Object>,
    new_compartment: &Arc<Compartment>,
) -> Option<Object> {
    let object = object?;
    Some(match object {
        Object::Function(function) => Object::Function(function.clone()),
        Object::Table(table) => Object::Table(new_compartment.table(table.id())?),
        Object::Memory(memory) => Object::Memory(new_compartment.memory(memory.id())?),
        Object::Global(global) => Object::Global(new_compartment.global(global.id())?),
        Object::ExceptionType(exception_type) => {
            Object::ExceptionType(new_compartment.exception_type(exception_type.id())?)
        }
        Object::Instance(instance) => Object::Instance(new_compartment.instance(instance.id())?),
        Object::Context(context) => Object::Context(new_compartment.context(context.id())?),
        Object::Foreign(foreign) => Object::Foreign(new_compartment.foreign(foreign.id())?),
    })
}

/// Per-kind remap for tables.
pub fn remap_table(table: &Arc<Table>, new_compartment: &Arc<Compartment>) -> Option<Arc<Table>> {
    new_compartment.table(table.id())
}

/// Per-kind remap for memories.
pub fn remap_memory(
    memory: &Arc<Memory>,
    new_compartment: &Arc<Compartment>,
) -> Option<Arc<Memory>> {
    new_compartment.memory(memory.id())
}

/// Per-kind remap for globals.
pub fn remap_global(
    global: &Arc<Global>,
    new_compartment: &Arc<Compartment>,
) -> Option<Arc<Global>> {
    new_compartment.global(global.id())
}

/// Per-kind remap for exception types.
pub fn remap_exception_type(
    exception_type: &Arc<ExceptionType>,
    new_compartment: &Arc<Compartment>,
) -> Option<Arc<ExceptionType>> {
    new_compartment.exception_type(exception_type.id())
}

/// Per-kind remap for instances.
pub fn remap_instance(
    instance: &Arc<Instance>,
    new_compartment: &Arc<Compartment>,
) -> Option<Arc<Instance>> {
    new_compartment.instance(instance.id())
}

/// Per-kind remap for foreigns. Cloning copies no foreigns, so remapping a
/// source compartment's foreign into its clone finds nothing; that is an
/// intentional property of the model, not an oversight here.
pub fn remap_foreign(
    foreign: &Arc<Foreign>,
    new_compartment: &Arc<Compartment>,
) -> Option<Arc<Foreign>> {
    new_compartment.foreign(foreign.id())
}

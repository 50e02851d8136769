//! Runtime instances.

use crate::compartment::Compartment;
use crate::exception::ExceptionType;
use crate::function::{CompiledModule, Function};
use crate::global::Global;
use crate::memory::Memory;
use crate::object::Object;
use crate::table::Table;
use crate::traps::Trap;
use anyhow::Result;
use bulkhead_environ::TrapCode;
use indexmap::IndexMap;
use std::sync::{Arc, RwLock, Weak};

/// The contents of a passive element segment: one optional function per
/// element.
pub type ElemSegmentContents = Vec<Option<Arc<Function>>>;

/// Everything an instance is built from. The instantiation driver resolves
/// imports and definitions into these vectors before registration.
pub struct InstanceObjects {
    /// The instance's functions, in index order.
    pub functions: Vec<Arc<Function>>,
    /// The instance's tables, in index order.
    pub tables: Vec<Arc<Table>>,
    /// The instance's memories, in index order.
    pub memories: Vec<Arc<Memory>>,
    /// The instance's globals, in index order.
    pub globals: Vec<Arc<Global>>,
    /// The instance's exception types, in index order.
    pub exception_types: Vec<Arc<ExceptionType>>,
    /// Exports by name, in declaration order.
    pub exports: IndexMap<String, Object>,
    /// The start function, if any.
    pub start_function: Option<Arc<Function>>,
    /// Passive data segments, in index order.
    pub passive_data_segments: Vec<Arc<Vec<u8>>>,
    /// Passive element segments, in index order.
    pub passive_elem_segments: Vec<Arc<ElemSegmentContents>>,
    /// The compiled module the instance's functions came from.
    pub module: Arc<CompiledModule>,
}

impl InstanceObjects {
    /// An empty set of contents for `module`.
    pub fn new(module: Arc<CompiledModule>) -> Self {
        Self {
            functions: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            exception_types: Vec::new(),
            exports: IndexMap::new(),
            start_function: None,
            passive_data_segments: Vec::new(),
            passive_elem_segments: Vec::new(),
            module,
        }
    }
}

/// An instantiated module owned by a compartment.
///
/// Passive segment slots are dropped in place: a dropped slot stays in the
/// vector as `None`, and any later use (including a second drop) raises
/// the invalid-argument trap.
pub struct Instance {
    id: usize,
    compartment: Weak<Compartment>,
    debug_name: String,
    functions: Vec<Arc<Function>>,
    tables: Vec<Arc<Table>>,
    memories: Vec<Arc<Memory>>,
    globals: Vec<Arc<Global>>,
    exception_types: Vec<Arc<ExceptionType>>,
    exports: IndexMap<String, Object>,
    start_function: Option<Arc<Function>>,
    data_segments: RwLock<Vec<Option<Arc<Vec<u8>>>>>,
    elem_segments: RwLock<Vec<Option<Arc<ElemSegmentContents>>>>,
    module: Arc<CompiledModule>,
}

impl Instance {
    /// Registers an instance in `compartment`.
    pub fn new(
        compartment: &Arc<Compartment>,
        objects: InstanceObjects,
        debug_name: impl Into<String>,
    ) -> Result<Arc<Instance>> {
        let debug_name = debug_name.into();
        compartment.register_instance(move |id| {
            Arc::new(Instance {
                id,
                compartment: Arc::downgrade(compartment),
                debug_name,
                functions: objects.functions,
                tables: objects.tables,
                memories: objects.memories,
                globals: objects.globals,
                exception_types: objects.exception_types,
                exports: objects.exports,
                start_function: objects.start_function,
                data_segments: RwLock::new(
                    objects.passive_data_segments.into_iter().map(Some).collect(),
                ),
                elem_segments: RwLock::new(
                    objects.passive_elem_segments.into_iter().map(Some).collect(),
                ),
                module: objects.module,
            })
        })
    }

    /// Clones `source` into `destination` with the same identity,
    /// re-resolving its objects to their peers in the destination. The
    /// compiled-module handle is shared with the source, which is what
    /// keeps the source's functions valid in the clone.
    pub(crate) fn clone_into(
        source: &Arc<Instance>,
        destination: &Arc<Compartment>,
    ) -> Result<Arc<Instance>> {
        let remap_table = |table: &Arc<Table>| {
            destination
                .table(table.id())
                .expect("tables are cloned before instances")
        };
        let remap_memory = |memory: &Arc<Memory>| {
            destination
                .memory(memory.id())
                .expect("memories are cloned before instances")
        };
        let remap_global = |global: &Arc<Global>| {
            destination
                .global(global.id())
                .expect("globals are cloned before instances")
        };
        let remap_exception_type = |exception_type: &Arc<ExceptionType>| {
            destination
                .exception_type(exception_type.id())
                .expect("exception types are cloned before instances")
        };
        let remap_export = |object: &Object| match object {
            Object::Function(function) => Object::Function(function.clone()),
            Object::Table(table) => Object::Table(remap_table(table)),
            Object::Memory(memory) => Object::Memory(remap_memory(memory)),
            Object::Global(global) => Object::Global(remap_global(global)),
            Object::ExceptionType(exception_type) => {
                Object::ExceptionType(remap_exception_type(exception_type))
            }
            other => panic!("unexpected export kind {:?} in clone", other.kind()),
        };

        // Resolve everything before registration: the registration closure
        // runs under the destination's exclusive lock, where further
        // destination lookups would self-deadlock.
        let tables: Vec<_> = source.tables.iter().map(remap_table).collect();
        let memories: Vec<_> = source.memories.iter().map(remap_memory).collect();
        let globals: Vec<_> = source.globals.iter().map(remap_global).collect();
        let exception_types: Vec<_> = source
            .exception_types
            .iter()
            .map(remap_exception_type)
            .collect();
        let exports: IndexMap<String, Object> = source
            .exports
            .iter()
            .map(|(name, object)| (name.clone(), remap_export(object)))
            .collect();
        let data_segments = source.data_segments.read().unwrap().clone();
        let elem_segments = source.elem_segments.read().unwrap().clone();

        Ok(destination.register_instance_at(source.id, move |id| {
            Arc::new(Instance {
                id,
                compartment: Arc::downgrade(destination),
                debug_name: source.debug_name.clone(),
                functions: source.functions.clone(),
                tables,
                memories,
                globals,
                exception_types,
                exports,
                start_function: source.start_function.clone(),
                data_segments: RwLock::new(data_segments),
                elem_segments: RwLock::new(elem_segments),
                module: source.module.clone(),
            })
        }))
    }

    /// The instance's identity within its compartment.
    pub fn id(&self) -> usize {
        self.id
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

    /// The compiled module this instance was instantiated from.
    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.module
    }

    /// The instance's functions, in index order.
    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    /// The instance's memories, in index order.
    pub fn memories(&self) -> &[Arc<Memory>] {
        &self.memories
    }

    /// The instance's tables, in index order.
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// The instance's globals, in index order.
    pub fn globals(&self) -> &[Arc<Global>] {
        &self.globals
    }

    /// The instance's exception types, in index order.
    pub fn exception_types(&self) -> &[Arc<ExceptionType>] {
        &self.exception_types
    }

    /// The start function, if any.
    pub fn start_function(&self) -> Option<&Arc<Function>> {
        self.start_function.as_ref()
    }

    /// Looks up an export by name.
    pub fn export(&self, name: &str) -> Option<Object> {
        self.exports.get(name).cloned()
    }

    /// The exports in declaration order.
    pub fn exports(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.exports.iter().map(|(name, object)| (name.as_str(), object))
    }

    /// The contents of a passive data segment. Unknown indices and dropped
    /// segments both raise the invalid-argument trap, matching the
    /// original system's folding of those cases.
    pub fn data_segment(&self, index: usize) -> Result<Arc<Vec<u8>>, Trap> {
        match self.data_segments.read().unwrap().get(index) {
            Some(Some(segment)) => Ok(segment.clone()),
            _ => Err(Trap::new(TrapCode::InvalidArgument)),
        }
    }

    /// Drops a passive data segment. Dropping an unknown or
    /// already-dropped segment raises the invalid-argument trap.
    pub fn drop_data_segment(&self, index: usize) -> Result<(), Trap> {
        match self.data_segments.write().unwrap().get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                log::trace!("instance {:?} dropped data segment {index}", self.debug_name);
                Ok(())
            }
            _ => Err(Trap::new(TrapCode::InvalidArgument)),
        }
    }

    /// The contents of a passive element segment, with the same trap
    /// mapping as [`Instance::data_segment`].
    pub fn elem_segment(&self, index: usize) -> Result<Arc<ElemSegmentContents>, Trap> {
        match self.elem_segments.read().unwrap().get(index) {
            Some(Some(segment)) => Ok(segment.clone()),
            _ => Err(Trap::new(TrapCode::InvalidArgument)),
        }
    }

    /// Drops a passive element segment, with the same trap mapping as
    /// [`Instance::drop_data_segment`].
    pub fn drop_elem_segment(&self, index: usize) -> Result<(), Trap> {
        match self.elem_segments.write().unwrap().get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                log::trace!("instance {:?} dropped elem segment {index}", self.debug_name);
                Ok(())
            }
            _ => Err(Trap::new(TrapCode::InvalidArgument)),
        }
    }

    /// Copies `num_bytes` from offset `source_offset` of a passive data
    /// segment to `dest_address` in `memory`, with bounds checks on both
    /// sides.
    pub fn init_data_segment(
        &self,
        memory: &Memory,
        segment_index: usize,
        dest_address: u64,
        source_offset: u64,
        num_bytes: u64,
    ) -> Result<(), Trap> {
        let segment = self.data_segment(segment_index)?;
        let end = source_offset
            .checked_add(num_bytes)
            .filter(|&end| end <= segment.len() as u64)
            .ok_or_else(|| {
                Trap::memory_fault(TrapCode::OutOfBoundsDataSegmentAccess, source_offset)
            })?;
        memory.write(
            dest_address,
            &segment[source_offset as usize..end as usize],
        )
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .finish_non_exhaustive()
    }
}

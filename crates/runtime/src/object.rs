//! The object sum type.

use crate::context::Context;
use crate::exception::ExceptionType;
use crate::foreign::Foreign;
use crate::function::Function;
use crate::global::Global;
use crate::instance::Instance;
use crate::memory::Memory;
use crate::table::Table;
use std::sync::Arc;

/// The kinds of runtime objects.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ObjectKind {
    /// A function.
    Function,
    /// A table.
    Table,
    /// A linear memory.
    Memory,
    /// A global.
    Global,
    /// An exception type.
    ExceptionType,
    /// An instance.
    Instance,
    /// An execution context.
    Context,
    /// An opaque host reference.
    Foreign,
}

/// Any runtime object.
#[derive(Clone, Debug)]
pub enum Object {
    /// A function.
    Function(Arc<Function>),
    /// A table.
    Table(Arc<Table>),
    /// A linear memory.
    Memory(Arc<Memory>),
    /// A global.
    Global(Arc<Global>),
    /// An exception type.
    ExceptionType(Arc<ExceptionType>),
    /// An instance.
    Instance(Arc<Instance>),
    /// An execution context.
    Context(Arc<Context>),
    /// An opaque host reference.
    Foreign(Arc<Foreign>),
}

impl Object {
    /// This object's kind.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Function(_) => ObjectKind::Function,
            Object::Table(_) => ObjectKind::Table,
            Object::Memory(_) => ObjectKind::Memory,
            Object::Global(_) => ObjectKind::Global,
            Object::ExceptionType(_) => ObjectKind::ExceptionType,
            Object::Instance(_) => ObjectKind::Instance,
            Object::Context(_) => ObjectKind::Context,
            Object::Foreign(_) => ObjectKind::Foreign,
        }
    }
}

impl From<Arc<Function>> for Object {
    fn from(function: Arc<Function>) -> Object {
        Object::Function(function)
    }
}

impl From<Arc<Table>> for Object {
    fn from(table: Arc<Table>) -> Object {
        Object::Table(table)
    }
}

impl From<Arc<Memory>> for Object {
    fn from(memory: Arc<Memory>) -> Object {
        Object::Memory(memory)
    }
}

impl From<Arc<Global>> for Object {
    fn from(global: Arc<Global>) -> Object {
        Object::Global(global)
    }
}

impl From<Arc<ExceptionType>> for Object {
    fn from(exception_type: Arc<ExceptionType>) -> Object {
        Object::ExceptionType(exception_type)
    }
}

impl From<Arc<Instance>> for Object {
    fn from(instance: Arc<Instance>) -> Object {
        Object::Instance(instance)
    }
}

impl From<Arc<Context>> for Object {
    fn from(context: Arc<Context>) -> Object {
        Object::Context(context)
    }
}

impl From<Arc<Foreign>> for Object {
    fn from(foreign: Arc<Foreign>) -> Object {
        Object::Foreign(foreign)
    }
}

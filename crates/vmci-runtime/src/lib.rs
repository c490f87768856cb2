//! Interpreter-side model for the compiler interface
//!
//! This crate holds the live structures a compiler interface reads: the
//! class registry, method and field arenas, constant pools with their
//! resolution cells, dispatch tables and heap objects. It does not execute
//! bytecode; bootstrap methods for dynamic constants and call sites run
//! through a pluggable [`Bootstrapper`].

#![warn(rust_2018_idioms)]

pub mod access;
pub mod bytecode;
pub mod class;
pub mod descriptor;
pub mod field;
pub mod flags;
pub mod kind;
pub mod layout;
mod linker;
mod loader;
pub mod method;
pub mod object;
pub mod pool;
mod resolution;
pub mod runtime;
pub mod symbol;

pub use class::{ClassDefinition, ClassState, FieldDefinition, Klass, KlassId, KlassKind, LoaderId, MethodDefinition};
pub use field::{Field, FieldId};
pub use flags::AccessFlags;
pub use kind::JavaKind;
pub use method::{CodeAttribute, Method, MethodId, MethodOrigin};
pub use object::{CallSiteLink, ObjectRef, Payload, Value};
pub use pool::{ConstantPool, ConstantPoolBuilder, PoolEntry, PoolTag, Resolved};
pub use runtime::{well_known, BootstrapRequest, Bootstrapper, NoBootstrapper, Runtime};
pub use symbol::{Symbol, SymbolTable};

use thiserror::Error;

/// Linkage failures raised by loading, linking and resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkageError {
    /// Class could not be found
    #[error("NoClassDefFoundError: {0}")]
    NoClassDefFound(String),

    /// Malformed class definition or constant pool entry
    #[error("ClassFormatError: {0}")]
    ClassFormat(String),

    /// Class hierarchy or member kind changed incompatibly
    #[error("IncompatibleClassChangeError: {0}")]
    IncompatibleClassChange(String),

    /// Class is its own superclass or superinterface
    #[error("ClassCircularityError: {0}")]
    ClassCircularity(String),

    /// Field reference names no field
    #[error("NoSuchFieldError: {0}")]
    NoSuchField(String),

    /// Method reference names no method
    #[error("NoSuchMethodError: {0}")]
    NoSuchMethod(String),

    /// Member or class not accessible from the referencing class
    #[error("IllegalAccessError: {0}")]
    IllegalAccess(String),

    /// Bootstrap method failed or produced an unusable value
    #[error("BootstrapMethodError: {0}")]
    BootstrapFailed(String),
}

/// Result of a loading, linking or resolution step
pub type RuntimeResult<T> = Result<T, LinkageError>;

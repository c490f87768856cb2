//! Compiler-interface bridge
//!
//! Exposes the interpreter's types, methods, fields and constant pools to an
//! external compiler as handles. Every operation takes an explicit
//! [`BridgeContext`], obtained through [`Bridge::context`]. The enablement
//! gate is checked again by every operation that drives the runtime or
//! creates a handle or constant, so switching the bridge off also stops
//! contexts handed out earlier. Scalar queries on an existing handle are
//! not gated.
//!
//! Expected negative outcomes (no dispatch target, constant not resolved
//! yet) are `None`. Misuse is a [`BridgeError`]. Linkage failures raised by
//! forced resolution are passed through unchanged as [`BridgeError::Linkage`].

#![warn(rust_2018_idioms)]

pub mod bootstrap;
pub mod config;
pub mod constant;
pub mod context;
pub mod field;
mod indy;
pub mod method;
pub mod pool;
pub mod resolve;
pub mod types;

use std::sync::Arc;

use thiserror::Error;
use vmci_runtime::{Klass, LinkageError, MethodId, ObjectRef, PoolTag, Runtime};

pub use bootstrap::{BootstrapArgument, BootstrapInvocation, BootstrapInvocationBuilder};
pub use config::{BridgeConfig, ConfigError};
pub use constant::{JavaConstant, ObjectConstant, PrimitiveConstant};
pub use context::BridgeContext;
pub use field::FieldHandle;
pub use method::MethodHandle;
pub use pool::{ConstantPoolHandle, FieldLookup, MethodLookup, PoolConstant};
pub use types::{ArrayType, Assumption, ElementalType, InstanceType, PrimitiveType, TypeHandle, UnresolvedType};

/// Errors surfaced to the compiler
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Argument the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Constant pool index outside the pool
    #[error("Constant pool index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: u32, length: usize },

    /// Entry kind the operation does not handle
    #[error("Unexpected constant pool tag {tag} at index {index}")]
    IllegalTag { index: u32, tag: PoolTag },

    /// Malformed type descriptor
    #[error("Invalid type descriptor: {0}")]
    InvalidDescriptor(String),

    /// Pool state the interpreter never produces
    #[error("Inconsistent constant pool state: {0}")]
    Inconsistent(String),

    /// Bridge switched off by configuration
    #[error("Compiler interface is disabled")]
    Disabled,

    /// Failure of the interpreter's own loading or resolution
    #[error(transparent)]
    Linkage(#[from] LinkageError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of a bridge operation
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Entry point for compiler clients
#[derive(Debug)]
pub struct Bridge {
    cx: BridgeContext,
}

impl Bridge {
    pub fn new(runtime: Arc<Runtime>, config: BridgeConfig) -> Self {
        Self {
            cx: BridgeContext::new(runtime, config),
        }
    }

    /// Bridge configured from a `vmci.toml` file plus environment overrides
    pub fn from_config_file(runtime: Arc<Runtime>, path: impl AsRef<std::path::Path>) -> BridgeResult<Self> {
        let config = BridgeConfig::from_file(path)?.with_env_overrides()?;
        Ok(Self::new(runtime, config))
    }

    /// Context for handle operations; fails while the bridge is disabled
    pub fn context(&self) -> BridgeResult<&BridgeContext> {
        self.cx.ensure_enabled()?;
        Ok(&self.cx)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.cx.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.cx.is_enabled()
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        self.cx.shared_runtime()
    }

    pub fn to_type(&self, klass: &Klass) -> BridgeResult<TypeHandle> {
        types::to_type(self.context()?, klass)
    }

    pub fn lookup_type(&self, name: &str, accessing: &InstanceType, resolve: bool) -> BridgeResult<TypeHandle> {
        let cx = self.context()?;
        types::lookup_type(cx, name, accessing, resolve)
    }

    pub fn to_unresolved_type(&self, descriptor: &str) -> BridgeResult<UnresolvedType> {
        self.context()?;
        types::to_unresolved_type(descriptor)
    }

    pub fn to_method(&self, method: MethodId, holder: Option<&InstanceType>) -> BridgeResult<MethodHandle> {
        method::to_method(self.context()?, method, holder)
    }

    pub fn resolve_method(
        &self,
        receiver: &TypeHandle,
        method: &MethodHandle,
        accessing: &InstanceType,
    ) -> BridgeResult<Option<MethodHandle>> {
        let cx = self.context()?;
        resolve::resolve_method(cx, receiver, method, accessing)
    }

    pub fn interface_vtable_index(&self, method: &MethodHandle, resolved: &InstanceType) -> BridgeResult<i32> {
        resolve::interface_vtable_index(self.context()?, method, resolved)
    }

    pub fn to_field(&self, field: vmci_runtime::FieldId, holder: Option<&InstanceType>) -> BridgeResult<FieldHandle> {
        field::to_field(self.context()?, field, holder)
    }

    pub fn constant_pool(&self, holder: &InstanceType) -> BridgeResult<ConstantPoolHandle> {
        self.context()?;
        Ok(ConstantPoolHandle::new(*holder))
    }

    pub fn lookup_constant(
        &self,
        pool: &ConstantPoolHandle,
        index: u32,
        resolve: bool,
    ) -> BridgeResult<Option<PoolConstant>> {
        let cx = self.context()?;
        pool.lookup_constant(cx, index, resolve)
    }

    pub fn lookup_bootstrap_invocation(
        &self,
        pool: &ConstantPoolHandle,
        index: u32,
        opcode: u8,
    ) -> BridgeResult<Option<BootstrapInvocation>> {
        let cx = self.context()?;
        pool.lookup_bootstrap_invocation(cx, index, opcode)
    }

    pub fn wrap(&self, object: Option<ObjectRef>) -> BridgeResult<ObjectConstant> {
        self.context()?;
        Ok(ObjectConstant::wrap(object))
    }
}

//! Typed views over foreign ABI data.
//!
//! Types are described by serde [`layout`] descriptors, compiled into runtime
//! types by per-kind factories, and instantiated as [`View`]s over host or
//! fixed foreign memory. Function calls marshal argument structs and every
//! host object reachable through their pointers into the module's linear
//! memory and back.
//!
//! # Architecture
//!
//! - **Accessors** (`accessor`, `float`): bit-exact integer and float codecs
//!   for any width, offset and byte order
//! - **Layouts** (`layout`): descriptors, fingerprints and flags
//! - **Structures** (`structure`): one factory per kind, producing a [`Shape`]
//! - **Views** (`view`, `value`): typed handles and dynamic host values
//! - **Environment** (`env`): type table, error registry, contexts, queues
//! - **Calls** (`call`, `module`): marshalling, deferred calls, hosted modules
//! - **Namespaces** (`namespace`), **hooks** (`hooks`), **artifacts**
//!   (`artifact`) and **normalization** (`normalize`)

#![deny(unsafe_code)]

pub mod accessor;
pub mod artifact;
pub mod call;
pub mod env;
pub mod error;
pub mod error_registry;
pub mod float;
pub mod hooks;
pub mod layout;
pub mod module;
pub mod namespace;
mod normalize;
pub mod structure;
pub mod value;
pub mod view;

pub use artifact::{ArtifactCache, ArtifactError, Compiler};
pub use call::{Callable, Invocation, PendingCall};
pub use env::Env;
pub use error::{ErrorKind, Result, ViewError};
pub use error_registry::ErrorRegistry;
pub use hooks::{HookEvent, HookHandler, HookTable};
pub use layout::{
    MemberDescriptor, MemberFlags, MemberType, SentinelDescriptor, StaticItem, StructureDescriptor,
    StructureFlags, StructureKind, TypeId,
};
pub use module::{CallFrame, ForeignModule, HostedCall, HostedModule};
pub use namespace::{FunctionExport, ModuleExports, Namespace, VariableExport};
pub use structure::{ArgAttributes, ArgClass, RuntimeType, Shape};
pub use value::{EnumItem, ForeignError, Value, decamelize};
pub use view::{Elements, Indexable, View};

pub use typeview_membrane::{Endianness, MembraneConfig, SafetyLevel};

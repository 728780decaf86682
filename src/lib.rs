//! Polyglot FFI runtime.
//!
//! `polybridge` dispatches calls between language runtimes through a
//! canonical type system: every boundary crossing converts to and from
//! [`Value`], every shared allocation is tracked by the memory ownership
//! bridge, and every native invocation goes through a checked trampoline.
//!
//! The workspace splits in three. `polybridge-core` holds the data model
//! (types, values, signatures, conversion rules, errors),
//! `polybridge-memory` the ownership bridge, and this crate the runtime
//! itself: language bridges, the function registry, call dispatch, and the
//! security/performance collaborator seams.

pub mod bridge;
pub mod context;
pub mod hooks;
pub mod registry;
pub mod runtime;
pub mod trampoline;

pub use bridge::LanguageBridge;
pub use context::ContextKind;
pub use hooks::{CallContextInfo, PerformanceHooks, SecurityGuard, TraceHandle};
pub use registry::{FunctionEntry, FunctionFlags, FunctionRegistry, LanguageRegistry};
pub use runtime::{FfiRuntime, RuntimeConfig, TypeMappingContext};
pub use trampoline::{ExternFn, NativeFn, RustCallable};

pub use polybridge_core::{
    AggregateData, CallbackHandle, ConversionTable, ConvertFlags, FfiError, FfiResult, FieldInfo,
    FromValue, LanguageMatch, MappingRule, Ownership, Parameter, PrimitiveType, RegionHandle,
    Signature, TypeDetail, TypeId, TypeInfo, TypeRegistry, Value,
};
pub use polybridge_memory::{
    AccessIntent, CompatibilityPredicate, GcCallback, MemoryManager, RegionFlags, RegionInfo,
    RegionPermissions, ShareMode, SharedAllocator, SnapshotId, SystemAllocator,
};

//! Core data model for the polybridge FFI runtime.
//!
//! This crate is the leaf of the workspace: the error taxonomy, canonical
//! type identifiers and descriptions, tagged values, function signatures, and
//! the conversion-rule table. It has no runtime state of its own beyond the
//! registries it defines; the memory bridge and the runtime crates build on
//! top of it.

pub mod conversion;
pub mod error;
pub mod signature;
pub mod type_id;
pub mod type_info;
pub mod value;

pub use conversion::{ConversionTable, ConvertFlags, ConvertFn, LanguageMatch, MappingRule, ValidateFn};
pub use error::{FfiError, FfiResult};
pub use signature::{Parameter, Signature};
pub use type_id::{PrimitiveType, TypeId};
pub use type_info::{FieldInfo, TypeDetail, TypeInfo, TypeRegistry};
pub use value::{AggregateData, CallbackHandle, FromValue, Ownership, RegionHandle, Value};

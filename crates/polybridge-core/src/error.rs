//! Unified error types for the polybridge FFI runtime.
//!
//! Every public operation in the runtime returns an [`FfiResult`] synchronously;
//! there are no hidden exceptions and no automatic retries. Callers should
//! treat any non-success code as fatal to that one operation only. The
//! runtime's internal state stays consistent (locks released, partial
//! structures rolled back), so retrying or proceeding with other operations
//! is always safe after a failure.

use thiserror::Error;

use crate::type_id::TypeId;

/// Result alias used throughout the runtime.
pub type FfiResult<T> = Result<T, FfiError>;

/// The unified error taxonomy for all polybridge operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FfiError {
    /// A parameter failed basic validation (null name, zero size, bad arity).
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The configured allocator could not satisfy an allocation.
    #[error("out of memory: failed to allocate {size} bytes")]
    OutOfMemory {
        /// The requested allocation size.
        size: usize,
    },

    /// A name or key was already present in its registry.
    #[error("already registered: {kind} '{name}'")]
    AlreadyRegistered {
        /// What kind of thing was duplicated (e.g. "function", "language", "type").
        kind: &'static str,
        /// The duplicated name or key.
        name: String,
    },

    /// A component was initialized twice.
    #[error("already initialized: {0}")]
    AlreadyInitialized(&'static str),

    /// A name or key was not present in its registry.
    #[error("not found: {kind} '{name}'")]
    NotFound {
        /// What kind of thing was missing.
        kind: &'static str,
        /// The name or key that was looked up.
        name: String,
    },

    /// The caller does not hold the rights the operation requires.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A value's type did not match the expected type or layout.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Description of the expected type.
        expected: String,
        /// Description of the actual type.
        actual: String,
    },

    /// No mapping rule converts between the requested type pair.
    #[error("no conversion from {src_lang}:{src_type} to {dst_lang}:{dst_type}")]
    ConversionNotFound {
        /// Source language name.
        src_lang: String,
        /// Source canonical type.
        src_type: TypeId,
        /// Target language name.
        dst_lang: String,
        /// Target canonical type.
        dst_type: TypeId,
    },

    /// The operation is not supported for this type or bridge.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A fixed-capacity table is full.
    #[error("capacity exceeded: {kind} table is full ({capacity} entries)")]
    CapacityExceeded {
        /// Which table overflowed.
        kind: &'static str,
        /// The fixed capacity of the table.
        capacity: usize,
    },

    /// A region handle is stale, freed, or was never tracked.
    #[error("invalid memory region")]
    InvalidMemoryRegion,

    /// Strict-ownership mode rejected a cross-language access.
    #[error("incompatible language: '{requester}' may not access region owned by '{owner}'")]
    IncompatibleLanguage {
        /// The current owner of the region.
        owner: String,
        /// The language that attempted the access.
        requester: String,
    },

    /// A component failed to initialize; prior steps were unwound.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
}

impl FfiError {
    /// Shorthand for a [`FfiError::NotFound`] on a function name.
    pub fn function_not_found(name: impl Into<String>) -> Self {
        FfiError::NotFound {
            kind: "function",
            name: name.into(),
        }
    }

    /// Shorthand for a [`FfiError::NotFound`] on a language name.
    pub fn language_not_found(name: impl Into<String>) -> Self {
        FfiError::NotFound {
            kind: "language",
            name: name.into(),
        }
    }

    /// Shorthand for a [`FfiError::NotFound`] on a canonical type id.
    pub fn type_not_found(id: TypeId) -> Self {
        FfiError::NotFound {
            kind: "type",
            name: id.to_string(),
        }
    }

    /// Check if this is any flavor of duplicate-registration error.
    pub fn is_already_registered(&self) -> bool {
        matches!(
            self,
            FfiError::AlreadyRegistered { .. } | FfiError::AlreadyInitialized(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = FfiError::function_not_found("add");
        assert_eq!(format!("{err}"), "not found: function 'add'");
    }

    #[test]
    fn already_registered_display() {
        let err = FfiError::AlreadyRegistered {
            kind: "language",
            name: "cobol".to_string(),
        };
        assert_eq!(format!("{err}"), "already registered: language 'cobol'");
        assert!(err.is_already_registered());
    }

    #[test]
    fn conversion_not_found_display() {
        let err = FfiError::ConversionNotFound {
            src_lang: "c".to_string(),
            src_type: TypeId::INT32,
            dst_lang: "cobol".to_string(),
            dst_type: TypeId::STRING,
        };
        let text = format!("{err}");
        assert!(text.contains("c:"));
        assert!(text.contains("cobol:"));
    }

    #[test]
    fn incompatible_language_display() {
        let err = FfiError::IncompatibleLanguage {
            owner: "a".to_string(),
            requester: "b".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "incompatible language: 'b' may not access region owned by 'a'"
        );
    }
}

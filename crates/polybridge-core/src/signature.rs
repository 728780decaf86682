//! Function signatures.

use crate::type_id::TypeId;

/// One declared parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// The canonical parameter type.
    pub ty: TypeId,
    /// Optional finer-grained type detail (e.g. the element type of an array
    /// slot, or the concrete struct type behind a pointer slot).
    pub detail: Option<TypeId>,
    /// Optional parameter name, kept for diagnostics.
    pub name: Option<String>,
    /// An optional slot may be satisfied by a `Void` argument.
    pub optional: bool,
}

impl Parameter {
    /// A plain required parameter.
    pub fn new(ty: TypeId) -> Self {
        Parameter {
            ty,
            detail: None,
            name: None,
            optional: false,
        }
    }

    /// A named required parameter.
    pub fn named(ty: TypeId, name: impl Into<String>) -> Self {
        Parameter {
            ty,
            detail: None,
            name: Some(name.into()),
            optional: false,
        }
    }

    /// Mark this parameter optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Attach type detail.
    pub fn with_detail(mut self, detail: TypeId) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A function signature: return type, ordered parameters, variadic flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// The declared return type.
    pub return_type: TypeId,
    /// Parameter slots in declaration order.
    pub params: Vec<Parameter>,
    /// When set, calls may pass more arguments than declared slots.
    pub variadic: bool,
}

impl Signature {
    /// Build a signature from a return type and plain parameter types.
    pub fn new(return_type: TypeId, param_types: &[TypeId]) -> Self {
        Signature {
            return_type,
            params: param_types.iter().copied().map(Parameter::new).collect(),
            variadic: false,
        }
    }

    /// Build a signature from fully described parameters.
    pub fn with_params(return_type: TypeId, params: Vec<Parameter>) -> Self {
        Signature {
            return_type,
            params,
            variadic: false,
        }
    }

    /// Mark the signature variadic.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Number of declared parameter slots.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

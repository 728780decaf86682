//! Type descriptions and the canonical type registry.
//!
//! [`TypeRegistry`] holds one [`TypeInfo`] per canonical [`TypeId`]. The table
//! is fixed-capacity and never grows, so that type ids stay stable for the
//! lifetime of the runtime and can be cached by bridges and mapping rules.

use rustc_hash::FxHashMap;

use crate::error::{FfiError, FfiResult};
use crate::type_id::{PrimitiveType, TypeId};
use crate::value::Value;

/// Kind-specific layout detail carried by a [`TypeInfo`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDetail {
    /// A primitive with no further structure.
    Primitive,
    /// A struct with named, typed, offset fields.
    Struct {
        /// Field layout in declaration order.
        fields: Vec<FieldInfo>,
    },
    /// A fixed-length array.
    Array {
        /// Element type.
        element: TypeId,
        /// Element count.
        count: usize,
    },
    /// A callback (function pointer) type.
    Callback {
        /// Parameter types in order.
        params: Vec<TypeId>,
        /// Return type.
        ret: TypeId,
    },
}

/// One field of a struct type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: TypeId,
    /// Byte offset from the start of the struct.
    pub offset: usize,
}

/// Canonical description of one registered type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    /// The canonical id this entry is registered under.
    pub id: TypeId,
    /// Human-readable name.
    pub name: String,
    /// Total size in bytes.
    pub size: usize,
    /// Required alignment in bytes.
    pub alignment: usize,
    /// Kind-specific layout detail.
    pub detail: TypeDetail,
}

impl TypeInfo {
    /// Build the catalogue entry for a primitive.
    pub fn primitive(p: PrimitiveType) -> Self {
        TypeInfo {
            id: p.into(),
            name: p.name().to_string(),
            size: p.size(),
            alignment: p.alignment(),
            detail: TypeDetail::Primitive,
        }
    }

    /// Build a struct type description.
    pub fn structure(
        id: TypeId,
        name: impl Into<String>,
        size: usize,
        alignment: usize,
        fields: Vec<FieldInfo>,
    ) -> Self {
        TypeInfo {
            id,
            name: name.into(),
            size,
            alignment,
            detail: TypeDetail::Struct { fields },
        }
    }

    /// Build a fixed-length array type description.
    pub fn array(id: TypeId, name: impl Into<String>, element: TypeId, count: usize, element_size: usize) -> Self {
        TypeInfo {
            id,
            name: name.into(),
            size: element_size * count,
            alignment: element_size.max(1),
            detail: TypeDetail::Array { element, count },
        }
    }

    /// Whether this entry describes a primitive.
    pub fn is_primitive(&self) -> bool {
        matches!(self.detail, TypeDetail::Primitive)
    }
}

/// Fixed-capacity canonical type registry.
///
/// Registration is append-only: an id can be registered once, lookups are by
/// id, and the table rejects growth past its construction-time capacity.
pub struct TypeRegistry {
    entries: FxHashMap<TypeId, TypeInfo>,
    capacity: usize,
    next_user_id: u32,
}

impl TypeRegistry {
    /// Default table capacity.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create an empty registry with the given capacity.
    pub fn new(capacity: usize) -> Self {
        TypeRegistry {
            entries: FxHashMap::default(),
            capacity,
            next_user_id: TypeId::FIRST_USER.0,
        }
    }

    /// Create a registry with the primitive catalogue pre-registered.
    pub fn with_primitives(capacity: usize) -> FfiResult<Self> {
        let mut registry = Self::new(capacity);
        for p in PrimitiveType::ALL {
            registry.register(TypeInfo::primitive(p))?;
        }
        Ok(registry)
    }

    /// Register a type under its declared id.
    ///
    /// Fails with `AlreadyRegistered` if the id exists and `CapacityExceeded`
    /// when the table is full.
    pub fn register(&mut self, info: TypeInfo) -> FfiResult<()> {
        if self.entries.contains_key(&info.id) {
            return Err(FfiError::AlreadyRegistered {
                kind: "type",
                name: info.id.to_string(),
            });
        }
        if self.entries.len() >= self.capacity {
            return Err(FfiError::CapacityExceeded {
                kind: "type",
                capacity: self.capacity,
            });
        }
        if info.id.0 >= self.next_user_id {
            self.next_user_id = info.id.0 + 1;
        }
        self.entries.insert(info.id, info);
        Ok(())
    }

    /// Allocate a fresh user type id.
    pub fn allocate_id(&mut self) -> TypeId {
        let id = TypeId(self.next_user_id);
        self.next_user_id += 1;
        id
    }

    /// Look up a type by id.
    pub fn get(&self, id: TypeId) -> FfiResult<&TypeInfo> {
        self.entries.get(&id).ok_or(FfiError::NotFound {
            kind: "type",
            name: id.to_string(),
        })
    }

    /// Check whether an id is registered.
    pub fn contains(&self, id: TypeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate a value against a registered type and a declared payload size.
    ///
    /// Primitive types require an exact size match; aggregate types are
    /// validated against their declared layout size.
    pub fn validate(&self, id: TypeId, value: &Value, size: usize) -> FfiResult<()> {
        let info = self.get(id)?;
        if value.type_id() != id {
            return Err(FfiError::TypeMismatch {
                expected: info.name.clone(),
                actual: value.type_id().to_string(),
            });
        }
        if info.is_primitive() && size != info.size {
            return Err(FfiError::TypeMismatch {
                expected: format!("{} ({} bytes)", info.name, info.size),
                actual: format!("{size} bytes"),
            });
        }
        if !info.is_primitive() && size > info.size {
            return Err(FfiError::TypeMismatch {
                expected: format!("{} (at most {} bytes)", info.name, info.size),
                actual: format!("{size} bytes"),
            });
        }
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_primitives_registers_catalogue() {
        let registry = TypeRegistry::with_primitives(64).unwrap();
        assert_eq!(registry.len(), PrimitiveType::ALL.len());
        assert!(registry.contains(TypeId::INT32));
        assert!(registry.contains(TypeId::STRING));
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut registry = TypeRegistry::with_primitives(64).unwrap();
        let err = registry
            .register(TypeInfo::primitive(PrimitiveType::Int32))
            .unwrap_err();
        assert!(err.is_already_registered());
        assert_eq!(registry.len(), PrimitiveType::ALL.len());
    }

    #[test]
    fn capacity_is_fixed() {
        let mut registry = TypeRegistry::new(1);
        registry
            .register(TypeInfo::primitive(PrimitiveType::Bool))
            .unwrap();
        let err = registry
            .register(TypeInfo::primitive(PrimitiveType::Char))
            .unwrap_err();
        assert!(matches!(err, FfiError::CapacityExceeded { capacity: 1, .. }));
    }

    #[test]
    fn allocate_id_skips_registered_user_ids() {
        let mut registry = TypeRegistry::new(16);
        let id = registry.allocate_id();
        assert_eq!(id, TypeId::FIRST_USER);
        registry
            .register(TypeInfo::structure(TypeId(70), "pair", 8, 4, vec![]))
            .unwrap();
        assert_eq!(registry.allocate_id(), TypeId(71));
    }

    #[test]
    fn validate_primitive_size() {
        let registry = TypeRegistry::with_primitives(64).unwrap();
        let v = Value::I32(7);
        assert!(registry.validate(TypeId::INT32, &v, 4).is_ok());
        let err = registry.validate(TypeId::INT32, &v, 8).unwrap_err();
        assert!(matches!(err, FfiError::TypeMismatch { .. }));
    }

    #[test]
    fn validate_wrong_value_type() {
        let registry = TypeRegistry::with_primitives(64).unwrap();
        let err = registry
            .validate(TypeId::INT32, &Value::F64(1.0), 4)
            .unwrap_err();
        assert!(matches!(err, FfiError::TypeMismatch { .. }));
    }
}

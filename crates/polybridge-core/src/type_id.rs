//! Canonical type identifiers.
//!
//! A [`TypeId`] is a language-independent identifier used to reconcile each
//! language's native type names. The primitive ids are fixed at construction
//! and never change for the lifetime of a runtime, so they can be embedded in
//! signatures, mapping rules, and wire formats without translation.

use std::fmt::{self, Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Canonical, language-independent type identifier.
///
/// Ids `0..=14` are reserved for the primitive catalogue (see
/// [`PrimitiveType`]); user-defined types are allocated from
/// [`TypeId::FIRST_USER`] upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const VOID: TypeId = TypeId(PrimitiveType::Void as u32);
    pub const BOOL: TypeId = TypeId(PrimitiveType::Bool as u32);
    pub const CHAR: TypeId = TypeId(PrimitiveType::Char as u32);
    pub const INT8: TypeId = TypeId(PrimitiveType::Int8 as u32);
    pub const INT16: TypeId = TypeId(PrimitiveType::Int16 as u32);
    pub const INT32: TypeId = TypeId(PrimitiveType::Int32 as u32);
    pub const INT64: TypeId = TypeId(PrimitiveType::Int64 as u32);
    pub const UINT8: TypeId = TypeId(PrimitiveType::Uint8 as u32);
    pub const UINT16: TypeId = TypeId(PrimitiveType::Uint16 as u32);
    pub const UINT32: TypeId = TypeId(PrimitiveType::Uint32 as u32);
    pub const UINT64: TypeId = TypeId(PrimitiveType::Uint64 as u32);
    pub const FLOAT: TypeId = TypeId(PrimitiveType::Float as u32);
    pub const DOUBLE: TypeId = TypeId(PrimitiveType::Double as u32);
    pub const STRING: TypeId = TypeId(PrimitiveType::String as u32);
    pub const POINTER: TypeId = TypeId(PrimitiveType::Pointer as u32);

    /// First id available for user-registered types.
    pub const FIRST_USER: TypeId = TypeId(64);

    /// Whether this id falls in the reserved primitive range.
    pub fn is_primitive(self) -> bool {
        PrimitiveType::try_from(self.0).is_ok()
    }

    /// The primitive this id names, if it is in the primitive range.
    pub fn primitive(self) -> Option<PrimitiveType> {
        PrimitiveType::try_from(self.0).ok()
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.primitive() {
            Some(p) => write!(f, "{}", p.name()),
            None => write!(f, "type#{}", self.0),
        }
    }
}

impl From<PrimitiveType> for TypeId {
    fn from(p: PrimitiveType) -> Self {
        TypeId(p.into())
    }
}

/// The fixed primitive catalogue.
///
/// The discriminants are the canonical ids and are part of the runtime's
/// stable surface; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum PrimitiveType {
    Void = 0,
    Bool = 1,
    Char = 2,
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Uint8 = 7,
    Uint16 = 8,
    Uint32 = 9,
    Uint64 = 10,
    Float = 11,
    Double = 12,
    String = 13,
    Pointer = 14,
}

impl PrimitiveType {
    /// All primitives that get auto-registered into a fresh type registry.
    pub const ALL: [PrimitiveType; 15] = [
        PrimitiveType::Void,
        PrimitiveType::Bool,
        PrimitiveType::Char,
        PrimitiveType::Int8,
        PrimitiveType::Int16,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::Uint8,
        PrimitiveType::Uint16,
        PrimitiveType::Uint32,
        PrimitiveType::Uint64,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::String,
        PrimitiveType::Pointer,
    ];

    /// Canonical display name.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Char => "char",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Uint8 => "uint8",
            PrimitiveType::Uint16 => "uint16",
            PrimitiveType::Uint32 => "uint32",
            PrimitiveType::Uint64 => "uint64",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::String => "string",
            PrimitiveType::Pointer => "pointer",
        }
    }

    /// In-memory size of the primitive, in bytes.
    ///
    /// `string` has no fixed payload size; it reports the size of its
    /// descriptor (pointer-sized).
    pub fn size(self) -> usize {
        match self {
            PrimitiveType::Void => 0,
            PrimitiveType::Bool => 1,
            PrimitiveType::Char => 1,
            PrimitiveType::Int8 | PrimitiveType::Uint8 => 1,
            PrimitiveType::Int16 | PrimitiveType::Uint16 => 2,
            PrimitiveType::Int32 | PrimitiveType::Uint32 => 4,
            PrimitiveType::Int64 | PrimitiveType::Uint64 => 8,
            PrimitiveType::Float => 4,
            PrimitiveType::Double => 8,
            PrimitiveType::String | PrimitiveType::Pointer => std::mem::size_of::<usize>(),
        }
    }

    /// Natural alignment of the primitive, in bytes.
    pub fn alignment(self) -> usize {
        self.size().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_ids_are_stable() {
        assert_eq!(TypeId::VOID, TypeId(0));
        assert_eq!(TypeId::INT32, TypeId(5));
        assert_eq!(TypeId::DOUBLE, TypeId(12));
        assert_eq!(TypeId::POINTER, TypeId(14));
    }

    #[test]
    fn primitive_range_check() {
        assert!(TypeId::INT64.is_primitive());
        assert!(!TypeId::FIRST_USER.is_primitive());
        assert!(!TypeId(15).is_primitive());
    }

    #[test]
    fn display_names() {
        assert_eq!(format!("{}", TypeId::INT32), "int32");
        assert_eq!(format!("{}", TypeId(100)), "type#100");
    }

    #[test]
    fn primitive_sizes() {
        assert_eq!(PrimitiveType::Void.size(), 0);
        assert_eq!(PrimitiveType::Bool.size(), 1);
        assert_eq!(PrimitiveType::Int32.size(), 4);
        assert_eq!(PrimitiveType::Double.size(), 8);
        assert_eq!(PrimitiveType::Pointer.size(), std::mem::size_of::<usize>());
    }
}

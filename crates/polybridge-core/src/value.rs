//! Tagged values crossing the language boundary.
//!
//! A [`Value`] is the canonical representation of one argument or result in a
//! cross-language call. Primitive variants own their payload outright.
//! Aggregate variants (struct, array, object) carry an [`AggregateData`] whose
//! [`Ownership`] tag records whether the backing memory is borrowed from the
//! caller or owned by a tracked region. Free-responsibility is a type-level
//! fact, not a convention, so dropping a `Value` never frees region-owned
//! memory behind the ownership bridge's back.

use crate::type_id::TypeId;

/// Handle to a tracked memory region.
///
/// A safe, copyable reference into the ownership bridge's region arena. The
/// generational index detects stale handles after a region is freed or the
/// registry is rebuilt by a snapshot restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    /// Index into the region arena.
    pub index: u32,
    /// Generation for use-after-free detection.
    pub generation: u32,
}

impl RegionHandle {
    /// Create a new region handle.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Who is responsible for freeing an aggregate value's backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The bytes are a caller-owned copy; dropping the value drops them.
    Borrowed,
    /// The bytes mirror a tracked region; the ownership bridge frees them.
    Owned(RegionHandle),
}

/// Payload of a struct, array, or object value.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateData {
    /// Free-responsibility tag.
    pub ownership: Ownership,
    /// The raw bytes in the type's declared layout.
    pub bytes: Vec<u8>,
}

impl AggregateData {
    /// A borrowed (value-owned) byte payload.
    pub fn borrowed(bytes: Vec<u8>) -> Self {
        AggregateData {
            ownership: Ownership::Borrowed,
            bytes,
        }
    }

    /// A payload mirroring a tracked region.
    pub fn owned(handle: RegionHandle, bytes: Vec<u8>) -> Self {
        AggregateData {
            ownership: Ownership::Owned(handle),
            bytes,
        }
    }
}

/// Handle to a callback (function pointer) value.
///
/// The callable itself lives in the function registry; this is just a stable
/// reference to it, tagged with its canonical callback type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackHandle {
    /// The canonical callback type.
    pub ty: TypeId,
    /// The registered name of the target function.
    pub target: String,
}

/// A tagged value crossing the FFI boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    /// An opaque native pointer, carried as an address.
    Pointer(usize),
    /// A struct in its declared layout.
    Struct {
        ty: TypeId,
        data: AggregateData,
    },
    /// A fixed-length array in its declared layout.
    Array {
        ty: TypeId,
        data: AggregateData,
    },
    /// A callback reference.
    Callback(CallbackHandle),
    /// An opaque language object.
    Object {
        ty: TypeId,
        data: AggregateData,
    },
}

impl Value {
    /// The canonical type id of this value.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Void => TypeId::VOID,
            Value::Bool(_) => TypeId::BOOL,
            Value::Char(_) => TypeId::CHAR,
            Value::I8(_) => TypeId::INT8,
            Value::I16(_) => TypeId::INT16,
            Value::I32(_) => TypeId::INT32,
            Value::I64(_) => TypeId::INT64,
            Value::U8(_) => TypeId::UINT8,
            Value::U16(_) => TypeId::UINT16,
            Value::U32(_) => TypeId::UINT32,
            Value::U64(_) => TypeId::UINT64,
            Value::F32(_) => TypeId::FLOAT,
            Value::F64(_) => TypeId::DOUBLE,
            Value::String(_) => TypeId::STRING,
            Value::Pointer(_) => TypeId::POINTER,
            Value::Struct { ty, .. } => *ty,
            Value::Array { ty, .. } => *ty,
            Value::Callback(cb) => cb.ty,
            Value::Object { ty, .. } => *ty,
        }
    }

    /// A zero/default value for a primitive type id, if one exists.
    pub fn default_for(ty: TypeId) -> Option<Value> {
        Some(match ty {
            TypeId::VOID => Value::Void,
            TypeId::BOOL => Value::Bool(false),
            TypeId::CHAR => Value::Char('\0'),
            TypeId::INT8 => Value::I8(0),
            TypeId::INT16 => Value::I16(0),
            TypeId::INT32 => Value::I32(0),
            TypeId::INT64 => Value::I64(0),
            TypeId::UINT8 => Value::U8(0),
            TypeId::UINT16 => Value::U16(0),
            TypeId::UINT32 => Value::U32(0),
            TypeId::UINT64 => Value::U64(0),
            TypeId::FLOAT => Value::F32(0.0),
            TypeId::DOUBLE => Value::F64(0.0),
            TypeId::STRING => Value::String(String::new()),
            TypeId::POINTER => Value::Pointer(0),
            _ => return None,
        })
    }

    /// Whether this value is the void placeholder.
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Whether this is an aggregate variant (struct, array, object).
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Value::Struct { .. } | Value::Array { .. } | Value::Object { .. }
        )
    }

    /// The aggregate payload, if this is an aggregate variant.
    pub fn aggregate(&self) -> Option<&AggregateData> {
        match self {
            Value::Struct { data, .. } | Value::Array { data, .. } | Value::Object { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }

    /// Extract a typed Rust value.
    pub fn get_as<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }
}

/// Conversion from a tagged [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::I32(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::I32(i) => Some(*i),
            Value::I16(i) => Some(*i as i32),
            Value::I8(i) => Some(*i as i32),
            Value::U16(u) => Some(*u as i32),
            Value::U8(u) => Some(*u as i32),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::I64(i) => Some(*i),
            Value::I32(i) => Some(*i as i64),
            Value::I16(i) => Some(*i as i64),
            Value::I8(i) => Some(*i as i64),
            Value::U32(u) => Some(*u as i64),
            _ => None,
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::U64(u) => Some(*u),
            Value::U32(u) => Some(*u as u64),
            Value::U16(u) => Some(*u as u64),
            Value::U8(u) => Some(*u as u64),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::F64(d) => Some(*d),
            Value::F32(f) => Some(*f as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_type_ids() {
        assert_eq!(Value::I32(1).type_id(), TypeId::INT32);
        assert_eq!(Value::F64(1.0).type_id(), TypeId::DOUBLE);
        assert_eq!(Value::String("x".into()).type_id(), TypeId::STRING);
        assert_eq!(Value::Void.type_id(), TypeId::VOID);
    }

    #[test]
    fn aggregate_carries_its_type() {
        let ty = TypeId(80);
        let v = Value::Struct {
            ty,
            data: AggregateData::borrowed(vec![0u8; 8]),
        };
        assert_eq!(v.type_id(), ty);
        assert!(v.is_aggregate());
        assert_eq!(v.aggregate().unwrap().ownership, Ownership::Borrowed);
    }

    #[test]
    fn owned_aggregate_keeps_handle() {
        let handle = RegionHandle::new(3, 1);
        let v = Value::Array {
            ty: TypeId(81),
            data: AggregateData::owned(handle, vec![1, 2, 3, 4]),
        };
        match v.aggregate().unwrap().ownership {
            Ownership::Owned(h) => assert_eq!(h, handle),
            Ownership::Borrowed => panic!("expected owned payload"),
        }
    }

    #[test]
    fn default_for_primitives() {
        assert_eq!(Value::default_for(TypeId::INT32), Some(Value::I32(0)));
        assert_eq!(Value::default_for(TypeId::VOID), Some(Value::Void));
        assert_eq!(Value::default_for(TypeId(99)), None);
    }

    #[test]
    fn typed_extraction() {
        assert_eq!(Value::I16(7).get_as::<i32>(), Some(7));
        assert_eq!(Value::F32(1.5).get_as::<f64>(), Some(1.5));
        assert_eq!(Value::I32(0).get_as::<bool>(), Some(false));
        assert_eq!(Value::String("hi".into()).get_as::<i32>(), None);
    }
}

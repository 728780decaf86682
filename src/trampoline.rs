//! Native call trampoline.
//!
//! A [`NativeFn`] is the entry handle stored in a function registry entry.
//! It is either a type-erased Rust callable, or one of a bounded, enumerated
//! set of supported extern "C" signatures ([`ExternFn`]). The extern variants
//! are the only place the crate invokes a foreign function pointer, and every
//! invocation is preceded by an arity and type check. There is no
//! cast-by-argument-count dispatch.

use std::fmt;
use std::sync::Arc;

use polybridge_core::{FfiError, FfiResult, Value};

/// Type-erased Rust callable.
pub type RustCallable = Arc<dyn Fn(&[Value]) -> FfiResult<Value> + Send + Sync>;

/// The native entry behind an exposed function.
#[derive(Clone)]
pub enum NativeFn {
    /// A Rust closure or function operating directly on canonical values.
    Rust(RustCallable),
    /// A foreign function pointer with one of the supported signatures.
    Extern(ExternFn),
}

/// The bounded set of supported extern "C" signatures.
///
/// Extending FFI coverage means adding a variant here, with its checked
/// unmarshaling, never widening an existing call path.
#[derive(Clone, Copy)]
pub enum ExternFn {
    /// `fn()`
    Unit(unsafe extern "C" fn()),
    /// `fn(i32) -> i32`
    I32FromI32(unsafe extern "C" fn(i32) -> i32),
    /// `fn(i32, i32) -> i32`
    I32FromI32I32(unsafe extern "C" fn(i32, i32) -> i32),
    /// `fn(i64, i64) -> i64`
    I64FromI64I64(unsafe extern "C" fn(i64, i64) -> i64),
    /// `fn(f64) -> f64`
    F64FromF64(unsafe extern "C" fn(f64) -> f64),
    /// `fn(f64, f64) -> f64`
    F64FromF64F64(unsafe extern "C" fn(f64, f64) -> f64),
}

impl NativeFn {
    /// Wrap a Rust callable.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> FfiResult<Value> + Send + Sync + 'static,
    {
        NativeFn::Rust(Arc::new(f))
    }

    /// Invoke the entry with canonical arguments.
    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        match self {
            NativeFn::Rust(f) => f(args),
            NativeFn::Extern(ext) => ext.call(args),
        }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeFn::Rust(_) => f.debug_struct("NativeFn::Rust").finish_non_exhaustive(),
            NativeFn::Extern(_) => f.debug_struct("NativeFn::Extern").finish_non_exhaustive(),
        }
    }
}

impl ExternFn {
    /// Invoke the foreign pointer after checking arity and argument types.
    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        match self {
            ExternFn::Unit(f) => {
                expect_arity(args, 0)?;
                unsafe { f() };
                Ok(Value::Void)
            }
            ExternFn::I32FromI32(f) => {
                expect_arity(args, 1)?;
                let a = take_i32(&args[0])?;
                Ok(Value::I32(unsafe { f(a) }))
            }
            ExternFn::I32FromI32I32(f) => {
                expect_arity(args, 2)?;
                let a = take_i32(&args[0])?;
                let b = take_i32(&args[1])?;
                Ok(Value::I32(unsafe { f(a, b) }))
            }
            ExternFn::I64FromI64I64(f) => {
                expect_arity(args, 2)?;
                let a = take_i64(&args[0])?;
                let b = take_i64(&args[1])?;
                Ok(Value::I64(unsafe { f(a, b) }))
            }
            ExternFn::F64FromF64(f) => {
                expect_arity(args, 1)?;
                let a = take_f64(&args[0])?;
                Ok(Value::F64(unsafe { f(a) }))
            }
            ExternFn::F64FromF64F64(f) => {
                expect_arity(args, 2)?;
                let a = take_f64(&args[0])?;
                let b = take_f64(&args[1])?;
                Ok(Value::F64(unsafe { f(a, b) }))
            }
        }
    }
}

fn expect_arity(args: &[Value], expected: usize) -> FfiResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(FfiError::InvalidParameters(format!(
            "expected {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn take_i32(value: &Value) -> FfiResult<i32> {
    match value {
        Value::I32(i) => Ok(*i),
        other => Err(type_mismatch("int32", other)),
    }
}

fn take_i64(value: &Value) -> FfiResult<i64> {
    match value {
        Value::I64(i) => Ok(*i),
        other => Err(type_mismatch("int64", other)),
    }
}

fn take_f64(value: &Value) -> FfiResult<f64> {
    match value {
        Value::F64(d) => Ok(*d),
        other => Err(type_mismatch("double", other)),
    }
}

fn type_mismatch(expected: &str, actual: &Value) -> FfiError {
    FfiError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.type_id().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn add(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    unsafe extern "C" fn halve(x: f64) -> f64 {
        x / 2.0
    }

    #[test]
    fn rust_callable_round_trip() {
        let f = NativeFn::from_fn(|args| Ok(args.first().cloned().unwrap_or(Value::Void)));
        let out = f.call(&[Value::I32(9)]).unwrap();
        assert_eq!(out, Value::I32(9));
    }

    #[test]
    fn extern_add() {
        let f = NativeFn::Extern(ExternFn::I32FromI32I32(add));
        let out = f.call(&[Value::I32(3), Value::I32(4)]).unwrap();
        assert_eq!(out, Value::I32(7));
    }

    #[test]
    fn extern_double_unary() {
        let f = NativeFn::Extern(ExternFn::F64FromF64(halve));
        let out = f.call(&[Value::F64(5.0)]).unwrap();
        assert_eq!(out, Value::F64(2.5));
    }

    #[test]
    fn extern_arity_checked() {
        let f = NativeFn::Extern(ExternFn::I32FromI32I32(add));
        let err = f.call(&[Value::I32(3)]).unwrap_err();
        assert!(matches!(err, FfiError::InvalidParameters(_)));
    }

    #[test]
    fn extern_types_checked() {
        let f = NativeFn::Extern(ExternFn::I32FromI32I32(add));
        let err = f.call(&[Value::I32(3), Value::F64(4.0)]).unwrap_err();
        assert!(matches!(err, FfiError::TypeMismatch { .. }));
    }
}

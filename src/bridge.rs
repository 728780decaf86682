//! The language bridge contract.
//!
//! Every language adapter (C, COBOL, ...) registers one [`LanguageBridge`].
//! The core never inspects a bridge's internals; it only invokes this fixed
//! surface. This trait is the seam across which unsafe, ABI-specific
//! marshaling happens: mapping a value array onto a native call with
//! heterogeneous argument types is inherently platform dependent and must be
//! isolated behind this contract (see [`crate::trampoline`] for the bounded
//! native-call capability a systems-language bridge builds on).

use polybridge_core::{FfiResult, TypeId, Value};

use crate::registry::FunctionEntry;

/// The capability set every language adapter must implement.
///
/// All operations are synchronous; the runtime guarantees no registry lock is
/// held when a bridge method is invoked, so implementations may re-enter the
/// runtime (e.g. to register a type from inside `initialize`).
pub trait LanguageBridge: Send + Sync {
    /// One-time setup, invoked right after the bridge is registered.
    ///
    /// A failure here rolls the registration back.
    fn initialize(&self) -> FfiResult<()> {
        Ok(())
    }

    /// Teardown, invoked when the bridge is unregistered or the runtime is
    /// torn down.
    fn cleanup(&self) -> FfiResult<()> {
        Ok(())
    }

    /// Marshal a canonical value into the bridge's native representation.
    ///
    /// Writes into `dest` and returns the number of bytes produced.
    fn convert_to_native(&self, value: &Value, dest: &mut [u8], dest_type: TypeId)
        -> FfiResult<usize>;

    /// Unmarshal a native buffer back into a canonical value.
    fn convert_from_native(&self, src: &[u8], src_type: TypeId) -> FfiResult<Value>;

    /// Notification that a function from this bridge's language was exposed.
    ///
    /// A failure here rolls the exposure back.
    fn register_function(&self, entry: &FunctionEntry) -> FfiResult<()> {
        let _ = entry;
        Ok(())
    }

    /// Invoke a named function with canonical arguments.
    ///
    /// This is the native dispatch path; the runtime has already resolved the
    /// entry and checked the signature before calling.
    fn call_function(&self, name: &str, args: &[Value]) -> FfiResult<Value>;

    /// Pin native memory the bridge handed across the boundary.
    fn acquire_memory(&self, ptr: usize, size: usize) -> FfiResult<()> {
        let _ = (ptr, size);
        Ok(())
    }

    /// Release memory previously pinned with
    /// [`LanguageBridge::acquire_memory`].
    fn release_memory(&self, ptr: usize) -> FfiResult<()> {
        let _ = ptr;
        Ok(())
    }

    /// Render a language-level exception code into a human-readable message.
    fn handle_exception(&self, code: i32) -> String {
        format!("foreign exception (code {code})")
    }
}

//! Process-wide context directory.
//!
//! Subsystems register themselves here under a fixed context kind so that
//! peers (telemetry, CLI tooling) can discover them by type without holding a
//! direct reference. The runtime registers under [`ContextKind::Ffi`] at init
//! and unregisters on drop.

use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;

use polybridge_core::{FfiError, FfiResult};

/// The fixed set of context types subsystems may register under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// FFI runtimes.
    Ffi,
    /// Telemetry collectors.
    Telemetry,
    /// Command-line frontends.
    Cli,
}

static DIRECTORY: OnceLock<Mutex<FxHashMap<ContextKind, Vec<String>>>> = OnceLock::new();

fn directory() -> &'static Mutex<FxHashMap<ContextKind, Vec<String>>> {
    DIRECTORY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Register a named instance under a context kind.
///
/// Duplicate `(kind, name)` pairs are rejected.
pub fn register(kind: ContextKind, name: &str) -> FfiResult<()> {
    if name.is_empty() {
        return Err(FfiError::InvalidParameters(
            "empty context name".to_string(),
        ));
    }
    let mut dir = directory().lock().unwrap();
    let names = dir.entry(kind).or_default();
    if names.iter().any(|n| n == name) {
        return Err(FfiError::AlreadyRegistered {
            kind: "context",
            name: name.to_string(),
        });
    }
    names.push(name.to_string());
    Ok(())
}

/// Remove a named instance.
pub fn unregister(kind: ContextKind, name: &str) -> FfiResult<()> {
    let mut dir = directory().lock().unwrap();
    let names = dir.entry(kind).or_default();
    let before = names.len();
    names.retain(|n| n != name);
    if names.len() == before {
        return Err(FfiError::NotFound {
            kind: "context",
            name: name.to_string(),
        });
    }
    Ok(())
}

/// All instances registered under a context kind.
pub fn lookup(kind: ContextKind) -> Vec<String> {
    let dir = directory().lock().unwrap();
    dir.get(&kind).cloned().unwrap_or_default()
}

//! Function and language registries.
//!
//! Both registries are hash maps keyed by owned names; duplicate
//! registration is rejected and leaves the registry byte-for-byte unchanged.

use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use polybridge_core::{ConversionTable, FfiError, FfiResult, Signature, Value};

use crate::bridge::LanguageBridge;
use crate::trampoline::NativeFn;

bitflags! {
    /// Behavioral flags on an exposed function.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FunctionFlags: u32 {
        /// The function may be invoked from an async context.
        const ASYNC = 1 << 0;
        /// Calls require a security-collaborator check even when the runtime
        /// default would skip one.
        const SECURE = 1 << 1;
        /// The function runs with elevated rights inside its bridge.
        const PRIVILEGED = 1 << 2;
    }
}

/// One exposed function.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    /// Unique function name.
    pub name: String,
    /// The language that owns the implementation.
    pub language: String,
    /// The native entry handle.
    pub native: NativeFn,
    /// Declared signature.
    pub signature: Signature,
    /// Behavioral flags.
    pub flags: FunctionFlags,
}

/// Registry of exposed functions, keyed by unique name.
#[derive(Default)]
pub struct FunctionRegistry {
    entries: FxHashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; name collisions are rejected.
    pub fn expose(&mut self, entry: FunctionEntry) -> FfiResult<()> {
        if entry.name.is_empty() {
            return Err(FfiError::InvalidParameters(
                "empty function name".to_string(),
            ));
        }
        if self.entries.contains_key(&entry.name) {
            return Err(FfiError::AlreadyRegistered {
                kind: "function",
                name: entry.name,
            });
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Remove an entry by name.
    pub fn unregister(&mut self, name: &str) -> FfiResult<FunctionEntry> {
        self.entries
            .remove(name)
            .ok_or_else(|| FfiError::function_not_found(name))
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.entries.get(name)
    }

    /// Number of exposed functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no functions are exposed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of language bridges, keyed by language name.
#[derive(Default)]
pub struct LanguageRegistry {
    bridges: FxHashMap<String, Arc<dyn LanguageBridge>>,
}

impl LanguageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bridge under a language name; duplicates are rejected.
    ///
    /// Does not run the bridge's `initialize`. The runtime invokes bridge
    /// hooks only with no registry lock held, so insertion and initialization
    /// are separate steps there. [`LanguageRegistry::register`] combines them
    /// for standalone use.
    pub fn insert(&mut self, name: &str, bridge: Arc<dyn LanguageBridge>) -> FfiResult<()> {
        if name.is_empty() {
            return Err(FfiError::InvalidParameters(
                "empty language name".to_string(),
            ));
        }
        if self.bridges.contains_key(name) {
            return Err(FfiError::AlreadyRegistered {
                kind: "language",
                name: name.to_string(),
            });
        }
        self.bridges.insert(name.to_string(), bridge);
        Ok(())
    }

    /// Remove a bridge without running its `cleanup`.
    pub fn remove(&mut self, name: &str) -> FfiResult<Arc<dyn LanguageBridge>> {
        self.bridges
            .remove(name)
            .ok_or_else(|| FfiError::language_not_found(name))
    }

    /// Register a bridge and run its `initialize`.
    ///
    /// A failed `initialize` rolls the insertion back and propagates.
    pub fn register(&mut self, name: &str, bridge: Arc<dyn LanguageBridge>) -> FfiResult<()> {
        self.insert(name, Arc::clone(&bridge))?;
        if let Err(err) = bridge.initialize() {
            self.bridges.remove(name);
            return Err(err);
        }
        Ok(())
    }

    /// Remove a bridge, running its `cleanup`.
    pub fn unregister(&mut self, name: &str) -> FfiResult<()> {
        self.remove(name)?.cleanup()
    }

    /// Look up a bridge by language name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LanguageBridge>> {
        self.bridges.get(name).map(Arc::clone)
    }

    /// Names of all registered languages.
    pub fn names(&self) -> Vec<String> {
        self.bridges.keys().cloned().collect()
    }

    /// Number of registered languages.
    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    /// Whether no languages are registered.
    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

/// Check a call's arguments against a declared signature.
///
/// Arity must match exactly unless the signature is variadic, in which case
/// the declared slots are a minimum. A slot is satisfied by an argument of
/// equal type, by `Void` when the slot is optional, or by any argument whose
/// type has a registered conversion to the slot type for the given language
/// pair.
pub fn check_signature(
    signature: &Signature,
    args: &[Value],
    conversions: &ConversionTable,
    src_lang: &str,
    dst_lang: &str,
) -> FfiResult<()> {
    if signature.variadic {
        if args.len() < signature.param_count() {
            return Err(FfiError::InvalidParameters(format!(
                "variadic call needs at least {} argument(s), got {}",
                signature.param_count(),
                args.len()
            )));
        }
    } else if args.len() != signature.param_count() {
        return Err(FfiError::InvalidParameters(format!(
            "expected {} argument(s), got {}",
            signature.param_count(),
            args.len()
        )));
    }
    for (param, arg) in signature.params.iter().zip(args) {
        let actual = arg.type_id();
        if actual == param.ty {
            continue;
        }
        if param.optional && arg.is_void() {
            continue;
        }
        if conversions.has_conversion(src_lang, actual, dst_lang, param.ty) {
            continue;
        }
        return Err(FfiError::TypeMismatch {
            expected: param.ty.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Convert any argument whose type differs from its slot into the slot type.
///
/// Assumes [`check_signature`] already passed; arguments beyond the declared
/// slots of a variadic signature pass through untouched.
pub fn convert_args(
    signature: &Signature,
    args: &[Value],
    conversions: &ConversionTable,
    src_lang: &str,
    dst_lang: &str,
) -> FfiResult<Vec<Value>> {
    let mut out = Vec::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        let Some(param) = signature.params.get(index) else {
            out.push(arg.clone());
            continue;
        };
        let actual = arg.type_id();
        if actual == param.ty || (param.optional && arg.is_void()) {
            out.push(arg.clone());
        } else {
            out.push(conversions.convert(
                src_lang,
                actual,
                arg,
                dst_lang,
                param.ty,
                Default::default(),
            )?);
        }
    }
    Ok(out)
}

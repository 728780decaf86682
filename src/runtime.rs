//! The FFI runtime.
//!
//! [`FfiRuntime`] is the single owner of the function/language registries,
//! the type mapping context, and the memory ownership bridge, plus optional
//! references to the security and performance collaborators. One runtime is
//! created per process or session; teardown runs in reverse initialization
//! order (performance, security, memory, types, registries).
//!
//! Each structure is guarded by its own mutex rather than one global lock, so
//! unrelated operations (registering a type vs. calling a function) do not
//! contend. Every lock is dropped before a bridge method, GC callback, or
//! collaborator runs.

use std::sync::{Arc, Mutex};

use polybridge_core::{
    AggregateData, ConversionTable, ConvertFlags, FfiError, FfiResult, MappingRule, RegionHandle,
    Signature, TypeDetail, TypeId, TypeInfo, TypeRegistry, Value,
};
use polybridge_memory::{
    AccessIntent, CompatibilityPredicate, GcCallback, MemoryManager, RegionInfo, ShareMode,
    SharedAllocator, SnapshotId,
};

use crate::bridge::LanguageBridge;
use crate::context::{self, ContextKind};
use crate::hooks::{CallContextInfo, PerformanceHooks, SecurityGuard};
use crate::registry::{
    check_signature, convert_args, FunctionEntry, FunctionFlags, FunctionRegistry,
    LanguageRegistry,
};
use crate::trampoline::NativeFn;

/// Construction-time configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Instance name used in the process-wide context directory.
    pub name: String,
    /// Capacity of the fixed-size canonical type table.
    pub type_capacity: usize,
    /// Auto-register the primitive type catalogue.
    pub register_primitives: bool,
    /// Pre-load builtin identity/widening conversion rules.
    pub builtin_conversions: bool,
    /// Start the memory bridge in strict-ownership mode.
    pub strict_ownership: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            name: "polybridge".to_string(),
            type_capacity: TypeRegistry::DEFAULT_CAPACITY,
            register_primitives: true,
            builtin_conversions: true,
            strict_ownership: false,
        }
    }
}

/// The canonical type table and conversion-rule table, locked as one unit.
pub struct TypeMappingContext {
    /// Canonical type registry.
    pub types: TypeRegistry,
    /// Conversion rules.
    pub conversions: ConversionTable,
}

/// The polyglot FFI runtime.
///
/// Field order matters: fields drop top to bottom, matching the teardown
/// order (collaborators, then memory, then the type mapping, then the
/// registries).
pub struct FfiRuntime {
    name: String,
    performance: Mutex<Option<Arc<dyn PerformanceHooks>>>,
    security: Mutex<Option<Arc<dyn SecurityGuard>>>,
    memory: MemoryManager,
    mapping: Mutex<TypeMappingContext>,
    languages: Mutex<LanguageRegistry>,
    functions: Mutex<FunctionRegistry>,
}

impl std::fmt::Debug for FfiRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfiRuntime")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl FfiRuntime {
    /// Build a runtime with the default system allocator.
    pub fn new(config: RuntimeConfig) -> FfiResult<Self> {
        Self::with_allocator(config, Arc::new(polybridge_memory::SystemAllocator))
    }

    /// Build a runtime drawing all region storage from `allocator`.
    pub fn with_allocator(
        config: RuntimeConfig,
        allocator: Arc<dyn SharedAllocator>,
    ) -> FfiResult<Self> {
        let types = if config.register_primitives {
            TypeRegistry::with_primitives(config.type_capacity)
                .map_err(|err| FfiError::InitializationFailed(format!("type registry: {err}")))?
        } else {
            TypeRegistry::new(config.type_capacity)
        };
        let conversions = if config.builtin_conversions {
            ConversionTable::with_builtin_rules()
        } else {
            ConversionTable::new()
        };
        let memory = MemoryManager::with_allocator(allocator);
        memory.set_strict_ownership(config.strict_ownership);

        context::register(ContextKind::Ffi, &config.name)
            .map_err(|err| FfiError::InitializationFailed(format!("context directory: {err}")))?;

        Ok(FfiRuntime {
            name: config.name,
            functions: Mutex::new(FunctionRegistry::new()),
            languages: Mutex::new(LanguageRegistry::new()),
            mapping: Mutex::new(TypeMappingContext { types, conversions }),
            memory,
            security: Mutex::new(None),
            performance: Mutex::new(None),
        })
    }

    /// The instance name this runtime is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ==========================================================================
    // Collaborators
    // ==========================================================================

    /// Attach the security collaborator consulted before every call.
    pub fn attach_security(&self, guard: Arc<dyn SecurityGuard>) {
        *self.security.lock().unwrap() = Some(guard);
    }

    /// Detach the security collaborator.
    pub fn detach_security(&self) {
        *self.security.lock().unwrap() = None;
    }

    /// Attach the performance collaborator (tracing and result cache).
    pub fn attach_performance(&self, hooks: Arc<dyn PerformanceHooks>) {
        *self.performance.lock().unwrap() = Some(hooks);
    }

    /// Detach the performance collaborator.
    pub fn detach_performance(&self) {
        *self.performance.lock().unwrap() = None;
    }

    // ==========================================================================
    // Language and function registration
    // ==========================================================================

    /// Register a language bridge.
    ///
    /// The bridge's `initialize` runs after insertion, with no registry lock
    /// held so it may re-enter the runtime; a failure rolls the insertion
    /// back.
    pub fn register_language(&self, name: &str, bridge: Arc<dyn LanguageBridge>) -> FfiResult<()> {
        self.languages
            .lock()
            .unwrap()
            .insert(name, Arc::clone(&bridge))?;
        if let Err(err) = bridge.initialize() {
            let _ = self.languages.lock().unwrap().remove(name);
            return Err(err);
        }
        Ok(())
    }

    /// Unregister a language bridge, running its `cleanup`.
    pub fn unregister_language(&self, name: &str) -> FfiResult<()> {
        let bridge = self.languages.lock().unwrap().remove(name)?;
        bridge.cleanup()
    }

    /// Expose a function to cross-language callers.
    ///
    /// The name must be unique. If the owning language's bridge is already
    /// registered it is notified via `register_function`; a notification
    /// failure unwinds the exposure.
    pub fn expose_function(
        &self,
        name: &str,
        native: NativeFn,
        signature: Signature,
        source_language: &str,
        flags: FunctionFlags,
    ) -> FfiResult<()> {
        if source_language.is_empty() {
            return Err(FfiError::InvalidParameters(
                "empty source language".to_string(),
            ));
        }
        let entry = FunctionEntry {
            name: name.to_string(),
            language: source_language.to_string(),
            native,
            signature,
            flags,
        };
        self.functions.lock().unwrap().expose(entry.clone())?;

        let bridge = self.languages.lock().unwrap().get(source_language);
        if let Some(bridge) = bridge {
            if let Err(err) = bridge.register_function(&entry) {
                let _ = self.functions.lock().unwrap().unregister(name);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove an exposed function.
    pub fn unregister_function(&self, name: &str) -> FfiResult<()> {
        self.functions.lock().unwrap().unregister(name).map(|_| ())
    }

    /// Whether a function is exposed under `name`.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.lock().unwrap().get(name).is_some()
    }

    /// Number of exposed functions.
    pub fn function_count(&self) -> usize {
        self.functions.lock().unwrap().len()
    }

    // ==========================================================================
    // Types, conversions, values
    // ==========================================================================

    /// Register a canonical type.
    pub fn register_type(&self, info: TypeInfo) -> FfiResult<()> {
        self.mapping.lock().unwrap().types.register(info)
    }

    /// Allocate a fresh user type id.
    pub fn allocate_type_id(&self) -> TypeId {
        self.mapping.lock().unwrap().types.allocate_id()
    }

    /// Register a conversion rule.
    pub fn register_conversion_rule(&self, rule: MappingRule) -> FfiResult<()> {
        self.mapping.lock().unwrap().conversions.register(rule)
    }

    /// Convert a value between a language/type pair.
    pub fn convert_value(
        &self,
        src_lang: &str,
        value: &Value,
        dst_lang: &str,
        dst_type: TypeId,
        flags: ConvertFlags,
    ) -> FfiResult<Value> {
        self.mapping.lock().unwrap().conversions.convert(
            src_lang,
            value.type_id(),
            value,
            dst_lang,
            dst_type,
            flags,
        )
    }

    /// Validate a value against a registered type and declared payload size.
    pub fn validate_value(&self, ty: TypeId, value: &Value, size: usize) -> FfiResult<()> {
        self.mapping.lock().unwrap().types.validate(ty, value, size)
    }

    /// Create a zeroed value of a registered type.
    ///
    /// Aggregate values are created with borrowed (value-owned) backing
    /// bytes; memory that crosses the boundary is governed by the ownership
    /// bridge, never by value lifetime.
    pub fn create_value(&self, ty: TypeId) -> FfiResult<Value> {
        if let Some(value) = Value::default_for(ty) {
            return Ok(value);
        }
        let mapping = self.mapping.lock().unwrap();
        let info = mapping.types.get(ty)?;
        match &info.detail {
            TypeDetail::Struct { .. } => Ok(Value::Struct {
                ty,
                data: AggregateData::borrowed(vec![0u8; info.size]),
            }),
            TypeDetail::Array { .. } => Ok(Value::Array {
                ty,
                data: AggregateData::borrowed(vec![0u8; info.size]),
            }),
            TypeDetail::Callback { .. } => Err(FfiError::UnsupportedOperation(
                "callback values are created from exposed functions".to_string(),
            )),
            TypeDetail::Primitive => Err(FfiError::UnsupportedOperation(format!(
                "no default value for {}",
                info.name
            ))),
        }
    }

    // ==========================================================================
    // Call dispatch
    // ==========================================================================

    /// Dispatch a cross-language call.
    ///
    /// Resolution order: function entry, target bridge, security check,
    /// signature check (with argument conversion), performance cache, native
    /// call. The security gate runs before any user-supplied conversion rule
    /// executes. A cache miss and a declined trace are the only silently
    /// recovered failures; everything else propagates.
    pub fn call_function(
        &self,
        name: &str,
        args: &[Value],
        target_language: &str,
    ) -> FfiResult<Value> {
        if name.is_empty() {
            return Err(FfiError::InvalidParameters(
                "empty function name".to_string(),
            ));
        }
        if target_language.is_empty() {
            return Err(FfiError::InvalidParameters(
                "empty target language".to_string(),
            ));
        }

        let entry = self
            .functions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| FfiError::function_not_found(name))?;
        let bridge = self
            .languages
            .lock()
            .unwrap()
            .get(target_language)
            .ok_or_else(|| FfiError::language_not_found(target_language))?;

        let security = self.security.lock().unwrap().clone();
        if let Some(guard) = security {
            let context = CallContextInfo {
                function: name.to_string(),
                target_language: target_language.to_string(),
                owning_language: entry.language.clone(),
            };
            if !guard.verify_access(name, target_language, &context) {
                return Err(FfiError::PermissionDenied(format!(
                    "access to '{name}' denied for '{target_language}'"
                )));
            }
        }

        let args = {
            let mapping = self.mapping.lock().unwrap();
            check_signature(
                &entry.signature,
                args,
                &mapping.conversions,
                target_language,
                &entry.language,
            )?;
            convert_args(
                &entry.signature,
                args,
                &mapping.conversions,
                target_language,
                &entry.language,
            )?
        };

        let performance = self.performance.lock().unwrap().clone();
        if let Some(hooks) = &performance {
            if let Some(hit) = hooks.check_cache(name, &args) {
                if let Some(handle) = hooks.trace_begin(name, &entry.language, target_language) {
                    hooks.trace_end(handle, true);
                }
                return Ok(hit);
            }
        }

        let trace = performance
            .as_ref()
            .and_then(|hooks| hooks.trace_begin(name, &entry.language, target_language));

        // No lock is held here; the bridge may re-enter the runtime.
        let result = bridge.call_function(name, &args);

        if let Some(hooks) = &performance {
            if let Ok(value) = &result {
                hooks.cache_result(name, &args, value);
            }
            if let Some(handle) = trace {
                hooks.trace_end(handle, false);
            }
        }
        result
    }

    // ==========================================================================
    // Memory facade
    // ==========================================================================

    /// The memory ownership bridge.
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Allocate a shared region owned by `lang`.
    pub fn alloc_shared(&self, size: usize, lang: &str) -> FfiResult<RegionHandle> {
        self.memory.alloc_shared(size, lang)
    }

    /// Share a region with another language.
    pub fn share_region(
        &self,
        handle: RegionHandle,
        from: &str,
        to: &str,
        mode: ShareMode,
    ) -> FfiResult<RegionHandle> {
        self.memory.share(handle, from, to, mode)
    }

    /// Take a reference on a region.
    pub fn acquire_region(
        &self,
        handle: RegionHandle,
        lang: &str,
        intent: AccessIntent,
    ) -> FfiResult<()> {
        self.memory.acquire(handle, lang, intent)
    }

    /// Drop one reference on a region.
    pub fn release_region(&self, handle: RegionHandle, lang: &str) -> FfiResult<()> {
        self.memory.release(handle, lang)
    }

    /// Owner release of a shared region.
    pub fn free_shared(&self, handle: RegionHandle, lang: &str) -> FfiResult<()> {
        self.memory.free_shared(handle, lang)
    }

    /// Inspect a region.
    pub fn region_info(&self, handle: RegionHandle) -> FfiResult<RegionInfo> {
        self.memory.get_region_info(handle)
    }

    /// Register a GC callback.
    pub fn register_gc_callback(&self, filter: Option<String>, callback: GcCallback) {
        self.memory.register_gc_callback(filter, callback)
    }

    /// Notify the bridge that `lang`'s collector is running.
    pub fn notify_gc(&self, lang: &str) -> usize {
        self.memory.notify_gc(lang)
    }

    /// Snapshot the ownership registry.
    pub fn create_snapshot(&self, lang: &str) -> FfiResult<SnapshotId> {
        self.memory.create_snapshot(lang)
    }

    /// Restore a snapshot (creator-only, full-registry replace).
    pub fn restore_snapshot(&self, id: SnapshotId, lang: &str) -> FfiResult<Vec<RegionHandle>> {
        self.memory.restore_snapshot(id, lang)
    }

    /// Install the strict-ownership compatibility predicate.
    pub fn set_compatibility_predicate(&self, predicate: Option<CompatibilityPredicate>) {
        self.memory.set_compatibility_predicate(predicate)
    }
}

impl Drop for FfiRuntime {
    fn drop(&mut self) {
        // Reverse initialization order: collaborators first, then bridges,
        // then the directory entry. Memory, types, and registries drop with
        // the struct.
        *self.performance.lock().unwrap() = None;
        *self.security.lock().unwrap() = None;
        let names = self.languages.lock().unwrap().names();
        for name in names {
            let bridge = self.languages.lock().unwrap().remove(&name);
            if let Ok(bridge) = bridge {
                let _ = bridge.cleanup();
            }
        }
        let _ = context::unregister(ContextKind::Ffi, &self.name);
    }
}

//! Security and performance collaborator interfaces.
//!
//! Both collaborators are external to the core: the runtime consults them
//! when attached and otherwise skips the step entirely. No registry lock is
//! held while a collaborator runs.

use polybridge_core::Value;

/// Context handed to the security collaborator for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContextInfo {
    /// The function being invoked.
    pub function: String,
    /// The language whose bridge will execute the call.
    pub target_language: String,
    /// The language that owns the function entry.
    pub owning_language: String,
}

/// Access-control collaborator consulted before every cross-language call.
pub trait SecurityGuard: Send + Sync {
    /// Whether the call may proceed. `false` maps to `PermissionDenied`.
    fn verify_access(&self, function: &str, target_language: &str, context: &CallContextInfo)
        -> bool;
}

/// Opaque handle pairing a `trace_begin` with its `trace_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceHandle(pub u64);

/// Tracing and result-cache collaborator.
///
/// Both of its failure modes are recoverable by design: a cache miss falls
/// through to a real call, and a `trace_begin` returning `None` yields an
/// untraced call.
pub trait PerformanceHooks: Send + Sync {
    /// Start a trace for a call. `None` means the call proceeds untraced.
    fn trace_begin(&self, function: &str, source: &str, target: &str) -> Option<TraceHandle>;

    /// Finish a trace. `cached` records whether the result came from the
    /// cache rather than a real invocation.
    fn trace_end(&self, handle: TraceHandle, cached: bool);

    /// Look up a cached result for `(function, args)`.
    fn check_cache(&self, function: &str, args: &[Value]) -> Option<Value>;

    /// Store a successful result for `(function, args)`.
    fn cache_result(&self, function: &str, args: &[Value], result: &Value);
}

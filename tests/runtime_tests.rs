//! End-to-end runtime tests: bridge registration, dispatch, conversion,
//! and the collaborator seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use polybridge::{
    CallContextInfo, ConvertFlags, FfiError, FfiResult, FfiRuntime, FunctionFlags, LanguageBridge,
    LanguageMatch, MappingRule, NativeFn, PerformanceHooks, RuntimeConfig, SecurityGuard,
    Signature, TraceHandle, TypeId, Value,
};

/// Bridge backed by the registered native entries themselves: `call_function`
/// looks nothing up, it simply runs whatever entry was pushed to it.
#[derive(Default)]
struct RecordingBridge {
    entries: Mutex<Vec<(String, NativeFn)>>,
    calls: AtomicUsize,
}

impl LanguageBridge for RecordingBridge {
    fn convert_to_native(&self, _: &Value, _: &mut [u8], _: TypeId) -> FfiResult<usize> {
        Ok(0)
    }

    fn convert_from_native(&self, _: &[u8], _: TypeId) -> FfiResult<Value> {
        Ok(Value::Void)
    }

    fn register_function(&self, entry: &polybridge::FunctionEntry) -> FfiResult<()> {
        self.entries
            .lock()
            .unwrap()
            .push((entry.name.clone(), entry.native.clone()));
        Ok(())
    }

    fn call_function(&self, name: &str, args: &[Value]) -> FfiResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().unwrap();
        let (_, native) = entries
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| FfiError::function_not_found(name))?;
        native.call(args)
    }
}

fn new_runtime(name: &str) -> FfiRuntime {
    FfiRuntime::new(RuntimeConfig {
        name: name.to_string(),
        ..RuntimeConfig::default()
    })
    .expect("runtime init")
}

fn expose_add(rt: &FfiRuntime) {
    rt.expose_function(
        "add",
        NativeFn::from_fn(|args| {
            match (args[0].get_as::<i32>(), args[1].get_as::<i32>()) {
                (Some(a), Some(b)) => Ok(Value::I32(a + b)),
                _ => Err(FfiError::InvalidParameters("add wants two int32s".into())),
            }
        }),
        Signature::new(TypeId::INT32, &[TypeId::INT32, TypeId::INT32]),
        "c",
        FunctionFlags::empty(),
    )
    .expect("expose add");
}

#[test]
fn add_two_int32s_across_the_boundary() {
    let rt = new_runtime("itest-add");
    rt.register_language("c", Arc::new(RecordingBridge::default()))
        .unwrap();
    expose_add(&rt);

    let result = rt
        .call_function("add", &[Value::I32(3), Value::I32(4)], "c")
        .unwrap();
    assert_eq!(result, Value::I32(7));
}

#[test]
fn missing_function_produces_no_value() {
    let rt = new_runtime("itest-missing");
    let bridge = Arc::new(RecordingBridge::default());
    rt.register_language("c", bridge.clone()).unwrap();

    let err = rt.call_function("no_such_fn", &[], "c").unwrap_err();
    assert!(matches!(
        err,
        FfiError::NotFound {
            kind: "function",
            ..
        }
    ));
    // Resolution failed before dispatch; the bridge never ran.
    assert_eq!(bridge.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn identity_conversion_round_trip() {
    let rt = new_runtime("itest-identity");
    for value in [
        Value::Bool(true),
        Value::I32(-7),
        Value::U64(u64::MAX),
        Value::F64(1.5),
        Value::String("hello".to_string()),
    ] {
        let ty = value.type_id();
        let out = rt
            .convert_value("python", &value, "c", ty, ConvertFlags::empty())
            .unwrap();
        assert_eq!(out, value);
    }
}

#[test]
fn widening_conversion_applied_to_arguments() {
    let rt = new_runtime("itest-widen");
    rt.register_language("c", Arc::new(RecordingBridge::default()))
        .unwrap();
    rt.expose_function(
        "sum64",
        NativeFn::from_fn(|args| {
            match (args[0].get_as::<i64>(), args[1].get_as::<i64>()) {
                (Some(a), Some(b)) => Ok(Value::I64(a + b)),
                _ => Err(FfiError::InvalidParameters("sum64 wants two int64s".into())),
            }
        }),
        Signature::new(TypeId::INT64, &[TypeId::INT64, TypeId::INT64]),
        "c",
        FunctionFlags::empty(),
    )
    .unwrap();

    // Both int32 arguments widen through the builtin rule.
    let result = rt
        .call_function("sum64", &[Value::I32(40), Value::I32(2)], "c")
        .unwrap();
    assert_eq!(result, Value::I64(42));
}

#[test]
fn unconvertible_argument_is_rejected_before_dispatch() {
    let rt = new_runtime("itest-mismatch");
    let bridge = Arc::new(RecordingBridge::default());
    rt.register_language("c", bridge.clone()).unwrap();
    expose_add(&rt);

    let err = rt
        .call_function("add", &[Value::String("x".into()), Value::I32(1)], "c")
        .unwrap_err();
    assert!(matches!(err, FfiError::TypeMismatch { .. }));
    assert_eq!(bridge.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn duplicate_function_registration_leaves_registry_unchanged() {
    let rt = new_runtime("itest-dupfn");
    rt.register_language("c", Arc::new(RecordingBridge::default()))
        .unwrap();
    expose_add(&rt);
    assert_eq!(rt.function_count(), 1);

    let err = rt
        .expose_function(
            "add",
            NativeFn::from_fn(|_| Ok(Value::Void)),
            Signature::new(TypeId::VOID, &[]),
            "cobol",
            FunctionFlags::empty(),
        )
        .unwrap_err();
    assert!(err.is_already_registered());
    assert_eq!(rt.function_count(), 1);

    // The original entry still dispatches.
    let result = rt
        .call_function("add", &[Value::I32(1), Value::I32(2)], "c")
        .unwrap();
    assert_eq!(result, Value::I32(3));
}

#[test]
fn bridge_is_notified_of_exposed_functions() {
    let rt = new_runtime("itest-notify");
    let bridge = Arc::new(RecordingBridge::default());
    rt.register_language("c", bridge.clone()).unwrap();
    expose_add(&rt);

    let names: Vec<String> = bridge
        .entries
        .lock()
        .unwrap()
        .iter()
        .map(|(n, _)| n.clone())
        .collect();
    assert_eq!(names, vec!["add".to_string()]);
}

struct AllowListGuard {
    allowed: &'static str,
}

impl SecurityGuard for AllowListGuard {
    fn verify_access(&self, _function: &str, target_language: &str, _: &CallContextInfo) -> bool {
        target_language == self.allowed
    }
}

#[test]
fn security_guard_gates_by_caller_language() {
    let rt = new_runtime("itest-guard");
    rt.register_language("c", Arc::new(RecordingBridge::default()))
        .unwrap();
    expose_add(&rt);
    rt.attach_security(Arc::new(AllowListGuard { allowed: "c" }));

    rt.call_function("add", &[Value::I32(1), Value::I32(1)], "c")
        .unwrap();

    rt.register_language("lua", Arc::new(RecordingBridge::default()))
        .unwrap();
    // "add" resolves, but it never reaches lua's bridge: "lua" lacks any
    // registered entry for it, and the guard rejects it first anyway.
    let err = rt
        .call_function("add", &[Value::I32(1), Value::I32(1)], "lua")
        .unwrap_err();
    assert!(matches!(err, FfiError::PermissionDenied(_)));
}

#[test]
fn denied_call_runs_no_conversion_rule() {
    let rt = new_runtime("itest-deny-convert");
    rt.register_language("c", Arc::new(RecordingBridge::default()))
        .unwrap();
    rt.expose_function(
        "parse",
        NativeFn::from_fn(|args| Ok(args.first().cloned().unwrap_or(Value::Void))),
        Signature::new(TypeId::INT32, &[TypeId::INT32]),
        "c",
        FunctionFlags::SECURE,
    )
    .unwrap();

    let conversions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&conversions);
    rt.register_conversion_rule(MappingRule::new(
        LanguageMatch::Any,
        TypeId::STRING,
        LanguageMatch::Any,
        TypeId::INT32,
        Arc::new(move |value: &Value, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            match value {
                Value::String(s) => s
                    .parse::<i32>()
                    .map(Value::I32)
                    .map_err(|_| FfiError::InvalidParameters(format!("not an int: '{s}'"))),
                other => Err(FfiError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: other.type_id().to_string(),
                }),
            }
        }),
    ))
    .unwrap();

    // The guard rejects before any argument conversion runs.
    rt.attach_security(Arc::new(AllowListGuard { allowed: "lua" }));
    let err = rt
        .call_function("parse", &[Value::String("42".to_string())], "c")
        .unwrap_err();
    assert!(matches!(err, FfiError::PermissionDenied(_)));
    assert_eq!(conversions.load(Ordering::SeqCst), 0);

    // Without the guard the same call converts and dispatches.
    rt.detach_security();
    let result = rt
        .call_function("parse", &[Value::String("42".to_string())], "c")
        .unwrap();
    assert_eq!(result, Value::I32(42));
    assert_eq!(conversions.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct CountingHooks {
    begins: AtomicUsize,
    ends: AtomicUsize,
    cached_ends: AtomicUsize,
    cache: Mutex<Option<Value>>,
}

impl PerformanceHooks for CountingHooks {
    fn trace_begin(&self, _: &str, _: &str, _: &str) -> Option<TraceHandle> {
        let n = self.begins.fetch_add(1, Ordering::SeqCst);
        Some(TraceHandle(n as u64))
    }

    fn trace_end(&self, _: TraceHandle, cached: bool) {
        self.ends.fetch_add(1, Ordering::SeqCst);
        if cached {
            self.cached_ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn check_cache(&self, _: &str, _: &[Value]) -> Option<Value> {
        self.cache.lock().unwrap().clone()
    }

    fn cache_result(&self, _: &str, _: &[Value], result: &Value) {
        *self.cache.lock().unwrap() = Some(result.clone());
    }
}

#[test]
fn cache_hit_skips_the_bridge() {
    let rt = new_runtime("itest-cache");
    let bridge = Arc::new(RecordingBridge::default());
    rt.register_language("c", bridge.clone()).unwrap();
    expose_add(&rt);

    let hooks = Arc::new(CountingHooks::default());
    rt.attach_performance(hooks.clone());

    let first = rt
        .call_function("add", &[Value::I32(2), Value::I32(2)], "c")
        .unwrap();
    assert_eq!(first, Value::I32(4));
    assert_eq!(bridge.calls.load(Ordering::SeqCst), 1);

    let second = rt
        .call_function("add", &[Value::I32(2), Value::I32(2)], "c")
        .unwrap();
    assert_eq!(second, Value::I32(4));
    assert_eq!(bridge.calls.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.cached_ends.load(Ordering::SeqCst), 1);
    assert_eq!(
        hooks.begins.load(Ordering::SeqCst),
        hooks.ends.load(Ordering::SeqCst)
    );
}

struct InitFailBridge;

impl LanguageBridge for InitFailBridge {
    fn initialize(&self) -> FfiResult<()> {
        Err(FfiError::InitializationFailed("vm unavailable".to_string()))
    }
    fn convert_to_native(&self, _: &Value, _: &mut [u8], _: TypeId) -> FfiResult<usize> {
        Ok(0)
    }
    fn convert_from_native(&self, _: &[u8], _: TypeId) -> FfiResult<Value> {
        Ok(Value::Void)
    }
    fn call_function(&self, _: &str, _: &[Value]) -> FfiResult<Value> {
        Ok(Value::Void)
    }
}

#[test]
fn failed_bridge_init_leaves_language_unregistered() {
    let rt = new_runtime("itest-initfail");
    let err = rt
        .register_language("wasm", Arc::new(InitFailBridge))
        .unwrap_err();
    assert!(matches!(err, FfiError::InitializationFailed(_)));

    // The slot is free again.
    rt.register_language("wasm", Arc::new(RecordingBridge::default()))
        .unwrap();
}

#[test]
fn variadic_extras_pass_through_unconverted() {
    let rt = new_runtime("itest-variadic");
    rt.register_language("c", Arc::new(RecordingBridge::default()))
        .unwrap();
    rt.expose_function(
        "printf",
        NativeFn::from_fn(|args| Ok(Value::I32(args.len() as i32))),
        Signature::new(TypeId::STRING, &[TypeId::STRING]).variadic(),
        "c",
        FunctionFlags::empty(),
    )
    .unwrap();

    let result = rt
        .call_function(
            "printf",
            &[
                Value::String("%d %f".to_string()),
                Value::I32(1),
                Value::F64(2.0),
            ],
            "c",
        )
        .unwrap();
    assert_eq!(result, Value::I32(3));

    let err = rt.call_function("printf", &[], "c").unwrap_err();
    assert!(matches!(err, FfiError::InvalidParameters(_)));
}

//! Contract tests for the callback router's import surfaces
//!
//! These drive the router the way the engine does: raw handles and offsets in
//! linear memory. Unregistered handles must get each surface's neutral result.

use std::sync::Arc;

use core_types::{
    EngineExports, HostImports, MemoryOffset, ModuleSourceType, MODULE_NAME_CAPACITY,
    MODULE_SOURCE_RECORD_SIZE,
};
use hako::{
    ClassId, Context, ContextHandle, HostHandlers, ModuleDefHandle, ModuleSource, Runtime,
    RuntimeHandle, RuntimeOptions, ValueHandle,
};
use test_engine::{TestBackend, TestEngine};

fn setup() -> (Runtime, Context, Arc<TestEngine>) {
    let backend = TestBackend::new();
    let runtime = Runtime::create(&backend, &TestBackend::binary(), RuntimeOptions::default())
        .expect("runtime");
    let context = runtime.create_context().expect("context");
    let engine = backend.last_engine().expect("engine");
    (runtime, context, engine)
}

const UNKNOWN_CTX: ContextHandle = ContextHandle::new(0xFFF0);
const UNKNOWN_RT: RuntimeHandle = RuntimeHandle::new(0xFFF0);

/// Allocates `s` in engine memory and returns its offset.
fn cstring(runtime: &Runtime, ctx: ContextHandle, s: &str) -> MemoryOffset {
    runtime.memory().unwrap().allocate_string(ctx, s).expect("string").0
}

fn read_record(runtime: &Runtime, out: MemoryOffset) -> (u32, u32, u32) {
    let memory = runtime.memory().unwrap().memory();
    let field = |i: u32| memory.read_u32(out.checked_add(4 * i).unwrap()).unwrap();
    (field(0), field(1), field(2))
}

struct LongNames;

impl HostHandlers for LongNames {
    fn normalize_module(&self, _ctx: &Context, _base: &str, _name: &str) -> String {
        "x".repeat(MODULE_NAME_CAPACITY as usize * 2)
    }

    fn load_module(&self, _ctx: &Context, name: &str) -> ModuleSource {
        ModuleSource::Source(format!("'{}'", name))
    }
}

// ============================================================================
// Registration Contract
// ============================================================================

#[test]
fn contract_register_and_unregister_context() {
    let (runtime, context, _engine) = setup();
    let router = runtime.router();
    let ctx = context.handle();
    assert!(router.has_context(ctx));

    assert!(router.unregister_context(ctx));
    assert!(!router.has_context(ctx));
    assert!(!router.unregister_context(ctx));

    router.register_context(&context);
    assert!(router.has_context(ctx));
}

#[test]
fn contract_unregister_contexts_in_batch() {
    let (runtime, first, _engine) = setup();
    let second = runtime.create_context().unwrap();
    let router = runtime.router();
    assert_eq!(router.context_count(), 2);

    router.unregister_contexts(&[first.handle(), second.handle(), UNKNOWN_CTX]);
    assert_eq!(router.context_count(), 0);
}

#[test]
fn contract_register_and_unregister_runtime() {
    let (runtime, _context, _engine) = setup();
    let router = runtime.router();
    let rt = runtime.handle();
    assert_eq!(router.runtime_count(), 1);

    assert!(router.unregister_runtime(rt));
    assert!(!router.unregister_runtime(rt));
    assert!(!router.interrupt_handler(rt, 0));

    router.register_runtime(&runtime);
    assert_eq!(router.runtime_count(), 1);
    runtime.interrupt_handle().interrupt();
    assert!(router.interrupt_handler(rt, 0));
}

#[test]
fn contract_disposed_context_is_not_resolved() {
    let (runtime, context, _engine) = setup();
    let ctx = context.handle();
    context.close();
    assert!(!runtime.router().has_context(ctx));
}

// ============================================================================
// Neutral Result Contract
// ============================================================================

#[test]
fn contract_call_function_unregistered_returns_null() {
    let (runtime, context, _engine) = setup();
    let ctx = context.handle();
    runtime.router().unregister_context(ctx);
    let result = runtime
        .router()
        .call_function(ctx, 1, ValueHandle::NULL, 0, MemoryOffset::NULL);
    assert!(result.is_null());
}

#[test]
fn contract_interrupt_unregistered_is_false() {
    let (runtime, _context, _engine) = setup();
    assert!(!runtime.router().interrupt_handler(UNKNOWN_RT, 0));
}

#[test]
fn contract_normalize_unregistered_is_identity() {
    let (runtime, context, _engine) = setup();
    let ctx = context.handle();
    let base = cstring(&runtime, ctx, "main.js");
    let name = cstring(&runtime, ctx, "./dep.js");
    let out = runtime.memory().unwrap().allocate(ctx, MODULE_NAME_CAPACITY).unwrap();

    let len = runtime
        .router()
        .normalize_module(UNKNOWN_CTX, base, name, 0, out);
    assert_eq!(len, 8);
    assert_eq!(runtime.memory().unwrap().read_string(out).unwrap(), "./dep.js");

    for ptr in [base, name, out] {
        runtime.memory().unwrap().free(ctx, ptr);
    }
}

#[test]
fn contract_load_module_unregistered_is_error() {
    let (runtime, context, _engine) = setup();
    let ctx = context.handle();
    let name = cstring(&runtime, ctx, "dep");
    let out = runtime.memory().unwrap().allocate(ctx, MODULE_SOURCE_RECORD_SIZE).unwrap();

    let source_type = runtime
        .router()
        .load_module(runtime.handle(), UNKNOWN_CTX, name, 0, out);
    assert_eq!(source_type, ModuleSourceType::Error);
    assert_eq!(read_record(&runtime, out), (ModuleSourceType::Error.raw(), 0, 0));

    runtime.memory().unwrap().free(ctx, name);
    runtime.memory().unwrap().free(ctx, out);
}

#[test]
fn contract_module_init_unregistered_is_success() {
    let (runtime, _context, _engine) = setup();
    assert_eq!(
        runtime.router().module_init(UNKNOWN_CTX, ModuleDefHandle::new(64)),
        0
    );
}

#[test]
fn contract_class_callbacks_unregistered_are_noops() {
    let (runtime, context, engine) = setup();
    let router = runtime.router();
    let value = context.new_object().unwrap();

    router.class_finalizer(UNKNOWN_RT, 1, ClassId::new(1));
    router.class_gc_mark(UNKNOWN_RT, value.handle(), MemoryOffset::new(8), ClassId::new(1));
    assert!(engine.marked_values().is_empty());

    let constructed = router.class_constructor(
        UNKNOWN_CTX,
        value.handle(),
        0,
        MemoryOffset::NULL,
        ClassId::new(1),
    );
    assert!(constructed.is_null());
}

#[test]
fn contract_promise_rejection_unregistered_is_ignored() {
    let (runtime, context, engine) = setup();
    let reason = context.new_string("ignored").unwrap();
    let values = engine.live_values();
    runtime.router().promise_rejection_tracker(
        UNKNOWN_CTX,
        ValueHandle::NULL,
        reason.handle(),
        false,
        0,
    );
    assert_eq!(engine.live_values(), values);
    assert_eq!(reason.as_string().unwrap(), "ignored");
}

// ============================================================================
// Marshalling Contract
// ============================================================================

#[test]
fn contract_normalize_falls_back_when_result_overflows() {
    let (runtime, context, _engine) = setup();
    runtime.set_host_handlers(Arc::new(LongNames)).unwrap();
    let ctx = context.handle();
    let base = cstring(&runtime, ctx, "eval");
    let name = cstring(&runtime, ctx, "short");
    let out = runtime.memory().unwrap().allocate(ctx, MODULE_NAME_CAPACITY).unwrap();

    let len = runtime.router().normalize_module(ctx, base, name, 0, out);
    assert_eq!(len, 5);
    assert_eq!(runtime.memory().unwrap().read_string(out).unwrap(), "short");

    for ptr in [base, name, out] {
        runtime.memory().unwrap().free(ctx, ptr);
    }
}

#[test]
fn contract_normalize_fails_when_request_overflows() {
    let (runtime, context, _engine) = setup();
    runtime.set_host_handlers(Arc::new(LongNames)).unwrap();
    let ctx = context.handle();
    let long = "y".repeat(MODULE_NAME_CAPACITY as usize);
    let base = cstring(&runtime, ctx, "eval");
    let name = cstring(&runtime, ctx, &long);
    let out = runtime.memory().unwrap().allocate(ctx, MODULE_NAME_CAPACITY).unwrap();

    assert_eq!(runtime.router().normalize_module(ctx, base, name, 0, out), 0);

    for ptr in [base, name, out] {
        runtime.memory().unwrap().free(ctx, ptr);
    }
}

#[test]
fn contract_load_module_writes_source_record() {
    let (runtime, context, engine) = setup();
    runtime.set_host_handlers(Arc::new(LongNames)).unwrap();
    let ctx = context.handle();
    let name = cstring(&runtime, ctx, "dep");
    let out = runtime.memory().unwrap().allocate(ctx, MODULE_SOURCE_RECORD_SIZE).unwrap();
    let allocations = engine.live_allocations();

    let source_type = runtime
        .router()
        .load_module(runtime.handle(), ctx, name, 0, out);
    assert_eq!(source_type, ModuleSourceType::String);

    let (tag, payload, len) = read_record(&runtime, out);
    assert_eq!(tag, ModuleSourceType::String.raw());
    assert_eq!(len, 5);
    let payload = MemoryOffset::new(payload);
    assert_eq!(runtime.memory().unwrap().read_string(payload).unwrap(), "'dep'");
    assert_eq!(engine.live_allocations(), allocations + 1);

    for ptr in [payload, name, out] {
        runtime.memory().unwrap().free(ctx, ptr);
    }
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn contract_call_function_round_trips_values() {
    let (runtime, context, engine) = setup();
    let ctx = context.handle();
    let _echo = context
        .new_function("echo", |ctx, _this, args| match args.first() {
            Some(arg) => arg.dup(),
            None => ctx.undefined(),
        })
        .unwrap();

    let arg = context.new_number(7.0).unwrap();
    let argv = runtime.memory().unwrap().allocate(ctx, 4).unwrap();
    runtime
        .memory()
        .unwrap()
        .memory()
        .write_u32(argv, arg.handle().raw())
        .unwrap();

    let result = runtime
        .router()
        .call_function(ctx, 1, ValueHandle::NULL, 1, argv);
    assert_eq!(result, arg.handle());
    assert_eq!(engine.refcount(arg.handle()), 2);

    runtime.memory().unwrap().free_value(ctx, result);
    runtime.memory().unwrap().free(ctx, argv);
    assert_eq!(engine.refcount(arg.handle()), 1);
}

#[test]
fn contract_call_function_error_raises_exception() {
    let (runtime, context, engine) = setup();
    let ctx = context.handle();
    let _fail = context
        .new_function("fail", |_ctx, _this, _args| {
            Err(hako::HakoError::Host("refused".to_string()))
        })
        .unwrap();

    let marker = runtime
        .router()
        .call_function(ctx, 1, ValueHandle::NULL, 0, MemoryOffset::NULL);
    assert!(!marker.is_null());

    let error = engine.get_last_error(ctx, marker);
    assert!(!error.is_null());
    let text = engine.to_cstring(ctx, error);
    assert_eq!(
        runtime.memory().unwrap().read_string(text).unwrap(),
        "Error: host handler failed: refused"
    );

    runtime.memory().unwrap().free_cstring(ctx, text);
    runtime.memory().unwrap().free_value(ctx, error);
    runtime.memory().unwrap().free_value(ctx, marker);
    assert_eq!(engine.invalid_frees(), 0);
}

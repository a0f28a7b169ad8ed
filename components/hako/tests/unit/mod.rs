//! Unit tests for the runtime, context and value facade

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hako::{
    ClassId, Context, DisposedKind, EvalKind, EvalOptions, HakoError, HostHandlers,
    ModuleDefHandle, ModuleSource, Runtime, RuntimeHandle, RuntimeOptions, Value, ValueHandle,
};
use parking_lot::Mutex;
use test_engine::{TestBackend, TestEngine};

fn setup() -> (Runtime, Context, Arc<TestEngine>) {
    let backend = TestBackend::new();
    let runtime = Runtime::create(&backend, &TestBackend::binary(), RuntimeOptions::default())
        .expect("runtime");
    let context = runtime.create_context().expect("context");
    let engine = backend.last_engine().expect("engine");
    (runtime, context, engine)
}

/// Handlers that record what the engine asked for.
#[derive(Default)]
struct Recorder {
    modules: Mutex<HashMap<String, ModuleSource>>,
    normalized: Mutex<Vec<(String, String)>>,
    fail_init: AtomicBool,
    interrupt: AtomicBool,
    constructed: AtomicUsize,
    finalized: Mutex<Vec<u32>>,
    marked: AtomicUsize,
    rejections: Mutex<Vec<(String, bool)>>,
}

impl HostHandlers for Recorder {
    fn interrupt(&self, _rt: RuntimeHandle) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn normalize_module(&self, _ctx: &Context, base_name: &str, name: &str) -> String {
        self.normalized
            .lock()
            .push((base_name.to_string(), name.to_string()));
        format!("lib/{}", name)
    }

    fn load_module(&self, _ctx: &Context, name: &str) -> ModuleSource {
        self.modules
            .lock()
            .get(name)
            .cloned()
            .unwrap_or(ModuleSource::Error)
    }

    fn module_init(&self, _ctx: &Context, _module: ModuleDefHandle) -> hako::Result<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(HakoError::Host("init refused".to_string()));
        }
        Ok(())
    }

    fn class_finalizer(&self, _rt: RuntimeHandle, opaque: u32, _class_id: ClassId) -> hako::Result<()> {
        self.finalized.lock().push(opaque);
        Ok(())
    }

    fn class_gc_mark(
        &self,
        _rt: RuntimeHandle,
        value: ValueHandle,
        _class_id: ClassId,
        mark: &mut dyn FnMut(ValueHandle),
    ) {
        self.marked.fetch_add(1, Ordering::SeqCst);
        mark(value);
    }

    fn class_constructor(
        &self,
        ctx: &Context,
        _new_target: &Value,
        args: &[Value],
        class_id: ClassId,
    ) -> hako::Result<Option<Value>> {
        let opaque = 100 + self.constructed.fetch_add(1, Ordering::SeqCst) as u32;
        let instance = ctx.new_class_instance(class_id, opaque)?;
        let x = ctx.new_number(args.len() as f64)?;
        instance.set_property("argc", &x)?;
        Ok(Some(instance))
    }

    fn promise_rejection(&self, _ctx: &Context, _promise: &Value, reason: &Value, is_handled: bool) {
        let reason = reason.as_string().unwrap_or_default();
        self.rejections.lock().push((reason, is_handled));
    }
}

fn with_recorder() -> (Runtime, Context, Arc<TestEngine>, Arc<Recorder>) {
    let (runtime, context, engine) = setup();
    let recorder = Arc::new(Recorder::default());
    runtime.set_host_handlers(recorder.clone()).unwrap();
    (runtime, context, engine, recorder)
}

// ============================================================================
// Runtime Tests
// ============================================================================

#[test]
fn test_runtime_create() {
    let (runtime, _context, engine) = setup();
    assert!(!runtime.handle().is_null());
    assert!(!runtime.is_disposed());
    assert_eq!(runtime.context_count(), 1);
    assert_eq!(engine.runtime_count(), 1);
    assert!(runtime.router().is_initialized());
}

#[test]
fn test_runtime_create_rejects_malformed_binary() {
    let backend = TestBackend::new();
    let err = Runtime::create(&backend, b"garbage", RuntimeOptions::default()).unwrap_err();
    assert!(matches!(err, HakoError::Instantiation(_)));
    assert_eq!(backend.instance_count(), 0);
}

#[test]
fn test_runtime_close_cascades_to_contexts() {
    let (runtime, first, engine) = setup();
    let second = runtime.create_context().unwrap();
    let third = runtime.create_context().unwrap();
    assert_eq!(runtime.context_count(), 3);
    assert_eq!(runtime.router().context_count(), 3);

    runtime.close();

    assert!(runtime.is_disposed());
    assert!(runtime.handle().is_null());
    assert_eq!(runtime.context_count(), 0);
    assert_eq!(runtime.router().context_count(), 0);
    assert_eq!(runtime.router().runtime_count(), 0);
    assert!(!runtime.router().is_initialized());
    assert_eq!(engine.context_count(), 0);
    assert_eq!(engine.runtime_count(), 0);
    for context in [&first, &second, &third] {
        assert!(context.is_disposed());
        assert!(context.handle().is_null());
    }
}

#[test]
fn test_operations_after_close_fail() {
    let (runtime, context, _engine) = setup();
    runtime.close();

    assert_eq!(
        runtime.create_context().unwrap_err(),
        HakoError::Disposed(DisposedKind::Runtime)
    );
    assert!(runtime.run_gc().unwrap_err().is_disposed());
    assert!(runtime.set_memory_limit(0).unwrap_err().is_disposed());
    assert!(runtime.is_microtask_pending().unwrap_err().is_disposed());
    assert!(runtime.execute_microtasks(None).unwrap_err().is_disposed());
    assert!(matches!(
        runtime.memory(),
        Err(HakoError::Disposed(DisposedKind::Runtime))
    ));
    assert_eq!(
        runtime
            .set_host_handlers(Arc::new(Recorder::default()))
            .unwrap_err(),
        HakoError::Disposed(DisposedKind::Runtime)
    );
    assert_eq!(
        context.eval_code("1").unwrap_err(),
        HakoError::Disposed(DisposedKind::Context)
    );
    assert!(context.undefined().unwrap_err().is_disposed());
    assert!(context.new_number(1.0).unwrap_err().is_disposed());
}

/// Handlers holding a context, as an embedder's closure state often does.
struct Captures {
    context: Context,
}

impl HostHandlers for Captures {}

#[test]
fn test_close_releases_host_handlers() {
    let (runtime, context, _engine) = setup();
    let handlers = Arc::new(Captures { context });
    runtime.set_host_handlers(handlers.clone()).unwrap();
    assert_eq!(Arc::strong_count(&handlers), 2);

    runtime.close();
    assert_eq!(Arc::strong_count(&handlers), 1);
    assert!(handlers.context.is_disposed());
}

#[test]
fn test_runtime_double_close_is_noop() {
    let (runtime, _context, engine) = setup();
    runtime.close();
    let invalid = engine.invalid_frees();
    runtime.close();
    assert_eq!(engine.invalid_frees(), invalid);
    assert_eq!(invalid, 0);
}

#[test]
fn test_runtime_drop_closes() {
    let (runtime, context, engine) = setup();
    drop(runtime);
    assert!(context.is_disposed());
    assert_eq!(engine.runtime_count(), 0);
}

#[test]
fn test_memory_limit_from_options() {
    let backend = TestBackend::new();
    let options = RuntimeOptions::new().with_memory_limit(1);
    let runtime = Runtime::create(&backend, &TestBackend::binary(), options).unwrap();
    assert_eq!(
        runtime.create_context().unwrap_err(),
        HakoError::Allocation { size: 0 }
    );
    runtime.set_memory_limit(0).unwrap();
    assert!(runtime.create_context().is_ok());
}

#[test]
fn test_memory_limit_fails_eval_allocation() {
    let (runtime, context, engine) = setup();
    let before = engine.live_allocations();
    runtime.set_memory_limit(1).unwrap();
    assert_eq!(
        context.eval_code("1").unwrap_err(),
        HakoError::Allocation { size: 2 }
    );
    runtime.set_memory_limit(0).unwrap();
    assert_eq!(engine.live_allocations(), before);
}

#[test]
fn test_runtime_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Runtime>();
    assert_send_sync::<Context>();
    assert_send_sync::<Value>();
}

// ============================================================================
// Evaluation Tests
// ============================================================================

#[test]
fn test_eval_hello_world() {
    let (_runtime, context, _engine) = setup();
    let result = context.eval_code("\"Hello, World!\"").unwrap();
    assert_eq!(result.as_string().unwrap(), "Hello, World!");
}

#[test]
fn test_eval_arithmetic() {
    let (_runtime, context, _engine) = setup();
    let result = context.eval_code("2 + 2").unwrap();
    assert_eq!(result.as_number().unwrap(), 4.0);
    assert_eq!(result.as_string().unwrap(), "4");
}

#[test]
fn test_eval_syntax_error_is_symmetric() {
    let (_runtime, context, engine) = setup();
    let allocations = engine.live_allocations();
    let values = engine.live_values();

    let err = context.eval_code("while (true) {").unwrap_err();
    match err {
        HakoError::Evaluation { message } => {
            assert!(!message.is_empty());
            assert!(message.starts_with("SyntaxError"));
        }
        other => panic!("expected evaluation error, got {:?}", other),
    }

    assert_eq!(engine.live_allocations(), allocations);
    assert_eq!(engine.live_values(), values);
}

#[test]
fn test_eval_thrown_value_message() {
    let (_runtime, context, _engine) = setup();
    let err = context.eval_code("throw 'custom failure'").unwrap_err();
    assert_eq!(err.to_string(), "custom failure");

    let err = context.eval_code("notDefined + 1").unwrap_err();
    assert_eq!(err.to_string(), "ReferenceError: notDefined is not defined");
}

#[test]
fn test_eval_empty_source_is_undefined() {
    let (_runtime, context, engine) = setup();
    let values = engine.live_values();
    let result = context.eval_code("").unwrap();
    assert!(result.is_borrowed());
    assert!(result.is_undefined().unwrap());
    assert_eq!(engine.live_values(), values);
}

#[test]
fn test_eval_with_options() {
    let (_runtime, context, _engine, recorder) = with_recorder();
    recorder.modules.lock().insert(
        "lib/answer".to_string(),
        ModuleSource::Source("40 + 2".to_string()),
    );

    let options = EvalOptions::new()
        .with_filename("main.js")
        .with_kind(EvalKind::Module)
        .with_strict(true);
    let result = context
        .eval_code_with_options("import 'answer'", &options)
        .unwrap();
    assert_eq!(result.as_number().unwrap(), 42.0);
    assert_eq!(
        recorder.normalized.lock().as_slice(),
        &[("main.js".to_string(), "answer".to_string())]
    );
}

#[test]
fn test_eval_empty_filename_is_named_eval() {
    let (_runtime, context, _engine, recorder) = with_recorder();
    recorder.modules.lock().insert(
        "lib/answer".to_string(),
        ModuleSource::Source("42".to_string()),
    );

    let options = EvalOptions::new().with_filename("");
    let result = context
        .eval_code_with_options("import 'answer'", &options)
        .unwrap();
    assert_eq!(result.as_number().unwrap(), 42.0);
    assert_eq!(
        recorder.normalized.lock().as_slice(),
        &[("eval".to_string(), "answer".to_string())]
    );
}

// ============================================================================
// Value Tests
// ============================================================================

#[test]
fn test_singleton_free_is_noop() {
    let (_runtime, context, engine) = setup();
    let mut undefined = context.undefined().unwrap();
    let mut null = context.null().unwrap();
    assert!(undefined.is_undefined().unwrap());
    assert!(null.is_null().unwrap());
    for _ in 0..3 {
        undefined.free();
        null.free();
    }
    assert!(context.undefined().unwrap().is_undefined().unwrap());
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn test_dup_then_free_leaves_original_usable() {
    let (_runtime, context, engine) = setup();
    let mut value = context.new_string("kept").unwrap();
    let mut copy = value.dup().unwrap();
    assert_eq!(copy.handle(), value.handle());
    copy.free();
    assert_eq!(value.as_string().unwrap(), "kept");
    assert_eq!(engine.refcount(value.handle()), 1);
    value.free();
    value.free();
    assert!(value.handle().is_null());
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn test_drop_releases_value() {
    let (_runtime, context, engine) = setup();
    let values = engine.live_values();
    {
        let _a = context.new_number(1.0).unwrap();
        let _b = context.new_object().unwrap();
        assert_eq!(engine.live_values(), values + 2);
    }
    assert_eq!(engine.live_values(), values);
}

#[test]
fn test_value_outliving_context() {
    let (_runtime, context, engine) = setup();
    let value = context.new_number(3.0).unwrap();
    context.close();
    assert_eq!(
        value.as_number().unwrap_err(),
        HakoError::Disposed(DisposedKind::Context)
    );
    drop(value);
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn test_properties() {
    let (_runtime, context, _engine) = setup();
    let object = context.new_object().unwrap();
    let number = context.new_number(1.5).unwrap();
    object.set_property("x", &number).unwrap();
    assert_eq!(object.get_property("x").unwrap().as_number().unwrap(), 1.5);
    assert!(object.get_property("missing").unwrap().is_undefined().unwrap());

    let array = context.new_array().unwrap();
    array.set_property("0", &number).unwrap();
    assert_eq!(array.get_property("length").unwrap().as_number().unwrap(), 1.0);

    let global = context.global_object().unwrap();
    global.set_property("answer", &context.new_number(41.0).unwrap()).unwrap();
    assert_eq!(context.eval_code("answer + 1").unwrap().as_number().unwrap(), 42.0);
}

#[test]
fn test_set_property_on_primitive_fails() {
    let (_runtime, context, _engine) = setup();
    let number = context.new_number(1.0).unwrap();
    let err = number.set_property("x", &number).unwrap_err();
    assert!(matches!(err, HakoError::Evaluation { .. }));
}

// ============================================================================
// Context Tests
// ============================================================================

#[test]
fn test_context_close_is_idempotent() {
    let (runtime, context, engine) = setup();
    let other = runtime.create_context().unwrap();
    context.close();
    context.close();
    assert_eq!(runtime.context_count(), 1);
    assert_eq!(engine.context_count(), 1);
    assert!(!runtime.router().has_context(context.handle()));
    assert_eq!(other.eval_code("1").unwrap().as_number().unwrap(), 1.0);
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn test_context_close_releases_its_host_functions() {
    let (runtime, context, _engine) = setup();
    let seven = context
        .new_function("seven", |ctx, _this, _args| ctx.new_number(7.0))
        .unwrap();
    context.global_object().unwrap().set_property("seven", &seven).unwrap();

    let token = Arc::new(());
    for _ in 0..100 {
        let scratch = runtime.create_context().unwrap();
        let held = token.clone();
        let owner = scratch.clone();
        let f = scratch
            .new_function("f", move |_ctx, _this, _args| {
                owner.new_number(Arc::strong_count(&held) as f64)
            })
            .unwrap();
        drop(f);
        scratch.close();
    }

    assert_eq!(Arc::strong_count(&token), 1);
    assert_eq!(runtime.context_count(), 1);
    assert_eq!(context.eval_code("seven()").unwrap().as_number().unwrap(), 7.0);
}

#[test]
fn test_new_string_round_trip() {
    let (_runtime, context, _engine) = setup();
    let value = context.new_string("héllo wörld").unwrap();
    assert_eq!(value.as_string().unwrap(), "héllo wörld");
}

// ============================================================================
// Host Function Tests
// ============================================================================

#[test]
fn test_host_function_receives_arguments() {
    let (_runtime, context, engine) = setup();
    let add = context
        .new_function("add", |ctx, _this, args| {
            let sum: f64 = args
                .iter()
                .map(|arg| arg.as_number())
                .collect::<hako::Result<Vec<_>>>()?
                .into_iter()
                .sum();
            ctx.new_number(sum)
        })
        .unwrap();
    context.global_object().unwrap().set_property("add", &add).unwrap();

    let values = engine.live_values();
    let result = context.eval_code("add(2, 3) * 2").unwrap();
    assert_eq!(result.as_number().unwrap(), 10.0);
    drop(result);
    assert_eq!(engine.live_values(), values);
}

#[test]
fn test_host_function_error_becomes_exception() {
    let (_runtime, context, _engine) = setup();
    let fail = context
        .new_function("fail", |_ctx, _this, _args| {
            Err(HakoError::Host("nope".to_string()))
        })
        .unwrap();
    context.global_object().unwrap().set_property("fail", &fail).unwrap();

    let err = context.eval_code("fail()").unwrap_err();
    assert_eq!(err.to_string(), "Error: host handler failed: nope");
}

#[test]
fn test_host_function_can_evaluate_reentrantly() {
    let (_runtime, context, _engine) = setup();
    let nested = context
        .new_function("nested", |ctx, _this, _args| ctx.eval_code("20 + 1"))
        .unwrap();
    context.global_object().unwrap().set_property("nested", &nested).unwrap();
    assert_eq!(context.eval_code("nested() * 2").unwrap().as_number().unwrap(), 42.0);
}

#[test]
fn test_calling_non_function_is_type_error() {
    let (_runtime, context, _engine) = setup();
    let err = context.eval_code("undefined()").unwrap_err();
    assert!(err.to_string().starts_with("TypeError"));
}

// ============================================================================
// Module Tests
// ============================================================================

#[test]
fn test_unknown_module_fails() {
    let (_runtime, context, _engine) = setup();
    let err = context.eval_code("import 'missing'").unwrap_err();
    assert!(err.to_string().contains("could not load module 'missing'"));
}

#[test]
fn test_precompiled_module() {
    let (_runtime, context, engine, recorder) = with_recorder();
    recorder.modules.lock().insert(
        "lib/compiled".to_string(),
        ModuleSource::Precompiled(test_engine::compile("6 * 7")),
    );
    let allocations = engine.live_allocations();
    let result = context.eval_code("import 'compiled'").unwrap();
    assert_eq!(result.as_number().unwrap(), 42.0);
    drop(result);
    assert_eq!(engine.live_allocations(), allocations);
}

#[test]
fn test_module_init_failure() {
    let (_runtime, context, _engine, recorder) = with_recorder();
    recorder
        .modules
        .lock()
        .insert("lib/m".to_string(), ModuleSource::Source("1".to_string()));
    recorder.fail_init.store(true, Ordering::SeqCst);
    let err = context.eval_code("import 'm'").unwrap_err();
    assert!(err.to_string().contains("module initialization failed"));
}

// ============================================================================
// Interrupt Tests
// ============================================================================

#[test]
fn test_interrupt_handler_aborts_loop() {
    let (_runtime, context, _engine, recorder) = with_recorder();
    recorder.interrupt.store(true, Ordering::SeqCst);
    let err = context.eval_code("while (1) {}").unwrap_err();
    assert_eq!(err.to_string(), "InternalError: interrupted");
}

#[test]
fn test_interrupt_handle_from_another_thread() {
    let (runtime, context, _engine) = setup();
    let handle = runtime.interrupt_handle();
    let worker = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(10));
        handle.interrupt();
    });
    let err = context.eval_code("while (true) {}").unwrap_err();
    worker.join().unwrap();
    assert!(err.to_string().contains("interrupted"));
    assert!(!runtime.interrupt_handle().is_requested());
    assert_eq!(context.eval_code("1 + 1").unwrap().as_number().unwrap(), 2.0);
}

// ============================================================================
// Microtask Tests
// ============================================================================

#[test]
fn test_execute_microtasks() {
    let (runtime, context, _engine) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let tick = context
        .new_function("tick", move |ctx, _this, _args| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.undefined()
        })
        .unwrap();
    context.global_object().unwrap().set_property("tick", &tick).unwrap();

    context
        .eval_code("queueMicrotask(tick); queueMicrotask(tick); queueMicrotask(tick)")
        .unwrap();
    assert!(runtime.is_microtask_pending().unwrap());
    assert_eq!(runtime.execute_microtasks(Some(1)).unwrap(), 1);
    assert_eq!(runtime.execute_microtasks(None).unwrap(), 2);
    assert!(!runtime.is_microtask_pending().unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_failing_microtask() {
    let (runtime, context, _engine) = setup();
    let boom = context
        .new_function("boom", |_ctx, _this, _args| {
            Err(HakoError::Host("job failed".to_string()))
        })
        .unwrap();
    context.global_object().unwrap().set_property("boom", &boom).unwrap();
    context.eval_code("queueMicrotask(boom)").unwrap();
    assert_eq!(runtime.execute_microtasks(None).unwrap_err(), HakoError::PendingJob);
}

#[test]
fn test_promise_rejection_tracker() {
    let (runtime, context, _engine, recorder) = with_recorder();
    let promise = context.eval_code("Promise.reject('boom')").unwrap();
    assert_eq!(promise.as_string().unwrap(), "[object Promise]");
    assert_eq!(runtime.execute_microtasks(None).unwrap(), 1);
    assert_eq!(
        recorder.rejections.lock().as_slice(),
        &[("boom".to_string(), false)]
    );
}

// ============================================================================
// Host Class Tests
// ============================================================================

#[test]
fn test_class_construct_mark_and_finalize() {
    let (runtime, context, engine, recorder) = with_recorder();
    let class_id = context.new_class("Point").unwrap();
    assert!(class_id.is_valid());

    let point = context.eval_code("new Point(1, 2)").unwrap();
    assert_eq!(point.get_property("argc").unwrap().as_number().unwrap(), 2.0);
    assert_eq!(recorder.constructed.load(Ordering::SeqCst), 1);

    runtime.run_gc().unwrap();
    assert_eq!(recorder.marked.load(Ordering::SeqCst), 1);
    assert_eq!(engine.marked_values().len(), 1);
    assert!(recorder.finalized.lock().is_empty());

    drop(point);
    runtime.run_gc().unwrap();
    assert_eq!(recorder.finalized.lock().as_slice(), &[100]);
}

#[test]
fn test_context_close_finalizes_instances() {
    let (_runtime, context, _engine, recorder) = with_recorder();
    let class_id = context.new_class("Handle").unwrap();
    let instance = context.new_class_instance(class_id, 9).unwrap();
    context.close();
    assert_eq!(recorder.finalized.lock().as_slice(), &[9]);
    drop(instance);
}

#[test]
fn test_panicking_finalizer_is_swallowed() {
    struct Panicky;
    impl HostHandlers for Panicky {
        fn class_finalizer(&self, _rt: RuntimeHandle, _opaque: u32, _class_id: ClassId) -> hako::Result<()> {
            panic!("finalizer bug");
        }
    }

    let (runtime, context, _engine) = setup();
    runtime.set_host_handlers(Arc::new(Panicky)).unwrap();
    let class_id = context.new_class("Bad").unwrap();
    drop(context.new_class_instance(class_id, 1).unwrap());
    runtime.run_gc().unwrap();
    assert_eq!(context.eval_code("1").unwrap().as_number().unwrap(), 1.0);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_close_while_another_thread_evaluates() {
    let (runtime, context, _engine) = setup();
    let worker = std::thread::spawn(move || {
        for _ in 0..200 {
            match context.eval_code("1 + 1") {
                Ok(value) => {
                    if let Ok(n) = value.as_number() {
                        assert_eq!(n, 2.0);
                    }
                }
                Err(err) => {
                    assert!(err.is_disposed());
                    return;
                }
            }
        }
    });
    std::thread::sleep(std::time::Duration::from_millis(1));
    runtime.close();
    worker.join().unwrap();
    assert!(runtime.is_disposed());
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_options_from_json() {
    let options: RuntimeOptions = serde_json::from_str(r#"{"memory_limit": 1048576}"#).unwrap();
    assert_eq!(options.memory_limit, 1 << 20);
    let options: RuntimeOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options, RuntimeOptions::default());

    let eval: EvalOptions =
        serde_json::from_str(r#"{"filename": "a.js", "kind": "module"}"#).unwrap();
    assert_eq!(eval.filename, "a.js");
    assert_eq!(eval.kind, EvalKind::Module);
    assert!(eval.detect_module);
    assert!(!eval.strict);

    let json = serde_json::to_string(&EvalOptions::default()).unwrap();
    assert!(json.contains(r#""kind":"global""#));
}

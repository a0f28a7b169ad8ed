//! Runtime and context lifecycle across threads and engine instances

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use core_types::{HostImports, MemoryOffset};
use hako::{DisposedKind, HakoError, Runtime, RuntimeOptions, ValueHandle};
use integration_tests::Harness;
use memory_manager::MemoryManager;
use test_engine::TestBackend;

// ============================================================================
// Disposal
// ============================================================================

#[test]
fn test_runtime_close_cascades() {
    let harness = Harness::new();
    let extra: Vec<_> = (0..4)
        .map(|_| harness.runtime.create_context().unwrap())
        .collect();
    let value = extra[0].new_string("held").unwrap();
    assert_eq!(harness.engine.context_count(), 5);

    harness.runtime.close();

    assert_eq!(harness.engine.context_count(), 0);
    assert_eq!(harness.engine.runtime_count(), 0);
    assert_eq!(harness.engine.live_values(), 0);
    for context in extra.iter().chain([&harness.context]) {
        assert!(context.is_disposed());
        assert_eq!(
            context.eval_code("1").unwrap_err(),
            HakoError::Disposed(DisposedKind::Context)
        );
    }
    assert!(value.as_string().unwrap_err().is_disposed());

    harness.runtime.close();
    drop(value);
    assert_eq!(harness.engine.invalid_frees(), 0);
}

#[test]
fn test_closing_one_context_keeps_others() {
    let harness = Harness::new();
    let other = harness.runtime.create_context().unwrap();
    harness.context.close();

    assert_eq!(other.eval_code("40 + 2").unwrap().as_number().unwrap(), 42.0);
    assert_eq!(harness.runtime.context_count(), 1);
    assert_eq!(harness.runtime.router().context_count(), 1);
    assert!(harness.runtime.create_context().is_ok());
}

#[test]
fn test_unregistered_context_gets_neutral_callbacks() {
    let harness = Harness::new();
    let ctx = harness.context.handle();
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    let _f = harness
        .context
        .new_function("f", move |ctx, _this, _args| {
            flag.store(true, Ordering::SeqCst);
            ctx.new_number(1.0)
        })
        .unwrap();

    let router = harness.runtime.router();
    assert!(router.unregister_context(ctx));
    let result = router.call_function(ctx, 1, ValueHandle::NULL, 0, MemoryOffset::NULL);
    assert!(result.is_null());
    assert!(!called.load(Ordering::SeqCst));

    router.register_context(&harness.context);
    let result = router.call_function(ctx, 1, ValueHandle::NULL, 0, MemoryOffset::NULL);
    assert!(!result.is_null());
    assert!(called.load(Ordering::SeqCst));
    harness.runtime.memory().unwrap().free_value(ctx, result);
}

// ============================================================================
// Engine Instances
// ============================================================================

#[test]
fn test_runtimes_are_isolated() {
    let backend = TestBackend::new();
    let create = || {
        Runtime::create(&backend, &TestBackend::binary(), RuntimeOptions::default()).unwrap()
    };
    let first = create();
    let second = create();
    assert_eq!(backend.instance_count(), 2);

    let a = first.create_context().unwrap();
    let b = second.create_context().unwrap();
    let n = a.new_number(5.0).unwrap();
    a.global_object().unwrap().set_property("n", &n).unwrap();

    assert_eq!(a.eval_code("n * 2").unwrap().as_number().unwrap(), 10.0);
    assert!(b.eval_code("n").is_err());

    first.close();
    assert_eq!(b.eval_code("3").unwrap().as_number().unwrap(), 3.0);
    assert!(second.router().is_initialized());
}

#[test]
fn test_runtime_rejects_unknown_import() {
    let backend = TestBackend::new();
    let binary = TestBackend::binary_with_imports(&["hako.call_function", "hako.bogus"]);
    let err = Runtime::create(&backend, &binary, RuntimeOptions::default()).unwrap_err();
    assert!(matches!(err, HakoError::Instantiation(_)), "{:?}", err);
}

#[test]
fn test_options_from_json_config() {
    let config = r#"{ "memory_limit": 4096 }"#;
    let options: RuntimeOptions = serde_json::from_str(config).unwrap();
    let harness = Harness::with_options(options);
    let err = harness.context.new_string(&"z".repeat(8192)).unwrap_err();
    assert_eq!(err, HakoError::Allocation { size: 8193 });
}

#[test]
fn test_memory_manager_shares_engine_memory() {
    let harness = Harness::new();
    let ctx = harness.context.handle();
    let bridge: &MemoryManager = harness.runtime.memory().unwrap();
    let before = harness.engine.live_allocations();

    let (ptr, len) = bridge.allocate_string(ctx, "shared").unwrap();
    assert_eq!(len, 6);
    assert_eq!(harness.engine.live_allocations(), before + 1);
    assert_eq!(bridge.read_string(ptr).unwrap(), "shared");
    bridge.free(ctx, ptr);
    assert_eq!(harness.engine.live_allocations(), before);
}

// ============================================================================
// Threads
// ============================================================================

#[test]
fn test_interrupt_from_watchdog_thread() {
    let harness = Harness::new();
    let handle = harness.runtime.interrupt_handle();
    let watchdog = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.interrupt();
    });

    let message = harness.eval_error("while (true) {}");
    watchdog.join().unwrap();
    assert_eq!(message, "InternalError: interrupted");
    assert_eq!(harness.eval_number("1 + 1"), 2.0);
}

#[test]
fn test_contexts_on_separate_threads() {
    let harness = Harness::new();
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let context = harness.runtime.create_context().unwrap();
            thread::spawn(move || {
                for j in 0..50 {
                    let source = format!("{} * 100 + {}", i, j);
                    let value = context.eval_code(&source).unwrap();
                    assert_eq!(value.as_number().unwrap(), f64::from(i * 100 + j));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(harness.engine.invalid_frees(), 0);
}

#[test]
fn test_close_waits_for_inflight_evaluation() {
    let harness = Harness::new();
    let context = harness.context.clone();
    let (started, ready) = std::sync::mpsc::channel();
    let worker = thread::spawn(move || {
        let mut completed = 0;
        loop {
            match context.eval_code("1 + 1") {
                Ok(value) => {
                    if let Ok(n) = value.as_number() {
                        assert_eq!(n, 2.0);
                    }
                    completed += 1;
                    if completed == 1 {
                        let _ = started.send(());
                    }
                }
                Err(err) => {
                    assert!(err.is_disposed(), "{}", err);
                    return completed;
                }
            }
        }
    });

    ready.recv().unwrap();
    harness.runtime.close();
    let completed = worker.join().unwrap();
    assert!(completed > 0);
    assert_eq!(harness.engine.runtime_count(), 0);
}

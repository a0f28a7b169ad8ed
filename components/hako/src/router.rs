//! Dispatch of engine callbacks to their owning runtime and context.
//!
//! The engine only knows integer handles. The router keeps a map from each
//! live context and runtime handle to its owner and answers the engine's
//! import table by resolving the owner, marshalling arguments out of linear
//! memory, running the host handler and marshalling the result back.
//!
//! Lookups hold the read lock only for the resolution itself; host code
//! always runs with the lock released so handlers may register or
//! unregister contexts. A handle that is not (or no longer) registered gets
//! the surface's neutral result.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use core_types::{
    ClassId, ContextHandle, EngineExports, HakoError, HostImports, MemoryOffset, ModuleDefHandle,
    ModuleSourceType, Result, RuntimeHandle, ValueHandle, MODULE_NAME_CAPACITY,
};
use memory_manager::{Memory, MemoryManager};
use parking_lot::RwLock;
use tracing::{error, trace, warn};

use crate::context::ContextInner;
use crate::handlers::ModuleSource;
use crate::runtime::RuntimeInner;
use crate::{Context, Runtime, Value};

#[derive(Default)]
struct HandleMaps {
    contexts: HashMap<ContextHandle, Weak<ContextInner>>,
    runtimes: HashMap<RuntimeHandle, Weak<RuntimeInner>>,
}

#[derive(Clone)]
struct Wiring {
    exports: Arc<dyn EngineExports>,
    memory: MemoryManager,
}

/// The host import table of one engine instance.
#[derive(Default)]
pub struct CallbackRouter {
    maps: RwLock<HandleMaps>,
    wiring: RwLock<Option<Wiring>>,
}

impl CallbackRouter {
    /// Creates an empty, unwired router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires the engine's entry points. Only the first call takes effect.
    pub(crate) fn initialize(&self, exports: Arc<dyn EngineExports>, memory: MemoryManager) {
        let mut wiring = self.wiring.write();
        if wiring.is_some() {
            warn!("callback router is already wired");
            return;
        }
        *wiring = Some(Wiring { exports, memory });
    }

    /// Drops the engine wiring once the engine is gone.
    pub(crate) fn detach(&self) {
        self.wiring.write().take();
    }

    /// Reports whether the engine's entry points are wired.
    pub fn is_initialized(&self) -> bool {
        self.wiring.read().is_some()
    }

    fn wiring(&self) -> Option<Wiring> {
        self.wiring.read().clone()
    }

    /// Routes callbacks for `context` to it.
    pub fn register_context(&self, context: &Context) {
        let handle = context.handle();
        self.maps
            .write()
            .contexts
            .insert(handle, Arc::downgrade(&context.inner));
        trace!(ctx = %handle, "context registered");
    }

    /// Stops routing callbacks for `handle`. Returns whether it was registered.
    pub fn unregister_context(&self, handle: ContextHandle) -> bool {
        let removed = self.maps.write().contexts.remove(&handle).is_some();
        trace!(ctx = %handle, removed, "context unregistered");
        removed
    }

    /// Unregisters several contexts under a single write lock.
    pub fn unregister_contexts(&self, handles: &[ContextHandle]) {
        let mut maps = self.maps.write();
        for handle in handles {
            maps.contexts.remove(handle);
        }
        trace!(count = handles.len(), "contexts unregistered");
    }

    /// Routes callbacks for `runtime` to it.
    pub fn register_runtime(&self, runtime: &Runtime) {
        self.insert_runtime(runtime.handle(), Arc::downgrade(&runtime.inner));
    }

    pub(crate) fn insert_runtime(&self, handle: RuntimeHandle, runtime: Weak<RuntimeInner>) {
        self.maps.write().runtimes.insert(handle, runtime);
        trace!(rt = %handle, "runtime registered");
    }

    /// Stops routing callbacks for `handle`. Returns whether it was registered.
    pub fn unregister_runtime(&self, handle: RuntimeHandle) -> bool {
        let removed = self.maps.write().runtimes.remove(&handle).is_some();
        trace!(rt = %handle, removed, "runtime unregistered");
        removed
    }

    /// Reports whether callbacks for `handle` reach a context.
    pub fn has_context(&self, handle: ContextHandle) -> bool {
        self.context(handle).is_some()
    }

    /// Number of registered contexts.
    pub fn context_count(&self) -> usize {
        self.maps.read().contexts.len()
    }

    /// Number of registered runtimes.
    pub fn runtime_count(&self) -> usize {
        self.maps.read().runtimes.len()
    }

    fn context(&self, handle: ContextHandle) -> Option<Context> {
        let weak = self.maps.read().contexts.get(&handle).cloned()?;
        let inner = weak.upgrade()?;
        if inner.is_disposed() {
            return None;
        }
        Some(Context::from_inner(inner))
    }

    fn runtime(&self, handle: RuntimeHandle) -> Option<Arc<RuntimeInner>> {
        let weak = self.maps.read().runtimes.get(&handle).cloned()?;
        weak.upgrade()
    }

    /// Reads `argc` value handles from `argv` as borrowed values.
    fn decode_args(context: &Context, argc: u32, argv: MemoryOffset) -> Option<Vec<Value>> {
        let memory = context.memory().memory();
        (0..argc)
            .map(|i| {
                let offset = i.checked_mul(4).and_then(|bytes| argv.checked_add(bytes))?;
                match memory.read_u32(offset) {
                    Ok(raw) => Some(Value::borrowed(context.clone(), ValueHandle::new(raw))),
                    Err(err) => {
                        warn!(ctx = %context.handle(), error = %err, "malformed argument vector");
                        None
                    }
                }
            })
            .collect()
    }

    /// Converts a handler outcome into a handle owned by the engine.
    fn hand_over(context: &Context, outcome: Result<Option<Value>>) -> ValueHandle {
        match outcome {
            Ok(Some(value)) => value.into_engine(),
            Ok(None) => ValueHandle::NULL,
            Err(err) => Self::throw(context, &err),
        }
    }

    /// Raises `err` as a script exception and returns the exception marker.
    fn throw(context: &Context, err: &HakoError) -> ValueHandle {
        let ctx = context.handle();
        let message = match err {
            HakoError::Evaluation { message } => message.clone(),
            other => other.to_string(),
        };
        trace!(%ctx, %message, "throwing host error into script");
        match context.memory().scoped_string(ctx, &message) {
            Ok(text) => context.exports().throw_error(ctx, text.offset()),
            Err(alloc) => {
                warn!(%ctx, error = %alloc, "cannot allocate exception message");
                ValueHandle::NULL
            }
        }
    }
}

/// Writes `name` plus terminator at `out` if it fits in the output buffer.
fn write_module_name(memory: &Memory, out: MemoryOffset, name: &str) -> Option<u32> {
    let len = u32::try_from(name.len()).ok()?;
    if len >= MODULE_NAME_CAPACITY {
        return None;
    }
    memory.write_string(out, name).ok()?;
    Some(len)
}

fn write_source_record(
    memory: &Memory,
    out: MemoryOffset,
    source_type: ModuleSourceType,
    payload: MemoryOffset,
    len: u32,
) -> bool {
    let fields = [source_type.raw(), payload.raw(), len];
    fields.iter().enumerate().all(|(i, field)| {
        out.checked_add(4 * i as u32)
            .map_or(false, |at| memory.write_u32(at, *field).is_ok())
    })
}

impl HostImports for CallbackRouter {
    fn call_function(
        &self,
        ctx: ContextHandle,
        function_id: i32,
        this: ValueHandle,
        argc: u32,
        argv: MemoryOffset,
    ) -> ValueHandle {
        let Some(context) = self.context(ctx) else {
            trace!(%ctx, function_id, "call_function for unregistered context");
            return ValueHandle::NULL;
        };
        let Some(args) = Self::decode_args(&context, argc, argv) else {
            return ValueHandle::NULL;
        };
        let this = Value::borrowed(context.clone(), this);

        let runtime = &context.inner.runtime;
        let outcome = match runtime.functions.get(function_id) {
            Some(function) => function(&context, &this, &args).map(Some),
            None => runtime
                .handlers()
                .call_function(&context, function_id, &this, &args),
        };
        Self::hand_over(&context, outcome)
    }

    fn interrupt_handler(&self, rt: RuntimeHandle, _opaque: u32) -> bool {
        let Some(runtime) = self.runtime(rt) else {
            return false;
        };
        if runtime.interrupt.take() {
            trace!(%rt, "interrupt requested");
            return true;
        }
        runtime.handlers().interrupt(rt)
    }

    fn normalize_module(
        &self,
        ctx: ContextHandle,
        base_name: MemoryOffset,
        name: MemoryOffset,
        _opaque: u32,
        out: MemoryOffset,
    ) -> u32 {
        let Some(wiring) = self.wiring() else {
            return 0;
        };
        let requested = match wiring.memory.read_string(name) {
            Ok(requested) => requested,
            Err(err) => {
                warn!(%ctx, error = %err, "unreadable module specifier");
                return 0;
            }
        };

        let normalized = match self.context(ctx) {
            Some(context) => {
                let base = wiring.memory.read_string(base_name).unwrap_or_default();
                context
                    .inner
                    .runtime
                    .handlers()
                    .normalize_module(&context, &base, &requested)
            }
            None => {
                trace!(%ctx, "normalize_module for unregistered context");
                requested.clone()
            }
        };

        let memory = wiring.memory.memory();
        write_module_name(memory, out, &normalized)
            .or_else(|| {
                warn!(%ctx, len = normalized.len(), "normalized module name too long");
                write_module_name(memory, out, &requested)
            })
            .unwrap_or(0)
    }

    fn load_module(
        &self,
        rt: RuntimeHandle,
        ctx: ContextHandle,
        module_name: MemoryOffset,
        _opaque: u32,
        out: MemoryOffset,
    ) -> ModuleSourceType {
        let Some(wiring) = self.wiring() else {
            return ModuleSourceType::Error;
        };
        let memory = wiring.memory.memory();
        let Some(context) = self.context(ctx) else {
            trace!(%rt, %ctx, "load_module for unregistered context");
            write_source_record(memory, out, ModuleSourceType::Error, MemoryOffset::NULL, 0);
            return ModuleSourceType::Error;
        };

        let name = wiring.memory.read_string(module_name).unwrap_or_default();
        let source = context.inner.runtime.handlers().load_module(&context, &name);
        let (source_type, payload, len) = match source {
            ModuleSource::Source(text) => match wiring.memory.allocate_string(ctx, &text) {
                Ok((payload, len)) => (ModuleSourceType::String, payload, len),
                Err(err) => {
                    warn!(%ctx, module = %name, error = %err, "cannot marshal module source");
                    (ModuleSourceType::Error, MemoryOffset::NULL, 0)
                }
            },
            ModuleSource::Precompiled(bytes) => match wiring.memory.allocate_bytes(ctx, &bytes) {
                Ok(payload) => (ModuleSourceType::Precompiled, payload, bytes.len() as u32),
                Err(err) => {
                    warn!(%ctx, module = %name, error = %err, "cannot marshal module bytecode");
                    (ModuleSourceType::Error, MemoryOffset::NULL, 0)
                }
            },
            ModuleSource::Error => {
                trace!(%ctx, module = %name, "module not found");
                (ModuleSourceType::Error, MemoryOffset::NULL, 0)
            }
        };

        if !write_source_record(memory, out, source_type, payload, len) {
            warn!(%ctx, %out, "module source record out of bounds");
            wiring.memory.free(ctx, payload);
            return ModuleSourceType::Error;
        }
        source_type
    }

    fn module_init(&self, ctx: ContextHandle, module: ModuleDefHandle) -> i32 {
        let Some(context) = self.context(ctx) else {
            return 0;
        };
        match context.inner.runtime.handlers().module_init(&context, module) {
            Ok(()) => 0,
            Err(err) => {
                warn!(%ctx, %module, error = %err, "module initialization failed");
                -1
            }
        }
    }

    fn class_finalizer(&self, rt: RuntimeHandle, opaque: u32, class_id: ClassId) {
        let Some(runtime) = self.runtime(rt) else {
            trace!(%rt, "class_finalizer for unregistered runtime");
            return;
        };
        let handlers = runtime.handlers();
        match catch_unwind(AssertUnwindSafe(|| {
            handlers.class_finalizer(rt, opaque, class_id)
        })) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%rt, opaque, %class_id, error = %err, "class finalizer failed"),
            Err(_) => error!(%rt, opaque, %class_id, "class finalizer panicked"),
        }
    }

    fn class_gc_mark(
        &self,
        rt: RuntimeHandle,
        value: ValueHandle,
        mark_func: MemoryOffset,
        class_id: ClassId,
    ) {
        let Some(runtime) = self.runtime(rt) else {
            return;
        };
        let handlers = runtime.handlers();
        let exports = runtime.exports.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut mark = |child: ValueHandle| {
                if !child.is_null() {
                    exports.mark_value(rt, child, mark_func);
                }
            };
            handlers.class_gc_mark(rt, value, class_id, &mut mark);
        }));
        if outcome.is_err() {
            error!(%rt, %value, %class_id, "class gc mark panicked");
        }
    }

    fn class_constructor(
        &self,
        ctx: ContextHandle,
        new_target: ValueHandle,
        argc: u32,
        argv: MemoryOffset,
        class_id: ClassId,
    ) -> ValueHandle {
        let Some(context) = self.context(ctx) else {
            trace!(%ctx, %class_id, "class_constructor for unregistered context");
            return ValueHandle::NULL;
        };
        let Some(args) = Self::decode_args(&context, argc, argv) else {
            return ValueHandle::NULL;
        };
        let new_target = Value::borrowed(context.clone(), new_target);
        let outcome = context
            .inner
            .runtime
            .handlers()
            .class_constructor(&context, &new_target, &args, class_id);
        Self::hand_over(&context, outcome)
    }

    fn promise_rejection_tracker(
        &self,
        ctx: ContextHandle,
        promise: ValueHandle,
        reason: ValueHandle,
        is_handled: bool,
        _opaque: u32,
    ) {
        let Some(context) = self.context(ctx) else {
            return;
        };
        if !is_handled {
            warn!(%ctx, %promise, %reason, "unhandled promise rejection");
        }
        let promise = Value::borrowed(context.clone(), promise);
        let reason = Value::borrowed(context.clone(), reason);
        context
            .inner
            .runtime
            .handlers()
            .promise_rejection(&context, &promise, &reason, is_handled);
    }
}

impl fmt::Debug for CallbackRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let maps = self.maps.read();
        f.debug_struct("CallbackRouter")
            .field("contexts", &maps.contexts.len())
            .field("runtimes", &maps.runtimes.len())
            .field("wired", &self.wiring.read().is_some())
            .finish()
    }
}

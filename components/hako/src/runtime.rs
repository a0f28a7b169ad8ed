//! Engine runtimes: instantiation, context tracking and disposal.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use core_types::{
    ContextHandle, DisposedKind, EngineBackend, EngineExports, HakoError, Result, RuntimeHandle,
};
use memory_manager::MemoryManager;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::functions::FunctionTable;
use crate::handlers::{DefaultHandlers, HostHandlers};
use crate::options::RuntimeOptions;
use crate::router::CallbackRouter;
use crate::Context;

/// Intrinsic set requested for new contexts; 0 selects the engine default.
const DEFAULT_INTRINSICS: u32 = 0;

/// Cross-thread request to abort the script currently running in a runtime.
///
/// The request is consumed by the next interrupt check, so it aborts at most
/// one script.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    requested: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Requests an abort at the engine's next interrupt check.
    pub fn interrupt(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Reports whether a request is waiting to be observed.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

pub(crate) struct RuntimeInner {
    handle: AtomicU32,
    disposed: AtomicBool,
    /// Held shared by every engine-touching operation, exclusively by `close`.
    pub(crate) gate: RwLock<()>,
    pub(crate) exports: Arc<dyn EngineExports>,
    pub(crate) memory: MemoryManager,
    pub(crate) router: Arc<CallbackRouter>,
    pub(crate) contexts: Mutex<HashMap<ContextHandle, Context>>,
    pub(crate) functions: FunctionTable,
    pub(crate) interrupt: InterruptHandle,
    handlers: RwLock<Arc<dyn HostHandlers>>,
}

impl RuntimeInner {
    pub(crate) fn handle(&self) -> RuntimeHandle {
        RuntimeHandle::new(self.handle.load(Ordering::Acquire))
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn handlers(&self) -> Arc<dyn HostHandlers> {
        self.handlers.read().clone()
    }
}

/// A top-level engine instance.
///
/// Owns the engine, its callback router and every [`Context`] created from
/// it. Closing the runtime (explicitly or on drop) disposes all of them.
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Instantiates `binary` with `backend` and creates the engine runtime.
    pub fn create(
        backend: &dyn EngineBackend,
        binary: &[u8],
        options: RuntimeOptions,
    ) -> Result<Self> {
        let router = Arc::new(CallbackRouter::new());
        let exports = backend.instantiate(binary, router.clone())?;
        let memory = MemoryManager::new(exports.clone());
        router.initialize(exports.clone(), memory.clone());

        let handle = exports.new_runtime();
        if handle.is_null() {
            router.detach();
            exports.close();
            return Err(HakoError::Instantiation(
                "engine returned a null runtime handle".to_string(),
            ));
        }

        let inner = Arc::new(RuntimeInner {
            handle: AtomicU32::new(handle.raw()),
            disposed: AtomicBool::new(false),
            gate: RwLock::new(()),
            exports,
            memory,
            router: router.clone(),
            contexts: Mutex::new(HashMap::new()),
            functions: FunctionTable::default(),
            interrupt: InterruptHandle::default(),
            handlers: RwLock::new(Arc::new(DefaultHandlers)),
        });
        router.insert_runtime(handle, Arc::downgrade(&inner));

        let runtime = Self { inner };
        if options.memory_limit != 0 {
            runtime.set_memory_limit(options.memory_limit)?;
        }
        debug!(rt = %handle, memory_limit = options.memory_limit, "runtime created");
        Ok(runtime)
    }

    fn check(&self) -> Result<()> {
        if self.inner.is_disposed() {
            return Err(HakoError::Disposed(DisposedKind::Runtime));
        }
        Ok(())
    }

    fn enter(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.check()?;
        let guard = self.inner.gate.read_recursive();
        self.check()?;
        Ok(guard)
    }

    /// The engine handle; null once closed.
    pub fn handle(&self) -> RuntimeHandle {
        self.inner.handle()
    }

    /// Reports whether the runtime has been closed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.inner.contexts.lock().len()
    }

    /// The router servicing this runtime's engine callbacks.
    pub fn router(&self) -> &Arc<CallbackRouter> {
        &self.inner.router
    }

    /// The allocation bridge for this runtime's engine.
    pub fn memory(&self) -> Result<&MemoryManager> {
        self.check()?;
        Ok(&self.inner.memory)
    }

    /// Replaces the handlers servicing engine callbacks.
    pub fn set_host_handlers(&self, handlers: Arc<dyn HostHandlers>) -> Result<()> {
        let _gate = self.enter()?;
        *self.inner.handlers.write() = handlers;
        Ok(())
    }

    /// A handle that aborts the running script from any thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.inner.interrupt.clone()
    }

    /// Creates a new context.
    pub fn create_context(&self) -> Result<Context> {
        let _gate = self.enter()?;
        let rt = self.handle();
        let handle = self.inner.exports.new_context(rt, DEFAULT_INTRINSICS);
        if handle.is_null() {
            warn!(%rt, "engine returned a null context handle");
            return Err(HakoError::Allocation { size: 0 });
        }

        let context = Context::new(handle, self.inner.clone());
        self.inner.router.register_context(&context);
        self.inner.contexts.lock().insert(handle, context.clone());
        debug!(%rt, ctx = %handle, "context created");
        Ok(context)
    }

    /// Sets the engine heap ceiling in bytes; 0 removes it.
    pub fn set_memory_limit(&self, bytes: u32) -> Result<()> {
        let _gate = self.enter()?;
        self.inner.exports.set_memory_limit(self.handle(), bytes);
        Ok(())
    }

    /// Runs a full garbage collection.
    pub fn run_gc(&self) -> Result<()> {
        let _gate = self.enter()?;
        self.inner.exports.run_gc(self.handle());
        Ok(())
    }

    /// Reports whether jobs are queued.
    pub fn is_microtask_pending(&self) -> Result<bool> {
        let _gate = self.enter()?;
        Ok(self.inner.exports.is_job_pending(self.handle()))
    }

    /// Runs up to `max` queued jobs (`None` drains the queue) and returns how
    /// many ran. A job that throws stops the drain with
    /// [`HakoError::PendingJob`].
    pub fn execute_microtasks(&self, max: Option<u32>) -> Result<u32> {
        let _gate = self.enter()?;
        let max_jobs = match max {
            Some(n) => i32::try_from(n).unwrap_or(i32::MAX),
            None => -1,
        };
        let executed = self
            .inner
            .exports
            .execute_pending_jobs(self.handle(), max_jobs);
        u32::try_from(executed).map_err(|_| HakoError::PendingJob)
    }

    /// Disposes every context, frees the engine runtime and releases the
    /// engine instance. Waits for in-flight operations to finish. Idempotent.
    ///
    /// Must not be called from inside one of this runtime's own callbacks.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.is_disposed() {
            return;
        }
        let _gate = inner.gate.write();
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let rt = inner.handle();
        let contexts: Vec<Context> = inner.contexts.lock().drain().map(|(_, c)| c).collect();
        let handles: Vec<ContextHandle> = contexts.iter().map(Context::mark_disposed).collect();
        inner.router.unregister_contexts(&handles);
        for ctx in &handles {
            inner.exports.free_context(*ctx);
        }

        inner.router.unregister_runtime(rt);
        inner.exports.free_runtime(rt);
        inner.handle.store(0, Ordering::Release);
        inner.functions.clear();
        *inner.handlers.write() = Arc::new(DefaultHandlers);
        inner.router.detach();
        inner.exports.close();
        debug!(%rt, contexts = handles.len(), "runtime closed");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("handle", &self.handle())
            .field("disposed", &self.is_disposed())
            .field("contexts", &self.context_count())
            .finish()
    }
}

//! Execution contexts (realms).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use core_types::{
    ClassId, ContextHandle, DisposedKind, EngineExports, HakoError, Result, ValueHandle,
};
use memory_manager::MemoryManager;
use parking_lot::RwLockReadGuard;
use tracing::{debug, trace};

use crate::options::EvalOptions;
use crate::runtime::RuntimeInner;
use crate::Value;

pub(crate) struct ContextInner {
    handle: AtomicU32,
    disposed: AtomicBool,
    pub(crate) runtime: Arc<RuntimeInner>,
}

impl ContextInner {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// One global scope inside a [`Runtime`](crate::Runtime).
///
/// Cloning is cheap and yields another reference to the same context. The
/// context stays registered with the runtime's router until [`Context::close`]
/// or until the runtime is closed, after which every operation fails with
/// [`HakoError::Disposed`].
///
/// A context is meant to be driven from one thread at a time.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn new(handle: ContextHandle, runtime: Arc<RuntimeInner>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                handle: AtomicU32::new(handle.raw()),
                disposed: AtomicBool::new(false),
                runtime,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    /// The engine handle; null once disposed.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle::new(self.inner.handle.load(Ordering::Acquire))
    }

    /// Reports whether this context (or its runtime) has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed() || self.inner.runtime.is_disposed()
    }

    fn check(&self) -> Result<()> {
        if self.inner.is_disposed() {
            return Err(HakoError::Disposed(DisposedKind::Context));
        }
        if self.inner.runtime.is_disposed() {
            return Err(HakoError::Disposed(DisposedKind::Runtime));
        }
        Ok(())
    }

    /// Checks disposal and holds the runtime gate for one operation.
    ///
    /// The flags are checked before locking as well, so code running inside
    /// a runtime's `close` (finalizers) fails fast instead of waiting on it.
    pub(crate) fn enter(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.check()?;
        let guard = self.inner.runtime.gate.read_recursive();
        self.check()?;
        Ok(guard)
    }

    pub(crate) fn exports(&self) -> &Arc<dyn EngineExports> {
        &self.inner.runtime.exports
    }

    pub(crate) fn memory(&self) -> &MemoryManager {
        &self.inner.runtime.memory
    }

    /// Wraps a fresh handle from a value-producing entry point.
    pub(crate) fn wrap(&self, handle: ValueHandle) -> Result<Value> {
        if handle.is_null() {
            return Err(HakoError::Allocation { size: 0 });
        }
        Ok(Value::owned(self.clone(), handle))
    }

    pub(crate) fn release_value(&self, handle: ValueHandle) {
        if self.check().is_err() {
            trace!(%handle, "value outlived its context");
            return;
        }
        let _gate = self.inner.runtime.gate.read_recursive();
        if self.check().is_ok() {
            self.memory().free_value(self.handle(), handle);
        }
    }

    /// Evaluates `source` as global code named `eval`.
    pub fn eval_code(&self, source: &str) -> Result<Value> {
        self.eval_code_with_options(source, &EvalOptions::default())
    }

    /// Evaluates `source`.
    ///
    /// An empty source yields `undefined` without calling the engine. An
    /// exception becomes [`HakoError::Evaluation`] carrying its string form;
    /// the exception value itself is released here.
    pub fn eval_code_with_options(&self, source: &str, options: &EvalOptions) -> Result<Value> {
        let _gate = self.enter()?;
        if source.is_empty() {
            return Ok(Value::borrowed(self.clone(), self.exports().get_undefined()));
        }

        let ctx = self.handle();
        let result = {
            let code = self.memory().scoped_string(ctx, source)?;
            let name = match options.filename.as_str() {
                "" => "eval",
                name => name,
            };
            let filename = self.memory().scoped_string(ctx, name)?;
            trace!(%ctx, filename = name, len = code.len(), "eval");
            self.exports().eval(
                ctx,
                code.offset(),
                code.len(),
                filename.offset(),
                options.detect_module,
                options.flags(),
            )
        };
        self.check_exception(result)
    }

    fn check_exception(&self, result: ValueHandle) -> Result<Value> {
        let ctx = self.handle();
        let error = self.exports().get_last_error(ctx, result);
        if error.is_null() {
            return self.wrap(result);
        }

        self.memory().free_value(ctx, result);
        let message = self.exception_message(error);
        self.memory().free_value(ctx, error);
        debug!(%ctx, %message, "evaluation raised an exception");
        Err(HakoError::Evaluation { message })
    }

    fn exception_message(&self, error: ValueHandle) -> String {
        let ctx = self.handle();
        let ptr = self.exports().to_cstring(ctx, error);
        let message = self.memory().read_string(ptr).unwrap_or_default();
        self.memory().free_cstring(ctx, ptr);
        if message.is_empty() {
            "uncaught exception".to_string()
        } else {
            message
        }
    }

    /// The global object.
    pub fn global_object(&self) -> Result<Value> {
        let _gate = self.enter()?;
        self.wrap(self.exports().get_global_object(self.handle()))
    }

    /// The `undefined` singleton (borrowed).
    pub fn undefined(&self) -> Result<Value> {
        let _gate = self.enter()?;
        Ok(Value::borrowed(self.clone(), self.exports().get_undefined()))
    }

    /// The `null` singleton (borrowed).
    pub fn null(&self) -> Result<Value> {
        let _gate = self.enter()?;
        Ok(Value::borrowed(self.clone(), self.exports().get_null()))
    }

    /// A new string.
    pub fn new_string(&self, s: &str) -> Result<Value> {
        let _gate = self.enter()?;
        let ctx = self.handle();
        let text = self.memory().scoped_string(ctx, s)?;
        self.wrap(self.exports().new_string(ctx, text.offset()))
    }

    /// A new number.
    pub fn new_number(&self, n: f64) -> Result<Value> {
        let _gate = self.enter()?;
        self.wrap(self.exports().new_float64(self.handle(), n))
    }

    /// A new empty object.
    pub fn new_object(&self) -> Result<Value> {
        let _gate = self.enter()?;
        self.wrap(self.exports().new_object(self.handle()))
    }

    /// A new empty array.
    pub fn new_array(&self) -> Result<Value> {
        let _gate = self.enter()?;
        self.wrap(self.exports().new_array(self.handle()))
    }

    /// A new function backed by `function`.
    ///
    /// The function stays registered until this context or its runtime is
    /// closed. An error it returns is thrown into the calling script.
    pub fn new_function<F>(&self, name: &str, function: F) -> Result<Value>
    where
        F: Fn(&Context, &Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let _gate = self.enter()?;
        let ctx = self.handle();
        let id = self.inner.runtime.functions.insert(ctx, Arc::new(function));
        let name = self.memory().scoped_string(ctx, name)?;
        trace!(%ctx, id, "host function registered");
        self.wrap(self.exports().new_function(ctx, id, name.offset()))
    }

    /// Registers a host class and binds its constructor as a global.
    ///
    /// Construction, marking and finalization of instances are routed to the
    /// runtime's [`HostHandlers`](crate::HostHandlers).
    pub fn new_class(&self, name: &str) -> Result<ClassId> {
        let _gate = self.enter()?;
        let ctx = self.handle();
        let scoped = self.memory().scoped_string(ctx, name)?;
        let class_id = self.exports().new_class(ctx, scoped.offset());
        if !class_id.is_valid() {
            return Err(HakoError::Evaluation {
                message: format!("cannot create class '{}'", name),
            });
        }
        debug!(%ctx, %class_id, name, "host class registered");
        Ok(class_id)
    }

    /// A new instance of a host class carrying `opaque`.
    pub fn new_class_instance(&self, class_id: ClassId, opaque: u32) -> Result<Value> {
        let _gate = self.enter()?;
        self.wrap(
            self.exports()
                .new_class_instance(self.handle(), class_id, opaque),
        )
    }

    /// Disposes the context. Idempotent.
    pub fn close(&self) {
        if self.inner.is_disposed() || self.inner.runtime.is_disposed() {
            return;
        }
        let runtime = &self.inner.runtime;
        let _gate = runtime.gate.read_recursive();
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let ctx = ContextHandle::new(self.inner.handle.swap(0, Ordering::AcqRel));
        runtime.router.unregister_context(ctx);
        runtime.exports.free_context(ctx);
        runtime.contexts.lock().remove(&ctx);
        let functions = runtime.functions.remove_context(ctx);
        debug!(%ctx, functions, "context closed");
    }

    /// Marks the context disposed on behalf of its closing runtime and
    /// returns the handle it held.
    pub(crate) fn mark_disposed(&self) -> ContextHandle {
        self.inner.disposed.store(true, Ordering::Release);
        ContextHandle::new(self.inner.handle.swap(0, Ordering::AcqRel))
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.handle())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

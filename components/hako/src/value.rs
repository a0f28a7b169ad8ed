//! Reference-counted handles to engine values.

use std::fmt;

use core_types::{HakoError, Result, ValueHandle};
use tracing::trace;

use crate::Context;

/// A JavaScript value living in the engine.
///
/// An owned `Value` holds one engine reference and releases it exactly once,
/// either through [`Value::free`] or when dropped. A borrowed `Value` (the
/// `undefined`/`null` singletons, arguments passed to host callbacks) is
/// never released. Releasing is tracked by clearing the handle, so a freed
/// value behaves like [`Value::default`].
///
/// A `Value` must not outlive its context in practice: once the context is
/// disposed the engine has already released everything it held for it, and
/// dropping the `Value` is a no-op.
pub struct Value {
    ctx: Option<Context>,
    handle: ValueHandle,
    borrowed: bool,
}

impl Value {
    pub(crate) fn owned(ctx: Context, handle: ValueHandle) -> Self {
        Self {
            ctx: Some(ctx),
            handle,
            borrowed: false,
        }
    }

    pub(crate) fn borrowed(ctx: Context, handle: ValueHandle) -> Self {
        Self {
            ctx: Some(ctx),
            handle,
            borrowed: true,
        }
    }

    /// The raw engine handle; null once freed.
    pub fn handle(&self) -> ValueHandle {
        self.handle
    }

    /// The owning context, if any.
    pub fn context(&self) -> Option<&Context> {
        self.ctx.as_ref()
    }

    /// Reports whether this value is borrowed (never released).
    pub fn is_borrowed(&self) -> bool {
        self.borrowed
    }

    fn live(&self) -> Option<&Context> {
        match &self.ctx {
            Some(ctx) if !self.handle.is_null() => Some(ctx),
            _ => None,
        }
    }

    /// String conversion. A value with no context reads as `""`.
    pub fn as_string(&self) -> Result<String> {
        let Some(ctx) = self.live() else {
            return Ok(String::new());
        };
        let _gate = ctx.enter()?;
        let ptr = ctx.exports().to_cstring(ctx.handle(), self.handle);
        if ptr.is_null() {
            return Err(HakoError::Allocation { size: 0 });
        }
        let text = ctx.memory().read_string(ptr);
        ctx.memory().free_cstring(ctx.handle(), ptr);
        text
    }

    /// Numeric conversion. A value with no context reads as `0.0`.
    pub fn as_number(&self) -> Result<f64> {
        let Some(ctx) = self.live() else {
            return Ok(0.0);
        };
        let _gate = ctx.enter()?;
        Ok(ctx.exports().get_float64(ctx.handle(), self.handle))
    }

    /// Reports whether the value is `null`. True for a value with no context.
    pub fn is_null(&self) -> Result<bool> {
        let Some(ctx) = self.live() else {
            return Ok(true);
        };
        let _gate = ctx.enter()?;
        Ok(ctx.exports().is_null(self.handle))
    }

    /// Reports whether the value is `undefined`. True for a value with no
    /// context.
    pub fn is_undefined(&self) -> Result<bool> {
        let Some(ctx) = self.live() else {
            return Ok(true);
        };
        let _gate = ctx.enter()?;
        Ok(ctx.exports().is_undefined(self.handle))
    }

    /// A new, independently releasable reference to the same value.
    pub fn dup(&self) -> Result<Value> {
        let Some(ctx) = self.live() else {
            return Ok(Value::default());
        };
        let _gate = ctx.enter()?;
        let handle = ctx.memory().dup_value(ctx.handle(), self.handle);
        if handle.is_null() {
            return Err(HakoError::Allocation { size: 0 });
        }
        Ok(Value::owned(ctx.clone(), handle))
    }

    /// Reads `self[key]`.
    pub fn get_property(&self, key: &str) -> Result<Value> {
        let Some(ctx) = self.live() else {
            return Ok(Value::default());
        };
        let _gate = ctx.enter()?;
        let key = ctx.memory().scoped_string(ctx.handle(), key)?;
        let handle = ctx
            .exports()
            .get_prop(ctx.handle(), self.handle, key.offset());
        ctx.wrap(handle)
    }

    /// Writes `self[key] = value`. `value` keeps its own reference.
    pub fn set_property(&self, key: &str, value: &Value) -> Result<()> {
        let Some(ctx) = self.live() else {
            return Ok(());
        };
        let _gate = ctx.enter()?;
        let scoped = ctx.memory().scoped_string(ctx.handle(), key)?;
        let ok = ctx
            .exports()
            .set_prop(ctx.handle(), self.handle, scoped.offset(), value.handle);
        if !ok {
            return Err(HakoError::Evaluation {
                message: format!("cannot set property '{}'", key),
            });
        }
        Ok(())
    }

    /// Releases the engine reference. Borrowed, freed and default values are
    /// left alone, so calling this twice is harmless.
    pub fn free(&mut self) {
        let handle = std::mem::replace(&mut self.handle, ValueHandle::NULL);
        if self.borrowed || handle.is_null() {
            return;
        }
        if let Some(ctx) = &self.ctx {
            ctx.release_value(handle);
        }
    }

    /// Hands one reference to the engine, e.g. as a callback result.
    pub(crate) fn into_engine(mut self) -> ValueHandle {
        if !self.borrowed {
            return std::mem::replace(&mut self.handle, ValueHandle::NULL);
        }
        match self.live() {
            Some(ctx) => ctx.memory().dup_value(ctx.handle(), self.handle),
            None => ValueHandle::NULL,
        }
    }
}

impl Default for Value {
    /// A value with no context and a null handle.
    fn default() -> Self {
        Self {
            ctx: None,
            handle: ValueHandle::NULL,
            borrowed: false,
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        if !self.borrowed && !self.handle.is_null() {
            trace!(handle = %self.handle, "releasing value on drop");
        }
        self.free();
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("handle", &self.handle)
            .field("borrowed", &self.borrowed)
            .finish()
    }
}

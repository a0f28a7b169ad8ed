//! Host-side handlers for engine callbacks.
//!
//! The [`CallbackRouter`](crate::CallbackRouter) resolves the owner of every
//! inbound call and hands it to the runtime's [`HostHandlers`]. Each method
//! has a default body returning the neutral result, so hosts override only
//! the surfaces they use.

use core_types::{ClassId, ModuleDefHandle, Result, RuntimeHandle, ValueHandle};

use crate::{Context, Value};

/// Result of loading a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Module source text.
    Source(String),
    /// Precompiled bytecode in the engine's format.
    Precompiled(Vec<u8>),
    /// The module could not be found or loaded.
    Error,
}

/// Host implementations of the engine callback surfaces.
///
/// Values passed in are borrowed for the duration of the call; `dup` them to
/// keep them. Values returned are handed to the engine.
///
/// Handlers run with no router lock held and may re-enter the facade, but
/// must not close the runtime that is calling them.
pub trait HostHandlers: Send + Sync {
    /// Script called a host function id not registered with
    /// [`Context::new_function`]. `Ok(None)` tells the engine no such
    /// function exists.
    fn call_function(
        &self,
        _ctx: &Context,
        _function_id: i32,
        _this: &Value,
        _args: &[Value],
    ) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Periodic check while scripts run; `true` aborts the script.
    ///
    /// Called very often. Must not block or allocate engine memory.
    fn interrupt(&self, _rt: RuntimeHandle) -> bool {
        false
    }

    /// Resolves `name` as imported from `base_name`.
    fn normalize_module(&self, _ctx: &Context, _base_name: &str, name: &str) -> String {
        name.to_string()
    }

    /// Loads the module called `name` (already normalized).
    fn load_module(&self, _ctx: &Context, _name: &str) -> ModuleSource {
        ModuleSource::Error
    }

    /// Populates a native module's exports.
    fn module_init(&self, _ctx: &Context, _module: ModuleDefHandle) -> Result<()> {
        Ok(())
    }

    /// An instance of a host class was collected. Errors are logged only.
    fn class_finalizer(&self, _rt: RuntimeHandle, _opaque: u32, _class_id: ClassId) -> Result<()> {
        Ok(())
    }

    /// Reports the engine values an instance of a host class references by
    /// calling `mark` for each. Must not allocate or mutate engine state.
    fn class_gc_mark(
        &self,
        _rt: RuntimeHandle,
        _value: ValueHandle,
        _class_id: ClassId,
        _mark: &mut dyn FnMut(ValueHandle),
    ) {
    }

    /// Script constructed a host class with `new`.
    fn class_constructor(
        &self,
        _ctx: &Context,
        _new_target: &Value,
        _args: &[Value],
        _class_id: ClassId,
    ) -> Result<Option<Value>> {
        Ok(None)
    }

    /// A promise was rejected with no handler (`is_handled == false`), or a
    /// handler was attached later (`is_handled == true`).
    fn promise_rejection(
        &self,
        _ctx: &Context,
        _promise: &Value,
        _reason: &Value,
        _is_handled: bool,
    ) {
    }
}

/// Handlers that answer every callback with its neutral result.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandlers;

impl HostHandlers for DefaultHandlers {}

//! The engine's side of the boundary: its export table and linear memory.
//!
//! An engine instance is reached only through the entry points listed on
//! [`EngineExports`] and the flat byte buffer behind [`LinearMemory`]. All
//! arguments are 32-bit handles or offsets; nothing here carries host pointers.

use std::sync::Arc;

use crate::{
    ClassId, ContextHandle, HostImports, MemoryOffset, Result, RuntimeHandle, ValueHandle,
};

/// Evaluate as global (script) code.
pub const EVAL_TYPE_GLOBAL: u32 = 0;
/// Evaluate as an ES module.
pub const EVAL_TYPE_MODULE: u32 = 1;
/// Force strict mode.
pub const EVAL_FLAG_STRICT: u32 = 1 << 3;

/// Raw access to the engine's linear memory.
///
/// Implementations enforce bounds: an access that does not fit entirely
/// inside the buffer returns `false` and leaves the buffer untouched.
pub trait LinearMemory: Send + Sync {
    /// Current size of the buffer in bytes.
    fn size(&self) -> u32;

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: u32, buf: &mut [u8]) -> bool;

    /// Copies `data` into the buffer starting at `offset`.
    fn write(&self, offset: u32, data: &[u8]) -> bool;
}

/// The fixed export table of one engine instance.
///
/// Entry points take `&self`: the engine is single-threaded internally and an
/// implementation must not hold internal locks while calling back into
/// [`HostImports`], since handlers re-enter the export table.
///
/// Passing an already-freed or foreign handle or offset to any entry point is
/// undefined behaviour at the engine boundary; callers own that discipline.
pub trait EngineExports: Send + Sync {
    /// The instance's linear memory.
    fn memory(&self) -> Arc<dyn LinearMemory>;

    /// Allocates `size` bytes with the context's allocator. Null on failure.
    fn malloc(&self, ctx: ContextHandle, size: u32) -> MemoryOffset;
    /// Frees memory returned by [`EngineExports::malloc`].
    fn free(&self, ctx: ContextHandle, ptr: MemoryOffset);
    /// Frees a C string returned by [`EngineExports::to_cstring`].
    fn free_cstring(&self, ctx: ContextHandle, ptr: MemoryOffset);
    /// Drops one reference to a value.
    fn free_value(&self, ctx: ContextHandle, value: ValueHandle);
    /// Adds one reference to a value, returning a separately releasable handle.
    fn dup_value(&self, ctx: ContextHandle, value: ValueHandle) -> ValueHandle;

    /// Creates a new runtime. Null on failure.
    fn new_runtime(&self) -> RuntimeHandle;
    /// Frees a runtime. Every context must already be freed.
    fn free_runtime(&self, rt: RuntimeHandle);
    /// Caps the runtime heap. Zero means unlimited.
    fn set_memory_limit(&self, rt: RuntimeHandle, limit: u32);
    /// Runs a full collection cycle.
    fn run_gc(&self, rt: RuntimeHandle);
    /// Reports whether the job queue is non-empty.
    fn is_job_pending(&self, rt: RuntimeHandle) -> bool;
    /// Runs up to `max_jobs` jobs (`-1` for no limit). Returns the number
    /// executed, or `-1` if a job failed.
    fn execute_pending_jobs(&self, rt: RuntimeHandle, max_jobs: i32) -> i32;
    /// Reports a reference held by a host class to the collector.
    fn mark_value(&self, rt: RuntimeHandle, value: ValueHandle, mark_func: MemoryOffset);

    /// Creates a new context inside `rt`. Null on failure.
    fn new_context(&self, rt: RuntimeHandle, intrinsics: u32) -> ContextHandle;
    /// Frees a context and every value it still holds.
    fn free_context(&self, ctx: ContextHandle);

    /// Evaluates `source_len` bytes of UTF-8 at `source`.
    ///
    /// The result is always a fresh handle; pair it with
    /// [`EngineExports::get_last_error`] to detect an exception.
    fn eval(
        &self,
        ctx: ContextHandle,
        source: MemoryOffset,
        source_len: u32,
        filename: MemoryOffset,
        detect_module: bool,
        flags: u32,
    ) -> ValueHandle;
    /// Returns the pending exception if `value` is the exception marker,
    /// transferring it to the caller; null otherwise.
    fn get_last_error(&self, ctx: ContextHandle, value: ValueHandle) -> ValueHandle;
    /// Raises an `Error` with the C string at `message` and returns the
    /// exception marker.
    fn throw_error(&self, ctx: ContextHandle, message: MemoryOffset) -> ValueHandle;

    /// New reference to the context's global object.
    fn get_global_object(&self, ctx: ContextHandle) -> ValueHandle;
    /// The permanent `undefined` singleton.
    fn get_undefined(&self) -> ValueHandle;
    /// The permanent `null` singleton.
    fn get_null(&self) -> ValueHandle;
    /// New string from the C string at `ptr`.
    fn new_string(&self, ctx: ContextHandle, ptr: MemoryOffset) -> ValueHandle;
    /// New number.
    fn new_float64(&self, ctx: ContextHandle, value: f64) -> ValueHandle;
    /// New empty object.
    fn new_object(&self, ctx: ContextHandle) -> ValueHandle;
    /// New empty array.
    fn new_array(&self, ctx: ContextHandle) -> ValueHandle;
    /// New function that calls back into the host with `function_id`.
    fn new_function(&self, ctx: ContextHandle, function_id: i32, name: MemoryOffset)
        -> ValueHandle;
    /// Registers a host class and binds its constructor on the global object.
    fn new_class(&self, ctx: ContextHandle, name: MemoryOffset) -> ClassId;
    /// New instance of a host class carrying `opaque`.
    fn new_class_instance(&self, ctx: ContextHandle, class_id: ClassId, opaque: u32)
        -> ValueHandle;

    /// Reports whether `value` is `null`.
    fn is_null(&self, value: ValueHandle) -> bool;
    /// Reports whether `value` is `undefined`.
    fn is_undefined(&self, value: ValueHandle) -> bool;
    /// String conversion into a freshly allocated C string owned by the caller.
    fn to_cstring(&self, ctx: ContextHandle, value: ValueHandle) -> MemoryOffset;
    /// Numeric conversion.
    fn get_float64(&self, ctx: ContextHandle, value: ValueHandle) -> f64;
    /// New reference to `obj[key]`, where `key` is a C string.
    fn get_prop(&self, ctx: ContextHandle, obj: ValueHandle, key: MemoryOffset) -> ValueHandle;
    /// Sets `obj[key] = value` without consuming `value`. False on exception.
    fn set_prop(
        &self,
        ctx: ContextHandle,
        obj: ValueHandle,
        key: MemoryOffset,
        value: ValueHandle,
    ) -> bool;

    /// Releases the instance. No entry point may be called afterwards.
    fn close(&self) {}
}

/// Instantiates engine binaries.
///
/// A backend compiles the binary, resolves its imports against `imports`
/// (every [`crate::HostImport`] the binary names must be provided) and hands
/// back the export table.
pub trait EngineBackend {
    /// Instantiates `binary`, failing with [`crate::HakoError::Instantiation`]
    /// when it is malformed or its imports cannot be wired.
    fn instantiate(
        &self,
        binary: &[u8],
        imports: Arc<dyn HostImports>,
    ) -> Result<Arc<dyn EngineExports>>;
}

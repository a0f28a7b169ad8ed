//! The export table of the test engine.

use std::sync::Arc;

use core_types::{
    ClassId, ContextHandle, EngineExports, HostImports, LinearMemory, MemoryOffset,
    RuntimeHandle, ValueHandle,
};
use memory_manager::{FlatMemory, Memory};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::exec::Frame;
use crate::state::{
    to_number, ContextState, JsValue, Job, Object, ObjectKind, RuntimeState,
    State, RECORD_SIZE,
};

const INITIAL_PAGES: u32 = 4;
const MAX_PAGES: u32 = 256;

/// An instantiated test engine.
///
/// Handles are offsets of blocks in the engine's own linear memory, so the
/// same bounds and null conventions apply as for a compiled engine. The state
/// lock is never held while a host import runs; callbacks are free to re-enter
/// any entry point.
pub struct TestEngine {
    memory: Arc<FlatMemory>,
    pub(crate) imports: Arc<dyn HostImports>,
    state: Mutex<State>,
    undefined: ValueHandle,
    null: ValueHandle,
    mark_func: MemoryOffset,
}

impl TestEngine {
    pub(crate) fn new(imports: Arc<dyn HostImports>) -> Self {
        let memory = Arc::new(FlatMemory::new(INITIAL_PAGES, MAX_PAGES));
        let mut state = State::new();
        let undefined = state.alloc_slot(&memory, ContextHandle::NULL, JsValue::Undefined);
        let null = state.alloc_slot(&memory, ContextHandle::NULL, JsValue::Null);
        state.permanent.insert(undefined);
        state.permanent.insert(null);
        let mark_func = state.heap.alloc(8, &memory);

        Self {
            memory,
            imports,
            state: Mutex::new(state),
            undefined,
            null,
            mark_func,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    pub(crate) fn mem(&self) -> Memory {
        Memory::new(self.memory.clone())
    }

    pub(crate) fn flat(&self) -> &FlatMemory {
        &self.memory
    }

    pub(crate) fn undefined_handle(&self) -> ValueHandle {
        self.undefined
    }

    /// Heap blocks currently allocated, including engine-internal ones.
    pub fn live_allocations(&self) -> usize {
        self.lock().heap.live_count()
    }

    /// Bytes currently allocated.
    pub fn bytes_in_use(&self) -> u64 {
        self.lock().heap.in_use()
    }

    /// Value handles currently alive, excluding the permanent singletons.
    pub fn live_values(&self) -> usize {
        let state = self.lock();
        state.slots.len() - state.permanent.len()
    }

    /// Reference count of `value`; zero once it is released.
    pub fn refcount(&self, value: ValueHandle) -> u32 {
        self.lock().slots.get(&value).map_or(0, |slot| slot.refs)
    }

    /// Frees and releases that did not match a live block or handle.
    pub fn invalid_frees(&self) -> usize {
        let state = self.lock();
        state.heap.invalid_frees() + state.invalid_releases
    }

    /// Values reported through the mark function during collections.
    pub fn marked_values(&self) -> Vec<ValueHandle> {
        self.lock().marked.clone()
    }

    /// Number of live runtimes.
    pub fn runtime_count(&self) -> usize {
        self.lock().runtimes.len()
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.lock().contexts.len()
    }

    pub(crate) fn error(&self, ctx: ContextHandle, name: &str, message: &str) -> JsValue {
        self.lock().new_error(ctx, name, message)
    }

    fn new_value(&self, ctx: ContextHandle, value: JsValue) -> ValueHandle {
        let mut state = self.lock();
        if !state.contexts.contains_key(&ctx) {
            warn!(%ctx, "value requested for unknown context");
            return ValueHandle::NULL;
        }
        state.alloc_slot(&self.memory, ctx, value)
    }

    fn new_kind(&self, ctx: ContextHandle, kind: ObjectKind) -> ValueHandle {
        let mut state = self.lock();
        if !state.contexts.contains_key(&ctx) {
            return ValueHandle::NULL;
        }
        let id = state.new_object(Object::new(ctx, kind));
        state.alloc_slot(&self.memory, ctx, JsValue::Object(id))
    }

    fn read_cstring(&self, ptr: MemoryOffset) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        self.mem().read_string(ptr).ok()
    }

    /// Stores a completion for the caller, raising the exception on failure.
    fn complete(&self, ctx: ContextHandle, outcome: Result<JsValue, JsValue>) -> ValueHandle {
        let mut state = self.lock();
        let value = match outcome {
            Ok(value) => value,
            Err(exception) => {
                if let Some(context) = state.contexts.get_mut(&ctx) {
                    context.pending_exception = Some(exception);
                }
                JsValue::Exception
            }
        };
        state.alloc_slot(&self.memory, ctx, value)
    }
}

impl EngineExports for TestEngine {
    fn memory(&self) -> Arc<dyn LinearMemory> {
        self.memory.clone()
    }

    fn malloc(&self, _ctx: ContextHandle, size: u32) -> MemoryOffset {
        self.lock().heap.alloc(size, &self.memory)
    }

    fn free(&self, _ctx: ContextHandle, ptr: MemoryOffset) {
        if !ptr.is_null() {
            self.lock().heap.free(ptr);
        }
    }

    fn free_cstring(&self, ctx: ContextHandle, ptr: MemoryOffset) {
        self.free(ctx, ptr);
    }

    fn free_value(&self, _ctx: ContextHandle, value: ValueHandle) {
        self.lock().release(value);
    }

    fn dup_value(&self, _ctx: ContextHandle, value: ValueHandle) -> ValueHandle {
        let mut state = self.lock();
        if state.permanent.contains(&value) {
            return value;
        }
        match state.slots.get_mut(&value) {
            Some(slot) => {
                slot.refs += 1;
                value
            }
            None => ValueHandle::NULL,
        }
    }

    fn new_runtime(&self) -> RuntimeHandle {
        let mut state = self.lock();
        let offset = state.heap.alloc(RECORD_SIZE, &self.memory);
        if offset.is_null() {
            return RuntimeHandle::NULL;
        }
        let rt = RuntimeHandle::new(offset.raw());
        state.runtimes.insert(rt, RuntimeState::default());
        debug!(%rt, "engine runtime created");
        rt
    }

    fn free_runtime(&self, rt: RuntimeHandle) {
        let contexts: Vec<ContextHandle> = {
            let state = self.lock();
            state
                .contexts
                .iter()
                .filter(|(_, c)| c.runtime == rt)
                .map(|(ctx, _)| *ctx)
                .collect()
        };
        for ctx in contexts {
            self.free_context(ctx);
        }

        let mut state = self.lock();
        if state.runtimes.remove(&rt).is_some() {
            state.heap.free(MemoryOffset::new(rt.raw()));
        } else {
            state.invalid_releases += 1;
        }
    }

    fn set_memory_limit(&self, _rt: RuntimeHandle, limit: u32) {
        self.lock().heap.set_limit(limit);
    }

    fn run_gc(&self, rt: RuntimeHandle) {
        let (marks, finals) = {
            let mut state = self.lock();
            let reachable = state.reachable_objects();
            let class_objects: Vec<(u32, ContextHandle, ClassId, u32)> = state
                .objects
                .iter()
                .filter(|(_, o)| o.class_id.is_valid())
                .filter(|(_, o)| {
                    state
                        .contexts
                        .get(&o.ctx)
                        .map_or(false, |c| c.runtime == rt)
                })
                .map(|(id, o)| (*id, o.ctx, o.class_id, o.opaque))
                .collect();

            let mut marks = Vec::new();
            let mut finals = Vec::new();
            for (id, ctx, class_id, opaque) in class_objects {
                if reachable.contains(&id) {
                    let temp = state.alloc_slot(&self.memory, ctx, JsValue::Object(id));
                    if !temp.is_null() {
                        marks.push((temp, class_id));
                    }
                } else {
                    state.objects.remove(&id);
                    finals.push((opaque, class_id));
                }
            }
            (marks, finals)
        };

        trace!(%rt, marked = marks.len(), finalized = finals.len(), "engine gc");
        for (value, class_id) in &marks {
            self.imports
                .class_gc_mark(rt, *value, self.mark_func, *class_id);
        }
        {
            let mut state = self.lock();
            for (value, _) in marks {
                state.release(value);
            }
        }
        for (opaque, class_id) in finals {
            self.imports.class_finalizer(rt, opaque, class_id);
        }
    }

    fn is_job_pending(&self, rt: RuntimeHandle) -> bool {
        self.lock()
            .runtimes
            .get(&rt)
            .map_or(false, |r| !r.jobs.is_empty())
    }

    fn execute_pending_jobs(&self, rt: RuntimeHandle, max_jobs: i32) -> i32 {
        let mut executed = 0;
        loop {
            if max_jobs >= 0 && executed >= max_jobs {
                break;
            }
            let job = {
                let mut state = self.lock();
                match state.runtimes.get_mut(&rt) {
                    Some(runtime) => runtime.jobs.pop_front(),
                    None => return -1,
                }
            };
            let Some(job) = job else { break };

            match job {
                Job::Rejection {
                    ctx,
                    promise,
                    reason,
                } => {
                    let (promise, reason) = {
                        let mut state = self.lock();
                        let p = state.alloc_slot(&self.memory, ctx, JsValue::Object(promise));
                        let r = state.alloc_slot(&self.memory, ctx, reason);
                        (p, r)
                    };
                    self.imports
                        .promise_rejection_tracker(ctx, promise, reason, false, 0);
                    let mut state = self.lock();
                    state.release(promise);
                    state.release(reason);
                }
                Job::Call { ctx, function } => {
                    if let Err(exception) = self.call_value(ctx, &function, &[]) {
                        let mut state = self.lock();
                        if let Some(context) = state.contexts.get_mut(&ctx) {
                            context.pending_exception = Some(exception);
                        }
                        return -1;
                    }
                }
            }
            executed += 1;
        }
        executed
    }

    fn mark_value(&self, _rt: RuntimeHandle, value: ValueHandle, mark_func: MemoryOffset) {
        if mark_func != self.mark_func {
            warn!(%mark_func, "mark_value called with an unknown mark function");
            return;
        }
        self.lock().marked.push(value);
    }

    fn new_context(&self, rt: RuntimeHandle, _intrinsics: u32) -> ContextHandle {
        let mut state = self.lock();
        if !state.runtimes.contains_key(&rt) {
            return ContextHandle::NULL;
        }
        let offset = state.heap.alloc(RECORD_SIZE, &self.memory);
        if offset.is_null() {
            return ContextHandle::NULL;
        }
        let ctx = ContextHandle::new(offset.raw());
        let global = state.new_object(Object::new(ctx, ObjectKind::Plain));
        state.contexts.insert(
            ctx,
            ContextState {
                runtime: rt,
                global,
                pending_exception: None,
            },
        );
        ctx
    }

    fn free_context(&self, ctx: ContextHandle) {
        let (rt, finals) = {
            let mut state = self.lock();
            let Some(context) = state.contexts.remove(&ctx) else {
                state.invalid_releases += 1;
                return;
            };

            let handles: Vec<ValueHandle> = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.ctx == ctx)
                .map(|(handle, _)| *handle)
                .collect();
            for handle in handles {
                state.slots.remove(&handle);
                state.heap.free(MemoryOffset::new(handle.raw()));
            }

            let ids: Vec<u32> = state
                .objects
                .iter()
                .filter(|(_, o)| o.ctx == ctx)
                .map(|(id, _)| *id)
                .collect();
            let mut finals = Vec::new();
            for id in ids {
                if let Some(object) = state.objects.remove(&id) {
                    if object.class_id.is_valid() {
                        finals.push((object.opaque, object.class_id));
                    }
                }
            }

            if let Some(runtime) = state.runtimes.get_mut(&context.runtime) {
                runtime.jobs.retain(|job| job.ctx() != ctx);
            }
            state.heap.free(MemoryOffset::new(ctx.raw()));
            (context.runtime, finals)
        };

        for (opaque, class_id) in finals {
            self.imports.class_finalizer(rt, opaque, class_id);
        }
    }

    fn eval(
        &self,
        ctx: ContextHandle,
        source: MemoryOffset,
        source_len: u32,
        filename: MemoryOffset,
        _detect_module: bool,
        _flags: u32,
    ) -> ValueHandle {
        let rt = match self.lock().contexts.get(&ctx) {
            Some(context) => context.runtime,
            None => return ValueHandle::NULL,
        };
        let filename = self
            .read_cstring(filename)
            .unwrap_or_else(|| "eval".to_string());

        let outcome = match self.mem().read_bytes(source, source_len) {
            Ok(bytes) => {
                let code = String::from_utf8_lossy(&bytes).into_owned();
                let frame = Frame {
                    ctx,
                    rt,
                    filename: &filename,
                };
                self.run_script(&frame, &code)
            }
            Err(err) => Err(self.error(ctx, "InternalError", &err.to_string())),
        };
        self.complete(ctx, outcome)
    }

    fn get_last_error(&self, ctx: ContextHandle, value: ValueHandle) -> ValueHandle {
        let mut state = self.lock();
        let is_exception = value.is_null() || state.value(value) == Some(&JsValue::Exception);
        if !is_exception {
            return ValueHandle::NULL;
        }
        let pending = state
            .contexts
            .get_mut(&ctx)
            .and_then(|c| c.pending_exception.take());
        match pending {
            Some(exception) => state.alloc_slot(&self.memory, ctx, exception),
            None => ValueHandle::NULL,
        }
    }

    fn throw_error(&self, ctx: ContextHandle, message: MemoryOffset) -> ValueHandle {
        let message = self.read_cstring(message).unwrap_or_default();
        let exception = self.error(ctx, "Error", &message);
        self.complete(ctx, Err(exception))
    }

    fn get_global_object(&self, ctx: ContextHandle) -> ValueHandle {
        let mut state = self.lock();
        match state.global_object(ctx) {
            Some(global) => state.alloc_slot(&self.memory, ctx, JsValue::Object(global)),
            None => ValueHandle::NULL,
        }
    }

    fn get_undefined(&self) -> ValueHandle {
        self.undefined
    }

    fn get_null(&self) -> ValueHandle {
        self.null
    }

    fn new_string(&self, ctx: ContextHandle, ptr: MemoryOffset) -> ValueHandle {
        match self.read_cstring(ptr) {
            Some(s) => self.new_value(ctx, JsValue::String(s)),
            None => ValueHandle::NULL,
        }
    }

    fn new_float64(&self, ctx: ContextHandle, value: f64) -> ValueHandle {
        self.new_value(ctx, JsValue::Number(value))
    }

    fn new_object(&self, ctx: ContextHandle) -> ValueHandle {
        self.new_kind(ctx, ObjectKind::Plain)
    }

    fn new_array(&self, ctx: ContextHandle) -> ValueHandle {
        self.new_kind(ctx, ObjectKind::Array(Vec::new()))
    }

    fn new_function(
        &self,
        ctx: ContextHandle,
        function_id: i32,
        name: MemoryOffset,
    ) -> ValueHandle {
        let name = self.read_cstring(name).unwrap_or_default();
        self.new_kind(
            ctx,
            ObjectKind::Function {
                id: function_id,
                name,
            },
        )
    }

    fn new_class(&self, ctx: ContextHandle, name: MemoryOffset) -> ClassId {
        let Some(name) = self.read_cstring(name) else {
            return ClassId::INVALID;
        };
        let mut state = self.lock();
        if !state.contexts.contains_key(&ctx) {
            return ClassId::INVALID;
        }
        state.classes.push(name.clone());
        let class_id = ClassId::new(state.classes.len() as u32);
        let ctor = state.new_object(Object::new(
            ctx,
            ObjectKind::Class {
                class_id,
                name: name.clone(),
            },
        ));
        state.set_global_prop(ctx, &name, JsValue::Object(ctor));
        class_id
    }

    fn new_class_instance(
        &self,
        ctx: ContextHandle,
        class_id: ClassId,
        opaque: u32,
    ) -> ValueHandle {
        let mut state = self.lock();
        if !state.contexts.contains_key(&ctx)
            || !class_id.is_valid()
            || class_id.raw() as usize > state.classes.len()
        {
            return ValueHandle::NULL;
        }
        let mut object = Object::new(ctx, ObjectKind::Plain);
        object.class_id = class_id;
        object.opaque = opaque;
        let id = state.new_object(object);
        state.alloc_slot(&self.memory, ctx, JsValue::Object(id))
    }

    fn is_null(&self, value: ValueHandle) -> bool {
        value == self.null || self.lock().value(value) == Some(&JsValue::Null)
    }

    fn is_undefined(&self, value: ValueHandle) -> bool {
        value == self.undefined || self.lock().value(value) == Some(&JsValue::Undefined)
    }

    fn to_cstring(&self, _ctx: ContextHandle, value: ValueHandle) -> MemoryOffset {
        let mut state = self.lock();
        let Some(text) = state.value(value).map(|v| state.display(v)) else {
            return MemoryOffset::NULL;
        };
        let ptr = state.heap.alloc(text.len() as u32 + 1, &self.memory);
        if ptr.is_null() {
            return ptr;
        }
        if self.mem().write_string(ptr, &text).is_err() {
            state.heap.free(ptr);
            return MemoryOffset::NULL;
        }
        ptr
    }

    fn get_float64(&self, _ctx: ContextHandle, value: ValueHandle) -> f64 {
        self.lock().value(value).map_or(f64::NAN, to_number)
    }

    fn get_prop(&self, ctx: ContextHandle, obj: ValueHandle, key: MemoryOffset) -> ValueHandle {
        let Some(key) = self.read_cstring(key) else {
            return ValueHandle::NULL;
        };
        let mut state = self.lock();
        let Some(target) = state.value(obj).cloned() else {
            return ValueHandle::NULL;
        };
        let value = match (&target, key.parse::<usize>()) {
            (JsValue::Object(id), Ok(index)) => match state.objects.get(id).map(|o| &o.kind) {
                Some(ObjectKind::Array(items)) => {
                    items.get(index).cloned().unwrap_or(JsValue::Undefined)
                }
                _ => state.member(&target, &key),
            },
            _ => state.member(&target, &key),
        };
        state.alloc_slot(&self.memory, ctx, value)
    }

    fn set_prop(
        &self,
        _ctx: ContextHandle,
        obj: ValueHandle,
        key: MemoryOffset,
        value: ValueHandle,
    ) -> bool {
        let Some(key) = self.read_cstring(key) else {
            return false;
        };
        let mut state = self.lock();
        let (Some(JsValue::Object(id)), Some(value)) =
            (state.value(obj).cloned(), state.value(value).cloned())
        else {
            return false;
        };
        let Some(object) = state.objects.get_mut(&id) else {
            return false;
        };
        match (&mut object.kind, key.parse::<usize>()) {
            (ObjectKind::Array(items), Ok(index)) => {
                if items.len() <= index {
                    items.resize(index + 1, JsValue::Undefined);
                }
                items[index] = value;
            }
            _ => object.set(&key, value),
        }
        true
    }

    fn close(&self) {
        let state = self.lock();
        debug!(
            runtimes = state.runtimes.len(),
            live = state.heap.live_count(),
            "engine instance closed"
        );
    }
}

impl std::fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEngine")
            .field("pages", &self.memory.pages())
            .finish_non_exhaustive()
    }
}

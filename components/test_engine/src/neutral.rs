use core_types::{
    ClassId, ContextHandle, HostImports, MemoryOffset, ModuleDefHandle, ModuleSourceType,
    RuntimeHandle, ValueHandle,
};

/// Import table that answers every callback with a no-op result.
///
/// Useful for exercising the export table without a host runtime on top.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeutralImports;

impl HostImports for NeutralImports {
    fn call_function(
        &self,
        _ctx: ContextHandle,
        _function_id: i32,
        _this: ValueHandle,
        _argc: u32,
        _argv: MemoryOffset,
    ) -> ValueHandle {
        ValueHandle::NULL
    }

    fn interrupt_handler(&self, _rt: RuntimeHandle, _opaque: u32) -> bool {
        false
    }

    fn normalize_module(
        &self,
        _ctx: ContextHandle,
        _base_name: MemoryOffset,
        _name: MemoryOffset,
        _opaque: u32,
        _out: MemoryOffset,
    ) -> u32 {
        0
    }

    fn load_module(
        &self,
        _rt: RuntimeHandle,
        _ctx: ContextHandle,
        _module_name: MemoryOffset,
        _opaque: u32,
        _out: MemoryOffset,
    ) -> ModuleSourceType {
        ModuleSourceType::Error
    }

    fn module_init(&self, _ctx: ContextHandle, _module: ModuleDefHandle) -> i32 {
        0
    }

    fn class_finalizer(&self, _rt: RuntimeHandle, _opaque: u32, _class_id: ClassId) {}

    fn class_gc_mark(
        &self,
        _rt: RuntimeHandle,
        _value: ValueHandle,
        _mark_func: MemoryOffset,
        _class_id: ClassId,
    ) {
    }

    fn class_constructor(
        &self,
        _ctx: ContextHandle,
        _new_target: ValueHandle,
        _argc: u32,
        _argv: MemoryOffset,
        _class_id: ClassId,
    ) -> ValueHandle {
        ValueHandle::NULL
    }

    fn promise_rejection_tracker(
        &self,
        _ctx: ContextHandle,
        _promise: ValueHandle,
        _reason: ValueHandle,
        _is_handled: bool,
        _opaque: u32,
    ) {
    }
}

//! The host's side of the boundary: functions the engine imports.
//!
//! The engine calls these synchronously from inside an entry point, never
//! spontaneously. Each surface has a declared neutral result that an
//! implementation returns when it cannot resolve the handle it was given.

use std::fmt;

use crate::{ClassId, ContextHandle, MemoryOffset, ModuleDefHandle, RuntimeHandle, ValueHandle};

/// Size of the output buffer the engine supplies to `normalize_module`,
/// terminator included.
pub const MODULE_NAME_CAPACITY: u32 = 1024;

/// Size in bytes of the `load_module` output record.
pub const MODULE_SOURCE_RECORD_SIZE: u32 = 12;

/// How a requested module's source was obtained.
///
/// Written as the first field of the `load_module` output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ModuleSourceType {
    /// Payload is UTF-8 source text.
    String = 0,
    /// Payload is precompiled bytecode.
    Precompiled = 1,
    /// The load failed; payload fields are unused.
    Error = 2,
}

impl ModuleSourceType {
    /// Decodes the wire tag. Unknown tags decode as [`ModuleSourceType::Error`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ModuleSourceType::String,
            1 => ModuleSourceType::Precompiled,
            _ => ModuleSourceType::Error,
        }
    }

    /// The wire tag.
    pub fn raw(self) -> u32 {
        self as u32
    }
}

/// The callback surfaces an engine binary may import from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostImport {
    /// Script called a host-implemented function.
    CallFunction,
    /// Periodic execution-budget check.
    InterruptHandler,
    /// Module specifier normalization.
    NormalizeModule,
    /// Module source loading.
    LoadModule,
    /// Population of a native module's exports.
    ModuleInit,
    /// A host class instance was collected.
    ClassFinalizer,
    /// GC mark phase for a host class instance.
    ClassGcMark,
    /// Script constructed a host class.
    ClassConstructor,
    /// A promise's rejection-handled state changed.
    PromiseRejectionTracker,
}

impl HostImport {
    /// Module namespace the imports live under.
    pub const MODULE: &'static str = "hako";

    /// Every surface, in table order.
    pub const ALL: [HostImport; 9] = [
        HostImport::CallFunction,
        HostImport::InterruptHandler,
        HostImport::NormalizeModule,
        HostImport::LoadModule,
        HostImport::ModuleInit,
        HostImport::ClassFinalizer,
        HostImport::ClassGcMark,
        HostImport::ClassConstructor,
        HostImport::PromiseRejectionTracker,
    ];

    /// Import name as it appears in the engine binary.
    pub fn name(self) -> &'static str {
        match self {
            HostImport::CallFunction => "call_function",
            HostImport::InterruptHandler => "interrupt_handler",
            HostImport::NormalizeModule => "normalize_module",
            HostImport::LoadModule => "load_module",
            HostImport::ModuleInit => "module_init",
            HostImport::ClassFinalizer => "class_finalizer",
            HostImport::ClassGcMark => "class_gc_mark",
            HostImport::ClassConstructor => "class_constructor",
            HostImport::PromiseRejectionTracker => "promise_rejection_tracker",
        }
    }

    /// Looks up a surface by import name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|import| import.name() == name)
    }
}

impl fmt::Display for HostImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", Self::MODULE, self.name())
    }
}

/// The import table handed to the engine at instantiation.
///
/// One method per [`HostImport`]. Implementations must tolerate handles that
/// are no longer registered and answer them with the neutral result noted on
/// each method.
pub trait HostImports: Send + Sync {
    /// Calls host function `function_id` with `argc` value handles stored as
    /// little-endian u32 at `argv`. Neutral: null.
    fn call_function(
        &self,
        ctx: ContextHandle,
        function_id: i32,
        this: ValueHandle,
        argc: u32,
        argv: MemoryOffset,
    ) -> ValueHandle;

    /// Returns true to abort the running script. Must not block or allocate.
    /// Neutral: false.
    fn interrupt_handler(&self, rt: RuntimeHandle, opaque: u32) -> bool;

    /// Writes the normalized module name plus terminator at `out` and returns
    /// its length. Neutral: `name` unchanged.
    fn normalize_module(
        &self,
        ctx: ContextHandle,
        base_name: MemoryOffset,
        name: MemoryOffset,
        opaque: u32,
        out: MemoryOffset,
    ) -> u32;

    /// Writes `{source_type, payload, payload_len}` at `out` and returns the
    /// source type. Neutral: [`ModuleSourceType::Error`].
    fn load_module(
        &self,
        rt: RuntimeHandle,
        ctx: ContextHandle,
        module_name: MemoryOffset,
        opaque: u32,
        out: MemoryOffset,
    ) -> ModuleSourceType;

    /// Populates a module's exports before first evaluation. Neutral: 0.
    fn module_init(&self, ctx: ContextHandle, module: ModuleDefHandle) -> i32;

    /// A host class instance was collected. Never fails.
    fn class_finalizer(&self, rt: RuntimeHandle, opaque: u32, class_id: ClassId);

    /// Reports every engine value referenced by `value` through `mark_func`.
    /// Must not allocate or mutate engine state.
    fn class_gc_mark(
        &self,
        rt: RuntimeHandle,
        value: ValueHandle,
        mark_func: MemoryOffset,
        class_id: ClassId,
    );

    /// Constructs an instance of a host class. Neutral: null.
    fn class_constructor(
        &self,
        ctx: ContextHandle,
        new_target: ValueHandle,
        argc: u32,
        argv: MemoryOffset,
        class_id: ClassId,
    ) -> ValueHandle;

    /// A promise was rejected without a handler, or a handler was attached
    /// to an already rejected promise.
    fn promise_rejection_tracker(
        &self,
        ctx: ContextHandle,
        promise: ValueHandle,
        reason: ValueHandle,
        is_handled: bool,
        opaque: u32,
    );
}

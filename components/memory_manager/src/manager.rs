//! Allocation bridge: engine-routed allocation and value reference counting.
//!
//! Every allocation and every free goes through the engine's exported
//! allocator. The engine's own accounting (and its collector) assumes it owns
//! all of linear memory, so nothing here ever hands out host-allocated space.

use std::fmt;
use std::sync::Arc;

use core_types::{ContextHandle, EngineExports, HakoError, MemoryOffset, Result, ValueHandle};
use tracing::warn;

use crate::Memory;

/// Engine-routed allocation and value lifetime operations.
///
/// Cloning is cheap; clones share the same engine instance.
///
/// This type does not defend against freeing foreign or already-freed
/// offsets and handles. That discipline belongs to the owners of those
/// handles.
#[derive(Clone)]
pub struct MemoryManager {
    exports: Arc<dyn EngineExports>,
    memory: Memory,
}

impl MemoryManager {
    /// Creates a bridge over an engine instance.
    pub fn new(exports: Arc<dyn EngineExports>) -> Self {
        let memory = Memory::new(exports.memory());
        Self { exports, memory }
    }

    /// The raw memory accessor.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Allocates `size` bytes with the context's allocator.
    pub fn allocate(&self, ctx: ContextHandle, size: u32) -> Result<MemoryOffset> {
        let ptr = self.exports.malloc(ctx, size);
        if ptr.is_null() {
            warn!(%ctx, size, "engine allocation failed");
            return Err(HakoError::Allocation { size });
        }
        Ok(ptr)
    }

    /// Frees memory from [`MemoryManager::allocate`]. Null is a no-op.
    pub fn free(&self, ctx: ContextHandle, ptr: MemoryOffset) {
        if !ptr.is_null() {
            self.exports.free(ctx, ptr);
        }
    }

    /// Allocates and writes a null-terminated copy of `s`.
    ///
    /// Returns the offset and the byte length excluding the terminator. The
    /// caller owns the allocation.
    pub fn allocate_string(&self, ctx: ContextHandle, s: &str) -> Result<(MemoryOffset, u32)> {
        let len = u32::try_from(s.len()).map_err(|_| HakoError::Allocation { size: u32::MAX })?;
        let size = len.checked_add(1).ok_or(HakoError::Allocation { size: u32::MAX })?;
        let ptr = self.allocate(ctx, size)?;
        if let Err(err) = self.memory.write_string(ptr, s) {
            self.free(ctx, ptr);
            return Err(err);
        }
        Ok((ptr, len))
    }

    /// Allocates and writes a copy of `data`. The caller owns the allocation.
    pub fn allocate_bytes(&self, ctx: ContextHandle, data: &[u8]) -> Result<MemoryOffset> {
        let size =
            u32::try_from(data.len()).map_err(|_| HakoError::Allocation { size: u32::MAX })?;
        let ptr = self.allocate(ctx, size.max(1))?;
        if let Err(err) = self.memory.write_bytes(ptr, data) {
            self.free(ctx, ptr);
            return Err(err);
        }
        Ok(ptr)
    }

    /// Like [`MemoryManager::allocate_string`], but freed when the guard drops.
    pub fn scoped_string(&self, ctx: ContextHandle, s: &str) -> Result<ScopedAllocation<'_>> {
        let (offset, len) = self.allocate_string(ctx, s)?;
        Ok(ScopedAllocation {
            manager: self,
            ctx,
            offset,
            len,
        })
    }

    /// Like [`MemoryManager::allocate`], but freed when the guard drops.
    pub fn scoped(&self, ctx: ContextHandle, size: u32) -> Result<ScopedAllocation<'_>> {
        let offset = self.allocate(ctx, size)?;
        Ok(ScopedAllocation {
            manager: self,
            ctx,
            offset,
            len: size,
        })
    }

    /// Reads a null-terminated string. The null offset reads as `""`.
    pub fn read_string(&self, ptr: MemoryOffset) -> Result<String> {
        if ptr.is_null() {
            return Ok(String::new());
        }
        self.memory.read_string(ptr)
    }

    /// Frees a C string the engine handed back as owned by the caller.
    pub fn free_cstring(&self, ctx: ContextHandle, ptr: MemoryOffset) {
        if !ptr.is_null() {
            self.exports.free_cstring(ctx, ptr);
        }
    }

    /// Drops one engine reference to `value`. Null is a no-op.
    pub fn free_value(&self, ctx: ContextHandle, value: ValueHandle) {
        if !value.is_null() {
            self.exports.free_value(ctx, value);
        }
    }

    /// Adds one engine reference to `value`.
    pub fn dup_value(&self, ctx: ContextHandle, value: ValueHandle) -> ValueHandle {
        if value.is_null() {
            return ValueHandle::NULL;
        }
        self.exports.dup_value(ctx, value)
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("memory", &self.memory)
            .finish()
    }
}

/// An engine allocation released when dropped.
///
/// Guarantees the free happens on every exit path, including early returns
/// through `?`.
pub struct ScopedAllocation<'a> {
    manager: &'a MemoryManager,
    ctx: ContextHandle,
    offset: MemoryOffset,
    len: u32,
}

impl ScopedAllocation<'_> {
    /// Offset of the allocation.
    pub fn offset(&self) -> MemoryOffset {
        self.offset
    }

    /// Payload length in bytes. For strings this excludes the terminator.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Reports whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gives up ownership, e.g. when the engine takes over the allocation.
    pub fn into_raw(mut self) -> MemoryOffset {
        std::mem::replace(&mut self.offset, MemoryOffset::NULL)
    }
}

impl Drop for ScopedAllocation<'_> {
    fn drop(&mut self) {
        self.manager.free(self.ctx, self.offset);
    }
}

impl fmt::Debug for ScopedAllocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedAllocation")
            .field("ctx", &self.ctx)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

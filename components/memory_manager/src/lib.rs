//! Memory Manager - linear memory access and engine-routed allocation
//!
//! This component provides:
//! - Bounds-checked reads and writes of bytes, u32 and C strings
//! - A growable flat buffer usable as engine linear memory
//! - The allocation bridge: allocate/free/dup/release through the engine's
//!   own entry points
//! - Scoped allocations released on every exit path

pub mod buffer;
pub mod manager;
pub mod memory;

// Re-export main types
pub use buffer::{FlatMemory, PAGE_SIZE};
pub use manager::{MemoryManager, ScopedAllocation};
pub use memory::Memory;

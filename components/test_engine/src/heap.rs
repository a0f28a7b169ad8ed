//! First-fit allocator over the engine's flat memory.

use std::collections::HashMap;

use core_types::{LinearMemory, MemoryOffset};
use memory_manager::FlatMemory;

/// Offsets below this are never handed out, so zero stays the null sentinel.
const HEAP_BASE: u32 = 16;
const ALIGN: u32 = 8;

/// Block allocator with a freelist. Freed blocks are reused whole, so offsets
/// (and therefore handles) recur after release the way real engines reuse
/// them.
#[derive(Debug)]
pub(crate) struct Heap {
    top: u32,
    live: HashMap<u32, u32>,
    free_list: Vec<(u32, u32)>,
    in_use: u64,
    limit: u32,
    invalid_frees: usize,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            top: HEAP_BASE,
            live: HashMap::new(),
            free_list: Vec::new(),
            in_use: 0,
            limit: 0,
            invalid_frees: 0,
        }
    }

    pub(crate) fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }

    pub(crate) fn alloc(&mut self, size: u32, memory: &FlatMemory) -> MemoryOffset {
        let size = match size.max(1).checked_add(ALIGN - 1) {
            Some(padded) => padded & !(ALIGN - 1),
            None => return MemoryOffset::NULL,
        };
        if self.limit != 0 && self.in_use + u64::from(size) > u64::from(self.limit) {
            return MemoryOffset::NULL;
        }

        if let Some(i) = self.free_list.iter().position(|&(_, s)| s >= size) {
            let (offset, block) = self.free_list.remove(i);
            self.live.insert(offset, block);
            self.in_use += u64::from(block);
            return MemoryOffset::new(offset);
        }

        let offset = self.top;
        let end = match offset.checked_add(size) {
            Some(end) => end,
            None => return MemoryOffset::NULL,
        };
        while end > memory.size() {
            if memory.grow(1).is_none() {
                return MemoryOffset::NULL;
            }
        }
        self.top = end;
        self.live.insert(offset, size);
        self.in_use += u64::from(size);
        MemoryOffset::new(offset)
    }

    pub(crate) fn free(&mut self, ptr: MemoryOffset) {
        match self.live.remove(&ptr.raw()) {
            Some(size) => {
                self.in_use -= u64::from(size);
                self.free_list.push((ptr.raw(), size));
            }
            None => self.invalid_frees += 1,
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn in_use(&self) -> u64 {
        self.in_use
    }

    pub(crate) fn invalid_frees(&self) -> usize {
        self.invalid_frees
    }
}

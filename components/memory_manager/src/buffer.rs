//! A growable flat byte buffer usable as engine linear memory.

use parking_lot::RwLock;

use core_types::LinearMemory;

/// Size of one memory page in bytes.
pub const PAGE_SIZE: u32 = 64 * 1024;

/// Page-granular linear memory held in host memory.
///
/// Engines that keep their memory on the host side (rather than inside a
/// sandbox runtime) can expose it through this type. Growth never moves
/// existing offsets.
#[derive(Debug)]
pub struct FlatMemory {
    bytes: RwLock<Vec<u8>>,
    max_pages: u32,
}

impl FlatMemory {
    /// Creates a zeroed memory of `initial_pages`, growable to `max_pages`.
    pub fn new(initial_pages: u32, max_pages: u32) -> Self {
        let max_pages = max_pages.max(initial_pages);
        Self {
            bytes: RwLock::new(vec![0; initial_pages as usize * PAGE_SIZE as usize]),
            max_pages,
        }
    }

    /// Current size in pages.
    pub fn pages(&self) -> u32 {
        self.bytes.read().len() as u32 / PAGE_SIZE
    }

    /// Maximum size in pages.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Grows by `delta` pages, returning the previous page count, or `None`
    /// if that would exceed the maximum.
    pub fn grow(&self, delta: u32) -> Option<u32> {
        let mut bytes = self.bytes.write();
        let pages = bytes.len() as u32 / PAGE_SIZE;
        let target = pages.checked_add(delta)?;
        if target > self.max_pages {
            return None;
        }
        bytes.resize(target as usize * PAGE_SIZE as usize, 0);
        Some(pages)
    }
}

impl LinearMemory for FlatMemory {
    fn size(&self) -> u32 {
        self.bytes.read().len() as u32
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> bool {
        let bytes = self.bytes.read();
        let start = offset as usize;
        match start.checked_add(buf.len()) {
            Some(end) if end <= bytes.len() => {
                buf.copy_from_slice(&bytes[start..end]);
                true
            }
            _ => false,
        }
    }

    fn write(&self, offset: u32, data: &[u8]) -> bool {
        let mut bytes = self.bytes.write();
        let start = offset as usize;
        match start.checked_add(data.len()) {
            Some(end) if end <= bytes.len() => {
                bytes[start..end].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }
}

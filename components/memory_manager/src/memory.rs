//! Raw reads and writes into the engine's linear memory.
//!
//! [`Memory`] is pure data movement: it knows nothing about what the bytes
//! mean and holds no state beyond the buffer it wraps. Every access is bounds
//! checked by the underlying [`LinearMemory`]; a failed access is an error,
//! never a partial result.

use std::fmt;
use std::sync::Arc;

use core_types::{HakoError, LinearMemory, MemoryOffset, Result};

/// Bytes examined per step while scanning for a string terminator.
const SCAN_CHUNK: usize = 64;

/// Typed accessor over an engine's linear memory.
///
/// Decoded values are always copied out. Callers must not hold on to offsets
/// across engine calls that can allocate or collect.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use core_types::MemoryOffset;
/// use memory_manager::{FlatMemory, Memory};
///
/// let memory = Memory::new(Arc::new(FlatMemory::new(1, 1)));
/// memory.write_string(MemoryOffset::new(16), "hako").unwrap();
/// assert_eq!(memory.read_string(MemoryOffset::new(16)).unwrap(), "hako");
/// ```
#[derive(Clone)]
pub struct Memory {
    inner: Arc<dyn LinearMemory>,
}

impl Memory {
    /// Wraps an engine's linear memory.
    pub fn new(inner: Arc<dyn LinearMemory>) -> Self {
        Self { inner }
    }

    /// Current size of the memory in bytes.
    pub fn size(&self) -> u32 {
        self.inner.size()
    }

    /// Reads `len` bytes starting at `offset`.
    pub fn read_bytes(&self, offset: MemoryOffset, len: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        if !self.inner.read(offset.raw(), &mut buf) {
            return Err(HakoError::memory(
                offset,
                format!("read of {} bytes out of range", len),
            ));
        }
        Ok(buf)
    }

    /// Writes `data` starting at `offset`.
    pub fn write_bytes(&self, offset: MemoryOffset, data: &[u8]) -> Result<()> {
        if !self.inner.write(offset.raw(), data) {
            return Err(HakoError::memory(
                offset,
                format!("write of {} bytes out of range", data.len()),
            ));
        }
        Ok(())
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&self, offset: MemoryOffset) -> Result<u32> {
        let mut buf = [0u8; 4];
        if !self.inner.read(offset.raw(), &mut buf) {
            return Err(HakoError::memory(offset, "u32 read out of range"));
        }
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a little-endian u32.
    pub fn write_u32(&self, offset: MemoryOffset, value: u32) -> Result<()> {
        if !self.inner.write(offset.raw(), &value.to_le_bytes()) {
            return Err(HakoError::memory(offset, "u32 write out of range"));
        }
        Ok(())
    }

    /// Reads a null-terminated string starting at `offset`.
    ///
    /// Running off the end of memory without finding a terminator is a
    /// malformed read. Invalid UTF-8 sequences are replaced rather than
    /// rejected, since engine strings may carry unpaired surrogates.
    pub fn read_string(&self, offset: MemoryOffset) -> Result<String> {
        let size = self.inner.size();
        let mut cursor = offset.raw();
        if cursor >= size {
            return Err(HakoError::memory(offset, "string starts past end of memory"));
        }

        let mut bytes = Vec::new();
        let mut chunk = [0u8; SCAN_CHUNK];
        while cursor < size {
            let n = (size - cursor).min(SCAN_CHUNK as u32) as usize;
            if !self.inner.read(cursor, &mut chunk[..n]) {
                return Err(HakoError::memory(offset, "string read out of range"));
            }
            if let Some(end) = chunk[..n].iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk[..n]);
            cursor += n as u32;
        }

        Err(HakoError::memory(offset, "string has no terminator"))
    }

    /// Writes `s` followed by a zero terminator.
    pub fn write_string(&self, offset: MemoryOffset, s: &str) -> Result<()> {
        let mut data = Vec::with_capacity(s.len() + 1);
        data.extend_from_slice(s.as_bytes());
        data.push(0);
        self.write_bytes(offset, &data)
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").field("size", &self.size()).finish()
    }
}

//! Host-managed plugin memory.
//!
//! Strings and byte buffers exchanged with a plugin live in an arena owned
//! by the host and are addressed by non-zero `u64` handles. Offset 0 is
//! the null handle. The arena is cleared at the start of every call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wasm page size (64KiB)
pub const WASM_PAGE_SIZE: u64 = 65536;

/// Memory limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimit {
    /// Maximum memory in bytes
    pub max_bytes: u64,
    /// Memory page size
    pub page_size: u64,
    /// Maximum number of pages
    pub max_pages: u64,
}

impl MemoryLimit {
    /// Create a new memory limit
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            page_size: WASM_PAGE_SIZE,
            max_pages: max_bytes.div_ceil(WASM_PAGE_SIZE),
        }
    }

    /// Create with a page count
    #[must_use]
    pub fn with_pages(max_pages: u64) -> Self {
        Self {
            max_bytes: max_pages * WASM_PAGE_SIZE,
            page_size: WASM_PAGE_SIZE,
            max_pages,
        }
    }

    /// Convert bytes to pages
    #[must_use]
    pub fn bytes_to_pages(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.page_size)
    }

    /// Check if byte count is within limit
    #[must_use]
    pub fn within_limit(&self, bytes: u64) -> bool {
        bytes <= self.max_bytes
    }

    /// Limit as a `usize` for wasmtime's store limiter
    #[must_use]
    pub fn max_bytes_usize(&self) -> usize {
        usize::try_from(self.max_bytes).unwrap_or(usize::MAX)
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024) // 16MB default
    }
}

/// Arena of host-managed memory blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMemory {
    /// Blocks keyed by start offset
    blocks: BTreeMap<u64, Vec<u8>>,
    /// Next free offset
    next: u64,
    /// Total bytes allocated
    total_bytes: u64,
    limit: MemoryLimit,
}

impl HostMemory {
    /// Create an empty arena
    #[must_use]
    pub fn new(limit: MemoryLimit) -> Self {
        Self {
            blocks: BTreeMap::new(),
            next: 1,
            total_bytes: 0,
            limit,
        }
    }

    /// Allocate a zeroed block
    ///
    /// # Errors
    ///
    /// Returns error if the allocation would exceed the memory limit
    pub fn alloc(&mut self, len: u64) -> Result<u64, MemoryError> {
        if !self.limit.within_limit(self.total_bytes.saturating_add(len)) {
            return Err(MemoryError::OutOfMemory {
                requested: len,
                available: self.limit.max_bytes.saturating_sub(self.total_bytes),
            });
        }
        let size = usize::try_from(len)
            .map_err(|_| MemoryError::InvalidAllocation(format!("{len} bytes")))?;

        let start = self.next;
        // zero-length blocks still get a distinct handle
        self.next = start
            .checked_add(len.max(1))
            .ok_or_else(|| MemoryError::InvalidAllocation("address space exhausted".to_string()))?;
        self.total_bytes += len;
        self.blocks.insert(start, vec![0; size]);
        Ok(start)
    }

    /// Allocate a block holding `data`
    ///
    /// # Errors
    ///
    /// Returns error if the allocation would exceed the memory limit
    pub fn alloc_bytes(&mut self, data: &[u8]) -> Result<u64, MemoryError> {
        let offset = self.alloc(data.len() as u64)?;
        if let Some(block) = self.blocks.get_mut(&offset) {
            block.copy_from_slice(data);
        }
        Ok(offset)
    }

    /// Free the block starting at `offset`
    pub fn free(&mut self, offset: u64) -> bool {
        if let Some(block) = self.blocks.remove(&offset) {
            self.total_bytes -= block.len() as u64;
            true
        } else {
            false
        }
    }

    /// Length of the block starting at `offset`
    #[must_use]
    pub fn length(&self, offset: u64) -> Option<u64> {
        self.blocks.get(&offset).map(|b| b.len() as u64)
    }

    /// Contents of the block starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if no block starts at `offset`
    pub fn bytes(&self, offset: u64) -> Result<&[u8], MemoryError> {
        self.blocks
            .get(&offset)
            .map(Vec::as_slice)
            .ok_or(MemoryError::InvalidAddress { address: offset })
    }

    /// Read `len` bytes starting at an address inside a block
    ///
    /// # Errors
    ///
    /// Returns error if the range is not inside a single block
    pub fn read(&self, address: u64, len: u64) -> Result<&[u8], MemoryError> {
        let (start, index) = self.locate(address, len)?;
        let block = &self.blocks[&start];
        Ok(&block[index..index + len as usize])
    }

    /// Load one byte
    ///
    /// # Errors
    ///
    /// Returns error if the address is not inside a block
    pub fn load_u8(&self, address: u64) -> Result<u8, MemoryError> {
        Ok(self.read(address, 1)?[0])
    }

    /// Load a little-endian `u64`
    ///
    /// # Errors
    ///
    /// Returns error if the 8 bytes are not inside a single block
    pub fn load_u64(&self, address: u64) -> Result<u64, MemoryError> {
        let bytes = self.read(address, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Store one byte
    ///
    /// # Errors
    ///
    /// Returns error if the address is not inside a block
    pub fn store_u8(&mut self, address: u64, value: u8) -> Result<(), MemoryError> {
        self.write(address, &[value])
    }

    /// Store a little-endian `u64`
    ///
    /// # Errors
    ///
    /// Returns error if the 8 bytes are not inside a single block
    pub fn store_u64(&mut self, address: u64, value: u64) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }

    /// Drop every block
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.next = 1;
        self.total_bytes = 0;
    }

    /// Total allocated bytes
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of live blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Configured limit
    #[must_use]
    pub fn limit(&self) -> &MemoryLimit {
        &self.limit
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let (start, index) = self.locate(address, data.len() as u64)?;
        if let Some(block) = self.blocks.get_mut(&start) {
            block[index..index + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    /// Find the block holding `[address, address + width)`
    fn locate(&self, address: u64, width: u64) -> Result<(u64, usize), MemoryError> {
        if address == 0 {
            return Err(MemoryError::InvalidAddress { address });
        }
        let (start, block) = self
            .blocks
            .range(..=address)
            .next_back()
            .ok_or(MemoryError::InvalidAddress { address })?;
        let index = address - start;
        let end = index
            .checked_add(width)
            .ok_or(MemoryError::OutOfBounds { address, width })?;
        if end > block.len() as u64 {
            if index >= block.len() as u64 {
                return Err(MemoryError::InvalidAddress { address });
            }
            return Err(MemoryError::OutOfBounds { address, width });
        }
        Ok((*start, index as usize))
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new(MemoryLimit::default())
    }
}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Out of memory
    #[error("Out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: u64, available: u64 },

    /// Invalid address
    #[error("Invalid memory address: 0x{address:X}")]
    InvalidAddress { address: u64 },

    /// Access runs past the end of a block
    #[error("Access of {width} bytes at 0x{address:X} crosses a block boundary")]
    OutOfBounds { address: u64, width: u64 },

    /// Invalid allocation
    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),
}

//! MARIE memory subsystem.
//!
//! A flat store of 4096 signed 16-bit words, addressed 0 through 4095.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// The number of memory cells.
pub const MEMORY_SIZE: usize = 4096;

/// Highest valid address.
pub const MAX_ADDRESS: i32 = 4095;

/// Words per row in a memory dump.
pub const DUMP_ROW_WIDTH: usize = 16;

/// MARIE main memory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<i16>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Read the word at `addr`.
    #[inline]
    pub fn read(&self, addr: i32) -> Result<i16, MemoryError> {
        let index = Self::index(addr)?;
        Ok(self.cells[index])
    }

    /// Write `value` at `addr`.
    #[inline]
    pub fn write(&mut self, addr: i32, value: i16) -> Result<(), MemoryError> {
        let index = Self::index(addr)?;
        self.cells[index] = value;
        Ok(())
    }

    fn index(addr: i32) -> Result<usize, MemoryError> {
        usize::try_from(addr)
            .ok()
            .filter(|&i| i < MEMORY_SIZE)
            .ok_or(MemoryError::AddressOutOfRange(addr))
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, i16)> {
        let end = start.saturating_add(count).min(MEMORY_SIZE);
        (start.min(end)..end).map(|i| (i, self.cells[i])).collect()
    }

    /// Render memory as rows of 16 hex words, each prefixed by the row's
    /// address.
    pub fn hex_rows(&self) -> String {
        let mut out = String::new();
        for (row, chunk) in self.cells.chunks(DUMP_ROW_WIDTH).enumerate() {
            let _ = write!(out, "{:03X} ", row * DUMP_ROW_WIDTH);
            for word in chunk {
                let _ = write!(out, " {:04X}", *word as u16);
            }
            out.push('\n');
        }
        out
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only show non-zero cells
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MemoryError {
    #[error("memory address {0} out of range (0-4095)")]
    AddressOutOfRange(i32),
}

//! Shared kernel memory
//!
//! One linear memory per kernel instance, allocated by the host and handed
//! by reference to the kernel and relay contexts. Every clone of a
//! [`SharedMemoryRegion`] points at the same storage.

use crate::error::MemoryError;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use wasmtime::{Engine, MemoryType, SharedMemory};

/// Size of one wasm page in bytes
pub const WASM_PAGE_SIZE: usize = 65536;

#[derive(Clone)]
pub struct SharedMemoryRegion {
    inner: SharedMemory,
    initial_pages: u32,
    max_pages: u32,
}

impl SharedMemoryRegion {
    /// Allocate a shared memory of `initial_pages`, growable to `max_pages`.
    pub fn new(engine: &Engine, initial_pages: u32, max_pages: u32) -> Result<Self, MemoryError> {
        let ty = MemoryType::shared(initial_pages, max_pages);
        let inner = SharedMemory::new(engine, ty).map_err(|e| MemoryError::Allocate {
            initial_pages,
            max_pages,
            reason: format!("{e:#}"),
        })?;

        log::debug!(
            "Allocated shared memory: {} pages (max {})",
            initial_pages,
            max_pages
        );

        Ok(Self {
            inner,
            initial_pages,
            max_pages,
        })
    }

    pub fn initial_pages(&self) -> u32 {
        self.initial_pages
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Always true: every context references the same storage.
    pub fn is_shareable(&self) -> bool {
        true
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.inner.data_size()
    }

    pub(crate) fn handle(&self) -> &SharedMemory {
        &self.inner
    }

    /// Grow by `delta_pages`, returning the previous size in pages.
    pub fn grow(&self, delta_pages: u64) -> Result<u64, MemoryError> {
        self.inner.grow(delta_pages).map_err(|e| MemoryError::Grow {
            delta_pages,
            reason: format!("{e:#}"),
        })
    }

    fn cells(&self, addr: usize, len: usize) -> Result<&[UnsafeCell<u8>], MemoryError> {
        let data = self.inner.data();
        addr.checked_add(len)
            .and_then(|end| data.get(addr..end))
            .ok_or(MemoryError::OutOfBounds {
                addr,
                len,
                size: data.len(),
            })
    }

    /// Read one register byte.
    pub fn load_u8(&self, addr: usize) -> Result<u8, MemoryError> {
        let cells = self.cells(addr, 1)?;
        Ok(atomic(&cells[0]).load(Ordering::Acquire))
    }

    /// Write one register byte.
    pub fn store_u8(&self, addr: usize, value: u8) -> Result<(), MemoryError> {
        let cells = self.cells(addr, 1)?;
        atomic(&cells[0]).store(value, Ordering::Release);
        Ok(())
    }

    /// Copy `len` bytes starting at `addr` out of shared memory.
    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        let cells = self.cells(addr, len)?;
        Ok(cells
            .iter()
            .map(|cell| atomic(cell).load(Ordering::Relaxed))
            .collect())
    }

    /// Copy `bytes` into shared memory at `addr`.
    pub fn write_bytes(&self, addr: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        let cells = self.cells(addr, bytes.len())?;
        for (cell, &byte) in cells.iter().zip(bytes) {
            atomic(cell).store(byte, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl fmt::Debug for SharedMemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("initial_pages", &self.initial_pages)
            .field("max_pages", &self.max_pages)
            .field("size", &self.size())
            .finish()
    }
}

fn atomic(cell: &UnsafeCell<u8>) -> &AtomicU8 {
    // SAFETY: the cell lives inside the wasm linear memory, which stays mapped
    // for as long as `self.inner` is alive, and u8 has no alignment requirement.
    unsafe { AtomicU8::from_ptr(cell.get()) }
}

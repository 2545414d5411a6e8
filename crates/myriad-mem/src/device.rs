//! Simulated device address space.
//!
//! [`DeviceArena`] stands in for accelerator memory. It hands out numeric
//! addresses inside a reserved window and keeps the bytes behind each
//! address in host memory, so the host can only reach device memory through
//! explicit [`DeviceArena::write`] and [`DeviceArena::read`] copies.
//!
//! Device memory is bump-allocated and reclaimed only as a whole by
//! [`DeviceArena::reset`]; snapshots pushed to the device are never freed
//! individually.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Alignment of every device allocation.
pub const DEVICE_ALIGNMENT: u64 = 256;

/// Errors raised by the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMemoryError {
    /// Not enough device memory left for the request.
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Bytes still free.
        available: u64,
    },
    /// The address range does not fall inside a single live block.
    InvalidAddress {
        /// First byte of the range.
        addr: u64,
        /// Length of the range.
        len: u64,
    },
    /// A zero-byte allocation was requested.
    ZeroSized,
}

impl fmt::Display for DeviceMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMemoryError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "device out of memory: requested {requested} bytes, {available} available"
            ),
            DeviceMemoryError::InvalidAddress { addr, len } => {
                write!(f, "invalid device range {addr:#x}+{len}")
            }
            DeviceMemoryError::ZeroSized => f.write_str("zero-sized device allocation"),
        }
    }
}

impl std::error::Error for DeviceMemoryError {}

/// Device usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    /// Bytes reserved, including alignment padding.
    pub used: u64,
    /// Total size of the address window.
    pub capacity: u64,
    /// Live allocations.
    pub allocations: usize,
}

struct DeviceState {
    next: u64,
    blocks: BTreeMap<u64, Box<[u8]>>,
}

/// A bump-allocated window of simulated device memory.
pub struct DeviceArena {
    base: u64,
    capacity: u64,
    state: Mutex<DeviceState>,
}

impl DeviceArena {
    /// Creates a window of `capacity` bytes starting at `base`.
    ///
    /// `base` is rounded up to [`DEVICE_ALIGNMENT`] and never zero, so a
    /// device address can always be stored in a non-zero word.
    #[must_use]
    pub fn new(base: u64, capacity: u64) -> Self {
        let base = base.max(DEVICE_ALIGNMENT).next_multiple_of(DEVICE_ALIGNMENT);
        DeviceArena {
            base,
            capacity,
            state: Mutex::new(DeviceState {
                next: 0,
                blocks: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First address of the window.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Reserves `size` zeroed bytes and returns their device address.
    ///
    /// # Errors
    ///
    /// [`DeviceMemoryError::ZeroSized`] for an empty request and
    /// [`DeviceMemoryError::OutOfMemory`] when the window is exhausted.
    pub fn alloc(&self, size: u64) -> Result<u64, DeviceMemoryError> {
        if size == 0 {
            return Err(DeviceMemoryError::ZeroSized);
        }
        let mut state = self.lock();
        let reserved = size.next_multiple_of(DEVICE_ALIGNMENT);
        let available = self.capacity.saturating_sub(state.next);
        if reserved > available {
            return Err(DeviceMemoryError::OutOfMemory {
                requested: size,
                available,
            });
        }

        let addr = self.base + state.next;
        state.next += reserved;
        let len = usize::try_from(size).map_err(|_| DeviceMemoryError::OutOfMemory {
            requested: size,
            available,
        })?;
        state.blocks.insert(addr, vec![0u8; len].into_boxed_slice());
        Ok(addr)
    }

    /// Copies `bytes` into device memory at `addr`.
    ///
    /// # Errors
    ///
    /// [`DeviceMemoryError::InvalidAddress`] if the range is not inside one
    /// live block.
    pub fn write(&self, addr: u64, bytes: &[u8]) -> Result<(), DeviceMemoryError> {
        let mut state = self.lock();
        let (start, end) = locate(&state.blocks, addr, bytes.len())?;
        let block = state
            .blocks
            .get_mut(&start)
            .ok_or(DeviceMemoryError::InvalidAddress {
                addr,
                len: bytes.len() as u64,
            })?;
        block[(addr - start) as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies device memory at `addr` into `out`.
    ///
    /// # Errors
    ///
    /// [`DeviceMemoryError::InvalidAddress`] if the range is not inside one
    /// live block.
    pub fn read(&self, addr: u64, out: &mut [u8]) -> Result<(), DeviceMemoryError> {
        let state = self.lock();
        let (start, end) = locate(&state.blocks, addr, out.len())?;
        let block = &state.blocks[&start];
        out.copy_from_slice(&block[(addr - start) as usize..end]);
        Ok(())
    }

    /// Releases every block and rewinds the bump pointer.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.blocks.clear();
        state.next = 0;
    }

    /// Returns usage counters.
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let state = self.lock();
        DeviceStats {
            used: state.next,
            capacity: self.capacity,
            allocations: state.blocks.len(),
        }
    }
}

/// Finds the block containing `[addr, addr + len)`; returns its start and
/// the end offset of the range within it.
fn locate(
    blocks: &BTreeMap<u64, Box<[u8]>>,
    addr: u64,
    len: usize,
) -> Result<(u64, usize), DeviceMemoryError> {
    let invalid = DeviceMemoryError::InvalidAddress {
        addr,
        len: len as u64,
    };
    let (&start, block) = blocks.range(..=addr).next_back().ok_or(invalid)?;
    let offset = usize::try_from(addr - start).map_err(|_| invalid)?;
    let end = offset.checked_add(len).ok_or(invalid)?;
    if end > block.len() {
        return Err(invalid);
    }
    Ok((start, end))
}

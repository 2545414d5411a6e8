//! Process-lifetime host arena.
//!
//! Class descriptors are written once during startup and must stay at a
//! fixed address for the rest of the process: instances embed a pointer to
//! their descriptor, and descriptors embed a pointer to their superclass.
//! The arena hands out zeroed, stable blocks and never frees them.
//!
//! # Architecture
//!
//! - [`Chunk`]: a leaked block of system memory with an atomic bump pointer.
//! - [`HostArena`]: a list of chunks; allocation tries the current chunk and
//!   installs a fresh one when it is exhausted.
//!
//! # Example
//!
//! ```
//! use myriad_mem::arena::HostArena;
//!
//! let arena = HostArena::new(16 * 1024);
//! let block = arena.alloc_zeroed(96, 16).unwrap();
//!
//! let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 96) };
//! assert!(bytes.iter().all(|b| *b == 0));
//! assert_eq!(block.as_ptr() as usize % 16, 0);
//! ```

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Alignment of every chunk; requests may ask for less, never more.
const CHUNK_ALIGNMENT: usize = 64;

/// Smallest chunk the arena will request from the system allocator.
const MIN_CHUNK_SIZE: usize = 8192;

/// Error returned when the system allocator refuses a chunk or a request is
/// malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaAllocError {
    /// The system allocator returned null.
    OutOfMemory {
        /// Size of the chunk that could not be allocated.
        requested: usize,
    },
    /// Alignment is zero, not a power of two, or larger than a chunk's.
    InvalidAlignment {
        /// The offending alignment.
        alignment: usize,
    },
}

impl fmt::Display for ArenaAllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaAllocError::OutOfMemory { requested } => {
                write!(f, "host arena out of memory: chunk of {requested} bytes")
            }
            ArenaAllocError::InvalidAlignment { alignment } => {
                write!(f, "unsupported arena alignment {alignment}")
            }
        }
    }
}

impl std::error::Error for ArenaAllocError {}

/// Arena allocation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes handed out, excluding alignment padding.
    pub total_allocated: usize,
    /// Number of chunks obtained from the system allocator.
    pub chunk_count: usize,
    /// Sum of chunk capacities.
    pub total_capacity: usize,
}

/// A leaked block of zeroed system memory with an atomic bump pointer.
struct Chunk {
    ptr: AtomicPtr<u8>,
    end: usize,
    capacity: usize,
}

impl Chunk {
    fn new(size: usize) -> Result<&'static Chunk, ArenaAllocError> {
        let layout = Layout::from_size_align(size, CHUNK_ALIGNMENT)
            .map_err(|_| ArenaAllocError::OutOfMemory { requested: size })?;

        // SAFETY: layout has a non-zero size (size >= MIN_CHUNK_SIZE).
        let start = unsafe { alloc::alloc_zeroed(layout) };
        let start =
            NonNull::new(start).ok_or(ArenaAllocError::OutOfMemory { requested: size })?;

        Ok(Box::leak(Box::new(Chunk {
            ptr: AtomicPtr::new(start.as_ptr()),
            end: start.as_ptr().addr() + size,
            capacity: size,
        })))
    }

    fn try_alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        loop {
            let current = self.ptr.load(Ordering::Acquire);
            let aligned = (current.addr() + align - 1) & !(align - 1);
            let next = aligned.checked_add(size)?;
            if next > self.end {
                return None;
            }

            if self
                .ptr
                .compare_exchange_weak(
                    current,
                    current.with_addr(next),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return NonNull::new(current.with_addr(aligned));
            }
        }
    }
}

/// Thread-safe arena for blocks that live as long as the process.
///
/// Memory comes back zeroed because descriptors are built by writing
/// individual fields into fresh storage, and unset method slots must read
/// as "no implementation".
pub struct HostArena {
    chunks: Mutex<Vec<&'static Chunk>>,
    current: AtomicPtr<Chunk>,
    chunk_size: usize,
    total_allocated: AtomicUsize,
}

impl HostArena {
    /// Creates an arena whose chunks are at least `chunk_size` bytes.
    ///
    /// No memory is requested until the first allocation.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        HostArena {
            chunks: Mutex::new(Vec::new()),
            current: AtomicPtr::new(std::ptr::null_mut()),
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE).next_power_of_two(),
            total_allocated: AtomicUsize::new(0),
        }
    }

    /// Allocates `size` zeroed bytes aligned to `align`.
    ///
    /// The block is never freed or moved.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaAllocError::InvalidAlignment`] for a bad alignment and
    /// [`ArenaAllocError::OutOfMemory`] when a new chunk cannot be obtained.
    pub fn alloc_zeroed(
        &self,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, ArenaAllocError> {
        if align == 0 || !align.is_power_of_two() || align > CHUNK_ALIGNMENT {
            return Err(ArenaAllocError::InvalidAlignment { alignment: align });
        }
        let size = size.max(1);

        loop {
            let current = self.current.load(Ordering::Acquire);
            if !current.is_null() {
                // SAFETY: `current` only ever holds leaked, never-freed chunks.
                let chunk = unsafe { &*current };
                if let Some(block) = chunk.try_alloc(size, align) {
                    self.total_allocated.fetch_add(size, Ordering::Relaxed);
                    return Ok(block);
                }
            }
            self.grow(current, size + align)?;
        }
    }

    #[cold]
    fn grow(&self, seen: *mut Chunk, min_size: usize) -> Result<(), ArenaAllocError> {
        let mut chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have installed a chunk while we waited.
        if self.current.load(Ordering::Acquire) != seen {
            return Ok(());
        }

        let chunk = Chunk::new(self.chunk_size.max(min_size.next_power_of_two()))?;
        chunks.push(chunk);
        self.current
            .store(std::ptr::from_ref(chunk).cast_mut(), Ordering::Release);
        Ok(())
    }

    /// Returns allocation statistics.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        ArenaStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            chunk_count: chunks.len(),
            total_capacity: chunks.iter().map(|c| c.capacity).sum(),
        }
    }
}

/// Process-wide host arena used for class descriptors.
#[must_use]
pub fn host_arena() -> &'static HostArena {
    static ARENA: OnceLock<HostArena> = OnceLock::new();
    ARENA.get_or_init(|| HostArena::new(64 * 1024))
}

//! Host allocation helpers for instances and the buffers they own.
//!
//! Everything is allocated zeroed with a fixed 16-byte alignment, so a
//! buffer can be released knowing only its element type and length.

use crate::error::{Error, Result};
use crate::runtime::object::INSTANCE_ALIGNMENT;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

fn layout(size: usize) -> Result<Layout> {
    Layout::from_size_align(size.max(1), INSTANCE_ALIGNMENT)
        .map_err(|_| Error::OutOfMemory { requested: size })
}

/// Allocates `size` zeroed bytes.
pub(crate) fn alloc_bytes(size: usize) -> Result<NonNull<u8>> {
    let layout = layout(size)?;
    // SAFETY: the layout has a non-zero size.
    NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
        .ok_or(Error::OutOfMemory { requested: size })
}

/// Releases storage from [`alloc_bytes`].
///
/// # Safety
///
/// `ptr` must come from `alloc_bytes(size)` and not be used afterwards.
pub(crate) unsafe fn free_bytes(ptr: *mut u8, size: usize) {
    if let Ok(layout) = layout(size) {
        // SAFETY: caller contract.
        unsafe { alloc::dealloc(ptr, layout) };
    }
}

/// Allocates a zeroed buffer of `len` values of `T`.
///
/// An empty buffer is a null pointer.
///
/// # Errors
///
/// [`Error::OutOfMemory`] if the allocation fails or the size overflows.
pub fn alloc_zeroed<T>(len: usize) -> Result<*mut T> {
    if len == 0 {
        return Ok(std::ptr::null_mut());
    }
    let size = len
        .checked_mul(size_of::<T>())
        .ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    Ok(alloc_bytes(size)?.as_ptr().cast())
}

/// Releases a buffer from [`alloc_zeroed`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must come from `alloc_zeroed::<T>(len)` and not be used afterwards.
pub unsafe fn free<T>(ptr: *mut T, len: usize) {
    if !ptr.is_null() {
        // SAFETY: caller contract; the size cannot overflow since the
        // allocation succeeded.
        unsafe { free_bytes(ptr.cast(), len * size_of::<T>()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_zeroed() {
        let ptr = alloc_zeroed::<f64>(32).unwrap();
        assert_eq!(ptr.addr() % INSTANCE_ALIGNMENT, 0);
        let values = unsafe { std::slice::from_raw_parts(ptr, 32) };
        assert!(values.iter().all(|v| *v == 0.0));
        unsafe { free(ptr, 32) };
    }

    #[test]
    fn test_empty_buffer_is_null() {
        let ptr = alloc_zeroed::<f64>(0).unwrap();
        assert!(ptr.is_null());
        unsafe { free(ptr, 0) };
    }

    #[test]
    fn test_overflow_reported() {
        assert!(matches!(
            alloc_zeroed::<u64>(usize::MAX),
            Err(Error::OutOfMemory { .. })
        ));
    }
}

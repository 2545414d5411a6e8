//! Host-to-device mirroring.
//!
//! Mirroring produces a device-resident copy of an instance or a class in
//! which every embedded pointer refers to device memory. The dispatch layer
//! ([`crate::runtime::dispatch::mirror_to_device`]) allocates the target,
//! takes a flat [`Staging`] copy of the host object, lets the class's mirror
//! implementation patch the copy, and writes it to the device.
//!
//! # Instances
//!
//! The header is rewritten to the class's device mirror, and every
//! [`OwnedBuffer`] declared anywhere in the class chain gets an independent
//! device allocation holding a snapshot of the host contents. Other
//! pointer-sized fields, such as non-owning references to other instances,
//! are copied verbatim.
//!
//! # Classes
//!
//! With `clobber` set, a class's own fixup rewrites the slots its level
//! introduced to device function addresses and then runs the fixups of the
//! levels below it, ending with [`class_fixup`]. The mirror implementation
//! then forwards to its superclass's implementation with `clobber` cleared,
//! so no level repeats or undoes another's rewrite. This holds for
//! hierarchies of any depth.

use crate::error::{Error, Result};
use crate::runtime::buffer;
use crate::runtime::class::{Class, ClassDescriptor, METHODS_OFFSET, ObjectMethodTable};
use crate::runtime::device::{Device, DevicePtr, read_device_word};
use crate::runtime::object::Object;
use myriad_log::{trace, warn};
use std::mem::offset_of;

const HEADER_OFFSET: usize = offset_of!(ClassDescriptor, header);
const SUPER_OFFSET: usize = offset_of!(ClassDescriptor, super_class);
const DEVICE_CLASS_OFFSET: usize = offset_of!(ClassDescriptor, device_class);
const NAME_OFFSET: usize = offset_of!(ClassDescriptor, name);
const BUFFERS_OFFSET: usize = offset_of!(ClassDescriptor, buffers);

/// A dynamically sized buffer owned by an instance.
///
/// The instance stores a pointer word at `ptr_offset` and an element count
/// word at `len_offset`. Declaring the buffer on the class that introduces
/// the fields makes it mirrored, updated and released automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedBuffer {
    /// Field name, for diagnostics.
    pub name: &'static str,
    /// Offset of the pointer field within the instance.
    pub ptr_offset: usize,
    /// Offset of the element count field within the instance.
    pub len_offset: usize,
    /// Size of one element in bytes.
    pub elem_size: usize,
}

impl OwnedBuffer {
    /// Declares a buffer of `T` elements.
    #[must_use]
    pub const fn of<T>(name: &'static str, ptr_offset: usize, len_offset: usize) -> Self {
        OwnedBuffer {
            name,
            ptr_offset,
            len_offset,
            elem_size: size_of::<T>(),
        }
    }

    /// Host pointer and byte length of this buffer in `object`.
    fn host_parts(self, object: Object) -> (*mut u8, usize) {
        // SAFETY: both offsets are word-sized fields inside the instance.
        unsafe {
            let ptr = *object_word_ptr(object, self.ptr_offset).cast::<*mut u8>();
            let len = *object_word_ptr(object, self.len_offset) as usize;
            (ptr, len.saturating_mul(self.elem_size))
        }
    }

    /// Frees the host buffer and clears the pointer and length fields.
    ///
    /// # Safety
    ///
    /// The buffer must have been allocated with [`buffer::alloc_zeroed`]
    /// for the recorded length, and `object` must be exclusively owned.
    pub(crate) unsafe fn release(self, object: Object) {
        let (data, bytes) = self.host_parts(object);
        // SAFETY: both offsets lie inside the instance; caller contract.
        unsafe {
            buffer::free(data, bytes);
            *object_word_ptr(object, self.ptr_offset).cast::<*mut u8>() = std::ptr::null_mut();
            *object_word_ptr(object, self.len_offset) = 0;
        }
    }
}

fn object_word_ptr(object: Object, offset: usize) -> *mut u64 {
    // SAFETY: callers pass offsets of word-sized fields inside the instance.
    unsafe { object.as_ptr().cast::<u8>().add(offset).cast::<u64>() }
}

fn read_word(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(word)
}

/// Host working copy of an object headed for the device.
///
/// The target address is allocated before the copy is patched, so fixups
/// can embed the object's own device address.
#[derive(Debug, Clone)]
pub struct Staging {
    bytes: Vec<u8>,
    target: DevicePtr,
}

impl Staging {
    /// Copies `object` for writing to `target`.
    #[must_use]
    pub fn copy_of(object: Object, target: DevicePtr) -> Self {
        Staging {
            bytes: object.as_bytes().to_vec(),
            target,
        }
    }

    /// Wraps raw bytes for writing to `target`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>, target: DevicePtr) -> Self {
        Staging { bytes, target }
    }

    /// Device address the copy will be written to.
    #[must_use]
    pub fn target(&self) -> DevicePtr {
        self.target
    }

    /// Reads the word at `offset`.
    ///
    /// # Panics
    ///
    /// If the word lies outside the copy.
    #[must_use]
    pub fn read_word(&self, offset: usize) -> u64 {
        read_word(&self.bytes, offset)
    }

    /// Overwrites the word at `offset`.
    ///
    /// # Panics
    ///
    /// If the word lies outside the copy.
    pub fn write_word(&mut self, offset: usize, value: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
    }

    /// Zeroes `len` bytes at `offset`.
    pub fn zero(&mut self, offset: usize, len: usize) {
        self.bytes[offset..offset + len].fill(0);
    }

    /// The patched bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the copy in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty copy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Root `Object` mirror: device class header plus owned buffers.
pub(crate) fn object_mirror(
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
    _clobber: bool,
) -> Result<()> {
    let class = object.class();
    let device_class = class
        .device_class()
        .ok_or(Error::ClassNotMirrored { class: class.name() })?;
    staging.write_word(HEADER_OFFSET, device_class.addr());

    for level in class.ancestors() {
        for owned in level.buffers() {
            let (ptr, len) = owned.host_parts(object);
            if ptr.is_null() || len == 0 {
                staging.write_word(owned.ptr_offset, 0);
                continue;
            }
            // SAFETY: the instance owns `len` initialized bytes at `ptr`.
            let contents = unsafe { std::slice::from_raw_parts(ptr, len) };
            let copy = device.alloc(len)?;
            device.copy_to_device(copy, contents)?;
            staging.write_word(owned.ptr_offset, copy.addr());
            trace!("{}.{}: {len} bytes -> {copy}", class.name(), owned.name);
        }
    }
    Ok(())
}

/// Root `Object` update: copies every owned buffer back from the device
/// copy at `mirror`.
pub(crate) fn object_update_from_device(
    object: Object,
    device: &dyn Device,
    mirror: DevicePtr,
) -> Result<()> {
    let class = object.class();
    for level in class.ancestors() {
        for owned in level.buffers() {
            let (ptr, len) = owned.host_parts(object);
            if ptr.is_null() || len == 0 {
                continue;
            }
            let Some(source) =
                DevicePtr::new(read_device_word(device, mirror.offset(owned.ptr_offset))?)
            else {
                continue;
            };
            // SAFETY: the instance owns `len` bytes at `ptr`, and the caller
            // has exclusive access to it during the update.
            let contents = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
            device.copy_from_device(source, contents)?;
        }
    }
    Ok(())
}

/// Root `Class` mirror. The embedded header and the mirror address both
/// become the target address.
pub(crate) fn class_mirror(
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
    clobber: bool,
) -> Result<()> {
    if clobber {
        class_fixup(object, staging, device)?;
    }
    let target = staging.target().addr();
    staging.write_word(HEADER_OFFSET, target);
    staging.write_word(DEVICE_CLASS_OFFSET, target);
    Ok(())
}

/// Fixup for the fields the root `Class` introduces: the superclass pointer
/// becomes the superclass's device mirror, the base slots (host-only
/// operations) are nulled and host metadata is scrubbed.
///
/// Metaclass fixups call this after translating their own slots.
///
/// # Errors
///
/// [`Error::SuperNotMirrored`] if the superclass has no device mirror.
pub fn class_fixup(object: Object, staging: &mut Staging, _device: &dyn Device) -> Result<()> {
    let class = Class::from_object(object)?;
    let parent = class.super_class()?;
    let device_super = parent
        .device_class()
        .ok_or(Error::SuperNotMirrored { class: class.name() })?;
    staging.write_word(SUPER_OFFSET, device_super.addr());
    staging.zero(METHODS_OFFSET, size_of::<ObjectMethodTable>());
    scrub_class_metadata(staging);
    Ok(())
}

/// Clears the name and buffer declarations, which point into host memory.
pub(crate) fn scrub_class_metadata(staging: &mut Staging) {
    staging.zero(NAME_OFFSET, size_of::<Option<&'static str>>());
    staging.zero(BUFFERS_OFFSET, size_of::<Option<&'static [OwnedBuffer]>>());
}

/// Root `Class` update. Classes are immutable after construction, so there
/// is nothing to reconcile.
pub(crate) fn class_update_from_device(
    object: Object,
    _device: &dyn Device,
    _mirror: DevicePtr,
) -> Result<()> {
    warn!(
        "update_from_device on class {}: classes are immutable, nothing to do",
        Class::from_object(object)?.name()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_words() {
        let target = DevicePtr::new(0x1000).unwrap();
        let mut staging = Staging::from_bytes(vec![0xff; 24], target);
        staging.write_word(8, 0x1234);
        assert_eq!(staging.read_word(8), 0x1234);

        staging.zero(0, 8);
        assert_eq!(staging.read_word(0), 0);
        assert_eq!(staging.as_bytes()[16], 0xff);
        assert_eq!(staging.len(), 24);
        assert_eq!(staging.target(), target);
    }

    #[test]
    fn test_owned_buffer_declaration() {
        let owned = OwnedBuffer::of::<f64>("vm", 8, 16);
        assert_eq!(owned.elem_size, 8);
        assert_eq!(owned.ptr_offset, 8);
        assert_eq!(owned.len_offset, 16);
    }
}

//! Object header and instance handles.
//!
//! Every instance struct, and every class descriptor, starts with an
//! [`ObjectHeader`]: a single pointer to the class the value belongs to.
//! Because the header is always the first field of a `#[repr(C)]` struct, a
//! pointer to any instance is also a valid pointer to its header, and a
//! pointer to a derived instance is a valid pointer to its base struct.
//!
//! # Memory Layout
//!
//! ```text
//! SomaCompartment            CompartmentData            ObjectHeader
//! +--------------------+     +--------------------+     +-----------+
//! | base: Compartment -+---> | header ------------+---> | class     |
//! | vm, vm_len, cm     |     | id, mechanisms     |     +-----------+
//! +--------------------+     +--------------------+
//! ```
//!
//! Instances are zeroed on allocation and aligned to
//! [`INSTANCE_ALIGNMENT`]. Zero is a valid value for every field an
//! instance struct may contain, including `Option<Object>`.

use crate::error::Result;
use crate::runtime::class::{Class, ClassDescriptor};
use crate::runtime::device::{Device, DevicePtr};
use crate::runtime::{bootstrap, dispatch};
use std::fmt;
use std::ptr::NonNull;

/// Alignment of every instance allocation.
pub const INSTANCE_ALIGNMENT: usize = 16;

/// Header shared by every instance and class descriptor.
#[repr(C)]
#[derive(Debug)]
pub struct ObjectHeader {
    /// The class this value is an instance of.
    pub(crate) class: *const ClassDescriptor,
}

/// Handle to a runtime instance.
///
/// `Object` is a plain pointer: copying it does not copy the instance, and
/// dropping it does not free anything. Instances are released explicitly
/// through [`dispatch::destruct`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Object {
    ptr: NonNull<ObjectHeader>,
}

// SAFETY: Object is an address. Reading the header is only ever done on
// fully constructed instances whose class pointer is never rewritten;
// mutation of instance fields goes through `data_mut`, whose callers uphold
// exclusive access.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// Wraps a pointer to an instance.
    ///
    /// # Safety
    ///
    /// `ptr` must point to live storage that starts with an initialized
    /// [`ObjectHeader`] and is at least `class.size` bytes long.
    #[must_use]
    pub const unsafe fn from_raw(ptr: NonNull<ObjectHeader>) -> Self {
        Object { ptr }
    }

    /// Returns the raw pointer to the header.
    #[must_use]
    pub const fn as_ptr(self) -> *mut ObjectHeader {
        self.ptr.as_ptr()
    }

    /// Returns the class this object is an instance of.
    #[must_use]
    pub fn class(self) -> Class {
        // SAFETY: every live object has an initialized header whose class
        // pointer refers to a descriptor that is never freed.
        unsafe {
            let class = (*self.ptr.as_ptr()).class;
            Class::from_raw(NonNull::new_unchecked(class.cast_mut()))
        }
    }

    /// Byte size of this instance, as recorded by its class.
    #[must_use]
    pub fn size(self) -> usize {
        self.class().instance_size()
    }

    /// Returns `true` if this object's class is exactly `class`.
    #[must_use]
    pub fn is_a(self, class: Class) -> bool {
        self.class() == class
    }

    /// Returns `true` if `class` is this object's class or one of its
    /// ancestors. Every object is an instance of the root `Object` class.
    #[must_use]
    pub fn is_instance_of(self, class: Class) -> bool {
        self.class().is_subclass_of(class)
    }

    /// Returns `true` if this object is a class descriptor.
    #[must_use]
    pub fn is_class(self) -> bool {
        self.is_instance_of(bootstrap::class_class())
    }

    /// Views the instance as a flat block of `size()` bytes.
    ///
    /// This is the layout handed across process boundaries; embedded
    /// pointers in it are meaningless outside this process.
    ///
    /// Instances are zero-filled when allocated and are written field by
    /// field afterwards, so padding bytes stay initialized. Constructors
    /// must not assign whole structs with padding through
    /// [`Object::data_mut`].
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the storage is at least `size()` bytes. Heap and arena
        // instances are zero-filled at allocation, and the root statics
        // initialize every field of a padding-free descriptor.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.size()) }
    }

    /// Reinterprets the instance as `T`.
    ///
    /// # Safety
    ///
    /// `T` must be a `#[repr(C)]` struct whose layout is a prefix of this
    /// instance's layout, and no `&mut` to the instance may be live.
    #[must_use]
    pub unsafe fn data<T>(&self) -> &T {
        unsafe { &*self.ptr.as_ptr().cast::<T>() }
    }

    /// Reinterprets the instance as mutable `T`.
    ///
    /// # Safety
    ///
    /// As for [`Object::data`], and the caller must have exclusive access to
    /// the instance for the lifetime of the reference.
    #[allow(clippy::mut_from_ref)]
    #[must_use]
    pub unsafe fn data_mut<T>(&self) -> &mut T {
        unsafe { &mut *self.ptr.as_ptr().cast::<T>() }
    }

    /// Mirrors this instance to `device` and returns the device copy.
    ///
    /// Class descriptors go through [`Class::mirror`], so a class gets one
    /// device copy however often it is mirrored.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ClassNotMirrored`] if the class has no device mirror
    /// yet, or any device allocation or copy failure.
    pub fn mirror(self, device: &dyn Device) -> Result<DevicePtr> {
        if self.is_class() {
            return Class::from_object(self)?.mirror(device);
        }
        dispatch::mirror_to_device(self, device, true)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class().name())
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bootstrap::{class_class, object_class};

    #[test]
    fn test_handle_is_pointer_sized() {
        assert_eq!(size_of::<Object>(), size_of::<usize>());
        assert_eq!(size_of::<Option<Object>>(), size_of::<usize>());
        assert_eq!(size_of::<ObjectHeader>(), size_of::<usize>());
    }

    #[test]
    fn test_roots_as_objects() {
        let object = object_class().as_object();
        let class = class_class().as_object();

        assert!(object.is_a(class_class()));
        assert!(class.is_a(class_class()));
        assert!(object.is_class());
        assert!(object.is_instance_of(object_class()));
        assert_eq!(object.size(), size_of::<ClassDescriptor>());
        assert_eq!(object.as_bytes().len(), size_of::<ClassDescriptor>());
    }
}

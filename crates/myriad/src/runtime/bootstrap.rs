//! The two root classes.
//!
//! `Object` and `Class` cannot be built by the ordinary constructor chain:
//! `Class` is an instance of itself, and `Object` is an instance of `Class`
//! whose superclass is itself. Both descriptors are therefore laid out as
//! statics whose pointer fields reference each other's fixed addresses, and
//! exist before any allocation happens.
//!
//! ```text
//!            class                 class
//!   Object ---------> Class <-----------+
//!    |  ^              |  |             |
//!    +--+ super        |  +-------------+
//!                      | super
//!   Object <-----------+
//! ```

use crate::error::{Error, Result};
use crate::runtime::buffer;
use crate::runtime::class::{
    Class, ClassDescriptor, ConstructFn, DestructFn, MirrorFn, ObjectMethodTable, UpdateFn,
    class_construct, class_destruct,
};
use crate::runtime::device::{Device, DevicePtr};
use crate::runtime::mirror::{self, Staging};
use crate::runtime::object::{INSTANCE_ALIGNMENT, Object, ObjectHeader};
use myriad_log::{debug, info};
use std::any::Any;
use std::mem::offset_of;
use std::sync::atomic::AtomicU64;
use std::sync::{Mutex, MutexGuard, PoisonError};

// Every field of the roots is written in full, including both words of
// `buffers`, because `Object::as_bytes` reads them when they are mirrored.
static ROOT_OBJECT: ClassDescriptor = ClassDescriptor {
    header: ObjectHeader {
        class: &raw const ROOT_CLASS,
    },
    super_class: &raw const ROOT_OBJECT,
    device_class: AtomicU64::new(0),
    size: size_of::<ObjectHeader>(),
    name: Some("Object"),
    buffers: Some(&[]),
    methods: ObjectMethodTable {
        construct: Some(object_construct as ConstructFn),
        destruct: Some(object_destruct as DestructFn),
        mirror: Some(mirror::object_mirror as MirrorFn),
        update_from_device: Some(mirror::object_update_from_device as UpdateFn),
    },
};

static ROOT_CLASS: ClassDescriptor = ClassDescriptor {
    header: ObjectHeader {
        class: &raw const ROOT_CLASS,
    },
    super_class: &raw const ROOT_OBJECT,
    device_class: AtomicU64::new(0),
    size: size_of::<ClassDescriptor>(),
    name: Some("Class"),
    buffers: Some(&[]),
    methods: ObjectMethodTable {
        construct: Some(class_construct as ConstructFn),
        destruct: Some(class_destruct as DestructFn),
        mirror: Some(mirror::class_mirror as MirrorFn),
        update_from_device: Some(mirror::class_update_from_device as UpdateFn),
    },
};

/// The root `Object` class.
#[must_use]
pub fn object_class() -> Class {
    Class::from_static(&ROOT_OBJECT)
}

/// The root `Class` class, metaclass of every class.
#[must_use]
pub fn class_class() -> Class {
    Class::from_static(&ROOT_CLASS)
}

/// Returns `true` for either root class.
#[must_use]
pub fn is_root(class: Class) -> bool {
    class == object_class() || class == class_class()
}

/// Root `Object` constructor. The header is set by the allocator, so there
/// is nothing left to initialize.
fn object_construct(_object: Object, _init: &dyn Any) -> Result<()> {
    Ok(())
}

/// Root `Object` destructor: releases the declared buffers of every level,
/// then the instance storage.
fn object_destruct(object: Object) -> Result<()> {
    let class = object.class();
    if object.is_class() {
        return Err(Error::ClassDestruction { class: class.name() });
    }

    release_buffers(object, class);
    let size = object.size();
    // SAFETY: instances are allocated by `allocate_instance` with the class
    // size, and the caller gives up the handle.
    unsafe { buffer::free_bytes(object.as_ptr().cast(), size) };
    Ok(())
}

/// Releases the declared buffers of every level of `class`. Buffers that
/// were never allocated are still null and are skipped.
fn release_buffers(object: Object, class: Class) {
    for level in class.ancestors() {
        for owned in level.buffers() {
            // SAFETY: declared buffers are null or were allocated by
            // `buffer::alloc_zeroed` with the length recorded at `len_offset`.
            unsafe { owned.release(object) };
        }
    }
}

static MIRROR_GATE: Mutex<()> = Mutex::new(());

/// Serializes class mirroring so each class gets exactly one device copy.
pub(crate) fn mirror_gate() -> MutexGuard<'static, ()> {
    MIRROR_GATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Establishes both root classes on `device`, once per process.
///
/// The device copies reference each other the way the host statics do, and
/// both carry the device `Class` address in their `device_class` word. The
/// host `Object` still records its own device copy. Their method tables are nulled, since the root operations only run on
/// the host, and their host-only metadata is scrubbed.
///
/// # Errors
///
/// Any device allocation or copy failure.
pub fn mirror_roots(device: &dyn Device) -> Result<()> {
    let _gate = mirror_gate();
    mirror_roots_locked(device)
}

pub(crate) fn mirror_roots_locked(device: &dyn Device) -> Result<()> {
    let (object, class) = (object_class(), class_class());
    if object.device_class().is_some() && class.device_class().is_some() {
        return Ok(());
    }

    let object_target = device.alloc(object.as_object().size())?;
    let class_target = device.alloc(class.as_object().size())?;

    // On the device both roots name `Class` as their device class.
    write_root(object, object_target, class_target, object_target, device)?;
    write_root(class, class_target, class_target, object_target, device)?;

    object.set_device_class(object_target);
    class.set_device_class(class_target);
    info!("root classes mirrored: Object at {object_target}, Class at {class_target}");
    Ok(())
}

fn write_root(
    root: Class,
    target: DevicePtr,
    metaclass: DevicePtr,
    parent: DevicePtr,
    device: &dyn Device,
) -> Result<()> {
    let mut staging = Staging::copy_of(root.as_object(), target);
    staging.write_word(offset_of!(ClassDescriptor, header), metaclass.addr());
    staging.write_word(offset_of!(ClassDescriptor, super_class), parent.addr());
    staging.write_word(offset_of!(ClassDescriptor, device_class), metaclass.addr());
    mirror::scrub_class_metadata(&mut staging);
    staging.zero(
        offset_of!(ClassDescriptor, methods),
        size_of::<ObjectMethodTable>(),
    );
    debug!("root {} staged for {target}", root.name());
    device.copy_to_device(target, staging.as_bytes())
}

/// Allocates zeroed storage for an instance of `class`.
///
/// Class descriptors come from the never-freed host arena; every other
/// instance from the global allocator.
pub(crate) fn allocate_instance(class: Class) -> Result<Object> {
    let size = class.instance_size();
    let ptr = if class.is_subclass_of(class_class()) {
        myriad_mem::host_arena().alloc_zeroed(size, INSTANCE_ALIGNMENT)?
    } else {
        buffer::alloc_bytes(size)?
    };
    let object = ptr.cast::<ObjectHeader>();
    // SAFETY: fresh zeroed storage of `size` bytes; writing the header makes
    // it a valid instance of `class`.
    unsafe {
        (*object.as_ptr()).class = class.as_ptr();
        Ok(Object::from_raw(object))
    }
}

/// Releases storage from `allocate_instance` whose constructor failed,
/// together with any buffers the constructors that did run allocated.
/// Arena storage is never reclaimed.
pub(crate) fn release_failed(object: Object) {
    let class = object.class();
    if class.is_subclass_of(class_class()) {
        return;
    }
    release_buffers(object, class);
    // SAFETY: allocated by `buffer::alloc_bytes` with the class size.
    unsafe { buffer::free_bytes(object.as_ptr().cast(), class.instance_size()) };
}

//! Allocation and dispatch of the base virtual operations.
//!
//! Every operation is looked up through the receiver's own class, never
//! through a class named by the caller, so overrides always apply. The
//! `super_*` variants take the class whose implementation is currently
//! running and call its superclass's implementation; this is how an
//! override chains to the behaviour it refines.
//!
//! # Construction
//!
//! 1. [`new`] allocates zeroed storage of the class's instance size and
//!    writes the header
//! 2. the class's `construct` slot runs with the typed configuration
//! 3. each constructor calls [`super_construct`] first, handing over the
//!    embedded base configuration, then initializes its own fields
//!
//! # Example
//!
//! ```rust
//! use myriad::runtime::{ClassInit, ObjectHeader, dispatch, object_class};
//!
//! #[repr(C)]
//! struct Counter {
//!     header: ObjectHeader,
//!     value: u64,
//! }
//!
//! let counter = ClassInit::new("DocCounter", object_class(), size_of::<Counter>())
//!     .register()
//!     .unwrap();
//!
//! let object = dispatch::new(counter, &()).unwrap();
//! assert_eq!(object.class(), counter);
//! assert_eq!(unsafe { object.data::<Counter>() }.value, 0);
//! dispatch::destruct(object).unwrap();
//! ```

use crate::error::{Error, Result};
use crate::runtime::bootstrap::{self, class_class};
use crate::runtime::class::Class;
use crate::runtime::device::{Device, DevicePtr};
use crate::runtime::mirror::Staging;
use crate::runtime::object::Object;
use myriad_log::trace;
use std::any::Any;

fn missing(class: Class, operation: &'static str) -> Error {
    Error::MissingMethod {
        class: class.name(),
        operation,
    }
}

/// Allocates an instance of `class` and runs its constructor chain.
///
/// Storage is released again if a constructor fails.
///
/// # Errors
///
/// [`Error::OutOfMemory`] if allocation fails, or the first error returned
/// by a constructor in the chain.
pub fn new(class: Class, init: &dyn Any) -> Result<Object> {
    let object = bootstrap::allocate_instance(class)?;
    trace!("new {} ({} bytes)", class.name(), class.instance_size());
    if let Err(err) = construct(object, init) {
        bootstrap::release_failed(object);
        return Err(err);
    }
    Ok(object)
}

/// Runs `object`'s constructor.
///
/// # Errors
///
/// [`Error::MissingMethod`] if the slot is empty, or the constructor's
/// error.
pub fn construct(object: Object, init: &dyn Any) -> Result<()> {
    let class = object.class();
    let imp = class.methods().construct.ok_or_else(|| missing(class, "construct"))?;
    imp(object, init)
}

/// Runs the superclass constructor of `class` on `object`.
///
/// # Errors
///
/// As for [`construct`].
pub fn super_construct(class: Class, object: Object, init: &dyn Any) -> Result<()> {
    let parent = class.super_class()?;
    let imp = parent.methods().construct.ok_or_else(|| missing(parent, "construct"))?;
    imp(object, init)
}

/// Destroys `object` through its destructor. The handle must not be used
/// afterwards.
///
/// # Errors
///
/// [`Error::ClassDestruction`] for class descriptors, or
/// [`Error::MissingMethod`] if the slot is empty.
pub fn destruct(object: Object) -> Result<()> {
    let class = object.class();
    let imp = class.methods().destruct.ok_or_else(|| missing(class, "destruct"))?;
    imp(object)
}

/// Runs the superclass destructor of `class` on `object`.
///
/// # Errors
///
/// As for [`destruct`].
pub fn super_destruct(class: Class, object: Object) -> Result<()> {
    let parent = class.super_class()?;
    let imp = parent.methods().destruct.ok_or_else(|| missing(parent, "destruct"))?;
    imp(object)
}

/// Writes a device copy of `object` and returns its address.
///
/// For a class descriptor this does not record the mirror on the class; use
/// [`Class::mirror`] for the guarded, once-per-process entry point.
///
/// # Errors
///
/// - [`Error::ClassNotMirrored`] if `object` is an instance whose class has
///   no device mirror (checked before anything is allocated)
/// - [`Error::MissingMethod`] if the mirror slot is empty
/// - the mirror implementation's error, or any device failure
pub fn mirror_to_device(object: Object, device: &dyn Device, clobber: bool) -> Result<DevicePtr> {
    let class = object.class();
    if !class.is_subclass_of(class_class()) && class.device_class().is_none() {
        return Err(Error::ClassNotMirrored { class: class.name() });
    }
    let imp = class.methods().mirror.ok_or_else(|| missing(class, "mirror"))?;

    let target = device.alloc(object.size())?;
    let mut staging = Staging::copy_of(object, target);
    imp(object, &mut staging, device, clobber)?;
    device.copy_to_device(target, staging.as_bytes())?;
    trace!("mirrored {} instance to {target}", class.name());
    Ok(target)
}

/// Runs the superclass mirror implementation of `class` on a working copy.
///
/// # Errors
///
/// [`Error::MissingMethod`] if the superclass has no mirror implementation,
/// or that implementation's error.
pub fn super_mirror(
    class: Class,
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
    clobber: bool,
) -> Result<()> {
    let parent = class.super_class()?;
    let imp = parent.methods().mirror.ok_or_else(|| missing(parent, "mirror"))?;
    imp(object, staging, device, clobber)
}

/// Reconciles `object` from its device copy at `mirror`.
///
/// # Errors
///
/// [`Error::MissingMethod`] if the slot is empty, or any device failure.
pub fn update_from_device(object: Object, device: &dyn Device, mirror: DevicePtr) -> Result<()> {
    let class = object.class();
    let imp = class
        .methods()
        .update_from_device
        .ok_or_else(|| missing(class, "update_from_device"))?;
    imp(object, device, mirror)
}

/// Runs the superclass update implementation of `class`.
///
/// # Errors
///
/// As for [`update_from_device`].
pub fn super_update_from_device(
    class: Class,
    object: Object,
    device: &dyn Device,
    mirror: DevicePtr,
) -> Result<()> {
    let parent = class.super_class()?;
    let imp = parent
        .methods()
        .update_from_device
        .ok_or_else(|| missing(parent, "update_from_device"))?;
    imp(object, device, mirror)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bootstrap::object_class;
    use crate::runtime::class::{ClassInit, ConstructFn, Method, ObjectMethods};
    use crate::runtime::device::SimDevice;
    use crate::runtime::object::ObjectHeader;

    #[repr(C)]
    struct Cell {
        header: ObjectHeader,
        value: u64,
    }

    fn failing_construct(_object: Object, _init: &dyn Any) -> Result<()> {
        Err(Error::StepOutOfRange { step: 9, len: 0 })
    }

    #[test]
    fn test_new_sets_class_and_zeroes() {
        let class = ClassInit::new("DispatchTestCell", object_class(), size_of::<Cell>())
            .register()
            .unwrap();
        let object = new(class, &()).unwrap();
        assert_eq!(object.class(), class);
        assert_eq!(object.size(), size_of::<Cell>());
        assert_eq!(unsafe { object.data::<Cell>() }.value, 0);
        destruct(object).unwrap();
    }

    #[test]
    fn test_failing_constructor_propagates() {
        let methods = ObjectMethods {
            construct: Some(Method::new(
                "dispatch_test_failing_construct",
                failing_construct as ConstructFn,
            )),
            ..ObjectMethods::default()
        };
        let class = ClassInit::new("DispatchTestFailing", object_class(), 16)
            .with_methods(methods)
            .register()
            .unwrap();
        assert_eq!(
            new(class, &()).unwrap_err(),
            Error::StepOutOfRange { step: 9, len: 0 }
        );
    }

    #[test]
    fn test_instance_mirror_needs_class_mirror() {
        let class = ClassInit::new("DispatchTestUnmirrored", object_class(), 16)
            .register()
            .unwrap();
        let object = new(class, &()).unwrap();
        let device = SimDevice::default();

        assert_eq!(
            mirror_to_device(object, &device, true),
            Err(Error::ClassNotMirrored {
                class: "DispatchTestUnmirrored"
            })
        );
        assert_eq!(device.memory().stats().allocations, 0);
        destruct(object).unwrap();
    }

    #[test]
    fn test_super_of_root_object_is_itself() {
        let object = new(
            ClassInit::new("DispatchTestSuper", object_class(), 16)
                .register()
                .unwrap(),
            &(),
        )
        .unwrap();
        super_construct(object_class(), object, &()).unwrap();
        destruct(object).unwrap();
    }
}

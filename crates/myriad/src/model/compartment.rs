//! Compartments.
//!
//! `CompartmentClass` is a metaclass: its instances are class descriptors
//! extended with two virtual operations, `simulate` and `add_mechanism`.
//! `Compartment` is the base class built from it; concrete compartments such
//! as [`crate::model::soma`] derive from `Compartment` and override the
//! operations through [`CompartmentMethods`].

use crate::error::{Error, Result};
use crate::model::StepContext;
use crate::runtime::class::ClassDescriptor;
use crate::runtime::{
    Class, ClassCell, ClassInit, ConstructFn, Device, Method, MirrorFn, Object, ObjectHeader,
    ObjectMethods, Staging, class_class, class_fixup, dispatch, object_class, symbol,
};
use myriad_log::trace;
use std::any::Any;
use std::mem::offset_of;

/// Capacity of a compartment's mechanism list.
pub const MAX_MECHANISMS: usize = 16;

/// Symbols of the device-compiled compartment operations.
pub const DEVICE_FUNCTIONS: &[&str] = &["compartment_simulate", "compartment_add_mechanism"];

/// Advances a compartment by one step.
pub type SimulateFn = fn(Object, &StepContext<'_>) -> Result<()>;

/// Attaches a mechanism to a compartment.
pub type AddMechanismFn = fn(Object, Object) -> Result<()>;

/// Descriptor layout of classes whose metaclass is `CompartmentClass`.
#[repr(C)]
pub struct CompartmentClassDescriptor {
    /// Base descriptor.
    pub class: ClassDescriptor,
    /// `simulate` slot.
    pub simulate: Option<SimulateFn>,
    /// `add_mechanism` slot.
    pub add_mechanism: Option<AddMechanismFn>,
}

/// Instance layout of `Compartment`.
#[repr(C)]
pub struct CompartmentData {
    /// Object header.
    pub header: ObjectHeader,
    /// Compartment identifier; also its index in the network.
    pub id: u64,
    /// Number of attached mechanisms.
    pub num_mechanisms: u64,
    /// Attached mechanisms. Not owned: mechanisms may be shared.
    pub mechanisms: [Option<Object>; MAX_MECHANISMS],
}

/// Overrides for the compartment operations; `None` inherits.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompartmentMethods {
    /// `simulate` override.
    pub simulate: Option<Method<SimulateFn>>,
    /// `add_mechanism` override.
    pub add_mechanism: Option<Method<AddMechanismFn>>,
}

/// Configuration for classes built from `CompartmentClass`.
#[derive(Debug, Clone, Copy)]
pub struct CompartmentClassInit {
    /// Base class configuration.
    pub class: ClassInit,
    /// Compartment operation overrides.
    pub methods: CompartmentMethods,
}

/// Configuration for `Compartment` instances.
#[derive(Debug, Clone, Default)]
pub struct CompartmentInit {
    /// Compartment identifier.
    pub id: u64,
    /// Mechanisms to attach at construction.
    pub mechanisms: Vec<Object>,
}

static COMPARTMENT_CLASS: ClassCell = ClassCell::new();
static COMPARTMENT: ClassCell = ClassCell::new();

/// The `CompartmentClass` metaclass.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_compartment_class() -> Result<Class> {
    COMPARTMENT_CLASS.get_or_try_init(|| {
        ClassInit::new(
            "CompartmentClass",
            class_class(),
            size_of::<CompartmentClassDescriptor>(),
        )
        .with_methods(ObjectMethods {
            construct: Some(Method::new(
                "compartment_class_construct",
                compartment_class_construct as ConstructFn,
            )),
            mirror: Some(Method::new(
                "compartment_class_mirror",
                compartment_class_mirror as MirrorFn,
            )),
            ..ObjectMethods::default()
        })
        .register()
    })
}

/// The `Compartment` class.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_compartment() -> Result<Class> {
    COMPARTMENT.get_or_try_init(|| {
        let init = CompartmentClassInit {
            class: ClassInit::new("Compartment", object_class(), size_of::<CompartmentData>())
                .with_methods(ObjectMethods {
                    construct: Some(Method::new(
                        "compartment_construct",
                        compartment_construct as ConstructFn,
                    )),
                    ..ObjectMethods::default()
                }),
            methods: CompartmentMethods {
                simulate: Some(Method::new(
                    "compartment_simulate",
                    compartment_simulate as SimulateFn,
                )),
                add_mechanism: Some(Method::new(
                    "compartment_add_mechanism",
                    compartment_add_mechanism as AddMechanismFn,
                )),
            },
        };
        Class::define(init_compartment_class()?, &init)
    })
}

fn compartment_class_construct(object: Object, init: &dyn Any) -> Result<()> {
    let init = init
        .downcast_ref::<CompartmentClassInit>()
        .ok_or(Error::InitArgsMismatch {
            class: object.class().name(),
            expected: std::any::type_name::<CompartmentClassInit>(),
        })?;
    dispatch::super_construct(init_compartment_class()?, object, &init.class)?;

    let class = Class::from_object(object)?;
    // SAFETY: checks the descriptor is large enough for the layout.
    unsafe { class.extension::<CompartmentClassDescriptor>() }?;
    // SAFETY: size checked above; the constructor has exclusive access.
    let descriptor = unsafe { object.data_mut::<CompartmentClassDescriptor>() };
    symbol::bind(&mut descriptor.simulate, init.methods.simulate);
    symbol::bind(&mut descriptor.add_mechanism, init.methods.add_mechanism);
    Ok(())
}

/// Device fixup for the slots `CompartmentClass` introduces, followed by
/// the base class fixup.
///
/// # Errors
///
/// See [`symbol::translate_slot`] and [`class_fixup`].
pub fn compartment_class_fixup(
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
) -> Result<()> {
    symbol::translate_slot(
        staging,
        offset_of!(CompartmentClassDescriptor, simulate),
        device,
    )?;
    symbol::translate_slot(
        staging,
        offset_of!(CompartmentClassDescriptor, add_mechanism),
        device,
    )?;
    class_fixup(object, staging, device)
}

fn compartment_class_mirror(
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
    clobber: bool,
) -> Result<()> {
    if clobber {
        compartment_class_fixup(object, staging, device)?;
    }
    dispatch::super_mirror(init_compartment_class()?, object, staging, device, false)
}

fn compartment_construct(object: Object, init: &dyn Any) -> Result<()> {
    dispatch::super_construct(init_compartment()?, object, init)?;
    let init = init
        .downcast_ref::<CompartmentInit>()
        .ok_or(Error::InitArgsMismatch {
            class: object.class().name(),
            expected: std::any::type_name::<CompartmentInit>(),
        })?;

    // SAFETY: instances of Compartment start with CompartmentData.
    unsafe { object.data_mut::<CompartmentData>() }.id = init.id;
    for &mechanism in &init.mechanisms {
        add_mechanism(object, mechanism)?;
    }
    Ok(())
}

fn compartment_simulate(object: Object, ctx: &StepContext<'_>) -> Result<()> {
    trace!("compartment {} step {}: nothing to integrate", object.class(), ctx.step);
    Ok(())
}

fn compartment_add_mechanism(object: Object, mechanism: Object) -> Result<()> {
    // SAFETY: instances of Compartment start with CompartmentData.
    let data = unsafe { object.data_mut::<CompartmentData>() };
    let count = data.num_mechanisms as usize;
    if count >= MAX_MECHANISMS {
        return Err(Error::CompartmentFull {
            id: data.id,
            capacity: MAX_MECHANISMS,
        });
    }
    data.mechanisms[count] = Some(mechanism);
    data.num_mechanisms += 1;
    Ok(())
}

/// Compartment slots of `class`, which must be built from `CompartmentClass`.
fn compartment_methods(class: Class) -> Result<&'static CompartmentClassDescriptor> {
    if !class.as_object().is_instance_of(init_compartment_class()?) {
        return Err(Error::NotAnInstance {
            expected: "CompartmentClass",
            class: class.name(),
        });
    }
    // SAFETY: instances of CompartmentClass have this descriptor layout.
    unsafe { class.extension::<CompartmentClassDescriptor>() }
}

/// Advances `compartment` by one step through its `simulate` slot.
///
/// # Errors
///
/// [`Error::NotAnInstance`] for objects that are not compartments,
/// [`Error::MissingMethod`] for an empty slot, or the implementation's error.
pub fn simulate(compartment: Object, ctx: &StepContext<'_>) -> Result<()> {
    let class = compartment.class();
    let imp = compartment_methods(class)?
        .simulate
        .ok_or(Error::MissingMethod {
            class: class.name(),
            operation: "simulate",
        })?;
    imp(compartment, ctx)
}

/// Runs the superclass `simulate` of `class`.
///
/// # Errors
///
/// As for [`simulate`].
pub fn super_simulate(class: Class, compartment: Object, ctx: &StepContext<'_>) -> Result<()> {
    let parent = class.super_class()?;
    let imp = compartment_methods(parent)?
        .simulate
        .ok_or(Error::MissingMethod {
            class: parent.name(),
            operation: "simulate",
        })?;
    imp(compartment, ctx)
}

/// Attaches `mechanism` through the compartment's `add_mechanism` slot.
///
/// # Errors
///
/// [`Error::CompartmentFull`] when the list is full, plus the dispatch
/// errors of [`simulate`].
pub fn add_mechanism(compartment: Object, mechanism: Object) -> Result<()> {
    let class = compartment.class();
    let imp = compartment_methods(class)?
        .add_mechanism
        .ok_or(Error::MissingMethod {
            class: class.name(),
            operation: "add_mechanism",
        })?;
    imp(compartment, mechanism)
}

/// Runs the superclass `add_mechanism` of `class`.
///
/// # Errors
///
/// As for [`add_mechanism`].
pub fn super_add_mechanism(class: Class, compartment: Object, mechanism: Object) -> Result<()> {
    let parent = class.super_class()?;
    let imp = compartment_methods(parent)?
        .add_mechanism
        .ok_or(Error::MissingMethod {
            class: parent.name(),
            operation: "add_mechanism",
        })?;
    imp(compartment, mechanism)
}

/// Typed handle to an instance of `Compartment` or a subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Compartment(Object);

impl Compartment {
    /// Builds an instance of `class` from a configuration whose innermost
    /// part is a [`CompartmentInit`].
    ///
    /// # Errors
    ///
    /// [`Error::NotAnInstance`] if `class` is not a compartment class, or
    /// any constructor error.
    pub fn new(class: Class, init: &dyn Any) -> Result<Self> {
        if !class.is_subclass_of(init_compartment()?) {
            return Err(Error::NotAnInstance {
                expected: "Compartment",
                class: class.name(),
            });
        }
        dispatch::new(class, init).map(Compartment)
    }

    /// Views `object` as a compartment.
    ///
    /// # Errors
    ///
    /// [`Error::NotAnInstance`] if it is not one.
    pub fn from_object(object: Object) -> Result<Self> {
        if !object.is_instance_of(init_compartment()?) {
            return Err(Error::NotAnInstance {
                expected: "Compartment",
                class: object.class().name(),
            });
        }
        Ok(Compartment(object))
    }

    /// The underlying object.
    #[must_use]
    pub fn object(self) -> Object {
        self.0
    }

    fn data(&self) -> &CompartmentData {
        // SAFETY: checked to be a Compartment on construction of the handle.
        unsafe { self.0.data::<CompartmentData>() }
    }

    /// Compartment identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.data().id
    }

    /// Attached mechanisms, in attachment order.
    #[must_use]
    pub fn mechanisms(self) -> Vec<Object> {
        let data = self.data();
        data.mechanisms[..data.num_mechanisms as usize]
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// See [`add_mechanism`].
    ///
    /// # Errors
    ///
    /// As for [`add_mechanism`].
    pub fn add_mechanism(self, mechanism: Object) -> Result<()> {
        add_mechanism(self.0, mechanism)
    }

    /// See [`simulate`].
    ///
    /// # Errors
    ///
    /// As for [`simulate`].
    pub fn simulate(self, ctx: &StepContext<'_>) -> Result<()> {
        simulate(self.0, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metaclass_layout() {
        let meta = init_compartment_class().unwrap();
        assert_eq!(meta.super_class().unwrap(), class_class());
        assert_eq!(meta.instance_size(), size_of::<CompartmentClassDescriptor>());

        let compartment = init_compartment().unwrap();
        assert!(compartment.as_object().is_a(meta));
        assert_eq!(compartment.super_class().unwrap(), object_class());
        assert_eq!(compartment.instance_size(), size_of::<CompartmentData>());
    }

    #[test]
    fn test_init_is_idempotent() {
        assert_eq!(init_compartment().unwrap(), init_compartment().unwrap());
        assert_eq!(
            init_compartment_class().unwrap(),
            init_compartment_class().unwrap()
        );
    }

    #[test]
    fn test_undersized_metaclass_can_be_retried() {
        let narrow = ClassInit::new(
            "CompartmentTestNarrowMeta",
            init_compartment_class().unwrap(),
            size_of::<ClassDescriptor>(),
        )
        .register()
        .unwrap();
        let init = CompartmentClassInit {
            class: ClassInit::new(
                "CompartmentTestRetried",
                object_class(),
                size_of::<CompartmentData>(),
            ),
            methods: CompartmentMethods::default(),
        };

        assert!(matches!(
            Class::define(narrow, &init),
            Err(Error::DescriptorTooSmall { class: "CompartmentTestRetried", .. })
        ));
        assert_eq!(crate::runtime::class_from_name("CompartmentTestRetried"), None);

        let class = Class::define(init_compartment_class().unwrap(), &init).unwrap();
        assert_eq!(
            crate::runtime::class_from_name("CompartmentTestRetried"),
            Some(class)
        );
    }

    #[test]
    fn test_capacity_limit() {
        let class = init_compartment().unwrap();
        let compartment = Compartment::new(
            class,
            &CompartmentInit {
                id: 4,
                mechanisms: Vec::new(),
            },
        )
        .unwrap();

        let filler = dispatch::new(
            ClassInit::new("CompartmentTestFiller", object_class(), 16)
                .register()
                .unwrap(),
            &(),
        )
        .unwrap();
        for _ in 0..MAX_MECHANISMS {
            compartment.add_mechanism(filler).unwrap();
        }
        assert_eq!(
            compartment.add_mechanism(filler),
            Err(Error::CompartmentFull {
                id: 4,
                capacity: MAX_MECHANISMS
            })
        );
        assert_eq!(compartment.mechanisms().len(), MAX_MECHANISMS);

        dispatch::destruct(compartment.object()).unwrap();
        dispatch::destruct(filler).unwrap();
    }

    #[test]
    fn test_non_compartment_rejected() {
        let plain = dispatch::new(
            ClassInit::new("CompartmentTestPlain", object_class(), 16)
                .register()
                .unwrap(),
            &(),
        )
        .unwrap();
        let ctx = StepContext::new(&[], 0.1, 1);
        assert!(matches!(
            simulate(plain, &ctx),
            Err(Error::NotAnInstance {
                expected: "CompartmentClass",
                ..
            })
        ));
        assert!(Compartment::from_object(plain).is_err());
        dispatch::destruct(plain).unwrap();
    }
}

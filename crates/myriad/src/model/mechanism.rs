//! Mechanisms: per-step current sources attached to compartments.
//!
//! `MechanismClass` extends class descriptors with one virtual operation,
//! the mechanism function, which computes the current a mechanism injects
//! into its post-synaptic compartment for the current step. Every concrete
//! mechanism is a class built from `MechanismClass` that derives from
//! `Mechanism`.

use crate::error::{Error, Result};
use crate::model::StepContext;
use crate::runtime::class::ClassDescriptor;
use crate::runtime::{
    Class, ClassCell, ClassInit, ConstructFn, Device, Method, MirrorFn, Object, ObjectHeader,
    ObjectMethods, Staging, class_class, class_fixup, dispatch, object_class, symbol,
};
use std::any::Any;
use std::mem::offset_of;

/// Symbols of the device-compiled mechanism operations.
pub const DEVICE_FUNCTIONS: &[&str] = &["mechanism_fxn"];

/// Current injected by `mechanism` into `post`, driven by `pre`.
pub type MechanismFn = fn(Object, Object, Object, &StepContext<'_>) -> Result<f64>;

/// Descriptor layout of classes whose metaclass is `MechanismClass`.
#[repr(C)]
pub struct MechanismClassDescriptor {
    /// Base descriptor.
    pub class: ClassDescriptor,
    /// Mechanism function slot.
    pub mechanism_fn: Option<MechanismFn>,
}

/// Instance layout of `Mechanism`.
#[repr(C)]
pub struct MechanismData {
    /// Object header.
    pub header: ObjectHeader,
    /// Network index of the pre-synaptic compartment.
    pub source_id: u64,
}

/// Overrides for the mechanism operations; `None` inherits.
#[derive(Debug, Clone, Copy, Default)]
pub struct MechanismMethods {
    /// Mechanism function override.
    pub mechanism_fn: Option<Method<MechanismFn>>,
}

/// Configuration for classes built from `MechanismClass`.
#[derive(Debug, Clone, Copy)]
pub struct MechanismClassInit {
    /// Base class configuration.
    pub class: ClassInit,
    /// Mechanism operation overrides.
    pub methods: MechanismMethods,
}

/// Configuration for `Mechanism` instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct MechanismInit {
    /// Network index of the pre-synaptic compartment.
    pub source_id: u64,
}

static MECHANISM_CLASS: ClassCell = ClassCell::new();
static MECHANISM: ClassCell = ClassCell::new();

/// The `MechanismClass` metaclass.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_mechanism_class() -> Result<Class> {
    MECHANISM_CLASS.get_or_try_init(|| {
        ClassInit::new(
            "MechanismClass",
            class_class(),
            size_of::<MechanismClassDescriptor>(),
        )
        .with_methods(ObjectMethods {
            construct: Some(Method::new(
                "mechanism_class_construct",
                mechanism_class_construct as ConstructFn,
            )),
            mirror: Some(Method::new(
                "mechanism_class_mirror",
                mechanism_class_mirror as MirrorFn,
            )),
            ..ObjectMethods::default()
        })
        .register()
    })
}

/// The `Mechanism` class.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_mechanism() -> Result<Class> {
    MECHANISM.get_or_try_init(|| {
        let init = MechanismClassInit {
            class: ClassInit::new("Mechanism", object_class(), size_of::<MechanismData>())
                .with_methods(ObjectMethods {
                    construct: Some(Method::new(
                        "mechanism_construct",
                        mechanism_construct as ConstructFn,
                    )),
                    ..ObjectMethods::default()
                }),
            methods: MechanismMethods {
                mechanism_fn: Some(Method::new("mechanism_fxn", no_current as MechanismFn)),
            },
        };
        Class::define(init_mechanism_class()?, &init)
    })
}

/// Registers a concrete mechanism class deriving from `Mechanism`.
///
/// # Errors
///
/// Registration failures.
pub fn define_mechanism(class: ClassInit, methods: MechanismMethods) -> Result<Class> {
    Class::define(init_mechanism_class()?, &MechanismClassInit { class, methods })
}

fn mechanism_class_construct(object: Object, init: &dyn Any) -> Result<()> {
    let init = init
        .downcast_ref::<MechanismClassInit>()
        .ok_or(Error::InitArgsMismatch {
            class: object.class().name(),
            expected: std::any::type_name::<MechanismClassInit>(),
        })?;
    dispatch::super_construct(init_mechanism_class()?, object, &init.class)?;

    // SAFETY: checks the descriptor is large enough for the layout.
    unsafe { Class::from_object(object)?.extension::<MechanismClassDescriptor>() }?;
    // SAFETY: size checked above; the constructor has exclusive access.
    let descriptor = unsafe { object.data_mut::<MechanismClassDescriptor>() };
    symbol::bind(&mut descriptor.mechanism_fn, init.methods.mechanism_fn);
    Ok(())
}

/// Device fixup for the mechanism function slot, followed by the base
/// class fixup.
///
/// # Errors
///
/// See [`symbol::translate_slot`] and [`class_fixup`].
pub fn mechanism_class_fixup(
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
) -> Result<()> {
    symbol::translate_slot(
        staging,
        offset_of!(MechanismClassDescriptor, mechanism_fn),
        device,
    )?;
    class_fixup(object, staging, device)
}

fn mechanism_class_mirror(
    object: Object,
    staging: &mut Staging,
    device: &dyn Device,
    clobber: bool,
) -> Result<()> {
    if clobber {
        mechanism_class_fixup(object, staging, device)?;
    }
    dispatch::super_mirror(init_mechanism_class()?, object, staging, device, false)
}

fn mechanism_construct(object: Object, init: &dyn Any) -> Result<()> {
    dispatch::super_construct(init_mechanism()?, object, init)?;
    let init = init
        .downcast_ref::<MechanismInit>()
        .ok_or(Error::InitArgsMismatch {
            class: object.class().name(),
            expected: std::any::type_name::<MechanismInit>(),
        })?;
    // SAFETY: instances of Mechanism start with MechanismData.
    unsafe { object.data_mut::<MechanismData>() }.source_id = init.source_id;
    Ok(())
}

fn no_current(_mechanism: Object, _pre: Object, _post: Object, _ctx: &StepContext<'_>) -> Result<f64> {
    Ok(0.0)
}

fn mechanism_methods(class: Class) -> Result<&'static MechanismClassDescriptor> {
    if !class.as_object().is_instance_of(init_mechanism_class()?) {
        return Err(Error::NotAnInstance {
            expected: "MechanismClass",
            class: class.name(),
        });
    }
    // SAFETY: instances of MechanismClass have this descriptor layout.
    unsafe { class.extension::<MechanismClassDescriptor>() }
}

/// Computes the current `mechanism` injects into `post`.
///
/// # Errors
///
/// [`Error::NotAnInstance`] for objects that are not mechanisms, or the
/// implementation's error.
pub fn mechanism_fn(
    mechanism: Object,
    pre: Object,
    post: Object,
    ctx: &StepContext<'_>,
) -> Result<f64> {
    let class = mechanism.class();
    let imp = mechanism_methods(class)?
        .mechanism_fn
        .ok_or(Error::MissingMethod {
            class: class.name(),
            operation: "mechanism_fn",
        })?;
    imp(mechanism, pre, post, ctx)
}

/// Runs the superclass mechanism function of `class`.
///
/// # Errors
///
/// As for [`mechanism_fn`].
pub fn super_mechanism_fn(
    class: Class,
    mechanism: Object,
    pre: Object,
    post: Object,
    ctx: &StepContext<'_>,
) -> Result<f64> {
    let parent = class.super_class()?;
    let imp = mechanism_methods(parent)?
        .mechanism_fn
        .ok_or(Error::MissingMethod {
            class: parent.name(),
            operation: "mechanism_fn",
        })?;
    imp(mechanism, pre, post, ctx)
}

/// Network index of `mechanism`'s pre-synaptic compartment.
///
/// # Errors
///
/// [`Error::NotAnInstance`] for objects that are not mechanisms.
pub fn source_id(mechanism: Object) -> Result<u64> {
    if !mechanism.is_instance_of(init_mechanism()?) {
        return Err(Error::NotAnInstance {
            expected: "Mechanism",
            class: mechanism.class().name(),
        });
    }
    // SAFETY: instances of Mechanism start with MechanismData.
    Ok(unsafe { mechanism.data::<MechanismData>() }.source_id)
}

/// Step whose state a mechanism reads when computing `ctx.step`.
pub(crate) fn previous_step(ctx: &StepContext<'_>) -> Result<usize> {
    ctx.step
        .checked_sub(1)
        .ok_or(Error::StepOutOfRange { step: 0, len: 0 })
}

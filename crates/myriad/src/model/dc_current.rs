//! Constant current injection over a window of steps.

use crate::error::{Error, Result};
use crate::model::StepContext;
use crate::model::mechanism::{
    MechanismData, MechanismFn, MechanismInit, MechanismMethods, define_mechanism,
    init_mechanism,
};
use crate::runtime::{Class, ClassCell, ClassInit, ConstructFn, Method, Object, ObjectMethods, dispatch};
use std::any::Any;

/// Symbols of the device-compiled DC current operations.
pub const DEVICE_FUNCTIONS: &[&str] = &["dc_current_mech_fxn"];

/// Instance layout of `DcCurrentMechanism`.
#[repr(C)]
pub struct DcCurrentMechanism {
    /// Base mechanism.
    pub base: MechanismData,
    /// First step with current flowing.
    pub t_start: u64,
    /// First step after the current stops.
    pub t_stop: u64,
    /// Current amplitude, nA.
    pub amplitude: f64,
}

/// Configuration for `DcCurrentMechanism` instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcCurrentInit {
    /// Base mechanism configuration.
    pub mechanism: MechanismInit,
    /// First step with current flowing.
    pub t_start: u64,
    /// First step after the current stops.
    pub t_stop: u64,
    /// Current amplitude.
    pub amplitude: f64,
}

static DC_CURRENT: ClassCell = ClassCell::new();

/// The `DcCurrentMechanism` class.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_dc_current() -> Result<Class> {
    DC_CURRENT.get_or_try_init(|| {
        define_mechanism(
            ClassInit::new(
                "DcCurrentMechanism",
                init_mechanism()?,
                size_of::<DcCurrentMechanism>(),
            )
            .with_methods(ObjectMethods {
                construct: Some(Method::new(
                    "dc_current_construct",
                    dc_current_construct as ConstructFn,
                )),
                ..ObjectMethods::default()
            }),
            MechanismMethods {
                mechanism_fn: Some(Method::new(
                    "dc_current_mech_fxn",
                    dc_current as MechanismFn,
                )),
            },
        )
    })
}

/// Builds a DC current mechanism.
///
/// # Errors
///
/// Registration or constructor failures.
pub fn new_dc_current(init: &DcCurrentInit) -> Result<Object> {
    dispatch::new(init_dc_current()?, init)
}

fn dc_current_construct(object: Object, init: &dyn Any) -> Result<()> {
    let init = init
        .downcast_ref::<DcCurrentInit>()
        .ok_or(Error::InitArgsMismatch {
            class: object.class().name(),
            expected: std::any::type_name::<DcCurrentInit>(),
        })?;
    dispatch::super_construct(init_dc_current()?, object, &init.mechanism)?;

    // SAFETY: instances of DcCurrentMechanism have this layout.
    let dc = unsafe { object.data_mut::<DcCurrentMechanism>() };
    dc.t_start = init.t_start;
    dc.t_stop = init.t_stop;
    dc.amplitude = init.amplitude;
    Ok(())
}

fn dc_current(
    mechanism: Object,
    _pre: Object,
    _post: Object,
    ctx: &StepContext<'_>,
) -> Result<f64> {
    // SAFETY: only bound on DcCurrentMechanism and its subclasses.
    let dc = unsafe { mechanism.data::<DcCurrentMechanism>() };
    let step = ctx.step as u64;
    if (dc.t_start..dc.t_stop).contains(&step) {
        Ok(dc.amplitude)
    } else {
        Ok(0.0)
    }
}

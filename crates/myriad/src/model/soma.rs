//! Somatic compartment with a membrane-potential trace.
//!
//! The trace `vm` holds one value per simulation step and is the
//! compartment's owned buffer: it is mirrored, copied back and released with
//! the instance.

use crate::error::{Error, Result};
use crate::model::compartment::{
    Compartment, CompartmentClassInit, CompartmentData, CompartmentInit, CompartmentMethods,
    SimulateFn, init_compartment, init_compartment_class,
};
use crate::model::{StepContext, mechanism};
use crate::runtime::{
    Class, ClassCell, ClassInit, ConstructFn, Method, Object, ObjectMethods, OwnedBuffer, buffer,
    dispatch,
};
use std::any::Any;
use std::mem::offset_of;

/// Symbols of the device-compiled soma operations.
pub const DEVICE_FUNCTIONS: &[&str] = &["soma_simulate"];

/// Instance layout of `SomaCompartment`.
#[repr(C)]
pub struct SomaCompartment {
    /// Base compartment.
    pub base: CompartmentData,
    /// Membrane potential per step, in mV.
    pub vm: *mut f64,
    /// Length of `vm`.
    pub vm_len: u64,
    /// Membrane capacitance.
    pub cm: f64,
}

impl SomaCompartment {
    /// The membrane-potential trace.
    #[must_use]
    pub fn vm(&self) -> &[f64] {
        if self.vm.is_null() {
            return &[];
        }
        // SAFETY: `vm` owns `vm_len` initialized values.
        unsafe { std::slice::from_raw_parts(self.vm, self.vm_len as usize) }
    }

    fn vm_mut(&mut self) -> &mut [f64] {
        if self.vm.is_null() {
            return &mut [];
        }
        // SAFETY: as above, with exclusive access through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.vm, self.vm_len as usize) }
    }
}

/// Configuration for `SomaCompartment` instances.
#[derive(Debug, Clone, Default)]
pub struct SomaInit {
    /// Base compartment configuration.
    pub compartment: CompartmentInit,
    /// Number of simulation steps; the length of `vm`.
    pub steps: usize,
    /// Resting potential, stored at step 0.
    pub vm0: f64,
    /// Membrane capacitance.
    pub cm: f64,
}

static SOMA_BUFFERS: [OwnedBuffer; 1] = [OwnedBuffer::of::<f64>(
    "vm",
    offset_of!(SomaCompartment, vm),
    offset_of!(SomaCompartment, vm_len),
)];

static SOMA: ClassCell = ClassCell::new();

/// The `SomaCompartment` class.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_soma() -> Result<Class> {
    SOMA.get_or_try_init(|| {
        let init = CompartmentClassInit {
            class: ClassInit::new(
                "SomaCompartment",
                init_compartment()?,
                size_of::<SomaCompartment>(),
            )
            .with_buffers(&SOMA_BUFFERS)
            .with_methods(ObjectMethods {
                construct: Some(Method::new("soma_construct", soma_construct as ConstructFn)),
                ..ObjectMethods::default()
            }),
            methods: CompartmentMethods {
                simulate: Some(Method::new("soma_simulate", soma_simulate as SimulateFn)),
                add_mechanism: None,
            },
        };
        Class::define(init_compartment_class()?, &init)
    })
}

/// Builds a soma compartment.
///
/// # Errors
///
/// Registration or constructor failures.
pub fn new_soma(init: &SomaInit) -> Result<Compartment> {
    Compartment::new(init_soma()?, init)
}

fn soma_construct(object: Object, init: &dyn Any) -> Result<()> {
    let init = init.downcast_ref::<SomaInit>().ok_or(Error::InitArgsMismatch {
        class: object.class().name(),
        expected: std::any::type_name::<SomaInit>(),
    })?;
    dispatch::super_construct(init_soma()?, object, &init.compartment)?;

    let vm = buffer::alloc_zeroed::<f64>(init.steps)?;
    // SAFETY: instances of SomaCompartment have this layout.
    let soma = unsafe { object.data_mut::<SomaCompartment>() };
    soma.vm = vm;
    soma.vm_len = init.steps as u64;
    soma.cm = init.cm;
    if let Some(first) = soma.vm_mut().first_mut() {
        *first = init.vm0;
    }
    Ok(())
}

/// Views `object` as a soma.
///
/// # Errors
///
/// [`Error::NotAnInstance`] if it is not one.
pub fn soma_data(object: Object) -> Result<&'static SomaCompartment> {
    if !object.is_instance_of(init_soma()?) {
        return Err(Error::NotAnInstance {
            expected: "SomaCompartment",
            class: object.class().name(),
        });
    }
    // SAFETY: checked above. Instances outlive the simulation steps that
    // read them.
    Ok(unsafe { &*object.as_ptr().cast::<SomaCompartment>() })
}

/// Membrane potential of the soma `object` at `step`.
///
/// # Errors
///
/// [`Error::NotAnInstance`] for non-soma objects and
/// [`Error::StepOutOfRange`] past the end of the trace.
pub fn membrane_potential(object: Object, step: usize) -> Result<f64> {
    let vm = soma_data(object)?.vm();
    vm.get(step).copied().ok_or(Error::StepOutOfRange {
        step,
        len: vm.len(),
    })
}

/// Forward-Euler update of the membrane potential from the summed
/// mechanism currents.
fn soma_simulate(object: Object, ctx: &StepContext<'_>) -> Result<()> {
    let len = soma_data(object)?.vm().len();
    if ctx.step == 0 || ctx.step >= len {
        return Err(Error::StepOutOfRange {
            step: ctx.step,
            len,
        });
    }

    let mut total = 0.0;
    for mech in Compartment::from_object(object)?.mechanisms() {
        let pre = ctx.compartment(mechanism::source_id(mech)?)?;
        total += mechanism::mechanism_fn(mech, pre, object, ctx)?;
    }

    // SAFETY: instances of SomaCompartment have this layout; no other
    // reference to this instance is live.
    let soma = unsafe { object.data_mut::<SomaCompartment>() };
    let cm = soma.cm;
    let vm = soma.vm_mut();
    vm[ctx.step] = vm[ctx.step - 1] + ctx.dt * total / cm;
    Ok(())
}

//! Graded GABA-A synapse.
//!
//! The synaptic gating variable `g_s` is integrated per step alongside the
//! membrane potentials and kept as an owned buffer, so it is mirrored with
//! the instance and copied back by `update_from_device`.

use crate::error::{Error, Result};
use crate::model::StepContext;
use crate::model::mechanism::{
    MechanismData, MechanismFn, MechanismInit, MechanismMethods, define_mechanism,
    init_mechanism, previous_step,
};
use crate::model::soma::membrane_potential;
use crate::runtime::{
    Class, ClassCell, ClassInit, ConstructFn, Method, Object, ObjectMethods, OwnedBuffer, buffer,
    dispatch,
};
use std::any::Any;
use std::mem::offset_of;

/// Symbols of the device-compiled GABA-A operations.
pub const DEVICE_FUNCTIONS: &[&str] = &["gaba_a_mech_fxn"];

/// Instance layout of `GradedGabaAMechanism`.
#[repr(C)]
pub struct GradedGabaAMechanism {
    /// Base mechanism.
    pub base: MechanismData,
    /// Gating variable per step.
    pub g_s: *mut f64,
    /// Length of `g_s`.
    pub g_s_len: u64,
    /// Maximum synaptic conductance, nS.
    pub g_max: f64,
    /// Half-activation presynaptic potential, mV.
    pub theta: f64,
    /// Slope of the activation curve, mV.
    pub sigma: f64,
    /// Channel opening rate.
    pub tau_alpha: f64,
    /// Channel closing rate.
    pub tau_beta: f64,
    /// Synaptic reversal potential, mV.
    pub gaba_rev: f64,
}

impl GradedGabaAMechanism {
    /// The gating-variable trace.
    #[must_use]
    pub fn g_s(&self) -> &[f64] {
        if self.g_s.is_null() {
            return &[];
        }
        // SAFETY: `g_s` owns `g_s_len` initialized values.
        unsafe { std::slice::from_raw_parts(self.g_s, self.g_s_len as usize) }
    }

    fn g_s_mut(&mut self) -> &mut [f64] {
        if self.g_s.is_null() {
            return &mut [];
        }
        // SAFETY: as above, with exclusive access through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.g_s, self.g_s_len as usize) }
    }
}

/// Configuration for `GradedGabaAMechanism` instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct GabaInit {
    /// Base mechanism configuration.
    pub mechanism: MechanismInit,
    /// Number of simulation steps; the length of `g_s`.
    pub steps: usize,
    /// Gating value at step 0.
    pub g_s0: f64,
    /// Maximum synaptic conductance.
    pub g_max: f64,
    /// Half-activation presynaptic potential.
    pub theta: f64,
    /// Slope of the activation curve.
    pub sigma: f64,
    /// Channel opening rate.
    pub tau_alpha: f64,
    /// Channel closing rate.
    pub tau_beta: f64,
    /// Synaptic reversal potential.
    pub gaba_rev: f64,
}

static GABA_BUFFERS: [OwnedBuffer; 1] = [OwnedBuffer::of::<f64>(
    "g_s",
    offset_of!(GradedGabaAMechanism, g_s),
    offset_of!(GradedGabaAMechanism, g_s_len),
)];

static GABA: ClassCell = ClassCell::new();

/// The `GradedGabaAMechanism` class.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_gaba() -> Result<Class> {
    GABA.get_or_try_init(|| {
        define_mechanism(
            ClassInit::new(
                "GradedGabaAMechanism",
                init_mechanism()?,
                size_of::<GradedGabaAMechanism>(),
            )
            .with_buffers(&GABA_BUFFERS)
            .with_methods(ObjectMethods {
                construct: Some(Method::new("gaba_a_construct", gaba_construct as ConstructFn)),
                ..ObjectMethods::default()
            }),
            MechanismMethods {
                mechanism_fn: Some(Method::new("gaba_a_mech_fxn", gaba_current as MechanismFn)),
            },
        )
    })
}

/// Builds a graded GABA-A mechanism.
///
/// # Errors
///
/// Registration or constructor failures.
pub fn new_gaba(init: &GabaInit) -> Result<Object> {
    dispatch::new(init_gaba()?, init)
}

fn gaba_construct(object: Object, init: &dyn Any) -> Result<()> {
    let init = init.downcast_ref::<GabaInit>().ok_or(Error::InitArgsMismatch {
        class: object.class().name(),
        expected: std::any::type_name::<GabaInit>(),
    })?;
    dispatch::super_construct(init_gaba()?, object, &init.mechanism)?;

    let g_s = buffer::alloc_zeroed::<f64>(init.steps)?;
    // SAFETY: instances of GradedGabaAMechanism have this layout.
    let gaba = unsafe { object.data_mut::<GradedGabaAMechanism>() };
    gaba.g_s = g_s;
    gaba.g_s_len = init.steps as u64;
    gaba.g_max = init.g_max;
    gaba.theta = init.theta;
    gaba.sigma = init.sigma;
    gaba.tau_alpha = init.tau_alpha;
    gaba.tau_beta = init.tau_beta;
    gaba.gaba_rev = init.gaba_rev;
    if let Some(first) = gaba.g_s_mut().first_mut() {
        *first = init.g_s0;
    }
    Ok(())
}

/// Views `object` as a graded GABA-A mechanism.
///
/// # Errors
///
/// [`Error::NotAnInstance`] if it is not one.
pub fn gaba_data(object: Object) -> Result<&'static GradedGabaAMechanism> {
    if !object.is_instance_of(init_gaba()?) {
        return Err(Error::NotAnInstance {
            expected: "GradedGabaAMechanism",
            class: object.class().name(),
        });
    }
    // SAFETY: checked above. Instances outlive the simulation steps that
    // read them.
    Ok(unsafe { &*object.as_ptr().cast::<GradedGabaAMechanism>() })
}

/// Advances `g_s` to `ctx.step` and returns the synaptic current computed
/// from the previous step's state.
fn gaba_current(
    mechanism: Object,
    pre: Object,
    post: Object,
    ctx: &StepContext<'_>,
) -> Result<f64> {
    let prev = previous_step(ctx)?;
    let pre_vm = membrane_potential(pre, prev)?;
    let post_vm = membrane_potential(post, prev)?;

    // SAFETY: only bound on GradedGabaAMechanism and its subclasses.
    let gaba = unsafe { mechanism.data_mut::<GradedGabaAMechanism>() };
    let (g_max, theta, sigma) = (gaba.g_max, gaba.theta, gaba.sigma);
    let (tau_alpha, tau_beta, gaba_rev) = (gaba.tau_alpha, gaba.tau_beta, gaba.gaba_rev);
    let g_s = gaba.g_s_mut();
    if ctx.step >= g_s.len() {
        return Err(Error::StepOutOfRange {
            step: ctx.step,
            len: g_s.len(),
        });
    }

    let prev_g_s = g_s[prev];
    let fv = 1.0 / (1.0 + ((pre_vm - theta) / -sigma).exp());
    g_s[ctx.step] = prev_g_s + ctx.dt * (tau_alpha * fv * (1.0 - prev_g_s) - tau_beta * prev_g_s);

    Ok(-g_max * prev_g_s * (post_vm - gaba_rev))
}

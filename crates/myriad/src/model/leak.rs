//! Hodgkin-Huxley leak channel.

use crate::error::{Error, Result};
use crate::model::StepContext;
use crate::model::mechanism::{
    MechanismData, MechanismFn, MechanismInit, MechanismMethods, define_mechanism,
    init_mechanism, previous_step,
};
use crate::model::soma::membrane_potential;
use crate::runtime::{Class, ClassCell, ClassInit, ConstructFn, Method, Object, ObjectMethods, dispatch};
use std::any::Any;

/// Symbols of the device-compiled leak operations.
pub const DEVICE_FUNCTIONS: &[&str] = &["leak_mech_fxn"];

/// Instance layout of `LeakMechanism`.
#[repr(C)]
pub struct LeakMechanism {
    /// Base mechanism.
    pub base: MechanismData,
    /// Leak conductance, nS.
    pub g_leak: f64,
    /// Leak reversal potential, mV.
    pub e_rev: f64,
}

/// Configuration for `LeakMechanism` instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeakInit {
    /// Base mechanism configuration.
    pub mechanism: MechanismInit,
    /// Leak conductance.
    pub g_leak: f64,
    /// Leak reversal potential.
    pub e_rev: f64,
}

static LEAK: ClassCell = ClassCell::new();

/// The `LeakMechanism` class.
///
/// # Errors
///
/// Registration failures on first use.
pub fn init_leak() -> Result<Class> {
    LEAK.get_or_try_init(|| {
        define_mechanism(
            ClassInit::new("LeakMechanism", init_mechanism()?, size_of::<LeakMechanism>())
                .with_methods(ObjectMethods {
                    construct: Some(Method::new("leak_construct", leak_construct as ConstructFn)),
                    ..ObjectMethods::default()
                }),
            MechanismMethods {
                mechanism_fn: Some(Method::new("leak_mech_fxn", leak_current as MechanismFn)),
            },
        )
    })
}

/// Builds a leak mechanism.
///
/// # Errors
///
/// Registration or constructor failures.
pub fn new_leak(init: &LeakInit) -> Result<Object> {
    dispatch::new(init_leak()?, init)
}

fn leak_construct(object: Object, init: &dyn Any) -> Result<()> {
    let init = init.downcast_ref::<LeakInit>().ok_or(Error::InitArgsMismatch {
        class: object.class().name(),
        expected: std::any::type_name::<LeakInit>(),
    })?;
    dispatch::super_construct(init_leak()?, object, &init.mechanism)?;

    // SAFETY: instances of LeakMechanism have this layout.
    let leak = unsafe { object.data_mut::<LeakMechanism>() };
    leak.g_leak = init.g_leak;
    leak.e_rev = init.e_rev;
    Ok(())
}

fn leak_current(
    mechanism: Object,
    _pre: Object,
    post: Object,
    ctx: &StepContext<'_>,
) -> Result<f64> {
    // SAFETY: only bound on LeakMechanism and its subclasses.
    let leak = unsafe { mechanism.data::<LeakMechanism>() };
    let post_vm = membrane_potential(post, previous_step(ctx)?)?;
    Ok(-leak.g_leak * (post_vm - leak.e_rev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mechanism::{mechanism_fn, source_id};
    use crate::model::soma::{SomaInit, new_soma};

    #[test]
    fn test_leak_pulls_toward_reversal() {
        let soma = new_soma(&SomaInit {
            steps: 4,
            vm0: -60.0,
            cm: 1.0,
            ..SomaInit::default()
        })
        .unwrap();
        let leak = new_leak(&LeakInit {
            mechanism: MechanismInit { source_id: 0 },
            g_leak: 0.5,
            e_rev: -70.0,
        })
        .unwrap();
        assert_eq!(source_id(leak).unwrap(), 0);

        let network = [soma.object()];
        let ctx = StepContext::new(&network, 0.1, 1);
        let current = mechanism_fn(leak, soma.object(), soma.object(), &ctx).unwrap();
        assert_eq!(current, -5.0);

        dispatch::destruct(leak).unwrap();
        dispatch::destruct(soma.object()).unwrap();
    }

    #[test]
    fn test_leak_is_a_mechanism() {
        let class = init_leak().unwrap();
        assert!(class.is_subclass_of(init_mechanism().unwrap()));
        assert_eq!(class.instance_size(), size_of::<LeakMechanism>());
    }
}

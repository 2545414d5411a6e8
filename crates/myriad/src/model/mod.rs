//! Neural-compartment classes built on the object runtime.
//!
//! - [`compartment`]: the `CompartmentClass` metaclass and base `Compartment`
//! - [`soma`]: compartment with a membrane-potential trace
//! - [`mechanism`]: the `MechanismClass` metaclass and base `Mechanism`
//! - [`leak`], [`dc_current`], [`gaba`]: concrete mechanisms
//!
//! A network is a slice of compartments indexed by their id. Each step
//! every compartment sums the currents of its mechanisms, each of which
//! reads its pre-synaptic compartment from the network.

pub mod compartment;
pub mod dc_current;
pub mod gaba;
pub mod leak;
pub mod mechanism;
pub mod soma;

pub use compartment::{Compartment, CompartmentInit, MAX_MECHANISMS};
pub use dc_current::{DcCurrentInit, new_dc_current};
pub use gaba::{GabaInit, new_gaba};
pub use leak::{LeakInit, new_leak};
pub use mechanism::MechanismInit;
pub use soma::{SomaInit, membrane_potential, new_soma};

use crate::error::{Error, Result};
use crate::runtime::{Object, SimDevice};

/// Parameters of one simulation step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// All compartments, indexed by id.
    pub network: &'a [Object],
    /// Step width.
    pub dt: f64,
    /// Simulated time at the start of the step.
    pub global_time: f64,
    /// Index of the step being computed.
    pub step: usize,
}

impl<'a> StepContext<'a> {
    /// Context for computing `step` of `network`.
    #[must_use]
    pub fn new(network: &'a [Object], dt: f64, step: usize) -> Self {
        StepContext {
            network,
            dt,
            global_time: step as f64 * dt,
            step,
        }
    }

    /// The compartment with network index `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCompartment`] if the network has no such entry.
    pub fn compartment(&self, id: u64) -> Result<Object> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.network.get(index))
            .copied()
            .ok_or(Error::UnknownCompartment { id })
    }
}

/// Computes `step` for every compartment of `network`, in network order.
///
/// # Errors
///
/// The first error returned by a compartment's `simulate`.
pub fn step_network(network: &[Object], dt: f64, step: usize) -> Result<()> {
    let ctx = StepContext::new(network, dt, step);
    for &object in network {
        compartment::simulate(object, &ctx)?;
    }
    Ok(())
}

/// Loads the device variants of every model operation onto `device`.
pub fn load_device_functions(device: &SimDevice) {
    for symbols in [
        compartment::DEVICE_FUNCTIONS,
        soma::DEVICE_FUNCTIONS,
        mechanism::DEVICE_FUNCTIONS,
        leak::DEVICE_FUNCTIONS,
        dc_current::DEVICE_FUNCTIONS,
        gaba::DEVICE_FUNCTIONS,
    ] {
        device.load_functions(symbols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_context_time() {
        let ctx = StepContext::new(&[], 0.25, 4);
        assert_eq!(ctx.global_time, 1.0);
        assert_eq!(ctx.compartment(0), Err(Error::UnknownCompartment { id: 0 }));
    }
}

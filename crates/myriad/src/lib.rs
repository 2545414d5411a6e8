//! Myriad: a hand-built object runtime for compartmental neuron models.
//!
//! Myriad provides single-inheritance classes whose descriptors are
//! themselves objects, so a class can carry extra virtual operations by
//! being an instance of a richer metaclass. On top of that it offers:
//!
//! - **Constructor chains** with typed, nested configurations
//! - **Inherited method slots** copied from the superclass at class creation
//! - **Runtime type queries** over the class hierarchy
//! - **Device mirroring** of classes and instances into a separate address
//!   space, with host function slots translated to device functions
//!
//! # Architecture
//!
//! - [`runtime`]: the object model, dispatch, registry and mirroring
//! - [`model`]: compartments and mechanisms built on the runtime
//! - `myriad-mem`: host arena and simulated device memory
//! - `myriad-log`: leveled logging
//!
//! # Example
//!
//! ```rust
//! use myriad::model::{CompartmentInit, SomaInit, new_soma, step_network};
//!
//! let soma = new_soma(&SomaInit {
//!     compartment: CompartmentInit { id: 0, mechanisms: Vec::new() },
//!     steps: 4,
//!     vm0: -65.0,
//!     cm: 1.0,
//! })
//! .unwrap();
//!
//! let network = [soma.object()];
//! for step in 1..4 {
//!     step_network(&network, 0.1, step).unwrap();
//! }
//! assert_eq!(myriad::model::membrane_potential(soma.object(), 3).unwrap(), -65.0);
//! ```

pub mod error;
pub mod model;
pub mod runtime;

// Re-export commonly used types
pub use error::{Error, Result};
pub use runtime::{
    Class, ClassInit, Device, DevicePtr, Method, Object, ObjectHeader, SimDevice, class_class,
    default_device, dispatch, object_class,
};

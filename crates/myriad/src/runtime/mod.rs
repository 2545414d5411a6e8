//! The Myriad object runtime.
//!
//! - [`object`]: instance header and handles
//! - [`class`]: class descriptors, slot inheritance and overrides
//! - [`bootstrap`]: the static `Object`/`Class` root pair
//! - [`dispatch`]: allocator, constructor chain and dispatched operations
//! - [`registry`]: class registry and one-time initialization gates
//! - [`symbol`]: host implementation to device symbol mapping
//! - [`mirror`]: host-to-device mirroring of instances and classes
//! - [`device`]: device abstraction and the simulated device
//! - [`buffer`]: allocation of instance-owned buffers
//! - [`introspection`]: runtime type queries
//!
//! # Example
//!
//! ```rust
//! use myriad::runtime::{
//!     ClassInit, ObjectHeader, default_device, dispatch, mirror_roots, object_class,
//! };
//!
//! #[repr(C)]
//! struct Thermometer {
//!     header: ObjectHeader,
//!     reading: f64,
//! }
//!
//! let thermometer = ClassInit::new("DocThermometer", object_class(), size_of::<Thermometer>())
//!     .register()
//!     .unwrap();
//!
//! let device = default_device();
//! mirror_roots(device).unwrap();
//! thermometer.mirror(device).unwrap();
//!
//! let object = dispatch::new(thermometer, &()).unwrap();
//! let copy = object.mirror(device).unwrap();
//! assert_ne!(copy.addr(), 0);
//! dispatch::destruct(object).unwrap();
//! ```

pub mod bootstrap;
pub mod buffer;
pub mod class;
pub mod device;
pub mod dispatch;
pub mod introspection;
pub mod mirror;
pub mod object;
pub mod registry;
pub mod symbol;

pub use bootstrap::{class_class, mirror_roots, object_class};
pub use class::{
    Class, ClassDescriptor, ClassInit, ConstructFn, DestructFn, Method, MirrorFn,
    ObjectMethodTable, ObjectMethods, UpdateFn,
};
pub use device::{Device, DeviceConfig, DevicePtr, SimDevice, default_device};
pub use mirror::{OwnedBuffer, Staging, class_fixup};
pub use object::{Object, ObjectHeader};
pub use registry::{ClassCell, all_classes, class_from_name, mirror_all};

//! Error types for the Myriad runtime.
//!
//! Contract violations (dispatch through an empty slot, mirroring an
//! instance before its class) and resource exhaustion are reported as typed
//! errors rather than aborting the process; callers that treat them as fatal
//! can do so at the top of their simulation loop. Capacity limits such as a
//! full compartment are ordinary failures the caller is expected to handle.

use myriad_mem::{ArenaAllocError, DeviceMemoryError};
use std::fmt;

/// Errors that can occur in the Myriad runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Host allocation failed.
    OutOfMemory {
        /// The requested allocation size.
        requested: usize,
    },

    /// Device allocation failed.
    DeviceOutOfMemory {
        /// The requested allocation size.
        requested: u64,
        /// Bytes still free on the device.
        available: u64,
    },

    /// A device address does not refer to live device memory.
    InvalidDevicePointer {
        /// The address value.
        addr: u64,
    },

    /// A class was registered with an instance size of zero.
    ZeroSizedClass {
        /// Name of the class.
        name: &'static str,
    },

    /// Class name already exists in registry.
    ClassAlreadyExists {
        /// Name of the class.
        name: &'static str,
    },

    /// A class reference has a null superclass.
    MissingSuperclass {
        /// Name of the class.
        class: &'static str,
    },

    /// Dispatch reached a method-table slot that was never filled.
    MissingMethod {
        /// Class whose slot was empty.
        class: &'static str,
        /// Logical name of the operation.
        operation: &'static str,
    },

    /// A constructor received a configuration of the wrong type.
    InitArgsMismatch {
        /// Class being constructed.
        class: &'static str,
        /// Type name of the configuration the constructor expected.
        expected: &'static str,
    },

    /// An object is not an instance of the hierarchy an operation requires.
    NotAnInstance {
        /// Name of the required class.
        expected: &'static str,
        /// Actual class of the object.
        class: &'static str,
    },

    /// A descriptor is smaller than the metaclass layout requested from it.
    DescriptorTooSmall {
        /// Name of the class.
        class: &'static str,
        /// Bytes the layout needs.
        required: usize,
        /// Bytes the descriptor has.
        actual: usize,
    },

    /// An instance was mirrored before its class.
    ClassNotMirrored {
        /// Name of the class.
        class: &'static str,
    },

    /// A class was mirrored before its superclass.
    SuperNotMirrored {
        /// Name of the class being mirrored.
        class: &'static str,
    },

    /// Class descriptors live for the whole process and cannot be destroyed.
    ClassDestruction {
        /// Name of the class.
        class: &'static str,
    },

    /// A method slot holds an address that was never bound to a symbol.
    UnknownImplementation {
        /// The host address in the slot.
        addr: u64,
    },

    /// The device has no function for a bound symbol.
    DeviceSymbolMissing {
        /// Logical name of the function.
        symbol: &'static str,
    },

    /// A compartment's mechanism list is full.
    CompartmentFull {
        /// Compartment identifier.
        id: u64,
        /// Fixed capacity of the list.
        capacity: usize,
    },

    /// A simulation step is outside a state buffer.
    StepOutOfRange {
        /// The requested step.
        step: usize,
        /// Length of the buffer.
        len: usize,
    },

    /// A mechanism names a source compartment that is not in the network.
    UnknownCompartment {
        /// The missing identifier.
        id: u64,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { requested } => {
                write!(f, "Out of memory: requested {requested} bytes")
            }
            Error::DeviceOutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Device out of memory: requested {requested} bytes, available {available} bytes"
            ),
            Error::InvalidDevicePointer { addr } => {
                write!(f, "Invalid device pointer: {addr:#x}")
            }
            Error::ZeroSizedClass { name } => {
                write!(f, "Class {name} has a zero instance size")
            }
            Error::ClassAlreadyExists { name } => {
                write!(f, "Class {name} already exists in registry")
            }
            Error::MissingSuperclass { class } => {
                write!(f, "Class {class} has no superclass")
            }
            Error::MissingMethod { class, operation } => {
                write!(f, "Class {class} does not implement {operation}")
            }
            Error::InitArgsMismatch { class, expected } => {
                write!(f, "Constructor of {class} expects a {expected}")
            }
            Error::NotAnInstance { expected, class } => {
                write!(f, "Instance of {class} is not a {expected}")
            }
            Error::DescriptorTooSmall {
                class,
                required,
                actual,
            } => write!(
                f,
                "Descriptor of {class} is {actual} bytes, layout needs {required}"
            ),
            Error::ClassNotMirrored { class } => {
                write!(f, "Class {class} has not been mirrored to the device")
            }
            Error::SuperNotMirrored { class } => {
                write!(f, "Superclass of {class} has not been mirrored to the device")
            }
            Error::ClassDestruction { class } => {
                write!(f, "Class {class} cannot be destroyed")
            }
            Error::UnknownImplementation { addr } => {
                write!(f, "No symbol bound for implementation at {addr:#x}")
            }
            Error::DeviceSymbolMissing { symbol } => {
                write!(f, "Device has no function named {symbol}")
            }
            Error::CompartmentFull { id, capacity } => {
                write!(f, "Compartment {id} already holds {capacity} mechanisms")
            }
            Error::StepOutOfRange { step, len } => {
                write!(f, "Step {step} is outside a buffer of length {len}")
            }
            Error::UnknownCompartment { id } => {
                write!(f, "No compartment with id {id} in the network")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ArenaAllocError> for Error {
    fn from(err: ArenaAllocError) -> Self {
        match err {
            ArenaAllocError::OutOfMemory { requested } => Error::OutOfMemory { requested },
            ArenaAllocError::InvalidAlignment { .. } => Error::OutOfMemory { requested: 0 },
        }
    }
}

impl From<DeviceMemoryError> for Error {
    fn from(err: DeviceMemoryError) -> Self {
        match err {
            DeviceMemoryError::OutOfMemory {
                requested,
                available,
            } => Error::DeviceOutOfMemory {
                requested,
                available,
            },
            DeviceMemoryError::InvalidAddress { addr, .. } => Error::InvalidDevicePointer { addr },
            DeviceMemoryError::ZeroSized => Error::DeviceOutOfMemory {
                requested: 0,
                available: 0,
            },
        }
    }
}

/// Result type for Myriad runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

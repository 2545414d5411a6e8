//! Memory infrastructure for the Myriad object runtime.
//!
//! - [`arena`]: a process-lifetime host arena. Class descriptors are
//!   allocated here and never freed.
//! - [`device`]: a simulated device address space. Addresses handed out by
//!   a [`DeviceArena`] never overlap host memory, so a host pointer left
//!   inside a device mirror is detectable as an invalid device address.

pub mod arena;
pub mod device;

pub use arena::{ArenaAllocError, ArenaStats, HostArena, host_arena};
pub use device::{DEVICE_ALIGNMENT, DeviceArena, DeviceMemoryError, DeviceStats};

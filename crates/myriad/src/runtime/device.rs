//! Device address space seen by the mirroring protocol.
//!
//! The runtime never dereferences device memory. Everything it does to the
//! device goes through the [`Device`] trait: reserve storage, copy bytes in,
//! copy bytes out, and resolve the device-compiled variant of a function by
//! its logical symbol. [`SimDevice`] implements the trait in-process on top
//! of [`myriad_mem::DeviceArena`].

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use myriad_log::{debug, warn};
use myriad_mem::DeviceArena;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::{OnceLock, PoisonError, RwLock};

/// Environment variable holding the simulated device capacity in bytes.
pub const CAPACITY_ENV: &str = "MYRIAD_DEVICE_CAPACITY";

/// Distance between consecutive device function addresses.
const FUNCTION_STRIDE: u64 = 16;

/// A non-null address in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevicePtr(NonZeroU64);

impl DevicePtr {
    /// Wraps a raw device address; `None` for zero.
    #[must_use]
    pub const fn new(addr: u64) -> Option<Self> {
        match NonZeroU64::new(addr) {
            Some(addr) => Some(DevicePtr(addr)),
            None => None,
        }
    }

    /// Returns the raw address.
    #[must_use]
    pub const fn addr(self) -> u64 {
        self.0.get()
    }

    /// Returns the address `bytes` past this one.
    #[must_use]
    pub fn offset(self, bytes: usize) -> DevicePtr {
        DevicePtr(self.0.saturating_add(bytes as u64))
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// Memory and code on the far side of a host/device boundary.
///
/// All transfers are synchronous: a copy has completed when the call
/// returns.
pub trait Device: Send + Sync {
    /// Reserves `size` zeroed bytes of device memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceOutOfMemory`] when the device is exhausted.
    fn alloc(&self, size: usize) -> Result<DevicePtr>;

    /// Copies `bytes` to device memory at `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDevicePointer`] if the range is not allocated.
    fn copy_to_device(&self, dst: DevicePtr, bytes: &[u8]) -> Result<()>;

    /// Copies device memory at `src` into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDevicePointer`] if the range is not allocated.
    fn copy_from_device(&self, src: DevicePtr, out: &mut [u8]) -> Result<()>;

    /// Returns the device address of the function compiled for `symbol`.
    fn function(&self, symbol: &str) -> Option<DevicePtr>;
}

/// Reads one native-endian word from device memory.
pub(crate) fn read_device_word(device: &dyn Device, src: DevicePtr) -> Result<u64> {
    let mut word = [0u8; 8];
    device.copy_from_device(src, &mut word)?;
    Ok(u64::from_ne_bytes(word))
}

/// Simulated device parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Bytes of device memory.
    pub capacity: u64,
    /// First device memory address.
    pub base_address: u64,
    /// First device function address.
    pub function_base: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            capacity: 64 * 1024 * 1024,
            base_address: 0xD000_0000_0000,
            function_base: 0xF000_0000_0000,
        }
    }
}

impl DeviceConfig {
    /// Defaults, with the capacity taken from `MYRIAD_DEVICE_CAPACITY` when
    /// it holds a positive integer.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = DeviceConfig::default();
        if let Ok(raw) = std::env::var(CAPACITY_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(capacity) if capacity > 0 => config.capacity = capacity,
                _ => warn!("ignoring {CAPACITY_ENV}={raw:?}: not a positive byte count"),
            }
        }
        config
    }
}

/// In-process device backed by a [`DeviceArena`].
///
/// Device functions are registered by symbol with
/// [`SimDevice::load_functions`]; each receives a unique address in a
/// window disjoint from device memory.
pub struct SimDevice {
    memory: DeviceArena,
    function_base: u64,
    functions: RwLock<FxHashMap<&'static str, DevicePtr>>,
}

impl SimDevice {
    /// Creates a device from `config`.
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        SimDevice {
            memory: DeviceArena::new(config.base_address, config.capacity),
            function_base: config.function_base.max(FUNCTION_STRIDE),
            functions: RwLock::new(FxHashMap::default()),
        }
    }

    /// Makes the device variants of `symbols` resolvable.
    ///
    /// Loading a symbol twice keeps its first address.
    pub fn load_functions(&self, symbols: &[&'static str]) {
        let mut functions = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for &symbol in symbols {
            let next = self.function_base + functions.len() as u64 * FUNCTION_STRIDE;
            if let Some(addr) = DevicePtr::new(next) {
                functions.entry(symbol).or_insert_with(|| {
                    debug!("device function {symbol} at {addr}");
                    addr
                });
            }
        }
    }

    /// Returns the backing memory window.
    #[must_use]
    pub fn memory(&self) -> &DeviceArena {
        &self.memory
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        SimDevice::new(DeviceConfig::default())
    }
}

impl Device for SimDevice {
    fn alloc(&self, size: usize) -> Result<DevicePtr> {
        let addr = self.memory.alloc(size as u64)?;
        DevicePtr::new(addr).ok_or(Error::InvalidDevicePointer { addr })
    }

    fn copy_to_device(&self, dst: DevicePtr, bytes: &[u8]) -> Result<()> {
        Ok(self.memory.write(dst.addr(), bytes)?)
    }

    fn copy_from_device(&self, src: DevicePtr, out: &mut [u8]) -> Result<()> {
        Ok(self.memory.read(src.addr(), out)?)
    }

    fn function(&self, symbol: &str) -> Option<DevicePtr> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }
}

/// Process-wide simulated device, configured from the environment on first
/// use.
#[must_use]
pub fn default_device() -> &'static SimDevice {
    static DEVICE: OnceLock<SimDevice> = OnceLock::new();
    DEVICE.get_or_init(|| SimDevice::new(DeviceConfig::from_env()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ptr_rejects_zero() {
        assert!(DevicePtr::new(0).is_none());
        let ptr = DevicePtr::new(0x1000).unwrap();
        assert_eq!(ptr.offset(8).addr(), 0x1008);
        assert_eq!(ptr.to_string(), "0x1000");
    }

    #[test]
    fn test_sim_device_copies() {
        let device = SimDevice::default();
        let ptr = device.alloc(16).unwrap();
        device.copy_to_device(ptr.offset(8), &42u64.to_ne_bytes()).unwrap();
        assert_eq!(read_device_word(&device, ptr.offset(8)).unwrap(), 42);
        assert_eq!(read_device_word(&device, ptr).unwrap(), 0);
    }

    #[test]
    fn test_sim_device_out_of_memory() {
        let device = SimDevice::new(DeviceConfig {
            capacity: 512,
            ..DeviceConfig::default()
        });
        device.alloc(256).unwrap();
        device.alloc(256).unwrap();
        assert!(matches!(
            device.alloc(1),
            Err(Error::DeviceOutOfMemory { requested: 1, .. })
        ));
    }

    #[test]
    fn test_function_table() {
        let device = SimDevice::default();
        assert_eq!(device.function("soma_simulate"), None);

        device.load_functions(&["soma_simulate", "leak_current"]);
        let first = device.function("soma_simulate").unwrap();
        let second = device.function("leak_current").unwrap();
        assert_ne!(first, second);

        device.load_functions(&["soma_simulate"]);
        assert_eq!(device.function("soma_simulate"), Some(first));
    }

    #[test]
    fn test_config_default() {
        let config = DeviceConfig::default();
        assert_eq!(config.capacity, 64 * 1024 * 1024);
        assert!(config.function_base > config.base_address + config.capacity);
    }
}

// Common test utilities for integration tests
//
// Shared device setup, unique class names and device memory readers.

#![allow(dead_code)]

use myriad::model::{self, CompartmentInit, SomaInit};
use myriad::runtime::{Class, Device, DevicePtr, SimDevice, default_device, mirror_roots};
use std::sync::atomic::{AtomicUsize, Ordering};

static TEST_ID: AtomicUsize = AtomicUsize::new(0);

/// The shared simulated device with every model function loaded.
pub fn device() -> &'static SimDevice {
    let device = default_device();
    model::load_device_functions(device);
    device
}

/// A class name no other test uses.
pub fn unique_name(prefix: &str) -> &'static str {
    let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
    Box::leak(format!("{prefix}_{id}").into_boxed_str())
}

/// Mirrors the roots, then `class` and its ancestors from the top down.
pub fn mirror_hierarchy(class: Class, device: &dyn Device) -> DevicePtr {
    mirror_roots(device).expect("Failed to mirror roots");
    let mut chain: Vec<Class> = class.ancestors().collect();
    chain.reverse();
    let mut last = None;
    for level in chain {
        last = Some(level.mirror(device).expect("Failed to mirror class"));
    }
    last.expect("Class hierarchy is never empty")
}

/// Reads the pointer-sized word at `addr` on `device`.
pub fn read_word(device: &dyn Device, addr: DevicePtr) -> u64 {
    let mut bytes = [0u8; 8];
    device
        .copy_from_device(addr, &mut bytes)
        .expect("Failed to read device word");
    u64::from_ne_bytes(bytes)
}

/// Reads `len` doubles starting at `addr` on `device`.
pub fn read_f64s(device: &dyn Device, addr: DevicePtr, len: usize) -> Vec<f64> {
    let mut bytes = vec![0u8; len * 8];
    device
        .copy_from_device(addr, &mut bytes)
        .expect("Failed to read device buffer");
    bytes
        .chunks_exact(8)
        .map(|chunk| f64::from_ne_bytes(chunk.try_into().expect("8-byte chunk")))
        .collect()
}

/// Soma configuration with an empty mechanism list.
pub fn soma_init(id: u64, steps: usize, vm0: f64) -> SomaInit {
    SomaInit {
        compartment: CompartmentInit {
            id,
            mechanisms: Vec::new(),
        },
        steps,
        vm0,
        cm: 1.0,
    }
}

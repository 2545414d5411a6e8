//! Implementation symbols.
//!
//! Host and device code live in separate address spaces, so a method slot
//! cannot be copied to the device as-is. Every implementation bound through
//! a [`Method`] records its host address under its logical symbol; when a
//! class is mirrored, [`translate_slot`] maps the host address back to the
//! symbol and asks the device for its compiled variant.

use crate::error::{Error, Result};
use crate::runtime::class::Method;
use crate::runtime::device::Device;
use crate::runtime::mirror::Staging;
use fxhash::FxHashMap;
use myriad_log::trace;
use std::sync::{OnceLock, PoisonError, RwLock};

fn table() -> &'static RwLock<FxHashMap<usize, &'static str>> {
    static TABLE: OnceLock<RwLock<FxHashMap<usize, &'static str>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Records `symbol` as the name of the implementation at `addr`.
pub(crate) fn register(addr: usize, symbol: &'static str) {
    table()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(addr, symbol);
}

/// Returns the symbol bound to the implementation at `addr`.
#[must_use]
pub fn lookup(addr: usize) -> Option<&'static str> {
    table()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&addr)
        .copied()
}

/// Stores an override into `slot`, recording its symbol. `None` leaves the
/// inherited implementation in place.
pub fn bind<F: Copy>(slot: &mut Option<F>, method: Option<Method<F>>) {
    if let Some(method) = method {
        register(method.addr(), method.symbol);
        *slot = Some(method.imp);
    }
}

/// Rewrites the function-pointer word at `offset` of `staging` to the
/// device address of the same symbol. An empty slot stays empty.
///
/// # Errors
///
/// - [`Error::UnknownImplementation`] if the slot holds an address that was
///   never bound
/// - [`Error::DeviceSymbolMissing`] if the device has no such function
pub fn translate_slot(staging: &mut Staging, offset: usize, device: &dyn Device) -> Result<()> {
    let host = staging.read_word(offset);
    if host == 0 {
        return Ok(());
    }
    let symbol = usize::try_from(host)
        .ok()
        .and_then(lookup)
        .ok_or(Error::UnknownImplementation { addr: host })?;
    let target = device
        .function(symbol)
        .ok_or(Error::DeviceSymbolMissing { symbol })?;
    trace!("slot +{offset}: {symbol} {host:#x} -> {target}");
    staging.write_word(offset, target.addr());
    Ok(())
}

//! Process-wide class registry and one-time initialization gates.
//!
//! Every class built by [`Class::define`] is registered here under its name
//! once its whole constructor chain has succeeded. Registration order is kept, and since a superclass
//! must exist before its subclasses, walking the registry in order visits
//! every superclass first. [`mirror_all`] relies on that.

use crate::error::{Error, Result};
use crate::runtime::bootstrap::{class_class, mirror_roots, object_class};
use crate::runtime::class::Class;
use crate::runtime::device::Device;
use fxhash::FxHashMap;
use myriad_log::info;
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};

struct ClassRegistry {
    order: Vec<Class>,
    by_name: FxHashMap<&'static str, Class>,
}

impl ClassRegistry {
    fn with_roots() -> Self {
        let mut registry = ClassRegistry {
            order: Vec::new(),
            by_name: FxHashMap::default(),
        };
        for root in [object_class(), class_class()] {
            registry.order.push(root);
            registry.by_name.insert(root.name(), root);
        }
        registry
    }
}

fn registry() -> &'static RwLock<ClassRegistry> {
    static REGISTRY: OnceLock<RwLock<ClassRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(ClassRegistry::with_roots()))
}

/// Adds `class` to the registry.
///
/// # Errors
///
/// [`Error::ClassAlreadyExists`] if the name is taken.
pub(crate) fn register(class: Class) -> Result<()> {
    let mut registry = registry().write().unwrap_or_else(PoisonError::into_inner);
    let name = class.name();
    if registry.by_name.contains_key(name) {
        return Err(Error::ClassAlreadyExists { name });
    }
    registry.by_name.insert(name, class);
    registry.order.push(class);
    Ok(())
}

/// Looks up a registered class by name.
#[must_use]
pub fn class_from_name(name: &str) -> Option<Class> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_name
        .get(name)
        .copied()
}

/// All registered classes in registration order, roots first.
#[must_use]
pub fn all_classes() -> Vec<Class> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .order
        .clone()
}

/// Mirrors the roots and then every registered class to `device`.
///
/// Classes that already have a mirror are skipped, so the pass can be
/// repeated after more classes are registered.
///
/// # Errors
///
/// The first mirroring failure; classes before it stay mirrored.
pub fn mirror_all(device: &dyn Device) -> Result<()> {
    mirror_roots(device)?;
    let classes = all_classes();
    for class in &classes {
        class.mirror(device)?;
    }
    info!("mirrored {} classes to the device", classes.len());
    Ok(())
}

/// A lazily built, process-wide class handle.
///
/// Initialization runs at most once; later calls return the same handle,
/// and concurrent callers wait for the first one to finish. A failed
/// initialization leaves the cell empty so it can be retried.
///
/// # Example
///
/// ```rust
/// use myriad::runtime::{ClassCell, ClassInit, object_class};
///
/// static WIDGET: ClassCell = ClassCell::new();
///
/// let first = WIDGET
///     .get_or_try_init(|| ClassInit::new("DocWidget", object_class(), 16).register())
///     .unwrap();
/// let again = WIDGET
///     .get_or_try_init(|| unreachable!())
///     .unwrap();
/// assert_eq!(first, again);
/// ```
pub struct ClassCell {
    class: OnceLock<Class>,
    init: Mutex<()>,
}

impl ClassCell {
    /// Creates an empty cell.
    #[must_use]
    pub const fn new() -> Self {
        ClassCell {
            class: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Returns the class if it has been built.
    #[must_use]
    pub fn get(&self) -> Option<Class> {
        self.class.get().copied()
    }

    /// Returns the class, building it with `init` on first use.
    ///
    /// # Errors
    ///
    /// Whatever `init` returns.
    pub fn get_or_try_init(&self, init: impl FnOnce() -> Result<Class>) -> Result<Class> {
        if let Some(class) = self.get() {
            return Ok(class);
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(class) = self.get() {
            return Ok(class);
        }
        let class = init()?;
        Ok(*self.class.get_or_init(|| class))
    }
}

impl Default for ClassCell {
    fn default() -> Self {
        Self::new()
    }
}

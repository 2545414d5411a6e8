//! Runtime type queries.
//!
//! Free-function forms of the queries on [`Object`] and [`Class`], plus
//! hierarchy and registry enumeration.
//!
//! # Example
//!
//! ```rust
//! use myriad::runtime::introspection::*;
//! use myriad::runtime::{class_class, object_class};
//!
//! let class = class_class().as_object();
//! assert_eq!(class_of(class), class_class());
//! assert!(is_instance_of(class, object_class()));
//! assert_eq!(super_of(class_class()).unwrap(), object_class());
//! ```

use crate::error::Result;
use crate::runtime::class::Class;
use crate::runtime::object::Object;

pub use crate::runtime::registry::{all_classes, class_from_name};

// ============================================================================
// Instance Queries
// ============================================================================

/// Class of `object`.
#[must_use]
pub fn class_of(object: Object) -> Class {
    object.class()
}

/// Byte size of `object`.
#[must_use]
pub fn size_of(object: Object) -> usize {
    object.size()
}

/// Returns `true` if `object`'s class is exactly `class`.
#[must_use]
pub fn is_exact_instance(object: Object, class: Class) -> bool {
    object.is_a(class)
}

/// Returns `true` if `class` is `object`'s class or an ancestor of it.
///
/// Naming the root `Object` class is true for every object.
#[must_use]
pub fn is_instance_of(object: Object, class: Class) -> bool {
    object.is_instance_of(class)
}

// ============================================================================
// Class Queries
// ============================================================================

/// Superclass of `class`; the root `Object` class is its own superclass.
///
/// # Errors
///
/// [`crate::Error::MissingSuperclass`] if the super pointer is null.
pub fn super_of(class: Class) -> Result<Class> {
    class.super_class()
}

/// `class` followed by its ancestors, ending at the root `Object` class.
#[must_use]
pub fn class_hierarchy(class: Class) -> Vec<Class> {
    class.ancestors().collect()
}

/// Registered classes whose direct superclass is `parent`.
///
/// The root `Object` class is not reported as its own subclass.
#[must_use]
pub fn subclasses(parent: Class) -> Vec<Class> {
    all_classes()
        .into_iter()
        .filter(|class| !class.is_root() && class.super_class().ok() == Some(parent))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bootstrap::{class_class, object_class};
    use crate::runtime::class::ClassInit;
    use crate::runtime::dispatch;

    #[test]
    fn test_instance_queries() {
        let base = ClassInit::new("IntrospectionBase", object_class(), 24)
            .register()
            .unwrap();
        let leaf = ClassInit::new("IntrospectionLeaf", base, 32)
            .register()
            .unwrap();
        let other = ClassInit::new("IntrospectionOther", object_class(), 16)
            .register()
            .unwrap();

        let object = dispatch::new(leaf, &()).unwrap();
        assert_eq!(class_of(object), leaf);
        assert_eq!(size_of(object), 32);
        assert!(is_exact_instance(object, leaf));
        assert!(!is_exact_instance(object, base));
        assert!(is_instance_of(object, base));
        assert!(is_instance_of(object, object_class()));
        assert!(!is_instance_of(object, other));
        assert!(!is_instance_of(object, class_class()));
        dispatch::destruct(object).unwrap();

        assert_eq!(class_hierarchy(leaf), vec![leaf, base, object_class()]);
        assert_eq!(subclasses(base), vec![leaf]);
    }

    #[test]
    fn test_root_superclasses() {
        assert_eq!(super_of(object_class()).unwrap(), object_class());
        assert_eq!(super_of(class_class()).unwrap(), object_class());
        assert!(!subclasses(object_class()).contains(&object_class()));
        assert!(subclasses(object_class()).contains(&class_class()));
    }
}

//! Object runtime tests
//!
//! Tests for the class model seen from outside the crate:
//! - Allocation and class-of/size-of
//! - Hierarchy queries
//! - Slot inheritance and overrides
//! - Registry and one-time initialization
//!
//! Run with: `cargo test --test runtime_test`

mod common;

use myriad::runtime::introspection::*;
use myriad::runtime::{
    Class, ClassCell, ClassInit, ConstructFn, DestructFn, Method, Object, ObjectHeader,
    ObjectMethods, class_class, dispatch, object_class,
};
use myriad::Error;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(C)]
struct Sample {
    header: ObjectHeader,
    value: u64,
}

#[repr(C)]
struct Tagged {
    base: Sample,
    tag: u32,
}

#[derive(Debug)]
struct SampleInit {
    value: u64,
}

#[derive(Debug)]
struct TaggedInit {
    sample: SampleInit,
    tag: u32,
}

static SAMPLE: ClassCell = ClassCell::new();
static TAGGED: ClassCell = ClassCell::new();
static DESTRUCTED: AtomicUsize = AtomicUsize::new(0);

fn sample_class() -> Class {
    SAMPLE
        .get_or_try_init(|| {
            ClassInit::new("RuntimeTestSample", object_class(), std::mem::size_of::<Sample>())
                .with_methods(ObjectMethods {
                    construct: Some(Method::new(
                        "runtime_test_sample_construct",
                        sample_construct as ConstructFn,
                    )),
                    destruct: Some(Method::new(
                        "runtime_test_sample_destruct",
                        sample_destruct as DestructFn,
                    )),
                    ..ObjectMethods::default()
                })
                .register()
        })
        .unwrap()
}

fn tagged_class() -> Class {
    TAGGED
        .get_or_try_init(|| {
            ClassInit::new("RuntimeTestTagged", sample_class(), std::mem::size_of::<Tagged>())
                .with_methods(ObjectMethods {
                    construct: Some(Method::new(
                        "runtime_test_tagged_construct",
                        tagged_construct as ConstructFn,
                    )),
                    ..ObjectMethods::default()
                })
                .register()
        })
        .unwrap()
}

fn sample_construct(object: Object, init: &dyn Any) -> myriad::Result<()> {
    dispatch::super_construct(sample_class(), object, init)?;
    let init = init.downcast_ref::<SampleInit>().ok_or(Error::InitArgsMismatch {
        class: object.class().name(),
        expected: "SampleInit",
    })?;
    unsafe { object.data_mut::<Sample>() }.value = init.value;
    Ok(())
}

fn sample_destruct(object: Object) -> myriad::Result<()> {
    DESTRUCTED.fetch_add(1, Ordering::SeqCst);
    dispatch::super_destruct(sample_class(), object)
}

fn tagged_construct(object: Object, init: &dyn Any) -> myriad::Result<()> {
    let init = init.downcast_ref::<TaggedInit>().ok_or(Error::InitArgsMismatch {
        class: object.class().name(),
        expected: "TaggedInit",
    })?;
    dispatch::super_construct(tagged_class(), object, &init.sample)?;
    unsafe { object.data_mut::<Tagged>() }.tag = init.tag;
    Ok(())
}

// ============================================================================
// Allocation Tests
// ============================================================================

#[test]
fn test_new_reports_class_and_size() {
    let object = dispatch::new(sample_class(), &SampleInit { value: 11 }).unwrap();
    assert_eq!(class_of(object), sample_class());
    assert_eq!(size_of(object), std::mem::size_of::<Sample>());
    assert_eq!(unsafe { object.data::<Sample>() }.value, 11);
    dispatch::destruct(object).unwrap();
}

#[test]
fn test_constructor_chain_runs_base_first() {
    let object = dispatch::new(
        tagged_class(),
        &TaggedInit {
            sample: SampleInit { value: 5 },
            tag: 9,
        },
    )
    .unwrap();
    let tagged = unsafe { object.data::<Tagged>() };
    assert_eq!(tagged.base.value, 5);
    assert_eq!(tagged.tag, 9);
    assert_eq!(size_of(object), std::mem::size_of::<Tagged>());
    dispatch::destruct(object).unwrap();
}

#[test]
fn test_wrong_configuration_rejected() {
    let err = dispatch::new(tagged_class(), &SampleInit { value: 1 }).unwrap_err();
    assert_eq!(
        err,
        Error::InitArgsMismatch {
            class: "RuntimeTestTagged",
            expected: "TaggedInit",
        }
    );
}

#[test]
fn test_destructor_inherited() {
    let before = DESTRUCTED.load(Ordering::SeqCst);
    let object = dispatch::new(
        tagged_class(),
        &TaggedInit {
            sample: SampleInit { value: 1 },
            tag: 2,
        },
    )
    .unwrap();
    dispatch::destruct(object).unwrap();
    assert!(DESTRUCTED.load(Ordering::SeqCst) > before);
}

#[test]
fn test_zero_sized_class_rejected() {
    let name = common::unique_name("RuntimeTestEmpty");
    assert_eq!(
        ClassInit::new(name, object_class(), 0).register(),
        Err(Error::ZeroSizedClass { name })
    );
}

#[test]
fn test_duplicate_class_rejected() {
    let name = common::unique_name("RuntimeTestDuplicate");
    ClassInit::new(name, object_class(), 16).register().unwrap();
    assert_eq!(
        ClassInit::new(name, object_class(), 16).register(),
        Err(Error::ClassAlreadyExists { name })
    );
}

// ============================================================================
// Hierarchy Tests
// ============================================================================

#[test]
fn test_instance_of_every_ancestor() {
    let object = dispatch::new(
        tagged_class(),
        &TaggedInit {
            sample: SampleInit { value: 0 },
            tag: 0,
        },
    )
    .unwrap();

    for ancestor in class_hierarchy(tagged_class()) {
        assert!(is_instance_of(object, ancestor), "{ancestor} is an ancestor");
    }
    assert!(is_exact_instance(object, tagged_class()));
    assert!(!is_exact_instance(object, sample_class()));

    let unrelated =
        ClassInit::new(common::unique_name("RuntimeTestUnrelated"), object_class(), 16)
            .register()
            .unwrap();
    assert!(!is_instance_of(object, unrelated));
    assert!(!is_instance_of(object, class_class()));
    dispatch::destruct(object).unwrap();
}

#[test]
fn test_root_pair() {
    let object = object_class();
    let class = class_class();
    assert_eq!(class_of(class.as_object()), class);
    assert_eq!(class_of(object.as_object()), class);
    assert_eq!(super_of(class).unwrap(), object);
    assert_eq!(super_of(object).unwrap(), object);
    assert!(is_instance_of(class.as_object(), object));
    assert_eq!(class_hierarchy(class), vec![class, object]);
}

#[test]
fn test_classes_are_instances_of_class() {
    let class = sample_class();
    assert!(class.as_object().is_class());
    assert!(is_instance_of(class.as_object(), class_class()));
    assert!(is_instance_of(class.as_object(), object_class()));
}

// ============================================================================
// Slot Inheritance Tests
// ============================================================================

#[test]
fn test_no_overrides_inherits_every_slot() {
    let plain = ClassInit::new(
        common::unique_name("RuntimeTestPlain"),
        tagged_class(),
        std::mem::size_of::<Tagged>(),
    )
    .register()
    .unwrap();
    let parent = tagged_class().methods();
    let child = plain.methods();
    assert_eq!(
        child.construct.map(|f| f as usize),
        parent.construct.map(|f| f as usize)
    );
    assert_eq!(
        child.destruct.map(|f| f as usize),
        parent.destruct.map(|f| f as usize)
    );
    assert_eq!(child.mirror.map(|f| f as usize), parent.mirror.map(|f| f as usize));
    assert_eq!(
        child.update_from_device.map(|f| f as usize),
        parent.update_from_device.map(|f| f as usize)
    );
}

#[test]
fn test_single_override_keeps_other_slots() {
    let sample = sample_class().methods();
    let tagged = tagged_class().methods();
    assert_ne!(
        tagged.construct.map(|f| f as usize),
        sample.construct.map(|f| f as usize)
    );
    assert_eq!(
        tagged.destruct.map(|f| f as usize),
        sample.destruct.map(|f| f as usize)
    );
    assert_eq!(tagged.mirror.map(|f| f as usize), sample.mirror.map(|f| f as usize));
}

// ============================================================================
// Registry Tests
// ============================================================================

#[test]
fn test_registry_lookup() {
    let class = sample_class();
    assert_eq!(class_from_name("RuntimeTestSample"), Some(class));
    assert_eq!(class_from_name("Object"), Some(object_class()));
    assert_eq!(class_from_name("Class"), Some(class_class()));
    assert!(class_from_name("RuntimeTestMissing").is_none());

    let classes = all_classes();
    let position = |c: Class| classes.iter().position(|x| *x == c).unwrap();
    assert!(position(sample_class()) < position(tagged_class()));
}

#[test]
fn test_class_cell_is_idempotent() {
    static CELL: ClassCell = ClassCell::new();
    let name = common::unique_name("RuntimeTestCell");
    let first = CELL
        .get_or_try_init(|| ClassInit::new(name, object_class(), 16).register())
        .unwrap();
    let second = CELL
        .get_or_try_init(|| ClassInit::new(name, object_class(), 16).register())
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(CELL.get(), Some(first));
}

#[test]
fn test_class_cell_retries_after_failure() {
    static CELL: ClassCell = ClassCell::new();
    let name = common::unique_name("RuntimeTestRetry");
    assert!(CELL
        .get_or_try_init(|| ClassInit::new(name, object_class(), 0).register())
        .is_err());
    assert!(CELL.get().is_none());
    let class = CELL
        .get_or_try_init(|| ClassInit::new(name, object_class(), 16).register())
        .unwrap();
    assert_eq!(class.name(), name);
}

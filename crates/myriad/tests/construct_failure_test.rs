//! Constructor failure cleanup
//!
//! A constructor that fails after its superclass constructors ran must not
//! leak the buffers they allocated. Live heap bytes are tracked with a
//! counting global allocator, so this file holds a single test.
//!
//! Run with: `cargo test --test construct_failure_test`

use myriad::model::compartment::{
    CompartmentClassInit, CompartmentMethods, init_compartment_class,
};
use myriad::model::soma::{SomaCompartment, init_soma};
use myriad::model::{Compartment, CompartmentInit, SomaInit};
use myriad::runtime::{
    Class, ClassCell, ClassInit, ConstructFn, Method, Object, ObjectMethods, dispatch,
};
use myriad::Error;
use std::alloc::{GlobalAlloc, Layout, System};
use std::any::Any;
use std::sync::atomic::{AtomicIsize, Ordering};

struct Counting;

static LIVE: AtomicIsize = AtomicIsize::new(0);

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            LIVE.fetch_add(layout.size() as isize, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            LIVE.fetch_add(layout.size() as isize, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        LIVE.fetch_sub(layout.size() as isize, Ordering::SeqCst);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new = unsafe { System.realloc(ptr, layout, new_size) };
        if !new.is_null() {
            LIVE.fetch_add(new_size as isize - layout.size() as isize, Ordering::SeqCst);
        }
        new
    }
}

#[global_allocator]
static ALLOCATOR: Counting = Counting;

static STRICT_SOMA: ClassCell = ClassCell::new();

/// A soma subclass whose constructor rejects every instance after the soma
/// constructor has allocated the membrane trace.
fn strict_soma_class() -> Class {
    STRICT_SOMA
        .get_or_try_init(|| {
            let init = CompartmentClassInit {
                class: ClassInit::new(
                    "ConstructFailureStrictSoma",
                    init_soma()?,
                    std::mem::size_of::<SomaCompartment>(),
                )
                .with_methods(ObjectMethods {
                    construct: Some(Method::new(
                        "construct_failure_strict_soma_construct",
                        strict_soma_construct as ConstructFn,
                    )),
                    ..ObjectMethods::default()
                }),
                methods: CompartmentMethods::default(),
            };
            Class::define(init_compartment_class()?, &init)
        })
        .unwrap()
}

fn strict_soma_construct(object: Object, init: &dyn Any) -> myriad::Result<()> {
    dispatch::super_construct(strict_soma_class(), object, init)?;
    let id = unsafe { object.data::<SomaCompartment>() }.base.id;
    Err(Error::UnknownCompartment { id })
}

fn soma_init(steps: usize) -> SomaInit {
    SomaInit {
        compartment: CompartmentInit {
            id: 3,
            mechanisms: Vec::new(),
        },
        steps,
        vm0: -65.0,
        cm: 1.0,
    }
}

#[test]
fn test_failed_constructor_releases_inherited_buffers() {
    const STEPS: usize = 1_000_000;
    let class = strict_soma_class();

    // Registers every class and warms up lazily allocated state.
    assert_eq!(
        Compartment::new(class, &soma_init(1)).err(),
        Some(Error::UnknownCompartment { id: 3 })
    );

    let before = LIVE.load(Ordering::SeqCst);
    for _ in 0..4 {
        assert_eq!(
            Compartment::new(class, &soma_init(STEPS)).err(),
            Some(Error::UnknownCompartment { id: 3 })
        );
    }
    let leaked = LIVE.load(Ordering::SeqCst) - before;

    let trace_bytes = (STEPS * std::mem::size_of::<f64>()) as isize;
    assert!(
        leaked < trace_bytes,
        "{leaked} bytes still live after failed constructions"
    );
}

//! Class descriptors and class construction.
//!
//! A class is itself an object: its descriptor starts with an
//! [`ObjectHeader`] pointing at its metaclass, and is built by the same
//! allocator and constructor chain as any instance. The root `Class`
//! constructor fills in the descriptor, inherits every method-table slot from
//! the superclass and applies the overrides named in [`ClassInit`].
//! [`Class::define`] registers the class by name once every constructor in
//! the metaclass chain has succeeded.
//!
//! # Descriptor extension
//!
//! A domain hierarchy that introduces its own virtual operations declares a
//! metaclass whose descriptor is a `#[repr(C)]` struct starting with
//! [`ClassDescriptor`]:
//!
//! ```text
//! CompartmentClassDescriptor
//! +----------------------------+
//! | class: ClassDescriptor     |  header, super, device_class, size,
//! |                            |  name, buffers, methods
//! | simulate                   |  slots introduced by the metaclass
//! | add_mechanism              |
//! +----------------------------+
//! ```
//!
//! Slot inheritance copies the bytes from the start of `methods` up to the
//! end of the smaller of the two descriptors, so extension slots are
//! inherited exactly like the base slots.
//!
//! # Thread Safety
//!
//! Descriptors are written once, during their constructor, and only read
//! afterwards. The device mirror address is the one field set later; it is
//! atomic and set at most once.

use crate::error::{Error, Result};
use crate::runtime::bootstrap::{self, class_class, object_class};
use crate::runtime::device::{Device, DevicePtr};
use crate::runtime::dispatch;
use crate::runtime::mirror::{OwnedBuffer, Staging};
use crate::runtime::object::{Object, ObjectHeader};
use crate::runtime::{registry, symbol};
use myriad_log::debug;
use std::any::Any;
use std::fmt;
use std::mem::offset_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Builds a freshly allocated instance from a typed configuration.
pub type ConstructFn = fn(Object, &dyn Any) -> Result<()>;

/// Releases an instance and everything it owns.
pub type DestructFn = fn(Object) -> Result<()>;

/// Fixes up the working copy of an object about to be written to a device.
pub type MirrorFn = fn(Object, &mut Staging, &dyn Device, bool) -> Result<()>;

/// Reconciles a host instance from its device copy.
pub type UpdateFn = fn(Object, &dyn Device, DevicePtr) -> Result<()>;

/// The four virtual operations every class has.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ObjectMethodTable {
    /// Constructor.
    pub construct: Option<ConstructFn>,
    /// Destructor.
    pub destruct: Option<DestructFn>,
    /// Mirror-to-device fixup.
    pub mirror: Option<MirrorFn>,
    /// Update-from-device.
    pub update_from_device: Option<UpdateFn>,
}

impl fmt::Debug for ObjectMethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectMethodTable")
            .field("construct", &self.construct.map(|imp| imp as usize))
            .field("destruct", &self.destruct.map(|imp| imp as usize))
            .field("mirror", &self.mirror.map(|imp| imp as usize))
            .field(
                "update_from_device",
                &self.update_from_device.map(|imp| imp as usize),
            )
            .finish()
    }
}

/// Raw class descriptor.
///
/// Zeroed storage is a valid, empty descriptor: every pointer-like field is
/// either raw or an `Option`.
#[repr(C)]
pub struct ClassDescriptor {
    /// Metaclass of this class.
    pub(crate) header: ObjectHeader,
    /// Parent class; the root `Object` class is its own parent.
    pub(crate) super_class: *const ClassDescriptor,
    /// Device mirror address, zero until mirrored.
    pub(crate) device_class: AtomicU64,
    /// Byte size of instances of this class.
    pub(crate) size: usize,
    pub(crate) name: Option<&'static str>,
    /// Owned buffers introduced by this level of the hierarchy.
    pub(crate) buffers: Option<&'static [OwnedBuffer]>,
    /// Inheritable method table. Extension slots follow it.
    pub methods: ObjectMethodTable,
}

// SAFETY: descriptors are immutable after construction apart from the
// atomic device_class word, and are never freed.
unsafe impl Send for ClassDescriptor {}
unsafe impl Sync for ClassDescriptor {}

/// Byte offset of the first inheritable slot.
pub(crate) const METHODS_OFFSET: usize = offset_of!(ClassDescriptor, methods);

// Descriptors are copied byte for byte when mirrored, so they must not
// contain padding.
const _: () = assert!(
    size_of::<ObjectHeader>()
        + size_of::<*const ClassDescriptor>()
        + size_of::<AtomicU64>()
        + size_of::<usize>()
        + size_of::<Option<&'static str>>()
        + size_of::<Option<&'static [OwnedBuffer]>>()
        + size_of::<ObjectMethodTable>()
        == size_of::<ClassDescriptor>()
);

/// A named implementation of a virtual operation.
///
/// `symbol` is the logical name the device uses for its compiled variant
/// of `imp`.
#[derive(Clone, Copy)]
pub struct Method<F> {
    /// Logical name of the implementation.
    pub symbol: &'static str,
    /// Host implementation.
    pub imp: F,
}

impl<F: Copy> Method<F> {
    /// Pairs an implementation with its symbol.
    #[must_use]
    pub const fn new(symbol: &'static str, imp: F) -> Self {
        Method { symbol, imp }
    }

    /// Host address of the implementation.
    pub(crate) fn addr(&self) -> usize {
        const { assert!(size_of::<F>() == size_of::<usize>()) };
        // SAFETY: F is a function pointer type, the same size as usize.
        unsafe { std::mem::transmute_copy::<F, usize>(&self.imp) }
    }
}

impl<F> fmt::Debug for Method<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("symbol", &self.symbol).finish()
    }
}

/// Overrides for the four base operations; `None` inherits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMethods {
    /// Constructor override.
    pub construct: Option<Method<ConstructFn>>,
    /// Destructor override.
    pub destruct: Option<Method<DestructFn>>,
    /// Mirror override.
    pub mirror: Option<Method<MirrorFn>>,
    /// Update-from-device override.
    pub update_from_device: Option<Method<UpdateFn>>,
}

/// Configuration consumed by the root `Class` constructor.
///
/// Metaclasses that introduce extra slots wrap this in their own
/// configuration and pass it on to their super constructor.
#[derive(Debug, Clone, Copy)]
pub struct ClassInit {
    /// Unique class name.
    pub name: &'static str,
    /// Parent class.
    pub super_class: Class,
    /// Byte size of instances.
    pub instance_size: usize,
    /// Owned buffers introduced by this class.
    pub buffers: &'static [OwnedBuffer],
    /// Base operation overrides.
    pub methods: ObjectMethods,
}

impl ClassInit {
    /// Configuration with no buffers and no overrides.
    #[must_use]
    pub fn new(name: &'static str, super_class: Class, instance_size: usize) -> Self {
        ClassInit {
            name,
            super_class,
            instance_size,
            buffers: &[],
            methods: ObjectMethods::default(),
        }
    }

    /// Declares the owned buffers this class introduces.
    #[must_use]
    pub fn with_buffers(mut self, buffers: &'static [OwnedBuffer]) -> Self {
        self.buffers = buffers;
        self
    }

    /// Sets the base operation overrides.
    #[must_use]
    pub fn with_methods(mut self, methods: ObjectMethods) -> Self {
        self.methods = methods;
        self
    }

    /// Builds and registers a class whose metaclass is the root `Class`.
    ///
    /// # Errors
    ///
    /// See [`Class::define`].
    pub fn register(&self) -> Result<Class> {
        Class::define(class_class(), self)
    }
}

/// Handle to a class descriptor.
///
/// Classes live for the whole process, so the handle is `Copy` and compares
/// by descriptor identity.
///
/// # Example
///
/// ```rust
/// use myriad::runtime::{ClassInit, object_class};
///
/// #[repr(C)]
/// struct Point {
///     header: myriad::runtime::ObjectHeader,
///     x: f64,
///     y: f64,
/// }
///
/// let point = ClassInit::new("DocPoint", object_class(), size_of::<Point>())
///     .register()
///     .unwrap();
///
/// assert_eq!(point.name(), "DocPoint");
/// assert_eq!(point.instance_size(), size_of::<Point>());
/// assert!(point.is_subclass_of(object_class()));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Class {
    ptr: NonNull<ClassDescriptor>,
}

// SAFETY: descriptors are never freed and are read-only after construction
// except for the atomic device_class word.
unsafe impl Send for Class {}
unsafe impl Sync for Class {}

impl Class {
    /// # Safety
    ///
    /// `ptr` must point to a class descriptor that is never freed.
    pub(crate) const unsafe fn from_raw(ptr: NonNull<ClassDescriptor>) -> Self {
        Class { ptr }
    }

    pub(crate) const fn from_static(descriptor: &'static ClassDescriptor) -> Self {
        Class {
            // SAFETY: references are never null.
            ptr: unsafe { NonNull::new_unchecked(std::ptr::from_ref(descriptor).cast_mut()) },
        }
    }

    /// Views a class object as a class.
    ///
    /// # Errors
    ///
    /// [`Error::NotAnInstance`] if `object` is not a class descriptor.
    pub fn from_object(object: Object) -> Result<Self> {
        if !object.is_class() {
            return Err(Error::NotAnInstance {
                expected: "Class",
                class: object.class().name(),
            });
        }
        // SAFETY: instances of Class start with a ClassDescriptor and are
        // allocated from the never-freed host arena or are the static roots.
        Ok(unsafe { Class::from_raw(object_ptr_cast(object)) })
    }

    /// Builds and registers a class as an instance of `metaclass`.
    ///
    /// `init` is the configuration `metaclass`'s constructor expects:
    /// [`ClassInit`] for the root `Class`, or a metaclass-specific type that
    /// embeds one.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAnInstance`] if `metaclass` does not describe classes
    /// - [`Error::InitArgsMismatch`] if `init` has the wrong type
    /// - [`Error::ZeroSizedClass`] for a zero instance size
    /// - [`Error::ClassAlreadyExists`] if the name is taken
    pub fn define(metaclass: Class, init: &dyn Any) -> Result<Class> {
        if !metaclass.is_subclass_of(class_class()) {
            return Err(Error::NotAnInstance {
                expected: "Class",
                class: metaclass.name(),
            });
        }
        let object = dispatch::new(metaclass, init)?;
        let class = Class::from_object(object)?;
        // Registered only once every metaclass constructor has succeeded.
        registry::register(class)?;
        debug!(
            "registered class {} (super {}, {} bytes)",
            class.name(),
            class.super_class().map_or("-", Class::name),
            class.instance_size()
        );
        Ok(class)
    }

    fn descriptor(self) -> &'static ClassDescriptor {
        // SAFETY: descriptors are never freed.
        unsafe { &*self.ptr.as_ptr() }
    }

    /// Raw descriptor pointer.
    #[must_use]
    pub const fn as_ptr(self) -> *const ClassDescriptor {
        self.ptr.as_ptr()
    }

    /// The class as an instance of its metaclass.
    #[must_use]
    pub fn as_object(self) -> Object {
        // SAFETY: every descriptor starts with an initialized header.
        unsafe { Object::from_raw(self.ptr.cast()) }
    }

    /// Class name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.descriptor().name.unwrap_or("<unnamed>")
    }

    /// Returns the superclass.
    ///
    /// The root `Object` class is its own superclass.
    ///
    /// # Errors
    ///
    /// [`Error::MissingSuperclass`] if the descriptor's super pointer is
    /// null, which only happens for a class whose constructor never ran.
    pub fn super_class(self) -> Result<Class> {
        NonNull::new(self.descriptor().super_class.cast_mut())
            .map(|ptr| unsafe { Class::from_raw(ptr) })
            .ok_or(Error::MissingSuperclass { class: self.name() })
    }

    /// Byte size of instances of this class.
    #[must_use]
    pub fn instance_size(self) -> usize {
        self.descriptor().size
    }

    /// Device mirror of this class, if it has been mirrored.
    #[must_use]
    pub fn device_class(self) -> Option<DevicePtr> {
        DevicePtr::new(self.descriptor().device_class.load(Ordering::Acquire))
    }

    /// Records the device mirror unless one is already set; returns the
    /// mirror that is in effect afterwards.
    pub(crate) fn set_device_class(self, ptr: DevicePtr) -> DevicePtr {
        match self.descriptor().device_class.compare_exchange(
            0,
            ptr.addr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => ptr,
            Err(existing) => DevicePtr::new(existing).unwrap_or(ptr),
        }
    }

    /// The base method table.
    #[must_use]
    pub fn methods(self) -> &'static ObjectMethodTable {
        &self.descriptor().methods
    }

    /// Owned buffers introduced by this class (not its ancestors).
    #[must_use]
    pub fn buffers(self) -> &'static [OwnedBuffer] {
        self.descriptor().buffers.unwrap_or(&[])
    }

    /// Returns `true` for the root `Object` class, the only class that is
    /// its own superclass.
    #[must_use]
    pub fn is_root(self) -> bool {
        std::ptr::eq(self.descriptor().super_class, self.as_ptr())
    }

    /// Iterates from this class up to and including the root `Object` class.
    pub fn ancestors(self) -> impl Iterator<Item = Class> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            next = match current.super_class() {
                Ok(parent) if !current.is_root() => Some(parent),
                _ => None,
            };
            Some(current)
        })
    }

    /// Returns `true` if `class` is this class or one of its ancestors.
    ///
    /// Every class is a subclass of the root `Object` class.
    ///
    /// # Example
    ///
    /// ```rust
    /// use myriad::runtime::{class_class, object_class};
    ///
    /// assert!(class_class().is_subclass_of(object_class()));
    /// assert!(!object_class().is_subclass_of(class_class()));
    /// ```
    #[must_use]
    pub fn is_subclass_of(self, class: Class) -> bool {
        if class == object_class() {
            return true;
        }
        self.ancestors().any(|ancestor| ancestor == class)
    }

    /// Typed view of an extended descriptor.
    ///
    /// # Errors
    ///
    /// [`Error::DescriptorTooSmall`] if this descriptor is smaller than `T`.
    ///
    /// # Safety
    ///
    /// `T` must be a `#[repr(C)]` struct starting with [`ClassDescriptor`]
    /// whose layout matches the descriptor's metaclass.
    pub unsafe fn extension<T>(self) -> Result<&'static T> {
        let actual = self.as_object().size();
        if actual < size_of::<T>() {
            return Err(Error::DescriptorTooSmall {
                class: self.name(),
                required: size_of::<T>(),
                actual,
            });
        }
        // SAFETY: size checked above; layout is the caller's contract.
        Ok(unsafe { &*self.ptr.as_ptr().cast::<T>() })
    }

    /// Mirrors this class to `device`, once per process.
    ///
    /// Later calls return the existing mirror without allocating. Mirroring
    /// either root class establishes both.
    ///
    /// # Errors
    ///
    /// - [`Error::SuperNotMirrored`] if the superclass has no mirror yet
    /// - [`Error::DeviceSymbolMissing`] if an overridden operation has no
    ///   device variant
    /// - any device allocation or copy failure
    pub fn mirror(self, device: &dyn Device) -> Result<DevicePtr> {
        if let Some(existing) = self.device_class() {
            return Ok(existing);
        }

        let _gate = bootstrap::mirror_gate();
        if let Some(existing) = self.device_class() {
            return Ok(existing);
        }

        if bootstrap::is_root(self) {
            bootstrap::mirror_roots_locked(device)?;
            return self
                .device_class()
                .ok_or(Error::ClassNotMirrored { class: self.name() });
        }

        let ptr = dispatch::mirror_to_device(self.as_object(), device, true)?;
        let ptr = self.set_device_class(ptr);
        debug!("mirrored class {} at {ptr}", self.name());
        Ok(ptr)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("size", &self.instance_size())
            .field("device_class", &self.device_class())
            .finish()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn object_ptr_cast(object: Object) -> NonNull<ClassDescriptor> {
    // SAFETY: Object pointers are never null.
    unsafe { NonNull::new_unchecked(object.as_ptr().cast()) }
}

/// Constructor of the root `Class`: fills the descriptor, inherits slots and
/// applies overrides. Registration happens in [`Class::define`].
pub(crate) fn class_construct(object: Object, init: &dyn Any) -> Result<()> {
    dispatch::super_construct(class_class(), object, init)?;

    let init = init
        .downcast_ref::<ClassInit>()
        .ok_or(Error::InitArgsMismatch {
            class: object.class().name(),
            expected: std::any::type_name::<ClassInit>(),
        })?;
    if init.instance_size == 0 {
        return Err(Error::ZeroSizedClass { name: init.name });
    }
    if registry::class_from_name(init.name).is_some() {
        return Err(Error::ClassAlreadyExists { name: init.name });
    }

    let parent = init.super_class;
    let inherited_end = parent.as_object().size().min(object.size());
    if inherited_end > METHODS_OFFSET {
        // SAFETY: both descriptors are at least `inherited_end` bytes and
        // distinct allocations.
        unsafe {
            std::ptr::copy_nonoverlapping(
                parent.as_ptr().cast::<u8>().add(METHODS_OFFSET),
                object.as_ptr().cast::<u8>().add(METHODS_OFFSET),
                inherited_end - METHODS_OFFSET,
            );
        }
    }

    // SAFETY: the storage is a zeroed descriptor owned by this constructor.
    let descriptor = unsafe { object.data_mut::<ClassDescriptor>() };
    descriptor.super_class = parent.as_ptr();
    descriptor.size = init.instance_size;
    descriptor.name = Some(init.name);
    descriptor.buffers = Some(init.buffers);

    let methods = &mut descriptor.methods;
    symbol::bind(&mut methods.construct, init.methods.construct);
    symbol::bind(&mut methods.destruct, init.methods.destruct);
    symbol::bind(&mut methods.mirror, init.methods.mirror);
    symbol::bind(&mut methods.update_from_device, init.methods.update_from_device);
    Ok(())
}

/// Destructor of the root `Class`. Classes are never destroyed.
pub(crate) fn class_destruct(object: Object) -> Result<()> {
    Err(Error::ClassDestruction {
        class: Class::from_object(object)?.name(),
    })
}

//! Traits implemented by Rust subclasses and by the classes they extend.
//!
//! A subclass is a plain Rust struct implementing [`ObjectSubclass`]. Its
//! parent is a native class implementing [`IsSubclassable`]; each class in
//! the parent chain installs the virtual slots it knows how to forward to
//! Rust. Interfaces are listed in [`ObjectSubclass::Interfaces`] and
//! implement [`IsImplementable`](crate::IsImplementable).
//!
//! # Example
//!
//! ```rust
//! use objbridge::prelude::*;
//!
//! struct Counter {
//!     count: Property<i32>,
//!     bumped: Signal<(i32,)>,
//! }
//!
//! impl ObjectImpl for Counter {}
//!
//! impl ObjectSubclass for Counter {
//!     type ParentClass = Object;
//!     type Interfaces = ();
//!
//!     fn new(cx: &Construct) -> objbridge::Result<Self> {
//!         Ok(Counter {
//!             count: Property::new(cx, ParamSpec::int("count", "", "", 0, 100, 10, ParamFlags::READWRITE))?,
//!             bumped: Signal::new(cx, "bumped", SignalFlags::RUN_LAST)?,
//!         })
//!     }
//!
//!     fn members(&self, m: &mut Members) {
//!         self.count.bind(m);
//!         self.bumped.bind(m);
//!     }
//! }
//!
//! let counter = RefPtr::<Counter>::new(&ConstructParams::new()).unwrap();
//! assert_eq!(counter.count.get(), 10);
//! counter.count.set(11);
//! assert_eq!(counter.object().property_value::<i32>("count").unwrap(), 11);
//! ```

use crate::bridge::{Members, instance_of_raw};
use crate::definition::{self, LayerClaim, Layers, Member};
use crate::error::Result;
use crate::interface::InterfaceList;
use crate::property::PropertyDecl;
use crate::signal::SignalDecl;
use crate::trampoline::{checked, companion, guard};
use objbridge_log::trace;
use objbridge_rt::{
    InstanceInitFunc, Instance, Object, StaticType, Type, TypeClass, class_peek, object_class, object_type,
};
use std::marker::PhantomData;

/// What a subclass constructor is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
    /// Registration only: there is no instance, and the value is dropped
    /// right away. Slots built now install their properties and signals.
    Registration,
    /// Rust code asked for a new instance.
    Static,
    /// The runtime is creating an instance through the class constructor.
    Native,
}

/// Context handed to [`ObjectSubclass::new`].
#[derive(Debug)]
pub struct Construct {
    type_: Type,
    instance: *mut Instance,
    kind: ConstructKind,
}

impl Construct {
    pub(crate) fn new(type_: Type, instance: *mut Instance, kind: ConstructKind) -> Self {
        Construct {
            type_,
            instance,
            kind,
        }
    }

    /// The registered type of the subclass.
    pub fn type_(&self) -> Type {
        self.type_
    }

    pub fn kind(&self) -> ConstructKind {
        self.kind
    }

    pub fn is_registration(&self) -> bool {
        self.kind == ConstructKind::Registration
    }

    /// A new reference to the instance being built.
    ///
    /// Storing it inside the subclass keeps the instance alive forever.
    pub fn object(&self) -> Option<Object> {
        // SAFETY: the instance outlives construction
        unsafe { Object::from_raw_none(self.instance) }
    }
}

/// Virtual methods of the object class a subclass may define.
///
/// Leaving a constant at `None` keeps the parent's behavior.
pub trait ObjectImpl: Sized + 'static {
    /// Runs after construction, once the parent's `constructed` ran.
    const CONSTRUCTED: Option<fn(&Self)> = None;
    /// Runs when the instance is disposed, before the parent's `dispose`.
    const DISPOSE: Option<fn(&Self)> = None;
}

/// A Rust type registered as a subclass of a native class.
pub trait ObjectSubclass: ObjectImpl + Send + Sync {
    /// Public type name. With a name the type can also be created by the
    /// runtime (`Object::new`); without one a private name is generated.
    const NAME: Option<&'static str> = None;

    /// Explicit owners of members more than one layer could dispatch.
    const DEFINES: &'static [Member] = &[];

    /// Native per-instance initializer, run before any Rust code.
    const INSTANCE_INIT: Option<InstanceInitFunc> = None;

    type ParentClass: IsSubclassable<Self>;

    /// Implemented interfaces, as a tuple. Use `()` for none.
    type Interfaces: InterfaceList<Self>;

    /// Builds the Rust state of a new instance.
    ///
    /// Also called once at registration with a [`ConstructKind::Registration`]
    /// context; the value built then is dropped.
    ///
    /// # Errors
    ///
    /// Any error aborts the construction.
    fn new(cx: &Construct) -> Result<Self>;

    /// Binds [`Property`](crate::Property) and [`Signal`](crate::Signal)
    /// fields to the companion they live in.
    fn members(&self, _members: &mut Members<'_>) {}

    /// Properties installed at class initialization.
    fn properties() -> Vec<PropertyDecl> {
        Vec::new()
    }

    /// Signals registered at class initialization.
    fn signals() -> Vec<SignalDecl> {
        Vec::new()
    }

    /// Last step of class initialization, after every layer.
    fn class_init(_klass: &mut TypeClass) {}
}

/// A native class Rust subclasses can extend.
///
/// # Safety
///
/// `class_init` may only write class slots with the signatures the class's
/// callers use to read them.
pub unsafe trait IsSubclassable<T: ObjectSubclass>: StaticType + 'static {
    /// This class's layer, after its parents' layers.
    const LAYERS: Layers;

    /// Installs this layer's trampolines. Implementations chain to their
    /// parent class first.
    fn class_init(klass: &mut TypeClass);
}

/// Layers and definition check of one subclass.
pub(crate) struct Check<T>(PhantomData<T>);

impl<T: ObjectSubclass> Check<T> {
    pub(crate) const LAYERS: Layers =
        <T::ParentClass as IsSubclassable<T>>::LAYERS.concat(<T::Interfaces as InterfaceList<T>>::LAYERS);

    /// Fails to compile for an ambiguous subclass.
    pub(crate) const OK: () = definition::check(&Self::LAYERS, T::DEFINES);
}

/// Whether `layer` dispatches `member` to `T`.
pub fn layer_defines<T: ObjectSubclass>(layer: &str, member: &str) -> bool {
    definition::defines(&Check::<T>::LAYERS, T::DEFINES, layer, member)
}

/// Layer name of the root object class.
pub const OBJECT_LAYER: &str = "object";

const OBJECT_MEMBERS: &[&str] = &["constructed", "dispose"];

/// The root class.
unsafe impl<T: ObjectSubclass> IsSubclassable<T> for Object {
    const LAYERS: Layers = Layers::EMPTY.with(LayerClaim::new(
        OBJECT_LAYER,
        OBJECT_MEMBERS,
        (T::CONSTRUCTED.is_some() as u64) | ((T::DISPOSE.is_some() as u64) << 1),
    ));

    fn class_init(klass: &mut TypeClass) {
        if layer_defines::<T>(OBJECT_LAYER, "constructed") {
            klass.constructed = Some(constructed_trampoline::<T>);
        }
        if layer_defines::<T>(OBJECT_LAYER, "dispose") {
            klass.dispose = Some(dispose_trampoline::<T>);
        }
    }
}

/// Marker for the initially-unowned root class: new instances start with
/// a floating reference.
#[derive(Debug, Clone, Copy)]
pub struct InitiallyUnowned;

impl StaticType for InitiallyUnowned {
    fn static_type() -> Type {
        Type::INITIALLY_UNOWNED
    }
}

unsafe impl<T: ObjectSubclass> IsSubclassable<T> for InitiallyUnowned {
    const LAYERS: Layers = <Object as IsSubclassable<T>>::LAYERS;

    fn class_init(klass: &mut TypeClass) {
        <Object as IsSubclassable<T>>::class_init(klass);
    }
}

/// The class `T` extends, built by registration.
pub(crate) fn parent_class<T: ObjectSubclass>() -> Option<&'static TypeClass> {
    class_peek(<T::ParentClass as StaticType>::static_type())
}

unsafe extern "C" fn constructed_trampoline<T: ObjectSubclass>(obj: *mut Instance) {
    guard("constructed", || {
        if let Some(parent) = parent_class::<T>().and_then(|k| k.constructed) {
            // SAFETY: chaining up on the instance we were called with
            unsafe { parent(obj) };
        }
        if let Some(f) = T::CONSTRUCTED {
            // SAFETY: the runtime passes a live instance
            f(unsafe { companion::<T>(obj) });
        }
    });
}

unsafe extern "C" fn dispose_trampoline<T: ObjectSubclass>(obj: *mut Instance) {
    guard("dispose", || {
        // SAFETY: the runtime passes a live instance
        match unsafe { instance_of_raw(obj) } {
            Some(bridge) => {
                if let Some(f) = T::DISPOSE {
                    f(checked::<T>(bridge));
                }
            }
            // a scoped owner detached its state before releasing
            None => trace!("dispose of '{}' without its object", unsafe { object_type(obj) }.name()),
        }
        if let Some(parent) = parent_class::<T>().and_then(|k| k.dispose) {
            // SAFETY: as above
            unsafe { parent(obj) };
        }
    });
}

/// Reads a class's virtual slot for an instance.
///
/// # Safety
///
/// `obj` must be a live instance and `F` the slot's signature.
pub unsafe fn class_vfunc<F: Copy>(obj: *mut Instance, slot: usize) -> Option<F> {
    // SAFETY: caller contract
    unsafe { object_class(obj).vfunc::<F>(slot) }
}

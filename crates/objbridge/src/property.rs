//! Property slots backed by Rust fields.
//!
//! A [`Property<V>`] is a field of a subclass that the runtime reads and
//! writes through the class's `set_property`/`get_property` slots. The
//! class dispatch finds the field from the instance alone: when a companion
//! binds its members, each slot's byte offset inside the companion is
//! recorded on the property's specification, keyed by the class and the
//! property id.
//!
//! # Installation
//!
//! Properties are installed on the class lazily, the first time a slot for
//! them is built, or eagerly from [`ObjectSubclass::properties`]. A name
//! the class already knows from a native ancestor or an interface is
//! re-declared as an override so this class's dispatch handles it.
//!
//! [`ObjectSubclass::properties`]: crate::ObjectSubclass::properties

use crate::bridge::{Members, MemberLink, bridge_ptr};
use crate::error::{Error, Result};
use crate::proxy::PropertyProxy;
use crate::registrar::class_key;
use crate::sidetable::{spec_attach, spec_lookup};
use crate::subclass::{Construct, ObjectSubclass};
use crate::trampoline::{checked, guard};
use objbridge_log::{trace, warn};
use objbridge_rt::param::canonical_name;
use objbridge_rt::{
    FromValue, Instance, ParamSpec, Quark, StaticType, ToValue, Type, TypeClass, Value, class_ref,
    class_unref, object_is_constructing, object_notify_by_pspec, type_get_qdata, type_set_qdata,
    warn_invalid_property_id,
};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Rust types a property slot can hold.
pub trait PropertyValue: StaticType + ToValue + FromValue + Clone + Send + Sync + 'static {}

impl<V> PropertyValue for V where V: StaticType + ToValue + FromValue + Clone + Send + Sync + 'static {}

/// Serializes property installation across classes.
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

static NEXT_PROP_ID: AtomicU32 = AtomicU32::new(1);

fn type_prop_key(name: &str) -> Quark {
    Quark::from_string(&format!("OBJBRIDGE__{}", canonical_name(name)))
}

fn offset_key(class_key: usize, prop_id: u32) -> Quark {
    Quark::from_string(&format!("OBJBRIDGE__{class_key:x}_{prop_id}"))
}

/// A property declared up front, at class initialization.
#[derive(Debug, Clone)]
pub enum PropertyDecl {
    /// A property this class introduces.
    Install(ParamSpec),
    /// A property of a native ancestor or an implemented interface that
    /// this class handles itself.
    Override(String),
}

impl PropertyDecl {
    pub fn new(spec: ParamSpec) -> Self {
        PropertyDecl::Install(spec)
    }

    pub fn overriding(name: &str) -> Self {
        PropertyDecl::Override(name.to_string())
    }

    pub(crate) fn install(&self, klass: &TypeClass) -> Result<(ParamSpec, u32)> {
        match self {
            PropertyDecl::Install(spec) => install_on(klass, Some(spec.clone()), spec.name()),
            PropertyDecl::Override(name) => install_on(klass, None, name),
        }
    }
}

/// Makes `name` a property handled by `ty`'s own dispatch.
///
/// Returns the specification callers see (the redirect target for
/// overrides) and the id this class uses for it.
pub(crate) fn add_property(ty: Type, spec: Option<ParamSpec>, name: &str) -> Result<(ParamSpec, u32)> {
    // building the class may run class_init, which installs properties itself
    let klass = class_ref(ty).ok_or(objbridge_rt::Error::InvalidType(ty.into_raw()))?;
    let result = install_on(klass, spec, name);
    class_unref(klass);
    result
}

fn install_on(klass: &TypeClass, spec: Option<ParamSpec>, name: &str) -> Result<(ParamSpec, u32)> {
    let _lock = INSTALL_LOCK.lock();
    let ty = klass.type_();
    let key = type_prop_key(name);

    let existing = klass.find_property(name);
    let prop_id = match type_get_qdata(ty, key) {
        Some(id) if existing.is_some() => id as u32,
        _ => {
            let id = NEXT_PROP_ID.fetch_add(1, Ordering::Relaxed);
            match spec {
                Some(spec) if existing.is_none() => klass.install_property(id, spec)?,
                _ => {
                    klass.override_property(id, name)?;
                }
            }
            id
        }
    };
    type_set_qdata(ty, key, prop_id as usize);

    let target = klass
        .find_property(name)
        .ok_or_else(|| objbridge_rt::Error::PropertyNotFound {
            type_name: ty.name().to_string(),
            name: name.to_string(),
        })?;
    trace!("'{}' handles property '{}' as id {}", ty.name(), target.name(), prop_id);
    Ok((target, prop_id))
}

/// Type-erased head of every [`Property`], reached by offset from a companion.
#[repr(C)]
pub(crate) struct PropertyHeader {
    link: MemberLink,
    get: unsafe fn(*const PropertyHeader) -> Value,
    set: unsafe fn(*const PropertyHeader, &Value),
}

/// A property whose value lives in a Rust field.
///
/// # Example
///
/// ```rust,ignore
/// struct Person {
///     age: Property<i32>,
/// }
///
/// impl ObjectSubclass for Person {
///     fn new(cx: &Construct) -> Result<Self> {
///         Ok(Person {
///             age: Property::new(cx, ParamSpec::int("age", "Age", "", 0, 150, 0, ParamFlags::READWRITE))?,
///         })
///     }
///
///     fn members(&self, m: &mut Members) {
///         self.age.bind(m);
///     }
///     // ...
/// }
/// ```
#[repr(C)]
pub struct Property<V> {
    header: PropertyHeader,
    spec: ParamSpec,
    prop_id: u32,
    // built by the registration pass, never linked
    collecting: bool,
    value: RwLock<V>,
}

impl<V: PropertyValue> Property<V> {
    /// Declares a property this class introduces, or reuses the class's
    /// existing one of the same name.
    ///
    /// # Errors
    ///
    /// - installation errors from the runtime
    /// - [`Error::SlotTypeMismatch`] if the property does not hold `V`
    pub fn new(cx: &Construct, spec: ParamSpec) -> Result<Self> {
        let name = spec.name().to_string();
        let (spec, prop_id) = add_property(cx.type_(), Some(spec), &name)?;
        Self::with_spec(spec, prop_id, cx.is_registration())
    }

    /// Handles an inherited or interface property named `name`.
    ///
    /// # Errors
    ///
    /// As [`Property::new`]; also fails if no ancestor or interface
    /// declares `name`.
    pub fn override_(cx: &Construct, name: &str) -> Result<Self> {
        let (spec, prop_id) = add_property(cx.type_(), None, name)?;
        Self::with_spec(spec, prop_id, cx.is_registration())
    }

    fn with_spec(spec: ParamSpec, prop_id: u32, collecting: bool) -> Result<Self> {
        let mismatch = || Error::SlotTypeMismatch {
            name: spec.name().to_string(),
            spec_type: spec.value_type().name(),
            slot_type: std::any::type_name::<V>(),
        };
        if !spec.value_type().is_a(V::static_type()) {
            return Err(mismatch());
        }
        let initial = V::from_value(&spec.default_value()).ok_or_else(mismatch)?;

        Ok(Property {
            header: PropertyHeader {
                link: MemberLink::new(),
                get: get_erased::<V>,
                set: set_erased::<V>,
            },
            spec,
            prop_id,
            collecting,
            value: RwLock::new(initial),
        })
    }

    /// Records this slot's place in its companion. Call from
    /// [`ObjectSubclass::members`].
    pub fn bind(&self, members: &mut Members<'_>) {
        let Some(offset) = members.offset_of(self) else {
            warn!("property '{}' is not a field of its object", self.spec.name());
            return;
        };
        self.header.link.bind(offset);

        let key = offset_key(members.class_key(), self.prop_id);
        if spec_lookup(&self.spec, key).is_none() {
            spec_attach(&self.spec, key, offset);
        }
    }

    pub fn get(&self) -> V {
        self.value.read().clone()
    }

    /// Borrows the value without cloning it.
    pub fn read(&self) -> RwLockReadGuard<'_, V> {
        self.value.read()
    }

    /// Stores `value` and emits `notify`.
    pub fn set(&self, value: V) {
        self.set_value(value, true);
    }

    pub fn set_value(&self, value: V, notify: bool) {
        *self.value.write() = value;
        if notify {
            self.notify();
        }
    }

    /// Emits `notify` for this property on the owning instance.
    ///
    /// Does nothing for a slot that is not bound to a live instance. A
    /// slot of a real instance that was never bound is reported, since its
    /// `members` forgot it.
    pub fn notify(&self) {
        // SAFETY: a bound slot lives inside its companion
        let Some(bridge) = (unsafe { self.header.link.bridge(self) }) else {
            if self.collecting {
                trace!("notify for unbound property '{}'", self.spec.name());
            } else {
                warn!(
                    "notify for unbound property '{}' dropped; is it bound in members()?",
                    self.spec.name()
                );
            }
            return;
        };
        let instance = bridge.instance();
        if !instance.is_null() {
            // SAFETY: a linked companion's instance is live
            unsafe { object_notify_by_pspec(instance, &self.spec) };
        }
    }

    pub fn spec(&self) -> &ParamSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// The id the class dispatch knows this property by.
    pub fn prop_id(&self) -> u32 {
        self.prop_id
    }

    /// A by-name handle on this property of the owning instance.
    pub fn proxy(&self) -> Option<PropertyProxy<V>> {
        // SAFETY: as in notify
        let bridge = unsafe { self.header.link.bridge(self) }?;
        let object = bridge.object()?;
        Some(PropertyProxy::from_spec(object, self.spec.clone()))
    }
}

impl<V: fmt::Debug> fmt::Debug for Property<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.spec.name())
            .field("prop_id", &self.prop_id)
            .field("value", &*self.value.read())
            .finish()
    }
}

unsafe fn get_erased<V: PropertyValue>(header: *const PropertyHeader) -> Value {
    // SAFETY: the header heads a Property<V> (repr(C), first field)
    let property = unsafe { &*header.cast::<Property<V>>() };
    property.value.read().to_value()
}

unsafe fn set_erased<V: PropertyValue>(header: *const PropertyHeader, value: &Value) {
    // SAFETY: as in get_erased
    let property = unsafe { &*header.cast::<Property<V>>() };
    match V::from_value(value) {
        Some(v) => *property.value.write() = v,
        None => warn!(
            "property '{}' cannot hold a value of type '{}'",
            property.spec.name(),
            value.type_().name()
        ),
    }
}

/// Finds the slot backing `prop_id` of `obj`.
///
/// # Safety
///
/// `obj` must be a live instance.
unsafe fn resolve<'a, T: ObjectSubclass>(
    obj: *mut Instance,
    prop_id: u32,
    pspec: &ParamSpec,
) -> Option<&'a PropertyHeader> {
    // SAFETY: caller contract
    let Some(base) = (unsafe { bridge_ptr(obj) }) else {
        // SAFETY: as above
        if unsafe { object_is_constructing(obj) } {
            // construct properties are applied once the companion exists
            trace!("deferring property '{}' until the object is linked", pspec.name());
        } else {
            // SAFETY: as above
            unsafe { warn_invalid_property_id(obj, prop_id, pspec) };
        }
        return None;
    };
    // SAFETY: base points at a live companion
    checked::<T>(unsafe { base.as_ref() });

    let Some(offset) = spec_lookup(pspec, offset_key(class_key::<T>(), prop_id)) else {
        // SAFETY: as above
        unsafe { warn_invalid_property_id(obj, prop_id, pspec) };
        return None;
    };
    // SAFETY: offset was measured inside a Companion<T>, and this is one
    Some(unsafe { &*base.as_ptr().byte_add(offset).cast::<PropertyHeader>() })
}

pub(crate) unsafe extern "C" fn set_property_trampoline<T: ObjectSubclass>(
    obj: *mut Instance,
    prop_id: u32,
    value: *const Value,
    pspec: *const ParamSpec,
) {
    guard("set_property", || {
        // SAFETY: the runtime passes a live instance and valid pointers
        unsafe {
            if let Some(header) = resolve::<T>(obj, prop_id, &*pspec) {
                (header.set)(header, &*value);
            }
        }
    });
}

pub(crate) unsafe extern "C" fn get_property_trampoline<T: ObjectSubclass>(
    obj: *mut Instance,
    prop_id: u32,
    value: *mut Value,
    pspec: *const ParamSpec,
) {
    guard("get_property", || {
        // SAFETY: as in set_property_trampoline
        unsafe {
            if let Some(header) = resolve::<T>(obj, prop_id, &*pspec) {
                *value = (header.get)(header);
            }
        }
    });
}

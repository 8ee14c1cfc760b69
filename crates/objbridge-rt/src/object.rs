//! Instances and their lifecycle.
//!
//! This module implements the instance side of the runtime:
//! - Atomic reference counting with floating references
//! - Per-instance side table (quark-keyed data with destroy notifications)
//! - Construction through the class `constructor` slot
//! - Generic property set/get dispatch through the owning class
//! - The owning [`Object`] handle
//!
//! # Lifecycle
//!
//! `object_newv` → class `constructor` (construct properties) → setup hook
//! → `constructed` → remaining properties. The last `object_unref` runs
//! `dispose` while the count is still one, then weak notifications, then
//! `finalize` (which clears the side table and signal handlers), then frees
//! the instance. A `dispose` that takes a new reference resurrects the
//! instance and stops the teardown.
//!
//! # Thread Safety
//!
//! Reference counting is atomic. The side table, handler list and weak
//! notifications each have their own lock; none of them is held while a
//! callback runs, so destroy notifications may re-enter the side table of
//! the instance being torn down.

use crate::class::{ConstructProperty, TypeClass, class_peek, class_ref};
use crate::error::{Error, Result};
use crate::param::{ParamFlags, ParamSpec};
use crate::quark::Quark;
use crate::signal::{self, Handler, HandlerId};
use crate::types::{Type, node, type_ancestry};
use crate::value::{FromValue, ToValue, Value};
use objbridge_log::{trace, warn};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Frees side-table data when its entry is replaced or the instance dies.
pub type DestroyNotify = unsafe extern "C" fn(data: *mut c_void);

struct QData {
    key: Quark,
    data: *mut c_void,
    destroy: Option<DestroyNotify>,
}

// SAFETY: the runtime never dereferences `data`; whoever stores it decides
// which thread may free it through `destroy`.
unsafe impl Send for QData {}

/// Callback run once when an instance is disposed.
pub type WeakNotify = Box<dyn FnOnce() + Send>;

/// A registered weak notification, unique across the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakNotifyId(u64);

static NEXT_WEAK_NOTIFY: AtomicU64 = AtomicU64::new(1);

/// Raw instance storage.
///
/// Allocated by the default constructor and freed by the last unref.
/// Always handled through `*mut Instance` or [`Object`].
#[repr(C)]
pub struct Instance {
    g_class: &'static TypeClass,
    ref_count: AtomicU32,
    floating: AtomicBool,
    constructing: AtomicBool,
    qdata: Mutex<Vec<QData>>,
    pub(crate) handlers: Mutex<Vec<Handler>>,
    weak_notifies: Mutex<Vec<(WeakNotifyId, WeakNotify)>>,
}

pub(crate) unsafe extern "C" fn object_class_init(klass: *mut TypeClass, _: *mut c_void) {
    // SAFETY: called by materialization with an exclusively owned class
    let klass = unsafe { &mut *klass };
    klass.finalize = Some(object_finalize);
}

/// The root constructor: allocates, runs every `instance_init` from the
/// root type down, then applies the construct properties.
///
/// # Safety
///
/// `params` must point to `n_params` valid entries.
pub unsafe extern "C" fn object_constructor(
    ty: Type,
    params: *const ConstructProperty,
    n_params: usize,
) -> *mut Instance {
    let Some(klass) = class_ref(ty) else {
        return std::ptr::null_mut();
    };

    let instance = Box::into_raw(Box::new(Instance {
        g_class: klass,
        ref_count: AtomicU32::new(1),
        floating: AtomicBool::new(ty.is_a(Type::INITIALLY_UNOWNED)),
        constructing: AtomicBool::new(true),
        qdata: Mutex::new(Vec::new()),
        handlers: Mutex::new(Vec::new()),
        weak_notifies: Mutex::new(Vec::new()),
    }));

    for t in type_ancestry(ty).into_iter().rev() {
        if let Some(init) = node(t).and_then(|n| n.info.instance_init) {
            // SAFETY: instance was just allocated, klass is published
            unsafe { init(instance, klass) };
        }
    }

    let params: &[ConstructProperty] = if n_params == 0 || params.is_null() {
        &[]
    } else {
        // SAFETY: caller contract
        unsafe { std::slice::from_raw_parts(params, n_params) }
    };
    for param in params {
        // SAFETY: entries point at specs and values owned by the caller
        unsafe { set_property_unchecked(instance, &*param.pspec, &*param.value) };
    }

    instance
}

pub(crate) unsafe extern "C" fn object_set_property_default(
    obj: *mut Instance,
    prop_id: u32,
    _value: *const Value,
    pspec: *const ParamSpec,
) {
    // SAFETY: dispatch passes a live instance and spec
    unsafe { warn_invalid_property_id(obj, prop_id, &*pspec) };
}

pub(crate) unsafe extern "C" fn object_get_property_default(
    obj: *mut Instance,
    prop_id: u32,
    _value: *mut Value,
    pspec: *const ParamSpec,
) {
    // SAFETY: dispatch passes a live instance and spec
    unsafe { warn_invalid_property_id(obj, prop_id, &*pspec) };
}

unsafe extern "C" fn object_finalize(obj: *mut Instance) {
    // SAFETY: finalize runs on a live instance with no other references
    let instance = unsafe { &*obj };

    // destroy notifications may store new data, so drain until empty
    loop {
        let entries = std::mem::take(&mut *instance.qdata.lock());
        if entries.is_empty() {
            break;
        }
        for entry in entries {
            if let Some(destroy) = entry.destroy {
                // SAFETY: the storer provided destroy for this data
                unsafe { destroy(entry.data) };
            }
        }
    }

    let handlers = std::mem::take(&mut *instance.handlers.lock());
    drop(handlers);
}

/// Reports a property id a class's dispatch does not know.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn warn_invalid_property_id(obj: *mut Instance, prop_id: u32, pspec: &ParamSpec) {
    // SAFETY: caller contract
    let type_name = unsafe { object_type(obj) }.name();
    warn!(
        "invalid property id {} for \"{}\" of type '{}' in '{}'",
        prop_id,
        pspec.name(),
        pspec.value_type().name(),
        type_name
    );
}

/// Creates an instance of `ty` with properties set from `params`.
///
/// Construct properties go to the class constructor; the rest are set once
/// `constructed` has run. An instance of an initially-unowned type comes
/// back with a floating reference.
///
/// # Errors
///
/// - [`Error::InvalidType`] / [`Error::NotInstantiatable`] for a bad type
/// - property lookup and validation errors for `params`
/// - [`Error::ConstructionFailed`] if the constructor returned null
pub fn object_newv(ty: Type, params: &[(&str, Value)]) -> Result<*mut Instance> {
    object_newv_with(ty, params, &mut |_| Ok(()))
}

/// Like [`object_newv`], running `setup` right after the constructor and
/// before `constructed` and the non-construct properties.
///
/// If `setup` fails the instance is released and [`Error::SetupFailed`] is
/// returned.
pub fn object_newv_with(
    ty: Type,
    params: &[(&str, Value)],
    setup: &mut dyn FnMut(*mut Instance) -> std::result::Result<(), String>,
) -> Result<*mut Instance> {
    if !ty.is_classed() {
        return Err(if ty.is_valid() {
            Error::NotInstantiatable(ty.name().to_string())
        } else {
            Error::InvalidType(ty.into_raw())
        });
    }
    let klass = class_ref(ty).ok_or(Error::InvalidType(ty.into_raw()))?;

    let mut construct: Vec<(ParamSpec, Value)> = Vec::new();
    let mut rest: Vec<(ParamSpec, Value)> = Vec::new();

    for (name, value) in params {
        let spec = klass
            .find_property_raw(name)
            .ok_or_else(|| Error::PropertyNotFound {
                type_name: ty.name().to_string(),
                name: (*name).to_string(),
            })?;
        if !spec.flags().contains(ParamFlags::WRITABLE) {
            return Err(Error::PropertyNotWritable(spec.name().to_string()));
        }
        spec.validate(value)?;

        if spec
            .flags()
            .intersects(ParamFlags::CONSTRUCT | ParamFlags::CONSTRUCT_ONLY)
        {
            construct.push((spec, value.clone()));
        } else {
            rest.push((spec, value.clone()));
        }
    }

    for spec in klass.list_properties() {
        if spec.flags().contains(ParamFlags::CONSTRUCT)
            && !construct.iter().any(|(s, _)| s.name() == spec.name())
        {
            let default = spec.default_value();
            construct.push((spec, default));
        }
    }

    let cprops: Vec<ConstructProperty> = construct
        .iter()
        .map(|(spec, value)| ConstructProperty {
            pspec: spec,
            value,
        })
        .collect();

    // SAFETY: cprops borrows `construct`, which outlives the call
    let instance = unsafe { (klass.constructor)(ty, cprops.as_ptr(), cprops.len()) };
    if instance.is_null() {
        return Err(Error::ConstructionFailed(ty.name().to_string()));
    }

    if let Err(reason) = setup(instance) {
        // SAFETY: we hold the only reference
        unsafe {
            (*instance).constructing.store(false, Ordering::Release);
            object_unref(instance);
        }
        return Err(Error::SetupFailed {
            type_name: ty.name().to_string(),
            reason,
        });
    }

    // SAFETY: instance is live and referenced by us
    unsafe { (*instance).constructing.store(false, Ordering::Release) };

    if let Some(constructed) = klass.constructed {
        // SAFETY: as above
        unsafe { constructed(instance) };
    }

    for (spec, value) in &rest {
        // SAFETY: as above
        unsafe {
            set_property_unchecked(instance, spec, value);
            object_notify_by_pspec(instance, spec.redirect_target().unwrap_or(spec));
        }
    }

    trace!("constructed '{}' at {:p}", ty.name(), instance);
    Ok(instance)
}

/// Routes a set to the class that installed `spec`, skipping access checks,
/// validation and `notify`.
///
/// Used by constructors that apply construct properties themselves.
///
/// # Safety
///
/// `obj` must be a live instance and `spec` must be installed on its class
/// or an ancestor.
pub unsafe fn object_dispatch_property(obj: *mut Instance, spec: &ParamSpec, value: &Value) {
    // SAFETY: caller contract
    unsafe { set_property_unchecked(obj, spec, value) }
}

/// Routes a set to the class that installed `spec`.
unsafe fn set_property_unchecked(obj: *mut Instance, spec: &ParamSpec, value: &Value) {
    let target = spec.redirect_target().unwrap_or(spec);
    match class_peek(spec.owner_type()) {
        // SAFETY: obj is live, value and target outlive the call
        Some(owner) => unsafe { (owner.set_property)(obj, spec.param_id(), value, target) },
        None => warn!("property '{}' has no owning class", spec.name()),
    }
}

/// Sets a property by name and emits `notify`.
///
/// # Safety
///
/// `obj` must be a live instance.
///
/// # Errors
///
/// Lookup, access and validation errors.
pub unsafe fn object_set_property(obj: *mut Instance, name: &str, value: &Value) -> Result<()> {
    // SAFETY: caller contract
    let instance = unsafe { &*obj };
    let spec = instance
        .g_class
        .find_property_raw(name)
        .ok_or_else(|| Error::PropertyNotFound {
            type_name: instance.g_class.name().to_string(),
            name: name.to_string(),
        })?;

    if !spec.flags().contains(ParamFlags::WRITABLE) {
        return Err(Error::PropertyNotWritable(spec.name().to_string()));
    }
    if spec.flags().contains(ParamFlags::CONSTRUCT_ONLY)
        && !instance.constructing.load(Ordering::Acquire)
    {
        return Err(Error::ConstructOnly(spec.name().to_string()));
    }
    spec.validate(value)?;

    // SAFETY: caller contract
    unsafe {
        set_property_unchecked(obj, &spec, value);
        object_notify_by_pspec(obj, spec.redirect_target().unwrap_or(&spec));
    }
    Ok(())
}

/// Reads a property by name.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_get_property(obj: *mut Instance, name: &str) -> Result<Value> {
    // SAFETY: caller contract
    let instance = unsafe { &*obj };
    let spec = instance
        .g_class
        .find_property_raw(name)
        .ok_or_else(|| Error::PropertyNotFound {
            type_name: instance.g_class.name().to_string(),
            name: name.to_string(),
        })?;

    if !spec.flags().contains(ParamFlags::READABLE) {
        return Err(Error::PropertyNotReadable(spec.name().to_string()));
    }

    let target = spec.redirect_target().unwrap_or(&spec);
    let mut value = Value::for_type(target.value_type());
    match class_peek(spec.owner_type()) {
        // SAFETY: obj is live, value and target outlive the call
        Some(owner) => unsafe { (owner.get_property)(obj, spec.param_id(), &mut value, target) },
        None => warn!("property '{}' has no owning class", spec.name()),
    }
    Ok(value)
}

/// Emits `notify::<name>` for `spec`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_notify_by_pspec(obj: *mut Instance, spec: &ParamSpec) {
    let detail = Quark::from_string(spec.name());
    let args = [Value::Param(Some(spec.clone()))];
    // SAFETY: caller contract
    if let Err(err) = unsafe { signal::signal_emitv(obj, signal::notify_signal(), Some(detail), &args) } {
        warn!("failed to emit notify for '{}': {}", spec.name(), err);
    }
}

/// Emits `notify` for the property called `name`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_notify(obj: *mut Instance, name: &str) -> Result<()> {
    // SAFETY: caller contract
    let klass = unsafe { object_class(obj) };
    let spec = klass
        .find_property(name)
        .ok_or_else(|| Error::PropertyNotFound {
            type_name: klass.name().to_string(),
            name: name.to_string(),
        })?;
    // SAFETY: caller contract
    unsafe { object_notify_by_pspec(obj, &spec) };
    Ok(())
}

/// Takes a reference.
///
/// # Safety
///
/// `obj` must be a live instance.
///
/// # Panics
///
/// Panics if the reference count overflows.
pub unsafe fn object_ref(obj: *mut Instance) -> *mut Instance {
    // SAFETY: caller contract
    let old = unsafe { &*obj }.ref_count.fetch_add(1, Ordering::AcqRel);
    if old == u32::MAX {
        panic!("Reference count overflow in object_ref");
    }
    obj
}

/// Drops a reference, tearing the instance down when it was the last.
///
/// # Safety
///
/// `obj` must be a live instance and the caller must own the reference.
pub unsafe fn object_unref(obj: *mut Instance) {
    // SAFETY: caller contract
    let instance = unsafe { &*obj };

    let mut current = instance.ref_count.load(Ordering::Acquire);
    loop {
        if current == 0 {
            warn!("object_unref on an instance with no references");
            return;
        }
        if current == 1 {
            break;
        }
        match instance.ref_count.compare_exchange_weak(
            current,
            current - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }

    // last reference: dispose with the count still at one
    let klass = instance.g_class;
    if let Some(dispose) = klass.dispose {
        // SAFETY: instance is live
        unsafe { dispose(obj) };
    }

    let notifies = std::mem::take(&mut *instance.weak_notifies.lock());
    for (_, notify) in notifies {
        notify();
    }

    if instance.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
        // resurrected during dispose
        return;
    }

    trace!("finalizing '{}' at {:p}", klass.name(), obj);
    if let Some(finalize) = klass.finalize {
        // SAFETY: no references remain
        unsafe { finalize(obj) };
    }

    // SAFETY: allocated by object_constructor with Box::into_raw
    unsafe { drop(Box::from_raw(obj)) };
}

/// Claims a floating reference, or takes a new one if not floating.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_ref_sink(obj: *mut Instance) -> *mut Instance {
    // SAFETY: caller contract
    if unsafe { &*obj }.floating.swap(false, Ordering::AcqRel) {
        obj
    } else {
        // SAFETY: caller contract
        unsafe { object_ref(obj) }
    }
}

/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_is_floating(obj: *mut Instance) -> bool {
    // SAFETY: caller contract
    unsafe { &*obj }.floating.load(Ordering::Acquire)
}

/// Marks the instance's reference as floating again.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_force_floating(obj: *mut Instance) {
    // SAFETY: caller contract
    unsafe { &*obj }.floating.store(true, Ordering::Release);
}

/// Returns true until the constructor and setup hook have run.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_is_constructing(obj: *mut Instance) -> bool {
    // SAFETY: caller contract
    unsafe { &*obj }.constructing.load(Ordering::Acquire)
}

/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_ref_count(obj: *mut Instance) -> u32 {
    // SAFETY: caller contract
    unsafe { &*obj }.ref_count.load(Ordering::Acquire)
}

/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_type(obj: *mut Instance) -> Type {
    // SAFETY: caller contract
    unsafe { &*obj }.g_class.type_()
}

/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_class(obj: *mut Instance) -> &'static TypeClass {
    // SAFETY: caller contract
    unsafe { &*obj }.g_class
}

/// Stores `data` under `key`, replacing (and destroying) any previous value.
/// A null `data` removes the entry.
///
/// # Safety
///
/// `obj` must be a live instance; `destroy` must be valid for `data`.
pub unsafe fn set_qdata_full(
    obj: *mut Instance,
    key: Quark,
    data: *mut c_void,
    destroy: Option<DestroyNotify>,
) {
    // SAFETY: caller contract
    let instance = unsafe { &*obj };
    let old = {
        let mut qdata = instance.qdata.lock();
        let pos = qdata.iter().position(|e| e.key == key);
        match pos {
            Some(i) if data.is_null() => Some(qdata.remove(i)),
            Some(i) => Some(std::mem::replace(&mut qdata[i], QData { key, data, destroy })),
            None => {
                if !data.is_null() {
                    qdata.push(QData { key, data, destroy });
                }
                None
            }
        }
    };

    if let Some(QData {
        data,
        destroy: Some(destroy),
        ..
    }) = old
    {
        // SAFETY: the previous storer provided destroy for this data
        unsafe { destroy(data) };
    }
}

/// Stores `data` under `key` without a destroy notification.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn set_qdata(obj: *mut Instance, key: Quark, data: *mut c_void) {
    // SAFETY: caller contract
    unsafe { set_qdata_full(obj, key, data, None) };
}

/// Returns data stored under `key`, or null.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn get_qdata(obj: *mut Instance, key: Quark) -> *mut c_void {
    // SAFETY: caller contract
    let instance = unsafe { &*obj };
    instance
        .qdata
        .lock()
        .iter()
        .find(|e| e.key == key)
        .map_or(std::ptr::null_mut(), |e| e.data)
}

/// Removes the entry under `key` without running its destroy notification.
/// The caller now owns the data.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn steal_qdata(obj: *mut Instance, key: Quark) -> *mut c_void {
    // SAFETY: caller contract
    let instance = unsafe { &*obj };
    let mut qdata = instance.qdata.lock();
    match qdata.iter().position(|e| e.key == key) {
        Some(i) => qdata.remove(i).data,
        None => std::ptr::null_mut(),
    }
}

/// Registers a callback run once when the instance is disposed.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_weak_ref(obj: *mut Instance, notify: WeakNotify) -> WeakNotifyId {
    let id = WeakNotifyId(NEXT_WEAK_NOTIFY.fetch_add(1, Ordering::Relaxed));
    // SAFETY: caller contract
    unsafe { &*obj }.weak_notifies.lock().push((id, notify));
    id
}

/// Removes a weak notification without running it. Returns `false` if it
/// already ran or was removed.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_weak_unref(obj: *mut Instance, id: WeakNotifyId) -> bool {
    let removed = {
        // SAFETY: caller contract
        let mut notifies = unsafe { &*obj }.weak_notifies.lock();
        notifies
            .iter()
            .position(|(i, _)| *i == id)
            .map(|pos| notifies.remove(pos))
    };
    // dropped outside the lock; the closure may own anything
    removed.is_some()
}

/// Number of weak notifications still pending on `obj`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn object_weak_notify_count(obj: *mut Instance) -> usize {
    // SAFETY: caller contract
    unsafe { &*obj }.weak_notifies.lock().len()
}

/// An owning reference to an instance.
///
/// Cloning takes a reference, dropping releases one.
///
/// # Example
///
/// ```rust
/// use objbridge_rt::{Object, Type};
///
/// let obj = Object::new(Type::OBJECT, &[]).unwrap();
/// let other = obj.clone();
///
/// assert_eq!(obj, other);
/// assert_eq!(obj.ref_count(), 2);
/// ```
pub struct Object {
    ptr: NonNull<Instance>,
}

// SAFETY: reference counting is atomic and all instance state is behind
// locks or atomics
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// Creates an instance and owns it, sinking a floating reference.
    ///
    /// # Errors
    ///
    /// See [`object_newv`].
    pub fn new(ty: Type, params: &[(&str, Value)]) -> Result<Object> {
        let raw = object_newv(ty, params)?;
        // SAFETY: raw is a fresh instance we hold the only reference to
        unsafe {
            if object_is_floating(raw) {
                object_ref_sink(raw);
            }
            Object::from_raw_full(raw).ok_or_else(|| Error::ConstructionFailed(ty.name().to_string()))
        }
    }

    /// Wraps a reference the caller owns.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live instance whose reference is transferred.
    pub unsafe fn from_raw_full(ptr: *mut Instance) -> Option<Object> {
        NonNull::new(ptr).map(|ptr| Object { ptr })
    }

    /// Takes a new reference to `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live instance.
    pub unsafe fn from_raw_none(ptr: *mut Instance) -> Option<Object> {
        let ptr = NonNull::new(ptr)?;
        // SAFETY: caller contract
        unsafe { object_ref(ptr.as_ptr()) };
        Some(Object { ptr })
    }

    /// The raw instance pointer. No reference is transferred.
    pub fn as_ptr(&self) -> *mut Instance {
        self.ptr.as_ptr()
    }

    /// Gives up ownership without releasing.
    pub fn into_raw(self) -> *mut Instance {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub fn type_(&self) -> Type {
        // SAFETY: we hold a reference
        unsafe { object_type(self.as_ptr()) }
    }

    pub fn class(&self) -> &'static TypeClass {
        // SAFETY: we hold a reference
        unsafe { object_class(self.as_ptr()) }
    }

    /// Current reference count (for testing/debugging).
    pub fn ref_count(&self) -> u32 {
        // SAFETY: we hold a reference
        unsafe { object_ref_count(self.as_ptr()) }
    }

    pub fn is_floating(&self) -> bool {
        // SAFETY: we hold a reference
        unsafe { object_is_floating(self.as_ptr()) }
    }

    /// Sets a property and emits `notify`.
    pub fn set_property(&self, name: &str, value: impl ToValue) -> Result<()> {
        // SAFETY: we hold a reference
        unsafe { object_set_property(self.as_ptr(), name, &value.to_value()) }
    }

    /// Reads a property.
    pub fn property(&self, name: &str) -> Result<Value> {
        // SAFETY: we hold a reference
        unsafe { object_get_property(self.as_ptr(), name) }
    }

    /// Reads a property converted to `T`.
    pub fn property_value<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.property(name)?;
        T::from_value(&value).ok_or_else(|| Error::PropertyTypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            got: value.type_().name(),
        })
    }

    /// Emits `notify` for `name`.
    pub fn notify(&self, name: &str) -> Result<()> {
        // SAFETY: we hold a reference
        unsafe { object_notify(self.as_ptr(), name) }
    }

    /// Connects `f` to a signal given as `name` or `name::detail`.
    ///
    /// `f` receives the emitting instance as its first argument.
    pub fn connect<F>(&self, detailed_signal: &str, f: F) -> Result<HandlerId>
    where
        F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        // SAFETY: we hold a reference
        unsafe { signal::signal_connect(self.as_ptr(), detailed_signal, Box::new(f)) }
    }

    /// Connects to `notify`, or `notify::<property>` when given.
    pub fn connect_notify<F>(&self, property: Option<&str>, f: F) -> Result<HandlerId>
    where
        F: Fn(&Object, &ParamSpec) + Send + Sync + 'static,
    {
        let signal = match property {
            Some(name) => format!("notify::{name}"),
            None => "notify".to_string(),
        };
        self.connect(&signal, move |args| {
            if let (Some(Value::Object(Some(obj))), Some(Value::Param(Some(spec)))) = (args.first(), args.get(1)) {
                f(obj, spec);
            }
            None
        })
    }

    /// Disconnects a handler. Returns false if it was not connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        // SAFETY: we hold a reference
        unsafe { signal::signal_handler_disconnect(self.as_ptr(), id) }
    }

    /// Emits a signal by detailed name.
    pub fn emit_by_name(&self, detailed_signal: &str, args: &[Value]) -> Result<Option<Value>> {
        // SAFETY: we hold a reference
        unsafe { signal::signal_emit_by_name(self.as_ptr(), detailed_signal, args) }
    }

    /// Runs `f` once when the instance is disposed.
    pub fn add_weak_notify<F: FnOnce() + Send + 'static>(&self, f: F) -> WeakNotifyId {
        // SAFETY: we hold a reference
        unsafe { object_weak_ref(self.as_ptr(), Box::new(f)) }
    }

    pub fn remove_weak_notify(&self, id: WeakNotifyId) -> bool {
        // SAFETY: we hold a reference
        unsafe { object_weak_unref(self.as_ptr(), id) }
    }
}

impl Clone for Object {
    fn clone(&self) -> Self {
        // SAFETY: we hold a reference
        unsafe { object_ref(self.as_ptr()) };
        Object { ptr: self.ptr }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        // SAFETY: we own one reference
        unsafe { object_unref(self.as_ptr()) };
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ptr.as_ptr(), other.ptr.as_ptr())
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.type_())
            .field("ptr", &self.ptr)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_destroy(data: *mut c_void) {
        DESTROYED.fetch_add(1, Ordering::SeqCst);
        // SAFETY: tests store Box<u32> pointers
        drop(unsafe { Box::from_raw(data as *mut u32) });
    }

    fn boxed(v: u32) -> *mut c_void {
        Box::into_raw(Box::new(v)) as *mut c_void
    }

    #[test]
    fn test_refcount_and_weak_notify() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        obj.add_weak_notify(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let copy = obj.clone();
        assert_eq!(obj.ref_count(), 2);
        drop(copy);
        assert_eq!(obj.ref_count(), 1);
        assert_eq!(disposed.load(Ordering::SeqCst), 0);

        drop(obj);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_weak_notify_never_runs() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        let id = obj.add_weak_notify(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(unsafe { object_weak_notify_count(obj.as_ptr()) }, 1);

        assert!(obj.remove_weak_notify(id));
        assert!(!obj.remove_weak_notify(id));
        assert_eq!(unsafe { object_weak_notify_count(obj.as_ptr()) }, 0);
        // the closure went with the entry
        assert_eq!(Arc::strong_count(&disposed), 1);

        drop(obj);
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_floating_references() {
        let raw = object_newv(Type::INITIALLY_UNOWNED, &[]).unwrap();
        unsafe {
            assert!(object_is_floating(raw));
            assert_eq!(object_ref_sink(raw), raw);
            assert!(!object_is_floating(raw));
            assert_eq!(object_ref_count(raw), 1);

            object_ref_sink(raw);
            assert_eq!(object_ref_count(raw), 2);

            object_force_floating(raw);
            assert!(object_is_floating(raw));
            object_unref(raw);
            object_unref(raw);
        }

        let owned = Object::new(Type::INITIALLY_UNOWNED, &[]).unwrap();
        assert!(!owned.is_floating());
        assert_eq!(owned.ref_count(), 1);
    }

    #[test]
    fn test_qdata_replace_steal_and_finalize() {
        let key = Quark::from_string("object-test-data");
        let other = Quark::from_string("object-test-other");
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        let before = DESTROYED.load(Ordering::SeqCst);

        unsafe {
            set_qdata_full(obj.as_ptr(), key, boxed(1), Some(count_destroy));
            assert_eq!(*(get_qdata(obj.as_ptr(), key) as *mut u32), 1);

            // replacing destroys the old value
            set_qdata_full(obj.as_ptr(), key, boxed(2), Some(count_destroy));
            assert_eq!(DESTROYED.load(Ordering::SeqCst) - before, 1);

            // stealing hands ownership back
            let stolen = steal_qdata(obj.as_ptr(), key);
            assert_eq!(*(stolen as *mut u32), 2);
            assert!(get_qdata(obj.as_ptr(), key).is_null());
            drop(Box::from_raw(stolen as *mut u32));

            set_qdata_full(obj.as_ptr(), other, boxed(3), Some(count_destroy));
        }

        drop(obj);
        assert_eq!(DESTROYED.load(Ordering::SeqCst) - before, 2);
    }

    static REENTRANT_KEY: &str = "object-test-reentrant";

    unsafe extern "C" fn steal_self(data: *mut c_void) {
        // the destroy notify re-enters the side table of its own instance
        let obj = data as *mut Instance;
        let stolen = unsafe { steal_qdata(obj, Quark::from_string(REENTRANT_KEY)) };
        assert!(stolen.is_null());
    }

    #[test]
    fn test_destroy_notify_may_reenter() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        unsafe {
            set_qdata_full(
                obj.as_ptr(),
                Quark::from_string(REENTRANT_KEY),
                obj.as_ptr() as *mut c_void,
                Some(steal_self),
            );
        }
        drop(obj);
    }

    #[test]
    fn test_unknown_property() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        assert!(matches!(
            obj.set_property("missing", 1i32),
            Err(Error::PropertyNotFound { .. })
        ));
        assert!(matches!(
            Object::new(Type::OBJECT, &[("missing", Value::Int(1))]),
            Err(Error::PropertyNotFound { .. })
        ));
        assert!(matches!(
            Object::new(Type::INT, &[]),
            Err(Error::NotInstantiatable(_))
        ));
    }
}

//! Type registration and instance construction.
//!
//! Registering a subclass `T`:
//!
//! 1. checks at compile time that no member is claimed by two layers
//! 2. registers a type deriving from `T::ParentClass`, named `T::NAME` or a
//!    private name generated from the Rust type path
//! 3. adds `T::Interfaces`
//! 4. builds the class, running the [`ClassComposer`] chain
//! 5. builds one throwaway `T` so every slot installs its property or
//!    signal before the first real instance exists
//!
//! Registration happens once per `(T, name)`, whichever thread gets there
//! first; a type name already taken by another Rust type is fatal.
//!
//! # Construction
//!
//! Types with a public name get a class constructor that chains to the
//! parent's, then builds the Rust state for the fresh instance. Every
//! instance of such a type, whoever creates it, goes through that path.
//!
//! Types with a generated name can only be created from Rust: the state is
//! built in the runtime's setup hook, between the class constructor and
//! `constructed`. Static-first construction always uses this registration,
//! so a subclass with a public name ends up as two distinct types.
//!
//! Either way, construct properties handled by `T` itself are held back
//! until the state is linked, then applied in order.

use crate::bridge::{Companion, Members, Ownership, instance_of_raw, link};
use crate::error::{Error, Result};
use crate::params::ConstructParams;
use crate::property::{get_property_trampoline, set_property_trampoline};
use crate::subclass::{Check, Construct, ConstructKind, IsSubclassable, ObjectSubclass};
use crate::trampoline::{guard, panic_message};
use fxhash::FxHashMap;
use objbridge_log::{critical, debug, fatal, trace, warn};
use objbridge_rt::{
    ClassInitFunc, ConstructProperty, Instance, Object, ParamFlags, ParamSpec, Quark, StaticType, Type, TypeClass,
    TypeInfo, Value, class_peek, class_ref, class_unref, object_dispatch_property, object_force_floating,
    object_is_floating, object_newv_with, object_ref_count, object_ref_sink, register_static, type_ancestry,
    type_from_name, type_get_qdata, type_set_qdata,
};
use parking_lot::Mutex;
use std::any::TypeId;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Prefix of generated type names.
pub const TYPE_PREFIX: &str = "OBJBRIDGE__";

type Slot = Arc<Mutex<Option<Type>>>;

fn registry() -> &'static Mutex<FxHashMap<(TypeId, String), Slot>> {
    static REGISTRY: OnceLock<Mutex<FxHashMap<(TypeId, String), Slot>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Type qdata holding the `TypeId` of the Rust type behind a registration.
fn impl_key() -> Quark {
    static KEY: OnceLock<Quark> = OnceLock::new();
    *KEY.get_or_init(|| Quark::from_string("OBJBRIDGE_IMPL"))
}

/// Identifies `T`'s classes in per-spec offset records.
pub(crate) fn class_key<T: 'static>() -> usize {
    fxhash::hash(&TypeId::of::<T>())
}

/// The Rust type registered as `ty`, if `ty` is a bridged type.
fn bridged_rust_type(ty: Type) -> Option<TypeId> {
    // SAFETY: IMPL qdata always points at a leaked TypeId
    type_get_qdata(ty, impl_key()).map(|p| unsafe { *(p as *const TypeId) })
}

/// Whether `ty` was registered for `T`.
pub fn bridged_by<T: 'static>(ty: Type) -> bool {
    bridged_rust_type(ty) == Some(TypeId::of::<T>())
}

/// Private type name generated for `T`.
///
/// Characters outside `[A-Za-z0-9_-]` become `+`.
pub fn static_name<T: 'static>() -> String {
    let path: String = std::any::type_name::<T>()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '+' })
        .collect();
    format!("{TYPE_PREFIX}{path}")
}

/// Registers `T` under its default name.
///
/// # Errors
///
/// Runtime registration errors.
pub fn register_type<T: ObjectSubclass>() -> Result<Type> {
    match T::NAME {
        Some(name) => register_as::<T>(name, true),
        None => register_as::<T>(&static_name::<T>(), false),
    }
}

/// Registers `T` under an additional public name, with a class
/// constructor so the runtime can create it.
///
/// # Errors
///
/// Runtime registration errors.
pub fn register_named<T: ObjectSubclass>(name: &str) -> Result<Type> {
    register_as::<T>(name, true)
}

fn register_as<T: ObjectSubclass>(name: &str, native: bool) -> Result<Type> {
    let () = Check::<T>::OK;

    let slot = registry()
        .lock()
        .entry((TypeId::of::<T>(), name.to_string()))
        .or_default()
        .clone();

    // registration may construct a throwaway T, so the map lock is not held
    let mut slot = slot.lock();
    if let Some(ty) = *slot {
        return Ok(ty);
    }
    let ty = register_now::<T>(name, native)?;
    *slot = Some(ty);
    Ok(ty)
}

fn register_now<T: ObjectSubclass>(name: &str, native: bool) -> Result<Type> {
    if let Some(existing) = type_from_name(name) {
        if bridged_by::<T>(existing) {
            return Ok(existing);
        }
        fatal!(
            "type name '{}' is already registered by {}",
            name,
            bridged_rust_type(existing).map_or("a native class", |_| "another Rust type")
        );
    }

    let parent = <T::ParentClass as StaticType>::static_type();
    let q = parent
        .query()
        .ok_or(objbridge_rt::Error::InvalidType(parent.into_raw()))?;
    let class_data = Box::into_raw(Box::new(ClassData { native })).cast::<c_void>();
    let info = TypeInfo {
        class_size: q.class_size,
        instance_size: q.instance_size,
        class_init: Some(class_init_all::<T> as ClassInitFunc),
        class_data,
        instance_init: T::INSTANCE_INIT,
    };
    let ty = match register_static(parent, name, &info) {
        Ok(ty) => ty,
        Err(err) => {
            // SAFETY: the runtime did not keep class_data
            drop(unsafe { Box::from_raw(class_data.cast::<ClassData>()) });
            return Err(err.into());
        }
    };
    let rust_type: &'static TypeId = Box::leak(Box::new(TypeId::of::<T>()));
    type_set_qdata(ty, impl_key(), rust_type as *const TypeId as usize);

    for request in <T::Interfaces as crate::InterfaceList<T>>::requests() {
        request.apply(ty)?;
    }

    // build the class now so class_peek works from here on
    let klass = class_ref(ty).ok_or(objbridge_rt::Error::InvalidType(ty.into_raw()))?;
    class_unref(klass);

    let cx = Construct::new(ty, std::ptr::null_mut(), ConstructKind::Registration);
    match catch_unwind(AssertUnwindSafe(|| T::new(&cx))) {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("registration pass for '{}' failed: {}", name, err),
        Err(payload) => warn!("registration pass for '{}' panicked: {}", name, panic_message(payload.as_ref())),
    }

    debug!("registered {} as '{}'", std::any::type_name::<T>(), name);
    Ok(ty)
}

struct ClassData {
    native: bool,
}

/// Ordered class initialization steps of one subclass.
pub struct ClassComposer {
    steps: Vec<(&'static str, fn(&mut TypeClass))>,
}

impl ClassComposer {
    pub fn new() -> Self {
        ClassComposer { steps: Vec::new() }
    }

    #[must_use]
    pub fn then(mut self, label: &'static str, step: fn(&mut TypeClass)) -> Self {
        self.steps.push((label, step));
        self
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(label, _)| *label).collect()
    }

    pub fn run(&self, klass: &mut TypeClass) {
        for (label, step) in &self.steps {
            trace!("class_init '{}': {}", klass.name(), label);
            step(klass);
        }
    }

    /// The chain for `T`: its own members, then the parent layers, then
    /// its custom hook.
    pub fn for_subclass<T: ObjectSubclass>(native: bool) -> Self {
        let own: fn(&mut TypeClass) = if native {
            install_own::<T, true>
        } else {
            install_own::<T, false>
        };
        ClassComposer::new()
            .then("members", own)
            .then("layers", <T::ParentClass as IsSubclassable<T>>::class_init)
            .then("custom", <T as ObjectSubclass>::class_init)
    }
}

impl Default for ClassComposer {
    fn default() -> Self {
        ClassComposer::new()
    }
}

fn install_own<T: ObjectSubclass, const NATIVE: bool>(klass: &mut TypeClass) {
    klass.set_property = set_property_trampoline::<T>;
    klass.get_property = get_property_trampoline::<T>;
    if NATIVE {
        klass.constructor = instance_constructor::<T>;
    }

    for decl in T::properties() {
        if let Err(err) = decl.install(klass) {
            warn!("'{}': {}", klass.name(), err);
        }
    }
    for decl in T::signals() {
        if let Err(err) = decl.register(klass.type_()) {
            warn!("'{}': {}", klass.name(), err);
        }
    }
}

unsafe extern "C" fn class_init_all<T: ObjectSubclass>(klass: *mut TypeClass, data: *mut c_void) {
    guard("class_init", || {
        // SAFETY: registered by register_now with a leaked ClassData
        let data = unsafe { &*data.cast::<ClassData>() };
        // SAFETY: the runtime hands us the class it is building, exclusively
        let klass = unsafe { &mut *klass };
        ClassComposer::for_subclass::<T>(data.native).run(klass);
    });
}

/// The bridged type of `T` among `ty` and its ancestors.
fn bridged_ancestor<T: 'static>(ty: Type) -> Option<Type> {
    type_ancestry(ty).into_iter().find(|t| bridged_by::<T>(*t))
}

/// Builds, links and binds `T`'s state for `instance`.
///
/// # Safety
///
/// `instance` must be a live instance without a companion.
unsafe fn synthesize<T: ObjectSubclass>(
    instance: *mut Instance,
    ty: Type,
    kind: ConstructKind,
) -> Result<NonNull<Companion<T>>> {
    let cx = Construct::new(ty, instance, kind);
    let construction = |reason: String| Error::Construction {
        type_name: ty.name().to_string(),
        reason,
    };
    let imp = match catch_unwind(AssertUnwindSafe(|| T::new(&cx))) {
        Ok(Ok(imp)) => imp,
        Ok(Err(err)) => return Err(construction(err.to_string())),
        Err(payload) => return Err(construction(panic_message(payload.as_ref()))),
    };

    // SAFETY: caller contract
    let ptr = unsafe { link(instance, Companion::new(ty, instance, imp), Ownership::SideTable) }?;
    // SAFETY: just linked, and the instance keeps it alive
    let companion = unsafe { ptr.as_ref() };
    let mut members = Members::new(companion, class_key::<T>());
    companion.imp.members(&mut members);
    Ok(ptr)
}

/// Applies construct properties held back until the state was linked.
///
/// # Safety
///
/// `instance` must be live; every spec must belong to its class.
unsafe fn apply_deferred<'a>(instance: *mut Instance, deferred: impl IntoIterator<Item = (&'a ParamSpec, &'a Value)>) {
    for (spec, value) in deferred {
        // SAFETY: caller contract
        unsafe { object_dispatch_property(instance, spec, value) };
    }
}

unsafe extern "C" fn instance_constructor<T: ObjectSubclass>(
    ty: Type,
    params: *const ConstructProperty,
    n_params: usize,
) -> *mut Instance {
    guard("instance constructor", || {
        // SAFETY: the runtime passes n_params valid entries
        unsafe { construct_native::<T>(ty, params, n_params) }
    })
}

unsafe fn construct_native<T: ObjectSubclass>(
    ty: Type,
    params: *const ConstructProperty,
    n_params: usize,
) -> *mut Instance {
    let params: &[ConstructProperty] = if n_params == 0 || params.is_null() {
        &[]
    } else {
        // SAFETY: caller contract
        unsafe { std::slice::from_raw_parts(params, n_params) }
    };

    let mut own: Vec<(&ParamSpec, &Value)> = Vec::new();
    let mut forwarded: Vec<ConstructProperty> = Vec::new();
    for param in params {
        // SAFETY: entries point at specs and values the caller owns
        let (spec, value) = unsafe { (&*param.pspec, &*param.value) };
        if bridged_by::<T>(spec.owner_type()) {
            own.push((spec, value));
        } else {
            forwarded.push(ConstructProperty {
                pspec: param.pspec,
                value: param.value,
            });
        }
    }

    // chain straight to the native parent
    let Some(parent) = class_peek(<T::ParentClass as StaticType>::static_type()) else {
        fatal!("parent class of '{}' is not built", ty.name());
    };
    // SAFETY: forwarded borrows params, which outlive the call
    let instance = unsafe { (parent.constructor)(ty, forwarded.as_ptr(), forwarded.len()) };
    if instance.is_null() {
        return instance;
    }
    // SAFETY: the parent constructor returned a live instance
    if unsafe { instance_of_raw(instance) }.is_some() {
        fatal!("'{}' already has its object before construction", ty.name());
    }

    // SAFETY: as above
    let floating = unsafe { object_is_floating(instance) };
    let bridged = bridged_ancestor::<T>(ty).unwrap_or(ty);

    // SAFETY: live instance without a companion
    match unsafe { synthesize::<T>(instance, bridged, ConstructKind::Native) } {
        Ok(companion) => {
            // SAFETY: linked to the live instance
            if unsafe { companion.as_ref() }.bridge.instance() != instance {
                fatal!("object of '{}' is linked to another instance", ty.name());
            }
        }
        Err(err) => {
            critical!("constructor failed in instance_init: {}", err);
            fatal!("missing object for new instance of '{}'", ty.name());
        }
    }

    // SAFETY: the specs were installed by this class
    unsafe { apply_deferred(instance, own) };

    // SAFETY: live instance we hold the only reference to
    unsafe {
        if floating && !object_is_floating(instance) {
            warn!("{} constructor sinks instance", std::any::type_name::<T>());
            if object_ref_count(instance) == 1 {
                warn!("re-floating instance");
                object_force_floating(instance);
            }
        }
    }
    instance
}

/// Registers `T` under its generated static name, whether or not it also
/// has a public one. Types registered this way have no class constructor.
///
/// # Errors
///
/// Runtime registration errors.
pub(crate) fn register_static_first<T: ObjectSubclass>() -> Result<Type> {
    register_as::<T>(&static_name::<T>(), false)
}

/// Creates an instance of `T` from Rust and links its state. The type is
/// the static-first registration, distinct from the public one.
///
/// # Errors
///
/// Registration, property and construction errors.
pub(crate) fn construct<T: ObjectSubclass>(params: &ConstructParams) -> Result<(Object, NonNull<Companion<T>>)> {
    let ty = register_static_first::<T>()?;
    let object = construct_static::<T>(ty, params)?;

    // SAFETY: object holds a reference
    let Some(bridge) = (unsafe { crate::bridge::bridge_ptr(object.as_ptr()) }) else {
        return Err(Error::WrongCompanion {
            type_name: ty.name().to_string(),
            expected: std::any::type_name::<T>(),
        });
    };
    // SAFETY: live companion
    if !unsafe { bridge.as_ref() }.is::<T>() {
        return Err(Error::WrongCompanion {
            type_name: ty.name().to_string(),
            expected: std::any::type_name::<T>(),
        });
    }
    Ok((object, bridge.cast()))
}

/// Creates an instance of a bridged type under its registered name,
/// through the runtime's class constructor.
///
/// # Errors
///
/// [`Error::NoPublicName`] for types without one, then as [`construct`].
pub(crate) fn construct_native_first<T: ObjectSubclass>(params: &ConstructParams) -> Result<Object> {
    let name = T::NAME.ok_or(Error::NoPublicName(std::any::type_name::<T>()))?;
    let ty = register_named::<T>(name)?;
    Ok(Object::new(ty, &params.to_raw())?)
}

fn construct_static<T: ObjectSubclass>(ty: Type, params: &ConstructParams) -> Result<Object> {
    let klass = class_ref(ty).ok_or(objbridge_rt::Error::InvalidType(ty.into_raw()))?;
    let result = construct_static_in::<T>(klass, ty, params);
    class_unref(klass);
    result
}

fn construct_static_in<T: ObjectSubclass>(klass: &TypeClass, ty: Type, params: &ConstructParams) -> Result<Object> {
    let mut deferred: Vec<(ParamSpec, Value)> = Vec::new();
    let mut forwarded: Vec<(&str, Value)> = Vec::new();
    for (name, value) in params.iter() {
        match klass.find_property_raw(name) {
            Some(spec)
                if bridged_by::<T>(spec.owner_type())
                    && spec.flags().intersects(ParamFlags::CONSTRUCT | ParamFlags::CONSTRUCT_ONLY) =>
            {
                if !spec.flags().contains(ParamFlags::WRITABLE) {
                    return Err(objbridge_rt::Error::PropertyNotWritable(spec.name().to_string()).into());
                }
                spec.validate(value)?;
                deferred.push((spec, value.clone()));
            }
            _ => forwarded.push((name, value.clone())),
        }
    }

    let mut failure: Option<Error> = None;
    let result = object_newv_with(ty, &forwarded, &mut |instance| {
        // SAFETY: the runtime's setup hook gets a fresh live instance
        match unsafe { synthesize::<T>(instance, ty, ConstructKind::Static) } {
            Ok(_) => {
                // SAFETY: specs found on this class above
                unsafe { apply_deferred(instance, deferred.iter().map(|(s, v)| (s, v))) };
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                failure = Some(err);
                Err(reason)
            }
        }
    });
    let raw = match result {
        Ok(raw) => raw,
        Err(err) => return Err(failure.take().unwrap_or(err.into())),
    };

    // SAFETY: raw is fresh and ours
    unsafe {
        if object_is_floating(raw) {
            object_ref_sink(raw);
        }
        Object::from_raw_full(raw).ok_or_else(|| objbridge_rt::Error::ConstructionFailed(ty.name().to_string()).into())
    }
}

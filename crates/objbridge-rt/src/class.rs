//! Class structs, interface vtables and class materialization.
//!
//! A [`TypeClass`] is the runtime's per-type dispatch table: a fixed set of
//! object lifecycle slots (`constructor`, `set_property`, ...) followed by
//! `class_size` generic virtual-function slots. Classes are built lazily by
//! the first [`class_ref`] and are never torn down.
//!
//! # Materialization
//!
//! Building a class:
//! 1. materializes the parent class
//! 2. copies the parent's slots, vfuncs and interface vtables
//! 3. runs the type's own `class_init`
//! 4. initializes the interfaces added to the type itself
//! 5. publishes the class
//!
//! Steps 3 and 4 run under the type's class lock. A `class_init` must not
//! `class_ref` its own type.

use crate::error::{Error, Result};
use crate::object::Instance;
use crate::param::{ParamSpec, canonical_name};
use crate::types::{InterfaceInfo, Type, TypeKind, TypeNode, node, type_interfaces};
use crate::value::Value;
use fxhash::FxHashMap;
use objbridge_log::{debug, warn};
use parking_lot::RwLock;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::Ordering;

/// Untyped virtual-function slot. Cast to the real signature on read.
pub type VFunc = unsafe extern "C" fn();

pub type ClassInitFunc = unsafe extern "C" fn(klass: *mut TypeClass, class_data: *mut c_void);
pub type InstanceInitFunc = unsafe extern "C" fn(instance: *mut Instance, klass: *const TypeClass);
pub type InterfaceInitFunc = unsafe extern "C" fn(iface: *mut TypeInterface, iface_data: *mut c_void);

/// One construct-time property handed to a constructor.
#[repr(C)]
pub struct ConstructProperty {
    pub pspec: *const ParamSpec,
    pub value: *const Value,
}

pub type ConstructorFunc =
    unsafe extern "C" fn(ty: Type, params: *const ConstructProperty, n_params: usize) -> *mut Instance;
pub type SetPropertyFunc =
    unsafe extern "C" fn(obj: *mut Instance, prop_id: u32, value: *const Value, pspec: *const ParamSpec);
pub type GetPropertyFunc =
    unsafe extern "C" fn(obj: *mut Instance, prop_id: u32, value: *mut Value, pspec: *const ParamSpec);
pub type ObjectFunc = unsafe extern "C" fn(obj: *mut Instance);

/// The class struct of a classed type.
#[repr(C)]
pub struct TypeClass {
    g_type: Type,
    pub constructor: ConstructorFunc,
    pub set_property: SetPropertyFunc,
    pub get_property: GetPropertyFunc,
    pub dispose: Option<ObjectFunc>,
    pub finalize: Option<ObjectFunc>,
    pub constructed: Option<ObjectFunc>,
    vfuncs: Box<[Option<VFunc>]>,
    props: RwLock<Vec<ParamSpec>>,
    interfaces: RwLock<FxHashMap<Type, &'static TypeInterface>>,
}

impl TypeClass {
    pub(crate) fn root(
        g_type: Type,
        n_vfuncs: usize,
        constructor: ConstructorFunc,
        set_property: SetPropertyFunc,
        get_property: GetPropertyFunc,
    ) -> Self {
        TypeClass {
            g_type,
            constructor,
            set_property,
            get_property,
            dispose: None,
            finalize: None,
            constructed: None,
            vfuncs: vec![None; n_vfuncs].into_boxed_slice(),
            props: RwLock::new(Vec::new()),
            interfaces: RwLock::new(FxHashMap::default()),
        }
    }

    /// Copies `parent` for a derived type. Properties stay with their owner.
    fn derive(parent: &TypeClass, g_type: Type, n_vfuncs: usize) -> Self {
        let mut vfuncs = vec![None; n_vfuncs.max(parent.vfuncs.len())];
        vfuncs[..parent.vfuncs.len()].copy_from_slice(&parent.vfuncs);

        let interfaces = parent
            .interfaces
            .read()
            .iter()
            .map(|(&iface, vtable)| {
                let mut copy = (*vtable).clone();
                copy.g_instance_type = g_type;
                let copy: &'static TypeInterface = Box::leak(Box::new(copy));
                (iface, copy)
            })
            .collect();

        TypeClass {
            g_type,
            constructor: parent.constructor,
            set_property: parent.set_property,
            get_property: parent.get_property,
            dispose: parent.dispose,
            finalize: parent.finalize,
            constructed: parent.constructed,
            vfuncs: vfuncs.into_boxed_slice(),
            props: RwLock::new(Vec::new()),
            interfaces: RwLock::new(interfaces),
        }
    }

    /// Returns the type this class belongs to.
    pub fn type_(&self) -> Type {
        self.g_type
    }

    /// Returns the type name.
    pub fn name(&self) -> &'static str {
        self.g_type.name()
    }

    /// Returns the parent type's class.
    pub fn parent_class(&self) -> Option<&'static TypeClass> {
        self.g_type.parent().and_then(class_peek)
    }

    /// Number of generic virtual-function slots.
    pub fn n_vfuncs(&self) -> usize {
        self.vfuncs.len()
    }

    /// Reads a virtual-function slot as `F`.
    ///
    /// # Safety
    ///
    /// `F` must be the `unsafe extern "C" fn` type the slot was written with.
    pub unsafe fn vfunc<F: Copy>(&self, slot: usize) -> Option<F> {
        let raw = (*self.vfuncs.get(slot)?)?;
        // SAFETY: both are fn pointers (asserted size), caller guarantees the signature
        Some(unsafe { cast_fn::<VFunc, F>(raw) })
    }

    /// Writes a virtual-function slot.
    ///
    /// # Safety
    ///
    /// `F` must be an `unsafe extern "C" fn` type and readers of the slot
    /// must use the same signature.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is past the class's vfunc count.
    pub unsafe fn set_vfunc<F: Copy>(&mut self, slot: usize, f: Option<F>) {
        let count = self.vfuncs.len();
        let name = self.g_type.name();
        let Some(entry) = self.vfuncs.get_mut(slot) else {
            panic!("vfunc slot {slot} out of range for class '{name}' with {count} slots");
        };
        // SAFETY: fn pointer to fn pointer of equal size
        *entry = f.map(|f| unsafe { cast_fn::<F, VFunc>(f) });
    }

    /// Installs `spec` as property `prop_id` of this class.
    ///
    /// # Errors
    ///
    /// - [`Error::PropertyExists`] if this class already has a property of that name
    /// - [`Error::PropertyAlreadyInstalled`] if `spec` belongs to another class
    pub fn install_property(&self, prop_id: u32, spec: ParamSpec) -> Result<()> {
        let mut props = self.props.write();
        if props.iter().any(|p| p.name() == spec.name()) {
            return Err(Error::PropertyExists {
                type_name: self.name().to_string(),
                name: spec.name().to_string(),
            });
        }
        if !spec.set_owner(self.g_type, prop_id) {
            return Err(Error::PropertyAlreadyInstalled(spec.name().to_string()));
        }
        debug!(
            "installed property '{}' (id {}) on '{}'",
            spec.name(),
            prop_id,
            self.name()
        );
        props.push(spec);
        Ok(())
    }

    /// Re-declares an inherited or interface property as `prop_id` of this
    /// class, so this class's `set_property`/`get_property` handle it.
    ///
    /// Returns the new redirecting spec.
    ///
    /// # Errors
    ///
    /// [`Error::PropertyNotFound`] if neither an ancestor class nor an
    /// implemented interface declares `name`.
    pub fn override_property(&self, prop_id: u32, name: &str) -> Result<ParamSpec> {
        let target = self
            .parent_class()
            .and_then(|p| p.find_property(name))
            .or_else(|| {
                type_interfaces(self.g_type)
                    .into_iter()
                    .find_map(|iface| interface_find_property(iface, name))
            })
            .ok_or_else(|| Error::PropertyNotFound {
                type_name: self.name().to_string(),
                name: name.to_string(),
            })?;

        let spec = ParamSpec::new_override(&target);
        self.install_property(prop_id, spec.clone())?;
        Ok(spec)
    }

    /// Finds a property on this class or an ancestor.
    ///
    /// Overrides resolve to the spec they redirect to.
    pub fn find_property(&self, name: &str) -> Option<ParamSpec> {
        self.find_property_raw(name)
            .map(|spec| spec.redirect_target().cloned().unwrap_or(spec))
    }

    /// Finds the spec as installed, overrides included.
    pub fn find_property_raw(&self, name: &str) -> Option<ParamSpec> {
        let name = canonical_name(name);
        let mut current = Some(self);
        while let Some(klass) = current {
            if let Some(spec) = klass.props.read().iter().find(|p| p.name() == name) {
                return Some(spec.clone());
            }
            current = klass.parent_class();
        }
        None
    }

    /// Lists every property visible on this class, leaf overrides first.
    pub fn list_properties(&self) -> Vec<ParamSpec> {
        let mut seen: Vec<ParamSpec> = Vec::new();
        let mut current = Some(self);
        while let Some(klass) = current {
            for spec in klass.props.read().iter() {
                if !seen.iter().any(|s| s.name() == spec.name()) {
                    seen.push(spec.clone());
                }
            }
            current = klass.parent_class();
        }
        seen
    }

    /// Returns this class's vtable for `iface`.
    pub fn interface(&self, iface: Type) -> Option<&'static TypeInterface> {
        self.interfaces.read().get(&iface).copied()
    }
}

impl fmt::Debug for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeClass")
            .field("type", &self.g_type)
            .field("n_vfuncs", &self.vfuncs.len())
            .field("n_props", &self.props.read().len())
            .finish()
    }
}

/// An interface vtable, as held by one implementing class.
#[repr(C)]
#[derive(Clone)]
pub struct TypeInterface {
    g_type: Type,
    g_instance_type: Type,
    vfuncs: Box<[Option<VFunc>]>,
}

impl TypeInterface {
    /// The interface type.
    pub fn type_(&self) -> Type {
        self.g_type
    }

    /// The implementing type, or the interface itself for the default vtable.
    pub fn instance_type(&self) -> Type {
        self.g_instance_type
    }

    /// Number of virtual-function slots.
    pub fn n_vfuncs(&self) -> usize {
        self.vfuncs.len()
    }

    /// Reads a slot.
    ///
    /// # Safety
    ///
    /// Same contract as [`TypeClass::vfunc`].
    pub unsafe fn vfunc<F: Copy>(&self, slot: usize) -> Option<F> {
        let raw = (*self.vfuncs.get(slot)?)?;
        // SAFETY: see TypeClass::vfunc
        Some(unsafe { cast_fn::<VFunc, F>(raw) })
    }

    /// Writes a slot.
    ///
    /// # Safety
    ///
    /// Same contract as [`TypeClass::set_vfunc`].
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub unsafe fn set_vfunc<F: Copy>(&mut self, slot: usize, f: Option<F>) {
        let count = self.vfuncs.len();
        let name = self.g_type.name();
        let Some(entry) = self.vfuncs.get_mut(slot) else {
            panic!("vfunc slot {slot} out of range for interface '{name}' with {count} slots");
        };
        // SAFETY: see TypeClass::set_vfunc
        *entry = f.map(|f| unsafe { cast_fn::<F, VFunc>(f) });
    }
}

/// Reinterprets one fn pointer type as another.
///
/// # Safety
///
/// Both types must be fn pointers; the caller vouches for the signature.
unsafe fn cast_fn<A: Copy, B: Copy>(a: A) -> B {
    assert_eq!(
        std::mem::size_of::<A>(),
        std::mem::size_of::<B>(),
        "vfunc slots only hold function pointers"
    );
    // SAFETY: sizes checked above
    unsafe { std::mem::transmute_copy::<A, B>(&a) }
}

fn materialize(node: &'static TypeNode) -> &'static TypeClass {
    if let Some(klass) = node.class.get() {
        return klass;
    }

    let _guard = node.class_lock.lock();
    if let Some(klass) = node.class.get() {
        return klass;
    }

    let mut klass = Box::new(match node.parent.and_then(class_ref) {
        Some(parent) => TypeClass::derive(parent, node.id, node.info.class_size),
        None => TypeClass::root(
            node.id,
            node.info.class_size,
            crate::object::object_constructor,
            crate::object::object_set_property_default,
            crate::object::object_get_property_default,
        ),
    });

    if let Some(class_init) = node.info.class_init {
        // SAFETY: klass is exclusively owned until published below
        unsafe { class_init(&mut *klass, node.info.class_data) };
    }

    let klass: &'static TypeClass = Box::leak(klass);
    let interfaces = node.interfaces.lock().clone();
    for (iface, info) in &interfaces {
        init_interface(klass, *iface, info);
    }

    // the lock is held, so this set cannot lose
    let _ = node.class.set(klass);
    debug!("materialized class '{}'", node.name);

    check_interface_properties(klass);
    klass
}

fn check_interface_properties(klass: &TypeClass) {
    for iface in type_interfaces(klass.type_()) {
        for spec in interface_list_properties(iface) {
            if klass.find_property(spec.name()).is_none() {
                warn!(
                    "object class '{}' does not implement property '{}' from interface '{}'",
                    klass.name(),
                    spec.name(),
                    iface.name()
                );
            }
        }
    }
}

/// Builds `klass`'s vtable for `iface` and runs the interface init.
///
/// The vtable starts from the parent class's implementation when there is
/// one, from the interface default otherwise.
fn init_interface(klass: &'static TypeClass, iface: Type, info: &InterfaceInfo) {
    let Some(default) = interface_default(iface) else {
        return;
    };

    let base = klass
        .parent_class()
        .and_then(|p| p.interface(iface))
        .unwrap_or(default);

    let mut vtable = Box::new(base.clone());
    vtable.g_instance_type = klass.type_();

    if let Some(init) = info.init {
        // SAFETY: vtable is exclusively owned until leaked below
        unsafe { init(&mut *vtable, info.data) };
    }

    let vtable: &'static TypeInterface = Box::leak(vtable);
    klass.interfaces.write().insert(iface, vtable);
}

/// Returns the class of `ty`, building it on first use.
///
/// Returns `None` for types without a class (values and interfaces).
pub fn class_ref(ty: Type) -> Option<&'static TypeClass> {
    let node = node(ty)?;
    if node.kind != TypeKind::Classed {
        return None;
    }
    node.class_refs.fetch_add(1, Ordering::AcqRel);
    Some(materialize(node))
}

/// Returns the class of `ty` if it was already built.
pub fn class_peek(ty: Type) -> Option<&'static TypeClass> {
    node(ty).and_then(|n| n.class.get().copied())
}

/// Drops a class reference. Classes of static types are never freed.
pub fn class_unref(klass: &TypeClass) {
    if let Some(node) = node(klass.type_()) {
        let _ = node
            .class_refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Declares that `instance_type` implements `iface_type`.
///
/// If the class is already built, the interface is initialized right away.
///
/// # Errors
///
/// - [`Error::InvalidType`] / [`Error::NotInstantiatable`] for a bad instance type
/// - [`Error::NotAnInterface`] if `iface_type` is not an interface
/// - [`Error::InterfaceAlreadyAdded`] if the type itself already added it
pub fn add_interface_static(instance_type: Type, iface_type: Type, info: &InterfaceInfo) -> Result<()> {
    let instance_node = node(instance_type).ok_or(Error::InvalidType(instance_type.into_raw()))?;
    if instance_node.kind != TypeKind::Classed {
        return Err(Error::NotInstantiatable(instance_node.name.to_string()));
    }
    if !iface_type.is_interface() {
        return Err(Error::NotAnInterface(iface_type.name().to_string()));
    }

    let _guard = instance_node.class_lock.lock();
    {
        let mut interfaces = instance_node.interfaces.lock();
        if interfaces.iter().any(|(t, _)| *t == iface_type) {
            return Err(Error::InterfaceAlreadyAdded {
                type_name: instance_node.name.to_string(),
                iface: iface_type.name().to_string(),
            });
        }
        interfaces.push((iface_type, *info));
    }

    if let Some(klass) = instance_node.class.get() {
        init_interface(klass, iface_type, info);
    }

    debug!(
        "added interface '{}' to '{}'",
        iface_type.name(),
        instance_node.name
    );
    Ok(())
}

/// Returns `klass`'s vtable for `iface`.
pub fn interface_peek(klass: &TypeClass, iface: Type) -> Option<&'static TypeInterface> {
    klass.interface(iface)
}

/// Returns the default vtable of an interface, building it on first use.
pub fn interface_default(iface: Type) -> Option<&'static TypeInterface> {
    let node = node(iface)?;
    let data = node.iface.as_ref()?;
    Some(*data.vtable.get_or_init(|| {
        let mut vtable = Box::new(TypeInterface {
            g_type: iface,
            g_instance_type: iface,
            vfuncs: vec![None; node.info.class_size].into_boxed_slice(),
        });
        if let Some(init) = data.default_init {
            // SAFETY: vtable is exclusively owned until leaked
            unsafe { init(&mut *vtable, std::ptr::null_mut()) };
        }
        Box::leak(vtable)
    }))
}

/// Installs a property on an interface. Implementing classes must override it.
pub fn interface_install_property(iface: Type, spec: ParamSpec) -> Result<()> {
    let data = node(iface)
        .and_then(|n| n.iface.as_ref())
        .ok_or_else(|| Error::NotAnInterface(iface.name().to_string()))?;

    let mut props = data.props.write();
    if props.iter().any(|p| p.name() == spec.name()) {
        return Err(Error::PropertyExists {
            type_name: iface.name().to_string(),
            name: spec.name().to_string(),
        });
    }
    if !spec.set_owner(iface, 0) {
        return Err(Error::PropertyAlreadyInstalled(spec.name().to_string()));
    }
    props.push(spec);
    Ok(())
}

/// Finds a property declared by an interface.
pub fn interface_find_property(iface: Type, name: &str) -> Option<ParamSpec> {
    let name = canonical_name(name);
    let data = node(iface)?.iface.as_ref()?;
    data.props.read().iter().find(|p| p.name() == name).cloned()
}

/// Lists the properties an interface declares.
pub fn interface_list_properties(iface: Type) -> Vec<ParamSpec> {
    node(iface)
        .and_then(|n| n.iface.as_ref())
        .map(|data| data.props.read().clone())
        .unwrap_or_default()
}

//! Type identifiers and the global type registry.
//!
//! Every classed type, interface and fundamental value kind known to the
//! runtime has a [`Type`] id. Ids are issued by [`register_static`] and
//! [`register_interface`] and stay valid for the whole process.
//!
//! # Architecture
//!
//! The registry is a single `RwLock` over an append-only table of leaked
//! [`TypeNode`]s. Lookups copy the `&'static` node out and release the lock
//! right away, so callbacks invoked by the runtime may freely query types.
//!
//! # Example
//!
//! ```rust
//! use objbridge_rt::{register_static, type_from_name, Type, TypeInfo};
//!
//! let parent = Type::OBJECT.query().unwrap();
//! let info = TypeInfo {
//!     class_size: parent.class_size,
//!     instance_size: parent.instance_size,
//!     ..TypeInfo::default()
//! };
//! let ty = register_static(Type::OBJECT, "DocTypeExample", &info).unwrap();
//!
//! assert_eq!(type_from_name("DocTypeExample"), Some(ty));
//! assert_eq!(ty.parent(), Some(Type::OBJECT));
//! assert!(ty.is_a(Type::OBJECT));
//! ```

use crate::class::{ClassInitFunc, InstanceInitFunc, InterfaceInitFunc, TypeClass, TypeInterface};
use crate::error::{Error, Result};
use crate::object::{Instance, object_class_init};
use crate::param::ParamSpec;
use crate::quark::Quark;
use fxhash::FxHashMap;
use objbridge_log::debug;
use parking_lot::{Mutex, RwLock};
use std::ffi::c_void;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;

/// A registered type id.
///
/// `Type` is a plain integer handle, `#[repr(transparent)]` so it can cross
/// the class callback ABI by value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Type(usize);

impl Type {
    /// No type. Returned by failed lookups in raw form.
    pub const INVALID: Type = Type(0);
    /// The empty value type; used as "no return value" for signals.
    pub const NONE: Type = Type(1);
    pub const BOOL: Type = Type(2);
    pub const INT: Type = Type(3);
    pub const UINT: Type = Type(4);
    pub const INT64: Type = Type(5);
    pub const DOUBLE: Type = Type(6);
    pub const STRING: Type = Type(7);
    pub const POINTER: Type = Type(8);
    /// Property specifications, as carried by `notify`.
    pub const PARAM: Type = Type(9);
    /// Root of every classed type.
    pub const OBJECT: Type = Type(10);
    /// Objects created with a floating reference.
    pub const INITIALLY_UNOWNED: Type = Type(11);

    /// Rebuilds a type from its raw id.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Type {
        Type(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn into_raw(self) -> usize {
        self.0
    }

    /// Returns true if the id refers to a registered type.
    pub fn is_valid(self) -> bool {
        node(self).is_some()
    }

    /// Returns the registered name, or `"<invalid>"`.
    pub fn name(self) -> &'static str {
        node(self).map_or("<invalid>", |n| n.name)
    }

    /// Returns the parent type.
    pub fn parent(self) -> Option<Type> {
        node(self).and_then(|n| n.parent)
    }

    /// Looks up a type by name.
    pub fn from_name(name: &str) -> Option<Type> {
        type_from_name(name)
    }

    /// Returns true if `self` is `ancestor`, derives from it, or implements
    /// it when `ancestor` is an interface.
    pub fn is_a(self, ancestor: Type) -> bool {
        if self == ancestor {
            return self.is_valid();
        }
        let mut current = self.parent();
        while let Some(ty) = current {
            if ty == ancestor {
                return true;
            }
            current = ty.parent();
        }
        ancestor.is_interface() && type_interfaces(self).contains(&ancestor)
    }

    /// Returns true for interface types.
    pub fn is_interface(self) -> bool {
        node(self).is_some_and(|n| n.kind == TypeKind::Interface)
    }

    /// Returns true for types with a class struct and instances.
    pub fn is_classed(self) -> bool {
        node(self).is_some_and(|n| n.kind == TypeKind::Classed)
    }

    /// Returns the storage sizes recorded at registration.
    pub fn query(self) -> Option<TypeQuery> {
        type_query(self)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({:#x}, {})", self.0, self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registration parameters for a classed type.
///
/// `class_size` counts the generic virtual-function slots of the class
/// struct; `instance_size` is informational for derived registrations.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub class_size: usize,
    pub instance_size: usize,
    pub class_init: Option<ClassInitFunc>,
    pub class_data: *mut c_void,
    pub instance_init: Option<InstanceInitFunc>,
}

impl Default for TypeInfo {
    fn default() -> Self {
        TypeInfo {
            class_size: 0,
            instance_size: 0,
            class_init: None,
            class_data: std::ptr::null_mut(),
            instance_init: None,
        }
    }
}

// SAFETY: the runtime never dereferences `class_data`; it only hands it back
// to `class_init`. Callers registering a type vouch that the data may be used
// from whichever thread first materializes the class.
unsafe impl Send for TypeInfo {}
unsafe impl Sync for TypeInfo {}

/// Per-interface initialization supplied to `add_interface_static`.
#[derive(Clone, Copy)]
pub struct InterfaceInfo {
    pub init: Option<InterfaceInitFunc>,
    pub data: *mut c_void,
}

impl Default for InterfaceInfo {
    fn default() -> Self {
        InterfaceInfo {
            init: None,
            data: std::ptr::null_mut(),
        }
    }
}

// SAFETY: same contract as `TypeInfo::class_data`.
unsafe impl Send for InterfaceInfo {}
unsafe impl Sync for InterfaceInfo {}

/// Sizes reported by [`type_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeQuery {
    pub type_: Type,
    pub type_name: &'static str,
    pub class_size: usize,
    pub instance_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeKind {
    Value,
    Classed,
    Interface,
}

/// Interface-only node data.
pub(crate) struct InterfaceNode {
    pub(crate) default_init: Option<InterfaceInitFunc>,
    pub(crate) vtable: OnceLock<&'static TypeInterface>,
    pub(crate) props: RwLock<Vec<ParamSpec>>,
}

/// Registry entry for one type. Leaked, never freed.
pub(crate) struct TypeNode {
    pub(crate) id: Type,
    pub(crate) name: &'static str,
    pub(crate) parent: Option<Type>,
    pub(crate) kind: TypeKind,
    pub(crate) info: TypeInfo,
    /// Interfaces added to this type itself, in order.
    pub(crate) interfaces: Mutex<Vec<(Type, InterfaceInfo)>>,
    pub(crate) class: OnceLock<&'static TypeClass>,
    /// Serializes class materialization against interface additions.
    pub(crate) class_lock: Mutex<()>,
    pub(crate) class_refs: AtomicUsize,
    pub(crate) qdata: RwLock<FxHashMap<Quark, usize>>,
    pub(crate) iface: Option<InterfaceNode>,
}

impl TypeNode {
    fn new(id: Type, name: &'static str, parent: Option<Type>, kind: TypeKind, info: TypeInfo) -> Self {
        TypeNode {
            id,
            name,
            parent,
            kind,
            info,
            interfaces: Mutex::new(Vec::new()),
            class: OnceLock::new(),
            class_lock: Mutex::new(()),
            class_refs: AtomicUsize::new(0),
            qdata: RwLock::new(FxHashMap::default()),
            iface: None,
        }
    }
}

struct Registry {
    nodes: Vec<&'static TypeNode>,
    names: FxHashMap<&'static str, Type>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| {
        let mut registry = Registry {
            nodes: Vec::new(),
            names: FxHashMap::default(),
        };

        let object_size = std::mem::size_of::<Instance>();
        let fundamentals: [(&'static str, Option<Type>, TypeKind, TypeInfo); 11] = [
            ("none", None, TypeKind::Value, TypeInfo::default()),
            ("bool", None, TypeKind::Value, TypeInfo::default()),
            ("i32", None, TypeKind::Value, TypeInfo::default()),
            ("u32", None, TypeKind::Value, TypeInfo::default()),
            ("i64", None, TypeKind::Value, TypeInfo::default()),
            ("f64", None, TypeKind::Value, TypeInfo::default()),
            ("String", None, TypeKind::Value, TypeInfo::default()),
            ("Pointer", None, TypeKind::Value, TypeInfo::default()),
            ("ParamSpec", None, TypeKind::Value, TypeInfo::default()),
            (
                "Object",
                None,
                TypeKind::Classed,
                TypeInfo {
                    instance_size: object_size,
                    class_init: Some(object_class_init),
                    ..TypeInfo::default()
                },
            ),
            (
                "InitiallyUnowned",
                Some(Type::OBJECT),
                TypeKind::Classed,
                TypeInfo {
                    instance_size: object_size,
                    ..TypeInfo::default()
                },
            ),
        ];

        for (index, (name, parent, kind, info)) in fundamentals.into_iter().enumerate() {
            let id = Type(index + 1);
            let node: &'static TypeNode = Box::leak(Box::new(TypeNode::new(id, name, parent, kind, info)));
            registry.nodes.push(node);
            registry.names.insert(name, id);
        }

        RwLock::new(registry)
    })
}

/// Returns the node for `ty`, if registered.
pub(crate) fn node(ty: Type) -> Option<&'static TypeNode> {
    let index = ty.0.checked_sub(1)?;
    registry().read().nodes.get(index).copied()
}

/// Checks the runtime's type name rules: at least three characters, a
/// letter or `_` first, then letters, digits, `-`, `_` or `+`.
pub fn is_valid_type_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 3 {
        return false;
    }
    if !(bytes[0].is_ascii_alphabetic() || bytes[0] == b'_') {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'+'))
}

fn insert_node(
    name: &str,
    parent: Option<Type>,
    kind: TypeKind,
    info: TypeInfo,
    iface: Option<InterfaceNode>,
) -> Result<Type> {
    let mut registry = registry().write();

    if registry.names.contains_key(name) {
        return Err(Error::TypeAlreadyExists(name.to_string()));
    }

    let id = Type(registry.nodes.len() + 1);
    let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
    let mut node = TypeNode::new(id, name, parent, kind, info);
    node.iface = iface;
    let node: &'static TypeNode = Box::leak(Box::new(node));

    registry.nodes.push(node);
    registry.names.insert(name, id);
    Ok(id)
}

/// Registers a classed type deriving from `parent`.
///
/// The class struct is not built here; it is materialized by the first
/// [`class_ref`](crate::class_ref).
///
/// # Errors
///
/// - [`Error::InvalidTypeName`] if `name` breaks the naming rules
/// - [`Error::InvalidType`] / [`Error::NotDerivable`] for a bad parent
/// - [`Error::SizeTooSmall`] if the sizes are below the parent's
/// - [`Error::TypeAlreadyExists`] if the name is taken
pub fn register_static(parent: Type, name: &str, info: &TypeInfo) -> Result<Type> {
    if !is_valid_type_name(name) {
        return Err(Error::InvalidTypeName(name.to_string()));
    }

    let parent_node = node(parent).ok_or(Error::InvalidType(parent.0))?;
    if parent_node.kind != TypeKind::Classed {
        return Err(Error::NotDerivable(parent_node.name.to_string()));
    }
    if info.class_size < parent_node.info.class_size {
        return Err(Error::SizeTooSmall {
            name: name.to_string(),
            what: "class",
            size: info.class_size,
            parent_size: parent_node.info.class_size,
        });
    }
    if info.instance_size < parent_node.info.instance_size {
        return Err(Error::SizeTooSmall {
            name: name.to_string(),
            what: "instance",
            size: info.instance_size,
            parent_size: parent_node.info.instance_size,
        });
    }

    let ty = insert_node(name, Some(parent), TypeKind::Classed, *info, None)?;
    debug!(
        "registered type '{}' ({:#x}) deriving from '{}'",
        name, ty.0, parent_node.name
    );
    Ok(ty)
}

/// Registers an interface type with `n_vfuncs` virtual-function slots.
///
/// `default_init` runs once on the interface's default vtable, before any
/// implementing class copies it. It is the place to install interface
/// properties.
pub fn register_interface(
    name: &str,
    n_vfuncs: usize,
    default_init: Option<InterfaceInitFunc>,
) -> Result<Type> {
    if !is_valid_type_name(name) {
        return Err(Error::InvalidTypeName(name.to_string()));
    }

    let info = TypeInfo {
        class_size: n_vfuncs,
        ..TypeInfo::default()
    };
    let iface = InterfaceNode {
        default_init,
        vtable: OnceLock::new(),
        props: RwLock::new(Vec::new()),
    };
    let ty = insert_node(name, None, TypeKind::Interface, info, Some(iface))?;
    debug!("registered interface '{}' ({:#x})", name, ty.0);
    Ok(ty)
}

/// Looks up a type by name.
pub fn type_from_name(name: &str) -> Option<Type> {
    registry().read().names.get(name).copied()
}

/// Returns the registered sizes of `ty`.
pub fn type_query(ty: Type) -> Option<TypeQuery> {
    node(ty).map(|n| TypeQuery {
        type_: ty,
        type_name: n.name,
        class_size: n.info.class_size,
        instance_size: n.info.instance_size,
    })
}

/// Returns `ty` followed by its ancestors, leaf first.
pub fn type_ancestry(ty: Type) -> Vec<Type> {
    let mut chain = Vec::new();
    let mut current = node(ty).map(|n| n.id);
    while let Some(t) = current {
        chain.push(t);
        current = t.parent();
    }
    chain
}

/// Returns every interface `ty` implements, inherited ones first.
pub fn type_interfaces(ty: Type) -> Vec<Type> {
    let mut result = Vec::new();
    for t in type_ancestry(ty).into_iter().rev() {
        if let Some(n) = node(t) {
            for (iface, _) in n.interfaces.lock().iter() {
                if !result.contains(iface) {
                    result.push(*iface);
                }
            }
        }
    }
    result
}

/// Attaches `data` to a type under `key`, replacing any previous value.
pub fn type_set_qdata(ty: Type, key: Quark, data: usize) {
    if let Some(n) = node(ty) {
        n.qdata.write().insert(key, data);
    }
}

/// Reads type data stored under `key` on `ty` itself (ancestors are not searched).
pub fn type_get_qdata(ty: Type, key: Quark) -> Option<usize> {
    node(ty).and_then(|n| n.qdata.read().get(&key).copied())
}

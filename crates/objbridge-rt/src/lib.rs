//! `objbridge-rt`: a reference-counted dynamic object runtime.
//!
//! The runtime provides a single-inheritance type system with interfaces,
//! laid out the way C object systems do it:
//!
//! - **Types** registered at run time by name, with lazily built class structs
//! - **Classes** holding `extern "C"` lifecycle slots and virtual-function slots
//! - **Instances** with atomic reference counts, floating references and a
//!   quark-keyed side table
//! - **Properties** described by [`ParamSpec`]s and dispatched through the
//!   owning class
//! - **Signals** with detailed names and typed arguments
//!
//! # Architecture
//!
//! - **Public API Layer**: [`Object`], [`Value`], [`ParamSpec`] and the
//!   registration functions
//! - **Runtime Layer**: raw `*mut Instance` functions and class structs,
//!   for code that implements classes
//!
//! # Example
//!
//! ```rust
//! use objbridge_rt::{Object, Type, TypeInfo, register_static};
//!
//! let q = Type::OBJECT.query().unwrap();
//! let ty = register_static(
//!     Type::OBJECT,
//!     "DocExample",
//!     &TypeInfo {
//!         class_size: q.class_size,
//!         instance_size: q.instance_size,
//!         ..TypeInfo::default()
//!     },
//! )
//! .unwrap();
//!
//! let obj = Object::new(ty, &[]).unwrap();
//! assert!(obj.type_().is_a(Type::OBJECT));
//! ```

pub mod class;
pub mod error;
pub mod object;
pub mod param;
pub mod quark;
pub mod signal;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use class::{
    ConstructProperty, ConstructorFunc, GetPropertyFunc, InterfaceInitFunc, ObjectFunc, SetPropertyFunc, TypeClass,
    TypeInterface, VFunc, add_interface_static, class_peek, class_ref, class_unref, interface_default,
    interface_find_property, interface_install_property, interface_list_properties, interface_peek,
};
pub use class::{ClassInitFunc, InstanceInitFunc};
pub use error::{Error, Result};
pub use object::{
    DestroyNotify, Instance, Object, WeakNotify, WeakNotifyId, get_qdata, object_class, object_constructor, object_dispatch_property,
    object_force_floating, object_get_property, object_is_constructing,
    object_is_floating, object_newv, object_newv_with, object_notify, object_notify_by_pspec, object_ref,
    object_ref_count, object_ref_sink, object_set_property, object_type, object_unref, set_qdata, set_qdata_full,
    object_weak_notify_count, object_weak_ref, object_weak_unref, steal_qdata, warn_invalid_property_id,
};
pub use param::{ParamFlags, ParamKind, ParamSpec};
pub use quark::Quark;
pub use signal::{
    Closure, HandlerId, SignalFlags, SignalId, SignalQuery, notify_signal, signal_emit_by_name, signal_emitv,
    signal_connect, signal_handler_disconnect, signal_handler_is_connected, signal_lookup, signal_newv,
    signal_parse_name, signal_query,
};
pub use types::{
    InterfaceInfo, Type, TypeInfo, TypeQuery, register_interface, register_static, type_ancestry, type_from_name,
    type_get_qdata, type_interfaces, type_query, type_set_qdata,
};
pub use value::{FromValue, StaticType, ToValue, Value};

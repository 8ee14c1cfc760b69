//! `objbridge`: Rust subclasses of `objbridge-rt` classes.
//!
//! A Rust struct implementing [`ObjectSubclass`] becomes a registered type
//! of the runtime. Each instance of that type carries the struct as its
//! companion, so native code sees an ordinary instance (with properties,
//! signals, virtual methods and interfaces) while Rust code works with
//! typed fields.
//!
//! # Architecture
//!
//! - **Registration** ([`register_type`]): one runtime type per subclass,
//!   built from a chain of class initialization steps ([`ClassComposer`])
//! - **Companions** ([`instance_of`], [`downcast`]): the side-table link
//!   between an instance and its Rust state
//! - **Members** ([`Property`], [`Signal`]): fields the runtime dispatches
//!   to by byte offset inside the companion
//! - **Handles** ([`RefPtr`], [`Scoped`]): typed, counted references
//! - **Handlers** ([`connect_declared`]): signal handlers looked up by name
//!
//! # Example
//!
//! ```rust
//! use objbridge::prelude::*;
//!
//! struct Person {
//!     name: Property<Option<String>>,
//! }
//!
//! impl ObjectImpl for Person {}
//!
//! impl ObjectSubclass for Person {
//!     const NAME: Option<&'static str> = Some("LibDocPerson");
//!     type ParentClass = Object;
//!     type Interfaces = ();
//!
//!     fn new(cx: &Construct) -> objbridge::Result<Self> {
//!         let spec = ParamSpec::string("name", "Name", "", None, ParamFlags::READWRITE);
//!         Ok(Person { name: Property::new(cx, spec)? })
//!     }
//!
//!     fn members(&self, m: &mut Members) {
//!         self.name.bind(m);
//!     }
//! }
//!
//! let ty = objbridge::register_type::<Person>().unwrap();
//! // the runtime can create it by type, like any native class
//! let obj = Object::new(ty, &[("name", "Ada".to_value())]).unwrap();
//! let person = ref_ptr_cast::<Person>(&obj).unwrap();
//! assert_eq!(person.name.get().as_deref(), Some("Ada"));
//! ```

pub mod bridge;
pub mod definition;
pub mod error;
pub mod handlers;
pub mod interface;
pub mod params;
pub mod property;
pub mod proxy;
pub mod refptr;
pub mod registrar;
pub mod sidetable;
pub mod signal;
pub mod subclass;
mod trampoline;

pub use bridge::{Members, ObjectBridge, downcast, instance_of, instance_of_raw};
pub use definition::{LayerClaim, Layers, Member};
pub use error::{Error, Result};
pub use handlers::{HandlerFn, connect_declared, lookup_handler, register_handler, register_method};
pub use interface::{InterfaceList, InterfaceRequest, IsImplementable};
pub use params::ConstructParams;
pub use property::{Property, PropertyDecl, PropertyValue};
pub use proxy::PropertyProxy;
pub use refptr::{ConstructMode, RefPtr, Scoped, make_ref, ref_ptr_cast};
pub use registrar::{ClassComposer, TYPE_PREFIX, bridged_by, register_named, register_type, static_name};
pub use signal::{Signal, SignalArgs, SignalDecl, SignalReturn};
pub use subclass::{
    Construct, ConstructKind, InitiallyUnowned, IsSubclassable, OBJECT_LAYER, ObjectImpl, ObjectSubclass,
    class_vfunc, layer_defines,
};

/// Everything a subclass definition usually needs.
pub mod prelude {
    pub use crate::{
        Construct, ConstructMode, ConstructParams, InitiallyUnowned, IsImplementable, Members, ObjectImpl,
        ObjectSubclass, Property, PropertyDecl, RefPtr, Scoped, Signal, SignalDecl, make_ref, ref_ptr_cast,
    };
    pub use objbridge_rt::{Object, ParamFlags, ParamSpec, SignalFlags, StaticType, ToValue, Type, Value};
}

//! Interface implementations.
//!
//! A native interface that Rust subclasses can implement provides an
//! [`IsImplementable`] impl: a layer claim naming the virtual members it
//! forwards, and an init function filling the implementing class's vtable
//! with trampolines. A subclass lists its interfaces as a tuple in
//! [`ObjectSubclass::Interfaces`]; at registration each becomes an
//! [`InterfaceRequest`] applied to the new type.

use crate::definition::{LayerClaim, Layers};
use crate::error::Result;
use crate::subclass::ObjectSubclass;
use crate::trampoline::guard;
use objbridge_rt::{InterfaceInfo, Type, TypeInterface, add_interface_static};
use std::ffi::c_void;
use std::ptr;

/// A native interface Rust subclasses can implement.
///
/// # Safety
///
/// `interface_init` may only write vtable slots with the signatures the
/// interface's callers use.
pub unsafe trait IsImplementable<T: ObjectSubclass>: 'static {
    /// The members this interface forwards and which `T` defines.
    const CLAIM: LayerClaim;

    fn interface_type() -> Type;

    /// Fills the vtable of `T`'s class for this interface.
    fn interface_init(iface: &mut TypeInterface);
}

/// One interface to add to a type being registered.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceRequest {
    pub iface: Type,
    pub init: unsafe extern "C" fn(*mut TypeInterface, *mut c_void),
}

impl InterfaceRequest {
    pub fn of<T: ObjectSubclass, I: IsImplementable<T>>() -> Self {
        InterfaceRequest {
            iface: I::interface_type(),
            init: interface_init_trampoline::<T, I>,
        }
    }

    /// Declares that `ty` implements the interface.
    ///
    /// # Errors
    ///
    /// Runtime errors from adding the interface.
    pub fn apply(&self, ty: Type) -> Result<()> {
        let info = InterfaceInfo {
            init: Some(self.init),
            data: ptr::null_mut(),
        };
        Ok(add_interface_static(ty, self.iface, &info)?)
    }
}

unsafe extern "C" fn interface_init_trampoline<T: ObjectSubclass, I: IsImplementable<T>>(
    iface: *mut TypeInterface,
    _data: *mut c_void,
) {
    guard("interface_init", || {
        // SAFETY: the runtime hands us the vtable it is building, exclusively
        I::interface_init(unsafe { &mut *iface });
    });
}

/// A tuple of interfaces implemented by `T`.
pub trait InterfaceList<T: ObjectSubclass> {
    const LAYERS: Layers;

    fn requests() -> Vec<InterfaceRequest>;
}

impl<T: ObjectSubclass> InterfaceList<T> for () {
    const LAYERS: Layers = Layers::EMPTY;

    fn requests() -> Vec<InterfaceRequest> {
        Vec::new()
    }
}

macro_rules! interface_list_tuple {
    ($($name:ident),+) => {
        impl<T: ObjectSubclass, $($name: IsImplementable<T>),+> InterfaceList<T> for ($($name,)+) {
            const LAYERS: Layers = Layers::EMPTY$(.with(<$name as IsImplementable<T>>::CLAIM))+;

            fn requests() -> Vec<InterfaceRequest> {
                vec![$(InterfaceRequest::of::<T, $name>()),+]
            }
        }
    };
}

interface_list_tuple!(A);
interface_list_tuple!(A, B);
interface_list_tuple!(A, B, C);
interface_list_tuple!(A, B, C, D);

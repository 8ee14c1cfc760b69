//! Typed signal slots.
//!
//! A [`Signal<A, R>`] is a field of a subclass naming one signal of its
//! class, with the argument tuple `A` and return type `R` fixed at compile
//! time. Building the slot registers the signal on first use and checks the
//! signature of an existing registration afterwards.

use crate::bridge::{MemberLink, Members};
use crate::error::{Error, Result};
use crate::subclass::Construct;
use objbridge_log::{trace, warn};
use objbridge_rt::{
    FromValue, HandlerId, Object, SignalFlags, SignalId, StaticType, ToValue, Type, Value, signal_connect,
    signal_emitv, signal_handler_disconnect, signal_lookup, signal_newv, signal_query,
};
use std::fmt;
use std::marker::PhantomData;

/// Argument tuples a signal can carry.
pub trait SignalArgs: Sized + 'static {
    fn param_types() -> Vec<Type>;
    fn to_values(&self) -> Vec<Value>;
    fn from_values(values: &[Value]) -> Option<Self>;
}

impl SignalArgs for () {
    fn param_types() -> Vec<Type> {
        Vec::new()
    }

    fn to_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_values(_: &[Value]) -> Option<Self> {
        Some(())
    }
}

macro_rules! signal_args_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name),+> SignalArgs for ($($name,)+)
        where
            $($name: StaticType + ToValue + FromValue + 'static),+
        {
            fn param_types() -> Vec<Type> {
                vec![$($name::static_type()),+]
            }

            fn to_values(&self) -> Vec<Value> {
                vec![$(self.$idx.to_value()),+]
            }

            fn from_values(values: &[Value]) -> Option<Self> {
                Some(($($name::from_value(values.get($idx)?)?,)+))
            }
        }
    };
}

signal_args_tuple!(A: 0);
signal_args_tuple!(A: 0, B: 1);
signal_args_tuple!(A: 0, B: 1, C: 2);
signal_args_tuple!(A: 0, B: 1, C: 2, D: 3);

/// Return types a signal can produce.
pub trait SignalReturn: Sized + 'static {
    fn return_type() -> Type;
    fn to_return(self) -> Option<Value>;
    fn from_return(value: Option<Value>) -> Self;
}

impl SignalReturn for () {
    fn return_type() -> Type {
        Type::NONE
    }

    fn to_return(self) -> Option<Value> {
        None
    }

    fn from_return(_: Option<Value>) -> Self {}
}

macro_rules! signal_return {
    ($($ty:ty),*) => {
        $(
            impl SignalReturn for $ty {
                fn return_type() -> Type {
                    <$ty as StaticType>::static_type()
                }

                fn to_return(self) -> Option<Value> {
                    Some(self.to_value())
                }

                fn from_return(value: Option<Value>) -> Self {
                    value.as_ref().and_then(<$ty as FromValue>::from_value).unwrap_or_default()
                }
            }
        )*
    };
}

signal_return!(bool, i32, u32, i64, f64, String);

/// A signal declared up front, at class initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecl {
    pub name: String,
    pub flags: SignalFlags,
    pub param_types: Vec<Type>,
    pub return_type: Type,
}

impl SignalDecl {
    pub fn of<A: SignalArgs, R: SignalReturn>(name: &str, flags: SignalFlags) -> Self {
        SignalDecl {
            name: name.to_string(),
            flags,
            param_types: A::param_types(),
            return_type: R::return_type(),
        }
    }

    /// Registers the signal on `ty` unless it already exists there.
    pub(crate) fn register(&self, ty: Type) -> Result<SignalId> {
        find_or_register(ty, &self.name, self.flags, self.return_type, &self.param_types)
    }
}

fn find_or_register(ty: Type, name: &str, flags: SignalFlags, return_type: Type, params: &[Type]) -> Result<SignalId> {
    let id = match signal_lookup(name, ty) {
        Some(id) => id,
        None => match signal_newv(name, ty, flags, return_type, params) {
            Ok(id) => return Ok(id),
            // registered concurrently
            Err(objbridge_rt::Error::SignalExists { .. }) => {
                signal_lookup(name, ty).ok_or_else(|| Error::SignalSignatureMismatch(name.to_string()))?
            }
            Err(err) => return Err(err.into()),
        },
    };

    let matches = signal_query(id).is_some_and(|q| q.return_type == return_type && q.param_types == params);
    if !matches {
        return Err(Error::SignalSignatureMismatch(name.to_string()));
    }
    Ok(id)
}

/// A signal of the owning instance with arguments `A` and return type `R`.
pub struct Signal<A, R = ()> {
    link: MemberLink,
    id: SignalId,
    name: String,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: SignalArgs, R: SignalReturn> Signal<A, R> {
    /// Registers the signal on the class being built, or reuses it.
    ///
    /// # Errors
    ///
    /// Registration errors, or [`Error::SignalSignatureMismatch`] if a
    /// signal of that name exists with other types.
    pub fn new(cx: &Construct, name: &str, flags: SignalFlags) -> Result<Self> {
        let id = find_or_register(cx.type_(), name, flags, R::return_type(), &A::param_types())?;
        trace!("signal '{}' of '{}' is {:?}", name, cx.type_().name(), id);
        Ok(Signal {
            link: MemberLink::new(),
            id,
            name: name.to_string(),
            _marker: PhantomData,
        })
    }

    /// Records this slot's place in its companion.
    pub fn bind(&self, members: &mut Members<'_>) {
        match members.offset_of(self) {
            Some(offset) => self.link.bind(offset),
            None => warn!("signal '{}' is not a field of its object", self.name),
        }
    }

    fn instance(&self) -> Result<Object> {
        // SAFETY: a bound slot lives inside its companion
        unsafe { self.link.bridge(self) }
            .and_then(|bridge| bridge.object())
            .ok_or_else(|| Error::Unbound(self.name.clone()))
    }

    /// Emits the signal on the owning instance.
    ///
    /// # Errors
    ///
    /// [`Error::Unbound`] before the slot is bound, or emission errors.
    pub fn emit(&self, args: A) -> Result<R> {
        let object = self.instance()?;
        // SAFETY: object holds a reference
        let ret = unsafe { signal_emitv(object.as_ptr(), self.id, None, &args.to_values()) }?;
        Ok(R::from_return(ret))
    }

    /// Connects a typed handler on the owning instance.
    ///
    /// # Errors
    ///
    /// [`Error::Unbound`] before the slot is bound, or connection errors.
    pub fn connect<F>(&self, f: F) -> Result<HandlerId>
    where
        F: Fn(&Object, A) -> R + Send + Sync + 'static,
    {
        let object = self.instance()?;
        let name = self.name.clone();
        let closure = Box::new(move |values: &[Value]| {
            let Some(Value::Object(Some(emitter))) = values.first() else {
                return None;
            };
            match A::from_values(&values[1..]) {
                Some(args) => f(emitter, args).to_return(),
                None => {
                    warn!("signal '{}' delivered arguments of the wrong types", name);
                    None
                }
            }
        });
        // SAFETY: object holds a reference
        Ok(unsafe { signal_connect(object.as_ptr(), &self.name, closure) }?)
    }

    /// Returns false if `id` was not connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        match self.instance() {
            // SAFETY: object holds a reference
            Ok(object) => unsafe { signal_handler_disconnect(object.as_ptr(), id) },
            Err(_) => false,
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, R> fmt::Debug for Signal<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

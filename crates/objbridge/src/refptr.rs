//! Owning handles on bridged instances.
//!
//! [`RefPtr<T>`] holds one reference on a native instance whose companion
//! is a `T`, and dereferences to the `T`. Cloning takes another reference;
//! the companion lives as long as the instance does.
//!
//! [`Scoped<T>`] is the exception: it owns the companion itself and tears
//! the instance down when dropped, which requires that nobody else still
//! holds a reference.

use crate::bridge::{Companion, ObjectBridge, Ownership, bridge_ptr, set_ownership};
use crate::error::{Error, Result};
use crate::params::ConstructParams;
use crate::registrar;
use crate::sidetable::{OBJECT_KEY, detach};
use crate::subclass::ObjectSubclass;
use objbridge_log::fatal;
use objbridge_rt::{Instance, Object, object_ref_count};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

/// How [`make_ref`] creates the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstructMode {
    /// Native-first when the subclass has a public name, static-first
    /// otherwise.
    #[default]
    Auto,
    /// Rust builds the subclass state and the instance together, under
    /// the generated static name. A named subclass gets a second type,
    /// distinct from its public one.
    Static,
    /// The runtime creates the instance by type name and the class
    /// constructor builds the subclass state.
    Native,
}

/// A counted reference to an instance backed by a `T`.
pub struct RefPtr<T> {
    object: Object,
    companion: NonNull<Companion<T>>,
}

// SAFETY: the companion is Send + Sync (ObjectSubclass bound) and lives as
// long as the reference held in `object`
unsafe impl<T: Send + Sync> Send for RefPtr<T> {}
unsafe impl<T: Send + Sync> Sync for RefPtr<T> {}

impl<T: ObjectSubclass> RefPtr<T> {
    /// Creates a new instance with [`ConstructMode::Auto`].
    ///
    /// # Errors
    ///
    /// As [`make_ref`].
    pub fn new(params: &ConstructParams) -> Result<Self> {
        make_ref(ConstructMode::Auto, params)
    }

    /// Takes over `object` if its companion is a `T`.
    pub fn from_object(object: Object) -> Option<Self> {
        // SAFETY: object holds a reference
        let bridge = unsafe { bridge_ptr(object.as_ptr()) }?;
        // SAFETY: the instance keeps its companion alive
        if !unsafe { bridge.as_ref() }.is::<T>() {
            return None;
        }
        Some(RefPtr {
            object,
            companion: bridge.cast(),
        })
    }

    /// Wraps a reference the caller owns.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live instance whose reference is transferred.
    pub unsafe fn from_raw_full(ptr: *mut Instance) -> Option<Self> {
        // SAFETY: caller contract
        Self::from_object(unsafe { Object::from_raw_full(ptr) }?)
    }

    /// Takes a new reference to `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live instance.
    pub unsafe fn from_raw_none(ptr: *mut Instance) -> Option<Self> {
        // SAFETY: caller contract
        Self::from_object(unsafe { Object::from_raw_none(ptr) }?)
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    pub fn as_ptr(&self) -> *mut Instance {
        self.object.as_ptr()
    }

    pub fn bridge(&self) -> &ObjectBridge {
        // SAFETY: held alive by `object`
        unsafe { &self.companion.as_ref().bridge }
    }

    pub fn imp(&self) -> &T {
        // SAFETY: as above
        unsafe { &self.companion.as_ref().imp }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.object.as_ptr() == b.object.as_ptr()
    }
}

impl<T> Clone for RefPtr<T> {
    fn clone(&self) -> Self {
        RefPtr {
            object: self.object.clone(),
            companion: self.companion,
        }
    }
}

impl<T: ObjectSubclass> Deref for RefPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.imp()
    }
}

impl<T> PartialEq for RefPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
    }
}

impl<T> Eq for RefPtr<T> {}

impl<T> fmt::Debug for RefPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefPtr")
            .field("object", &self.object)
            .field("imp", &std::any::type_name::<T>())
            .finish()
    }
}

/// Creates an instance of `T`.
///
/// # Errors
///
/// - [`Error::NoPublicName`] for [`ConstructMode::Native`] without `T::NAME`
/// - registration, property and construction errors
pub fn make_ref<T: ObjectSubclass>(mode: ConstructMode, params: &ConstructParams) -> Result<RefPtr<T>> {
    let native = match mode {
        ConstructMode::Auto => T::NAME.is_some(),
        ConstructMode::Static => false,
        ConstructMode::Native => true,
    };

    if native {
        let object = registrar::construct_native_first::<T>(params)?;
        let type_name = object.type_().name();
        return RefPtr::from_object(object).ok_or(Error::WrongCompanion {
            type_name: type_name.to_string(),
            expected: std::any::type_name::<T>(),
        });
    }

    let (object, companion) = registrar::construct::<T>(params)?;
    Ok(RefPtr { object, companion })
}

/// Maps a native handle to a typed one, taking another reference.
///
/// Returns `None` if `object` is not backed by a `T`.
pub fn ref_ptr_cast<T: ObjectSubclass>(object: &Object) -> Option<RefPtr<T>> {
    RefPtr::from_object(object.clone())
}

/// An instance whose companion is owned by this handle rather than by the
/// instance.
///
/// Dropping it tears the instance down. No other reference may be alive
/// by then; `dispose` no longer reaches the Rust state.
pub struct Scoped<T: ObjectSubclass> {
    object: ManuallyDrop<Object>,
    companion: NonNull<Companion<T>>,
}

// SAFETY: as for RefPtr
unsafe impl<T: ObjectSubclass> Send for Scoped<T> {}
unsafe impl<T: ObjectSubclass> Sync for Scoped<T> {}

impl<T: ObjectSubclass> Scoped<T> {
    /// # Errors
    ///
    /// As [`make_ref`] with [`ConstructMode::Auto`].
    pub fn new(params: &ConstructParams) -> Result<Self> {
        let RefPtr { object, companion } = make_ref::<T>(ConstructMode::Auto, params)?;
        // SAFETY: we hold a reference and the companion is a Companion<T>
        unsafe { set_ownership::<T>(object.as_ptr(), Ownership::Scoped) };
        Ok(Scoped {
            object: ManuallyDrop::new(object),
            companion,
        })
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn bridge(&self) -> &ObjectBridge {
        // SAFETY: owned by self
        unsafe { &self.companion.as_ref().bridge }
    }
}

impl<T: ObjectSubclass> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: owned by self
        unsafe { &self.companion.as_ref().imp }
    }
}

impl<T: ObjectSubclass> Drop for Scoped<T> {
    fn drop(&mut self) {
        let obj = self.object.as_ptr();
        // SAFETY: we still hold our reference
        let refs = unsafe { object_ref_count(obj) };
        if refs != 1 {
            fatal!("destroying object with outstanding object refs ({} held)", refs);
        }

        // SAFETY: as above
        unsafe { detach(obj, OBJECT_KEY.quark()) };
        // SAFETY: the companion is ours and no longer reachable from the instance
        unsafe { self.companion.as_ref() }.bridge.sever();
        // SAFETY: dropped exactly once, here
        unsafe { ManuallyDrop::drop(&mut self.object) };
        // SAFETY: leaked by link, detached above
        drop(unsafe { Box::from_raw(self.companion.as_ptr()) });
    }
}

impl<T: ObjectSubclass> fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("object", &*self.object)
            .field("imp", &std::any::type_name::<T>())
            .finish()
    }
}

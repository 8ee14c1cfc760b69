//! Companions and the downcast registry.
//!
//! Every instance of a bridged type carries exactly one companion: a boxed
//! `Companion<T>` holding the Rust state of the subclass, reachable through
//! the instance's side table under [`OBJECT_KEY`]. The companion's first
//! field is an [`ObjectBridge`] recording which native instance it belongs
//! to and which Rust type it holds, so a bare `*mut Instance` can be mapped
//! back to `&T` with a type check.
//!
//! # Ownership
//!
//! A companion linked with [`Ownership::SideTable`] is owned by the native
//! instance: the side table's destroy notification drops it during
//! finalization. A companion linked with [`Ownership::Scoped`] has no
//! destroy notification and is torn down by its [`Scoped`](crate::Scoped)
//! owner.

use crate::error::{Error, Result};
use crate::sidetable::{OBJECT_KEY, attach, detach, lookup};
use crate::trampoline;
use objbridge_log::trace;
use objbridge_rt::{DestroyNotify, Instance, Object, Type, object_type};
use std::any::TypeId;
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// The type-erased head of every companion.
#[derive(Debug)]
pub struct ObjectBridge {
    instance: AtomicPtr<Instance>,
    type_: Type,
    rust_type: TypeId,
    rust_name: &'static str,
}

impl ObjectBridge {
    pub(crate) fn new<T: 'static>(type_: Type, instance: *mut Instance) -> Self {
        ObjectBridge {
            instance: AtomicPtr::new(instance),
            type_,
            rust_type: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
        }
    }

    /// The registered type the companion was built for.
    pub fn type_(&self) -> Type {
        self.type_
    }

    /// The native instance, or null once the link was severed.
    pub fn instance(&self) -> *mut Instance {
        self.instance.load(Ordering::Acquire)
    }

    pub fn is_linked(&self) -> bool {
        !self.instance().is_null()
    }

    /// A new reference to the native instance.
    pub fn object(&self) -> Option<Object> {
        // SAFETY: a linked companion never outlives its instance
        unsafe { Object::from_raw_none(self.instance()) }
    }

    pub fn rust_type_name(&self) -> &'static str {
        self.rust_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }

    /// The subclass state, if this companion holds a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if !self.is::<T>() {
            return None;
        }
        // SAFETY: the TypeId matches, and every bridge heads a Companion<T>
        let companion = unsafe { &*(self as *const ObjectBridge).cast::<Companion<T>>() };
        Some(&companion.imp)
    }

    pub(crate) fn sever(&self) {
        self.instance.store(ptr::null_mut(), Ordering::Release);
    }
}

/// Boxed storage for one instance's Rust state.
#[repr(C)]
pub(crate) struct Companion<T> {
    pub(crate) bridge: ObjectBridge,
    pub(crate) imp: T,
}

impl<T: 'static> Companion<T> {
    pub(crate) fn new(type_: Type, instance: *mut Instance, imp: T) -> Box<Self> {
        Box::new(Companion {
            bridge: ObjectBridge::new::<T>(type_, instance),
            imp,
        })
    }
}

/// Who drops a linked companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ownership {
    /// The instance's side table, on finalization.
    SideTable,
    /// A [`Scoped`](crate::Scoped) owner, explicitly.
    Scoped,
}

/// Returns the companion linked to `obj`, whatever its Rust type.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn instance_of_raw<'a>(obj: *mut Instance) -> Option<&'a ObjectBridge> {
    // SAFETY: caller contract; the pointer heads a live companion
    unsafe { bridge_ptr(obj).map(|p| &*p.as_ptr()) }
}

/// Raw form of [`instance_of_raw`], for address arithmetic over the whole
/// companion.
///
/// # Safety
///
/// `obj` must be a live instance.
pub(crate) unsafe fn bridge_ptr(obj: *mut Instance) -> Option<NonNull<ObjectBridge>> {
    // SAFETY: caller contract; entries under OBJECT_KEY are always companions
    unsafe { lookup(obj, OBJECT_KEY.quark()) }.map(NonNull::cast)
}

/// Returns the companion linked to `obj`, if it is a bridged instance.
pub fn instance_of(obj: &Object) -> Option<&ObjectBridge> {
    // SAFETY: obj holds a reference, so the instance and companion are live
    unsafe { instance_of_raw(obj.as_ptr()) }
}

/// Maps a native instance to the Rust state of its subclass.
///
/// Returns `None` for instances without a companion or with a companion of
/// another Rust type.
pub fn downcast<T: 'static>(obj: &Object) -> Option<&T> {
    instance_of(obj)?.downcast_ref::<T>()
}

/// Attaches `companion` to `obj`.
///
/// # Safety
///
/// `obj` must be a live instance, and `companion.bridge` must name it.
///
/// # Errors
///
/// [`Error::AlreadyLinked`] if `obj` already has a companion; `companion`
/// is dropped.
pub(crate) unsafe fn link<T: Send + Sync + 'static>(
    obj: *mut Instance,
    companion: Box<Companion<T>>,
    ownership: Ownership,
) -> Result<NonNull<Companion<T>>> {
    // SAFETY: caller contract
    if unsafe { instance_of_raw(obj) }.is_some() {
        // SAFETY: as above
        let type_name = unsafe { object_type(obj) }.name();
        return Err(Error::AlreadyLinked(type_name.to_string()));
    }

    let ptr = NonNull::from(Box::leak(companion));
    // SAFETY: ptr came from Box::leak and the notification matches T
    unsafe { attach(obj, OBJECT_KEY.quark(), ptr.cast::<c_void>(), destroy_notify::<T>(ownership)) };
    trace!("linked {} to {:p}", std::any::type_name::<T>(), obj);
    Ok(ptr)
}

/// Hands the companion linked to `obj` over to a new owner.
///
/// # Safety
///
/// `obj` must be a live instance whose companion is a `Companion<T>`.
pub(crate) unsafe fn set_ownership<T: Send + Sync + 'static>(obj: *mut Instance, ownership: Ownership) {
    let key = OBJECT_KEY.quark();
    // SAFETY: caller contract; detach runs no notification
    unsafe {
        if let Some(raw) = detach(obj, key) {
            attach(obj, key, raw, destroy_notify::<T>(ownership));
        }
    }
}

fn destroy_notify<T: Send + Sync + 'static>(ownership: Ownership) -> Option<DestroyNotify> {
    match ownership {
        Ownership::SideTable => Some(release_companion::<T>),
        Ownership::Scoped => None,
    }
}

unsafe extern "C" fn release_companion<T: Send + Sync + 'static>(data: *mut c_void) {
    trampoline::guard("companion teardown", || {
        // SAFETY: registered by link::<T> for a leaked Box<Companion<T>>
        let companion = unsafe { Box::from_raw(data.cast::<Companion<T>>()) };
        companion.bridge.sever();
        drop(companion);
    });
}

/// Distance from a companion to one of its member slots.
///
/// Slots resolve their owning bridge from their own address, so they work
/// without holding a pointer back to the companion.
#[derive(Debug)]
pub(crate) struct MemberLink {
    offset: AtomicUsize,
}

const UNBOUND: usize = usize::MAX;

impl MemberLink {
    pub(crate) const fn new() -> Self {
        MemberLink {
            offset: AtomicUsize::new(UNBOUND),
        }
    }

    pub(crate) fn bind(&self, offset: usize) {
        self.offset.store(offset, Ordering::Release);
    }

    pub(crate) fn offset(&self) -> Option<usize> {
        match self.offset.load(Ordering::Acquire) {
            UNBOUND => None,
            off => Some(off),
        }
    }

    /// The bridge heading the companion that contains `member`.
    ///
    /// # Safety
    ///
    /// `member` must be the address of the slot this link belongs to, and
    /// the slot must still live inside its companion.
    pub(crate) unsafe fn bridge<'a, M>(&self, member: *const M) -> Option<&'a ObjectBridge> {
        let offset = self.offset()?;
        // SAFETY: caller contract; offset was measured from the same companion
        Some(unsafe { &*member.byte_sub(offset).cast::<ObjectBridge>() })
    }
}

impl Default for MemberLink {
    fn default() -> Self {
        MemberLink::new()
    }
}

/// Visitor handed to [`ObjectSubclass::members`](crate::ObjectSubclass::members)
/// once a companion sits at its final address.
///
/// Registering a slot records its offset within the companion, so native
/// property dispatch can find it from the instance alone.
pub struct Members<'a> {
    base: *const u8,
    size: usize,
    class_key: usize,
    bridge: &'a ObjectBridge,
}

impl<'a> Members<'a> {
    pub(crate) fn new<T: 'static>(companion: &'a Companion<T>, class_key: usize) -> Self {
        Members {
            base: (companion as *const Companion<T>).cast::<u8>(),
            size: std::mem::size_of::<Companion<T>>(),
            class_key,
            bridge: &companion.bridge,
        }
    }

    /// Byte offset of `member` inside the companion, if it lies inside.
    pub(crate) fn offset_of<M>(&self, member: &M) -> Option<usize> {
        let addr = (member as *const M).cast::<u8>() as usize;
        let base = self.base as usize;
        let end = addr.checked_add(std::mem::size_of::<M>())?;
        (addr >= base && end <= base + self.size).then(|| addr - base)
    }

    pub(crate) fn class_key(&self) -> usize {
        self.class_key
    }

    /// The bridge of the companion being bound.
    pub fn bridge(&self) -> &'a ObjectBridge {
        self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_rt::Type;

    struct Counter {
        hits: u32,
    }

    #[test]
    fn test_link_and_downcast() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        assert!(instance_of(&obj).is_none());

        let companion = Companion::new(Type::OBJECT, obj.as_ptr(), Counter { hits: 3 });
        let ptr = unsafe { link(obj.as_ptr(), companion, Ownership::SideTable) }.unwrap();

        let bridge = instance_of(&obj).unwrap();
        assert!(ptr::eq(bridge, unsafe { &ptr.as_ref().bridge }));
        assert_eq!(bridge.instance(), obj.as_ptr());
        assert_eq!(bridge.type_(), Type::OBJECT);
        assert!(bridge.rust_type_name().ends_with("Counter"));
        assert_eq!(downcast::<Counter>(&obj).map(|c| c.hits), Some(3));
        assert!(downcast::<String>(&obj).is_none());
    }

    #[test]
    fn test_second_link_is_refused() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        let first = Companion::new(Type::OBJECT, obj.as_ptr(), 1u8);
        unsafe { link(obj.as_ptr(), first, Ownership::SideTable) }.unwrap();

        let second = Companion::new(Type::OBJECT, obj.as_ptr(), 2u8);
        let err = unsafe { link(obj.as_ptr(), second, Ownership::SideTable) }.unwrap_err();
        assert!(matches!(err, Error::AlreadyLinked(_)));
        assert_eq!(downcast::<u8>(&obj), Some(&1));
    }

    #[test]
    fn test_member_offsets() {
        struct Pair {
            _a: u64,
            b: MemberLink,
        }
        let companion = Companion::new(
            Type::OBJECT,
            ptr::null_mut(),
            Pair {
                _a: 0,
                b: MemberLink::new(),
            },
        );
        let members = Members::new(&companion, 0);
        let offset = members.offset_of(&companion.imp.b).unwrap();
        assert!(members.offset_of(&0u64).is_none());

        assert!(companion.imp.b.offset().is_none());
        companion.imp.b.bind(offset);
        let bridge = unsafe { companion.imp.b.bridge(&companion.imp.b) }.unwrap();
        assert!(ptr::eq(bridge, &companion.bridge));
        assert!(bridge.is::<Pair>());
    }
}

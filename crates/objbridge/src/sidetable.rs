//! Side-table attachment.
//!
//! Associates one pointer-sized value per key with a native instance or a
//! property specification. The runtime's side table runs destroy
//! notifications outside its own lock, so [`detach`] may be called from a
//! notification raised by the instance's own teardown.

use objbridge_rt::{DestroyNotify, Instance, ParamSpec, Quark};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::OnceLock;

/// A lazily interned side-table key.
pub struct DataKey {
    name: &'static str,
    quark: OnceLock<Quark>,
}

impl DataKey {
    pub const fn new(name: &'static str) -> Self {
        DataKey {
            name,
            quark: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn quark(&self) -> Quark {
        *self.quark.get_or_init(|| Quark::from_string(self.name))
    }
}

/// Key under which an instance's companion is stored.
pub static OBJECT_KEY: DataKey = DataKey::new("OBJBRIDGE_OBJECT");

/// Stores `value` under `key`, destroying whatever was there.
///
/// # Safety
///
/// `obj` must be a live instance and `destroy`, if given, must be valid for
/// `value`.
pub unsafe fn attach(obj: *mut Instance, key: Quark, value: NonNull<c_void>, destroy: Option<DestroyNotify>) {
    // SAFETY: caller contract
    unsafe { objbridge_rt::set_qdata_full(obj, key, value.as_ptr(), destroy) };
}

/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn lookup(obj: *mut Instance, key: Quark) -> Option<NonNull<c_void>> {
    // SAFETY: caller contract
    NonNull::new(unsafe { objbridge_rt::get_qdata(obj, key) })
}

/// Removes the entry without running its destroy notification. The caller
/// takes over the value.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn detach(obj: *mut Instance, key: Quark) -> Option<NonNull<c_void>> {
    // SAFETY: caller contract
    NonNull::new(unsafe { objbridge_rt::steal_qdata(obj, key) })
}

pub fn spec_attach(spec: &ParamSpec, key: Quark, value: usize) {
    spec.set_qdata(key, value);
}

pub fn spec_lookup(spec: &ParamSpec, key: Quark) -> Option<usize> {
    spec.qdata(key)
}

pub fn spec_detach(spec: &ParamSpec, key: Quark) -> Option<usize> {
    spec.steal_qdata(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_rt::{Object, ParamFlags, Type};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FREED: AtomicUsize = AtomicUsize::new(0);
    static DETACHED: AtomicUsize = AtomicUsize::new(0);
    static REENTRANT: DataKey = DataKey::new("sidetable-test-reentrant");

    unsafe extern "C" fn free_u64(data: *mut c_void) {
        FREED.fetch_add(1, Ordering::SeqCst);
        // SAFETY: the tests store Box<u64>
        drop(unsafe { Box::from_raw(data.cast::<u64>()) });
    }

    fn boxed(v: u64) -> NonNull<c_void> {
        NonNull::new(Box::into_raw(Box::new(v)).cast()).unwrap()
    }

    #[test]
    fn test_key_interns_once() {
        let key = DataKey::new("sidetable-test-key");
        assert_eq!(key.quark(), key.quark());
        assert_eq!(key.quark().as_str(), "sidetable-test-key");
        assert_eq!(OBJECT_KEY.name(), "OBJBRIDGE_OBJECT");
    }

    #[test]
    fn test_attach_lookup_detach() {
        let key = Quark::from_string("sidetable-test-attach");
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        let before = FREED.load(Ordering::SeqCst);

        unsafe {
            assert!(lookup(obj.as_ptr(), key).is_none());
            attach(obj.as_ptr(), key, boxed(7), Some(free_u64));
            let value = lookup(obj.as_ptr(), key).unwrap();
            assert_eq!(*value.cast::<u64>().as_ref(), 7);

            let taken = detach(obj.as_ptr(), key).unwrap();
            assert!(lookup(obj.as_ptr(), key).is_none());
            drop(Box::from_raw(taken.cast::<u64>().as_ptr()));
        }

        drop(obj);
        assert_eq!(FREED.load(Ordering::SeqCst), before);
    }

    unsafe extern "C" fn detach_self(data: *mut c_void) {
        // runs inside the instance's teardown and detaches its own entry
        let obj = data.cast::<Instance>();
        assert!(unsafe { detach(obj, REENTRANT.quark()) }.is_none());
        DETACHED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_detach_from_teardown() {
        let obj = Object::new(Type::OBJECT, &[]).unwrap();
        unsafe {
            let raw = NonNull::new(obj.as_ptr().cast::<c_void>()).unwrap();
            attach(obj.as_ptr(), REENTRANT.quark(), raw, Some(detach_self));
        }
        drop(obj);
        assert_eq!(DETACHED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spec_side_table() {
        let spec = ParamSpec::int("sidetable-prop", "", "", 0, 10, 0, ParamFlags::READWRITE);
        let key = Quark::from_string("sidetable-test-spec");
        assert_eq!(spec_lookup(&spec, key), None);
        spec_attach(&spec, key, 24);
        assert_eq!(spec_lookup(&spec, key), Some(24));
        assert_eq!(spec_detach(&spec, key), Some(24));
        assert_eq!(spec_lookup(&spec, key), None);
    }
}

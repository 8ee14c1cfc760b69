// Instance lifecycle integration tests
//
// Teardown ordering, resurrection from dispose, floating references and
// reference counting across threads.

mod common;

use objbridge_rt::{
    Instance, Object, Quark, Type, TypeClass, TypeInfo, object_newv, object_ref, object_ref_count, object_unref,
    register_static, set_qdata_full,
};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

static EVENTS: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
static EVENTS_LOCK: Mutex<()> = Mutex::new(());

unsafe extern "C" fn record_dispose(_obj: *mut Instance) {
    EVENTS.lock().push("dispose");
}

unsafe extern "C" fn record_destroy(_data: *mut c_void) {
    EVENTS.lock().push("qdata");
}

unsafe extern "C" fn tracked_class_init(klass: *mut TypeClass, _: *mut c_void) {
    // SAFETY: exclusively owned during class init
    unsafe { (*klass).dispose = Some(record_dispose) };
}

fn tracked_type() -> Type {
    static TYPE: OnceLock<Type> = OnceLock::new();
    *TYPE.get_or_init(|| {
        register_static(
            Type::OBJECT,
            "RtTestTracked",
            &TypeInfo {
                class_init: Some(tracked_class_init),
                ..common::derived_info(Type::OBJECT)
            },
        )
        .unwrap()
    })
}

#[test]
fn test_teardown_order() {
    let _guard = EVENTS_LOCK.lock();
    EVENTS.lock().clear();

    let obj = Object::new(tracked_type(), &[]).unwrap();
    unsafe {
        set_qdata_full(
            obj.as_ptr(),
            Quark::from_string("rt-test-tracked"),
            std::ptr::dangling_mut::<u8>().cast(),
            Some(record_destroy),
        );
    }
    obj.add_weak_notify(|| EVENTS.lock().push("weak"));

    drop(obj);
    assert_eq!(*EVENTS.lock(), vec!["dispose", "weak", "qdata"]);
}

static RESURRECTED: AtomicUsize = AtomicUsize::new(0);
static KEEP: Mutex<usize> = Mutex::new(0);

unsafe extern "C" fn resurrect_once(obj: *mut Instance) {
    if RESURRECTED.fetch_add(1, Ordering::SeqCst) == 0 {
        // SAFETY: dispose runs on a live instance
        unsafe { object_ref(obj) };
        *KEEP.lock() = obj as usize;
    }
}

unsafe extern "C" fn resurrecting_class_init(klass: *mut TypeClass, _: *mut c_void) {
    // SAFETY: exclusively owned during class init
    unsafe { (*klass).dispose = Some(resurrect_once) };
}

#[test]
fn test_dispose_may_resurrect() {
    let ty = register_static(
        Type::OBJECT,
        "RtTestResurrect",
        &TypeInfo {
            class_init: Some(resurrecting_class_init),
            ..common::derived_info(Type::OBJECT)
        },
    )
    .unwrap();

    let raw = object_newv(ty, &[]).unwrap();
    unsafe {
        object_unref(raw);
        // still alive, held by the dispose handler
        assert_eq!(*KEEP.lock(), raw as usize);
        assert_eq!(object_ref_count(raw), 1);
        object_unref(raw);
    }
    assert_eq!(RESURRECTED.load(Ordering::SeqCst), 2);
}

#[test]
fn test_initially_unowned_subclass_floats() {
    let ty = common::derive(Type::INITIALLY_UNOWNED, "RtTestFloating");
    let raw = object_newv(ty, &[]).unwrap();
    unsafe {
        let obj = Object::from_raw_full(raw).unwrap();
        assert!(obj.is_floating());
        drop(obj);
    }

    let owned = Object::new(ty, &[]).unwrap();
    assert!(!owned.is_floating());
}

#[test]
fn test_concurrent_clone_and_drop() {
    let obj = Object::new(Type::OBJECT, &[]).unwrap();
    let disposed = std::sync::Arc::new(AtomicUsize::new(0));
    let counter = disposed.clone();
    obj.add_weak_notify(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let obj = obj.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let copy = obj.clone();
                    drop(copy);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(obj.ref_count(), 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
    drop(obj);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

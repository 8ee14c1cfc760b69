// Shared fixtures for the runtime integration tests.
//
// `counter_type()` is a class written directly against the runtime ABI: it
// keeps its state in the instance side table and dispatches its two
// properties from `set_property`/`get_property`.

#![allow(dead_code)]

use objbridge_rt::{
    Instance, ParamFlags, ParamSpec, Quark, Type, TypeClass, TypeInfo, Value, get_qdata, register_static,
    set_qdata_full, warn_invalid_property_id,
};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

static NAME_ID: AtomicUsize = AtomicUsize::new(0);

/// Returns a type name no other test uses.
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, NAME_ID.fetch_add(1, Ordering::SeqCst))
}

/// Registers a plain subclass of `parent` with no hooks.
pub fn derive(parent: Type, prefix: &str) -> Type {
    register_static(parent, &unique_name(prefix), &derived_info(parent)).unwrap()
}

pub fn derived_info(parent: Type) -> TypeInfo {
    let q = parent.query().unwrap();
    TypeInfo {
        class_size: q.class_size,
        instance_size: q.instance_size,
        ..TypeInfo::default()
    }
}

pub const PROP_COUNT: u32 = 1;
pub const PROP_LABEL: u32 = 2;
/// Installed but never handled by the dispatch.
pub const PROP_BROKEN: u32 = 3;

#[derive(Default)]
pub struct CounterState {
    pub count: Mutex<i32>,
    pub label: Mutex<Option<String>>,
}

fn state_key() -> Quark {
    Quark::from_string("rt-test-counter-state")
}

unsafe extern "C" fn free_state(data: *mut c_void) {
    // SAFETY: stored by counter_instance_init
    drop(unsafe { Box::from_raw(data.cast::<CounterState>()) });
}

/// # Safety
///
/// `obj` must be a live counter instance.
pub unsafe fn counter_state<'a>(obj: *mut Instance) -> &'a CounterState {
    // SAFETY: every counter instance gets its state in instance_init
    unsafe { &*get_qdata(obj, state_key()).cast::<CounterState>() }
}

unsafe extern "C" fn counter_instance_init(obj: *mut Instance, _klass: *const TypeClass) {
    let state = Box::into_raw(Box::new(CounterState::default()));
    // SAFETY: obj is being initialized
    unsafe { set_qdata_full(obj, state_key(), state.cast(), Some(free_state)) };
}

unsafe extern "C" fn counter_set_property(
    obj: *mut Instance,
    prop_id: u32,
    value: *const Value,
    pspec: *const ParamSpec,
) {
    // SAFETY: dispatch hands us live pointers
    let (state, value) = unsafe { (counter_state(obj), &*value) };
    match prop_id {
        PROP_COUNT => *state.count.lock() = value.get::<i32>().unwrap_or_default(),
        PROP_LABEL => *state.label.lock() = value.get::<Option<String>>().flatten(),
        _ => unsafe { warn_invalid_property_id(obj, prop_id, &*pspec) },
    }
}

unsafe extern "C" fn counter_get_property(
    obj: *mut Instance,
    prop_id: u32,
    value: *mut Value,
    pspec: *const ParamSpec,
) {
    // SAFETY: dispatch hands us live pointers
    let (state, value) = unsafe { (counter_state(obj), &mut *value) };
    match prop_id {
        PROP_COUNT => *value = Value::Int(*state.count.lock()),
        PROP_LABEL => *value = Value::String(state.label.lock().clone()),
        _ => unsafe { warn_invalid_property_id(obj, prop_id, &*pspec) },
    }
}

unsafe extern "C" fn counter_class_init(klass: *mut TypeClass, _data: *mut c_void) {
    // SAFETY: exclusively owned during class init
    let klass = unsafe { &mut *klass };
    klass.set_property = counter_set_property;
    klass.get_property = counter_get_property;

    klass
        .install_property(
            PROP_COUNT,
            ParamSpec::int("count", "Count", "A bounded counter", 0, 100, 10, ParamFlags::READWRITE | ParamFlags::CONSTRUCT),
        )
        .unwrap();
    klass
        .install_property(
            PROP_LABEL,
            ParamSpec::string("label", "Label", "Free text", None, ParamFlags::READWRITE),
        )
        .unwrap();
    klass
        .install_property(
            PROP_BROKEN,
            ParamSpec::boolean("broken", "Broken", "Never dispatched", false, ParamFlags::READWRITE),
        )
        .unwrap();
}

/// A native class with `count` (0..=100, default 10, construct) and `label`.
pub fn counter_type() -> Type {
    static TYPE: OnceLock<Type> = OnceLock::new();
    *TYPE.get_or_init(|| {
        register_static(
            Type::OBJECT,
            "RtTestCounter",
            &TypeInfo {
                class_init: Some(counter_class_init),
                instance_init: Some(counter_instance_init),
                ..derived_info(Type::OBJECT)
            },
        )
        .unwrap()
    })
}

//! Shared plumbing for `extern "C"` entry points.
//!
//! The runtime calls into this crate through plain function pointers.
//! A panic must never cross them; [`guard`] turns one into a fatal report.

use crate::bridge::{ObjectBridge, instance_of_raw};
use objbridge_log::fatal;
use objbridge_rt::{Instance, object_type};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Runs `f`, reporting a panic as fatal.
pub(crate) fn guard<R>(what: &str, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(payload) => fatal!("panic in {}: {}", what, panic_message(payload.as_ref())),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The companion of `obj`, which must exist and hold a `T`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub(crate) unsafe fn companion<'a, T: 'static>(obj: *mut Instance) -> &'a T {
    // SAFETY: caller contract
    let Some(bridge) = (unsafe { instance_of_raw(obj) }) else {
        // SAFETY: as above
        fatal!("missing object for instance of '{}'", unsafe { object_type(obj) }.name());
    };
    checked::<T>(bridge)
}

/// Downcasts a companion that the caller already knows must hold a `T`.
pub(crate) fn checked<T: 'static>(bridge: &ObjectBridge) -> &T {
    match bridge.downcast_ref::<T>() {
        Some(imp) => imp,
        None => fatal!(
            "wrong object type: '{}' holds {}, expected {}",
            bridge.type_().name(),
            bridge.rust_type_name(),
            std::any::type_name::<T>()
        ),
    }
}

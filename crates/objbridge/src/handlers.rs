//! Named signal handlers.
//!
//! UI definitions loaded at run time refer to signal handlers by name. A
//! class registers its handlers here under `(type, name)`; connecting a
//! declared handler looks the name up on the template's type and then on
//! each ancestor, so subclasses inherit their parents' handlers.

use crate::bridge::downcast;
use crate::error::{Error, Result};
use crate::registrar::register_type;
use crate::subclass::ObjectSubclass;
use fxhash::FxHashMap;
use objbridge_log::{debug, trace};
use objbridge_rt::{HandlerId, Instance, Object, Type, Value, WeakNotifyId, object_weak_unref, type_ancestry};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock};

/// A handler callable. Receives the template instance and the signal's
/// arguments (emitter first).
pub type HandlerFn = Arc<dyn Fn(&Object, &[Value]) -> Option<Value> + Send + Sync>;

fn table() -> &'static RwLock<FxHashMap<(Type, String), HandlerFn>> {
    static TABLE: OnceLock<RwLock<FxHashMap<(Type, String), HandlerFn>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Registers `handler` as `name` for `ty`, replacing any previous one.
pub fn register_handler<F>(ty: Type, name: &str, handler: F)
where
    F: Fn(&Object, &[Value]) -> Option<Value> + Send + Sync + 'static,
{
    debug!("handler '{}' registered for '{}'", name, ty.name());
    table()
        .write()
        .insert((ty, name.to_string()), Arc::new(handler));
}

/// Registers a method of subclass `T` as handler `name`.
///
/// # Errors
///
/// Registration errors for `T`.
pub fn register_method<T: ObjectSubclass>(name: &str, method: fn(&T, &[Value]) -> Option<Value>) -> Result<()> {
    let ty = register_type::<T>()?;
    register_handler(ty, name, move |template, args| {
        let imp = downcast::<T>(template)?;
        method(imp, args)
    });
    Ok(())
}

/// Finds handler `name` for `ty` or its nearest ancestor.
pub fn lookup_handler(ty: Type, name: &str) -> Option<HandlerFn> {
    let table = table().read();
    type_ancestry(ty)
        .into_iter()
        .find_map(|t| table.get(&(t, name.to_string())).cloned())
}

/// The template side of a declared connection.
///
/// `alive` is cleared by the template's weak notification, which waits on
/// the lock; while it reads `true` under the lock the template is live.
/// Dropping the watch (the handler was disconnected or its source
/// finalized) takes the notification back off the template.
struct TemplateWatch {
    target: usize,
    alive: Arc<Mutex<bool>>,
    notify: WeakNotifyId,
}

impl TemplateWatch {
    fn template(&self) -> Option<Object> {
        let alive = self.alive.lock();
        if !*alive {
            return None;
        }
        // SAFETY: live while `alive` is set and its lock is held
        unsafe { Object::from_raw_none(self.target as *mut Instance) }
    }
}

impl Drop for TemplateWatch {
    fn drop(&mut self) {
        let alive = self.alive.lock();
        if *alive {
            // SAFETY: as in `template`
            unsafe { object_weak_unref(self.target as *mut Instance, self.notify) };
        }
    }
}

/// Connects `signal` of `source` to the handler `handler` declared for
/// `template`'s type.
///
/// The connection holds no reference on `template`; once the template is
/// disposed the handler is skipped. Disconnecting the handler, or
/// finalizing `source`, releases the connection's hold on the template.
///
/// # Errors
///
/// [`Error::HandlerNotFound`] for an unknown name, or connection errors.
pub fn connect_declared(source: &Object, signal: &str, template: &Object, handler: &str) -> Result<HandlerId> {
    let Some(callable) = lookup_handler(template.type_(), handler) else {
        return Err(Error::HandlerNotFound {
            type_name: template.type_().name().to_string(),
            name: handler.to_string(),
        });
    };

    let alive = Arc::new(Mutex::new(true));
    let flag = alive.clone();
    let notify = template.add_weak_notify(move || *flag.lock() = false);
    let watch = TemplateWatch {
        target: template.as_ptr() as usize,
        alive,
        notify,
    };

    let name = handler.to_string();
    let id = source.connect(signal, move |args| {
        let Some(template) = watch.template() else {
            trace!("handler '{}' skipped: template is gone", name);
            return None;
        };
        callable(&template, args)
    })?;
    Ok(id)
}

//! Signals: named, typed emission points on classed types.
//!
//! Signals are registered per type with [`signal_newv`] and found through
//! the type's ancestry and interfaces with [`signal_lookup`]. Handlers live
//! on the instance. Emission snapshots the matching handlers first and
//! invokes them without holding any lock, so a handler disconnected during
//! an emission still sees that emission.
//!
//! Every classed type carries the detailed `notify` signal, emitted with the
//! changed property's spec; `notify::<name>` only sees that property.

use crate::error::{Error, Result};
use crate::object::{Instance, object_type};
use crate::param::{canonical_name, is_valid_property_name};
use crate::quark::Quark;
use crate::types::{Type, type_ancestry, type_interfaces};
use crate::value::Value;
use fxhash::FxHashMap;
use objbridge_log::debug;
use parking_lot::RwLock;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Signal behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SignalFlags(u32);

impl SignalFlags {
    pub const RUN_FIRST: SignalFlags = SignalFlags(1 << 0);
    pub const RUN_LAST: SignalFlags = SignalFlags(1 << 1);
    pub const RUN_CLEANUP: SignalFlags = SignalFlags(1 << 2);
    pub const NO_RECURSE: SignalFlags = SignalFlags(1 << 3);
    /// Accepts `name::detail` connections and emissions.
    pub const DETAILED: SignalFlags = SignalFlags(1 << 4);
    pub const ACTION: SignalFlags = SignalFlags(1 << 5);
    pub const NO_HOOKS: SignalFlags = SignalFlags(1 << 6);

    #[must_use]
    pub const fn empty() -> Self {
        SignalFlags(0)
    }

    #[must_use]
    pub const fn contains(self, other: SignalFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SignalFlags {
    type Output = SignalFlags;

    fn bitor(self, rhs: SignalFlags) -> SignalFlags {
        SignalFlags(self.0 | rhs.0)
    }
}

/// A registered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u32);

impl SignalId {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// A connected handler, unique across the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handler callable. Receives the emitting instance followed by the signal arguments.
pub type Closure = Box<dyn Fn(&[Value]) -> Option<Value> + Send + Sync>;

pub(crate) struct Handler {
    id: HandlerId,
    signal: SignalId,
    detail: Option<Quark>,
    closure: Arc<dyn Fn(&[Value]) -> Option<Value> + Send + Sync>,
}

/// Description of a registered signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalQuery {
    pub signal_id: SignalId,
    pub signal_name: &'static str,
    pub itype: Type,
    pub flags: SignalFlags,
    pub return_type: Type,
    pub param_types: Vec<Type>,
}

struct SignalNode {
    name: &'static str,
    itype: Type,
    flags: SignalFlags,
    return_type: Type,
    param_types: Vec<Type>,
}

struct SignalRegistry {
    nodes: Vec<Arc<SignalNode>>,
    by_key: FxHashMap<(Type, &'static str), SignalId>,
}

static SIGNALS: OnceLock<RwLock<SignalRegistry>> = OnceLock::new();
static NEXT_HANDLER: AtomicU64 = AtomicU64::new(1);

const NOTIFY: SignalId = SignalId(1);

fn signals() -> &'static RwLock<SignalRegistry> {
    SIGNALS.get_or_init(|| {
        let notify = Arc::new(SignalNode {
            name: "notify",
            itype: Type::OBJECT,
            flags: SignalFlags::RUN_FIRST
                | SignalFlags::NO_RECURSE
                | SignalFlags::DETAILED
                | SignalFlags::ACTION,
            return_type: Type::NONE,
            param_types: vec![Type::PARAM],
        });
        let mut by_key = FxHashMap::default();
        by_key.insert((Type::OBJECT, "notify"), NOTIFY);
        RwLock::new(SignalRegistry {
            nodes: vec![notify],
            by_key,
        })
    })
}

fn signal_node(id: SignalId) -> Option<Arc<SignalNode>> {
    let index = (id.0 as usize).checked_sub(1)?;
    signals().read().nodes.get(index).cloned()
}

/// The `notify` signal every classed type carries.
pub fn notify_signal() -> SignalId {
    let _ = signals();
    NOTIFY
}

/// Registers signal `name` on `itype`.
///
/// # Errors
///
/// - [`Error::InvalidSignalName`] for a malformed name
/// - [`Error::InvalidType`] if `itype` is neither classed nor an interface
/// - [`Error::SignalExists`] if `itype` itself already has the signal
pub fn signal_newv(
    name: &str,
    itype: Type,
    flags: SignalFlags,
    return_type: Type,
    param_types: &[Type],
) -> Result<SignalId> {
    if !is_valid_property_name(name) {
        return Err(Error::InvalidSignalName(name.to_string()));
    }
    if !(itype.is_classed() || itype.is_interface()) {
        return Err(Error::InvalidType(itype.into_raw()));
    }
    let name = canonical_name(name);

    let mut registry = signals().write();
    if registry.by_key.contains_key(&(itype, name.as_ref())) {
        return Err(Error::SignalExists {
            type_name: itype.name().to_string(),
            name: name.into_owned(),
        });
    }

    let id = SignalId(registry.nodes.len() as u32 + 1);
    let name: &'static str = Box::leak(name.into_owned().into_boxed_str());
    registry.nodes.push(Arc::new(SignalNode {
        name,
        itype,
        flags,
        return_type,
        param_types: param_types.to_vec(),
    }));
    registry.by_key.insert((itype, name), id);

    debug!(
        "registered signal '{}' ({}) on '{}'",
        name,
        id.0,
        itype.name()
    );
    Ok(id)
}

/// Finds signal `name` on `itype`, its ancestors or its interfaces.
pub fn signal_lookup(name: &str, itype: Type) -> Option<SignalId> {
    let name = canonical_name(name);
    let candidates = type_ancestry(itype)
        .into_iter()
        .chain(type_interfaces(itype));

    let registry = signals().read();
    for ty in candidates {
        if let Some(&id) = registry.by_key.get(&(ty, name.as_ref())) {
            return Some(id);
        }
    }
    None
}

/// Describes a registered signal.
pub fn signal_query(id: SignalId) -> Option<SignalQuery> {
    signal_node(id).map(|node| SignalQuery {
        signal_id: id,
        signal_name: node.name,
        itype: node.itype,
        flags: node.flags,
        return_type: node.return_type,
        param_types: node.param_types.clone(),
    })
}

/// Splits `name::detail` and resolves the signal on `itype`.
///
/// # Errors
///
/// [`Error::SignalNotFound`], or [`Error::SignalNotDetailed`] when a detail
/// is given for a signal without [`SignalFlags::DETAILED`].
pub fn signal_parse_name(detailed_signal: &str, itype: Type) -> Result<(SignalId, Option<Quark>)> {
    let (name, detail) = match detailed_signal.split_once("::") {
        Some((name, detail)) => (name, Some(detail)),
        None => (detailed_signal, None),
    };

    let id = signal_lookup(name, itype).ok_or_else(|| Error::SignalNotFound {
        type_name: itype.name().to_string(),
        name: name.to_string(),
    })?;

    let detail = match detail {
        Some(detail) => {
            let detailed = signal_node(id).is_some_and(|n| n.flags.contains(SignalFlags::DETAILED));
            if !detailed {
                return Err(Error::SignalNotDetailed(name.to_string()));
            }
            Some(Quark::from_string(&canonical_name(detail)))
        }
        None => None,
    };
    Ok((id, detail))
}

/// Connects `closure` to a signal of `obj`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn signal_connect(obj: *mut Instance, detailed_signal: &str, closure: Closure) -> Result<HandlerId> {
    // SAFETY: caller contract
    let ty = unsafe { object_type(obj) };
    let (signal, detail) = signal_parse_name(detailed_signal, ty)?;
    let id = HandlerId(NEXT_HANDLER.fetch_add(1, Ordering::Relaxed));

    // SAFETY: caller contract
    unsafe { &*obj }.handlers.lock().push(Handler {
        id,
        signal,
        detail,
        closure: Arc::from(closure),
    });
    Ok(id)
}

/// Disconnects a handler. Returns false if `id` is not connected to `obj`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn signal_handler_disconnect(obj: *mut Instance, id: HandlerId) -> bool {
    // SAFETY: caller contract
    let removed = {
        let mut handlers = unsafe { &*obj }.handlers.lock();
        handlers
            .iter()
            .position(|h| h.id == id)
            .map(|pos| handlers.remove(pos))
    };
    removed.is_some()
}

/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn signal_handler_is_connected(obj: *mut Instance, id: HandlerId) -> bool {
    // SAFETY: caller contract
    unsafe { &*obj }.handlers.lock().iter().any(|h| h.id == id)
}

/// Emits signal `id` on `obj`.
///
/// Handlers connected without a detail see every emission; handlers with a
/// detail only see emissions carrying that detail. Returns the last
/// handler's return value, or the return type's empty value, or `None` for
/// signals without a return type.
///
/// # Safety
///
/// `obj` must be a live instance.
///
/// # Errors
///
/// Unknown signal, instance type mismatch, or argument count/type mismatch.
pub unsafe fn signal_emitv(
    obj: *mut Instance,
    id: SignalId,
    detail: Option<Quark>,
    args: &[Value],
) -> Result<Option<Value>> {
    // SAFETY: caller contract
    let ty = unsafe { object_type(obj) };
    let node = signal_node(id).ok_or_else(|| Error::SignalNotFound {
        type_name: ty.name().to_string(),
        name: format!("#{}", id.0),
    })?;

    if !ty.is_a(node.itype) {
        return Err(Error::SignalInstanceMismatch {
            type_name: ty.name().to_string(),
            name: node.name.to_string(),
        });
    }
    if detail.is_some() && !node.flags.contains(SignalFlags::DETAILED) {
        return Err(Error::SignalNotDetailed(node.name.to_string()));
    }
    if args.len() != node.param_types.len() {
        return Err(Error::SignalArgumentCount {
            name: node.name.to_string(),
            expected: node.param_types.len(),
            got: args.len(),
        });
    }
    for (index, (arg, expected)) in args.iter().zip(&node.param_types).enumerate() {
        if !arg.holds(*expected) {
            return Err(Error::SignalArgumentType {
                name: node.name.to_string(),
                index,
                expected: expected.name(),
                got: arg.type_().name(),
            });
        }
    }

    let closures: Vec<_> = {
        // SAFETY: caller contract
        let handlers = unsafe { &*obj }.handlers.lock();
        handlers
            .iter()
            .filter(|h| h.signal == id && (h.detail.is_none() || h.detail == detail))
            .map(|h| h.closure.clone())
            .collect()
    };

    let mut full_args = Vec::with_capacity(args.len() + 1);
    // SAFETY: caller contract; the emission holds its own reference
    full_args.push(Value::Object(unsafe { crate::object::Object::from_raw_none(obj) }));
    full_args.extend_from_slice(args);

    let mut result = None;
    for closure in closures {
        if let Some(value) = closure(&full_args) {
            result = Some(value);
        }
    }

    if node.return_type == Type::NONE {
        return Ok(None);
    }
    Ok(Some(result.unwrap_or_else(|| Value::for_type(node.return_type))))
}

/// Emits a signal given as `name` or `name::detail`.
///
/// # Safety
///
/// `obj` must be a live instance.
pub unsafe fn signal_emit_by_name(obj: *mut Instance, detailed_signal: &str, args: &[Value]) -> Result<Option<Value>> {
    // SAFETY: caller contract
    let ty = unsafe { object_type(obj) };
    let (id, detail) = signal_parse_name(detailed_signal, ty)?;
    // SAFETY: caller contract
    unsafe { signal_emitv(obj, id, detail, args) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::types::{TypeInfo, register_static};
    use parking_lot::Mutex;

    fn test_type(name: &str) -> Type {
        let q = Type::OBJECT.query().unwrap();
        register_static(
            Type::OBJECT,
            name,
            &TypeInfo {
                class_size: q.class_size,
                instance_size: q.instance_size,
                ..TypeInfo::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let ty = test_type("SignalTestLookup");
        let id = signal_newv("fired", ty, SignalFlags::RUN_LAST, Type::NONE, &[Type::INT]).unwrap();

        assert_eq!(signal_lookup("fired", ty), Some(id));
        assert_eq!(signal_lookup("fired", Type::OBJECT), None);
        assert_eq!(signal_lookup("notify", ty), Some(notify_signal()));

        let err = signal_newv("fired", ty, SignalFlags::RUN_LAST, Type::NONE, &[]).unwrap_err();
        assert!(matches!(err, Error::SignalExists { .. }));

        let query = signal_query(id).unwrap();
        assert_eq!(query.signal_name, "fired");
        assert_eq!(query.param_types, vec![Type::INT]);
    }

    #[test]
    fn test_emit_delivers_arguments_in_order() {
        let ty = test_type("SignalTestEmit");
        signal_newv("pair", ty, SignalFlags::RUN_LAST, Type::NONE, &[Type::INT, Type::STRING]).unwrap();
        let obj = Object::new(ty, &[]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        obj.connect("pair", move |args| {
            sink.lock().push(args.to_vec());
            None
        })
        .unwrap();

        obj.emit_by_name("pair", &[Value::Int(7), Value::String(Some("x".into()))])
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], Value::Object(Some(obj.clone())));
        assert_eq!(seen[0][1], Value::Int(7));
        assert_eq!(seen[0][2], Value::String(Some("x".into())));
    }

    #[test]
    fn test_emit_validates_arguments() {
        let ty = test_type("SignalTestValidate");
        signal_newv("count", ty, SignalFlags::RUN_LAST, Type::NONE, &[Type::INT]).unwrap();
        let obj = Object::new(ty, &[]).unwrap();

        assert!(matches!(
            obj.emit_by_name("count", &[]),
            Err(Error::SignalArgumentCount { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            obj.emit_by_name("count", &[Value::Bool(true)]),
            Err(Error::SignalArgumentType { index: 0, .. })
        ));
        assert!(matches!(
            obj.emit_by_name("count::detail", &[Value::Int(1)]),
            Err(Error::SignalNotDetailed(_))
        ));
        assert!(matches!(
            obj.emit_by_name("missing", &[]),
            Err(Error::SignalNotFound { .. })
        ));
    }

    #[test]
    fn test_return_value_and_disconnect() {
        let ty = test_type("SignalTestReturn");
        signal_newv("query", ty, SignalFlags::RUN_LAST, Type::INT, &[]).unwrap();
        let obj = Object::new(ty, &[]).unwrap();

        assert_eq!(obj.emit_by_name("query", &[]).unwrap(), Some(Value::Int(0)));

        let id = obj.connect("query", |_| Some(Value::Int(42))).unwrap();
        assert_eq!(obj.emit_by_name("query", &[]).unwrap(), Some(Value::Int(42)));

        assert!(obj.disconnect(id));
        assert!(!obj.disconnect(id));
        assert_eq!(obj.emit_by_name("query", &[]).unwrap(), Some(Value::Int(0)));
    }

    #[test]
    fn test_detail_filtering() {
        let ty = test_type("SignalTestDetail");
        let obj = Object::new(ty, &[]).unwrap();
        let all = Arc::new(AtomicU64::new(0));
        let only_a = Arc::new(AtomicU64::new(0));

        let counter = all.clone();
        obj.connect("notify", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })
        .unwrap();
        let counter = only_a.clone();
        obj.connect("notify::a", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })
        .unwrap();

        let spec = crate::ParamSpec::int("a", "A", "A", 0, 1, 0, crate::ParamFlags::READWRITE);
        let arg = [Value::Param(Some(spec))];
        unsafe {
            signal_emitv(obj.as_ptr(), notify_signal(), Some(Quark::from_string("a")), &arg).unwrap();
            signal_emitv(obj.as_ptr(), notify_signal(), Some(Quark::from_string("b")), &arg).unwrap();
        }

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(only_a.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_during_emission_keeps_snapshot() {
        let ty = test_type("SignalTestSnapshot");
        signal_newv("tick", ty, SignalFlags::RUN_LAST, Type::NONE, &[]).unwrap();
        let obj = Object::new(ty, &[]).unwrap();

        let second_id = Arc::new(Mutex::new(None::<HandlerId>));
        let calls = Arc::new(AtomicU64::new(0));

        let target = second_id.clone();
        obj.connect("tick", move |args| {
            if let (Some(Value::Object(Some(obj))), Some(id)) = (args.first(), *target.lock()) {
                obj.disconnect(id);
            }
            None
        })
        .unwrap();
        let counter = calls.clone();
        let id = obj
            .connect("tick", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            })
            .unwrap();
        *second_id.lock() = Some(id);

        obj.emit_by_name("tick", &[]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        obj.emit_by_name("tick", &[]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

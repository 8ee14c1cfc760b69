//! Property specifications.
//!
//! A [`ParamSpec`] describes one property: name, value kind, bounds, default
//! and access flags. Specs are shared (`Arc`) and compared by identity. Once
//! installed on a class, a spec records its owner type and numeric id, and
//! carries its own small side table of pointer-sized data keyed by [`Quark`].

use crate::error::{Error, Result};
use crate::quark::Quark;
use crate::types::Type;
use crate::value::Value;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, OnceLock};

/// Access flags of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ParamFlags(u32);

impl ParamFlags {
    pub const READABLE: ParamFlags = ParamFlags(1 << 0);
    pub const WRITABLE: ParamFlags = ParamFlags(1 << 1);
    pub const READWRITE: ParamFlags = ParamFlags(Self::READABLE.0 | Self::WRITABLE.0);
    /// Set during construction, default value if not supplied.
    pub const CONSTRUCT: ParamFlags = ParamFlags(1 << 2);
    /// Only settable during construction.
    pub const CONSTRUCT_ONLY: ParamFlags = ParamFlags(1 << 3);

    #[must_use]
    pub const fn empty() -> Self {
        ParamFlags(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: ParamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any flag in `other` is set.
    #[must_use]
    pub const fn intersects(self, other: ParamFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ParamFlags {
    type Output = ParamFlags;

    fn bitor(self, rhs: ParamFlags) -> ParamFlags {
        ParamFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParamFlags {
    fn bitor_assign(&mut self, rhs: ParamFlags) {
        self.0 |= rhs.0;
    }
}

/// Value kind, bounds and default of a property.
#[derive(Debug, Clone)]
pub enum ParamKind {
    Bool { default: bool },
    Int { min: i32, max: i32, default: i32 },
    UInt { min: u32, max: u32, default: u32 },
    Int64 { min: i64, max: i64, default: i64 },
    Double { min: f64, max: f64, default: f64 },
    String { default: Option<String> },
    Object { object_type: Type },
    /// Redeclaration of another spec by an overriding class.
    Override { target: ParamSpec },
}

struct ParamSpecInner {
    name: String,
    nick: String,
    blurb: String,
    flags: ParamFlags,
    kind: ParamKind,
    owner: OnceLock<(Type, u32)>,
    qdata: RwLock<FxHashMap<Quark, usize>>,
}

/// A shared property specification.
#[derive(Clone)]
pub struct ParamSpec(Arc<ParamSpecInner>);

/// Canonical form of a property or signal name: `_` becomes `-`.
pub fn canonical_name(name: &str) -> Cow<'_, str> {
    if name.contains('_') {
        Cow::Owned(name.replace('_', "-"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Property names start with a letter, then letters, digits, `-` or `_`.
pub fn is_valid_property_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl ParamSpec {
    /// Builds a spec of any kind.
    pub fn new(name: &str, nick: &str, blurb: &str, kind: ParamKind, flags: ParamFlags) -> ParamSpec {
        ParamSpec(Arc::new(ParamSpecInner {
            name: canonical_name(name).into_owned(),
            nick: nick.to_string(),
            blurb: blurb.to_string(),
            flags,
            kind,
            owner: OnceLock::new(),
            qdata: RwLock::new(FxHashMap::default()),
        }))
    }

    pub fn boolean(name: &str, nick: &str, blurb: &str, default: bool, flags: ParamFlags) -> ParamSpec {
        Self::new(name, nick, blurb, ParamKind::Bool { default }, flags)
    }

    pub fn int(name: &str, nick: &str, blurb: &str, min: i32, max: i32, default: i32, flags: ParamFlags) -> ParamSpec {
        Self::new(name, nick, blurb, ParamKind::Int { min, max, default }, flags)
    }

    pub fn uint(name: &str, nick: &str, blurb: &str, min: u32, max: u32, default: u32, flags: ParamFlags) -> ParamSpec {
        Self::new(name, nick, blurb, ParamKind::UInt { min, max, default }, flags)
    }

    pub fn int64(name: &str, nick: &str, blurb: &str, min: i64, max: i64, default: i64, flags: ParamFlags) -> ParamSpec {
        Self::new(name, nick, blurb, ParamKind::Int64 { min, max, default }, flags)
    }

    pub fn double(name: &str, nick: &str, blurb: &str, min: f64, max: f64, default: f64, flags: ParamFlags) -> ParamSpec {
        Self::new(name, nick, blurb, ParamKind::Double { min, max, default }, flags)
    }

    pub fn string(name: &str, nick: &str, blurb: &str, default: Option<&str>, flags: ParamFlags) -> ParamSpec {
        let default = default.map(str::to_string);
        Self::new(name, nick, blurb, ParamKind::String { default }, flags)
    }

    pub fn object(name: &str, nick: &str, blurb: &str, object_type: Type, flags: ParamFlags) -> ParamSpec {
        Self::new(name, nick, blurb, ParamKind::Object { object_type }, flags)
    }

    /// Builds a spec redirecting to `target` (or to what `target` redirects to).
    pub(crate) fn new_override(target: &ParamSpec) -> ParamSpec {
        let target = target.redirect_target().unwrap_or(target).clone();
        Self::new(
            &target.0.name,
            &target.0.nick,
            &target.0.blurb,
            ParamKind::Override { target: target.clone() },
            target.0.flags,
        )
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn nick(&self) -> &str {
        &self.0.nick
    }

    pub fn blurb(&self) -> &str {
        &self.0.blurb
    }

    pub fn flags(&self) -> ParamFlags {
        self.0.flags
    }

    pub fn kind(&self) -> &ParamKind {
        &self.0.kind
    }

    /// The spec an override redirects to.
    pub fn redirect_target(&self) -> Option<&ParamSpec> {
        match &self.0.kind {
            ParamKind::Override { target } => Some(target),
            _ => None,
        }
    }

    /// Type of the values this property holds.
    pub fn value_type(&self) -> Type {
        match &self.0.kind {
            ParamKind::Bool { .. } => Type::BOOL,
            ParamKind::Int { .. } => Type::INT,
            ParamKind::UInt { .. } => Type::UINT,
            ParamKind::Int64 { .. } => Type::INT64,
            ParamKind::Double { .. } => Type::DOUBLE,
            ParamKind::String { .. } => Type::STRING,
            ParamKind::Object { object_type } => *object_type,
            ParamKind::Override { target } => target.value_type(),
        }
    }

    /// The declared default value.
    pub fn default_value(&self) -> Value {
        match &self.0.kind {
            ParamKind::Bool { default } => Value::Bool(*default),
            ParamKind::Int { default, .. } => Value::Int(*default),
            ParamKind::UInt { default, .. } => Value::UInt(*default),
            ParamKind::Int64 { default, .. } => Value::Int64(*default),
            ParamKind::Double { default, .. } => Value::Double(*default),
            ParamKind::String { default } => Value::String(default.clone()),
            ParamKind::Object { .. } => Value::Object(None),
            ParamKind::Override { target } => target.default_value(),
        }
    }

    /// Checks that `value` has this property's type and lies within bounds.
    ///
    /// # Errors
    ///
    /// [`Error::PropertyTypeMismatch`] or [`Error::ValueOutOfRange`].
    pub fn validate(&self, value: &Value) -> Result<()> {
        if let Some(target) = self.redirect_target() {
            return target.validate(value);
        }

        let expected = self.value_type();
        if !value.holds(expected) {
            return Err(Error::PropertyTypeMismatch {
                name: self.0.name.clone(),
                expected: expected.name(),
                got: value.type_().name(),
            });
        }

        let in_range = match (&self.0.kind, value) {
            (ParamKind::Int { min, max, .. }, Value::Int(v)) => v >= min && v <= max,
            (ParamKind::UInt { min, max, .. }, Value::UInt(v)) => v >= min && v <= max,
            (ParamKind::Int64 { min, max, .. }, Value::Int64(v)) => v >= min && v <= max,
            (ParamKind::Double { min, max, .. }, Value::Double(v)) => v >= min && v <= max,
            _ => true,
        };
        if !in_range {
            return Err(Error::ValueOutOfRange {
                name: self.0.name.clone(),
                value: format!("{value:?}"),
            });
        }
        Ok(())
    }

    /// Type that installed this spec, or [`Type::INVALID`].
    pub fn owner_type(&self) -> Type {
        self.0.owner.get().map_or(Type::INVALID, |o| o.0)
    }

    /// Numeric id within the owner, or 0.
    pub fn param_id(&self) -> u32 {
        self.0.owner.get().map_or(0, |o| o.1)
    }

    /// Records the installing class. Fails if already installed.
    pub(crate) fn set_owner(&self, owner: Type, prop_id: u32) -> bool {
        self.0.owner.set((owner, prop_id)).is_ok()
    }

    /// Stores pointer-sized data on this spec, replacing any previous value.
    pub fn set_qdata(&self, key: Quark, data: usize) {
        self.0.qdata.write().insert(key, data);
    }

    /// Reads data stored under `key`.
    pub fn qdata(&self, key: Quark) -> Option<usize> {
        self.0.qdata.read().get(&key).copied()
    }

    /// Removes and returns data stored under `key`.
    pub fn steal_qdata(&self, key: Quark) -> Option<usize> {
        self.0.qdata.write().remove(&key)
    }

    /// Identity comparison.
    pub fn ptr_eq(a: &ParamSpec, b: &ParamSpec) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for ParamSpec {
    fn eq(&self, other: &Self) -> bool {
        ParamSpec::ptr_eq(self, other)
    }
}

impl Eq for ParamSpec {}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.0.name)
            .field("value_type", &self.value_type())
            .field("flags", &self.0.flags)
            .field("owner", &self.owner_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_canonicalization() {
        let spec = ParamSpec::string("first_name", "First", "First name", None, ParamFlags::READWRITE);
        assert_eq!(spec.name(), "first-name");
        assert!(is_valid_property_name("first-name"));
        assert!(is_valid_property_name("age"));
        assert!(!is_valid_property_name("1st"));
        assert!(!is_valid_property_name(""));
        assert!(!is_valid_property_name("with space"));
    }

    #[test]
    fn test_default_and_type() {
        let spec = ParamSpec::int("age", "Age", "Age", 0, 100, 10, ParamFlags::READWRITE);
        assert_eq!(spec.value_type(), Type::INT);
        assert_eq!(spec.default_value(), Value::Int(10));

        let spec = ParamSpec::string("label", "Label", "Label", Some("none"), ParamFlags::READABLE);
        assert_eq!(spec.default_value(), Value::String(Some("none".into())));
        assert!(!spec.flags().contains(ParamFlags::WRITABLE));
    }

    #[test]
    fn test_validate_bounds_and_type() {
        let spec = ParamSpec::int("age", "Age", "Age", 0, 100, 10, ParamFlags::READWRITE);
        assert!(spec.validate(&Value::Int(43)).is_ok());
        assert!(matches!(
            spec.validate(&Value::Int(101)),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            spec.validate(&Value::String(Some("x".into()))),
            Err(Error::PropertyTypeMismatch { expected: "i32", got: "String", .. })
        ));

        let spec = ParamSpec::double("ratio", "Ratio", "Ratio", 0.0, 1.0, 0.5, ParamFlags::READWRITE);
        assert!(spec.validate(&Value::Double(f64::NAN)).is_err());
    }

    #[test]
    fn test_override_redirects() {
        let target = ParamSpec::int("age", "Age", "Age", 0, 100, 10, ParamFlags::READWRITE);
        let over = ParamSpec::new_override(&target);
        let over_over = ParamSpec::new_override(&over);

        assert!(ParamSpec::ptr_eq(over.redirect_target().unwrap(), &target));
        assert!(ParamSpec::ptr_eq(over_over.redirect_target().unwrap(), &target));
        assert_eq!(over.value_type(), Type::INT);
        assert_eq!(over.default_value(), Value::Int(10));
        assert!(over.validate(&Value::Int(200)).is_err());
        assert_eq!(over.flags(), ParamFlags::READWRITE);
        assert_eq!(over.name(), "age");
        assert_eq!(over_over.nick(), "Age");
    }

    #[test]
    fn test_owner_set_once() {
        let spec = ParamSpec::boolean("flag", "Flag", "Flag", false, ParamFlags::READWRITE);
        assert_eq!(spec.owner_type(), Type::INVALID);
        assert!(spec.set_owner(Type::OBJECT, 3));
        assert!(!spec.set_owner(Type::OBJECT, 4));
        assert_eq!(spec.param_id(), 3);
    }

    #[test]
    fn test_qdata() {
        let spec = ParamSpec::boolean("flag", "Flag", "Flag", false, ParamFlags::READWRITE);
        let key = Quark::from_string("param-test-offset");
        assert_eq!(spec.qdata(key), None);
        spec.set_qdata(key, 24);
        assert_eq!(spec.qdata(key), Some(24));
        assert_eq!(spec.steal_qdata(key), Some(24));
        assert_eq!(spec.qdata(key), None);
    }
}

//! Dynamically typed values.
//!
//! [`Value`] boxes every value kind the runtime moves through properties and
//! signals. The [`StaticType`], [`ToValue`] and [`FromValue`] traits map
//! Rust types onto it.

use crate::object::Object;
use crate::param::ParamSpec;
use crate::types::Type;

/// A dynamically typed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Int64(i64),
    Double(f64),
    String(Option<String>),
    Object(Option<Object>),
    Param(Option<ParamSpec>),
    Pointer(usize),
}

impl Value {
    /// Empty value of type `ty`: zero, `false`, or an unset reference.
    pub fn for_type(ty: Type) -> Value {
        match ty {
            Type::BOOL => Value::Bool(false),
            Type::INT => Value::Int(0),
            Type::UINT => Value::UInt(0),
            Type::INT64 => Value::Int64(0),
            Type::DOUBLE => Value::Double(0.0),
            Type::STRING => Value::String(None),
            Type::PARAM => Value::Param(None),
            Type::POINTER => Value::Pointer(0),
            t if t.is_a(Type::OBJECT) || t.is_interface() => Value::Object(None),
            _ => Value::None,
        }
    }

    /// The fundamental type of the held value. Objects report their dynamic type.
    pub fn type_(&self) -> Type {
        match self {
            Value::None => Type::NONE,
            Value::Bool(_) => Type::BOOL,
            Value::Int(_) => Type::INT,
            Value::UInt(_) => Type::UINT,
            Value::Int64(_) => Type::INT64,
            Value::Double(_) => Type::DOUBLE,
            Value::String(_) => Type::STRING,
            Value::Object(Some(obj)) => obj.type_(),
            Value::Object(None) => Type::OBJECT,
            Value::Param(_) => Type::PARAM,
            Value::Pointer(_) => Type::POINTER,
        }
    }

    /// Returns true if this value may be stored where `ty` is expected.
    ///
    /// An unset object fits any object or interface type.
    pub fn holds(&self, ty: Type) -> bool {
        match self {
            Value::Object(None) => ty.is_a(Type::OBJECT) || ty.is_interface(),
            Value::Object(Some(obj)) => obj.type_().is_a(ty),
            other => other.type_() == ty,
        }
    }

    /// Converts into `T`, if the value holds one.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }
}

/// Rust types with a runtime type id.
pub trait StaticType {
    fn static_type() -> Type;
}

/// Conversion into a [`Value`].
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Conversion out of a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! value_impls {
    ($($ty:ty => $variant:ident, $type_id:expr;)*) => {
        $(
            impl StaticType for $ty {
                fn static_type() -> Type {
                    $type_id
                }
            }

            impl ToValue for $ty {
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

value_impls! {
    bool => Bool, Type::BOOL;
    i32 => Int, Type::INT;
    u32 => UInt, Type::UINT;
    i64 => Int64, Type::INT64;
    f64 => Double, Type::DOUBLE;
}

impl StaticType for String {
    fn static_type() -> Type {
        Type::STRING
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(Some(self.clone()))
    }
}

/// An unset string reads as empty.
impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone().unwrap_or_default()),
            _ => None,
        }
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Value {
        Value::String(Some((*self).to_string()))
    }
}

impl StaticType for Option<String> {
    fn static_type() -> Type {
        Type::STRING
    }
}

impl ToValue for Option<String> {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl FromValue for Option<String> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl StaticType for Object {
    fn static_type() -> Type {
        Type::OBJECT
    }
}

impl ToValue for Object {
    fn to_value(&self) -> Value {
        Value::Object(Some(self.clone()))
    }
}

impl FromValue for Object {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(Some(obj)) => Some(obj.clone()),
            _ => None,
        }
    }
}

impl StaticType for Option<Object> {
    fn static_type() -> Type {
        Type::OBJECT
    }
}

impl ToValue for Option<Object> {
    fn to_value(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl FromValue for Option<Object> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(obj) => Some(obj.clone()),
            _ => None,
        }
    }
}

impl StaticType for ParamSpec {
    fn static_type() -> Type {
        Type::PARAM
    }
}

impl ToValue for ParamSpec {
    fn to_value(&self) -> Value {
        Value::Param(Some(self.clone()))
    }
}

impl FromValue for ParamSpec {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Param(Some(spec)) => Some(spec.clone()),
            _ => None,
        }
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

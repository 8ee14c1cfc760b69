//! Error types for the object runtime.
//!
//! Only conditions a caller can recover from are errors. Misuse of raw
//! instance pointers is undefined behavior and is not detected here.

use thiserror::Error;

/// Errors reported by the runtime primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A type with this name is already registered.
    #[error("type name '{0}' is already registered")]
    TypeAlreadyExists(String),

    /// The type name contains characters the runtime does not accept.
    #[error("invalid type name '{0}'")]
    InvalidTypeName(String),

    /// The type id does not refer to a registered type.
    #[error("invalid type id {0:#x}")]
    InvalidType(usize),

    /// The parent type cannot be derived from.
    #[error("type '{0}' is not derivable")]
    NotDerivable(String),

    /// The type cannot be instantiated.
    #[error("type '{0}' is not instantiatable")]
    NotInstantiatable(String),

    /// Class or instance size smaller than the parent's.
    #[error("type '{name}' declares {what} size {size}, smaller than its parent's {parent_size}")]
    SizeTooSmall {
        /// Type being registered.
        name: String,
        /// `"class"` or `"instance"`.
        what: &'static str,
        /// Requested size.
        size: usize,
        /// Size of the parent type.
        parent_size: usize,
    },

    /// The type is not an interface.
    #[error("type '{0}' is not an interface")]
    NotAnInterface(String),

    /// The interface was already added to this type.
    #[error("interface '{iface}' is already added to '{type_name}'")]
    InterfaceAlreadyAdded {
        /// Instance type.
        type_name: String,
        /// Interface type.
        iface: String,
    },

    /// Invalid property name.
    #[error("invalid property name '{0}'")]
    InvalidPropertyName(String),

    /// The class has no property of that name.
    #[error("object class '{type_name}' has no property named '{name}'")]
    PropertyNotFound {
        /// Class searched.
        type_name: String,
        /// Requested property name.
        name: String,
    },

    /// A property of that name is already installed on the class.
    #[error("class '{type_name}' already has a property named '{name}'")]
    PropertyExists {
        /// Class the property was installed on.
        type_name: String,
        /// Property name.
        name: String,
    },

    /// The property spec was already installed on another owner.
    #[error("property '{0}' is already installed")]
    PropertyAlreadyInstalled(String),

    /// The property is not writable.
    #[error("property '{0}' is not writable")]
    PropertyNotWritable(String),

    /// The property is not readable.
    #[error("property '{0}' is not readable")]
    PropertyNotReadable(String),

    /// The property may only be set at construction.
    #[error("construct-only property '{0}' cannot be set after construction")]
    ConstructOnly(String),

    /// Value type does not match the property.
    #[error("unable to set property '{name}' of type '{expected}' from value of type '{got}'")]
    PropertyTypeMismatch {
        /// Property name.
        name: String,
        /// Property value type.
        expected: &'static str,
        /// Provided value type.
        got: &'static str,
    },

    /// Value is outside the property bounds.
    #[error("value {value} is out of range for property '{name}'")]
    ValueOutOfRange {
        /// Property name.
        name: String,
        /// Rendered value.
        value: String,
    },

    /// Invalid signal name.
    #[error("invalid signal name '{0}'")]
    InvalidSignalName(String),

    /// A signal of that name already exists on the type.
    #[error("signal '{name}' already exists on '{type_name}'")]
    SignalExists {
        /// Owning type.
        type_name: String,
        /// Signal name.
        name: String,
    },

    /// No such signal on the type or its ancestors.
    #[error("no signal named '{name}' on '{type_name}'")]
    SignalNotFound {
        /// Type searched.
        type_name: String,
        /// Signal name.
        name: String,
    },

    /// A detail was given for a signal that does not take one.
    #[error("signal '{0}' does not support details")]
    SignalNotDetailed(String),

    /// Wrong number of emission arguments.
    #[error("signal '{name}' expects {expected} arguments, got {got}")]
    SignalArgumentCount {
        /// Signal name.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Provided argument count.
        got: usize,
    },

    /// Emission argument of the wrong type.
    #[error("argument {index} of signal '{name}' has type '{got}', expected '{expected}'")]
    SignalArgumentType {
        /// Signal name.
        name: String,
        /// Argument index.
        index: usize,
        /// Declared parameter type.
        expected: &'static str,
        /// Provided value type.
        got: &'static str,
    },

    /// The instance type does not carry the signal.
    #[error("signal '{name}' cannot be emitted on an instance of '{type_name}'")]
    SignalInstanceMismatch {
        /// Instance type.
        type_name: String,
        /// Signal name.
        name: String,
    },

    /// The class constructor returned no instance.
    #[error("constructor for '{0}' returned no instance")]
    ConstructionFailed(String),

    /// Setup hook rejected a freshly constructed instance.
    #[error("setup of '{type_name}' failed: {reason}")]
    SetupFailed {
        /// Constructed type.
        type_name: String,
        /// Hook-provided reason.
        reason: String,
    },
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

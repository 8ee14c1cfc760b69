//! Error types for the binding layer.
//!
//! Invariant violations (a registered instance without its companion, a
//! companion of the wrong Rust type, conflicting registrations) are not
//! errors; they go through `objbridge_log::fatal!`.

use thiserror::Error;

/// Errors reported by the binding layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A runtime primitive failed.
    #[error(transparent)]
    Runtime(#[from] objbridge_rt::Error),

    /// The instance already has a linked companion.
    #[error("instance of '{0}' already has a linked companion")]
    AlreadyLinked(String),

    /// The instance's companion is not of the requested Rust type.
    #[error("instance of '{type_name}' is not backed by '{expected}'")]
    WrongCompanion {
        /// Dynamic type of the instance.
        type_name: String,
        /// Requested Rust type.
        expected: &'static str,
    },

    /// The subclass constructor returned an error or panicked.
    #[error("constructing '{type_name}' failed: {reason}")]
    Construction {
        /// Type being constructed.
        type_name: String,
        /// What the constructor reported.
        reason: String,
    },

    /// Native construction needs a public type name.
    #[error("'{0}' has no public type name and cannot be constructed natively")]
    NoPublicName(&'static str),

    /// A property slot's Rust type does not match its specification.
    #[error("property '{name}' holds '{spec_type}', slot stores '{slot_type}'")]
    SlotTypeMismatch {
        /// Property name.
        name: String,
        /// Value type of the specification.
        spec_type: &'static str,
        /// Value type of the slot.
        slot_type: &'static str,
    },

    /// A signal slot's signature does not match the registered signal.
    #[error("signal '{0}' is registered with a different signature")]
    SignalSignatureMismatch(String),

    /// A member slot is used before its companion bound it.
    #[error("'{0}' is not bound to an instance")]
    Unbound(String),

    /// No handler of that name is registered for the type or its ancestors.
    #[error("no handler named '{name}' for type '{type_name}'")]
    HandlerNotFound {
        /// Template type searched.
        type_name: String,
        /// Declared handler name.
        name: String,
    },

    /// A user-defined failure raised from a subclass constructor.
    #[error("{0}")]
    Custom(String),
}

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, Error>;

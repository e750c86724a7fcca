//! Error taxonomy for the type system.

use thiserror::Error;

use crate::TypeId;

/// Attribute coercion failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValueError {
    #[error("expected {expected} value, got {actual}")]
    WrongKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid {kind} literal `{text}`")]
    Parse { kind: &'static str, text: String },

    #[error("`{value}` is not one of the choices {choices:?}")]
    InvalidChoice { value: String, choices: Vec<String> },
}

/// Rejections produced while linearizing a hierarchy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinearizationError {
    #[error("type `{type_id}` refers to unknown base `{base}`")]
    UnknownBase { type_id: TypeId, base: TypeId },

    #[error("One of the bases causes an inheritance cycle: `{type_id}`")]
    Cycle { type_id: TypeId },

    #[error("duplicate base class `{base}` for `{type_id}`")]
    DuplicateBase { type_id: TypeId, base: TypeId },

    #[error("no consistent linearization for `{type_id}` with bases {bases:?}")]
    Inconsistent { type_id: TypeId, bases: Vec<TypeId> },
}

impl LinearizationError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, LinearizationError::Cycle { .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeError {
    #[error("unknown type `{0}`")]
    UnknownType(TypeId),

    #[error("type `{0}` is already registered")]
    TypeAlreadyRegistered(TypeId),

    #[error("type `{0}` has already been collected")]
    TypeAlreadyCollected(TypeId),

    #[error("deserialisation error: {0}")]
    DeserialisationError(String),

    #[error("{0}")]
    NoUniqueAttributeError(String),

    #[error("unsupported type: {0}")]
    UnsupportedTypeError(String),

    #[error("`{name}` is a reserved attribute name (on `{type_id}`)")]
    ReservedAttribute { type_id: TypeId, name: String },

    #[error("invalid type `{type_id}`: {reason}")]
    InvalidType { type_id: TypeId, reason: String },

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Hierarchy(#[from] LinearizationError),
}

pub type Result<T> = std::result::Result<T, TypeError>;

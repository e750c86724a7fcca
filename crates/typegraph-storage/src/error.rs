use thiserror::Error;
use typegraph_store::StoreError;
use typegraph_types::{LinearizationError, TypeError, TypeId, ValueError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Store(StoreError),

    #[error("unique constraint error: {0}")]
    UniqueConstraintError(String),

    #[error("cannot update type `{type_id}`: {reason}")]
    CannotUpdateType { type_id: TypeId, reason: String },

    #[error("type `{0}` has not been persisted")]
    TypeNotPersisted(TypeId),

    #[error("no result found: {0}")]
    NoResultFound(String),

    #[error("unexpected query result: {0}")]
    UnexpectedResult(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueConstraint { .. } => Error::UniqueConstraintError(err.to_string()),
            other => Error::Store(other),
        }
    }
}

impl From<LinearizationError> for Error {
    fn from(err: LinearizationError) -> Self {
        Error::Type(TypeError::Hierarchy(err))
    }
}

impl From<ValueError> for Error {
    fn from(err: ValueError) -> Self {
        Error::Type(TypeError::Value(err))
    }
}

impl Error {
    pub(crate) fn cannot_update(type_id: &str, reason: &str) -> Self {
        Error::CannotUpdateType {
            type_id: type_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The hierarchy rejection behind this error, if any.
    pub fn linearization(&self) -> Option<&LinearizationError> {
        match self {
            Error::Type(TypeError::Hierarchy(err)) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

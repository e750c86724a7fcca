use thiserror::Error;
use typegraph_types::Value;

use crate::{NodeId, RelId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {label}.{key} = {value}")]
    UniqueConstraint {
        label: String,
        key: String,
        value: Value,
    },

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("relationship {0} not found")]
    RelationshipNotFound(RelId),

    #[error("no index on {label}.{key}")]
    IndexNotFound { label: String, key: String },

    #[error("no {label} node matches the pattern anchor on `{key}`")]
    AnchorNotFound { label: String, key: String },

    #[error("pattern refers to unbound alias `{0}`")]
    UnknownAlias(String),

    #[error("missing query parameter `{0}`")]
    MissingParameter(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Snapshot(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Backend-agnostic document-store access layer: an abstract [`Backend`]
//! contract plus a uniform pipeline of authorization checks, optional
//! schema validation, previous-record retrieval and event notification in
//! front of it.

pub mod backend;
pub mod events;
pub mod filter;
pub mod memory;
pub mod options;
pub mod permission;
pub mod record;
pub mod store;
pub mod user;
pub mod validation;

pub use backend::{Backend, BackendError, IndexSpec};
pub use events::{DbEvent, EventKind, EventSink};
pub use filter::{Condition, Filter};
pub use memory::MemoryBackend;
pub use options::{Direction, ListResult, Options, SortField};
pub use permission::{Operation, PermissionMap};
pub use record::{
    json_to_record, record_to_json, RecordRoot, RecordValue, ID_FIELD, PERMISSION_REQUIRED_FIELD,
};
pub use store::{Store, StoreConfig};
pub use user::{AuditStamp, Clock, SystemClock, User, ANONYMOUS_USER};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    UserError(#[from] StoreUserError),

    #[error("backend error")]
    Backend(backend::BackendError),

    #[error("validation error")]
    Validation(#[from] validation::ValidationError),

    #[error("record error")]
    Record(#[from] record::RecordError),
}

/// Failures callers can map to transport-level responses without string
/// matching.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreUserError {
    #[error("user not found")]
    UserNotFound,

    #[error("user has no roles container")]
    NoPermissionFound,

    #[error("action is not authorized")]
    UnauthorizedAction,

    #[error("record {id} not found")]
    RecordNotFound { id: String },

    #[error("collection {name} not found")]
    CollectionNotFound { name: String },

    #[error("raw query $set clause must be a map")]
    InvalidRawQuery,
}

impl From<backend::BackendError> for StoreError {
    fn from(err: backend::BackendError) -> Self {
        match err {
            backend::BackendError::CollectionNotFound { name } => {
                StoreError::UserError(StoreUserError::CollectionNotFound { name })
            }
            other => StoreError::Backend(other),
        }
    }
}

//! The abstract interface for a persistence backend. The store mediates
//! every operation through the authorization/validation pipeline and then
//! delegates persistence to an implementation of this contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::options::SortField;
use crate::record::RecordRoot;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("collection {name} not found")]
    CollectionNotFound { name: String },

    #[error("backend error: {0}")]
    Store(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Index definition passed through to the backend at collection
/// registration time. Backends without secondary indexes may treat these
/// as advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<SortField>,
    pub unique: bool,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Runs a single paged query: filter, sort, pagination window,
    /// projection, in that order.
    async fn paged_query(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[String]>,
        sort: &[SortField],
        skip: usize,
        limit: usize,
    ) -> Result<Vec<RecordRoot>>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<usize>;

    async fn get_by_key(
        &self,
        collection: &str,
        key: &str,
        projection: Option<&[String]>,
    ) -> Result<Option<RecordRoot>>;

    /// Inserts a record, honoring a caller-supplied `id` field and
    /// assigning a key otherwise. Returns the record key.
    async fn insert(&self, collection: &str, record: RecordRoot) -> Result<String>;

    /// Applies a patch to an existing record. A missing record is a no-op.
    /// With `raw_operator` the patch is an operator document.
    async fn update_by_key(
        &self,
        collection: &str,
        key: &str,
        patch: RecordRoot,
        raw_operator: bool,
    ) -> Result<()>;

    async fn delete_by_key(&self, collection: &str, key: &str) -> Result<()>;

    async fn create_collection(&self, collection: &str) -> Result<()>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()>;

    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Backend-specific output normalization applied to every record a
    /// store operation returns.
    fn transform_output(&self, _record: &mut RecordRoot) {}
}

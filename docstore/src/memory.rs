use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendError, IndexSpec, Result};
use crate::filter::Filter;
use crate::options::SortField;
use crate::record::{
    apply_patch, apply_projection, record_id, sort_records, RecordRoot, RecordValue, ID_FIELD,
};

/// In-memory backend. Collections are created implicitly on insert;
/// `BTreeMap` keeps record iteration stable so unsorted pagination is
/// deterministic.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, MemoryCollection>,
    next_key: u64,
}

#[derive(Default)]
struct MemoryCollection {
    records: BTreeMap<String, RecordRoot>,
    indexes: Vec<IndexSpec>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn paged_query(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[String]>,
        sort: &[SortField],
        skip: usize,
        limit: usize,
    ) -> Result<Vec<RecordRoot>> {
        let state = self.state.lock().await;

        let Some(collection) = state.collections.get(collection) else {
            return Ok(vec![]);
        };

        let mut records: Vec<RecordRoot> = collection
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        sort_records(&mut records, sort);

        let mut page: Vec<RecordRoot> = records.into_iter().skip(skip).take(limit).collect();
        if let Some(projection) = projection {
            for record in &mut page {
                apply_projection(record, projection);
            }
        }

        Ok(page)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let state = self.state.lock().await;

        Ok(state.collections.get(collection).map_or(0, |collection| {
            collection
                .records
                .values()
                .filter(|record| filter.matches(record))
                .count()
        }))
    }

    async fn get_by_key(
        &self,
        collection: &str,
        key: &str,
        projection: Option<&[String]>,
    ) -> Result<Option<RecordRoot>> {
        let state = self.state.lock().await;

        let Some(mut record) = state
            .collections
            .get(collection)
            .and_then(|collection| collection.records.get(key))
            .cloned()
        else {
            return Ok(None);
        };

        if let Some(projection) = projection {
            apply_projection(&mut record, projection);
        }

        Ok(Some(record))
    }

    async fn insert(&self, collection: &str, mut record: RecordRoot) -> Result<String> {
        let mut state = self.state.lock().await;

        let key = match record_id(&record).map_err(|e| BackendError::Store(Box::new(e)))? {
            Some(id) => id.to_string(),
            None => {
                state.next_key += 1;
                format!("{:08}", state.next_key)
            }
        };
        record.insert(ID_FIELD.to_string(), RecordValue::String(key.clone()));

        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .records
            .insert(key.clone(), record);

        Ok(key)
    }

    async fn update_by_key(
        &self,
        collection: &str,
        key: &str,
        patch: RecordRoot,
        raw_operator: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(record) = state
            .collections
            .get_mut(collection)
            .and_then(|collection| collection.records.get_mut(key))
        {
            apply_patch(record, patch, raw_operator);
        }

        Ok(())
    }

    async fn delete_by_key(&self, collection: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(collection) = state.collections.get_mut(collection) {
            collection.records.remove(key);
        }

        Ok(())
    }

    async fn create_collection(&self, collection: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.collections.remove(collection).is_none() {
            return Err(BackendError::CollectionNotFound {
                name: collection.to_string(),
            });
        }

        Ok(())
    }

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(collection) = state.collections.get_mut(collection) else {
            return Err(BackendError::CollectionNotFound {
                name: collection.to_string(),
            });
        };

        collection.indexes.extend_from_slice(indexes);
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.collections.keys().cloned().collect())
    }
}

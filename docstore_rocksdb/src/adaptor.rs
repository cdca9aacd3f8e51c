use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use docstore::backend::{Backend, BackendError, IndexSpec, Result};
use docstore::filter::Filter;
use docstore::options::SortField;
use docstore::record::{
    apply_patch, apply_projection, record_id, sort_records, RecordRoot, RecordValue, ID_FIELD,
};

use crate::keys;
use crate::store::{RocksDbStore, RocksDbStoreError};

/// RocksDB-backed [`Backend`]. Records are held as one bincode value per
/// key; queries scan the collection's key range and evaluate the filter,
/// sort and pagination window in process. Index specs are stored but not
/// consulted, RocksDB's key order does the work.
pub struct RocksDbAdaptor {
    store: RocksDbStore,
    key_seq: AtomicU64,
}

impl From<RocksDbStoreError> for BackendError {
    fn from(err: RocksDbStoreError) -> Self {
        BackendError::Store(Box::new(err))
    }
}

fn backend_err(err: impl Into<RocksDbStoreError>) -> BackendError {
    err.into().into()
}

impl RocksDbAdaptor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: RocksDbStore::open(path).map_err(backend_err)?,
            key_seq: AtomicU64::new(0),
        })
    }

    /// Deletes the underlying database files. Consumes the adaptor; mainly
    /// for tests running against throwaway databases.
    pub fn destroy(self) -> Result<()> {
        Ok(self.store.destroy().map_err(backend_err)?)
    }

    /// Time-prefixed so fresh keys stay roughly insertion-ordered under the
    /// lexicographic key order.
    fn generate_key(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{millis:x}-{:x}", self.key_seq.fetch_add(1, Ordering::Relaxed))
    }

    async fn scan_records(&self, collection: &str, filter: &Filter) -> Result<Vec<RecordRoot>> {
        let (lower, upper) = keys::record_range(collection);
        let entries = self.store.scan(lower, upper).await.map_err(backend_err)?;

        let mut records = Vec::new();
        for (_, value) in entries {
            let record: RecordRoot = bincode::deserialize(&value).map_err(backend_err)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn require_collection(&self, collection: &str) -> Result<()> {
        let marker = self
            .store
            .get(keys::collection_key(collection))
            .await
            .map_err(backend_err)?;
        if marker.is_none() {
            return Err(BackendError::CollectionNotFound {
                name: collection.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Backend for RocksDbAdaptor {
    #[tracing::instrument(skip(self, filter, projection))]
    async fn paged_query(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[String]>,
        sort: &[SortField],
        skip: usize,
        limit: usize,
    ) -> Result<Vec<RecordRoot>> {
        let mut records = self.scan_records(collection, filter).await?;
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
        Ok(self.scan_records(collection, filter).await?.len())
    }

    async fn get_by_key(
        &self,
        collection: &str,
        key: &str,
        projection: Option<&[String]>,
    ) -> Result<Option<RecordRoot>> {
        let Some(value) = self
            .store
            .get(keys::record_key(collection, key))
            .await
            .map_err(backend_err)?
        else {
            return Ok(None);
        };

        let mut record: RecordRoot = bincode::deserialize(&value).map_err(backend_err)?;
        if let Some(projection) = projection {
            apply_projection(&mut record, projection);
        }

        Ok(Some(record))
    }

    #[tracing::instrument(skip(self, record))]
    async fn insert(&self, collection: &str, mut record: RecordRoot) -> Result<String> {
        let key = match record_id(&record).map_err(|e| BackendError::Store(Box::new(e)))? {
            Some(id) => id.to_string(),
            None => self.generate_key(),
        };
        record.insert(ID_FIELD.to_string(), RecordValue::String(key.clone()));

        let value = bincode::serialize(&record).map_err(backend_err)?;
        // The collection marker rides along so collections come into
        // existence implicitly on first insert.
        self.store
            .write(
                vec![
                    (keys::collection_key(collection), vec![]),
                    (keys::record_key(collection, &key), value),
                ],
                vec![],
            )
            .await
            .map_err(backend_err)?;

        Ok(key)
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update_by_key(
        &self,
        collection: &str,
        key: &str,
        patch: RecordRoot,
        raw_operator: bool,
    ) -> Result<()> {
        let Some(mut record) = self.get_by_key(collection, key, None).await? else {
            return Ok(());
        };

        apply_patch(&mut record, patch, raw_operator);

        let value = bincode::serialize(&record).map_err(backend_err)?;
        self.store
            .write(vec![(keys::record_key(collection, key), value)], vec![])
            .await
            .map_err(backend_err)?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_by_key(&self, collection: &str, key: &str) -> Result<()> {
        self.store
            .write(vec![], vec![keys::record_key(collection, key)])
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn create_collection(&self, collection: &str) -> Result<()> {
        self.store
            .write(vec![(keys::collection_key(collection), vec![])], vec![])
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    /// Drops the marker, the index specs and every record in one batch.
    #[tracing::instrument(skip(self))]
    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.require_collection(collection).await?;

        let (lower, upper) = keys::record_range(collection);
        let mut deletes: Vec<Vec<u8>> = self
            .store
            .scan(lower, upper)
            .await
            .map_err(backend_err)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        deletes.push(keys::collection_key(collection));
        deletes.push(keys::index_key(collection));

        self.store.write(vec![], deletes).await.map_err(backend_err)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, indexes))]
    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        self.require_collection(collection).await?;

        let key = keys::index_key(collection);
        let mut specs: Vec<IndexSpec> = match self.store.get(key.clone()).await.map_err(backend_err)? {
            Some(value) => bincode::deserialize(&value).map_err(backend_err)?,
            None => vec![],
        };
        specs.extend_from_slice(indexes);

        let value = bincode::serialize(&specs).map_err(backend_err)?;
        self.store.write(vec![(key, value)], vec![]).await.map_err(backend_err)?;

        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let (lower, upper) = keys::collection_range();
        let entries = self.store.scan(lower, upper).await.map_err(backend_err)?;

        entries
            .into_iter()
            .map(|(key, _)| {
                keys::collection_from_marker(&key)
                    .map_err(|e| backend_err(RocksDbStoreError::from(e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Deref;

    use docstore::filter::Condition;
    use docstore::options::Direction;
    use docstore::record::json_to_record;

    use super::*;

    struct TestAdaptor(Option<RocksDbAdaptor>);

    impl Default for TestAdaptor {
        fn default() -> Self {
            let path = std::env::temp_dir().join(format!(
                "test-docstore-rocksdb-{}",
                rand::random::<u32>()
            ));
            Self(Some(RocksDbAdaptor::open(path).unwrap()))
        }
    }

    impl Drop for TestAdaptor {
        fn drop(&mut self) {
            if let Some(adaptor) = self.0.take() {
                adaptor.destroy().unwrap();
            }
        }
    }

    impl Deref for TestAdaptor {
        type Target = RocksDbAdaptor;

        fn deref(&self) -> &Self::Target {
            self.0.as_ref().unwrap()
        }
    }

    fn record(value: serde_json::Value) -> RecordRoot {
        json_to_record(value).unwrap()
    }

    async fn seeded() -> TestAdaptor {
        let adaptor = TestAdaptor::default();
        for (id, name, age) in [
            ("id1", "Bob", 42.0),
            ("id2", "Dave", 23.0),
            ("id3", "Wanda", 19.0),
        ] {
            adaptor
                .insert(
                    "people",
                    record(serde_json::json!({ "id": id, "name": name, "age": age })),
                )
                .await
                .unwrap();
        }
        adaptor
    }

    #[tokio::test]
    async fn test_insert_get_update_delete() {
        let adaptor = TestAdaptor::default();

        let key = adaptor
            .insert("people", record(serde_json::json!({ "id": "id1", "name": "Bob" })))
            .await
            .unwrap();
        assert_eq!(key, "id1");

        let rec = adaptor.get_by_key("people", "id1", None).await.unwrap().unwrap();
        assert_eq!(rec.get("name"), Some(&RecordValue::String("Bob".into())));

        adaptor
            .update_by_key(
                "people",
                "id1",
                record(serde_json::json!({ "name": "Bobby" })),
                false,
            )
            .await
            .unwrap();
        let rec = adaptor.get_by_key("people", "id1", None).await.unwrap().unwrap();
        assert_eq!(rec.get("name"), Some(&RecordValue::String("Bobby".into())));

        adaptor.delete_by_key("people", "id1").await.unwrap();
        assert!(adaptor.get_by_key("people", "id1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_assigns_key_when_absent() {
        let adaptor = TestAdaptor::default();

        let k1 = adaptor
            .insert("people", record(serde_json::json!({ "name": "Bob" })))
            .await
            .unwrap();
        let k2 = adaptor
            .insert("people", record(serde_json::json!({ "name": "Dave" })))
            .await
            .unwrap();
        assert_ne!(k1, k2);

        let rec = adaptor.get_by_key("people", &k1, None).await.unwrap().unwrap();
        assert_eq!(rec.get(ID_FIELD), Some(&RecordValue::String(k1)));
    }

    #[tokio::test]
    async fn test_paged_query_filter_sort_window() {
        let adaptor = seeded().await;

        let filter = Filter::new().field("age", Condition::Gt(RecordValue::Number(20.0)));
        let sort = [SortField::new("age", Direction::Descending)];

        let page = adaptor
            .paged_query("people", &filter, None, &sort, 0, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].get("name"), Some(&RecordValue::String("Bob".into())));

        let page = adaptor
            .paged_query("people", &filter, None, &sort, 1, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].get("name"), Some(&RecordValue::String("Dave".into())));

        assert_eq!(adaptor.count("people", &filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_projection_keeps_id() {
        let adaptor = seeded().await;

        let page = adaptor
            .paged_query(
                "people",
                &Filter::new(),
                Some(&["name".to_string()]),
                &[],
                0,
                1,
            )
            .await
            .unwrap();

        assert_eq!(page[0].len(), 2);
        assert!(page[0].contains_key(ID_FIELD));
        assert!(page[0].contains_key("name"));
    }

    #[tokio::test]
    async fn test_records_stay_within_their_collection() {
        let adaptor = TestAdaptor::default();

        adaptor
            .insert("people", record(serde_json::json!({ "id": "id1" })))
            .await
            .unwrap();
        adaptor
            .insert("people2", record(serde_json::json!({ "id": "id2" })))
            .await
            .unwrap();

        let page = adaptor
            .paged_query("people", &Filter::new(), None, &[], 0, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].get(ID_FIELD), Some(&RecordValue::String("id1".into())));
    }

    #[tokio::test]
    async fn test_unknown_collection_queries_are_empty() {
        let adaptor = TestAdaptor::default();

        assert!(adaptor
            .paged_query("nope", &Filter::new(), None, &[], 0, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(adaptor.count("nope", &Filter::new()).await.unwrap(), 0);
        assert!(adaptor.get_by_key("nope", "id1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_record_is_noop() {
        let adaptor = TestAdaptor::default();
        adaptor
            .update_by_key("people", "ghost", record(serde_json::json!({ "x": 1.0 })), false)
            .await
            .unwrap();
        assert!(adaptor.get_by_key("people", "ghost", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_operator_update() {
        let adaptor = TestAdaptor::default();
        adaptor
            .insert(
                "people",
                record(serde_json::json!({ "id": "id1", "name": "Bob", "visits": 1.0 })),
            )
            .await
            .unwrap();

        adaptor
            .update_by_key(
                "people",
                "id1",
                record(serde_json::json!({
                    "$set": { "name": "Bobby" },
                    "$inc": { "visits": 2.0 },
                })),
                true,
            )
            .await
            .unwrap();

        let rec = adaptor.get_by_key("people", "id1", None).await.unwrap().unwrap();
        assert_eq!(rec.get("name"), Some(&RecordValue::String("Bobby".into())));
        assert_eq!(rec.get("visits"), Some(&RecordValue::Number(3.0)));
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let adaptor = TestAdaptor::default();

        adaptor.create_collection("people").await.unwrap();
        adaptor
            .create_indexes(
                "people",
                &[IndexSpec {
                    fields: vec![SortField::new("name", Direction::Ascending)],
                    unique: false,
                }],
            )
            .await
            .unwrap();
        adaptor
            .insert("people", record(serde_json::json!({ "id": "id1" })))
            .await
            .unwrap();

        assert_eq!(
            adaptor.collection_names().await.unwrap(),
            vec!["people".to_string()]
        );

        adaptor.drop_collection("people").await.unwrap();
        assert!(adaptor.collection_names().await.unwrap().is_empty());
        assert!(adaptor.get_by_key("people", "id1", None).await.unwrap().is_none());

        assert!(matches!(
            adaptor.drop_collection("people").await,
            Err(BackendError::CollectionNotFound { .. })
        ));
        assert!(matches!(
            adaptor.create_indexes("people", &[]).await,
            Err(BackendError::CollectionNotFound { .. })
        ));
    }
}

use std::path::Path;
use std::sync::Arc;

use rocksdb::WriteBatch;

use crate::keys;

pub type Result<T> = std::result::Result<T, RocksDbStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum RocksDbStoreError {
    #[error("RocksDB error")]
    RocksDb(#[from] rocksdb::Error),

    #[error("bincode error")]
    Bincode(#[from] bincode::Error),

    #[error("keys error")]
    Keys(#[from] keys::KeysError),

    #[error("tokio task join error")]
    TokioTaskJoin(#[from] tokio::task::JoinError),
}

/// Raw key/value layer over a RocksDB database. Everything above the byte
/// level (key layout, record encoding) lives in the adaptor; every call
/// moves the blocking RocksDB work off the async runtime.
pub(crate) struct RocksDbStore {
    db: Arc<rocksdb::DB>,
}

impl RocksDbStore {
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut options = rocksdb::Options::default();
        options.create_if_missing(true);

        let db = rocksdb::DB::open(&options, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) async fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let db = Arc::clone(&self.db);
        Ok(tokio::task::spawn_blocking(move || db.get(key)).await??)
    }

    /// Applies the puts and deletes atomically in one write batch.
    pub(crate) async fn write(
        &self,
        puts: Vec<(Vec<u8>, Vec<u8>)>,
        deletes: Vec<Vec<u8>>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);

        tokio::task::spawn_blocking(move || {
            let mut batch = WriteBatch::default();
            for (key, value) in puts {
                batch.put(key, value);
            }
            for key in deletes {
                batch.delete(key);
            }
            db.write(batch)
        })
        .await??;

        Ok(())
    }

    /// Collects every entry in the half-open `[lower, upper)` key range.
    pub(crate) async fn scan(&self, lower: Vec<u8>, upper: Vec<u8>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = Arc::clone(&self.db);

        tokio::task::spawn_blocking(move || {
            let mut opts = rocksdb::ReadOptions::default();
            opts.set_iterate_lower_bound(lower);
            opts.set_iterate_upper_bound(upper);

            db.iterator_opt(rocksdb::IteratorMode::Start, opts)
                .map(|entry| {
                    let (key, value) = entry?;
                    Ok((key.into_vec(), value.into_vec()))
                })
                .collect()
        })
        .await?
    }

    pub(crate) fn destroy(self) -> Result<()> {
        let path = self.db.path().to_path_buf();
        drop(self.db);
        rocksdb::DB::destroy(&rocksdb::Options::default(), path)?;
        Ok(())
    }
}

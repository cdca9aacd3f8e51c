#![warn(clippy::unwrap_used, clippy::expect_used)]

//! RocksDB implementation of the [`docstore::Backend`] contract.

mod adaptor;
mod keys;
mod store;

pub use adaptor::RocksDbAdaptor;
pub use keys::KeysError;
pub use store::RocksDbStoreError;

//! Key layout. Keys are tag-prefixed byte strings with `\0` separators, so
//! all records of a collection form one contiguous range:
//!
//! ```text
//! r \0 <collection> \0 <record id>    record value (bincode RecordRoot)
//! c \0 <collection>                   collection marker
//! i \0 <collection>                   index specs (bincode Vec<IndexSpec>)
//! ```
//!
//! Collection names and record ids must not contain `\0`.

pub type Result<T> = std::result::Result<T, KeysError>;

#[derive(Debug, thiserror::Error)]
pub enum KeysError {
    #[error("key is not valid utf8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("key has an unexpected layout")]
    UnexpectedLayout,
}

const RECORD_TAG: u8 = b'r';
const COLLECTION_TAG: u8 = b'c';
const INDEX_TAG: u8 = b'i';
const SEPARATOR: u8 = 0x00;

fn tagged(tag: u8, parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + parts.iter().map(|p| p.len() + 1).sum::<usize>());
    key.push(tag);
    for part in parts {
        key.push(SEPARATOR);
        key.extend_from_slice(part.as_bytes());
    }
    key
}

pub(crate) fn record_key(collection: &str, id: &str) -> Vec<u8> {
    tagged(RECORD_TAG, &[collection, id])
}

/// Half-open `[lower, upper)` range covering every record of a collection.
/// The upper bound bumps the separator after the collection name, which
/// sorts above every possible record id.
pub(crate) fn record_range(collection: &str) -> (Vec<u8>, Vec<u8>) {
    let mut lower = tagged(RECORD_TAG, &[collection]);
    lower.push(SEPARATOR);
    let mut upper = tagged(RECORD_TAG, &[collection]);
    upper.push(SEPARATOR + 1);
    (lower, upper)
}

pub(crate) fn collection_key(collection: &str) -> Vec<u8> {
    tagged(COLLECTION_TAG, &[collection])
}

/// Range covering every collection marker.
pub(crate) fn collection_range() -> (Vec<u8>, Vec<u8>) {
    (
        vec![COLLECTION_TAG, SEPARATOR],
        vec![COLLECTION_TAG, SEPARATOR + 1],
    )
}

pub(crate) fn index_key(collection: &str) -> Vec<u8> {
    tagged(INDEX_TAG, &[collection])
}

pub(crate) fn collection_from_marker(key: &[u8]) -> Result<String> {
    let name = key
        .strip_prefix(&[COLLECTION_TAG, SEPARATOR])
        .ok_or(KeysError::UnexpectedLayout)?;
    Ok(String::from_utf8(name.to_vec())?)
}

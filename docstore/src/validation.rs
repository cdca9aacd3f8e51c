use crate::record::RecordRoot;

pub type Result<T> = std::result::Result<T, ValidationError>;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("record is missing required field {field:?}")]
    MissingField { field: String },

    #[error("value at field {field:?} does not match the schema")]
    InvalidFieldValue { field: String },

    #[error("schema for the collection is not usable: {reason}")]
    InvalidSchema { reason: String },
}

/// External schema validation engine. Given the schema registered for a
/// collection, the previous record (when available) and the new value, it
/// passes or fails; the store invokes it at a fixed point in the write
/// pipeline and never interprets the schema itself.
pub trait SchemaValidator: Send + Sync {
    fn validate(
        &self,
        schema: &serde_json::Value,
        prev: Option<&RecordRoot>,
        next: &RecordRoot,
    ) -> Result<()>;
}

use crate::record::RecordRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Read,
}

impl EventKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::Read => "read",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbEvent {
    pub kind: EventKind,
    pub collection: String,
    pub key: String,
    /// Read and delete events carry the record as fetched/deleted so
    /// subscribers can audit or recover it; create and update events carry
    /// the written payload.
    pub payload: Option<RecordRoot>,
}

impl DbEvent {
    pub fn topic(&self) -> String {
        format!("{}:{}", self.kind.prefix(), self.collection)
    }
}

/// Fire-and-forget event notification. The store never consumes a return
/// value from the sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DbEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_format() {
        let event = DbEvent {
            kind: EventKind::Update,
            collection: "users".to_string(),
            key: "rec1".to_string(),
            payload: None,
        };
        assert_eq!(event.topic(), "update:users");
    }
}

/// Project identifiers are UUIDv7 (time-ordered, sortable by creation).
pub type ProjectId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// An envelope was built without a required field.
    #[error("Envelope is missing required field '{0}'")]
    MissingField(&'static str),

    /// The topic has never been published to or subscribed.
    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: usize },

    /// A delivery was committed out of order.
    #[error(
        "Out-of-order commit on {topic}[{partition}] for group {group}: expected offset {expected}, got {actual}"
    )]
    OutOfOrderCommit {
        group: String,
        topic: String,
        partition: usize,
        expected: usize,
        actual: usize,
    },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

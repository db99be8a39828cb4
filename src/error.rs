use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// Proposed status is not one of the seven enumerated literals.
    #[error("invalid application status: {0:?}")]
    InvalidStatus(String),

    #[error("university choice index {index} out of range (student has {len} choices)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Automatic note could not be built. Never fatal to a status change.
    #[error("note creation failed: {0}")]
    NoteCreation(String),

    #[error("invalid note: {0}")]
    InvalidNote(String),

    /// A stored record could not be turned into a usable student.
    #[error("malformed student record {id}: {reason}")]
    AggregationInput { id: String, reason: String },

    #[error("choice limit: {0}")]
    ChoiceLimit(String),

    #[error("choice {index} has status history and cannot be removed")]
    ChoiceHasHistory { index: usize },

    #[error("invalid student: {0}")]
    InvalidStudent(String),

    #[error("student {0} not found")]
    NotFound(Uuid),

    /// Optimistic version check failed on save.
    #[error("student {id} was modified concurrently (expected version {expected})")]
    ConcurrentModification { id: Uuid, expected: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

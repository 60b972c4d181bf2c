use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Schema error in {field}: {reason}")]
    Schema { field: String, reason: String },

    #[error("Illegal mode: {0}")]
    Mode(String),

    #[error("Invalid document type: {0}")]
    InvalidDocumentType(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Event not found: {0}")]
    EventNotFound(uuid::Uuid),

    #[error("Corrupt stored event: {0}")]
    CorruptEvent(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Configuration errors are fatal for the whole check; everything else
    /// is an operational failure of the current invocation.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. } | Self::Mode(_) | Self::InvalidDocumentType(_) | Self::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

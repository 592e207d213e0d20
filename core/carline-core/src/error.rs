//! Error types for carline-core operations.

/// All errors that can occur in carline-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CarlineError {
    // ─────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("{field} is required")]
    MissingField { field: &'static str },

    // ─────────────────────────────────────────────────────────────────────
    // Record Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("record store unavailable: {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record store rejected the request: {code}: {message}")]
    StoreRejected { code: String, message: String },

    #[error("unexpected record store response: {context}")]
    StoreProtocol { context: String },

    #[error("subscription lost: {context}")]
    SubscriptionLost { context: String },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("access code rejected")]
    AccessCodeRejected,

    #[error("teacher login required")]
    TeacherRequired,

    #[error("home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using CarlineError.
pub type Result<T> = std::result::Result<T, CarlineError>;

// Conversion for string error compatibility
impl From<CarlineError> for String {
    fn from(err: CarlineError) -> String {
        err.to_string()
    }
}

use thiserror::Error;

/// Why the safety gate refused a candidate query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Only SELECT statements are allowed.")]
    NotASelectStatement,

    #[error("Query contains forbidden keyword: {0}")]
    DangerousKeyword(String),

    #[error("Access to system tables is blocked.")]
    SystemSchemaAccessBlocked,
}

impl Rejection {
    /// Stable reason code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotASelectStatement => "NotASelectStatement",
            Rejection::DangerousKeyword(_) => "DangerousKeyword",
            Rejection::SystemSchemaAccessBlocked => "SystemSchemaAccessBlocked",
        }
    }
}

#[derive(Error, Debug)]
pub enum Text2SqlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Generated SQL is empty after sanitization.")]
    GenerationFailed,

    #[error("Validation error: {0}")]
    Rejected(#[from] Rejection),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<sqlx::Error> for Text2SqlError {
    fn from(err: sqlx::Error) -> Self {
        Text2SqlError::Database(err.to_string())
    }
}

impl Text2SqlError {
    /// HTTP status the service boundary reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Text2SqlError::Rejected(_) | Text2SqlError::GenerationFailed => 400,
            Text2SqlError::RateLimited => 429,
            _ => 500,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Text2SqlError::Rejected(rejection) => rejection.code(),
            Text2SqlError::GenerationFailed => "GenerationFailed",
            Text2SqlError::ExecutionFailed(_) => "ExecutionFailed",
            Text2SqlError::RateLimited => "RateLimited",
            _ => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Text2SqlError>;

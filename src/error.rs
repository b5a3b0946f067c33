/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid session code: {0}")]
    InvalidCode(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Active session already exists with code {0}")]
    ActiveSessionExists(String),

    #[error("Session code already in use: {0}")]
    CodeTaken(String),

    #[error("Session {0} already has two participants")]
    SessionFull(String),

    #[error("Cannot join own session {0}")]
    SelfJoin(String),

    #[error("Message delivery failed: {0}")]
    Delivery(String),

    #[error("Recommendation generation failed: {0}")]
    Recommender(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

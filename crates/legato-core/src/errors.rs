use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Sentinel error kinds surfaced by the core. A transport layer (not part of
/// this crate) maps these onto wire status codes; the core never encodes a
/// status code itself.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("failed precondition: {0}")]
    FailedPrecondition(&'static str),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),

    #[error("unavailable: {0}")]
    Unavailable(&'static str),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    /// The fixed, user-safe string from the centralized response catalog.
    /// Validation errors carry their field message verbatim; everything else
    /// is collapsed to a generic string so internals never leak to callers.
    pub fn public_message(&self) -> String {
        match self {
            CoreError::InvalidArgument(msg) => msg.clone(),
            CoreError::Unauthenticated => "authentication required".to_string(),
            CoreError::PermissionDenied(_) => "you do not have permission to do that".to_string(),
            CoreError::NotFound(what) => format!("{what} not found"),
            CoreError::FailedPrecondition(why) => why.to_string(),
            CoreError::ResourceExhausted(_) => "rate limit exceeded".to_string(),
            CoreError::Internal(_) => "internal server error".to_string(),
            CoreError::Unavailable(_) => "service unavailable".to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                CoreError::Unavailable("storage")
            }
            other => CoreError::internal(other),
        }
    }
}

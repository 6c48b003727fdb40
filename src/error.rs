use tonic::{Code, Status};

/// Service-local error kinds, mapped at the RPC boundary per the error
/// handling design: validation and not-found surface directly; transient
/// kinds are expected to be absorbed by the outbox/consumer retry layers,
/// not propagated to callers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("webhook {0} not found")]
    WebhookNotFound(i64),

    #[error("invalid secret")]
    InvalidSecret,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn to_status(&self) -> Status {
        match self {
            AppError::Validation(msg) => Status::new(Code::InvalidArgument, msg.clone()),
            AppError::WebhookNotFound(id) => {
                Status::new(Code::NotFound, format!("webhook {id} not found"))
            }
            AppError::InvalidSecret => Status::new(Code::Unauthenticated, "invalid secret"),
            AppError::Transient(_) | AppError::Fatal(_) => {
                Status::new(Code::Internal, "internal error")
            }
        }
    }

    pub fn log(&self) {
        match self {
            AppError::Validation(_) | AppError::WebhookNotFound(_) | AppError::InvalidSecret => {
                tracing::warn!(error = %self, "request rejected");
            }
            AppError::Transient(_) => tracing::warn!(error = %self, "transient failure"),
            AppError::Fatal(_) => tracing::error!(error = %self, "fatal error"),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Transient(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transient(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Transient(err.to_string())
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// A delivery path is not configured (no hubs, no VAPID keys).
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    /// Input rejected before any network or crypto work.
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("no notification hub accepts registrations for {comb} (created {timestamp}); hubs: {windows}")]
    Routing {
        comb: Uuid,
        timestamp: DateTime<Utc>,
        windows: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("push subscription expired")]
    SubscriptionExpired,
    #[error("push payload too large")]
    PayloadTooLarge,
    #[error("crypto error: {0}")]
    Crypto(&'static str),
    #[error("registration store error: {0}")]
    Storage(#[from] redb::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("registration store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
}

macro_rules! storage_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PushError {
                fn from(err: $ty) -> Self {
                    PushError::Storage(err.into())
                }
            }
        )*
    };
}

storage_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl PushError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PushError::Invalid(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PushError::NotConfigured(_) | PushError::Routing { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PushError::Invalid(_) => StatusCode::BAD_REQUEST,
            PushError::Transport(_) | PushError::Status { .. } | PushError::SubscriptionExpired => {
                StatusCode::BAD_GATEWAY
            }
            PushError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            PushError::Crypto(_)
            | PushError::Storage(_)
            | PushError::Serialization(_)
            | PushError::StoreTask(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<PushError> for AppError {
    fn from(err: PushError) -> Self {
        AppError::new(err.status(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

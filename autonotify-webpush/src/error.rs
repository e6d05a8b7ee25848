use thiserror::Error;

pub type WebPushResult<T> = Result<T, WebPushError>;

/// Errors raised while building or sending a single push message, plus the
/// configuration errors that stop the subsystem from starting at all.
#[derive(Debug, Error)]
pub enum WebPushError {
    #[error("Missing or unusable configuration: {0}")]
    Configuration(String),

    #[error("Invalid key material: {0}")]
    KeyFormat(String),

    #[error("Invalid ECDSA signature encoding: {0}")]
    SignatureFormat(String),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Payload too large by {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid encrypted record: {0}")]
    InvalidRecord(String),

    #[error("Crypto library error")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Error while sending to the push service")]
    Transport(#[from] reqwest::Error),

    #[error("Subscription store error: {0}")]
    Store(String),
}

impl WebPushError {
    /// Whether this error describes input that can never succeed (bad keys,
    /// bad records) as opposed to a failure of the environment.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            WebPushError::KeyFormat(_)
                | WebPushError::SignatureFormat(_)
                | WebPushError::InvalidSubscription(_)
                | WebPushError::InvalidEndpoint(_)
                | WebPushError::PayloadTooLarge(_)
                | WebPushError::InvalidRecord(_)
        )
    }
}
